//! Message file parsing for the harness

use mail_parser::MessageParser;
use scanbridge_common::types::HeaderLine;
use scanbridge_common::{Error, Result};

/// Read the header section of a message.
///
/// Each stored line is the raw field as it appears in the file, folds
/// included, with CRLF turned into a bare `\n`.
pub fn parse_headers(raw: &[u8]) -> Result<Vec<HeaderLine>> {
    if raw.is_empty() {
        return Ok(Vec::new());
    }

    let parsed = MessageParser::default()
        .parse(raw)
        .ok_or_else(|| Error::Host("failed to parse message".to_string()))?;

    let headers = parsed
        .headers()
        .iter()
        .filter_map(|header| raw.get(header.offset_field as usize..header.offset_end as usize))
        .map(|field| {
            let field = String::from_utf8_lossy(field);
            let mut text = field.trim_end_matches(['\r', '\n']).replace("\r\n", "\n");
            text.push('\n');
            HeaderLine::classified(text)
        })
        .collect();

    Ok(headers)
}
