//! Host MTA surface
//!
//! The bridge only sees the MTA through these traits: the message data
//! it reads at call start and whose recipient list it rewrites, and the
//! services (expansion, logging, header append) scripts reach through the
//! builtin module.

use chrono::{DateTime, Utc};
use scanbridge_common::types::{HeaderLine, HeaderType, LogSelector, SessionInfo};
use serde::Serialize;
use std::collections::HashMap;

/// Data surface of the message being scanned
pub trait MessageAccess {
    /// Session attributes of the message
    fn session(&self) -> SessionInfo;

    /// Header lines in the host's native order
    fn headers(&self) -> Vec<HeaderLine>;

    /// Envelope recipient addresses, in host order
    fn recipients(&self) -> Vec<String>;

    /// Remove the recipient at `index`, shifting later entries down by one
    fn remove_recipient(&mut self, index: usize);

    /// Append a new recipient
    fn add_recipient(&mut self, address: &str);

    /// Drop every recipient
    fn clear_recipients(&mut self);
}

/// Services the host offers to policy scripts.
///
/// Text reaching `log_write` and `header_add` has already been made safe
/// for printf-style formatting.
pub trait HostServices {
    /// Run the host's string expansion; `None` when expansion fails
    fn expand(&self, text: &str) -> Option<String>;

    /// Write a line to the host logs selected by `selector`
    fn log_write(&mut self, selector: LogSelector, text: &str);

    /// Append a header line to the message
    fn header_add(&mut self, header_type: HeaderType, text: &str);
}

/// Everything the bridge needs from the MTA
pub trait Host: MessageAccess + HostServices {}

impl<T: MessageAccess + HostServices + ?Sized> Host for T {}

/// A line written to the in-memory host log
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LogRecord {
    pub selector: LogSelector,
    pub text: String,
    pub logged_at: DateTime<Utc>,
}

/// Host that keeps the whole message in memory.
///
/// Used by the dry-run harness and by tests. Expansion substitutes
/// `$name` and `${name}` from a variable table and fails on unknown
/// variables or an unterminated `${`.
#[derive(Debug, Clone, Default)]
pub struct MemoryHost {
    session: SessionInfo,
    headers: Vec<HeaderLine>,
    recipients: Vec<String>,
    variables: HashMap<String, String>,
    log: Vec<LogRecord>,
}

impl MemoryHost {
    /// Create a host for a message with the given session attributes
    pub fn new(session: SessionInfo) -> Self {
        let mut variables = HashMap::new();
        if let Some(ref sender) = session.sender_address {
            variables.insert("sender_address".to_string(), sender.clone());
        }
        if let Some(ref address) = session.sender_host_address {
            variables.insert("sender_host_address".to_string(), address.clone());
        }
        if let Some(ref name) = session.sender_host_name {
            variables.insert("sender_host_name".to_string(), name.clone());
        }
        if let Some(ref protocol) = session.received_protocol {
            variables.insert("received_protocol".to_string(), protocol.clone());
        }

        Self {
            session,
            variables,
            ..Default::default()
        }
    }

    /// Set the envelope recipients
    pub fn with_recipients<I, S>(mut self, recipients: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.recipients = recipients.into_iter().map(Into::into).collect();
        self
    }

    /// Append a header line
    pub fn with_header(mut self, header: HeaderLine) -> Self {
        self.headers.push(header);
        self
    }

    /// Define an expansion variable
    pub fn with_variable(mut self, name: &str, value: &str) -> Self {
        self.variables.insert(name.to_string(), value.to_string());
        self
    }

    /// Current header lines
    pub fn header_lines(&self) -> &[HeaderLine] {
        &self.headers
    }

    /// Current recipients
    pub fn recipient_list(&self) -> &[String] {
        &self.recipients
    }

    /// Lines written to the log so far
    pub fn log_records(&self) -> &[LogRecord] {
        &self.log
    }

    fn expand_variables(&self, text: &str) -> Option<String> {
        let mut out = String::with_capacity(text.len());
        let mut rest = text;

        while let Some(pos) = rest.find('$') {
            out.push_str(&rest[..pos]);
            rest = &rest[pos + 1..];

            let (name, remainder) = if let Some(braced) = rest.strip_prefix('{') {
                let end = braced.find('}')?;
                (&braced[..end], &braced[end + 1..])
            } else {
                let end = rest
                    .find(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
                    .unwrap_or(rest.len());
                (&rest[..end], &rest[end..])
            };

            if name.is_empty() {
                return None;
            }

            out.push_str(self.variables.get(name)?);
            rest = remainder;
        }

        out.push_str(rest);
        Some(out)
    }
}

impl MessageAccess for MemoryHost {
    fn session(&self) -> SessionInfo {
        self.session.clone()
    }

    fn headers(&self) -> Vec<HeaderLine> {
        self.headers.clone()
    }

    fn recipients(&self) -> Vec<String> {
        self.recipients.clone()
    }

    fn remove_recipient(&mut self, index: usize) {
        if index < self.recipients.len() {
            self.recipients.remove(index);
        }
    }

    fn add_recipient(&mut self, address: &str) {
        self.recipients.push(address.to_string());
    }

    fn clear_recipients(&mut self) {
        self.recipients.clear();
    }
}

impl HostServices for MemoryHost {
    fn expand(&self, text: &str) -> Option<String> {
        self.expand_variables(text)
    }

    fn log_write(&mut self, selector: LogSelector, text: &str) {
        self.log.push(LogRecord {
            selector,
            text: text.to_string(),
            logged_at: Utc::now(),
        });
    }

    fn header_add(&mut self, header_type: HeaderType, text: &str) {
        self.headers.push(HeaderLine::new(text, header_type));
    }
}
