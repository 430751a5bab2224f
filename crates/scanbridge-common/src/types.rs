//! Common types for scanbridge

use serde::{Deserialize, Serialize};
use std::fmt;

/// Disposition codes understood by the host's local-scan inspection point.
///
/// A policy script may return any integer; these are the values the host
/// documents and the bridge exposes to scripts as constants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LocalScanCode {
    /// Accept the message
    Accept,
    /// Accept the message and freeze it on the queue
    AcceptFreeze,
    /// Accept the message but only queue it, no immediate delivery
    AcceptQueue,
    /// Permanently reject the message
    Reject,
    /// Permanently reject without logging the header lines
    RejectNoLogHeader,
    /// Temporarily reject the message
    TempReject,
    /// Temporarily reject without logging the header lines
    TempRejectNoLogHeader,
}

impl LocalScanCode {
    /// All known codes, in the order their constants are exposed
    pub const ALL: [LocalScanCode; 7] = [
        LocalScanCode::Accept,
        LocalScanCode::AcceptFreeze,
        LocalScanCode::AcceptQueue,
        LocalScanCode::Reject,
        LocalScanCode::RejectNoLogHeader,
        LocalScanCode::TempReject,
        LocalScanCode::TempRejectNoLogHeader,
    ];

    /// Integer value passed back to the host
    pub fn code(self) -> i32 {
        match self {
            LocalScanCode::Accept => 0,
            LocalScanCode::AcceptFreeze => 1,
            LocalScanCode::AcceptQueue => 2,
            LocalScanCode::Reject => 7,
            LocalScanCode::RejectNoLogHeader => 8,
            LocalScanCode::TempReject => 9,
            LocalScanCode::TempRejectNoLogHeader => 10,
        }
    }

    /// Name of the constant scripts use for this code
    pub fn constant_name(self) -> &'static str {
        match self {
            LocalScanCode::Accept => "LOCAL_SCAN_ACCEPT",
            LocalScanCode::AcceptFreeze => "LOCAL_SCAN_ACCEPT_FREEZE",
            LocalScanCode::AcceptQueue => "LOCAL_SCAN_ACCEPT_QUEUE",
            LocalScanCode::Reject => "LOCAL_SCAN_REJECT",
            LocalScanCode::RejectNoLogHeader => "LOCAL_SCAN_REJECT_NOLOGHDR",
            LocalScanCode::TempReject => "LOCAL_SCAN_TEMPREJECT",
            LocalScanCode::TempRejectNoLogHeader => "LOCAL_SCAN_TEMPREJECT_NOLOGHDR",
        }
    }

    /// Look up a known code by its integer value
    pub fn from_code(code: i32) -> Option<Self> {
        Self::ALL.into_iter().find(|c| c.code() == code)
    }
}

/// Host log selector.
///
/// Selectors are bit flags, so a script may write to several logs at once
/// with `LOG_MAIN | LOG_REJECT`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LogSelector(u32);

impl LogSelector {
    pub const MAIN: LogSelector = LogSelector(1);
    pub const PANIC: LogSelector = LogSelector(2);
    pub const REJECT: LogSelector = LogSelector(16);

    /// Named selectors exposed to scripts
    pub const NAMED: [(&'static str, LogSelector); 3] = [
        ("LOG_MAIN", LogSelector::MAIN),
        ("LOG_PANIC", LogSelector::PANIC),
        ("LOG_REJECT", LogSelector::REJECT),
    ];

    /// Build a selector from raw bits
    pub fn from_bits(bits: u32) -> Self {
        Self(bits)
    }

    /// Raw bit value
    pub fn bits(self) -> u32 {
        self.0
    }

    /// Whether every bit of `other` is set in this selector
    pub fn contains(self, other: LogSelector) -> bool {
        self.0 & other.0 == other.0
    }
}

impl Default for LogSelector {
    fn default() -> Self {
        LogSelector::MAIN
    }
}

impl std::ops::BitOr for LogSelector {
    type Output = LogSelector;

    fn bitor(self, rhs: LogSelector) -> LogSelector {
        LogSelector(self.0 | rhs.0)
    }
}

impl fmt::Display for LogSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<&str> = Self::NAMED
            .iter()
            .filter(|(_, sel)| self.contains(*sel))
            .map(|(name, _)| *name)
            .collect();

        if names.is_empty() {
            write!(f, "{:#x}", self.0)
        } else {
            write!(f, "{}", names.join("|"))
        }
    }
}

/// Single-character header type tag the host assigns to header lines
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HeaderType {
    Bcc,
    Cc,
    From,
    MessageId,
    Received,
    ReplyTo,
    Sender,
    To,
    /// Header marked as deleted by the host
    Deleted,
    /// Any other header
    Other,
}

impl HeaderType {
    /// The tag character scripts see
    pub fn as_char(self) -> char {
        match self {
            HeaderType::Bcc => 'B',
            HeaderType::Cc => 'C',
            HeaderType::From => 'F',
            HeaderType::MessageId => 'I',
            HeaderType::Received => 'P',
            HeaderType::ReplyTo => 'R',
            HeaderType::Sender => 'S',
            HeaderType::To => 'T',
            HeaderType::Deleted => '*',
            HeaderType::Other => ' ',
        }
    }

    /// Parse a tag character; unknown tags map to `Other`
    pub fn from_char(c: char) -> Self {
        match c {
            'B' => HeaderType::Bcc,
            'C' => HeaderType::Cc,
            'F' => HeaderType::From,
            'I' => HeaderType::MessageId,
            'P' => HeaderType::Received,
            'R' => HeaderType::ReplyTo,
            'S' => HeaderType::Sender,
            'T' => HeaderType::To,
            '*' => HeaderType::Deleted,
            _ => HeaderType::Other,
        }
    }

    /// Classify a raw header line (`Name: value`) by its field name
    pub fn classify(text: &str) -> Self {
        let name = match text.split_once(':') {
            Some((name, _)) => name.trim(),
            None => return HeaderType::Other,
        };

        match name.to_ascii_lowercase().as_str() {
            "bcc" => HeaderType::Bcc,
            "cc" => HeaderType::Cc,
            "from" => HeaderType::From,
            "message-id" => HeaderType::MessageId,
            "received" => HeaderType::Received,
            "reply-to" => HeaderType::ReplyTo,
            "sender" => HeaderType::Sender,
            "to" => HeaderType::To,
            _ => HeaderType::Other,
        }
    }
}

/// A header line as the host stores it: raw text including the
/// terminating newline, plus its type tag
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeaderLine {
    pub text: String,
    pub header_type: HeaderType,
}

impl HeaderLine {
    /// Create a header line with an explicit type
    pub fn new(text: impl Into<String>, header_type: HeaderType) -> Self {
        Self {
            text: text.into(),
            header_type,
        }
    }

    /// Create a header line, deriving the type from the field name
    pub fn classified(text: impl Into<String>) -> Self {
        let text = text.into();
        let header_type = HeaderType::classify(&text);
        Self { text, header_type }
    }
}

/// Session attributes of the message being scanned.
///
/// Any field the host has no value for stays `None`; it is never
/// replaced with an empty string.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionInfo {
    /// Envelope sender (`None` for the null sender)
    pub sender_address: Option<String>,
    /// Local interface address the message arrived on
    pub interface_address: Option<String>,
    /// Local interface port
    pub interface_port: i32,
    /// Received protocol name (smtp, esmtps, local, ...)
    pub received_protocol: Option<String>,
    /// Remote host IP address
    pub sender_host_address: Option<String>,
    /// Authenticated id of the remote host, if it authenticated
    pub sender_host_authenticated: Option<String>,
    /// Remote host name from reverse lookup
    pub sender_host_name: Option<String>,
    /// Remote host port
    pub sender_host_port: i32,
}

/// Outcome handed back to the host for one scan
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanResult {
    /// Disposition code
    pub code: i32,
    /// Diagnostic text for the transport-level response
    pub return_text: Option<String>,
}

impl ScanResult {
    /// Result with no diagnostic text
    pub fn code(code: i32) -> Self {
        Self {
            code,
            return_text: None,
        }
    }

    /// Result carrying diagnostic text
    pub fn with_text(code: i32, text: impl Into<String>) -> Self {
        Self {
            code,
            return_text: Some(text.into()),
        }
    }

    /// The known disposition this code maps to, if any
    pub fn known_code(&self) -> Option<LocalScanCode> {
        LocalScanCode::from_code(self.code)
    }
}
