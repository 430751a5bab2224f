//! scanbridge Core - Local scan bridge
//!
//! This crate connects an MTA's per-message local scan hook to a Lua
//! policy module:
//! - Runtime lifecycle and module loading
//! - Context marshaling into the builtin module
//! - Recipient reconciliation
//! - Result decoding and failure dispositions
//! - Log and header text sanitization

pub mod bridge;
pub mod decode;
pub mod error;
pub mod host;
pub mod marshal;
pub mod reconcile;
pub mod runtime;
pub mod sanitize;

pub use bridge::LocalScanBridge;
pub use decode::DispositionOutcome;
pub use error::{BridgeError, ExpansionError};
pub use host::{Host, HostServices, LogRecord, MemoryHost, MessageAccess};
pub use reconcile::{RecipientPlan, WorkingRecipients};
pub use runtime::{ModuleLoader, ScriptRuntime, SearchPathLoader, SourceLoader};
pub use sanitize::sanitize;
