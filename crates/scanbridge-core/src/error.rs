//! Bridge failure taxonomy

use thiserror::Error;

/// Failures inside the bridge itself.
///
/// All of these end the scan with the configured fallback disposition;
/// none of them crosses into the host as a panic.
#[derive(Error, Debug)]
pub enum BridgeError {
    #[error("failed to load module '{module}': {reason}")]
    ModuleLoad { module: String, reason: String },

    #[error("module '{module}' has no '{function}' function")]
    FunctionMissing { module: String, function: String },

    #[error("'{function}' raised an error: {reason}")]
    Invocation { function: String, reason: String },

    #[error("'{function}' did not return an integer disposition")]
    BadReturnValue { function: String },

    #[error("scripting runtime error: {0}")]
    Runtime(#[from] mlua::Error),
}

impl BridgeError {
    /// Fixed diagnostic written to the host reject log
    pub fn log_message(&self) -> String {
        match self {
            BridgeError::ModuleLoad { module, .. } => {
                format!("Couldn't import '{}' module", module)
            }
            BridgeError::FunctionMissing { module, function } => {
                format!("Lua {} module doesn't have a '{}' function", module, function)
            }
            BridgeError::Invocation { function, .. } => {
                format!("Lua '{}' function failed", function)
            }
            BridgeError::BadReturnValue { function } => {
                format!("Lua '{}' function didn't return integer", function)
            }
            BridgeError::Runtime(_) => "Lua runtime failure in local_scan bridge".to_string(),
        }
    }

    /// Fixed text handed to the host for the transport-level response
    pub fn return_text(&self) -> &'static str {
        match self {
            BridgeError::ModuleLoad { .. } => "Internal error, missing module",
            BridgeError::FunctionMissing { .. } => "Internal error, missing function",
            BridgeError::Invocation { .. } => "Internal error, local_scan function failed",
            BridgeError::BadReturnValue { .. } => "Internal error, bad return code",
            BridgeError::Runtime(_) => "Internal error, scripting runtime failure",
        }
    }

    /// Underlying detail worth surfacing in the host log, if any
    pub fn detail(&self) -> Option<&str> {
        match self {
            BridgeError::ModuleLoad { reason, .. } | BridgeError::Invocation { reason, .. } => {
                Some(reason)
            }
            _ => None,
        }
    }
}

/// Raised into the script when host expansion fails
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("expansion of [{input}] failed")]
pub struct ExpansionError {
    pub input: String,
}
