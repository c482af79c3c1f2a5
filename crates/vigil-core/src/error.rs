//! Error types for the Vigil synchronization layer

use thiserror::Error;

pub type Result<T> = std::result::Result<T, SyncError>;

#[derive(Error, Debug)]
pub enum SyncError {
    #[error("Unauthenticated: no active session")]
    Unauthenticated,

    #[error("Resource unavailable: {resource}")]
    ResourceUnavailable { resource: String },

    #[error("Transient failure after {attempts} attempt(s): {reason}")]
    Transient { attempts: u32, reason: String },

    #[error("Command rejected: {command} is already in flight")]
    CommandRejected { command: String },

    #[error("Transport failure: {reason}")]
    Transport { reason: String },

    #[error("Backend fault{}: {message}", code_suffix(.code))]
    Backend {
        code: Option<String>,
        message: String,
    },

    #[error("Invalid configuration: {reason}")]
    Config { reason: String },

    #[error("Serialization error: {source}")]
    SerializationError {
        #[from]
        source: serde_json::Error,
    },
}

fn code_suffix(code: &Option<String>) -> String {
    code.as_deref().map(|c| format!(" {c}")).unwrap_or_default()
}

impl SyncError {
    pub fn transport(reason: impl Into<String>) -> Self {
        SyncError::Transport {
            reason: reason.into(),
        }
    }

    pub fn backend(code: Option<impl Into<String>>, message: impl Into<String>) -> Self {
        SyncError::Backend {
            code: code.map(Into::into),
            message: message.into(),
        }
    }

    /// Fault code reported by the backend, if any.
    pub fn fault_code(&self) -> Option<&str> {
        match self {
            SyncError::Backend { code, .. } => code.as_deref(),
            _ => None,
        }
    }
}
