use thiserror::Error;

pub type Result<T> = std::result::Result<T, SsipError>;

#[derive(Error, Debug)]
pub enum SsipError {
    #[error("Failed to connect to {address}: {source}")]
    Connect {
        address: String,
        #[source]
        source: std::io::Error,
    },

    /// The socket failed or the connection is closed or closing.
    #[error("Communication error: {0}")]
    Communication(String),

    /// The daemon sent something that is not valid SSIP. The connection is
    /// unusable afterwards.
    #[error("Protocol violation: {0}")]
    ProtocolViolation(String),

    #[error("Command '{command}' failed: {code} {message}")]
    Command {
        code: u16,
        message: String,
        command: String,
    },

    #[error("Data block rejected: {code} {message}")]
    Data {
        code: u16,
        message: String,
        data: String,
    },
}

impl SsipError {
    /// Reply code for errors reported by the daemon.
    pub fn code(&self) -> Option<u16> {
        match self {
            SsipError::Command { code, .. } | SsipError::Data { code, .. } => Some(*code),
            _ => None,
        }
    }

    /// True when the connection can no longer be used.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            SsipError::Connect { .. } | SsipError::Communication(_) | SsipError::ProtocolViolation(_)
        )
    }
}
