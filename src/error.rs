use crate::config::ConfigError;
use ssip_protocol::SsipError;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, ClientError>;

#[derive(Error, Debug)]
pub enum ClientError {
    /// Rejected locally; nothing was sent.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error(transparent)]
    Ssip(#[from] SsipError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Unexpected reply to '{command}': {reason}")]
    UnexpectedReply { command: String, reason: String },
}

impl ClientError {
    pub(crate) fn invalid(reason: impl Into<String>) -> Self {
        ClientError::InvalidArgument(reason.into())
    }

    /// The daemon answered, but refused the request.
    pub fn is_rejected(&self) -> bool {
        matches!(
            self,
            ClientError::Ssip(SsipError::Command { .. } | SsipError::Data { .. })
        )
    }

    /// The connection is gone and must be re-established.
    pub fn is_connection_lost(&self) -> bool {
        matches!(self, ClientError::Ssip(e) if e.is_fatal())
    }
}
