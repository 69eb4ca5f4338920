use caseta_protocol::ScaleError;

use crate::session::SessionError;

/// Errors surfaced by the bridge.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BridgeError {
    /// Network, TLS, timeout or credential trouble. Retried by the supervisor.
    #[error("connection failed: {0}")]
    Connection(String),

    /// Unusable data from the hub. Logged; never tears the connection down.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Rejected locally before any hub call.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("command for {device_id} failed: {source}")]
    CommandFailed {
        device_id: String,
        #[source]
        source: SessionError,
    },

    #[error("hub is not connected")]
    NotConnected,

    /// The connect attempt was overtaken by a disconnect.
    #[error("connect superseded by disconnect")]
    Superseded,
}

impl From<ScaleError> for BridgeError {
    fn from(e: ScaleError) -> Self {
        BridgeError::InvalidArgument(e.to_string())
    }
}

impl BridgeError {
    /// Transient failures the supervisor retries.
    pub fn is_retryable(&self) -> bool {
        matches!(self, BridgeError::Connection(_))
    }
}
