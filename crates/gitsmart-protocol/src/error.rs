//! Smart protocol error types.

use thiserror::Error;

/// Errors that can occur while talking the smart protocol.
#[derive(Debug, Error)]
pub enum SmartError {
    /// Malformed pkt-line framing or payload.
    #[error("invalid pkt-line: {0}")]
    WireFormat(String),

    /// Well-formed packet that is not valid at this point of the exchange.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// The remote reported an error, either as an `ERR` line, on the
    /// sideband error channel or as a failed unpack.
    #[error("remote error: {0}")]
    RemoteReported(String),

    /// The operation was cancelled by the caller.
    #[error("the operation was cancelled by the user")]
    Cancelled,

    /// The request can not be expressed against this remote.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// The pack writer refused data.
    #[error("pack writer error: {0}")]
    PackWriter(String),

    /// Invalid tuning values.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// I/O error from the underlying stream.
    #[error("transport error: {0}")]
    Transport(#[from] std::io::Error),
}

impl SmartError {
    /// Returns true if the connection can not be used after this error.
    pub fn is_fatal(&self) -> bool {
        !matches!(
            self,
            Self::InvalidRequest(_) | Self::Config(_) | Self::Cancelled
        )
    }

    pub(crate) fn early_eof() -> Self {
        Self::Protocol("early EOF".to_string())
    }

    pub(crate) fn unexpected(packet: &crate::Packet, context: &str) -> Self {
        Self::Protocol(format!("unexpected {} packet {}", packet.kind(), context))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = SmartError::WireFormat("bad length".to_string());
        assert_eq!(err.to_string(), "invalid pkt-line: bad length");
        assert_eq!(
            SmartError::Cancelled.to_string(),
            "the operation was cancelled by the user"
        );
    }

    #[test]
    fn test_io_error_converts_to_transport() {
        let io = std::io::Error::new(std::io::ErrorKind::ConnectionReset, "reset");
        let err: SmartError = io.into();
        assert!(matches!(err, SmartError::Transport(_)));
        assert!(err.is_fatal());
    }

    #[test]
    fn test_fatality() {
        assert!(SmartError::Protocol("x".into()).is_fatal());
        assert!(SmartError::RemoteReported("x".into()).is_fatal());
        assert!(!SmartError::Cancelled.is_fatal());
        assert!(!SmartError::InvalidRequest("x".into()).is_fatal());
    }
}
