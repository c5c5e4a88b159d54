use cmbus_transport::TransportError;

/// Errors that can occur while building, inspecting, or moving envelopes.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    /// The envelope has no resolvable tag frame, or a stream read was malformed.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// A non-blocking receive found nothing ready.
    #[error("operation would block")]
    WouldBlock,

    /// The caller asked for something the envelope format cannot express.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// A reply address was requested from an envelope that never crossed a hop.
    #[error("envelope carries no sender address")]
    NoSender,

    /// The underlying channel or stream failed.
    #[error("transport error: {0}")]
    Transport(TransportError),
}

impl From<TransportError> for FrameError {
    fn from(err: TransportError) -> Self {
        match err {
            TransportError::WouldBlock => FrameError::WouldBlock,
            other => FrameError::Transport(other),
        }
    }
}

impl From<std::io::Error> for FrameError {
    fn from(err: std::io::Error) -> Self {
        if err.kind() == std::io::ErrorKind::WouldBlock {
            FrameError::WouldBlock
        } else {
            FrameError::Transport(TransportError::Io(err))
        }
    }
}

pub type Result<T> = std::result::Result<T, FrameError>;
