use thiserror::Error;

#[derive(Error, Debug)]
pub enum S7Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("timeout")]
    Timeout,

    #[error("no response from peer")]
    NoResponse,

    #[error("protocol error: {0}")]
    Protocol(String),

    /// Response shape does not match the outstanding request. Fatal to the
    /// session; the client moves to `Faulted` and must be reconnected.
    #[error("protocol desync: {0}")]
    ProtocolDesync(String),

    #[error("truncated frame: declared {declared} bytes, got {actual}")]
    FrameTruncated { declared: usize, actual: usize },

    #[error("invalid address: {0}")]
    InvalidAddress(String),

    #[error("request exceeds negotiated PDU size ({required} > {negotiated})")]
    PduTooLarge { required: usize, negotiated: usize },

    #[error("not connected")]
    NotConnected,
}
