use thiserror::Error;

/// Error codes surfaced through the virtual channel facade.
///
/// These mirror the classic WTS/virtual channel API status codes; they are
/// returned to plugins, never raised across the callback boundary.
#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("bad initialization handle")]
    BadInitHandle,
    #[error("initialization error")]
    InitializationError,
    #[error("already connected")]
    AlreadyConnected,
    #[error("too many channels")]
    TooManyChannels,
    #[error("unknown channel name")]
    UnknownChannelName,
    #[error("channel already open")]
    AlreadyOpen,
    #[error("channel not open")]
    NotOpen,
    #[error("connection failed")]
    ConnectFailed,
    #[error("security negotiation failed")]
    NegotiationFailed,
    #[error("out of memory")]
    NoMemory,
    #[error("not ready")]
    NotReady,
    #[error("channel PDU error")]
    Pdu(#[from] rdpmux_pdu::PduError),
    #[error("IO error")]
    Io(#[from] std::io::Error),
}

pub type ChannelResult<T> = Result<T, ChannelError>;
