#![cfg_attr(doc, doc = include_str!("../README.md"))]

use core::fmt;

use rdpmux_core::ReadCursor;

#[macro_use]
mod macros;

pub mod gcc;
pub mod mcs;
pub mod nego;
pub mod tpdu;
pub mod tpkt;
pub mod x224;

pub(crate) mod ber;
pub mod per;

// Re-export rdpmux_core crate for convenience
#[rustfmt::skip] // do not re-order this pub use
pub use rdpmux_core;
pub use rdpmux_core::{DecodeError, DecodeResult, EncodeError, EncodeResult};

pub type PduResult<T> = Result<T, PduError>;

pub type PduError = rdpmux_error::Error<PduErrorKind>;

#[non_exhaustive]
#[derive(Debug)]
pub enum PduErrorKind {
    Encode(EncodeError),
    Decode(DecodeError),
    Other { description: &'static str },
    Custom,
}

impl std::error::Error for PduErrorKind {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Encode(e) => Some(e),
            Self::Decode(e) => Some(e),
            Self::Other { .. } | Self::Custom => None,
        }
    }
}

impl fmt::Display for PduErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Encode(_) => write!(f, "encode error"),
            Self::Decode(_) => write!(f, "decode error"),
            Self::Other { description } => write!(f, "{description}"),
            Self::Custom => write!(f, "custom error"),
        }
    }
}

pub trait PduErrorExt {
    fn decode(context: &'static str, error: DecodeError) -> Self;
    fn encode(context: &'static str, error: EncodeError) -> Self;
    fn other(context: &'static str, description: &'static str) -> Self;
    fn custom<E>(context: &'static str, e: E) -> Self
    where
        E: std::error::Error + Sync + Send + 'static;
}

impl PduErrorExt for PduError {
    fn decode(context: &'static str, error: DecodeError) -> Self {
        Self::new(context, PduErrorKind::Decode(error))
    }

    fn encode(context: &'static str, error: EncodeError) -> Self {
        Self::new(context, PduErrorKind::Encode(error))
    }

    fn other(context: &'static str, description: &'static str) -> Self {
        Self::new(context, PduErrorKind::Other { description })
    }

    fn custom<E>(context: &'static str, e: E) -> Self
    where
        E: std::error::Error + Sync + Send + 'static,
    {
        Self::new(context, PduErrorKind::Custom).with_source(e)
    }
}

/// Finds the size of the next TPKT frame, if the header is fully buffered.
///
/// Returns `Ok(None)` when more bytes are needed to know the size.
pub fn find_size(bytes: &[u8]) -> DecodeResult<Option<usize>> {
    if bytes.len() < tpkt::TpktHeader::SIZE {
        return Ok(None);
    }

    let tpkt = tpkt::TpktHeader::read(&mut ReadCursor::new(bytes))?;

    Ok(Some(tpkt.packet_length()))
}

pub trait PduHint: Send + Sync + core::fmt::Debug + 'static {
    /// Finds next PDU size by reading the next few bytes.
    fn find_size(&self, bytes: &[u8]) -> DecodeResult<Option<usize>>;
}

#[derive(Clone, Copy, Debug)]
pub struct X224Hint;

pub const X224_HINT: X224Hint = X224Hint;

impl PduHint for X224Hint {
    fn find_size(&self, bytes: &[u8]) -> DecodeResult<Option<usize>> {
        crate::find_size(bytes)
    }
}
