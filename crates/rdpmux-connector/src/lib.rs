#![cfg_attr(doc, doc = include_str!("../README.md"))]

#[macro_use]
mod macros;

mod channel_connection;
mod connection;

use core::any::Any;
use core::fmt;

use rdpmux_core::{encode_buf, encode_vec, DecodeError, Encode, EncodeError, WriteBuf};
use rdpmux_pdu::nego::{FailureCode, NegoRequestData, SecurityProtocol};
use rdpmux_pdu::x224::{X224, X224Data};
use rdpmux_pdu::PduHint;

pub use self::channel_connection::{ChannelConnectionSequence, ChannelConnectionState};
pub use self::connection::{ClientConnector, ClientConnectorState, ConnectionResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DesktopSize {
    pub width: u16,
    pub height: u16,
}

/// Settings consumed by the connection sequence and the channel stack.
#[derive(Debug, Clone)]
pub struct Config {
    /// The initial desktop size to request.
    pub desktop_size: DesktopSize,
    /// The hostname of the server, delivered to plugins once connected.
    pub server_hostname: String,
    /// Name of the client computer, truncated to 15 characters on the wire.
    pub client_name: String,
    /// The build number of the client.
    pub client_build: u32,
    pub keyboard_layout: u32,
    pub keyboard_type: u32,
    pub keyboard_subtype: u32,
    pub keyboard_functional_keys_count: u32,
    pub ime_file_name: String,
    /// TLS security (PROTOCOL_SSL).
    ///
    /// The transport is upgraded out-of-band once negotiated; RDP-layer
    /// encryption stays off.
    pub tls_security: bool,
    /// Network Level Authentication via CredSSP (PROTOCOL_HYBRID).
    ///
    /// Like TLS, the upgrade itself happens outside this crate.
    pub nla_security: bool,
    /// Legacy RDP security. When this ends up selected, RDP-layer encryption
    /// becomes required.
    pub rdp_security: bool,
    /// Optional routing data for the X.224 connection request.
    pub request_data: Option<NegoRequestData>,
    /// Maximum size of one virtual channel chunk, clamped to
    /// `128..=16384`.
    pub virtual_channel_chunk_size: u32,
}

impl Config {
    pub const DEFAULT_CHUNK_SIZE: u32 = 1600;

    /// The effective chunk size, clamped to the protocol bounds.
    pub fn chunk_size(&self) -> usize {
        self.virtual_channel_chunk_size.clamp(128, 16384) as usize
    }

    /// The protocol bitmask for the first connection attempt.
    pub fn initial_security_protocol(&self) -> SecurityProtocol {
        if self.nla_security {
            SecurityProtocol::HYBRID | SecurityProtocol::SSL
        } else if self.tls_security {
            SecurityProtocol::SSL
        } else {
            SecurityProtocol::RDP
        }
    }

    /// The next protocol to try after `current` failed, if any.
    ///
    /// Implements the NLA → TLS → RDP downgrade ladder; the transport must
    /// be re-established between attempts.
    pub fn downgrade_security_protocol(&self, current: SecurityProtocol) -> Option<SecurityProtocol> {
        if current.contains(SecurityProtocol::HYBRID) && self.tls_security {
            Some(SecurityProtocol::SSL)
        } else if current != SecurityProtocol::RDP && self.rdp_security {
            Some(SecurityProtocol::RDP)
        } else {
            None
        }
    }
}

pub trait State: Send + fmt::Debug + 'static {
    fn name(&self) -> &'static str;
    fn is_terminal(&self) -> bool;
    fn as_any(&self) -> &dyn Any;
}

rdpmux_core::assert_obj_safe!(State);

pub fn state_downcast<T: State>(state: &dyn State) -> Option<&T> {
    state.as_any().downcast_ref()
}

pub fn state_is<T: State>(state: &dyn State) -> bool {
    state.as_any().is::<T>()
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Written {
    Nothing,
    Size(core::num::NonZeroUsize),
}

impl Written {
    #[inline]
    pub fn from_size(value: usize) -> ConnectorResult<Self> {
        core::num::NonZeroUsize::new(value)
            .map(Self::Size)
            .ok_or_else(|| ConnectorError::general("invalid written length (can't be zero)"))
    }

    #[inline]
    pub fn is_nothing(self) -> bool {
        matches!(self, Self::Nothing)
    }

    #[inline]
    pub fn size(self) -> Option<usize> {
        if let Self::Size(size) = self {
            Some(size.get())
        } else {
            None
        }
    }
}

/// A step-driven protocol sequence: the caller feeds one incoming frame at a
/// time (sized by the current hint) and flushes whatever the step wrote.
pub trait Sequence: Send {
    fn next_pdu_hint(&self) -> Option<&dyn PduHint>;

    fn state(&self) -> &dyn State;

    fn step(&mut self, input: &[u8], output: &mut WriteBuf) -> ConnectorResult<Written>;

    fn step_no_input(&mut self, output: &mut WriteBuf) -> ConnectorResult<Written> {
        self.step(&[], output)
    }
}

rdpmux_core::assert_obj_safe!(Sequence);

/// The reason the server refused the requested security protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NegotiationFailure {
    SslRequiredByServer,
    SslNotAllowedByServer,
    SslCertNotOnServer,
    InconsistentFlags,
    HybridRequiredByServer,
    SslWithUserAuthRequiredByServer,
    Unknown(u32),
}

impl From<FailureCode> for NegotiationFailure {
    fn from(code: FailureCode) -> Self {
        match code {
            FailureCode::SSL_REQUIRED_BY_SERVER => Self::SslRequiredByServer,
            FailureCode::SSL_NOT_ALLOWED_BY_SERVER => Self::SslNotAllowedByServer,
            FailureCode::SSL_CERT_NOT_ON_SERVER => Self::SslCertNotOnServer,
            FailureCode::INCONSISTENT_FLAGS => Self::InconsistentFlags,
            FailureCode::HYBRID_REQUIRED_BY_SERVER => Self::HybridRequiredByServer,
            FailureCode::SSL_WITH_USER_AUTH_REQUIRED_BY_SERVER => Self::SslWithUserAuthRequiredByServer,
            other => Self::Unknown(u32::from(other)),
        }
    }
}

impl fmt::Display for NegotiationFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SslRequiredByServer => write!(f, "SSL required by server"),
            Self::SslNotAllowedByServer => write!(f, "SSL not allowed by server"),
            Self::SslCertNotOnServer => write!(f, "no SSL certificate on server"),
            Self::InconsistentFlags => write!(f, "inconsistent negotiation flags"),
            Self::HybridRequiredByServer => write!(f, "CredSSP required by server"),
            Self::SslWithUserAuthRequiredByServer => write!(f, "SSL with user authentication required by server"),
            Self::Unknown(code) => write!(f, "unknown negotiation failure ({code})"),
        }
    }
}

pub type ConnectorResult<T> = Result<T, ConnectorError>;

#[non_exhaustive]
#[derive(Debug)]
pub enum ConnectorErrorKind {
    Encode(EncodeError),
    Decode(DecodeError),
    Negotiation(NegotiationFailure),
    Reason(String),
    General,
    Custom,
}

impl fmt::Display for ConnectorErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self {
            ConnectorErrorKind::Encode(_) => write!(f, "encode error"),
            ConnectorErrorKind::Decode(_) => write!(f, "decode error"),
            ConnectorErrorKind::Negotiation(failure) => write!(f, "negotiation failure: {failure}"),
            ConnectorErrorKind::Reason(description) => write!(f, "reason: {description}"),
            ConnectorErrorKind::General => write!(f, "general error"),
            ConnectorErrorKind::Custom => write!(f, "custom error"),
        }
    }
}

impl std::error::Error for ConnectorErrorKind {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match &self {
            ConnectorErrorKind::Encode(e) => Some(e),
            ConnectorErrorKind::Decode(e) => Some(e),
            _ => None,
        }
    }
}

pub type ConnectorError = rdpmux_error::Error<ConnectorErrorKind>;

pub trait ConnectorErrorExt {
    fn encode(error: EncodeError) -> Self;
    fn decode(error: DecodeError) -> Self;
    fn negotiation(failure: NegotiationFailure) -> Self;
    fn general(context: &'static str) -> Self;
    fn reason(context: &'static str, reason: impl Into<String>) -> Self;
    fn custom<E>(context: &'static str, e: E) -> Self
    where
        E: std::error::Error + Sync + Send + 'static;
}

impl ConnectorErrorExt for ConnectorError {
    fn encode(error: EncodeError) -> Self {
        Self::new("encode error", ConnectorErrorKind::Encode(error))
    }

    fn decode(error: DecodeError) -> Self {
        Self::new("decode error", ConnectorErrorKind::Decode(error))
    }

    fn negotiation(failure: NegotiationFailure) -> Self {
        Self::new("negotiation", ConnectorErrorKind::Negotiation(failure))
    }

    fn general(context: &'static str) -> Self {
        Self::new(context, ConnectorErrorKind::General)
    }

    fn reason(context: &'static str, reason: impl Into<String>) -> Self {
        Self::new(context, ConnectorErrorKind::Reason(reason.into()))
    }

    fn custom<E>(context: &'static str, e: E) -> Self
    where
        E: std::error::Error + Sync + Send + 'static,
    {
        Self::new(context, ConnectorErrorKind::Custom).with_source(e)
    }
}

pub trait ConnectorResultExt {
    #[must_use]
    fn with_context(self, context: &'static str) -> Self;
    #[must_use]
    fn with_source<E>(self, source: E) -> Self
    where
        E: std::error::Error + Sync + Send + 'static;
}

impl<T> ConnectorResultExt for ConnectorResult<T> {
    fn with_context(self, context: &'static str) -> Self {
        self.map_err(|mut e| {
            e.context = context;
            e
        })
    }

    fn with_source<E>(self, source: E) -> Self
    where
        E: std::error::Error + Sync + Send + 'static,
    {
        self.map_err(|e| e.with_source(source))
    }
}

/// Encodes an MCS-level message wrapped in an X.224 data TPDU and a TPKT frame.
pub fn encode_x224_packet<T>(x224_msg: &T, buf: &mut WriteBuf) -> ConnectorResult<usize>
where
    T: Encode,
{
    let x224_msg_buf = encode_vec(x224_msg).map_err(ConnectorError::encode)?;

    let pdu = X224(X224Data { data: x224_msg_buf });

    let written = encode_buf(&pdu, buf).map_err(ConnectorError::encode)?;

    Ok(written)
}
