//! Error types for DoIP client operations.

use crate::conversation::ConversationHandlerId;
use crate::types::{DiagnosticNackCode, PayloadType, RoutingActivationCode};
use std::io;
use std::net::SocketAddr;
use thiserror::Error;

/// Errors raised while decoding inbound frames and payloads.
///
/// Decode errors on inbound traffic are absorbed by the channel that read the
/// frame; they only reach the application through the explicit codec API.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    /// Header is truncated or its version bytes do not match.
    #[error("Malformed header: {0}")]
    MalformedHeader(String),

    /// Buffer is shorter than the payload length announced in the header.
    #[error("Incomplete payload: header declares {declared} bytes, got {available}")]
    IncompletePayload { declared: u32, available: usize },

    /// Payload type code not known to this client.
    #[error("Unknown payload type: 0x{0:04X}")]
    UnknownPayloadType(u16),

    /// Declared payload length exceeds the receive limit of the channel.
    #[error("Payload too large: header declares {length} bytes, limit is {max}")]
    PayloadTooLarge { length: u32, max: usize },

    /// Payload of a well-framed message has the wrong length for its type.
    #[error("Invalid {payload_type:?} payload length: expected {expected}, got {actual}")]
    InvalidPayloadLength {
        payload_type: PayloadType,
        expected: &'static str,
        actual: usize,
    },
}

impl DecodeError {
    /// Create a new malformed header error.
    pub fn malformed(msg: impl Into<String>) -> Self {
        Self::MalformedHeader(msg.into())
    }
}

/// Broad classification of [`DoipError`] values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// Inbound bytes could not be decoded.
    Decode,
    /// No usable answer arrived in time.
    Timeout,
    /// Socket level failure; the channel is closed afterwards.
    Transport,
    /// Peer or TLS protocol violation; the connection is aborted.
    Protocol,
    /// Caller misuse; no state was changed.
    Usage,
    /// The owning conversation was stopped while the call was blocked.
    Cancelled,
}

/// Errors that can occur during DoIP client operations.
#[derive(Error, Debug)]
pub enum DoipError {
    /// I/O error during network operations.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Frame or payload decode failure.
    #[error("Decode error: {0}")]
    Decode(#[from] DecodeError),

    /// Outbound payload longer than the encoder accepts.
    #[error("Payload too large: {size} bytes exceeds maximum of {max} bytes")]
    OversizedPayload { size: usize, max: usize },

    /// Invalid argument supplied by the caller.
    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    /// Identification request retries exhausted without a response.
    #[error("No response received after {attempts} attempt(s)")]
    NoResponse { attempts: u32 },

    /// TLS handshake did not finish in time.
    #[error("TLS handshake timed out")]
    HandshakeTimeout,

    /// Stream connect did not finish in time.
    #[error("Connection to {0} timed out")]
    ConnectTimeout(SocketAddr),

    /// Routing activation response did not arrive in time.
    #[error("Routing activation timed out")]
    RoutingActivationTimeout,

    /// Diagnostic message acknowledgement did not arrive in time.
    #[error("Diagnostic message acknowledgement timed out")]
    AckTimeout,

    /// Diagnostic response did not arrive within P2/P2*.
    #[error("Diagnostic response timed out")]
    ResponseTimeout,

    /// Peer refused the stream connection.
    #[error("Connection refused by {0}")]
    ConnectionRefused(SocketAddr),

    /// Stream closed by the peer or by a socket error.
    #[error("Socket closed")]
    SocketClosed,

    /// TLS handshake failed (no common cipher suite, bad certificate, alert).
    #[error("TLS handshake failed: {0}")]
    HandshakeFailure(String),

    /// Configured cipher suites cannot be provided by the TLS backend.
    #[error("Unsupported cipher suite: {0}")]
    UnsupportedCipherSuite(String),

    /// DoIP entity rejected the routing activation.
    #[error("Routing activation denied: {0}")]
    RoutingActivationDenied(RoutingActivationCode),

    /// DoIP entity answered the diagnostic message with a negative ack.
    #[error("Diagnostic message negative acknowledgement: {0}")]
    NegativeAck(DiagnosticNackCode),

    /// Diagnostic response does not fit the configured receive buffer.
    #[error("Diagnostic response of {size} bytes exceeds receive buffer of {max} bytes")]
    ResponseTooLarge { size: usize, max: usize },

    /// A request is already outstanding on this handler.
    #[error("Request already in progress")]
    AlreadyInProgress,

    /// Conversation parameters collide with a registered conversation.
    #[error("Duplicate conversation registration: {0}")]
    DuplicateRegistration(String),

    /// No conversation is registered under this id.
    #[error("Unknown conversation handler id: {0}")]
    UnknownHandlerId(ConversationHandlerId),

    /// Conversation registered under this id has a different kind.
    #[error("Conversation {0} is not a {1} conversation")]
    ConversationKindMismatch(ConversationHandlerId, &'static str),

    /// Conversation has not been started.
    #[error("Conversation is not active")]
    ConversationInactive,

    /// Diagnostic conversation has no connected server.
    #[error("Not connected to a diagnostic server")]
    NotConnected,

    /// Conversation stopped while the call was blocked.
    #[error("Operation cancelled")]
    Cancelled,
}

/// Result type alias for DoIP client operations.
pub type Result<T> = std::result::Result<T, DoipError>;

impl DoipError {
    /// Create a new invalid parameter error.
    pub fn invalid_parameter(msg: impl Into<String>) -> Self {
        Self::InvalidParameter(msg.into())
    }

    /// Map a connect error onto the typed transport variants.
    pub fn from_connect(err: io::Error, addr: SocketAddr) -> Self {
        match err.kind() {
            io::ErrorKind::ConnectionRefused => Self::ConnectionRefused(addr),
            io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => Self::ConnectTimeout(addr),
            _ => Self::Io(err),
        }
    }

    /// Taxonomy bucket of this error.
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::Decode(_) => ErrorCategory::Decode,
            Self::NoResponse { .. }
            | Self::HandshakeTimeout
            | Self::ConnectTimeout(_)
            | Self::RoutingActivationTimeout
            | Self::AckTimeout
            | Self::ResponseTimeout => ErrorCategory::Timeout,
            Self::Io(_) | Self::ConnectionRefused(_) | Self::SocketClosed => {
                ErrorCategory::Transport
            }
            Self::HandshakeFailure(_)
            | Self::UnsupportedCipherSuite(_)
            | Self::RoutingActivationDenied(_)
            | Self::NegativeAck(_)
            | Self::ResponseTooLarge { .. } => ErrorCategory::Protocol,
            Self::OversizedPayload { .. }
            | Self::InvalidParameter(_)
            | Self::AlreadyInProgress
            | Self::DuplicateRegistration(_)
            | Self::UnknownHandlerId(_)
            | Self::ConversationKindMismatch(..)
            | Self::ConversationInactive
            | Self::NotConnected => ErrorCategory::Usage,
            Self::Cancelled => ErrorCategory::Cancelled,
        }
    }

    /// Check if this error is recoverable (transient).
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::Io(e) if e.kind() == io::ErrorKind::WouldBlock
                || e.kind() == io::ErrorKind::TimedOut
                || e.kind() == io::ErrorKind::Interrupted
        ) || matches!(
            self.category(),
            ErrorCategory::Timeout | ErrorCategory::Decode
        )
    }
}
