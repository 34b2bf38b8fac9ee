//! Error types for quic-handshake
//!
//! The codec distinguishes three outcomes: retryable incompleteness
//! (`Pending`), malformed input (`InvalidParameter`), and fallible
//! allocation (`OutOfMemory`). Untrusted input can only ever produce one of
//! these; internal misuse (for example encoding a server-only transport
//! parameter on the client side) is a debug assertion, not an error value.

use thiserror::Error;

/// Top-level error type for handshake inspection and the transport
/// parameter codec.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum CodecError {
    /// The CRYPTO stream has not yet delivered a complete handshake
    /// message. Retry once more bytes arrive.
    #[error("handshake data incomplete, more bytes needed")]
    Pending,

    /// The input violates the wire format; the connection is doomed.
    #[error("malformed handshake data: {context}")]
    InvalidParameter {
        /// The field or rule that failed, for diagnostics only.
        context: &'static str,
    },

    /// An allocation failed while duplicating an owned buffer.
    #[error("allocation failure")]
    OutOfMemory,
}

impl CodecError {
    /// Shorthand for the malformed-input variant.
    #[must_use]
    pub const fn invalid(context: &'static str) -> Self {
        Self::InvalidParameter { context }
    }

    /// Check if this error is recoverable (can retry operation)
    ///
    /// Only [`CodecError::Pending`] is recoverable: the caller buffers more
    /// CRYPTO data and calls again. Everything else dooms the connection.
    #[must_use]
    pub const fn is_recoverable(&self) -> bool {
        matches!(self, Self::Pending)
    }
}
