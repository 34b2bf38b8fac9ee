//! QUIC version identification.
//!
//! The negotiated version decides which TLS extension code carries the QUIC
//! transport parameters: draft-29 used a provisional code from the private
//! range, everything later uses the IANA-assigned one.

use serde::{Deserialize, Serialize};

/// TLS extension code for QUIC transport parameters (RFC 9001).
pub const TLS_EXTENSION_TYPE_QUIC_TRANSPORT_PARAMETERS: u16 = 0x39;

/// Provisional extension code used by draft versions up to draft-32.
pub const TLS_EXTENSION_TYPE_QUIC_TRANSPORT_PARAMETERS_DRAFT: u16 = 0xFFA5;

const QUIC_VERSION_1: u32 = 0x0000_0001;
const QUIC_VERSION_2: u32 = 0x6B33_43CF;
const QUIC_VERSION_DRAFT_29: u32 = 0xFF00_001D;

/// Known QUIC versions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum QuicVersion {
    /// QUIC version 1 (RFC 9000)
    V1,
    /// QUIC version 2 (RFC 9369)
    V2,
    /// Draft version (for testing/development)
    Draft(u32),
    /// Unknown version
    Unknown(u32),
}

impl QuicVersion {
    /// Parse version from raw bytes.
    #[must_use]
    pub const fn from_u32(version: u32) -> Self {
        match version {
            QUIC_VERSION_1 => Self::V1,
            QUIC_VERSION_2 => Self::V2,
            v if v >= 0xFF00_0000 => Self::Draft(v),
            v => Self::Unknown(v),
        }
    }

    /// Get the raw version number.
    #[must_use]
    pub const fn as_u32(&self) -> u32 {
        match self {
            Self::V1 => QUIC_VERSION_1,
            Self::V2 => QUIC_VERSION_2,
            Self::Draft(v) | Self::Unknown(v) => *v,
        }
    }

    /// Check if this is a known production version.
    #[must_use]
    pub const fn is_known(&self) -> bool {
        matches!(self, Self::V1 | Self::V2)
    }

    /// TLS extension code carrying the transport parameters under this
    /// version.
    #[must_use]
    pub const fn transport_params_extension_type(&self) -> u16 {
        if self.as_u32() == QUIC_VERSION_DRAFT_29 {
            TLS_EXTENSION_TYPE_QUIC_TRANSPORT_PARAMETERS_DRAFT
        } else {
            TLS_EXTENSION_TYPE_QUIC_TRANSPORT_PARAMETERS
        }
    }
}

impl std::fmt::Display for QuicVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::V1 => write!(f, "QUICv1"),
            Self::V2 => write!(f, "QUICv2"),
            Self::Draft(v) => write!(f, "draft-{:02}", v & 0xFF),
            Self::Unknown(v) => write!(f, "unknown-0x{v:08x}"),
        }
    }
}
