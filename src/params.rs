//! QUIC transport parameter codec (RFC 9000 §18).
//!
//! Transport parameters travel inside a TLS extension as a flat sequence of
//! `varint(id) · varint(length) · length bytes`, with no outer framing. Each
//! identifier has its own shape and validity rules: varint-valued, opaque
//! connection ID, fixed-length token, zero-length flag, or composite.
//!
//! The decoder is fed attacker-controlled bytes before any handshake keys
//! exist, so every length is checked against the remaining input and every
//! value against its per-identifier range. Identifiers of the form
//! `31 * N + 27` are reserved to exercise the ignore-unknown rule and are
//! skipped, as are identifiers this implementation does not know.

use bitflags::bitflags;
use tracing::trace;

use crate::error::CodecError;
use crate::varint;

/// Longest connection ID allowed by QUIC version 1.
pub const MAX_CONNECTION_ID_LEN: usize = 20;

/// Stateless reset tokens are exactly 16 bytes.
pub const STATELESS_RESET_TOKEN_LEN: usize = 16;

// Core transport parameter identifiers (RFC 9000 §18.2).
const TP_ID_ORIGINAL_DESTINATION_CONNECTION_ID: u64 = 0;
const TP_ID_IDLE_TIMEOUT: u64 = 1;
const TP_ID_STATELESS_RESET_TOKEN: u64 = 2;
const TP_ID_MAX_UDP_PAYLOAD_SIZE: u64 = 3;
const TP_ID_INITIAL_MAX_DATA: u64 = 4;
const TP_ID_INITIAL_MAX_STREAM_DATA_BIDI_LOCAL: u64 = 5;
const TP_ID_INITIAL_MAX_STREAM_DATA_BIDI_REMOTE: u64 = 6;
const TP_ID_INITIAL_MAX_STREAM_DATA_UNI: u64 = 7;
const TP_ID_INITIAL_MAX_STREAMS_BIDI: u64 = 8;
const TP_ID_INITIAL_MAX_STREAMS_UNI: u64 = 9;
const TP_ID_ACK_DELAY_EXPONENT: u64 = 10;
const TP_ID_MAX_ACK_DELAY: u64 = 11;
const TP_ID_DISABLE_ACTIVE_MIGRATION: u64 = 12;
const TP_ID_PREFERRED_ADDRESS: u64 = 13;
const TP_ID_ACTIVE_CONNECTION_ID_LIMIT: u64 = 14;
const TP_ID_INITIAL_SOURCE_CONNECTION_ID: u64 = 15;
const TP_ID_RETRY_SOURCE_CONNECTION_ID: u64 = 16;

// Extension identifiers.
const TP_ID_VERSION_INFO: u64 = 0x11;
const TP_ID_MAX_DATAGRAM_FRAME_SIZE: u64 = 32;
const TP_ID_CIBIR_ENCODING: u64 = 0x1000;
const TP_ID_GREASE_QUIC_BIT: u64 = 0x2AB2;
const TP_ID_ENABLE_TIMESTAMP: u64 = 0x7158;
const TP_ID_DISABLE_1RTT_ENCRYPTION: u64 = 0xBAAD;
const TP_ID_MIN_ACK_DELAY: u64 = 0xFF04_DE1B;
const TP_ID_RELIABLE_RESET_ENABLED: u64 = 0x17_F758_6D2C_B570;

// Value limits and default-on-absence values (RFC 9000 §18.2).
const MAX_UDP_PAYLOAD_SIZE_MIN: u64 = 1200;
const MAX_UDP_PAYLOAD_SIZE_MAX: u64 = 65527;
const MAX_UDP_PAYLOAD_SIZE_DEFAULT: u64 = 65527;
const ACK_DELAY_EXPONENT_MAX: u64 = 20;
const ACK_DELAY_EXPONENT_DEFAULT: u64 = 3;
const MAX_ACK_DELAY_MAX_MS: u64 = (1 << 14) - 1;
const MAX_ACK_DELAY_DEFAULT_MS: u64 = 25;
const MIN_ACK_DELAY_MAX_US: u64 = (1 << 24) - 1;
const MAX_STREAMS_MAX: u64 = 1 << 60;
const ACTIVE_CONNECTION_ID_LIMIT_MIN: u64 = 2;
const ACTIVE_CONNECTION_ID_LIMIT_DEFAULT: u64 = 2;
const ENABLE_TIMESTAMP_MAX: u64 = 3;

/// Bit position of the timestamp enable bits inside [`TpFlags`]. The 2-bit
/// wire value of `enable_timestamp` is shifted up by this amount so the
/// send/recv bits live directly in the flags word.
pub const TIMESTAMP_SHIFT: u32 = 24;

bitflags! {
    /// Which transport parameters are present in a [`TransportParams`]
    /// record. A set bit means the corresponding field was populated; a
    /// clear bit means the RFC default applies.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct TpFlags: u32 {
        const ORIGINAL_DESTINATION_CONNECTION_ID = 1 << 0;
        const IDLE_TIMEOUT = 1 << 1;
        const STATELESS_RESET_TOKEN = 1 << 2;
        const MAX_UDP_PAYLOAD_SIZE = 1 << 3;
        const INITIAL_MAX_DATA = 1 << 4;
        const INITIAL_MAX_STREAM_DATA_BIDI_LOCAL = 1 << 5;
        const INITIAL_MAX_STREAM_DATA_BIDI_REMOTE = 1 << 6;
        const INITIAL_MAX_STREAM_DATA_UNI = 1 << 7;
        const INITIAL_MAX_STREAMS_BIDI = 1 << 8;
        const INITIAL_MAX_STREAMS_UNI = 1 << 9;
        const ACK_DELAY_EXPONENT = 1 << 10;
        const MAX_ACK_DELAY = 1 << 11;
        const DISABLE_ACTIVE_MIGRATION = 1 << 12;
        const PREFERRED_ADDRESS = 1 << 13;
        const ACTIVE_CONNECTION_ID_LIMIT = 1 << 14;
        const INITIAL_SOURCE_CONNECTION_ID = 1 << 15;
        const RETRY_SOURCE_CONNECTION_ID = 1 << 16;
        const MAX_DATAGRAM_FRAME_SIZE = 1 << 17;
        const DISABLE_1RTT_ENCRYPTION = 1 << 18;
        const VERSION_NEGOTIATION = 1 << 19;
        const MIN_ACK_DELAY = 1 << 20;
        const CIBIR_ENCODING = 1 << 21;
        const GREASE_QUIC_BIT = 1 << 22;
        const RELIABLE_RESET_ENABLED = 1 << 23;
        const TIMESTAMP_SEND_ENABLED = 1 << TIMESTAMP_SHIFT;
        const TIMESTAMP_RECV_ENABLED = 2 << TIMESTAMP_SHIFT;
    }
}

/// Reserved identifiers of the form `31 * N + 27` exercise the requirement
/// that unknown transport parameters be ignored.
#[must_use]
pub const fn is_reserved_id(id: u64) -> bool {
    id % 31 == 27
}

/// Inline storage for a connection ID of up to [`MAX_CONNECTION_ID_LEN`]
/// bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ConnectionIdBuf {
    len: u8,
    bytes: [u8; MAX_CONNECTION_ID_LEN],
}

impl ConnectionIdBuf {
    /// Store a connection ID.
    ///
    /// # Panics
    ///
    /// Panics when `cid` exceeds [`MAX_CONNECTION_ID_LEN`]; connection IDs
    /// handed in by the local stack are length-checked at their source.
    #[must_use]
    pub fn new(cid: &[u8]) -> Self {
        assert!(cid.len() <= MAX_CONNECTION_ID_LEN);
        let mut buf = Self::default();
        buf.bytes[..cid.len()].copy_from_slice(cid);
        buf.len = cid.len() as u8;
        buf
    }

    #[must_use]
    pub fn as_slice(&self) -> &[u8] {
        &self.bytes[..self.len as usize]
    }

    #[must_use]
    pub const fn len(&self) -> usize {
        self.len as usize
    }

    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }
}

/// A private transport parameter appended verbatim to the encoded output.
///
/// Used by tests to exercise forward compatibility and reserved-identifier
/// handling in peers; never produced by the decoder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrivateTransportParam {
    /// Raw identifier, encoded as-is.
    pub id: u64,
    /// Opaque payload, copied as-is.
    pub payload: Vec<u8>,
}

/// One side's QUIC transport parameters.
///
/// `flags` records which parameters are present; a clear bit means the
/// field holds its zero value (or, after decoding, the RFC default). The
/// `version_info` blob is the only owned heap allocation and is released
/// exactly once by [`cleanup_transport_parameters`] or on drop.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct TransportParams {
    pub flags: TpFlags,
    pub idle_timeout_ms: u64,
    pub max_udp_payload_size: u64,
    pub initial_max_data: u64,
    pub initial_max_stream_data_bidi_local: u64,
    pub initial_max_stream_data_bidi_remote: u64,
    pub initial_max_stream_data_uni: u64,
    pub initial_max_bidi_streams: u64,
    pub initial_max_uni_streams: u64,
    pub ack_delay_exponent: u64,
    pub max_ack_delay_ms: u64,
    pub min_ack_delay_us: u64,
    pub active_connection_id_limit: u64,
    pub max_datagram_frame_size: u64,
    pub cibir_length: u64,
    pub cibir_offset: u64,
    pub original_destination_connection_id: ConnectionIdBuf,
    pub initial_source_connection_id: ConnectionIdBuf,
    pub retry_source_connection_id: ConnectionIdBuf,
    pub stateless_reset_token: [u8; STATELESS_RESET_TOKEN_LEN],
    pub version_info: Option<Box<[u8]>>,
}

impl TransportParams {
    /// A zeroed record with the RFC default-on-absence values installed.
    #[must_use]
    pub fn with_defaults() -> Self {
        Self {
            max_udp_payload_size: MAX_UDP_PAYLOAD_SIZE_DEFAULT,
            ack_delay_exponent: ACK_DELAY_EXPONENT_DEFAULT,
            max_ack_delay_ms: MAX_ACK_DELAY_DEFAULT_MS,
            active_connection_id_limit: ACTIVE_CONNECTION_ID_LIMIT_DEFAULT,
            ..Self::default()
        }
    }

    /// The 2-bit `enable_timestamp` wire value packed into the flags.
    #[must_use]
    const fn timestamp_value(&self) -> u64 {
        let mask = TpFlags::TIMESTAMP_SEND_ENABLED.bits() | TpFlags::TIMESTAMP_RECV_ENABLED.bits();
        ((self.flags.bits() & mask) >> TIMESTAMP_SHIFT) as u64
    }
}

/// `varint(id) · varint(len) · len` bytes on the wire.
fn param_len(id: u64, payload_len: usize) -> usize {
    varint::size(id) + varint::size(payload_len as u64) + payload_len
}

fn write_param(id: u64, payload: &[u8], buf: &mut Vec<u8>) {
    varint::encode(id, buf);
    varint::encode(payload.len() as u64, buf);
    buf.extend_from_slice(payload);
}

fn write_param_varint(id: u64, value: u64, buf: &mut Vec<u8>) {
    varint::encode(id, buf);
    varint::encode(varint::size(value) as u64, buf);
    varint::encode(value, buf);
}

/// Encode `params` into a freshly allocated buffer.
///
/// The first `header_size` bytes of the returned buffer are zeroed space
/// for the caller's TLS framing; the transport parameters follow. Returns
/// `None` when the encoded parameters would not fit in a TLS extension
/// (more than `u16::MAX` bytes) or when the allocation fails.
///
/// `is_server_tp` states which side these parameters belong to. Setting a
/// server-only parameter (original destination connection ID, stateless
/// reset token, preferred address, retry source connection ID) with
/// `is_server_tp == false` is a caller bug and trips a debug assertion.
///
/// `test_param`, when given, is appended verbatim after all known
/// parameters.
#[must_use]
pub fn encode_transport_parameters(
    is_server_tp: bool,
    params: &TransportParams,
    test_param: Option<&PrivateTransportParam>,
    header_size: usize,
) -> Option<Vec<u8>> {
    let flags = params.flags;

    // Pass 1: exact size, so one allocation covers the whole buffer.
    let mut required = 0usize;
    if flags.contains(TpFlags::ORIGINAL_DESTINATION_CONNECTION_ID) {
        debug_assert!(is_server_tp);
        required += param_len(
            TP_ID_ORIGINAL_DESTINATION_CONNECTION_ID,
            params.original_destination_connection_id.len(),
        );
    }
    if flags.contains(TpFlags::IDLE_TIMEOUT) {
        required += param_len(TP_ID_IDLE_TIMEOUT, varint::size(params.idle_timeout_ms));
    }
    if flags.contains(TpFlags::STATELESS_RESET_TOKEN) {
        debug_assert!(is_server_tp);
        required += param_len(TP_ID_STATELESS_RESET_TOKEN, STATELESS_RESET_TOKEN_LEN);
    }
    if flags.contains(TpFlags::MAX_UDP_PAYLOAD_SIZE) {
        required += param_len(
            TP_ID_MAX_UDP_PAYLOAD_SIZE,
            varint::size(params.max_udp_payload_size),
        );
    }
    if flags.contains(TpFlags::INITIAL_MAX_DATA) {
        required += param_len(TP_ID_INITIAL_MAX_DATA, varint::size(params.initial_max_data));
    }
    if flags.contains(TpFlags::INITIAL_MAX_STREAM_DATA_BIDI_LOCAL) {
        required += param_len(
            TP_ID_INITIAL_MAX_STREAM_DATA_BIDI_LOCAL,
            varint::size(params.initial_max_stream_data_bidi_local),
        );
    }
    if flags.contains(TpFlags::INITIAL_MAX_STREAM_DATA_BIDI_REMOTE) {
        required += param_len(
            TP_ID_INITIAL_MAX_STREAM_DATA_BIDI_REMOTE,
            varint::size(params.initial_max_stream_data_bidi_remote),
        );
    }
    if flags.contains(TpFlags::INITIAL_MAX_STREAM_DATA_UNI) {
        required += param_len(
            TP_ID_INITIAL_MAX_STREAM_DATA_UNI,
            varint::size(params.initial_max_stream_data_uni),
        );
    }
    if flags.contains(TpFlags::INITIAL_MAX_STREAMS_BIDI) {
        required += param_len(
            TP_ID_INITIAL_MAX_STREAMS_BIDI,
            varint::size(params.initial_max_bidi_streams),
        );
    }
    if flags.contains(TpFlags::INITIAL_MAX_STREAMS_UNI) {
        required += param_len(
            TP_ID_INITIAL_MAX_STREAMS_UNI,
            varint::size(params.initial_max_uni_streams),
        );
    }
    if flags.contains(TpFlags::ACK_DELAY_EXPONENT) {
        required += param_len(
            TP_ID_ACK_DELAY_EXPONENT,
            varint::size(params.ack_delay_exponent),
        );
    }
    if flags.contains(TpFlags::MAX_ACK_DELAY) {
        required += param_len(TP_ID_MAX_ACK_DELAY, varint::size(params.max_ack_delay_ms));
    }
    if flags.contains(TpFlags::DISABLE_ACTIVE_MIGRATION) {
        required += param_len(TP_ID_DISABLE_ACTIVE_MIGRATION, 0);
    }
    if flags.contains(TpFlags::PREFERRED_ADDRESS) {
        debug_assert!(is_server_tp);
        unimplemented!("preferred_address encoding");
    }
    if flags.contains(TpFlags::ACTIVE_CONNECTION_ID_LIMIT) {
        debug_assert!(params.active_connection_id_limit >= ACTIVE_CONNECTION_ID_LIMIT_MIN);
        required += param_len(
            TP_ID_ACTIVE_CONNECTION_ID_LIMIT,
            varint::size(params.active_connection_id_limit),
        );
    }
    if flags.contains(TpFlags::INITIAL_SOURCE_CONNECTION_ID) {
        required += param_len(
            TP_ID_INITIAL_SOURCE_CONNECTION_ID,
            params.initial_source_connection_id.len(),
        );
    }
    if flags.contains(TpFlags::RETRY_SOURCE_CONNECTION_ID) {
        debug_assert!(is_server_tp);
        required += param_len(
            TP_ID_RETRY_SOURCE_CONNECTION_ID,
            params.retry_source_connection_id.len(),
        );
    }
    if flags.contains(TpFlags::MAX_DATAGRAM_FRAME_SIZE) {
        required += param_len(
            TP_ID_MAX_DATAGRAM_FRAME_SIZE,
            varint::size(params.max_datagram_frame_size),
        );
    }
    if flags.contains(TpFlags::DISABLE_1RTT_ENCRYPTION) {
        required += param_len(TP_ID_DISABLE_1RTT_ENCRYPTION, 0);
    }
    if flags.contains(TpFlags::VERSION_NEGOTIATION) {
        let info_len = params.version_info.as_deref().map_or(0, <[u8]>::len);
        required += param_len(TP_ID_VERSION_INFO, info_len);
    }
    if flags.contains(TpFlags::MIN_ACK_DELAY) {
        let max_ack_delay_ms = if flags.contains(TpFlags::MAX_ACK_DELAY) {
            params.max_ack_delay_ms
        } else {
            MAX_ACK_DELAY_DEFAULT_MS
        };
        debug_assert!(params.min_ack_delay_us / 1000 <= max_ack_delay_ms);
        required += param_len(TP_ID_MIN_ACK_DELAY, varint::size(params.min_ack_delay_us));
    }
    if flags.contains(TpFlags::CIBIR_ENCODING) {
        required += param_len(
            TP_ID_CIBIR_ENCODING,
            varint::size(params.cibir_length) + varint::size(params.cibir_offset),
        );
    }
    if flags.contains(TpFlags::GREASE_QUIC_BIT) {
        required += param_len(TP_ID_GREASE_QUIC_BIT, 0);
    }
    if flags.contains(TpFlags::RELIABLE_RESET_ENABLED) {
        required += param_len(TP_ID_RELIABLE_RESET_ENABLED, 0);
    }
    if flags.intersects(TpFlags::TIMESTAMP_SEND_ENABLED | TpFlags::TIMESTAMP_RECV_ENABLED) {
        required += param_len(
            TP_ID_ENABLE_TIMESTAMP,
            varint::size(params.timestamp_value()),
        );
    }
    if let Some(test) = test_param {
        required += param_len(test.id, test.payload.len());
    }

    if required > usize::from(u16::MAX) {
        trace!(required, "transport parameters exceed TLS extension limit");
        return None;
    }

    let mut buf = Vec::new();
    if buf.try_reserve_exact(header_size + required).is_err() {
        return None;
    }
    buf.resize(header_size, 0);

    // Pass 2: write in the same order the sizes were summed.
    if flags.contains(TpFlags::ORIGINAL_DESTINATION_CONNECTION_ID) {
        write_param(
            TP_ID_ORIGINAL_DESTINATION_CONNECTION_ID,
            params.original_destination_connection_id.as_slice(),
            &mut buf,
        );
    }
    if flags.contains(TpFlags::IDLE_TIMEOUT) {
        write_param_varint(TP_ID_IDLE_TIMEOUT, params.idle_timeout_ms, &mut buf);
    }
    if flags.contains(TpFlags::STATELESS_RESET_TOKEN) {
        write_param(
            TP_ID_STATELESS_RESET_TOKEN,
            &params.stateless_reset_token,
            &mut buf,
        );
    }
    if flags.contains(TpFlags::MAX_UDP_PAYLOAD_SIZE) {
        write_param_varint(
            TP_ID_MAX_UDP_PAYLOAD_SIZE,
            params.max_udp_payload_size,
            &mut buf,
        );
    }
    if flags.contains(TpFlags::INITIAL_MAX_DATA) {
        write_param_varint(TP_ID_INITIAL_MAX_DATA, params.initial_max_data, &mut buf);
    }
    if flags.contains(TpFlags::INITIAL_MAX_STREAM_DATA_BIDI_LOCAL) {
        write_param_varint(
            TP_ID_INITIAL_MAX_STREAM_DATA_BIDI_LOCAL,
            params.initial_max_stream_data_bidi_local,
            &mut buf,
        );
    }
    if flags.contains(TpFlags::INITIAL_MAX_STREAM_DATA_BIDI_REMOTE) {
        write_param_varint(
            TP_ID_INITIAL_MAX_STREAM_DATA_BIDI_REMOTE,
            params.initial_max_stream_data_bidi_remote,
            &mut buf,
        );
    }
    if flags.contains(TpFlags::INITIAL_MAX_STREAM_DATA_UNI) {
        write_param_varint(
            TP_ID_INITIAL_MAX_STREAM_DATA_UNI,
            params.initial_max_stream_data_uni,
            &mut buf,
        );
    }
    if flags.contains(TpFlags::INITIAL_MAX_STREAMS_BIDI) {
        write_param_varint(
            TP_ID_INITIAL_MAX_STREAMS_BIDI,
            params.initial_max_bidi_streams,
            &mut buf,
        );
    }
    if flags.contains(TpFlags::INITIAL_MAX_STREAMS_UNI) {
        write_param_varint(
            TP_ID_INITIAL_MAX_STREAMS_UNI,
            params.initial_max_uni_streams,
            &mut buf,
        );
    }
    if flags.contains(TpFlags::ACK_DELAY_EXPONENT) {
        write_param_varint(TP_ID_ACK_DELAY_EXPONENT, params.ack_delay_exponent, &mut buf);
    }
    if flags.contains(TpFlags::MAX_ACK_DELAY) {
        write_param_varint(TP_ID_MAX_ACK_DELAY, params.max_ack_delay_ms, &mut buf);
    }
    if flags.contains(TpFlags::DISABLE_ACTIVE_MIGRATION) {
        write_param(TP_ID_DISABLE_ACTIVE_MIGRATION, &[], &mut buf);
    }
    if flags.contains(TpFlags::ACTIVE_CONNECTION_ID_LIMIT) {
        write_param_varint(
            TP_ID_ACTIVE_CONNECTION_ID_LIMIT,
            params.active_connection_id_limit,
            &mut buf,
        );
    }
    if flags.contains(TpFlags::INITIAL_SOURCE_CONNECTION_ID) {
        write_param(
            TP_ID_INITIAL_SOURCE_CONNECTION_ID,
            params.initial_source_connection_id.as_slice(),
            &mut buf,
        );
    }
    if flags.contains(TpFlags::RETRY_SOURCE_CONNECTION_ID) {
        write_param(
            TP_ID_RETRY_SOURCE_CONNECTION_ID,
            params.retry_source_connection_id.as_slice(),
            &mut buf,
        );
    }
    if flags.contains(TpFlags::MAX_DATAGRAM_FRAME_SIZE) {
        write_param_varint(
            TP_ID_MAX_DATAGRAM_FRAME_SIZE,
            params.max_datagram_frame_size,
            &mut buf,
        );
    }
    if flags.contains(TpFlags::DISABLE_1RTT_ENCRYPTION) {
        write_param(TP_ID_DISABLE_1RTT_ENCRYPTION, &[], &mut buf);
    }
    if flags.contains(TpFlags::VERSION_NEGOTIATION) {
        write_param(
            TP_ID_VERSION_INFO,
            params.version_info.as_deref().unwrap_or(&[]),
            &mut buf,
        );
    }
    if flags.contains(TpFlags::MIN_ACK_DELAY) {
        write_param_varint(TP_ID_MIN_ACK_DELAY, params.min_ack_delay_us, &mut buf);
    }
    if flags.contains(TpFlags::CIBIR_ENCODING) {
        let payload_len = varint::size(params.cibir_length) + varint::size(params.cibir_offset);
        varint::encode(TP_ID_CIBIR_ENCODING, &mut buf);
        varint::encode(payload_len as u64, &mut buf);
        varint::encode(params.cibir_length, &mut buf);
        varint::encode(params.cibir_offset, &mut buf);
    }
    if flags.contains(TpFlags::GREASE_QUIC_BIT) {
        write_param(TP_ID_GREASE_QUIC_BIT, &[], &mut buf);
    }
    if flags.contains(TpFlags::RELIABLE_RESET_ENABLED) {
        write_param(TP_ID_RELIABLE_RESET_ENABLED, &[], &mut buf);
    }
    if flags.intersects(TpFlags::TIMESTAMP_SEND_ENABLED | TpFlags::TIMESTAMP_RECV_ENABLED) {
        write_param_varint(TP_ID_ENABLE_TIMESTAMP, params.timestamp_value(), &mut buf);
    }
    if let Some(test) = test_param {
        write_param(test.id, &test.payload, &mut buf);
    }

    let written = buf.len() - header_size;
    debug_assert_eq!(written, required);
    if written != required {
        return None;
    }
    Some(buf)
}

fn read_varint_payload(payload: &[u8], what: &'static str) -> Result<u64, CodecError> {
    varint::decode_exact(payload).ok_or(CodecError::invalid(what))
}

/// Decode a transport parameter stream into `params`.
///
/// `is_server_tp` is true when the parameters being parsed came from the
/// server; server-only parameters in a client's stream are rejected. Any
/// prior contents of `params` (including an owned `version_info`) are
/// released first, then the RFC defaults are installed, then the stream is
/// read. On error the record is valid but must be discarded by the caller.
pub fn decode_transport_parameters(
    is_server_tp: bool,
    buf: &[u8],
    params: &mut TransportParams,
) -> Result<(), CodecError> {
    // Drops any previously owned version_info.
    *params = TransportParams::with_defaults();

    // Duplicate detection covers the first 64 identifiers only.
    let mut params_present: u64 = 0;
    let mut offset = 0usize;

    while offset < buf.len() {
        let id = varint::decode(buf, &mut offset)
            .ok_or(CodecError::invalid("transport parameter id"))?;

        if id < 64 {
            if params_present & (1 << id) != 0 {
                trace!(id, "duplicate transport parameter");
                return Err(CodecError::invalid("duplicate transport parameter"));
            }
            params_present |= 1 << id;
        }

        let param_length = varint::decode(buf, &mut offset)
            .ok_or(CodecError::invalid("transport parameter length"))?;
        if param_length > (buf.len() - offset) as u64 {
            return Err(CodecError::invalid("transport parameter length"));
        }
        let length = param_length as usize;
        let payload = &buf[offset..offset + length];

        match id {
            TP_ID_ORIGINAL_DESTINATION_CONNECTION_ID => {
                if length > MAX_CONNECTION_ID_LEN || !is_server_tp {
                    return Err(CodecError::invalid("original_destination_connection_id"));
                }
                params.original_destination_connection_id = ConnectionIdBuf::new(payload);
                params.flags |= TpFlags::ORIGINAL_DESTINATION_CONNECTION_ID;
            }

            TP_ID_IDLE_TIMEOUT => {
                params.idle_timeout_ms = read_varint_payload(payload, "idle_timeout")?;
                params.flags |= TpFlags::IDLE_TIMEOUT;
            }

            TP_ID_STATELESS_RESET_TOKEN => {
                if length != STATELESS_RESET_TOKEN_LEN || !is_server_tp {
                    return Err(CodecError::invalid("stateless_reset_token"));
                }
                params.stateless_reset_token.copy_from_slice(payload);
                params.flags |= TpFlags::STATELESS_RESET_TOKEN;
            }

            TP_ID_MAX_UDP_PAYLOAD_SIZE => {
                let value = read_varint_payload(payload, "max_udp_payload_size")?;
                if !(MAX_UDP_PAYLOAD_SIZE_MIN..=MAX_UDP_PAYLOAD_SIZE_MAX).contains(&value) {
                    return Err(CodecError::invalid("max_udp_payload_size"));
                }
                params.max_udp_payload_size = value;
                params.flags |= TpFlags::MAX_UDP_PAYLOAD_SIZE;
            }

            TP_ID_INITIAL_MAX_DATA => {
                params.initial_max_data = read_varint_payload(payload, "initial_max_data")?;
                params.flags |= TpFlags::INITIAL_MAX_DATA;
            }

            TP_ID_INITIAL_MAX_STREAM_DATA_BIDI_LOCAL => {
                params.initial_max_stream_data_bidi_local =
                    read_varint_payload(payload, "initial_max_stream_data_bidi_local")?;
                params.flags |= TpFlags::INITIAL_MAX_STREAM_DATA_BIDI_LOCAL;
            }

            TP_ID_INITIAL_MAX_STREAM_DATA_BIDI_REMOTE => {
                params.initial_max_stream_data_bidi_remote =
                    read_varint_payload(payload, "initial_max_stream_data_bidi_remote")?;
                params.flags |= TpFlags::INITIAL_MAX_STREAM_DATA_BIDI_REMOTE;
            }

            TP_ID_INITIAL_MAX_STREAM_DATA_UNI => {
                params.initial_max_stream_data_uni =
                    read_varint_payload(payload, "initial_max_stream_data_uni")?;
                params.flags |= TpFlags::INITIAL_MAX_STREAM_DATA_UNI;
            }

            TP_ID_INITIAL_MAX_STREAMS_BIDI => {
                let value = read_varint_payload(payload, "initial_max_streams_bidi")?;
                if value > MAX_STREAMS_MAX {
                    return Err(CodecError::invalid("initial_max_streams_bidi"));
                }
                params.initial_max_bidi_streams = value;
                params.flags |= TpFlags::INITIAL_MAX_STREAMS_BIDI;
            }

            TP_ID_INITIAL_MAX_STREAMS_UNI => {
                let value = read_varint_payload(payload, "initial_max_streams_uni")?;
                if value > MAX_STREAMS_MAX {
                    return Err(CodecError::invalid("initial_max_streams_uni"));
                }
                params.initial_max_uni_streams = value;
                params.flags |= TpFlags::INITIAL_MAX_STREAMS_UNI;
            }

            TP_ID_ACK_DELAY_EXPONENT => {
                let value = read_varint_payload(payload, "ack_delay_exponent")?;
                if value > ACK_DELAY_EXPONENT_MAX {
                    return Err(CodecError::invalid("ack_delay_exponent"));
                }
                params.ack_delay_exponent = value;
                params.flags |= TpFlags::ACK_DELAY_EXPONENT;
            }

            TP_ID_MAX_ACK_DELAY => {
                let value = read_varint_payload(payload, "max_ack_delay")?;
                if value > MAX_ACK_DELAY_MAX_MS {
                    return Err(CodecError::invalid("max_ack_delay"));
                }
                params.max_ack_delay_ms = value;
                params.flags |= TpFlags::MAX_ACK_DELAY;
            }

            TP_ID_DISABLE_ACTIVE_MIGRATION => {
                if length != 0 {
                    return Err(CodecError::invalid("disable_active_migration"));
                }
                params.flags |= TpFlags::DISABLE_ACTIVE_MIGRATION;
            }

            TP_ID_PREFERRED_ADDRESS => {
                if !is_server_tp {
                    return Err(CodecError::invalid("preferred_address"));
                }
                // Body tolerated but not interpreted.
            }

            TP_ID_ACTIVE_CONNECTION_ID_LIMIT => {
                let value = read_varint_payload(payload, "active_connection_id_limit")?;
                if value < ACTIVE_CONNECTION_ID_LIMIT_MIN {
                    return Err(CodecError::invalid("active_connection_id_limit"));
                }
                params.active_connection_id_limit = value;
                params.flags |= TpFlags::ACTIVE_CONNECTION_ID_LIMIT;
            }

            TP_ID_INITIAL_SOURCE_CONNECTION_ID => {
                if length > MAX_CONNECTION_ID_LEN {
                    return Err(CodecError::invalid("initial_source_connection_id"));
                }
                params.initial_source_connection_id = ConnectionIdBuf::new(payload);
                params.flags |= TpFlags::INITIAL_SOURCE_CONNECTION_ID;
            }

            TP_ID_RETRY_SOURCE_CONNECTION_ID => {
                if length > MAX_CONNECTION_ID_LEN || !is_server_tp {
                    return Err(CodecError::invalid("retry_source_connection_id"));
                }
                params.retry_source_connection_id = ConnectionIdBuf::new(payload);
                params.flags |= TpFlags::RETRY_SOURCE_CONNECTION_ID;
            }

            TP_ID_MAX_DATAGRAM_FRAME_SIZE => {
                params.max_datagram_frame_size =
                    read_varint_payload(payload, "max_datagram_frame_size")?;
                params.flags |= TpFlags::MAX_DATAGRAM_FRAME_SIZE;
            }

            TP_ID_CIBIR_ENCODING => {
                let mut inner = 0usize;
                let cibir_length = varint::decode(payload, &mut inner)
                    .ok_or(CodecError::invalid("cibir_encoding"))?;
                let cibir_offset = varint::decode(payload, &mut inner)
                    .ok_or(CodecError::invalid("cibir_encoding"))?;
                let max = MAX_CONNECTION_ID_LEN as u64;
                if inner != length
                    || cibir_length < 1
                    || cibir_length > max
                    || cibir_offset > max
                    || cibir_length + cibir_offset > max
                {
                    return Err(CodecError::invalid("cibir_encoding"));
                }
                params.cibir_length = cibir_length;
                params.cibir_offset = cibir_offset;
                params.flags |= TpFlags::CIBIR_ENCODING;
            }

            TP_ID_DISABLE_1RTT_ENCRYPTION => {
                if length != 0 {
                    return Err(CodecError::invalid("disable_1rtt_encryption"));
                }
                params.flags |= TpFlags::DISABLE_1RTT_ENCRYPTION;
            }

            TP_ID_VERSION_INFO => {
                let mut info = Vec::new();
                if info.try_reserve_exact(length).is_err() {
                    return Err(CodecError::OutOfMemory);
                }
                info.extend_from_slice(payload);
                params.version_info = Some(info.into_boxed_slice());
                params.flags |= TpFlags::VERSION_NEGOTIATION;
            }

            TP_ID_MIN_ACK_DELAY => {
                let value = read_varint_payload(payload, "min_ack_delay")?;
                if value > MIN_ACK_DELAY_MAX_US {
                    return Err(CodecError::invalid("min_ack_delay"));
                }
                params.min_ack_delay_us = value;
                params.flags |= TpFlags::MIN_ACK_DELAY;
            }

            TP_ID_GREASE_QUIC_BIT => {
                if length != 0 {
                    return Err(CodecError::invalid("grease_quic_bit"));
                }
                params.flags |= TpFlags::GREASE_QUIC_BIT;
            }

            TP_ID_RELIABLE_RESET_ENABLED => {
                if length != 0 {
                    return Err(CodecError::invalid("reliable_reset_enabled"));
                }
                params.flags |= TpFlags::RELIABLE_RESET_ENABLED;
            }

            TP_ID_ENABLE_TIMESTAMP => {
                let value = read_varint_payload(payload, "enable_timestamp")?;
                if value > ENABLE_TIMESTAMP_MAX {
                    return Err(CodecError::invalid("enable_timestamp"));
                }
                params.flags |= TpFlags::from_bits_truncate((value as u32) << TIMESTAMP_SHIFT);
            }

            _ => {
                if is_reserved_id(id) {
                    trace!(id, "ignoring reserved transport parameter");
                } else {
                    trace!(id, "ignoring unknown transport parameter");
                }
            }
        }

        offset += length;
    }

    if params.flags.contains(TpFlags::MIN_ACK_DELAY)
        && params.min_ack_delay_us > params.max_ack_delay_ms * 1000
    {
        return Err(CodecError::invalid("min_ack_delay exceeds max_ack_delay"));
    }

    Ok(())
}

/// Copy `src` into `dst`, duplicating the owned `version_info` blob so the
/// two records end up with independent allocations.
pub fn copy_transport_parameters(
    src: &TransportParams,
    dst: &mut TransportParams,
) -> Result<(), CodecError> {
    let version_info = match src.version_info.as_deref() {
        Some(info) => {
            let mut copy = Vec::new();
            copy.try_reserve_exact(info.len())
                .map_err(|_| CodecError::OutOfMemory)?;
            copy.extend_from_slice(info);
            Some(copy.into_boxed_slice())
        }
        None => None,
    };
    *dst = TransportParams {
        flags: src.flags,
        idle_timeout_ms: src.idle_timeout_ms,
        max_udp_payload_size: src.max_udp_payload_size,
        initial_max_data: src.initial_max_data,
        initial_max_stream_data_bidi_local: src.initial_max_stream_data_bidi_local,
        initial_max_stream_data_bidi_remote: src.initial_max_stream_data_bidi_remote,
        initial_max_stream_data_uni: src.initial_max_stream_data_uni,
        initial_max_bidi_streams: src.initial_max_bidi_streams,
        initial_max_uni_streams: src.initial_max_uni_streams,
        ack_delay_exponent: src.ack_delay_exponent,
        max_ack_delay_ms: src.max_ack_delay_ms,
        min_ack_delay_us: src.min_ack_delay_us,
        active_connection_id_limit: src.active_connection_id_limit,
        max_datagram_frame_size: src.max_datagram_frame_size,
        cibir_length: src.cibir_length,
        cibir_offset: src.cibir_offset,
        original_destination_connection_id: src.original_destination_connection_id,
        initial_source_connection_id: src.initial_source_connection_id,
        retry_source_connection_id: src.retry_source_connection_id,
        stateless_reset_token: src.stateless_reset_token,
        version_info,
    };
    Ok(())
}

/// Release the owned `version_info` blob and clear its presence flag.
/// Safe to call more than once.
pub fn cleanup_transport_parameters(params: &mut TransportParams) {
    if params.flags.contains(TpFlags::VERSION_NEGOTIATION) {
        params.version_info = None;
        params.flags.remove(TpFlags::VERSION_NEGOTIATION);
    }
}
