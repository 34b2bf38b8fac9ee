//! TLS `ClientHello` inspection for the QUIC handshake first flight.
//!
//! A server-side QUIC stack needs three facts out of the very first CRYPTO
//! bytes, before any handshake key exists: the offered SNI, the client's
//! ALPN list, and the peer's transport parameters. The CRYPTO stream
//! carries raw TLS handshake messages (no record layer):
//!
//! ```text
//! HandshakeType (1 byte) = 0x01
//! Length (3 bytes)
//! ProtocolVersion (2 bytes)
//! Random (32 bytes)
//! SessionID (1 byte length + variable)
//! CipherSuites (2 bytes length + variable)
//! CompressionMethods (1 byte length + variable)
//! Extensions (2 bytes length + variable, optional)
//! ```
//!
//! Incomplete input is not an error: [`read_initial`] returns
//! [`CodecError::Pending`] until the CRYPTO stream has delivered whole
//! messages, and the caller retries with more bytes. Everything else that
//! fails, fails hard: the data is adversarial and a malformed `ClientHello`
//! dooms the nascent connection.

use tracing::trace;

use crate::cursor::Cursor;
use crate::error::CodecError;
use crate::params::{decode_transport_parameters, TransportParams};
use crate::version::QuicVersion;

/// Lowest acceptable legacy protocol version (TLS 1.0). QUIC clients speak
/// TLS 1.3 but still encode a TLS-1.2-compatible outer version.
const TLS1_PROTOCOL_VERSION: u16 = 0x0301;

const TLS_MESSAGE_HEADER_LEN: usize = 4;
const TLS_RANDOM_LEN: usize = 32;
const TLS_MAX_SESSION_ID_LEN: usize = 32;

/// TLS `HandshakeType` for `ClientHello`
const TLS_HANDSHAKE_TYPE_CLIENT_HELLO: u8 = 0x01;

/// SNI extension type
const TLS_EXTENSION_TYPE_SNI: u16 = 0x0000;

/// ALPN extension type
const TLS_EXTENSION_TYPE_ALPN: u16 = 0x0010;

/// SNI name type for hostname
const TLS_SNI_NAME_TYPE_HOSTNAME: u8 = 0x00;

/// Facts extracted from a complete first flight.
///
/// Both fields borrow from the caller's CRYPTO buffer; the struct must not
/// outlive it. `client_alpn_list` is always present after a successful
/// [`read_initial`]; `server_name` is optional.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct NewConnectionInfo<'a> {
    /// First `host_name` entry of the SNI extension, if one was offered.
    /// UTF-8 is expected but not enforced here.
    pub server_name: Option<&'a [u8]>,
    /// Raw ALPN `ProtocolName` list: concatenated entries each prefixed by
    /// its 1-byte length, without the outer 2-byte list length.
    pub client_alpn_list: Option<&'a [u8]>,
}

impl NewConnectionInfo<'_> {
    /// The offered server name as a string, when present and valid UTF-8.
    #[must_use]
    pub fn server_name_str(&self) -> Option<&str> {
        self.server_name
            .and_then(|name| std::str::from_utf8(name).ok())
    }

    /// Check whether the client offered `proto` (compared as a whole
    /// `(length, bytes)` entry).
    #[must_use]
    pub fn alpn_contains(&self, proto: &[u8]) -> bool {
        let Some(list) = self.client_alpn_list else {
            return false;
        };
        let mut rest = list;
        while let Some((&len, tail)) = rest.split_first() {
            let len = len as usize;
            if tail.len() < len {
                return false;
            }
            if &tail[..len] == proto {
                return true;
            }
            rest = &tail[len..];
        }
        false
    }
}

/// Handshake secrets tap for key logging.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TlsSecrets {
    pub client_random: [u8; TLS_RANDOM_LEN],
    pub client_random_set: bool,
}

/// Parse the first flight of CRYPTO bytes from a client.
///
/// `buf` holds one or more concatenated handshake messages, all of which
/// must be `ClientHello`s. The negotiated `version` selects which TLS
/// extension code carries the transport parameters; those are decoded into
/// `peer_params`.
///
/// # Errors
///
/// - [`CodecError::Pending`] when the buffer ends before a complete
///   message; retry with more bytes.
/// - [`CodecError::InvalidParameter`] on any framing violation, or when the
///   completed flight lacks an ALPN list or transport parameters.
pub fn read_initial<'a>(
    version: QuicVersion,
    buf: &'a [u8],
    peer_params: &mut TransportParams,
) -> Result<NewConnectionInfo<'a>, CodecError> {
    let mut info = NewConnectionInfo::default();
    let mut cursor = Cursor::new(buf);

    loop {
        if cursor.remaining() < TLS_MESSAGE_HEADER_LEN {
            return Err(CodecError::Pending);
        }

        let msg_type = cursor.read_u8("handshake type")?;
        if msg_type != TLS_HANDSHAKE_TYPE_CLIENT_HELLO {
            trace!(msg_type, "not a ClientHello");
            return Err(CodecError::invalid("handshake type"));
        }

        let msg_len = cursor.read_u24("handshake length")? as usize;
        if cursor.remaining() < msg_len {
            return Err(CodecError::Pending);
        }
        let body = cursor.read_bytes(msg_len, "handshake body")?;

        read_client_hello(version, body, &mut info, peer_params)?;

        if cursor.is_empty() {
            break;
        }
    }

    if info.client_alpn_list.is_none() {
        return Err(CodecError::invalid("missing ALPN extension"));
    }
    // A missing server name is allowed; single-host deployments omit SNI.

    Ok(info)
}

/// Copy the 32-byte client random out of a buffered `ClientHello`.
///
/// The caller must already hold at least the handshake header, the legacy
/// version, and the random (38 bytes); shorter input is a caller bug.
pub fn read_client_random(buf: &[u8], secrets: &mut TlsSecrets) -> Result<(), CodecError> {
    const RANDOM_OFFSET: usize = TLS_MESSAGE_HEADER_LEN + 2;
    debug_assert!(buf.len() >= RANDOM_OFFSET + TLS_RANDOM_LEN);
    if buf.len() < RANDOM_OFFSET + TLS_RANDOM_LEN {
        return Err(CodecError::invalid("client random"));
    }
    secrets
        .client_random
        .copy_from_slice(&buf[RANDOM_OFFSET..RANDOM_OFFSET + TLS_RANDOM_LEN]);
    secrets.client_random_set = true;
    Ok(())
}

/// Total length of the fully delivered handshake messages at the front of
/// `buf`. A trailing partial message is not counted; the caller hands
/// exactly this many bytes to the TLS library and buffers the rest.
#[must_use]
pub fn complete_messages_length(buf: &[u8]) -> usize {
    let mut total = 0;
    while buf.len() - total >= TLS_MESSAGE_HEADER_LEN {
        let header = &buf[total..];
        let body_len = (usize::from(header[1]) << 16)
            | (usize::from(header[2]) << 8)
            | usize::from(header[3]);
        let msg_len = TLS_MESSAGE_HEADER_LEN + body_len;
        if buf.len() - total < msg_len {
            break;
        }
        total += msg_len;
    }
    total
}

fn read_client_hello<'a>(
    version: QuicVersion,
    body: &'a [u8],
    info: &mut NewConnectionInfo<'a>,
    peer_params: &mut TransportParams,
) -> Result<(), CodecError> {
    let mut r = Cursor::new(body);

    let client_version = r.read_u16("client version")?;
    if client_version < TLS1_PROTOCOL_VERSION {
        trace!(client_version, "legacy version too old");
        return Err(CodecError::invalid("client version"));
    }

    r.skip(TLS_RANDOM_LEN, "client random")?;

    let session_id_len = usize::from(r.read_u8("session ID length")?);
    if session_id_len > TLS_MAX_SESSION_ID_LEN {
        return Err(CodecError::invalid("session ID length"));
    }
    r.skip(session_id_len, "session ID")?;

    let cipher_suites_len = usize::from(r.read_u16("cipher suites length")?);
    if cipher_suites_len % 2 != 0 {
        return Err(CodecError::invalid("cipher suites length"));
    }
    r.skip(cipher_suites_len, "cipher suites")?;

    let compression_len = usize::from(r.read_u8("compression methods length")?);
    if compression_len < 1 {
        return Err(CodecError::invalid("compression methods length"));
    }
    r.skip(compression_len, "compression methods")?;

    // The extensions vector is optional; a body that ends here is complete.
    if r.remaining() < 2 {
        return Ok(());
    }
    let extensions_len = usize::from(r.read_u16("extensions length")?);
    let extensions = r.read_bytes(extensions_len, "extensions")?;

    read_extensions(version, extensions, info, peer_params)
}

fn read_extensions<'a>(
    version: QuicVersion,
    buf: &'a [u8],
    info: &mut NewConnectionInfo<'a>,
    peer_params: &mut TransportParams,
) -> Result<(), CodecError> {
    let tp_extension_type = version.transport_params_extension_type();

    let mut found_sni = false;
    let mut found_alpn = false;
    let mut found_transport_params = false;

    let mut r = Cursor::new(buf);
    while !r.is_empty() {
        let ext_type = r.read_u16("extension type")?;
        let ext_len = usize::from(r.read_u16("extension length")?);
        let ext_body = r.read_bytes(ext_len, "extension body")?;

        if ext_type == TLS_EXTENSION_TYPE_SNI {
            if found_sni {
                return Err(CodecError::invalid("duplicate server_name extension"));
            }
            info.server_name = read_sni_extension(ext_body)?;
            found_sni = true;
        } else if ext_type == TLS_EXTENSION_TYPE_ALPN {
            if found_alpn {
                return Err(CodecError::invalid("duplicate ALPN extension"));
            }
            info.client_alpn_list = Some(read_alpn_extension(ext_body)?);
            found_alpn = true;
        } else if ext_type == tp_extension_type {
            if found_transport_params {
                return Err(CodecError::invalid(
                    "duplicate transport parameters extension",
                ));
            }
            decode_transport_parameters(false, ext_body, peer_params)?;
            found_transport_params = true;
        } else {
            trace!(ext_type, "skipping extension");
        }
    }

    if !found_transport_params {
        return Err(CodecError::invalid("missing transport parameters extension"));
    }

    Ok(())
}

/// Walk a `ServerNameList` and return the first `host_name` entry.
///
/// The whole list is validated even though only the first matching entry is
/// exposed.
fn read_sni_extension(buf: &[u8]) -> Result<Option<&[u8]>, CodecError> {
    let mut r = Cursor::new(buf);

    // The list must at least fit NameType(1) plus an empty HostName(2).
    let list_len = r.read_u16("server name list length")?;
    if list_len < 3 {
        return Err(CodecError::invalid("server name list length"));
    }

    let mut server_name = None;
    while !r.is_empty() {
        let name_type = r.read_u8("server name type")?;
        let name_len = usize::from(r.read_u16("server name length")?);
        let name = r.read_bytes(name_len, "server name")?;

        if name_type == TLS_SNI_NAME_TYPE_HOSTNAME && server_name.is_none() {
            server_name = Some(name);
        }
    }

    Ok(server_name)
}

/// Validate a `ProtocolNameList` and return its payload, inner length
/// prefixes included, so downstream ALPN matching can compare whole
/// entries.
fn read_alpn_extension(buf: &[u8]) -> Result<&[u8], CodecError> {
    // List size (2) plus at least one protocol ID of 1 byte with its own
    // length prefix.
    if buf.len() < 4 {
        return Err(CodecError::invalid("ALPN extension length"));
    }

    let mut r = Cursor::new(buf);
    let list_len = usize::from(r.read_u16("ALPN list length")?);
    if list_len != r.remaining() {
        return Err(CodecError::invalid("ALPN list length"));
    }
    let list = r.read_bytes(list_len, "ALPN list")?;

    let mut entries = Cursor::new(list);
    while !entries.is_empty() {
        let entry_len = usize::from(entries.read_u8("ALPN entry length")?);
        if entry_len < 1 {
            return Err(CodecError::invalid("ALPN entry length"));
        }
        entries.skip(entry_len, "ALPN entry")?;
    }

    Ok(list)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::params::{encode_transport_parameters, TpFlags};

    // ========================================================================
    // Test Data Generation
    // ========================================================================

    /// Build one raw extension block.
    fn ext(ext_type: u16, body: &[u8]) -> Vec<u8> {
        let mut data = Vec::new();
        data.extend_from_slice(&ext_type.to_be_bytes());
        data.extend_from_slice(&(body.len() as u16).to_be_bytes());
        data.extend_from_slice(body);
        data
    }

    fn sni_ext(entries: &[(u8, &[u8])]) -> Vec<u8> {
        let mut list = Vec::new();
        for (name_type, name) in entries {
            list.push(*name_type);
            list.extend_from_slice(&(name.len() as u16).to_be_bytes());
            list.extend_from_slice(name);
        }
        let mut body = Vec::new();
        body.extend_from_slice(&(list.len() as u16).to_be_bytes());
        body.extend_from_slice(&list);
        ext(TLS_EXTENSION_TYPE_SNI, &body)
    }

    fn alpn_ext(protocols: &[&[u8]]) -> Vec<u8> {
        let mut list = Vec::new();
        for proto in protocols {
            list.push(proto.len() as u8);
            list.extend_from_slice(proto);
        }
        let mut body = Vec::new();
        body.extend_from_slice(&(list.len() as u16).to_be_bytes());
        body.extend_from_slice(&list);
        ext(TLS_EXTENSION_TYPE_ALPN, &body)
    }

    /// Transport parameters extension carrying `initial_max_data`.
    fn tp_ext(ext_type: u16) -> Vec<u8> {
        let mut params = TransportParams::default();
        params.flags = TpFlags::INITIAL_MAX_DATA;
        params.initial_max_data = 1_048_576;
        let body = encode_transport_parameters(false, &params, None, 0).expect("encode");
        ext(ext_type, &body)
    }

    /// Assemble a raw `ClientHello` handshake message around the given
    /// extension blocks, back-patching the length fields.
    struct HelloBuilder {
        version: u16,
        session_id: Vec<u8>,
        cipher_suites: Vec<u8>,
        compression_methods: Vec<u8>,
        extensions: Vec<u8>,
        with_extensions_vector: bool,
    }

    impl HelloBuilder {
        fn new() -> Self {
            Self {
                version: 0x0303,
                session_id: Vec::new(),
                cipher_suites: vec![0x13, 0x01],
                compression_methods: vec![0x00],
                extensions: Vec::new(),
                with_extensions_vector: true,
            }
        }

        fn extension(mut self, block: Vec<u8>) -> Self {
            self.extensions.extend_from_slice(&block);
            self
        }

        fn standard(self) -> Self {
            self.extension(sni_ext(&[(0, b"example.com")]))
                .extension(alpn_ext(&[b"h2"]))
                .extension(tp_ext(0x39))
        }

        fn build(self) -> Vec<u8> {
            let mut body = Vec::new();
            body.extend_from_slice(&self.version.to_be_bytes());
            body.extend_from_slice(&[0u8; TLS_RANDOM_LEN]);
            body.push(self.session_id.len() as u8);
            body.extend_from_slice(&self.session_id);
            body.extend_from_slice(&(self.cipher_suites.len() as u16).to_be_bytes());
            body.extend_from_slice(&self.cipher_suites);
            body.push(self.compression_methods.len() as u8);
            body.extend_from_slice(&self.compression_methods);
            if self.with_extensions_vector {
                body.extend_from_slice(&(self.extensions.len() as u16).to_be_bytes());
                body.extend_from_slice(&self.extensions);
            }

            let mut message = vec![TLS_HANDSHAKE_TYPE_CLIENT_HELLO];
            message.push((body.len() >> 16) as u8);
            message.push((body.len() >> 8) as u8);
            message.push(body.len() as u8);
            message.extend_from_slice(&body);
            message
        }
    }

    fn parse(buf: &[u8]) -> Result<(NewConnectionInfo<'_>, TransportParams), CodecError> {
        let mut params = TransportParams::default();
        let info = read_initial(QuicVersion::V1, buf, &mut params)?;
        Ok((info, params))
    }

    // === Complete Flight Tests ===

    #[test]
    fn test_read_initial_minimal() {
        let hello = HelloBuilder::new().standard().build();
        let (info, params) = parse(&hello).expect("parse");

        assert_eq!(info.server_name, Some(&b"example.com"[..]));
        assert_eq!(info.server_name_str(), Some("example.com"));
        assert_eq!(info.client_alpn_list, Some(&b"\x02h2"[..]));
        assert!(params.flags.contains(TpFlags::INITIAL_MAX_DATA));
        assert_eq!(params.initial_max_data, 1_048_576);
    }

    #[test]
    fn test_missing_sni_is_allowed() {
        let hello = HelloBuilder::new()
            .extension(alpn_ext(&[b"h3"]))
            .extension(tp_ext(0x39))
            .build();
        let (info, _) = parse(&hello).expect("parse");
        assert_eq!(info.server_name, None);
        assert!(info.alpn_contains(b"h3"));
    }

    #[test]
    fn test_two_concatenated_client_hellos() {
        let mut buf = HelloBuilder::new().standard().build();
        buf.extend(HelloBuilder::new().standard().build());
        let (info, _) = parse(&buf).expect("parse");
        assert_eq!(info.server_name_str(), Some("example.com"));
    }

    // === Incompleteness Tests ===

    #[test]
    fn test_empty_buffer_is_pending() {
        assert_eq!(parse(&[]).unwrap_err(), CodecError::Pending);
    }

    #[test]
    fn test_truncated_body_is_pending() {
        let hello = HelloBuilder::new().standard().build();
        assert_eq!(
            parse(&hello[..hello.len() - 1]).unwrap_err(),
            CodecError::Pending
        );
    }

    #[test]
    fn test_every_proper_prefix_fails_safely() {
        let hello = HelloBuilder::new().standard().build();
        for cut in 0..hello.len() {
            let result = parse(&hello[..cut]);
            assert!(result.is_err(), "prefix of {cut} bytes parsed as complete");
        }
    }

    // === Skeleton Rejection Tests ===

    #[test]
    fn test_not_client_hello_rejected() {
        let mut hello = HelloBuilder::new().standard().build();
        hello[0] = 0x02; // ServerHello
        assert_eq!(
            parse(&hello).unwrap_err(),
            CodecError::invalid("handshake type")
        );
    }

    #[test]
    fn test_second_message_must_be_client_hello() {
        let mut buf = HelloBuilder::new().standard().build();
        buf.extend_from_slice(&[0x0B, 0x00, 0x00, 0x00]); // Certificate
        assert_eq!(
            parse(&buf).unwrap_err(),
            CodecError::invalid("handshake type")
        );
    }

    #[test]
    fn test_old_legacy_version_rejected() {
        let mut builder = HelloBuilder::new().standard();
        builder.version = 0x0300; // SSL 3.0
        assert!(parse(&builder.build()).is_err());
    }

    #[test]
    fn test_oversized_session_id_rejected() {
        let mut builder = HelloBuilder::new().standard();
        builder.session_id = vec![0u8; 33];
        assert!(parse(&builder.build()).is_err());
    }

    #[test]
    fn test_odd_cipher_suites_length_rejected() {
        let mut builder = HelloBuilder::new().standard();
        builder.cipher_suites = vec![0x13, 0x01, 0x13];
        assert!(parse(&builder.build()).is_err());
    }

    #[test]
    fn test_empty_compression_methods_rejected() {
        let mut builder = HelloBuilder::new().standard();
        builder.compression_methods = Vec::new();
        assert!(parse(&builder.build()).is_err());
    }

    #[test]
    fn test_no_extensions_means_no_alpn() {
        let mut builder = HelloBuilder::new();
        builder.with_extensions_vector = false;
        assert_eq!(
            parse(&builder.build()).unwrap_err(),
            CodecError::invalid("missing ALPN extension")
        );
    }

    // === Extension Dispatch Tests ===

    #[test]
    fn test_duplicate_extensions_rejected() {
        let hello = HelloBuilder::new()
            .standard()
            .extension(sni_ext(&[(0, b"again.example")]))
            .build();
        assert!(parse(&hello).is_err());

        let hello = HelloBuilder::new()
            .standard()
            .extension(alpn_ext(&[b"h2"]))
            .build();
        assert!(parse(&hello).is_err());

        let hello = HelloBuilder::new().standard().extension(tp_ext(0x39)).build();
        assert!(parse(&hello).is_err());
    }

    #[test]
    fn test_unknown_extension_skipped() {
        let hello = HelloBuilder::new()
            .extension(ext(0xFE0D, &[0x01, 0x02, 0x03]))
            .standard()
            .build();
        assert!(parse(&hello).is_ok());
    }

    #[test]
    fn test_truncated_extension_rejected() {
        // Extension header claims more body than the vector holds.
        let hello = HelloBuilder::new()
            .standard()
            .extension(vec![0xAB, 0xCD, 0x00, 0x10, 0x00])
            .build();
        assert!(parse(&hello).is_err());
    }

    #[test]
    fn test_missing_transport_params_rejected() {
        let hello = HelloBuilder::new()
            .extension(sni_ext(&[(0, b"example.com")]))
            .extension(alpn_ext(&[b"h2"]))
            .build();
        assert_eq!(
            parse(&hello).unwrap_err(),
            CodecError::invalid("missing transport parameters extension")
        );
    }

    #[test]
    fn test_draft29_extension_code() {
        let hello = HelloBuilder::new()
            .extension(alpn_ext(&[b"h3-29"]))
            .extension(tp_ext(0xFFA5))
            .build();

        let mut params = TransportParams::default();
        let draft29 = QuicVersion::from_u32(0xFF00_001D);
        read_initial(draft29, &hello, &mut params).expect("parse under draft-29");
        assert!(params.flags.contains(TpFlags::INITIAL_MAX_DATA));

        // Under version 1 the draft code is just an unknown extension.
        let mut params = TransportParams::default();
        assert!(read_initial(QuicVersion::V1, &hello, &mut params).is_err());
    }

    #[test]
    fn test_standard_code_not_recognized_under_draft29() {
        let hello = HelloBuilder::new().standard().build();
        let mut params = TransportParams::default();
        let draft29 = QuicVersion::from_u32(0xFF00_001D);
        assert!(read_initial(draft29, &hello, &mut params).is_err());
    }

    #[test]
    fn test_truncated_transport_params_rejected() {
        // 8-byte varint form announced, then nothing.
        let hello = HelloBuilder::new()
            .extension(alpn_ext(&[b"h2"]))
            .extension(ext(0x39, &[0xC0]))
            .build();
        assert!(parse(&hello).is_err());
    }

    // === SNI Tests ===

    #[test]
    fn test_first_hostname_entry_wins() {
        let hello = HelloBuilder::new()
            .extension(sni_ext(&[(9, b"x"), (0, b"alpha"), (0, b"beta")]))
            .extension(alpn_ext(&[b"h2"]))
            .extension(tp_ext(0x39))
            .build();
        let (info, _) = parse(&hello).expect("parse");
        assert_eq!(info.server_name, Some(&b"alpha"[..]));
    }

    #[test]
    fn test_sni_without_hostname_entry() {
        let hello = HelloBuilder::new()
            .extension(sni_ext(&[(9, b"xyz")]))
            .extension(alpn_ext(&[b"h2"]))
            .extension(tp_ext(0x39))
            .build();
        let (info, _) = parse(&hello).expect("parse");
        assert_eq!(info.server_name, None);
    }

    #[test]
    fn test_empty_sni_list_rejected() {
        let mut body = Vec::new();
        body.extend_from_slice(&2u16.to_be_bytes());
        let hello = HelloBuilder::new()
            .extension(ext(TLS_EXTENSION_TYPE_SNI, &body))
            .extension(alpn_ext(&[b"h2"]))
            .extension(tp_ext(0x39))
            .build();
        assert!(parse(&hello).is_err());
    }

    #[test]
    fn test_truncated_sni_entry_rejected() {
        // Entry claims a 200-byte hostname that is not there.
        let mut body = Vec::new();
        body.extend_from_slice(&6u16.to_be_bytes());
        body.push(0x00);
        body.extend_from_slice(&200u16.to_be_bytes());
        body.extend_from_slice(b"abc");
        let hello = HelloBuilder::new()
            .extension(ext(TLS_EXTENSION_TYPE_SNI, &body))
            .extension(alpn_ext(&[b"h2"]))
            .extension(tp_ext(0x39))
            .build();
        assert!(parse(&hello).is_err());
    }

    // === ALPN Tests ===

    #[test]
    fn test_alpn_list_bytes_exposed_verbatim() {
        let hello = HelloBuilder::new()
            .extension(alpn_ext(&[b"h2", b"http/1.1"]))
            .extension(tp_ext(0x39))
            .build();
        let (info, _) = parse(&hello).expect("parse");
        assert_eq!(info.client_alpn_list, Some(&b"\x02h2\x08http/1.1"[..]));
        assert!(info.alpn_contains(b"h2"));
        assert!(info.alpn_contains(b"http/1.1"));
        assert!(!info.alpn_contains(b"h3"));
    }

    #[test]
    fn test_alpn_length_mismatch_rejected() {
        // Outer list length disagrees with the extension body.
        let mut body = Vec::new();
        body.extend_from_slice(&5u16.to_be_bytes());
        body.extend_from_slice(b"\x02h2");
        let hello = HelloBuilder::new()
            .extension(ext(TLS_EXTENSION_TYPE_ALPN, &body))
            .extension(tp_ext(0x39))
            .build();
        assert!(parse(&hello).is_err());
    }

    #[test]
    fn test_alpn_zero_length_entry_rejected() {
        let mut body = Vec::new();
        body.extend_from_slice(&4u16.to_be_bytes());
        body.extend_from_slice(b"\x00\x02h2");
        let hello = HelloBuilder::new()
            .extension(ext(TLS_EXTENSION_TYPE_ALPN, &body))
            .extension(tp_ext(0x39))
            .build();
        assert!(parse(&hello).is_err());
    }

    #[test]
    fn test_alpn_truncated_entry_rejected() {
        let mut body = Vec::new();
        body.extend_from_slice(&3u16.to_be_bytes());
        body.extend_from_slice(b"\x05h2");
        let hello = HelloBuilder::new()
            .extension(ext(TLS_EXTENSION_TYPE_ALPN, &body))
            .extension(tp_ext(0x39))
            .build();
        assert!(parse(&hello).is_err());
    }

    #[test]
    fn test_empty_alpn_extension_rejected() {
        let mut body = Vec::new();
        body.extend_from_slice(&0u16.to_be_bytes());
        let hello = HelloBuilder::new()
            .extension(ext(TLS_EXTENSION_TYPE_ALPN, &body))
            .extension(tp_ext(0x39))
            .build();
        assert!(parse(&hello).is_err());
    }

    // === Client Random Tests ===

    #[test]
    fn test_read_client_random() {
        let mut hello = HelloBuilder::new().standard().build();
        for (i, byte) in hello[6..38].iter_mut().enumerate() {
            *byte = i as u8;
        }

        let mut secrets = TlsSecrets::default();
        read_client_random(&hello, &mut secrets).expect("read");
        assert!(secrets.client_random_set);
        let expected: Vec<u8> = (0..32).collect();
        assert_eq!(&secrets.client_random[..], &expected[..]);
    }

    // === Message Length Accounting Tests ===

    #[test]
    fn test_complete_messages_length() {
        let one = HelloBuilder::new().standard().build();

        assert_eq!(complete_messages_length(&[]), 0);
        assert_eq!(complete_messages_length(&one[..3]), 0);
        assert_eq!(complete_messages_length(&one[..one.len() - 1]), 0);
        assert_eq!(complete_messages_length(&one), one.len());

        let mut two = one.clone();
        two.extend_from_slice(&one);
        assert_eq!(complete_messages_length(&two), 2 * one.len());

        // One complete message followed by a partial second.
        let mut partial = one.clone();
        partial.extend_from_slice(&one[..10]);
        assert_eq!(complete_messages_length(&partial), one.len());
    }
}
