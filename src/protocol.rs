use crate::crypto::{
    INTEGRITY_TRAILER_LEN, SessionKeys, checksum, decrypt_payload, hmac_sha1_parts,
    hmac_sha1_truncated_12, truncate_96, verify_integrity,
};
use crate::error::{Error, Result};

/// RMCP header values.
pub(crate) const RMCP_VERSION: u8 = 0x06;
const RMCP_RESERVED: u8 = 0x00;
const RMCP_SEQ_NO_ACK: u8 = 0xFF;
pub(crate) const RMCP_CLASS_IPMI: u8 = 0x07;

/// Session auth type byte: RMCP+ (IPMI v2.0) framing.
pub(crate) const AUTH_TYPE_RMCPPLUS: u8 = 0x06;
/// Session auth type byte: IPMI v1.5, no authentication.
pub(crate) const AUTH_TYPE_NONE: u8 = 0x00;

/// Payload type byte: bit 7 encrypted, bit 6 authenticated, bits 5:0 the type.
const PAYLOAD_ENCRYPTED: u8 = 0x80;
const PAYLOAD_AUTHENTICATED: u8 = 0x40;
const PAYLOAD_TYPE_MASK: u8 = 0x3F;

/// RMCP+ session trailer next header value.
const RMCPPLUS_NEXT_HEADER: u8 = 0x07;

/// IPMB addresses used on the LAN channel. Responses echo the request's, so only
/// consoles need them.
#[cfg(test)]
pub(crate) const BMC_SLAVE_ADDR: u8 = 0x20;
#[cfg(test)]
pub(crate) const REMOTE_SWID: u8 = 0x81;

/// Payload type numbers (IPMI v2.0 Table 13-16).
pub(crate) mod payload_type {
    /// Standard IPMI message.
    pub const IPMI: u8 = 0x00;
    /// Serial over LAN.
    pub const SOL: u8 = 0x01;
    /// RMCP+ Open Session Request.
    pub const OPEN_SESSION_REQUEST: u8 = 0x10;
    /// RMCP+ Open Session Response.
    pub const OPEN_SESSION_RESPONSE: u8 = 0x11;
    /// RAKP Message 1.
    pub const RAKP_1: u8 = 0x12;
    /// RAKP Message 2.
    pub const RAKP_2: u8 = 0x13;
    /// RAKP Message 3.
    pub const RAKP_3: u8 = 0x14;
    /// RAKP Message 4.
    pub const RAKP_4: u8 = 0x15;
}

/// Algorithm numbers. Only the mandatory-to-implement suite is ever selected.
pub(crate) mod algorithm {
    /// Authentication algorithm: RAKP-HMAC-SHA1.
    pub const AUTH_RAKP_HMAC_SHA1: u8 = 0x01;
    /// Integrity algorithm: HMAC-SHA1-96.
    pub const INTEGRITY_HMAC_SHA1_96: u8 = 0x01;
    /// Confidentiality algorithm: AES-CBC-128.
    pub const CONFIDENTIALITY_AES_CBC_128: u8 = 0x01;
}

/// RMCP+ / RAKP status codes (IPMI v2.0 Table 13-15).
pub(crate) mod rakp_status {
    pub const NO_ERRORS: u8 = 0x00;
    pub const UNAUTHORIZED_NAME: u8 = 0x0D;
    pub const INVALID_INTEGRITY_CHECK_VALUE: u8 = 0x0F;
}

/// IPMI completion codes.
pub(crate) mod completion {
    pub const OK: u8 = 0x00;
    /// Password test failed: wrong password.
    pub const PASSWORD_MISMATCH: u8 = 0x80;
    /// Boot option parameter not supported.
    pub const PARAMETER_NOT_SUPPORTED: u8 = 0x80;
    /// Password test failed: wrong size; also "requested level exceeds limit".
    pub const WRONG_SIZE_OR_LIMIT: u8 = 0x81;
    pub const INVALID_COMMAND: u8 = 0xC1;
    pub const REQUEST_DATA_TRUNCATED: u8 = 0xC6;
    pub const INVALID_DATA_FIELD: u8 = 0xCC;
    pub const INSUFFICIENT_PRIVILEGE: u8 = 0xD4;
}

/// Framing of an inbound datagram, decided by the session auth type byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Framing {
    /// IPMI v1.5 session header.
    V15,
    /// RMCP+ (IPMI v2.0) session header.
    V20,
}

/// Validate the RMCP header and report which session framing follows it.
pub(crate) fn classify_datagram(bytes: &[u8]) -> Result<Framing> {
    if bytes.len() < 5 {
        return Err(Error::Protocol("datagram too short"));
    }
    if bytes[0] != RMCP_VERSION {
        return Err(Error::Protocol("unexpected RMCP version"));
    }
    if bytes[1] != RMCP_RESERVED {
        return Err(Error::Protocol("RMCP reserved byte is not zero"));
    }
    if bytes[2] != RMCP_SEQ_NO_ACK || bytes[3] != RMCP_CLASS_IPMI {
        return Err(Error::Protocol("unexpected RMCP sequence/class"));
    }

    match bytes[4] {
        AUTH_TYPE_RMCPPLUS => Ok(Framing::V20),
        0x00..=0x05 => Ok(Framing::V15),
        _ => Err(Error::Protocol("unsupported session auth type")),
    }
}

/// Payload type number of an RMCP+ datagram, without verifying anything else.
pub(crate) fn peek_payload_type(bytes: &[u8]) -> Option<u8> {
    bytes.get(5).map(|b| b & PAYLOAD_TYPE_MASK)
}

/// Parsed RMCP+ packet (payload is decrypted/verified when keys are provided).
#[derive(Debug, Clone)]
pub(crate) struct DecodedPacket {
    pub payload_type: u8,
    pub is_authenticated: bool,
    pub is_encrypted: bool,
    pub session_id: u32,
    pub session_seq: u32,
    pub payload: Vec<u8>,
}

pub(crate) fn encode_rmcpplus_packet(
    payload_type_num: u8,
    session_id: u32,
    session_seq: u32,
    payload: &[u8],
    authenticated: bool,
    encrypted: bool,
    keys: Option<&SessionKeys>,
) -> Result<Vec<u8>> {
    if (authenticated || encrypted) && keys.is_none() {
        return Err(Error::Protocol(
            "session keys required for authenticated/encrypted packets",
        ));
    }

    let payload_type_byte = make_payload_type_byte(payload_type_num, authenticated, encrypted);

    let payload_len: u16 = payload
        .len()
        .try_into()
        .map_err(|_| Error::Protocol("payload too large"))?;

    let mut packet = Vec::with_capacity(4 + 12 + payload.len() + 32);

    packet.extend_from_slice(&[RMCP_VERSION, RMCP_RESERVED, RMCP_SEQ_NO_ACK, RMCP_CLASS_IPMI]);

    packet.push(AUTH_TYPE_RMCPPLUS);
    packet.push(payload_type_byte);
    packet.extend_from_slice(&session_id.to_le_bytes());
    packet.extend_from_slice(&session_seq.to_le_bytes());
    packet.extend_from_slice(&payload_len.to_le_bytes());

    packet.extend_from_slice(payload);

    if authenticated {
        let keys = keys.ok_or(Error::Protocol("missing session keys"))?;

        // Integrity padding aligns the authenticated range to 4 bytes.
        let base_len = 12usize + payload.len() + 2;
        let pad_len = ((4 - (base_len % 4)) % 4) as u8;

        packet.extend(std::iter::repeat_n(0xFF, pad_len as usize));
        packet.push(pad_len);
        packet.push(RMCPPLUS_NEXT_HEADER);

        let auth_code = hmac_sha1_truncated_12(&keys.k1, &packet[4..])?;
        packet.extend_from_slice(&auth_code);
    }

    Ok(packet)
}

pub(crate) fn decode_rmcpplus_packet(
    bytes: &[u8],
    keys: Option<&SessionKeys>,
) -> Result<DecodedPacket> {
    let header = parse_rmcpplus_header(bytes)?;
    let (is_authenticated, is_encrypted, payload_type_num) =
        split_payload_type(header.payload_type);

    let payload = &bytes[header.header_len..header.header_len + header.payload_len as usize];

    if is_authenticated || is_encrypted {
        let keys = keys.ok_or(Error::AuthenticationFailed(
            "authenticated packet before session keys exist",
        ))?;
        if !is_authenticated {
            return Err(Error::AuthenticationFailed("encrypted packet without integrity"));
        }
        verify_session_trailer(bytes, &header, keys)?;
    }

    let payload = if is_encrypted {
        let keys = keys.ok_or(Error::Protocol("session keys required for encrypted payload"))?;
        decrypt_payload_aes_cbc(payload, &keys.aes_key)?
    } else {
        payload.to_vec()
    };

    Ok(DecodedPacket {
        payload_type: payload_type_num,
        is_authenticated,
        is_encrypted,
        session_id: header.session_id,
        session_seq: header.session_seq,
        payload,
    })
}

#[derive(Debug, Clone)]
struct ParsedHeader {
    payload_type: u8,
    session_id: u32,
    session_seq: u32,
    payload_len: u16,
    header_len: usize,
}

fn parse_rmcpplus_header(bytes: &[u8]) -> Result<ParsedHeader> {
    if bytes.len() < 4 + 12 {
        return Err(Error::Protocol("packet too short"));
    }
    if classify_datagram(bytes)? != Framing::V20 {
        return Err(Error::Protocol("not an RMCP+ packet"));
    }

    let payload_type = bytes[5];
    if payload_type & 0x3F == 0x02 {
        return Err(Error::Unsupported("OEM explicit payload is not supported"));
    }

    let session_id = read_u32_le(bytes, 6)?;
    let session_seq = read_u32_le(bytes, 10)?;
    let payload_len = u16::from_le_bytes([bytes[14], bytes[15]]);

    let header_len = 4 + 12;
    if bytes.len() < header_len + payload_len as usize {
        return Err(Error::Protocol("truncated payload"));
    }

    Ok(ParsedHeader {
        payload_type,
        session_id,
        session_seq,
        payload_len,
        header_len,
    })
}

fn verify_session_trailer(bytes: &[u8], header: &ParsedHeader, keys: &SessionKeys) -> Result<()> {
    let payload_end = header.header_len + header.payload_len as usize;
    if bytes.len() < payload_end + 2 + INTEGRITY_TRAILER_LEN {
        return Err(Error::AuthenticationFailed("authenticated packet too short"));
    }

    if !verify_integrity(bytes, &keys.k1) {
        return Err(Error::AuthenticationFailed("invalid packet auth code"));
    }

    // Trailer layout: [integrity pad bytes][pad_len][next_header][auth code]
    let data_end = bytes.len() - INTEGRITY_TRAILER_LEN;
    let pad_len = bytes[data_end - 2];
    let next_header = bytes[data_end - 1];
    if next_header != RMCPPLUS_NEXT_HEADER {
        return Err(Error::Protocol("unexpected next header"));
    }

    let pad_bytes = &bytes[payload_end..data_end - 2];
    if pad_bytes.len() != pad_len as usize {
        return Err(Error::Protocol("pad length mismatch"));
    }
    if pad_bytes.iter().any(|&b| b != 0xFF) {
        return Err(Error::Protocol("invalid integrity pad bytes"));
    }

    Ok(())
}

fn decrypt_payload_aes_cbc(payload: &[u8], aes_key: &[u8; 16]) -> Result<Vec<u8>> {
    if payload.len() < 32 {
        return Err(Error::Crypto("encrypted payload too short"));
    }

    let iv: [u8; 16] = payload[..16]
        .try_into()
        .map_err(|_| Error::Crypto("invalid IV"))?;
    decrypt_payload(&iv, &payload[16..], aes_key)
}

fn make_payload_type_byte(payload_type_num: u8, authenticated: bool, encrypted: bool) -> u8 {
    (payload_type_num & PAYLOAD_TYPE_MASK)
        | (if authenticated { PAYLOAD_AUTHENTICATED } else { 0 })
        | (if encrypted { PAYLOAD_ENCRYPTED } else { 0 })
}

/// `(authenticated, encrypted, payload type)` of a payload type byte.
fn split_payload_type(payload_type_byte: u8) -> (bool, bool, u8) {
    (
        payload_type_byte & PAYLOAD_AUTHENTICATED != 0,
        payload_type_byte & PAYLOAD_ENCRYPTED != 0,
        payload_type_byte & PAYLOAD_TYPE_MASK,
    )
}

fn read_u32_le(bytes: &[u8], offset: usize) -> Result<u32> {
    bytes
        .get(offset..offset + 4)
        .and_then(|s| s.try_into().ok())
        .map(u32::from_le_bytes)
        .ok_or(Error::Protocol("truncated 32-bit field"))
}

/// IPMI v1.5 session-framed message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct V15Packet {
    pub auth_type: u8,
    pub session_seq: u32,
    pub session_id: u32,
    pub payload: Vec<u8>,
}

pub(crate) fn decode_v15_packet(bytes: &[u8]) -> Result<V15Packet> {
    if classify_datagram(bytes)? != Framing::V15 {
        return Err(Error::Protocol("not an IPMI v1.5 packet"));
    }

    let auth_type = bytes[4];
    let session_seq = read_u32_le(bytes, 5)?;
    let session_id = read_u32_le(bytes, 9)?;

    // A 16-byte auth code follows the session id unless auth type is "none".
    let len_offset = if auth_type == AUTH_TYPE_NONE { 13 } else { 29 };
    let payload_len = *bytes
        .get(len_offset)
        .ok_or(Error::Protocol("truncated v1.5 session header"))? as usize;
    let payload = bytes
        .get(len_offset + 1..len_offset + 1 + payload_len)
        .ok_or(Error::Protocol("truncated v1.5 payload"))?;

    Ok(V15Packet {
        auth_type,
        session_seq,
        session_id,
        payload: payload.to_vec(),
    })
}

/// Encode an unauthenticated IPMI v1.5 message.
pub(crate) fn encode_v15_packet(session_seq: u32, session_id: u32, payload: &[u8]) -> Result<Vec<u8>> {
    let payload_len: u8 = payload
        .len()
        .try_into()
        .map_err(|_| Error::Protocol("v1.5 payload too large"))?;

    let mut packet = Vec::with_capacity(4 + 10 + payload.len() + 1);
    packet.extend_from_slice(&[RMCP_VERSION, RMCP_RESERVED, RMCP_SEQ_NO_ACK, RMCP_CLASS_IPMI]);
    packet.push(AUTH_TYPE_NONE);
    packet.extend_from_slice(&session_seq.to_le_bytes());
    packet.extend_from_slice(&session_id.to_le_bytes());
    packet.push(payload_len);
    packet.extend_from_slice(payload);

    // Legacy pad byte some v1.5 stacks rely on for these frame sizes.
    if matches!(packet.len(), 56 | 84 | 112 | 128 | 156) {
        packet.push(0x00);
    }

    Ok(packet)
}

/// An IPMI LAN request message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct IpmiRequest {
    pub rs_addr: u8,
    pub netfn: u8,
    pub rs_lun: u8,
    pub rq_addr: u8,
    /// `rq_seq << 2 | rq_lun`, echoed in the response.
    pub seq_lun: u8,
    pub cmd: u8,
    pub data: Vec<u8>,
}

/// Decode and validate both checksums of an IPMI LAN request.
pub(crate) fn decode_ipmi_lan_request(msg: &[u8]) -> Result<IpmiRequest> {
    if msg.len() < 7 {
        return Err(Error::Protocol("IPMI request too short"));
    }

    let rs_addr = msg[0];
    let netfn_lun = msg[1];
    if rs_addr.wrapping_add(netfn_lun).wrapping_add(msg[2]) != 0 {
        return Err(Error::AuthenticationFailed("invalid IPMI checksum1"));
    }

    let body = &msg[3..msg.len() - 1];
    if checksum(body) != msg[msg.len() - 1] {
        return Err(Error::AuthenticationFailed("invalid IPMI checksum2"));
    }

    Ok(IpmiRequest {
        rs_addr,
        netfn: netfn_lun >> 2,
        rs_lun: netfn_lun & 0x03,
        rq_addr: msg[3],
        seq_lun: msg[4],
        cmd: msg[5],
        data: msg[6..msg.len() - 1].to_vec(),
    })
}

/// Addressing fields a response must echo from its request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct ResponseRoute {
    pub rq_addr: u8,
    pub rs_addr: u8,
    pub netfn: u8,
    pub rs_lun: u8,
    pub seq_lun: u8,
    pub cmd: u8,
}

impl From<&IpmiRequest> for ResponseRoute {
    fn from(req: &IpmiRequest) -> Self {
        Self {
            rq_addr: req.rq_addr,
            rs_addr: req.rs_addr,
            netfn: req.netfn,
            rs_lun: req.rs_lun,
            seq_lun: req.seq_lun,
            cmd: req.cmd,
        }
    }
}

/// Encode an IPMI LAN response for `route`.
pub(crate) fn encode_ipmi_lan_response(route: &ResponseRoute, completion_code: u8, data: &[u8]) -> Vec<u8> {
    let netfn_lun = ((route.netfn | 0x01) << 2) | (route.seq_lun & 0x03);

    let mut msg = Vec::with_capacity(8 + data.len());
    msg.push(route.rq_addr);
    msg.push(netfn_lun);
    msg.push(checksum(&[route.rq_addr, netfn_lun]));

    msg.push(route.rs_addr);
    msg.push((route.seq_lun & 0xFC) | (route.rs_lun & 0x03));
    msg.push(route.cmd);
    msg.push(completion_code);
    msg.extend_from_slice(data);

    let csum2 = checksum(&msg[3..]);
    msg.push(csum2);
    msg
}

/// Fields of an RMCP+ Open Session Request.
///
/// The algorithm proposals are only logged; the response always names our one suite.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(not(feature = "tracing"), allow(dead_code))]
pub(crate) struct OpenSessionRequest {
    pub message_tag: u8,
    pub requested_privilege: u8,
    pub remote_console_session_id: u32,
    pub auth_algorithm: Option<u8>,
    pub integrity_algorithm: Option<u8>,
    pub confidentiality_algorithm: Option<u8>,
}

pub(crate) fn parse_open_session_request_payload(payload: &[u8]) -> Result<OpenSessionRequest> {
    if payload.len() < 8 {
        return Err(Error::Protocol("open session request payload too short"));
    }

    // Algorithm proposals are optional; byte 5 of each 8-byte block carries the number.
    let algorithm_at = |offset: usize| payload.get(offset + 4).map(|b| b & 0x3F);

    Ok(OpenSessionRequest {
        message_tag: payload[0],
        requested_privilege: payload[1] & 0x0F,
        remote_console_session_id: read_u32_le(payload, 4)?,
        auth_algorithm: algorithm_at(8),
        integrity_algorithm: algorithm_at(16),
        confidentiality_algorithm: algorithm_at(24),
    })
}

/// Build the Open Session Response payload (Table 13-10).
pub(crate) fn build_open_session_response_payload(
    message_tag: u8,
    status_code: u8,
    max_privilege: u8,
    remote_console_session_id: u32,
    managed_system_session_id: u32,
) -> Vec<u8> {
    let mut p = Vec::with_capacity(36);
    p.push(message_tag);
    p.push(status_code);
    p.push(max_privilege);
    p.push(0x00);
    p.extend_from_slice(&remote_console_session_id.to_le_bytes());

    if status_code != rakp_status::NO_ERRORS {
        return p;
    }

    p.extend_from_slice(&managed_system_session_id.to_le_bytes());
    p.extend_from_slice(&algorithm_block(0x00, algorithm::AUTH_RAKP_HMAC_SHA1));
    p.extend_from_slice(&algorithm_block(0x01, algorithm::INTEGRITY_HMAC_SHA1_96));
    p.extend_from_slice(&algorithm_block(
        0x02,
        algorithm::CONFIDENTIALITY_AES_CBC_128,
    ));

    debug_assert_eq!(p.len(), 36);
    p
}

pub(crate) fn algorithm_block(payload_type: u8, algorithm: u8) -> [u8; 8] {
    [
        payload_type,
        0x00,
        0x00,
        0x08,
        algorithm & 0x3F,
        0x00,
        0x00,
        0x00,
    ]
}

/// Fields of RAKP Message 1 (Table 13-11).
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct RakpMessage1 {
    pub message_tag: u8,
    pub managed_system_session_id: u32,
    pub console_random: [u8; 16],
    pub role: u8,
    pub username: Vec<u8>,
}

pub(crate) fn parse_rakp_message_1_payload(payload: &[u8]) -> Result<RakpMessage1> {
    if payload.len() < 28 {
        return Err(Error::Protocol("RAKP message 1 payload too short"));
    }

    let console_random: [u8; 16] = payload[8..24]
        .try_into()
        .map_err(|_| Error::Protocol("invalid console random"))?;

    let name_len = payload[27] as usize;
    if name_len > crate::users::MAX_USERNAME_LEN {
        return Err(Error::Protocol("RAKP message 1 user name too long"));
    }
    let username = payload
        .get(28..28 + name_len)
        .ok_or(Error::Protocol("RAKP message 1 user name truncated"))?;

    Ok(RakpMessage1 {
        message_tag: payload[0],
        managed_system_session_id: read_u32_le(payload, 4)?,
        console_random,
        role: payload[24],
        username: username.to_vec(),
    })
}

/// Build RAKP Message 2 (Table 13-12). Error statuses carry only the first 8 bytes.
pub(crate) fn build_rakp_message_2_payload(
    message_tag: u8,
    status_code: u8,
    remote_console_session_id: u32,
    bmc_random: &[u8; 16],
    bmc_guid: &[u8; 16],
    key_exchange_auth_code: &[u8; 20],
) -> Vec<u8> {
    let mut p = Vec::with_capacity(60);
    p.push(message_tag);
    p.push(status_code);
    p.extend_from_slice(&[0x00, 0x00]);
    p.extend_from_slice(&remote_console_session_id.to_le_bytes());
    if status_code != rakp_status::NO_ERRORS {
        return p;
    }
    p.extend_from_slice(bmc_random);
    p.extend_from_slice(bmc_guid);
    p.extend_from_slice(key_exchange_auth_code);
    p
}

/// Fields of RAKP Message 3 (Table 13-13).
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct RakpMessage3 {
    pub message_tag: u8,
    pub status_code: u8,
    pub managed_system_session_id: u32,
    pub key_exchange_auth_code: Vec<u8>,
}

pub(crate) fn parse_rakp_message_3_payload(payload: &[u8]) -> Result<RakpMessage3> {
    if payload.len() < 8 {
        return Err(Error::Protocol("RAKP message 3 payload too short"));
    }

    Ok(RakpMessage3 {
        message_tag: payload[0],
        status_code: payload[1],
        managed_system_session_id: read_u32_le(payload, 4)?,
        key_exchange_auth_code: payload[8..].iter().copied().take(20).collect(),
    })
}

/// Build RAKP Message 4 (Table 13-14).
pub(crate) fn build_rakp_message_4_payload(
    message_tag: u8,
    status_code: u8,
    remote_console_session_id: u32,
    integrity_check_value: Option<&[u8; 12]>,
) -> Vec<u8> {
    let mut p = Vec::with_capacity(20);
    p.push(message_tag);
    p.push(status_code);
    p.extend_from_slice(&[0x00, 0x00]);
    p.extend_from_slice(&remote_console_session_id.to_le_bytes());
    if let Some(icv) = integrity_check_value {
        p.extend_from_slice(icv);
    }
    p
}

/// RAKP Message 2 key exchange authentication code:
/// `HMAC(K[UID], SIDm | SIDc | Rm | Rc | GUIDc | Role | ULen | UName)`.
#[allow(clippy::too_many_arguments)]
pub(crate) fn rakp2_key_exchange_auth_code_sha1(
    user_key: &[u8; 20],
    remote_console_session_id: u32,
    managed_system_session_id: u32,
    console_random: &[u8; 16],
    bmc_random: &[u8; 16],
    bmc_guid: &[u8; 16],
    role: u8,
    username: &[u8],
) -> Result<[u8; 20]> {
    hmac_sha1_parts(
        user_key,
        &[
            &remote_console_session_id.to_le_bytes(),
            &managed_system_session_id.to_le_bytes(),
            console_random,
            bmc_random,
            bmc_guid,
            &[role, username.len() as u8],
            username,
        ],
    )
}

/// RAKP Message 3 key exchange authentication code:
/// `HMAC(K[UID], Rc | SIDm | Role | ULen | UName)`.
pub(crate) fn rakp3_key_exchange_auth_code_sha1(
    user_key: &[u8; 20],
    bmc_random: &[u8; 16],
    remote_console_session_id: u32,
    role: u8,
    username: &[u8],
) -> Result<[u8; 20]> {
    hmac_sha1_parts(
        user_key,
        &[
            bmc_random,
            &remote_console_session_id.to_le_bytes(),
            &[role, username.len() as u8],
            username,
        ],
    )
}

/// RAKP Message 4 integrity check value: `HMAC(SIK, Rm | SIDc | GUIDc)` truncated to 96 bits.
pub(crate) fn rakp4_integrity_check_value_sha1_96(
    sik: &[u8; 20],
    console_random: &[u8; 16],
    managed_system_session_id: u32,
    bmc_guid: &[u8; 16],
) -> Result<[u8; 12]> {
    let full = hmac_sha1_parts(
        sik,
        &[
            console_random,
            &managed_system_session_id.to_le_bytes(),
            bmc_guid,
        ],
    )?;
    Ok(truncate_96(&full))
}
