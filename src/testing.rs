//! Console side of an RMCP+ session, used to drive the dispatcher in unit tests.

use std::net::SocketAddr;
use std::time::Instant;

use rand::RngCore;

use crate::crypto::{SessionKeys, checksum, derive_keys, encrypt_payload, normalize_key_sha1};
use crate::error::{Error, Result};
use crate::protocol::{
    AUTH_TYPE_NONE, BMC_SLAVE_ADDR, REMOTE_SWID, RMCP_CLASS_IPMI, RMCP_VERSION,
    decode_rmcpplus_packet, decode_v15_packet, encode_rmcpplus_packet, payload_type,
    rakp2_key_exchange_auth_code_sha1, rakp3_key_exchange_auth_code_sha1,
    rakp4_integrity_check_value_sha1_96, rakp_status,
};
use crate::server::{Dispatcher, Outbound};

pub(crate) const CONSOLE_ADDR: &str = "198.51.100.20:49152";

/// Build an Open Session Request payload proposing the one suite we speak.
pub(crate) fn build_open_session_request_payload(
    message_tag: u8,
    requested_privilege: u8,
    remote_console_session_id: u32,
) -> Vec<u8> {
    let mut p = Vec::with_capacity(32);
    p.push(message_tag);
    p.push(requested_privilege);
    p.extend_from_slice(&[0x00, 0x00]);
    p.extend_from_slice(&remote_console_session_id.to_le_bytes());
    for (kind, algorithm) in [(0x00u8, 0x01u8), (0x01, 0x01), (0x02, 0x01)] {
        p.extend_from_slice(&[kind, 0x00, 0x00, 0x08, algorithm, 0x00, 0x00, 0x00]);
    }
    p
}

#[derive(Debug, Clone)]
pub(crate) struct OpenSessionResponse {
    pub status_code: u8,
    pub max_privilege_level: u8,
    pub remote_console_session_id: u32,
    pub managed_system_session_id: u32,
}

pub(crate) fn parse_open_session_response_payload(payload: &[u8]) -> Result<OpenSessionResponse> {
    if payload.len() < 8 {
        return Err(Error::Protocol("open session response payload too short"));
    }
    let remote_console_session_id = u32::from_le_bytes(
        payload[4..8]
            .try_into()
            .map_err(|_| Error::Protocol("invalid remote session id"))?,
    );
    let managed_system_session_id = match payload.get(8..12) {
        Some(b) => u32::from_le_bytes(b.try_into().map_err(|_| Error::Protocol("bad id"))?),
        None => 0,
    };
    Ok(OpenSessionResponse {
        status_code: payload[1],
        max_privilege_level: payload[2],
        remote_console_session_id,
        managed_system_session_id,
    })
}

#[derive(Debug, Clone)]
pub(crate) struct RakpMessage2 {
    pub status_code: u8,
    pub bmc_random: [u8; 16],
    pub bmc_guid: [u8; 16],
    pub key_exchange_auth_code: [u8; 20],
}

pub(crate) fn parse_rakp_message_2_payload(payload: &[u8]) -> Result<RakpMessage2> {
    if payload.len() < 8 {
        return Err(Error::Protocol("RAKP message 2 payload too short"));
    }
    let status_code = payload[1];
    if status_code != rakp_status::NO_ERRORS {
        return Ok(RakpMessage2 {
            status_code,
            bmc_random: [0; 16],
            bmc_guid: [0; 16],
            key_exchange_auth_code: [0; 20],
        });
    }
    if payload.len() < 60 {
        return Err(Error::Protocol("RAKP message 2 payload too short"));
    }
    let field = |range: core::ops::Range<usize>| payload[range].to_vec();
    Ok(RakpMessage2 {
        status_code,
        bmc_random: field(8..24)
            .try_into()
            .map_err(|_| Error::Protocol("invalid bmc random"))?,
        bmc_guid: field(24..40)
            .try_into()
            .map_err(|_| Error::Protocol("invalid bmc guid"))?,
        key_exchange_auth_code: field(40..60)
            .try_into()
            .map_err(|_| Error::Protocol("invalid key exchange auth code"))?,
    })
}

#[derive(Debug, Clone)]
pub(crate) struct RakpMessage4 {
    pub status_code: u8,
    pub integrity_check_value: Vec<u8>,
}

pub(crate) fn parse_rakp_message_4_payload(payload: &[u8]) -> Result<RakpMessage4> {
    if payload.len() < 8 {
        return Err(Error::Protocol("RAKP message 4 payload too short"));
    }
    Ok(RakpMessage4 {
        status_code: payload[1],
        integrity_check_value: payload[8..].to_vec(),
    })
}

/// Encode an IPMI LAN request from the remote console (SWID 0x81) to the BMC.
pub(crate) fn encode_ipmi_lan_request(netfn: u8, cmd: u8, rq_seq: u8, data: &[u8]) -> Vec<u8> {
    let netfn_lun = netfn << 2;
    let mut msg = Vec::with_capacity(7 + data.len());
    msg.push(BMC_SLAVE_ADDR);
    msg.push(netfn_lun);
    msg.push(checksum(&[BMC_SLAVE_ADDR, netfn_lun]));
    msg.push(REMOTE_SWID);
    msg.push((rq_seq & 0x3F) << 2);
    msg.push(cmd);
    msg.extend_from_slice(data);
    let csum2 = checksum(&msg[3..]);
    msg.push(csum2);
    msg
}

/// Completion code and data of a LAN response, after checking both checksums.
pub(crate) fn decode_ipmi_lan_response(msg: &[u8]) -> Result<(u8, Vec<u8>)> {
    if msg.len() < 8 {
        return Err(Error::Protocol("IPMI response too short"));
    }
    if checksum(&msg[..2]) != msg[2] {
        return Err(Error::Protocol("invalid IPMI checksum1"));
    }
    let last = msg.len() - 1;
    if checksum(&msg[3..last]) != msg[last] {
        return Err(Error::Protocol("invalid IPMI checksum2"));
    }
    if msg[0] != REMOTE_SWID || msg[3] != BMC_SLAVE_ADDR {
        return Err(Error::Protocol("unexpected addressing"));
    }
    Ok((msg[6], msg[7..last].to_vec()))
}

/// Unauthenticated IPMI v1.5 request, as sent before any session exists.
pub(crate) fn v15_request(netfn: u8, cmd: u8, data: &[u8]) -> Vec<u8> {
    let msg = encode_ipmi_lan_request(netfn, cmd, 0, data);
    let mut out = vec![RMCP_VERSION, 0x00, 0xFF, RMCP_CLASS_IPMI, AUTH_TYPE_NONE];
    out.extend_from_slice(&0u32.to_le_bytes());
    out.extend_from_slice(&0u32.to_le_bytes());
    out.push(msg.len() as u8);
    out.extend_from_slice(&msg);
    out
}

pub(crate) fn decode_v15_response(datagram: &[u8]) -> Result<(u8, Vec<u8>)> {
    decode_ipmi_lan_response(&decode_v15_packet(datagram)?.payload)
}

/// A scripted remote console.
#[derive(Debug)]
pub(crate) struct Console {
    pub source: SocketAddr,
    username: Vec<u8>,
    password: Vec<u8>,
    kg: Option<Vec<u8>>,
    pub requested_privilege: u8,
    pub role: u8,
    pub remote_session_id: u32,
    pub managed_session_id: u32,
    console_random: [u8; 16],
    bmc_random: [u8; 16],
    bmc_guid: [u8; 16],
    pub keys: Option<SessionKeys>,
    pub session_seq: u32,
    rq_seq: u8,
}

impl Console {
    pub(crate) fn new(username: &str, password: &str) -> Self {
        let mut console_random = [0u8; 16];
        rand::rng().fill_bytes(&mut console_random);
        Self {
            source: CONSOLE_ADDR.parse().expect("console addr"),
            username: username.as_bytes().to_vec(),
            password: password.as_bytes().to_vec(),
            kg: None,
            requested_privilege: 0x00,
            role: 0x04,
            remote_session_id: 0xC0FF_EE01,
            managed_session_id: 0,
            console_random,
            bmc_random: [0; 16],
            bmc_guid: [0; 16],
            keys: None,
            session_seq: 0,
            rq_seq: 0,
        }
    }

    pub(crate) fn from_addr(mut self, source: &str) -> Self {
        self.source = source.parse().expect("source addr");
        self
    }

    pub(crate) fn with_bmc_key(mut self, kg: &str) -> Self {
        self.kg = Some(kg.as_bytes().to_vec());
        self
    }

    pub(crate) fn open_session_request(&self) -> Vec<u8> {
        let payload = build_open_session_request_payload(
            0x01,
            self.requested_privilege,
            self.remote_session_id,
        );
        encode_rmcpplus_packet(
            payload_type::OPEN_SESSION_REQUEST,
            0,
            0,
            &payload,
            false,
            false,
            None,
        )
        .expect("encode open session request")
    }

    pub(crate) fn accept_open_session_response(
        &mut self,
        datagram: &[u8],
    ) -> Result<OpenSessionResponse> {
        let packet = decode_rmcpplus_packet(datagram, None)?;
        assert_eq!(packet.payload_type, payload_type::OPEN_SESSION_RESPONSE);
        let response = parse_open_session_response_payload(&packet.payload)?;
        self.managed_session_id = response.managed_system_session_id;
        Ok(response)
    }

    pub(crate) fn rakp1(&self) -> Vec<u8> {
        let mut p = Vec::with_capacity(28 + self.username.len());
        p.push(0x02);
        p.extend_from_slice(&[0x00, 0x00, 0x00]);
        p.extend_from_slice(&self.managed_session_id.to_le_bytes());
        p.extend_from_slice(&self.console_random);
        p.push(self.role);
        p.extend_from_slice(&[0x00, 0x00]);
        p.push(self.username.len() as u8);
        p.extend_from_slice(&self.username);
        encode_rmcpplus_packet(payload_type::RAKP_1, 0, 0, &p, false, false, None)
            .expect("encode RAKP 1")
    }

    /// Parse RAKP message 2 and, on success, check the BMC's proof of our password.
    pub(crate) fn accept_rakp2(&mut self, datagram: &[u8]) -> Result<RakpMessage2> {
        let packet = decode_rmcpplus_packet(datagram, None)?;
        assert_eq!(packet.payload_type, payload_type::RAKP_2);
        let message = parse_rakp_message_2_payload(&packet.payload)?;
        if message.status_code != rakp_status::NO_ERRORS {
            return Ok(message);
        }

        let expected = rakp2_key_exchange_auth_code_sha1(
            &normalize_key_sha1(&self.password),
            self.remote_session_id,
            self.managed_session_id,
            &self.console_random,
            &message.bmc_random,
            &message.bmc_guid,
            self.role,
            &self.username,
        )?;
        if expected != message.key_exchange_auth_code {
            return Err(Error::AuthenticationFailed("RAKP 2 auth code mismatch"));
        }
        self.bmc_random = message.bmc_random;
        self.bmc_guid = message.bmc_guid;
        Ok(message)
    }

    /// RAKP message 3, deriving our copy of the session keys.
    pub(crate) fn rakp3(&mut self) -> Vec<u8> {
        let user_key = normalize_key_sha1(&self.password);
        let auth_code = rakp3_key_exchange_auth_code_sha1(
            &user_key,
            &self.bmc_random,
            self.remote_session_id,
            self.role,
            &self.username,
        )
        .expect("RAKP 3 auth code");

        let kg = match &self.kg {
            Some(kg) => normalize_key_sha1(kg),
            None => user_key,
        };
        self.keys = Some(
            derive_keys(
                &kg,
                &self.console_random,
                &self.bmc_random,
                self.role,
                &self.username,
            )
            .expect("derive keys"),
        );

        let mut p = Vec::with_capacity(28);
        p.push(0x03);
        p.push(0x00);
        p.extend_from_slice(&[0x00, 0x00]);
        p.extend_from_slice(&self.managed_session_id.to_le_bytes());
        p.extend_from_slice(&auth_code);
        encode_rmcpplus_packet(payload_type::RAKP_3, 0, 0, &p, false, false, None)
            .expect("encode RAKP 3")
    }

    /// Parse RAKP message 4 and, on success, verify the integrity check value with our SIK.
    pub(crate) fn accept_rakp4(&mut self, datagram: &[u8]) -> Result<RakpMessage4> {
        let packet = decode_rmcpplus_packet(datagram, None)?;
        assert_eq!(packet.payload_type, payload_type::RAKP_4);
        let message = parse_rakp_message_4_payload(&packet.payload)?;
        if message.status_code != rakp_status::NO_ERRORS {
            return Ok(message);
        }
        let keys = self.keys.as_ref().ok_or(Error::Protocol("no keys"))?;
        let expected = rakp4_integrity_check_value_sha1_96(
            &keys.sik,
            &self.console_random,
            self.managed_session_id,
            &self.bmc_guid,
        )?;
        if message.integrity_check_value != expected {
            return Err(Error::AuthenticationFailed("RAKP 4 integrity check mismatch"));
        }
        Ok(message)
    }

    /// Run the whole handshake against `dispatcher`.
    pub(crate) fn login(&mut self, dispatcher: &mut Dispatcher, now: Instant) -> Result<()> {
        let open = single(dispatcher.handle(&self.open_session_request(), self.source, now));
        let response = self.accept_open_session_response(&open)?;
        if response.status_code != rakp_status::NO_ERRORS {
            return Err(Error::AuthenticationFailed("open session refused"));
        }

        let rakp2 = single(dispatcher.handle(&self.rakp1(), self.source, now));
        let message = self.accept_rakp2(&rakp2)?;
        if message.status_code != rakp_status::NO_ERRORS {
            return Err(Error::AuthenticationFailed("RAKP 2 error status"));
        }

        let rakp3 = self.rakp3();
        let rakp4 = single(dispatcher.handle(&rakp3, self.source, now));
        let message = self.accept_rakp4(&rakp4)?;
        if message.status_code != rakp_status::NO_ERRORS {
            return Err(Error::AuthenticationFailed("RAKP 4 error status"));
        }
        Ok(())
    }

    /// Encrypted, signed IPMI request using the next session sequence number.
    pub(crate) fn request(&mut self, netfn: u8, cmd: u8, data: &[u8]) -> Vec<u8> {
        self.session_seq += 1;
        self.request_with_seq(self.session_seq, netfn, cmd, data)
    }

    pub(crate) fn request_with_seq(&mut self, seq: u32, netfn: u8, cmd: u8, data: &[u8]) -> Vec<u8> {
        let keys = self.keys.clone().expect("session keys");
        self.rq_seq = (self.rq_seq + 1) & 0x3F;
        let msg = encode_ipmi_lan_request(netfn, cmd, self.rq_seq, data);
        let (iv, ciphertext) = encrypt_payload(&msg, &keys.aes_key).expect("encrypt");
        let mut body = iv.to_vec();
        body.extend_from_slice(&ciphertext);
        encode_rmcpplus_packet(
            payload_type::IPMI,
            self.managed_session_id,
            seq,
            &body,
            true,
            true,
            Some(&keys),
        )
        .expect("encode request")
    }

    /// Decrypt and verify a response; returns the completion code and data.
    pub(crate) fn parse_response(&self, datagram: &[u8]) -> Result<(u8, Vec<u8>)> {
        let packet = decode_rmcpplus_packet(datagram, self.keys.as_ref())?;
        if packet.session_id != self.remote_session_id {
            return Err(Error::Protocol("response for another session"));
        }
        decode_ipmi_lan_response(&packet.payload)
    }

    /// Send one command and return the decoded response.
    pub(crate) fn call(
        &mut self,
        dispatcher: &mut Dispatcher,
        now: Instant,
        netfn: u8,
        cmd: u8,
        data: &[u8],
    ) -> (u8, Vec<u8>) {
        let request = self.request(netfn, cmd, data);
        let reply = single(dispatcher.handle(&request, self.source, now));
        self.parse_response(&reply).expect("response")
    }
}

/// The bytes of the only datagram in `out`.
pub(crate) fn single(out: Vec<Outbound>) -> Vec<u8> {
    assert_eq!(out.len(), 1, "expected exactly one datagram, got {out:?}");
    out.into_iter().next().map(|o| o.bytes).unwrap_or_default()
}
