use std::collections::VecDeque;
use std::net::SocketAddr;
use std::time::{Duration, Instant};

use rand::Rng;

use crate::crypto::{SessionKeys, encrypt_payload};
use crate::error::{Error, Result};
use crate::protocol::{
    AUTH_TYPE_RMCPPLUS, algorithm, encode_rmcpplus_packet, payload_type,
};

/// Inbound sequence number that restarts replay tracking.
pub(crate) const SEQUENCE_WRAP_SENTINEL: u32 = 0xFFFF_FFFF;

/// Handshake progress of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Created by a first datagram; no Open Session Request processed yet.
    Fresh,
    /// Open Session Response sent, waiting for RAKP message 1.
    OpenRequested,
    /// RAKP message 2 sent, waiting for RAKP message 3.
    Rakp1Received,
    /// Keys derived; IPMI messages are accepted.
    Authenticated,
    /// Terminal; the session is about to leave the table.
    Closed,
}

/// IPMI framing the peer last spoke.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IpmiVersion {
    /// IPMI v1.5 session header.
    V15,
    /// RMCP+ session header.
    V20,
}

/// Retransmission and expiry settings shared by every session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct RetryPolicy {
    /// Minimum wait for an acknowledgement; up to the same amount of jitter is added.
    pub base_timeout: Duration,
    /// Retransmissions of one payload before the session is abandoned.
    pub max_retries: u32,
    /// How long a session with nothing in flight may stay silent.
    pub idle_timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base_timeout: Duration::from_millis(500),
            max_retries: 3,
            idle_timeout: Duration::from_secs(60),
        }
    }
}

impl RetryPolicy {
    /// `base + uniform(0, base)`.
    pub(crate) fn timeout(&self) -> Duration {
        let base = self.base_timeout.as_micros() as u64;
        let jitter = rand::rng().random_range(0..=base);
        self.base_timeout + Duration::from_micros(jitter)
    }
}

/// RAKP values kept between messages 1 and 3.
#[derive(Debug, Clone)]
pub(crate) struct RakpState {
    pub console_random: [u8; 16],
    pub bmc_random: [u8; 16],
    pub role: u8,
    pub guid: [u8; 16],
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct OutboundPayload {
    pub payload: Vec<u8>,
    pub payload_type: u8,
    pub retry: bool,
}

#[derive(Debug, Clone)]
struct InFlight {
    payload_type: u8,
    packet: Vec<u8>,
    deadline: Instant,
    retransmissions: u32,
}

/// What a due retry timer asks the dispatcher to do.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum RetryOutcome {
    /// Nothing in flight is overdue.
    Idle,
    /// Send these bytes again.
    Retransmit(Vec<u8>),
    /// Retries are exhausted; drop the session.
    Expired,
}

/// Per-peer state, owned by the dispatcher's session table.
#[derive(Debug)]
pub(crate) struct Session {
    /// Unique across the dispatcher's lifetime; ties timer entries to this session.
    pub(crate) serial: u64,
    pub(crate) sockaddr: SocketAddr,
    pub(crate) state: SessionState,
    /// Count of datagrams sent to the peer.
    pub(crate) stage: u32,
    pub(crate) ipmi_version: IpmiVersion,
    pub(crate) auth_type: u8,
    /// Session id chosen by the console (written into outbound headers).
    pub(crate) remote_session_id: u32,
    /// Session id chosen by us (expected in inbound headers).
    pub(crate) managed_session_id: u32,
    sequence_number: u32,
    rem_sequence_number: u32,
    pub(crate) keys: Option<SessionKeys>,
    pub(crate) conf_algo: u8,
    pub(crate) integrity_algo: u8,
    pub(crate) rakp: Option<RakpState>,
    last_payload: Option<InFlight>,
    pending_payloads: VecDeque<OutboundPayload>,
    pub(crate) privilege: u8,
    pub(crate) max_privilege: u8,
    pub(crate) username: Option<String>,
    last_activity: Instant,
    /// Key of this session's entry in the dispatcher timer queue.
    pub(crate) timer: Option<(Instant, u64)>,
}

impl Session {
    pub(crate) fn new(serial: u64, sockaddr: SocketAddr, now: Instant) -> Self {
        Self {
            serial,
            sockaddr,
            state: SessionState::Fresh,
            stage: 0,
            ipmi_version: IpmiVersion::V20,
            auth_type: AUTH_TYPE_RMCPPLUS,
            remote_session_id: 0,
            managed_session_id: 0,
            sequence_number: 1,
            rem_sequence_number: 0,
            keys: None,
            conf_algo: 0,
            integrity_algo: 0,
            rakp: None,
            last_payload: None,
            pending_payloads: VecDeque::new(),
            privilege: 0,
            max_privilege: 4,
            username: None,
            last_activity: now,
            timer: None,
        }
    }

    pub(crate) fn touch(&mut self, now: Instant) {
        self.last_activity = now;
    }

    /// Install the negotiated keys and turn on HMAC-SHA1-96 / AES-CBC-128.
    pub(crate) fn activate(&mut self, keys: SessionKeys) {
        self.keys = Some(keys);
        self.integrity_algo = algorithm::INTEGRITY_HMAC_SHA1_96;
        self.conf_algo = algorithm::CONFIDENTIALITY_AES_CBC_128;
        self.state = SessionState::Authenticated;
    }

    pub(crate) fn is_authenticated(&self) -> bool {
        self.state == SessionState::Authenticated && self.keys.is_some()
    }

    pub(crate) fn sequence_number(&self) -> u32 {
        self.sequence_number
    }

    pub(crate) fn rem_sequence_number(&self) -> u32 {
        self.rem_sequence_number
    }

    /// Anti-replay check for an inbound session sequence number.
    ///
    /// Equal numbers are accepted (console retransmissions); the wrap sentinel resets tracking.
    pub(crate) fn accept_inbound_seq(&mut self, seq: u32) -> Result<()> {
        if seq == SEQUENCE_WRAP_SENTINEL {
            self.rem_sequence_number = 0;
            return Ok(());
        }
        if seq < self.rem_sequence_number {
            return Err(Error::Replay {
                received: seq,
                last: self.rem_sequence_number,
            });
        }
        self.rem_sequence_number = seq;
        Ok(())
    }

    fn allocate_out_seq(&mut self) -> u32 {
        let current = self.sequence_number;
        self.sequence_number = if current == SEQUENCE_WRAP_SENTINEL {
            1
        } else {
            current + 1
        };
        current
    }

    /// Queue a payload for the peer.
    ///
    /// Returns the datagram to send now, or `None` when another retried payload
    /// is still waiting for its acknowledgement.
    pub(crate) fn send(
        &mut self,
        payload: Vec<u8>,
        payload_type: u8,
        retry: bool,
        now: Instant,
        policy: &RetryPolicy,
    ) -> Result<Option<Vec<u8>>> {
        let outbound = OutboundPayload {
            payload,
            payload_type,
            retry,
        };
        if self.last_payload.is_some() {
            self.pending_payloads.push_back(outbound);
            return Ok(None);
        }
        self.transmit(outbound, now, policy).map(Some)
    }

    /// The peer answered: stop retrying the in-flight payload and release queued ones.
    pub(crate) fn acknowledge(&mut self, now: Instant, policy: &RetryPolicy) -> Result<Vec<Vec<u8>>> {
        self.last_payload = None;

        let mut packets = Vec::new();
        while self.last_payload.is_none() {
            let Some(next) = self.pending_payloads.pop_front() else {
                break;
            };
            packets.push(self.transmit(next, now, policy)?);
        }
        Ok(packets)
    }

    fn transmit(
        &mut self,
        outbound: OutboundPayload,
        now: Instant,
        policy: &RetryPolicy,
    ) -> Result<Vec<u8>> {
        let packet = self.encode(&outbound)?;
        self.stage += 1;
        if outbound.retry {
            self.last_payload = Some(InFlight {
                payload_type: outbound.payload_type,
                packet: packet.clone(),
                deadline: now + policy.timeout(),
                retransmissions: 0,
            });
        }
        Ok(packet)
    }

    fn encode(&mut self, outbound: &OutboundPayload) -> Result<Vec<u8>> {
        let in_session = matches!(
            outbound.payload_type,
            payload_type::IPMI | payload_type::SOL
        );
        if !in_session {
            // Session setup messages travel with session id and sequence 0.
            return encode_rmcpplus_packet(
                outbound.payload_type,
                0,
                0,
                &outbound.payload,
                false,
                false,
                None,
            );
        }

        if !self.is_authenticated() {
            return Err(Error::Protocol("session payload before key exchange"));
        }
        let keys = self
            .keys
            .clone()
            .ok_or(Error::Protocol("missing session keys"))?;

        let encrypted = self.conf_algo == algorithm::CONFIDENTIALITY_AES_CBC_128;
        let body = if encrypted {
            let (iv, ciphertext) = encrypt_payload(&outbound.payload, &keys.aes_key)?;
            let mut body = Vec::with_capacity(16 + ciphertext.len());
            body.extend_from_slice(&iv);
            body.extend_from_slice(&ciphertext);
            body
        } else {
            outbound.payload.clone()
        };

        let seq = self.allocate_out_seq();
        encode_rmcpplus_packet(
            outbound.payload_type,
            self.remote_session_id,
            seq,
            &body,
            self.integrity_algo != 0,
            encrypted,
            Some(&keys),
        )
    }

    /// Record a datagram sent outside the retry machinery (IPMI v1.5 replies).
    pub(crate) fn note_unreliable_send(&mut self) {
        self.stage += 1;
    }

    /// Retransmit the in-flight payload when its deadline has passed.
    ///
    /// The bytes are resent unmodified, so the sequence number does not advance.
    pub(crate) fn poll_retry(&mut self, now: Instant, policy: &RetryPolicy) -> RetryOutcome {
        let Some(in_flight) = self.last_payload.as_mut() else {
            return RetryOutcome::Idle;
        };
        if now < in_flight.deadline {
            return RetryOutcome::Idle;
        }
        if in_flight.retransmissions >= policy.max_retries {
            return RetryOutcome::Expired;
        }
        in_flight.retransmissions += 1;
        in_flight.deadline = now + policy.timeout();
        RetryOutcome::Retransmit(in_flight.packet.clone())
    }

    /// Bytes of the in-flight payload when it has the given type, counted as one more send.
    ///
    /// Used when the peer repeats the message our in-flight reply answers.
    pub(crate) fn resend_in_flight(&mut self, payload_type: u8) -> Option<Vec<u8>> {
        let packet = self
            .last_payload
            .as_ref()
            .filter(|f| f.payload_type == payload_type)
            .map(|f| f.packet.clone())?;
        self.stage += 1;
        Some(packet)
    }

    pub(crate) fn has_in_flight(&self) -> bool {
        self.last_payload.is_some()
    }

    /// Payload type awaiting acknowledgement.
    pub(crate) fn last_payload_type(&self) -> Option<u8> {
        self.last_payload.as_ref().map(|f| f.payload_type)
    }

    #[cfg(test)]
    pub(crate) fn pending_len(&self) -> usize {
        self.pending_payloads.len()
    }

    pub(crate) fn is_idle_expired(&self, now: Instant, policy: &RetryPolicy) -> bool {
        !self.has_in_flight() && now >= self.last_activity + policy.idle_timeout
    }

    /// When the dispatcher should next look at this session.
    pub(crate) fn next_deadline(&self, policy: &RetryPolicy) -> Instant {
        match &self.last_payload {
            Some(in_flight) => in_flight.deadline,
            None => self.last_activity + policy.idle_timeout,
        }
    }
}
