//! The session dispatcher: one state machine per peer IP, driven by datagrams and timers.
//!
//! [`Dispatcher`] owns no socket. Transports feed it datagrams with [`Dispatcher::handle`],
//! wake it at [`Dispatcher::next_deadline`] with [`Dispatcher::poll_timers`], and send
//! whatever [`Outbound`] datagrams come back.

use std::collections::{BTreeMap, HashMap};
use std::net::{IpAddr, SocketAddr};
use std::time::Instant;

use crate::bmc::VirtualBmc;
use crate::commands::{self, CommandContext, channel_auth_capabilities};
use crate::config::ServerConfig;
use crate::crypto::SecretBytes;
use crate::debug;
use crate::error::{Error, Result};
use crate::event::{CloseReason, Event, EventKind, EventSink, ObserveSink};
use crate::handshake::{self, HandshakeContext};
use crate::observe;
use crate::protocol::{
    AUTH_TYPE_NONE, Framing, ResponseRoute, classify_datagram, completion,
    decode_ipmi_lan_request, decode_rmcpplus_packet, decode_v15_packet,
    encode_ipmi_lan_response, encode_v15_packet, payload_type, peek_payload_type,
};
use crate::session::{IpmiVersion, RetryOutcome, RetryPolicy, Session, SessionState};
use crate::types::{DeviceIdentity, PrivilegeLevel};
use crate::users::UserStore;

/// A datagram the transport should send.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Outbound {
    /// Peer address.
    pub destination: SocketAddr,
    /// Datagram bytes.
    pub bytes: Vec<u8>,
}

/// Snapshot of one session, for inspection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionInfo {
    /// Address replies are sent to.
    pub peer: SocketAddr,
    /// Handshake progress.
    pub state: SessionState,
    /// Framing the peer last used.
    pub ipmi_version: IpmiVersion,
    /// Session authentication type byte (0x06 for RMCP+).
    pub auth_type: u8,
    /// Datagrams sent to the peer so far.
    pub stage: u32,
    /// Current session privilege, once a user is bound.
    pub privilege: Option<PrivilegeLevel>,
    /// Highest privilege the session may request.
    pub max_privilege: Option<PrivilegeLevel>,
    /// Bound account name.
    pub username: Option<String>,
    /// Next outbound session sequence number.
    pub sequence_number: u32,
    /// Last inbound session sequence number accepted.
    pub rem_sequence_number: u32,
}

/// Outcome of processing one datagram for a session.
#[derive(Debug, Default)]
pub(crate) struct Reply {
    pub packets: Vec<Vec<u8>>,
    pub event: Option<EventKind>,
    pub close: Option<CloseReason>,
}

impl Reply {
    pub(crate) fn send(packets: Vec<Vec<u8>>) -> Self {
        Self {
            packets,
            ..Self::default()
        }
    }

    pub(crate) fn with_event(mut self, event: EventKind) -> Self {
        self.event = Some(event);
        self
    }

    pub(crate) fn closing(mut self, reason: CloseReason) -> Self {
        self.close = Some(reason);
        self
    }
}

/// The emulated BMC: session table, user table, chassis state and retry timers.
pub struct Dispatcher {
    users: UserStore,
    bmc_key: Option<SecretBytes>,
    policy: RetryPolicy,
    identity: DeviceIdentity,
    bmc: VirtualBmc,
    sessions: HashMap<IpAddr, Session>,
    timers: BTreeMap<(Instant, u64), IpAddr>,
    next_serial: u64,
    sink: Box<dyn EventSink + Send>,
}

impl core::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("sessions", &self.sessions.len())
            .field("timers", &self.timers.len())
            .field("bmc", &self.bmc)
            .finish_non_exhaustive()
    }
}

impl Dispatcher {
    /// Dispatcher reporting events through `tracing`/`metrics`.
    pub fn new(config: ServerConfig) -> Self {
        let sink = ObserveSink::new(config.device_name.clone());
        Self::with_sink(config, sink)
    }

    /// Dispatcher reporting events to `sink`.
    pub fn with_sink(config: ServerConfig, sink: impl EventSink + Send + 'static) -> Self {
        Self {
            users: config.users,
            bmc_key: config.bmc_key,
            policy: config.policy,
            identity: config.identity,
            bmc: VirtualBmc::new(),
            sessions: HashMap::new(),
            timers: BTreeMap::new(),
            next_serial: 0,
            sink: Box::new(sink),
        }
    }

    /// Process one inbound datagram from `source`.
    ///
    /// Malformed or unexpected input never surfaces as an error: the datagram is dropped
    /// or the peer's session is closed.
    pub fn handle(&mut self, datagram: &[u8], source: SocketAddr, now: Instant) -> Vec<Outbound> {
        observe::record_datagram(source, datagram.len());
        debug::dump_hex("recv", source, datagram);

        let framing = match classify_datagram(datagram) {
            Ok(framing) => framing,
            Err(err) => {
                observe::record_dropped(source, &err);
                return Vec::new();
            }
        };
        let ip = source.ip();
        let opens_session = framing == Framing::V20
            && peek_payload_type(datagram) == Some(payload_type::OPEN_SESSION_REQUEST);

        if opens_session
            && self
                .sessions
                .get(&ip)
                .is_some_and(|s| s.state != SessionState::Fresh)
        {
            if let Some(previous) = self.take_session(ip) {
                self.finish(previous, CloseReason::Restarted);
            }
        }

        let mut session = match self.take_session(ip) {
            Some(session) => session,
            None if opens_session || framing == Framing::V15 => {
                self.next_serial += 1;
                self.emit(source, EventKind::NewConnection);
                Session::new(self.next_serial, source, now)
            }
            None => {
                observe::record_dropped(source, &Error::Protocol("no session for peer"));
                return Vec::new();
            }
        };

        let result = match framing {
            Framing::V15 => self.handle_v15(&mut session, datagram),
            Framing::V20 => self.handle_v20(&mut session, datagram, now),
        };

        let mut out = Vec::new();
        match result {
            Ok(reply) => {
                session.touch(now);
                let destination = session.sockaddr;
                out.extend(
                    reply
                        .packets
                        .into_iter()
                        .map(|bytes| Outbound { destination, bytes }),
                );
                if let Some(kind) = reply.event {
                    self.emit(source, kind);
                }
                match reply.close {
                    Some(reason) => self.finish(session, reason),
                    None => self.store_session(ip, session),
                }
            }
            Err(err) => {
                observe::record_dropped(source, &err);
                if err.closes_session() {
                    self.finish(session, CloseReason::from(&err));
                } else {
                    self.store_session(ip, session);
                }
            }
        }

        for datagram in &out {
            debug::dump_hex("send", datagram.destination, &datagram.bytes);
        }
        out
    }

    /// Run every timer due at `now`: retransmit unacknowledged handshake messages and
    /// drop sessions that ran out of retries or went idle.
    pub fn poll_timers(&mut self, now: Instant) -> Vec<Outbound> {
        let mut out = Vec::new();
        while let Some((&key, &ip)) = self.timers.first_key_value() {
            if key.0 > now {
                break;
            }
            self.timers.remove(&key);

            let Some(mut session) = self.sessions.remove(&ip) else {
                continue;
            };
            if session.serial != key.1 {
                // Entry of a session that no longer exists; the current one keeps its own.
                self.sessions.insert(ip, session);
                continue;
            }
            session.timer = None;

            match session.poll_retry(now, &self.policy) {
                RetryOutcome::Retransmit(bytes) => {
                    observe::record_retransmit(session.sockaddr, session.last_payload_type());
                    debug::dump_hex("resend", session.sockaddr, &bytes);
                    out.push(Outbound {
                        destination: session.sockaddr,
                        bytes,
                    });
                    self.store_session(ip, session);
                }
                RetryOutcome::Expired => self.finish(session, CloseReason::RetriesExhausted),
                RetryOutcome::Idle if session.is_idle_expired(now, &self.policy) => {
                    self.finish(session, CloseReason::Idle)
                }
                RetryOutcome::Idle => self.store_session(ip, session),
            }
        }
        out
    }

    /// Earliest instant at which [`Dispatcher::poll_timers`] has work to do.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.timers.first_key_value().map(|(key, _)| key.0)
    }

    /// Number of live sessions.
    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    /// Snapshot of the session for peer `ip`.
    pub fn session(&self, ip: IpAddr) -> Option<SessionInfo> {
        self.sessions.get(&ip).map(|s| SessionInfo {
            peer: s.sockaddr,
            state: s.state,
            ipmi_version: s.ipmi_version,
            auth_type: s.auth_type,
            stage: s.stage,
            privilege: PrivilegeLevel::try_from(s.privilege).ok(),
            max_privilege: PrivilegeLevel::try_from(s.max_privilege).ok(),
            username: s.username.clone(),
            sequence_number: s.sequence_number(),
            rem_sequence_number: s.rem_sequence_number(),
        })
    }

    /// The emulated managed system.
    pub fn bmc(&self) -> &VirtualBmc {
        &self.bmc
    }

    /// The account table, including changes made by IPMI commands.
    pub fn users(&self) -> &UserStore {
        &self.users
    }

    fn handle_v15(&mut self, session: &mut Session, datagram: &[u8]) -> Result<Reply> {
        let packet = decode_v15_packet(datagram)?;
        if packet.auth_type != AUTH_TYPE_NONE {
            return Err(Error::Unsupported("authenticated IPMI v1.5 sessions"));
        }
        let request = decode_ipmi_lan_request(&packet.payload)?;
        let route = ResponseRoute::from(&request);

        let (code, data) = if (request.netfn, request.cmd)
            == (commands::netfn::APP, commands::cmd::GET_CHANNEL_AUTH_CAPABILITIES)
        {
            (
                completion::OK,
                channel_auth_capabilities(self.bmc_key.is_some()),
            )
        } else {
            (completion::INVALID_COMMAND, Vec::new())
        };

        session.ipmi_version = IpmiVersion::V15;
        session.auth_type = packet.auth_type;

        let message = encode_ipmi_lan_response(&route, code, &data);
        let bytes = encode_v15_packet(0, 0, &message)?;
        session.note_unreliable_send();
        Ok(Reply::send(vec![bytes]))
    }

    fn handle_v20(&mut self, session: &mut Session, datagram: &[u8], now: Instant) -> Result<Reply> {
        match peek_payload_type(datagram) {
            Some(payload_type::OPEN_SESSION_REQUEST) => {
                let packet = decode_rmcpplus_packet(datagram, None)?;
                handshake::open_session(session, &packet.payload, &self.handshake_context(now))
            }
            Some(payload_type::RAKP_1) => {
                let packet = decode_rmcpplus_packet(datagram, None)?;
                handshake::rakp_message_1(session, &packet.payload, &self.handshake_context(now))
            }
            Some(payload_type::RAKP_3) => {
                let packet = decode_rmcpplus_packet(datagram, None)?;
                handshake::rakp_message_3(session, &packet.payload, &self.handshake_context(now))
            }
            Some(payload_type::IPMI | payload_type::SOL) => {
                self.handle_session_payload(session, datagram, now)
            }
            _ => Err(Error::Unsupported("payload type")),
        }
    }

    fn handle_session_payload(
        &mut self,
        session: &mut Session,
        datagram: &[u8],
        now: Instant,
    ) -> Result<Reply> {
        if !session.is_authenticated() {
            return Err(Error::AuthenticationFailed(
                "session traffic before key exchange",
            ));
        }
        let packet = decode_rmcpplus_packet(datagram, session.keys.as_ref())?;
        if !packet.is_authenticated || !packet.is_encrypted {
            return Err(Error::AuthenticationFailed(
                "session traffic without integrity or confidentiality",
            ));
        }
        if packet.session_id != session.managed_session_id {
            return Err(Error::AuthenticationFailed("packet for another session"));
        }
        session.accept_inbound_seq(packet.session_seq)?;
        let mut packets = session.acknowledge(now, &self.policy)?;

        if packet.payload_type == payload_type::SOL {
            // Serial-over-LAN is not emulated; the packet only counts as an acknowledgement.
            return Ok(Reply::send(packets));
        }

        let request = decode_ipmi_lan_request(&packet.payload)?;
        let route = ResponseRoute::from(&request);

        let mut ctx = CommandContext {
            users: &mut self.users,
            bmc: &mut self.bmc,
            identity: &self.identity,
            kg_configured: self.bmc_key.is_some(),
        };
        let dispatched = commands::dispatch(session, &request, &mut ctx)?;

        let message = encode_ipmi_lan_response(
            &route,
            dispatched.response.completion_code,
            &dispatched.response.data,
        );
        packets.extend(session.send(message, payload_type::IPMI, false, now, &self.policy)?);

        let mut reply = Reply::send(packets).with_event(EventKind::Command {
            name: dispatched.name,
            username: session.username.clone().unwrap_or_default(),
        });
        if dispatched.close_session {
            reply = reply.closing(CloseReason::ClosedByPeer);
        }
        Ok(reply)
    }

    fn handshake_context(&self, now: Instant) -> HandshakeContext<'_> {
        HandshakeContext {
            users: &self.users,
            bmc_key: self.bmc_key.as_ref(),
            policy: &self.policy,
            now,
        }
    }

    fn take_session(&mut self, ip: IpAddr) -> Option<Session> {
        let mut session = self.sessions.remove(&ip)?;
        if let Some(key) = session.timer.take() {
            self.timers.remove(&key);
        }
        Some(session)
    }

    fn store_session(&mut self, ip: IpAddr, mut session: Session) {
        let key = (session.next_deadline(&self.policy), session.serial);
        self.timers.insert(key, ip);
        session.timer = Some(key);
        self.sessions.insert(ip, session);
    }

    fn finish(&mut self, mut session: Session, reason: CloseReason) {
        session.state = SessionState::Closed;
        if let Some(key) = session.timer.take() {
            self.timers.remove(&key);
        }
        self.emit(session.sockaddr, EventKind::SessionClosed { reason });
    }

    fn emit(&mut self, source: SocketAddr, kind: EventKind) {
        self.sink.record(&Event { source, kind });
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use super::*;
    use crate::bmc::PowerState;
    use crate::commands::{cmd, netfn};
    use crate::testing::{Console, decode_v15_response, single, v15_request};

    type Events = Arc<Mutex<Vec<Event>>>;

    fn dispatcher() -> (Dispatcher, Events) {
        dispatcher_with(ServerConfig::builder())
    }

    fn dispatcher_with(builder: crate::config::ServerBuilder) -> (Dispatcher, Events) {
        let config = builder
            .user("Administrator", "Password", PrivilegeLevel::Administrator)
            .user("operator", "0p3rat0r", PrivilegeLevel::Operator)
            .build()
            .expect("config");
        let events: Events = Arc::default();
        let sink = {
            let events = Arc::clone(&events);
            move |e: &Event| events.lock().expect("events").push(e.clone())
        };
        (Dispatcher::with_sink(config, sink), events)
    }

    fn kinds(events: &Events) -> Vec<EventKind> {
        events
            .lock()
            .expect("events")
            .iter()
            .map(|e| e.kind.clone())
            .collect()
    }

    fn closed_with(events: &Events, reason: CloseReason) -> bool {
        kinds(events).contains(&EventKind::SessionClosed { reason })
    }

    #[test]
    fn handshake_agrees_on_keys_and_serves_commands() {
        let (mut d, events) = dispatcher();
        let now = Instant::now();
        let mut console = Console::new("Administrator", "Password");
        console.login(&mut d, now).expect("login");

        let info = d.session(console.source.ip()).expect("session");
        assert_eq!(info.state, SessionState::Authenticated);
        assert_eq!(info.privilege, Some(PrivilegeLevel::User));
        assert_eq!(info.max_privilege, Some(PrivilegeLevel::Administrator));
        assert_eq!(info.username.as_deref(), Some("Administrator"));
        assert_eq!(info.stage, 3);

        let (cc, data) = console.call(&mut d, now, netfn::APP, cmd::GET_DEVICE_ID, &[]);
        assert_eq!(cc, completion::OK);
        assert_eq!(data, DeviceIdentity::default().to_response_data());

        assert_eq!(
            kinds(&events),
            vec![
                EventKind::NewConnection,
                EventKind::LoginSucceeded {
                    username: "Administrator".into()
                },
                EventKind::Command {
                    name: "Get Device ID",
                    username: "Administrator".into()
                },
            ]
        );
    }

    #[test]
    fn two_key_login_uses_bmc_key() {
        let (mut d, _) = dispatcher_with(ServerConfig::builder().bmc_key("kgkgkg"));
        let now = Instant::now();
        let mut console = Console::new("Administrator", "Password").with_bmc_key("kgkgkg");
        console.login(&mut d, now).expect("login");
        let (cc, _) = console.call(&mut d, now, netfn::CHASSIS, cmd::GET_CHASSIS_STATUS, &[]);
        assert_eq!(cc, completion::OK);

        let mut wrong = Console::new("Administrator", "Password").from_addr("198.51.100.21:1000");
        let err = wrong.login(&mut d, now).unwrap_err();
        assert!(matches!(err, Error::AuthenticationFailed(_)));
    }

    #[test]
    fn outbound_sequence_numbers_increase() {
        let (mut d, _) = dispatcher();
        let now = Instant::now();
        let mut console = Console::new("Administrator", "Password");
        console.login(&mut d, now).expect("login");

        let mut last = 0;
        for _ in 0..3 {
            let request = console.request(netfn::APP, cmd::GET_DEVICE_ID, &[]);
            let reply = single(d.handle(&request, console.source, now));
            let packet =
                decode_rmcpplus_packet(&reply, console.keys.as_ref()).expect("decode reply");
            assert!(packet.session_seq > last);
            last = packet.session_seq;
        }
    }

    #[test]
    fn privilege_above_ceiling_is_refused() {
        let (mut d, _) = dispatcher();
        let now = Instant::now();
        let mut console = Console::new("operator", "0p3rat0r");
        console.login(&mut d, now).expect("login");

        let (cc, _) = console.call(&mut d, now, netfn::APP, cmd::SET_SESSION_PRIVILEGE_LEVEL, &[0x05]);
        assert_eq!(cc, completion::WRONG_SIZE_OR_LIMIT);
        let (cc, data) =
            console.call(&mut d, now, netfn::APP, cmd::SET_SESSION_PRIVILEGE_LEVEL, &[0x04]);
        assert_eq!(cc, completion::WRONG_SIZE_OR_LIMIT, "operator ceiling is 3: {data:?}");
        let (cc, data) =
            console.call(&mut d, now, netfn::APP, cmd::SET_SESSION_PRIVILEGE_LEVEL, &[0x03]);
        assert_eq!((cc, data), (completion::OK, vec![0x03]));
    }

    #[test]
    fn replayed_sequence_closes_session() {
        let (mut d, events) = dispatcher();
        let now = Instant::now();
        let mut console = Console::new("Administrator", "Password");
        console.login(&mut d, now).expect("login");

        let first = console.request_with_seq(5, netfn::APP, cmd::GET_DEVICE_ID, &[]);
        assert_eq!(d.handle(&first, console.source, now).len(), 1);
        let info = d.session(console.source.ip()).expect("session");
        assert_eq!(info.rem_sequence_number, 5);

        let replay = console.request_with_seq(4, netfn::CHASSIS, cmd::CHASSIS_CONTROL, &[0x01]);
        assert!(d.handle(&replay, console.source, now).is_empty());
        assert!(d.session(console.source.ip()).is_none());
        assert_eq!(d.bmc().power_state(), PowerState::Off);
        assert!(closed_with(&events, CloseReason::Replay));
        assert!(!kinds(&events).iter().any(|k| matches!(
            k,
            EventKind::Command {
                name: "Chassis Control",
                ..
            }
        )));
    }

    #[test]
    fn tampered_packet_closes_session() {
        let (mut d, events) = dispatcher();
        let now = Instant::now();
        let mut console = Console::new("Administrator", "Password");
        console.login(&mut d, now).expect("login");

        let mut request = console.request(netfn::APP, cmd::GET_DEVICE_ID, &[]);
        request[20] ^= 0x01;
        assert!(d.handle(&request, console.source, now).is_empty());
        assert_eq!(d.session_count(), 0);
        assert!(closed_with(&events, CloseReason::AuthenticationFailed));
    }

    #[test]
    fn unknown_user_gets_rakp2_error() {
        let (mut d, events) = dispatcher();
        let now = Instant::now();
        let mut console = Console::new("mallory", "x");

        let open = single(d.handle(&console.open_session_request(), console.source, now));
        console.accept_open_session_response(&open).expect("open");
        let rakp2 = single(d.handle(&console.rakp1(), console.source, now));
        let message = console.accept_rakp2(&rakp2).expect("rakp2");

        assert_eq!(message.status_code, crate::protocol::rakp_status::UNAUTHORIZED_NAME);
        assert_eq!(d.session_count(), 0);
        assert!(kinds(&events).contains(&EventKind::LoginFailed {
            username: "mallory".into()
        }));
        assert!(closed_with(&events, CloseReason::UnknownUser));
    }

    #[test]
    fn repeated_rakp1_cannot_switch_user() {
        let (mut d, events) = dispatcher();
        let now = Instant::now();
        let mut console = Console::new("operator", "0p3rat0r");

        let open = single(d.handle(&console.open_session_request(), console.source, now));
        console.accept_open_session_response(&open).expect("open");
        let rakp2 = single(d.handle(&console.rakp1(), console.source, now));
        console.accept_rakp2(&rakp2).expect("rakp2");

        // The same user may repeat RAKP message 1.
        let again = single(d.handle(&console.rakp1(), console.source, now));
        console.accept_rakp2(&again).expect("repeated rakp2");
        assert_eq!(
            d.session(console.source.ip()).expect("session").username.as_deref(),
            Some("operator")
        );

        let mut other = Console::new("Administrator", "Password");
        other.managed_session_id = console.managed_session_id;
        assert!(d.handle(&other.rakp1(), other.source, now).is_empty());
        assert!(d.session(console.source.ip()).is_none());
        assert!(closed_with(&events, CloseReason::AuthenticationFailed));
        assert!(!kinds(&events)
            .iter()
            .any(|k| matches!(k, EventKind::LoginSucceeded { .. })));
    }

    #[test]
    fn repeated_rakp3_gets_same_rakp4() {
        let (mut d, _) = dispatcher();
        let now = Instant::now();
        let mut console = Console::new("Administrator", "Password");

        let open = single(d.handle(&console.open_session_request(), console.source, now));
        console.accept_open_session_response(&open).expect("open");
        let rakp2 = single(d.handle(&console.rakp1(), console.source, now));
        console.accept_rakp2(&rakp2).expect("rakp2");

        let rakp3 = console.rakp3();
        let lost = single(d.handle(&rakp3, console.source, now));
        let resent = single(d.handle(&rakp3, console.source, now));
        assert_eq!(resent, lost);
        console.accept_rakp4(&resent).expect("rakp4");

        let info = d.session(console.source.ip()).expect("session");
        assert_eq!(info.state, SessionState::Authenticated);
        assert_eq!(info.stage, 4);
        let (cc, _) = console.call(&mut d, now, netfn::APP, cmd::GET_DEVICE_ID, &[]);
        assert_eq!(cc, completion::OK);

        // Once a command has acknowledged RAKP message 4 there is nothing to resend.
        assert!(d.handle(&rakp3, console.source, now).is_empty());
        assert_eq!(d.session_count(), 0);
    }

    #[test]
    fn wrong_password_gets_rakp4_error() {
        let (mut d, events) = dispatcher();
        let now = Instant::now();
        let mut console = Console::new("Administrator", "guess");

        let open = single(d.handle(&console.open_session_request(), console.source, now));
        let response = console.accept_open_session_response(&open).expect("open");
        assert_eq!(response.remote_console_session_id, console.remote_session_id);
        assert_eq!(response.max_privilege_level, 0x04);

        let rakp2 = single(d.handle(&console.rakp1(), console.source, now));
        // The BMC proves a password we do not share.
        assert!(console.accept_rakp2(&rakp2).is_err());

        let rakp3 = console.rakp3();
        let rakp4 = single(d.handle(&rakp3, console.source, now));
        let message = console.accept_rakp4(&rakp4).expect("rakp4");
        assert_eq!(
            message.status_code,
            crate::protocol::rakp_status::INVALID_INTEGRITY_CHECK_VALUE
        );
        assert_eq!(d.session_count(), 0);
        assert!(closed_with(&events, CloseReason::AuthenticationFailed));
    }

    #[test]
    fn close_session_command_ends_session() {
        let (mut d, events) = dispatcher();
        let now = Instant::now();
        let mut console = Console::new("Administrator", "Password");
        console.login(&mut d, now).expect("login");

        let id = console.managed_session_id.to_le_bytes();
        let (cc, _) = console.call(&mut d, now, netfn::APP, cmd::CLOSE_SESSION, &id);
        assert_eq!(cc, completion::OK);
        assert_eq!(d.session_count(), 0);
        assert_eq!(d.next_deadline(), None);
        assert!(closed_with(&events, CloseReason::ClosedByPeer));
    }

    #[test]
    fn chassis_commands_change_bmc_state() {
        let (mut d, _) = dispatcher();
        let now = Instant::now();
        let mut console = Console::new("Administrator", "Password");
        console.login(&mut d, now).expect("login");

        let (cc, _) = console.call(
            &mut d,
            now,
            netfn::CHASSIS,
            cmd::SET_SYSTEM_BOOT_OPTIONS,
            &[0x05, 0x80, 0x04, 0x00, 0x00, 0x00],
        );
        assert_eq!(cc, completion::OK);
        assert_eq!(d.bmc().boot_device(), "pxe");

        let (cc, data) = console.call(
            &mut d,
            now,
            netfn::CHASSIS,
            cmd::GET_SYSTEM_BOOT_OPTIONS,
            &[0x05, 0x00, 0x00],
        );
        assert_eq!(cc, completion::OK);
        assert_eq!(data[3] >> 2, 0x01);

        let (cc, _) = console.call(&mut d, now, netfn::CHASSIS, cmd::CHASSIS_CONTROL, &[0x01]);
        assert_eq!(cc, completion::OK);
        assert_eq!(d.bmc().power_state(), PowerState::On);
    }

    #[test]
    fn short_password_is_rejected_over_the_wire() {
        let (mut d, _) = dispatcher();
        let now = Instant::now();
        let mut console = Console::new("Administrator", "Password");
        console.login(&mut d, now).expect("login");

        let mut data = vec![0x02, 0x02];
        data.extend_from_slice(&[b'x'; 15]);
        let (cc, _) = console.call(&mut d, now, netfn::APP, cmd::SET_USER_PASSWORD, &data);
        assert_eq!(cc, completion::WRONG_SIZE_OR_LIMIT);
        assert!(d.users().at(2).expect("user").password_matches(b"0p3rat0r"));
    }

    #[test]
    fn bad_user_index_closes_session() {
        let (mut d, events) = dispatcher();
        let now = Instant::now();
        let mut console = Console::new("Administrator", "Password");
        console.login(&mut d, now).expect("login");

        let request = console.request(netfn::APP, cmd::GET_USER_NAME, &[0x3F]);
        assert!(d.handle(&request, console.source, now).is_empty());
        assert!(closed_with(&events, CloseReason::ProtocolViolation));
    }

    #[test]
    fn handshake_messages_are_retransmitted_then_abandoned() {
        let config = ServerConfig::builder()
            .user("Administrator", "Password", PrivilegeLevel::Administrator)
            .retry_timeout(Duration::from_millis(100))
            .max_retries(2)
            .build()
            .expect("config");
        let events: Events = Arc::default();
        let sink = {
            let events = Arc::clone(&events);
            move |e: &Event| events.lock().expect("events").push(e.clone())
        };
        let mut d = Dispatcher::with_sink(config, sink);

        let start = Instant::now();
        let console = Console::new("Administrator", "Password");
        let open = single(d.handle(&console.open_session_request(), console.source, start));

        let deadline = d.next_deadline().expect("retry timer");
        assert!(deadline >= start + Duration::from_millis(100));
        assert!(deadline <= start + Duration::from_millis(200));
        assert!(d.poll_timers(start).is_empty());

        let mut now = start;
        for _ in 0..2 {
            now += Duration::from_millis(250);
            let resent = single(d.poll_timers(now));
            assert_eq!(resent, open);
        }
        now += Duration::from_millis(250);
        assert!(d.poll_timers(now).is_empty());
        assert_eq!(d.session_count(), 0);
        assert!(closed_with(&events, CloseReason::RetriesExhausted));
    }

    #[test]
    fn idle_sessions_expire() {
        let (mut d, events) = dispatcher_with(ServerConfig::builder().idle_timeout(Duration::from_secs(5)));
        let now = Instant::now();
        let mut console = Console::new("Administrator", "Password");
        console.login(&mut d, now).expect("login");
        // Acknowledges RAKP message 4.
        console.call(&mut d, now, netfn::APP, cmd::GET_DEVICE_ID, &[]);

        assert_eq!(d.next_deadline(), Some(now + Duration::from_secs(5)));
        assert!(d.poll_timers(now + Duration::from_secs(4)).is_empty());
        assert_eq!(d.session_count(), 1);
        assert!(d.poll_timers(now + Duration::from_secs(5)).is_empty());
        assert_eq!(d.session_count(), 0);
        assert!(closed_with(&events, CloseReason::Idle));
    }

    #[test]
    fn open_session_request_restarts_existing_session() {
        let (mut d, events) = dispatcher();
        let now = Instant::now();
        let mut console = Console::new("Administrator", "Password");
        console.login(&mut d, now).expect("login");

        let mut again = Console::new("Administrator", "Password");
        again.login(&mut d, now).expect("second login");
        assert_eq!(d.session_count(), 1);
        assert!(closed_with(&events, CloseReason::Restarted));
        assert_ne!(again.managed_session_id, console.managed_session_id);

        // The first console's keys are gone with its session.
        let stale = console.request(netfn::APP, cmd::GET_DEVICE_ID, &[]);
        assert!(d.handle(&stale, console.source, now).is_empty());
    }

    #[test]
    fn v15_probe_gets_channel_capabilities() {
        let (mut d, _) = dispatcher();
        let now = Instant::now();
        let source: SocketAddr = "203.0.113.9:7000".parse().expect("addr");

        let reply = single(d.handle(
            &v15_request(netfn::APP, cmd::GET_CHANNEL_AUTH_CAPABILITIES, &[0x0E, 0x04]),
            source,
            now,
        ));
        let (cc, data) = decode_v15_response(&reply).expect("decode");
        assert_eq!(cc, completion::OK);
        assert_eq!(data, channel_auth_capabilities(false));

        let reply = single(d.handle(&v15_request(netfn::APP, cmd::GET_DEVICE_ID, &[]), source, now));
        let (cc, _) = decode_v15_response(&reply).expect("decode");
        assert_eq!(cc, completion::INVALID_COMMAND);

        let info = d.session(source.ip()).expect("session");
        assert_eq!(info.ipmi_version, IpmiVersion::V15);
        assert_eq!(info.state, SessionState::Fresh);
        assert_eq!(info.stage, 2);

        // The same peer may then open an RMCP+ session without a restart.
        let mut console = Console::new("Administrator", "Password").from_addr("203.0.113.9:7000");
        console.login(&mut d, now).expect("login");
    }

    #[test]
    fn traffic_without_session_is_dropped() {
        let (mut d, events) = dispatcher();
        let now = Instant::now();
        let source: SocketAddr = "203.0.113.77:623".parse().expect("addr");

        assert!(d.handle(&[0x06, 0x00, 0xFF], source, now).is_empty());
        assert!(d.handle(b"GET / HTTP/1.1\r\n\r\n", source, now).is_empty());

        let mut console = Console::new("Administrator", "Password").from_addr("203.0.113.77:623");
        console.keys = crate::crypto::derive_keys(
            &crate::crypto::normalize_key_sha1(b"x"),
            &[0; 16],
            &[0; 16],
            4,
            b"x",
        )
        .ok();
        let orphan = console.request(netfn::APP, cmd::GET_DEVICE_ID, &[]);
        assert!(d.handle(&orphan, source, now).is_empty());

        assert_eq!(d.session_count(), 0);
        assert!(kinds(&events).is_empty());
    }

    #[test]
    fn session_traffic_before_authentication_closes() {
        let (mut d, events) = dispatcher();
        let now = Instant::now();
        let mut console = Console::new("Administrator", "Password");
        let open = single(d.handle(&console.open_session_request(), console.source, now));
        console.accept_open_session_response(&open).expect("open");

        console.keys = crate::crypto::derive_keys(
            &crate::crypto::normalize_key_sha1(b"x"),
            &[0; 16],
            &[0; 16],
            4,
            b"x",
        )
        .ok();
        let early = console.request(netfn::APP, cmd::GET_DEVICE_ID, &[]);
        assert!(d.handle(&early, console.source, now).is_empty());
        assert!(closed_with(&events, CloseReason::AuthenticationFailed));
    }
}
