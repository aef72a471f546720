//! RMCP+ session establishment: Open Session and RAKP messages 1-4, managed-system side.

use std::time::Instant;

use rand::{Rng, RngCore};
use zeroize::Zeroizing;

use crate::crypto::{SecretBytes, ct_eq, derive_keys};
use crate::error::{Error, Result};
use crate::event::{CloseReason, EventKind};
use crate::protocol::{
    AUTH_TYPE_RMCPPLUS, build_open_session_response_payload, build_rakp_message_2_payload,
    build_rakp_message_4_payload, parse_open_session_request_payload,
    parse_rakp_message_1_payload, parse_rakp_message_3_payload, payload_type,
    rakp2_key_exchange_auth_code_sha1, rakp3_key_exchange_auth_code_sha1,
    rakp4_integrity_check_value_sha1_96, rakp_status,
};
use crate::server::Reply;
use crate::session::{IpmiVersion, RakpState, RetryPolicy, Session, SessionState};
use crate::types::PrivilegeLevel;
use crate::users::UserStore;

/// Read-only server state the handshake needs.
pub(crate) struct HandshakeContext<'a> {
    pub users: &'a UserStore,
    pub bmc_key: Option<&'a SecretBytes>,
    pub policy: &'a RetryPolicy,
    pub now: Instant,
}

/// Answer an Open Session Request with our only cipher suite (RAKP-HMAC-SHA1,
/// HMAC-SHA1-96, AES-CBC-128).
pub(crate) fn open_session(
    session: &mut Session,
    payload: &[u8],
    ctx: &HandshakeContext<'_>,
) -> Result<Reply> {
    if session.state != SessionState::Fresh {
        return Err(Error::Protocol("open session request on an established session"));
    }
    let request = parse_open_session_request_payload(payload)?;

    #[cfg(feature = "tracing")]
    tracing::debug!(
        peer = %session.sockaddr,
        auth = ?request.auth_algorithm,
        integrity = ?request.integrity_algorithm,
        confidentiality = ?request.confidentiality_algorithm,
        "open session request"
    );

    let administrator = PrivilegeLevel::Administrator.as_u8();
    session.ipmi_version = IpmiVersion::V20;
    session.auth_type = AUTH_TYPE_RMCPPLUS;
    session.remote_session_id = request.remote_console_session_id;
    session.managed_session_id = random_session_id();
    session.max_privilege = match request.requested_privilege {
        0 => administrator,
        level => level.min(administrator),
    };

    let response = build_open_session_response_payload(
        request.message_tag,
        rakp_status::NO_ERRORS,
        session.max_privilege,
        session.remote_session_id,
        session.managed_session_id,
    );
    session.state = SessionState::OpenRequested;

    let packets = session
        .send(
            response,
            payload_type::OPEN_SESSION_RESPONSE,
            true,
            ctx.now,
            ctx.policy,
        )?
        .into_iter()
        .collect();
    Ok(Reply::send(packets))
}

/// Handle RAKP message 1: look the user up, bind the session to it and send RAKP message 2.
///
/// A console that lost our RAKP message 2 may repeat message 1 for the same user; that
/// restarts the exchange with a fresh managed-system random.
pub(crate) fn rakp_message_1(
    session: &mut Session,
    payload: &[u8],
    ctx: &HandshakeContext<'_>,
) -> Result<Reply> {
    if !matches!(
        session.state,
        SessionState::OpenRequested | SessionState::Rakp1Received
    ) {
        return Err(Error::Protocol("RAKP message 1 out of order"));
    }
    let message = parse_rakp_message_1_payload(payload)?;
    if message.managed_system_session_id != session.managed_session_id {
        return Err(Error::AuthenticationFailed(
            "RAKP message 1 names another session",
        ));
    }
    let username = String::from_utf8(message.username.clone())
        .map_err(|_| Error::Protocol("user name is not UTF-8"))?;
    if session
        .username
        .as_ref()
        .is_some_and(|bound| *bound != username)
    {
        return Err(Error::AuthenticationFailed(
            "repeated RAKP message 1 names another user",
        ));
    }
    let mut packets = session.acknowledge(ctx.now, ctx.policy)?;

    let Some(user) = ctx.users.find(&username).filter(|u| u.is_active()) else {
        let reply = build_rakp_message_2_payload(
            message.message_tag,
            rakp_status::UNAUTHORIZED_NAME,
            session.remote_session_id,
            &[0; 16],
            &[0; 16],
            &[0; 20],
        );
        packets.extend(session.send(reply, payload_type::RAKP_2, false, ctx.now, ctx.policy)?);
        return Ok(Reply::send(packets)
            .with_event(EventKind::LoginFailed { username })
            .closing(CloseReason::UnknownUser));
    };

    // Bits 2:0 carry the requested maximum privilege; 0 asks for the user's own limit.
    let requested = message.role & 0x07;
    let ceiling = user.privilege().as_u8().min(session.max_privilege);
    session.max_privilege = match requested {
        0 => ceiling,
        level => level.min(ceiling),
    };
    session.privilege = PrivilegeLevel::User.as_u8().min(session.max_privilege);

    let mut rng = rand::rng();
    let mut bmc_random = [0u8; 16];
    rng.fill_bytes(&mut bmc_random);
    let guid = random_guid(&mut rng);

    let user_key = Zeroizing::new(user.password().to_key_sha1());
    let auth_code = rakp2_key_exchange_auth_code_sha1(
        &user_key,
        session.remote_session_id,
        session.managed_session_id,
        &message.console_random,
        &bmc_random,
        &guid,
        message.role,
        &message.username,
    )?;

    session.username = Some(username);
    session.rakp = Some(RakpState {
        console_random: message.console_random,
        bmc_random,
        role: message.role,
        guid,
    });
    session.state = SessionState::Rakp1Received;

    let reply = build_rakp_message_2_payload(
        message.message_tag,
        rakp_status::NO_ERRORS,
        session.remote_session_id,
        &bmc_random,
        &guid,
        &auth_code,
    );
    packets.extend(session.send(reply, payload_type::RAKP_2, true, ctx.now, ctx.policy)?);
    Ok(Reply::send(packets))
}

/// Handle RAKP message 3: verify the console's proof of the password, derive the
/// session keys and send RAKP message 4.
pub(crate) fn rakp_message_3(
    session: &mut Session,
    payload: &[u8],
    ctx: &HandshakeContext<'_>,
) -> Result<Reply> {
    if !matches!(
        session.state,
        SessionState::Rakp1Received | SessionState::Authenticated
    ) {
        return Err(Error::Protocol("RAKP message 3 out of order"));
    }
    let message = parse_rakp_message_3_payload(payload)?;
    if message.managed_system_session_id != session.managed_session_id {
        return Err(Error::AuthenticationFailed(
            "RAKP message 3 names another session",
        ));
    }
    if session.state == SessionState::Authenticated {
        // Our RAKP message 4 was lost: send the same bytes again.
        return match session.resend_in_flight(payload_type::RAKP_4) {
            Some(packet) => Ok(Reply::send(vec![packet])),
            None => Err(Error::Protocol("RAKP message 3 after the session started")),
        };
    }
    let mut packets = session.acknowledge(ctx.now, ctx.policy)?;

    let rakp = session
        .rakp
        .take()
        .ok_or(Error::Protocol("RAKP message 3 without message 1"))?;
    let username = session
        .username
        .clone()
        .ok_or(Error::Protocol("RAKP message 3 without a bound user"))?;

    if message.status_code != rakp_status::NO_ERRORS {
        // The console rejected our RAKP message 2.
        return Ok(Reply::send(packets)
            .with_event(EventKind::LoginFailed { username })
            .closing(CloseReason::AuthenticationFailed));
    }

    let user = ctx
        .users
        .find(&username)
        .ok_or_else(|| Error::UnknownUser(username.clone()))?;
    let user_key = Zeroizing::new(user.password().to_key_sha1());
    let expected = rakp3_key_exchange_auth_code_sha1(
        &user_key,
        &rakp.bmc_random,
        session.remote_session_id,
        rakp.role,
        username.as_bytes(),
    )?;

    if !ct_eq(&expected, &message.key_exchange_auth_code) {
        let reply = build_rakp_message_4_payload(
            message.message_tag,
            rakp_status::INVALID_INTEGRITY_CHECK_VALUE,
            session.remote_session_id,
            None,
        );
        packets.extend(session.send(reply, payload_type::RAKP_4, false, ctx.now, ctx.policy)?);
        return Ok(Reply::send(packets)
            .with_event(EventKind::LoginFailed { username })
            .closing(CloseReason::AuthenticationFailed));
    }

    let kg = Zeroizing::new(match ctx.bmc_key {
        Some(key) => key.to_key_sha1(),
        None => *user_key,
    });
    let keys = derive_keys(
        &kg,
        &rakp.console_random,
        &rakp.bmc_random,
        rakp.role,
        username.as_bytes(),
    )?;
    let icv = rakp4_integrity_check_value_sha1_96(
        &keys.sik,
        &rakp.console_random,
        session.managed_session_id,
        &rakp.guid,
    )?;
    session.activate(keys);

    let reply = build_rakp_message_4_payload(
        message.message_tag,
        rakp_status::NO_ERRORS,
        session.remote_session_id,
        Some(&icv),
    );
    packets.extend(session.send(reply, payload_type::RAKP_4, true, ctx.now, ctx.policy)?);
    Ok(Reply::send(packets).with_event(EventKind::LoginSucceeded { username }))
}

fn random_session_id() -> u32 {
    let mut rng = rand::rng();
    loop {
        let id: u32 = rng.random();
        if id != 0 {
            return id;
        }
    }
}

/// Random (version 4) GUID for one handshake.
fn random_guid(rng: &mut impl RngCore) -> [u8; 16] {
    let mut guid = [0u8; 16];
    rng.fill_bytes(&mut guid);
    guid[6] = (guid[6] & 0x0F) | 0x40;
    guid[8] = (guid[8] & 0x3F) | 0x80;
    guid
}
