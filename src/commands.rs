//! In-session IPMI command handling.
//!
//! Each handler sees the decoded LAN request and produces a completion code plus response
//! data. Handlers return `Err` only for input that should end the session (malformed
//! user-management requests, user indices outside the table); ordinary IPMI failures are
//! completion codes.

use crate::bmc::{DEFAULT_BOOT_DEVICE, PowerState, VirtualBmc};
use crate::error::{Error, Result};
use crate::protocol::{IpmiRequest, completion};
use crate::session::Session;
use crate::types::DeviceIdentity;
use crate::users::{MAX_USERNAME_LEN, UserStore};

/// Network function codes handled here.
pub(crate) mod netfn {
    pub const CHASSIS: u8 = 0x00;
    pub const APP: u8 = 0x06;
}

/// Command numbers handled here.
pub(crate) mod cmd {
    // Chassis
    pub const GET_CHASSIS_STATUS: u8 = 0x01;
    pub const CHASSIS_CONTROL: u8 = 0x02;
    pub const SET_SYSTEM_BOOT_OPTIONS: u8 = 0x08;
    pub const GET_SYSTEM_BOOT_OPTIONS: u8 = 0x09;

    // App
    pub const GET_DEVICE_ID: u8 = 0x01;
    pub const COLD_RESET: u8 = 0x02;
    pub const GET_CHANNEL_AUTH_CAPABILITIES: u8 = 0x38;
    pub const SET_SESSION_PRIVILEGE_LEVEL: u8 = 0x3B;
    pub const CLOSE_SESSION: u8 = 0x3C;
    pub const GET_USER_ACCESS: u8 = 0x44;
    pub const SET_USER_NAME: u8 = 0x45;
    pub const GET_USER_NAME: u8 = 0x46;
    pub const SET_USER_PASSWORD: u8 = 0x47;
}

/// Boot options parameter 5 (boot flags).
const BOOT_PARAM_BOOT_FLAGS: u8 = 0x05;

/// Boot device selector values (boot flags data byte 2, bits 5:2).
const BOOT_DEVICES: &[(u8, &str)] = &[
    (0x0, DEFAULT_BOOT_DEVICE),
    (0x1, "pxe"),
    (0x2, "disk"),
    (0x3, "safe"),
    (0x4, "diag"),
    (0x5, "cdrom"),
    (0x6, "bios"),
    (0xF, "floppy"),
];

/// Completion code and data of one IPMI response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Response {
    pub completion_code: u8,
    pub data: Vec<u8>,
}

impl Response {
    fn ok(data: Vec<u8>) -> Self {
        Self {
            completion_code: completion::OK,
            data,
        }
    }

    fn code(completion_code: u8) -> Self {
        Self {
            completion_code,
            data: Vec::new(),
        }
    }
}

/// Result of one dispatched command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Dispatched {
    pub name: &'static str,
    pub response: Response,
    /// The console asked to end the session; close it after replying.
    pub close_session: bool,
}

/// Mutable server state reachable from an authenticated session.
pub(crate) struct CommandContext<'a> {
    pub users: &'a mut UserStore,
    pub bmc: &'a mut VirtualBmc,
    pub identity: &'a DeviceIdentity,
    pub kg_configured: bool,
}

/// Human-readable name of a command, as reported in events.
pub(crate) fn command_name(netfn_code: u8, command: u8) -> &'static str {
    match (netfn_code, command) {
        (netfn::CHASSIS, cmd::GET_CHASSIS_STATUS) => "Get Chassis Status",
        (netfn::CHASSIS, cmd::CHASSIS_CONTROL) => "Chassis Control",
        (netfn::CHASSIS, cmd::SET_SYSTEM_BOOT_OPTIONS) => "Set System Boot Options",
        (netfn::CHASSIS, cmd::GET_SYSTEM_BOOT_OPTIONS) => "Get System Boot Options",
        (netfn::APP, cmd::GET_DEVICE_ID) => "Get Device ID",
        (netfn::APP, cmd::COLD_RESET) => "Cold Reset",
        (netfn::APP, cmd::GET_CHANNEL_AUTH_CAPABILITIES) => {
            "Get Channel Authentication Capabilities"
        }
        (netfn::APP, cmd::SET_SESSION_PRIVILEGE_LEVEL) => "Set Session Privilege",
        (netfn::APP, cmd::CLOSE_SESSION) => "Close Session",
        (netfn::APP, cmd::GET_USER_ACCESS) => "Get User Access",
        (netfn::APP, cmd::SET_USER_NAME) => "Set User Name",
        (netfn::APP, cmd::GET_USER_NAME) => "Get User Name",
        (netfn::APP, cmd::SET_USER_PASSWORD) => "Set User Password",
        _ => "Unsupported Command",
    }
}

/// Run one authenticated command against the emulated BMC.
pub(crate) fn dispatch(
    session: &mut Session,
    request: &IpmiRequest,
    ctx: &mut CommandContext<'_>,
) -> Result<Dispatched> {
    let data = request.data.as_slice();
    let mut close_session = false;

    let response = match (request.netfn, request.cmd) {
        (netfn::CHASSIS, cmd::GET_CHASSIS_STATUS) => get_chassis_status(ctx.bmc),
        (netfn::CHASSIS, cmd::CHASSIS_CONTROL) => chassis_control(ctx.bmc, data),
        (netfn::CHASSIS, cmd::SET_SYSTEM_BOOT_OPTIONS) => set_boot_options(ctx.bmc, data),
        (netfn::CHASSIS, cmd::GET_SYSTEM_BOOT_OPTIONS) => get_boot_options(ctx.bmc, data),
        (netfn::APP, cmd::GET_DEVICE_ID) => Response::ok(ctx.identity.to_response_data()),
        (netfn::APP, cmd::COLD_RESET) => {
            ctx.bmc.cold_reset();
            Response::ok(Vec::new())
        }
        (netfn::APP, cmd::GET_CHANNEL_AUTH_CAPABILITIES) => {
            Response::ok(channel_auth_capabilities(ctx.kg_configured))
        }
        (netfn::APP, cmd::SET_SESSION_PRIVILEGE_LEVEL) => set_session_privilege(session, data),
        (netfn::APP, cmd::CLOSE_SESSION) => {
            close_session = true;
            Response::ok(Vec::new())
        }
        (netfn::APP, cmd::GET_USER_ACCESS) => get_user_access(session, ctx.users, data)?,
        (netfn::APP, cmd::SET_USER_NAME) => set_user_name(ctx.users, data)?,
        (netfn::APP, cmd::GET_USER_NAME) => get_user_name(ctx.users, data)?,
        (netfn::APP, cmd::SET_USER_PASSWORD) => set_user_password(ctx.users, data)?,
        _ => Response::code(completion::INVALID_COMMAND),
    };

    Ok(Dispatched {
        name: command_name(request.netfn, request.cmd),
        response,
        close_session,
    })
}

/// `Get Channel Authentication Capabilities` response data for channel 1.
///
/// Advertises IPMI v2.0 only, non-null user names, and whether a BMC key is set.
pub(crate) fn channel_auth_capabilities(kg_configured: bool) -> Vec<u8> {
    let mut status = 0x04;
    if kg_configured {
        status |= 0x20;
    }
    vec![0x01, 0x80, status, 0x02, 0x00, 0x00, 0x00, 0x00]
}

fn set_session_privilege(session: &mut Session, data: &[u8]) -> Response {
    let Some(&raw) = data.first() else {
        return Response::code(completion::REQUEST_DATA_TRUNCATED);
    };
    let requested = raw & 0x0F;
    if requested == 0 {
        return Response::ok(vec![session.privilege]);
    }
    if requested > session.max_privilege {
        return Response::code(completion::WRONG_SIZE_OR_LIMIT);
    }
    session.privilege = requested;
    Response::ok(vec![session.privilege])
}

fn get_user_access(session: &Session, users: &UserStore, data: &[u8]) -> Result<Response> {
    if data.len() < 2 {
        return Err(Error::Protocol("Get User Access request truncated"));
    }
    let index = (data[1] & 0x3F) as usize;
    let target = user_at(users, index)?;
    if session.privilege < target.privilege().as_u8() {
        return Ok(Response::code(completion::INSUFFICIENT_PRIVILEGE));
    }

    let mut access = target.privilege().as_u8();
    if target.is_active() {
        // IPMI messaging and link authentication enabled.
        access |= 0x30;
    }
    Ok(Response::ok(vec![
        users.len() as u8 & 0x3F,
        users.enabled_count() as u8 & 0x3F,
        users.fixed_count() as u8 & 0x3F,
        access,
    ]))
}

fn set_user_name(users: &mut UserStore, data: &[u8]) -> Result<Response> {
    if data.len() < 2 {
        return Err(Error::Protocol("Set User Name request truncated"));
    }
    let index = (data[0] & 0x3F) as usize;
    let raw = &data[1..data.len().min(1 + MAX_USERNAME_LEN)];
    let name = core::str::from_utf8(trim_trailing_nul(raw))
        .map_err(|_| Error::Protocol("user name is not UTF-8"))?;

    match users.rename_at(index, name) {
        Ok(()) => Ok(Response::ok(Vec::new())),
        Err(Error::InvalidArgument(_)) => Ok(Response::code(completion::INVALID_DATA_FIELD)),
        Err(e) => Err(e),
    }
}

fn get_user_name(users: &UserStore, data: &[u8]) -> Result<Response> {
    let Some(&raw) = data.first() else {
        return Err(Error::Protocol("Get User Name request truncated"));
    };
    let user = user_at(users, (raw & 0x3F) as usize)?;

    let mut name = user.name().as_bytes().to_vec();
    name.resize(MAX_USERNAME_LEN, 0);
    Ok(Response::ok(name))
}

fn set_user_password(users: &mut UserStore, data: &[u8]) -> Result<Response> {
    if data.len() < 2 {
        return Err(Error::Protocol("Set User Password request truncated"));
    }
    let index = (data[0] & 0x3F) as usize;
    user_at(users, index)?;

    match data[1] & 0x03 {
        0x00 => users.set_active_at(index, false)?,
        0x01 => users.set_active_at(index, true)?,
        operation => {
            let password = &data[2..];
            // Bit 7 of the first byte announces a 20-byte password; either length is taken.
            if !matches!(password.len(), 16 | 20) {
                return Ok(Response::code(completion::WRONG_SIZE_OR_LIMIT));
            }
            let password = trim_trailing_nul(password);
            if operation == 0x02 {
                users.set_password_at(index, password)?;
            } else if !user_at(users, index)?.password_matches(password) {
                return Ok(Response::code(completion::PASSWORD_MISMATCH));
            }
        }
    }
    Ok(Response::ok(Vec::new()))
}

fn get_chassis_status(bmc: &VirtualBmc) -> Response {
    let power = match bmc.power_state() {
        PowerState::On => 0x01,
        PowerState::Off => 0x00,
    };
    Response::ok(vec![power, 0x00, 0x00])
}

fn chassis_control(bmc: &mut VirtualBmc, data: &[u8]) -> Response {
    let Some(&raw) = data.first() else {
        return Response::code(completion::REQUEST_DATA_TRUNCATED);
    };
    match raw & 0x0F {
        0x00 => bmc.power_off(),
        0x01 => bmc.power_on(),
        0x02 => bmc.power_cycle(),
        0x03 => bmc.power_reset(),
        // Diagnostic interrupt: nothing to interrupt.
        0x04 => {}
        0x05 => bmc.power_shutdown(),
        _ => return Response::code(completion::INVALID_DATA_FIELD),
    }
    Response::ok(Vec::new())
}

fn set_boot_options(bmc: &mut VirtualBmc, data: &[u8]) -> Response {
    let Some(&raw) = data.first() else {
        return Response::code(completion::REQUEST_DATA_TRUNCATED);
    };
    if raw & 0x7F != BOOT_PARAM_BOOT_FLAGS {
        // Other parameters are accepted and forgotten.
        return Response::ok(Vec::new());
    }
    let Some(&flags) = data.get(2) else {
        return Response::code(completion::REQUEST_DATA_TRUNCATED);
    };
    let selector = (flags >> 2) & 0x0F;
    match BOOT_DEVICES.iter().find(|(s, _)| *s == selector) {
        Some((_, device)) => {
            bmc.set_boot_device(*device);
            Response::ok(Vec::new())
        }
        None => Response::code(completion::INVALID_DATA_FIELD),
    }
}

fn get_boot_options(bmc: &VirtualBmc, data: &[u8]) -> Response {
    let Some(&raw) = data.first() else {
        return Response::code(completion::REQUEST_DATA_TRUNCATED);
    };
    if raw & 0x7F != BOOT_PARAM_BOOT_FLAGS {
        return Response::code(completion::PARAMETER_NOT_SUPPORTED);
    }
    let selector = BOOT_DEVICES
        .iter()
        .find(|(_, name)| *name == bmc.boot_device())
        .map_or(0, |(s, _)| *s);

    Response::ok(vec![
        0x01,
        BOOT_PARAM_BOOT_FLAGS,
        // Boot flags valid.
        0x80,
        selector << 2,
        0x00,
        0x00,
        0x00,
    ])
}

fn user_at(users: &UserStore, index: usize) -> Result<&crate::users::User> {
    users
        .at(index)
        .ok_or_else(|| Error::protocol_owned(format!("user index {index} out of range")))
}

fn trim_trailing_nul(bytes: &[u8]) -> &[u8] {
    let end = bytes.iter().rposition(|&b| b != 0).map_or(0, |i| i + 1);
    &bytes[..end]
}
