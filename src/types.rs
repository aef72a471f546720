use core::fmt;

use crate::error::{Error, Result};

/// IPMI privilege levels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum PrivilegeLevel {
    /// Callback privilege.
    Callback = 0x01,
    /// User privilege.
    User = 0x02,
    /// Operator privilege.
    Operator = 0x03,
    /// Administrator privilege.
    Administrator = 0x04,
    /// OEM-defined privilege.
    Oem = 0x05,
}

impl PrivilegeLevel {
    /// Wire value of this level.
    pub fn as_u8(self) -> u8 {
        self as u8
    }

    /// Levels a configured user may hold (callback through administrator).
    pub(crate) fn is_user_assignable(self) -> bool {
        !matches!(self, Self::Oem)
    }
}

impl TryFrom<u8> for PrivilegeLevel {
    type Error = Error;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            0x01 => Ok(Self::Callback),
            0x02 => Ok(Self::User),
            0x03 => Ok(Self::Operator),
            0x04 => Ok(Self::Administrator),
            0x05 => Ok(Self::Oem),
            _ => Err(Error::InvalidArgument("privilege level must be 1-5")),
        }
    }
}

impl fmt::Display for PrivilegeLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Callback => "callback",
            Self::User => "user",
            Self::Operator => "operator",
            Self::Administrator => "administrator",
            Self::Oem => "oem",
        };
        f.write_str(name)
    }
}

/// Identity reported by `Get Device ID`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceIdentity {
    /// Device ID (BMC-defined).
    pub device_id: u8,
    /// Device revision (lower 4 bits).
    pub device_revision: u8,
    /// Firmware major revision (7 bits).
    pub firmware_major: u8,
    /// Firmware minor revision (BCD).
    pub firmware_minor: u8,
    /// Manufacturer ID (IANA enterprise number, 20 bits used).
    pub manufacturer_id: u32,
    /// Product ID.
    pub product_id: u16,
    /// Auxiliary firmware revision.
    pub aux_firmware_revision: [u8; 4],
}

impl Default for DeviceIdentity {
    fn default() -> Self {
        Self {
            device_id: 0x20,
            device_revision: 0x01,
            firmware_major: 0x02,
            firmware_minor: 0x43,
            manufacturer_id: 0x0000_02A2,
            product_id: 0x0100,
            aux_firmware_revision: [0x00, 0x06, 0x2B, 0x2B],
        }
    }
}

impl DeviceIdentity {
    /// Encode the `Get Device ID` response body (after the completion code).
    pub(crate) fn to_response_data(&self) -> Vec<u8> {
        let m = self.manufacturer_id.to_le_bytes();
        let p = self.product_id.to_le_bytes();
        let mut out = Vec::with_capacity(15);
        out.push(self.device_id);
        out.push(self.device_revision & 0x0F);
        out.push(self.firmware_major & 0x7F);
        out.push(self.firmware_minor);
        // IPMI version 2.0 (BCD).
        out.push(0x02);
        // Additional device support: chassis device, IPMB event receiver.
        out.push(0xA2);
        out.extend_from_slice(&m[..3]);
        out.extend_from_slice(&p);
        out.extend_from_slice(&self.aux_firmware_revision);
        out
    }
}
