use core::fmt;

/// Boot device reported after a cold reset.
pub const DEFAULT_BOOT_DEVICE: &str = "default";

/// Chassis power state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PowerState {
    /// Powered down.
    #[default]
    Off,
    /// Powered up.
    On,
}

impl fmt::Display for PowerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Off => "off",
            Self::On => "on",
        })
    }
}

/// The emulated managed system behind the BMC.
///
/// Only reachable from authenticated sessions; it has no lifecycle of its own.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VirtualBmc {
    power_state: PowerState,
    boot_device: String,
}

impl Default for VirtualBmc {
    fn default() -> Self {
        Self {
            power_state: PowerState::Off,
            boot_device: DEFAULT_BOOT_DEVICE.to_owned(),
        }
    }
}

impl VirtualBmc {
    /// A powered-off system booting from the default device.
    pub fn new() -> Self {
        Self::default()
    }

    /// Current power state.
    pub fn power_state(&self) -> PowerState {
        self.power_state
    }

    /// Current boot device tag.
    pub fn boot_device(&self) -> &str {
        &self.boot_device
    }

    /// Set the boot device tag. Any value is accepted.
    pub fn set_boot_device(&mut self, device: impl Into<String>) {
        self.boot_device = device.into();
    }

    /// Power up.
    pub fn power_on(&mut self) {
        self.power_state = PowerState::On;
    }

    /// Hard power down.
    pub fn power_off(&mut self) {
        self.power_state = PowerState::Off;
    }

    /// ACPI soft shutdown; the emulated OS always complies.
    pub fn power_shutdown(&mut self) {
        self.power_off();
    }

    /// Hard reset; the emulated system stays down afterwards.
    pub fn power_reset(&mut self) {
        self.power_off();
    }

    /// Flip the power state: a cycle from off ends on, a cycle from on ends off.
    pub fn power_cycle(&mut self) {
        self.power_state = match self.power_state {
            PowerState::On => PowerState::Off,
            PowerState::Off => PowerState::On,
        };
    }

    /// BMC cold reset: power drops and the boot device goes back to default.
    pub fn cold_reset(&mut self) {
        self.power_off();
        self.boot_device = DEFAULT_BOOT_DEVICE.to_owned();
    }
}
