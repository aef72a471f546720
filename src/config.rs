use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::time::Duration;

use crate::crypto::SecretBytes;
use crate::error::{Error, Result};
use crate::session::RetryPolicy;
use crate::types::{DeviceIdentity, PrivilegeLevel};
use crate::users::{MAX_PASSWORD_LEN, User, UserStore};

/// Standard RMCP port.
pub const DEFAULT_PORT: u16 = 623;

/// Upper bound for the retry and idle timeouts.
pub const MAX_TIMEOUT: Duration = Duration::from_secs(24 * 60 * 60);

/// Validated server configuration, produced by [`ServerBuilder`].
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub(crate) bind: SocketAddr,
    pub(crate) device_name: String,
    pub(crate) users: UserStore,
    pub(crate) bmc_key: Option<SecretBytes>,
    pub(crate) policy: RetryPolicy,
    pub(crate) identity: DeviceIdentity,
}

impl ServerConfig {
    /// Create a [`ServerBuilder`].
    pub fn builder() -> ServerBuilder {
        ServerBuilder::new()
    }

    /// Address the UDP transports bind to.
    pub fn bind_addr(&self) -> SocketAddr {
        self.bind
    }

    /// Name attached to every logged event.
    pub fn device_name(&self) -> &str {
        &self.device_name
    }

    /// Configured accounts.
    pub fn users(&self) -> &UserStore {
        &self.users
    }
}

/// Builder for [`ServerConfig`].
#[derive(Debug, Clone)]
pub struct ServerBuilder {
    bind: SocketAddr,
    device_name: String,
    users: Vec<User>,
    bmc_key: Option<Vec<u8>>,
    retry_timeout: Duration,
    max_retries: u32,
    idle_timeout: Duration,
    identity: DeviceIdentity,
}

impl Default for ServerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ServerBuilder {
    /// Create a new builder listening on `0.0.0.0:623`.
    ///
    /// At least one user must be added before [`ServerBuilder::build`].
    pub fn new() -> Self {
        let policy = RetryPolicy::default();
        Self {
            bind: SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, DEFAULT_PORT)),
            device_name: "BMC".to_owned(),
            users: Vec::new(),
            bmc_key: None,
            retry_timeout: policy.base_timeout,
            max_retries: policy.max_retries,
            idle_timeout: policy.idle_timeout,
            identity: DeviceIdentity::default(),
        }
    }

    /// Set the UDP listen address.
    pub fn bind(mut self, addr: SocketAddr) -> Self {
        self.bind = addr;
        self
    }

    /// Set the device name attached to logged events.
    pub fn device_name(mut self, name: impl Into<String>) -> Self {
        self.device_name = name.into();
        self
    }

    /// Add an active account. Users keep the order in which they are added.
    pub fn user(
        self,
        name: impl Into<String>,
        password: impl AsRef<[u8]>,
        privilege: PrivilegeLevel,
    ) -> Self {
        self.user_entry(User::new(name, password, privilege))
    }

    /// Add a fully specified account.
    pub fn user_entry(mut self, user: User) -> Self {
        self.users.push(user);
        self
    }

    /// Set the BMC key (`Kg`) for "two-key" logins.
    ///
    /// Without it the user's password key doubles as `Kg`.
    pub fn bmc_key(mut self, kg: impl AsRef<[u8]>) -> Self {
        self.bmc_key = Some(kg.as_ref().to_vec());
        self
    }

    /// Base retransmission timeout; each wait adds up to the same amount of jitter.
    ///
    /// Must be non-zero and at most [`MAX_TIMEOUT`].
    pub fn retry_timeout(mut self, timeout: Duration) -> Self {
        self.retry_timeout = timeout;
        self
    }

    /// Retransmissions of an unacknowledged handshake message before the session is dropped.
    pub fn max_retries(mut self, retries: u32) -> Self {
        self.max_retries = retries;
        self
    }

    /// How long a silent session survives, at most [`MAX_TIMEOUT`].
    pub fn idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = timeout;
        self
    }

    /// Identity returned by `Get Device ID`.
    pub fn device_identity(mut self, identity: DeviceIdentity) -> Self {
        self.identity = identity;
        self
    }

    /// Validate and build the configuration.
    pub fn build(self) -> Result<ServerConfig> {
        if self.retry_timeout.is_zero() {
            return Err(Error::InvalidArgument("retry timeout must be non-zero"));
        }
        if self.idle_timeout.is_zero() {
            return Err(Error::InvalidArgument("idle timeout must be non-zero"));
        }
        if self.retry_timeout > MAX_TIMEOUT || self.idle_timeout > MAX_TIMEOUT {
            return Err(Error::InvalidArgument("timeouts must not exceed one day"));
        }
        if self.device_name.is_empty() {
            return Err(Error::InvalidArgument("device name must not be empty"));
        }
        if self.users.is_empty() {
            return Err(Error::InvalidArgument("at least one user is required"));
        }
        if self
            .bmc_key
            .as_ref()
            .is_some_and(|kg| kg.len() > MAX_PASSWORD_LEN)
        {
            return Err(Error::InvalidArgument("BMC key must be at most 20 bytes"));
        }

        Ok(ServerConfig {
            bind: self.bind,
            device_name: self.device_name,
            users: UserStore::new(self.users)?,
            bmc_key: self.bmc_key.map(SecretBytes::new),
            policy: RetryPolicy {
                base_timeout: self.retry_timeout,
                max_retries: self.max_retries,
                idle_timeout: self.idle_timeout,
            },
            identity: self.identity,
        })
    }
}
