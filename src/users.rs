use crate::crypto::SecretBytes;
use crate::error::{Error, Result};
use crate::types::PrivilegeLevel;

/// Longest user name the wire format can carry.
pub(crate) const MAX_USERNAME_LEN: usize = 16;

/// Longest password (IPMI v2.0 "20-byte" passwords).
pub(crate) const MAX_PASSWORD_LEN: usize = 20;

/// A configured BMC account.
#[derive(Debug, Clone)]
pub struct User {
    name: String,
    password: SecretBytes,
    privilege: PrivilegeLevel,
    active: bool,
    fixed: bool,
}

impl User {
    /// An active, non-fixed account.
    pub fn new(
        name: impl Into<String>,
        password: impl AsRef<[u8]>,
        privilege: PrivilegeLevel,
    ) -> Self {
        Self {
            name: name.into(),
            password: SecretBytes::new(password.as_ref().to_vec()),
            privilege,
            active: true,
            fixed: false,
        }
    }

    /// Set whether the account is enabled.
    pub fn active(mut self, active: bool) -> Self {
        self.active = active;
        self
    }

    /// Set whether the account name is fixed (cannot be renamed by a real BMC).
    pub fn fixed(mut self, fixed: bool) -> Self {
        self.fixed = fixed;
        self
    }

    /// Account name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Privilege ceiling of the account.
    pub fn privilege(&self) -> PrivilegeLevel {
        self.privilege
    }

    /// Whether the account is enabled.
    pub fn is_active(&self) -> bool {
        self.active
    }

    /// Whether the account name is fixed.
    pub fn is_fixed(&self) -> bool {
        self.fixed
    }

    pub(crate) fn password(&self) -> &SecretBytes {
        &self.password
    }

    /// Whether `candidate` matches the stored password.
    pub fn password_matches(&self, candidate: &[u8]) -> bool {
        crate::crypto::ct_eq(self.password.expose(), candidate)
    }

    fn validate(&self) -> Result<()> {
        if self.name.is_empty() || self.name.len() > MAX_USERNAME_LEN {
            return Err(Error::InvalidArgument("user name must be 1-16 bytes"));
        }
        if self.password.expose().len() > MAX_PASSWORD_LEN {
            return Err(Error::InvalidArgument("password must be at most 20 bytes"));
        }
        if !self.privilege.is_user_assignable() {
            return Err(Error::InvalidArgument("user privilege must be 1-4"));
        }
        Ok(())
    }
}

/// Ordered credential table.
///
/// Several IPMI commands address users by a 1-based position in this table,
/// so order is fixed at construction; only individual fields change afterwards.
#[derive(Debug, Clone, Default)]
pub struct UserStore {
    users: Vec<User>,
}

impl UserStore {
    /// Build a store, keeping the given order.
    pub fn new(users: Vec<User>) -> Result<Self> {
        for (i, user) in users.iter().enumerate() {
            user.validate()?;
            if users[..i].iter().any(|u| u.name == user.name) {
                return Err(Error::InvalidArgument("duplicate user name"));
            }
        }
        Ok(Self { users })
    }

    /// Number of configured users.
    pub fn len(&self) -> usize {
        self.users.len()
    }

    /// Whether no users are configured.
    pub fn is_empty(&self) -> bool {
        self.users.is_empty()
    }

    /// Users in positional order.
    pub fn iter(&self) -> impl Iterator<Item = &User> {
        self.users.iter()
    }

    /// Look a user up by name.
    pub fn find(&self, username: &str) -> Option<&User> {
        self.users.iter().find(|u| u.name == username)
    }

    /// User at 1-based `index`.
    pub fn at(&self, index: usize) -> Option<&User> {
        index.checked_sub(1).and_then(|i| self.users.get(i))
    }

    /// Number of enabled users.
    pub fn enabled_count(&self) -> usize {
        self.users.iter().filter(|u| u.active).count()
    }

    /// Number of users with fixed names.
    pub fn fixed_count(&self) -> usize {
        self.users.iter().filter(|u| u.fixed).count()
    }

    /// Rename the user at 1-based `index`; every other entry keeps its position.
    pub fn rename_at(&mut self, index: usize, new_name: &str) -> Result<()> {
        if new_name.is_empty() || new_name.len() > MAX_USERNAME_LEN {
            return Err(Error::InvalidArgument("user name must be 1-16 bytes"));
        }
        let slot = self.slot(index)?;
        if self
            .users
            .iter()
            .enumerate()
            .any(|(i, u)| i != slot && u.name == new_name)
        {
            return Err(Error::InvalidArgument("duplicate user name"));
        }
        self.users[slot].name = new_name.to_owned();
        Ok(())
    }

    /// Replace the password of the user at 1-based `index`.
    pub fn set_password_at(&mut self, index: usize, password: &[u8]) -> Result<()> {
        if password.len() > MAX_PASSWORD_LEN {
            return Err(Error::InvalidArgument("password must be at most 20 bytes"));
        }
        let slot = self.slot(index)?;
        self.users[slot].password = SecretBytes::new(password.to_vec());
        Ok(())
    }

    /// Enable or disable the user at 1-based `index`.
    pub fn set_active_at(&mut self, index: usize, active: bool) -> Result<()> {
        let slot = self.slot(index)?;
        self.users[slot].active = active;
        Ok(())
    }

    /// Mark the user at 1-based `index` as fixed-name or not.
    pub fn set_fixed_at(&mut self, index: usize, fixed: bool) -> Result<()> {
        let slot = self.slot(index)?;
        self.users[slot].fixed = fixed;
        Ok(())
    }

    fn slot(&self, index: usize) -> Result<usize> {
        match index.checked_sub(1) {
            Some(i) if i < self.users.len() => Ok(i),
            _ => Err(Error::protocol_owned(format!(
                "user index {index} out of range"
            ))),
        }
    }
}
