use std::fmt;
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};
use thiserror::Error;

use crate::config;

pub const MIN_LENGTH: usize = 4;
pub const MAX_LENGTH: usize = 32;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum IdError {
    #[error("identifiers must not be empty")]
    Empty,
    #[error("identifiers must be between {MIN_LENGTH} and {MAX_LENGTH} characters")]
    Length,
    #[error("identifiers may contain only letters, digits, '_' and '-'")]
    Alphabet,
    #[error("identifiers must begin and end with a letter or digit")]
    Terminal,
}

/// A validated short name for a container, repository, or key. All filesystem
/// derivations are pure functions of the identifier bytes and a base path.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Identifier(String);

impl Identifier {
    pub fn new(value: impl Into<String>) -> Result<Self, IdError> {
        let value = value.into();
        if value.is_empty() {
            return Err(IdError::Empty);
        }
        if value.len() < MIN_LENGTH || value.len() > MAX_LENGTH {
            return Err(IdError::Length);
        }
        if !value
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'_' || b == b'-')
        {
            return Err(IdError::Alphabet);
        }
        let first = value.as_bytes()[0];
        let last = value.as_bytes()[value.len() - 1];
        if !first.is_ascii_alphanumeric() || !last.is_ascii_alphanumeric() {
            return Err(IdError::Terminal);
        }
        Ok(Self(value))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// First two characters, used to fan directories out.
    pub fn prefix(&self) -> &str {
        &self.0[..2]
    }

    /// The init-system unit name for this container.
    pub fn unit_name(&self) -> String {
        format!("{}.service", self.0)
    }

    pub fn socket_unit_name(&self) -> String {
        format!("{}.socket", self.0)
    }

    pub fn unit_path_in(&self, base: &Path) -> PathBuf {
        base.join("units").join(self.prefix()).join(self.unit_name())
    }

    pub fn unit_path(&self) -> PathBuf {
        self.unit_path_in(config::container_base_path())
    }

    pub fn socket_unit_path_in(&self, base: &Path) -> PathBuf {
        base.join("units")
            .join(self.prefix())
            .join(self.socket_unit_name())
    }

    pub fn socket_unit_path(&self) -> PathBuf {
        self.socket_unit_path_in(config::container_base_path())
    }

    /// Per-container directory holding the environment file, the ports file
    /// and anything else the unit needs at runtime.
    pub fn definition_path_in(&self, base: &Path) -> PathBuf {
        base.join("units")
            .join(self.prefix())
            .join(format!("{}.definition", self.0))
    }

    pub fn definition_path(&self) -> PathBuf {
        self.definition_path_in(config::container_base_path())
    }

    pub fn environment_path_in(&self, base: &Path) -> PathBuf {
        self.definition_path_in(base).join("environment")
    }

    pub fn environment_path(&self) -> PathBuf {
        self.environment_path_in(config::container_base_path())
    }

    /// Directory of symlinks to the public keys granted SSH access to this
    /// container.
    pub fn ssh_access_base_in(&self, base: &Path) -> PathBuf {
        base.join("access/containers/ssh")
            .join(self.prefix())
            .join(&self.0)
    }

    pub fn ssh_access_base(&self) -> PathBuf {
        self.ssh_access_base_in(config::container_base_path())
    }

    pub fn ssh_access_path_in(&self, base: &Path, key_name: &str) -> PathBuf {
        self.ssh_access_base_in(base).join(key_name)
    }

    pub fn ssh_access_path(&self, key_name: &str) -> PathBuf {
        self.ssh_access_path_in(config::container_base_path(), key_name)
    }

    /// Cached `authorized_keys` output, invalidated whenever access changes.
    pub fn auth_keys_path_in(&self, base: &Path) -> PathBuf {
        base.join("access/containers/ssh")
            .join(self.prefix())
            .join(format!("{}.keys", self.0))
    }

    pub fn auth_keys_path(&self) -> PathBuf {
        self.auth_keys_path_in(config::container_base_path())
    }
}

impl fmt::Display for Identifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::str::FromStr for Identifier {
    type Err = IdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl TryFrom<String> for Identifier {
    type Error = IdError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<Identifier> for String {
    fn from(id: Identifier) -> Self {
        id.0
    }
}

/// SHA-256 of a marshalled SSH public key. Content-addresses the key on disk.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Fingerprint([u8; 32]);

impl Fingerprint {
    pub fn from_key_blob(blob: &[u8]) -> Self {
        let digest = Sha256::digest(blob);
        Self(digest.into())
    }

    pub fn to_hex(self) -> String {
        self.0.iter().map(|b| format!("{b:02x}")).collect()
    }

    /// First twelve hex characters, enough to name a key uniquely in logs and
    /// access directories.
    pub fn short_name(self) -> String {
        let mut hex = self.to_hex();
        hex.truncate(12);
        hex
    }

    pub fn public_key_path_in(self, base: &Path) -> PathBuf {
        let hex = self.to_hex();
        base.join("keys/public").join(&hex[..2]).join(hex)
    }

    pub fn public_key_path(self) -> PathBuf {
        self.public_key_path_in(config::container_base_path())
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Fingerprint({})", self.short_name())
    }
}
