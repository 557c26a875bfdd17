pub mod http;
mod jobs;
mod keys;

pub use jobs::{CreateKeysJob, CreateKeysRequest, KeyData, KeyPermission};
pub use keys::{parse_authorized_key, KeyError, PublicKey};

use std::collections::HashMap;
use std::fs;
use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::Arc;

use crate::config;
use crate::ext::Extensions;
use crate::fsutil;
use crate::id::Identifier;
use crate::job::{JobError, Kind, Request};

/// Where a stored public key lives and the short name it is linked under.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct KeyLocator {
    pub path: PathBuf,
    pub name: String,
}

/// Stores one uploaded key and reports where it landed.
pub trait KeyTypeHandler: Send + Sync {
    fn create_key(&self, value: &serde_json::Value) -> Result<KeyLocator, JobError>;
}

/// Grants a stored key access to one resource.
pub trait PermissionHandler: Send + Sync {
    fn create_permission(&self, locator: &KeyLocator, with: &serde_json::Value)
        -> Result<(), JobError>;
}

/// Emits `authorized_keys` lines for a system user.
pub trait AuthorizedKeysHandler: Send + Sync {
    fn matches_user(&self, user: &str) -> bool;
    fn generate(&self, user: &str, out: &mut dyn Write) -> Result<(), JobError>;
}

/// The SSH handler tables: key types, permission types, and authorized-keys
/// generators. Populated by each compiled-in subsystem before
/// initialization and read-only afterwards.
#[derive(Default)]
pub struct Handlers {
    key_types: HashMap<String, Box<dyn KeyTypeHandler>>,
    permissions: HashMap<String, Box<dyn PermissionHandler>>,
    authorized_keys: Vec<Box<dyn AuthorizedKeysHandler>>,
}

impl Handlers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_key_type(&mut self, id: impl Into<String>, handler: impl KeyTypeHandler + 'static) {
        self.key_types.insert(id.into(), Box::new(handler));
    }

    pub fn key_type_for(&self, id: &str) -> Option<&dyn KeyTypeHandler> {
        self.key_types.get(id).map(Box::as_ref)
    }

    pub fn add_permission(
        &mut self,
        id: impl Into<String>,
        handler: impl PermissionHandler + 'static,
    ) {
        self.permissions.insert(id.into(), Box::new(handler));
    }

    pub fn permission_for(&self, id: &str) -> Option<&dyn PermissionHandler> {
        self.permissions.get(id).map(Box::as_ref)
    }

    pub fn add_authorized_keys(&mut self, handler: impl AuthorizedKeysHandler + 'static) {
        self.authorized_keys.push(Box::new(handler));
    }

    /// Run the first generator claiming the user.
    pub fn generate_authorized_keys(
        &self,
        user: &str,
        out: &mut dyn Write,
    ) -> Result<(), JobError> {
        for handler in &self.authorized_keys {
            if handler.matches_user(user) {
                return handler.generate(user, out);
            }
        }
        Err(JobError::NotFound(
            "no authorized-keys generator matches the user",
        ))
    }
}

/// Key type id for raw `authorized_keys` lines.
pub const AUTHORIZED_KEYS_TYPE: &str = "authorized_keys";

/// Permission type id granting SSH access to a container. The default when a
/// permission names no type.
pub const CONTAINER_PERMISSION_TYPE: &str = "container";

/// Register the built-in key type and the container permission.
pub fn register_handlers(handlers: &mut Handlers) {
    handlers.add_key_type(AUTHORIZED_KEYS_TYPE, AuthorizedKeyType);
    handlers.add_permission(CONTAINER_PERMISSION_TYPE, ContainerPermission);
    handlers.add_permission("", ContainerPermission);
}

/// Wire the SSH subsystem into the registries.
pub fn extend(ext: &mut Extensions, handlers: Arc<Handlers>) {
    let base = config::container_base_path();
    ext.required_directories.add(base.join("keys/public"));

    ext.jobs.register(Kind::CreateKeys, move |req| match req {
        Request::CreateKeys(request) => Ok(Box::new(CreateKeysJob {
            request,
            handlers: handlers.clone(),
        })),
        _ => Err(JobError::NoJobForRequest),
    });
    http::register_remotes(&mut ext.remotes);
    ext.routes.extend(http::routes());
}

/// Parses and stores a raw public key line, content-addressed by its
/// fingerprint.
struct AuthorizedKeyType;

impl KeyTypeHandler for AuthorizedKeyType {
    fn create_key(&self, value: &serde_json::Value) -> Result<KeyLocator, JobError> {
        let line = value
            .as_str()
            .ok_or_else(|| JobError::InvalidRequest(String::from("a key must be a string")))?;
        let key = parse_authorized_key(line)
            .map_err(|_| JobError::InvalidRequest(String::from("unable to parse the provided key")))?;

        let fingerprint = key.fingerprint();
        let path = fingerprint.public_key_path();
        fsutil::atomic_write(&path, key.marshal().as_bytes())?;

        Ok(KeyLocator {
            path,
            name: fingerprint.short_name(),
        })
    }
}

/// Grants a key SSH access to a container by linking it into the container's
/// access directory.
struct ContainerPermission;

impl PermissionHandler for ContainerPermission {
    fn create_permission(
        &self,
        locator: &KeyLocator,
        with: &serde_json::Value,
    ) -> Result<(), JobError> {
        let id = with.as_str().ok_or_else(|| {
            JobError::InvalidRequest(String::from("a container identifier must be specified"))
        })?;
        let id = Identifier::new(id).map_err(|e| JobError::InvalidRequest(e.to_string()))?;

        if !id.unit_path().exists() {
            return Err(JobError::NotFound("the specified container does not exist"));
        }
        let access = id.ssh_access_path(&locator.name);
        if let Some(parent) = access.parent() {
            fs::create_dir_all(parent)?;
        }
        if let Err(e) = std::os::unix::fs::symlink(&locator.path, &access) {
            if e.kind() != io::ErrorKind::AlreadyExists {
                return Err(e.into());
            }
        }
        // Invalidate the cached authorized_keys output.
        let cached = id.auth_keys_path();
        if cached.exists() {
            fs::remove_file(&cached)?;
        }
        Ok(())
    }
}
