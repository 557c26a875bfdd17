pub mod http;
mod jobs;

pub use jobs::{CreateRepositoryJob, CreateRepositoryRequest};

use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use crate::config;
use crate::ext::{Extensions, InitError};
use crate::id::Identifier;
use crate::job::{JobError, Kind, Request};
use crate::ssh::{Handlers, KeyLocator, PermissionHandler};
use crate::sysd;

/// The host service that serves repositories over the git protocol.
pub const GIT_HOST_UNIT: &str = "corral-githost.service";

/// Permission type id granting access to a repository.
pub const REPOSITORY_PERMISSION_TYPE: &str = "repository";

/// A repository-flavored identifier with its own path derivations.
#[derive(Clone, Debug, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(transparent)]
pub struct RepoIdentifier(pub Identifier);

impl RepoIdentifier {
    /// Bind-mounted into the git host service.
    pub fn repository_path_in(&self, base: &Path) -> PathBuf {
        base.join("git").join(self.0.as_str())
    }

    pub fn repository_path(&self) -> PathBuf {
        self.repository_path_in(config::container_base_path())
    }

    fn access_base_in(&self, base: &Path) -> PathBuf {
        base.join("access/git")
            .join(self.0.prefix())
            .join(self.0.as_str())
    }

    /// Key symlink granting read or write access to this repository.
    pub fn access_path_in(&self, base: &Path, key_name: &str, write: bool) -> PathBuf {
        let mode = if write { "write" } else { "read" };
        self.access_base_in(base).join(mode).join(key_name)
    }

    pub fn access_path(&self, key_name: &str, write: bool) -> PathBuf {
        self.access_path_in(config::container_base_path(), key_name, write)
    }

    pub fn auth_keys_path_in(&self, base: &Path) -> PathBuf {
        base.join("access/git")
            .join(self.0.prefix())
            .join(format!("{}.keys", self.0))
    }

    pub fn auth_keys_path(&self) -> PathBuf {
        self.auth_keys_path_in(config::container_base_path())
    }
}

impl fmt::Display for RepoIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Register the repository permission with the SSH handler tables.
pub fn register_permissions(handlers: &mut Handlers) {
    handlers.add_permission(REPOSITORY_PERMISSION_TYPE, RepositoryPermission);
}

/// Wire the git subsystem into the registries.
pub fn extend(ext: &mut Extensions) {
    let base = config::container_base_path();
    ext.required_directories.add(base.join("git"));
    ext.required_directories.add(base.join("access/git"));

    ext.jobs.register(Kind::CreateRepository, |req| match req {
        Request::CreateRepository(request) => Ok(Box::new(CreateRepositoryJob { request })),
        _ => Err(JobError::NoJobForRequest),
    });
    http::register_remotes(&mut ext.remotes);
    ext.routes.extend(http::routes());

    ext.initializers.add(&[crate::ext::WHEN_DAEMON], || {
        report_git_host_state();
        Ok::<(), InitError>(())
    });
}

/// Repository tasks need the git host service; its own setup is managed
/// outside the agent, so all we do at startup is surface its state.
fn report_git_host_state() {
    match sysd::connection().unit_state(GIT_HOST_UNIT) {
        Ok(state) if state.active == "active" => {}
        Ok(state) if state.active == "activating" => {
            log::info!(
                target: "git",
                "the git host service '{GIT_HOST_UNIT}' is starting; repository tasks will not be available until it completes"
            );
        }
        Ok(_) | Err(_) => {
            log::info!(
                target: "git",
                "the git host service '{GIT_HOST_UNIT}' is not started; git repository operations will not be available"
            );
        }
    }
}

#[derive(serde::Deserialize)]
struct RepositoryGrant {
    id: String,
    #[serde(default)]
    write: bool,
}

/// Grants a key access to a repository by linking it into the repository's
/// read or write access directory, dropping any grant at the opposite level.
struct RepositoryPermission;

impl PermissionHandler for RepositoryPermission {
    fn create_permission(
        &self,
        locator: &KeyLocator,
        with: &serde_json::Value,
    ) -> Result<(), JobError> {
        let grant: RepositoryGrant = serde_json::from_value(with.clone())
            .map_err(|e| JobError::InvalidRequest(format!("invalid repository grant: {e}")))?;
        let id = Identifier::new(grant.id.as_str())
            .map_err(|e| JobError::InvalidRequest(e.to_string()))?;
        let repo = RepoIdentifier(id);

        if !repo.repository_path().exists() {
            return Err(JobError::NotFound("the specified repository does not exist"));
        }

        let access = repo.access_path(&locator.name, grant.write);
        if let Some(parent) = access.parent() {
            fs::create_dir_all(parent)?;
        }
        if let Err(e) = std::os::unix::fs::symlink(&locator.path, &access) {
            if e.kind() != io::ErrorKind::AlreadyExists {
                return Err(e.into());
            }
        }
        // A grant at one level revokes the opposite one.
        let opposite = repo.access_path(&locator.name, !grant.write);
        if let Err(e) = fs::remove_file(&opposite) {
            if e.kind() != io::ErrorKind::NotFound {
                return Err(e.into());
            }
        }
        let cached = repo.auth_keys_path();
        if let Err(e) = fs::remove_file(&cached) {
            if e.kind() != io::ErrorKind::NotFound {
                return Err(e.into());
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn repository_paths_fan_out() {
        let base = Path::new("/base");
        let repo = RepoIdentifier(Identifier::new("site").unwrap());

        assert_eq!(repo.repository_path_in(base), Path::new("/base/git/site"));
        assert_eq!(
            repo.access_path_in(base, "0a1b2c", true),
            Path::new("/base/access/git/si/site/write/0a1b2c")
        );
        assert_eq!(
            repo.access_path_in(base, "0a1b2c", false),
            Path::new("/base/access/git/si/site/read/0a1b2c")
        );
    }
}
