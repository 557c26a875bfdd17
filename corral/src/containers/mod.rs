pub mod http;
pub mod jobs;
mod unit;

pub use unit::{render_unit, CONTAINER_ID_PREFIX};

use std::fs;
use std::io::{self, Write};
use std::path::Path;
use std::sync::Arc;

use crate::config;
use crate::ext::Extensions;
use crate::id::Identifier;
use crate::job::{JobError, Kind, Request};
use crate::port::{self, PortAllocator, PortPairs};
use crate::ssh;
use crate::sysd;

use jobs::{
    BuildImageJob, ContentJob, DeleteJob, InstallJob, LinkJob, LogJob, PurgeJob, StartedJob,
    StoppedJob,
};

/// Wire the container subsystem into the registries: job handlers for every
/// container kind, the HTTP marshalling for the transportable ones, the
/// daemon routes, and the state directories the jobs expect.
pub fn extend(ext: &mut Extensions, allocator: Arc<PortAllocator>) {
    let base = config::container_base_path();
    ext.required_directories.add(base.join("units"));
    ext.required_directories.add(base.join("ports/interfaces/1"));
    ext.required_directories.add(base.join("access/containers/ssh"));

    ext.jobs.register(Kind::Install, move |req| match req {
        Request::Install(request) => Ok(Box::new(InstallJob {
            request,
            allocator: allocator.clone(),
        })),
        _ => Err(JobError::NoJobForRequest),
    });
    ext.jobs.register(Kind::Started, |req| match req {
        Request::Started(request) => Ok(Box::new(StartedJob { request })),
        _ => Err(JobError::NoJobForRequest),
    });
    ext.jobs.register(Kind::Stopped, |req| match req {
        Request::Stopped(request) => Ok(Box::new(StoppedJob { request })),
        _ => Err(JobError::NoJobForRequest),
    });
    ext.jobs.register(Kind::Delete, |req| match req {
        Request::Delete(request) => Ok(Box::new(DeleteJob { request })),
        _ => Err(JobError::NoJobForRequest),
    });
    ext.jobs.register(Kind::Link, |req| match req {
        Request::Link(request) => Ok(Box::new(LinkJob { request })),
        _ => Err(JobError::NoJobForRequest),
    });
    ext.jobs.register(Kind::Log, |req| match req {
        Request::Log(request) => Ok(Box::new(LogJob { request })),
        _ => Err(JobError::NoJobForRequest),
    });
    ext.jobs.register(Kind::BuildImage, |req| match req {
        Request::BuildImage(request) => Ok(Box::new(BuildImageJob { request })),
        _ => Err(JobError::NoJobForRequest),
    });
    ext.jobs.register(Kind::Content, |req| match req {
        Request::Content(request) => Ok(Box::new(ContentJob { request })),
        _ => Err(JobError::NoJobForRequest),
    });
    // Purge is deliberately not given a remote marshalling: it only ever
    // runs in-process.
    ext.jobs.register(Kind::Purge, |req| match req {
        Request::Purge(request) => Ok(Box::new(PurgeJob { request })),
        _ => Err(JobError::NoJobForRequest),
    });

    http::register_remotes(&mut ext.remotes);
    ext.routes.extend(http::routes());
}

/// Emit `authorized_keys` lines for a container user by walking the access
/// symlinks granted to it.
pub fn register_authorized_keys(handlers: &mut ssh::Handlers) {
    handlers.add_authorized_keys(ContainerKeys);
}

struct ContainerKeys;

impl ssh::AuthorizedKeysHandler for ContainerKeys {
    fn matches_user(&self, user: &str) -> bool {
        match Identifier::new(user) {
            Ok(id) => id.unit_path().exists(),
            Err(_) => false,
        }
    }

    fn generate(&self, user: &str, out: &mut dyn Write) -> Result<(), JobError> {
        let id = Identifier::new(user).map_err(|e| JobError::InvalidRequest(e.to_string()))?;
        let access = id.ssh_access_base();
        let entries = match fs::read_dir(&access) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(e.into()),
        };
        for entry in entries {
            let entry = entry?;
            let key = fs::read_to_string(entry.path())?;
            writeln!(out, "{}", key.trim_end())?;
        }
        Ok(())
    }
}

/// Port mappings currently recorded in the container's unit file.
pub fn existing_ports(id: &Identifier) -> io::Result<PortPairs> {
    let file = fs::File::open(id.unit_path())?;
    port::ports_from_unit_file(file)
}

/// Remove every container the agent owns: stop and disable units, drop their
/// definitions, and release their ports.
pub fn clean() {
    let units = config::container_base_path().join("units");
    let prefixes = match fs::read_dir(&units) {
        Ok(entries) => entries,
        Err(e) => {
            if e.kind() != io::ErrorKind::NotFound {
                log::warn!(target: "containers", "unable to list units: {e}");
            }
            return;
        }
    };
    for prefix in prefixes.flatten() {
        let Ok(entries) = fs::read_dir(prefix.path()) else {
            continue;
        };
        for entry in entries.flatten() {
            let path = entry.path();
            if path.extension().map_or(true, |ext| ext != "service") {
                continue;
            }
            let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            let Ok(id) = Identifier::new(stem) else {
                continue;
            };
            if let Err(e) = delete_container(&id) {
                log::warn!(target: "containers", "unable to remove {id}: {e}");
            }
        }
    }
}

/// Shared removal path used by the delete job and by [`clean`].
pub(crate) fn delete_container(id: &Identifier) -> Result<(), JobError> {
    let conn = sysd::connection();
    let unit_name = id.unit_name();

    match conn.unit_state(&unit_name) {
        Err(e) if e.is_no_such_unit() => return Ok(()),
        Err(e) => {
            log::warn!(target: "containers", "unable to query unit {unit_name}: {e}");
            return Err(JobError::simple("unable to delete the container"));
        }
        Ok(_) => {}
    }

    if let Err(e) = conn.stop_unit(&unit_name) {
        log::warn!(target: "containers", "unable to queue stop unit job: {e}");
    }

    let unit_path = id.unit_path();
    let socket_path = id.socket_unit_path();
    let def_path = id.definition_path();

    // The mappings must be read before the unit file goes away.
    let ports = existing_ports(id).unwrap_or_default();

    if let Err(e) = fs::remove_file(&unit_path) {
        if e.kind() != io::ErrorKind::NotFound {
            return Err(JobError::simple("unable to delete the container"));
        }
    }
    if let Err(e) = fs::remove_file(&socket_path) {
        if e.kind() != io::ErrorKind::NotFound {
            log::warn!(target: "containers", "unable to remove socket unit path: {e}");
        }
    }
    if let Err(e) = fs::remove_dir_all(&def_path) {
        if e.kind() != io::ErrorKind::NotFound {
            log::warn!(target: "containers", "unable to remove definitions for container: {e}");
        }
    }
    if let Err(e) = port::release_external_ports(&def_path, &ports) {
        log::warn!(target: "containers", "unable to release ports: {e}");
    }
    if let Err(e) = conn.disable_unit_files(&[unit_path.as_path(), socket_path.as_path()]) {
        log::warn!(target: "containers", "some units have not been disabled: {e}");
    }
    Ok(())
}
