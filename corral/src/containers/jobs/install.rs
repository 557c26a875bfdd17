use std::fs;
use std::io::Write;
use std::sync::Arc;

use crate::containers::unit;
use crate::fsutil;
use crate::job::{Job, JobError, Request, Response, ResponseCode};
use crate::port::PortAllocator;
use crate::sysd;

use super::InstallRequest;

/// Create or replace a container definition: reserve its external ports,
/// write the environment and unit files, and optionally start it.
pub struct InstallJob {
    pub request: InstallRequest,
    pub allocator: Arc<PortAllocator>,
}

impl Job for InstallJob {
    fn check(&self) -> Result<(), JobError> {
        if self.request.image.is_empty() {
            return Err(JobError::InvalidRequest(String::from(
                "an image name must be specified",
            )));
        }
        for env in &self.request.environment {
            if env.name.is_empty() || env.name.contains('=') {
                return Err(JobError::InvalidRequest(format!(
                    "'{}' is not a valid environment variable name",
                    env.name
                )));
            }
        }
        Ok(())
    }

    fn execute(&self, resp: &mut dyn Response) {
        let request = &self.request;
        let def_path = request.id.definition_path();
        if let Err(e) = fs::create_dir_all(&def_path) {
            resp.failure(e.into());
            return;
        }

        let existing = crate::containers::existing_ports(&request.id).unwrap_or_default();
        let reserved = match self
            .allocator
            .atomic_reserve(&def_path, &request.ports, &existing)
        {
            Ok(reserved) => reserved,
            Err(e) => {
                resp.failure(e.into());
                return;
            }
        };

        let environment = if request.environment.is_empty() {
            None
        } else {
            let path = request.id.environment_path();
            let mut contents = String::new();
            for env in &request.environment {
                contents.push_str(&format!("{}={}\n", env.name, env.value));
            }
            if let Err(e) = fsutil::atomic_write(&path, contents.as_bytes()) {
                resp.failure(e.into());
                return;
            }
            Some(path)
        };

        let unit_path = request.id.unit_path();
        let text = unit::render_unit(
            &request.id,
            &request.image,
            &reserved,
            environment.as_deref(),
        );
        if let Err(e) = fsutil::atomic_write(&unit_path, text.as_bytes()) {
            resp.failure(e.into());
            return;
        }

        if !reserved.is_empty() {
            resp.write_pending_success("PortMapping", reserved.to_header().into());
        }
        let w = resp.success_with_write(ResponseCode::Accepted, true, false);
        let _ = writeln!(w, "Installed {}", request.id);

        let conn = sysd::connection();
        if let Err(e) = conn.enable_unit_file(&unit_path) {
            let _ = writeln!(w, "Unable to enable unit: {e}");
        }
        if request.started {
            match conn.start_unit(&request.id.unit_name()) {
                Ok(()) => {
                    let _ = writeln!(w, "Container {} starting", request.id);
                }
                Err(e) => {
                    let _ = writeln!(w, "Unable to start unit: {e}");
                }
            }
        }
    }

    fn join(
        &self,
        other: &Request,
        _complete: &crossbeam_channel::Receiver<()>,
    ) -> Result<bool, JobError> {
        Ok(matches!(other, Request::Install(r) if *r == self.request))
    }
}
