use std::io::Write;
use std::time::{Duration, Instant};

use crate::job::{Job, JobError, Response, ResponseCode};
use crate::sysd;

use super::BuildImageRequest;

/// Image used to run source-to-image builds when no local builder binary is
/// installed.
const BUILDER_IMAGE: &str = "corral/sti-builder";

/// Hard ceiling on the build wait loop.
const BUILD_CEILING: Duration = Duration::from_secs(25);

const POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Run a source-to-image build under a transient unit, streaming progress
/// until the unit leaves the running state or the ceiling passes. The job
/// always terminates with a diagnostic rather than blocking indefinitely.
pub struct BuildImageJob {
    pub request: BuildImageRequest,
}

impl BuildImageJob {
    fn start_command(&self) -> Vec<String> {
        let request = &self.request;
        let mut argv: Vec<String> = [
            "/usr/bin/docker",
            "run",
            "--rm",
            "-v",
            "/run/docker.sock:/run/docker.sock",
            "-t",
            BUILDER_IMAGE,
            "sti",
            "build",
            &request.source,
            &request.base_image,
            &request.tag,
            "-U",
            "unix:///run/docker.sock",
        ]
        .into_iter()
        .map(String::from)
        .collect();
        if let Some(runtime) = &request.runtime_image {
            argv.push(String::from("--runtime-image"));
            argv.push(runtime.clone());
        }
        if request.clean {
            argv.push(String::from("--clean"));
        }
        if request.verbose {
            argv.push(String::from("--debug"));
        }
        argv
    }
}

impl Job for BuildImageJob {
    fn check(&self) -> Result<(), JobError> {
        let request = &self.request;
        if request.source.is_empty() || request.tag.is_empty() || request.base_image.is_empty() {
            return Err(JobError::InvalidRequest(String::from(
                "a source, base image and tag must be specified",
            )));
        }
        Ok(())
    }

    fn execute(&self, resp: &mut dyn Response) {
        let request = &self.request;
        let w = resp.success_with_write(ResponseCode::Accepted, true, false);
        let _ = writeln!(w, "Processing build-image request:");

        let unit_name = format!("build-{}.service", request.name);
        let description = format!("Builder for {}", request.tag);
        let argv = self.start_command();
        log::debug!(target: "build", "running build {unit_name}: {argv:?}");

        let conn = sysd::connection();
        let _ = writeln!(w, "Running build unit: {unit_name}");
        if let Err(e) = conn.start_transient_unit(
            &unit_name,
            &description,
            &argv,
            "container-small.slice",
        ) {
            let _ = writeln!(w, "Unable to start build container for this image: {e}");
            return;
        }
        let _ = writeln!(w, "Build is running");

        let deadline = Instant::now() + BUILD_CEILING;
        loop {
            std::thread::sleep(POLL_INTERVAL);
            match conn.unit_state(&unit_name) {
                Ok(state) if !state.running() => {
                    let _ = writeln!(w, "Build completed");
                    break;
                }
                Ok(_) => {}
                Err(e) => {
                    let _ = writeln!(w, "Error {e}");
                }
            }
            if Instant::now() >= deadline {
                log::warn!(target: "build", "timeout waiting for build {unit_name}");
                break;
            }
        }

        if let Err(e) = conn.write_logs_to(w, &unit_name, 30, Duration::from_secs(1)) {
            log::warn!(target: "build", "unable to fetch build logs: {e}");
        }
    }
}
