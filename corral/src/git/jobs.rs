use std::fs;
use std::io::Write;
use std::time::{Duration, Instant};

use crate::id::Identifier;
use crate::job::{Job, JobError, Response, ResponseCode};
use crate::sysd;

use super::RepoIdentifier;

const CREATE_CEILING: Duration = Duration::from_secs(25);
const POLL_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct CreateRepositoryRequest {
    pub id: Identifier,
    #[serde(default)]
    pub clone_url: Option<String>,
}

/// Initialize a bare repository under the git host, optionally cloning an
/// upstream. The init runs under a transient unit so it executes with the
/// same confinement as the host service.
pub struct CreateRepositoryJob {
    pub request: CreateRepositoryRequest,
}

impl Job for CreateRepositoryJob {
    fn check(&self) -> Result<(), JobError> {
        if let Some(url) = &self.request.clone_url {
            if url.is_empty() {
                return Err(JobError::InvalidRequest(String::from(
                    "a clone URL must not be empty",
                )));
            }
        }
        Ok(())
    }

    fn execute(&self, resp: &mut dyn Response) {
        let repo = RepoIdentifier(self.request.id.clone());
        let path = repo.repository_path();
        if path.exists() {
            resp.failure(JobError::Simple(String::from(
                "the repository already exists",
            )));
            return;
        }
        if let Some(parent) = path.parent() {
            if let Err(e) = fs::create_dir_all(parent) {
                resp.failure(e.into());
                return;
            }
        }

        let unit_name = format!("repo-{}.service", repo);
        let path_arg = path.display().to_string();
        let argv: Vec<String> = match &self.request.clone_url {
            Some(url) => ["/usr/bin/git", "clone", "--bare", url.as_str(), path_arg.as_str()]
                .into_iter()
                .map(String::from)
                .collect(),
            None => ["/usr/bin/git", "init", "--bare", path_arg.as_str()]
                .into_iter()
                .map(String::from)
                .collect(),
        };

        let w = resp.success_with_write(ResponseCode::Accepted, true, false);
        let _ = writeln!(w, "Creating repository {repo}");

        let conn = sysd::connection();
        if let Err(e) = conn.start_transient_unit(
            &unit_name,
            &format!("Initialize repository {repo}"),
            &argv,
            "container-small.slice",
        ) {
            let _ = writeln!(w, "Unable to initialize the repository: {e}");
            return;
        }

        let deadline = Instant::now() + CREATE_CEILING;
        loop {
            std::thread::sleep(POLL_INTERVAL);
            match conn.unit_state(&unit_name) {
                Ok(state) if !state.running() => {
                    let _ = writeln!(w, "Repository created");
                    break;
                }
                Ok(_) => {}
                Err(e) => {
                    let _ = writeln!(w, "Error {e}");
                }
            }
            if Instant::now() >= deadline {
                log::warn!(target: "git", "timeout waiting for {unit_name}");
                break;
            }
        }
    }
}
