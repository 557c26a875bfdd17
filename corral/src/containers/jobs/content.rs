use std::fs;
use std::io;

use crossbeam_channel as chan;

use crate::id::Identifier;
use crate::job::{Job, JobError, Request, Response, ResponseCode};

use super::{ContentRequest, CONTENT_TYPE_ENVIRONMENT};

/// Serve a piece of container content, currently the environment file. Fast:
/// content retrieval skips admission queueing, and multiple retrievals may
/// be inflight at once.
pub struct ContentJob {
    pub request: ContentRequest,
}

impl Job for ContentJob {
    fn fast(&self) -> bool {
        true
    }

    fn check(&self) -> Result<(), JobError> {
        match self.request.content_type.as_str() {
            CONTENT_TYPE_ENVIRONMENT => Ok(()),
            other => Err(JobError::InvalidRequest(format!(
                "unknown content type '{other}'"
            ))),
        }
    }

    fn execute(&self, resp: &mut dyn Response) {
        let id = match Identifier::new(self.request.locator.as_str()) {
            Ok(id) => id,
            Err(e) => {
                resp.failure(JobError::InvalidRequest(format!(
                    "invalid environment identifier: {e}"
                )));
                return;
            }
        };
        let mut file = match fs::File::open(id.environment_path()) {
            Ok(file) => file,
            Err(_) => {
                resp.failure(JobError::NotFound(
                    "the specified environment does not exist",
                ));
                return;
            }
        };
        let w = resp.success_with_write(ResponseCode::Ok, false, false);
        if let Err(e) = io::copy(&mut file, w) {
            log::warn!(target: "containers", "unable to write environment file: {e}");
        }
    }

    fn join(&self, _other: &Request, _complete: &chan::Receiver<()>) -> Result<bool, JobError> {
        Ok(false)
    }
}
