use crossbeam_channel as chan;

use crate::job::{Job, JobError, Request, Response, ResponseCode};
use crate::sysd;

use super::{StartedRequest, StoppedRequest};

const ERR_CONTAINER_NOT_FOUND: &str = "the specified container does not exist";

/// Bring a container to the started state.
pub struct StartedJob {
    pub request: StartedRequest,
}

impl Job for StartedJob {
    fn execute(&self, resp: &mut dyn Response) {
        if !self.request.id.unit_path().exists() {
            resp.failure(JobError::NotFound(ERR_CONTAINER_NOT_FOUND));
            return;
        }
        match sysd::connection().start_unit(&self.request.id.unit_name()) {
            Ok(()) => resp.success(ResponseCode::Ok),
            Err(e) => resp.failure(JobError::Simple(format!(
                "unable to start the container: {e}"
            ))),
        }
    }

    fn join(&self, other: &Request, _complete: &chan::Receiver<()>) -> Result<bool, JobError> {
        Ok(matches!(other, Request::Started(r) if *r == self.request))
    }
}

/// Bring a container to the stopped state.
pub struct StoppedJob {
    pub request: StoppedRequest,
}

impl Job for StoppedJob {
    fn execute(&self, resp: &mut dyn Response) {
        if !self.request.id.unit_path().exists() {
            resp.failure(JobError::NotFound(ERR_CONTAINER_NOT_FOUND));
            return;
        }
        match sysd::connection().stop_unit(&self.request.id.unit_name()) {
            Ok(()) => resp.success(ResponseCode::Ok),
            Err(e) => resp.failure(JobError::Simple(format!(
                "unable to stop the container: {e}"
            ))),
        }
    }

    fn join(&self, other: &Request, _complete: &chan::Receiver<()>) -> Result<bool, JobError> {
        Ok(matches!(other, Request::Stopped(r) if *r == self.request))
    }
}
