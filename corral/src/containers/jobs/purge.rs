use crate::containers;
use crate::job::{Job, Response, ResponseCode};

use super::PurgeRequest;

/// Remove every container the agent owns. Only ever runs in-process; the
/// request has no remote marshalling.
pub struct PurgeJob {
    pub request: PurgeRequest,
}

impl Job for PurgeJob {
    fn execute(&self, resp: &mut dyn Response) {
        let _ = &self.request;
        containers::clean();
        resp.success(ResponseCode::Ok)
    }
}
