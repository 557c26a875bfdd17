use crate::containers;
use crate::job::{Job, Response, ResponseCode};

use super::DeleteRequest;

/// Remove a container: stop its unit, drop the unit and socket files and the
/// definition directory, release its external ports, and disable the units.
/// Deleting a container that does not exist succeeds.
pub struct DeleteJob {
    pub request: DeleteRequest,
}

impl Job for DeleteJob {
    fn execute(&self, resp: &mut dyn Response) {
        match containers::delete_container(&self.request.id) {
            Ok(()) => resp.success(ResponseCode::Ok),
            Err(e) => resp.failure(e),
        }
    }
}
