use std::time::Duration;

use crate::job::{Job, JobError, Response, ResponseCode};
use crate::sysd;

use super::{LogRequest, DEFAULT_LOG_LINES, DEFAULT_LOG_TIMEOUT_SECS};

/// Stream the tail of a container's journal, bounded by a line count and a
/// wall-clock duration.
pub struct LogJob {
    pub request: LogRequest,
}

impl Job for LogJob {
    fn execute(&self, resp: &mut dyn Response) {
        if !self.request.id.unit_path().exists() {
            resp.failure(JobError::NotFound("the specified container does not exist"));
            return;
        }

        let lines = self.request.lines.unwrap_or(DEFAULT_LOG_LINES);
        let timeout = Duration::from_secs(
            self.request
                .timeout_secs
                .unwrap_or(DEFAULT_LOG_TIMEOUT_SECS),
        );

        let w = resp.success_with_write(ResponseCode::Ok, true, false);
        if let Err(e) =
            sysd::connection().write_logs_to(w, &self.request.id.unit_name(), lines, timeout)
        {
            log::warn!(target: "containers", "unable to fetch journal logs: {e}");
        }
    }
}
