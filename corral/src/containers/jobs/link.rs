use std::io::Write as _;

use crate::fsutil;
use crate::job::{Job, JobError, Response, ResponseCode};

use super::LinkRequest;

/// Record the network links each container should resolve at runtime. The
/// links file lives in the definition directory and is consumed by the
/// container's network helper.
pub struct LinkJob {
    pub request: LinkRequest,
}

impl Job for LinkJob {
    fn check(&self) -> Result<(), JobError> {
        if self.request.links.is_empty() {
            return Err(JobError::InvalidRequest(String::from(
                "one or more links must be specified",
            )));
        }
        for link in &self.request.links {
            for net in &link.network_links {
                if net.to_host.is_empty() {
                    return Err(JobError::InvalidRequest(String::from(
                        "a link target host must be specified",
                    )));
                }
            }
        }
        Ok(())
    }

    fn execute(&self, resp: &mut dyn Response) {
        for link in &self.request.links {
            if !link.id.unit_path().exists() {
                resp.failure(JobError::NotFound("the specified container does not exist"));
                return;
            }
            let mut contents = Vec::new();
            for net in &link.network_links {
                let _ = writeln!(
                    contents,
                    "{}:{}\t{}:{}",
                    net.from_host, net.from_port, net.to_host, net.to_port
                );
            }
            let path = link.id.definition_path().join("network-links");
            if let Err(e) = fsutil::atomic_write(&path, &contents) {
                resp.failure(e.into());
                return;
            }
        }
        resp.success(ResponseCode::Ok)
    }
}
