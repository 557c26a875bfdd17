use std::collections::HashMap;

use super::{Job, JobError, Kind, Request};

type Factory = Box<dyn Fn(Request) -> Result<Box<dyn Job>, JobError> + Send + Sync>;

/// Kind-discriminated catalogue of job constructors. Populated by each
/// compiled-in subsystem before initialization and read-only afterwards.
#[derive(Default)]
pub struct Registry {
    factories: HashMap<Kind, Factory>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<F>(&mut self, kind: Kind, factory: F)
    where
        F: Fn(Request) -> Result<Box<dyn Job>, JobError> + Send + Sync + 'static,
    {
        if self.factories.insert(kind, Box::new(factory)).is_some() {
            log::warn!(target: "jobs", "handler for '{kind}' registered twice; keeping the last");
        }
    }

    pub fn contains(&self, kind: Kind) -> bool {
        self.factories.contains_key(&kind)
    }

    /// Return a runnable job for the request, or [`JobError::NoJobForRequest`]
    /// when no handler was registered for its kind.
    pub fn job_for(&self, request: Request) -> Result<Box<dyn Job>, JobError> {
        match self.factories.get(&request.kind()) {
            Some(factory) => factory(request),
            None => Err(JobError::NoJobForRequest),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::containers::jobs::PurgeRequest;
    use crate::job::{Response, ResponseCode};

    struct NoopJob;

    impl Job for NoopJob {
        fn execute(&self, resp: &mut dyn Response) {
            resp.success(ResponseCode::Ok);
        }
    }

    #[test]
    fn unknown_kind_has_no_job() {
        let registry = Registry::new();
        let result = registry.job_for(Request::Purge(PurgeRequest::default()));

        assert!(matches!(result, Err(JobError::NoJobForRequest)));
    }

    #[test]
    fn registered_kind_resolves() {
        let mut registry = Registry::new();
        registry.register(super::Kind::Purge, |_| Ok(Box::new(NoopJob)));

        assert!(registry
            .job_for(Request::Purge(PurgeRequest::default()))
            .is_ok());
        assert!(registry.contains(super::Kind::Purge));
    }
}
