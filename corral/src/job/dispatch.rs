use std::sync::{Arc, Mutex};
use std::thread;

use crossbeam_channel as chan;

use super::{Job, Request, Response, ResponseCode};

/// Admission queue configuration.
pub struct Config {
    /// Number of worker threads.
    pub capacity: usize,
    /// Thread name.
    pub name: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            capacity: 8,
            name: String::from("job-dispatch"),
        }
    }
}

/// A checked job together with the sink its outcome goes to.
pub struct Work {
    pub request: Request,
    pub job: Box<dyn Job>,
    pub response: Box<dyn Response + Send>,
}

/// Bounded pool of job workers. Fast jobs bypass the queue and run on the
/// caller's thread; joinable jobs deduplicate against an inflight twin and
/// wait for its completion instead of running again.
#[derive(Clone)]
pub struct Dispatcher {
    tasks: chan::Sender<Work>,
    inflight: Arc<Mutex<Vec<(Request, chan::Receiver<()>)>>>,
}

impl Dispatcher {
    /// Spawn the worker pool. Workers exit when the last dispatcher handle is
    /// dropped.
    pub fn start(config: Config) -> Self {
        let (tx, rx) = chan::unbounded::<Work>();
        let inflight = Arc::new(Mutex::new(Vec::new()));
        for _ in 0..config.capacity {
            let rx = rx.clone();
            let inflight = Arc::clone(&inflight);
            thread::Builder::new()
                .name(config.name.clone())
                .spawn(move || worker(rx, inflight))
                .expect("failed to spawn a job dispatch worker");
        }
        Self {
            tasks: tx,
            inflight,
        }
    }

    pub fn dispatch(&self, mut work: Work) {
        if work.job.fast() {
            run(&mut work);
            return;
        }
        if let Some(done) = self.joined(&work) {
            log::debug!(target: "jobs", "joined an inflight twin of '{}'", work.request.kind());
            let _ = done.recv();
            work.response.success(ResponseCode::Ok);
            return;
        }
        if self.tasks.send(work).is_err() {
            log::error!(target: "jobs", "job dispatch workers are gone");
        }
    }

    fn joined(&self, work: &Work) -> Option<chan::Receiver<()>> {
        let inflight = self.inflight.lock().unwrap();
        for (request, done) in inflight.iter() {
            match work.job.join(request, done) {
                Ok(true) => return Some(done.clone()),
                Ok(false) => continue,
                Err(e) => {
                    log::warn!(target: "jobs", "join against an inflight job failed: {e}");
                }
            }
        }
        None
    }
}

fn worker(tasks: chan::Receiver<Work>, inflight: Arc<Mutex<Vec<(Request, chan::Receiver<()>)>>>) {
    while let Ok(mut work) = tasks.recv() {
        // Completion is broadcast by dropping the sender.
        let (done_tx, done_rx) = chan::bounded::<()>(0);
        inflight
            .lock()
            .unwrap()
            .push((work.request.clone(), done_rx));

        run(&mut work);

        let mut entries = inflight.lock().unwrap();
        entries.retain(|(request, _)| request != &work.request);
        drop(entries);
        drop(done_tx);
    }
}

fn run(work: &mut Work) {
    work.job.execute(work.response.as_mut());
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use super::*;
    use crate::containers::jobs::PurgeRequest;
    use crate::job::JobError;
    use crate::test::TestResponse;

    struct SlowJob {
        executions: Arc<AtomicUsize>,
        delay: Duration,
        joinable: bool,
    }

    impl Job for SlowJob {
        fn execute(&self, resp: &mut dyn Response) {
            std::thread::sleep(self.delay);
            self.executions.fetch_add(1, Ordering::SeqCst);
            resp.success(ResponseCode::Ok);
        }

        fn join(&self, other: &Request, _complete: &chan::Receiver<()>) -> Result<bool, JobError> {
            Ok(self.joinable && matches!(other, Request::Purge(_)))
        }
    }

    #[test]
    fn twins_join_instead_of_running_twice() {
        let dispatcher = Dispatcher::start(Config::default());
        let executions = Arc::new(AtomicUsize::new(0));

        let first = Work {
            request: Request::Purge(PurgeRequest::default()),
            job: Box::new(SlowJob {
                executions: executions.clone(),
                delay: Duration::from_millis(300),
                joinable: true,
            }),
            response: Box::new(TestResponse::default()),
        };
        dispatcher.dispatch(first);
        std::thread::sleep(Duration::from_millis(50));

        // The twin attaches to the inflight job and reports success without
        // executing.
        let second = Work {
            request: Request::Purge(PurgeRequest::default()),
            job: Box::new(SlowJob {
                executions: executions.clone(),
                delay: Duration::from_millis(300),
                joinable: true,
            }),
            response: Box::new(TestResponse::default()),
        };
        dispatcher.dispatch(second);

        assert_eq!(executions.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn fast_jobs_run_on_the_caller() {
        let dispatcher = Dispatcher::start(Config {
            capacity: 1,
            name: String::from("test-dispatch"),
        });
        let executions = Arc::new(AtomicUsize::new(0));

        struct FastJob(Arc<AtomicUsize>);
        impl Job for FastJob {
            fn execute(&self, resp: &mut dyn Response) {
                self.0.fetch_add(1, Ordering::SeqCst);
                resp.success(ResponseCode::Ok);
            }
            fn fast(&self) -> bool {
                true
            }
        }

        dispatcher.dispatch(Work {
            request: Request::Purge(PurgeRequest::default()),
            job: Box::new(FastJob(executions.clone())),
            response: Box::new(TestResponse::default()),
        });

        // No queue hand-off: the effect is visible as soon as dispatch
        // returns.
        assert_eq!(executions.load(Ordering::SeqCst), 1);
    }
}
