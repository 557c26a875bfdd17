use std::io::Write as _;
use std::thread;

use crossbeam_channel as chan;

use corral::ext::InitError;
use corral::job::{JobError, Request, Response as _};
use corral::transport::{group_by_host, Locator, ResourceLocator, Transport};

use crate::response::CliResponse;
use crate::streamer::{MakeWriter, Streamer};

/// Groups locators by host and runs one worker per host, streaming each
/// host's output through a prefixing streamer and aggregating exit codes.
pub struct Executor<'a> {
    pub on: Vec<ResourceLocator>,
    pub transport: &'a dyn Transport,
    pub local_init: Box<dyn FnMut() -> Result<(), InitError> + 'a>,
    pub output: &'a dyn MakeWriter,
}

enum Batch<'f> {
    /// One request acting on all identifiers of a host.
    Group(&'f (dyn Fn(&[ResourceLocator]) -> Request + Sync)),
    /// One request per identifier, executed in series per host.
    Serial(&'f (dyn Fn(&ResourceLocator) -> Request + Sync)),
}

impl Executor<'_> {
    pub fn run(self, group: &(dyn Fn(&[ResourceLocator]) -> Request + Sync)) -> i32 {
        self.execute(Batch::Group(group))
    }

    pub fn run_each(self, serial: &(dyn Fn(&ResourceLocator) -> Request + Sync)) -> i32 {
        self.execute(Batch::Serial(serial))
    }

    fn execute(mut self, batch: Batch<'_>) -> i32 {
        let (local, remote) = group_by_host(&self.on);
        let workers = usize::from(!local.is_empty()) + remote.len();
        if workers == 0 {
            return 0;
        }

        if !local.is_empty() {
            if let Err(e) = (self.local_init)() {
                let mut out = self.output.make_writer();
                let _ = writeln!(out, "{e}");
                return 2;
            }
        }

        let (exit_tx, exit_rx) = chan::bounded::<i32>(workers);
        let transport = self.transport;
        let output = self.output;
        let batch = &batch;

        thread::scope(|s| {
            if !local.is_empty() {
                let tx = exit_tx.clone();
                s.spawn(move || {
                    let mut w = Streamer::new(output.make_writer(), "local ");
                    let code = run_host(transport, &Locator::Local, &local, batch, &mut w);
                    let _ = tx.send(code);
                });
            }
            for group in &remote {
                let tx = exit_tx.clone();
                s.spawn(move || {
                    let host = group[0].host.clone();
                    let prefix = format!("{} ", host.identity());
                    let mut w = Streamer::new(output.make_writer(), prefix);
                    let code = run_host(transport, &host, group, batch, &mut w);
                    let _ = tx.send(code);
                });
            }
            // The first code to arrive decides the process's exit status;
            // the remaining workers still run to completion.
            exit_rx.recv().unwrap_or(0)
        })
    }
}

fn run_host(
    transport: &dyn Transport,
    host: &Locator,
    ids: &[ResourceLocator],
    batch: &Batch<'_>,
    w: &mut Streamer,
) -> i32 {
    let requests: Vec<Request> = match batch {
        Batch::Group(f) => vec![f(ids)],
        Batch::Serial(f) => ids.iter().map(f).collect(),
    };

    let mut code = 0;
    for request in requests {
        let job = match transport.remote_job_for(host, request) {
            Ok(job) => job,
            Err(JobError::NotTransportable) => {
                let _ = writeln!(w, "Unable to run this action against a remote server");
                code = code.max(1);
                continue;
            }
            Err(e) => {
                let _ = writeln!(w, "Unable to retrieve response: {e}");
                code = code.max(1);
                continue;
            }
        };

        let mut response = CliResponse::new(w);
        match job.check() {
            Err(e) => response.failure(e),
            Ok(()) => job.execute(&mut response),
        }
        let (exit_code, message) = response.finish();
        if exit_code != 0 {
            let _ = writeln!(w, "{}", message.unwrap_or_else(|| String::from("Command failed")));
        }
        code = code.max(exit_code);
    }
    code
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    use pretty_assertions::assert_eq;

    use corral::containers::jobs::PurgeRequest;
    use corral::job::{Job, Registry, Response, ResponseCode};
    use corral::transport::http::{HttpTransport, RemoteRegistry};
    use corral::transport::{HostLocator, LocalTransport, ResourceKind};

    use super::*;
    use crate::streamer::test::SharedBuffer;

    /// A transport whose jobs are canned per host: `h-fail` hosts fail after
    /// a delay, everything else succeeds immediately.
    struct FakeTransport;

    struct FakeJob {
        fail: bool,
        delay: Duration,
    }

    impl Job for FakeJob {
        fn execute(&self, resp: &mut dyn Response) {
            std::thread::sleep(self.delay);
            if self.fail {
                resp.failure(JobError::simple("job failed"));
            } else {
                resp.success(ResponseCode::Ok);
            }
        }
    }

    impl Transport for FakeTransport {
        fn locator_for(&self, value: &str) -> Result<Locator, JobError> {
            if value == "local" {
                return Ok(Locator::Local);
            }
            value.parse::<HostLocator>().map(Locator::Remote)
        }

        fn remote_job_for(
            &self,
            locator: &Locator,
            _request: Request,
        ) -> Result<Box<dyn Job>, JobError> {
            let fail = locator.identity().starts_with("h-fail");
            Ok(Box::new(FakeJob {
                fail,
                delay: if fail {
                    Duration::from_millis(400)
                } else {
                    Duration::ZERO
                },
            }))
        }
    }

    fn locators(transport: &dyn Transport, values: &[&str]) -> Vec<ResourceLocator> {
        values
            .iter()
            .map(|v| ResourceLocator::parse(transport, ResourceKind::Container, v).unwrap())
            .collect()
    }

    fn noop_init() -> Box<dyn FnMut() -> Result<(), InitError>> {
        Box::new(|| Ok(()))
    }

    #[test]
    fn the_first_reported_code_wins() {
        let transport = FakeTransport;
        let out = SharedBuffer::default();
        let executor = Executor {
            on: locators(&transport, &["h-ok/cont1", "h-fail/cont2"]),
            transport: &transport,
            local_init: noop_init(),
            output: &out,
        };

        // The failing host reports after a delay; the process still exits
        // with the first reporter's status.
        let code = executor.run_each(&|loc| {
            let _ = loc;
            Request::Purge(PurgeRequest::default())
        });

        assert_eq!(code, 0);
        assert!(out.contents().contains("h-fail job failed\n"));
    }

    #[test]
    fn remote_purge_is_rejected_per_host() {
        // A real HTTP transport with the full remote table: purge has no
        // marshalling, so the worker reports it cannot run remotely.
        let mut remotes = RemoteRegistry::new();
        corral::containers::http::register_remotes(&mut remotes);
        let transport = LocalTransport::new(
            Arc::new(Registry::new()),
            Arc::new(HttpTransport::new(Arc::new(remotes))),
        );
        let out = SharedBuffer::default();
        let executor = Executor {
            on: vec![ResourceLocator::host_only(
                transport.locator_for("h1").unwrap(),
            )],
            transport: &transport,
            local_init: noop_init(),
            output: &out,
        };

        let code = executor.run(&|_| Request::Purge(PurgeRequest::default()));

        assert_eq!(code, 1);
        assert_eq!(
            out.contents(),
            "h1 Unable to run this action against a remote server\n"
        );
    }

    #[test]
    fn local_workers_initialize_once() {
        let transport = FakeTransport;
        let out = SharedBuffer::default();
        let inits = Arc::new(AtomicUsize::new(0));
        let counter = inits.clone();
        let executor = Executor {
            on: locators(&transport, &["cont1", "cont2"]),
            transport: &transport,
            local_init: Box::new(move || {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }),
            output: &out,
        };

        let code = executor.run_each(&|_| Request::Purge(PurgeRequest::default()));

        assert_eq!(code, 0);
        assert_eq!(inits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn failed_initialization_exits_two() {
        let transport = FakeTransport;
        let out = SharedBuffer::default();
        let executor = Executor {
            on: locators(&transport, &["cont1"]),
            transport: &transport,
            local_init: Box::new(|| Err(InitError(String::from("no state directory")))),
            output: &out,
        };

        let code = executor.run_each(&|_| Request::Purge(PurgeRequest::default()));

        assert_eq!(code, 2);
    }

    #[test]
    fn check_failures_never_execute() {
        struct CheckedTransport(Arc<AtomicUsize>);
        struct CheckedJob(Arc<AtomicUsize>);

        impl Job for CheckedJob {
            fn check(&self) -> Result<(), JobError> {
                Err(JobError::InvalidRequest(String::from("bad input")))
            }
            fn execute(&self, _resp: &mut dyn Response) {
                self.0.fetch_add(1, Ordering::SeqCst);
            }
        }
        impl Transport for CheckedTransport {
            fn locator_for(&self, _value: &str) -> Result<Locator, JobError> {
                Ok(Locator::Local)
            }
            fn remote_job_for(
                &self,
                _locator: &Locator,
                _request: Request,
            ) -> Result<Box<dyn Job>, JobError> {
                Ok(Box::new(CheckedJob(self.0.clone())))
            }
        }

        let executions = Arc::new(AtomicUsize::new(0));
        let transport = CheckedTransport(executions.clone());
        let out = SharedBuffer::default();
        let executor = Executor {
            on: locators(&transport, &["cont1"]),
            transport: &transport,
            local_init: noop_init(),
            output: &out,
        };

        let code = executor.run_each(&|_| Request::Purge(PurgeRequest::default()));

        assert_eq!(code, 1);
        assert_eq!(executions.load(Ordering::SeqCst), 0);
        assert_eq!(out.contents(), "local bad input\n");
    }
}
