use std::collections::HashMap;
use std::sync::Arc;

use thiserror::Error;

use crate::config::RequiredDirectories;
use crate::job::Registry;
use crate::ssh::Handlers;
use crate::transport::http::{RemoteRegistry, RouteSpec};
use crate::transport::Transport;

/// Phase for hooks that must run when the daemon starts.
pub const WHEN_DAEMON: &str = "daemon";

/// Phase for hooks that must run before local job execution.
pub const WHEN_LOCAL: &str = "local";

#[derive(Debug, Error)]
#[error("initialization failed: {0}")]
pub struct InitError(pub String);

impl From<std::io::Error> for InitError {
    fn from(err: std::io::Error) -> Self {
        Self(err.to_string())
    }
}

struct Hook {
    func: Box<dyn FnMut() -> Result<(), InitError> + Send>,
    when: Vec<String>,
    run: bool,
}

/// Ordered startup hooks, each scoped to a set of phases. Hooks run at most
/// once; initialization is idempotent and short-circuits on the first error.
#[derive(Default)]
pub struct Initializers {
    hooks: Vec<Hook>,
}

impl Initializers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a hook for the given phases. An empty phase set runs in
    /// every phase.
    pub fn add<F>(&mut self, when: &[&str], func: F)
    where
        F: FnMut() -> Result<(), InitError> + Send + 'static,
    {
        self.hooks.push(Hook {
            func: Box::new(func),
            when: when.iter().map(|s| s.to_string()).collect(),
            run: false,
        });
    }

    pub fn initialize(&mut self, phases: &[&str]) -> Result<(), InitError> {
        for hook in &mut self.hooks {
            let selected =
                hook.when.is_empty() || hook.when.iter().any(|w| phases.contains(&w.as_str()));
            if hook.run || !selected {
                continue;
            }
            (hook.func)()?;
            hook.run = true;
        }
        Ok(())
    }
}

/// Everything optional subsystems may contribute to the core: job handlers,
/// remote marshallings, daemon routes, SSH handler tables, transports,
/// startup hooks and required directories. Built explicitly in each binary's
/// main, frozen before use; the core names no subsystem.
pub struct Extensions {
    pub jobs: Registry,
    pub remotes: RemoteRegistry,
    pub routes: Vec<RouteSpec>,
    pub handlers: Arc<Handlers>,
    pub transports: HashMap<String, Arc<dyn Transport>>,
    pub initializers: Initializers,
    pub required_directories: RequiredDirectories,
}

impl Extensions {
    pub fn new(handlers: Arc<Handlers>) -> Self {
        Self {
            jobs: Registry::new(),
            remotes: RemoteRegistry::new(),
            routes: Vec::new(),
            handlers,
            transports: HashMap::new(),
            initializers: Initializers::new(),
            required_directories: RequiredDirectories::default(),
        }
    }

    pub fn register_transport(&mut self, name: impl Into<String>, transport: Arc<dyn Transport>) {
        self.transports.insert(name.into(), transport);
    }

    pub fn transport(&self, name: &str) -> Result<Arc<dyn Transport>, InitError> {
        self.transports.get(name).cloned().ok_or_else(|| {
            let mut names: Vec<&str> = self.transports.keys().map(String::as_str).collect();
            names.sort_unstable();
            InitError(format!(
                "no transport defined for '{name}'; valid transports are {names:?}"
            ))
        })
    }

    /// Ensure the contributed directories exist, then run the hooks for the
    /// given phases.
    pub fn initialize(&mut self, phases: &[&str]) -> Result<(), InitError> {
        self.required_directories.ensure()?;
        self.initializers.initialize(phases)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use super::*;

    #[test]
    fn hooks_run_once_per_phase_match() {
        let mut initializers = Initializers::new();
        let daemon_runs = Arc::new(AtomicUsize::new(0));
        let local_runs = Arc::new(AtomicUsize::new(0));
        let always_runs = Arc::new(AtomicUsize::new(0));

        let counter = daemon_runs.clone();
        initializers.add(&[WHEN_DAEMON], move || {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });
        let counter = local_runs.clone();
        initializers.add(&[WHEN_LOCAL], move || {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });
        let counter = always_runs.clone();
        initializers.add(&[], move || {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });

        initializers.initialize(&[WHEN_DAEMON]).unwrap();
        initializers.initialize(&[WHEN_DAEMON]).unwrap();
        initializers.initialize(&[WHEN_LOCAL]).unwrap();

        assert_eq!(daemon_runs.load(Ordering::SeqCst), 1);
        assert_eq!(local_runs.load(Ordering::SeqCst), 1);
        assert_eq!(always_runs.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn errors_short_circuit_and_allow_retry() {
        let mut initializers = Initializers::new();
        let later = Arc::new(AtomicUsize::new(0));

        let mut attempts = 0;
        initializers.add(&[WHEN_LOCAL], move || {
            attempts += 1;
            if attempts == 1 {
                Err(InitError(String::from("transient")))
            } else {
                Ok(())
            }
        });
        let counter = later.clone();
        initializers.add(&[WHEN_LOCAL], move || {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });

        assert!(initializers.initialize(&[WHEN_LOCAL]).is_err());
        assert_eq!(later.load(Ordering::SeqCst), 0);

        initializers.initialize(&[WHEN_LOCAL]).unwrap();
        assert_eq!(later.load(Ordering::SeqCst), 1);
    }
}
