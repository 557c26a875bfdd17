use std::io::{self, Read, Write};
use std::path::Path;
use std::process::{Command, Stdio};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use once_cell::sync::OnceCell;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SysdError {
    #[error("unit {0} does not exist")]
    NoSuchUnit(String),
    #[error("init system command failed: {0}")]
    CommandFailed(String),
    #[error(transparent)]
    Io(#[from] io::Error),
}

impl SysdError {
    pub fn is_no_such_unit(&self) -> bool {
        matches!(self, Self::NoSuchUnit(_))
    }
}

/// Active and sub state of a unit, as reported by the service manager.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UnitState {
    pub active: String,
    pub sub: String,
}

impl UnitState {
    pub fn running(&self) -> bool {
        self.sub == "running"
    }
}

/// The narrow interface the core uses to talk to the host init system. The
/// real bridge lives outside this crate; jobs only ever see these
/// operations.
pub trait InitSystem: Send + Sync {
    fn start_unit(&self, name: &str) -> Result<(), SysdError>;

    fn stop_unit(&self, name: &str) -> Result<(), SysdError>;

    fn enable_unit_file(&self, path: &Path) -> Result<(), SysdError>;

    fn disable_unit_files(&self, paths: &[&Path]) -> Result<(), SysdError>;

    fn unit_state(&self, name: &str) -> Result<UnitState, SysdError>;

    /// Run a one-shot command under a transient unit.
    fn start_transient_unit(
        &self,
        name: &str,
        description: &str,
        argv: &[String],
        slice: &str,
    ) -> Result<(), SysdError>;

    /// Copy up to `lines` of the unit's journal into `out`, following new
    /// entries until `timeout` elapses.
    fn write_logs_to(
        &self,
        out: &mut dyn Write,
        unit: &str,
        lines: u32,
        timeout: Duration,
    ) -> Result<(), SysdError>;
}

static CONNECTION: OnceCell<Box<dyn InitSystem>> = OnceCell::new();

/// The process-wide init-system connection, created lazily.
pub fn connection() -> &'static dyn InitSystem {
    CONNECTION
        .get_or_init(|| Box::new(Systemctl::default()))
        .as_ref()
}

/// Install a specific implementation before the first [`connection`] call.
pub fn set_connection(conn: Box<dyn InitSystem>) -> Result<(), Box<dyn InitSystem>> {
    CONNECTION.set(conn)
}

/// Talks to systemd by spawning `systemctl`, `systemd-run` and `journalctl`.
#[derive(Default)]
pub struct Systemctl {}

impl Systemctl {
    fn systemctl(&self, args: &[&str]) -> Result<String, SysdError> {
        let output = Command::new("systemctl").args(args).output()?;
        if output.status.success() {
            return Ok(String::from_utf8_lossy(&output.stdout).into_owned());
        }
        let stderr = String::from_utf8_lossy(&output.stderr);
        if stderr.contains("not found") || stderr.contains("not loaded") {
            let unit = args.last().copied().unwrap_or_default();
            return Err(SysdError::NoSuchUnit(unit.to_string()));
        }
        Err(SysdError::CommandFailed(stderr.trim().to_string()))
    }
}

impl InitSystem for Systemctl {
    fn start_unit(&self, name: &str) -> Result<(), SysdError> {
        self.systemctl(&["start", "--no-block", name]).map(|_| ())
    }

    fn stop_unit(&self, name: &str) -> Result<(), SysdError> {
        self.systemctl(&["stop", "--no-block", name]).map(|_| ())
    }

    fn enable_unit_file(&self, path: &Path) -> Result<(), SysdError> {
        self.systemctl(&["enable", &path.display().to_string()])
            .map(|_| ())
    }

    fn disable_unit_files(&self, paths: &[&Path]) -> Result<(), SysdError> {
        let mut args = vec![String::from("disable")];
        args.extend(paths.iter().map(|p| p.display().to_string()));
        let args: Vec<&str> = args.iter().map(String::as_str).collect();
        self.systemctl(&args).map(|_| ())
    }

    fn unit_state(&self, name: &str) -> Result<UnitState, SysdError> {
        let output = self.systemctl(&["show", "-p", "ActiveState", "-p", "SubState", "-p", "LoadState", name])?;
        let mut state = UnitState {
            active: String::new(),
            sub: String::new(),
        };
        for line in output.lines() {
            if let Some(value) = line.strip_prefix("ActiveState=") {
                state.active = value.to_string();
            } else if let Some(value) = line.strip_prefix("SubState=") {
                state.sub = value.to_string();
            } else if let Some(value) = line.strip_prefix("LoadState=") {
                // `show` succeeds for unknown units; the load state tells.
                if value == "not-found" {
                    return Err(SysdError::NoSuchUnit(name.to_string()));
                }
            }
        }
        Ok(state)
    }

    fn start_transient_unit(
        &self,
        name: &str,
        description: &str,
        argv: &[String],
        slice: &str,
    ) -> Result<(), SysdError> {
        let output = Command::new("systemd-run")
            .arg(format!("--unit={name}"))
            .arg(format!("--description={description}"))
            .arg(format!("--slice={slice}"))
            .arg("--remain-after-exit")
            .arg("--")
            .args(argv)
            .output()?;
        if output.status.success() {
            return Ok(());
        }
        Err(SysdError::CommandFailed(
            String::from_utf8_lossy(&output.stderr).trim().to_string(),
        ))
    }

    fn write_logs_to(
        &self,
        out: &mut dyn Write,
        unit: &str,
        lines: u32,
        timeout: Duration,
    ) -> Result<(), SysdError> {
        let mut child = Command::new("journalctl")
            .args(["-u", unit, "-n", &lines.to_string(), "--no-pager", "--follow"])
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()?;
        let mut stdout = child.stdout.take().expect("journalctl stdout is piped");

        let child = Arc::new(Mutex::new(child));
        let killer = Arc::clone(&child);
        thread::spawn(move || {
            thread::sleep(timeout);
            let _ = killer.lock().unwrap().kill();
        });

        // The pipe closes when the follower is killed or exits on its own.
        let mut buffer = [0u8; 4096];
        loop {
            match stdout.read(&mut buffer) {
                Ok(0) => break,
                Ok(n) => out.write_all(&buffer[..n])?,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }
        let _ = child.lock().unwrap().wait();
        Ok(())
    }
}
