//! Test doubles shared by this crate's tests and by downstream crates that
//! enable the `test` feature.

use std::collections::HashMap;
use std::io::{self, Write};
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::job::{JobError, Response, ResponseCode};
use crate::sysd::{InitSystem, SysdError, UnitState};

/// A buffering sink that records everything a job does to it and enforces
/// the single-terminal-call contract.
#[derive(Default)]
pub struct TestResponse {
    pub code: Option<ResponseCode>,
    pub error: Option<JobError>,
    pub data: Option<serde_json::Value>,
    pub pending: Vec<(String, serde_json::Value)>,
    pub stream: Vec<u8>,
    pub terminal_calls: usize,
}

impl TestResponse {
    fn terminal(&mut self) -> bool {
        self.terminal_calls += 1;
        if self.terminal_calls > 1 {
            log::warn!(target: "test", "job attempted a second terminal response");
            return false;
        }
        true
    }
}

impl Response for TestResponse {
    fn success(&mut self, code: ResponseCode) {
        if self.terminal() {
            self.code = Some(code);
        }
    }

    fn success_with_data(&mut self, code: ResponseCode, data: serde_json::Value) {
        if self.terminal() {
            self.code = Some(code);
            self.data = Some(data);
        }
    }

    fn success_with_write(
        &mut self,
        code: ResponseCode,
        _flush: bool,
        _structured: bool,
    ) -> &mut dyn io::Write {
        if self.terminal() {
            self.code = Some(code);
        }
        &mut self.stream
    }

    fn write_pending_success(&mut self, key: &str, value: serde_json::Value) {
        if self.terminal_calls > 0 {
            log::warn!(target: "test", "pending write after a terminal response");
            return;
        }
        self.pending.push((key.to_string(), value));
    }

    fn failure(&mut self, err: JobError) {
        if self.terminal() {
            self.error = Some(err);
        }
    }
}

/// Shared state of a [`FakeInitSystem`], inspectable after the fact.
#[derive(Default)]
pub struct FakeSysdState {
    pub units: Mutex<HashMap<String, UnitState>>,
    pub started: Mutex<Vec<String>>,
    pub stopped: Mutex<Vec<String>>,
    pub transient: Mutex<Vec<String>>,
    pub logs: Mutex<HashMap<String, String>>,
}

/// An init system that records calls instead of touching the host. Clones
/// share state, so a test can keep one handle and install the other.
#[derive(Clone, Default)]
pub struct FakeInitSystem {
    pub state: Arc<FakeSysdState>,
}

impl FakeInitSystem {
    pub fn add_unit(&self, name: &str, active: &str, sub: &str) {
        self.state.units.lock().unwrap().insert(
            name.to_string(),
            UnitState {
                active: active.to_string(),
                sub: sub.to_string(),
            },
        );
    }
}

impl InitSystem for FakeInitSystem {
    fn start_unit(&self, name: &str) -> Result<(), SysdError> {
        self.state.started.lock().unwrap().push(name.to_string());
        Ok(())
    }

    fn stop_unit(&self, name: &str) -> Result<(), SysdError> {
        self.state.stopped.lock().unwrap().push(name.to_string());
        Ok(())
    }

    fn enable_unit_file(&self, _path: &Path) -> Result<(), SysdError> {
        Ok(())
    }

    fn disable_unit_files(&self, _paths: &[&Path]) -> Result<(), SysdError> {
        Ok(())
    }

    fn unit_state(&self, name: &str) -> Result<UnitState, SysdError> {
        self.state
            .units
            .lock()
            .unwrap()
            .get(name)
            .cloned()
            .ok_or_else(|| SysdError::NoSuchUnit(name.to_string()))
    }

    fn start_transient_unit(
        &self,
        name: &str,
        _description: &str,
        _argv: &[String],
        _slice: &str,
    ) -> Result<(), SysdError> {
        self.state.transient.lock().unwrap().push(name.to_string());
        self.add_unit(name, "inactive", "exited");
        Ok(())
    }

    fn write_logs_to(
        &self,
        out: &mut dyn Write,
        unit: &str,
        _lines: u32,
        _timeout: Duration,
    ) -> Result<(), SysdError> {
        if let Some(logs) = self.state.logs.lock().unwrap().get(unit) {
            out.write_all(logs.as_bytes())?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn only_the_first_terminal_call_counts() {
        let mut resp = TestResponse::default();
        resp.write_pending_success("Ports", "8080:41000".into());
        resp.success(ResponseCode::Accepted);
        resp.failure(JobError::simple("too late"));
        resp.success(ResponseCode::Ok);

        assert_eq!(resp.code, Some(ResponseCode::Accepted));
        assert!(resp.error.is_none());
        assert_eq!(resp.pending.len(), 1);
    }

    #[test]
    fn pending_writes_after_terminal_are_dropped() {
        let mut resp = TestResponse::default();
        resp.success(ResponseCode::Ok);
        resp.write_pending_success("Ports", "8080:41000".into());

        assert!(resp.pending.is_empty());
    }

    #[test]
    fn streaming_fixes_the_code_up_front() {
        let mut resp = TestResponse::default();
        let w = resp.success_with_write(ResponseCode::Ok, true, false);
        w.write_all(b"line\n").unwrap();

        assert_eq!(resp.code, Some(ResponseCode::Ok));
        assert_eq!(resp.stream, b"line\n");
    }
}

/// Install a process-wide fake init system, returning a handle to its state.
/// The first installer wins; later calls return the existing fake.
pub fn fake_sysd() -> FakeInitSystem {
    use once_cell::sync::OnceCell;

    static FAKE: OnceCell<FakeInitSystem> = OnceCell::new();

    FAKE.get_or_init(|| {
        let fake = FakeInitSystem::default();
        let _ = crate::sysd::set_connection(Box::new(fake.clone()));
        fake
    })
    .clone()
}
