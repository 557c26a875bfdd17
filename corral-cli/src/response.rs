use std::io::{self, Write};

use corral::job::{JobError, Response, ResponseCode};

/// Sink used by the executor's workers: pending entries and structured data
/// are printed through the host's streamer, failures are captured so the
/// worker can report the exit code and message.
pub struct CliResponse<'a> {
    out: &'a mut dyn Write,
    pending: Vec<(String, serde_json::Value)>,
    exit_code: i32,
    message: Option<String>,
    terminal: bool,
}

impl<'a> CliResponse<'a> {
    pub fn new(out: &'a mut dyn Write) -> Self {
        Self {
            out,
            pending: Vec::new(),
            exit_code: 0,
            message: None,
            terminal: false,
        }
    }

    /// Consume the sink, yielding the exit code and the failure message.
    pub fn finish(self) -> (i32, Option<String>) {
        (self.exit_code, self.message)
    }

    fn terminal(&mut self) -> bool {
        if self.terminal {
            log::warn!(target: "cli", "job attempted a second terminal response");
            return false;
        }
        self.terminal = true;
        true
    }

    fn commit_pending(&mut self) {
        for (key, value) in self.pending.drain(..) {
            let value = match value {
                serde_json::Value::String(s) => s,
                other => other.to_string(),
            };
            let _ = writeln!(self.out, "{key}={value}");
        }
    }
}

impl Response for CliResponse<'_> {
    fn success(&mut self, _code: ResponseCode) {
        if self.terminal() {
            self.commit_pending();
        }
    }

    fn success_with_data(&mut self, _code: ResponseCode, data: serde_json::Value) {
        if self.terminal() {
            self.commit_pending();
            match serde_json::to_string_pretty(&data) {
                Ok(rendered) => {
                    let _ = writeln!(self.out, "{rendered}");
                }
                Err(e) => {
                    log::warn!(target: "cli", "unable to render response data: {e}");
                }
            }
        }
    }

    fn success_with_write(
        &mut self,
        _code: ResponseCode,
        _flush: bool,
        _structured: bool,
    ) -> &mut dyn io::Write {
        if self.terminal() {
            self.commit_pending();
        }
        &mut *self.out
    }

    fn write_pending_success(&mut self, key: &str, value: serde_json::Value) {
        if self.terminal {
            log::warn!(target: "cli", "pending write after a terminal response");
            return;
        }
        self.pending.push((key.to_string(), value));
    }

    fn failure(&mut self, err: JobError) {
        if self.terminal() {
            self.exit_code = err.exit_code();
            self.message = Some(err.to_string());
        }
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn pending_entries_print_on_success() {
        let mut out = Vec::new();
        let mut resp = CliResponse::new(&mut out);
        resp.write_pending_success("PortMapping", "8080:41000".into());
        resp.success(ResponseCode::Ok);

        let (code, message) = resp.finish();
        assert_eq!(code, 0);
        assert_eq!(message, None);
        assert_eq!(String::from_utf8(out).unwrap(), "PortMapping=8080:41000\n");
    }

    #[test]
    fn failures_set_the_exit_code_once() {
        let mut out = Vec::new();
        let mut resp = CliResponse::new(&mut out);
        resp.failure(JobError::simple("boom"));
        resp.success(ResponseCode::Ok);

        let (code, message) = resp.finish();
        assert_eq!(code, 1);
        assert_eq!(message.as_deref(), Some("boom"));
    }
}
