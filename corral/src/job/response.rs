use std::io;

use super::JobError;

/// Success classes a job may terminate with.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ResponseCode {
    Ok,
    Accepted,
}

/// The handle a job writes its outcome into. A sink moves from open, through
/// an optional streaming phase, to terminal: `success*` and `failure` are
/// terminal, pending writes are legal only while open, and implementations
/// ignore anything after the first terminal call with a logged warning.
pub trait Response {
    /// Terminal, no payload.
    fn success(&mut self, code: ResponseCode);

    /// Terminal, with a JSON-serializable value.
    fn success_with_data(&mut self, code: ResponseCode, data: serde_json::Value);

    /// Terminal status decided now; the caller streams bytes until it drops
    /// the writer. With `flush`, headers are committed immediately so the
    /// caller sees progress; with `structured`, the bytes are
    /// newline-delimited JSON records rather than raw output.
    fn success_with_write(
        &mut self,
        code: ResponseCode,
        flush: bool,
        structured: bool,
    ) -> &mut dyn io::Write;

    /// Pre-terminal metadata, such as a freshly allocated port.
    fn write_pending_success(&mut self, key: &str, value: serde_json::Value);

    /// Terminal, with an error.
    fn failure(&mut self, err: JobError);
}
