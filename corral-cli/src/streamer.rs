use std::io::{self, Write};

/// Produces one writer per worker. Workers run on their own threads, so the
/// destination must serialize whole-line writes itself, as standard output
/// does.
pub trait MakeWriter: Sync {
    fn make_writer(&self) -> Box<dyn Write + Send>;
}

/// The default destination: the process's standard output.
pub struct Stdout;

impl MakeWriter for Stdout {
    fn make_writer(&self) -> Box<dyn Write + Send> {
        Box::new(io::stdout())
    }
}

/// Buffers a worker's output and emits it one prefixed line at a time.
/// Concurrent workers may interleave lines but never the characters inside
/// one, because every line goes to the destination as a single write. An
/// unterminated tail is flushed with a newline when the streamer is dropped.
pub struct Streamer {
    out: Box<dyn Write + Send>,
    prefix: String,
    buf: Vec<u8>,
}

impl Streamer {
    pub fn new(out: Box<dyn Write + Send>, prefix: impl Into<String>) -> Self {
        Self {
            out,
            prefix: prefix.into(),
            buf: Vec::new(),
        }
    }

    fn emit(&mut self, line: &[u8]) -> io::Result<()> {
        let mut record = Vec::with_capacity(self.prefix.len() + line.len() + 1);
        record.extend_from_slice(self.prefix.as_bytes());
        record.extend_from_slice(line);
        record.push(b'\n');
        self.out.write_all(&record)
    }
}

impl Write for Streamer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.buf.extend_from_slice(buf);
        while let Some(pos) = self.buf.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = self.buf.drain(..=pos).collect();
            self.emit(&line[..line.len() - 1])?;
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.out.flush()
    }
}

impl Drop for Streamer {
    fn drop(&mut self) {
        if !self.buf.is_empty() {
            let tail = std::mem::take(&mut self.buf);
            let _ = self.emit(&tail);
        }
        let _ = self.out.flush();
    }
}

#[cfg(test)]
pub(crate) mod test {
    use std::sync::{Arc, Mutex};

    use super::*;

    /// A destination shared between workers, inspectable afterwards.
    #[derive(Clone, Default)]
    pub struct SharedBuffer(pub Arc<Mutex<Vec<u8>>>);

    impl SharedBuffer {
        pub fn contents(&self) -> String {
            String::from_utf8(self.0.lock().unwrap().clone()).unwrap()
        }
    }

    impl Write for SharedBuffer {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl MakeWriter for SharedBuffer {
        fn make_writer(&self) -> Box<dyn Write + Send> {
            Box::new(self.clone())
        }
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::test::SharedBuffer;
    use super::*;

    #[test]
    fn every_line_carries_the_prefix() {
        let out = SharedBuffer::default();
        let mut streamer = Streamer::new(out.make_writer(), "h1 ");

        streamer.write_all(b"one\ntwo\n").unwrap();
        drop(streamer);

        assert_eq!(out.contents(), "h1 one\nh1 two\n");
    }

    #[test]
    fn lines_split_across_writes_stay_whole() {
        let out = SharedBuffer::default();
        let mut streamer = Streamer::new(out.make_writer(), "h1 ");

        streamer.write_all(b"par").unwrap();
        assert_eq!(out.contents(), "");
        streamer.write_all(b"tial\nnext").unwrap();
        assert_eq!(out.contents(), "h1 partial\n");
        drop(streamer);

        // The unterminated tail is flushed at close.
        assert_eq!(out.contents(), "h1 partial\nh1 next\n");
    }
}
