//! In-memory port used by unit tests.
//!
//! Reads come from a scripted queue and writes are captured. Buffer clears
//! are counted but leave the scripted queue alone, so a whole device reply
//! sequence can be queued before the driver runs its reset sequence.

use std::collections::VecDeque;
use std::io::{self, ErrorKind, Read, Write};

use super::Port;
use crate::error::Result;

pub(crate) struct MockPort {
    pub read_buf: VecDeque<u8>,
    pub write_buf: Vec<u8>,
    pub dtr: Option<bool>,
    pub rts: Option<bool>,
    pub line_history: Vec<(&'static str, bool)>,
    pub clears: usize,
    pub closed: bool,
    pub max_write: Option<usize>,
    read_error: Option<ErrorKind>,
}

impl MockPort {
    pub fn new(response: &[u8]) -> Self {
        Self {
            read_buf: response.iter().copied().collect(),
            write_buf: Vec::new(),
            dtr: None,
            rts: None,
            line_history: Vec::new(),
            clears: 0,
            closed: false,
            max_write: None,
            read_error: None,
        }
    }

    /// Fail every read with `kind` once the scripted bytes run out.
    pub fn with_read_error(mut self, kind: ErrorKind) -> Self {
        self.read_error = Some(kind);
        self
    }

    /// Accept at most `limit` bytes in total, then report a zero-length write.
    pub fn with_write_limit(mut self, limit: usize) -> Self {
        self.max_write = Some(limit);
        self
    }
}

impl Read for MockPort {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.read_buf.is_empty() {
            let kind = self.read_error.unwrap_or(ErrorKind::TimedOut);
            return Err(io::Error::new(kind, "no data"));
        }
        let n = buf.len().min(self.read_buf.len());
        for b in buf.iter_mut().take(n) {
            *b = self.read_buf.pop_front().unwrap();
        }
        Ok(n)
    }
}

impl Write for MockPort {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = match self.max_write {
            Some(limit) => buf.len().min(limit.saturating_sub(self.write_buf.len())),
            None => buf.len(),
        };
        self.write_buf.extend_from_slice(&buf[..n]);
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Port for MockPort {
    fn baud_rate(&self) -> u32 {
        super::DEFAULT_BAUD
    }

    fn bytes_to_read(&mut self) -> Result<u32> {
        Ok(u32::try_from(self.read_buf.len()).unwrap_or(u32::MAX))
    }

    fn clear_buffers(&mut self) -> Result<()> {
        self.clears += 1;
        Ok(())
    }

    fn clear_input(&mut self) -> Result<()> {
        self.clears += 1;
        Ok(())
    }

    fn name(&self) -> &str {
        "mock"
    }

    fn set_dtr(&mut self, level: bool) -> Result<()> {
        self.dtr = Some(level);
        self.line_history.push(("dtr", level));
        Ok(())
    }

    fn set_rts(&mut self, level: bool) -> Result<()> {
        self.rts = Some(level);
        self.line_history.push(("rts", level));
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        self.closed = true;
        Ok(())
    }
}
