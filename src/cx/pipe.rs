//! In-process byte pipe with cancellable reads.
//!
//! [`PipeReader::read`] blocks until data arrives, the writer is dropped
//! (end of stream, `Ok(0)`), or the reading thread's current [`Cx`] is
//! cancelled (`Err(Interrupted)`).
//!
//! ```ignore
//! let (mut tx, rx) = threadtools::cx::pipe();
//! tx.write(b"ping")?;
//! let mut buf = [0u8; 8];
//! assert_eq!(rx.read(&mut buf)?, 4);
//! ```

use super::Cx;
use crate::error::{Error, Result};
use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::io;
use std::sync::Arc;

#[derive(Default)]
struct PipeState {
    buf: VecDeque<u8>,
    writer_closed: bool,
    reader_closed: bool,
}

#[derive(Default)]
struct PipeShared {
    state: Mutex<PipeState>,
    readable: Condvar,
}

/// Creates a connected writer/reader pair.
#[must_use]
pub fn pipe() -> (PipeWriter, PipeReader) {
    let shared = Arc::new(PipeShared::default());
    (
        PipeWriter {
            shared: Arc::clone(&shared),
        },
        PipeReader { shared },
    )
}

/// The writing half of a [`pipe`].
pub struct PipeWriter {
    shared: Arc<PipeShared>,
}

impl PipeWriter {
    /// Appends `data` to the pipe and wakes the reader.
    ///
    /// Fails with a broken-pipe error once the reader has been dropped.
    pub fn write(&self, data: &[u8]) -> Result<usize> {
        let mut state = self.shared.state.lock();
        if state.reader_closed {
            return Err(io::Error::from(io::ErrorKind::BrokenPipe).into());
        }
        state.buf.extend(data);
        drop(state);
        self.shared.readable.notify_all();
        Ok(data.len())
    }
}

impl Drop for PipeWriter {
    fn drop(&mut self) {
        self.shared.state.lock().writer_closed = true;
        self.shared.readable.notify_all();
    }
}

/// The reading half of a [`pipe`].
pub struct PipeReader {
    shared: Arc<PipeShared>,
}

impl PipeReader {
    /// Reads available bytes into `buf`, blocking until at least one byte is
    /// available or the writer is gone.
    pub fn read(&self, buf: &mut [u8]) -> Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        let cx = Cx::current();
        let shared = Arc::clone(&self.shared);
        let _registration = cx.token().on_cancel(move || {
            let _state = shared.state.lock();
            shared.readable.notify_all();
        });

        let mut state = self.shared.state.lock();
        loop {
            if !state.buf.is_empty() {
                let n = buf.len().min(state.buf.len());
                for (slot, byte) in buf.iter_mut().zip(state.buf.drain(..n)) {
                    *slot = byte;
                }
                return Ok(n);
            }
            if state.writer_closed {
                return Ok(0);
            }
            if cx.is_cancel_requested() {
                crate::tracing_compat::debug!(task = %cx.task_id(), "pipe read interrupted");
                return Err(Error::interrupted());
            }
            self.shared.readable.wait(&mut state);
        }
    }
}

impl Drop for PipeReader {
    fn drop(&mut self) {
        self.shared.state.lock().reader_closed = true;
    }
}

impl io::Read for PipeReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        Self::read(self, buf).map_err(io::Error::other)
    }
}

impl io::Write for PipeWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        Self::write(self, buf).map_err(io::Error::other)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
