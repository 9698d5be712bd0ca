//! Live multi-reader capture of a job's standard output.
//!
//! An [`OutputBuffer`] is an unbounded, append-only byte buffer with exactly
//! one writer (the stdout pump of a running job) and any number of readers.
//! Every reader starts at byte zero and observes the identical byte sequence
//! in append order, whether it was created before the first write or after
//! the buffer closed.
//!
//! ## Blocking
//!
//! A reader that catches up with the writer blocks on a condvar until more
//! bytes arrive or the buffer is closed; it never spins and never returns a
//! short "try again" read. End-of-stream (`Ok(0)`) is reported only once the
//! buffer is closed *and* the reader has consumed every byte, and is sticky
//! from then on.
//!
//! ## Locking
//!
//! Appends, the length and the closed flag live under one mutex; readers copy
//! out under the same lock, so a read can never observe a torn append.
//! Handles are cheap clones sharing one allocation.

use std::io::{self, Read, Write};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};

#[derive(Debug, Default)]
struct State {
    bytes: Vec<u8>,
    closed: bool,
}

#[derive(Debug, Default)]
struct Shared {
    state: Mutex<State>,
    grown: Condvar,
}

/// Append-only byte buffer fanned out to any number of readers.
#[derive(Debug, Clone, Default)]
pub struct OutputBuffer {
    shared: Arc<Shared>,
}

impl OutputBuffer {
    /// A fresh buffer, empty and open.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append bytes and wake blocked readers. Returns the count appended.
    ///
    /// Closing does not gate this: the single writer closes its pipe before
    /// the buffer is closed, so a write-after-close cannot happen in practice
    /// and is not rejected.
    pub fn append(&self, bytes: &[u8]) -> usize {
        let mut state = self.lock();
        state.bytes.extend_from_slice(bytes);
        self.shared.grown.notify_all();
        bytes.len()
    }

    /// Mark the buffer closed and wake blocked readers. Idempotent.
    pub fn close(&self) {
        let mut state = self.lock();
        state.closed = true;
        self.shared.grown.notify_all();
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    /// Bytes appended so far.
    pub fn len(&self) -> usize {
        self.lock().bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// A fresh independent reader positioned at byte zero.
    pub fn reader(&self) -> OutputReader {
        OutputReader {
            buffer: self.clone(),
            pos: 0,
        }
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        // A panicked appender cannot leave a torn append behind (extend is
        // the last mutation), so a poisoned lock is still consistent.
        self.shared.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Write for OutputBuffer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        Ok(self.append(buf))
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// One reader's view of an [`OutputBuffer`], from byte zero.
///
/// Readers are independent; each owns its cursor and may be handed to another
/// thread. `read` blocks while the buffer is open and drained.
#[derive(Debug)]
pub struct OutputReader {
    buffer: OutputBuffer,
    pos: usize,
}

impl Read for OutputReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        let mut state = self.buffer.lock();
        loop {
            if self.pos < state.bytes.len() {
                let n = buf.len().min(state.bytes.len() - self.pos);
                buf[..n].copy_from_slice(&state.bytes[self.pos..self.pos + n]);
                self.pos += n;
                return Ok(n);
            }
            if state.closed {
                return Ok(0);
            }
            state = self
                .buffer
                .shared
                .grown
                .wait(state)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::time::Duration;

    fn read_all(mut reader: OutputReader) -> Vec<u8> {
        let mut out = Vec::new();
        reader.read_to_end(&mut out).expect("reader never errors");
        out
    }

    #[test]
    fn readers_after_close_see_identical_content() {
        let buffer = OutputBuffer::new();
        buffer.append(b"test");
        buffer.close();

        assert_eq!(read_all(buffer.reader()), b"test");
        assert_eq!(read_all(buffer.reader()), b"test");
    }

    #[test]
    fn streams_data_written_after_reader_creation() {
        let buffer = OutputBuffer::new();
        let reader = buffer.reader();

        let handle = thread::spawn(move || read_all(reader));

        buffer.append(b"test");
        buffer.close();

        assert_eq!(handle.join().unwrap(), b"test");
    }

    #[test]
    fn streams_buffered_then_live_data() {
        let buffer = OutputBuffer::new();
        buffer.append(b"test1");

        let reader = buffer.reader();
        let handle = thread::spawn(move || read_all(reader));

        buffer.append(b"test2");
        buffer.close();

        assert_eq!(handle.join().unwrap(), b"test1test2");
    }

    #[test]
    fn end_of_stream_is_sticky() {
        let buffer = OutputBuffer::new();
        buffer.append(b"abc");
        buffer.close();

        let mut reader = buffer.reader();
        let mut out = Vec::new();
        reader.read_to_end(&mut out).unwrap();
        assert_eq!(out, b"abc");

        let mut buf = [0u8; 8];
        assert_eq!(reader.read(&mut buf).unwrap(), 0);
        assert_eq!(reader.read(&mut buf).unwrap(), 0);
    }

    #[test]
    fn close_is_idempotent() {
        let buffer = OutputBuffer::new();
        buffer.append(b"x");
        buffer.close();
        buffer.close();
        assert!(buffer.is_closed());
        assert_eq!(read_all(buffer.reader()), b"x");
    }

    #[test]
    fn blocked_reader_is_woken_by_close() {
        let buffer = OutputBuffer::new();
        let reader = buffer.reader();

        let handle = thread::spawn(move || read_all(reader));

        // Give the reader a moment to block on the empty buffer.
        thread::sleep(Duration::from_millis(20));
        buffer.close();

        assert_eq!(handle.join().unwrap(), b"");
    }

    #[test]
    fn interleaved_writes_are_observed_in_order_by_all_readers() {
        let buffer = OutputBuffer::new();

        let early = buffer.reader();
        let early_handle = thread::spawn(move || read_all(early));
        let mut late_handle = None;

        let mut expected = Vec::new();
        for chunk in 0..100u8 {
            let data = [chunk; 17];
            expected.extend_from_slice(&data);
            buffer.append(&data);
            if chunk == 50 {
                // A reader arriving mid-stream still starts at byte zero.
                let late = buffer.reader();
                late_handle = Some(thread::spawn(move || read_all(late)));
            }
        }
        buffer.close();

        assert_eq!(early_handle.join().unwrap(), expected);
        assert_eq!(late_handle.unwrap().join().unwrap(), expected);
        assert_eq!(read_all(buffer.reader()), expected);
    }

    #[test]
    fn write_impl_appends() {
        let mut buffer = OutputBuffer::new();
        assert_eq!(buffer.write(b"hello ").unwrap(), 6);
        write!(buffer, "world").unwrap();
        buffer.close();
        assert_eq!(read_all(buffer.reader()), b"hello world");
    }

    #[test]
    fn len_tracks_appends() {
        let buffer = OutputBuffer::new();
        assert!(buffer.is_empty());
        buffer.append(b"1234");
        assert_eq!(buffer.len(), 4);
    }
}
