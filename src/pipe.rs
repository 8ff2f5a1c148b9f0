//! Byte copy loops between descriptors
//!
//! Two loops share the same termination contract: run until end of input,
//! a read error, or a chunk that cannot be written in full.
//! - [`pump`] copies bytes verbatim
//! - [`filter`] strips CSI sequences on the way through
//!
//! Both are blocking and meant to run on their own OS thread, see
//! [`spawn_detached`].

use std::io::{self, ErrorKind, Read, Write};
use std::thread;

use tokio::sync::oneshot;
use tracing::debug;

use crate::terminal::csi::{CsiFilter, CsiState};

/// Read chunk size for both loops
pub const BUF_SIZE: usize = 512;

/// Why a copy loop stopped
#[derive(Debug)]
pub enum PipeEnd {
    /// Zero-length read
    Eof,
    /// Read failed with something other than `Interrupted`
    ReadFailed(io::Error),
    /// A chunk could not be written in full
    WriteFailed(io::Error),
}

/// Outcome of a finished copy loop
#[derive(Debug)]
pub struct PipeReport {
    pub end: PipeEnd,
    /// Bytes read from the input
    pub bytes_in: u64,
    /// Bytes written to the output
    pub bytes_out: u64,
}

/// Read once, retrying transparently on `Interrupted`.
pub fn read_retrying<R: Read + ?Sized>(input: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    loop {
        match input.read(buf) {
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            other => return other,
        }
    }
}

/// Write a whole chunk and flush it.
///
/// `write_all` already retries `Interrupted` and reports a zero-length
/// write as `WriteZero`, so a short write always surfaces as an error.
pub fn write_chunk<W: Write + ?Sized>(output: &mut W, chunk: &[u8]) -> io::Result<()> {
    output.write_all(chunk)?;
    loop {
        match output.flush() {
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            other => return other,
        }
    }
}

/// Copy `input` to `output` unchanged.
pub fn pump<R: Read + ?Sized, W: Write + ?Sized>(input: &mut R, output: &mut W) -> PipeReport {
    let mut buf = [0u8; BUF_SIZE];
    let mut report = PipeReport {
        end: PipeEnd::Eof,
        bytes_in: 0,
        bytes_out: 0,
    };

    loop {
        let n = match read_retrying(input, &mut buf) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) => {
                report.end = PipeEnd::ReadFailed(e);
                break;
            }
        };
        report.bytes_in += n as u64;

        if let Err(e) = write_chunk(output, &buf[..n]) {
            report.end = PipeEnd::WriteFailed(e);
            break;
        }
        report.bytes_out += n as u64;
    }

    report
}

/// Copy `input` to `output` with every CSI sequence removed.
///
/// Input is read one byte short of [`BUF_SIZE`] so the output chunk,
/// which may carry an ESC withheld from the previous read, still fits.
/// A chunk that filters down to nothing is not written.
pub fn filter<R: Read + ?Sized, W: Write + ?Sized>(input: &mut R, output: &mut W) -> PipeReport {
    let mut csi = CsiFilter::new();
    let mut ibuf = [0u8; BUF_SIZE - 1];
    let mut obuf = Vec::with_capacity(BUF_SIZE);
    let mut report = PipeReport {
        end: PipeEnd::Eof,
        bytes_in: 0,
        bytes_out: 0,
    };

    loop {
        let n = match read_retrying(input, &mut ibuf) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) => {
                report.end = PipeEnd::ReadFailed(e);
                break;
            }
        };
        report.bytes_in += n as u64;

        obuf.clear();
        csi.feed(&ibuf[..n], &mut obuf);
        if obuf.is_empty() {
            continue;
        }

        if let Err(e) = write_chunk(output, &obuf) {
            report.end = PipeEnd::WriteFailed(e);
            break;
        }
        report.bytes_out += obuf.len() as u64;
    }

    if csi.pending_escape() {
        debug!("input ended with an ESC still withheld");
    } else if csi.state() == CsiState::Csi {
        debug!("input ended inside a CSI sequence");
    }

    report
}

/// Run `task` on a named OS thread and detach it.
///
/// The thread is never joined. The returned receiver resolves once the task
/// returns; dropping it is fine. If the thread cannot be created, `None` is
/// returned and the task does not run.
pub fn spawn_detached<F>(name: &str, task: F) -> Option<oneshot::Receiver<PipeReport>>
where
    F: FnOnce() -> PipeReport + Send + 'static,
{
    let (done_tx, done_rx) = oneshot::channel();
    let thread_name = name.to_string();

    let spawned = thread::Builder::new().name(thread_name.clone()).spawn(move || {
        let report = task();
        debug!(
            task = %thread_name,
            end = ?report.end,
            bytes_in = report.bytes_in,
            bytes_out = report.bytes_out,
            "copy task finished"
        );
        let _ = done_tx.send(report);
    });

    match spawned {
        // Dropping the JoinHandle detaches the thread
        Ok(_handle) => Some(done_rx),
        Err(e) => {
            tracing::error!(task = name, "failed to spawn copy thread: {e}");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    /// Reader that yields scripted results, one per call
    struct Scripted {
        steps: Vec<io::Result<Vec<u8>>>,
    }

    impl Scripted {
        fn new(mut steps: Vec<io::Result<Vec<u8>>>) -> Self {
            steps.reverse();
            Self { steps }
        }
    }

    impl Read for Scripted {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            match self.steps.pop() {
                None => Ok(0),
                Some(Ok(data)) => {
                    assert!(data.len() <= buf.len(), "scripted chunk larger than read buffer");
                    buf[..data.len()].copy_from_slice(&data);
                    Ok(data.len())
                }
                Some(Err(e)) => Err(e),
            }
        }
    }

    /// Writer that accepts a fixed number of bytes and then refuses
    struct Limited {
        data: Vec<u8>,
        capacity: usize,
    }

    impl Write for Limited {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            let room = self.capacity - self.data.len();
            let n = room.min(buf.len());
            self.data.extend_from_slice(&buf[..n]);
            Ok(n)
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    fn interrupted() -> io::Error {
        io::Error::new(ErrorKind::Interrupted, "EINTR")
    }

    #[test]
    fn test_pump_copies_verbatim() {
        let input: Vec<u8> = (0..=255u8).cycle().take(5000).collect();
        let mut output = Vec::new();
        let report = pump(&mut Cursor::new(input.clone()), &mut output);

        assert_eq!(output, input);
        assert!(matches!(report.end, PipeEnd::Eof));
        assert_eq!(report.bytes_in, 5000);
        assert_eq!(report.bytes_out, 5000);
    }

    #[test]
    fn test_pump_does_not_touch_escapes() {
        let input = b"\x1b[31mred\x1b[0m".to_vec();
        let mut output = Vec::new();
        pump(&mut Cursor::new(input.clone()), &mut output);
        assert_eq!(output, input);
    }

    #[test]
    fn test_pump_empty_input() {
        let mut output = Vec::new();
        let report = pump(&mut io::empty(), &mut output);
        assert!(output.is_empty());
        assert!(matches!(report.end, PipeEnd::Eof));
    }

    #[test]
    fn test_pump_retries_interrupted_read() {
        let mut input = Scripted::new(vec![
            Ok(b"ab".to_vec()),
            Err(interrupted()),
            Err(interrupted()),
            Ok(b"cd".to_vec()),
        ]);
        let mut output = Vec::new();
        let report = pump(&mut input, &mut output);

        assert_eq!(output, b"abcd");
        assert!(matches!(report.end, PipeEnd::Eof));
    }

    #[test]
    fn test_pump_stops_on_read_error() {
        let mut input = Scripted::new(vec![
            Ok(b"ab".to_vec()),
            Err(io::Error::new(ErrorKind::Other, "EIO")),
            Ok(b"never".to_vec()),
        ]);
        let mut output = Vec::new();
        let report = pump(&mut input, &mut output);

        assert_eq!(output, b"ab");
        assert!(matches!(report.end, PipeEnd::ReadFailed(_)));
    }

    #[test]
    fn test_pump_stops_on_short_write() {
        let mut input = Cursor::new(b"0123456789".to_vec());
        let mut output = Limited {
            data: Vec::new(),
            capacity: 4,
        };
        let report = pump(&mut input, &mut output);

        assert_eq!(output.data, b"0123");
        match report.end {
            PipeEnd::WriteFailed(e) => assert_eq!(e.kind(), ErrorKind::WriteZero),
            other => panic!("expected write failure, got {other:?}"),
        }
        assert_eq!(report.bytes_out, 0);
    }

    #[test]
    fn test_filter_strips_across_reads() {
        let mut input = Scripted::new(vec![
            Ok(b"one \x1b".to_vec()),
            Ok(b"[".to_vec()),
            Ok(b"1;3".to_vec()),
            Ok(b"2mtwo\x1b".to_vec()),
            Ok(b"Dthree".to_vec()),
        ]);
        let mut output = Vec::new();
        let report = filter(&mut input, &mut output);

        assert_eq!(output, b"one two\x1bDthree");
        assert!(matches!(report.end, PipeEnd::Eof));
        assert_eq!(report.bytes_out, output.len() as u64);
    }

    #[test]
    fn test_filter_large_input() {
        let mut input = Vec::new();
        for i in 0..500 {
            input.extend_from_slice(format!("\x1b[{}Grow {}\r\n", i % 80, i).as_bytes());
        }
        let mut output = Vec::new();
        filter(&mut Cursor::new(input), &mut output);

        let text = String::from_utf8(output).unwrap();
        assert!(!text.contains('\x1b'));
        assert!(text.starts_with("row 0\r\n"));
        assert!(text.ends_with("row 499\r\n"));
    }

    #[test]
    fn test_filter_stops_on_write_failure() {
        let mut input = Cursor::new(b"abcdef".to_vec());
        let mut output = Limited {
            data: Vec::new(),
            capacity: 2,
        };
        let report = filter(&mut input, &mut output);
        assert!(matches!(report.end, PipeEnd::WriteFailed(_)));
    }

    #[test]
    fn test_filter_retries_interrupted_read() {
        let mut input = Scripted::new(vec![Err(interrupted()), Ok(b"\x1b[Kok".to_vec())]);
        let mut output = Vec::new();
        filter(&mut input, &mut output);
        assert_eq!(output, b"ok");
    }

    #[tokio::test]
    async fn test_spawn_detached_reports_completion() {
        let done = spawn_detached("test-pump", || {
            let mut output = Vec::new();
            pump(&mut Cursor::new(b"hello".to_vec()), &mut output)
        })
        .expect("thread spawned");

        let report = done.await.expect("task reported");
        assert_eq!(report.bytes_out, 5);
        assert!(matches!(report.end, PipeEnd::Eof));
    }
}
