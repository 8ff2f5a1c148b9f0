//! term-filter App - session orchestration
//!
//! Lifecycle:
//! - Start the child under a pty (failure: no child ever ran)
//! - Raw mode on the real terminal, if it is one
//! - Two detached copy threads: input → master verbatim, master → output
//!   with CSI sequences stripped
//! - Window size changes of the real terminal follow through to the pty
//! - Short grace period, then reap the child
//! - Restore the terminal and turn the child's status into our exit code
//!
//! The input thread is never joined; it may still be blocked on a read when
//! the process exits. The output thread gets a bounded window after the
//! child is reaped so trailing output can drain.

use std::ffi::OsString;
use std::io::{IsTerminal, Read, Write};
use std::time::Duration;

use anyhow::{Context, Result};
use crossterm::terminal::size as terminal_size;
use portable_pty::ExitStatus;
use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

use crate::pipe::{self, PipeReport};
use crate::terminal::pty::{exit_code_of, ResizeHandle, SessionError, ABNORMAL_EXIT};
use crate::terminal::raw::RawModeGuard;
use crate::terminal::{RawMode, Session, SpawnOptions, WindowSize};

/// Pause before reaping so early diagnostics from the child get through
pub const STARTUP_GRACE: Duration = Duration::from_secs(1);

/// How long to wait for the output thread after the child is reaped
pub const DRAIN_TIMEOUT: Duration = Duration::from_millis(500);

/// The two ends of the relay, on the invoking side
pub struct HostIo {
    pub input: Box<dyn Read + Send>,
    pub output: Box<dyn Write + Send>,
    /// Switch the invoking terminal to raw mode for the session
    pub raw_mode: bool,
}

impl HostIo {
    /// The process's own stdin/stdout
    pub fn inherit() -> Self {
        Self {
            input: Box::new(std::io::stdin()),
            output: Box::new(std::io::stdout()),
            raw_mode: true,
        }
    }
}

pub struct App {
    argv: Vec<OsString>,
    spawn: SpawnOptions,
    grace: Duration,
    drain_timeout: Duration,
}

impl App {
    pub fn new(argv: Vec<OsString>, spawn: SpawnOptions) -> Self {
        Self {
            argv,
            spawn,
            grace: STARTUP_GRACE,
            drain_timeout: DRAIN_TIMEOUT,
        }
    }

    #[cfg(test)]
    pub fn with_grace(mut self, grace: Duration) -> Self {
        self.grace = grace;
        self
    }

    #[cfg(test)]
    pub fn with_drain_timeout(mut self, timeout: Duration) -> Self {
        self.drain_timeout = timeout;
        self
    }

    /// Run the session to completion and return the exit code to use.
    ///
    /// An `Err` means the session could not be set up.
    pub async fn run(self, host: HostIo) -> Result<i32> {
        let HostIo {
            mut input,
            mut output,
            raw_mode,
        } = host;

        let mut session = Session::start(self.argv.as_slice(), &self.spawn)?;
        let mut master_out = session.take_reader().context("pty reader unavailable")?;
        let mut master_in = session.take_writer().context("pty writer unavailable")?;

        let raw_guard = if raw_mode { RawMode::enter() } else { None };

        let input_done = pipe::spawn_detached("term-filter-input", move || {
            pipe::pump(&mut input, &mut master_in)
        });

        let output_done = pipe::spawn_detached("term-filter-output", move || {
            pipe::filter(&mut master_out, &mut output)
        });

        // Fire and forget
        drop(input_done);

        let resizer = if raw_guard.is_some() && std::io::stdout().is_terminal() {
            Some(tokio::spawn(follow_window_size(session.resize_handle())))
        } else {
            None
        };

        tokio::time::sleep(self.grace).await;

        let code = self.reap(session, raw_guard, output_done).await;
        if let Some(task) = resizer {
            task.abort();
        }
        Ok(code)
    }

    async fn reap(
        &self,
        mut session: Session,
        raw_guard: Option<RawModeGuard>,
        output_done: Option<oneshot::Receiver<PipeReport>>,
    ) -> i32 {
        let pid = session.process_id();
        let waited = tokio::task::spawn_blocking(move || {
            let status = session.wait();
            (session, status)
        })
        .await;

        let (session, (code, diagnostic)) = match waited {
            Ok((session, status)) => (Some(session), settle(pid, status)),
            Err(e) => {
                warn!(?pid, "wait task failed: {e}");
                let diagnostic = format!("cannot get program status: {e}");
                (None, (ABNORMAL_EXIT, Some(diagnostic)))
            }
        };

        if let Some(done) = output_done {
            match tokio::time::timeout(self.drain_timeout, done).await {
                Ok(Ok(report)) => debug!(end = ?report.end, "output drained"),
                Ok(Err(_)) => debug!("output task gone"),
                Err(_) => debug!(timeout = ?self.drain_timeout, "output still busy, not waiting"),
            }
        }

        if let Some(guard) = raw_guard {
            guard.restore();
        }
        drop(session);

        // Only print once the terminal is cooked again
        if let Some(msg) = diagnostic {
            eprintln!("term-filter: {msg}");
        }

        code
    }
}

/// Exit code for the outcome of waiting on the child, plus a diagnostic to
/// print when its status could not be obtained.
fn settle(pid: Option<u32>, waited: Result<ExitStatus, SessionError>) -> (i32, Option<String>) {
    match waited {
        Ok(status) => {
            let code = exit_code_of(&status);
            info!(?pid, ?status, code, "child exited");
            (code, None)
        }
        Err(e) => {
            warn!(?pid, "wait failed: {e}");
            (ABNORMAL_EXIT, Some(e.to_string()))
        }
    }
}

/// Forward size changes of the real terminal to the pty until aborted.
async fn follow_window_size(handle: ResizeHandle) {
    let mut winch = match signal(SignalKind::window_change()) {
        Ok(stream) => stream,
        Err(e) => {
            warn!("cannot watch for window size changes: {e}");
            return;
        }
    };

    while winch.recv().await.is_some() {
        match terminal_size() {
            Ok((cols, rows)) if cols > 0 && rows > 0 => {
                let size = WindowSize { cols, rows };
                if handle.size().ok() == Some(size) {
                    continue;
                }
                if let Err(e) = handle.resize(size) {
                    debug!("pty resize failed: {e:#}");
                }
            }
            Ok(_) => {}
            Err(e) => debug!("cannot read terminal size: {e}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{self, Cursor};
    use std::sync::{Arc, Mutex};

    /// Output sink the test can inspect after the writer moved to a thread
    #[derive(Clone, Default)]
    struct SharedBuf(Arc<Mutex<Vec<u8>>>);

    impl SharedBuf {
        fn contents(&self) -> Vec<u8> {
            self.0.lock().unwrap().clone()
        }
    }

    impl Write for SharedBuf {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    fn sh(script: &str) -> App {
        let argv = ["/bin/sh", "-c", script].iter().map(OsString::from).collect();
        App::new(argv, SpawnOptions::default())
            .with_grace(Duration::from_millis(50))
            .with_drain_timeout(Duration::from_secs(2))
    }

    fn host_io(input: &[u8], sink: &SharedBuf) -> HostIo {
        HostIo {
            input: Box::new(Cursor::new(input.to_vec())),
            output: Box::new(sink.clone()),
            raw_mode: false,
        }
    }

    #[tokio::test]
    async fn test_exit_code_propagates() {
        let sink = SharedBuf::default();
        let code = sh("exit 42").run(host_io(b"", &sink)).await.unwrap();
        assert_eq!(code, 42);
    }

    #[tokio::test]
    async fn test_signal_death_is_one() {
        let sink = SharedBuf::default();
        let code = sh("kill -9 $$").run(host_io(b"", &sink)).await.unwrap();
        assert_eq!(code, 1);
    }

    #[tokio::test]
    async fn test_output_is_filtered() {
        let sink = SharedBuf::default();
        let code = sh(r"printf '\033[1;31mred\033[0m plain\033[2K'")
            .run(host_io(b"", &sink))
            .await
            .unwrap();
        assert_eq!(code, 0);

        let text = String::from_utf8_lossy(&sink.contents()).into_owned();
        assert!(text.contains("red plain"), "unexpected output: {text:?}");
        assert!(!text.contains("\x1b["), "CSI left in output: {text:?}");
    }

    #[tokio::test]
    async fn test_input_reaches_child() {
        let sink = SharedBuf::default();
        let code = sh("read line; test \"$line\" = ping")
            .run(host_io(b"ping\n", &sink))
            .await
            .unwrap();
        assert_eq!(code, 0);
    }

    #[tokio::test]
    async fn test_missing_program_is_setup_error() {
        let sink = SharedBuf::default();
        let app = App::new(
            vec![OsString::from("/nonexistent/term-filter-test-program")],
            SpawnOptions::default(),
        );
        let err = app.run(host_io(b"", &sink)).await.unwrap_err();
        assert!(format!("{err:#}").contains("cannot run program"));
        assert!(sink.contents().is_empty());
    }

    #[tokio::test]
    async fn test_input_relayed_verbatim() {
        let dir = tempfile::tempdir().unwrap();
        let received = dir.path().join("received");
        // One read of whatever has arrived, giving up after two seconds
        let script = format!(
            "stty raw -echo min 0 time 20; sleep 0.5; dd bs=64 count=1 of='{}' 2>/dev/null",
            received.display()
        );

        let sink = SharedBuf::default();
        let code = sh(&script).run(host_io(b"abc", &sink)).await.unwrap();
        assert_eq!(code, 0);
        assert_eq!(std::fs::read(&received).unwrap(), b"abc");
    }

    #[test]
    fn test_settle_passes_exit_code_through() {
        let (code, diagnostic) = settle(Some(1), Ok(ExitStatus::with_exit_code(7)));
        assert_eq!(code, 7);
        assert!(diagnostic.is_none());
    }

    #[test]
    fn test_wait_failure_is_abnormal_exit() {
        // ECHILD: someone else already reaped the child
        let err = SessionError::Wait(io::Error::from_raw_os_error(10));
        let (code, diagnostic) = settle(Some(1), Err(err));

        assert_eq!(code, ABNORMAL_EXIT);
        let msg = diagnostic.expect("diagnostic for the user");
        assert!(msg.starts_with("cannot get program status"), "got {msg:?}");
    }
}
