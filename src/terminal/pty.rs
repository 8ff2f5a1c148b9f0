//! Pseudo-terminal session
//!
//! Opens a pty pair, spawns the target program on the slave side and hands
//! back the master as two one-way handles: a reader for child output and a
//! writer for child input. The spawn makes the child a session leader with
//! the slave as its controlling terminal (setsid, then TIOCSCTTY, then exec);
//! `portable-pty` performs that sequence in the forked child.

use std::io::{self, Read, Write};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use portable_pty::{
    native_pty_system, Child, ChildKiller, CommandBuilder, ExitStatus, MasterPty, PtySize,
};
use thiserror::Error;
use tracing::{debug, info};

/// Exit code used when the child did not exit normally or its status is unknown
pub const ABNORMAL_EXIT: i32 = 1;

#[derive(Error, Debug)]
pub enum SessionError {
    #[error("no program given")]
    NoProgram,

    #[error("failed to open pty: {0}")]
    Open(String),

    #[error("cannot run program {program}: {reason}")]
    Spawn { program: String, reason: String },

    #[error("failed to get pty {0} handle: {1}")]
    Handle(&'static str, String),

    #[error("cannot get program status: {0}")]
    Wait(#[source] io::Error),
}

/// Window size given to the pty at creation
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct WindowSize {
    pub cols: u16,
    pub rows: u16,
}

impl Default for WindowSize {
    fn default() -> Self {
        Self { cols: 80, rows: 24 }
    }
}

impl From<WindowSize> for PtySize {
    fn from(size: WindowSize) -> Self {
        PtySize {
            rows: size.rows,
            cols: size.cols,
            pixel_width: 0,
            pixel_height: 0,
        }
    }
}

/// How to launch the child
#[derive(Clone, Debug, Default)]
pub struct SpawnOptions {
    pub size: WindowSize,
    /// Override for the child's `TERM`; inherited when `None`
    pub term: Option<String>,
}

/// A running child attached to a pty.
///
/// The parent's copy of the slave is released as soon as the child has been
/// spawned, so the master reader sees end-of-file (or EIO) once the child
/// and everything it started have closed the terminal.
pub struct Session {
    master: Arc<Mutex<Box<dyn MasterPty + Send>>>,
    child: Box<dyn Child + Send + Sync>,
    reader: Option<Box<dyn Read + Send>>,
    writer: Option<MasterWriter>,
    /// Keeps the master writer open until the session is dropped
    _input: MasterWriter,
    slave_path: Option<PathBuf>,
    program: String,
}

impl Session {
    /// Spawn `argv[0]` with the remaining arguments under a fresh pty.
    ///
    /// Nothing is spawned if any step before the fork fails, and every
    /// handle opened so far is released before the error is returned.
    pub fn start<S: AsRef<std::ffi::OsStr>>(
        argv: &[S],
        options: &SpawnOptions,
    ) -> Result<Self, SessionError> {
        let (program, args) = argv.split_first().ok_or(SessionError::NoProgram)?;
        let program_name = program.as_ref().to_string_lossy().into_owned();

        let pair = native_pty_system()
            .openpty(options.size.into())
            .map_err(|e| SessionError::Open(format!("{e:#}")))?;

        let slave_path = slave_path_of(&*pair.master);

        let mut cmd = CommandBuilder::new(program);
        cmd.args(args);

        if let Ok(cwd) = std::env::current_dir() {
            cmd.cwd(cwd);
        }
        if let Some(term) = &options.term {
            cmd.env("TERM", term);
        }

        let child = pair
            .slave
            .spawn_command(cmd)
            .map_err(|e| SessionError::Spawn {
                program: program_name.clone(),
                reason: format!("{e:#}"),
            })?;

        // The parent never touches the slave again
        drop(pair.slave);

        let master = pair.master;
        let handles = master
            .try_clone_reader()
            .map_err(|e| SessionError::Handle("reader", format!("{e:#}")))
            .and_then(|reader| {
                let writer = master
                    .take_writer()
                    .map_err(|e| SessionError::Handle("writer", format!("{e:#}")))?;
                Ok((reader, writer))
            });
        let (reader, writer) = match handles {
            Ok(handles) => handles,
            Err(e) => {
                discard_child(child);
                return Err(e);
            }
        };
        let input = MasterWriter::new(writer);

        info!(
            program = %program_name,
            pid = ?child.process_id(),
            slave = ?slave_path,
            cols = options.size.cols,
            rows = options.size.rows,
            "session started"
        );

        Ok(Self {
            master: Arc::new(Mutex::new(master)),
            child,
            reader: Some(reader),
            writer: Some(input.clone()),
            _input: input,
            slave_path,
            program: program_name,
        })
    }

    pub fn process_id(&self) -> Option<u32> {
        self.child.process_id()
    }

    /// Read half of the master (child output). Available once.
    pub fn take_reader(&mut self) -> Option<Box<dyn Read + Send>> {
        self.reader.take()
    }

    /// Write half of the master (child input). Available once.
    pub fn take_writer(&mut self) -> Option<MasterWriter> {
        self.writer.take()
    }

    /// Handle for resizing the pty from another task.
    pub fn resize_handle(&self) -> ResizeHandle {
        ResizeHandle {
            master: Arc::clone(&self.master),
            slave_path: self.slave_path.clone(),
        }
    }

    /// Block until the child terminates.
    pub fn wait(&mut self) -> Result<ExitStatus, SessionError> {
        let status = self.child.wait().map_err(SessionError::Wait)?;
        debug!(program = %self.program, ?status, "child reaped");
        Ok(status)
    }
}

/// Child input half of the master.
///
/// Clones share one pty writer. Closing that writer injects a newline and
/// the EOF character into the child's input, so it stays open until the
/// session and every clone are gone.
#[derive(Clone)]
pub struct MasterWriter {
    inner: Arc<Mutex<Box<dyn Write + Send>>>,
}

impl MasterWriter {
    fn new(writer: Box<dyn Write + Send>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(writer)),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Box<dyn Write + Send>> {
        self.inner.lock().unwrap_or_else(|p| p.into_inner())
    }
}

impl Write for MasterWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.lock().write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.lock().flush()
    }
}

/// Resizes the pty while the child runs.
///
/// Only window size changes go through here; the master's data path is the
/// reader and writer taken from [`Session`].
#[derive(Clone)]
pub struct ResizeHandle {
    master: Arc<Mutex<Box<dyn MasterPty + Send>>>,
    slave_path: Option<PathBuf>,
}

impl ResizeHandle {
    pub fn resize(&self, size: WindowSize) -> anyhow::Result<()> {
        let master = self.master.lock().unwrap_or_else(|p| p.into_inner());
        master.resize(size.into())?;
        debug!(slave = ?self.slave_path, cols = size.cols, rows = size.rows, "pty resized");
        Ok(())
    }

    pub fn size(&self) -> anyhow::Result<WindowSize> {
        let master = self.master.lock().unwrap_or_else(|p| p.into_inner());
        let size = master.get_size()?;
        Ok(WindowSize {
            cols: size.cols,
            rows: size.rows,
        })
    }
}

/// Slave device path, read from the master's procfs fdinfo (`tty-index`).
fn slave_path_of(master: &(dyn MasterPty + Send)) -> Option<PathBuf> {
    let fd = master.as_raw_fd()?;
    let info = std::fs::read_to_string(format!("/proc/self/fdinfo/{fd}")).ok()?;
    let index = info
        .lines()
        .find_map(|line| line.strip_prefix("tty-index:"))?
        .trim();
    Some(PathBuf::from(format!("/dev/pts/{index}")))
}

/// Kill and reap a child that will never be handed out.
fn discard_child(mut child: Box<dyn Child + Send + Sync>) {
    let pid = child.process_id();
    if let Err(e) = child.kill() {
        debug!(?pid, "kill failed: {e}");
    }
    if let Err(e) = child.wait() {
        debug!(?pid, "reap failed: {e}");
    }
}

/// Map a child's termination to this process's exit code.
///
/// A normal exit keeps its code. portable-pty reports death by signal as a
/// non-zero code of 1, which is also [`ABNORMAL_EXIT`].
pub fn exit_code_of(status: &ExitStatus) -> i32 {
    i32::try_from(status.exit_code()).unwrap_or(ABNORMAL_EXIT)
}
