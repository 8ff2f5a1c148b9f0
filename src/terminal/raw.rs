//! Raw mode for the invoking terminal
//!
//! Raw mode is only entered when stdin is a terminal. The guard restores the
//! saved attributes exactly once, either through [`RawModeGuard::restore`]
//! or on drop, so early returns and unwinding leave the terminal usable.

use std::io::{stdin, IsTerminal};

use crossterm::terminal::{disable_raw_mode, enable_raw_mode};
use tracing::{debug, warn};

/// Marker for an active raw mode session
#[derive(Debug)]
pub struct RawModeGuard {
    active: bool,
}

pub struct RawMode;

impl RawMode {
    /// Switch stdin to raw mode if it is a terminal.
    ///
    /// Returns `None` when stdin is not a terminal, or when the switch failed
    /// (the session still runs, just without raw input).
    pub fn enter() -> Option<RawModeGuard> {
        if !stdin().is_terminal() {
            debug!("stdin is not a terminal, leaving mode untouched");
            return None;
        }
        Self::enter_unchecked()
    }

    fn enter_unchecked() -> Option<RawModeGuard> {
        // crossterm saves the current attributes and applies cfmakeraw
        match enable_raw_mode() {
            Ok(()) => {
                debug!("raw mode enabled");
                Some(RawModeGuard { active: true })
            }
            Err(e) => {
                warn!("failed to enable raw mode: {e}");
                None
            }
        }
    }
}

impl RawModeGuard {
    /// Restore the saved attributes now.
    pub fn restore(mut self) {
        self.restore_inner();
    }

    fn restore_inner(&mut self) {
        if !self.active {
            return;
        }
        self.active = false;
        match disable_raw_mode() {
            Ok(()) => debug!("terminal mode restored"),
            Err(e) => warn!("failed to restore terminal mode: {e}"),
        }
    }
}

impl Drop for RawModeGuard {
    fn drop(&mut self) {
        self.restore_inner();
    }
}

/// Best-effort restore outside a guard, used by the panic hook.
pub fn force_restore() {
    let _ = disable_raw_mode();
}
