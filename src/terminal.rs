//! Terminal handling module
//!
//! Groups all terminal-related functionality:
//! - ANSI control bytes and the CSI stripper
//! - PTY session management
//! - Raw mode for the invoking terminal

pub mod csi;
pub mod escape;
pub mod pty;
pub mod raw;

pub use pty::{Session, SpawnOptions, WindowSize};
pub use raw::RawMode;
