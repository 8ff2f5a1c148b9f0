//! CLI argument parsing
//!
//! `term-filter [--] program [args...]`. Only the first argument is ever
//! inspected for our own flags; everything from the program name on is
//! handed to the child untouched.

use std::env;
use std::ffi::OsString;

pub const USAGE: &str = "usage:\n\tterm-filter program [args...]";

/// What the process should do
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Command {
    /// Run `argv[0]` with `argv[1..]` under a filtered pty
    Run { argv: Vec<OsString> },
    /// Print usage and exit successfully
    Help,
    /// Print the version and exit successfully
    Version,
    /// No program given
    Missing,
}

/// Parse the process arguments (binary name excluded)
pub fn parse_args() -> Command {
    parse_from(env::args_os().skip(1))
}

pub fn parse_from<I>(args: I) -> Command
where
    I: IntoIterator<Item = OsString>,
{
    let mut iter = args.into_iter().peekable();

    if let Some(first) = iter.peek() {
        match first.to_str() {
            Some("-h") | Some("--help") => return Command::Help,
            Some("-V") | Some("--version") => return Command::Version,
            Some("--") => {
                iter.next(); // consume the separator
            }
            _ => {}
        }
    }

    let argv: Vec<OsString> = iter.collect();
    if argv.is_empty() {
        Command::Missing
    } else {
        Command::Run { argv }
    }
}

pub fn version_string() -> String {
    format!("term-filter {}", env!("CARGO_PKG_VERSION"))
}
