mod app;
mod cli;
mod config;
mod logging;
mod pipe;
mod terminal;

use std::io::{stdout, IsTerminal};
use std::panic;
use std::process;

use crossterm::terminal::size as terminal_size;
use tracing::{info, warn};

use crate::app::{App, HostIo};
use crate::cli::Command;
use crate::config::Config;
use crate::terminal::{SpawnOptions, WindowSize};

fn setup_panic_handler() {
    let original_hook = panic::take_hook();
    panic::set_hook(Box::new(move |panic_info| {
        terminal::raw::force_restore();
        original_hook(panic_info);
    }));
}

/// Size for the child's pty: the real terminal's when there is one
fn initial_size(config: &Config) -> WindowSize {
    if stdout().is_terminal() {
        if let Ok((cols, rows)) = terminal_size() {
            if cols > 0 && rows > 0 {
                return WindowSize { cols, rows };
            }
        }
    }
    config.pty.fallback_size()
}

fn load_config() -> Config {
    match Config::load() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("term-filter: warning: {e:#}, using defaults");
            Config::default()
        }
    }
}

#[tokio::main]
async fn main() {
    let argv = match cli::parse_args() {
        Command::Run { argv } => argv,
        Command::Help => {
            println!("{}", cli::USAGE);
            return;
        }
        Command::Version => {
            println!("{}", cli::version_string());
            return;
        }
        Command::Missing => {
            eprintln!("{}", cli::USAGE);
            process::exit(1);
        }
    };

    let config = load_config();
    if let Err(e) = logging::init(&config.log) {
        eprintln!("term-filter: warning: {e:#}");
    }

    setup_panic_handler();

    let spawn = SpawnOptions {
        size: initial_size(&config),
        term: config.pty.term.clone(),
    };
    info!(program = ?argv[0], args = argv.len() - 1, "starting");

    let code = match App::new(argv, spawn).run(HostIo::inherit()).await {
        Ok(code) => code,
        Err(e) => {
            warn!("setup failed: {e:#}");
            eprintln!("term-filter: {e:#}");
            1
        }
    };

    // Exit directly: the input thread may still be blocked reading stdin
    process::exit(code);
}
