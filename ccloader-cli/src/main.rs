//! ccloader CLI - Command-line tool for the CCLoader CC253x flasher.
//!
//! ## Features
//!
//! - Read the chip ID, revision and IEEE address
//! - Dump flash blocks to a file
//! - Program a binary image with optional verification
//! - Configuration files and environment variable support

use anyhow::Result;
use clap::{Parser, Subcommand};
use console::style;
use env_logger::Env;
use log::debug;
use std::env;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use thiserror::Error;

mod commands;
mod config;

use ccloader::BoardKind;
use commands::SessionOptions;
use config::Config;

/// Whether stderr is a terminal (set once at startup).
static STDERR_IS_TTY: AtomicBool = AtomicBool::new(true);

/// Check if progress bars should be drawn (TTY and colors enabled).
fn use_fancy_output() -> bool {
    STDERR_IS_TTY.load(Ordering::Relaxed) && console::colors_enabled_stderr()
}

/// Errors with a dedicated exit code.
#[derive(Debug, Error)]
pub(crate) enum CliError {
    /// Bad arguments or parameter values.
    #[error("{0}")]
    Usage(String),
    /// Bad or unreadable configuration.
    #[error("{0}")]
    Config(String),
    /// Stopped by Ctrl-C.
    #[error("Operation cancelled")]
    Cancelled,
}

impl CliError {
    fn exit_code(&self) -> u8 {
        match self {
            Self::Usage(_) | Self::Config(_) => 1,
            Self::Cancelled => 130,
        }
    }
}

/// ccloader - Flash CC253x/CC254x chips through an Arduino running CCLoader.
///
/// Environment variables:
///   CCLOADER_BAUD   - Serial baud rate (default: 115200)
#[derive(Parser)]
#[command(name = "ccloader")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
#[command(after_help = "Example: ccloader /dev/ttyACM0 1 write router.bin 1")]
struct Cli {
    /// Serial port of the Arduino (e.g. /dev/ttyACM0 or COM3).
    port: String,

    /// Board type: 0 = Default (e.g. UNO), 1 = Leonardo.
    #[arg(value_parser = clap::value_parser!(u8).range(0..=1))]
    board: u8,

    /// Baud rate of the bridge sketch.
    #[arg(short, long, global = true, env = "CCLOADER_BAUD")]
    baud: Option<u32>,

    /// Seconds to wait for the sketch to boot before sending the command.
    #[arg(long, global = true, value_name = "SECS")]
    countdown: Option<u32>,

    /// Verbose output level (-v, -vv for increasing detail).
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Quiet mode (suppress non-essential output).
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Print the session report as JSON to stdout.
    #[arg(long, global = true)]
    json: bool,

    /// Path to a configuration file.
    #[arg(long = "config", global = true, value_name = "PATH")]
    config_path: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

/// Available commands.
#[derive(Subcommand)]
enum Commands {
    /// Read the chip ID, revision and IEEE address.
    Id,

    /// Dump flash blocks to a file.
    Read {
        /// Destination file (created or truncated).
        file: PathBuf,

        /// First block to read (0-1024).
        start_block: u16,

        /// Number of 512-byte blocks to read (1-1024).
        block_count: u16,
    },

    /// Program a binary image.
    Write {
        /// Binary image; a trailing partial block is not written.
        file: PathBuf,

        /// 1 to verify each block on the chip, 0 to skip.
        #[arg(value_parser = clap::value_parser!(u8).range(0..=1))]
        verify: Option<u8>,
    },
}

fn main() -> ExitCode {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            let _ = e.print();
            return if e.use_stderr() {
                ExitCode::from(1)
            } else {
                ExitCode::SUCCESS
            };
        },
    };

    // --- NO_COLOR and TTY detection ---
    let stderr_is_tty = console::Term::stderr().is_term();
    STDERR_IS_TTY.store(stderr_is_tty, Ordering::Relaxed);
    if env::var("NO_COLOR").is_ok() || !stderr_is_tty {
        console::set_colors_enabled(false);
        console::set_colors_enabled_stderr(false);
    }

    init_logging(&cli);

    match run(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            let code = e
                .downcast_ref::<CliError>()
                .map_or(1, CliError::exit_code);
            if cli.json {
                let output = serde_json::json!({
                    "ok": false,
                    "error": format!("{e:#}"),
                });
                println!("{output}");
            }
            eprintln!("{} {e:#}", style("Error:").red().bold());
            ExitCode::from(code)
        },
    }
}

/// Setup logging based on verbosity.
fn init_logging(cli: &Cli) {
    let log_level = if cli.quiet {
        "warn"
    } else {
        match cli.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    };

    env_logger::Builder::from_env(Env::default().default_filter_or(log_level))
        .format_target(cli.verbose >= 2)
        .format_timestamp(if cli.verbose >= 2 {
            Some(env_logger::TimestampPrecision::Millis)
        } else {
            None
        })
        .init();

    debug!(
        "ccloader v{} (verbose level: {})",
        env!("CARGO_PKG_VERSION"),
        cli.verbose
    );
}

/// Route Ctrl-C into the library's session loop.
fn install_interrupt_handler() {
    let interrupted = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&interrupted);
    if let Err(e) = ctrlc::set_handler(move || flag.store(true, Ordering::SeqCst)) {
        debug!("Failed to install Ctrl-C handler: {e}");
        return;
    }
    ccloader::set_interrupt_checker(move || interrupted.load(Ordering::SeqCst));
}

fn run(cli: &Cli) -> Result<()> {
    let config = if let Some(ref path) = cli.config_path {
        Config::load_from_path(path)?
    } else {
        Config::load()
    };

    let board = BoardKind::from_index(cli.board)
        .ok_or_else(|| CliError::Usage(format!("Invalid board type: {}", cli.board)))?;
    let options = SessionOptions {
        port: cli
            .port
            .clone(),
        board,
        baud: config.baud(cli.baud),
        timing: config.timing(cli.countdown),
        quiet: cli.quiet,
        json: cli.json,
    };
    debug!("Session options: {options:?}");

    install_interrupt_handler();

    match &cli.command {
        Commands::Id => commands::id::cmd_id(&options),
        Commands::Read {
            file,
            start_block,
            block_count,
        } => commands::read::cmd_read(&options, file, *start_block, *block_count),
        Commands::Write { file, verify } => {
            let verify = verify.map_or_else(|| config.verify(), |v| v == 1);
            commands::write::cmd_write(&options, file, verify)
        },
    }
}
