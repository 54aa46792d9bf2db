//! Command implementations.
//!
//! Each subcommand is implemented in its own module; session setup, event
//! display and report output are shared here.

pub(crate) mod id;
pub(crate) mod progress;
pub(crate) mod read;
pub(crate) mod write;

use {
    crate::CliError,
    anyhow::{Context, Result},
    ccloader::{
        BoardKind, CcLoader, FailureReason, NativePort, Outcome, SessionReport, Timing,
    },
    console::style,
};

/// Settings shared by every session command.
#[derive(Debug, Clone)]
pub(crate) struct SessionOptions {
    pub port: String,
    pub board: BoardKind,
    pub baud: u32,
    pub timing: Timing,
    pub quiet: bool,
    pub json: bool,
}

impl SessionOptions {
    /// Whether human-readable status lines should be printed.
    pub fn chatty(&self) -> bool {
        !self.quiet
    }
}

/// Open the port and build a loader for it.
pub(crate) fn open_loader(opts: &SessionOptions) -> Result<CcLoader<NativePort>> {
    if opts.chatty() {
        eprintln!(
            "{} Using {} at {} baud ({})",
            style("🔌").cyan(),
            style(&opts.port).cyan(),
            opts.baud,
            opts.board
        );
    }
    let loader = ccloader::open(&opts.port, opts.baud, opts.board)
        .with_context(|| format!("Could not open port {}", opts.port))?;
    Ok(loader.with_timing(opts.timing))
}

/// Print the session report and map interruption to its exit code.
///
/// Handled failures are reported but are not errors.
pub(crate) fn finish(opts: &SessionOptions, report: &SessionReport) -> Result<()> {
    if opts.json {
        let output = serde_json::json!({
            "ok": report.outcome.is_success(),
            "data": report,
        });
        println!(
            "{}",
            serde_json::to_string_pretty(&output)?
        );
    } else if opts.chatty() {
        match &report.outcome {
            Outcome::Success => eprintln!(
                "\n{} {} completed in {:.1}s",
                style("✓").green().bold(),
                report.mode,
                report
                    .elapsed
                    .as_secs_f64()
            ),
            Outcome::Failed(reason) => eprintln!(
                "\n{} {} stopped after {}/{} blocks: {reason}",
                style("✗").red().bold(),
                report.mode,
                report.blocks_transferred,
                report.total_blocks
            ),
        }
    }

    if report.outcome == Outcome::Failed(FailureReason::Interrupted) {
        return Err(CliError::Cancelled.into());
    }
    Ok(())
}
