//! Terminal display of session events.

use {
    ccloader::{Event, Outcome},
    console::style,
    indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle},
};

/// Turns library events into status lines and a block progress bar.
pub(crate) struct Progress {
    bar: ProgressBar,
    chatty: bool,
}

impl Progress {
    pub fn new(chatty: bool) -> Self {
        Self {
            bar: ProgressBar::hidden(),
            chatty,
        }
    }

    fn start_bar(&mut self, total: u32, message: &'static str) {
        if !self.chatty || !crate::use_fancy_output() {
            return;
        }
        let pb = ProgressBar::new(u64::from(total));
        #[allow(clippy::unwrap_used)] // Static template string
        pb.set_style(
            ProgressStyle::default_bar()
                .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}")
                .unwrap()
                .progress_chars("#>-"),
        );
        pb.set_draw_target(ProgressDrawTarget::stderr());
        pb.set_message(message);
        self.bar = pb;
    }

    fn status(&self, line: &str) {
        if self.chatty {
            self.bar
                .suspend(|| eprintln!("{line}"));
        }
    }

    pub fn handle(&mut self, event: Event) {
        match event {
            Event::Countdown { remaining } => {
                self.status(&format!(
                    "{} Waiting for the bridge... {remaining}",
                    style("⏳").yellow()
                ));
            },
            Event::CommandSent(opcode) => {
                self.status(&format!("{} Sent {opcode}", style("→").cyan()));
            },
            Event::ChipIdentified(identity) => {
                self.status(&format!("{} Found {identity}", style("✓").green()));
            },
            Event::DumpStarted { total } => self.start_bar(total, "reading"),
            Event::ProgrammingStarted { total } => self.start_bar(total, "writing"),
            Event::BlockDumped { block, .. } | Event::BlockWritten { block, .. } => {
                self.bar
                    .set_position(u64::from(block));
            },
            Event::ChecksumMismatch {
                block,
                computed,
                received,
            } => {
                self.status(&format!(
                    "{} Block {block}: checksum {computed:04x} != {received:04x}, kept",
                    style("⚠").yellow()
                ));
            },
            Event::Finished(Outcome::Success) => self
                .bar
                .finish_with_message("done"),
            Event::Finished(Outcome::Failed(_)) => self
                .bar
                .abandon(),
        }
    }
}
