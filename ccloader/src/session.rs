//! Transfer session state.
//!
//! A [`TransferSession`] is created once per identify/read/write operation,
//! owned by the driver and lent to the protocol engine for each step. It
//! tracks block progress and records how the session ended.

use std::fmt;

use log::debug;
use thiserror::Error;

/// Operation a session performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Mode {
    /// Read the chip identity.
    Identify,
    /// Dump flash blocks to a sink.
    Read,
    /// Program flash blocks from a source.
    Write,
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Identify => write!(f, "id"),
            Self::Read => write!(f, "read"),
            Self::Write => write!(f, "write"),
        }
    }
}

/// Why a session ended without success.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum FailureReason {
    /// The ChipId reply carried fewer than two bytes.
    #[error("did not receive chip ID ({received} bytes)")]
    NoIdentity {
        /// Bytes received before the timeout.
        received: usize,
    },
    /// A FlashBlock arrived incomplete.
    #[error("incomplete block {block}: got {received} bytes instead of 514")]
    TruncatedBlock {
        /// 1-based number of the block being read.
        block: u32,
        /// Bytes received before the timeout.
        received: usize,
    },
    /// The bridge reported an error before any block was sent.
    #[error("no chip detected")]
    NoChipDetected,
    /// The bridge reported an error after programming started.
    #[error("verify failed")]
    VerifyFailed,
    /// A dumped block could not be stored.
    #[error("failed to write block {block} to file")]
    SinkWrite {
        /// 1-based number of the block being stored.
        block: u32,
    },
    /// The image could not supply the next block.
    #[error("failed to read block {block} from image")]
    SourceRead {
        /// 1-based number of the block being loaded.
        block: u32,
    },
    /// The opening command frame was not fully transmitted.
    #[error("failed to send command")]
    CommandNotSent,
    /// The bridge sent no frame within the idle deadline.
    #[error("timeout waiting for device response")]
    NoResponse,
    /// The embedding application asked to stop.
    #[error("interrupted")]
    Interrupted,
}

/// Final result of a session.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Outcome {
    /// The operation completed.
    Success,
    /// The operation stopped early.
    Failed(FailureReason),
}

impl Outcome {
    /// Whether this is `Success`.
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success)
    }
}

/// Mutable state of one identify/read/write operation.
#[derive(Debug, Clone)]
pub struct TransferSession {
    mode: Mode,
    total_blocks: u32,
    current_block: u32,
    verify_enabled: bool,
    download_started: bool,
    outcome: Option<Outcome>,
}

impl TransferSession {
    fn new(mode: Mode, total_blocks: u32, verify_enabled: bool) -> Self {
        Self {
            mode,
            total_blocks,
            current_block: 0,
            verify_enabled,
            download_started: false,
            outcome: None,
        }
    }

    /// Session that only reads the chip identity.
    pub fn identify() -> Self {
        Self::new(Mode::Identify, 0, false)
    }

    /// Session that dumps `total_blocks` blocks.
    pub fn read(total_blocks: u32) -> Self {
        Self::new(Mode::Read, total_blocks, false)
    }

    /// Session that programs `total_blocks` blocks.
    pub fn write(total_blocks: u32, verify: bool) -> Self {
        Self::new(Mode::Write, total_blocks, verify)
    }

    /// Operation mode.
    pub fn mode(&self) -> Mode {
        self.mode
    }

    /// Blocks the session is expected to move.
    pub fn total_blocks(&self) -> u32 {
        self.total_blocks
    }

    /// Blocks moved so far.
    pub fn current_block(&self) -> u32 {
        self.current_block
    }

    /// Whether the bridge was asked to verify written blocks.
    pub fn verify_enabled(&self) -> bool {
        self.verify_enabled
    }

    /// Whether at least one Data block has been sent.
    pub fn download_started(&self) -> bool {
        self.download_started
    }

    /// Whether every expected block has been moved.
    pub fn is_complete(&self) -> bool {
        self.current_block >= self.total_blocks
    }

    /// Whether the session has ended.
    pub fn is_terminal(&self) -> bool {
        self.outcome
            .is_some()
    }

    /// How the session ended, once it has.
    pub fn outcome(&self) -> Option<&Outcome> {
        self.outcome
            .as_ref()
    }

    /// Completion in whole percent; 100 for an empty session.
    pub fn percent(&self) -> u32 {
        if self.total_blocks == 0 {
            return 100;
        }
        let percent = u64::from(self.current_block) * 100 / u64::from(self.total_blocks);
        u32::try_from(percent).unwrap_or(100)
    }

    pub(crate) fn mark_download_started(&mut self) {
        self.download_started = true;
    }

    /// Count one more block, never past `total_blocks`.
    pub(crate) fn advance(&mut self) -> u32 {
        if self.current_block < self.total_blocks {
            self.current_block += 1;
        }
        self.current_block
    }

    /// Record the outcome. Only the first call has any effect.
    pub(crate) fn finish(&mut self, outcome: Outcome) -> bool {
        if let Some(existing) = &self.outcome {
            debug!("session already ended with {existing:?}, ignoring {outcome:?}");
            return false;
        }
        self.outcome = Some(outcome);
        true
    }

    pub(crate) fn succeed(&mut self) -> bool {
        self.finish(Outcome::Success)
    }

    pub(crate) fn fail(&mut self, reason: FailureReason) -> bool {
        self.finish(Outcome::Failed(reason))
    }
}
