//! Session driver for the CCLoader bridge.
//!
//! [`CcLoader`] owns the port for one identify, read or write session. It
//! resets the bridge board, sends the opening command and then steps the
//! protocol [`Engine`] until the session reaches a terminal state.
//!
//! ```text
//! AwaitingHandshake ──command sent──▶ InExchange ──terminal──▶ Done(Success | Failure)
//!         │
//!         └──command not sent──▶ Done(Failure)
//! ```
//!
//! ## Example
//!
//! ```rust,no_run
//! use ccloader::{BoardKind, CcLoader, NativePort, SerialConfig};
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let port = NativePort::open(&SerialConfig::new("/dev/ttyUSB0", 115200))?;
//!     let mut loader = CcLoader::new(port, BoardKind::Default);
//!
//!     let report = loader.identify(&mut |event| println!("{event:?}"))?;
//!     println!("{:?}", report.outcome);
//!
//!     Ok(())
//! }
//! ```

use std::io::{Read, Write};
use std::thread;
use std::time::{Duration, Instant};

use log::{debug, info, warn};

use crate::engine::{Engine, Event, Image, Step};
use crate::error::{Error, Result};
use crate::port::Port;
use crate::protocol::frame::{BLOCK_SIZE, Frame};
use crate::session::{FailureReason, Mode, Outcome, TransferSession};
use crate::target::chip::{BoardKind, ChipIdentity};

/// Largest block count or start block accepted for a dump.
pub const MAX_DUMP_BLOCKS: u16 = 1024;

/// Delays and timeouts of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timing {
    /// Settle time after the control lines change.
    pub settle: Duration,
    /// Seconds to wait for the sketch to boot before sending the command.
    pub countdown_secs: u32,
    /// Deadline for the ChipId reply body.
    pub chip_id_timeout: Duration,
    /// Deadline for one FlashBlock body.
    pub block_timeout: Duration,
    /// Sleep between polls when no byte is waiting.
    pub poll_interval: Duration,
    /// Longest silence from the bridge before the session gives up.
    pub idle_timeout: Duration,
}

impl Default for Timing {
    fn default() -> Self {
        Self {
            settle: Duration::from_millis(100),
            countdown_secs: 3,
            chip_id_timeout: Duration::from_secs(5),
            block_timeout: Duration::from_secs(10),
            poll_interval: Duration::from_millis(10),
            idle_timeout: Duration::from_secs(30),
        }
    }
}

impl Timing {
    /// Set the settle delay.
    #[must_use]
    pub fn with_settle(mut self, settle: Duration) -> Self {
        self.settle = settle;
        self
    }

    /// Set the boot countdown.
    #[must_use]
    pub fn with_countdown(mut self, secs: u32) -> Self {
        self.countdown_secs = secs;
        self
    }

    /// Set the ChipId reply deadline.
    #[must_use]
    pub fn with_chip_id_timeout(mut self, timeout: Duration) -> Self {
        self.chip_id_timeout = timeout;
        self
    }

    /// Set the FlashBlock deadline.
    #[must_use]
    pub fn with_block_timeout(mut self, timeout: Duration) -> Self {
        self.block_timeout = timeout;
        self
    }

    /// Set the idle poll interval.
    #[must_use]
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Set the silence deadline.
    #[must_use]
    pub fn with_idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = timeout;
        self
    }
}

/// Session-level link state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkState {
    /// Only the opening command may be written.
    AwaitingHandshake,
    /// The engine is being stepped.
    InExchange,
    /// The session has ended.
    Done(Outcome),
}

/// Summary of a finished session.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SessionReport {
    /// Operation performed.
    pub mode: Mode,
    /// How it ended.
    pub outcome: Outcome,
    /// Blocks moved before the end.
    pub blocks_transferred: u32,
    /// Blocks the session set out to move.
    pub total_blocks: u32,
    /// Chip identity, if the bridge reported one.
    pub identity: Option<ChipIdentity>,
    /// Wall-clock time from reset to the end.
    pub elapsed: Duration,
}

/// Validate a dump request before anything touches the port.
pub fn validate_dump(start_block: u16, block_count: u16) -> Result<()> {
    if block_count < 1 || block_count > MAX_DUMP_BLOCKS {
        return Err(Error::Config(format!(
            "Invalid number of blocks to read specified: {block_count}"
        )));
    }
    if start_block > MAX_DUMP_BLOCKS {
        return Err(Error::Config(format!(
            "Invalid starting block specified: {start_block}"
        )));
    }
    Ok(())
}

/// Number of whole blocks in an image of `len` bytes.
///
/// A trailing partial block is dropped, not padded.
pub fn image_blocks(len: u64) -> Result<u32> {
    let block_size = BLOCK_SIZE as u64;
    if len % block_size != 0 {
        warn!(
            "Image size {len} isn't a multiple of {BLOCK_SIZE}, last {} bytes will not be sent",
            len % block_size
        );
    }
    u32::try_from(len / block_size)
        .map_err(|_| Error::Config(format!("Image of {len} bytes is too large")))
}

/// Driver for one CCLoader session.
///
/// A loader runs a single session; the port is closed when it ends,
/// whatever the outcome.
pub struct CcLoader<P: Port> {
    port: P,
    board: BoardKind,
    timing: Timing,
}

impl<P: Port> CcLoader<P> {
    /// Create a loader over an opened port.
    pub fn new(port: P, board: BoardKind) -> Self {
        Self {
            port,
            board,
            timing: Timing::default(),
        }
    }

    /// Override the session timing.
    #[must_use]
    pub fn with_timing(mut self, timing: Timing) -> Self {
        self.timing = timing;
        self
    }

    /// Get a reference to the underlying port.
    pub fn port(&self) -> &P {
        &self.port
    }

    /// Consume the loader and return the underlying port.
    pub fn into_port(self) -> P {
        self.port
    }

    /// Read the chip identity.
    pub fn identify(&mut self, events: &mut dyn FnMut(Event)) -> Result<SessionReport> {
        self.run(
            &Frame::ChipIdRequest,
            TransferSession::identify(),
            Image::None,
            events,
        )
    }

    /// Dump `block_count` blocks starting at `start_block` into `sink`.
    pub fn dump(
        &mut self,
        start_block: u16,
        block_count: u16,
        sink: &mut dyn Write,
        events: &mut dyn FnMut(Event),
    ) -> Result<SessionReport> {
        if let Err(e) = validate_dump(start_block, block_count) {
            self.release();
            return Err(e);
        }
        info!("Block total: {block_count}");
        self.run(
            &Frame::Dump {
                block_count,
                start_block,
            },
            TransferSession::read(u32::from(block_count)),
            Image::Sink(sink),
            events,
        )
    }

    /// Program the whole blocks of a `len`-byte image read from `source`.
    pub fn program(
        &mut self,
        source: &mut dyn Read,
        len: u64,
        verify: bool,
        events: &mut dyn FnMut(Event),
    ) -> Result<SessionReport> {
        let total = match image_blocks(len) {
            Ok(total) => total,
            Err(e) => {
                self.release();
                return Err(e);
            },
        };
        info!("Total blocks: {total} ({len} bytes)");
        if verify {
            info!("Verify enabled (flashing process will take longer)");
        }
        self.run(
            &Frame::Begin { verify },
            TransferSession::write(total, verify),
            Image::Source(source),
            events,
        )
    }

    /// Close the port, logging rather than returning a failure.
    fn release(&mut self) {
        if let Err(e) = self
            .port
            .close()
        {
            warn!("Failed to close {}: {e}", self.port.name());
        } else {
            debug!("Port closed");
        }
    }

    /// Run one session and release the port afterwards.
    fn run(
        &mut self,
        command: &Frame,
        session: TransferSession,
        image: Image<'_>,
        events: &mut dyn FnMut(Event),
    ) -> Result<SessionReport> {
        let result = self.exchange(command, session, image, events);
        self.release();
        result
    }

    /// Hold the board lines, let the sketch boot and drop stale input.
    fn reset_board(&mut self, events: &mut dyn FnMut(Event)) -> Result<()> {
        let (dtr, rts) = (
            self.board
                .dtr_level(),
            self.board
                .rts_level(),
        );
        info!(
            "Device: {} (baud {}, DTR {}, RTS {})",
            self.board,
            self.port.baud_rate(),
            if dtr { "on" } else { "off" },
            if rts { "on" } else { "off" }
        );
        self.port
            .set_control_lines(dtr, rts)?;
        self.port
            .clear_buffers()?;
        thread::sleep(self.timing.settle);

        info!("Waiting for bridge setup...");
        for remaining in (1..=self.timing.countdown_secs).rev() {
            debug!("Remain: {remaining}");
            events(Event::Countdown { remaining });
            thread::sleep(Duration::from_secs(1));
        }

        self.port
            .clear_input()?;
        debug!("Buffer cleared");
        Ok(())
    }

    fn exchange(
        &mut self,
        command: &Frame,
        mut session: TransferSession,
        image: Image<'_>,
        events: &mut dyn FnMut(Event),
    ) -> Result<SessionReport> {
        let start = Instant::now();
        self.reset_board(events)?;

        let mut state = LinkState::AwaitingHandshake;
        debug!("{state:?}");

        info!("Send command: {}", command.opcode());
        state = match self
            .port
            .write_all_bytes(&command.encode())
        {
            Ok(()) => {
                events(Event::CommandSent(command.opcode()));
                info!("Request sent, waiting for response...");
                LinkState::InExchange
            },
            Err(e) => {
                warn!("Failed to send command: {e}");
                session.fail(FailureReason::CommandNotSent);
                LinkState::Done(Outcome::Failed(FailureReason::CommandNotSent))
            },
        };

        let mut engine = Engine::new(&mut self.port, image, self.timing);
        let mut last_frame = Instant::now();
        while state == LinkState::InExchange {
            if crate::is_interrupted_requested() {
                session.fail(FailureReason::Interrupted);
            } else {
                match engine.step(&mut session, events)? {
                    Step::Handled(_) => last_frame = Instant::now(),
                    Step::Ignored(_) => {},
                    Step::Idle if last_frame.elapsed() > self.timing.idle_timeout => {
                        warn!(
                            "No frame from the bridge for {:.0} seconds",
                            self.timing
                                .idle_timeout
                                .as_secs_f64()
                        );
                        session.fail(FailureReason::NoResponse);
                    },
                    Step::Idle => thread::sleep(
                        self.timing
                            .poll_interval,
                    ),
                }
            }

            if let Some(outcome) = session.outcome() {
                state = LinkState::Done(outcome.clone());
            }
        }
        let identity = engine.identity();

        let LinkState::Done(outcome) = state else {
            return Err(Error::Protocol("session left the exchange loop unfinished".into()));
        };

        let elapsed = start.elapsed();
        match &outcome {
            Outcome::Success => info!(
                "{} successfully, time used: {:.0} seconds",
                session.mode(),
                elapsed.as_secs_f64()
            ),
            Outcome::Failed(reason) => warn!("{} failed: {reason}", session.mode()),
        }
        events(Event::Finished(outcome.clone()));

        Ok(SessionReport {
            mode: session.mode(),
            outcome,
            blocks_transferred: session.current_block(),
            total_blocks: session.total_blocks(),
            identity,
            elapsed,
        })
    }
}
