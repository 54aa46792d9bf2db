//! Protocol engine.
//!
//! The engine turns one received opcode into at most one round of protocol
//! work: read the opcode's body, validate it, advance the
//! [`TransferSession`] and, for writes, answer with the next frame.
//!
//! ```text
//!   poll 1 byte ──none──▶ Idle
//!        │
//!        ▼
//!   CHIP_ID ──▶ read 10 B (5 s) ──▶ identity ──▶ done if Identify
//!   FLASH_BLOCK ──▶ read 514 B (10 s) ──▶ checksum (warn only) ──▶ sink
//!   RESPONSE ──▶ all sent? END : read 512 B from source ──▶ DATA
//!   ERROR ──▶ verify failed / no chip
//!   other ──▶ ignored
//! ```
//!
//! The engine never loops across opcodes and never blocks waiting for an
//! opcode; the caller decides how often to step it.

use std::io::{Read, Write};

use log::{debug, error, info, trace, warn};

use crate::error::{Error, Result};
use crate::flasher::Timing;
use crate::port::Port;
use crate::protocol::frame::{BLOCK_BODY_LEN, BLOCK_SIZE, Block, CHIP_ID_BODY_LEN, Frame, Opcode};
use crate::session::{FailureReason, Mode, Outcome, TransferSession};
use crate::target::chip::ChipIdentity;

/// Notifications emitted while a session runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    /// Seconds left before the command is sent.
    Countdown {
        /// Remaining seconds.
        remaining: u32,
    },
    /// The opening command frame went out.
    CommandSent(Opcode),
    /// The bridge reported the chip identity.
    ChipIdentified(ChipIdentity),
    /// The first FlashBlock of a dump arrived.
    DumpStarted {
        /// Blocks requested.
        total: u32,
    },
    /// A dumped block was stored.
    BlockDumped {
        /// 1-based block number.
        block: u32,
        /// Blocks requested.
        total: u32,
    },
    /// A dumped block's checksum did not match; the block was kept.
    ChecksumMismatch {
        /// 1-based block number.
        block: u32,
        /// Checksum computed over the payload.
        computed: u16,
        /// Checksum sent by the bridge.
        received: u16,
    },
    /// The first Data block is about to be sent.
    ProgrammingStarted {
        /// Blocks to program.
        total: u32,
    },
    /// A Data block was sent.
    BlockWritten {
        /// 1-based block number.
        block: u32,
        /// Blocks to program.
        total: u32,
        /// Whole-percent progress.
        percent: u32,
    },
    /// The session ended.
    Finished(Outcome),
}

/// Image the session reads from or writes to.
pub enum Image<'a> {
    /// Identify sessions move no blocks.
    None,
    /// Blocks to program.
    Source(&'a mut dyn Read),
    /// Destination for dumped blocks.
    Sink(&'a mut dyn Write),
}

/// Result of a single engine step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    /// No byte was waiting.
    Idle,
    /// An opcode was processed.
    Handled(Opcode),
    /// A byte arrived that is not meaningful here.
    Ignored(u8),
}

/// Protocol state machine bound to one port and one image.
pub struct Engine<'p, 'i, P: Port> {
    port: &'p mut P,
    image: Image<'i>,
    timing: Timing,
    identity: Option<ChipIdentity>,
}

impl<'p, 'i, P: Port> Engine<'p, 'i, P> {
    /// Create an engine over `port`.
    pub fn new(port: &'p mut P, image: Image<'i>, timing: Timing) -> Self {
        Self {
            port,
            image,
            timing,
            identity: None,
        }
    }

    /// Last identity reported by the bridge.
    pub fn identity(&self) -> Option<ChipIdentity> {
        self.identity
    }

    /// Process at most one opcode.
    ///
    /// Returns `Err` only for transport failures. Protocol failures end the
    /// session through [`TransferSession`] instead.
    pub fn step(
        &mut self,
        session: &mut TransferSession,
        events: &mut dyn FnMut(Event),
    ) -> Result<Step> {
        if session.is_terminal() {
            return Ok(Step::Idle);
        }

        let Some(byte) = self
            .port
            .poll_byte()?
        else {
            return Ok(Step::Idle);
        };

        let Some(opcode) = Opcode::from_u8(byte) else {
            trace!("ignoring noise byte 0x{byte:02X}");
            return Ok(Step::Ignored(byte));
        };

        match (opcode, session.mode()) {
            (Opcode::ChipId, _) => self.on_chip_id(session, events)?,
            (Opcode::FlashBlock, Mode::Read) => self.on_flash_block(session, events)?,
            (Opcode::Response, Mode::Write) => self.on_response(session, events)?,
            (Opcode::Error, _) => Self::on_error(session),
            (opcode, mode) => {
                debug!("ignoring {opcode} in {mode} session");
                return Ok(Step::Ignored(byte));
            },
        }

        Ok(Step::Handled(opcode))
    }

    fn on_chip_id(
        &mut self,
        session: &mut TransferSession,
        events: &mut dyn FnMut(Event),
    ) -> Result<()> {
        let mut buf = [0u8; CHIP_ID_BODY_LEN];
        let n = self
            .port
            .read_with_timeout(
                &mut buf,
                self.timing
                    .chip_id_timeout,
                self.timing
                    .poll_interval,
            )?;

        if n < 2 {
            warn!("Did not receive chip ID ({n})");
            session.fail(FailureReason::NoIdentity { received: n });
            return Ok(());
        }
        if n < CHIP_ID_BODY_LEN {
            debug!("Chip ID reply carried {n} bytes, IEEE address not available");
        }

        let Frame::ChipId(identity) = Frame::decode(Opcode::ChipId, &buf[..n])? else {
            return Err(Error::Protocol("ChipId body did not decode".into()));
        };

        info!("Chip ID: 0x{:02x} ({})", identity.chip_id, identity.model);
        info!("Chip Revision: 0x{:02x}", identity.revision);
        if let Some(address) = identity.address {
            info!("IEEE Address: {address}");
        }

        self.identity = Some(identity);
        events(Event::ChipIdentified(identity));

        if session.mode() == Mode::Identify {
            session.succeed();
        }
        Ok(())
    }

    fn on_flash_block(
        &mut self,
        session: &mut TransferSession,
        events: &mut dyn FnMut(Event),
    ) -> Result<()> {
        let total = session.total_blocks();
        let block_no = session.current_block() + 1;
        if block_no == 1 {
            info!("Reading flash...");
            events(Event::DumpStarted { total });
        }

        let mut buf = [0u8; BLOCK_BODY_LEN];
        let n = self
            .port
            .read_with_timeout(
                &mut buf,
                self.timing
                    .block_timeout,
                self.timing
                    .poll_interval,
            )?;
        if n < BLOCK_BODY_LEN {
            warn!("Incomplete block {block_no}: got {n} bytes instead of {BLOCK_BODY_LEN}");
            session.fail(FailureReason::TruncatedBlock {
                block: block_no,
                received: n,
            });
            return Ok(());
        }

        let block = Block::from_body(&buf)?;
        if !block.is_valid() {
            warn!(
                "Block {block_no}: checksum mismatch: {:04x} vs {:04x}",
                block.computed_checksum(),
                block.checksum()
            );
            events(Event::ChecksumMismatch {
                block: block_no,
                computed: block.computed_checksum(),
                received: block.checksum(),
            });
        }

        let Image::Sink(sink) = &mut self.image else {
            return Err(Error::Config("read session has no destination".into()));
        };
        // A block only counts once the sink has accepted all of it
        if let Err(e) = sink
            .write_all(block.payload())
            .and_then(|()| sink.flush())
        {
            error!("Failed to write block {block_no} to file: {e}");
            session.fail(FailureReason::SinkWrite { block: block_no });
            return Ok(());
        }

        let current = session.advance();
        debug!("Stored block {current}/{total}");
        events(Event::BlockDumped {
            block: current,
            total,
        });

        if session.is_complete() {
            info!("Flash dump complete");
            session.succeed();
        }
        Ok(())
    }

    fn on_response(
        &mut self,
        session: &mut TransferSession,
        events: &mut dyn FnMut(Event),
    ) -> Result<()> {
        let total = session.total_blocks();
        if session.current_block() == total {
            debug!("All {total} blocks sent, sending END");
            self.port
                .write_all_bytes(&Frame::End.encode())?;
            session.succeed();
            return Ok(());
        }

        let block_no = session.current_block() + 1;
        if block_no == 1 {
            info!("Begin programming...");
            events(Event::ProgrammingStarted { total });
        }
        session.mark_download_started();

        let Image::Source(source) = &mut self.image else {
            return Err(Error::Config("write session has no source image".into()));
        };
        let mut payload = [0u8; BLOCK_SIZE];
        if let Err(e) = source.read_exact(&mut payload) {
            error!("Failed to read block {block_no} from image: {e}");
            session.fail(FailureReason::SourceRead { block: block_no });
            return Ok(());
        }

        let frame = Frame::Data(Block::new(payload));
        self.port
            .write_all_bytes(&frame.encode())?;

        let current = session.advance();
        let percent = session.percent();
        debug!("Sent block {current}/{total} ({percent}%)");
        events(Event::BlockWritten {
            block: current,
            total,
            percent,
        });
        Ok(())
    }

    fn on_error(session: &mut TransferSession) {
        let reason = if session.download_started() {
            FailureReason::VerifyFailed
        } else {
            FailureReason::NoChipDetected
        };
        warn!("Bridge reported error: {reason}");
        session.fail(reason);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::port::mock::MockPort;
    use crate::protocol::checksum::additive16;
    use crate::target::chip::ChipModel;
    use std::io::Cursor;
    use std::time::Duration;

    fn fast_timing() -> Timing {
        Timing::default()
            .with_chip_id_timeout(Duration::from_millis(20))
            .with_block_timeout(Duration::from_millis(20))
            .with_poll_interval(Duration::from_millis(1))
    }

    fn flash_block_frame(fill: u8) -> Vec<u8> {
        Frame::FlashBlock(Block::new([fill; BLOCK_SIZE])).encode()
    }

    /// Step until the session ends or the scripted input runs dry.
    fn run<P: Port>(
        engine: &mut Engine<'_, '_, P>,
        session: &mut TransferSession,
        events: &mut Vec<Event>,
    ) {
        for _ in 0..10_000 {
            if session.is_terminal() {
                return;
            }
            let step = engine
                .step(session, &mut |e| events.push(e))
                .unwrap();
            if step == Step::Idle {
                return;
            }
        }
    }

    #[test]
    fn test_idle_when_no_byte() {
        let mut port = MockPort::new(&[]);
        let mut session = TransferSession::identify();
        let mut engine = Engine::new(&mut port, Image::None, fast_timing());

        let step = engine
            .step(&mut session, &mut |_| {})
            .unwrap();
        assert_eq!(step, Step::Idle);
        assert!(!session.is_terminal());
    }

    #[test]
    fn test_chip_id_scenario() {
        let mut reply = vec![0x11, 0xA5, 0x10];
        reply.extend_from_slice(&[0u8; 8]);
        let mut port = MockPort::new(&reply);
        let mut session = TransferSession::identify();
        let mut events = Vec::new();

        let mut engine = Engine::new(&mut port, Image::None, fast_timing());
        run(&mut engine, &mut session, &mut events);
        let identity = engine
            .identity()
            .unwrap();

        assert_eq!(identity.model, ChipModel::Cc2530);
        assert_eq!(identity.model.name(), "CC2530");
        assert_eq!(identity.revision, 0x10);
        assert_eq!(
            identity
                .address
                .unwrap()
                .to_string(),
            "00:00:00:00:00:00:00:00"
        );
        assert_eq!(session.outcome(), Some(&Outcome::Success));
        assert_eq!(events, vec![Event::ChipIdentified(identity)]);
    }

    #[test]
    fn test_chip_id_is_repeatable() {
        let mut reply = vec![0x11, 0xB5, 0x01];
        reply.extend_from_slice(&[0x42; 8]);

        let mut seen = Vec::new();
        for _ in 0..2 {
            let mut port = MockPort::new(&reply);
            let mut session = TransferSession::identify();
            let mut engine = Engine::new(&mut port, Image::None, fast_timing());
            run(&mut engine, &mut session, &mut Vec::new());
            let identity = engine
                .identity()
                .unwrap();
            seen.push((identity.model, identity.revision));
        }
        assert_eq!(seen[0], seen[1]);
    }

    #[test]
    fn test_chip_id_too_short_fails() {
        let mut port = MockPort::new(&[0x11, 0xA5]);
        let mut session = TransferSession::identify();
        let mut engine = Engine::new(&mut port, Image::None, fast_timing());

        run(&mut engine, &mut session, &mut Vec::new());
        assert_eq!(
            session.outcome(),
            Some(&Outcome::Failed(FailureReason::NoIdentity { received: 1 }))
        );
    }

    #[test]
    fn test_chip_id_in_write_mode_does_not_end_session() {
        let mut port = MockPort::new(&[0x11, 0xA5, 0x10]);
        let mut source = Cursor::new(Vec::new());
        let mut session = TransferSession::write(1, false);
        let mut engine = Engine::new(&mut port, Image::Source(&mut source), fast_timing());

        let step = engine
            .step(&mut session, &mut |_| {})
            .unwrap();
        assert_eq!(step, Step::Handled(Opcode::ChipId));
        assert!(!session.is_terminal());
        assert!(
            engine
                .identity()
                .unwrap()
                .address
                .is_none()
        );
    }

    #[test]
    fn test_read_two_blocks() {
        let mut input = flash_block_frame(0xAB);
        input.extend(flash_block_frame(0xCD));
        let mut port = MockPort::new(&input);
        let mut sink = Vec::new();
        let mut session = TransferSession::read(2);
        let mut events = Vec::new();

        {
            let mut engine = Engine::new(&mut port, Image::Sink(&mut sink), fast_timing());
            run(&mut engine, &mut session, &mut events);
        }

        assert_eq!(sink.len(), 1024);
        assert!(sink[..512].iter().all(|&b| b == 0xAB));
        assert!(sink[512..].iter().all(|&b| b == 0xCD));
        assert_eq!(session.current_block(), 2);
        assert_eq!(session.outcome(), Some(&Outcome::Success));
        assert_eq!(
            events,
            vec![
                Event::DumpStarted { total: 2 },
                Event::BlockDumped { block: 1, total: 2 },
                Event::BlockDumped { block: 2, total: 2 },
            ]
        );
    }

    #[test]
    fn test_read_truncated_block_keeps_earlier_blocks() {
        let mut input = flash_block_frame(0x11);
        input.push(0x13);
        input.extend_from_slice(&[0x22; 400]);
        let mut port = MockPort::new(&input);
        let mut sink = Vec::new();
        let mut session = TransferSession::read(3);

        {
            let mut engine = Engine::new(&mut port, Image::Sink(&mut sink), fast_timing());
            run(&mut engine, &mut session, &mut Vec::new());
        }

        assert_eq!(
            session.outcome(),
            Some(&Outcome::Failed(FailureReason::TruncatedBlock {
                block: 2,
                received: 400
            }))
        );
        assert_eq!(session.current_block(), 1);
        assert_eq!(sink.len(), 512);
        assert!(sink.iter().all(|&b| b == 0x11));
    }

    #[test]
    fn test_read_checksum_mismatch_keeps_block() {
        let mut input = flash_block_frame(0x01);
        let last = input.len() - 1;
        input[last] ^= 0xFF;
        let mut port = MockPort::new(&input);
        let mut sink = Vec::new();
        let mut session = TransferSession::read(1);
        let mut events = Vec::new();

        {
            let mut engine = Engine::new(&mut port, Image::Sink(&mut sink), fast_timing());
            run(&mut engine, &mut session, &mut events);
        }

        assert_eq!(session.outcome(), Some(&Outcome::Success));
        assert_eq!(sink, vec![0x01; 512]);
        assert!(events.contains(&Event::ChecksumMismatch {
            block: 1,
            computed: 512,
            received: 512 ^ 0xFF,
        }));
    }

    #[test]
    fn test_read_sink_failure_is_fatal() {
        struct FullSink;
        impl Write for FullSink {
            fn write(&mut self, _buf: &[u8]) -> std::io::Result<usize> {
                Err(std::io::Error::other("disk full"))
            }
            fn flush(&mut self) -> std::io::Result<()> {
                Ok(())
            }
        }

        let mut port = MockPort::new(&flash_block_frame(0x00));
        let mut sink = FullSink;
        let mut session = TransferSession::read(2);
        let mut engine = Engine::new(&mut port, Image::Sink(&mut sink), fast_timing());

        run(&mut engine, &mut session, &mut Vec::new());
        assert_eq!(
            session.outcome(),
            Some(&Outcome::Failed(FailureReason::SinkWrite { block: 1 }))
        );
        assert_eq!(session.current_block(), 0);
    }

    #[test]
    fn test_read_buffered_sink_failure_is_fatal() {
        struct FullSink;
        impl Write for FullSink {
            fn write(&mut self, _buf: &[u8]) -> std::io::Result<usize> {
                Err(std::io::Error::other("disk full"))
            }
            fn flush(&mut self) -> std::io::Result<()> {
                Err(std::io::Error::other("disk full"))
            }
        }

        let mut input = flash_block_frame(0x01);
        input.extend(flash_block_frame(0x02));
        let mut port = MockPort::new(&input);
        let mut sink = std::io::BufWriter::new(FullSink);
        let mut session = TransferSession::read(2);
        let mut engine = Engine::new(&mut port, Image::Sink(&mut sink), fast_timing());

        run(&mut engine, &mut session, &mut Vec::new());
        assert_eq!(
            session.outcome(),
            Some(&Outcome::Failed(FailureReason::SinkWrite { block: 1 }))
        );
        assert_eq!(session.current_block(), 0);
    }

    #[test]
    fn test_flash_block_ignored_outside_read_mode() {
        let mut port = MockPort::new(&[0x13]);
        let mut session = TransferSession::identify();
        let mut engine = Engine::new(&mut port, Image::None, fast_timing());

        let step = engine
            .step(&mut session, &mut |_| {})
            .unwrap();
        assert_eq!(step, Step::Ignored(0x13));
        assert!(!session.is_terminal());
    }

    #[test]
    fn test_write_session_sends_all_blocks_then_end() {
        let image: Vec<u8> = (0..1024u32)
            .map(|i| (i % 253) as u8)
            .collect();
        let mut source = Cursor::new(image.clone());
        let mut port = MockPort::new(&[0x03, 0x03, 0x03]);
        let mut session = TransferSession::write(2, false);
        let mut events = Vec::new();

        {
            let mut engine = Engine::new(&mut port, Image::Source(&mut source), fast_timing());
            run(&mut engine, &mut session, &mut events);
        }

        assert_eq!(session.outcome(), Some(&Outcome::Success));
        assert_eq!(session.current_block(), session.total_blocks());

        let written = &port.write_buf;
        assert_eq!(written.len(), 2 * 515 + 1);
        for (i, frame) in written[..1030]
            .chunks(515)
            .enumerate()
        {
            let payload = &image[i * 512..(i + 1) * 512];
            let sum = additive16(payload);
            assert_eq!(frame[0], 0x02);
            assert_eq!(&frame[1..513], payload);
            assert_eq!(frame[513], (sum >> 8) as u8);
            assert_eq!(frame[514], (sum & 0xFF) as u8);
        }
        assert_eq!(written[1030], 0x04);

        assert_eq!(
            events,
            vec![
                Event::ProgrammingStarted { total: 2 },
                Event::BlockWritten {
                    block: 1,
                    total: 2,
                    percent: 50
                },
                Event::BlockWritten {
                    block: 2,
                    total: 2,
                    percent: 100
                },
            ]
        );
    }

    #[test]
    fn test_write_zero_blocks_ends_on_first_response() {
        let mut source = Cursor::new(vec![0u8; 100]);
        let mut port = MockPort::new(&[0x03]);
        let mut session = TransferSession::write(0, false);

        {
            let mut engine = Engine::new(&mut port, Image::Source(&mut source), fast_timing());
            run(&mut engine, &mut session, &mut Vec::new());
        }

        assert_eq!(session.outcome(), Some(&Outcome::Success));
        assert_eq!(port.write_buf, vec![0x04]);
        assert!(!session.download_started());
    }

    #[test]
    fn test_error_before_any_block_is_no_chip() {
        let mut source = Cursor::new(vec![0u8; 1024]);
        let mut port = MockPort::new(&[0x05]);
        let mut session = TransferSession::write(2, true);

        {
            let mut engine = Engine::new(&mut port, Image::Source(&mut source), fast_timing());
            run(&mut engine, &mut session, &mut Vec::new());
        }

        assert_eq!(
            session.outcome(),
            Some(&Outcome::Failed(FailureReason::NoChipDetected))
        );
        assert!(port.write_buf.is_empty());
    }

    #[test]
    fn test_error_after_blocks_is_verify_failure() {
        let mut source = Cursor::new(vec![0x5Au8; 512 * 5]);
        let mut port = MockPort::new(&[0x03, 0x03, 0x03, 0x05]);
        let mut session = TransferSession::write(5, true);

        {
            let mut engine = Engine::new(&mut port, Image::Source(&mut source), fast_timing());
            run(&mut engine, &mut session, &mut Vec::new());
        }

        assert_eq!(
            session.outcome(),
            Some(&Outcome::Failed(FailureReason::VerifyFailed))
        );
        assert_eq!(session.current_block(), 3);
        assert_eq!(port.write_buf.len(), 3 * 515);
    }

    #[test]
    fn test_write_short_source_fails() {
        let mut source = Cursor::new(vec![0u8; 100]);
        let mut port = MockPort::new(&[0x03]);
        let mut session = TransferSession::write(1, false);

        {
            let mut engine = Engine::new(&mut port, Image::Source(&mut source), fast_timing());
            run(&mut engine, &mut session, &mut Vec::new());
        }

        assert_eq!(
            session.outcome(),
            Some(&Outcome::Failed(FailureReason::SourceRead { block: 1 }))
        );
        assert!(port.write_buf.is_empty());
    }

    #[test]
    fn test_noise_is_ignored() {
        let mut port = MockPort::new(&[0x00, 0x7F, 0xFF]);
        let mut session = TransferSession::read(1);
        let mut sink = Vec::new();
        let mut engine = Engine::new(&mut port, Image::Sink(&mut sink), fast_timing());

        for expected in [0x00, 0x7F, 0xFF] {
            let step = engine
                .step(&mut session, &mut |_| {})
                .unwrap();
            assert_eq!(step, Step::Ignored(expected));
        }
        assert!(!session.is_terminal());
    }

    #[test]
    fn test_terminal_session_processes_nothing() {
        let mut port = MockPort::new(&[0x05]);
        let mut session = TransferSession::identify();
        session.succeed();
        let mut engine = Engine::new(&mut port, Image::None, fast_timing());

        let step = engine
            .step(&mut session, &mut |_| {})
            .unwrap();
        assert_eq!(step, Step::Idle);
        assert_eq!(session.outcome(), Some(&Outcome::Success));
        assert_eq!(port.read_buf.len(), 1);
    }
}
