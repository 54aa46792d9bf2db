//! CCLoader frame catalog.
//!
//! Every frame is a single opcode byte, optionally followed by a body whose
//! length is fixed by the opcode. Host and bridge share one opcode space.
//!
//! ## Frame Layouts
//!
//! ```text
//! Command frames (host -> bridge, always 5 bytes, zero padded):
//! +------+------------------------------------------+
//! | 0x11 | 00 00 00 00                              |  ChipId request
//! | 0x12 | count_hi count_lo start_hi start_lo      |  Dump
//! | 0x01 | verify 00 00 00                          |  Begin
//! +------+------------------------------------------+
//!
//! Block frames (Data host -> bridge, FlashBlock bridge -> host):
//! +--------+-----------------+-------------+-------------+
//! | opcode |  payload (512)  | checksum_hi | checksum_lo |
//! +--------+-----------------+-------------+-------------+
//!
//! ChipId reply (bridge -> host):
//! +------+-------+----------+---------------------------+
//! | 0x11 | model | revision | IEEE address (8 bytes)    |
//! +------+-------+----------+---------------------------+
//!
//! Response (0x03), End (0x04), Error (0x05): opcode only.
//! ```

use crate::error::{Error, Result};
use crate::protocol::checksum::additive16;
use crate::target::chip::ChipIdentity;
use byteorder::{BigEndian, ByteOrder, WriteBytesExt};
use std::fmt;

/// Flash bytes carried by one block.
pub const BLOCK_SIZE: usize = 512;

/// Block payload plus its trailing 16-bit checksum.
pub const BLOCK_BODY_LEN: usize = BLOCK_SIZE + 2;

/// Body length of a complete ChipId reply.
pub const CHIP_ID_BODY_LEN: usize = 10;

/// Total length of an initial command frame, opcode included.
pub const COMMAND_FRAME_LEN: usize = 5;

/// Frame opcodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[repr(u8)]
pub enum Opcode {
    /// Start a write session (host -> bridge).
    Begin = 0x01,
    /// One flash block to program (host -> bridge).
    Data = 0x02,
    /// Ready for the next block (bridge -> host).
    Response = 0x03,
    /// Terminate a write session (host -> bridge).
    End = 0x04,
    /// Failure signal: chip absent or verify failed (bridge -> host).
    Error = 0x05,
    /// Chip identity request and its reply.
    ChipId = 0x11,
    /// Start a read session (host -> bridge).
    Dump = 0x12,
    /// One flash block being returned (bridge -> host).
    FlashBlock = 0x13,
}

impl Opcode {
    /// Look up an opcode byte. Unknown bytes yield `None`.
    pub fn from_u8(byte: u8) -> Option<Self> {
        match byte {
            0x01 => Some(Self::Begin),
            0x02 => Some(Self::Data),
            0x03 => Some(Self::Response),
            0x04 => Some(Self::End),
            0x05 => Some(Self::Error),
            0x11 => Some(Self::ChipId),
            0x12 => Some(Self::Dump),
            0x13 => Some(Self::FlashBlock),
            _ => None,
        }
    }
}

impl fmt::Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Begin => "BEGIN",
            Self::Data => "DATA",
            Self::Response => "RESPONSE",
            Self::End => "END",
            Self::Error => "ERROR",
            Self::ChipId => "CHIP_ID",
            Self::Dump => "DUMP",
            Self::FlashBlock => "FLASH_BLOCK",
        };
        write!(f, "{name}(0x{:02X})", *self as u8)
    }
}

/// One 512-byte flash block with the checksum it travels with.
#[derive(Clone, PartialEq, Eq)]
pub struct Block {
    payload: [u8; BLOCK_SIZE],
    checksum: u16,
}

impl Block {
    /// Wrap a payload, computing its checksum.
    pub fn new(payload: [u8; BLOCK_SIZE]) -> Self {
        let checksum = additive16(&payload);
        Self { payload, checksum }
    }

    /// Parse a 514-byte wire body, keeping the checksum as received.
    pub fn from_body(body: &[u8]) -> Result<Self> {
        if body.len() != BLOCK_BODY_LEN {
            return Err(Error::InvalidFrame {
                opcode: Opcode::FlashBlock as u8,
                expected: BLOCK_BODY_LEN,
                actual: body.len(),
            });
        }
        let mut payload = [0u8; BLOCK_SIZE];
        payload.copy_from_slice(&body[..BLOCK_SIZE]);
        Ok(Self {
            payload,
            checksum: BigEndian::read_u16(&body[BLOCK_SIZE..]),
        })
    }

    /// Flash bytes.
    pub fn payload(&self) -> &[u8; BLOCK_SIZE] {
        &self.payload
    }

    /// Checksum carried with the block.
    pub fn checksum(&self) -> u16 {
        self.checksum
    }

    /// Checksum recomputed over the payload.
    pub fn computed_checksum(&self) -> u16 {
        additive16(&self.payload)
    }

    /// Whether the carried checksum matches the payload.
    pub fn is_valid(&self) -> bool {
        self.checksum == self.computed_checksum()
    }

    #[allow(clippy::unwrap_used)] // Writing to Vec<u8> cannot fail
    fn write_body(&self, buf: &mut Vec<u8>) {
        buf.extend_from_slice(&self.payload);
        buf.write_u16::<BigEndian>(self.checksum)
            .unwrap();
    }
}

impl fmt::Debug for Block {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Block")
            .field("checksum", &format_args!("{:#06x}", self.checksum))
            .field("valid", &self.is_valid())
            .finish_non_exhaustive()
    }
}

/// A decoded frame. Each variant carries only its own fields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// Start a write session.
    Begin {
        /// Ask the bridge to read back and compare each block.
        verify: bool,
    },
    /// Block to program.
    Data(Block),
    /// Bridge is ready for the next block.
    Response,
    /// Write session finished.
    End,
    /// Bridge reported a failure.
    Error,
    /// Ask the bridge for the chip identity.
    ChipIdRequest,
    /// Chip identity reply.
    ChipId(ChipIdentity),
    /// Start a read session.
    Dump {
        /// Number of blocks to return.
        block_count: u16,
        /// First block to return.
        start_block: u16,
    },
    /// Block read back from flash.
    FlashBlock(Block),
}

impl Frame {
    /// Opcode of this frame.
    pub fn opcode(&self) -> Opcode {
        match self {
            Self::Begin { .. } => Opcode::Begin,
            Self::Data(_) => Opcode::Data,
            Self::Response => Opcode::Response,
            Self::End => Opcode::End,
            Self::Error => Opcode::Error,
            Self::ChipIdRequest | Self::ChipId(_) => Opcode::ChipId,
            Self::Dump { .. } => Opcode::Dump,
            Self::FlashBlock(_) => Opcode::FlashBlock,
        }
    }

    /// Build the wire bytes of this frame.
    ///
    /// The three session-opening commands are padded to
    /// [`COMMAND_FRAME_LEN`] bytes; the bridge always reads that many.
    #[allow(clippy::unwrap_used)] // Writing to Vec<u8> cannot fail
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(1 + BLOCK_BODY_LEN);
        buf.push(self.opcode() as u8);

        match self {
            Self::Begin { verify } => buf.push(u8::from(*verify)),
            Self::Dump {
                block_count,
                start_block,
            } => {
                buf.write_u16::<BigEndian>(*block_count)
                    .unwrap();
                buf.write_u16::<BigEndian>(*start_block)
                    .unwrap();
            },
            Self::Data(block) | Self::FlashBlock(block) => block.write_body(&mut buf),
            Self::ChipId(identity) => buf.extend_from_slice(&identity.to_body()),
            Self::ChipIdRequest | Self::Response | Self::End | Self::Error => {},
        }

        if matches!(
            self,
            Self::Begin { .. } | Self::Dump { .. } | Self::ChipIdRequest
        ) {
            buf.resize(COMMAND_FRAME_LEN, 0x00);
        }

        buf
    }

    /// Decode a frame sent by the bridge from its opcode and body.
    ///
    /// A ChipId body may be short: two bytes carry model and revision, the
    /// address only comes with the full ten.
    pub fn decode(opcode: Opcode, body: &[u8]) -> Result<Self> {
        let expect = |expected: usize| {
            if body.len() == expected {
                Ok(())
            } else {
                Err(Error::InvalidFrame {
                    opcode: opcode as u8,
                    expected,
                    actual: body.len(),
                })
            }
        };

        match opcode {
            Opcode::Response => expect(0).map(|()| Self::Response),
            Opcode::Error => expect(0).map(|()| Self::Error),
            Opcode::End => expect(0).map(|()| Self::End),
            Opcode::ChipId => ChipIdentity::from_body(body).map(Self::ChipId),
            Opcode::FlashBlock => Block::from_body(body).map(Self::FlashBlock),
            Opcode::Data => Block::from_body(body).map(Self::Data),
            Opcode::Begin | Opcode::Dump => Err(Error::Protocol(format!(
                "{opcode} is never sent by the bridge"
            ))),
        }
    }
}
