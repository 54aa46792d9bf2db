//! CCLoader wire protocol.

pub mod checksum;
pub mod frame;

// Re-export common types
pub use checksum::additive16;
pub use frame::{BLOCK_SIZE, Block, Frame, Opcode};
