//! Target chips and bridge boards.

pub mod chip;

pub use chip::{BoardKind, ChipIdentity, ChipModel, IeeeAddress};
