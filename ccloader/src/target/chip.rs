//! Chip identity and bridge board definitions.
//!
//! The CCLoader bridge answers a ChipId request with the CC253x/CC254x
//! chip ID byte, the revision byte and, on newer sketches, the 8-byte IEEE
//! address read from the info page.

use crate::error::{Error, Result};
use crate::protocol::frame::{CHIP_ID_BODY_LEN, Opcode};
use std::fmt;

/// Known chip ID bytes and their family names.
///
/// 0x43 and 0x91 both report as CC2543; the bridge firmware names both IDs
/// that way, so the two entries are kept distinct only by their ID byte.
const CHIP_MODELS: &[(u8, ChipModel)] = &[
    (0xA5, ChipModel::Cc2530),
    (0xB5, ChipModel::Cc2531),
    (0x95, ChipModel::Cc2533),
    (0x43, ChipModel::Cc2543),
    (0x44, ChipModel::Cc2544),
    (0x45, ChipModel::Cc2545),
    (0x8D, ChipModel::Cc2540),
    (0x41, ChipModel::Cc2541),
    (0x91, ChipModel::Cc2543),
];

/// Chip family reported by the ChipId reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum ChipModel {
    /// CC2530.
    Cc2530,
    /// CC2531 (USB variant).
    Cc2531,
    /// CC2533.
    Cc2533,
    /// CC2540 (BLE).
    Cc2540,
    /// CC2541 (BLE).
    Cc2541,
    /// CC2543.
    Cc2543,
    /// CC2544.
    Cc2544,
    /// CC2545.
    Cc2545,
    /// ID byte not in the table.
    Unknown(u8),
}

impl ChipModel {
    /// Map a chip ID byte. Unrecognised bytes are `Unknown`, not an error.
    pub fn from_id(id: u8) -> Self {
        CHIP_MODELS
            .iter()
            .find(|(known, _)| *known == id)
            .map_or(Self::Unknown(id), |(_, model)| *model)
    }

    /// Human-readable family name.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Cc2530 => "CC2530",
            Self::Cc2531 => "CC2531",
            Self::Cc2533 => "CC2533",
            Self::Cc2540 => "CC2540",
            Self::Cc2541 => "CC2541",
            Self::Cc2543 => "CC2543",
            Self::Cc2544 => "CC2544",
            Self::Cc2545 => "CC2545",
            Self::Unknown(_) => "Unknown",
        }
    }
}

impl fmt::Display for ChipModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// 64-bit IEEE address, stored in wire order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct IeeeAddress(pub [u8; 8]);

impl fmt::Display for IeeeAddress {
    /// Most significant byte first, which is the reverse of wire order.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, byte) in self
            .0
            .iter()
            .rev()
            .enumerate()
        {
            if i > 0 {
                f.write_str(":")?;
            }
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

/// Decoded ChipId reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ChipIdentity {
    /// Raw chip ID byte.
    pub chip_id: u8,
    /// Chip family looked up from `chip_id`.
    pub model: ChipModel,
    /// Silicon revision.
    pub revision: u8,
    /// IEEE address, present only when the full reply arrived.
    pub address: Option<IeeeAddress>,
}

impl ChipIdentity {
    /// Decode a ChipId body of 2 to 10 bytes.
    pub fn from_body(body: &[u8]) -> Result<Self> {
        if body.len() < 2 || body.len() > CHIP_ID_BODY_LEN {
            return Err(Error::InvalidFrame {
                opcode: Opcode::ChipId as u8,
                expected: CHIP_ID_BODY_LEN,
                actual: body.len(),
            });
        }

        let address = (body.len() == CHIP_ID_BODY_LEN).then(|| {
            let mut raw = [0u8; 8];
            raw.copy_from_slice(&body[2..CHIP_ID_BODY_LEN]);
            IeeeAddress(raw)
        });

        Ok(Self {
            chip_id: body[0],
            model: ChipModel::from_id(body[0]),
            revision: body[1],
            address,
        })
    }

    /// Wire body of this reply.
    pub fn to_body(&self) -> Vec<u8> {
        let mut body = vec![self.chip_id, self.revision];
        if let Some(address) = self.address {
            body.extend_from_slice(&address.0);
        }
        body
    }
}

impl fmt::Display for ChipIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} (id 0x{:02x}, rev 0x{:02x})",
            self.model, self.chip_id, self.revision
        )?;
        if let Some(address) = self.address {
            write!(f, ", IEEE {address}")?;
        }
        Ok(())
    }
}

/// Arduino board hosting the CCLoader sketch.
///
/// Boards differ in how DTR must be held while the sketch starts: an UNO
/// resets on DTR, a Leonardo-style board needs DTR asserted to talk at all.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum BoardKind {
    /// UNO and compatibles (device type 0).
    #[default]
    Default,
    /// Leonardo, Pro Micro and other native-USB boards (device type 1).
    Leonardo,
}

impl BoardKind {
    /// Map the numeric device type used on the command line.
    pub fn from_index(index: u8) -> Option<Self> {
        match index {
            0 => Some(Self::Default),
            1 => Some(Self::Leonardo),
            _ => None,
        }
    }

    /// DTR level held during the session.
    pub fn dtr_level(self) -> bool {
        matches!(self, Self::Leonardo)
    }

    /// RTS level held during the session.
    pub fn rts_level(self) -> bool {
        false
    }
}

impl fmt::Display for BoardKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Default => write!(f, "Default (e.g. UNO)"),
            Self::Leonardo => write!(f, "Leonardo"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chip_model_lookup() {
        assert_eq!(ChipModel::from_id(0xA5), ChipModel::Cc2530);
        assert_eq!(ChipModel::from_id(0xB5), ChipModel::Cc2531);
        assert_eq!(ChipModel::from_id(0x8D), ChipModel::Cc2540);
        assert_eq!(ChipModel::from_id(0x41), ChipModel::Cc2541);
        assert_eq!(ChipModel::from_id(0x91), ChipModel::Cc2543);
    }

    #[test]
    fn test_both_cc2543_ids_share_a_name() {
        assert_eq!(ChipModel::from_id(0x43), ChipModel::from_id(0x91));
        assert_eq!(ChipModel::from_id(0x43).name(), "CC2543");
        assert_eq!(CHIP_MODELS.len(), 9);
    }

    #[test]
    fn test_chip_model_unknown_is_not_error() {
        let model = ChipModel::from_id(0x00);
        assert_eq!(model, ChipModel::Unknown(0x00));
        assert_eq!(model.to_string(), "Unknown");
    }

    #[test]
    fn test_identity_full_reply() {
        let body = [0xA5, 0x10, 0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07, 0x08];
        let id = ChipIdentity::from_body(&body).unwrap();

        assert_eq!(id.model, ChipModel::Cc2530);
        assert_eq!(id.revision, 0x10);
        assert_eq!(
            id.address
                .unwrap()
                .to_string(),
            "08:07:06:05:04:03:02:01"
        );
    }

    #[test]
    fn test_identity_zero_address() {
        let mut body = vec![0xA5, 0x10];
        body.extend_from_slice(&[0u8; 8]);
        let id = ChipIdentity::from_body(&body).unwrap();

        assert_eq!(id.model.name(), "CC2530");
        assert_eq!(
            id.address
                .unwrap()
                .to_string(),
            "00:00:00:00:00:00:00:00"
        );
    }

    #[test]
    fn test_identity_partial_reply_has_no_address() {
        let id = ChipIdentity::from_body(&[0xB5, 0x22, 0xFF]).unwrap();
        assert_eq!(id.model, ChipModel::Cc2531);
        assert_eq!(id.revision, 0x22);
        assert!(id.address.is_none());
    }

    #[test]
    fn test_identity_too_short() {
        assert!(ChipIdentity::from_body(&[0xA5]).is_err());
        assert!(ChipIdentity::from_body(&[]).is_err());
    }

    #[test]
    fn test_identity_body_round_trip() {
        let body = [0x8D, 0x03, 9, 8, 7, 6, 5, 4, 3, 2];
        let id = ChipIdentity::from_body(&body).unwrap();
        assert_eq!(id.to_body(), body.to_vec());
    }

    #[test]
    fn test_board_kind_lines() {
        assert_eq!(BoardKind::from_index(0), Some(BoardKind::Default));
        assert_eq!(BoardKind::from_index(1), Some(BoardKind::Leonardo));
        assert_eq!(BoardKind::from_index(2), None);
        assert!(!BoardKind::Default.dtr_level());
        assert!(BoardKind::Leonardo.dtr_level());
        assert!(!BoardKind::Leonardo.rts_level());
    }
}
