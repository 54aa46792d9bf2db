//! # ccloader
//!
//! Host side of the CCLoader flasher for TI CC253x/CC254x SoCs.
//!
//! An Arduino running the CCLoader sketch bridges the serial port to the
//! chip's debug interface. This crate drives that bridge:
//!
//! - read the chip ID, revision and IEEE address
//! - dump flash blocks to a file
//! - program a binary image, optionally with on-chip verification
//!
//! ## Features
//!
//! - `native` (default): serial port support via the `serialport` crate
//! - `serde`: serialization support for session reports and chip data
//!
//! ## Example
//!
//! ```rust,no_run
//! use ccloader::{BoardKind, CcLoader, NativePort, SerialConfig};
//! use std::fs::File;
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut image = File::open("router.bin")?;
//!     let len = image.metadata()?.len();
//!
//!     let port = NativePort::open(&SerialConfig::new("/dev/ttyACM0", 115200))?;
//!     let mut loader = CcLoader::new(port, BoardKind::Leonardo);
//!
//!     let report = loader.program(&mut image, len, true, &mut |event| {
//!         println!("{event:?}");
//!     })?;
//!     println!("{} blocks written", report.blocks_transferred);
//!
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

use std::sync::{Arc, OnceLock};

pub mod engine;
pub mod error;
pub mod flasher;
pub mod port;
pub mod protocol;
pub mod session;
pub mod target;

static INTERRUPT_CHECKER: OnceLock<Arc<dyn Fn() -> bool + Send + Sync>> = OnceLock::new();

/// Register a global interruption checker polled by the session loop.
///
/// The checker should return `true` when the current session should stop
/// (for example after receiving Ctrl-C in CLI applications).
pub fn set_interrupt_checker<F>(checker: F)
where
    F: Fn() -> bool + Send + Sync + 'static,
{
    let _ = INTERRUPT_CHECKER.set(Arc::new(checker));
}

/// Returns whether interruption was requested by the embedding application.
#[must_use]
pub fn is_interrupted_requested() -> bool {
    INTERRUPT_CHECKER
        .get()
        .is_some_and(|checker| checker())
}

/// Serializes tests that flip the global interrupt flag against tests that
/// run sessions, since the checker is process-wide.
#[cfg(test)]
pub(crate) fn test_interrupt_lock() -> std::sync::MutexGuard<'static, ()> {
    static LOCK: std::sync::Mutex<()> = std::sync::Mutex::new(());
    LOCK.lock()
        .unwrap_or_else(std::sync::PoisonError::into_inner)
}

#[cfg(test)]
pub(crate) fn test_set_interrupted(value: bool) {
    use std::sync::atomic::{AtomicBool, Ordering};

    static TEST_INTERRUPT_FLAG: OnceLock<Arc<AtomicBool>> = OnceLock::new();

    let flag = TEST_INTERRUPT_FLAG
        .get_or_init(|| {
            let shared = Arc::new(AtomicBool::new(false));
            let checker = Arc::clone(&shared);
            set_interrupt_checker(move || checker.load(Ordering::Relaxed));
            shared
        })
        .clone();

    flag.store(value, Ordering::Relaxed);
}

#[cfg(feature = "native")]
pub use port::NativePort;
pub use {
    engine::{Engine, Event, Image, Step},
    error::{Error, Result},
    flasher::{CcLoader, LinkState, SessionReport, Timing},
    port::{DEFAULT_BAUD, Port, SerialConfig},
    protocol::{BLOCK_SIZE, Block, Frame, Opcode, additive16},
    session::{FailureReason, Mode, Outcome, TransferSession},
    target::{BoardKind, ChipIdentity, ChipModel, IeeeAddress},
};

/// Open `port_name` and wrap it in a loader for `board`.
#[cfg(feature = "native")]
pub fn open(port_name: &str, baud_rate: u32, board: BoardKind) -> Result<CcLoader<NativePort>> {
    let port = NativePort::open(&SerialConfig::new(port_name, baud_rate))?;
    log::info!("Opened {port_name} at {baud_rate} baud");
    Ok(CcLoader::new(port, board))
}
