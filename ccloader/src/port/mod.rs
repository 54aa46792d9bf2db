//! Port abstraction for the serial link to the CCLoader bridge.
//!
//! The protocol engine never talks to an OS serial handle directly. It uses
//! the [`Port`] trait, which bundles the byte stream (`Read + Write`) with the
//! handful of line operations the bridge needs:
//!
//! ```text
//! +------------------+
//! |  Driver / Engine |
//! +--------+---------+
//!          |  poll_byte / read_with_timeout / write_all_bytes
//!          v
//! +--------+---------+
//! |    Port Trait    |
//! +--------+---------+
//!          |
//!          v
//! +--------+---------+
//! | Native SerialPort|
//! |   (serialport)   |
//! +------------------+
//! ```
//!
//! ## Example
//!
//! ```rust,no_run
//! use ccloader::port::Port;
//! use std::time::Duration;
//!
//! fn example<P: Port>(port: &mut P) -> ccloader::Result<()> {
//!     port.write_all_bytes(&[0x11])?;
//!
//!     let mut buf = [0u8; 10];
//!     let n = port.read_with_timeout(&mut buf, Duration::from_secs(5), Duration::from_millis(10))?;
//!     println!("Received: {:?}", &buf[..n]);
//!
//!     Ok(())
//! }
//! ```

#[cfg(feature = "native")]
pub mod native;

#[cfg(test)]
pub(crate) mod mock;

use std::io::{ErrorKind, Read, Write};
use std::thread;
use std::time::{Duration, Instant};

use log::{trace, warn};

use crate::error::{Error, Result};

/// Baud rate the CCLoader sketch listens on.
pub const DEFAULT_BAUD: u32 = 115_200;

/// Serial port configuration.
///
/// The link is always 8 data bits, no parity, one stop bit and no flow
/// control; only the name, speed and per-read timeout vary.
#[derive(Debug, Clone)]
pub struct SerialConfig {
    /// Port name/path (e.g., "/dev/ttyUSB0", "COM3").
    pub port_name: String,
    /// Baud rate.
    pub baud_rate: u32,
    /// Timeout of a single OS-level read.
    ///
    /// Kept short so that [`Port::read_with_timeout`] can poll against its
    /// own deadline.
    pub timeout: Duration,
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            port_name: String::new(),
            baud_rate: DEFAULT_BAUD,
            timeout: Duration::from_millis(10),
        }
    }
}

impl SerialConfig {
    /// Create a new configuration with port name and baud rate.
    pub fn new(port_name: impl Into<String>, baud_rate: u32) -> Self {
        Self {
            port_name: port_name.into(),
            baud_rate,
            ..Default::default()
        }
    }

    /// Set the timeout.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// Returns true for read errors that only mean "nothing arrived yet".
fn is_no_data(kind: ErrorKind) -> bool {
    matches!(
        kind,
        ErrorKind::TimedOut | ErrorKind::WouldBlock | ErrorKind::Interrupted
    )
}

/// Duplex byte channel to the bridge board.
pub trait Port: Read + Write + Send {
    /// Get the current baud rate.
    fn baud_rate(&self) -> u32;

    /// Number of received bytes waiting in the input buffer.
    fn bytes_to_read(&mut self) -> Result<u32>;

    /// Discard both input and output buffers.
    fn clear_buffers(&mut self) -> Result<()>;

    /// Discard pending input only.
    fn clear_input(&mut self) -> Result<()>;

    /// Get the port name/path.
    fn name(&self) -> &str;

    /// Set DTR (Data Terminal Ready) pin state.
    fn set_dtr(&mut self, level: bool) -> Result<()>;

    /// Set RTS (Request To Send) pin state.
    fn set_rts(&mut self, level: bool) -> Result<()>;

    /// Close the port and release resources.
    ///
    /// After calling this method, the port cannot be used for further I/O.
    /// Calling it twice is harmless.
    fn close(&mut self) -> Result<()>;

    /// Drive both reset-related control lines.
    fn set_control_lines(&mut self, dtr: bool, rts: bool) -> Result<()> {
        self.set_dtr(dtr)?;
        self.set_rts(rts)
    }

    /// Write all bytes, blocking until complete.
    fn write_all_bytes(&mut self, buf: &[u8]) -> Result<()> {
        std::io::Write::write_all(self, buf)?;
        std::io::Write::flush(self)?;
        Ok(())
    }

    /// Take one byte if one is already waiting. Never blocks.
    fn poll_byte(&mut self) -> Result<Option<u8>> {
        if self.bytes_to_read()? == 0 {
            return Ok(None);
        }

        let mut byte = [0u8; 1];
        match self.read(&mut byte) {
            Ok(1) => {
                trace!("rx 0x{:02X}", byte[0]);
                Ok(Some(byte[0]))
            },
            Ok(_) => Ok(None),
            Err(e) if is_no_data(e.kind()) => Ok(None),
            Err(e) => Err(Error::Io(e)),
        }
    }

    /// Fill `buf`, giving up once `timeout` of wall-clock time has passed.
    ///
    /// Returns the number of bytes actually read. A short count means the
    /// deadline expired; it is not an error. Only hard transport failures
    /// are returned as `Err`.
    fn read_with_timeout(
        &mut self,
        buf: &mut [u8],
        timeout: Duration,
        poll_interval: Duration,
    ) -> Result<usize> {
        let start = Instant::now();
        let mut filled = 0;

        while filled < buf.len() {
            match self.read(&mut buf[filled..]) {
                Ok(n) if n > 0 => {
                    filled += n;
                    continue;
                },
                Ok(_) => {},
                Err(e) if is_no_data(e.kind()) => {},
                Err(e) => return Err(Error::Io(e)),
            }

            if start.elapsed() > timeout {
                warn!(
                    "timeout reading serial port (read {filled} of {} bytes)",
                    buf.len()
                );
                return Ok(filled);
            }
            thread::sleep(poll_interval);
        }

        trace!("read {filled} bytes in {:?}", start.elapsed());
        Ok(filled)
    }
}

#[cfg(feature = "native")]
pub use native::NativePort;
