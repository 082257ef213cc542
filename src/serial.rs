//! Buffered, interrupt-driven serial communication over the USART peripherals
//!
//! The serial module decouples the rate at which the application produces and consumes bytes from
//! the rate at which the wire carries them. [`BufferedSerial`] owns a transmit FIFO and a receive
//! FIFO; the USART interrupt moves received bytes into the receive FIFO and feeds the transmit
//! FIFO to the peripheral one byte at a time. Optionally a GPDMA channel takes over transmission,
//! sending the transmit FIFO in bursts of up to `DMA` bytes so that the USART interrupt no longer
//! fires per byte.
//!
//! Every operation on the application side is non-blocking: a full transmit FIFO rejects bytes
//! and counts them as overflow, an empty receive FIFO simply reports that nothing is available.
//! The handles also implement the (polling) [`Read`][io::Read], [`ReadReady`][io::ReadReady],
//! [`Write`][io::Write], and [`WriteReady`][io::WriteReady] traits from embedded-io, as well as
//! [`core::fmt::Write`].
//!
//! # Usage
//!
//! ## Initialization
//!
//! The driver lives for the whole program, so it is placed in a `static`. The interrupt handlers
//! forward to it:
//!
//! ```ignore
//! use stm32h5xx_usart_fifo::pac::{self, interrupt};
//! use stm32h5xx_usart_fifo::serial::{BufferedSerial, UsartPort, config::Config};
//! use stm32h5xx_usart_fifo::time::Hertz;
//!
//! static SERIAL: BufferedSerial<UsartPort<pac::USART1>> =
//!     BufferedSerial::new(UsartPort::new(Config::new(Hertz::from_raw(115_200))));
//!
//! #[interrupt]
//! fn USART1() {
//!     // Safety: this is the only place the USART1 interrupt is serviced
//!     unsafe { SERIAL.on_interrupt() };
//! }
//! ```
//!
//! `initialize` programs the hardware once; later calls are no-ops. `split` then hands out the only
//! transmit and receive handles:
//!
//! ```ignore
//! SERIAL.initialize().unwrap();
//! let (mut tx, mut rx) = SERIAL.split().unwrap();
//! ```
//!
//! ## Operation
//!
//! ```ignore
//! tx.send_bytes(b"hello")?;
//! let mut frame = [0u8; 4];
//! if rx.get_bytes(&mut frame).is_ok() {
//!     // exactly 4 bytes received
//! }
//! let dropped = SERIAL.rx_overflow_size();
//! ```
//!
//! [io::Read]: https://docs.rs/embedded-io/latest/embedded_io/trait.Read.html
//! [io::ReadReady]: https://docs.rs/embedded-io/latest/embedded_io/trait.ReadReady.html
//! [io::Write]: https://docs.rs/embedded-io/latest/embedded_io/trait.Write.html
//! [io::WriteReady]: https://docs.rs/embedded-io/latest/embedded_io/trait.WriteReady.html

use core::fmt::Display;

use embedded_io::{Error as IoError, ErrorKind as IoErrorKind};

mod buffered;
pub mod config;
#[cfg(test)]
mod mock;
mod port;
#[cfg(feature = "device-selected")]
mod usart;

pub use buffered::{
    BufferedSerial, SerialRx, SerialTx, USART_DMA_TX_BUFFER_SIZE,
    USART_RX_BUFFER_SIZE, USART_TX_BUFFER_SIZE,
};
pub use port::{NoDma, SerialPort, TxDma};
#[cfg(feature = "device-selected")]
pub use usart::{Instance, UsartPort};

#[cfg(feature = "device-selected")]
pub use crate::gpdma::UsartTxDma;

/// Serial receive fault
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[non_exhaustive]
pub enum Error {
    /// Framing error
    Framing,
    /// Noise error
    Noise,
    /// RX buffer overrun
    Overrun,
    /// Parity check error
    Parity,
}

impl Display for Error {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{:?}", self)
    }
}

impl core::error::Error for Error {}

impl IoError for Error {
    fn kind(&self) -> IoErrorKind {
        IoErrorKind::Other
    }
}

/// Result of a transfer that could not be carried out in full
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum BufferError {
    /// The transmit FIFO ran out of room. The first `accepted` bytes were queued; the rest were
    /// dropped and added to the transmit overflow counter.
    Overflow { accepted: usize },
    /// Fewer bytes than requested are buffered. Nothing was consumed.
    Underflow { available: usize },
}

impl Display for BufferError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            BufferError::Overflow { accepted } => {
                write!(f, "transmit buffer full after {accepted} bytes")
            }
            BufferError::Underflow { available } => {
                write!(f, "only {available} bytes buffered")
            }
        }
    }
}

impl core::error::Error for BufferError {}

impl IoError for BufferError {
    fn kind(&self) -> IoErrorKind {
        match self {
            BufferError::Overflow { .. } => IoErrorKind::OutOfMemory,
            BufferError::Underflow { .. } => IoErrorKind::Other,
        }
    }
}

/// Interrupt event
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Event {
    /// Rx data register not empty
    RxNotEmpty,
    /// Tx data register empty
    TxEmpty,
}
