//! Hardware seam of the transfer engine
//!
//! [`BufferedSerial`](super::BufferedSerial) only talks to the peripheral through these traits.
//! [`UsartPort`](super::UsartPort) and [`UsartTxDma`](super::UsartTxDma) implement them on the
//! real registers; the unit tests substitute a mock.

use core::convert::Infallible;
use core::fmt::Debug;

use super::config::InvalidConfig;
use super::{Error, Event};

/// Register-level access to one USART
///
/// All methods take `&self`: the driver lives in a `static` shared by thread mode and the USART
/// interrupt. Apart from `initialize`, each method is a single register access or a
/// read-modify-write of an enable bit that only one context touches at a time.
pub trait SerialPort {
    /// Program clocks, pins, frame format and interrupt priority, then enable the receive
    /// interrupt
    fn initialize(&self) -> Result<(), InvalidConfig>;

    /// Read the receive data register if it holds a byte
    ///
    /// A receive fault is cleared before it is returned, so the caller can simply keep reading.
    fn read_byte(&self) -> Result<Option<u8>, Error>;

    /// Returns `true` if the transmitter can accept another byte
    ///
    /// This must be the condition that keeps the [`Event::TxEmpty`] interrupt pending, so that
    /// every entry of the interrupt handler can make progress.
    fn is_tx_ready(&self) -> bool;

    /// Write the transmit data register
    ///
    /// Only meaningful while [`is_tx_ready`](Self::is_tx_ready) returns `true`.
    fn write_byte(&self, byte: u8);

    /// Start listening for an interrupt event
    fn listen(&self, event: Event);

    /// Stop listening for an interrupt event
    fn unlisten(&self, event: Event);

    /// Returns `true` if the interrupt for `event` is enabled
    fn is_listening(&self, event: Event) -> bool;
}

/// A DMA channel that moves a memory block into a USART transmit data register
pub trait TxDma {
    /// Transfer error reported by the channel
    type Error: Debug;

    /// Configure the channel for memory-to-peripheral transfers and enable its interrupts
    fn initialize(&self) -> Result<(), InvalidConfig>;

    /// Start a transfer of `len` bytes from `data`
    ///
    /// `len` is at most `u16::MAX`.
    ///
    /// # Safety
    ///
    /// `data..data + len` must stay valid and unmodified until the transfer has completed, i.e.
    /// until the channel interrupt fires and [`finish`](Self::finish) is called.
    unsafe fn start(&self, data: *const u8, len: usize);

    /// Acknowledge a channel interrupt, clearing its flags
    ///
    /// Returns the error that ended the transfer, if any.
    fn finish(&self) -> Result<(), Self::Error>;
}

/// Marker for a driver without a transmit DMA channel
pub enum NoDma {}

impl TxDma for NoDma {
    type Error = Infallible;

    fn initialize(&self) -> Result<(), InvalidConfig> {
        match *self {}
    }

    unsafe fn start(&self, _data: *const u8, _len: usize) {
        match *self {}
    }

    fn finish(&self) -> Result<(), Self::Error> {
        match *self {}
    }
}
