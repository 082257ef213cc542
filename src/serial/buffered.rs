//! Transfer engine
//!
//! Thread mode is the producer of the transmit FIFO and the consumer of the receive FIFO; the
//! USART interrupt is the producer of the receive FIFO. The consumer of the transmit FIFO is
//! whoever currently owns the `busy` flag: the USART interrupt while the TX-empty interrupt is
//! enabled, or, with a DMA channel, the context that starts the next burst. `busy` is only ever
//! taken with a compare-exchange and released with a store followed by a recheck of the transmit
//! FIFO, so a byte queued while the transmitter is going idle is never stranded.

use core::cell::UnsafeCell;
use core::convert::Infallible;
use core::fmt;
use core::sync::atomic::{AtomicBool, AtomicU32, AtomicU8, Ordering};

use embedded_io as io;
#[cfg(feature = "log")]
use log::{debug, warn};

use super::config::InvalidConfig;
use super::port::{NoDma, SerialPort, TxDma};
use super::{BufferError, Event};
use crate::fifo::FifoBuffer;

/// Default capacity of the transmit FIFO
pub const USART_TX_BUFFER_SIZE: usize = 600;
/// Default capacity of the receive FIFO
pub const USART_RX_BUFFER_SIZE: usize = 200;
/// Default capacity of the DMA scratch buffer, i.e. the largest DMA burst
pub const USART_DMA_TX_BUFFER_SIZE: usize = 200;

const UNINITIALIZED: u8 = 0;
const INITIALIZING: u8 = 1;
const READY: u8 = 2;

/// Buffered, interrupt-driven serial port
///
/// `TX` and `RX` are the capacities of the transmit and receive FIFOs, `DMA` the capacity of the
/// scratch buffer a DMA burst is staged in. The scratch buffer is unused without a DMA channel.
///
/// The driver is meant to live for the whole program, typically in a `static`:
///
/// 1. [`initialize`](Self::initialize) once,
/// 2. [`split`](Self::split) into the [`SerialTx`] and [`SerialRx`] handles,
/// 3. forward the USART interrupt to [`on_interrupt`](Self::on_interrupt) and, with DMA, the
///    channel interrupt to [`on_dma_interrupt`](Self::on_dma_interrupt).
pub struct BufferedSerial<
    P,
    D = NoDma,
    const TX: usize = USART_TX_BUFFER_SIZE,
    const RX: usize = USART_RX_BUFFER_SIZE,
    const DMA: usize = USART_DMA_TX_BUFFER_SIZE,
> {
    port: P,
    dma: Option<D>,
    tx_buf: FifoBuffer<u8, TX>,
    rx_buf: FifoBuffer<u8, RX>,
    dma_buf: UnsafeCell<[u8; DMA]>,
    busy: AtomicBool,
    tx_overflow: AtomicU32,
    rx_overflow: AtomicU32,
    state: AtomicU8,
    taken: AtomicBool,
}

// Safety: the FIFOs follow the single producer/single consumer protocol described at the top of
// this module. `dma_buf` is only written by the owner of `busy`, and only while no burst is in
// flight.
unsafe impl<P, D, const TX: usize, const RX: usize, const DMA: usize> Sync
    for BufferedSerial<P, D, TX, RX, DMA>
where
    P: SerialPort + Sync,
    D: TxDma + Sync,
{
}

impl<P: SerialPort, const TX: usize, const RX: usize, const DMA: usize>
    BufferedSerial<P, NoDma, TX, RX, DMA>
{
    /// Create a driver that transmits from the TX-empty interrupt
    pub const fn new(port: P) -> Self {
        Self::build(port, None)
    }
}

impl<P, D, const TX: usize, const RX: usize, const DMA: usize>
    BufferedSerial<P, D, TX, RX, DMA>
where
    P: SerialPort,
    D: TxDma,
{
    const VALID_DMA_BURST: () = assert!(
        DMA > 0 && DMA <= u16::MAX as usize,
        "the DMA scratch buffer must hold 1 to 65535 bytes"
    );

    /// Create a driver that transmits in DMA bursts of up to `DMA` bytes
    pub const fn with_dma(port: P, dma: D) -> Self {
        #[allow(clippy::let_unit_value)]
        let () = Self::VALID_DMA_BURST;

        Self::build(port, Some(dma))
    }

    const fn build(port: P, dma: Option<D>) -> Self {
        BufferedSerial {
            port,
            dma,
            tx_buf: FifoBuffer::new(),
            rx_buf: FifoBuffer::new(),
            dma_buf: UnsafeCell::new([0; DMA]),
            busy: AtomicBool::new(false),
            tx_overflow: AtomicU32::new(0),
            rx_overflow: AtomicU32::new(0),
            state: AtomicU8::new(UNINITIALIZED),
            taken: AtomicBool::new(false),
        }
    }

    /// Program the hardware and enable the receive interrupt
    ///
    /// Only the first call has an effect; later calls return `Ok(())`. If the hardware rejects
    /// the configuration the driver stays uninitialized.
    ///
    /// A call that preempts an initialization in progress also returns `Ok(())` without waiting
    /// for it, and the driver is not ready yet. Use [`is_initialized`](Self::is_initialized) or
    /// [`split`](Self::split) to find out when it is.
    pub fn initialize(&self) -> Result<(), InvalidConfig> {
        if self
            .state
            .compare_exchange(
                UNINITIALIZED,
                INITIALIZING,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_err()
        {
            return Ok(());
        }

        let result = self.port.initialize().and_then(|()| match &self.dma {
            Some(dma) => dma.initialize(),
            None => Ok(()),
        });
        if let Err(e) = result {
            self.state.store(UNINITIALIZED, Ordering::Release);
            return Err(e);
        }

        #[cfg(feature = "log")]
        debug!(
            "BufferedSerial: tx {} bytes, rx {} bytes, dma {}",
            TX,
            RX,
            if self.dma.is_some() { DMA } else { 0 }
        );

        self.state.store(READY, Ordering::Release);
        Ok(())
    }

    /// Returns `true` once [`initialize`](Self::initialize) has succeeded
    pub fn is_initialized(&self) -> bool {
        self.state.load(Ordering::Acquire) == READY
    }

    /// Split into the transmit and receive handles
    ///
    /// Returns `None` before the driver is initialized, and on every call after the first
    /// successful one: there is exactly one producer of transmit data and one consumer of
    /// received data.
    #[allow(clippy::type_complexity)]
    pub fn split(
        &self,
    ) -> Option<(SerialTx<'_, P, D, TX, RX, DMA>, SerialRx<'_, P, D, TX, RX, DMA>)>
    {
        if !self.is_initialized() || self.taken.swap(true, Ordering::AcqRel) {
            return None;
        }
        Some((SerialTx { serial: self }, SerialRx { serial: self }))
    }

    /// Number of bytes waiting in the transmit FIFO
    ///
    /// Bytes already handed to a DMA burst are not counted.
    pub fn tx_size(&self) -> usize {
        self.tx_buf.len()
    }

    /// Number of received bytes waiting to be read
    pub fn rx_size(&self) -> usize {
        self.rx_buf.len()
    }

    /// Total number of bytes rejected because the transmit FIFO was full
    ///
    /// Never reset; saturates at `u32::MAX`.
    pub fn tx_overflow_size(&self) -> u32 {
        self.tx_overflow.load(Ordering::Relaxed)
    }

    /// Total number of received bytes dropped because the receive FIFO was full
    ///
    /// Never reset; saturates at `u32::MAX`.
    pub fn rx_overflow_size(&self) -> u32 {
        self.rx_overflow.load(Ordering::Relaxed)
    }

    /// Returns `true` while a transmission is in flight
    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }

    pub const fn tx_capacity(&self) -> usize {
        TX
    }

    pub const fn rx_capacity(&self) -> usize {
        RX
    }

    /// Returns a reference to the port
    pub fn port(&self) -> &P {
        &self.port
    }

    /// Returns a reference to the DMA channel, if the driver has one
    pub fn dma(&self) -> Option<&D> {
        self.dma.as_ref()
    }

    /// Service the USART interrupt
    ///
    /// Moves every received byte into the receive FIFO, counting the ones that do not fit, and
    /// without DMA refills the transmit data register from the transmit FIFO. Receive faults are
    /// cleared by the port and the affected byte is dropped.
    ///
    /// # Safety
    ///
    /// Must only be called from the interrupt handler of this driver's USART, which must not be
    /// serviced anywhere else.
    pub unsafe fn on_interrupt(&self) {
        loop {
            match self.port.read_byte() {
                Ok(Some(byte)) => {
                    if self.rx_buf.enqueue(byte).is_err() {
                        add_saturating(&self.rx_overflow, 1);
                    }
                }
                Ok(None) => break,
                // Fault already cleared, keep draining
                Err(_) => {}
            }
        }

        if self.dma.is_some() || !self.port.is_listening(Event::TxEmpty) {
            return;
        }

        while self.port.is_tx_ready() {
            match self.tx_buf.dequeue() {
                Some(byte) => self.port.write_byte(byte),
                None => break,
            }
        }

        if self.tx_buf.is_empty() {
            self.port.unlisten(Event::TxEmpty);
            self.release_transmitter();
        }
    }

    /// Service the DMA channel interrupt
    ///
    /// Acknowledges the finished burst and starts the next one if the transmit FIFO still holds
    /// data. A transfer error ends the burst like a completion does; the bytes of that burst are
    /// lost.
    ///
    /// # Safety
    ///
    /// Must only be called from the interrupt handler of this driver's DMA channel, which must
    /// not be serviced anywhere else.
    pub unsafe fn on_dma_interrupt(&self) {
        let Some(dma) = &self.dma else {
            return;
        };

        if let Err(_e) = dma.finish() {
            #[cfg(feature = "log")]
            warn!("BufferedSerial: DMA burst failed: {:?}", _e);
        }

        if self.busy.load(Ordering::Acquire) {
            self.release_transmitter();
        }
    }

    fn release_transmitter(&self) {
        self.busy.store(false, Ordering::Release);

        // A byte may have been queued after the transmit FIFO was found empty but before `busy`
        // was cleared. Its producer saw `busy` set and left the kick-start to us.
        if !self.tx_buf.is_empty() {
            self.start_transmit();
        }
    }

    /// Kick-start the transmitter unless it is already running
    fn start_transmit(&self) {
        if self
            .busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return;
        }

        match &self.dma {
            None => self.port.listen(Event::TxEmpty),
            // Safety: winning `busy` makes this context the transmit consumer and the sole user
            // of the scratch buffer
            Some(dma) => unsafe { self.start_dma_burst(dma) },
        }
    }

    /// # Safety
    ///
    /// The caller must own `busy`.
    unsafe fn start_dma_burst(&self, dma: &D) {
        let scratch = &mut *self.dma_buf.get();

        let mut len = 0;
        for slot in scratch.iter_mut() {
            match self.tx_buf.dequeue() {
                Some(byte) => {
                    *slot = byte;
                    len += 1;
                }
                None => break,
            }
        }

        if len == 0 {
            self.release_transmitter();
            return;
        }

        dma.start(scratch.as_ptr(), len);
    }
}

fn add_saturating(counter: &AtomicU32, count: usize) {
    // Each counter has a single writer, so load-then-store does not lose updates
    let count = u32::try_from(count).unwrap_or(u32::MAX);
    let total = counter.load(Ordering::Relaxed).saturating_add(count);
    counter.store(total, Ordering::Relaxed);
}

impl<P, D, const TX: usize, const RX: usize, const DMA: usize> fmt::Debug
    for BufferedSerial<P, D, TX, RX, DMA>
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BufferedSerial")
            .field("tx", &self.tx_buf)
            .field("rx", &self.rx_buf)
            .field("dma", &self.dma.is_some())
            .field("busy", &self.busy.load(Ordering::Relaxed))
            .field("tx_overflow", &self.tx_overflow.load(Ordering::Relaxed))
            .field("rx_overflow", &self.rx_overflow.load(Ordering::Relaxed))
            .finish()
    }
}

/// Transmit half of a [`BufferedSerial`]
pub struct SerialTx<
    'a,
    P,
    D = NoDma,
    const TX: usize = USART_TX_BUFFER_SIZE,
    const RX: usize = USART_RX_BUFFER_SIZE,
    const DMA: usize = USART_DMA_TX_BUFFER_SIZE,
> {
    serial: &'a BufferedSerial<P, D, TX, RX, DMA>,
}

impl<P, D, const TX: usize, const RX: usize, const DMA: usize>
    SerialTx<'_, P, D, TX, RX, DMA>
where
    P: SerialPort,
    D: TxDma,
{
    /// Queue one byte for transmission
    ///
    /// If the transmit FIFO is full the byte is dropped and counted as overflow.
    pub fn send_byte(&mut self, byte: u8) -> Result<(), BufferError> {
        self.send_bytes(&[byte])
    }

    /// Queue `bytes` for transmission
    ///
    /// Bytes are queued in order until the transmit FIFO is full. The remaining bytes are dropped
    /// and added to the transmit overflow counter, and the error reports how many were
    /// accepted. Accepted bytes are sent either way.
    pub fn send_bytes(&mut self, bytes: &[u8]) -> Result<(), BufferError> {
        let accepted = self.enqueue(bytes);

        let rejected = bytes.len() - accepted;
        if rejected == 0 {
            Ok(())
        } else {
            add_saturating(&self.serial.tx_overflow, rejected);
            Err(BufferError::Overflow { accepted })
        }
    }

    fn enqueue(&mut self, bytes: &[u8]) -> usize {
        let mut accepted = 0;
        for &byte in bytes {
            // Safety: this handle is the only transmit producer
            if unsafe { self.serial.tx_buf.enqueue(byte) }.is_err() {
                break;
            }
            accepted += 1;
        }

        if accepted > 0 {
            self.serial.start_transmit();
        }
        accepted
    }

    /// Number of bytes waiting in the transmit FIFO
    pub fn tx_size(&self) -> usize {
        self.serial.tx_size()
    }

    /// Total number of bytes rejected because the transmit FIFO was full
    pub fn tx_overflow_size(&self) -> u32 {
        self.serial.tx_overflow_size()
    }

    /// Returns `true` while a transmission is in flight
    pub fn is_busy(&self) -> bool {
        self.serial.is_busy()
    }

    pub const fn tx_capacity(&self) -> usize {
        TX
    }
}

/// Receive half of a [`BufferedSerial`]
pub struct SerialRx<
    'a,
    P,
    D = NoDma,
    const TX: usize = USART_TX_BUFFER_SIZE,
    const RX: usize = USART_RX_BUFFER_SIZE,
    const DMA: usize = USART_DMA_TX_BUFFER_SIZE,
> {
    serial: &'a BufferedSerial<P, D, TX, RX, DMA>,
}

impl<P, D, const TX: usize, const RX: usize, const DMA: usize>
    SerialRx<'_, P, D, TX, RX, DMA>
where
    P: SerialPort,
    D: TxDma,
{
    /// Take the oldest received byte
    pub fn get_byte(&mut self) -> Option<u8> {
        // Safety: this handle is the only receive consumer
        unsafe { self.serial.rx_buf.dequeue() }
    }

    /// Fill `buf` with received bytes
    ///
    /// Either `buf.len()` bytes are consumed, or none are and the error reports how many are
    /// available.
    pub fn get_bytes(&mut self, buf: &mut [u8]) -> Result<(), BufferError> {
        // Only the interrupt adds bytes, so what is available now stays available
        let available = self.serial.rx_buf.len();
        if available < buf.len() {
            return Err(BufferError::Underflow { available });
        }

        for slot in buf.iter_mut() {
            match self.get_byte() {
                Some(byte) => *slot = byte,
                None => break,
            }
        }
        Ok(())
    }

    fn dequeue_into(&mut self, buf: &mut [u8]) -> usize {
        let mut count = 0;
        for slot in buf.iter_mut() {
            match self.get_byte() {
                Some(byte) => *slot = byte,
                None => break,
            }
            count += 1;
        }
        count
    }

    /// Number of received bytes waiting to be read
    pub fn rx_size(&self) -> usize {
        self.serial.rx_size()
    }

    /// Total number of received bytes dropped because the receive FIFO was full
    pub fn rx_overflow_size(&self) -> u32 {
        self.serial.rx_overflow_size()
    }

    pub const fn rx_capacity(&self) -> usize {
        RX
    }
}

/*
 *  HAL Implementations
 */

impl<P, D, const TX: usize, const RX: usize, const DMA: usize> io::ErrorType
    for SerialTx<'_, P, D, TX, RX, DMA>
{
    type Error = Infallible;
}

impl<P, D, const TX: usize, const RX: usize, const DMA: usize> io::Write
    for SerialTx<'_, P, D, TX, RX, DMA>
where
    P: SerialPort,
    D: TxDma,
{
    /// Queue as many bytes as fit, waiting until at least one does
    ///
    /// Unlike [`send_bytes`](SerialTx::send_bytes) nothing is dropped or counted as overflow.
    fn write(&mut self, buf: &[u8]) -> Result<usize, Self::Error> {
        if buf.is_empty() {
            return Ok(0);
        }
        loop {
            let count = self.enqueue(buf);
            if count > 0 {
                return Ok(count);
            }
            core::hint::spin_loop();
        }
    }

    /// Wait until the transmit FIFO is drained and the transmitter is idle
    ///
    /// The last byte may still be in the USART shift register when this returns.
    fn flush(&mut self) -> Result<(), Self::Error> {
        while self.serial.is_busy() || !self.serial.tx_buf.is_empty() {
            core::hint::spin_loop();
        }
        Ok(())
    }
}

impl<P, D, const TX: usize, const RX: usize, const DMA: usize> io::WriteReady
    for SerialTx<'_, P, D, TX, RX, DMA>
where
    P: SerialPort,
    D: TxDma,
{
    fn write_ready(&mut self) -> Result<bool, Self::Error> {
        Ok(!self.serial.tx_buf.is_full())
    }
}

impl<P, D, const TX: usize, const RX: usize, const DMA: usize> fmt::Write
    for SerialTx<'_, P, D, TX, RX, DMA>
where
    P: SerialPort,
    D: TxDma,
{
    /// Queue the string; fails if any byte of it overflowed the transmit FIFO
    fn write_str(&mut self, s: &str) -> fmt::Result {
        self.send_bytes(s.as_bytes()).map_err(|_| fmt::Error)
    }
}

impl<P, D, const TX: usize, const RX: usize, const DMA: usize> io::ErrorType
    for SerialRx<'_, P, D, TX, RX, DMA>
{
    type Error = Infallible;
}

impl<P, D, const TX: usize, const RX: usize, const DMA: usize> io::Read
    for SerialRx<'_, P, D, TX, RX, DMA>
where
    P: SerialPort,
    D: TxDma,
{
    /// Read the bytes that are available, waiting until there is at least one
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, Self::Error> {
        if buf.is_empty() {
            return Ok(0);
        }
        loop {
            let count = self.dequeue_into(buf);
            if count > 0 {
                return Ok(count);
            }
            core::hint::spin_loop();
        }
    }
}

impl<P, D, const TX: usize, const RX: usize, const DMA: usize> io::ReadReady
    for SerialRx<'_, P, D, TX, RX, DMA>
where
    P: SerialPort,
    D: TxDma,
{
    fn read_ready(&mut self) -> Result<bool, Self::Error> {
        Ok(!self.serial.rx_buf.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::serial::mock::{MockDma, MockPort};
    use crate::serial::Error;
    use core::fmt::Write as _;
    use embedded_io::{Read as _, ReadReady as _, WriteReady as _};
    use std::vec::Vec;

    fn initialized<P, D, const TX: usize, const RX: usize, const DMA: usize>(
        serial: &BufferedSerial<P, D, TX, RX, DMA>,
    ) where
        P: SerialPort,
        D: TxDma,
    {
        serial.initialize().unwrap();
    }

    #[test]
    fn split_requires_initialization_and_happens_once() {
        let serial: BufferedSerial<MockPort> = BufferedSerial::new(MockPort::new());
        assert!(serial.split().is_none());

        serial.initialize().unwrap();
        serial.initialize().unwrap();
        assert_eq!(serial.port().initialize_count(), 1);
        assert!(serial.port().is_listening(Event::RxNotEmpty));

        assert!(serial.split().is_some());
        assert!(serial.split().is_none());
    }

    #[test]
    fn initialize_during_initialization_does_not_report_ready() {
        let serial: BufferedSerial<MockPort> = BufferedSerial::new(MockPort::new());
        serial.state.store(INITIALIZING, Ordering::Release);

        assert_eq!(serial.initialize(), Ok(()));
        assert_eq!(serial.port().initialize_count(), 0);
        assert!(!serial.is_initialized());
        assert!(serial.split().is_none());

        serial.state.store(UNINITIALIZED, Ordering::Release);
        serial.initialize().unwrap();
        assert!(serial.is_initialized());
    }

    #[test]
    fn failed_initialization_leaves_driver_unusable() {
        let serial: BufferedSerial<MockPort> =
            BufferedSerial::new(MockPort::rejecting_config());
        assert_eq!(serial.initialize(), Err(InvalidConfig));
        assert!(!serial.is_initialized());
        assert!(serial.split().is_none());
    }

    #[test]
    fn interrupt_driven_transmit_returns_to_idle() {
        let serial: BufferedSerial<MockPort> = BufferedSerial::new(MockPort::new());
        initialized(&serial);
        let (mut tx, _rx) = serial.split().unwrap();

        assert!(!serial.is_busy());
        let message: Vec<u8> = (0..10).collect();
        tx.send_bytes(&message).unwrap();

        assert!(serial.is_busy());
        assert!(serial.port().is_listening(Event::TxEmpty));
        assert_eq!(serial.tx_size(), 10);

        for _ in 0..10 {
            unsafe { serial.on_interrupt() };
            serial.port().shift_out();
        }

        assert_eq!(serial.tx_size(), 0);
        assert!(!serial.is_busy());
        assert!(!serial.port().is_listening(Event::TxEmpty));
        assert_eq!(serial.port().transmitted(), message);
    }

    #[test]
    fn tx_interrupt_fills_hardware_fifo() {
        let serial: BufferedSerial<MockPort> =
            BufferedSerial::new(MockPort::with_tx_fifo(4));
        initialized(&serial);
        let (mut tx, _rx) = serial.split().unwrap();

        let message: Vec<u8> = (0..10).collect();
        tx.send_bytes(&message).unwrap();

        let mut entries = 0;
        while serial.port().tx_interrupt_pending() {
            let queued = serial.port().tx_fifo_len();
            unsafe { serial.on_interrupt() };
            // Returning with the interrupt still pending and nothing written would re-enter
            // the handler forever
            assert!(
                serial.port().tx_fifo_len() > queued
                    || !serial.port().is_listening(Event::TxEmpty),
                "handler made no progress on entry {}",
                entries
            );
            if entries == 0 {
                assert_eq!(serial.port().tx_fifo_len(), 4);
            }
            entries += 1;
            serial.port().shift_out();
        }

        // One entry fills the FIFO, then one per byte leaving it
        assert_eq!(entries, 7);
        assert!(!serial.is_busy());
        while serial.port().tx_fifo_len() > 0 {
            serial.port().shift_out();
        }
        assert_eq!(serial.port().transmitted(), message);
    }

    #[test]
    fn transmit_restarts_after_going_idle() {
        let serial: BufferedSerial<MockPort> = BufferedSerial::new(MockPort::new());
        initialized(&serial);
        let (mut tx, _rx) = serial.split().unwrap();

        tx.send_byte(b'a').unwrap();
        unsafe { serial.on_interrupt() };
        serial.port().shift_out();
        assert!(!serial.is_busy());

        tx.send_byte(b'b').unwrap();
        assert!(serial.is_busy());
        // Queued while sending, picked up by the same run
        tx.send_byte(b'c').unwrap();

        while serial.is_busy() {
            unsafe { serial.on_interrupt() };
            serial.port().shift_out();
        }
        assert_eq!(serial.port().transmitted(), b"abc");
    }

    #[test]
    fn dma_transmit_chains_bursts() {
        let serial: BufferedSerial<MockPort, MockDma> =
            BufferedSerial::with_dma(MockPort::new(), MockDma::new());
        initialized(&serial);
        assert!(serial.dma().unwrap().is_initialized());
        let (mut tx, _rx) = serial.split().unwrap();
        let dma = serial.dma().unwrap();

        let message: Vec<u8> = (0..500).map(|i| i as u8).collect();
        tx.send_bytes(&message).unwrap();

        let mut bursts = Vec::new();
        while let Some(len) = dma.in_flight() {
            assert!(serial.is_busy());
            bursts.push(len);
            dma.complete();
            unsafe { serial.on_dma_interrupt() };
        }

        assert_eq!(bursts, [200, 200, 100]);
        assert!(!serial.is_busy());
        assert_eq!(serial.tx_size(), 0);
        assert_eq!(dma.transmitted(), message);

        // Idle after the last completion until the next send kicks off a burst
        assert_eq!(dma.in_flight(), None);
        tx.send_bytes(b"more").unwrap();
        assert!(serial.is_busy());
        assert_eq!(dma.in_flight(), Some(4));
        dma.complete();
        unsafe { serial.on_dma_interrupt() };
        assert!(!serial.is_busy());
        // The TX-empty interrupt is never used with DMA
        assert!(!serial.port().is_listening(Event::TxEmpty));
    }

    #[test]
    fn dma_goes_idle_between_bursts_when_drained() {
        let serial: BufferedSerial<MockPort, MockDma, 600, 200, 4> =
            BufferedSerial::with_dma(MockPort::new(), MockDma::new());
        initialized(&serial);
        let (mut tx, _rx) = serial.split().unwrap();
        let dma = serial.dma().unwrap();

        tx.send_bytes(b"ping").unwrap();
        assert_eq!(dma.in_flight(), Some(4));

        // Queued during the burst, sent by the next one
        tx.send_bytes(b"!").unwrap();
        assert_eq!(serial.tx_size(), 1);

        dma.complete();
        unsafe { serial.on_dma_interrupt() };
        assert!(serial.is_busy());
        assert_eq!(dma.in_flight(), Some(1));

        dma.complete();
        unsafe { serial.on_dma_interrupt() };
        assert!(!serial.is_busy());
        assert_eq!(dma.in_flight(), None);

        tx.send_bytes(b"pong").unwrap();
        assert!(serial.is_busy());
        dma.complete();
        unsafe { serial.on_dma_interrupt() };
        assert!(!serial.is_busy());
        assert_eq!(dma.transmitted(), b"ping!pong");
    }

    #[test]
    fn dma_error_ends_burst_and_continues() {
        let serial: BufferedSerial<MockPort, MockDma, 600, 200, 3> =
            BufferedSerial::with_dma(MockPort::new(), MockDma::new());
        initialized(&serial);
        let (mut tx, _rx) = serial.split().unwrap();
        let dma = serial.dma().unwrap();

        tx.send_bytes(b"abcdef").unwrap();
        dma.fail_next_transfer();
        dma.complete();
        unsafe { serial.on_dma_interrupt() };

        assert!(serial.is_busy());
        assert_eq!(dma.in_flight(), Some(3));
        dma.complete();
        unsafe { serial.on_dma_interrupt() };
        assert!(!serial.is_busy());
        assert_eq!(dma.transmitted(), b"def");
    }

    #[test]
    fn spurious_dma_interrupt_is_ignored() {
        let serial: BufferedSerial<MockPort, MockDma> =
            BufferedSerial::with_dma(MockPort::new(), MockDma::new());
        initialized(&serial);

        unsafe { serial.on_dma_interrupt() };
        assert!(!serial.is_busy());
        assert_eq!(serial.dma().unwrap().in_flight(), None);
    }

    #[test]
    fn send_overflow_keeps_accepted_prefix() {
        let serial: BufferedSerial<MockPort, NoDma, 4, 4, 1> =
            BufferedSerial::new(MockPort::new());
        initialized(&serial);
        let (mut tx, _rx) = serial.split().unwrap();

        assert_eq!(
            tx.send_bytes(&[1, 2, 3, 4, 5, 6]),
            Err(BufferError::Overflow { accepted: 4 })
        );
        assert_eq!(tx.tx_size(), 4);
        assert_eq!(tx.tx_overflow_size(), 2);

        assert_eq!(tx.send_byte(7), Err(BufferError::Overflow { accepted: 0 }));
        assert_eq!(serial.tx_overflow_size(), 3);

        while serial.is_busy() {
            unsafe { serial.on_interrupt() };
            serial.port().shift_out();
        }
        assert_eq!(serial.port().transmitted(), [1, 2, 3, 4]);
        assert_eq!(serial.tx_overflow_size(), 3);
        assert_eq!(tx.send_bytes(&[]), Ok(()));
    }

    #[test]
    fn receive_overflow_drops_newest_bytes() {
        let serial: BufferedSerial<MockPort, NoDma, 4, 4, 1> =
            BufferedSerial::new(MockPort::new());
        initialized(&serial);
        let (_tx, mut rx) = serial.split().unwrap();

        serial.port().receive(&[10, 11, 12, 13]);
        unsafe { serial.on_interrupt() };
        assert_eq!(rx.rx_size(), 4);
        assert_eq!(rx.rx_overflow_size(), 0);

        for (n, byte) in (20..23).enumerate() {
            serial.port().receive(&[byte]);
            unsafe { serial.on_interrupt() };
            assert_eq!(rx.rx_overflow_size(), n as u32 + 1);
            assert_eq!(rx.rx_size(), 4);
        }

        let mut buf = [0; 4];
        rx.get_bytes(&mut buf).unwrap();
        assert_eq!(buf, [10, 11, 12, 13]);
        assert_eq!(rx.get_byte(), None);
    }

    #[test]
    fn get_bytes_is_all_or_nothing() {
        let serial: BufferedSerial<MockPort> = BufferedSerial::new(MockPort::new());
        initialized(&serial);
        let (_tx, mut rx) = serial.split().unwrap();

        serial.port().receive(b"abc");
        unsafe { serial.on_interrupt() };

        let mut frame = [0; 4];
        assert_eq!(
            rx.get_bytes(&mut frame),
            Err(BufferError::Underflow { available: 3 })
        );
        assert_eq!(frame, [0; 4]);
        assert_eq!(rx.rx_size(), 3);

        let mut frame = [0; 3];
        assert_eq!(rx.get_bytes(&mut frame), Ok(()));
        assert_eq!(&frame, b"abc");
        assert_eq!(rx.rx_size(), 0);
    }

    #[test]
    fn receive_faults_are_absorbed() {
        let serial: BufferedSerial<MockPort> = BufferedSerial::new(MockPort::new());
        initialized(&serial);
        let (_tx, mut rx) = serial.split().unwrap();

        serial.port().receive(&[1]);
        serial.port().inject_error(Error::Framing);
        serial.port().inject_error(Error::Overrun);
        serial.port().receive(&[2]);
        unsafe { serial.on_interrupt() };

        assert_eq!(rx.get_byte(), Some(1));
        assert_eq!(rx.get_byte(), Some(2));
        assert_eq!(rx.get_byte(), None);
        assert_eq!(serial.rx_overflow_size(), 0);
    }

    #[test]
    fn overflow_counter_saturates() {
        let counter = AtomicU32::new(u32::MAX - 1);
        add_saturating(&counter, 5);
        assert_eq!(counter.load(Ordering::Relaxed), u32::MAX);
        add_saturating(&counter, usize::MAX);
        assert_eq!(counter.load(Ordering::Relaxed), u32::MAX);
    }

    #[test]
    fn embedded_io_and_fmt_adapters() {
        let serial: BufferedSerial<MockPort, NoDma, 8, 8, 1> =
            BufferedSerial::new(MockPort::new());
        initialized(&serial);
        let (mut tx, mut rx) = serial.split().unwrap();

        assert_eq!(tx.write_ready(), Ok(true));
        assert_eq!(io::Write::write(&mut tx, b"0123456789"), Ok(8));
        assert_eq!(tx.write_ready(), Ok(false));
        assert_eq!(tx.tx_overflow_size(), 0);

        while serial.is_busy() {
            unsafe { serial.on_interrupt() };
            serial.port().shift_out();
        }
        assert_eq!(io::Write::flush(&mut tx), Ok(()));

        write!(tx, "v={}", 42).unwrap();
        assert_eq!(tx.tx_size(), 4);
        assert!(write!(tx, "{}", "too long").is_err());

        assert_eq!(rx.read_ready(), Ok(false));
        serial.port().receive(b"hi");
        unsafe { serial.on_interrupt() };
        assert_eq!(rx.read_ready(), Ok(true));
        let mut buf = [0; 8];
        assert_eq!(rx.read(&mut buf), Ok(2));
        assert_eq!(&buf[..2], b"hi");
    }
}
