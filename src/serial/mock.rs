//! Test doubles for the hardware seam
//!
//! `MockPort` models a USART with a transmit FIFO (one slot deep unless built with
//! [`MockPort::with_tx_fifo`]) and a receive register fed from a queue. Like the hardware in FIFO
//! mode, the TX-empty interrupt stays pending while the transmit FIFO has a free slot. `MockDma` records every burst it is started with.

use core::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::vec::Vec;

use super::config::InvalidConfig;
use super::port::{SerialPort, TxDma};
use super::{Error, Event};

pub(crate) struct MockPort {
    accept_config: bool,
    initialize_count: Cell<usize>,
    rdr: RefCell<VecDeque<Result<u8, Error>>>,
    tx_fifo: RefCell<VecDeque<u8>>,
    tx_depth: usize,
    wire: RefCell<Vec<u8>>,
    rxneie: Cell<bool>,
    txeie: Cell<bool>,
}

impl MockPort {
    pub fn new() -> Self {
        MockPort {
            accept_config: true,
            initialize_count: Cell::new(0),
            rdr: RefCell::new(VecDeque::new()),
            tx_fifo: RefCell::new(VecDeque::new()),
            tx_depth: 1,
            wire: RefCell::new(Vec::new()),
            rxneie: Cell::new(false),
            txeie: Cell::new(false),
        }
    }

    /// A port whose hardware rejects the configuration
    pub fn rejecting_config() -> Self {
        MockPort {
            accept_config: false,
            ..Self::new()
        }
    }

    /// A port with a `depth` byte deep transmit FIFO
    pub fn with_tx_fifo(depth: usize) -> Self {
        MockPort {
            tx_depth: depth,
            ..Self::new()
        }
    }

    pub fn initialize_count(&self) -> usize {
        self.initialize_count.get()
    }

    /// Bytes arriving on the wire
    pub fn receive(&self, bytes: &[u8]) {
        self.rdr.borrow_mut().extend(bytes.iter().copied().map(Ok));
    }

    /// A receive fault, reported once by `read_byte`
    pub fn inject_error(&self, error: Error) {
        self.rdr.borrow_mut().push_back(Err(error));
    }

    /// Move the oldest byte of the transmit FIFO to the wire
    pub fn shift_out(&self) {
        if let Some(byte) = self.tx_fifo.borrow_mut().pop_front() {
            self.wire.borrow_mut().push(byte);
        }
    }

    /// Bytes written but not yet on the wire
    pub fn tx_fifo_len(&self) -> usize {
        self.tx_fifo.borrow().len()
    }

    /// Whether the NVIC would enter the handler for the TX-empty event
    pub fn tx_interrupt_pending(&self) -> bool {
        self.txeie.get() && self.tx_fifo_len() < self.tx_depth
    }

    pub fn transmitted(&self) -> Vec<u8> {
        self.wire.borrow().clone()
    }
}

impl SerialPort for MockPort {
    fn initialize(&self) -> Result<(), InvalidConfig> {
        if !self.accept_config {
            return Err(InvalidConfig);
        }
        self.initialize_count.set(self.initialize_count.get() + 1);
        self.listen(Event::RxNotEmpty);
        Ok(())
    }

    fn read_byte(&self) -> Result<Option<u8>, Error> {
        self.rdr.borrow_mut().pop_front().transpose()
    }

    fn is_tx_ready(&self) -> bool {
        self.tx_fifo_len() < self.tx_depth
    }

    fn write_byte(&self, byte: u8) {
        let mut fifo = self.tx_fifo.borrow_mut();
        assert!(fifo.len() < self.tx_depth, "transmit FIFO overrun");
        fifo.push_back(byte);
    }

    fn listen(&self, event: Event) {
        match event {
            Event::RxNotEmpty => self.rxneie.set(true),
            Event::TxEmpty => self.txeie.set(true),
        }
    }

    fn unlisten(&self, event: Event) {
        match event {
            Event::RxNotEmpty => self.rxneie.set(false),
            Event::TxEmpty => self.txeie.set(false),
        }
    }

    fn is_listening(&self, event: Event) -> bool {
        match event {
            Event::RxNotEmpty => self.rxneie.get(),
            Event::TxEmpty => self.txeie.get(),
        }
    }
}

#[derive(Debug, PartialEq, Eq)]
pub(crate) struct TransferError;

pub(crate) struct MockDma {
    initialized: Cell<bool>,
    in_flight: RefCell<Option<Vec<u8>>>,
    fail_next: Cell<bool>,
    error_pending: Cell<bool>,
    sent: RefCell<Vec<u8>>,
}

impl MockDma {
    pub fn new() -> Self {
        MockDma {
            initialized: Cell::new(false),
            in_flight: RefCell::new(None),
            fail_next: Cell::new(false),
            error_pending: Cell::new(false),
            sent: RefCell::new(Vec::new()),
        }
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized.get()
    }

    /// Length of the burst in progress
    pub fn in_flight(&self) -> Option<usize> {
        self.in_flight.borrow().as_ref().map(Vec::len)
    }

    /// Make the next completed burst end with a transfer error
    pub fn fail_next_transfer(&self) {
        self.fail_next.set(true);
    }

    /// Finish the burst in progress, as the channel would before raising its interrupt
    pub fn complete(&self) {
        let Some(burst) = self.in_flight.borrow_mut().take() else {
            return;
        };
        if self.fail_next.take() {
            self.error_pending.set(true);
        } else {
            self.sent.borrow_mut().extend(burst);
        }
    }

    pub fn transmitted(&self) -> Vec<u8> {
        self.sent.borrow().clone()
    }
}

impl TxDma for MockDma {
    type Error = TransferError;

    fn initialize(&self) -> Result<(), InvalidConfig> {
        self.initialized.set(true);
        Ok(())
    }

    unsafe fn start(&self, data: *const u8, len: usize) {
        let mut in_flight = self.in_flight.borrow_mut();
        assert!(in_flight.is_none(), "burst started while another is in flight");
        *in_flight = Some(core::slice::from_raw_parts(data, len).to_vec());
    }

    fn finish(&self) -> Result<(), Self::Error> {
        if self.error_pending.take() {
            Err(TransferError)
        } else {
            Ok(())
        }
    }
}
