//! GPDMA transmit channel for the buffered serial driver
//!
//! The GPDMA is the general purpose DMA engine of the STM32H5 family. Each GPDMA has 8 channels,
//! and any channel can service any hardware request. Channels 0-5 address a linear space only,
//! which is all a USART transmit needs, so [`UsartTxDma`] is restricted to those.
//!
//! # Usage
//!
//! The channel moves one burst at a time from the driver's scratch buffer into the transmit data
//! register of the USART. Its request line is the GPDMA request number of the USART's TX request
//! (see the GPDMA request table of the reference manual, e.g. 22 for USART1_TX on RM0492).
//!
//! ```ignore
//! use stm32h5xx_usart_fifo::{
//!     gpdma::UsartTxDma,
//!     pac,
//!     serial::{config::Config, BufferedSerial, UsartPort},
//!     time::Hertz,
//! };
//!
//! static SERIAL: BufferedSerial<
//!     UsartPort<pac::USART1>,
//!     UsartTxDma<pac::USART1, pac::GPDMA1, 0>,
//! > = BufferedSerial::with_dma(
//!     UsartPort::new(Config::new(Hertz::Hz(115_200))),
//!     UsartTxDma::new(22),
//! );
//!
//! #[interrupt]
//! fn GPDMA1_CH0() {
//!     unsafe { SERIAL.on_dma_interrupt() };
//! }
//! ```

use core::fmt;
use core::marker::PhantomData;
use core::sync::atomic::{fence, Ordering};

use cortex_m::interrupt;
#[cfg(feature = "log")]
use log::debug;

use crate::serial::config::{InterruptPriority, InvalidConfig};
use crate::serial::{Instance as UsartInstance, TxDma};
use crate::stm32::{gpdma1, Interrupt, GPDMA1, GPDMA2, NVIC_PRIO_BITS, RCC};
use crate::Sealed;

mod ch;

use ch::ChannelRegs;

/// Errors that end a transfer
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Error {
    /// The DMA determined that a user setting was invalid while starting a transfer.
    ///
    /// See RM0492 Rev 3 Section 15.4.16 for details on how to debug
    UserSettingError,
    /// An error occurred transferring data during a transfer
    ///
    /// See RM0492 Rev 3 Section 15.4.16 for details on how to debug
    DataTransferError,
    /// An error occurred loading a linked transfer configuration
    LinkTransferError,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::UserSettingError => f.write_str("invalid DMA channel setting"),
            Error::DataTransferError => f.write_str("DMA data transfer error"),
            Error::LinkTransferError => f.write_str("DMA link transfer error"),
        }
    }
}

impl core::error::Error for Error {}

pub trait Instance: Sealed {
    fn ptr() -> *const gpdma1::RegisterBlock;

    /// Access channel registers. Valid for channels 0-5 only.
    /// # Safety
    /// This function is unsafe because it allows access to the DMA channel registers
    /// without enforcing exclusive access. The caller must ensure that no data races occur.
    unsafe fn ch(channel: usize) -> &'static gpdma1::CH {
        (*Self::ptr()).ch(channel)
    }

    /// Enable the AHB clock of the controller
    fn enable_clock();

    /// Interrupt line of a linear channel
    fn interrupt(channel: usize) -> Option<Interrupt>;
}

macro_rules! gpdma {
    ($($GPDMAX:ident: $en:ident,)+) => { paste::item! {
        $(
            impl Sealed for $GPDMAX {}

            impl Instance for $GPDMAX {
                fn ptr() -> *const gpdma1::RegisterBlock {
                    $GPDMAX::ptr()
                }

                fn enable_clock() {
                    // unsafe: Owned exclusive access to this bitfield
                    interrupt::free(|_| {
                        let enr = unsafe { &(*RCC::ptr()).ahb1enr() };
                        enr.modify(|_, w| w.$en().set_bit());
                    });
                }

                fn interrupt(channel: usize) -> Option<Interrupt> {
                    match channel {
                        0 => Some(Interrupt::[<$GPDMAX _CH0>]),
                        1 => Some(Interrupt::[<$GPDMAX _CH1>]),
                        2 => Some(Interrupt::[<$GPDMAX _CH2>]),
                        3 => Some(Interrupt::[<$GPDMAX _CH3>]),
                        4 => Some(Interrupt::[<$GPDMAX _CH4>]),
                        5 => Some(Interrupt::[<$GPDMAX _CH5>]),
                        _ => None,
                    }
                }
            }
        )+
    }};
}

gpdma! {
    GPDMA1: gpdma1en,
    GPDMA2: gpdma2en,
}

/// Channel `N` of `DMA`, feeding the transmit data register of `USART`
///
/// Like [`UsartPort`](crate::serial::UsartPort), this is a zero-sized handle that can be built in
/// a `static`. The channel must not be used by anything else.
pub struct UsartTxDma<USART, DMA, const N: usize> {
    request: u8,
    priority: InterruptPriority,
    _marker: PhantomData<fn() -> (USART, DMA)>,
}

impl<USART, DMA, const N: usize> UsartTxDma<USART, DMA, N>
where
    USART: UsartInstance,
    DMA: Instance,
{
    const LINEAR_CHANNEL: () =
        assert!(N < 6, "only GPDMA channels 0 to 5 can feed a USART");

    /// Channel serving GPDMA hardware request number `request`
    ///
    /// The channel interrupt gets the default priority of the serial interrupt.
    pub const fn new(request: u8) -> Self {
        #[allow(clippy::let_unit_value)]
        let () = Self::LINEAR_CHANNEL;
        UsartTxDma {
            request,
            priority: InterruptPriority::new(3, 7, 1),
            _marker: PhantomData,
        }
    }

    /// Set the priority of the channel interrupt
    pub const fn priority(mut self, priority: InterruptPriority) -> Self {
        self.priority = priority;
        self
    }

    pub fn request(&self) -> u8 {
        self.request
    }

    #[inline(always)]
    fn ch(&self) -> &'static gpdma1::CH {
        // unsafe: only accessing registers belonging to channel N, which this handle owns
        unsafe { DMA::ch(N) }
    }
}

impl<USART, DMA, const N: usize> TxDma for UsartTxDma<USART, DMA, N>
where
    USART: UsartInstance,
    DMA: Instance,
{
    type Error = Error;

    fn initialize(&self) -> Result<(), InvalidConfig> {
        let priority = self.priority.encode(NVIC_PRIO_BITS)?;
        let irq = DMA::interrupt(N).ok_or(InvalidConfig)?;

        DMA::enable_clock();

        let ch = self.ch();
        ch.reset();
        ch.clear_all_event_flags();
        ch.configure_memory_to_peripheral(self.request);

        // unsafe: the transmit data register of the USART owned by the driver
        let tdr = unsafe { (*USART::ptr()).tdr().as_ptr() as u32 };
        ch.set_destination_address(tdr);
        ch.enable_transfer_interrupts();

        // unsafe: the port has configured CR3, only the DMA transmitter enable is added
        unsafe {
            (*USART::ptr()).cr3().modify(|_, w| w.dmat().enabled());
        }

        // unsafe: the NVIC registers of this channel interrupt belong to the driver
        unsafe {
            let mut cp = cortex_m::Peripherals::steal();
            cp.NVIC.set_priority(irq, priority);
            cortex_m::peripheral::NVIC::unmask(irq);
        }

        #[cfg(feature = "log")]
        debug!(
            "{} channel {}: request {}, TDR {:#010X}, priority {:#04X}",
            crate::stripped_type_name::<DMA>(),
            N,
            self.request,
            tdr,
            priority
        );

        Ok(())
    }

    unsafe fn start(&self, data: *const u8, len: usize) {
        let ch = self.ch();
        ch.set_source_address(data as u32);
        ch.set_block_size(len as u16);

        // Preserve the instruction and bus ordering of preceding buffer access
        // to the subsequent access by the DMA peripheral due to enabling it.
        fence(Ordering::SeqCst);

        ch.enable();
    }

    fn finish(&self) -> Result<(), Self::Error> {
        let ch = self.ch();
        let result = ch.check_error();
        ch.clear_all_event_flags();
        if result.is_err() {
            // A failed channel disables itself. Reset it so the next burst starts clean.
            ch.reset();
        }
        interrupt_clear_clock_sync_delay!(ch.sr());
        result
    }
}
