//! USART implementation of the serial port
//!
//! This provides the register-level side of [`BufferedSerial`](super::BufferedSerial) for the
//! USART peripherals. See the documentation for the `serial` module for more information.

use super::config::{
    self, baud_divisors, Config, InvalidConfig, Parity, StopBits, WordSize,
};
use super::*;

use core::cell::UnsafeCell;
use core::marker::PhantomData;
use core::ptr;

use cortex_m::interrupt;
#[cfg(feature = "log")]
use log::debug;

use crate::stm32::{
    usart1,
    usart1::cr1::{M0, M1, PCE, PS},
    Interrupt, NVIC_PRIO_BITS,
};

mod usart_def;

pub(crate) use usart_def::PinAf;

pub trait Instance: crate::Sealed {
    #[doc(hidden)]
    const INTERRUPT: Interrupt;

    #[doc(hidden)]
    fn ptr() -> *const usart1::RegisterBlock;

    /// Enable the bus clock of the peripheral and pulse its reset
    #[doc(hidden)]
    fn enable_and_reset();

    /// TX and RX pins for a remap selection, `None` if the instance has no such pin pair
    #[doc(hidden)]
    fn pins(remap: config::Remap) -> Option<(PinAf, PinAf)>;
}

/// Register-level serial port on a USART instance
///
/// The port is a zero-sized handle on the instance registers, so it can be constructed in a
/// `static`. Only one port may be constructed per instance.
pub struct UsartPort<USART> {
    config: Config,
    _usart: PhantomData<fn() -> USART>,
}

impl<USART: Instance> UsartPort<USART> {
    pub const fn new(config: Config) -> Self {
        UsartPort {
            config,
            _usart: PhantomData,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    #[inline(always)]
    fn usart(&self) -> &usart1::RegisterBlock {
        // unsafe: the port is the only user of this instance
        unsafe { &*USART::ptr() }
    }

    /// Runs the serial port configuration process
    ///
    /// The serial port must be disabled when called.
    fn configure(&self) -> Result<(), InvalidConfig> {
        let config = &self.config;
        let divisors = baud_divisors(config.kernel_clock, config.baudrate)?;

        #[cfg(feature = "log")]
        {
            let brr = u32::from(divisors.brr);
            let baudrate = if divisors.over8 {
                // Undo the fraction shift of 8x oversampling
                let usartdiv = (brr & !0xF) | ((brr & 0x7) << 1);
                2 * (config.kernel_clock.raw() / divisors.division) / usartdiv
            } else {
                config.kernel_clock.raw() / divisors.division / brr
            };
            debug!(
                "{}: Kernel clock: {}; Prescalar: {}; Over8: {}; BRR: {:#X}; Baudrate: {}; Frame: {} us",
                crate::stripped_type_name::<USART>(),
                config.kernel_clock,
                divisors.division,
                divisors.over8,
                divisors.brr,
                baudrate,
                config.frame_time().map_or(0, |t| t.ticks())
            );
        }

        let usart = self.usart();

        // unsafe: PRESCALER values 0 to 11 are all valid divisions
        usart
            .presc()
            .write(|w| unsafe { w.prescaler().bits(divisors.prescaler) });
        usart.brr().write(|w| w.brr().set(divisors.brr));

        // Reset registers to disable advanced USART features
        usart.cr3().reset();

        usart.cr2().write(|w| match config.stop_bits {
            StopBits::Stop0p5 => w.stop().stop0p5(),
            StopBits::Stop1 => w.stop().stop1(),
            StopBits::Stop1p5 => w.stop().stop1p5(),
            StopBits::Stop2 => w.stop().stop2(),
        });

        // The parity bit is part of the frame length
        let (m1, m0) = match (config.word_size, config.parity) {
            (WordSize::DataBits7, Parity::ParityNone) => (M1::Bit7, M0::Bit8),
            (WordSize::DataBits7, _) => (M1::M0, M0::Bit8),
            (WordSize::DataBits8, Parity::ParityNone) => (M1::M0, M0::Bit8),
            (WordSize::DataBits8, _) => (M1::M0, M0::Bit9),
        };

        // Enable transmission and receiving and configure frame
        usart.cr1().modify(|_, w| {
            w.fifoen()
                .enabled() // FIFO mode enabled
                .over8()
                .bit(divisors.over8)
                .ue()
                .enabled()
                .te()
                .enabled()
                .re()
                .enabled()
                .m1()
                .variant(m1)
                .m0()
                .variant(m0)
                .pce()
                .variant(match config.parity {
                    Parity::ParityNone => PCE::Disabled,
                    _ => PCE::Enabled,
                })
                .ps()
                .variant(match config.parity {
                    Parity::ParityOdd => PS::Odd,
                    _ => PS::Even,
                })
        });

        Ok(())
    }

    /// Program the priority grouping and the priority of the USART interrupt, then unmask it
    fn enable_interrupt(&self, prigroup: u8, priority: u8) {
        // unsafe: the priority grouping is written once per driver and every driver is expected
        // to use the same grouping. The NVIC registers of this interrupt belong to the port.
        unsafe {
            let mut cp = cortex_m::Peripherals::steal();

            interrupt::free(|_| {
                // VECTKEY must accompany every write. Keep the security and endianness bits.
                let aircr = cp.SCB.aircr.read() & 0x0000_E008;
                cp.SCB.aircr.write(
                    (0x05FA << 16) | aircr | (u32::from(prigroup) << 8),
                );
            });

            cp.NVIC.set_priority(USART::INTERRUPT, priority);
            cortex_m::peripheral::NVIC::unmask(USART::INTERRUPT);
        }
    }

    fn clear_error_flag(&self, error: Error) {
        let usart = self.usart();
        match error {
            Error::Framing => usart.icr().write(|w| w.fecf().clear()),
            Error::Noise => usart.icr().write(|w| w.necf().clear()),
            Error::Overrun => usart.icr().write(|w| w.orecf().clear()),
            Error::Parity => usart.icr().write(|w| w.pecf().clear()),
        };
    }

    fn read_data(&self) -> u8 {
        // NOTE(read_volatile) see `write_byte` below
        unsafe { ptr::read_volatile(self.usart().rdr() as *const _ as *const u8) }
    }
}

macro_rules! check_status_error {
    ($isr:expr) => {
        if $isr.pe().bit_is_set() {
            Err(Error::Parity)
        } else if $isr.fe().bit_is_set() {
            Err(Error::Framing)
        } else if $isr.ne().bit_is_set() {
            Err(Error::Noise)
        } else if $isr.ore().bit_is_set() {
            Err(Error::Overrun)
        } else {
            Ok(())
        }
    };
}

impl<USART: Instance> SerialPort for UsartPort<USART> {
    fn initialize(&self) -> Result<(), InvalidConfig> {
        // Validate everything before touching the hardware
        let priority = self.config.priority.encode(NVIC_PRIO_BITS)?;
        let prigroup = self.config.priority.prigroup(NVIC_PRIO_BITS)?;
        let (tx, rx) = USART::pins(self.config.remap).ok_or(InvalidConfig)?;
        baud_divisors(self.config.kernel_clock, self.config.baudrate)?;

        USART::enable_and_reset();
        tx.into_alternate(false);
        rx.into_alternate(true);

        self.usart().cr1().reset();
        self.configure()?;

        self.enable_interrupt(prigroup, priority);
        self.listen(Event::RxNotEmpty);

        #[cfg(feature = "log")]
        debug!(
            "{}: TX {:?}, RX {:?}, priority {:#04X}",
            crate::stripped_type_name::<USART>(),
            tx,
            rx,
            priority
        );

        Ok(())
    }

    fn read_byte(&self) -> Result<Option<u8>, Error> {
        let isr = self.usart().isr().read();

        if let Err(error) = check_status_error!(isr) {
            self.clear_error_flag(error);
            // Drop the byte that came with the fault
            if isr.rxfne().is_data_ready() {
                let _ = self.read_data();
            }
            interrupt_clear_clock_sync_delay!(self.usart().isr());
            return Err(error);
        }

        if isr.rxfne().is_data_ready() {
            Ok(Some(self.read_data()))
        } else {
            Ok(None)
        }
    }

    fn is_tx_ready(&self) -> bool {
        // In FIFO mode TXEIE enables the TX FIFO not full interrupt
        self.usart().isr().read().txfnf().bit_is_set()
    }

    fn write_byte(&self, byte: u8) {
        // NOTE(unsafe) atomic write to stateless register
        // NOTE(write_volatile) 8-bit write that's not possible through the svd2rust API
        unsafe {
            let tdr = self.usart().tdr() as *const _ as *const UnsafeCell<u8>;
            ptr::write_volatile(UnsafeCell::raw_get(tdr), byte);
        }
    }

    fn listen(&self, event: Event) {
        match event {
            Event::RxNotEmpty => {
                self.usart().cr1().modify(|_, w| w.rxneie().enabled());
            }
            Event::TxEmpty => {
                self.usart().cr1().modify(|_, w| w.txeie().enabled());
            }
        }
    }

    fn unlisten(&self, event: Event) {
        match event {
            Event::RxNotEmpty => {
                self.usart().cr1().modify(|_, w| w.rxneie().disabled());
            }
            Event::TxEmpty => {
                self.usart().cr1().modify(|_, w| w.txeie().disabled());
            }
        }
        interrupt_clear_clock_sync_delay!(self.usart().cr1());
    }

    fn is_listening(&self, event: Event) -> bool {
        let cr1 = self.usart().cr1().read();
        match event {
            Event::RxNotEmpty => cr1.rxneie().bit_is_set(),
            Event::TxEmpty => cr1.txeie().bit_is_set(),
        }
    }
}
