use cortex_m::interrupt;

use crate::serial::config::Remap;
use crate::stm32::{gpioa, usart1, Interrupt, RCC, USART1, USART2, USART3};

use super::Instance;

/// GPIO port of a USART pin
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Port {
    A,
    B,
    C,
    D,
}

impl Port {
    fn ptr(self) -> *const gpioa::RegisterBlock {
        use crate::stm32::{GPIOA, GPIOB, GPIOC, GPIOD};

        match self {
            Port::A => GPIOA::ptr(),
            Port::B => GPIOB::ptr() as _,
            Port::C => GPIOC::ptr() as _,
            Port::D => GPIOD::ptr() as _,
        }
    }

    fn enable_clock(self) {
        // unsafe: Owned exclusive access to this bitfield
        interrupt::free(|_| {
            let enr = unsafe { &(*RCC::ptr()).ahb2enr() };
            enr.modify(|_, w| match self {
                Port::A => w.gpioaen().set_bit(),
                Port::B => w.gpioben().set_bit(),
                Port::C => w.gpiocen().set_bit(),
                Port::D => w.gpioden().set_bit(),
            });
        });
    }
}

/// A pin and the alternate function that connects it to a USART
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct PinAf {
    pub port: Port,
    pub pin: u8,
    pub af: u8,
}

impl PinAf {
    const fn new(port: Port, pin: u8, af: u8) -> Self {
        PinAf { port, pin, af }
    }

    /// Enable the port clock and switch the pin to its alternate function, at high speed
    ///
    /// An input additionally gets the pull-up, so a disconnected line reads as idle.
    pub(crate) fn into_alternate(self, pull_up: bool) {
        self.port.enable_clock();

        let n = u32::from(self.pin);
        let af = u32::from(self.af);
        let two = 2 * n;

        // unsafe: the pin belongs to the USART it was selected for
        interrupt::free(|_| unsafe {
            let gpio = &*self.port.ptr();

            if n < 8 {
                gpio.afrl().modify(|r, w| {
                    w.bits((r.bits() & !(0xF << (4 * n))) | (af << (4 * n)))
                });
            } else {
                let m = n - 8;
                gpio.afrh().modify(|r, w| {
                    w.bits((r.bits() & !(0xF << (4 * m))) | (af << (4 * m)))
                });
            }

            gpio.ospeedr().modify(|r, w| {
                w.bits((r.bits() & !(0b11 << two)) | (0b10 << two))
            });
            let pull = if pull_up { 0b01 } else { 0b00 };
            gpio.pupdr().modify(|r, w| {
                w.bits((r.bits() & !(0b11 << two)) | (pull << two))
            });
            gpio.moder().modify(|r, w| {
                w.bits((r.bits() & !(0b11 << two)) | (0b10 << two))
            });
        });
    }
}

// Implemented by all USART instances
macro_rules! instances {
    ($(
        $USARTX:ident: $APBn:ident {
            $($remap:ident => TX: $tx_port:ident $tx_pin:literal, RX: $rx_port:ident $rx_pin:literal, AF: $af:literal;)+
        }
    )+) => { paste::item! {
        $(
            impl Instance for $USARTX {
                const INTERRUPT: Interrupt = Interrupt::$USARTX;

                fn ptr() -> *const usart1::RegisterBlock {
                    <$USARTX>::ptr() as *const _
                }

                fn enable_and_reset() {
                    // unsafe: Owned exclusive access to these bitfields
                    interrupt::free(|_| {
                        let rcc = unsafe { &*RCC::ptr() };
                        rcc.[< $APBn:lower enr >]()
                            .modify(|_, w| w.[< $USARTX:lower en >]().set_bit());
                        rcc.[< $APBn:lower rstr >]()
                            .modify(|_, w| w.[< $USARTX:lower rst >]().set_bit());
                        rcc.[< $APBn:lower rstr >]()
                            .modify(|_, w| w.[< $USARTX:lower rst >]().clear_bit());
                    });
                }

                #[allow(unreachable_patterns)]
                fn pins(remap: Remap) -> Option<(PinAf, PinAf)> {
                    match remap {
                        $(
                            Remap::$remap => Some((
                                PinAf::new(Port::$tx_port, $tx_pin, $af),
                                PinAf::new(Port::$rx_port, $rx_pin, $af),
                            )),
                        )+
                        _ => None,
                    }
                }
            }

            impl crate::Sealed for $USARTX {}
        )+
    }};
}

#[cfg(feature = "rm0492")]
mod rm0492 {
    use super::*;

    instances! {
        USART1: APB2 {
            Default => TX: A 9, RX: A 10, AF: 7;
            Alternate1 => TX: B 6, RX: B 7, AF: 7;
            Alternate2 => TX: B 14, RX: B 15, AF: 4;
        }
        USART2: APB1L {
            Default => TX: A 2, RX: A 3, AF: 7;
            Alternate1 => TX: B 0, RX: B 1, AF: 9;
        }
        USART3: APB1L {
            Default => TX: B 10, RX: C 4, AF: 7;
            Alternate1 => TX: C 10, RX: C 11, AF: 7;
        }
    }
}

// Note: pin data is taken from stm32h56x, stm32h573, stm32h523 and stm32h533 datasheets
#[cfg(feature = "rm0481")]
mod rm0481 {
    use crate::stm32::{UART4, UART5, USART6};

    use super::*;

    instances! {
        USART1: APB2 {
            Default => TX: A 9, RX: A 10, AF: 7;
            Alternate1 => TX: B 6, RX: B 7, AF: 7;
            Alternate2 => TX: B 14, RX: B 15, AF: 4;
        }
        USART2: APB1L {
            Default => TX: A 2, RX: A 3, AF: 7;
            Alternate1 => TX: D 5, RX: D 6, AF: 7;
        }
        USART3: APB1L {
            Default => TX: C 10, RX: C 11, AF: 7;
            Alternate1 => TX: D 8, RX: D 9, AF: 7;
            Alternate2 => TX: B 10, RX: B 1, AF: 7;
        }
        UART4: APB1L {
            Default => TX: A 0, RX: A 1, AF: 8;
            Alternate1 => TX: C 10, RX: C 11, AF: 8;
            Alternate2 => TX: D 1, RX: D 0, AF: 8;
        }
        UART5: APB1L {
            Default => TX: C 12, RX: D 2, AF: 8;
            Alternate1 => TX: B 13, RX: B 12, AF: 14;
        }
        USART6: APB1L {
            Default => TX: C 6, RX: C 7, AF: 7;
            Alternate1 => TX: B 5, RX: B 6, AF: 6;
        }
    }
}
