//! Buffered, interrupt-driven USART driver for STM32H5 microcontrollers
//!
//! Application code queues bytes into a fixed-capacity transmit FIFO and drains received bytes
//! from a fixed-capacity receive FIFO. The USART interrupt (and optionally a GPDMA channel) moves
//! bytes between those FIFOs and the peripheral, so producers and consumers never wait on the
//! wire. See the [`serial`] module for the driver and [`fifo`] for the lock-free buffer it is
//! built on.
//!
//! The transfer engine and the FIFO are target independent. The register-level implementation
//! ([`serial::UsartPort`], [`serial::UsartTxDma`]) needs one of the device features:
//!
//! ```text
//! stm32h503, stm32h523, stm32h533, stm32h562, stm32h563, stm32h573
//! ```
#![cfg_attr(not(test), no_std)]
#![cfg_attr(docsrs, feature(doc_cfg))]
#![allow(non_camel_case_types)]

#[cfg(all(feature = "rm0492", feature = "rm0481"))]
compile_error!("Cannot not select both rm0492 and rm0481");

#[cfg(feature = "stm32h503")]
pub use stm32h5::stm32h503 as stm32;

#[cfg(feature = "stm32h523")]
pub use stm32h5::stm32h523 as stm32;

#[cfg(feature = "stm32h533")]
pub use stm32h5::stm32h533 as stm32;

#[cfg(feature = "stm32h562")]
pub use stm32h5::stm32h562 as stm32;

#[cfg(feature = "stm32h563")]
pub use stm32h5::stm32h563 as stm32;

#[cfg(feature = "stm32h573")]
pub use stm32h5::stm32h573 as stm32;

#[cfg(feature = "device-selected")]
pub use crate::stm32 as pac;

// Enable use of interrupt macro
#[cfg(all(feature = "rt", feature = "device-selected"))]
#[cfg_attr(docsrs, doc(cfg(feature = "rt")))]
pub use crate::stm32::interrupt;

pub mod prelude;

#[cfg(feature = "device-selected")]
#[macro_use]
mod macros;

pub mod time;

pub mod fifo;

pub mod serial;

#[cfg(feature = "device-selected")]
pub mod gpdma;

#[cfg(feature = "device-selected")]
mod sealed {
    pub trait Sealed {}
}

#[cfg(feature = "device-selected")]
pub(crate) use sealed::Sealed;

/// Get the name of the type without the module prefix(es)
#[cfg(all(feature = "log", feature = "device-selected"))]
fn stripped_type_name<T>() -> &'static str {
    let s = core::any::type_name::<T>();
    s.rsplit("::").next().unwrap_or(s)
}
