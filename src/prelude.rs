//! Prelude

pub use crate::serial::SerialPort as _stm32h5xx_usart_fifo_serial_SerialPort;
pub use crate::time::U32Ext as _stm32h5xx_usart_fifo_time_U32Ext;

pub use fugit::RateExtU32 as _;
