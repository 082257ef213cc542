use crate::time::{frame_time, Hertz, MicroSeconds};

/// The parity bits appended to each serial data word
///
/// When enabled parity bits will be automatically added by hardware on transmit, and automatically checked by
/// hardware on receive. A parity fault is cleared by the receive interrupt and the byte is dropped.
///
/// Note that parity bits are included in the serial word length, so if parity is used with 8 data bits the word
/// length will be set to 9.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Parity {
    ParityNone,
    ParityEven,
    ParityOdd,
}

#[derive(Copy, Clone, PartialEq, Eq, Debug)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum StopBits {
    #[doc = "1 stop bit"]
    Stop1,
    #[doc = "0.5 stop bits"]
    Stop0p5,
    #[doc = "2 stop bits"]
    Stop2,
    #[doc = "1.5 stop bits"]
    Stop1p5,
}

/// Number of data bits per frame, not counting the parity bit
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum WordSize {
    DataBits7,
    DataBits8,
}

/// TX/RX pin pair used by the USART
///
/// Each instance can be routed to a small set of pin pairs. `Default` is the first pair listed in
/// the datasheet; the alternates depend on the instance and on the device family. Selecting an
/// alternate the instance does not have makes `initialize` fail with [`InvalidConfig`].
#[derive(Copy, Clone, PartialEq, Eq, Debug, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Remap {
    #[default]
    Default,
    Alternate1,
    Alternate2,
}

/// Interrupt priority expressed as a priority grouping plus preemption and sub-priority
///
/// `group` is the number of priority bits used for preemption (0 to 4 on a part with 4 priority
/// bits); the remaining bits hold the sub-priority. Interrupts with a lower preemption value
/// preempt those with a higher one; the sub-priority only orders pending interrupts.
///
/// The priority grouping is a core-wide setting. Every driver that programs it should use the same
/// `group`.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct InterruptPriority {
    pub group: u8,
    pub preemption: u8,
    pub sub: u8,
}

impl InterruptPriority {
    pub const fn new(group: u8, preemption: u8, sub: u8) -> Self {
        InterruptPriority {
            group,
            preemption,
            sub,
        }
    }

    /// Encode as the value of an NVIC priority register on a core that implements `prio_bits`
    /// priority bits
    pub fn encode(&self, prio_bits: u8) -> Result<u8, InvalidConfig> {
        if prio_bits == 0 || prio_bits > 8 || self.group > prio_bits {
            return Err(InvalidConfig);
        }
        let sub_bits = prio_bits - self.group;

        if u32::from(self.preemption) >= 1 << self.group
            || u32::from(self.sub) >= 1 << sub_bits
        {
            return Err(InvalidConfig);
        }

        let priority =
            (u32::from(self.preemption) << sub_bits) | u32::from(self.sub);
        Ok((priority << (8 - prio_bits)) as u8)
    }

    /// Value of the AIRCR.PRIGROUP field for this grouping on a core with `prio_bits` priority
    /// bits
    pub fn prigroup(&self, prio_bits: u8) -> Result<u8, InvalidConfig> {
        if prio_bits == 0 || prio_bits > 8 || self.group > prio_bits {
            return Err(InvalidConfig);
        }
        // PRIGROUP counts the bits (from the LSB of the 8 bit field) that belong to the
        // sub-priority, unimplemented bits included
        Ok(7 - self.group)
    }
}

impl Default for InterruptPriority {
    fn default() -> Self {
        Self::new(3, 7, 1)
    }
}

/// A structure for specifying the USART configuration
///
/// This structure uses the builder pattern to generate the configuration:
///
/// ```
/// use stm32h5xx_usart_fifo::serial::config::Config;
/// use stm32h5xx_usart_fifo::time::Hertz;
///
/// let config = Config::new(Hertz::from_raw(9600)).parity_odd();
/// ```
#[derive(Copy, Clone, Debug)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Config {
    pub baudrate: Hertz,
    pub parity: Parity,
    pub stop_bits: StopBits,
    pub word_size: WordSize,
    pub remap: Remap,
    pub priority: InterruptPriority,
    /// Frequency of the USART kernel clock. After reset this is the APB clock, which runs from
    /// the 32 MHz HSI.
    pub kernel_clock: Hertz,
}

impl Config {
    /// Create a default configuration for the USART or UART interface
    ///
    /// * 8 bits, 1 stop bit, no parity (8N1)
    /// * default pins
    /// * priority group 3, preemption priority 7, sub-priority 1
    /// * 32 MHz kernel clock
    pub const fn new(frequency: Hertz) -> Self {
        Config {
            baudrate: frequency,
            parity: Parity::ParityNone,
            stop_bits: StopBits::Stop1,
            word_size: WordSize::DataBits8,
            remap: Remap::Default,
            priority: InterruptPriority::new(3, 7, 1),
            kernel_clock: Hertz::MHz(32),
        }
    }

    pub const fn baudrate(mut self, baudrate: Hertz) -> Self {
        self.baudrate = baudrate;
        self
    }

    pub const fn parity_none(mut self) -> Self {
        self.parity = Parity::ParityNone;
        self
    }

    /// Enables Even Parity
    ///
    /// Note that parity bits are included in the serial word length.
    pub const fn parity_even(mut self) -> Self {
        self.parity = Parity::ParityEven;
        self
    }

    /// Enables Odd Parity
    ///
    /// Note that parity bits are included in the serial word length.
    pub const fn parity_odd(mut self) -> Self {
        self.parity = Parity::ParityOdd;
        self
    }

    /// Specify the number of stop bits
    pub const fn stop_bits(mut self, stopbits: StopBits) -> Self {
        self.stop_bits = stopbits;
        self
    }

    pub const fn data_width(mut self, word_size: WordSize) -> Self {
        self.word_size = word_size;
        self
    }

    /// Route the USART to an alternate TX/RX pin pair
    pub const fn remap(mut self, remap: Remap) -> Self {
        self.remap = remap;
        self
    }

    pub const fn priority(mut self, priority: InterruptPriority) -> Self {
        self.priority = priority;
        self
    }

    /// Specify the USART kernel clock frequency the baud rate divisor is computed from
    pub const fn kernel_clock(mut self, kernel_clock: Hertz) -> Self {
        self.kernel_clock = kernel_clock;
        self
    }

    /// Length of one frame in half bits: start bit, data bits, parity bit and stop bits
    pub const fn frame_half_bits(&self) -> u32 {
        let data = match self.word_size {
            WordSize::DataBits7 => 7,
            WordSize::DataBits8 => 8,
        };
        let parity = match self.parity {
            Parity::ParityNone => 0,
            _ => 1,
        };
        let stop_half_bits = match self.stop_bits {
            StopBits::Stop0p5 => 1,
            StopBits::Stop1 => 2,
            StopBits::Stop1p5 => 3,
            StopBits::Stop2 => 4,
        };
        2 * (1 + data + parity) + stop_half_bits
    }

    /// Time one frame occupies the line, `None` for a zero baud rate
    pub fn frame_time(&self) -> Option<MicroSeconds> {
        frame_time(self.baudrate, self.frame_half_bits())
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct InvalidConfig;

impl core::fmt::Display for InvalidConfig {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str("invalid serial configuration")
    }
}

impl core::error::Error for InvalidConfig {}

impl Default for Config {
    fn default() -> Config {
        Self::new(Hertz::from_raw(115_200)) // 115k2 baud
    }
}

impl From<Hertz> for Config {
    fn from(frequency: Hertz) -> Config {
        Self::new(frequency)
    }
}

/// Register values that produce a baud rate
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub(crate) struct Divisors {
    /// PRESC.PRESCALER field value
    pub prescaler: u8,
    /// Kernel clock division factor selected by `prescaler`
    pub division: u32,
    pub over8: bool,
    pub brr: u16,
}

/// Compute the prescaler, oversampling mode and BRR value for `baudrate` from the kernel clock
pub(crate) fn baud_divisors(
    ker_ck: Hertz,
    baudrate: Hertz,
) -> Result<Divisors, InvalidConfig> {
    let ker_ck = ker_ck.raw();
    let baud = baudrate.raw();
    if baud == 0 {
        return Err(InvalidConfig);
    }

    // If the baudrate is low enough that BRR would be greater than 65535, use a prescalar to
    // divide down the kernel clock frequency.
    let div = (ker_ck / baud) >> u16::BITS;
    let (division, prescaler) = match div {
        0 => (1, 0),
        1 => (2, 1),
        2..=3 => (4, 2),
        4..=5 => (6, 3),
        6..=7 => (8, 4),
        8..=9 => (10, 5),
        10..=11 => (12, 6),
        12..=15 => (16, 7),
        16..=31 => (32, 8),
        32..=63 => (64, 9),
        64..=127 => (128, 10),
        _ => (256, 11),
    };

    let ker_ck_presc = ker_ck / division;

    // The frequency to calculate USARTDIV is this:
    //
    // (See RM0492 Rev 2 Section 36.5.8)
    //
    // 16 bit oversample: OVER8 = 0
    // 8 bit oversample:  OVER8 = 1
    //
    // USARTDIV =        (ker_ck)
    //            ------------------------
    //            8 x (2 - OVER8) x (baud)
    //
    // USARTDIV has 4 "fractional" bits, so BRR = 16 x USARTDIV for OVER8 = 0. For OVER8 = 1 the
    // fraction is shifted right by one bit.
    let (over8, usartdiv) = if ker_ck_presc / 16 >= baud {
        (false, (ker_ck_presc + baud / 2) / baud)
    } else if ker_ck_presc / 8 >= baud {
        let div = (ker_ck_presc * 2 + baud / 2) / baud;

        // Shift USARTDIV[3:0] right by 1 when oversampling by 8
        let frac = div & 0xF;
        (true, (div & !0xF) | (frac >> 1))
    } else {
        return Err(InvalidConfig);
    };

    let brr = u16::try_from(usartdiv).map_err(|_| InvalidConfig)?;

    Ok(Divisors {
        prescaler,
        division,
        over8,
        brr,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn divisors_with_16x_oversampling() {
        let d =
            baud_divisors(Hertz::MHz(32), Hertz::from_raw(115_200)).unwrap();
        assert_eq!(
            d,
            Divisors {
                prescaler: 0,
                division: 1,
                over8: false,
                brr: 278
            }
        );

        let d = baud_divisors(Hertz::MHz(64), Hertz::from_raw(9600)).unwrap();
        assert_eq!(d.brr, 6667);
        assert!(!d.over8);
    }

    #[test]
    fn slow_baudrate_uses_prescaler() {
        // 250 MHz / 1200 does not fit in 16 bits
        let d = baud_divisors(Hertz::MHz(250), Hertz::from_raw(1200)).unwrap();
        assert_eq!(d.prescaler, 2);
        assert_eq!(d.division, 4);
        assert_eq!(d.brr, 52083);
    }

    #[test]
    fn fast_baudrate_uses_8x_oversampling() {
        let d =
            baud_divisors(Hertz::MHz(16), Hertz::from_raw(1_500_000)).unwrap();
        // USARTDIV = 21 (0x15); the fraction 0x5 is shifted to 0x2
        assert!(d.over8);
        assert_eq!(d.brr, 0x12);
    }

    #[test]
    fn unreachable_baudrate_is_rejected() {
        assert_eq!(
            baud_divisors(Hertz::MHz(16), Hertz::from_raw(3_000_000)),
            Err(InvalidConfig)
        );
        assert_eq!(
            baud_divisors(Hertz::MHz(16), Hertz::from_raw(0)),
            Err(InvalidConfig)
        );
    }

    #[test]
    fn default_priority_encoding() {
        let priority = InterruptPriority::default();
        // 3 preemption bits, 1 sub-priority bit: (7 << 1 | 1) << 4
        assert_eq!(priority.encode(4), Ok(0xF0));
        assert_eq!(priority.prigroup(4), Ok(4));
    }

    #[test]
    fn priority_out_of_range() {
        assert_eq!(InterruptPriority::new(3, 8, 0).encode(4), Err(InvalidConfig));
        assert_eq!(InterruptPriority::new(3, 0, 2).encode(4), Err(InvalidConfig));
        assert_eq!(InterruptPriority::new(5, 0, 0).encode(4), Err(InvalidConfig));
        assert_eq!(InterruptPriority::new(0, 0, 15).encode(4), Ok(0xF0));
        assert_eq!(InterruptPriority::new(4, 2, 0).encode(4), Ok(0x20));
    }

    #[test]
    fn default_config() {
        let config = Config::default();
        assert_eq!(config.baudrate, Hertz::from_raw(115_200));
        assert_eq!(config.parity, Parity::ParityNone);
        assert_eq!(config.stop_bits, StopBits::Stop1);
        assert_eq!(config.word_size, WordSize::DataBits8);
        assert_eq!(config.remap, Remap::Default);
        assert_eq!(config.priority, InterruptPriority::new(3, 7, 1));
    }

    #[test]
    fn frame_length_counts_every_bit() {
        let config = Config::default();
        assert_eq!(config.frame_half_bits(), 20);
        assert_eq!(config.frame_time(), Some(MicroSeconds::from_ticks(87)));

        let config = Config::new(Hertz::from_raw(9600))
            .data_width(WordSize::DataBits7)
            .parity_even()
            .stop_bits(StopBits::Stop1p5);
        // start + 7 data + parity + 1.5 stop
        assert_eq!(config.frame_half_bits(), 21);

        let config = config.baudrate(Hertz::from_raw(0));
        assert_eq!(config.frame_time(), None);
    }
}
