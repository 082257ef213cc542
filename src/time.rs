//! Rates and durations on the serial line

pub use fugit::{HertzU32 as Hertz, MicrosDurationU32 as MicroSeconds};

/// Bits per second
pub type Bps = Hertz;

/// Extension trait that adds convenience methods to the `u32` type
pub trait U32Ext {
    /// Wrap in `Bps`
    fn bps(self) -> Bps;
}

impl U32Ext for u32 {
    fn bps(self) -> Bps {
        Bps::from_raw(self)
    }
}

/// Time one frame of `half_bits` half bit periods occupies the line at `baudrate`, rounded up to
/// the next microsecond
///
/// Frames are counted in half bits because of the 0.5 and 1.5 stop bit settings, see
/// [`Config::frame_half_bits`](crate::serial::config::Config::frame_half_bits). A zero baud rate
/// yields `None`.
pub fn frame_time(baudrate: Bps, half_bits: u32) -> Option<MicroSeconds> {
    let half_bit_rate = u64::from(baudrate.raw()) * 2;
    if half_bit_rate == 0 {
        return None;
    }
    let micros = (u64::from(half_bits) * 1_000_000).div_ceil(half_bit_rate);
    u32::try_from(micros).ok().map(MicroSeconds::from_ticks)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_time_rounds_up() {
        // 8N1 is 10 bits: 86.8 us at 115200 baud
        assert_eq!(frame_time(115_200.bps(), 20), Some(MicroSeconds::from_ticks(87)));
        // 8N1 at 9600 baud is exactly 1041.7 us
        assert_eq!(frame_time(9600.bps(), 20), Some(MicroSeconds::from_ticks(1042)));
        // 1 MBd, 7 data bits, 1.5 stop bits: 9.5 us
        assert_eq!(frame_time(1_000_000.bps(), 19), Some(MicroSeconds::from_ticks(10)));
    }

    #[test]
    fn zero_baudrate_has_no_frame_time() {
        assert_eq!(frame_time(0.bps(), 20), None);
    }
}
