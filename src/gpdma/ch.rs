use crate::stm32::gpdma1;
use crate::Sealed;

use super::Error;

/// Register operations of a linear GPDMA channel
pub(super) trait ChannelRegs: Sealed {
    fn reset(&self);
    fn clear_all_event_flags(&self);
    fn check_error(&self) -> Result<(), Error>;
    fn configure_memory_to_peripheral(&self, request: u8);
    fn set_source_address(&self, addr: u32);
    fn set_destination_address(&self, addr: u32);
    fn set_block_size(&self, size: u16);
    fn enable(&self);
    fn enable_transfer_interrupts(&self);
}

impl Sealed for gpdma1::CH {}

macro_rules! check_error {
    ($sr:expr) => {
        if $sr.usef().is_trigger() {
            Err(Error::UserSettingError)
        } else if $sr.dtef().is_trigger() {
            Err(Error::DataTransferError)
        } else if $sr.ulef().is_trigger() {
            Err(Error::LinkTransferError)
        } else {
            Ok(())
        }
    };
}

impl ChannelRegs for gpdma1::CH {
    /// Abort whatever the channel is doing. The configuration registers are kept.
    #[inline(always)]
    fn reset(&self) {
        self.cr().modify(|_, w| w.reset().reset());
    }

    #[inline(always)]
    fn clear_all_event_flags(&self) {
        self.fcr().write(|w| {
            w.tcf()
                .clear()
                .htf()
                .clear()
                .dtef()
                .clear()
                .usef()
                .clear()
                .ulef()
                .clear()
                .suspf()
                .clear()
                .tof()
                .clear()
        });
    }

    #[inline(always)]
    fn check_error(&self) -> Result<(), Error> {
        let sr = self.sr().read();
        check_error!(sr)
    }

    /// Bytes from an incrementing source to a fixed destination, paced by the destination's
    /// hardware request
    fn configure_memory_to_peripheral(&self, request: u8) {
        self.tr1().modify(|_, w| {
            w.sinc()
                .contiguous()
                .dinc()
                .fixed_burst()
                .sdw_log2()
                .byte()
                .ddw_log2()
                .byte()
        });
        self.tr2()
            .modify(|_, w| w.swreq().hardware().dreq().destination());
        // unsafe: any request number is accepted, unused ones never trigger
        self.tr2()
            .modify(|_, w| unsafe { w.reqsel().bits(request) });
    }

    #[inline(always)]
    fn set_source_address(&self, addr: u32) {
        self.sar().write(|w| w.sa().set(addr));
    }

    #[inline(always)]
    fn set_destination_address(&self, addr: u32) {
        self.dar().write(|w| w.da().set(addr));
    }

    #[inline(always)]
    fn set_block_size(&self, size: u16) {
        self.br1().modify(|_, w| w.bndt().set(size));
    }

    #[inline(always)]
    fn enable(&self) {
        self.cr().modify(|_, w| w.en().enabled());
    }

    #[inline(always)]
    fn enable_transfer_interrupts(&self) {
        self.cr().modify(|_, w| {
            w.tcie().enabled().dteie().enabled().useie().enabled()
        });
    }
}
