/// Reads a status register twice after an interrupt flag has been cleared through a write.
///
/// The peripheral bus runs slower than the core, so a flag cleared right before an ISR returns
/// can still be seen as set by the NVIC, re-entering the handler for nothing. Two dummy reads of a
/// register with no read side effects give the write time to land.
///
/// See ARM Application Note 321 Section 4.9
macro_rules! interrupt_clear_clock_sync_delay {
    ($status_reg:expr) => {
        let _ = $status_reg.read();
        let _ = $status_reg.read();
    };
}
