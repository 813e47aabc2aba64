//! Peripheral interfaces the loader polls.
//!
//! The hosting system (gateware simulation, test bench) provides these; the
//! loader itself never blocks, it re-polls on the next tick.

/// Single-consumer receive FIFO in front of the UART.
pub trait RxFifo {
    /// Pull one byte, or `None` when the FIFO is empty.
    fn pop(&mut self) -> Option<u8>;
}

/// UART transmitter with a ready/busy status bit.
pub trait UartTx {
    /// True when the transmitter can accept another byte.
    fn ready(&self) -> bool;

    /// Hand one byte to the transmitter. Only call when [`ready`] is true.
    ///
    /// [`ready`]: UartTx::ready
    fn write(&mut self, byte: u8);

    /// True once every accepted byte has fully left the shift register.
    fn idle(&self) -> bool;
}

/// Completion status of an in-flight word write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteStatus {
    Busy,
    Done,
    Fault,
}

/// Word-addressed image memory. One write may be outstanding at a time; the
/// loader polls until the writer reports `Done` or `Fault`.
pub trait WordWriter {
    /// Start writing `word` at word index `index`.
    fn begin(&mut self, index: u32, word: u16);

    /// Poll the outstanding write.
    fn poll(&mut self) -> WriteStatus;
}
