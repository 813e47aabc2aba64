//! Shared bench: the loader model wired to the host driver as a [`Link`].
//!
//! The host side blocks inside reads while the device side only advances by
//! ticks, so the bench runs the loader clock inside the `Link` calls: writes
//! land in the device's bounded RX FIFO (ticking when it is full), reads
//! tick the device until it produces output or the read budget runs out,
//! which is how a host-side read timeout looks down here.

use std::collections::VecDeque;
use std::io;

use hxload::device::hal::{RxFifo, UartTx, WordWriter, WriteStatus};
use hxload::device::{Loader, LoaderConfig};
use hxload::link::Link;
use hxload::proto;

/// RX FIFO sized to absorb a full chunk plus margin, per the loader's
/// hardware sizing.
pub const FIFO_DEPTH: usize = 256;

pub struct BoundedFifo {
    queue: VecDeque<u8>,
}

impl BoundedFifo {
    fn new() -> Self {
        Self { queue: VecDeque::with_capacity(FIFO_DEPTH) }
    }

    fn is_full(&self) -> bool {
        self.queue.len() >= FIFO_DEPTH
    }

    fn push(&mut self, byte: u8) {
        assert!(!self.is_full(), "rx fifo overflow");
        self.queue.push_back(byte);
    }
}

impl RxFifo for BoundedFifo {
    fn pop(&mut self) -> Option<u8> {
        self.queue.pop_front()
    }
}

/// One-tick-per-byte transmitter that also keeps a log of everything the
/// device ever sent, for wire-trace assertions.
pub struct SimUart {
    pending: VecDeque<u8>,
    pub tx_log: Vec<u8>,
    busy: u32,
}

impl SimUart {
    fn new() -> Self {
        Self { pending: VecDeque::new(), tx_log: Vec::new(), busy: 0 }
    }

    fn clock(&mut self) {
        self.busy = self.busy.saturating_sub(1);
    }

    fn take(&mut self) -> Option<u8> {
        self.pending.pop_front()
    }
}

impl UartTx for SimUart {
    fn ready(&self) -> bool {
        self.busy == 0
    }

    fn write(&mut self, byte: u8) {
        self.pending.push_back(byte);
        self.tx_log.push(byte);
        self.busy = 1;
    }

    fn idle(&self) -> bool {
        self.busy == 0
    }
}

/// Word-addressed image memory with configurable write latency.
pub struct SimMem {
    pub words: Vec<u16>,
    pub delay: u32,
    in_flight: Option<(u32, u16, u32)>,
}

impl SimMem {
    fn new() -> Self {
        Self { words: vec![0; proto::IMAGE_MAX / 2], delay: 1, in_flight: None }
    }
}

impl WordWriter for SimMem {
    fn begin(&mut self, index: u32, word: u16) {
        self.in_flight = Some((index, word, self.delay));
    }

    fn poll(&mut self) -> WriteStatus {
        match self.in_flight {
            None => WriteStatus::Fault,
            Some((index, word, left)) => {
                if index as usize >= self.words.len() {
                    return WriteStatus::Fault;
                }
                if left > 0 {
                    self.in_flight = Some((index, word, left - 1));
                    return WriteStatus::Busy;
                }
                self.words[index as usize] = word;
                self.in_flight = None;
                WriteStatus::Done
            }
        }
    }
}

pub struct SimDevice {
    pub loader: Loader,
    pub fifo: BoundedFifo,
    pub uart: SimUart,
    pub mem: SimMem,
    /// Ticks a read is allowed to burn before it comes back short.
    pub read_budget: u32,
    /// Flip all bits of the nth host-written byte (counted from the first
    /// byte of the session, wake-up included) on its way into the FIFO.
    pub corrupt_at: Option<usize>,
    written: usize,
    /// Everything the host wrote, wake-up included.
    pub rx_log: Vec<u8>,
}

impl SimDevice {
    pub fn new() -> Self {
        let config = LoaderConfig { timeout_ticks: 2_000, error_dwell_ticks: 50 };
        let mut loader = Loader::new(config);
        loader.start();
        Self {
            loader,
            fifo: BoundedFifo::new(),
            uart: SimUart::new(),
            mem: SimMem::new(),
            read_budget: 20_000,
            corrupt_at: None,
            written: 0,
            rx_log: Vec::new(),
        }
    }

    pub fn step(&mut self) {
        self.loader.tick(&mut self.fifo, &mut self.uart, &mut self.mem);
        self.uart.clock();
    }

    pub fn run(&mut self, ticks: u32) {
        for _ in 0..ticks {
            self.step();
        }
    }
}

impl Link for SimDevice {
    fn write_all(&mut self, buf: &[u8]) -> io::Result<()> {
        for &b in buf {
            let byte = if self.corrupt_at == Some(self.written) { !b } else { b };
            self.written += 1;
            self.rx_log.push(byte);
            while self.fifo.is_full() {
                self.step();
            }
            self.fifo.push(byte);
        }
        Ok(())
    }

    fn read_exact_timeout(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let mut got = 0;
        while got < buf.len() {
            let mut spent = 0;
            loop {
                if let Some(b) = self.uart.take() {
                    buf[got] = b;
                    got += 1;
                    break;
                }
                if spent >= self.read_budget {
                    return Ok(got);
                }
                self.step();
                spent += 1;
            }
        }
        Ok(got)
    }

    fn drain(&mut self) -> io::Result<()> {
        // Writes land in the device FIFO immediately; nothing buffers on
        // the host side of this bench.
        Ok(())
    }

    fn purge(&mut self) -> io::Result<()> {
        // Host-side purge: discard whatever the device has already sent.
        // Bytes already pushed into the device FIFO stay there, exactly as
        // they would on real hardware.
        self.uart.pending.clear();
        Ok(())
    }
}
