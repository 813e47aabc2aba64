//! Serial-line abstraction for the host driver.
//!
//! The driver core only needs four operations; everything platform-specific
//! (raw mode, inter-byte timeouts, buffer purge semantics) stays behind the
//! [`Link`] trait so tests can substitute a scripted endpoint or a simulated
//! device.

use std::io::{self, Read, Write};
use std::time::{Duration, Instant};

use serialport::{ClearBuffer, DataBits, FlowControl, Parity, SerialPort, StopBits};

/// Default per-read timeout while waiting on an acknowledgment.
pub const READ_TIMEOUT: Duration = Duration::from_secs(2);

/// Byte transport between the driver and the device.
pub trait Link {
    /// Write the whole buffer.
    fn write_all(&mut self, buf: &[u8]) -> io::Result<()>;

    /// Read until `buf` is full or the per-read timeout fires, returning the
    /// number of bytes actually read. A short count means timeout, not EOF.
    fn read_exact_timeout(&mut self, buf: &mut [u8]) -> io::Result<usize>;

    /// Block until previously written bytes have left the host's output
    /// buffer.
    fn drain(&mut self) -> io::Result<()>;

    /// Discard anything pending in both directions.
    fn purge(&mut self) -> io::Result<()>;
}

/// [`Link`] over a real serial port: raw 8N1, no flow control.
pub struct SerialLink {
    port: Box<dyn SerialPort>,
    timeout: Duration,
}

impl SerialLink {
    pub fn open(port: &str, baud: u32) -> serialport::Result<Self> {
        let port = serialport::new(port, baud)
            .data_bits(DataBits::Eight)
            .parity(Parity::None)
            .stop_bits(StopBits::One)
            .flow_control(FlowControl::None)
            .timeout(READ_TIMEOUT)
            .open()?;
        Ok(Self { port, timeout: READ_TIMEOUT })
    }

    pub fn set_timeout(&mut self, timeout: Duration) {
        self.timeout = timeout;
    }
}

impl Link for SerialLink {
    fn write_all(&mut self, buf: &[u8]) -> io::Result<()> {
        self.port.write_all(buf)
    }

    fn read_exact_timeout(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let deadline = Instant::now() + self.timeout;
        let mut got = 0;
        while got < buf.len() {
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            self.port
                .set_timeout(deadline - now)
                .map_err(|e| io::Error::new(io::ErrorKind::Other, e))?;
            match self.port.read(&mut buf[got..]) {
                Ok(0) => break,
                Ok(n) => got += n,
                Err(e) if e.kind() == io::ErrorKind::TimedOut => break,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
        Ok(got)
    }

    fn drain(&mut self) -> io::Result<()> {
        self.port.flush()
    }

    fn purge(&mut self) -> io::Result<()> {
        self.port
            .clear(ClearBuffer::All)
            .map_err(|e| io::Error::new(io::ErrorKind::Other, e))
    }
}

/// Enumerate system serial ports for `--list`.
pub fn list_ports() -> serialport::Result<Vec<serialport::SerialPortInfo>> {
    serialport::available_ports()
}

/// One human-readable line per enumerated port.
pub fn describe_port(info: &serialport::SerialPortInfo) -> String {
    use serialport::SerialPortType;
    match &info.port_type {
        SerialPortType::UsbPort(usb) => {
            let product = usb.product.as_deref().unwrap_or("USB serial");
            format!("{}  [{:04x}:{:04x}] {}", info.port_name, usb.vid, usb.pid, product)
        }
        SerialPortType::BluetoothPort => format!("{}  [bluetooth]", info.port_name),
        SerialPortType::PciPort => format!("{}  [pci]", info.port_name),
        SerialPortType::Unknown => info.port_name.clone(),
    }
}
