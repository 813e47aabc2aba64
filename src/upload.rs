//! Host-side protocol driver.
//!
//! Drives the five-stage upload: handshake, declared size, chunked payload,
//! CRC command, CRC value. Each stage is written as a single burst, drained,
//! and then the driver blocks on the device's rotating acknowledgment before
//! moving on. No stage is ever retried; a failing session is surfaced to the
//! caller and restarted from scratch if at all.

use std::io;
use std::thread;
use std::time::Duration;

use byteorder::{ByteOrder, LittleEndian};
use indicatif::{ProgressBar, ProgressStyle};
use log::{debug, trace};
use thiserror::Error;

use crate::crc32::crc32;
use crate::link::{Link, SerialLink};
use crate::proto::{self, AckCounter};

/// Legacy wake-up for loaders that sit behind a shell prompt. The loader
/// drains any pre-handshake bytes that are not 'R', so this is harmless on
/// clean loaders too.
const WAKEUP: &[u8] = b"upload\r";
const WAKEUP_SETTLE: Duration = Duration::from_millis(300);

#[derive(Debug, Error)]
pub enum UploadError {
    #[error("opening serial port: {0}")]
    SerialOpen(#[from] serialport::Error),

    #[error("image is {len} bytes, loader limit is {} bytes", proto::IMAGE_MAX)]
    ImageTooLarge { len: usize },

    #[error("timed out waiting for the loader ({stage} stage)")]
    HandshakeTimeout { stage: &'static str },

    #[error("expected ack {expected:#04x}, got {got:#04x}")]
    WrongAck { expected: u8, got: u8 },

    #[error("loader rejected the transfer (NAK)")]
    Nak { device_crc: Option<u32> },

    #[error("CRC mismatch: host {host:#010x}, device {device:#010x}")]
    CrcMismatch { host: u32, device: u32 },

    #[error("terminal response truncated: got {got} of {} bytes", proto::RESPONSE_LEN)]
    ResponseTruncated { got: usize },

    #[error("serial I/O failed: {0}")]
    Io(#[from] io::Error),
}

/// Open `port` at `baud` and run one upload session for `image`.
///
/// Returns the host CRC-32 of the image on success. The port is released on
/// every exit path; callers wanting a retry start a fresh session.
pub fn run(port: &str, baud: u32, image: &[u8], verbose: bool) -> Result<u32, UploadError> {
    let mut link = SerialLink::open(port, baud)?;
    upload(&mut link, image, verbose)
}

/// Drive one upload session over an already-open link.
pub fn upload(link: &mut dyn Link, image: &[u8], verbose: bool) -> Result<u32, UploadError> {
    if image.len() > proto::IMAGE_MAX {
        return Err(UploadError::ImageTooLarge { len: image.len() });
    }

    let host_crc = crc32(image);
    debug!("image: {} bytes, crc {:#010x}", image.len(), host_crc);

    // Drop whatever is sitting in the buffers from before this session,
    // then prime the link, let the line settle, and discard anything the
    // device (or a leftover shell) echoed back.
    link.purge()?;
    link.write_all(WAKEUP)?;
    link.drain()?;
    thread::sleep(WAKEUP_SETTLE);
    link.purge()?;

    // Useful bytes only: handshake + size + payload + CRC command + CRC.
    let total = image.len() as u64 + 10;
    let pb = if verbose {
        ProgressBar::hidden()
    } else {
        let pb = ProgressBar::new(total);
        pb.set_style(
            ProgressStyle::default_bar()
                .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {bytes}/{total_bytes} ({percent}%)")
                .unwrap()
                .progress_chars("=>-"),
        );
        pb
    };

    let result = drive(link, image, host_crc, &pb);
    pb.finish_and_clear();
    result
}

fn drive(
    link: &mut dyn Link,
    image: &[u8],
    host_crc: u32,
    pb: &ProgressBar,
) -> Result<u32, UploadError> {
    let mut ack = AckCounter::new();

    // Stage 1: handshake.
    send(link, &[proto::HANDSHAKE], pb)?;
    wait_ack(link, &mut ack, "handshake")?;

    // Stage 2: declared size, little-endian.
    let mut size = [0u8; 4];
    LittleEndian::write_u32(&mut size, image.len() as u32);
    send(link, &size, pb)?;
    wait_ack(link, &mut ack, "size")?;

    // Stage 3: payload in 64-byte chunks, one rotating ack per chunk.
    for chunk in image.chunks(proto::CHUNK_LEN) {
        send(link, chunk, pb)?;
        wait_ack(link, &mut ack, "payload")?;
    }

    // Stage 4: CRC command. The device continues straight to stage 5, so
    // there is no ack to wait on here.
    send(link, &[proto::CRC_COMMAND], pb)?;

    // Stage 5: our CRC, then the 5-byte terminal response.
    let mut crc_bytes = [0u8; 4];
    LittleEndian::write_u32(&mut crc_bytes, host_crc);
    send(link, &crc_bytes, pb)?;

    let mut resp = [0u8; proto::RESPONSE_LEN];
    let got = link.read_exact_timeout(&mut resp)?;
    if got < resp.len() {
        return Err(UploadError::ResponseTruncated { got });
    }
    trace!("rx {}", hex::encode(resp));

    let status = resp[0];
    let device_crc = LittleEndian::read_u32(&resp[1..5]);
    let expected = ack.peek();

    // The CRC comparison is authoritative; the status byte only
    // distinguishes the remaining failure shapes.
    if status == expected && device_crc == host_crc {
        debug!("device ack '{}', crc {:#010x}", status as char, device_crc);
        return Ok(host_crc);
    }
    if device_crc != host_crc {
        return Err(UploadError::CrcMismatch { host: host_crc, device: device_crc });
    }
    if status == proto::NAK {
        return Err(UploadError::Nak { device_crc: Some(device_crc) });
    }
    Err(UploadError::WrongAck { expected, got: status })
}

fn send(link: &mut dyn Link, bytes: &[u8], pb: &ProgressBar) -> Result<(), UploadError> {
    trace!("tx {}", hex::encode(bytes));
    link.write_all(bytes)?;
    link.drain()?;
    pb.inc(bytes.len() as u64);
    Ok(())
}

fn wait_ack(
    link: &mut dyn Link,
    ack: &mut AckCounter,
    stage: &'static str,
) -> Result<(), UploadError> {
    let expected = ack.peek();
    let mut byte = [0u8; 1];
    let got = link.read_exact_timeout(&mut byte)?;
    if got == 0 {
        return Err(UploadError::HandshakeTimeout { stage });
    }
    trace!("rx {:#04x}", byte[0]);

    if byte[0] == expected {
        ack.next();
        return Ok(());
    }
    if byte[0] == proto::NAK {
        // A NAK is followed by the device's CRC; pick it up for the report
        // when it arrives in time.
        let mut echo = [0u8; 4];
        let n = link.read_exact_timeout(&mut echo)?;
        let device_crc = (n == echo.len()).then(|| LittleEndian::read_u32(&echo));
        return Err(UploadError::Nak { device_crc });
    }
    Err(UploadError::WrongAck { expected, got: byte[0] })
}
