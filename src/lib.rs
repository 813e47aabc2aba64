//! Firmware upload over a serial line for the HX8K RISC-V SoC.
//!
//! Two halves share this crate: the host-side protocol driver
//! ([`upload`]) that pushes an application image through the five-stage
//! chunked protocol, and the loader-side receiver model ([`device`]) that
//! consumes the same byte stream, writes it into word-addressed image
//! memory, and answers with rotating acknowledgments. [`crc32`] and
//! [`proto`] are the pieces both halves must agree on bit-for-bit.

pub mod crc32;
pub mod device;
pub mod link;
pub mod proto;
pub mod upload;
