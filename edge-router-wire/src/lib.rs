#![cfg_attr(not(feature = "std"), no_std)]
#![allow(clippy::uninlined_format_args)]

//! In-place parsing and mutation of the wire formats this crate's sibling, `edge-router-core`,
//! needs to forward and NAT-rewrite packets without copying them: Ethernet II, ARP, IPv4, UDP
//! and TCP.
//!
//! Every header type here borrows the packet buffer it was decoded from, and every rewrite
//! (`set_*` / `patch_*`) operates on that same buffer and leaves the checksum in a state the
//! caller must still recompute and inject — callers own the order in which layers are rewritten,
//! this crate only owns the byte layout.

pub mod arp;
pub mod bytes;
pub mod eth;
pub mod ip;
pub mod tcp;
pub mod udp;

use bytes::BytesIn;

/// An error type for decoding and encoding the wire formats in this crate.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum Error {
    DataUnderflow,
    BufferOverflow,
    InvalidFormat,
    InvalidChecksum,
}

impl From<bytes::Error> for Error {
    fn from(value: bytes::Error) -> Self {
        match value {
            bytes::Error::BufferOverflow => Self::BufferOverflow,
            bytes::Error::DataUnderflow => Self::DataUnderflow,
            bytes::Error::InvalidFormat => Self::InvalidFormat,
        }
    }
}

impl core::fmt::Display for Error {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let str = match self {
            Self::DataUnderflow => "Data underflow",
            Self::BufferOverflow => "Buffer overflow",
            Self::InvalidFormat => "Invalid format",
            Self::InvalidChecksum => "Invalid checksum",
        };

        write!(f, "{}", str)
    }
}

#[cfg(feature = "std")]
impl std::error::Error for Error {}

/// RFC 1071 one's-complement checksum accumulation.
///
/// `checksum_word` is the index (counted in 16-bit words from the start of `bytes`) that holds
/// the checksum field itself; that word is skipped (treated as zero) so the same function can be
/// used both to compute a fresh checksum and to verify an existing one.
pub fn checksum_accumulate(bytes: &[u8], checksum_word: usize) -> u32 {
    let mut bytes = BytesIn::new(bytes);

    let mut sum: u32 = 0;
    while !bytes.is_empty() {
        let skip = (bytes.offset() >> 1) == checksum_word;
        let arr = bytes.arr().unwrap_or_else(|_| [bytes.byte().unwrap(), 0]);

        let word = if skip { 0 } else { u16::from_be_bytes(arr) };

        sum += word as u32;
    }

    sum
}

pub fn checksum_finish(mut sum: u32) -> u16 {
    while sum >> 16 != 0 {
        sum = (sum >> 16) + (sum & 0xffff);
    }

    !sum as u16
}
