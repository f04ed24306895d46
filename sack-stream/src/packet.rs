//! Wire-format definitions for protocol segments.
//!
//! Every datagram exchanged between peers is a [`Packet`].  This module is
//! responsible for:
//! - Defining the on-wire binary layout (header fields, flags, SACK blocks,
//!   payload).
//! - Serialising a [`Packet`] into a byte buffer ready for transmission.
//! - Deserialising a raw byte slice back into a [`Packet`], returning errors
//!   for truncated, corrupted or malformed input.
//!
//! No I/O happens here — this is pure data transformation.
//!
//! # Wire format
//!
//! All multi-byte integers are **big-endian**.
//!
//! ```text
//!  0               1               2               3
//!  0 1 2 3 4 5 6 7 0 1 2 3 4 5 6 7 0 1 2 3 4 5 6 7 0 1 2 3 4 5 6 7
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                        Sequence Number                        |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                    Acknowledgment Number                      |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |     Flags     |          Window Size          |  SACK Count   |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |         Payload Length        |        Checksum (CRC-32)      |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |      Checksum (continued)     |   SACK blocks (start, end) …  |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                        Payload ...                            |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! ```
//!
//! Fixed header size: [`HEADER_LEN`] = 18 bytes.
//! seq(4) + ack(4) + flags(1) + window(2) + sack_count(1) + payload_len(2) + checksum(4)
//!
//! Each SACK block is two 32-bit sequence numbers, `start` (inclusive) and
//! `end` (exclusive), [`SACK_BLOCK_LEN`] = 8 bytes.  Blocks follow the fixed
//! header and precede the payload.
//!
//! The checksum is CRC-32 (ISO-HDLC) over the whole datagram with the
//! checksum field itself zeroed.

use crc::{Crc, CRC_32_ISO_HDLC};
use thiserror::Error;

use crate::seq::{seq_le, seq_lt};

/// Bit-flag constants for the `flags` header field.
pub mod flags {
    /// Synchronise sequence numbers (handshake initiation).
    pub const SYN: u8 = 0b0000_0001;
    /// Acknowledgement field is valid.
    pub const ACK: u8 = 0b0000_0010;
    /// Finish — sender has no more data to send.
    pub const FIN: u8 = 0b0000_0100;
    /// Reset the connection.
    pub const RST: u8 = 0b0000_1000;

    /// Every bit that has a defined meaning.
    pub const ALL: u8 = SYN | ACK | FIN | RST;
}

/// Byte length of the fixed-size header on the wire.
pub const HEADER_LEN: usize = 18;

/// Byte length of one encoded SACK block.
pub const SACK_BLOCK_LEN: usize = 8;

/// Largest number of SACK blocks a single header may carry.
pub const MAX_SACK_BLOCKS: usize = 4;

/// Largest UDP payload over IPv4.
pub const MAX_DATAGRAM: usize = 65_507;

/// Largest payload that still fits a full header into one datagram.
pub const MAX_PAYLOAD: usize = MAX_DATAGRAM - HEADER_LEN - MAX_SACK_BLOCKS * SACK_BLOCK_LEN;

// Byte offsets of each field within the serialised header.
const OFF_SEQ: usize = 0;
const OFF_ACK: usize = 4;
const OFF_FLAGS: usize = 8;
const OFF_WINDOW: usize = 9;
const OFF_SACK_COUNT: usize = 11;
const OFF_PAYLOAD_LEN: usize = 12;
const OFF_CHECKSUM: usize = 14;

const CHECKSUM: Crc<u32> = Crc::<u32>::new(&CRC_32_ISO_HDLC);

/// A contiguous range of received sequence numbers, `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SackBlock {
    pub start: u32,
    pub end: u32,
}

impl SackBlock {
    pub fn new(start: u32, end: u32) -> Self {
        Self { start, end }
    }

    /// Number of sequence numbers covered, accounting for wrap-around.
    pub fn len(&self) -> u32 {
        self.end.wrapping_sub(self.start)
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }
}

/// Protocol header.
///
/// Fields are in host byte order; [`Packet::encode`] converts to big-endian
/// on the wire and [`Packet::decode`] converts back.  The payload length,
/// SACK count and checksum are derived on encode and validated on decode, so
/// they do not appear here.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Header {
    /// Sequence number of the first payload byte in this segment.
    pub seq: u32,
    /// Acknowledgement number (next expected sequence number from the peer).
    pub ack: u32,
    /// Bitmask of [`flags`] constants.
    pub flags: u8,
    /// Advertised receive-window size in bytes.
    pub window: u16,
    /// Selectively acknowledged ranges beyond `ack`, ascending.
    pub sack: Vec<SackBlock>,
}

impl Header {
    pub fn has(&self, flag: u8) -> bool {
        self.flags & flag != 0
    }
}

/// A complete protocol datagram: header + payload bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    pub header: Header,
    pub payload: Vec<u8>,
}

impl Packet {
    /// Serialise this packet into a newly allocated byte vector.
    ///
    /// Fails when the payload exceeds `mss` or the SACK list is not a valid
    /// ascending list of disjoint blocks beyond the acknowledgment number.
    pub fn encode(&self, mss: usize) -> Result<Vec<u8>, PacketError> {
        let payload_len = self.payload.len();
        if payload_len > mss.min(MAX_PAYLOAD) {
            return Err(PacketError::PayloadTooLarge {
                len: payload_len,
                mss: mss.min(MAX_PAYLOAD),
            });
        }
        validate_flags(self.header.flags)?;
        validate_sack(self.header.ack, &self.header.sack)?;

        let sack_len = self.header.sack.len() * SACK_BLOCK_LEN;
        let mut buf = vec![0u8; HEADER_LEN + sack_len + payload_len];

        buf[OFF_SEQ..OFF_SEQ + 4].copy_from_slice(&self.header.seq.to_be_bytes());
        buf[OFF_ACK..OFF_ACK + 4].copy_from_slice(&self.header.ack.to_be_bytes());
        buf[OFF_FLAGS] = self.header.flags;
        buf[OFF_WINDOW..OFF_WINDOW + 2].copy_from_slice(&self.header.window.to_be_bytes());
        buf[OFF_SACK_COUNT] = self.header.sack.len() as u8;
        buf[OFF_PAYLOAD_LEN..OFF_PAYLOAD_LEN + 2]
            .copy_from_slice(&(payload_len as u16).to_be_bytes());

        for (i, block) in self.header.sack.iter().enumerate() {
            let off = HEADER_LEN + i * SACK_BLOCK_LEN;
            buf[off..off + 4].copy_from_slice(&block.start.to_be_bytes());
            buf[off + 4..off + 8].copy_from_slice(&block.end.to_be_bytes());
        }
        buf[HEADER_LEN + sack_len..].copy_from_slice(&self.payload);

        // Checksum field is still zero here.
        let csum = CHECKSUM.checksum(&buf);
        buf[OFF_CHECKSUM..OFF_CHECKSUM + 4].copy_from_slice(&csum.to_be_bytes());

        Ok(buf)
    }

    /// Parse a [`Packet`] from a raw byte slice.
    ///
    /// Length and checksum are verified before any field is interpreted, so
    /// a corrupted datagram is reported as corruption rather than as a
    /// protocol violation.
    pub fn decode(buf: &[u8]) -> Result<Self, PacketError> {
        if buf.len() < HEADER_LEN {
            return Err(PacketError::TooShort(buf.len()));
        }

        let sack_count = buf[OFF_SACK_COUNT] as usize;
        let payload_len = usize::from(read_u16(buf, OFF_PAYLOAD_LEN));
        let expected = HEADER_LEN + sack_count * SACK_BLOCK_LEN + payload_len;
        if buf.len() != expected {
            return Err(PacketError::LengthMismatch {
                expected,
                actual: buf.len(),
            });
        }

        let checksum = read_u32(buf, OFF_CHECKSUM);
        let mut digest = CHECKSUM.digest();
        digest.update(&buf[..OFF_CHECKSUM]);
        digest.update(&[0u8; 4]);
        digest.update(&buf[OFF_CHECKSUM + 4..]);
        if digest.finalize() != checksum {
            return Err(PacketError::ChecksumFailed);
        }

        let flags = buf[OFF_FLAGS];
        validate_flags(flags)?;
        if sack_count > MAX_SACK_BLOCKS {
            return Err(PacketError::TooManySackBlocks(sack_count));
        }

        let ack = read_u32(buf, OFF_ACK);
        let sack: Vec<SackBlock> = (0..sack_count)
            .map(|i| {
                let off = HEADER_LEN + i * SACK_BLOCK_LEN;
                SackBlock::new(read_u32(buf, off), read_u32(buf, off + 4))
            })
            .collect();
        validate_sack(ack, &sack)?;

        Ok(Packet {
            header: Header {
                seq: read_u32(buf, OFF_SEQ),
                ack,
                flags,
                window: read_u16(buf, OFF_WINDOW),
                sack,
            },
            payload: buf[HEADER_LEN + sack_count * SACK_BLOCK_LEN..].to_vec(),
        })
    }
}

/// Errors that can arise when encoding or parsing a datagram.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PacketError {
    /// Buffer shorter than the fixed header size.
    #[error("datagram of {0} bytes is shorter than the {HEADER_LEN}-byte header")]
    TooShort(usize),
    /// Length fields do not match the actual datagram size.
    #[error("header describes {expected} bytes but the datagram has {actual}")]
    LengthMismatch { expected: usize, actual: usize },
    /// Checksum did not match recomputed value.
    #[error("checksum verification failed")]
    ChecksumFailed,
    /// Payload larger than the maximum segment size.
    #[error("payload of {len} bytes exceeds the maximum segment size of {mss}")]
    PayloadTooLarge { len: usize, mss: usize },
    /// More SACK blocks than a header may carry.
    #[error("{0} SACK blocks exceed the limit of {MAX_SACK_BLOCKS}")]
    TooManySackBlocks(usize),
    /// A SACK block is empty, unordered, overlapping, or not beyond the ACK.
    #[error("malformed SACK block [{start}, {end})")]
    MalformedSack { start: u32, end: u32 },
    /// Undefined flag bits or a contradictory combination.
    #[error("invalid flags {0:#04x}")]
    InvalidFlags(u8),
}

impl PacketError {
    /// `true` for damage in transit (truncation, bit errors); `false` for a
    /// well-formed datagram that violates the protocol.
    pub fn is_corruption(&self) -> bool {
        matches!(
            self,
            PacketError::TooShort(_)
                | PacketError::LengthMismatch { .. }
                | PacketError::ChecksumFailed
        )
    }
}

fn validate_flags(f: u8) -> Result<(), PacketError> {
    let contradictory = f & flags::SYN != 0 && f & (flags::FIN | flags::RST) != 0;
    if f & !flags::ALL != 0 || contradictory {
        return Err(PacketError::InvalidFlags(f));
    }
    Ok(())
}

/// Blocks must be non-empty, lie strictly beyond `ack`, and be ascending and
/// disjoint.
fn validate_sack(ack: u32, sack: &[SackBlock]) -> Result<(), PacketError> {
    if sack.len() > MAX_SACK_BLOCKS {
        return Err(PacketError::TooManySackBlocks(sack.len()));
    }
    let mut floor = ack;
    let mut first = true;
    for block in sack {
        let after_floor = if first {
            seq_lt(floor, block.start)
        } else {
            seq_le(floor, block.start)
        };
        if block.is_empty() || !seq_lt(block.start, block.end) || !after_floor {
            return Err(PacketError::MalformedSack {
                start: block.start,
                end: block.end,
            });
        }
        floor = block.end;
        first = false;
    }
    Ok(())
}

fn read_u16(buf: &[u8], off: usize) -> u16 {
    u16::from_be_bytes([buf[off], buf[off + 1]])
}

fn read_u32(buf: &[u8], off: usize) -> u32 {
    u32::from_be_bytes([buf[off], buf[off + 1], buf[off + 2], buf[off + 3]])
}
