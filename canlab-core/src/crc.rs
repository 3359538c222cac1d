//! CRC-15 Validator
//!
//! Computes the 15-bit CAN CRC over a payload and classifies received frames
//! for fault-injection tests. Frames protected this way carry the CRC as two
//! big-endian bytes after the payload.

use serde::Serialize;
use std::fmt;

/// CAN CRC-15 generator polynomial
pub const CRC15_POLY: u16 = 0x4599;

/// Mask of the 15-bit shift register
pub const CRC15_MASK: u16 = 0x7FFF;

/// Compute the CRC-15 of a payload
///
/// Bits are processed most-significant first through a shift register seeded
/// with zero.
pub fn compute(payload: &[u8]) -> u16 {
    let mut crc: u16 = 0;

    for &byte in payload {
        for bit_index in (0..8u8).rev() {
            let bit = (byte >> bit_index) & 0x01;
            let feedback = ((crc >> 14) & 0x01) as u8 ^ bit;
            crc = (crc << 1) & CRC15_MASK;
            if feedback != 0 {
                crc ^= CRC15_POLY;
            }
        }
    }

    crc & CRC15_MASK
}

/// Integrity classification of a received frame
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FrameOutcome {
    /// CRC matches the payload
    Ok,
    /// Payload intact, CRC field disagrees
    CrcError,
    /// Payload content itself was altered
    BitError,
}

impl FrameOutcome {
    pub fn is_ok(&self) -> bool {
        matches!(self, FrameOutcome::Ok)
    }
}

impl fmt::Display for FrameOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FrameOutcome::Ok => write!(f, "OK"),
            FrameOutcome::CrcError => write!(f, "CRC_ERROR"),
            FrameOutcome::BitError => write!(f, "BIT_ERROR"),
        }
    }
}

/// Classify a received payload against its CRC and the payload the sender meant
///
/// `Ok` if the CRC matches. Otherwise `BitError` when the payload differs
/// from `expected_payload`, else `CrcError`.
pub fn classify(received_payload: &[u8], received_crc: u16, expected_payload: &[u8]) -> FrameOutcome {
    if compute(received_payload) == received_crc {
        FrameOutcome::Ok
    } else if received_payload != expected_payload {
        FrameOutcome::BitError
    } else {
        FrameOutcome::CrcError
    }
}

/// Append the payload's CRC as two big-endian bytes
pub fn seal(payload: &[u8]) -> Vec<u8> {
    let mut data = Vec::with_capacity(payload.len() + 2);
    data.extend_from_slice(payload);
    data.extend_from_slice(&compute(payload).to_be_bytes());
    data
}

/// Split sealed data into payload and trailing CRC
///
/// Returns `None` when there is not at least one payload byte plus the CRC.
pub fn unseal(data: &[u8]) -> Option<(&[u8], u16)> {
    if data.len() < 3 {
        return None;
    }
    let (payload, crc) = data.split_at(data.len() - 2);
    Some((payload, u16::from_be_bytes([crc[0], crc[1]])))
}

/// Fault injection: flip the least significant bit of the first payload byte
pub fn flip_payload_bit(payload: &[u8]) -> Vec<u8> {
    let mut corrupted = payload.to_vec();
    if let Some(first) = corrupted.first_mut() {
        *first ^= 0x01;
    }
    corrupted
}

/// Fault injection: invert every bit of a 15-bit CRC
pub fn corrupt_crc(crc: u16) -> u16 {
    (crc ^ CRC15_MASK) & CRC15_MASK
}

/// Running count of classifications
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ErrorTally {
    pub ok: u64,
    pub crc_errors: u64,
    pub bit_errors: u64,
}

impl ErrorTally {
    pub fn new() -> Self {
        Self::default()
    }

    /// Count one classification and hand it back
    pub fn record(&mut self, outcome: FrameOutcome) -> FrameOutcome {
        match outcome {
            FrameOutcome::Ok => self.ok += 1,
            FrameOutcome::CrcError => self.crc_errors += 1,
            FrameOutcome::BitError => self.bit_errors += 1,
        }
        outcome
    }

    /// Classify sealed data and count the result
    ///
    /// Data too short to carry a CRC is counted as a bit error.
    pub fn check_sealed(&mut self, data: &[u8], expected_payload: &[u8]) -> FrameOutcome {
        let outcome = match unseal(data) {
            Some((payload, crc)) => classify(payload, crc, expected_payload),
            None => FrameOutcome::BitError,
        };
        self.record(outcome)
    }

    pub fn total(&self) -> u64 {
        self.ok + self.crc_errors + self.bit_errors
    }
}
