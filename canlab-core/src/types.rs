//! Core types for the CAN lab library
//!
//! This module defines the frames handed to and produced by the codec, the
//! decoded signal values, and the error taxonomy shared by every component.
//! Nothing here performs I/O.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;

/// Timestamp type used throughout the library
pub type Timestamp = DateTime<Utc>;

/// Result type for library operations
pub type Result<T> = std::result::Result<T, Error>;

/// Largest standard (11-bit) CAN identifier
pub const MAX_STANDARD_ID: u32 = 0x7FF;

/// Largest extended (29-bit) CAN identifier
pub const MAX_EXTENDED_ID: u32 = 0x1FFF_FFFF;

/// Maximum payload of a classic CAN frame in bytes
pub const MAX_PAYLOAD_LEN: usize = 8;

/// Check that an identifier fits the 11-bit or 29-bit range
pub fn id_in_range(id: u32, extended: bool) -> bool {
    if extended {
        id <= MAX_EXTENDED_ID
    } else {
        id <= MAX_STANDARD_ID
    }
}

/// Raw CAN frame as supplied by (or handed to) the bus adapter
///
/// Fields are private so a frame cannot be altered once it has been
/// validated; use the accessors to read it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct RawFrame {
    id: u32,
    extended: bool,
    payload: Vec<u8>,
}

impl RawFrame {
    /// Create a frame, validating identifier range and payload length
    pub fn new(id: u32, extended: bool, payload: impl Into<Vec<u8>>) -> std::result::Result<Self, FrameError> {
        let payload = payload.into();
        if !id_in_range(id, extended) {
            return Err(FrameError::InvalidId { id, extended });
        }
        if payload.len() > MAX_PAYLOAD_LEN {
            return Err(FrameError::PayloadTooLong(payload.len()));
        }
        Ok(Self { id, extended, payload })
    }

    /// Build a frame whose id and length were already checked by a descriptor
    pub(crate) fn from_validated(id: u32, extended: bool, payload: Vec<u8>) -> Self {
        debug_assert!(id_in_range(id, extended) && payload.len() <= MAX_PAYLOAD_LEN);
        Self { id, extended, payload }
    }

    /// Create a standard (11-bit) frame
    pub fn standard(id: u32, payload: impl Into<Vec<u8>>) -> std::result::Result<Self, FrameError> {
        Self::new(id, false, payload)
    }

    /// Create an extended (29-bit) frame
    pub fn extended(id: u32, payload: impl Into<Vec<u8>>) -> std::result::Result<Self, FrameError> {
        Self::new(id, true, payload)
    }

    /// CAN identifier (11-bit or 29-bit)
    pub fn id(&self) -> u32 {
        self.id
    }

    /// True if the identifier is a 29-bit extended one
    pub fn is_extended(&self) -> bool {
        self.extended
    }

    /// Payload bytes
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Data length code - number of payload bytes
    pub fn dlc(&self) -> usize {
        self.payload.len()
    }
}

impl fmt::Display for RawFrame {
    /// candump-style rendering, e.g. `123#803E0000`
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.extended {
            write!(f, "{:08X}#", self.id)?;
        } else {
            write!(f, "{:03X}#", self.id)?;
        }
        for byte in &self.payload {
            write!(f, "{:02X}", byte)?;
        }
        Ok(())
    }
}

/// A decoded signal with its current value
///
/// Derived from a frame on every decode call and never stored by the library.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DecodedSignal {
    /// Signal name from the descriptor table
    pub name: String,
    /// Raw value extracted from the payload, before scaling
    pub raw: u64,
    /// Physical value: `raw * factor + offset`
    pub physical: f64,
    /// Engineering unit (e.g., "rpm", "°C", "V")
    pub unit: String,
}

impl fmt::Display for DecodedSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.unit.is_empty() {
            write!(f, "{} = {:.3}", self.name, self.physical)
        } else {
            write!(f, "{} = {:.3} {}", self.name, self.physical, self.unit)
        }
    }
}

/// All signals decoded from one frame, in descriptor order
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DecodedFrame {
    /// CAN identifier of the source frame
    pub id: u32,
    /// Frame name from the descriptor table
    pub name: String,
    /// Decoded signals, ordered as declared
    pub signals: Vec<DecodedSignal>,
}

impl DecodedFrame {
    /// Look up a decoded signal by name
    pub fn get(&self, name: &str) -> Option<&DecodedSignal> {
        self.signals.iter().find(|s| s.name == name)
    }

    /// Physical value of a signal, if present
    pub fn physical(&self, name: &str) -> Option<f64> {
        self.get(name).map(|s| s.physical)
    }
}

/// Errors raised while building a descriptor table
///
/// These are detected at load time and refuse construction of the codec.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConfigError {
    #[error("Signal '{signal}': bit length {bit_length} outside 1..=64")]
    InvalidBitLength { signal: String, bit_length: u32 },

    #[error("Signal '{signal}': bits {start_bit}..{end_bit} exceed {frame_length}-byte frame")]
    LayoutOutOfRange {
        signal: String,
        start_bit: u32,
        end_bit: u32,
        frame_length: usize,
    },

    #[error("Frame 0x{frame_id:X}: signals '{first}' and '{second}' overlap")]
    OverlappingSignals {
        frame_id: u32,
        first: String,
        second: String,
    },

    #[error("Frame 0x{frame_id:X}: signal '{signal}' declared twice")]
    DuplicateSignal { frame_id: u32, signal: String },

    #[error("Frame 0x{id:X} (extended: {extended}) declared twice")]
    DuplicateFrame { id: u32, extended: bool },

    #[error("Signal '{signal}': factor and offset must be finite and factor non-zero")]
    InvalidScaling { signal: String },

    #[error("Frame 0x{frame_id:X}: length {length} exceeds 8 bytes")]
    InvalidFrameLength { frame_id: u32, length: usize },

    #[error("Frame id 0x{id:X} out of range (extended: {extended})")]
    InvalidId { id: u32, extended: bool },
}

/// Errors raised while decoding a frame; the caller skips the frame
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    #[error("Unknown frame: CAN ID 0x{0:X}")]
    UnknownFrameId(u32),

    #[error("Signal '{signal}' needs {required_bits} bits but payload has {available_bits}")]
    TruncatedPayload {
        signal: String,
        required_bits: u32,
        available_bits: u32,
    },
}

/// Errors raised while encoding; the malformed frame must not be sent
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum EncodeError {
    #[error("Unknown frame: CAN ID 0x{0:X}")]
    UnknownFrameId(u32),

    #[error("Signal '{signal}' not declared for frame 0x{frame_id:X}")]
    UnknownSignal { frame_id: u32, signal: String },

    #[error("Signal '{signal}': value {value} does not fit in {bit_length} bits")]
    ValueOutOfRange {
        signal: String,
        value: f64,
        bit_length: u32,
    },
}

/// Errors raised by the node error-state machine; no mutation occurs
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum StateError {
    #[error("Invalid failure increment: {0}")]
    InvalidIncrement(i64),

    #[error("Node is bus-off and cannot communicate until recovery")]
    BusOff,
}

/// Errors raised when constructing a raw frame
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum FrameError {
    #[error("Payload of {0} bytes exceeds 8 bytes")]
    PayloadTooLong(usize),

    #[error("CAN ID 0x{id:X} out of range (extended: {extended})")]
    InvalidId { id: u32, extended: bool },
}

/// Any error produced by the library
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Decode error: {0}")]
    Decode(#[from] DecodeError),

    #[error("Encode error: {0}")]
    Encode(#[from] EncodeError),

    #[error("State error: {0}")]
    State(#[from] StateError),

    #[error("Frame error: {0}")]
    Frame(#[from] FrameError),
}
