//! Descriptor table
//!
//! Holds the frame descriptors known to a codec. Every descriptor is checked
//! when it is added: bit lengths, frame bounds, scaling and overlap between
//! signals. A table that exists is a table the codec can trust.

use crate::types::{id_in_range, ConfigError, MAX_PAYLOAD_LEN};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Byte order for signal extraction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ByteOrder {
    /// Byte 0 is the least significant byte of the payload integer
    LittleEndian,
    /// Last byte is the least significant byte of the payload integer
    BigEndian,
}

/// Position and scaling of one signal inside a payload
///
/// Every field is mandatory. There is no implicit factor of 1 or offset of 0.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignalLayout {
    /// Least significant bit of the signal in the payload integer
    pub start_bit: u32,
    /// Length in bits (1..=64)
    pub bit_length: u32,
    /// How payload bytes are ordered into the payload integer
    pub byte_order: ByteOrder,
    /// Scale factor to convert raw value to physical value
    pub factor: f64,
    /// Offset to add after scaling
    pub offset: f64,
    /// Engineering unit (may be empty)
    pub unit: String,
}

/// One contiguous span of bits within a single payload byte.
///
/// "Take `num_bits` bits starting at `bit_offset` in `payload[byte_index]`
/// and place them at `value_shift` in the raw value."
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BitSpan {
    pub byte_index: usize,
    /// Lowest bit position within the byte (0..=7).
    pub bit_offset: u8,
    /// Consecutive bits in this span (1..=8).
    pub num_bits: u8,
    /// Where these bits land in the raw u64, LSB-relative.
    pub value_shift: u8,
}

impl BitSpan {
    /// Mask of the span's bits, already shifted into place within the byte
    pub fn byte_mask(&self) -> u8 {
        (((1u16 << self.num_bits) - 1) as u8) << self.bit_offset
    }
}

impl SignalLayout {
    /// Bit position one past the signal's most significant bit
    pub fn end_bit(&self) -> u32 {
        self.start_bit.saturating_add(self.bit_length)
    }

    /// Largest raw value representable in `bit_length` bits
    pub fn max_raw(&self) -> u64 {
        if self.bit_length >= 64 {
            u64::MAX
        } else {
            (1u64 << self.bit_length) - 1
        }
    }

    /// Convert a raw value to its physical value
    pub fn raw_to_physical(&self, raw: u64) -> f64 {
        raw as f64 * self.factor + self.offset
    }

    /// Convert a physical value to a raw value, if it fits the bit length
    ///
    /// Rounds `(value - offset) / factor` to the nearest integer.
    pub fn physical_to_raw(&self, value: f64) -> Option<u64> {
        let raw = ((value - self.offset) / self.factor).round();
        // 2^64 is exactly representable; anything at or above it cannot fit
        if !raw.is_finite() || raw < 0.0 || raw >= 18_446_744_073_709_551_616.0 {
            return None;
        }
        let raw = raw as u64;
        (raw <= self.max_raw()).then_some(raw)
    }

    /// Split the signal into per-byte spans for a payload of `payload_len` bytes
    ///
    /// Logical bit `n` of the payload integer lives in byte `n / 8` for
    /// little-endian layouts and in byte `payload_len - 1 - n / 8` for
    /// big-endian ones, at bit `n % 8`. Callers must ensure the layout fits
    /// the payload.
    pub(crate) fn spans(&self, payload_len: usize) -> Vec<BitSpan> {
        let mut spans = Vec::with_capacity(9);
        let mut position = self.start_bit;
        let mut remaining = self.bit_length;

        while remaining > 0 {
            let bit_offset = (position % 8) as u8;
            let num_bits = std::cmp::min(8 - bit_offset as u32, remaining) as u8;
            let logical_byte = (position / 8) as usize;
            let byte_index = match self.byte_order {
                ByteOrder::LittleEndian => logical_byte,
                ByteOrder::BigEndian => payload_len - 1 - logical_byte,
            };
            spans.push(BitSpan {
                byte_index,
                bit_offset,
                num_bits,
                value_shift: (position - self.start_bit) as u8,
            });
            position += num_bits as u32;
            remaining -= num_bits as u32;
        }

        spans
    }
}

/// A named signal within a frame
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignalDefinition {
    /// Signal name
    pub name: String,
    /// Bit layout and scaling
    #[serde(flatten)]
    pub layout: SignalLayout,
}

impl SignalDefinition {
    pub fn new(name: impl Into<String>, layout: SignalLayout) -> Self {
        Self {
            name: name.into(),
            layout,
        }
    }
}

fn default_frame_length() -> usize {
    MAX_PAYLOAD_LEN
}

/// A CAN frame definition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FrameDescriptor {
    /// CAN identifier (11-bit or 29-bit)
    pub id: u32,
    /// Frame name
    pub name: String,
    /// True for 29-bit identifiers
    #[serde(default)]
    pub extended: bool,
    /// Declared payload length in bytes (default: 8)
    #[serde(default = "default_frame_length")]
    pub length: usize,
    /// Signals in declaration order
    #[serde(default)]
    pub signals: Vec<SignalDefinition>,
}

impl FrameDescriptor {
    /// Create an empty 8-byte standard frame descriptor
    pub fn new(id: u32, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            extended: false,
            length: MAX_PAYLOAD_LEN,
            signals: Vec::new(),
        }
    }

    /// Builder method: set the declared payload length
    pub fn with_length(mut self, length: usize) -> Self {
        self.length = length;
        self
    }

    /// Builder method: mark the identifier as extended (29-bit)
    pub fn with_extended(mut self, extended: bool) -> Self {
        self.extended = extended;
        self
    }

    /// Builder method: append a signal
    pub fn with_signal(mut self, name: impl Into<String>, layout: SignalLayout) -> Self {
        self.signals.push(SignalDefinition::new(name, layout));
        self
    }

    /// Look up a signal by name
    pub fn signal(&self, name: &str) -> Option<&SignalDefinition> {
        self.signals.iter().find(|s| s.name == name)
    }

    /// Check the descriptor against every layout rule
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !id_in_range(self.id, self.extended) {
            return Err(ConfigError::InvalidId {
                id: self.id,
                extended: self.extended,
            });
        }
        if self.length > MAX_PAYLOAD_LEN {
            return Err(ConfigError::InvalidFrameLength {
                frame_id: self.id,
                length: self.length,
            });
        }

        // Physical bits claimed so far, with the signal that claimed them
        let mut occupied = [0u8; MAX_PAYLOAD_LEN];
        let mut owners: [Vec<usize>; MAX_PAYLOAD_LEN] = Default::default();

        for (index, signal) in self.signals.iter().enumerate() {
            let layout = &signal.layout;

            if self.signals[..index].iter().any(|s| s.name == signal.name) {
                return Err(ConfigError::DuplicateSignal {
                    frame_id: self.id,
                    signal: signal.name.clone(),
                });
            }
            if !(1..=64).contains(&layout.bit_length) {
                return Err(ConfigError::InvalidBitLength {
                    signal: signal.name.clone(),
                    bit_length: layout.bit_length,
                });
            }
            if layout.end_bit() as usize > 8 * self.length {
                return Err(ConfigError::LayoutOutOfRange {
                    signal: signal.name.clone(),
                    start_bit: layout.start_bit,
                    end_bit: layout.end_bit(),
                    frame_length: self.length,
                });
            }
            if !layout.factor.is_finite() || layout.factor == 0.0 || !layout.offset.is_finite() {
                return Err(ConfigError::InvalidScaling {
                    signal: signal.name.clone(),
                });
            }

            for span in layout.spans(self.length) {
                let mask = span.byte_mask();
                if occupied[span.byte_index] & mask != 0 {
                    let other = owners[span.byte_index]
                        .iter()
                        .find(|&&owner| {
                            self.signals[owner]
                                .layout
                                .spans(self.length)
                                .iter()
                                .any(|s| s.byte_index == span.byte_index && s.byte_mask() & mask != 0)
                        })
                        .map(|&owner| self.signals[owner].name.clone())
                        .unwrap_or_default();
                    return Err(ConfigError::OverlappingSignals {
                        frame_id: self.id,
                        first: other,
                        second: signal.name.clone(),
                    });
                }
                occupied[span.byte_index] |= mask;
                owners[span.byte_index].push(index);
            }
        }

        Ok(())
    }
}

/// The descriptor table: (frame id, extended flag) → frame descriptor
///
/// A standard and an extended frame may share a numeric id.
#[derive(Debug, Clone, Default)]
pub struct DescriptorTable {
    frames: HashMap<(u32, bool), FrameDescriptor>,
}

impl DescriptorTable {
    /// Create a new empty table
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a table from a list of descriptors, stopping at the first invalid one
    pub fn from_frames<I>(frames: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = FrameDescriptor>,
    {
        let mut table = Self::new();
        for frame in frames {
            table.add_frame(frame)?;
        }
        Ok(table)
    }

    /// Validate a frame descriptor and add it to the table
    pub fn add_frame(&mut self, frame: FrameDescriptor) -> Result<(), ConfigError> {
        if let Err(e) = frame.validate() {
            log::warn!("Rejecting frame '{}' (0x{:X}): {}", frame.name, frame.id, e);
            return Err(e);
        }
        let key = (frame.id, frame.extended);
        if self.frames.contains_key(&key) {
            return Err(ConfigError::DuplicateFrame {
                id: frame.id,
                extended: frame.extended,
            });
        }

        log::debug!(
            "Added frame '{}' (0x{:X}) with {} signals",
            frame.name,
            frame.id,
            frame.signals.len()
        );
        self.frames.insert(key, frame);
        Ok(())
    }

    /// Get the descriptor for a frame id and identifier format
    pub fn get_frame(&self, id: u32, extended: bool) -> Option<&FrameDescriptor> {
        self.frames.get(&(id, extended))
    }

    /// Get the descriptor for a bare id, preferring the standard frame
    pub fn lookup(&self, id: u32) -> Option<&FrameDescriptor> {
        self.get_frame(id, false).or_else(|| self.get_frame(id, true))
    }

    /// Find every frame carrying a signal with this name
    pub fn find_signal(&self, signal_name: &str) -> Vec<(u32, &SignalDefinition)> {
        let mut found: Vec<(u32, &SignalDefinition)> = self
            .frames
            .values()
            .filter_map(|frame| frame.signal(signal_name).map(|s| (frame.id, s)))
            .collect();
        found.sort_unstable_by_key(|(id, _)| *id);
        found
    }

    /// All frame ids in ascending order
    pub fn frame_ids(&self) -> Vec<u32> {
        let mut ids: Vec<u32> = self.frames.keys().map(|(id, _)| *id).collect();
        ids.sort_unstable();
        ids.dedup();
        ids
    }

    /// Get table statistics
    pub fn stats(&self) -> TableStats {
        TableStats {
            num_frames: self.frames.len(),
            num_signals: self.frames.values().map(|f| f.signals.len()).sum(),
        }
    }
}

/// Table statistics
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TableStats {
    /// Number of frame descriptors
    pub num_frames: usize,
    /// Total number of signal definitions
    pub num_signals: usize,
}
