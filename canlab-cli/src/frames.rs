//! Command-line frame notation
//!
//! Frames are written the way `candump` prints them: `123#803E` for a
//! standard id, eight hex digits (`18FF0010#01`) for an extended one.

use canlab_core::RawFrame;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("Odd number of hex digits in {0:?}")]
    OddLength(String),

    #[error("Invalid hex digit in {0:?}")]
    InvalidHex(String),

    #[error("Invalid CAN id {0:?}")]
    InvalidId(String),

    #[error("Missing '#' separator in frame {0:?}")]
    MissingSeparator(String),

    #[error("Invalid frame {text:?}: {source}")]
    InvalidFrame {
        text: String,
        source: canlab_core::FrameError,
    },

    #[error("Expected SIGNAL=VALUE, got {0:?}")]
    InvalidAssignment(String),
}

/// Parse a hex byte string such as `"11 22 33"`, `"112233"` or `"0x1122"`
pub fn parse_hex(text: &str) -> Result<Vec<u8>, ParseError> {
    let digits: String = strip_hex_prefix(text.trim())
        .chars()
        .filter(|c| !c.is_whitespace() && *c != ':')
        .collect();

    if !digits.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(ParseError::InvalidHex(text.to_string()));
    }
    if digits.len() % 2 != 0 {
        return Err(ParseError::OddLength(text.to_string()));
    }

    (0..digits.len())
        .step_by(2)
        .map(|i| {
            u8::from_str_radix(&digits[i..i + 2], 16)
                .map_err(|_| ParseError::InvalidHex(text.to_string()))
        })
        .collect()
}

/// Format bytes as upper-case hex without separators
pub fn to_hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02X}", b)).collect()
}

/// Drop a single leading `0x` or `0X`
fn strip_hex_prefix(text: &str) -> &str {
    text.strip_prefix("0x")
        .or_else(|| text.strip_prefix("0X"))
        .unwrap_or(text)
}

fn id_digits(text: &str) -> &str {
    strip_hex_prefix(text.trim())
}

/// Parse a CAN id given in hex, with or without a `0x` prefix
pub fn parse_id(text: &str) -> Result<u32, ParseError> {
    let digits = id_digits(text);
    if digits.is_empty() || !digits.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(ParseError::InvalidId(text.to_string()));
    }
    u32::from_str_radix(digits, 16).map_err(|_| ParseError::InvalidId(text.to_string()))
}

/// Parse a frame in `candump` notation
///
/// Ids written with more than three hex digits, not counting a `0x`
/// prefix, are treated as extended.
pub fn parse_frame(text: &str) -> Result<RawFrame, ParseError> {
    let (id_text, data_text) = text
        .trim()
        .split_once('#')
        .ok_or_else(|| ParseError::MissingSeparator(text.to_string()))?;

    let id = parse_id(id_text)?;
    let payload = parse_hex(data_text)?;
    let extended = id_digits(id_text).len() > 3;

    RawFrame::new(id, extended, payload).map_err(|source| ParseError::InvalidFrame {
        text: text.to_string(),
        source,
    })
}

/// Parse a `SIGNAL=VALUE` assignment
pub fn parse_assignment(text: &str) -> Result<(String, f64), ParseError> {
    let invalid = || ParseError::InvalidAssignment(text.to_string());
    let (name, value) = text.split_once('=').ok_or_else(invalid)?;
    let name = name.trim();
    if name.is_empty() {
        return Err(invalid());
    }
    let value: f64 = value.trim().parse().map_err(|_| invalid())?;
    Ok((name.to_string(), value))
}
