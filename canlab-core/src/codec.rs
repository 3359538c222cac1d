//! Frame Codec
//!
//! Extracts signal values from raw CAN frames and packs physical values back
//! into payloads, based on the frame descriptors in a [`DescriptorTable`].
//! Both directions walk the same per-byte spans, so encode is the exact
//! inverse of decode.

use crate::signals::{DescriptorTable, FrameDescriptor, SignalLayout};
use crate::types::{DecodeError, DecodedFrame, DecodedSignal, EncodeError, RawFrame};

/// Decode every signal of a frame
///
/// # Arguments
/// * `table` - Descriptor table holding the frame definition
/// * `frame` - Raw CAN frame from the bus adapter
///
/// # Returns
/// * `Ok(DecodedFrame)` with one entry per declared signal, in order
/// * `Err(UnknownFrameId)` if the table has no descriptor for the id and
///   identifier format of the frame
/// * `Err(TruncatedPayload)` if a signal reaches past the payload
pub fn decode(table: &DescriptorTable, frame: &RawFrame) -> Result<DecodedFrame, DecodeError> {
    let descriptor = table
        .get_frame(frame.id(), frame.is_extended())
        .ok_or(DecodeError::UnknownFrameId(frame.id()))?;

    let payload = frame.payload();
    let mut signals = Vec::with_capacity(descriptor.signals.len());

    for signal in &descriptor.signals {
        let raw = extract_raw(payload, &signal.layout).map_err(|(required_bits, available_bits)| {
            log::warn!(
                "Signal '{}' requires {} bits but frame 0x{:X} only has {}",
                signal.name,
                required_bits,
                frame.id(),
                available_bits
            );
            DecodeError::TruncatedPayload {
                signal: signal.name.clone(),
                required_bits,
                available_bits,
            }
        })?;

        signals.push(DecodedSignal {
            name: signal.name.clone(),
            raw,
            physical: signal.layout.raw_to_physical(raw),
            unit: signal.layout.unit.clone(),
        });
    }

    log::debug!("Decoded frame {} into {} signals", frame, signals.len());

    Ok(DecodedFrame {
        id: frame.id(),
        name: descriptor.name.clone(),
        signals,
    })
}

/// Encode physical signal values into a frame
///
/// Starts from an all-zero payload of the frame's declared length; signals
/// not listed in `values` stay zero. If both a standard and an extended
/// descriptor use `frame_id`, the standard one is encoded; use
/// [`encode_extended`] for the other.
///
/// # Arguments
/// * `table` - Descriptor table holding the frame definition
/// * `frame_id` - CAN identifier of the frame to build
/// * `values` - `(signal name, physical value)` pairs
pub fn encode<'a, I>(table: &DescriptorTable, frame_id: u32, values: I) -> Result<RawFrame, EncodeError>
where
    I: IntoIterator<Item = (&'a str, f64)>,
{
    let descriptor = table
        .lookup(frame_id)
        .ok_or(EncodeError::UnknownFrameId(frame_id))?;
    encode_descriptor(descriptor, values)
}

/// Encode physical signal values into an extended (29-bit) frame
pub fn encode_extended<'a, I>(
    table: &DescriptorTable,
    frame_id: u32,
    values: I,
) -> Result<RawFrame, EncodeError>
where
    I: IntoIterator<Item = (&'a str, f64)>,
{
    let descriptor = table
        .get_frame(frame_id, true)
        .ok_or(EncodeError::UnknownFrameId(frame_id))?;
    encode_descriptor(descriptor, values)
}

fn encode_descriptor<'a, I>(descriptor: &FrameDescriptor, values: I) -> Result<RawFrame, EncodeError>
where
    I: IntoIterator<Item = (&'a str, f64)>,
{
    let payload = encode_payload(descriptor, values)?;
    let frame = RawFrame::from_validated(descriptor.id, descriptor.extended, payload);

    log::debug!("Encoded frame {}", frame);
    Ok(frame)
}

fn encode_payload<'a, I>(descriptor: &FrameDescriptor, values: I) -> Result<Vec<u8>, EncodeError>
where
    I: IntoIterator<Item = (&'a str, f64)>,
{
    let mut payload = vec![0u8; descriptor.length];

    for (name, value) in values {
        let signal = descriptor
            .signal(name)
            .ok_or_else(|| EncodeError::UnknownSignal {
                frame_id: descriptor.id,
                signal: name.to_string(),
            })?;
        let raw = signal
            .layout
            .physical_to_raw(value)
            .ok_or_else(|| EncodeError::ValueOutOfRange {
                signal: name.to_string(),
                value,
                bit_length: signal.layout.bit_length,
            })?;
        pack_raw(&mut payload, &signal.layout, raw);
    }

    Ok(payload)
}

/// Extract the raw unsigned value of a signal from payload bytes
///
/// On a payload too short for the layout, returns `(required_bits,
/// available_bits)`.
pub fn extract_raw(payload: &[u8], layout: &SignalLayout) -> Result<u64, (u32, u32)> {
    let available_bits = 8 * payload.len() as u32;
    if layout.end_bit() > available_bits {
        return Err((layout.end_bit(), available_bits));
    }

    let mut result: u64 = 0;
    for span in layout.spans(payload.len()) {
        let bits = (payload[span.byte_index] & span.byte_mask()) >> span.bit_offset;
        result |= (bits as u64) << span.value_shift;
    }
    Ok(result)
}

/// Pack a raw unsigned value into payload bytes
///
/// Clears the target bits before writing so several signals can share a
/// payload. The layout must fit the payload.
pub(crate) fn pack_raw(payload: &mut [u8], layout: &SignalLayout, raw: u64) {
    for span in layout.spans(payload.len()) {
        let mask = span.byte_mask();
        let bits = ((raw >> span.value_shift) as u8) << span.bit_offset;
        payload[span.byte_index] &= !mask;
        payload[span.byte_index] |= bits & mask;
    }
}

/// Codec bound to one validated descriptor table
///
/// Stateless apart from the table, so it can be shared across nodes behind
/// an `Arc` without synchronization.
#[derive(Debug, Clone)]
pub struct FrameCodec {
    table: DescriptorTable,
}

impl FrameCodec {
    /// Create a codec over an already validated table
    pub fn new(table: DescriptorTable) -> Self {
        Self { table }
    }

    /// Descriptor table backing this codec
    pub fn table(&self) -> &DescriptorTable {
        &self.table
    }

    /// Decode a frame; see [`decode`]
    pub fn decode(&self, frame: &RawFrame) -> Result<DecodedFrame, DecodeError> {
        decode(&self.table, frame)
    }

    /// Encode a frame from `(name, value)` pairs; see [`encode`]
    pub fn encode<'a, I>(&self, frame_id: u32, values: I) -> Result<RawFrame, EncodeError>
    where
        I: IntoIterator<Item = (&'a str, f64)>,
    {
        encode(&self.table, frame_id, values)
    }

    /// Encode an extended frame; see [`encode_extended`]
    pub fn encode_extended<'a, I>(&self, frame_id: u32, values: I) -> Result<RawFrame, EncodeError>
    where
        I: IntoIterator<Item = (&'a str, f64)>,
    {
        encode_extended(&self.table, frame_id, values)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signals::ByteOrder;

    fn layout(start_bit: u32, bit_length: u32, byte_order: ByteOrder) -> SignalLayout {
        SignalLayout {
            start_bit,
            bit_length,
            byte_order,
            factor: 1.0,
            offset: 0.0,
            unit: String::new(),
        }
    }

    fn engine_table() -> DescriptorTable {
        let frame = FrameDescriptor::new(0x123, "EngineData").with_signal(
            "EngineSpeed",
            SignalLayout {
                start_bit: 24,
                bit_length: 16,
                byte_order: ByteOrder::LittleEndian,
                factor: 0.125,
                offset: 0.0,
                unit: "rpm".to_string(),
            },
        );
        DescriptorTable::from_frames([frame]).unwrap()
    }

    #[test]
    fn test_extract_little_endian_simple() {
        let data = [0xAB, 0xCD, 0xEF, 0x12];
        assert_eq!(extract_raw(&data, &layout(0, 8, ByteOrder::LittleEndian)), Ok(0xAB));
    }

    #[test]
    fn test_extract_little_endian_cross_byte() {
        let data = [0xAB, 0xCD, 0xEF, 0x12];
        assert_eq!(extract_raw(&data, &layout(0, 16, ByteOrder::LittleEndian)), Ok(0xCDAB));
        // Nibble-aligned span straddling bytes 0 and 1
        assert_eq!(extract_raw(&data, &layout(4, 8, ByteOrder::LittleEndian)), Ok(0xDA));
    }

    #[test]
    fn test_extract_big_endian() {
        // Payload integer is 0xABCDEF12 with byte 0 most significant
        let data = [0xAB, 0xCD, 0xEF, 0x12];
        assert_eq!(extract_raw(&data, &layout(0, 8, ByteOrder::BigEndian)), Ok(0x12));
        assert_eq!(extract_raw(&data, &layout(24, 8, ByteOrder::BigEndian)), Ok(0xAB));
        assert_eq!(extract_raw(&data, &layout(4, 16, ByteOrder::BigEndian)), Ok(0xDEF1));
    }

    #[test]
    fn test_extract_64_bits() {
        let data = [0x11, 0x22, 0x33, 0x44, 0xFF, 0x66, 0x77, 0x88];
        assert_eq!(
            extract_raw(&data, &layout(0, 64, ByteOrder::LittleEndian)),
            Ok(0x887766FF44332211)
        );
        assert_eq!(
            extract_raw(&data, &layout(0, 64, ByteOrder::BigEndian)),
            Ok(0x11223344FF667788)
        );
    }

    #[test]
    fn test_extract_truncated() {
        let data = [0x01, 0x02];
        assert_eq!(extract_raw(&data, &layout(8, 16, ByteOrder::LittleEndian)), Err((24, 16)));
    }

    #[test]
    fn test_pack_clears_existing_bits() {
        let mut data = [0xFFu8; 8];
        pack_raw(&mut data, &layout(7, 1, ByteOrder::LittleEndian), 0);
        assert_eq!(data[0], 0x7F);
        assert_eq!(data[1], 0xFF);
    }

    #[test]
    fn test_pack_big_endian_golden_bytes() {
        let mut data = [0u8; 4];
        pack_raw(&mut data, &layout(4, 16, ByteOrder::BigEndian), 0xDEF1);
        assert_eq!(data, [0x00, 0x0D, 0xEF, 0x10]);
    }

    #[test]
    fn test_encode_engine_speed() {
        let table = engine_table();
        let frame = encode(&table, 0x123, [("EngineSpeed", 2000.0)]).unwrap();
        assert_eq!(frame.id(), 0x123);
        assert_eq!(frame.dlc(), 8);
        assert_eq!(frame.payload(), &[0, 0, 0, 0x80, 0x3E, 0, 0, 0]);

        let decoded = decode(&table, &frame).unwrap();
        let speed = decoded.get("EngineSpeed").unwrap();
        assert_eq!(speed.raw, 0x3E80);
        assert_eq!(speed.physical, 2000.0);
        assert_eq!(speed.unit, "rpm");
    }

    #[test]
    fn test_decode_unknown_frame() {
        let table = engine_table();
        let frame = RawFrame::standard(0x124, vec![0; 8]).unwrap();
        assert_eq!(decode(&table, &frame), Err(DecodeError::UnknownFrameId(0x124)));
    }

    #[test]
    fn test_decode_truncated_payload() {
        let table = engine_table();
        let frame = RawFrame::standard(0x123, vec![0; 4]).unwrap();
        assert_eq!(
            decode(&table, &frame),
            Err(DecodeError::TruncatedPayload {
                signal: "EngineSpeed".to_string(),
                required_bits: 40,
                available_bits: 32,
            })
        );
    }

    #[test]
    fn test_encode_errors() {
        let table = engine_table();
        assert_eq!(
            encode(&table, 0x123, [("Throttle", 1.0)]),
            Err(EncodeError::UnknownSignal {
                frame_id: 0x123,
                signal: "Throttle".to_string(),
            })
        );
        // 65535 * 0.125 = 8191.875 is the largest encodable speed
        assert!(encode(&table, 0x123, [("EngineSpeed", 8191.875)]).is_ok());
        assert!(matches!(
            encode(&table, 0x123, [("EngineSpeed", 8192.0)]),
            Err(EncodeError::ValueOutOfRange { bit_length: 16, .. })
        ));
        assert!(matches!(
            encode(&table, 0x123, [("EngineSpeed", -1.0)]),
            Err(EncodeError::ValueOutOfRange { .. })
        ));
        assert_eq!(encode(&table, 0x7FF, std::iter::empty()), Err(EncodeError::UnknownFrameId(0x7FF)));
    }

    #[test]
    fn test_encode_leaves_unwritten_signals_zero() {
        let frame = FrameDescriptor::new(0x100, "EngineData")
            .with_signal("EngineTemp", layout(0, 16, ByteOrder::LittleEndian))
            .with_signal("BatteryVolt", layout(16, 16, ByteOrder::LittleEndian))
            .with_signal("RPM", layout(32, 32, ByteOrder::LittleEndian));
        let codec = FrameCodec::new(DescriptorTable::from_frames([frame]).unwrap());

        let frame = codec.encode(0x100, [("RPM", 3500.0)]).unwrap();
        let decoded = codec.decode(&frame).unwrap();
        assert_eq!(decoded.physical("EngineTemp"), Some(0.0));
        assert_eq!(decoded.physical("BatteryVolt"), Some(0.0));
        assert_eq!(decoded.physical("RPM"), Some(3500.0));
        let names: Vec<&str> = decoded.signals.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, ["EngineTemp", "BatteryVolt", "RPM"]);
    }

    #[test]
    fn test_encode_short_frame_big_endian() {
        let frame = FrameDescriptor::new(0x301, "TecStatus")
            .with_length(2)
            .with_signal("TEC", layout(0, 16, ByteOrder::BigEndian));
        let codec = FrameCodec::new(DescriptorTable::from_frames([frame]).unwrap());

        let frame = codec.encode(0x301, [("TEC", 264.0)]).unwrap();
        assert_eq!(frame.payload(), &[0x01, 0x08]);
        assert_eq!(codec.decode(&frame).unwrap().physical("TEC"), Some(264.0));
    }

    #[test]
    fn test_extract_big_endian_short_payload_is_error() {
        // Big-endian byte indices count down from the payload end
        let data = [0xAB];
        assert_eq!(extract_raw(&data, &layout(0, 16, ByteOrder::BigEndian)), Err((16, 8)));
        assert_eq!(extract_raw(&[], &layout(0, 1, ByteOrder::BigEndian)), Err((1, 0)));
    }

    #[test]
    fn test_encode_extended_frame() {
        let frame = FrameDescriptor::new(0x18FF_0010, "HybridStatus")
            .with_extended(true)
            .with_length(2)
            .with_signal("Mode", layout(0, 8, ByteOrder::LittleEndian));
        let codec = FrameCodec::new(DescriptorTable::from_frames([frame]).unwrap());

        let encoded = codec.encode(0x18FF_0010, [("Mode", 3.0)]).unwrap();
        assert!(encoded.is_extended());
        assert_eq!(encoded.id(), 0x18FF_0010);
        assert_eq!(encoded.payload(), &[0x03, 0x00]);
        assert_eq!(codec.encode_extended(0x18FF_0010, [("Mode", 3.0)]), Ok(encoded.clone()));

        let decoded = codec.decode(&encoded).unwrap();
        assert_eq!(decoded.name, "HybridStatus");
        assert_eq!(decoded.physical("Mode"), Some(3.0));
    }

    #[test]
    fn test_decode_rejects_identifier_format_mismatch() {
        let table = engine_table();
        let frame = RawFrame::extended(0x123, vec![0; 8]).unwrap();
        assert_eq!(decode(&table, &frame), Err(DecodeError::UnknownFrameId(0x123)));
        assert_eq!(
            encode_extended(&table, 0x123, std::iter::empty()),
            Err(EncodeError::UnknownFrameId(0x123))
        );
    }

    #[test]
    fn test_standard_and_extended_frames_share_id() {
        let standard = FrameDescriptor::new(0x123, "EngineData")
            .with_length(1)
            .with_signal("Speed", layout(0, 8, ByteOrder::LittleEndian));
        let extended = FrameDescriptor::new(0x123, "GatewayData")
            .with_extended(true)
            .with_length(1)
            .with_signal("Load", layout(0, 8, ByteOrder::LittleEndian));
        let codec = FrameCodec::new(DescriptorTable::from_frames([standard, extended]).unwrap());

        let plain = codec.encode(0x123, [("Speed", 10.0)]).unwrap();
        assert!(!plain.is_extended());
        let wide = codec.encode_extended(0x123, [("Load", 20.0)]).unwrap();
        assert!(wide.is_extended());
        assert_eq!(plain.payload(), &[10]);
        assert_eq!(wide.payload(), &[20]);

        let plain = codec.decode(&plain).unwrap();
        assert_eq!(plain.name, "EngineData");
        assert_eq!(plain.physical("Speed"), Some(10.0));
        let wide = codec.decode(&wide).unwrap();
        assert_eq!(wide.name, "GatewayData");
        assert_eq!(wide.physical("Load"), Some(20.0));
    }
}
