//! Frame decoding engine
//!
//! Turns raw PDO payloads into named values using the field map. Decoding is
//! total: fields whose byte range does not fit the payload are left out of
//! the result, and fields with an unknown encoding yield
//! [`FieldValue::Unsupported`]. Nothing here returns an error.

use crate::field_map::{Encoding, FieldMap, FieldSpec};
use crate::types::{DecodedFrame, DecodedValue, DecodedValues, FieldValue, RawFrame};
use std::sync::Arc;

/// Decode every field the map declares for `message_id`
///
/// # Arguments
/// * `field_map` - Field definitions
/// * `message_id` - COB-ID of the frame
/// * `payload` - Frame data bytes
///
/// # Returns
/// One entry per field whose range fits the payload. A missing entry means
/// "not present in this frame", never zero.
pub fn decode(field_map: &FieldMap, message_id: u32, payload: &[u8]) -> DecodedValues {
    let mut values = DecodedValues::new();

    for spec in field_map.specs_for(message_id) {
        if let Some(value) = extract_field(payload, spec) {
            values.insert(
                spec.name.clone(),
                DecodedValue {
                    value,
                    nominal_range: spec.nominal_range.clone(),
                    unit: spec.unit.clone(),
                },
            );
        }
    }

    values
}

/// Extract a single field, or `None` if its range exceeds the payload
pub fn extract_field(payload: &[u8], spec: &FieldSpec) -> Option<FieldValue> {
    if !spec.range.fits(payload.len()) {
        log::trace!(
            "Field '{}' (bytes {}) skipped: payload has {} bytes",
            spec.name,
            spec.range,
            payload.len()
        );
        return None;
    }

    let start = spec.range.start as usize;
    let end = spec.range.last() as usize;

    let value = match &spec.encoding {
        Encoding::U16 => FieldValue::Integer((i64::from(payload[start]) << 8) | i64::from(payload[end])),
        Encoding::S16 => FieldValue::Integer(i64::from(i16::from_be_bytes([payload[start], payload[end]]))),
        Encoding::U8 => FieldValue::Integer(i64::from(payload[start])),
        Encoding::NibbleLow => FieldValue::Integer(i64::from(payload[start] & 0x0F)),
        Encoding::Unsupported(name) => {
            log::trace!("Field '{}' has unsupported encoding '{}'", spec.name, name);
            FieldValue::Unsupported
        }
    };

    Some(value)
}

/// Decodes raw frames into [`DecodedFrame`]s using a shared field map
#[derive(Debug, Clone)]
pub struct FrameDecoder {
    field_map: Arc<FieldMap>,
}

impl FrameDecoder {
    pub fn new(field_map: Arc<FieldMap>) -> Self {
        Self { field_map }
    }

    /// The field map this decoder reads
    pub fn field_map(&self) -> &FieldMap {
        &self.field_map
    }

    /// Decode a frame and attach its PDO label
    pub fn decode_frame(&self, frame: RawFrame) -> DecodedFrame {
        let values = decode(&self.field_map, frame.message_id, &frame.payload);
        let pdo_label = self.field_map.pdo_label(frame.message_id).to_string();

        log::trace!(
            "Decoded {} (ID {}): {} fields",
            pdo_label,
            frame.message_id,
            values.len()
        );

        DecodedFrame {
            pdo_label,
            message_id: frame.message_id,
            values,
            payload: frame.payload,
            dlc: frame.dlc,
            flags: frame.flags,
            timestamp_seconds: frame.timestamp_seconds,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::field_map::{ByteRange, UNKNOWN_PDO_LABEL};

    fn single_field_map(range: ByteRange, encoding: Encoding) -> FieldMap {
        FieldMap::new().with_field(FieldSpec::new(1, range, encoding, "x", "", ""))
    }

    fn decode_one(map: &FieldMap, payload: &[u8]) -> Option<FieldValue> {
        decode(map, 1, payload).get("x").map(|v| v.value)
    }

    #[test]
    fn test_s16_is_big_endian_twos_complement() {
        let map = single_field_map(ByteRange::pair(0, 1), Encoding::S16);
        assert_eq!(decode_one(&map, &[0x80, 0x00]), Some(FieldValue::Integer(-32768)));
        assert_eq!(decode_one(&map, &[0x7F, 0xFF]), Some(FieldValue::Integer(32767)));
        assert_eq!(decode_one(&map, &[0xFF, 0xFF]), Some(FieldValue::Integer(-1)));
    }

    #[test]
    fn test_u16_is_big_endian() {
        let map = single_field_map(ByteRange::pair(0, 1), Encoding::U16);
        assert_eq!(decode_one(&map, &[0x01, 0x00]), Some(FieldValue::Integer(256)));
        assert_eq!(decode_one(&map, &[0xFF, 0xFF]), Some(FieldValue::Integer(65535)));
    }

    #[test]
    fn test_u8_and_nibble() {
        let map = FieldMap::motor_controller();
        let values = decode(&map, 902, &[0xAB, 0xF3, 0, 0, 0, 0, 0, 0]);
        assert_eq!(
            values["Field weakening control: regulator status"].value,
            FieldValue::Integer(0xAB)
        );
        assert_eq!(
            values["Current limit: actual limit type"].value,
            FieldValue::Integer(3)
        );
    }

    #[test]
    fn test_full_payload_yields_every_field() {
        let map = FieldMap::motor_controller();
        let values = decode(&map, 390, &[0; 8]);
        assert_eq!(values.len(), 4);
        assert_eq!(values["DC Bus Voltage"].unit, "Adc");
    }

    #[test]
    fn test_short_payload_yields_subset() {
        let map = FieldMap::motor_controller();
        let values = decode(&map, 390, &[0x00, 0x01, 0x00, 0x02, 0x00, 0x03, 0x00]);
        assert_eq!(values.len(), 3);
        assert!(!values.contains_key("DC Bus Voltage"));
        assert_eq!(values["RMS motor Current"].value, FieldValue::Integer(3));

        assert!(decode(&map, 390, &[]).is_empty());
    }

    #[test]
    fn test_unknown_message_decodes_to_nothing() {
        let map = FieldMap::motor_controller();
        assert!(decode(&map, 0x700, &[0; 8]).is_empty());
    }

    #[test]
    fn test_unsupported_encoding_is_recorded() {
        let map = single_field_map(ByteRange::single(0), Encoding::Unsupported("F32".into()));
        assert_eq!(decode_one(&map, &[0x10]), Some(FieldValue::Unsupported));
        // Range checks still apply
        assert_eq!(decode_one(&map, &[]), None);
    }

    #[test]
    fn test_frame_decoder_labels_frames() {
        let decoder = FrameDecoder::new(Arc::new(FieldMap::motor_controller()));

        let frame = RawFrame::new(390, vec![0, 0, 0, 0, 0, 0, 0x01, 0x2C], 1.25);
        let decoded = decoder.decode_frame(frame);
        assert_eq!(decoded.pdo_label, "PDO1");
        assert_eq!(decoded.value("DC Bus Voltage"), Some(300));
        assert_eq!(decoded.payload.len(), 8);
        assert_eq!(decoded.timestamp_seconds, 1.25);

        let unknown = decoder.decode_frame(RawFrame::new(0x123, vec![1, 2], 0.0));
        assert_eq!(unknown.pdo_label, UNKNOWN_PDO_LABEL);
        assert!(unknown.values.is_empty());
    }
}
