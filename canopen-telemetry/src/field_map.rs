//! Declarative field map
//!
//! Maps (message id, byte range) to an encoding, a field name, a nominal
//! range and a unit. The map is built once at startup and shared read-only
//! by the decoder, the power detector and the CSV exporter.

use crate::types::{AcquisitionError, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::fmt;

/// Label used for message ids missing from the PDO label table
pub const UNKNOWN_PDO_LABEL: &str = "Unknown PDO";

/// Numeric interpretation of a field's bytes
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Encoding {
    /// Single unsigned byte
    U8,
    /// Big-endian unsigned 16-bit
    U16,
    /// Big-endian signed 16-bit (two's complement)
    S16,
    /// Low four bits of a single byte
    NibbleLow,
    /// Encoding name not understood by this decoder
    Unsupported(String),
}

impl From<String> for Encoding {
    fn from(name: String) -> Self {
        match name.as_str() {
            "U8" => Encoding::U8,
            "U16" => Encoding::U16,
            "S16" => Encoding::S16,
            "NibbleLow" | "0-15" => Encoding::NibbleLow,
            _ => Encoding::Unsupported(name),
        }
    }
}

impl From<Encoding> for String {
    fn from(encoding: Encoding) -> Self {
        encoding.to_string()
    }
}

impl fmt::Display for Encoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Encoding::U8 => write!(f, "U8"),
            Encoding::U16 => write!(f, "U16"),
            Encoding::S16 => write!(f, "S16"),
            Encoding::NibbleLow => write!(f, "NibbleLow"),
            Encoding::Unsupported(name) => write!(f, "{}", name),
        }
    }
}

/// Byte range inside a payload; `end` is inclusive
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByteRange {
    pub start: u8,
    pub end: Option<u8>,
}

impl ByteRange {
    /// Single byte at `index`
    pub const fn single(index: u8) -> Self {
        Self { start: index, end: None }
    }

    /// Inclusive pair of bytes
    pub const fn pair(start: u8, end: u8) -> Self {
        Self { start, end: Some(end) }
    }

    /// Last byte index covered by the range
    pub fn last(&self) -> u8 {
        self.end.unwrap_or(self.start)
    }

    /// True if every index of the range lies inside a payload of `len` bytes
    pub fn fits(&self, len: usize) -> bool {
        (self.start as usize) < len && (self.last() as usize) < len
    }
}

impl fmt::Display for ByteRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.end {
            Some(end) => write!(f, "{}-{}", self.start, end),
            None => write!(f, "{}", self.start),
        }
    }
}

/// One entry of the field map
#[derive(Debug, Clone, PartialEq)]
pub struct FieldSpec {
    /// COB-ID of the PDO carrying the field
    pub message_id: u32,
    pub range: ByteRange,
    pub encoding: Encoding,
    /// Field name, used as the key of decoded values
    pub name: String,
    /// Documented range, e.g. "0-65535"
    pub nominal_range: String,
    /// Engineering unit, empty when dimensionless
    pub unit: String,
}

impl FieldSpec {
    pub fn new(
        message_id: u32,
        range: ByteRange,
        encoding: Encoding,
        name: impl Into<String>,
        nominal_range: impl Into<String>,
        unit: impl Into<String>,
    ) -> Self {
        Self {
            message_id,
            range,
            encoding,
            name: name.into(),
            nominal_range: nominal_range.into(),
            unit: unit.into(),
        }
    }
}

/// Field map as written in a configuration file
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FieldMapConfig {
    #[serde(default)]
    pub fields: Vec<FieldSpecConfig>,
    #[serde(default)]
    pub labels: Vec<LabelConfig>,
}

/// PDO label entry as written in a configuration file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LabelConfig {
    pub message_id: u32,
    pub label: String,
}

/// Field entry as written in a configuration file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldSpecConfig {
    pub message_id: u32,
    /// Either a single index (`bytes = 0`) or an inclusive pair (`bytes = [6, 7]`)
    pub bytes: ByteRangeConfig,
    pub encoding: Encoding,
    pub name: String,
    #[serde(default)]
    pub nominal_range: String,
    #[serde(default)]
    pub unit: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ByteRangeConfig {
    Single(u8),
    Pair([u8; 2]),
}

impl TryFrom<FieldSpecConfig> for FieldSpec {
    type Error = AcquisitionError;

    fn try_from(config: FieldSpecConfig) -> Result<Self> {
        let range = match config.bytes {
            ByteRangeConfig::Single(index) => ByteRange::single(index),
            ByteRangeConfig::Pair([start, end]) => {
                if start > end {
                    return Err(AcquisitionError::Config(format!(
                        "field '{}': byte range start {} is after end {}",
                        config.name, start, end
                    )));
                }
                ByteRange::pair(start, end)
            }
        };

        Ok(FieldSpec {
            message_id: config.message_id,
            range,
            encoding: config.encoding,
            name: config.name,
            nominal_range: config.nominal_range,
            unit: config.unit,
        })
    }
}

/// Ordered list of field specs plus the PDO label table
#[derive(Debug, Clone, Default)]
pub struct FieldMap {
    fields: Vec<FieldSpec>,
    labels: BTreeMap<u32, String>,
}

impl FieldMap {
    /// Create an empty field map
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a field; declaration order is kept
    pub fn with_field(mut self, spec: FieldSpec) -> Self {
        self.fields.push(spec);
        self
    }

    /// Set the PDO label of a message id, replacing any previous label
    pub fn with_label(mut self, message_id: u32, label: impl Into<String>) -> Self {
        self.labels.insert(message_id, label.into());
        self
    }

    /// Built-in map of the motor controller's four transmit PDOs
    pub fn motor_controller() -> Self {
        use Encoding::*;
        const S16_RANGE: &str = "-32768 to 32767";
        const U16_RANGE: &str = "0-65535";

        let fields = [
            (390, ByteRange::pair(0, 1), U16, "Status word", U16_RANGE, ""),
            (390, ByteRange::pair(2, 3), S16, "Actual speed", S16_RANGE, "Rpm"),
            (390, ByteRange::pair(4, 5), U16, "RMS motor Current", U16_RANGE, "Arms"),
            (390, ByteRange::pair(6, 7), S16, "DC Bus Voltage", S16_RANGE, "Adc"),
            (646, ByteRange::pair(0, 1), S16, "Internal Speed Reference", S16_RANGE, "Rpm"),
            (646, ByteRange::pair(2, 3), S16, "Reference Torque", S16_RANGE, "Nm"),
            (646, ByteRange::pair(4, 5), S16, "Actual Torque", S16_RANGE, "Nm"),
            (646, ByteRange::pair(6, 7), S16, "Field weakening control: voltage angle", S16_RANGE, "Deg"),
            (902, ByteRange::single(0), U8, "Field weakening control: regulator status", "0-255", ""),
            (902, ByteRange::single(1), NibbleLow, "Current limit: actual limit type", "0-15", ""),
            (902, ByteRange::pair(2, 3), S16, "Motor voltage control: U peak normalized", S16_RANGE, ""),
            (902, ByteRange::pair(4, 5), U16, "Digital status word", U16_RANGE, ""),
            (902, ByteRange::pair(6, 7), S16, "Scaled throttle percent", S16_RANGE, ""),
            (1158, ByteRange::pair(0, 1), S16, "Motor voltage control: idLimit", S16_RANGE, ""),
            (1158, ByteRange::pair(2, 3), S16, "Motor voltage control: Idfiltered", S16_RANGE, "Arms"),
            (1158, ByteRange::pair(4, 5), S16, "Actual currents: iq", S16_RANGE, "Apk"),
            (1158, ByteRange::pair(6, 7), S16, "Motor measurements: DC bus current", S16_RANGE, "Adc"),
        ];

        let map = fields.into_iter().fold(
            FieldMap::new(),
            |map, (id, range, encoding, name, nominal, unit)| {
                map.with_field(FieldSpec::new(id, range, encoding, name, nominal, unit))
            },
        );

        map.with_label(390, "PDO1")
            .with_label(646, "PDO2")
            .with_label(902, "PDO3")
            .with_label(1158, "PDO4")
    }

    /// Build a field map from configuration, validating every entry
    pub fn from_config(config: FieldMapConfig) -> Result<Self> {
        let mut map = FieldMap::new();
        for field in config.fields {
            map.fields.push(FieldSpec::try_from(field)?);
        }
        map.labels = config
            .labels
            .into_iter()
            .map(|l| (l.message_id, l.label))
            .collect();
        log::debug!(
            "Field map loaded: {} fields, {} PDO labels",
            map.fields.len(),
            map.labels.len()
        );
        Ok(map)
    }

    /// All field specs in declaration order
    pub fn fields(&self) -> &[FieldSpec] {
        &self.fields
    }

    /// Field specs carried by a message id
    pub fn specs_for(&self, message_id: u32) -> impl Iterator<Item = &FieldSpec> {
        self.fields.iter().filter(move |s| s.message_id == message_id)
    }

    /// Look up a field by message id and name
    pub fn field(&self, message_id: u32, name: &str) -> Option<&FieldSpec> {
        self.specs_for(message_id).find(|s| s.name == name)
    }

    /// Unique field names in declaration order
    pub fn field_names(&self) -> Vec<&str> {
        let mut seen = HashSet::new();
        self.fields
            .iter()
            .map(|s| s.name.as_str())
            .filter(|name| seen.insert(*name))
            .collect()
    }

    /// PDO label for a message id
    pub fn pdo_label(&self, message_id: u32) -> &str {
        self.labels
            .get(&message_id)
            .map(String::as_str)
            .unwrap_or(UNKNOWN_PDO_LABEL)
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }
}
