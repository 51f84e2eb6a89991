//! Core types for the acquisition library
//!
//! This module defines the fundamental values that flow through the pipeline:
//! raw frames captured from the bus, the decoded form handed to the power
//! detector and the batch queue, and the library-wide error type.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Result type for acquisition operations
pub type Result<T> = std::result::Result<T, AcquisitionError>;

/// Raw CAN frame as captured by the transport
///
/// Immutable once captured. Ownership moves to the decoder and then,
/// as part of a [`DecodedFrame`], onto the batch queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawFrame {
    /// CAN identifier (COB-ID)
    pub message_id: u32,
    /// Frame data bytes (0-8 bytes for classic CAN)
    pub payload: Vec<u8>,
    /// Data length code reported by the driver
    pub dlc: u8,
    /// Driver-specific message flags
    #[serde(default)]
    pub flags: u32,
    /// Capture timestamp in seconds
    pub timestamp_seconds: f64,
}

impl RawFrame {
    /// Create a frame whose DLC matches the payload length
    pub fn new(message_id: u32, payload: impl Into<Vec<u8>>, timestamp_seconds: f64) -> Self {
        let payload = payload.into();
        Self {
            message_id,
            dlc: payload.len() as u8,
            payload,
            flags: 0,
            timestamp_seconds,
        }
    }
}

/// Errors that can occur while acquiring, storing or exporting telemetry
#[derive(Debug, thiserror::Error)]
pub enum AcquisitionError {
    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Export error: {0}")]
    Export(String),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Trial {0} not found")]
    TrialNotFound(u32),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Value extracted for one field
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldValue {
    /// Decoded integer value
    Integer(i64),
    /// The field's encoding is not understood by the decoder
    Unsupported,
}

impl FieldValue {
    /// Integer value, if the field was decodable
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            FieldValue::Integer(v) => Some(*v),
            FieldValue::Unsupported => None,
        }
    }
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldValue::Integer(v) => write!(f, "{}", v),
            FieldValue::Unsupported => write!(f, "unsupported"),
        }
    }
}

/// A decoded field with its nominal range and unit
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedValue {
    pub value: FieldValue,
    /// Documented range, e.g. "-32768 to 32767"
    pub nominal_range: String,
    /// Engineering unit, empty when dimensionless
    pub unit: String,
}

/// Decoded fields of one frame, keyed by field name
pub type DecodedValues = HashMap<String, DecodedValue>;

/// A frame after decoding - the unit pushed onto the batch queue
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedFrame {
    /// PDO label for the message id ("Unknown PDO" if unmapped)
    pub pdo_label: String,
    pub message_id: u32,
    /// Successfully decoded fields; absent fields were not present this frame
    pub values: DecodedValues,
    /// Raw bytes, kept for persistence
    pub payload: Vec<u8>,
    pub dlc: u8,
    pub flags: u32,
    pub timestamp_seconds: f64,
}

impl DecodedFrame {
    /// Integer value of a named field, if present in this frame
    pub fn value(&self, name: &str) -> Option<i64> {
        self.values.get(name).and_then(|v| v.value.as_i64())
    }
}
