//! Trial persistence collaborators
//!
//! Storage is laid out table-per-trial, keyed by trial number. Only raw
//! frames are persisted; decoded values are re-derived from the payload at
//! export time.

use crate::types::{DecodedFrame, Result};
use serde::{Deserialize, Serialize};

pub mod jsonl;
pub mod memory;

pub use jsonl::JsonlStore;
pub use memory::MemoryStore;

/// One persisted row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredFrame {
    pub trial_number: u32,
    pub timestamp_seconds: f64,
    pub message_id: u32,
    pub payload: Vec<u8>,
}

impl StoredFrame {
    pub fn from_decoded(frame: &DecodedFrame, trial_number: u32) -> Self {
        Self {
            trial_number,
            timestamp_seconds: frame.timestamp_seconds,
            message_id: frame.message_id,
            payload: frame.payload.clone(),
        }
    }
}

/// Persistence interface used by the trial lifecycle
pub trait TrialStore {
    /// Next unused trial number; strictly increasing
    fn next_trial_number(&mut self) -> Result<u32>;

    /// Create the table of a trial; calling it again for the same trial is a no-op
    fn create_table_for_trial(&mut self, trial_number: u32) -> Result<()>;

    /// Append every frame of the batch to the trial's table, in order
    fn store_data_for_trial(&mut self, batch: &[DecodedFrame], trial_number: u32) -> Result<()>;

    /// All rows of a trial in insertion order
    fn load_trial(&self, trial_number: u32) -> Result<Vec<StoredFrame>>;

    /// Trial numbers that have a table, ascending
    fn list_trials(&self) -> Result<Vec<u32>>;
}
