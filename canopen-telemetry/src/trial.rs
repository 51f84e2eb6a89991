//! Trial lifecycle
//!
//! A trial lives for one power-on to power-off cycle. The manager assigns
//! its number, creates its table, forwards batches to the store and
//! optionally exports the trial to CSV once it is finished.

use crate::export::export_trial_to_dir;
use crate::field_map::FieldMap;
use crate::store::TrialStore;
use crate::types::{DecodedFrame, Result};
use chrono::{DateTime, Local};
use std::path::PathBuf;
use std::sync::Arc;

/// One acquisition session
#[derive(Debug, Clone, PartialEq)]
pub struct Trial {
    pub number: u32,
    pub started_at: DateTime<Local>,
}

/// Assigns trial numbers and delegates storage
#[derive(Debug, Clone)]
pub struct TrialManager {
    field_map: Arc<FieldMap>,
    export_dir: Option<PathBuf>,
}

impl TrialManager {
    pub fn new(field_map: Arc<FieldMap>) -> Self {
        Self {
            field_map,
            export_dir: None,
        }
    }

    /// Export every finished trial into `dir`
    pub fn with_export_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.export_dir = Some(dir.into());
        self
    }

    /// Start a trial: take the next number and create its table
    pub fn begin<S: TrialStore + ?Sized>(&self, store: &mut S) -> Result<Trial> {
        let number = store.next_trial_number()?;
        store.create_table_for_trial(number)?;
        log::info!("Trial {} created", number);

        Ok(Trial {
            number,
            started_at: Local::now(),
        })
    }

    /// Append a batch to the trial's table
    pub fn store<S: TrialStore + ?Sized>(
        &self,
        store: &mut S,
        trial: &Trial,
        batch: &[DecodedFrame],
    ) -> Result<()> {
        store.store_data_for_trial(batch, trial.number)?;
        log::debug!("Trial {}: stored batch of {} frames", trial.number, batch.len());
        Ok(())
    }

    /// Finish a trial, exporting it if an export directory is set
    ///
    /// Export failures are logged; they never fail the trial.
    pub fn finalize<S: TrialStore + ?Sized>(&self, store: &S, trial: &Trial) -> Option<PathBuf> {
        let elapsed = Local::now().signed_duration_since(trial.started_at);
        log::info!(
            "Trial {} finished after {}s",
            trial.number,
            elapsed.num_seconds()
        );

        let dir = self.export_dir.as_ref()?;
        match export_trial_to_dir(store, &self.field_map, trial.number, dir) {
            Ok(path) => Some(path),
            Err(e) => {
                log::error!("Error exporting trial {} to CSV: {}", trial.number, e);
                None
            }
        }
    }
}
