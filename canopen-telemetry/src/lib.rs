//! CANopen Telemetry Library
//!
//! Acquires PDO traffic from a motor controller in discrete trials, decodes
//! frame payloads into named values and persists the raw frames for later
//! export.
//!
//! # Architecture
//!
//! Data flows one way:
//! raw frame → decoded value map → (power detector, batch queue) → store → CSV
//!
//! - [`field_map`]: declarative (message id, byte range) → field table
//! - [`decoder`]: pure payload decoding driven by the field map
//! - [`power`]: debounced power on/off detection on the DC bus voltage
//! - [`pipeline`]: trial state machine, queueing and batch persistence
//! - [`trial`]: trial numbering and storage delegation
//! - [`transport`], [`store`], [`export`]: bus, persistence and CSV collaborators
//!
//! The library does NOT:
//! - Initialise logging or install signal handlers
//! - Parse command lines or configuration files
//! - Interpret SDOs or validate CRCs
//!
//! Those belong to the application layer (canopen-telemetry-cli).
//!
//! # Example Usage
//!
//! ```no_run
//! use canopen_telemetry::{
//!     AcquisitionConfig, AcquisitionPipeline, FieldMap, JsonlStore, ReplayDriver, StopSignal,
//! };
//! use std::path::Path;
//! use std::sync::Arc;
//!
//! let stop = StopSignal::new();
//! let mut driver = ReplayDriver::from_jsonl(Path::new("capture.jsonl"))
//!     .unwrap()
//!     .stop_when_exhausted(stop.clone());
//! let mut store = JsonlStore::open("trials").unwrap();
//!
//! let mut pipeline = AcquisitionPipeline::new(
//!     AcquisitionConfig::new(),
//!     Arc::new(FieldMap::motor_controller()),
//!     stop,
//! );
//! let summary = pipeline.run(&mut driver, &mut store);
//! println!("{} trials stored", summary.trials_completed);
//! ```

// Public modules
pub mod config;
pub mod decoder;
pub mod export;
pub mod field_map;
pub mod pipeline;
pub mod power;
pub mod stop;
pub mod store;
pub mod transport;
pub mod trial;
pub mod types;

// Re-export main types for convenience
pub use config::{AcquisitionConfig, PowerConfig};
pub use decoder::{decode, FrameDecoder};
pub use export::{export_trial, export_trial_to_dir};
pub use field_map::{
    ByteRange, Encoding, FieldMap, FieldMapConfig, FieldSpec, LabelConfig, UNKNOWN_PDO_LABEL,
};
pub use pipeline::{AcquisitionPipeline, RunSummary, TrialOutcome, TrialPhase, TrialReport};
pub use power::{
    await_power_off, await_power_on, Debounce, PowerOffWatch, PowerState, Reading, VoltageSource,
};
pub use stop::StopSignal;
pub use store::{JsonlStore, MemoryStore, StoredFrame, TrialStore};
pub use transport::{BusChannel, CanDriver, FrameRead, OutputMode, ReplayDriver, ReplayStep};
pub use trial::{Trial, TrialManager};
pub use types::{
    AcquisitionError, DecodedFrame, DecodedValue, DecodedValues, FieldValue, RawFrame, Result,
};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
