//! Acquisition configuration types
//!
//! Defaults reproduce the motor controller setup: channel 0 at 100 kbit/s,
//! power detected from the DC bus voltage of PDO1, batches of 50 frames and
//! a 5 second backoff after a failed trial.

use crate::transport::OutputMode;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Configuration of the acquisition pipeline
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AcquisitionConfig {
    /// Bus channel to open
    #[serde(default)]
    pub channel: u32,

    /// Bus bitrate in bit/s
    #[serde(default = "default_bitrate")]
    pub bitrate: u32,

    /// Driver output mode
    #[serde(default)]
    pub output_mode: OutputMode,

    /// Timeout of a single blocking read, in milliseconds
    #[serde(default = "default_read_timeout")]
    pub read_timeout_ms: u64,

    /// Number of frames handed to the store at once
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Pause before starting a fresh trial after a failure, in milliseconds
    #[serde(default = "default_retry_backoff")]
    pub retry_backoff_ms: u64,

    #[serde(default)]
    pub power: PowerConfig,
}

fn default_bitrate() -> u32 {
    100_000
}

fn default_read_timeout() -> u64 {
    500
}

fn default_batch_size() -> usize {
    50
}

fn default_retry_backoff() -> u64 {
    5000
}

impl Default for AcquisitionConfig {
    fn default() -> Self {
        Self {
            channel: 0,
            bitrate: default_bitrate(),
            output_mode: OutputMode::default(),
            read_timeout_ms: default_read_timeout(),
            batch_size: default_batch_size(),
            retry_backoff_ms: default_retry_backoff(),
            power: PowerConfig::default(),
        }
    }
}

impl AcquisitionConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder method: set the bus channel
    pub fn with_channel(mut self, channel: u32) -> Self {
        self.channel = channel;
        self
    }

    /// Builder method: set the read timeout
    pub fn with_read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout_ms = timeout.as_millis() as u64;
        self
    }

    /// Builder method: set the batch size
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    /// Builder method: set the retry backoff
    pub fn with_retry_backoff(mut self, backoff: Duration) -> Self {
        self.retry_backoff_ms = backoff.as_millis() as u64;
        self
    }

    /// Builder method: replace the power detection settings
    pub fn with_power(mut self, power: PowerConfig) -> Self {
        self.power = power;
        self
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }

    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }

    /// Batch size, never zero
    pub fn effective_batch_size(&self) -> usize {
        self.batch_size.max(1)
    }
}

/// Power on/off detection settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PowerConfig {
    /// COB-ID of the message carrying the voltage field
    #[serde(default = "default_power_message")]
    pub message_id: u32,

    /// Name of the voltage field in the field map
    #[serde(default = "default_voltage_field")]
    pub voltage_field: String,

    /// Voltage must exceed this to count towards power on
    #[serde(default = "default_on_threshold")]
    pub on_threshold: i64,

    /// Voltage must fall below this to count towards power off
    #[serde(default = "default_off_threshold")]
    pub off_threshold: i64,

    /// Consecutive qualifying readings required for a transition
    #[serde(default = "default_required_consecutive")]
    pub required_consecutive: u32,

    /// Pause between power polls, in milliseconds
    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,
}

fn default_power_message() -> u32 {
    390
}

fn default_voltage_field() -> String {
    "DC Bus Voltage".to_string()
}

fn default_on_threshold() -> i64 {
    100
}

fn default_off_threshold() -> i64 {
    50
}

fn default_required_consecutive() -> u32 {
    3
}

fn default_poll_interval() -> u64 {
    1000
}

impl Default for PowerConfig {
    fn default() -> Self {
        Self {
            message_id: default_power_message(),
            voltage_field: default_voltage_field(),
            on_threshold: default_on_threshold(),
            off_threshold: default_off_threshold(),
            required_consecutive: default_required_consecutive(),
            poll_interval_ms: default_poll_interval(),
        }
    }
}

impl PowerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder method: set both thresholds
    pub fn with_thresholds(mut self, on: i64, off: i64) -> Self {
        self.on_threshold = on;
        self.off_threshold = off;
        self
    }

    /// Builder method: set the debounce count
    pub fn with_required_consecutive(mut self, count: u32) -> Self {
        self.required_consecutive = count;
        self
    }

    /// Builder method: set the poll interval
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval_ms = interval.as_millis() as u64;
        self
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = AcquisitionConfig::new();
        assert_eq!(config.channel, 0);
        assert_eq!(config.bitrate, 100_000);
        assert_eq!(config.batch_size, 50);
        assert_eq!(config.retry_backoff(), Duration::from_secs(5));
        assert_eq!(config.power.message_id, 390);
        assert_eq!(config.power.voltage_field, "DC Bus Voltage");
        assert_eq!(config.power.on_threshold, 100);
        assert_eq!(config.power.off_threshold, 50);
        assert_eq!(config.power.required_consecutive, 3);
        assert_eq!(config.power.poll_interval(), Duration::from_secs(1));
    }

    #[test]
    fn test_builder() {
        let config = AcquisitionConfig::new()
            .with_channel(1)
            .with_batch_size(0)
            .with_read_timeout(Duration::from_millis(10))
            .with_power(PowerConfig::new().with_thresholds(200, 20));

        assert_eq!(config.channel, 1);
        assert_eq!(config.effective_batch_size(), 1);
        assert_eq!(config.read_timeout_ms, 10);
        assert_eq!(config.power.on_threshold, 200);
        assert_eq!(config.power.off_threshold, 20);
    }

    #[test]
    fn test_partial_deserialization_uses_defaults() {
        let config: AcquisitionConfig =
            serde_json::from_str(r#"{ "batch_size": 10, "power": { "on_threshold": 120 } }"#).unwrap();
        assert_eq!(config.batch_size, 10);
        assert_eq!(config.bitrate, 100_000);
        assert_eq!(config.power.on_threshold, 120);
        assert_eq!(config.power.off_threshold, 50);
    }
}
