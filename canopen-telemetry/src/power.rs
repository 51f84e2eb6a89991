//! Power on/off detection
//!
//! Motor power is inferred from the decoded DC bus voltage. A transition is
//! only accepted after a number of consecutive qualifying readings, so that
//! a single noisy sample near the threshold cannot flip the trial state.
//!
//! The voltage field is located through the field map; there is no second
//! hardcoded byte offset for it.

use crate::config::PowerConfig;
use crate::decoder::extract_field;
use crate::field_map::{FieldMap, FieldSpec};
use crate::stop::StopSignal;
use crate::transport::{read_frame, BusChannel, FrameRead};
use crate::types::{AcquisitionError, DecodedFrame, FieldValue, Result};
use std::time::Duration;

/// Power state of the motor as seen by the current trial
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PowerState {
    AwaitingPower,
    Active,
}

/// Direction a reading must cross the threshold to qualify
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Crossing {
    /// Strictly greater than the threshold
    Above,
    /// Strictly less than the threshold
    Below,
}

/// Consecutive-count debounce filter
#[derive(Debug, Clone)]
pub struct Debounce {
    threshold: i64,
    crossing: Crossing,
    required: u32,
    count: u32,
}

impl Debounce {
    pub fn new(threshold: i64, crossing: Crossing, required: u32) -> Self {
        Self {
            threshold,
            crossing,
            required: required.max(1),
            count: 0,
        }
    }

    /// Filter accepting power on
    pub fn power_on(config: &PowerConfig) -> Self {
        Self::new(config.on_threshold, Crossing::Above, config.required_consecutive)
    }

    /// Filter accepting power off
    pub fn power_off(config: &PowerConfig) -> Self {
        Self::new(config.off_threshold, Crossing::Below, config.required_consecutive)
    }

    /// Feed one reading; returns `true` once enough consecutive readings qualified
    pub fn observe(&mut self, voltage: i64) -> bool {
        let qualifies = match self.crossing {
            Crossing::Above => voltage > self.threshold,
            Crossing::Below => voltage < self.threshold,
        };

        if qualifies {
            self.count += 1;
        } else {
            self.count = 0;
        }

        self.count >= self.required
    }

    /// Current number of consecutive qualifying readings
    pub fn count(&self) -> u32 {
        self.count
    }

}

/// Power-off detection on the frames seen while collecting
///
/// At most one reading per poll interval counts towards the debounce,
/// judged by frame timestamps. A burst of low readings a few milliseconds
/// apart therefore counts once.
#[derive(Debug, Clone)]
pub struct PowerOffWatch {
    debounce: Debounce,
    interval_seconds: f64,
    last_sample: Option<f64>,
}

impl PowerOffWatch {
    pub fn new(config: &PowerConfig) -> Self {
        Self {
            debounce: Debounce::power_off(config),
            interval_seconds: config.poll_interval().as_secs_f64(),
            last_sample: None,
        }
    }

    /// Feed the voltage of a frame; returns `true` once power-off is confirmed
    pub fn observe(&mut self, timestamp_seconds: f64, voltage: i64) -> bool {
        if let Some(last) = self.last_sample {
            let elapsed = timestamp_seconds - last;
            // Timestamps going backwards start a new sample
            if elapsed >= 0.0 && elapsed < self.interval_seconds {
                return false;
            }
        }

        self.last_sample = Some(timestamp_seconds);
        self.debounce.observe(voltage)
    }

    /// Readings counted so far
    pub fn count(&self) -> u32 {
        self.debounce.count()
    }
}

/// Result of polling a voltage source once
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reading {
    Voltage(i64),
    /// Nothing new this poll; the debounce count is left unchanged
    NoReading,
    Cancelled,
}

/// Something that yields bus voltage readings
pub trait VoltageSource {
    fn next_reading(&mut self, stop: &StopSignal) -> Result<Reading>;
}

/// Wait until power is on
///
/// Returns `Ok(false)` if the stop signal is raised before power is seen.
pub fn await_power_on<S: VoltageSource + ?Sized>(
    source: &mut S,
    config: &PowerConfig,
    stop: &StopSignal,
) -> Result<bool> {
    let detected = await_transition(source, Debounce::power_on(config), config.poll_interval(), stop)?;
    if detected {
        log::info!("Motor power detected");
    }
    Ok(detected)
}

/// Wait until power is off
///
/// Returns `Ok(false)` if the stop signal is raised before power-off is seen.
pub fn await_power_off<S: VoltageSource + ?Sized>(
    source: &mut S,
    config: &PowerConfig,
    stop: &StopSignal,
) -> Result<bool> {
    let detected = await_transition(source, Debounce::power_off(config), config.poll_interval(), stop)?;
    if detected {
        log::info!("Motor power off detected");
    }
    Ok(detected)
}

fn await_transition<S: VoltageSource + ?Sized>(
    source: &mut S,
    mut debounce: Debounce,
    poll_interval: Duration,
    stop: &StopSignal,
) -> Result<bool> {
    loop {
        if stop.is_raised() {
            return Ok(false);
        }

        match source.next_reading(stop)? {
            Reading::Voltage(voltage) => {
                log::info!("Current voltage: {}", voltage);
                if debounce.observe(voltage) {
                    return Ok(true);
                }
            }
            Reading::NoReading => {}
            Reading::Cancelled => return Ok(false),
        }

        if stop.wait_timeout(poll_interval) {
            return Ok(false);
        }
    }
}

/// Tracks the power state of the running trial
#[derive(Debug, Clone)]
pub struct PowerMonitor {
    state: PowerState,
}

impl PowerMonitor {
    pub fn new() -> Self {
        Self {
            state: PowerState::AwaitingPower,
        }
    }

    pub fn state(&self) -> PowerState {
        self.state
    }

    /// Reset to `AwaitingPower` at the start of a trial
    pub fn begin_trial(&mut self) {
        self.state = PowerState::AwaitingPower;
    }

    pub fn power_detected(&mut self) {
        self.state = PowerState::Active;
    }
}

impl Default for PowerMonitor {
    fn default() -> Self {
        Self::new()
    }
}

/// Look up the voltage field the power config refers to
pub fn voltage_field<'a>(field_map: &'a FieldMap, config: &PowerConfig) -> Result<&'a FieldSpec> {
    field_map
        .field(config.message_id, &config.voltage_field)
        .ok_or_else(|| {
            AcquisitionError::Config(format!(
                "voltage field '{}' is not defined for message {}",
                config.voltage_field, config.message_id
            ))
        })
}

/// Voltage carried by a decoded frame, if it is the power message and the field decoded
pub fn voltage_of(frame: &DecodedFrame, config: &PowerConfig) -> Option<i64> {
    if frame.message_id != config.message_id {
        return None;
    }
    frame.value(&config.voltage_field)
}

/// Voltage source reading frames straight from a bus channel
///
/// Each poll performs one read. Frames of other messages and read timeouts
/// count as "no reading".
pub struct ChannelVoltage<'a, C: BusChannel + ?Sized> {
    channel: &'a mut C,
    field: &'a FieldSpec,
    read_timeout: Duration,
}

impl<'a, C: BusChannel + ?Sized> ChannelVoltage<'a, C> {
    pub fn new(channel: &'a mut C, field: &'a FieldSpec, read_timeout: Duration) -> Self {
        Self {
            channel,
            field,
            read_timeout,
        }
    }
}

impl<C: BusChannel + ?Sized> VoltageSource for ChannelVoltage<'_, C> {
    fn next_reading(&mut self, stop: &StopSignal) -> Result<Reading> {
        let frame = match read_frame(&mut *self.channel, self.read_timeout, stop)? {
            FrameRead::Frame(frame) => frame,
            FrameRead::NoMessage => return Ok(Reading::NoReading),
            FrameRead::Cancelled => return Ok(Reading::Cancelled),
        };

        if frame.message_id != self.field.message_id {
            return Ok(Reading::NoReading);
        }

        Ok(match extract_field(&frame.payload, self.field) {
            Some(FieldValue::Integer(voltage)) => Reading::Voltage(voltage),
            _ => Reading::NoReading,
        })
    }
}
