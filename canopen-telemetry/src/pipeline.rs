//! Acquisition pipeline
//!
//! Runs trials back to back. Each trial goes through
//! `AwaitingPower → Collecting → Draining → Done`:
//!
//! 1. the channel is opened and taken bus-on, then the pipeline waits for
//!    the DC bus voltage to rise;
//! 2. frames are read, decoded, labelled and queued until power goes off
//!    or the stop signal is raised;
//! 3. the queue is drained into fixed-size batches which are handed to the
//!    store in arrival order, including the final partial batch;
//! 4. the trial is finalized and the next one begins.
//!
//! The outer loop never gives up on errors: a failed cycle is logged,
//! followed by a backoff and a fresh trial. Only the stop signal ends it.

use crate::config::AcquisitionConfig;
use crate::decoder::FrameDecoder;
use crate::field_map::FieldMap;
use crate::power::{
    await_power_on, voltage_field, voltage_of, ChannelVoltage, PowerMonitor, PowerOffWatch, PowerState,
};
use crate::stop::StopSignal;
use crate::store::TrialStore;
use crate::transport::{read_frame, BusChannel, CanDriver, FrameRead, OnBus};
use crate::trial::{Trial, TrialManager};
use crate::types::{AcquisitionError, DecodedFrame, Result};
use crossbeam_channel::{unbounded, Receiver, Sender};
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

/// Phase of the running trial
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrialPhase {
    AwaitingPower,
    Collecting,
    Draining,
    Done,
}

impl fmt::Display for TrialPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TrialPhase::AwaitingPower => write!(f, "AwaitingPower"),
            TrialPhase::Collecting => write!(f, "Collecting"),
            TrialPhase::Draining => write!(f, "Draining"),
            TrialPhase::Done => write!(f, "Done"),
        }
    }
}

/// How a trial ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrialOutcome {
    /// Stopped before power was detected; nothing was collected
    NoPower,
    /// Power off was detected
    PowerOff,
    /// Stopped while collecting
    Cancelled,
}

/// Summary of one trial
#[derive(Debug, Clone, PartialEq)]
pub struct TrialReport {
    pub trial: u32,
    pub outcome: TrialOutcome,
    /// Frames handed to the store
    pub frames_stored: usize,
    /// Number of store calls
    pub batches_flushed: usize,
    /// CSV written by the trial's finalization, if any
    pub export: Option<PathBuf>,
}

/// Totals of a pipeline run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub trials_completed: usize,
    pub failed_cycles: usize,
    pub frames_stored: usize,
}

/// Reads, decodes, queues and persists frames, trial after trial
pub struct AcquisitionPipeline {
    config: AcquisitionConfig,
    decoder: FrameDecoder,
    lifecycle: TrialManager,
    monitor: PowerMonitor,
    stop: StopSignal,
    phase: TrialPhase,
    tx: Sender<DecodedFrame>,
    rx: Receiver<DecodedFrame>,
}

impl AcquisitionPipeline {
    pub fn new(config: AcquisitionConfig, field_map: Arc<FieldMap>, stop: StopSignal) -> Self {
        let (tx, rx) = unbounded();

        Self {
            config,
            decoder: FrameDecoder::new(field_map.clone()),
            lifecycle: TrialManager::new(field_map),
            monitor: PowerMonitor::new(),
            stop,
            phase: TrialPhase::Done,
            tx,
            rx,
        }
    }

    /// Export every finished trial to CSV in `dir`
    pub fn with_export_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.lifecycle = self.lifecycle.with_export_dir(dir);
        self
    }

    pub fn phase(&self) -> TrialPhase {
        self.phase
    }

    pub fn power_state(&self) -> PowerState {
        self.monitor.state()
    }

    /// Number of decoded frames waiting to be drained
    pub fn queued(&self) -> usize {
        self.rx.len()
    }

    /// Run trials until the stop signal is raised
    pub fn run<D, S>(&mut self, driver: &mut D, store: &mut S) -> RunSummary
    where
        D: CanDriver + ?Sized,
        S: TrialStore + ?Sized,
    {
        let mut summary = RunSummary::default();
        log::info!("Acquisition started on channel {}", self.config.channel);

        while !self.stop.is_raised() {
            match self.run_cycle(&mut *driver, &mut *store) {
                Ok(report) => {
                    summary.trials_completed += 1;
                    summary.frames_stored += report.frames_stored;
                }
                Err(e) => {
                    summary.failed_cycles += 1;
                    self.phase = TrialPhase::Done;
                    log::error!("Error in acquisition cycle: {}", e);
                    log::info!("Retrying in {:?}", self.config.retry_backoff());
                    if self.stop.wait_timeout(self.config.retry_backoff()) {
                        break;
                    }
                }
            }
        }

        log::info!(
            "Acquisition stopped: {} trials, {} frames stored, {} failed cycles",
            summary.trials_completed,
            summary.frames_stored,
            summary.failed_cycles
        );
        summary
    }

    /// One full cycle: begin a trial, run it, finalize it
    pub fn run_cycle<D, S>(&mut self, driver: &mut D, store: &mut S) -> Result<TrialReport>
    where
        D: CanDriver + ?Sized,
        S: TrialStore + ?Sized,
    {
        let trial = self.lifecycle.begin(&mut *store)?;
        let mut report = self.run_trial(&mut *driver, &mut *store, &trial)?;

        if report.outcome != TrialOutcome::NoPower {
            report.export = self.lifecycle.finalize(&*store, &trial);
        }

        Ok(report)
    }

    /// Run the phases of one trial whose table already exists
    pub fn run_trial<D, S>(&mut self, driver: &mut D, store: &mut S, trial: &Trial) -> Result<TrialReport>
    where
        D: CanDriver + ?Sized,
        S: TrialStore + ?Sized,
    {
        self.monitor.begin_trial();
        self.discard_stale_frames();

        let field = voltage_field(self.decoder.field_map(), &self.config.power)?.clone();
        let channel = driver.open_channel(self.config.channel)?;
        let mut bus = OnBus::new(channel, self.config.bitrate, self.config.output_mode)?;

        self.enter(TrialPhase::AwaitingPower);
        log::info!("Waiting for motor power...");
        let powered = {
            let mut source = ChannelVoltage::new(&mut *bus, &field, self.config.read_timeout());
            await_power_on(&mut source, &self.config.power, &self.stop)?
        };

        if !powered {
            log::info!("No motor power detected");
            self.enter(TrialPhase::Done);
            return Ok(TrialReport {
                trial: trial.number,
                outcome: TrialOutcome::NoPower,
                frames_stored: 0,
                batches_flushed: 0,
                export: None,
            });
        }

        self.monitor.power_detected();
        self.enter(TrialPhase::Collecting);
        log::info!("Starting data collection for trial {}", trial.number);
        let collected = self.collect(&mut *bus);
        drop(bus);

        // Whatever was queued is flushed, even if collection failed
        self.enter(TrialPhase::Draining);
        let drained = self.drain(&mut *store, trial);
        self.enter(TrialPhase::Done);

        let outcome = collected?;
        let (frames_stored, batches_flushed) = drained?;

        log::info!(
            "Trial {} complete: {} frames in {} batches ({:?})",
            trial.number,
            frames_stored,
            batches_flushed,
            outcome
        );

        Ok(TrialReport {
            trial: trial.number,
            outcome,
            frames_stored,
            batches_flushed,
            export: None,
        })
    }

    /// Queue a decoded frame for the next drain
    pub fn enqueue(&self, frame: DecodedFrame) -> Result<()> {
        self.tx
            .send(frame)
            .map_err(|_| AcquisitionError::Storage("frame queue closed".to_string()))
    }

    /// Drain the queue into batches and hand each to the store
    ///
    /// Returns `(frames, batches)` written. A batch is flushed as soon as it
    /// is full; the remaining partial batch is flushed at the end.
    pub fn drain<S: TrialStore + ?Sized>(&mut self, store: &mut S, trial: &Trial) -> Result<(usize, usize)> {
        let batch_size = self.config.effective_batch_size();
        let mut batch = Vec::with_capacity(batch_size);
        let mut frames = 0;
        let mut batches = 0;

        while let Ok(frame) = self.rx.try_recv() {
            batch.push(frame);
            if batch.len() >= batch_size {
                self.lifecycle.store(&mut *store, trial, &batch)?;
                frames += batch.len();
                batches += 1;
                batch.clear();
            }
        }

        if !batch.is_empty() {
            self.lifecycle.store(&mut *store, trial, &batch)?;
            frames += batch.len();
            batches += 1;
        }

        Ok((frames, batches))
    }

    fn collect<C: BusChannel + ?Sized>(&mut self, channel: &mut C) -> Result<TrialOutcome> {
        let mut power_off = PowerOffWatch::new(&self.config.power);
        let timeout = self.config.read_timeout();

        loop {
            let raw = match read_frame(&mut *channel, timeout, &self.stop)? {
                FrameRead::Frame(raw) => raw,
                FrameRead::NoMessage => continue,
                FrameRead::Cancelled => {
                    log::info!("Data collection interrupted");
                    return Ok(TrialOutcome::Cancelled);
                }
            };

            let frame = self.decoder.decode_frame(raw);
            let timestamp = frame.timestamp_seconds;
            let voltage = voltage_of(&frame, &self.config.power);
            self.enqueue(frame)?;

            if let Some(voltage) = voltage {
                log::trace!("Current voltage: {}", voltage);
                if power_off.observe(timestamp, voltage) {
                    log::info!("Motor power off detected, ending trial");
                    return Ok(TrialOutcome::PowerOff);
                }
            }
        }
    }

    fn discard_stale_frames(&mut self) {
        let stale = self.rx.try_iter().count();
        if stale > 0 {
            log::warn!("Discarding {} frames left over from a failed trial", stale);
        }
    }

    fn enter(&mut self, phase: TrialPhase) {
        log::debug!("Trial phase: {} -> {}", self.phase, phase);
        self.phase = phase;
    }
}
