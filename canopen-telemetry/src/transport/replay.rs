//! Replay driver
//!
//! Plays back a script of frames and silent reads. Channels opened from the
//! same driver share one script, so consecutive trials continue where the
//! previous one stopped. Every bus operation is recorded for inspection.

use super::{BusChannel, CanDriver, OutputMode};
use crate::stop::StopSignal;
use crate::types::{AcquisitionError, RawFrame, Result};
use std::collections::VecDeque;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread;
use std::time::Duration;

/// One scripted read
#[derive(Debug, Clone, PartialEq)]
pub enum ReplayStep {
    Frame(RawFrame),
    /// A read that times out without a message
    Silence,
}

/// Bus operation recorded by the replay driver
#[derive(Debug, Clone, PartialEq)]
pub enum BusEvent {
    Opened(u32),
    OutputControl(OutputMode),
    BusParams(u32),
    BusOn,
    BusOff,
}

#[derive(Debug, Default)]
struct ReplayState {
    script: VecDeque<ReplayStep>,
    events: Vec<BusEvent>,
    failing_opens: u32,
}

/// In-process driver replaying a frame script
#[derive(Debug, Clone, Default)]
pub struct ReplayDriver {
    state: Arc<Mutex<ReplayState>>,
    stop_when_exhausted: Option<StopSignal>,
}

impl ReplayDriver {
    /// Create a driver from a script
    pub fn new(script: Vec<ReplayStep>) -> Self {
        Self {
            state: Arc::new(Mutex::new(ReplayState {
                script: script.into(),
                ..Default::default()
            })),
            stop_when_exhausted: None,
        }
    }

    /// Create a driver replaying frames back to back
    pub fn from_frames(frames: impl IntoIterator<Item = RawFrame>) -> Self {
        Self::new(frames.into_iter().map(ReplayStep::Frame).collect())
    }

    /// Load frames from a JSON-lines file, one [`RawFrame`] per line
    pub fn from_jsonl(path: &Path) -> Result<Self> {
        log::info!("Loading replay file: {:?}", path);

        let file = File::open(path)?;
        let mut frames = Vec::new();
        for (line_no, line) in BufReader::new(file).lines().enumerate() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            let frame: RawFrame = serde_json::from_str(&line).map_err(|e| {
                AcquisitionError::Transport(format!(
                    "{:?} line {}: invalid frame: {}",
                    path,
                    line_no + 1,
                    e
                ))
            })?;
            frames.push(frame);
        }

        log::info!("Replay file loaded: {} frames", frames.len());
        Ok(Self::from_frames(frames))
    }

    /// Raise `stop` once the script has been consumed
    pub fn stop_when_exhausted(mut self, stop: StopSignal) -> Self {
        self.stop_when_exhausted = Some(stop);
        self
    }

    /// Make the next `count` calls to `open_channel` fail
    pub fn fail_next_opens(self, count: u32) -> Self {
        self.lock().failing_opens = count;
        self
    }

    /// Bus operations recorded so far
    pub fn events(&self) -> Vec<BusEvent> {
        self.lock().events.clone()
    }

    /// Number of scripted reads not yet consumed
    pub fn remaining(&self) -> usize {
        self.lock().script.len()
    }

    fn lock(&self) -> MutexGuard<'_, ReplayState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl CanDriver for ReplayDriver {
    type Channel = ReplayChannel;

    fn open_channel(&mut self, channel: u32) -> Result<ReplayChannel> {
        let mut state = self.lock();
        if state.failing_opens > 0 {
            state.failing_opens -= 1;
            return Err(AcquisitionError::Transport(format!(
                "channel {} unavailable",
                channel
            )));
        }
        state.events.push(BusEvent::Opened(channel));
        drop(state);

        Ok(ReplayChannel {
            driver: self.clone(),
        })
    }
}

/// Channel handed out by [`ReplayDriver`]
#[derive(Debug)]
pub struct ReplayChannel {
    driver: ReplayDriver,
}

impl ReplayChannel {
    fn record(&self, event: BusEvent) {
        self.driver.lock().events.push(event);
    }
}

impl BusChannel for ReplayChannel {
    fn set_bus_output_control(&mut self, mode: OutputMode) -> Result<()> {
        self.record(BusEvent::OutputControl(mode));
        Ok(())
    }

    fn set_bus_params(&mut self, bitrate: u32) -> Result<()> {
        self.record(BusEvent::BusParams(bitrate));
        Ok(())
    }

    fn bus_on(&mut self) -> Result<()> {
        self.record(BusEvent::BusOn);
        Ok(())
    }

    fn bus_off(&mut self) -> Result<()> {
        self.record(BusEvent::BusOff);
        Ok(())
    }

    fn read(&mut self, timeout: Duration) -> Result<Option<RawFrame>> {
        let step = self.driver.lock().script.pop_front();
        match step {
            Some(ReplayStep::Frame(frame)) => Ok(Some(frame)),
            Some(ReplayStep::Silence) => Ok(None),
            None => {
                if let Some(stop) = &self.driver.stop_when_exhausted {
                    stop.raise();
                }
                thread::sleep(timeout);
                Ok(None)
            }
        }
    }
}
