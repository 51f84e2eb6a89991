//! Bus transport collaborators
//!
//! The pipeline depends only on the minimal surface defined here: open a
//! channel, configure it, go bus-on/off and perform a blocking read with a
//! timeout. Drivers implement [`CanDriver`] and [`BusChannel`].

use crate::stop::StopSignal;
use crate::types::{RawFrame, Result};
use serde::{Deserialize, Serialize};
use std::ops::{Deref, DerefMut};
use std::time::Duration;

pub mod replay;
#[cfg(feature = "socketcan")]
pub mod socket_can;

pub use replay::{BusEvent, ReplayDriver, ReplayStep};
#[cfg(feature = "socketcan")]
pub use socket_can::SocketCanDriver;

/// Driver output control mode
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputMode {
    /// Normal mode: the controller acknowledges frames
    #[default]
    Normal,
    /// Listen-only mode
    Silent,
}

/// Factory for bus channels
pub trait CanDriver {
    type Channel: BusChannel;

    /// Open a channel by number
    fn open_channel(&mut self, channel: u32) -> Result<Self::Channel>;
}

/// An open bus channel
pub trait BusChannel {
    fn set_bus_output_control(&mut self, mode: OutputMode) -> Result<()>;

    /// Set the bitrate in bit/s
    fn set_bus_params(&mut self, bitrate: u32) -> Result<()>;

    fn bus_on(&mut self) -> Result<()>;

    fn bus_off(&mut self) -> Result<()>;

    /// Blocking read; `Ok(None)` means no message arrived within `timeout`
    fn read(&mut self, timeout: Duration) -> Result<Option<RawFrame>>;
}

/// Outcome of one read at a pipeline suspension point
#[derive(Debug, Clone, PartialEq)]
pub enum FrameRead {
    Frame(RawFrame),
    NoMessage,
    Cancelled,
}

/// Read one frame, honouring the stop signal around the blocking read
///
/// A frame that arrived is always returned, even if the stop signal was
/// raised while reading; the next call reports `Cancelled`.
pub fn read_frame<C: BusChannel + ?Sized>(
    channel: &mut C,
    timeout: Duration,
    stop: &StopSignal,
) -> Result<FrameRead> {
    if stop.is_raised() {
        return Ok(FrameRead::Cancelled);
    }

    Ok(match channel.read(timeout)? {
        Some(frame) => FrameRead::Frame(frame),
        None if stop.is_raised() => FrameRead::Cancelled,
        None => FrameRead::NoMessage,
    })
}

/// A configured channel that is bus-on for as long as the guard lives
///
/// Dropping the guard takes the channel bus-off, on every exit path.
pub struct OnBus<C: BusChannel> {
    channel: C,
}

impl<C: BusChannel> OnBus<C> {
    /// Configure the channel and go bus-on
    pub fn new(mut channel: C, bitrate: u32, mode: OutputMode) -> Result<Self> {
        channel.set_bus_output_control(mode)?;
        channel.set_bus_params(bitrate)?;
        channel.bus_on()?;
        log::debug!("Bus on at {} bit/s ({:?})", bitrate, mode);
        Ok(Self { channel })
    }
}

impl<C: BusChannel> Deref for OnBus<C> {
    type Target = C;

    fn deref(&self) -> &C {
        &self.channel
    }
}

impl<C: BusChannel> DerefMut for OnBus<C> {
    fn deref_mut(&mut self) -> &mut C {
        &mut self.channel
    }
}

impl<C: BusChannel> Drop for OnBus<C> {
    fn drop(&mut self) {
        match self.channel.bus_off() {
            Ok(()) => log::debug!("Bus off"),
            Err(e) => log::warn!("Failed to take channel bus-off: {}", e),
        }
    }
}
