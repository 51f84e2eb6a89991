//! Linux SocketCAN driver
//!
//! Channel `n` maps to interface `can<n>` unless an interface name is
//! given. Bitrate and output mode belong to the kernel interface
//! configuration (`ip link set canX type can bitrate ...`), so the
//! corresponding calls only log what is expected of the interface.

use super::{BusChannel, CanDriver, OutputMode};
use crate::types::{AcquisitionError, RawFrame, Result};
use ::socketcan::{CanSocket, EmbeddedFrame, Frame, Id, Socket};
use chrono::Utc;
use std::io::ErrorKind;
use std::time::Duration;

/// Opens SocketCAN interfaces
#[derive(Debug, Clone, Default)]
pub struct SocketCanDriver {
    interface: Option<String>,
}

impl SocketCanDriver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Use a fixed interface name (e.g. "vcan0") regardless of channel number
    pub fn with_interface(interface: impl Into<String>) -> Self {
        Self {
            interface: Some(interface.into()),
        }
    }
}

impl CanDriver for SocketCanDriver {
    type Channel = SocketCanChannel;

    fn open_channel(&mut self, channel: u32) -> Result<SocketCanChannel> {
        let interface = self
            .interface
            .clone()
            .unwrap_or_else(|| format!("can{}", channel));

        log::info!("Opening SocketCAN interface {}", interface);
        let socket = CanSocket::open(&interface).map_err(|e| {
            AcquisitionError::Transport(format!("failed to open {}: {}", interface, e))
        })?;

        Ok(SocketCanChannel {
            interface,
            socket,
            read_timeout: None,
        })
    }
}

/// An open SocketCAN interface
pub struct SocketCanChannel {
    interface: String,
    socket: CanSocket,
    read_timeout: Option<Duration>,
}

impl BusChannel for SocketCanChannel {
    fn set_bus_output_control(&mut self, mode: OutputMode) -> Result<()> {
        log::debug!("{}: output mode {:?} is set by the interface", self.interface, mode);
        Ok(())
    }

    fn set_bus_params(&mut self, bitrate: u32) -> Result<()> {
        log::debug!("{}: expecting interface bitrate {} bit/s", self.interface, bitrate);
        Ok(())
    }

    fn bus_on(&mut self) -> Result<()> {
        Ok(())
    }

    fn bus_off(&mut self) -> Result<()> {
        Ok(())
    }

    fn read(&mut self, timeout: Duration) -> Result<Option<RawFrame>> {
        if self.read_timeout != Some(timeout) {
            self.socket.set_read_timeout(timeout).map_err(|e| {
                AcquisitionError::Transport(format!("{}: {}", self.interface, e))
            })?;
            self.read_timeout = Some(timeout);
        }

        let frame = match self.socket.read_frame() {
            Ok(frame) => frame,
            Err(e) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => {
                return Ok(None)
            }
            Err(e) => {
                return Err(AcquisitionError::Transport(format!(
                    "{}: read failed: {}",
                    self.interface, e
                )))
            }
        };

        if frame.is_error_frame() {
            log::debug!("{}: error frame ignored", self.interface);
            return Ok(None);
        }

        let message_id = match frame.id() {
            Id::Standard(id) => u32::from(id.as_raw()),
            Id::Extended(id) => id.as_raw(),
        };
        let now = Utc::now();
        let timestamp_seconds =
            now.timestamp() as f64 + f64::from(now.timestamp_subsec_nanos()) * 1e-9;

        Ok(Some(RawFrame {
            message_id,
            payload: frame.data().to_vec(),
            dlc: frame.dlc() as u8,
            flags: 0,
            timestamp_seconds,
        }))
    }
}
