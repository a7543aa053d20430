//! Helpers shared by unit tests.

use std::io;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};

use parking_lot::Mutex;

use crate::error::Result;
use crate::frame::DoipFrame;
use crate::payload::VehicleAddrInfoResponse;
use crate::transport::{DatagramSink, FrameSink};
use crate::types::{EntityId, LogicalAddress};

/// Sink that records every frame instead of sending it.
#[derive(Debug, Default)]
pub struct RecordingSink {
    datagrams: Mutex<Vec<(DoipFrame, SocketAddr)>>,
    frames: Mutex<Vec<DoipFrame>>,
    fail: bool,
}

impl RecordingSink {
    /// Sink whose sends all fail.
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Default::default()
        }
    }

    /// Datagrams sent so far.
    pub fn sent(&self) -> Vec<(DoipFrame, SocketAddr)> {
        self.datagrams.lock().clone()
    }

    /// Stream frames written so far.
    pub fn frames(&self) -> Vec<DoipFrame> {
        self.frames.lock().clone()
    }

    fn check(&self) -> Result<()> {
        if self.fail {
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "sink closed").into());
        }
        Ok(())
    }
}

impl DatagramSink for RecordingSink {
    fn send_to(&self, frame: &DoipFrame, target: SocketAddr) -> Result<()> {
        self.check()?;
        self.datagrams.lock().push((frame.clone(), target));
        Ok(())
    }
}

impl FrameSink for RecordingSink {
    fn send_frame(&self, frame: &DoipFrame) -> Result<()> {
        self.check()?;
        self.frames.lock().push(frame.clone());
        Ok(())
    }
}

/// Announcement payload for `vin` (padded or cut to 17 characters).
pub fn announcement(vin: &str, logical_address: u16) -> Vec<u8> {
    let mut padded = format!("{vin:0<17}");
    padded.truncate(17);
    let response = VehicleAddrInfoResponse {
        ip_address: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
        logical_address: LogicalAddress(logical_address),
        vin: padded.parse().unwrap(),
        eid: EntityId([0x00, 0x1A, 0x2B, 0x3C, 0x4D, 0x5E]),
        gid: EntityId([0; 6]),
        further_action: 0,
        sync_status: None,
    };
    response.to_payload().to_vec()
}
