//! Link adapter surface.
//!
//! The radio stack itself lives outside this crate. What the core defines
//! is the endpoint layout (one service, five characteristics), the
//! advertised device name, the command mailbox feeding the protocol engine,
//! and the two traits the platform implements: [`LinkTransport`] for frame
//! delivery and [`SystemControl`] for the system-level side effects
//! commands can trigger.

use core::fmt::Write as _;

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::channel::Channel;
use heapless::{String, Vec};
use log::{debug, warn};
use thiserror_no_std::Error;

use crate::config::LinkCredentials;
use crate::protocol::frame::{COMMAND_HEADER_LEN, RESPONSE_DATA_CAPACITY};
use crate::sensors::HardwareRevision;

/// Primary service UUID advertised by the device. Part of the
/// compatibility surface; must stay bit-exact.
pub const SERVICE_UUID: u128 = 0x9f1c0001_8f3b_4e6c_a8d2_4c2f6b3a9d10;

/// Latest-sample characteristic (read + notify).
pub const LATEST_SAMPLE_UUID: u128 = 0x9f1c0002_8f3b_4e6c_a8d2_4c2f6b3a9d10;
/// Store-status characteristic (read + write).
pub const STORE_STATUS_UUID: u128 = 0x9f1c0003_8f3b_4e6c_a8d2_4c2f6b3a9d10;
/// Command characteristic (write, write-without-response).
pub const COMMAND_UUID: u128 = 0x9f1c0004_8f3b_4e6c_a8d2_4c2f6b3a9d10;
/// Response characteristic (read + notify).
pub const RESPONSE_UUID: u128 = 0x9f1c0005_8f3b_4e6c_a8d2_4c2f6b3a9d10;
/// Bulk-transfer characteristic (read + write + notify, reserved).
pub const BULK_TRANSFER_UUID: u128 = 0x9f1c0006_8f3b_4e6c_a8d2_4c2f6b3a9d10;

/// The five logical endpoints exposed within the primary service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Endpoint {
    LatestSample,
    StoreStatus,
    Command,
    Response,
    BulkTransfer,
}

impl Endpoint {
    pub const ALL: [Endpoint; 5] = [
        Endpoint::LatestSample,
        Endpoint::StoreStatus,
        Endpoint::Command,
        Endpoint::Response,
        Endpoint::BulkTransfer,
    ];

    pub const fn uuid(self) -> u128 {
        match self {
            Self::LatestSample => LATEST_SAMPLE_UUID,
            Self::StoreStatus => STORE_STATUS_UUID,
            Self::Command => COMMAND_UUID,
            Self::Response => RESPONSE_UUID,
            Self::BulkTransfer => BULK_TRANSFER_UUID,
        }
    }

    pub const fn readable(self) -> bool {
        !matches!(self, Self::Command)
    }

    pub const fn writable(self) -> bool {
        matches!(self, Self::StoreStatus | Self::Command | Self::BulkTransfer)
    }

    pub const fn notifies(self) -> bool {
        matches!(self, Self::LatestSample | Self::Response | Self::BulkTransfer)
    }
}

/// Advertised device name: `PlantMonitor_<rev>_<last 4 MAC hex digits>`.
pub fn device_name(revision: HardwareRevision, mac: &[u8; 6]) -> String<32> {
    let mut name = String::new();
    let _ = write!(
        name,
        "PlantMonitor_{:02}_{:02X}{:02X}",
        revision.code(),
        mac[4],
        mac[5]
    );
    name
}

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkError {
    #[error("link not ready")]
    NotReady,
    #[error("transport failure")]
    Transport,
}

/// Frame delivery towards the connected client.
///
/// Delivery is fire-and-forget: the engine never blocks on the link. The
/// transport decides between notification (when the client subscribed to
/// the channel) and staging the frame for a plain read.
pub trait LinkTransport {
    fn deliver_response(&mut self, frame: &[u8]) -> Result<(), LinkError>;

    /// Push a latest-sample notification after a sampling tick.
    fn notify_sample(&mut self, payload: &[u8]) -> Result<(), LinkError>;
}

/// System-level side effects and status reachable from command handlers.
pub trait SystemControl {
    fn uptime_secs(&self) -> u32;
    fn heap_free_bytes(&self) -> u32;
    fn heap_min_free_bytes(&self) -> u32;
    fn task_count(&self) -> u32;

    /// State of the external switch input.
    fn switch_state(&self) -> bool;

    fn link_connected(&self) -> bool;
    /// SSID of the currently connected network, if any.
    fn connected_ssid(&self) -> Option<String<32>>;
    /// True when a client subscribed to response notifications.
    fn notifications_subscribed(&self) -> bool;

    /// The live (not necessarily persisted) link credentials.
    fn credentials(&self) -> Option<LinkCredentials>;
    /// Apply credentials to the live link config without persisting.
    fn apply_link_config(&mut self, creds: &LinkCredentials);

    fn request_link_connect(&mut self);
    fn request_link_disconnect(&mut self);
    /// Kick off an external time sync; bounded wait happens elsewhere.
    fn request_time_sync(&mut self);
    /// Schedule a device reset after a short hold-off.
    fn request_reset(&mut self);
}

/// Largest command frame the mailbox accepts.
pub const COMMAND_BUF_CAPACITY: usize = COMMAND_HEADER_LEN + RESPONSE_DATA_CAPACITY;

/// One buffered command frame as written to the command endpoint.
pub type CommandBuf = Vec<u8, COMMAND_BUF_CAPACITY>;

/// Mailbox between the link callback and the link-host task.
///
/// Capacity one enforces the at-most-one-in-flight contract: a command
/// arriving while another is queued or being dispatched is dropped
/// silently, and retry is the client's responsibility.
pub type CommandMailbox = Channel<CriticalSectionRawMutex, CommandBuf, 1>;

/// Entry point for command-endpoint writes.
///
/// Returns whether the frame was accepted; a dropped frame gets no
/// response of any kind.
pub fn submit_command(mailbox: &CommandMailbox, bytes: &[u8]) -> bool {
    let mut buf = CommandBuf::new();
    if buf.extend_from_slice(bytes).is_err() {
        warn!("command of {} bytes exceeds mailbox buffer, dropped", bytes.len());
        return false;
    }
    match mailbox.try_send(buf) {
        Ok(()) => true,
        Err(_) => {
            debug!("command arrived while busy, dropped");
            false
        }
    }
}
