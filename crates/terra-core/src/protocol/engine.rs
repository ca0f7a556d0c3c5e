//! Command dispatch for the link protocol.
//!
//! One engine instance lives on the link-host task. Dispatch is strictly
//! synchronous: handlers never suspend, so a command is always answered
//! before the next one is taken from the mailbox. The busy flag plus the
//! capacity-one mailbox give the at-most-one-in-flight contract; a frame
//! arriving while one is in flight is dropped without a response.

extern crate alloc;
use alloc::vec::Vec;

use core::str::FromStr;

use heapless::String;
use log::{debug, info, warn};

use super::frame::{CommandFrame, ResponseBuilder, StatusCode};
use crate::app_state::Shared;
use crate::clock::{Clock, WireTime, WIRE_TIME_SIZE};
use crate::config::{
    ConfigStore, KvStore, LinkCredentials, PlantProfile, TimezoneString, CREDENTIALS_BLOB_SIZE,
    PASSWORD_LEN, PROFILE_BLOB_SIZE, SSID_LEN, TIMEZONE_LEN,
};
use crate::link::SystemControl;
use crate::sensors::HardwareRevision;
use crate::storage::RingStore;

/// Firmware version reported by `GetDeviceInfo`.
pub const FIRMWARE_VERSION: &str = "2.1.0";

/// Size of the `GetSystemStatus` payload.
pub const SYSTEM_STATUS_SIZE: usize = 24;
/// Size of the `GetDeviceInfo` payload.
pub const DEVICE_INFO_SIZE: usize = 72;
/// Size of the `GetTimeData` response payload (calendar + four readings).
pub const TIME_DATA_RESPONSE_SIZE: usize = WIRE_TIME_SIZE + 16;

/// The exhaustive command table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum CommandId {
    GetSensorData = 0x01,
    GetSystemStatus = 0x02,
    SetPlantProfile = 0x03,
    SystemReset = 0x05,
    GetDeviceInfo = 0x06,
    GetTimeData = 0x0a,
    GetSwitchStatus = 0x0b,
    GetPlantProfile = 0x0c,
    SetLinkConfig = 0x0d,
    GetLinkConfig = 0x0e,
    LinkConnect = 0x0f,
    GetTimezone = 0x10,
    SyncTime = 0x11,
    LinkDisconnect = 0x12,
    SaveLinkConfig = 0x13,
    SavePlantProfile = 0x14,
    SetTimezone = 0x15,
    SaveTimezone = 0x16,
}

impl CommandId {
    pub const fn from_u8(id: u8) -> Option<Self> {
        match id {
            0x01 => Some(Self::GetSensorData),
            0x02 => Some(Self::GetSystemStatus),
            0x03 => Some(Self::SetPlantProfile),
            0x05 => Some(Self::SystemReset),
            0x06 => Some(Self::GetDeviceInfo),
            0x0a => Some(Self::GetTimeData),
            0x0b => Some(Self::GetSwitchStatus),
            0x0c => Some(Self::GetPlantProfile),
            0x0d => Some(Self::SetLinkConfig),
            0x0e => Some(Self::GetLinkConfig),
            0x0f => Some(Self::LinkConnect),
            0x10 => Some(Self::GetTimezone),
            0x11 => Some(Self::SyncTime),
            0x12 => Some(Self::LinkDisconnect),
            0x13 => Some(Self::SaveLinkConfig),
            0x14 => Some(Self::SavePlantProfile),
            0x15 => Some(Self::SetTimezone),
            0x16 => Some(Self::SaveTimezone),
            _ => None,
        }
    }
}

/// `GetSystemStatus` payload.
///
/// Wire layout (24 bytes, little-endian): five u32 fields, two u8 flags,
/// two bytes of padding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SystemStatus {
    pub uptime_secs: u32,
    pub heap_free: u32,
    pub heap_min_free: u32,
    pub task_count: u32,
    pub current_time: u32,
    pub linked: bool,
    pub subscribed: bool,
}

impl SystemStatus {
    pub fn to_bytes(&self) -> [u8; SYSTEM_STATUS_SIZE] {
        let mut bytes = [0u8; SYSTEM_STATUS_SIZE];
        bytes[0..4].copy_from_slice(&self.uptime_secs.to_le_bytes());
        bytes[4..8].copy_from_slice(&self.heap_free.to_le_bytes());
        bytes[8..12].copy_from_slice(&self.heap_min_free.to_le_bytes());
        bytes[12..16].copy_from_slice(&self.task_count.to_le_bytes());
        bytes[16..20].copy_from_slice(&self.current_time.to_le_bytes());
        bytes[20] = self.linked as u8;
        bytes[21] = self.subscribed as u8;
        bytes
    }
}

/// Static identity reported by `GetDeviceInfo` and used in advertising.
#[derive(Debug, Clone)]
pub struct DeviceIdentity {
    pub name: String<32>,
    pub firmware_version: &'static str,
    pub revision: HardwareRevision,
}

/// The protocol engine: parses command frames, dispatches to handlers,
/// builds response frames.
///
/// Borrows read-only views of the ring store and scoped read-write access
/// to the configuration and the active profile; it owns neither.
pub struct ProtocolEngine<'a, K, C, S> {
    store: &'a Shared<RingStore>,
    config: &'a Shared<ConfigStore<K>>,
    active_profile: &'a Shared<PlantProfile>,
    clock: &'a Shared<C>,
    system: &'a Shared<S>,
    identity: DeviceIdentity,
    /// Currently applied timezone; may diverge from the persisted one
    /// between `SetTimezone` and `SaveTimezone`.
    timezone: TimezoneString,
    busy: bool,
    sensor_reads: u32,
}

impl<'a, K, C, S> ProtocolEngine<'a, K, C, S>
where
    K: KvStore,
    C: Clock,
    S: SystemControl,
{
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: &'a Shared<RingStore>,
        config: &'a Shared<ConfigStore<K>>,
        active_profile: &'a Shared<PlantProfile>,
        clock: &'a Shared<C>,
        system: &'a Shared<S>,
        identity: DeviceIdentity,
        timezone: TimezoneString,
    ) -> Self {
        Self {
            store,
            config,
            active_profile,
            clock,
            system,
            identity,
            timezone,
            busy: false,
            sensor_reads: 0,
        }
    }

    pub const fn is_busy(&self) -> bool {
        self.busy
    }

    #[cfg(test)]
    pub(crate) fn force_busy(&mut self, busy: bool) {
        self.busy = busy;
    }

    /// Handle one raw command frame.
    ///
    /// Returns `None` when the frame was dropped because a command is in
    /// flight; otherwise exactly one response frame.
    pub fn handle_frame(&mut self, raw: &[u8]) -> Option<Vec<u8>> {
        if self.busy {
            debug!("command dropped: dispatch in progress");
            return None;
        }
        self.busy = true;
        let response = self.dispatch(raw);
        self.busy = false;
        Some(response)
    }

    fn dispatch(&mut self, raw: &[u8]) -> Vec<u8> {
        let frame = match CommandFrame::parse(raw) {
            Ok(frame) => frame,
            Err(e) => {
                // Echo whatever header bytes arrived so the client can
                // correlate the rejection.
                let id = raw.first().copied().unwrap_or(0);
                let seq = raw.get(1).copied().unwrap_or(0);
                warn!("rejecting malformed frame: {}", e);
                return ResponseBuilder::status_only(id, seq, StatusCode::InvalidParameter)
                    .finish();
            }
        };

        let Some(command) = CommandId::from_u8(frame.command_id) else {
            debug!("unknown command 0x{:02x}", frame.command_id);
            return ResponseBuilder::status_only(
                frame.command_id,
                frame.sequence,
                StatusCode::InvalidCommand,
            )
            .finish();
        };

        match command {
            CommandId::GetSensorData => self.get_sensor_data(&frame),
            CommandId::GetSystemStatus => self.get_system_status(&frame),
            CommandId::SetPlantProfile => self.set_plant_profile(&frame),
            CommandId::SystemReset => self.system_reset(&frame),
            CommandId::GetDeviceInfo => self.get_device_info(&frame),
            CommandId::GetTimeData => self.get_time_data(&frame),
            CommandId::GetSwitchStatus => self.get_switch_status(&frame),
            CommandId::GetPlantProfile => self.get_plant_profile(&frame),
            CommandId::SetLinkConfig => self.set_link_config(&frame),
            CommandId::GetLinkConfig => self.get_link_config(&frame),
            CommandId::LinkConnect => self.link_connect(&frame),
            CommandId::GetTimezone => self.get_timezone(&frame),
            CommandId::SyncTime => self.sync_time(&frame),
            CommandId::LinkDisconnect => self.link_disconnect(&frame),
            CommandId::SaveLinkConfig => self.save_link_config(&frame),
            CommandId::SavePlantProfile => self.save_plant_profile(&frame),
            CommandId::SetTimezone => self.set_timezone(&frame),
            CommandId::SaveTimezone => self.save_timezone(&frame),
        }
    }

    /// Build a success response carrying `payload`.
    fn respond_with(frame: &CommandFrame<'_>, payload: &[u8]) -> Vec<u8> {
        let mut builder = ResponseBuilder::new(frame.command_id, frame.sequence);
        if builder.write(payload).is_err() {
            warn!(
                "response payload of {} bytes overflows the buffer",
                payload.len()
            );
            return ResponseBuilder::status_only(
                frame.command_id,
                frame.sequence,
                StatusCode::Error,
            )
            .finish();
        }
        builder.finish()
    }

    fn respond_status(frame: &CommandFrame<'_>, status: StatusCode) -> Vec<u8> {
        ResponseBuilder::status_only(frame.command_id, frame.sequence, status).finish()
    }

    fn get_sensor_data(&mut self, frame: &CommandFrame<'_>) -> Vec<u8> {
        self.sensor_reads = self.sensor_reads.wrapping_add(1);
        let latest = self.store.lock(|cell| cell.borrow().get_latest_minute().copied());
        match latest {
            Some(sample) => Self::respond_with(frame, &sample.to_bytes()),
            None => Self::respond_status(frame, StatusCode::Error),
        }
    }

    fn get_system_status(&mut self, frame: &CommandFrame<'_>) -> Vec<u8> {
        let mut status = self.system.lock(|cell| {
            let system = cell.borrow();
            SystemStatus {
                uptime_secs: system.uptime_secs(),
                heap_free: system.heap_free_bytes(),
                heap_min_free: system.heap_min_free_bytes(),
                task_count: system.task_count(),
                current_time: 0,
                linked: system.link_connected(),
                subscribed: system.notifications_subscribed(),
            }
        });
        status.current_time = self.clock.lock(|cell| cell.borrow().now().secs);
        Self::respond_with(frame, &status.to_bytes())
    }

    fn set_plant_profile(&mut self, frame: &CommandFrame<'_>) -> Vec<u8> {
        let Ok(blob) = <&[u8; PROFILE_BLOB_SIZE]>::try_from(frame.data) else {
            return Self::respond_status(frame, StatusCode::InvalidParameter);
        };
        let profile = match PlantProfile::from_bytes(blob) {
            Ok(profile) => profile,
            Err(e) => {
                warn!("rejecting profile payload: {}", e);
                return Self::respond_status(frame, StatusCode::InvalidParameter);
            }
        };

        if let Err(e) = self
            .config
            .lock(|cell| cell.borrow_mut().save_profile(&profile))
        {
            warn!("profile save failed: {}", e);
            return Self::respond_status(frame, StatusCode::Error);
        }
        info!("plant profile updated: {}", profile.name.as_str());
        self.active_profile
            .lock(|cell| *cell.borrow_mut() = profile);
        Self::respond_status(frame, StatusCode::Success)
    }

    fn system_reset(&mut self, frame: &CommandFrame<'_>) -> Vec<u8> {
        info!("system reset requested over the link");
        // The platform applies a short hold-off so this response still
        // reaches the client before the reset.
        self.system.lock(|cell| cell.borrow_mut().request_reset());
        Self::respond_status(frame, StatusCode::Success)
    }

    fn get_device_info(&mut self, frame: &CommandFrame<'_>) -> Vec<u8> {
        let mut payload = [0u8; DEVICE_INFO_SIZE];
        write_padded(&mut payload[0..32], self.identity.name.as_bytes());
        write_padded(&mut payload[32..48], self.identity.firmware_version.as_bytes());
        write_padded(&mut payload[48..64], self.identity.revision.label().as_bytes());
        let uptime = self.system.lock(|cell| cell.borrow().uptime_secs());
        payload[64..68].copy_from_slice(&uptime.to_le_bytes());
        payload[68..72].copy_from_slice(&self.sensor_reads.to_le_bytes());
        Self::respond_with(frame, &payload)
    }

    fn get_time_data(&mut self, frame: &CommandFrame<'_>) -> Vec<u8> {
        let Ok(raw) = <&[u8; WIRE_TIME_SIZE]>::try_from(frame.data) else {
            return Self::respond_status(frame, StatusCode::InvalidParameter);
        };
        let Some(wanted) = WireTime::from_bytes(raw).to_timestamp() else {
            return Self::respond_status(frame, StatusCode::InvalidParameter);
        };

        let found = self
            .store
            .lock(|cell| cell.borrow().get_at_minute(wanted).copied());
        let Some(sample) = found else {
            return Self::respond_status(frame, StatusCode::Error);
        };

        let mut payload = [0u8; TIME_DATA_RESPONSE_SIZE];
        let calendar = sample.timestamp.calendar();
        payload[..WIRE_TIME_SIZE].copy_from_slice(&WireTime::from_calendar(&calendar).to_bytes());
        payload[36..40].copy_from_slice(&sample.air_temperature.to_le_bytes());
        payload[40..44].copy_from_slice(&sample.air_humidity.to_le_bytes());
        payload[44..48].copy_from_slice(&sample.lux.to_le_bytes());
        payload[48..52].copy_from_slice(&sample.soil_moisture().to_le_bytes());
        Self::respond_with(frame, &payload)
    }

    fn get_switch_status(&mut self, frame: &CommandFrame<'_>) -> Vec<u8> {
        let state = self.system.lock(|cell| cell.borrow().switch_state());
        Self::respond_with(frame, &[state as u8])
    }

    fn get_plant_profile(&mut self, frame: &CommandFrame<'_>) -> Vec<u8> {
        let blob = self.active_profile.lock(|cell| cell.borrow().to_bytes());
        Self::respond_with(frame, &blob)
    }

    fn set_link_config(&mut self, frame: &CommandFrame<'_>) -> Vec<u8> {
        let Ok(blob) = <&[u8; CREDENTIALS_BLOB_SIZE]>::try_from(frame.data) else {
            return Self::respond_status(frame, StatusCode::InvalidParameter);
        };
        let creds = match LinkCredentials::from_bytes(blob) {
            Ok(creds) => creds,
            Err(e) => {
                warn!("rejecting credentials payload: {}", e);
                return Self::respond_status(frame, StatusCode::InvalidParameter);
            }
        };
        info!("live link config updated, ssid {}", creds.ssid.as_str());
        self.system
            .lock(|cell| cell.borrow_mut().apply_link_config(&creds));
        Self::respond_status(frame, StatusCode::Success)
    }

    fn get_link_config(&mut self, frame: &CommandFrame<'_>) -> Vec<u8> {
        let creds = self.system.lock(|cell| cell.borrow().credentials());
        let Some(creds) = creds else {
            return Self::respond_status(frame, StatusCode::Error);
        };

        // The secret leaves the device masked, never verbatim.
        let mut payload = [0u8; SSID_LEN + PASSWORD_LEN];
        write_padded(&mut payload[..SSID_LEN], creds.ssid.as_bytes());
        write_padded(&mut payload[SSID_LEN..], creds.masked_password().as_bytes());
        Self::respond_with(frame, &payload)
    }

    fn link_connect(&mut self, frame: &CommandFrame<'_>) -> Vec<u8> {
        let already = self.system.lock(|cell| {
            let system = cell.borrow();
            match (system.connected_ssid(), system.credentials()) {
                (Some(current), Some(creds)) => system.link_connected() && current == creds.ssid,
                _ => false,
            }
        });
        if !already {
            self.system
                .lock(|cell| cell.borrow_mut().request_link_connect());
        }
        Self::respond_status(frame, StatusCode::Success)
    }

    fn get_timezone(&mut self, frame: &CommandFrame<'_>) -> Vec<u8> {
        Self::respond_with(frame, self.timezone.as_bytes())
    }

    fn sync_time(&mut self, frame: &CommandFrame<'_>) -> Vec<u8> {
        self.system
            .lock(|cell| cell.borrow_mut().request_time_sync());
        Self::respond_status(frame, StatusCode::Success)
    }

    fn link_disconnect(&mut self, frame: &CommandFrame<'_>) -> Vec<u8> {
        self.system
            .lock(|cell| cell.borrow_mut().request_link_disconnect());
        Self::respond_status(frame, StatusCode::Success)
    }

    fn save_link_config(&mut self, frame: &CommandFrame<'_>) -> Vec<u8> {
        let creds = self.system.lock(|cell| cell.borrow().credentials());
        let Some(creds) = creds else {
            warn!("no live link config to persist");
            return Self::respond_status(frame, StatusCode::Error);
        };
        match self
            .config
            .lock(|cell| cell.borrow_mut().save_link_credentials(&creds))
        {
            Ok(()) => Self::respond_status(frame, StatusCode::Success),
            Err(e) => {
                warn!("credentials save failed: {}", e);
                Self::respond_status(frame, StatusCode::Error)
            }
        }
    }

    fn save_plant_profile(&mut self, frame: &CommandFrame<'_>) -> Vec<u8> {
        let profile = self.active_profile.lock(|cell| cell.borrow().clone());
        match self
            .config
            .lock(|cell| cell.borrow_mut().save_profile(&profile))
        {
            Ok(()) => Self::respond_status(frame, StatusCode::Success),
            Err(e) => {
                warn!("profile save failed: {}", e);
                Self::respond_status(frame, StatusCode::Error)
            }
        }
    }

    fn set_timezone(&mut self, frame: &CommandFrame<'_>) -> Vec<u8> {
        if frame.data.is_empty() || frame.data.len() > TIMEZONE_LEN {
            return Self::respond_status(frame, StatusCode::InvalidParameter);
        }
        let Ok(tz) = core::str::from_utf8(frame.data) else {
            return Self::respond_status(frame, StatusCode::InvalidParameter);
        };

        let applied = self
            .clock
            .lock(|cell| cell.borrow_mut().set_timezone(tz));
        match applied {
            Ok(()) => {
                // Bounded by the length check above.
                self.timezone = TimezoneString::from_str(tz).unwrap_or_default();
                info!("timezone set to {}", tz);
                Self::respond_status(frame, StatusCode::Success)
            }
            Err(e) => {
                warn!("rejecting timezone {:?}: {}", tz, e);
                Self::respond_status(frame, StatusCode::InvalidParameter)
            }
        }
    }

    fn save_timezone(&mut self, frame: &CommandFrame<'_>) -> Vec<u8> {
        let tz = self.timezone.clone();
        match self
            .config
            .lock(|cell| cell.borrow_mut().save_timezone(tz.as_str()))
        {
            Ok(()) => Self::respond_status(frame, StatusCode::Success),
            Err(e) => {
                warn!("timezone save failed: {}", e);
                Self::respond_status(frame, StatusCode::Error)
            }
        }
    }
}

fn write_padded(dest: &mut [u8], src: &[u8]) {
    let n = src.len().min(dest.len());
    dest[..n].copy_from_slice(&src[..n]);
}
