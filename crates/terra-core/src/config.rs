//! Persistent configuration: plant profile, link credentials, timezone.
//!
//! Everything persists as versioned fixed-size blobs in a single key-value
//! namespace behind the [`KvStore`] trait (NVS flash on the device, a file
//! in the simulator). A blob whose stored size disagrees with the compiled
//! layout is treated exactly like a missing blob: for the plant profile the
//! store recovers with the factory default, for link credentials the
//! mismatch is surfaced so the operator re-provisions.
//!
//! Profile blob (56 bytes, little-endian, packed):
//! - name: 32 bytes (UTF-8, zero-padded)
//! - dry_threshold / wet_threshold: f32 each
//! - dry_days: i32
//! - temperature_high / temperature_low / watering_delta: f32 each
//!
//! Credentials blob (96 bytes): ssid 32 bytes + password 64 bytes, both
//! zero-padded UTF-8.

use core::str::FromStr;

use heapless::String;
use log::{error, info, warn};
use serde::{Deserialize, Serialize};
use thiserror_no_std::Error;

use crate::sensors::HardwareRevision;

/// Key of the plant-profile blob.
pub const PROFILE_KEY: &str = "plant_profile";
/// Key of the link-credentials blob.
pub const CREDENTIALS_KEY: &str = "link_creds";
/// Key of the timezone string.
pub const TIMEZONE_KEY: &str = "timezone";

/// Timezone applied when none has been persisted.
pub const DEFAULT_TIMEZONE: &str = "JST-9";

/// Serialised plant-profile size.
pub const PROFILE_BLOB_SIZE: usize = 56;
/// Serialised link-credentials size.
pub const CREDENTIALS_BLOB_SIZE: usize = 96;

/// Maximum profile-name length on the wire.
pub const PROFILE_NAME_LEN: usize = 32;
/// Maximum SSID length on the wire.
pub const SSID_LEN: usize = 32;
/// Maximum password length on the wire.
pub const PASSWORD_LEN: usize = 64;
/// Maximum timezone-string length.
pub const TIMEZONE_LEN: usize = 64;

/// Bounded timezone string as stored and applied to the clock.
pub type TimezoneString = String<TIMEZONE_LEN>;

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum KvError {
    #[error("no value stored for key")]
    NotFound,
    #[error("storage operation failed")]
    Io,
}

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigError {
    #[error("no persisted value")]
    NotFound,
    #[error("persisted blob has unexpected size")]
    SizeMismatch,
    #[error("persisted blob contents invalid")]
    Corrupt,
    #[error("persistent storage failed")]
    Io,
}

impl From<KvError> for ConfigError {
    fn from(e: KvError) -> Self {
        match e {
            KvError::NotFound => ConfigError::NotFound,
            KvError::Io => ConfigError::Io,
        }
    }
}

/// Flat key-value persistence, provided by the platform.
///
/// `set` is atomic: after power loss either the previous value or the new
/// value is read back, never a mixture. The NVS layer on the device gives
/// this guarantee; the simulator writes a temp file and renames.
pub trait KvStore {
    /// Copy the value for `key` into `buf` (up to `buf.len()` bytes) and
    /// return the full stored length.
    fn get(&mut self, key: &str, buf: &mut [u8]) -> Result<usize, KvError>;

    fn set(&mut self, key: &str, value: &[u8]) -> Result<(), KvError>;

    fn remove(&mut self, key: &str) -> Result<(), KvError>;
}

/// Tunable thresholds that parameterise the decision engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlantProfile {
    pub name: String<PROFILE_NAME_LEN>,
    /// Raw moisture at or above which soil counts as dry.
    pub dry_threshold: f32,
    /// Raw moisture at or below which soil counts as wet.
    pub wet_threshold: f32,
    /// Consecutive dry days before the watering advisory fires.
    pub dry_days: i32,
    pub temperature_high: f32,
    pub temperature_low: f32,
    /// Moisture drop within the recent window that registers a watering
    /// event.
    pub watering_delta: f32,
}

impl PlantProfile {
    /// Factory default: a succulent. The watering delta depends on the
    /// moisture-sensor units of the hardware revision.
    pub fn factory_default(revision: HardwareRevision) -> Self {
        Self {
            name: String::from_str("Succulent Plant").unwrap_or_default(),
            dry_threshold: 2500.0,
            wet_threshold: 1000.0,
            dry_days: 3,
            temperature_high: 35.0,
            temperature_low: 10.0,
            watering_delta: revision.default_watering_delta(),
        }
    }

    pub fn to_bytes(&self) -> [u8; PROFILE_BLOB_SIZE] {
        let mut bytes = [0u8; PROFILE_BLOB_SIZE];
        write_padded(&mut bytes[0..PROFILE_NAME_LEN], self.name.as_bytes());
        bytes[32..36].copy_from_slice(&self.dry_threshold.to_le_bytes());
        bytes[36..40].copy_from_slice(&self.wet_threshold.to_le_bytes());
        bytes[40..44].copy_from_slice(&self.dry_days.to_le_bytes());
        bytes[44..48].copy_from_slice(&self.temperature_high.to_le_bytes());
        bytes[48..52].copy_from_slice(&self.temperature_low.to_le_bytes());
        bytes[52..56].copy_from_slice(&self.watering_delta.to_le_bytes());
        bytes
    }

    pub fn from_bytes(bytes: &[u8; PROFILE_BLOB_SIZE]) -> Result<Self, ConfigError> {
        let read_f32 = |offset: usize| {
            let mut raw = [0u8; 4];
            raw.copy_from_slice(&bytes[offset..offset + 4]);
            f32::from_le_bytes(raw)
        };
        let mut dry_days_raw = [0u8; 4];
        dry_days_raw.copy_from_slice(&bytes[40..44]);

        Ok(Self {
            name: read_padded(&bytes[0..PROFILE_NAME_LEN])?,
            dry_threshold: read_f32(32),
            wet_threshold: read_f32(36),
            dry_days: i32::from_le_bytes(dry_days_raw),
            temperature_high: read_f32(44),
            temperature_low: read_f32(48),
            watering_delta: read_f32(52),
        })
    }
}

/// Credentials for the wireless link.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinkCredentials {
    pub ssid: String<SSID_LEN>,
    pub password: String<PASSWORD_LEN>,
}

impl LinkCredentials {
    pub fn to_bytes(&self) -> [u8; CREDENTIALS_BLOB_SIZE] {
        let mut bytes = [0u8; CREDENTIALS_BLOB_SIZE];
        write_padded(&mut bytes[0..SSID_LEN], self.ssid.as_bytes());
        write_padded(&mut bytes[SSID_LEN..], self.password.as_bytes());
        bytes
    }

    pub fn from_bytes(bytes: &[u8; CREDENTIALS_BLOB_SIZE]) -> Result<Self, ConfigError> {
        Ok(Self {
            ssid: read_padded(&bytes[0..SSID_LEN])?,
            password: read_padded(&bytes[SSID_LEN..])?,
        })
    }

    /// The only form of the secret that ever leaves the device: the first
    /// three characters followed by `***`. An empty secret masks to the
    /// empty string.
    pub fn masked_password(&self) -> String<PASSWORD_LEN> {
        let mut masked = String::new();
        if self.password.is_empty() {
            return masked;
        }
        for c in self.password.chars().take(3) {
            let _ = masked.push(c);
        }
        let _ = masked.push_str("***");
        masked
    }
}

fn write_padded(dest: &mut [u8], src: &[u8]) {
    let n = src.len().min(dest.len());
    dest[..n].copy_from_slice(&src[..n]);
}

fn read_padded<const N: usize>(bytes: &[u8]) -> Result<String<N>, ConfigError> {
    let end = bytes.iter().position(|b| *b == 0).unwrap_or(bytes.len());
    let s = core::str::from_utf8(&bytes[..end]).map_err(|_| ConfigError::Corrupt)?;
    String::from_str(s).map_err(|_| ConfigError::Corrupt)
}

/// Versioned-blob store over a [`KvStore`] namespace.
pub struct ConfigStore<K> {
    kv: K,
}

impl<K: KvStore> ConfigStore<K> {
    pub fn new(kv: K) -> Self {
        Self { kv }
    }

    /// Load the persisted profile, or recover with the factory default.
    ///
    /// Missing, corrupt and size-mismatched blobs all take the recovery
    /// path: the default is synthesised, persisted, and returned. Only a
    /// failing storage backend skips the persist step.
    pub fn load_profile(&mut self, revision: HardwareRevision) -> PlantProfile {
        let mut buf = [0u8; PROFILE_BLOB_SIZE];
        let outcome = match self.kv.get(PROFILE_KEY, &mut buf) {
            Ok(len) if len == PROFILE_BLOB_SIZE => PlantProfile::from_bytes(&buf),
            Ok(len) => {
                warn!("profile blob has size {} (expected {})", len, PROFILE_BLOB_SIZE);
                Err(ConfigError::SizeMismatch)
            }
            Err(e) => Err(e.into()),
        };

        match outcome {
            Ok(profile) => profile,
            Err(ConfigError::Io) => {
                error!("profile load hit a storage failure, using defaults");
                PlantProfile::factory_default(revision)
            }
            Err(e) => {
                info!("no usable profile ({}), writing factory default", e);
                let profile = PlantProfile::factory_default(revision);
                if let Err(e) = self.save_profile(&profile) {
                    error!("failed to persist default profile: {}", e);
                }
                profile
            }
        }
    }

    pub fn save_profile(&mut self, profile: &PlantProfile) -> Result<(), ConfigError> {
        self.kv.set(PROFILE_KEY, &profile.to_bytes())?;
        Ok(())
    }

    /// Load link credentials. `NotFound` is a normal signal that
    /// provisioning is required; a size mismatch is surfaced the same way a
    /// corrupt blob is, requiring explicit re-provisioning.
    pub fn load_link_credentials(&mut self) -> Result<LinkCredentials, ConfigError> {
        let mut buf = [0u8; CREDENTIALS_BLOB_SIZE];
        let len = self.kv.get(CREDENTIALS_KEY, &mut buf)?;
        if len != CREDENTIALS_BLOB_SIZE {
            warn!(
                "credentials blob has size {} (expected {})",
                len, CREDENTIALS_BLOB_SIZE
            );
            return Err(ConfigError::SizeMismatch);
        }
        LinkCredentials::from_bytes(&buf)
    }

    pub fn save_link_credentials(&mut self, creds: &LinkCredentials) -> Result<(), ConfigError> {
        self.kv.set(CREDENTIALS_KEY, &creds.to_bytes())?;
        Ok(())
    }

    /// Load the persisted timezone, or the compiled default when absent or
    /// unreadable.
    pub fn load_timezone(&mut self) -> TimezoneString {
        let mut buf = [0u8; TIMEZONE_LEN];
        match self.kv.get(TIMEZONE_KEY, &mut buf) {
            Ok(len) if len <= TIMEZONE_LEN => match core::str::from_utf8(&buf[..len]) {
                Ok(s) => match String::from_str(s) {
                    Ok(tz) => return tz,
                    Err(_) => warn!("persisted timezone too long, using default"),
                },
                Err(_) => warn!("persisted timezone is not UTF-8, using default"),
            },
            Ok(len) => warn!("timezone blob has size {} (max {})", len, TIMEZONE_LEN),
            Err(KvError::NotFound) => {}
            Err(e) => error!("timezone load failed: {}", e),
        }
        String::from_str(DEFAULT_TIMEZONE).unwrap_or_default()
    }

    pub fn save_timezone(&mut self, tz: &str) -> Result<(), ConfigError> {
        self.kv.set(TIMEZONE_KEY, tz.as_bytes())?;
        Ok(())
    }
}
