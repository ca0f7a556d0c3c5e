//! Record types for the time-indexed store.
//!
//! [`Sample`] is both the in-memory minute record and the link payload for
//! the latest-sample characteristic; its binary form is the fixed 60-byte
//! little-endian layout below. The soil-moisture field is a tagged variant
//! (resistive vs. capacitive) flattened into a shared envelope on the wire.
//!
//! Binary layout (little-endian, packed):
//! - timestamp: 4 bytes (u32, local epoch seconds)
//! - lux: 4 bytes (f32)
//! - air_temperature: 4 bytes (f32)
//! - air_humidity: 4 bytes (f32)
//! - soil_moisture: 4 bytes (f32, primary value)
//! - soil_channels: 16 bytes (4 × f32, zero for resistive hardware)
//! - soil_temperatures: 16 bytes (4 × f32)
//! - soil_probe_count: 1 byte
//! - moisture_kind: 1 byte
//! - error: 1 byte
//! - data_structure_version: 1 byte
//! - hardware_revision: 1 byte
//! - reserved: 3 bytes

use crate::clock::{Date, Timestamp};
use crate::sensors::{HardwareRevision, MoistureKind, MAX_SOIL_PROBES, MOISTURE_CHANNELS};

/// Version tag carried by every serialised sample.
pub const DATA_STRUCTURE_VERSION: u8 = 2;

/// Size of a serialised [`Sample`] (60 bytes).
pub const SAMPLE_WIRE_SIZE: usize = 60;

/// Soil-moisture portion of a composite sample.
///
/// Higher raw values mean drier soil in both unit systems; the decision
/// engine depends on that inversion.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SoilMoisture {
    /// Resistive probe reading in millivolts.
    Resistive { millivolts: f32 },
    /// Independent per-channel capacitance readings in picofarads.
    Capacitive { channels: [f32; MOISTURE_CHANNELS] },
}

impl SoilMoisture {
    /// The aggregate value the decision engine and the wire envelope use:
    /// the raw reading for resistive probes, the channel mean for
    /// capacitive heads.
    pub fn primary(&self) -> f32 {
        match self {
            Self::Resistive { millivolts } => *millivolts,
            Self::Capacitive { channels } => {
                channels.iter().sum::<f32>() / MOISTURE_CHANNELS as f32
            }
        }
    }

    pub const fn kind(&self) -> MoistureKind {
        match self {
            Self::Resistive { .. } => MoistureKind::Resistive,
            Self::Capacitive { .. } => MoistureKind::Capacitive,
        }
    }

    fn channels_or_zero(&self) -> [f32; MOISTURE_CHANNELS] {
        match self {
            Self::Resistive { .. } => [0.0; MOISTURE_CHANNELS],
            Self::Capacitive { channels } => *channels,
        }
    }
}

/// One composite reading, taken once per sampling period.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Sample {
    pub timestamp: Timestamp,
    /// Ambient light in lux. Zero when the light read failed.
    pub lux: f32,
    pub air_temperature: f32,
    pub air_humidity: f32,
    pub soil: SoilMoisture,
    /// Soil-temperature readings; only the first `soil_probe_count` entries
    /// are meaningful, the rest are zero.
    pub soil_temperatures: [f32; MAX_SOIL_PROBES],
    pub soil_probe_count: u8,
    /// True when at least one sub-sensor failed during acquisition. Zero is
    /// a valid measurement for several fields, so this flag is the only
    /// reliable validity indicator.
    pub error: bool,
    pub revision: HardwareRevision,
}

impl Sample {
    /// Aggregate soil-moisture value of this sample.
    pub fn soil_moisture(&self) -> f32 {
        self.soil.primary()
    }

    pub fn to_bytes(&self) -> [u8; SAMPLE_WIRE_SIZE] {
        let mut bytes = [0u8; SAMPLE_WIRE_SIZE];
        bytes[0..4].copy_from_slice(&self.timestamp.secs.to_le_bytes());
        bytes[4..8].copy_from_slice(&self.lux.to_le_bytes());
        bytes[8..12].copy_from_slice(&self.air_temperature.to_le_bytes());
        bytes[12..16].copy_from_slice(&self.air_humidity.to_le_bytes());
        bytes[16..20].copy_from_slice(&self.soil.primary().to_le_bytes());

        let channels = self.soil.channels_or_zero();
        for (i, c) in channels.iter().enumerate() {
            let offset = 20 + i * 4;
            bytes[offset..offset + 4].copy_from_slice(&c.to_le_bytes());
        }
        for (i, t) in self.soil_temperatures.iter().enumerate() {
            let offset = 36 + i * 4;
            bytes[offset..offset + 4].copy_from_slice(&t.to_le_bytes());
        }

        bytes[52] = self.soil_probe_count;
        bytes[53] = self.soil.kind().tag();
        bytes[54] = self.error as u8;
        bytes[55] = DATA_STRUCTURE_VERSION;
        bytes[56] = self.revision.code();
        bytes
    }

    /// Decode a serialised sample. Returns `None` on an unknown moisture
    /// kind or hardware revision tag.
    pub fn from_bytes(bytes: &[u8; SAMPLE_WIRE_SIZE]) -> Option<Self> {
        let read_f32 = |offset: usize| {
            let mut raw = [0u8; 4];
            raw.copy_from_slice(&bytes[offset..offset + 4]);
            f32::from_le_bytes(raw)
        };

        let mut secs_raw = [0u8; 4];
        secs_raw.copy_from_slice(&bytes[0..4]);
        let timestamp = Timestamp::from_secs(u32::from_le_bytes(secs_raw));

        let kind = MoistureKind::from_tag(bytes[53])?;
        let revision = HardwareRevision::from_code(bytes[56])?;

        let soil = match kind {
            MoistureKind::Resistive => SoilMoisture::Resistive { millivolts: read_f32(16) },
            MoistureKind::Capacitive => {
                let mut channels = [0.0f32; MOISTURE_CHANNELS];
                for (i, c) in channels.iter_mut().enumerate() {
                    *c = read_f32(20 + i * 4);
                }
                SoilMoisture::Capacitive { channels }
            }
        };

        let mut soil_temperatures = [0.0f32; MAX_SOIL_PROBES];
        for (i, t) in soil_temperatures.iter_mut().enumerate() {
            *t = read_f32(36 + i * 4);
        }

        Some(Self {
            timestamp,
            lux: read_f32(4),
            air_temperature: read_f32(8),
            air_humidity: read_f32(12),
            soil,
            soil_temperatures,
            soil_probe_count: bytes[52].min(MAX_SOIL_PROBES as u8),
            error: bytes[54] != 0,
            revision,
        })
    }
}

impl Default for Sample {
    /// Zeroed resistive sample; placeholder for never-written slots.
    fn default() -> Self {
        Self {
            timestamp: Timestamp::default(),
            lux: 0.0,
            air_temperature: 0.0,
            air_humidity: 0.0,
            soil: SoilMoisture::Resistive { millivolts: 0.0 },
            soil_temperatures: [0.0; MAX_SOIL_PROBES],
            soil_probe_count: 0,
            error: false,
            revision: HardwareRevision::Rev03,
        }
    }
}

/// One minute-resolution slot of the ring buffer.
///
/// Slots are self-describing: the timestamp lives in the sample, and the
/// `valid` flag distinguishes written slots from never-written or
/// invalidated ones.
#[derive(Debug, Clone, Copy)]
pub struct MinuteSlot {
    pub sample: Sample,
    pub valid: bool,
}

impl Default for MinuteSlot {
    fn default() -> Self {
        Self {
            sample: Sample::default(),
            valid: false,
        }
    }
}

/// Aggregate statistics over one calendar day of minute slots.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct DailySummary {
    pub date: Date,
    /// Number of minute slots that contributed.
    pub valid_samples: u16,
    pub temperature_min: f32,
    pub temperature_avg: f32,
    pub temperature_max: f32,
    pub humidity_avg: f32,
    pub lux_avg: f32,
    pub moisture_min: f32,
    pub moisture_avg: f32,
    pub moisture_max: f32,
    pub soil_temperature_min: f32,
    pub soil_temperature_avg: f32,
    pub soil_temperature_max: f32,
    /// True once the day has accumulated enough samples to be
    /// representative.
    pub complete: bool,
}
