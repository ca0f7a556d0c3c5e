//! Sensor adapter interfaces.
//!
//! Chip drivers live outside this crate; the core only sees the uniform
//! read-one-sample traits below. Every adapter returns either a value or a
//! [`SensorError`]; the composite sampling step in [`sampler`] turns
//! per-sensor failures into zeroed fields plus a single error flag on the
//! sample, never into an aborted pass.

pub mod sampler;

use thiserror_no_std::Error;

pub use sampler::Sampler;

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum SensorError {
    /// The device did not answer on the bus.
    #[error("sensor did not respond")]
    NoResponse,
    /// The bus transfer itself failed.
    #[error("bus transfer failed")]
    Bus,
    /// The reading carried a CRC and it did not match; the reading is
    /// discarded.
    #[error("reading failed CRC check")]
    CrcMismatch,
    /// The reading decoded but is physically implausible.
    #[error("reading outside plausible range")]
    OutOfRange,
}

/// One air-sensor measurement.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AirReading {
    pub temperature_c: f32,
    pub humidity_pct: f32,
}

/// Combined air temperature / humidity sensor.
#[allow(async_fn_in_trait)]
pub trait AirSensor {
    async fn read(&mut self) -> Result<AirReading, SensorError>;
}

/// Ambient light sensor.
#[allow(async_fn_in_trait)]
pub trait LightSensor {
    async fn read_lux(&mut self) -> Result<f32, SensorError>;
}

/// Soil-moisture sensing element.
///
/// Resistive probes expose a single channel in millivolts; capacitive heads
/// expose [`MOISTURE_CHANNELS`] independent channels in picofarads. In both
/// unit systems a higher raw value means drier soil.
#[allow(async_fn_in_trait)]
pub trait MoistureSensor {
    fn kind(&self) -> MoistureKind;

    /// Read one channel. Resistive sensors only answer channel 0.
    async fn read_channel(&mut self, channel: usize) -> Result<f32, SensorError>;
}

/// Channel count of the capacitive moisture head.
pub const MOISTURE_CHANNELS: usize = 4;

/// Maximum number of soil-temperature probes a revision can carry.
pub const MAX_SOIL_PROBES: usize = 4;

/// Single-point soil-temperature probe.
#[allow(async_fn_in_trait)]
pub trait SoilTemperatureProbe {
    async fn read_celsius(&mut self) -> Result<f32, SensorError>;
}

/// Measurement principle of the installed moisture sensor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MoistureKind {
    /// Single-channel resistive probe, millivolts.
    Resistive,
    /// Four-channel capacitive head, picofarads.
    Capacitive,
}

impl MoistureKind {
    /// Wire tag for the composite sample record.
    pub const fn tag(self) -> u8 {
        match self {
            Self::Resistive => 0,
            Self::Capacitive => 1,
        }
    }

    pub const fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            0 => Some(Self::Resistive),
            1 => Some(Self::Capacitive),
            _ => None,
        }
    }
}

/// Hardware revision of the monitor board.
///
/// The revision fixes the moisture-sensor kind and the maximum number of
/// soil-temperature probe headers; actual probe presence is detected at
/// boot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HardwareRevision {
    /// Resistive moisture probe, no soil-temperature headers.
    Rev03,
    /// Capacitive four-channel head, up to four soil-temperature probes.
    Rev04,
}

impl HardwareRevision {
    /// Two-digit revision code used in the advertised device name.
    pub const fn code(self) -> u8 {
        match self {
            Self::Rev03 => 3,
            Self::Rev04 => 4,
        }
    }

    pub const fn from_code(code: u8) -> Option<Self> {
        match code {
            3 => Some(Self::Rev03),
            4 => Some(Self::Rev04),
            _ => None,
        }
    }

    pub const fn moisture_kind(self) -> MoistureKind {
        match self {
            Self::Rev03 => MoistureKind::Resistive,
            Self::Rev04 => MoistureKind::Capacitive,
        }
    }

    pub const fn soil_probe_headers(self) -> usize {
        match self {
            Self::Rev03 => 0,
            Self::Rev04 => MAX_SOIL_PROBES,
        }
    }

    /// Hardware-version string for the device-info response.
    pub const fn label(self) -> &'static str {
        match self {
            Self::Rev03 => "rev03",
            Self::Rev04 => "rev04",
        }
    }

    /// Default watering-detection delta for this revision's moisture units.
    pub const fn default_watering_delta(self) -> f32 {
        match self {
            Self::Rev03 => 500.0,
            Self::Rev04 => 200.0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_moisture_kind_tag_round_trip() {
        for kind in [MoistureKind::Resistive, MoistureKind::Capacitive] {
            assert_eq!(MoistureKind::from_tag(kind.tag()), Some(kind));
        }
        assert_eq!(MoistureKind::from_tag(7), None);
    }

    #[test]
    fn test_revision_capabilities() {
        assert_eq!(HardwareRevision::Rev03.moisture_kind(), MoistureKind::Resistive);
        assert_eq!(HardwareRevision::Rev03.soil_probe_headers(), 0);
        assert_eq!(HardwareRevision::Rev04.moisture_kind(), MoistureKind::Capacitive);
        assert_eq!(HardwareRevision::Rev04.soil_probe_headers(), 4);
        assert_eq!(HardwareRevision::from_code(4), Some(HardwareRevision::Rev04));
        assert_eq!(HardwareRevision::from_code(9), None);
    }
}
