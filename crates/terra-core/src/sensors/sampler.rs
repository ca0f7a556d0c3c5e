//! Composite sample acquisition.
//!
//! One [`Sampler::acquire`] call runs the full read-all-sensors path for a
//! single scheduler tick: multi-read filtering for the light sensor,
//! averaged ADC bursts for resistive moisture, channel-isolated reads for
//! capacitive heads, and zero-on-fail for soil-temperature probes. A
//! sub-sensor failure never aborts the pass; it zeroes the affected field
//! and raises the sample's single error flag.

use embedded_hal_async::delay::DelayNs;
use heapless::Vec;
use log::warn;

use super::{
    AirSensor, HardwareRevision, LightSensor, MoistureKind, MoistureSensor, SoilTemperatureProbe,
    MAX_SOIL_PROBES, MOISTURE_CHANNELS,
};
use crate::clock::Timestamp;
use crate::storage::{Sample, SoilMoisture};

/// Light readings taken per tick.
const LIGHT_READINGS: usize = 5;
/// Valid light readings required before the trimmed mean is trusted.
const LIGHT_MIN_VALID: usize = 3;
/// Spacing between consecutive light readings.
const LIGHT_SPACING_MS: u32 = 50;

/// ADC samples averaged for a resistive moisture reading.
const RESISTIVE_READINGS: usize = 10;
/// Spacing between consecutive resistive ADC samples.
const RESISTIVE_SPACING_MS: u32 = 10;

/// Settle time between capacitive channels; channels are measured one at a
/// time so they cannot influence each other.
const CHANNEL_SETTLE_MS: u32 = 10;

/// Owns the adapter set and produces one composite [`Sample`] per tick.
pub struct Sampler<L, A, M, P, D> {
    light: L,
    air: A,
    moisture: M,
    /// Probes detected at boot; missing headers simply are not in the set.
    probes: Vec<P, MAX_SOIL_PROBES>,
    delay: D,
    revision: HardwareRevision,
}

impl<L, A, M, P, D> Sampler<L, A, M, P, D>
where
    L: LightSensor,
    A: AirSensor,
    M: MoistureSensor,
    P: SoilTemperatureProbe,
    D: DelayNs,
{
    pub fn new(
        light: L,
        air: A,
        moisture: M,
        probes: Vec<P, MAX_SOIL_PROBES>,
        delay: D,
        revision: HardwareRevision,
    ) -> Self {
        Self {
            light,
            air,
            moisture,
            probes,
            delay,
            revision,
        }
    }

    pub const fn revision(&self) -> HardwareRevision {
        self.revision
    }

    /// Number of soil-temperature probes detected at boot.
    pub fn probe_count(&self) -> usize {
        self.probes.len()
    }

    /// Run one full acquisition pass and stamp the result with `now`.
    pub async fn acquire(&mut self, now: Timestamp) -> Sample {
        let mut error = false;

        let lux = match self.read_light().await {
            Some(lux) => lux,
            None => {
                error = true;
                0.0
            }
        };

        let (air_temperature, air_humidity) = match self.air.read().await {
            Ok(reading) => (reading.temperature_c, reading.humidity_pct),
            Err(e) => {
                warn!("air sensor read failed: {}", e);
                error = true;
                (0.0, 0.0)
            }
        };

        let soil = match self.moisture.kind() {
            MoistureKind::Resistive => {
                let (millivolts, ok) = self.read_resistive().await;
                if !ok {
                    error = true;
                }
                SoilMoisture::Resistive { millivolts }
            }
            MoistureKind::Capacitive => {
                let (channels, ok) = self.read_capacitive().await;
                if !ok {
                    error = true;
                }
                SoilMoisture::Capacitive { channels }
            }
        };

        let mut soil_temperatures = [0.0f32; MAX_SOIL_PROBES];
        for (i, probe) in self.probes.iter_mut().enumerate() {
            // A failed probe zeroes its slot; it does not flag the sample.
            soil_temperatures[i] = probe.read_celsius().await.unwrap_or(0.0);
        }

        Sample {
            timestamp: now,
            lux,
            air_temperature,
            air_humidity,
            soil,
            soil_temperatures,
            soil_probe_count: self.probes.len() as u8,
            error,
            revision: self.revision,
        }
    }

    /// Five readings 50 ms apart, lowest and highest discarded, mean of the
    /// middle. `None` when fewer than three readings succeed.
    async fn read_light(&mut self) -> Option<f32> {
        let mut readings: Vec<f32, LIGHT_READINGS> = Vec::new();
        for i in 0..LIGHT_READINGS {
            match self.light.read_lux().await {
                Ok(lux) => {
                    let _ = readings.push(lux);
                }
                Err(e) => warn!("light read {} failed: {}", i, e),
            }
            if i + 1 < LIGHT_READINGS {
                self.delay.delay_ms(LIGHT_SPACING_MS).await;
            }
        }

        if readings.len() < LIGHT_MIN_VALID {
            return None;
        }

        readings.sort_unstable_by(|a, b| a.partial_cmp(b).unwrap_or(core::cmp::Ordering::Equal));
        let middle = &readings[1..readings.len() - 1];
        Some(middle.iter().sum::<f32>() / middle.len() as f32)
    }

    /// Ten ADC samples 10 ms apart, averaged in millivolts. Partial
    /// failures average whatever was obtained but clear the ok flag so the
    /// sample gets marked erroneous.
    async fn read_resistive(&mut self) -> (f32, bool) {
        let mut sum = 0.0f32;
        let mut count = 0usize;
        for i in 0..RESISTIVE_READINGS {
            match self.moisture.read_channel(0).await {
                Ok(mv) => {
                    sum += mv;
                    count += 1;
                }
                Err(e) => warn!("moisture ADC sample {} failed: {}", i, e),
            }
            if i + 1 < RESISTIVE_READINGS {
                self.delay.delay_ms(RESISTIVE_SPACING_MS).await;
            }
        }
        if count == 0 {
            return (0.0, false);
        }
        (sum / count as f32, count == RESISTIVE_READINGS)
    }

    /// Each channel measured independently, in sequence. A failed channel
    /// reads as zero and the whole sample is flagged.
    async fn read_capacitive(&mut self) -> ([f32; MOISTURE_CHANNELS], bool) {
        let mut channels = [0.0f32; MOISTURE_CHANNELS];
        let mut ok = true;
        for (i, slot) in channels.iter_mut().enumerate() {
            match self.moisture.read_channel(i).await {
                Ok(pf) => *slot = pf,
                Err(e) => {
                    warn!("moisture channel {} failed: {}", i, e);
                    ok = false;
                }
            }
            if i + 1 < MOISTURE_CHANNELS {
                self.delay.delay_ms(CHANNEL_SETTLE_MS).await;
            }
        }
        (channels, ok)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sensors::{AirReading, SensorError};
    use alloc::vec::Vec as AllocVec;
    use embassy_futures::block_on;

    struct NoopDelay;

    impl DelayNs for NoopDelay {
        async fn delay_ns(&mut self, _ns: u32) {}
    }

    struct ScriptedLight {
        script: AllocVec<Result<f32, SensorError>>,
        next: usize,
    }

    impl ScriptedLight {
        fn new(script: &[Result<f32, SensorError>]) -> Self {
            Self { script: script.into(), next: 0 }
        }
    }

    impl LightSensor for ScriptedLight {
        async fn read_lux(&mut self) -> Result<f32, SensorError> {
            let result = self.script[self.next % self.script.len()];
            self.next += 1;
            result
        }
    }

    struct FixedAir(Result<AirReading, SensorError>);

    impl AirSensor for FixedAir {
        async fn read(&mut self) -> Result<AirReading, SensorError> {
            self.0
        }
    }

    fn good_air() -> FixedAir {
        FixedAir(Ok(AirReading { temperature_c: 22.5, humidity_pct: 48.0 }))
    }

    struct FixedMoisture {
        kind: MoistureKind,
        channels: [Result<f32, SensorError>; MOISTURE_CHANNELS],
    }

    impl MoistureSensor for FixedMoisture {
        fn kind(&self) -> MoistureKind {
            self.kind
        }

        async fn read_channel(&mut self, channel: usize) -> Result<f32, SensorError> {
            self.channels[channel]
        }
    }

    fn resistive(mv: f32) -> FixedMoisture {
        FixedMoisture {
            kind: MoistureKind::Resistive,
            channels: [Ok(mv), Ok(0.0), Ok(0.0), Ok(0.0)],
        }
    }

    struct FixedProbe(Result<f32, SensorError>);

    impl SoilTemperatureProbe for FixedProbe {
        async fn read_celsius(&mut self) -> Result<f32, SensorError> {
            self.0
        }
    }

    fn sampler_with<L: LightSensor, M: MoistureSensor>(
        light: L,
        air: FixedAir,
        moisture: M,
        probes: Vec<FixedProbe, MAX_SOIL_PROBES>,
        revision: HardwareRevision,
    ) -> Sampler<L, FixedAir, M, FixedProbe, NoopDelay> {
        Sampler::new(light, air, moisture, probes, NoopDelay, revision)
    }

    fn ts() -> Timestamp {
        Timestamp::from_calendar(2025, 1, 15, 12, 34, 0)
    }

    #[test]
    fn test_light_trimmed_mean() {
        let light = ScriptedLight::new(&[
            Ok(100.0),
            Ok(500.0),
            Ok(300.0),
            Ok(200.0),
            Ok(400.0),
        ]);
        let mut sampler = sampler_with(
            light,
            good_air(),
            resistive(1800.0),
            Vec::new(),
            HardwareRevision::Rev03,
        );

        let sample = block_on(sampler.acquire(ts()));
        assert!(!sample.error);
        // Sorted: 100 200 300 400 500 → mean of the middle three.
        assert_eq!(sample.lux, 300.0);
    }

    #[test]
    fn test_light_too_few_valid_flags_error() {
        let light = ScriptedLight::new(&[
            Ok(100.0),
            Err(SensorError::NoResponse),
            Err(SensorError::Bus),
            Ok(200.0),
            Err(SensorError::CrcMismatch),
        ]);
        let mut sampler = sampler_with(
            light,
            good_air(),
            resistive(1800.0),
            Vec::new(),
            HardwareRevision::Rev03,
        );

        let sample = block_on(sampler.acquire(ts()));
        assert!(sample.error);
        assert_eq!(sample.lux, 0.0);
        // Other fields still carry their readings.
        assert_eq!(sample.air_temperature, 22.5);
        assert_eq!(sample.soil_moisture(), 1800.0);
    }

    #[test]
    fn test_air_failure_masks_fields() {
        let mut sampler = sampler_with(
            ScriptedLight::new(&[Ok(320.0)]),
            FixedAir(Err(SensorError::NoResponse)),
            resistive(1800.0),
            Vec::new(),
            HardwareRevision::Rev03,
        );

        let sample = block_on(sampler.acquire(ts()));
        assert!(sample.error);
        assert_eq!(sample.air_temperature, 0.0);
        assert_eq!(sample.air_humidity, 0.0);
    }

    #[test]
    fn test_capacitive_channels_averaged() {
        let moisture = FixedMoisture {
            kind: MoistureKind::Capacitive,
            channels: [Ok(1800.0), Ok(1820.0), Ok(1790.0), Ok(1810.0)],
        };
        let mut sampler = sampler_with(
            ScriptedLight::new(&[Ok(320.0)]),
            good_air(),
            moisture,
            Vec::new(),
            HardwareRevision::Rev04,
        );

        let sample = block_on(sampler.acquire(ts()));
        assert!(!sample.error);
        match sample.soil {
            SoilMoisture::Capacitive { channels } => {
                assert_eq!(channels, [1800.0, 1820.0, 1790.0, 1810.0]);
            }
            _ => panic!("expected capacitive soil data"),
        }
        assert_eq!(sample.soil_moisture(), 1805.0);
    }

    #[test]
    fn test_capacitive_channel_failure_zeroes_and_flags() {
        let moisture = FixedMoisture {
            kind: MoistureKind::Capacitive,
            channels: [Ok(1800.0), Err(SensorError::Bus), Ok(1790.0), Ok(1810.0)],
        };
        let mut sampler = sampler_with(
            ScriptedLight::new(&[Ok(320.0)]),
            good_air(),
            moisture,
            Vec::new(),
            HardwareRevision::Rev04,
        );

        let sample = block_on(sampler.acquire(ts()));
        assert!(sample.error);
        match sample.soil {
            SoilMoisture::Capacitive { channels } => assert_eq!(channels[1], 0.0),
            _ => panic!("expected capacitive soil data"),
        }
    }

    #[test]
    fn test_probe_failure_zeroes_without_flag() {
        let mut probes: Vec<FixedProbe, MAX_SOIL_PROBES> = Vec::new();
        probes.push(FixedProbe(Ok(18.5))).ok().unwrap();
        probes.push(FixedProbe(Err(SensorError::NoResponse))).ok().unwrap();

        let mut sampler = sampler_with(
            ScriptedLight::new(&[Ok(320.0)]),
            good_air(),
            resistive(1800.0),
            probes,
            HardwareRevision::Rev04,
        );

        let sample = block_on(sampler.acquire(ts()));
        assert!(!sample.error, "probe failures must not flag the sample");
        assert_eq!(sample.soil_probe_count, 2);
        assert_eq!(sample.soil_temperatures[0], 18.5);
        assert_eq!(sample.soil_temperatures[1], 0.0);
    }

    #[test]
    fn test_timestamp_is_applied() {
        let mut sampler = sampler_with(
            ScriptedLight::new(&[Ok(320.0)]),
            good_air(),
            resistive(1800.0),
            Vec::new(),
            HardwareRevision::Rev03,
        );
        let sample = block_on(sampler.acquire(ts()));
        assert_eq!(sample.timestamp, ts());
    }
}

