//! Plant-condition decision engine.
//!
//! Combines the latest composite sample, a short sliding window of recent
//! minutes (watering-event detection) and multi-day aggregate statistics
//! (prolonged-dryness detection) into a single classification. The engine is
//! state-aware: the previously emitted condition participates in two rules
//! and is the fallback when nothing else matches.
//!
//! Raw moisture values are inverted relative to intuition: a higher reading
//! means drier soil, in millivolts and picofarads alike. A sudden *drop*
//! therefore indicates water being added.

use log::debug;

use crate::config::PlantProfile;
use crate::storage::{DailySummary, Sample};

/// Samples the watering-event window needs before rule 4 applies.
const WATERING_WINDOW: usize = 3;

/// Output of one classification pass. Exactly one condition is active.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlantCondition {
    SoilDry,
    SoilWet,
    NeedsWatering,
    WateringCompleted,
    TempTooHigh,
    TempTooLow,
    Error,
}

impl PlantCondition {
    pub const fn label(self) -> &'static str {
        match self {
            Self::SoilDry => "soil dry",
            Self::SoilWet => "soil wet",
            Self::NeedsWatering => "needs watering",
            Self::WateringCompleted => "watering completed",
            Self::TempTooHigh => "temperature too high",
            Self::TempTooLow => "temperature too low",
            Self::Error => "error",
        }
    }
}

/// Inputs for one classification pass.
///
/// `recent` is the recent-minutes window sorted oldest-first by the caller;
/// the store itself does not guarantee order. `summaries` is sorted
/// oldest-first as returned by the store.
#[derive(Debug, Clone, Copy)]
pub struct DecisionInputs<'a> {
    pub latest: Option<&'a Sample>,
    pub recent: &'a [Sample],
    pub summaries: &'a [DailySummary],
}

/// State-aware classifier. One instance lives for the whole uptime.
pub struct DecisionEngine {
    previous: PlantCondition,
}

impl Default for DecisionEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl DecisionEngine {
    /// The previous state starts as `SoilWet` at boot. A device booting
    /// into long-dry soil therefore cannot take the rule-5 shortcut on its
    /// first pass; this mirrors the behaviour the protocol clients expect.
    pub fn new() -> Self {
        Self {
            previous: PlantCondition::SoilWet,
        }
    }

    /// The condition emitted by the last call to [`classify`].
    ///
    /// [`classify`]: Self::classify
    pub const fn previous(&self) -> PlantCondition {
        self.previous
    }

    /// Run the first-match rule chain and memoise the result.
    pub fn classify(&mut self, profile: &PlantProfile, inputs: DecisionInputs<'_>) -> PlantCondition {
        let condition = self.evaluate(profile, &inputs);
        if condition != self.previous {
            debug!(
                "condition changed: {} -> {}",
                self.previous.label(),
                condition.label()
            );
        }
        self.previous = condition;
        condition
    }

    fn evaluate(&self, profile: &PlantProfile, inputs: &DecisionInputs<'_>) -> PlantCondition {
        // Rule 1: no usable sample.
        let Some(latest) = inputs.latest else {
            return PlantCondition::Error;
        };
        if latest.error {
            return PlantCondition::Error;
        }

        // Rules 2 and 3: temperature limits dominate everything else.
        if latest.air_temperature >= profile.temperature_high {
            return PlantCondition::TempTooHigh;
        }
        if latest.air_temperature <= profile.temperature_low {
            return PlantCondition::TempTooLow;
        }

        let moisture = latest.soil_moisture();

        // Rule 4: a sharp moisture drop within the recent window means a
        // watering event just happened. Needs at least three samples.
        if inputs.recent.len() >= WATERING_WINDOW {
            let window = &inputs.recent[inputs.recent.len() - WATERING_WINDOW..];
            let before = window[0].soil_moisture();
            let current = window[WATERING_WINDOW - 1].soil_moisture();
            if before - current >= profile.watering_delta {
                return PlantCondition::WateringCompleted;
            }
        }

        // Rule 5: we asked for water and the soil is now wet.
        if matches!(
            self.previous,
            PlantCondition::SoilDry | PlantCondition::NeedsWatering
        ) && moisture <= profile.wet_threshold
        {
            return PlantCondition::WateringCompleted;
        }

        // Rule 6: enough consecutive dry days trigger the advisory. Count
        // backwards from the most recent summary.
        let consecutive_dry = inputs
            .summaries
            .iter()
            .rev()
            .take_while(|s| s.complete && s.moisture_avg >= profile.dry_threshold)
            .count();
        if profile.dry_days > 0 && consecutive_dry >= profile.dry_days as usize {
            return PlantCondition::NeedsWatering;
        }

        // Rules 7 and 8: instantaneous thresholds.
        if moisture >= profile.dry_threshold {
            return PlantCondition::SoilDry;
        }
        if moisture <= profile.wet_threshold {
            return PlantCondition::SoilWet;
        }

        // Rule 9: hysteresis.
        self.previous
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::{Date, Timestamp};
    use crate::sensors::HardwareRevision;
    use crate::storage::SoilMoisture;

    fn profile() -> PlantProfile {
        PlantProfile::factory_default(HardwareRevision::Rev03)
    }

    fn sample(moisture_mv: f32, temperature: f32) -> Sample {
        Sample {
            timestamp: Timestamp::from_calendar(2025, 1, 15, 12, 0, 0),
            lux: 100.0,
            air_temperature: temperature,
            air_humidity: 50.0,
            soil: SoilMoisture::Resistive { millivolts: moisture_mv },
            soil_temperatures: [0.0; 4],
            soil_probe_count: 0,
            error: false,
            revision: HardwareRevision::Rev03,
        }
    }

    fn dry_summary(day: u8, moisture_avg: f32) -> DailySummary {
        DailySummary {
            date: Date::new(2025, 1, day),
            valid_samples: 1300,
            moisture_avg,
            complete: true,
            ..DailySummary::default()
        }
    }

    #[test]
    fn test_missing_sample_is_error() {
        let mut engine = DecisionEngine::new();
        let inputs = DecisionInputs { latest: None, recent: &[], summaries: &[] };
        assert_eq!(engine.classify(&profile(), inputs), PlantCondition::Error);
    }

    #[test]
    fn test_erroneous_sample_is_error() {
        let mut engine = DecisionEngine::new();
        let mut s = sample(1800.0, 22.0);
        s.error = true;
        let inputs = DecisionInputs { latest: Some(&s), recent: &[], summaries: &[] };
        assert_eq!(engine.classify(&profile(), inputs), PlantCondition::Error);
    }

    #[test]
    fn test_high_temperature_dominates_moisture_rules() {
        let mut engine = DecisionEngine::new();
        // Bone-dry soil, but the temperature limit fires first regardless
        // of state history.
        let s = sample(4000.0, 35.0);
        let inputs = DecisionInputs { latest: Some(&s), recent: &[], summaries: &[] };
        assert_eq!(engine.classify(&profile(), inputs), PlantCondition::TempTooHigh);
    }

    #[test]
    fn test_low_temperature_limit() {
        let mut engine = DecisionEngine::new();
        let s = sample(1800.0, 10.0);
        let inputs = DecisionInputs { latest: Some(&s), recent: &[], summaries: &[] };
        assert_eq!(engine.classify(&profile(), inputs), PlantCondition::TempTooLow);
    }

    #[test]
    fn test_watering_event_detection() {
        let mut engine = DecisionEngine::new();
        let delta = profile().watering_delta;
        let window = [
            sample(4000.0, 22.0),
            sample(4000.0, 22.0),
            sample(4000.0 - delta, 22.0),
        ];
        let inputs = DecisionInputs {
            latest: Some(&window[2]),
            recent: &window,
            summaries: &[],
        };
        assert_eq!(
            engine.classify(&profile(), inputs),
            PlantCondition::WateringCompleted
        );
    }

    #[test]
    fn test_watering_event_needs_three_samples() {
        let mut engine = DecisionEngine::new();
        let delta = profile().watering_delta;
        let window = [sample(4000.0, 22.0), sample(4000.0 - delta, 22.0)];
        let inputs = DecisionInputs {
            latest: Some(&window[1]),
            recent: &window,
            summaries: &[],
        };
        // With only two samples the rule is skipped; the value is above the
        // dry threshold, so the soil classifies as dry.
        assert_eq!(engine.classify(&profile(), inputs), PlantCondition::SoilDry);
    }

    #[test]
    fn test_wet_after_dry_completes_watering() {
        let mut engine = DecisionEngine::new();
        let p = profile();

        let dry = sample(p.dry_threshold + 100.0, 22.0);
        let inputs = DecisionInputs { latest: Some(&dry), recent: &[], summaries: &[] };
        assert_eq!(engine.classify(&p, inputs), PlantCondition::SoilDry);

        let wet = sample(p.wet_threshold - 100.0, 22.0);
        let inputs = DecisionInputs { latest: Some(&wet), recent: &[], summaries: &[] };
        assert_eq!(engine.classify(&p, inputs), PlantCondition::WateringCompleted);
    }

    #[test]
    fn test_boot_state_blocks_rule_five() {
        // Fresh engine: previous is SoilWet, so wet soil is just wet, not a
        // completed watering.
        let mut engine = DecisionEngine::new();
        let p = profile();
        let wet = sample(p.wet_threshold - 100.0, 22.0);
        let inputs = DecisionInputs { latest: Some(&wet), recent: &[], summaries: &[] };
        assert_eq!(engine.classify(&p, inputs), PlantCondition::SoilWet);
    }

    #[test]
    fn test_needs_watering_after_consecutive_dry_days() {
        let mut engine = DecisionEngine::new();
        let p = profile();
        let summaries = [
            dry_summary(13, p.dry_threshold + 200.0),
            dry_summary(14, p.dry_threshold + 300.0),
            dry_summary(15, p.dry_threshold + 250.0),
        ];
        // Latest moisture exactly at the dry threshold.
        let s = sample(p.dry_threshold, 22.0);
        let inputs = DecisionInputs {
            latest: Some(&s),
            recent: &[],
            summaries: &summaries,
        };
        assert_eq!(engine.classify(&p, inputs), PlantCondition::NeedsWatering);
    }

    #[test]
    fn test_wet_day_interrupts_dry_streak() {
        let mut engine = DecisionEngine::new();
        let p = profile();
        let summaries = [
            dry_summary(13, p.dry_threshold + 200.0),
            dry_summary(14, p.wet_threshold), // a watered day breaks the run
            dry_summary(15, p.dry_threshold + 250.0),
        ];
        let s = sample(p.dry_threshold, 22.0);
        let inputs = DecisionInputs {
            latest: Some(&s),
            recent: &[],
            summaries: &summaries,
        };
        // Only one trailing dry day, so the instantaneous rule wins.
        assert_eq!(engine.classify(&p, inputs), PlantCondition::SoilDry);
    }

    #[test]
    fn test_hysteresis_keeps_previous_state() {
        let mut engine = DecisionEngine::new();
        let p = profile();

        let dry = sample(p.dry_threshold + 100.0, 22.0);
        let inputs = DecisionInputs { latest: Some(&dry), recent: &[], summaries: &[] };
        assert_eq!(engine.classify(&p, inputs), PlantCondition::SoilDry);

        // Between the thresholds nothing matches; the engine holds.
        let mid = sample((p.dry_threshold + p.wet_threshold) / 2.0, 22.0);
        let inputs = DecisionInputs { latest: Some(&mid), recent: &[], summaries: &[] };
        assert_eq!(engine.classify(&p, inputs), PlantCondition::SoilDry);
        assert_eq!(engine.previous(), PlantCondition::SoilDry);
    }
}
