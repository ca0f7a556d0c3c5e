//! Constant-memory historical store with two time resolutions.
//!
//! A 1440-slot minute ring covers the last 24 hours and a 30-slot daily
//! ring covers the last ~30 days. Both buffers are allocated once at
//! construction and owned exclusively by the store; the protocol engine and
//! the decision engine only ever borrow read-only views.
//!
//! Daily slots are addressed by the date hash `(month*31 + day) % 30`. Two
//! dates more than 30 days apart can collide; the newer date overwrites the
//! older one, which is acceptable because retention is 30 days anyway.

extern crate alloc;
use alloc::vec::Vec;

use log::debug;
use thiserror_no_std::Error;

use super::record::{DailySummary, MinuteSlot, Sample};
use crate::clock::{Date, Timestamp};

/// Number of minute-resolution slots (24 hours).
pub const MINUTE_SLOTS: usize = 1440;

/// Number of daily-summary slots (~30 days).
pub const DAILY_SLOTS: usize = 30;

/// Samples a day needs before its summary counts as complete (≈ 20 hours).
pub const DAILY_COMPLETE_THRESHOLD: u16 = 1200;

/// Minute slots older than this are dropped by [`RingStore::cleanup`].
pub const MINUTE_RETENTION_SECS: u32 = 24 * 3600;

/// Daily slots older than this many days are dropped by cleanup.
pub const DAILY_RETENTION_DAYS: i64 = 30;

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreError {
    /// A query argument was outside its documented range.
    #[error("argument out of range")]
    InvalidArgument,
}

/// Counters and bounds for the store-status characteristic.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct StoreStats {
    pub valid_minutes: u32,
    pub complete_days: u32,
    pub oldest: Option<Timestamp>,
    pub newest: Option<Timestamp>,
    /// Total inserts since boot, monotonic.
    pub insert_count: u32,
}

#[derive(Debug, Clone, Copy)]
struct DailySlot {
    summary: DailySummary,
    valid: bool,
}

/// Minute ring plus daily-summary ring. See module docs for addressing.
pub struct RingStore {
    minutes: Vec<MinuteSlot>,
    daily: Vec<DailySlot>,
    /// Next minute slot to write, advances modulo [`MINUTE_SLOTS`].
    write_idx: usize,
    insert_count: u32,
}

impl Default for RingStore {
    fn default() -> Self {
        Self::new()
    }
}

impl RingStore {
    /// Allocate both buffers. Roughly 130 KiB on the device heap.
    pub fn new() -> Self {
        let mut minutes = Vec::new();
        minutes.resize_with(MINUTE_SLOTS, MinuteSlot::default);
        let mut daily = Vec::new();
        daily.resize_with(DAILY_SLOTS, || DailySlot {
            summary: DailySummary::default(),
            valid: false,
        });
        Self {
            minutes,
            daily,
            write_idx: 0,
            insert_count: 0,
        }
    }

    /// Insert one composite sample and refresh the matching daily summary.
    ///
    /// A sample whose minute duplicates the most recently stored minute
    /// overwrites it in place instead of consuming a new slot. Erroneous
    /// samples are stored like any other; their zeroed fields flow into the
    /// daily aggregates, so the error flag on the sample is the only
    /// validity signal.
    pub fn insert(&mut self, sample: Sample) {
        let prev = (self.write_idx + MINUTE_SLOTS - 1) % MINUTE_SLOTS;
        let duplicate = self.minutes[prev].valid
            && self.minutes[prev].sample.timestamp.minute_key() == sample.timestamp.minute_key();

        let idx = if duplicate {
            debug!("duplicate minute, overwriting slot {}", prev);
            prev
        } else {
            let idx = self.write_idx;
            self.write_idx = (self.write_idx + 1) % MINUTE_SLOTS;
            idx
        };

        self.minutes[idx] = MinuteSlot { sample, valid: true };
        self.insert_count = self.insert_count.wrapping_add(1);
        self.recompute_daily(sample.timestamp.date());
    }

    /// The most recently inserted sample, if any.
    pub fn get_latest_minute(&self) -> Option<&Sample> {
        let idx = (self.write_idx + MINUTE_SLOTS - 1) % MINUTE_SLOTS;
        let slot = &self.minutes[idx];
        slot.valid.then_some(&slot.sample)
    }

    /// Look up the sample recorded in the calendar minute of `ts`.
    pub fn get_at_minute(&self, ts: Timestamp) -> Option<&Sample> {
        let wanted = ts.calendar();
        self.minutes
            .iter()
            .filter(|slot| slot.valid)
            .map(|slot| &slot.sample)
            .find(|sample| sample.timestamp.calendar().same_minute(&wanted))
    }

    /// Samples younger than `hours` (1..=24) at the time `now`.
    ///
    /// Output order follows buffer order, not time order; callers that need
    /// chronology sort the result. That also makes the query robust to the
    /// brief out-of-order window after a clock step.
    pub fn get_recent_minutes(
        &self,
        hours: u32,
        now: Timestamp,
    ) -> Result<Vec<Sample>, StoreError> {
        if !(1..=24).contains(&hours) {
            return Err(StoreError::InvalidArgument);
        }
        let horizon = hours * 3600;
        Ok(self
            .minutes
            .iter()
            .filter(|slot| slot.valid && now.secs_since(slot.sample.timestamp) < horizon)
            .map(|slot| slot.sample)
            .collect())
    }

    /// The complete summary for `date`, if one is stored.
    pub fn get_daily_summary(&self, date: Date) -> Option<&DailySummary> {
        self.daily
            .iter()
            .filter(|slot| slot.valid && slot.summary.complete)
            .map(|slot| &slot.summary)
            .find(|summary| summary.date == date)
    }

    /// The most recent `n` (1..=30) complete summaries, oldest first.
    pub fn get_recent_daily_summaries(
        &self,
        n: usize,
    ) -> Result<Vec<DailySummary>, StoreError> {
        if !(1..=DAILY_SLOTS).contains(&n) {
            return Err(StoreError::InvalidArgument);
        }
        let mut summaries: Vec<DailySummary> = self
            .daily
            .iter()
            .filter(|slot| slot.valid && slot.summary.complete)
            .map(|slot| slot.summary)
            .collect();
        summaries.sort_unstable_by_key(|s| s.date);
        let skip = summaries.len().saturating_sub(n);
        summaries.drain(..skip);
        Ok(summaries)
    }

    pub fn get_stats(&self) -> StoreStats {
        let mut stats = StoreStats {
            insert_count: self.insert_count,
            ..StoreStats::default()
        };
        for slot in self.minutes.iter().filter(|slot| slot.valid) {
            stats.valid_minutes += 1;
            let ts = slot.sample.timestamp;
            stats.oldest = Some(stats.oldest.map_or(ts, |o| o.min(ts)));
            stats.newest = Some(stats.newest.map_or(ts, |n| n.max(ts)));
        }
        stats.complete_days = self
            .daily
            .iter()
            .filter(|slot| slot.valid && slot.summary.complete)
            .count() as u32;
        stats
    }

    /// Drop minute slots older than 24 h and daily slots older than 30 d.
    pub fn cleanup(&mut self, now: Timestamp) {
        let mut dropped = 0usize;
        for slot in &mut self.minutes {
            if slot.valid && now.secs_since(slot.sample.timestamp) >= MINUTE_RETENTION_SECS {
                slot.valid = false;
                dropped += 1;
            }
        }
        let today = now.date().day_number();
        for slot in &mut self.daily {
            if slot.valid && today - slot.summary.date.day_number() >= DAILY_RETENTION_DAYS {
                slot.valid = false;
                dropped += 1;
            }
        }
        if dropped > 0 {
            debug!("cleanup dropped {} expired slots", dropped);
        }
    }

    /// Reset both buffers and all indices.
    pub fn clear_all(&mut self) {
        for slot in &mut self.minutes {
            slot.valid = false;
        }
        for slot in &mut self.daily {
            slot.valid = false;
        }
        self.write_idx = 0;
        self.insert_count = 0;
    }

    /// Date-hash index of a daily slot.
    fn daily_index(date: Date) -> usize {
        (date.month as usize * 31 + date.day as usize) % DAILY_SLOTS
    }

    /// Rebuild the daily summary for `date` from the minute buffer.
    ///
    /// O(1440) per insert, which is fine at minute cadence. Statistics come
    /// only from minute slots whose date matches; a different date already
    /// occupying the hashed slot is dropped.
    fn recompute_daily(&mut self, date: Date) {
        let mut count: u32 = 0;
        let mut temp = Aggregate::new();
        let mut moisture = Aggregate::new();
        let mut soil_temp = Aggregate::new();
        let mut humidity_sum = 0.0f64;
        let mut lux_sum = 0.0f64;

        for slot in self.minutes.iter().filter(|slot| slot.valid) {
            let sample = &slot.sample;
            if sample.timestamp.date() != date {
                continue;
            }
            count += 1;
            temp.add(sample.air_temperature);
            moisture.add(sample.soil_moisture());
            humidity_sum += sample.air_humidity as f64;
            lux_sum += sample.lux as f64;
            for probe in 0..sample.soil_probe_count as usize {
                soil_temp.add(sample.soil_temperatures[probe]);
            }
        }

        if count == 0 {
            return;
        }

        let summary = DailySummary {
            date,
            valid_samples: count.min(u16::MAX as u32) as u16,
            temperature_min: temp.min,
            temperature_avg: temp.mean(),
            temperature_max: temp.max,
            humidity_avg: (humidity_sum / count as f64) as f32,
            lux_avg: (lux_sum / count as f64) as f32,
            moisture_min: moisture.min,
            moisture_avg: moisture.mean(),
            moisture_max: moisture.max,
            soil_temperature_min: if soil_temp.count > 0 { soil_temp.min } else { 0.0 },
            soil_temperature_avg: soil_temp.mean(),
            soil_temperature_max: if soil_temp.count > 0 { soil_temp.max } else { 0.0 },
            complete: count >= DAILY_COMPLETE_THRESHOLD as u32,
        };

        self.daily[Self::daily_index(date)] = DailySlot { summary, valid: true };
    }
}

/// Running min/mean/max over f32 readings.
struct Aggregate {
    min: f32,
    max: f32,
    sum: f64,
    count: u32,
}

impl Aggregate {
    fn new() -> Self {
        Self {
            min: f32::MAX,
            max: f32::MIN,
            sum: 0.0,
            count: 0,
        }
    }

    fn add(&mut self, value: f32) {
        self.min = self.min.min(value);
        self.max = self.max.max(value);
        self.sum += value as f64;
        self.count += 1;
    }

    fn mean(&self) -> f32 {
        if self.count == 0 {
            0.0
        } else {
            (self.sum / self.count as f64) as f32
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sensors::HardwareRevision;
    use crate::storage::record::SoilMoisture;

    fn sample_at(ts: Timestamp, moisture_mv: f32) -> Sample {
        Sample {
            timestamp: ts,
            lux: 100.0,
            air_temperature: 21.0,
            air_humidity: 50.0,
            soil: SoilMoisture::Resistive { millivolts: moisture_mv },
            soil_temperatures: [0.0; 4],
            soil_probe_count: 0,
            error: false,
            revision: HardwareRevision::Rev03,
        }
    }

    fn base_ts() -> Timestamp {
        Timestamp::from_calendar(2025, 1, 15, 0, 0, 0)
    }

    #[test]
    fn test_latest_minute_round_trip() {
        let mut store = RingStore::new();
        assert!(store.get_latest_minute().is_none());

        let sample = sample_at(base_ts(), 1800.0);
        store.insert(sample);
        assert_eq!(store.get_latest_minute(), Some(&sample));
    }

    #[test]
    fn test_duplicate_minute_overwrites_in_place() {
        let mut store = RingStore::new();
        let ts = base_ts();
        store.insert(sample_at(ts, 1000.0));
        // Same minute, two seconds later.
        store.insert(sample_at(Timestamp::from_secs(ts.secs + 2), 2000.0));

        let stats = store.get_stats();
        assert_eq!(stats.valid_minutes, 1, "second write must replace the first");
        assert_eq!(store.get_latest_minute().unwrap().soil_moisture(), 2000.0);
    }

    #[test]
    fn test_oldest_eviction_after_wrap() {
        let mut store = RingStore::new();
        let first = base_ts();
        let mut last = first;
        for i in 0..(MINUTE_SLOTS as u32 + 1) {
            last = Timestamp::from_secs(first.secs + i * 60);
            store.insert(sample_at(last, 1500.0));
        }

        let recent = store.get_recent_minutes(24, last).unwrap();
        assert_eq!(recent.len(), MINUTE_SLOTS);
        assert!(
            !recent.iter().any(|s| s.timestamp == first),
            "the first insert must have been evicted"
        );
    }

    #[test]
    fn test_get_at_minute() {
        let mut store = RingStore::new();
        let ts = Timestamp::from_calendar(2025, 1, 15, 12, 34, 0);
        store.insert(sample_at(ts, 1700.0));

        // Lookup with a different second in the same minute still matches.
        let probe = Timestamp::from_calendar(2025, 1, 15, 12, 34, 42);
        assert_eq!(store.get_at_minute(probe).unwrap().timestamp, ts);
        assert!(store
            .get_at_minute(Timestamp::from_calendar(2025, 1, 15, 12, 35, 0))
            .is_none());
    }

    #[test]
    fn test_recent_minutes_validates_hours() {
        let store = RingStore::new();
        assert_eq!(store.get_recent_minutes(0, base_ts()), Err(StoreError::InvalidArgument));
        assert_eq!(store.get_recent_minutes(25, base_ts()), Err(StoreError::InvalidArgument));
    }

    #[test]
    fn test_recent_minutes_filters_by_age() {
        let mut store = RingStore::new();
        let old = base_ts();
        let new = Timestamp::from_secs(old.secs + 3 * 3600);
        store.insert(sample_at(old, 1000.0));
        store.insert(sample_at(new, 1100.0));

        let within_one_hour = store.get_recent_minutes(1, new).unwrap();
        assert_eq!(within_one_hour.len(), 1);
        assert_eq!(within_one_hour[0].timestamp, new);

        let within_four = store.get_recent_minutes(4, new).unwrap();
        assert_eq!(within_four.len(), 2);
    }

    #[test]
    fn test_daily_summary_coherence() {
        let mut store = RingStore::new();
        let start = base_ts();
        let values = [1000.0f32, 2000.0, 3000.0];
        for (i, v) in values.iter().enumerate() {
            let mut s = sample_at(Timestamp::from_secs(start.secs + i as u32 * 60), *v);
            s.air_temperature = 20.0 + i as f32;
            store.insert(s);
        }

        // Not complete yet, so the public lookup hides it; check stats
        // instead and then force completeness.
        assert!(store.get_daily_summary(start.date()).is_none());

        for i in values.len() as u32..DAILY_COMPLETE_THRESHOLD as u32 {
            store.insert(sample_at(Timestamp::from_secs(start.secs + i * 60), 2000.0));
        }

        let summary = store.get_daily_summary(start.date()).expect("summary complete");
        assert_eq!(summary.valid_samples, DAILY_COMPLETE_THRESHOLD);
        assert_eq!(summary.moisture_min, 1000.0);
        assert_eq!(summary.moisture_max, 3000.0);
        assert_eq!(summary.temperature_min, 20.0);
        assert_eq!(summary.temperature_max, 22.0);
        assert_eq!(summary.humidity_avg, 50.0);
        assert!(summary.complete);
    }

    #[test]
    fn test_daily_summary_no_cross_day_bleed() {
        let mut store = RingStore::new();
        let day1 = Timestamp::from_calendar(2025, 1, 15, 23, 58, 0);
        let day2 = Timestamp::from_calendar(2025, 1, 16, 0, 1, 0);
        store.insert(sample_at(day1, 1000.0));
        store.insert(sample_at(day2, 3000.0));

        // Summaries are incomplete, so inspect via recompute effects on
        // stats: two distinct days were written.
        let stats = store.get_stats();
        assert_eq!(stats.valid_minutes, 2);
        assert_eq!(stats.oldest, Some(day1));
        assert_eq!(stats.newest, Some(day2));
    }

    #[test]
    fn test_daily_hash_collision_keeps_newer() {
        // (1*31 + 16) % 30 == (2*31 + 15) % 30 == 17: Jan 16 and Feb 15
        // collide.
        assert_eq!(
            RingStore::daily_index(Date::new(2025, 1, 16)),
            RingStore::daily_index(Date::new(2025, 2, 15))
        );

        let mut store = RingStore::new();
        let jan = Timestamp::from_calendar(2025, 1, 16, 0, 0, 0);
        for i in 0..DAILY_COMPLETE_THRESHOLD as u32 {
            store.insert(sample_at(Timestamp::from_secs(jan.secs + i * 60), 1500.0));
        }
        assert!(store.get_daily_summary(jan.date()).is_some());

        // A month later the colliding date takes the slot; the January
        // summary is dropped.
        let feb = Timestamp::from_calendar(2025, 2, 15, 0, 0, 0);
        for i in 0..DAILY_COMPLETE_THRESHOLD as u32 {
            store.insert(sample_at(Timestamp::from_secs(feb.secs + i * 60), 1500.0));
        }
        assert!(store.get_daily_summary(jan.date()).is_none());
        assert!(store.get_daily_summary(feb.date()).is_some());
    }

    #[test]
    fn test_recent_daily_summaries_sorted_ascending() {
        let mut store = RingStore::new();
        // Build complete summaries for three consecutive days, inserted in
        // scrambled order.
        for day in [16u8, 15, 17] {
            let start = Timestamp::from_calendar(2025, 1, day, 0, 0, 0);
            for i in 0..DAILY_COMPLETE_THRESHOLD as u32 {
                store.insert(sample_at(Timestamp::from_secs(start.secs + i * 60), 1500.0));
            }
        }

        let recent = store.get_recent_daily_summaries(2).unwrap();
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].date, Date::new(2025, 1, 16));
        assert_eq!(recent[1].date, Date::new(2025, 1, 17));

        assert!(store.get_recent_daily_summaries(0).is_err());
        assert!(store.get_recent_daily_summaries(31).is_err());
    }

    #[test]
    fn test_cleanup_expires_old_slots() {
        let mut store = RingStore::new();
        let old = base_ts();
        store.insert(sample_at(old, 1000.0));

        let much_later = Timestamp::from_secs(old.secs + MINUTE_RETENTION_SECS);
        store.cleanup(much_later);
        assert_eq!(store.get_stats().valid_minutes, 0);
    }

    #[test]
    fn test_clear_all_resets_everything() {
        let mut store = RingStore::new();
        store.insert(sample_at(base_ts(), 1000.0));
        store.clear_all();

        let stats = store.get_stats();
        assert_eq!(stats.valid_minutes, 0);
        assert_eq!(stats.complete_days, 0);
        assert_eq!(stats.insert_count, 0);
        assert!(store.get_latest_minute().is_none());
    }

    #[test]
    fn test_error_sample_is_stored() {
        let mut store = RingStore::new();
        let mut s = sample_at(base_ts(), 0.0);
        s.error = true;
        s.lux = 0.0;
        store.insert(s);
        assert!(store.get_latest_minute().unwrap().error);
    }
}
