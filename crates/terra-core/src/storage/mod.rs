//! Time-indexed historical store for composite samples.
//!
//! Two resolutions: a minute ring covering the last 24 hours and a daily
//! summary ring covering the last ~30 days. All structures use fixed-size
//! binary representations on the link.

mod record;
mod ring;

pub use record::{
    DailySummary, MinuteSlot, Sample, SoilMoisture, DATA_STRUCTURE_VERSION, SAMPLE_WIRE_SIZE,
};
pub use ring::{
    RingStore, StoreError, StoreStats, DAILY_COMPLETE_THRESHOLD, DAILY_RETENTION_DAYS,
    DAILY_SLOTS, MINUTE_RETENTION_SECS, MINUTE_SLOTS,
};
