//! The three long-running cooperative tasks.
//!
//! Each task blocks on its mailbox and runs one synchronous-ish step per
//! wake-up. The periodic timers live in the platform layer and post into
//! the tick mailboxes; because a mailbox holds at most one tick, a tick
//! that fires while the previous one is still being processed is coalesced
//! away rather than queued. A late tick is therefore never "caught up".
//!
//! Step functions are split out from the loops so the simulator and the
//! tests can drive them deterministically.

use log::{debug, info, warn};

use crate::app_state::{SampleEvent, SampleEventPublisher, Shared, TickMailbox};
use crate::clock::Clock;
use crate::config::{KvStore, PlantProfile};
use crate::decision::{DecisionEngine, DecisionInputs, PlantCondition};
use crate::indicator::{colour_for, ColourScheme, Indicator};
use crate::link::{CommandMailbox, LinkTransport, SystemControl};
use crate::protocol::ProtocolEngine;
use crate::sensors::{
    AirSensor, LightSensor, MoistureSensor, Sampler, SoilTemperatureProbe,
};
use crate::storage::{RingStore, DAILY_SLOTS};

use embedded_hal_async::delay::DelayNs;

/// Nominal sampling period. The platform timer is configured with this.
pub const SAMPLING_PERIOD_SECS: u32 = 60;

/// Nominal analysis period.
pub const ANALYSIS_PERIOD_SECS: u32 = 60;

/// One sampling pass: acquire, stamp, insert, notify.
pub async fn sampling_step<L, A, M, P, D, C, T>(
    sampler: &mut Sampler<L, A, M, P, D>,
    clock: &Shared<C>,
    store: &Shared<RingStore>,
    events: &SampleEventPublisher<'_>,
    transport: &Shared<T>,
) where
    L: LightSensor,
    A: AirSensor,
    M: MoistureSensor,
    P: SoilTemperatureProbe,
    D: DelayNs,
    C: Clock,
    T: LinkTransport,
{
    let now = clock.lock(|cell| cell.borrow().now());
    let sample = sampler.acquire(now).await;
    if sample.error {
        warn!("sample at {} acquired with sensor errors", now.secs);
    }

    store.lock(|cell| cell.borrow_mut().insert(sample));
    events.publish_immediate(SampleEvent::Inserted(sample));

    // Fire-and-forget: the transport drops the notification when nobody
    // subscribed.
    let payload = sample.to_bytes();
    if let Err(e) = transport.lock(|cell| cell.borrow_mut().notify_sample(&payload)) {
        debug!("sample notification not delivered: {}", e);
    }
}

/// Sampling task: wakes on the periodic tick, never on elapsed-time math.
pub async fn sampling_task<L, A, M, P, D, C, T>(
    ticks: &TickMailbox,
    sampler: &mut Sampler<L, A, M, P, D>,
    clock: &Shared<C>,
    store: &Shared<RingStore>,
    events: SampleEventPublisher<'_>,
    transport: &Shared<T>,
) where
    L: LightSensor,
    A: AirSensor,
    M: MoistureSensor,
    P: SoilTemperatureProbe,
    D: DelayNs,
    C: Clock,
    T: LinkTransport,
{
    info!("sampling task started");
    loop {
        ticks.receive().await;
        sampling_step(sampler, clock, store, &events, transport).await;
    }
}

/// One analysis pass: expire old slots, classify, drive the indicator.
pub fn analysis_step<C, I>(
    store: &Shared<RingStore>,
    active_profile: &Shared<PlantProfile>,
    engine: &mut DecisionEngine,
    clock: &Shared<C>,
    indicator: &mut I,
    scheme: ColourScheme,
) -> PlantCondition
where
    C: Clock,
    I: Indicator,
{
    let now = clock.lock(|cell| cell.borrow().now());
    let profile = active_profile.lock(|cell| cell.borrow().clone());

    let (latest, mut recent, summaries) = store.lock(|cell| {
        let mut store = cell.borrow_mut();
        store.cleanup(now);

        let latest = store.get_latest_minute().copied();
        let recent = store.get_recent_minutes(1, now).unwrap_or_default();
        let window = (profile.dry_days.max(1) as usize).min(DAILY_SLOTS);
        let summaries = store.get_recent_daily_summaries(window).unwrap_or_default();
        (latest, recent, summaries)
    });

    // The store does not guarantee order; the watering-window rule needs
    // chronology.
    recent.sort_unstable_by_key(|sample| sample.timestamp);

    let condition = engine.classify(
        &profile,
        DecisionInputs {
            latest: latest.as_ref(),
            recent: &recent,
            summaries: &summaries,
        },
    );

    let moisture = latest.as_ref().map(|sample| sample.soil_moisture());
    indicator.set_colour(colour_for(condition, moisture, &profile, scheme));
    condition
}

/// Analysis task: fixed-period loop querying the store and updating the
/// indicator.
pub async fn analysis_task<C, I>(
    ticks: &TickMailbox,
    store: &Shared<RingStore>,
    active_profile: &Shared<PlantProfile>,
    clock: &Shared<C>,
    mut indicator: I,
    scheme: ColourScheme,
) where
    C: Clock,
    I: Indicator,
{
    info!("analysis task started");
    let mut engine = DecisionEngine::new();
    loop {
        ticks.receive().await;
        let condition = analysis_step(
            store,
            active_profile,
            &mut engine,
            clock,
            &mut indicator,
            scheme,
        );
        debug!("analysis tick: {}", condition.label());
    }
}

/// Link-host task: drains the command mailbox through the protocol engine.
///
/// Responses are emitted strictly after the command that elicited them;
/// commands dropped by the mailbox produce nothing at all.
pub async fn link_host_task<K, C, S, T>(
    commands: &CommandMailbox,
    mut engine: ProtocolEngine<'_, K, C, S>,
    transport: &Shared<T>,
) where
    K: KvStore,
    C: Clock,
    S: SystemControl,
    T: LinkTransport,
{
    info!("link host task started");
    loop {
        let frame = commands.receive().await;
        if let Some(response) = engine.handle_frame(&frame) {
            if let Err(e) = transport.lock(|cell| cell.borrow_mut().deliver_response(&response)) {
                warn!("response delivery failed: {}", e);
            }
        }
    }
}
