//! Application-wide shared state and event plumbing for terra
//!
//! The monitor runs three long-running cooperative tasks (sampling, analysis,
//! link host) that share the ring store, the active profile and the
//! configuration store. All sharing goes through [`Shared`], a blocking
//! mutex around a `RefCell`: lock sections are short and synchronous, no
//! task ever suspends while holding one.
//!
//! There are no process-wide singletons. Every channel and every `Shared`
//! value is constructed once at start-up and passed by reference to the
//! tasks that need it.

use core::cell::RefCell;

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::blocking_mutex::Mutex;
use embassy_sync::channel::Channel;
use embassy_sync::pubsub::PubSubChannel;

use crate::storage::Sample;

/// Shared mutable state guarded across cooperative tasks.
///
/// Handlers and task steps borrow the inner value for the duration of a
/// single synchronous operation; the borrow is released before the next
/// suspension point.
pub type Shared<T> = Mutex<CriticalSectionRawMutex, RefCell<T>>;

/// Convenience constructor for a [`Shared`] cell.
pub fn shared<T>(value: T) -> Shared<T> {
    Mutex::new(RefCell::new(value))
}

/// Capacity of a tick mailbox.
///
/// A capacity of one gives the coalescing behaviour the scheduler requires:
/// a tick posted while the previous one is still being processed fails
/// `try_send` and is dropped, which is acceptable at minute granularity.
pub const TICK_MAILBOX_CAPACITY: usize = 1;

/// Mailbox a periodic timer posts into to wake a task.
pub type TickMailbox = Channel<CriticalSectionRawMutex, Tick, TICK_MAILBOX_CAPACITY>;

/// A single timer tick. Carries no payload; the woken task reads the clock.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Tick;

/// Number of subscribers to sample events.
/// - Subscriber 0: link adapter (sensor-data notifications)
/// - Subscriber 1: analysis task (optional early wake)
pub const SAMPLE_EVENT_SUBSCRIBERS: usize = 2;

/// Number of publishers of sample events (just the sampling task).
pub const SAMPLE_EVENT_PUBLISHERS: usize = 1;

/// Capacity of the sample event channel.
pub const SAMPLE_EVENT_CAPACITY: usize = 4;

/// Events published by the sampling task after each completed tick.
#[derive(Debug, Clone, Copy)]
pub enum SampleEvent {
    /// A composite sample was acquired and inserted into the ring store.
    Inserted(Sample),
}

/// Pub-sub channel for sample events.
pub type SampleEvents = PubSubChannel<
    CriticalSectionRawMutex,
    SampleEvent,
    SAMPLE_EVENT_CAPACITY,
    SAMPLE_EVENT_SUBSCRIBERS,
    SAMPLE_EVENT_PUBLISHERS,
>;

/// Publisher half used by the sampling task.
pub type SampleEventPublisher<'a> = embassy_sync::pubsub::Publisher<
    'a,
    CriticalSectionRawMutex,
    SampleEvent,
    SAMPLE_EVENT_CAPACITY,
    SAMPLE_EVENT_SUBSCRIBERS,
    SAMPLE_EVENT_PUBLISHERS,
>;

/// Boot progression of the whole device.
///
/// Link-init failure is not fatal: sensing and the indicator keep running in
/// `Degraded`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Booting,
    LinkConnecting,
    TimeSyncing,
    Running,
    Degraded,
}

impl RunState {
    /// Short label for log lines.
    pub const fn label(self) -> &'static str {
        match self {
            Self::Booting => "booting",
            Self::LinkConnecting => "link-connecting",
            Self::TimeSyncing => "time-syncing",
            Self::Running => "running",
            Self::Degraded => "degraded",
        }
    }
}
