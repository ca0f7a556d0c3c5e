//! Desktop simulator for the terra-rs plant monitor.
//!
//! Wires terra-core to synthetic sensors, a host-backed clock, a
//! file-backed key-value store, a console indicator and a loopback link
//! transport, then runs an accelerated scenario end-to-end: boot with an
//! empty namespace (factory-default recovery), a drying-out curve with a
//! watering event, and a scripted set of command frames through the
//! protocol engine.
//!
//! Run with `RUST_LOG=debug` for per-tick detail.

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::rc::Rc;
use std::str::FromStr;

use embassy_futures::block_on;
use log::{error, info, warn};

use terra_core::app_state::{shared, RunState, SampleEvents, Shared};
use terra_core::clock::{Clock, ClockError, PosixTz, Timestamp, WireTime};
use terra_core::config::{
    ConfigStore, KvError, KvStore, LinkCredentials, PlantProfile, DEFAULT_TIMEZONE,
};
use terra_core::decision::DecisionEngine;
use terra_core::indicator::{ColourScheme, Indicator, Rgb};
use terra_core::link::{
    device_name, submit_command, CommandMailbox, LinkError, LinkTransport, SystemControl,
};
use terra_core::protocol::{
    CommandFrame, DeviceIdentity, ProtocolEngine, ResponseFrame, FIRMWARE_VERSION,
};
use terra_core::sensors::{
    AirReading, AirSensor, HardwareRevision, LightSensor, MoistureKind, MoistureSensor, Sampler,
    SensorError, SoilTemperatureProbe,
};
use terra_core::storage::RingStore;
use terra_core::tasks::{analysis_step, sampling_step};

use embedded_hal_async::delay::DelayNs;

/// Simulated minutes per run.
const SCENARIO_MINUTES: u32 = 180;

/// Minute at which the synthetic plant gets watered.
const WATERING_MINUTE: u32 = 170;

/// MAC the simulated radio reports.
const SIM_MAC: [u8; 6] = [0x24, 0x6f, 0x28, 0x9a, 0xb3, 0x7c];

// ---------------------------------------------------------------------------
// Simulated environment
// ---------------------------------------------------------------------------

/// Shared scenario state the mocks read from.
struct Environment {
    minute: u32,
}

type Env = Rc<RefCell<Environment>>;

/// Soil-moisture base value for a scenario minute: slow dry-out, then a
/// sharp drop when the plant is watered. Higher raw value = drier soil.
fn moisture_base(minute: u32) -> f32 {
    if minute < WATERING_MINUTE {
        900.0 + minute as f32 * 10.0
    } else {
        800.0
    }
}

struct SimLight {
    env: Env,
}

impl LightSensor for SimLight {
    async fn read_lux(&mut self) -> Result<f32, SensorError> {
        let t = self.env.borrow().minute as f32;
        Ok(200.0 + 150.0 * (t / 30.0).sin())
    }
}

struct SimAir {
    env: Env,
}

impl AirSensor for SimAir {
    async fn read(&mut self) -> Result<AirReading, SensorError> {
        let t = self.env.borrow().minute as f32;
        Ok(AirReading {
            temperature_c: 23.0 + 3.0 * (t / 120.0).sin(),
            humidity_pct: 50.0 + 10.0 * (t / 180.0).sin(),
        })
    }
}

struct SimMoisture {
    env: Env,
}

/// Small fixed skew per capacitive channel.
const CHANNEL_SKEW: [f32; 4] = [0.0, 15.0, -12.0, 8.0];

impl MoistureSensor for SimMoisture {
    fn kind(&self) -> MoistureKind {
        MoistureKind::Capacitive
    }

    async fn read_channel(&mut self, channel: usize) -> Result<f32, SensorError> {
        let base = moisture_base(self.env.borrow().minute);
        Ok(base + CHANNEL_SKEW[channel])
    }
}

struct SimProbe {
    offset: f32,
}

impl SoilTemperatureProbe for SimProbe {
    async fn read_celsius(&mut self) -> Result<f32, SensorError> {
        Ok(18.0 + self.offset)
    }
}

/// The scenario runs on simulated time; delays complete immediately.
struct AcceleratedDelay;

impl DelayNs for AcceleratedDelay {
    async fn delay_ns(&mut self, _ns: u32) {}
}

// ---------------------------------------------------------------------------
// Platform collaborators
// ---------------------------------------------------------------------------

/// Clock over simulated UTC seconds with a POSIX timezone applied.
struct SimClock {
    utc_secs: u32,
    tz: PosixTz,
    synchronised: bool,
}

impl SimClock {
    fn new(utc_secs: u32) -> Self {
        Self {
            utc_secs,
            tz: PosixTz::parse(DEFAULT_TIMEZONE).expect("default timezone parses"),
            synchronised: true,
        }
    }

    fn advance(&mut self, secs: u32) {
        self.utc_secs += secs;
    }
}

impl Clock for SimClock {
    fn now(&self) -> Timestamp {
        let offset = self.tz.offset_at(self.utc_secs);
        Timestamp::from_secs(self.utc_secs.saturating_add_signed(offset))
    }

    fn is_synchronised(&self) -> bool {
        self.synchronised
    }

    fn set_timezone(&mut self, tz: &str) -> Result<(), ClockError> {
        self.tz = PosixTz::parse(tz)?;
        Ok(())
    }
}

/// File-backed key-value namespace with atomic replace-on-write.
struct FileKv {
    path: PathBuf,
    map: BTreeMap<String, Vec<u8>>,
}

impl FileKv {
    fn open(path: &Path) -> Self {
        let map = fs::read(path)
            .ok()
            .and_then(|bytes| postcard::from_bytes(&bytes).ok())
            .unwrap_or_default();
        Self {
            path: path.to_path_buf(),
            map,
        }
    }

    fn flush(&self) -> Result<(), KvError> {
        let bytes = postcard::to_allocvec(&self.map).map_err(|_| KvError::Io)?;
        let tmp = self.path.with_extension("tmp");
        fs::write(&tmp, bytes).map_err(|_| KvError::Io)?;
        fs::rename(&tmp, &self.path).map_err(|_| KvError::Io)
    }
}

impl KvStore for FileKv {
    fn get(&mut self, key: &str, buf: &mut [u8]) -> Result<usize, KvError> {
        let value = self.map.get(key).ok_or(KvError::NotFound)?;
        let n = value.len().min(buf.len());
        buf[..n].copy_from_slice(&value[..n]);
        Ok(value.len())
    }

    fn set(&mut self, key: &str, value: &[u8]) -> Result<(), KvError> {
        self.map.insert(key.to_owned(), value.to_vec());
        self.flush()
    }

    fn remove(&mut self, key: &str) -> Result<(), KvError> {
        self.map.remove(key).ok_or(KvError::NotFound)?;
        self.flush()
    }
}

/// Indicator that logs colour transitions instead of driving a LED.
#[derive(Default)]
struct ConsoleIndicator {
    last: Option<Rgb>,
}

impl Indicator for ConsoleIndicator {
    fn set_colour(&mut self, colour: Rgb) {
        if self.last != Some(colour) {
            info!(
                "indicator -> #{:02x}{:02x}{:02x}",
                colour.r, colour.g, colour.b
            );
            self.last = Some(colour);
        }
    }
}

/// Loopback transport: counts notifications, keeps the last response.
#[derive(Default)]
struct LoopbackTransport {
    responses: Vec<Vec<u8>>,
    sample_notifications: usize,
    subscribed: bool,
}

impl LinkTransport for LoopbackTransport {
    fn deliver_response(&mut self, frame: &[u8]) -> Result<(), LinkError> {
        self.responses.push(frame.to_vec());
        Ok(())
    }

    fn notify_sample(&mut self, _payload: &[u8]) -> Result<(), LinkError> {
        if self.subscribed {
            self.sample_notifications += 1;
        }
        Ok(())
    }
}

/// Simulated system surface: uptime, heap numbers, link state.
struct SimSystem {
    env: Env,
    credentials: Option<LinkCredentials>,
    connected: bool,
    switch_on: bool,
}

impl SystemControl for SimSystem {
    fn uptime_secs(&self) -> u32 {
        self.env.borrow().minute * 60
    }

    fn heap_free_bytes(&self) -> u32 {
        151_264
    }

    fn heap_min_free_bytes(&self) -> u32 {
        118_932
    }

    fn task_count(&self) -> u32 {
        3
    }

    fn switch_state(&self) -> bool {
        self.switch_on
    }

    fn link_connected(&self) -> bool {
        self.connected
    }

    fn connected_ssid(&self) -> Option<heapless::String<32>> {
        self.connected
            .then(|| self.credentials.as_ref().map(|c| c.ssid.clone()))
            .flatten()
    }

    fn notifications_subscribed(&self) -> bool {
        true
    }

    fn credentials(&self) -> Option<LinkCredentials> {
        self.credentials.clone()
    }

    fn apply_link_config(&mut self, creds: &LinkCredentials) {
        self.credentials = Some(creds.clone());
    }

    fn request_link_connect(&mut self) {
        info!("link connect requested");
        self.connected = self.credentials.is_some();
    }

    fn request_link_disconnect(&mut self) {
        info!("link disconnect requested");
        self.connected = false;
    }

    fn request_time_sync(&mut self) {
        info!("time sync requested (already synchronised in simulation)");
    }

    fn request_reset(&mut self) {
        warn!("device reset requested; ignored by the simulator");
    }
}

// ---------------------------------------------------------------------------
// Command script
// ---------------------------------------------------------------------------

/// Command frames injected at fixed scenario minutes.
fn scripted_commands(minute: u32) -> Vec<Vec<u8>> {
    match minute {
        5 => vec![CommandFrame::encode(0x01, 1, &[])],
        6 => vec![CommandFrame::encode(0xff, 2, &[])],
        7 => {
            let creds = LinkCredentials {
                ssid: heapless::String::from_str("greenhouse").unwrap(),
                password: heapless::String::from_str("chlorophyll42").unwrap(),
            };
            vec![CommandFrame::encode(0x0d, 3, &creds.to_bytes())]
        }
        8 => vec![
            CommandFrame::encode(0x0f, 4, &[]),
            // Arrives while the first is still queued: dropped.
            CommandFrame::encode(0x13, 5, &[]),
        ],
        9 => vec![CommandFrame::encode(0x13, 6, &[])],
        10 => vec![CommandFrame::encode(0x0e, 7, &[])],
        12 => vec![CommandFrame::encode(0x02, 8, &[])],
        13 => vec![CommandFrame::encode(0x06, 9, &[])],
        15 => vec![CommandFrame::encode(0x10, 10, &[])],
        16 => vec![CommandFrame::encode(0x15, 11, b"CET-1CEST,M3.5.0,M10.5.0/3")],
        17 => vec![CommandFrame::encode(0x16, 12, &[])],
        _ => Vec::new(),
    }
}

fn log_response(raw: &[u8]) {
    match ResponseFrame::parse(raw) {
        Ok(response) => info!(
            "response id=0x{:02x} status={} seq={} len={}",
            response.response_id,
            response.status,
            response.sequence,
            response.data.len()
        ),
        Err(e) => error!("malformed response frame: {}", e),
    }
}

// ---------------------------------------------------------------------------
// Entry point
// ---------------------------------------------------------------------------

fn main() {
    env_logger::init();
    info!("starting terra-rs simulator");

    let kv_path = std::env::temp_dir().join("terra-sim-kv.bin");
    // Each run boots with an erased namespace to exercise default recovery.
    let _ = fs::remove_file(&kv_path);

    let env: Env = Rc::new(RefCell::new(Environment { minute: 0 }));
    let revision = HardwareRevision::Rev04;

    let mut run_state = RunState::Booting;
    info!("run state: {}", run_state.label());

    // --- Configuration -----------------------------------------------------
    let mut config_store = ConfigStore::new(FileKv::open(&kv_path));
    let profile = config_store.load_profile(revision);
    info!(
        "active profile: {} (dry >= {}, wet <= {}, {} dry days)",
        profile.name.as_str(),
        profile.dry_threshold,
        profile.wet_threshold,
        profile.dry_days
    );
    let timezone = config_store.load_timezone();

    // --- Shared state ------------------------------------------------------
    let boot_utc = Timestamp::from_calendar(2025, 6, 1, 0, 0, 0).secs;
    let mut boot_clock = SimClock::new(boot_utc);
    if let Err(e) = boot_clock.set_timezone(timezone.as_str()) {
        error!("persisted timezone rejected: {}", e);
    }

    let store: Shared<RingStore> = shared(RingStore::new());
    let config = shared(config_store);
    let active_profile: Shared<PlantProfile> = shared(profile);
    let clock = shared(boot_clock);
    let system = shared(SimSystem {
        env: env.clone(),
        credentials: None,
        connected: false,
        switch_on: false,
    });
    let transport = shared(LoopbackTransport {
        subscribed: true,
        ..LoopbackTransport::default()
    });

    let sample_events = SampleEvents::new();
    let sample_publisher = sample_events.publisher().expect("publisher available");
    let commands = CommandMailbox::new();

    // --- Sampler and protocol engine ---------------------------------------
    let mut probes: heapless::Vec<SimProbe, 4> = heapless::Vec::new();
    let _ = probes.push(SimProbe { offset: 0.2 });
    let _ = probes.push(SimProbe { offset: 0.4 });

    let mut sampler = Sampler::new(
        SimLight { env: env.clone() },
        SimAir { env: env.clone() },
        SimMoisture { env: env.clone() },
        probes,
        AcceleratedDelay,
        revision,
    );

    let identity = DeviceIdentity {
        name: device_name(revision, &SIM_MAC),
        firmware_version: FIRMWARE_VERSION,
        revision,
    };
    info!("advertising as {}", identity.name.as_str());

    let mut engine = ProtocolEngine::new(
        &store,
        &config,
        &active_profile,
        &clock,
        &system,
        identity,
        timezone,
    );

    let mut decision = DecisionEngine::new();
    let mut indicator = ConsoleIndicator::default();

    run_state = RunState::Running;
    info!("run state: {}", run_state.label());

    // --- Scenario loop ------------------------------------------------------
    for minute in 0..SCENARIO_MINUTES {
        env.borrow_mut().minute = minute;
        clock.lock(|cell| cell.borrow_mut().advance(60));

        block_on(sampling_step(
            &mut sampler,
            &clock,
            &store,
            &sample_publisher,
            &transport,
        ));

        let condition = analysis_step(
            &store,
            &active_profile,
            &mut decision,
            &clock,
            &mut indicator,
            ColourScheme::Gradient,
        );
        if minute % 30 == 0 || minute == WATERING_MINUTE {
            info!("minute {:3}: {}", minute, condition.label());
        }

        // Inject scripted traffic and drain the mailbox like the link-host
        // task does.
        for frame in scripted_commands(minute) {
            if !submit_command(&commands, &frame) {
                warn!("minute {:3}: command dropped (in flight)", minute);
            }
        }
        while let Ok(frame) = commands.try_receive() {
            if let Some(response) = engine.handle_frame(&frame) {
                log_response(&response);
                let _ = transport.lock(|cell| cell.borrow_mut().deliver_response(&response));
            }
        }
    }

    // One request after the run: read back a stored minute.
    let lookup = clock.lock(|cell| cell.borrow().now());
    let lookup = Timestamp::from_secs(lookup.secs - 30 * 60).calendar();
    let frame = CommandFrame::encode(0x0a, 20, &WireTime::from_calendar(&lookup).to_bytes());
    if submit_command(&commands, &frame) {
        while let Ok(frame) = commands.try_receive() {
            if let Some(response) = engine.handle_frame(&frame) {
                log_response(&response);
            }
        }
    }

    let stats = store.lock(|cell| cell.borrow().get_stats());
    let (responses, notifications) = transport.lock(|cell| {
        let transport = cell.borrow();
        (transport.responses.len(), transport.sample_notifications)
    });
    info!(
        "scenario done: {} inserts, {} valid minutes, {} complete days, {} responses, {} sample notifications",
        stats.insert_count, stats.valid_minutes, stats.complete_days, responses, notifications
    );
}
