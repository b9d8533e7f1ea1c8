//! The simulated ignition controller.
//!
//! Time is passed in rather than read, so every transition can be driven
//! from tests. Timed effects (glow completion, crank-to-run, sleep) are
//! applied lazily whenever the device is touched.

use std::time::{Duration, Instant};

use shared::{
    domain::IgnitionState,
    protocol::{ControlRequest, ControlResponse, DeviceStatus, OperationalState, SensorReadings},
};
use tracing::info;

const BASE_ENGINE_HOURS: f64 = 1234.0;
const LOW_BATTERY_VOLTS: f64 = 11.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceTiming {
    pub glow_plug: Duration,
    pub crank_to_run: Duration,
    pub sleep_timeout: Duration,
}

impl Default for DeviceTiming {
    fn default() -> Self {
        Self {
            glow_plug: Duration::from_secs(20),
            crank_to_run: Duration::from_millis(1500),
            sleep_timeout: Duration::from_secs(300),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Off,
    On,
    Glow,
    Cranking,
    Running,
}

#[derive(Debug)]
pub struct SimulatedDevice {
    timing: DeviceTiming,
    key: IgnitionState,
    phase: Phase,
    start_held: bool,
    glow_started: Option<Instant>,
    glow_complete: bool,
    crank_started: Option<Instant>,
    running_since: Option<Instant>,
    run_time: Duration,
    emergency_stop: bool,
    lights_on: bool,
    sleep_mode_enabled: bool,
    last_activity: Instant,
}

impl SimulatedDevice {
    pub fn new(timing: DeviceTiming, now: Instant) -> Self {
        Self {
            timing,
            key: IgnitionState::Off,
            phase: Phase::Off,
            start_held: false,
            glow_started: None,
            glow_complete: false,
            crank_started: None,
            running_since: None,
            run_time: Duration::ZERO,
            emergency_stop: false,
            lights_on: false,
            sleep_mode_enabled: false,
            last_activity: now,
        }
    }

    pub fn key(&self) -> IgnitionState {
        self.key
    }

    pub fn apply(&mut self, request: &ControlRequest, now: Instant) -> ControlResponse {
        self.advance(now);
        self.last_activity = now;

        match request {
            ControlRequest::KeyPosition { position } => {
                self.turn_key(IgnitionState::from_key_position(*position), now);
            }
            ControlRequest::KeyStartHold { held: true } => {
                self.turn_key(IgnitionState::Start, now);
            }
            ControlRequest::KeyStartHold { held: false } => self.release_start(now),
            ControlRequest::EmergencyStop => {
                info!("emergency stop: glow plugs and starter cut, key forced to ON");
                self.stop_crank(now);
                self.glow_started = None;
                self.start_held = false;
                self.key = IgnitionState::On;
                self.phase = Phase::On;
                self.emergency_stop = true;
            }
            ControlRequest::Lights => {
                if self.key == IgnitionState::Off {
                    return ControlResponse::rejected("Key must be ON to use work lights");
                }
                self.lights_on = !self.lights_on;
                info!(lights_on = self.lights_on, "work lights toggled");
            }
            ControlRequest::Horn => {
                if self.key == IgnitionState::Off {
                    return ControlResponse::rejected("Key must be ON to sound the horn");
                }
                info!("horn");
            }
            ControlRequest::ToggleSleepMode => {
                self.sleep_mode_enabled = !self.sleep_mode_enabled;
                info!(enabled = self.sleep_mode_enabled, "sleep mode toggled");
            }
            ControlRequest::SleepNow => {
                if !self.sleep_mode_enabled {
                    return ControlResponse::rejected("Sleep mode is disabled");
                }
                info!("sleep requested");
                self.power_down(now);
            }
        }
        ControlResponse::ok()
    }

    pub fn status(&mut self, now: Instant) -> DeviceStatus {
        self.advance(now);

        let state = if self.emergency_stop {
            OperationalState::EmergencyStop
        } else {
            match self.phase {
                Phase::Off => OperationalState::Off,
                Phase::On if self.glow_complete => OperationalState::Ready,
                Phase::On => OperationalState::On,
                Phase::Glow => OperationalState::GlowHeating,
                Phase::Cranking => OperationalState::Starting,
                Phase::Running => OperationalState::Running,
            }
        };
        let countdown = match (self.phase, self.glow_remaining(now)) {
            (Phase::Glow, Some(remaining)) => Some(ceil_secs(remaining)),
            _ => None,
        };
        let readings = self.readings(now);
        let idle_for = now.saturating_duration_since(self.last_activity);

        let mut status = DeviceStatus {
            state,
            key_position: Some(self.key.key_position()),
            countdown,
            glow_active: self.phase == Phase::Glow,
            glow_plugs_on: self.glow_remaining(now).is_some(),
            readings,
            lights_on: self.lights_on,
            sleep_mode_enabled: self.sleep_mode_enabled,
            time_since_activity: Some(idle_for.as_secs()),
            time_until_sleep: self
                .sleep_mode_enabled
                .then(|| self.timing.sleep_timeout.saturating_sub(idle_for).as_secs()),
            ..DeviceStatus::default()
        };
        status.warnings.low_battery =
            self.phase != Phase::Cranking && readings.battery_voltage < LOW_BATTERY_VOLTS;
        status
    }

    fn turn_key(&mut self, target: IgnitionState, now: Instant) {
        self.emergency_stop = false;
        let from = self.key;
        self.key = target;

        match target {
            IgnitionState::Off => self.power_down(now),
            IgnitionState::On => {
                self.start_held = false;
                match self.phase {
                    // glow keeps heating so the cycle can be resumed
                    Phase::Off | Phase::Glow => self.phase = Phase::On,
                    Phase::Cranking => {
                        self.stop_crank(now);
                        self.glow_started = None;
                        self.phase = Phase::On;
                    }
                    Phase::On | Phase::Running => {}
                }
            }
            IgnitionState::Glow => {
                self.start_held = false;
                if self.phase == Phase::Running {
                    return;
                }
                if self.glow_remaining(now).is_none() {
                    info!(seconds = self.timing.glow_plug.as_secs(), "starting glow plug cycle");
                    self.glow_started = Some(now);
                } else {
                    info!("resuming glow plug cycle");
                }
                self.glow_complete = false;
                self.phase = Phase::Glow;
            }
            IgnitionState::Start => {
                self.start_held = true;
                if self.phase == Phase::Cranking {
                    return;
                }
                if self.glow_started.is_none() && self.phase != Phase::Running {
                    // direct start from ON heats the plugs while cranking
                    self.glow_started = Some(now);
                }
                self.stop_crank(now);
                self.crank_started = Some(now);
                self.glow_complete = false;
                self.phase = Phase::Cranking;
                info!(from = ?from, "cranking");
            }
        }
    }

    fn release_start(&mut self, now: Instant) {
        if !self.start_held {
            return;
        }
        self.start_held = false;
        if self.key == IgnitionState::Start {
            self.key = IgnitionState::On;
        }
        if self.phase == Phase::Cranking {
            info!("start released before the engine caught");
            self.crank_started = None;
            self.glow_started = None;
            self.phase = Phase::On;
        }
        self.advance(now);
    }

    fn power_down(&mut self, now: Instant) {
        self.stop_crank(now);
        self.key = IgnitionState::Off;
        self.phase = Phase::Off;
        self.start_held = false;
        self.glow_started = None;
        self.glow_complete = false;
        self.lights_on = false;
        self.emergency_stop = false;
        info!("key off, all outputs de-energized");
    }

    fn stop_crank(&mut self, now: Instant) {
        self.crank_started = None;
        if let Some(since) = self.running_since.take() {
            self.run_time += now.saturating_duration_since(since);
        }
    }

    fn advance(&mut self, now: Instant) {
        if let Some(started) = self.glow_started {
            if now.saturating_duration_since(started) >= self.timing.glow_plug {
                self.glow_started = None;
                if self.phase == Phase::Glow {
                    info!("glow plug cycle complete, key returned to ON");
                    self.phase = Phase::On;
                    self.key = IgnitionState::On;
                    self.glow_complete = true;
                }
            }
        }

        if let Some(cranking) = self.crank_started {
            if self.start_held
                && now.saturating_duration_since(cranking) >= self.timing.crank_to_run
            {
                info!("engine running");
                self.crank_started = None;
                self.running_since = Some(cranking + self.timing.crank_to_run);
                self.phase = Phase::Running;
            }
        }

        if self.sleep_mode_enabled
            && self.phase != Phase::Off
            && self.phase != Phase::Running
            && now.saturating_duration_since(self.last_activity) >= self.timing.sleep_timeout
        {
            info!("inactivity timeout, going to sleep");
            self.power_down(now);
        }
    }

    fn glow_remaining(&self, now: Instant) -> Option<Duration> {
        let started = self.glow_started?;
        let remaining = self
            .timing
            .glow_plug
            .saturating_sub(now.saturating_duration_since(started));
        (!remaining.is_zero()).then_some(remaining)
    }

    fn readings(&self, now: Instant) -> SensorReadings {
        let mut run_time = self.run_time;
        if let Some(since) = self.running_since {
            run_time += now.saturating_duration_since(since);
        }
        let mut readings = SensorReadings {
            fuel_level: 75.0,
            engine_temp: 20.0,
            oil_pressure: 0.0,
            battery_voltage: 12.6,
            hyd_pressure: Some(0.0),
            engine_hours: Some(BASE_ENGINE_HOURS + run_time.as_secs_f64() / 3600.0),
        };
        match self.phase {
            Phase::Off => {}
            Phase::On => readings.battery_voltage = 12.4,
            Phase::Glow => readings.battery_voltage = 11.8,
            Phase::Cranking => {
                readings.battery_voltage = 10.4;
                readings.oil_pressure = 15.0;
            }
            Phase::Running => {
                let warm = (run_time.as_secs_f64() / 600.0).min(1.0);
                readings.engine_temp = 20.0 + 65.0 * warm;
                readings.oil_pressure = 45.0;
                readings.battery_voltage = 14.1;
                readings.hyd_pressure = Some(2200.0);
                readings.fuel_level = (75.0 - run_time.as_secs_f64() / 360.0).max(0.0);
            }
        }
        readings
    }
}

fn ceil_secs(duration: Duration) -> u32 {
    let secs = duration.as_secs() + u64::from(duration.subsec_nanos() > 0);
    u32::try_from(secs).unwrap_or(u32::MAX)
}
