//! Deterministic demo playback. One cycle is [`DEMO_CYCLE_TICKS`] ticks; each
//! tick maps to a synthetic device snapshot, and a few ticks also force the
//! key into a new position.

use std::f64::consts::TAU;

use shared::{
    domain::IgnitionState,
    protocol::{DeviceStatus, OperationalState, SensorReadings, WarningFlags},
};

pub const DEMO_CYCLE_TICKS: u64 = 2000;

const POWER_ON_TICK: u64 = 40;
const GLOW_TICK: u64 = 100;
const CRANK_TICK: u64 = 500;
const RUNNING_TICK: u64 = 580;
const IDLE_TICK: u64 = 1800;

const TICKS_PER_SECOND: u64 = 20;
const WORKING_PERIOD_TICKS: f64 = 200.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DemoPhase {
    Idle,
    PoweredOn,
    GlowHeating,
    Cranking,
    Working,
    Cooldown,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DemoFrame {
    /// Position within the cycle.
    pub tick: u64,
    pub phase: DemoPhase,
    pub forced: Option<IgnitionState>,
    pub status: DeviceStatus,
}

#[derive(Debug, Default)]
pub struct DemoSequencer {
    tick: u64,
}

impl DemoSequencer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn tick(&self) -> u64 {
        self.tick
    }

    pub fn advance(&mut self) -> DemoFrame {
        let frame = frame_at(self.tick % DEMO_CYCLE_TICKS);
        self.tick += 1;
        frame
    }

    pub fn reset(&mut self) {
        self.tick = 0;
    }
}

pub fn phase_at(tick: u64) -> DemoPhase {
    match tick % DEMO_CYCLE_TICKS {
        t if t < POWER_ON_TICK => DemoPhase::Idle,
        t if t < GLOW_TICK => DemoPhase::PoweredOn,
        t if t < CRANK_TICK => DemoPhase::GlowHeating,
        t if t < RUNNING_TICK => DemoPhase::Cranking,
        t if t < IDLE_TICK => DemoPhase::Working,
        _ => DemoPhase::Cooldown,
    }
}

pub fn frame_at(tick: u64) -> DemoFrame {
    let tick = tick % DEMO_CYCLE_TICKS;
    let forced = match tick {
        0 | IDLE_TICK => Some(IgnitionState::Off),
        POWER_ON_TICK | RUNNING_TICK => Some(IgnitionState::On),
        GLOW_TICK => Some(IgnitionState::Glow),
        CRANK_TICK => Some(IgnitionState::Start),
        _ => None,
    };
    let phase = phase_at(tick);

    DemoFrame {
        tick,
        phase,
        forced,
        status: synthetic_status(tick, phase),
    }
}

fn idle_readings() -> SensorReadings {
    SensorReadings {
        fuel_level: 75.0,
        engine_temp: 20.0,
        oil_pressure: 0.0,
        battery_voltage: 12.6,
        hyd_pressure: Some(0.0),
        engine_hours: None,
    }
}

fn synthetic_status(tick: u64, phase: DemoPhase) -> DeviceStatus {
    let (state, key) = match phase {
        DemoPhase::Idle | DemoPhase::Cooldown => (OperationalState::Off, IgnitionState::Off),
        DemoPhase::PoweredOn => (OperationalState::On, IgnitionState::On),
        DemoPhase::GlowHeating => (OperationalState::GlowHeating, IgnitionState::Glow),
        DemoPhase::Cranking => (OperationalState::Starting, IgnitionState::Start),
        DemoPhase::Working => (OperationalState::Running, IgnitionState::On),
    };

    let mut status = DeviceStatus {
        state,
        key_position: Some(key.key_position()),
        readings: idle_readings(),
        warnings: WarningFlags::default(),
        ..DeviceStatus::default()
    };

    match phase {
        DemoPhase::Idle | DemoPhase::Cooldown => {}
        DemoPhase::PoweredOn => {
            status.readings.battery_voltage = 12.4;
        }
        DemoPhase::GlowHeating => {
            let remaining = CRANK_TICK - tick;
            status.glow_active = true;
            status.glow_plugs_on = true;
            status.countdown = Some(remaining.div_ceil(TICKS_PER_SECOND) as u32);
            status.readings.battery_voltage = 11.8;
            status.readings.engine_temp = 20.0 + (tick - GLOW_TICK) as f64 * 0.025;
        }
        DemoPhase::Cranking => {
            let sweep = triangle((tick - CRANK_TICK) as f64 / (RUNNING_TICK - CRANK_TICK) as f64);
            status.glow_plugs_on = true;
            status.readings.engine_temp = 30.0;
            status.readings.oil_pressure = 60.0 * sweep;
            status.readings.battery_voltage = 12.0 - 2.0 * sweep;
            status.readings.hyd_pressure = Some(2500.0 * sweep);
        }
        DemoPhase::Working => {
            let elapsed = (tick - RUNNING_TICK) as f64;
            let wave = (elapsed * TAU / WORKING_PERIOD_TICKS).sin();
            status.lights_on = true;
            status.readings.oil_pressure = 45.0 + 5.0 * wave;
            status.readings.engine_temp =
                (30.0 + elapsed * 0.1).min(85.0) + 2.0 * (elapsed * TAU / (2.0 * WORKING_PERIOD_TICKS)).sin();
            status.readings.battery_voltage = 14.1 + 0.2 * wave;
            status.readings.hyd_pressure = Some(2200.0 + 300.0 * wave);
            status.readings.fuel_level = 75.0 - elapsed * 0.004;
        }
    }

    status
}

/// 0 at both ends of `[0, 1]`, 1 in the middle.
fn triangle(progress: f64) -> f64 {
    let progress = progress.clamp(0.0, 1.0);
    1.0 - (2.0 * progress - 1.0).abs()
}
