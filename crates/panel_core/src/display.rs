//! Render model. Everything here is derived from the key machine and the
//! last applied snapshot; renderers read a [`PanelView`] and feed nothing back.

use chrono::{DateTime, Utc};
use serde::Serialize;
use shared::{
    domain::IgnitionState,
    protocol::{DeviceStatus, OperationalState},
};
use tokio::time::Instant;

use crate::{
    dispatcher::{PendingFeedback, TransientAlert},
    key::{InteractionFlags, KeyStateMachine},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Tone {
    Off,
    Ready,
    Heating,
    Starting,
    Running,
    Alert,
}

#[derive(Debug, Default)]
pub struct DisplayState {
    pub status: Option<DeviceStatus>,
    pub received_at: Option<DateTime<Utc>>,
    pub connection_error: bool,
    pub consecutive_failures: u32,
    pub feedback: Option<PendingFeedback>,
    pub alert: Option<TransientAlert>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GaugeReading {
    pub name: &'static str,
    pub value: f64,
    pub min: f64,
    pub max: f64,
    pub unit: &'static str,
    /// Needle rotation in degrees, -90 at `min` to +90 at `max`.
    pub needle: f64,
}

impl GaugeReading {
    fn new(name: &'static str, value: f64, min: f64, max: f64, unit: &'static str) -> Self {
        Self {
            name,
            value,
            min,
            max,
            unit,
            needle: needle_rotation(value, min, max),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct WarningLights {
    pub engine: bool,
    pub oil: bool,
    pub temperature: bool,
    pub battery: bool,
    pub work_lights: bool,
    pub ready: bool,
    pub glow: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PanelView {
    pub key_state: IgnitionState,
    pub key_angle: f64,
    #[serde(skip)]
    pub flags: InteractionFlags,
    pub headline: String,
    pub detail: String,
    pub tone: Tone,
    pub gauges: Vec<GaugeReading>,
    pub lights: WarningLights,
    pub countdown: String,
    pub lights_on: bool,
    pub sleep_mode_enabled: bool,
    pub time_until_sleep: Option<u64>,
    pub connection_error: bool,
    pub alert: Option<String>,
    pub demo_active: bool,
    pub last_update: Option<DateTime<Utc>>,
}

impl PanelView {
    pub fn build(
        key: &KeyStateMachine,
        display: &DisplayState,
        demo_active: bool,
        now: Instant,
    ) -> Self {
        let fallback = DeviceStatus::default();
        let status = display.status.as_ref().unwrap_or(&fallback);

        let (mut headline, mut detail, mut tone) = match display.status.as_ref() {
            Some(status) => status_headline(&status.state, status.countdown),
            None => (
                "CONNECTING...".to_string(),
                "Waiting for device status".to_string(),
                Tone::Off,
            ),
        };
        if display.connection_error && !demo_active {
            headline = "CONNECTION ERROR".to_string();
            detail = "Check network connection".to_string();
            tone = Tone::Alert;
        }
        if let Some(feedback) = display.feedback.as_ref().filter(|f| f.is_live(now)) {
            headline = feedback.text.clone();
            tone = Tone::Alert;
        }

        let readings = status.readings;
        let mut gauges = vec![
            GaugeReading::new("fuel", readings.fuel_level, 0.0, 100.0, "%"),
            GaugeReading::new("temp", readings.engine_temp, 0.0, 120.0, "°C"),
            GaugeReading::new("oil_pressure", readings.oil_pressure, 0.0, 80.0, "PSI"),
            GaugeReading::new("battery", readings.battery_voltage, 8.0, 16.0, "V"),
        ];
        if let Some(hyd) = readings.hyd_pressure {
            gauges.push(GaugeReading::new("hyd_pressure", hyd, 0.0, 3000.0, "PSI"));
        }
        if let Some(hours) = readings.engine_hours {
            gauges.push(GaugeReading::new("hours", hours, 0.0, 10_000.0, "HR"));
        }

        let lights = if display.status.is_some() {
            warning_lights(status)
        } else {
            WarningLights::default()
        };

        Self {
            key_state: key.state(),
            key_angle: key.angle(),
            flags: key.flags(),
            headline,
            detail,
            tone,
            gauges,
            lights,
            countdown: countdown_text(status.countdown),
            lights_on: status.lights_on,
            sleep_mode_enabled: status.sleep_mode_enabled,
            time_until_sleep: status.time_until_sleep,
            connection_error: display.connection_error,
            alert: display
                .alert
                .as_ref()
                .filter(|alert| alert.is_live(now))
                .map(|alert| alert.message.clone()),
            demo_active,
            last_update: display.received_at,
        }
    }

    pub fn gauge(&self, name: &str) -> Option<&GaugeReading> {
        self.gauges.iter().find(|gauge| gauge.name == name)
    }
}

pub fn needle_rotation(value: f64, min: f64, max: f64) -> f64 {
    if max <= min || !value.is_finite() {
        return -90.0;
    }
    let percentage = ((value - min) / (max - min) * 100.0).clamp(0.0, 100.0);
    -90.0 + percentage * 1.8
}

pub fn countdown_text(countdown: Option<u32>) -> String {
    match countdown {
        Some(secs) if secs > 0 => format!("{secs}s"),
        _ => "--".to_string(),
    }
}

pub fn warning_lights(status: &DeviceStatus) -> WarningLights {
    WarningLights {
        engine: status.state == OperationalState::EmergencyStop || status.warnings.engine_fault,
        oil: status.warnings.low_oil_pressure,
        temperature: status.warnings.high_temperature,
        battery: status.warnings.low_battery,
        work_lights: status.lights_on,
        ready: matches!(
            status.state,
            OperationalState::Ready | OperationalState::Running
        ),
        glow: status.state == OperationalState::GlowHeating || status.glow_active,
    }
}

/// Headline, detail line and tone for an operational state.
pub fn status_headline(state: &OperationalState, countdown: Option<u32>) -> (String, String, Tone) {
    let (headline, detail, tone) = match state {
        OperationalState::Off => ("SYSTEM OFF", "Turn key to ON position".to_string(), Tone::Off),
        OperationalState::On => (
            "SYSTEM ON",
            "Turn key to GLOW to begin glow plug heating".to_string(),
            Tone::Ready,
        ),
        OperationalState::GlowHeating => (
            "GLOW PLUGS HEATING",
            match countdown.filter(|secs| *secs > 0) {
                Some(secs) => {
                    format!("{secs}s remaining (or turn key to START to force crank)")
                }
                None => "Turn key to START to force crank".to_string(),
            },
            Tone::Heating,
        ),
        OperationalState::Ready => (
            "READY TO START",
            "Turn key to START position to crank engine".to_string(),
            Tone::Ready,
        ),
        OperationalState::Starting => (
            "STARTING ENGINE",
            "Engine cranking...".to_string(),
            Tone::Starting,
        ),
        OperationalState::Running => (
            "ENGINE RUNNING",
            "All systems operational (turn key to START for hot restart)".to_string(),
            Tone::Running,
        ),
        OperationalState::LowOilPressure => (
            "LOW OIL PRESSURE",
            "Check oil level - turn key to START to override".to_string(),
            Tone::Alert,
        ),
        OperationalState::HighTemperature => (
            "HIGH TEMPERATURE",
            "Engine overheating - turn key to START to override".to_string(),
            Tone::Alert,
        ),
        OperationalState::EmergencyStop => (
            "EMERGENCY STOP",
            "Turn key to START to override and restart".to_string(),
            Tone::Alert,
        ),
        OperationalState::Unknown(raw) => {
            return (
                raw.clone(),
                "Turn key to START to attempt engine start".to_string(),
                Tone::Off,
            )
        }
    };
    (headline.to_string(), detail, tone)
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use shared::protocol::WarningFlags;

    use super::*;

    #[test]
    fn needle_spans_half_circle() {
        assert_eq!(needle_rotation(0.0, 0.0, 100.0), -90.0);
        assert_eq!(needle_rotation(50.0, 0.0, 100.0), 0.0);
        assert_eq!(needle_rotation(100.0, 0.0, 100.0), 90.0);
        assert_eq!(needle_rotation(500.0, 0.0, 100.0), 90.0);
        assert_eq!(needle_rotation(4.0, 8.0, 16.0), -90.0);
    }

    #[test]
    fn countdown_hides_zero() {
        assert_eq!(countdown_text(Some(12)), "12s");
        assert_eq!(countdown_text(Some(0)), "--");
        assert_eq!(countdown_text(None), "--");
    }

    #[test]
    fn glow_headline_includes_countdown() {
        let (headline, detail, tone) = status_headline(&OperationalState::GlowHeating, Some(8));
        assert_eq!(headline, "GLOW PLUGS HEATING");
        assert!(detail.starts_with("8s remaining"));
        assert_eq!(tone, Tone::Heating);
    }

    #[test]
    fn engine_light_follows_emergency_stop_or_fault() {
        let mut status = DeviceStatus {
            state: OperationalState::EmergencyStop,
            ..DeviceStatus::default()
        };
        assert!(warning_lights(&status).engine);
        status.state = OperationalState::Running;
        assert!(!warning_lights(&status).engine);
        assert!(warning_lights(&status).ready);
        status.warnings = WarningFlags {
            engine_fault: true,
            ..WarningFlags::default()
        };
        assert!(warning_lights(&status).engine);
    }

    #[tokio::test(start_paused = true)]
    async fn live_feedback_overrides_headline_until_expiry() {
        let key = KeyStateMachine::new();
        let now = Instant::now();
        let display = DisplayState {
            status: Some(DeviceStatus {
                state: OperationalState::On,
                ..DeviceStatus::default()
            }),
            feedback: Some(PendingFeedback::new(
                "POWERING ON...",
                now,
                Duration::from_secs(2),
            )),
            ..DisplayState::default()
        };

        let view = PanelView::build(&key, &display, false, now);
        assert_eq!(view.headline, "POWERING ON...");

        let later = now + Duration::from_secs(2);
        let view = PanelView::build(&key, &display, false, later);
        assert_eq!(view.headline, "SYSTEM ON");
    }

    #[test]
    fn connection_error_replaces_status_headline() {
        let key = KeyStateMachine::new();
        let display = DisplayState {
            status: Some(DeviceStatus::default()),
            connection_error: true,
            ..DisplayState::default()
        };
        let view = PanelView::build(&key, &display, false, Instant::now());
        assert_eq!(view.headline, "CONNECTION ERROR");
        assert_eq!(view.tone, Tone::Alert);
    }
}
