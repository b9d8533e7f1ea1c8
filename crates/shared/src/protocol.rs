use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{domain::KeyPosition, error::ControlError};

pub const DEFAULT_FUEL_LEVEL: f64 = 75.0;
pub const DEFAULT_ENGINE_TEMP: f64 = 85.0;
pub const DEFAULT_OIL_PRESSURE: f64 = 45.0;
pub const DEFAULT_BATTERY_VOLTAGE: f64 = 12.8;
pub const DEFAULT_OPERATIONAL_STATE: &str = "UNKNOWN";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum ControlRequest {
    KeyPosition { position: KeyPosition },
    KeyStartHold { held: bool },
    EmergencyStop,
    Lights,
    Horn,
    ToggleSleepMode,
    SleepNow,
}

impl ControlRequest {
    /// Builds a key position command, rejecting raw values outside 0-3.
    pub fn key_position(raw: u8) -> Result<Self, ControlError> {
        Ok(Self::KeyPosition {
            position: KeyPosition::new(raw)?,
        })
    }

    /// Parses one of the button actions by wire name. Dashes are accepted in
    /// place of underscores. Key commands are not buttons and are rejected.
    pub fn discrete(name: &str) -> Result<Self, ControlError> {
        match name.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "emergency_stop" => Ok(Self::EmergencyStop),
            "lights" => Ok(Self::Lights),
            "horn" => Ok(Self::Horn),
            "toggle_sleep_mode" | "toggle_sleep" => Ok(Self::ToggleSleepMode),
            "sleep_now" => Ok(Self::SleepNow),
            _ => Err(ControlError::UnknownAction(name.to_string())),
        }
    }

    pub fn action(&self) -> &'static str {
        match self {
            Self::KeyPosition { .. } => "key_position",
            Self::KeyStartHold { .. } => "key_start_hold",
            Self::EmergencyStop => "emergency_stop",
            Self::Lights => "lights",
            Self::Horn => "horn",
            Self::ToggleSleepMode => "toggle_sleep_mode",
            Self::SleepNow => "sleep_now",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControlResponse {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl ControlResponse {
    pub fn ok() -> Self {
        Self {
            success: true,
            message: None,
        }
    }

    pub fn rejected(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: Some(message.into()),
        }
    }
}

/// Operational phase reported by the device. Unrecognized values are kept
/// verbatim so they can still be shown.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum OperationalState {
    Off,
    On,
    GlowHeating,
    Ready,
    Starting,
    Running,
    LowOilPressure,
    HighTemperature,
    EmergencyStop,
    Unknown(String),
}

impl OperationalState {
    pub fn parse(raw: &str) -> Self {
        match raw {
            "OFF" => Self::Off,
            "ON" => Self::On,
            "GLOW_HEATING" => Self::GlowHeating,
            "READY" => Self::Ready,
            "STARTING" => Self::Starting,
            "RUNNING" => Self::Running,
            "LOW_OIL_PRESSURE" => Self::LowOilPressure,
            "HIGH_TEMPERATURE" => Self::HighTemperature,
            "EMERGENCY_STOP" => Self::EmergencyStop,
            other => Self::Unknown(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::Off => "OFF",
            Self::On => "ON",
            Self::GlowHeating => "GLOW_HEATING",
            Self::Ready => "READY",
            Self::Starting => "STARTING",
            Self::Running => "RUNNING",
            Self::LowOilPressure => "LOW_OIL_PRESSURE",
            Self::HighTemperature => "HIGH_TEMPERATURE",
            Self::EmergencyStop => "EMERGENCY_STOP",
            Self::Unknown(raw) => raw,
        }
    }
}

impl Default for OperationalState {
    fn default() -> Self {
        Self::Unknown(DEFAULT_OPERATIONAL_STATE.to_string())
    }
}

impl From<String> for OperationalState {
    fn from(value: String) -> Self {
        Self::parse(&value)
    }
}

impl From<OperationalState> for String {
    fn from(value: OperationalState) -> Self {
        value.as_str().to_string()
    }
}

impl fmt::Display for OperationalState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct SensorReadings {
    pub fuel_level: f64,
    pub engine_temp: f64,
    pub oil_pressure: f64,
    pub battery_voltage: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hyd_pressure: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub engine_hours: Option<f64>,
}

impl Default for SensorReadings {
    fn default() -> Self {
        Self {
            fuel_level: DEFAULT_FUEL_LEVEL,
            engine_temp: DEFAULT_ENGINE_TEMP,
            oil_pressure: DEFAULT_OIL_PRESSURE,
            battery_voltage: DEFAULT_BATTERY_VOLTAGE,
            hyd_pressure: None,
            engine_hours: None,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct WarningFlags {
    pub low_oil_pressure: bool,
    pub high_temperature: bool,
    pub low_battery: bool,
    pub engine_fault: bool,
}

/// Authoritative snapshot from `GET /status`.
///
/// Decoding never fails on individual fields: each missing or malformed field
/// falls back to its named default, and a `key_position` outside 0-3 decodes
/// as `None`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(from = "Value")]
pub struct DeviceStatus {
    pub state: OperationalState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub key_position: Option<KeyPosition>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub countdown: Option<u32>,
    pub glow_active: bool,
    pub glow_plugs_on: bool,
    #[serde(flatten)]
    pub readings: SensorReadings,
    #[serde(flatten)]
    pub warnings: WarningFlags,
    pub lights_on: bool,
    pub sleep_mode_enabled: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub time_since_activity: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub time_until_sleep: Option<u64>,
}

impl DeviceStatus {
    pub fn from_value(value: &Value) -> Self {
        let readings = SensorReadings {
            fuel_level: number_field(value, "fuel_level").unwrap_or(DEFAULT_FUEL_LEVEL),
            engine_temp: number_field(value, "engine_temp").unwrap_or(DEFAULT_ENGINE_TEMP),
            oil_pressure: number_field(value, "oil_pressure").unwrap_or(DEFAULT_OIL_PRESSURE),
            battery_voltage: number_field(value, "battery_voltage")
                .unwrap_or(DEFAULT_BATTERY_VOLTAGE),
            hyd_pressure: number_field(value, "hyd_pressure"),
            engine_hours: number_field(value, "engine_hours"),
        };
        let warnings = WarningFlags {
            low_oil_pressure: bool_field(value, "low_oil_pressure"),
            high_temperature: bool_field(value, "high_temperature"),
            low_battery: bool_field(value, "low_battery"),
            engine_fault: bool_field(value, "engine_fault"),
        };

        Self {
            state: value
                .get("state")
                .and_then(Value::as_str)
                .map(OperationalState::parse)
                .unwrap_or_default(),
            key_position: value
                .get("key_position")
                .and_then(Value::as_u64)
                .and_then(|raw| u8::try_from(raw).ok())
                .and_then(|raw| KeyPosition::new(raw).ok()),
            countdown: count_field(value, "countdown")
                .map(|secs| u32::try_from(secs).unwrap_or(u32::MAX)),
            glow_active: bool_field(value, "glow_active"),
            glow_plugs_on: bool_field(value, "glow_plugs_on"),
            readings,
            warnings,
            lights_on: bool_field(value, "lights_on"),
            sleep_mode_enabled: bool_field(value, "sleep_mode_enabled"),
            time_since_activity: count_field(value, "time_since_activity"),
            time_until_sleep: count_field(value, "time_until_sleep"),
        }
    }
}

impl From<Value> for DeviceStatus {
    fn from(value: Value) -> Self {
        Self::from_value(&value)
    }
}

fn number_field(value: &Value, key: &str) -> Option<f64> {
    value
        .get(key)
        .and_then(Value::as_f64)
        .filter(|number| number.is_finite())
}

fn count_field(value: &Value, key: &str) -> Option<u64> {
    number_field(value, key)
        .filter(|number| *number >= 0.0)
        .map(|number| number.round() as u64)
}

fn bool_field(value: &Value, key: &str) -> bool {
    value.get(key).and_then(Value::as_bool).unwrap_or(false)
}
