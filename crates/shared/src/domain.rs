use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::ControlError;

/// Lowest angle the key can reach (OFF, 11 o'clock).
pub const KEY_ANGLE_MIN: f64 = -30.0;
/// Highest angle the key can reach (START, 3 o'clock).
pub const KEY_ANGLE_MAX: f64 = 90.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IgnitionState {
    Off,
    On,
    Glow,
    Start,
}

/// Clockwise progression of the key.
pub const STATE_ORDER: [IgnitionState; 4] = [
    IgnitionState::Off,
    IgnitionState::On,
    IgnitionState::Glow,
    IgnitionState::Start,
];

impl IgnitionState {
    pub const fn reference_angle(self) -> f64 {
        match self {
            Self::Off => -30.0,
            Self::On => 0.0,
            Self::Glow => 45.0,
            Self::Start => 90.0,
        }
    }

    pub const fn index(self) -> usize {
        match self {
            Self::Off => 0,
            Self::On => 1,
            Self::Glow => 2,
            Self::Start => 3,
        }
    }

    /// The state one step clockwise, saturating at START.
    pub fn next(self) -> Self {
        STATE_ORDER[(self.index() + 1).min(STATE_ORDER.len() - 1)]
    }

    pub fn key_position(self) -> KeyPosition {
        KeyPosition(self.index() as u8)
    }

    pub fn from_key_position(position: KeyPosition) -> Self {
        STATE_ORDER[position.0 as usize]
    }

    pub const fn label(self) -> &'static str {
        match self {
            Self::Off => "OFF",
            Self::On => "ON",
            Self::Glow => "GLOW",
            Self::Start => "START",
        }
    }
}

impl fmt::Display for IgnitionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl std::str::FromStr for IgnitionState {
    type Err = ControlError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "off" => Ok(Self::Off),
            "on" => Ok(Self::On),
            "glow" => Ok(Self::Glow),
            "start" => Ok(Self::Start),
            other => Err(ControlError::UnknownState(other.to_string())),
        }
    }
}

/// Remote key position, 0=OFF 1=ON 2=GLOW 3=START.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub struct KeyPosition(u8);

impl KeyPosition {
    pub const MAX: u8 = 3;

    pub fn new(raw: u8) -> Result<Self, ControlError> {
        if raw > Self::MAX {
            return Err(ControlError::InvalidKeyPosition(raw));
        }
        Ok(Self(raw))
    }

    pub const fn get(self) -> u8 {
        self.0
    }
}

impl TryFrom<u8> for KeyPosition {
    type Error = ControlError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<KeyPosition> for u8 {
    fn from(value: KeyPosition) -> Self {
        value.0
    }
}
