use std::{collections::HashMap, fs, net::SocketAddr, path::Path, time::Duration};

use anyhow::Context;
use serde::Deserialize;

use crate::device::DeviceTiming;

pub const SETTINGS_FILE: &str = "device_sim.toml";

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Settings {
    pub bind_addr: String,
    pub glow_plug_secs: u64,
    pub crank_to_run_ms: u64,
    pub sleep_timeout_secs: u64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:8080".into(),
            glow_plug_secs: 20,
            crank_to_run_ms: 1500,
            sleep_timeout_secs: 300,
        }
    }
}

impl Settings {
    pub fn timing(&self) -> DeviceTiming {
        DeviceTiming {
            glow_plug: Duration::from_secs(self.glow_plug_secs),
            crank_to_run: Duration::from_millis(self.crank_to_run_ms),
            sleep_timeout: Duration::from_secs(self.sleep_timeout_secs),
        }
    }

    pub fn bind_addr(&self) -> anyhow::Result<SocketAddr> {
        self.bind_addr
            .parse()
            .with_context(|| format!("invalid bind address '{}'", self.bind_addr))
    }
}

pub fn load_settings() -> Settings {
    load_settings_from(Path::new(SETTINGS_FILE), |name| std::env::var(name).ok())
}

/// Defaults, then the TOML file, then `DEVICE_SIM_*` and `APP__*` variables.
pub fn load_settings_from(path: &Path, lookup: impl Fn(&str) -> Option<String>) -> Settings {
    let mut settings = Settings::default();

    if let Ok(raw) = fs::read_to_string(path) {
        if let Ok(file_cfg) = toml::from_str::<HashMap<String, toml::Value>>(&raw) {
            if let Some(v) = file_cfg.get("bind_addr").and_then(toml::Value::as_str) {
                settings.bind_addr = v.to_string();
            }
            for (key, slot) in [
                ("glow_plug_secs", &mut settings.glow_plug_secs),
                ("crank_to_run_ms", &mut settings.crank_to_run_ms),
                ("sleep_timeout_secs", &mut settings.sleep_timeout_secs),
            ] {
                if let Some(v) = file_cfg
                    .get(key)
                    .and_then(toml::Value::as_integer)
                    .and_then(|v| u64::try_from(v).ok())
                {
                    *slot = v;
                }
            }
        } else {
            tracing::warn!(path = %path.display(), "ignoring unreadable settings file");
        }
    }

    if let Some(v) = lookup("DEVICE_SIM_BIND") {
        settings.bind_addr = v;
    }
    if let Some(v) = lookup("APP__BIND_ADDR") {
        settings.bind_addr = v;
    }

    for (name, slot) in [
        ("GLOW_PLUG_SECS", &mut settings.glow_plug_secs),
        ("CRANK_TO_RUN_MS", &mut settings.crank_to_run_ms),
        ("SLEEP_TIMEOUT_SECS", &mut settings.sleep_timeout_secs),
    ] {
        for var in [format!("DEVICE_SIM_{name}"), format!("APP__{name}")] {
            if let Some(parsed) = lookup(&var).and_then(|v| v.trim().parse::<u64>().ok()) {
                *slot = parsed;
            }
        }
    }

    settings
}

#[cfg(test)]
#[path = "tests/config_tests.rs"]
mod tests;
