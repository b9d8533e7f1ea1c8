use std::{collections::HashMap, fs, path::Path, time::Duration};

use anyhow::{bail, Context};
use serde::Deserialize;
use url::Url;

pub const SETTINGS_FILE: &str = "panel.toml";

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct PanelSettings {
    pub device_url: String,
    pub poll_interval_ms: u64,
    pub demo_tick_ms: u64,
    pub spring_back_ms: u64,
    pub snap_settle_ms: u64,
    pub feedback_ms: u64,
    pub alert_ms: u64,
    pub refresh_after_command_ms: u64,
    pub demo_long_press_ms: u64,
}

impl Default for PanelSettings {
    fn default() -> Self {
        Self {
            device_url: "http://192.168.4.1/".into(),
            poll_interval_ms: 1000,
            demo_tick_ms: 50,
            spring_back_ms: 300,
            snap_settle_ms: 200,
            feedback_ms: 2000,
            alert_ms: 3000,
            refresh_after_command_ms: 500,
            demo_long_press_ms: 3000,
        }
    }
}

impl PanelSettings {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn demo_tick(&self) -> Duration {
        Duration::from_millis(self.demo_tick_ms)
    }

    pub fn spring_back_delay(&self) -> Duration {
        Duration::from_millis(self.spring_back_ms)
    }

    pub fn snap_settle(&self) -> Duration {
        Duration::from_millis(self.snap_settle_ms)
    }

    pub fn feedback_window(&self) -> Duration {
        Duration::from_millis(self.feedback_ms)
    }

    pub fn alert_window(&self) -> Duration {
        Duration::from_millis(self.alert_ms)
    }

    pub fn refresh_after_command(&self) -> Duration {
        Duration::from_millis(self.refresh_after_command_ms)
    }

    pub fn demo_long_press(&self) -> Duration {
        Duration::from_millis(self.demo_long_press_ms)
    }

    fn apply_file(&mut self, file_cfg: &HashMap<String, toml::Value>) {
        if let Some(v) = file_cfg.get("device_url").and_then(toml::Value::as_str) {
            self.device_url = v.to_string();
        }
        for (key, slot) in self.timing_slots() {
            if let Some(v) = file_cfg.get(key).and_then(toml::Value::as_integer) {
                if let Ok(parsed) = u64::try_from(v) {
                    *slot = parsed;
                }
            }
        }
    }

    fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(v) = lookup("PANEL_DEVICE_URL") {
            self.device_url = v;
        }
        if let Some(v) = lookup("APP__DEVICE_URL") {
            self.device_url = v;
        }
        for (key, slot) in self.timing_slots() {
            let upper = key.to_ascii_uppercase();
            for name in [format!("PANEL_{upper}"), format!("APP__{upper}")] {
                if let Some(parsed) = lookup(&name).and_then(|v| v.trim().parse::<u64>().ok()) {
                    *slot = parsed;
                }
            }
        }
    }

    fn timing_slots(&mut self) -> [(&'static str, &mut u64); 8] {
        [
            ("poll_interval_ms", &mut self.poll_interval_ms),
            ("demo_tick_ms", &mut self.demo_tick_ms),
            ("spring_back_ms", &mut self.spring_back_ms),
            ("snap_settle_ms", &mut self.snap_settle_ms),
            ("feedback_ms", &mut self.feedback_ms),
            ("alert_ms", &mut self.alert_ms),
            ("refresh_after_command_ms", &mut self.refresh_after_command_ms),
            ("demo_long_press_ms", &mut self.demo_long_press_ms),
        ]
    }
}

/// Defaults, then `panel.toml` in the working directory, then environment.
pub fn load_settings() -> PanelSettings {
    load_settings_from(Path::new(SETTINGS_FILE), |name| std::env::var(name).ok())
}

pub fn load_settings_from(
    path: &Path,
    lookup: impl Fn(&str) -> Option<String>,
) -> PanelSettings {
    let mut settings = PanelSettings::default();

    if let Ok(raw) = fs::read_to_string(path) {
        match toml::from_str::<HashMap<String, toml::Value>>(&raw) {
            Ok(file_cfg) => settings.apply_file(&file_cfg),
            Err(err) => {
                tracing::warn!(path = %path.display(), %err, "ignoring unreadable settings file")
            }
        }
    }

    settings.apply_env(lookup);
    settings
}

/// Parses the device URL, adding `http://` when no scheme is given.
pub fn normalize_device_url(raw: &str) -> anyhow::Result<Url> {
    let raw = raw.trim();
    let raw = if raw.is_empty() {
        PanelSettings::default().device_url
    } else if raw.contains("://") {
        raw.to_string()
    } else {
        format!("http://{raw}")
    };

    let url = Url::parse(&raw).with_context(|| format!("invalid device url '{raw}'"))?;
    if !matches!(url.scheme(), "http" | "https") {
        bail!("device url must use http or https, got '{}'", url.scheme());
    }
    Ok(url)
}

/// True when the entry URL carries a `demo` flag that is not `0`/`false`.
pub fn demo_requested(url: &Url) -> bool {
    url.query_pairs().any(|(key, value)| {
        key == "demo" && !matches!(value.to_ascii_lowercase().as_str(), "0" | "false")
    })
}
