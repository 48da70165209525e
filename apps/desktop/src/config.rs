use std::{fs, path::Path, time::Duration};

use anyhow::Context;
use client_core::ControllerConfig;
use serde::Deserialize;

pub const SETTINGS_FILE: &str = "dashboard.toml";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub server_url: String,
    pub poll_interval_ms: u64,
    pub max_attempts: u32,
    pub request_timeout_ms: u64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            server_url: "http://localhost:8000".into(),
            poll_interval_ms: 2_000,
            max_attempts: 30,
            request_timeout_ms: 30_000,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct FileSettings {
    server_url: Option<String>,
    poll_interval_ms: Option<u64>,
    max_attempts: Option<u32>,
    request_timeout_ms: Option<u64>,
}

impl Settings {
    pub fn controller_config(&self) -> ControllerConfig {
        ControllerConfig {
            poll_interval: Duration::from_millis(self.poll_interval_ms),
            max_attempts: self.max_attempts,
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    fn apply_file(&mut self, raw: &str) -> anyhow::Result<()> {
        let file_cfg: FileSettings = toml::from_str(raw)?;
        if let Some(v) = file_cfg.server_url {
            self.server_url = v;
        }
        if let Some(v) = file_cfg.poll_interval_ms {
            self.poll_interval_ms = v;
        }
        if let Some(v) = file_cfg.max_attempts {
            self.max_attempts = v;
        }
        if let Some(v) = file_cfg.request_timeout_ms {
            self.request_timeout_ms = v;
        }
        Ok(())
    }

    fn apply_env(&mut self, var: impl Fn(&str) -> Option<String>) {
        if let Some(v) = var("API_URL") {
            self.server_url = v;
        }
        if let Some(v) = var("APP__API_URL") {
            self.server_url = v;
        }

        if let Some(v) = var("APP__POLL_INTERVAL_MS").and_then(|v| v.trim().parse().ok()) {
            self.poll_interval_ms = v;
        }
        if let Some(v) = var("APP__MAX_ATTEMPTS").and_then(|v| v.trim().parse().ok()) {
            self.max_attempts = v;
        }
        if let Some(v) = var("APP__REQUEST_TIMEOUT_MS").and_then(|v| v.trim().parse().ok()) {
            self.request_timeout_ms = v;
        }
    }

    fn normalize(&mut self) {
        let trimmed = self.server_url.trim().trim_end_matches('/');
        self.server_url = if trimmed.is_empty() {
            Settings::default().server_url
        } else {
            trimmed.to_string()
        };
        self.max_attempts = self.max_attempts.max(1);
        self.poll_interval_ms = self.poll_interval_ms.max(1);
    }
}

/// Defaults, then `dashboard.toml` if present, then environment overrides.
pub fn load_settings() -> anyhow::Result<Settings> {
    let raw = match fs::read_to_string(SETTINGS_FILE) {
        Ok(raw) => Some(raw),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => None,
        Err(err) => return Err(err).with_context(|| format!("failed to read {SETTINGS_FILE}")),
    };
    settings_from_sources(raw.as_deref(), Path::new(SETTINGS_FILE), |key| {
        std::env::var(key).ok()
    })
}

fn settings_from_sources(
    file: Option<&str>,
    file_path: &Path,
    var: impl Fn(&str) -> Option<String>,
) -> anyhow::Result<Settings> {
    let mut settings = Settings::default();
    if let Some(raw) = file {
        settings
            .apply_file(raw)
            .with_context(|| format!("invalid settings file '{}'", file_path.display()))?;
    }
    settings.apply_env(var);
    settings.normalize();
    Ok(settings)
}
