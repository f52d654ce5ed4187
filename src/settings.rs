use serde::Deserialize;
use std::fs;
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Deserialize, Clone, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub lease: LeaseConfig,
    #[serde(default)]
    pub log_format: LogFormat,
}

/// Timing knobs for the lease monitor's renewal loop.
#[derive(Debug, Deserialize, Clone)]
pub struct LeaseConfig {
    /// How long the monitor waits for a terminal action before renewing,
    /// and the invisibility window each renewal re-establishes (seconds).
    #[serde(default = "default_renew_interval_secs")]
    pub renew_interval_secs: u64,
    /// Invisibility window the queue applies when a message is first
    /// claimed (seconds). Must be longer than the renewal interval so the
    /// first renewal lands before the window lapses.
    #[serde(default = "default_initial_invisibility_secs")]
    pub initial_invisibility_secs: u64,
}

fn default_renew_interval_secs() -> u64 {
    60
}

fn default_initial_invisibility_secs() -> u64 {
    120
}

impl Default for LeaseConfig {
    fn default() -> Self {
        Self {
            renew_interval_secs: default_renew_interval_secs(),
            initial_invisibility_secs: default_initial_invisibility_secs(),
        }
    }
}

impl LeaseConfig {
    pub fn renew_interval(&self) -> Duration {
        Duration::from_secs(self.renew_interval_secs)
    }

    pub fn initial_invisibility(&self) -> Duration {
        Duration::from_secs(self.initial_invisibility_secs)
    }

    /// Renewal must land before the initial window lapses under normal
    /// scheduling jitter, so the cadence has to be strictly shorter.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.renew_interval_secs == 0 {
            anyhow::bail!("lease.renew_interval_secs must be positive");
        }
        if self.renew_interval_secs >= self.initial_invisibility_secs {
            anyhow::bail!(
                "lease.renew_interval_secs ({}) must be strictly less than lease.initial_invisibility_secs ({})",
                self.renew_interval_secs,
                self.initial_invisibility_secs
            );
        }
        Ok(())
    }
}

#[derive(Debug, Deserialize, Clone, Copy, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

impl AppConfig {
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let cfg = match path {
            Some(p) => {
                let data = fs::read_to_string(p)?;
                toml::from_str::<Self>(&data)?
            }
            None => Self::default(),
        };
        cfg.lease.validate()?;
        Ok(cfg)
    }
}
