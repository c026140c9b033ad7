//! Runtime configuration for the process-wide registry.
//!
//! Read from the environment on first use unless a registry is installed
//! explicitly with `timetap::install()`.

use std::num::NonZeroUsize;

use crate::error::Error;

/// Environment variable toggling collection at startup.
pub const ENV_ENABLED: &str = "TIMETAP_ENABLED";

/// Environment variable bounding the samples retained per section path.
pub const ENV_MAX_SAMPLES: &str = "TIMETAP_MAX_SAMPLES";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Initial state of the collection flag.
    pub enabled: bool,
    /// Per-path sample retention. `None` keeps every sample so the median is
    /// exact; `Some(n)` keeps the most recent `n` and computes the median over
    /// that window. Runs, total, min and max are always exact.
    pub max_samples: Option<NonZeroUsize>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            enabled: true,
            max_samples: None,
        }
    }
}

impl Config {
    /// Build a config from `TIMETAP_ENABLED` and `TIMETAP_MAX_SAMPLES`.
    pub fn from_env() -> Result<Self, Error> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn with_max_samples(mut self, max_samples: usize) -> Result<Self, Error> {
        self.max_samples = Some(NonZeroUsize::new(max_samples).ok_or_else(|| {
            Error::Configuration("max_samples must be greater than zero".into())
        })?);
        Ok(self)
    }

    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, Error> {
        let mut config = Self::default();
        if let Some(raw) = lookup(ENV_ENABLED) {
            config.enabled = parse_flag(&raw).ok_or_else(|| {
                Error::Configuration(format!(
                    "{ENV_ENABLED}={raw:?} is not a boolean (use 1/0, true/false, on/off)"
                ))
            })?;
        }
        if let Some(raw) = lookup(ENV_MAX_SAMPLES) {
            let max = raw.trim().parse::<usize>().map_err(|_| {
                Error::Configuration(format!(
                    "{ENV_MAX_SAMPLES}={raw:?} is not a positive integer"
                ))
            })?;
            config = config.with_max_samples(max)?;
        }
        Ok(config)
    }
}

fn parse_flag(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "on" | "yes" => Some(true),
        "0" | "false" | "off" | "no" => Some(false),
        _ => None,
    }
}
