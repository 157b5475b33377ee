//! Settings
//!
//! Resolved in order: built-in defaults, an optional YAML file, then
//! `KARTLIVE_*` environment variables. Command line tools apply their own
//! flags last.

use crate::board::reconcile::DEFAULT_HIGHLIGHT_WINDOW;
use crate::feed::link::{Backoff, ReconnectPolicy};
use crate::feed::util;

use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("cannot read {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("invalid configuration: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("invalid value {value:?} for {name}")]
    Value { name: String, value: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ReconnectSettings {
    /// `None` retries forever.
    pub max_attempts: Option<u32>,
    pub delay_ms: u64,
    /// Enables exponential backoff, capped at this delay.
    pub max_delay_ms: Option<u64>,
}

impl Default for ReconnectSettings {
    fn default() -> ReconnectSettings {
        ReconnectSettings::from(&ReconnectPolicy::continuous())
    }
}

impl From<&ReconnectPolicy> for ReconnectSettings {
    fn from(policy: &ReconnectPolicy) -> ReconnectSettings {
        ReconnectSettings {
            max_attempts: policy.max_attempts,
            delay_ms: policy.delay.as_millis() as u64,
            max_delay_ms: match policy.backoff {
                Backoff::Fixed => None,
                Backoff::Exponential { max } => Some(max.as_millis() as u64),
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub scorecard_url: String,
    pub pubsub_url: String,
    pub reconnect: ReconnectSettings,
    pub highlight_ms: u64,
    pub fetch_timeout_ms: u64,
}

impl Default for Settings {
    fn default() -> Settings {
        Settings {
            scorecard_url: util::DEFAULT_SCORECARD_URL.to_string(),
            pubsub_url: util::DEFAULT_PUBSUB_URL.to_string(),
            reconnect: ReconnectSettings::default(),
            highlight_ms: DEFAULT_HIGHLIGHT_WINDOW.as_millis() as u64,
            fetch_timeout_ms: 10_000,
        }
    }
}

fn invalid(name: &str, value: &str) -> ConfigError {
    ConfigError::Value {
        name: name.to_string(),
        value: value.to_string(),
    }
}

impl Settings {
    pub fn from_yaml(text: &str) -> Result<Settings, ConfigError> {
        if text.trim().is_empty() {
            return Ok(Settings::default());
        }
        Ok(serde_yaml::from_str(text)?)
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Settings, ConfigError> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Settings::from_yaml(&text)
    }

    /// Applies overrides from `lookup`, which maps a variable name to its
    /// value if set.
    pub fn apply_vars<F: Fn(&str) -> Option<String>>(
        &mut self,
        lookup: F,
    ) -> Result<(), ConfigError> {
        if let Some(url) = lookup("KARTLIVE_SCORECARD_URL") {
            self.scorecard_url = url;
        }
        if let Some(url) = lookup("KARTLIVE_PUBSUB_URL") {
            self.pubsub_url = url;
        }
        if let Some(ms) = lookup("KARTLIVE_HIGHLIGHT_MS") {
            self.highlight_ms = ms
                .trim()
                .parse()
                .map_err(|_| invalid("KARTLIVE_HIGHLIGHT_MS", &ms))?;
        }
        Ok(())
    }

    pub fn apply_env(&mut self) -> Result<(), ConfigError> {
        self.apply_vars(|name| env::var(name).ok())
    }

    /// Sets the retry policy from `forever`, `capped` or an attempt count.
    pub fn set_retries(&mut self, retries: &str) -> Result<(), ConfigError> {
        match retries.trim() {
            "forever" | "continuous" => {
                self.reconnect = ReconnectSettings::from(&ReconnectPolicy::continuous())
            }
            "capped" => self.reconnect = ReconnectSettings::from(&ReconnectPolicy::capped()),
            n => {
                self.reconnect.max_attempts = Some(n.parse().map_err(|_| invalid("retries", n))?)
            }
        }
        Ok(())
    }

    pub fn reconnect_policy(&self) -> ReconnectPolicy {
        let delay = Duration::from_millis(self.reconnect.delay_ms);
        ReconnectPolicy {
            max_attempts: self.reconnect.max_attempts,
            delay,
            backoff: match self.reconnect.max_delay_ms {
                Some(max) => Backoff::Exponential {
                    max: std::cmp::max(Duration::from_millis(max), delay),
                },
                None => Backoff::Fixed,
            },
        }
    }

    pub fn highlight_window(&self) -> Duration {
        Duration::from_millis(self.highlight_ms)
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_millis(self.fetch_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn defaults() {
        let s = Settings::default();
        assert_eq!(s.reconnect_policy(), ReconnectPolicy::continuous());
        assert_eq!(s.highlight_window(), Duration::from_millis(3000));
        assert_eq!(s.fetch_timeout(), Duration::from_secs(10));
        assert_eq!(Settings::from_yaml("").unwrap(), s);
    }

    #[test]
    fn partial_yaml() {
        let s = Settings::from_yaml(
            "highlight_ms: 2000\nreconnect:\n  max_attempts: 5\n  delay_ms: 2000\n",
        )
        .unwrap();
        assert_eq!(s.highlight_ms, 2000);
        assert_eq!(s.reconnect_policy(), ReconnectPolicy::capped());
        assert_eq!(s.pubsub_url, util::DEFAULT_PUBSUB_URL);
        assert!(Settings::from_yaml("highlight_ms: soon").is_err());
    }

    #[test]
    fn backoff_from_yaml() {
        let s = Settings::from_yaml("reconnect:\n  delay_ms: 500\n  max_delay_ms: 8000\n").unwrap();
        let p = s.reconnect_policy();
        assert_eq!(p.max_attempts, None);
        assert_eq!(
            p.backoff,
            Backoff::Exponential {
                max: Duration::from_secs(8)
            }
        );
    }

    #[test]
    fn environment_overrides() {
        let vars: HashMap<&str, &str> = [
            ("KARTLIVE_PUBSUB_URL", "ws://localhost:9000/ws"),
            ("KARTLIVE_HIGHLIGHT_MS", "2500"),
        ]
        .into_iter()
        .collect();
        let mut s = Settings::default();
        s.apply_vars(|k| vars.get(k).map(|v| v.to_string())).unwrap();
        assert_eq!(s.pubsub_url, "ws://localhost:9000/ws");
        assert_eq!(s.highlight_ms, 2500);
        assert_eq!(s.scorecard_url, util::DEFAULT_SCORECARD_URL);

        let err = s
            .apply_vars(|k| (k == "KARTLIVE_HIGHLIGHT_MS").then(|| "x".to_string()))
            .unwrap_err();
        assert!(matches!(err, ConfigError::Value { .. }));
    }

    #[test]
    fn retries() {
        let mut s = Settings::default();
        s.set_retries("capped").unwrap();
        assert_eq!(s.reconnect_policy(), ReconnectPolicy::capped());
        s.set_retries("3").unwrap();
        assert_eq!(s.reconnect.max_attempts, Some(3));
        assert_eq!(s.reconnect.delay_ms, 2000);
        s.set_retries("forever").unwrap();
        assert_eq!(s.reconnect_policy(), ReconnectPolicy::continuous());
        assert!(s.set_retries("lots").is_err());
    }
}
