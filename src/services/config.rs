use crate::constants::{api, network, provision, readiness, tasks};
use std::path::{Path, PathBuf};
use std::time::Duration;

const DEFAULT_KEY_FILE: &str = "~/.ssh/id_rsa";

/// Runtime settings for every component. Built once and passed down
/// explicitly; nothing reads the environment after construction.
#[derive(Debug, Clone)]
pub struct Config {
    pub ssh_key_file: PathBuf,
    pub connect_timeout_ms: u64,
    pub command_timeout_ms: u64,
    pub grace_period_ms: u64,
    pub ready_timeout_secs: u64,
    pub ready_poll_interval_ms: u64,
    pub api_key: Option<String>,
    pub server_url: String,
    pub provision_user: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            ssh_key_file: expand_home_path(DEFAULT_KEY_FILE),
            connect_timeout_ms: network::TIMEOUT_SSH_CONNECT_MS,
            command_timeout_ms: network::TIMEOUT_SSH_COMMAND_MS,
            grace_period_ms: tasks::DEFAULT_GRACE_PERIOD_MS,
            ready_timeout_secs: readiness::DEFAULT_TIMEOUT_SECS,
            ready_poll_interval_ms: readiness::DEFAULT_POLL_INTERVAL_MS,
            api_key: None,
            server_url: api::DEFAULT_SERVER_URL.to_string(),
            provision_user: provision::DEFAULT_USER_NAME.to_string(),
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let text = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };
        let millis = |key: &str, fallback: u64| {
            text(key)
                .and_then(|v| v.parse::<u64>().ok())
                .unwrap_or(fallback)
        };

        Self {
            ssh_key_file: text("SSH_KEY_FILE")
                .map(expand_home_path)
                .unwrap_or(defaults.ssh_key_file),
            connect_timeout_ms: millis("VASTCTL_SSH_CONNECT_TIMEOUT_MS", defaults.connect_timeout_ms)
                .max(1),
            command_timeout_ms: millis("VASTCTL_SSH_COMMAND_TIMEOUT_MS", defaults.command_timeout_ms)
                .max(1),
            grace_period_ms: millis("VASTCTL_KILL_GRACE_MS", defaults.grace_period_ms),
            ready_timeout_secs: millis("VASTCTL_READY_TIMEOUT", defaults.ready_timeout_secs),
            ready_poll_interval_ms: millis("VASTCTL_READY_POLL_MS", defaults.ready_poll_interval_ms),
            api_key: text("VAST_API_KEY"),
            server_url: text("VAST_SERVER_URL")
                .map(|v| v.trim_end_matches('/').to_string())
                .unwrap_or(defaults.server_url),
            provision_user: text("USER_NAME").unwrap_or(defaults.provision_user),
        }
    }

    pub fn with_grace_period_ms(mut self, ms: u64) -> Self {
        self.grace_period_ms = ms;
        self
    }

    pub fn with_command_timeout_ms(mut self, ms: u64) -> Self {
        self.command_timeout_ms = ms.max(1);
        self
    }

    pub fn with_ready_poll_interval_ms(mut self, ms: u64) -> Self {
        self.ready_poll_interval_ms = ms;
        self
    }

    pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    pub fn with_server_url(mut self, url: impl Into<String>) -> Self {
        self.server_url = url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_millis(self.command_timeout_ms)
    }

    pub fn ready_timeout(&self) -> Duration {
        Duration::from_secs(self.ready_timeout_secs)
    }

    pub fn ready_poll_interval(&self) -> Duration {
        Duration::from_millis(self.ready_poll_interval_ms)
    }
}

pub fn expand_home_path(path: impl AsRef<Path>) -> PathBuf {
    let path = path.as_ref();
    let Some(text) = path.to_str() else {
        return path.to_path_buf();
    };
    let home = || std::env::var("HOME").ok().map(PathBuf::from);
    if text == "~" {
        return home().unwrap_or_else(|| path.to_path_buf());
    }
    match (text.strip_prefix("~/"), home()) {
        (Some(rest), Some(home)) => home.join(rest),
        _ => path.to_path_buf(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn empty_lookup_yields_defaults() {
        let config = Config::from_lookup(|_| None);
        assert_eq!(config.connect_timeout_ms, 30_000);
        assert_eq!(config.grace_period_ms, 2_000);
        assert_eq!(config.ready_timeout_secs, 300);
        assert_eq!(config.server_url, "https://console.vast.ai");
        assert_eq!(config.provision_user, "user01");
        assert!(config.api_key.is_none());
    }

    #[test]
    fn overrides_are_parsed_and_bad_numbers_fall_back() {
        let config = Config::from_lookup(lookup(&[
            ("SSH_KEY_FILE", "/keys/id_ed25519"),
            ("VASTCTL_KILL_GRACE_MS", "750"),
            ("VASTCTL_READY_TIMEOUT", "soon"),
            ("VASTCTL_SSH_COMMAND_TIMEOUT_MS", "0"),
            ("VAST_API_KEY", "  abc  "),
            ("VAST_SERVER_URL", "http://127.0.0.1:9000/"),
        ]));
        assert_eq!(config.ssh_key_file, PathBuf::from("/keys/id_ed25519"));
        assert_eq!(config.grace_period_ms, 750);
        assert_eq!(config.ready_timeout_secs, 300);
        assert_eq!(config.command_timeout_ms, 1);
        assert_eq!(config.api_key.as_deref(), Some("abc"));
        assert_eq!(config.server_url, "http://127.0.0.1:9000");
    }

    #[test]
    fn blank_values_are_ignored() {
        let config = Config::from_lookup(lookup(&[("VAST_API_KEY", "   ")]));
        assert!(config.api_key.is_none());
    }
}
