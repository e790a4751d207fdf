mod common;
use common::ENV_LOCK;

use std::path::PathBuf;
use vastctl::services::config::Config;
use vastctl::services::logger::{LogLevel, Logger};

const KEYS: &[&str] = &[
    "SSH_KEY_FILE",
    "VASTCTL_KILL_GRACE_MS",
    "VASTCTL_READY_POLL_MS",
    "VAST_API_KEY",
    "VASTCTL_LOG_LEVEL",
    "LOG_LEVEL",
];

fn snapshot() -> Vec<(&'static str, Option<String>)> {
    KEYS.iter().map(|key| (*key, std::env::var(key).ok())).collect()
}

fn restore_env(previous: Vec<(&'static str, Option<String>)>) {
    for (key, value) in previous {
        match value {
            Some(value) => std::env::set_var(key, value),
            None => std::env::remove_var(key),
        }
    }
}

#[tokio::test]
async fn from_env_reads_overrides() {
    let _guard = ENV_LOCK.lock().await;
    let previous = snapshot();

    std::env::set_var("SSH_KEY_FILE", "/opt/keys/id_ed25519");
    std::env::set_var("VASTCTL_KILL_GRACE_MS", "250");
    std::env::set_var("VASTCTL_READY_POLL_MS", "1000");
    std::env::set_var("VAST_API_KEY", "secret");

    let config = Config::from_env();
    assert_eq!(config.ssh_key_file, PathBuf::from("/opt/keys/id_ed25519"));
    assert_eq!(config.grace_period_ms, 250);
    assert_eq!(config.ready_poll_interval_ms, 1000);
    assert_eq!(config.api_key.as_deref(), Some("secret"));

    restore_env(previous);
}

#[tokio::test]
async fn key_file_defaults_under_home() {
    let _guard = ENV_LOCK.lock().await;
    let previous = snapshot();

    std::env::remove_var("SSH_KEY_FILE");
    let config = Config::from_env();
    assert!(config.ssh_key_file.ends_with(".ssh/id_rsa"));
    if let Ok(home) = std::env::var("HOME") {
        assert!(config.ssh_key_file.starts_with(home));
    }

    restore_env(previous);
}

#[tokio::test]
async fn log_level_prefers_the_scoped_variable() {
    let _guard = ENV_LOCK.lock().await;
    let previous = snapshot();

    std::env::set_var("LOG_LEVEL", "error");
    std::env::set_var("VASTCTL_LOG_LEVEL", "debug");
    assert!(Logger::new("test").enabled(LogLevel::Debug));

    std::env::remove_var("VASTCTL_LOG_LEVEL");
    let logger = Logger::new("test");
    assert!(logger.enabled(LogLevel::Error));
    assert!(!logger.enabled(LogLevel::Warn));

    restore_env(previous);
}
