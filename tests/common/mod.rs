#![allow(dead_code)]

use once_cell::sync::Lazy;
use std::path::PathBuf;
use tokio::sync::Mutex;
use vastctl::services::shell::RemoteEndpoint;

pub static ENV_LOCK: Lazy<Mutex<()>> = Lazy::new(|| Mutex::new(()));

pub fn fixture_key(name: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("tests/fixtures/keys")
        .join(name)
}

/// Endpoint for the local transport; host and user only label log lines.
pub fn local_endpoint() -> RemoteEndpoint {
    RemoteEndpoint::new("localhost", 22, "tester", fixture_key("id_ed25519"))
}
