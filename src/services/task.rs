//! Identity of a background task.
//!
//! Nothing about a task is stored locally. Both artifact paths are pure
//! functions of the task id, so any process that knows the id, the pid and
//! the endpoint can rebuild the [`TaskHandle`] and monitor or stop the task.

use crate::constants::tasks::{ARTIFACT_DIR, ARTIFACT_PREFIX, TASK_SUFFIX_LEN};
use crate::errors::RemoteError;
use crate::services::shell::RemoteEndpoint;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

static TASK_ID_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[A-Za-z0-9_.-]{1,128}$").unwrap());
static TASK_NAME_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[A-Za-z0-9_.-]{1,64}$").unwrap());

pub fn log_path(task_id: &str) -> String {
    format!("{}/{}{}.log", ARTIFACT_DIR, ARTIFACT_PREFIX, task_id)
}

pub fn pid_path(task_id: &str) -> String {
    format!("{}/{}{}.pid", ARTIFACT_DIR, ARTIFACT_PREFIX, task_id)
}

pub fn validate_task_id(task_id: &str) -> Result<(), RemoteError> {
    if TASK_ID_RE.is_match(task_id) {
        return Ok(());
    }
    Err(
        RemoteError::invalid_params(format!("Invalid task_id: {:?}", task_id))
            .with_hint("task_id may only contain letters, digits, '_', '.' and '-'."),
    )
}

/// `<name>_<8 hex>` or just `<8 hex>`. The suffix comes from a v4 UUID.
pub fn generate_task_id(task_name: Option<&str>) -> Result<String, RemoteError> {
    let suffix: String = uuid::Uuid::new_v4()
        .simple()
        .to_string()
        .chars()
        .take(TASK_SUFFIX_LEN)
        .collect();
    match task_name.map(str::trim).filter(|name| !name.is_empty()) {
        None => Ok(suffix),
        Some(name) if TASK_NAME_RE.is_match(name) => Ok(format!("{}_{}", name, suffix)),
        Some(name) => Err(
            RemoteError::invalid_params(format!("Invalid task_name: {:?}", name))
                .with_hint("task_name may only contain letters, digits, '_', '.' and '-' (max 64)."),
        ),
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskHandle {
    pub task_id: String,
    pub process_id: u32,
    pub log_path: String,
    pub pid_path: String,
    pub endpoint: RemoteEndpoint,
}

impl TaskHandle {
    pub fn from_parts(
        endpoint: RemoteEndpoint,
        task_id: &str,
        process_id: u32,
    ) -> Result<Self, RemoteError> {
        validate_task_id(task_id)?;
        if process_id == 0 {
            return Err(RemoteError::invalid_params("process_id must be positive"));
        }
        Ok(Self {
            task_id: task_id.to_string(),
            process_id,
            log_path: log_path(task_id),
            pid_path: pid_path(task_id),
            endpoint,
        })
    }

    pub fn tag(&self, err: RemoteError) -> RemoteError {
        self.endpoint
            .tag(err)
            .with_task(&self.task_id)
            .with_detail("process_id", self.process_id)
    }
}

/// Derived on every query, never stored.
///
/// `Running` only means the pid answers a signal-0 check for the connecting
/// user. Once the task exits the OS may hand the same pid to an unrelated
/// process, which then also reads as `Running`; no start-time check is made.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskState {
    Running,
    Stopped,
}

impl TaskState {
    pub fn parse(raw: &str) -> Self {
        if raw.trim() == "RUNNING" {
            TaskState::Running
        } else {
            TaskState::Stopped
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatusReport {
    pub task_id: String,
    pub process_id: u32,
    pub state: TaskState,
    pub log_tail: String,
    pub total_log_lines: u64,
    pub tail_lines: usize,
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TerminationOutcome {
    AlreadyStopped,
    Terminated,
    ForceKilled,
}

impl TerminationOutcome {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim() {
            "ALREADY_STOPPED" => Some(TerminationOutcome::AlreadyStopped),
            "TERMINATED" => Some(TerminationOutcome::Terminated),
            "FORCE_KILLED" => Some(TerminationOutcome::ForceKilled),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TerminationReport {
    pub task_id: String,
    pub process_id: u32,
    pub outcome: TerminationOutcome,
    pub cleanup_ok: bool,
    pub removed: Vec<String>,
    pub host: String,
    pub port: u16,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn endpoint() -> RemoteEndpoint {
        RemoteEndpoint::new("10.0.0.2", 22, "root", "/k")
    }

    #[test]
    fn paths_are_derived_from_task_id() {
        assert_eq!(log_path("train_1a2b3c4d"), "/tmp/ssh_task_train_1a2b3c4d.log");
        assert_eq!(pid_path("train_1a2b3c4d"), "/tmp/ssh_task_train_1a2b3c4d.pid");
    }

    #[test]
    fn generated_ids_are_unique_and_prefixed() {
        let a = generate_task_id(Some("train")).expect("id");
        let b = generate_task_id(Some("train")).expect("id");
        assert_ne!(a, b);
        assert!(a.starts_with("train_"));
        assert_eq!(a.len(), "train_".len() + TASK_SUFFIX_LEN);
        let bare = generate_task_id(None).expect("id");
        assert_eq!(bare.len(), TASK_SUFFIX_LEN);
        assert!(bare.chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(generate_task_id(Some("  ")).expect("id").len(), TASK_SUFFIX_LEN);
    }

    #[test]
    fn task_names_cannot_carry_shell_syntax() {
        assert!(generate_task_id(Some("x; rm -rf /")).is_err());
        assert!(generate_task_id(Some("../etc")).is_err());
        assert!(TaskHandle::from_parts(endpoint(), "a b", 10).is_err());
        assert!(TaskHandle::from_parts(endpoint(), "$(id)", 10).is_err());
    }

    #[test]
    fn handle_rebuilds_from_parts() {
        let handle = TaskHandle::from_parts(endpoint(), "job_0011aabb", 4242).expect("handle");
        assert_eq!(handle.log_path, "/tmp/ssh_task_job_0011aabb.log");
        assert_eq!(handle.pid_path, "/tmp/ssh_task_job_0011aabb.pid");
        assert!(TaskHandle::from_parts(endpoint(), "job", 0).is_err());
    }

    #[test]
    fn tagged_errors_carry_task_and_endpoint() {
        let handle = TaskHandle::from_parts(endpoint(), "job_0011aabb", 4242).expect("handle");
        let err = handle.tag(RemoteError::connect("refused"));
        let details = err.details.expect("details");
        assert_eq!(details["host"], "10.0.0.2");
        assert_eq!(details["task_id"], "job_0011aabb");
        assert_eq!(details["process_id"], 4242);
    }

    #[test]
    fn state_and_outcome_parse() {
        assert_eq!(TaskState::parse("RUNNING\n"), TaskState::Running);
        assert_eq!(TaskState::parse("anything"), TaskState::Stopped);
        assert_eq!(
            TerminationOutcome::parse("FORCE_KILLED"),
            Some(TerminationOutcome::ForceKilled)
        );
        assert_eq!(TerminationOutcome::parse("??"), None);
    }
}
