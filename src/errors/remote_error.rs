use serde::Serialize;
use serde_json::{Map, Value};
use std::error::Error;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RemoteErrorKind {
    InvalidParams,
    Connect,
    Auth,
    KeyLoad,
    KeyFileNotFound,
    PassphraseRequired,
    LaunchFailure,
    Timeout,
    Internal,
}

/// Failure surfaced by a remote operation.
///
/// `details` always carries the endpoint (and task id when one exists) once
/// the error has passed through a manager, so it can be correlated with the
/// artifacts left on the host.
#[derive(Debug, Clone, Serialize)]
pub struct RemoteError {
    pub kind: RemoteErrorKind,
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hint: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
    pub retryable: bool,
}

impl RemoteError {
    pub fn new(kind: RemoteErrorKind, code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind,
            code: code.into(),
            message: message.into(),
            hint: None,
            details: None,
            retryable: matches!(kind, RemoteErrorKind::Connect | RemoteErrorKind::Timeout),
        }
    }

    pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
        self.hint = Some(hint.into());
        self
    }

    pub fn with_details(mut self, details: Value) -> Self {
        self.details = Some(details);
        self
    }

    /// Merges `key = value` into the details object, keeping what is already there.
    pub fn with_detail(mut self, key: &str, value: impl Into<Value>) -> Self {
        let mut map = match self.details.take() {
            Some(Value::Object(map)) => map,
            Some(other) => {
                let mut map = Map::new();
                map.insert("context".to_string(), other);
                map
            }
            None => Map::new(),
        };
        map.entry(key.to_string()).or_insert_with(|| value.into());
        self.details = Some(Value::Object(map));
        self
    }

    pub fn with_endpoint(self, host: &str, port: u16, user: &str) -> Self {
        self.with_detail("host", host)
            .with_detail("port", port)
            .with_detail("user", user)
    }

    pub fn with_task(self, task_id: &str) -> Self {
        self.with_detail("task_id", task_id)
    }

    pub fn invalid_params(message: impl Into<String>) -> Self {
        Self::new(RemoteErrorKind::InvalidParams, "INVALID_PARAMS", message)
    }

    pub fn connect(message: impl Into<String>) -> Self {
        Self::new(RemoteErrorKind::Connect, "CONNECT", message)
    }

    pub fn auth(message: impl Into<String>) -> Self {
        Self::new(RemoteErrorKind::Auth, "AUTH", message)
    }

    pub fn key_load(message: impl Into<String>) -> Self {
        Self::new(RemoteErrorKind::KeyLoad, "KEY_LOAD", message)
    }

    pub fn key_file_not_found(message: impl Into<String>) -> Self {
        Self::new(RemoteErrorKind::KeyFileNotFound, "KEY_FILE_NOT_FOUND", message)
    }

    pub fn passphrase_required(message: impl Into<String>) -> Self {
        Self::new(
            RemoteErrorKind::PassphraseRequired,
            "PASSPHRASE_REQUIRED",
            message,
        )
    }

    pub fn launch_failure(message: impl Into<String>) -> Self {
        Self::new(RemoteErrorKind::LaunchFailure, "LAUNCH_FAILURE", message)
            .with_hint("Retry the whole launch; a partially started task cannot be resumed.")
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(RemoteErrorKind::Timeout, "TIMEOUT", message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(RemoteErrorKind::Internal, "INTERNAL", message)
    }
}

impl fmt::Display for RemoteError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)?;
        if let Some(Value::Object(details)) = &self.details {
            if let (Some(host), Some(port)) = (details.get("host"), details.get("port")) {
                let host = host.as_str().unwrap_or_default();
                write!(f, " ({}:{}", host, port)?;
                if let Some(task) = details.get("task_id").and_then(Value::as_str) {
                    write!(f, ", task {}", task)?;
                }
                write!(f, ")")?;
            }
        }
        Ok(())
    }
}

impl Error for RemoteError {}

impl From<std::io::Error> for RemoteError {
    fn from(err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::TimedOut => RemoteError::timeout(err.to_string()),
            _ => RemoteError::internal(err.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connect_and_timeout_are_retryable() {
        assert!(RemoteError::connect("refused").retryable);
        assert!(RemoteError::timeout("slow").retryable);
        assert!(!RemoteError::auth("denied").retryable);
        assert!(!RemoteError::launch_failure("no pid").retryable);
    }

    #[test]
    fn display_includes_endpoint_and_task() {
        let err = RemoteError::connect("Connection refused")
            .with_endpoint("10.0.0.5", 2222, "root")
            .with_task("train_ab12cd34");
        assert_eq!(
            err.to_string(),
            "Connection refused (10.0.0.5:2222, task train_ab12cd34)"
        );
    }

    #[test]
    fn with_detail_keeps_first_value() {
        let err = RemoteError::internal("x")
            .with_detail("host", "a")
            .with_detail("host", "b");
        let details = err.details.expect("details");
        assert_eq!(details.get("host").and_then(Value::as_str), Some("a"));
    }
}
