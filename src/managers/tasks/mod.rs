//! Background task lifecycle on a remote host: launch, monitor, terminate,
//! plus plain one-shot execution.
//!
//! Every call opens its own session and keeps nothing afterwards. The host's
//! `/tmp/ssh_task_*` files and its process table are the only record of a
//! task, so calls for the same task may come from different processes.

use crate::errors::RemoteError;
use crate::services::config::Config;
use crate::services::logger::Logger;
use crate::services::shell::{CommandOutput, RemoteEndpoint, RemoteShell, ShellSession};
use std::sync::Arc;

mod launch;
mod monitor;
mod terminate;

/// Shell functions over `$PID`, the detached wrapper shell.
///
/// `alive` is true while the wrapper exists, is signalable by the connecting
/// user and is not a zombie. `group_alive` is true while any non-zombie
/// process is still in the wrapper's process group, which outlives the
/// wrapper when a child survives it. `task_alive` is either. Without `/proc`
/// both degrade to `kill -0`.
const LIVENESS_FNS: &str = r#"alive() { kill -0 "$PID" 2>/dev/null && [ "$(sed 's/.*) //' "/proc/$PID/stat" 2>/dev/null | cut -c1)" != "Z" ]; }
group_alive() {
  if [ -d /proc/self ]; then
    for stat in /proc/[0-9]*/stat; do
      read -r line 2>/dev/null < "$stat" || continue
      set -- ${line##*) }
      if [ "${3-}" = "$PID" ] && [ "${1-}" != "Z" ]; then return 0; fi
    done
    return 1
  fi
  kill -0 -- "-$PID" 2>/dev/null
}
task_alive() { alive || group_alive; }"#;

#[derive(Clone)]
pub struct TaskManager {
    logger: Logger,
    transport: Arc<dyn RemoteShell>,
    grace_period_ms: u64,
}

impl TaskManager {
    pub fn new(logger: Logger, transport: Arc<dyn RemoteShell>, config: &Config) -> Self {
        Self {
            logger: logger.child("tasks"),
            transport,
            grace_period_ms: config.grace_period_ms,
        }
    }

    /// Runs `command` once and returns its streams. A non-zero exit code is
    /// part of the result, not an error.
    pub async fn exec(
        &self,
        endpoint: &RemoteEndpoint,
        command: &str,
    ) -> Result<CommandOutput, RemoteError> {
        let command = ensure_command(command)?;
        self.logger.info(
            "Executing command",
            Some(&serde_json::json!({ "target": endpoint.describe(), "command": command })),
        );
        let output = self
            .with_session(endpoint, move |session| session.run(&command))
            .await
            .map_err(|err| endpoint.tag(err))?;
        self.logger.debug(
            "Command finished",
            Some(&serde_json::json!({
                "exit_code": output.exit_code,
                "duration_ms": output.duration_ms,
            })),
        );
        Ok(output)
    }

    async fn with_session<F, T>(
        &self,
        endpoint: &RemoteEndpoint,
        handler: F,
    ) -> Result<T, RemoteError>
    where
        F: FnOnce(&mut dyn ShellSession) -> Result<T, RemoteError> + Send + 'static,
        T: Send + 'static,
    {
        let transport = self.transport.clone();
        let endpoint = endpoint.clone();
        tokio::task::spawn_blocking(move || {
            let mut session = transport.open(&endpoint)?;
            handler(session.as_mut())
        })
        .await
        .map_err(|_| RemoteError::internal("Session worker task failed"))?
    }
}

fn ensure_command(command: &str) -> Result<String, RemoteError> {
    if command.trim().is_empty() {
        return Err(RemoteError::invalid_params("command must be a non-empty string"));
    }
    if command.contains('\0') {
        return Err(RemoteError::invalid_params("command must not contain NUL bytes"));
    }
    Ok(command.to_string())
}
