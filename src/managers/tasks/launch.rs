use super::{ensure_command, TaskManager};
use crate::constants::tasks::{MARKER_PREFIX, PID_READ_ATTEMPTS, PID_READ_INTERVAL_MS};
use crate::errors::RemoteError;
use crate::services::shell::{CommandOutput, RemoteEndpoint};
use crate::services::task::{self, TaskHandle};
use crate::utils::quote::{shell_quote, sleep_arg};

impl TaskManager {
    /// Starts `command` detached on the host and returns its handle.
    ///
    /// The command runs in its own session under `nohup`, with stdout and
    /// stderr going to the task log. The detached shell writes its own pid
    /// to the pid file first; the launch snippet polls that file for a
    /// bounded time and prints the pid back.
    pub async fn launch(
        &self,
        endpoint: &RemoteEndpoint,
        command: &str,
        task_name: Option<&str>,
    ) -> Result<TaskHandle, RemoteError> {
        let command = ensure_command(command)?;
        let task_id = task::generate_task_id(task_name)?;
        let script = build_launch_script(&task_id, &command);

        self.logger.info(
            "Starting background task",
            Some(&serde_json::json!({
                "target": endpoint.describe(),
                "task_id": task_id,
                "command": command,
            })),
        );
        let output = self
            .with_session(endpoint, move |session| session.run(&script))
            .await
            .map_err(|err| endpoint.tag(err).with_task(&task_id))?;

        let process_id = parse_launched_pid(&output)
            .map_err(|err| endpoint.tag(err).with_task(&task_id))?;
        let handle = TaskHandle::from_parts(endpoint.clone(), &task_id, process_id)?;
        self.logger.info(
            "Background task started",
            Some(&serde_json::json!({
                "task_id": handle.task_id,
                "process_id": handle.process_id,
                "log_path": handle.log_path,
            })),
        );
        Ok(handle)
    }
}

pub(super) fn build_launch_script(task_id: &str, command: &str) -> String {
    let pid_path = task::pid_path(task_id);
    let log_path = task::log_path(task_id);
    let inner = format!("echo $$ > {}\n{}", shell_quote(&pid_path), command);
    [
        "set -u".to_string(),
        format!("PID_PATH={}", shell_quote(&pid_path)),
        format!("LOG_PATH={}", shell_quote(&log_path)),
        "rm -f \"$PID_PATH\"".to_string(),
        "if command -v bash >/dev/null 2>&1; then RUNNER=bash; else RUNNER=sh; fi".to_string(),
        "if command -v setsid >/dev/null 2>&1; then DETACH=setsid; else DETACH=; fi".to_string(),
        format!(
            "nohup $DETACH \"$RUNNER\" -c {} > \"$LOG_PATH\" 2>&1 < /dev/null &",
            shell_quote(&inner)
        ),
        "i=0".to_string(),
        format!("while [ \"$i\" -lt {} ]; do", PID_READ_ATTEMPTS),
        "  if [ -s \"$PID_PATH\" ]; then pid=$(tr -dc '0-9' < \"$PID_PATH\"); if [ -n \"$pid\" ]; then echo \"$pid\"; exit 0; fi; fi".to_string(),
        format!("  sleep {}", sleep_arg(PID_READ_INTERVAL_MS)),
        "  i=$((i+1))".to_string(),
        "done".to_string(),
        format!("echo \"{}NO_PID__\"", MARKER_PREFIX),
        "exit 3".to_string(),
    ]
    .join("\n")
}

pub(super) fn parse_launched_pid(output: &CommandOutput) -> Result<u32, RemoteError> {
    let failure = |message: String| {
        RemoteError::launch_failure(message).with_details(serde_json::json!({
            "stdout": output.stdout,
            "stderr": output.stderr,
            "exit_code": output.exit_code,
        }))
    };
    if !output.success() {
        return Err(failure(format!(
            "Error starting background task (exit status {})",
            output.exit_code
        )));
    }
    output
        .stdout
        .lines()
        .last()
        .map(str::trim)
        .and_then(|line| line.parse::<u32>().ok())
        .filter(|pid| *pid > 0)
        .ok_or_else(|| failure(format!("Failed to parse process ID: {:?}", output.stdout)))
}
