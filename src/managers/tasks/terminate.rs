use super::{TaskManager, LIVENESS_FNS};
use crate::constants::tasks::MARKER_PREFIX;
use crate::errors::RemoteError;
use crate::services::task::{TaskHandle, TerminationOutcome, TerminationReport};
use crate::utils::quote::{shell_quote, sleep_arg};

impl TaskManager {
    /// Stops the task and removes its pid and log files.
    ///
    /// SIGTERM goes to the task's process group (falling back to the pid
    /// alone), then SIGKILL to the group if any member of it survives the
    /// grace period. Cleanup runs whatever the outcome, including for tasks
    /// that were already gone.
    pub async fn terminate(&self, handle: &TaskHandle) -> Result<TerminationReport, RemoteError> {
        let script = build_terminate_script(handle, self.grace_period_ms);
        self.logger.info(
            "Terminating task",
            Some(&serde_json::json!({
                "task_id": handle.task_id,
                "process_id": handle.process_id,
                "grace_period_ms": self.grace_period_ms,
            })),
        );
        let output = self
            .with_session(&handle.endpoint, move |session| session.run(&script))
            .await
            .map_err(|err| handle.tag(err))?;

        let outcome = output
            .marker("OUTCOME")
            .and_then(TerminationOutcome::parse)
            .ok_or_else(|| {
                handle.tag(
                    RemoteError::internal("Unexpected output from termination script")
                        .with_detail("stdout", output.stdout.clone())
                        .with_detail("stderr", output.stderr.clone()),
                )
            })?;
        let cleanup_ok = output.marker("CLEANUP") == Some("1");
        if !cleanup_ok {
            self.logger.warn(
                "Task artifacts were not removed",
                Some(&serde_json::json!({ "task_id": handle.task_id, "stderr": output.stderr })),
            );
        }

        let removed = if cleanup_ok {
            vec![handle.pid_path.clone(), handle.log_path.clone()]
        } else {
            Vec::new()
        };
        let report = TerminationReport {
            task_id: handle.task_id.clone(),
            process_id: handle.process_id,
            outcome,
            cleanup_ok,
            removed,
            host: handle.endpoint.host.clone(),
            port: handle.endpoint.port,
        };
        self.logger.info(
            "Task terminated",
            Some(&serde_json::json!({ "task_id": report.task_id, "outcome": report.outcome })),
        );
        Ok(report)
    }
}

fn build_terminate_script(handle: &TaskHandle, grace_period_ms: u64) -> String {
    [
        "set -u".to_string(),
        format!("PID={}", handle.process_id),
        LIVENESS_FNS.to_string(),
        r#"send_signal() { kill -s "$1" -- "-$PID" 2>/dev/null || kill -s "$1" "$PID" 2>/dev/null; }"#
            .to_string(),
        "if ! task_alive; then".to_string(),
        "  outcome=ALREADY_STOPPED".to_string(),
        "else".to_string(),
        "  send_signal TERM".to_string(),
        format!("  sleep {}", sleep_arg(grace_period_ms)),
        "  if task_alive; then send_signal KILL; outcome=FORCE_KILLED; else outcome=TERMINATED; fi"
            .to_string(),
        "fi".to_string(),
        format!(
            "if rm -f {} {}; then cleanup=1; else cleanup=0; fi",
            shell_quote(&handle.pid_path),
            shell_quote(&handle.log_path)
        ),
        format!("echo \"{}OUTCOME__=$outcome\"", MARKER_PREFIX),
        format!("echo \"{}CLEANUP__=$cleanup\"", MARKER_PREFIX),
    ]
    .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::shell::RemoteEndpoint;

    #[test]
    fn script_escalates_after_the_grace_period() {
        let endpoint = RemoteEndpoint::new("10.0.0.2", 22, "root", "/k");
        let handle = TaskHandle::from_parts(endpoint, "job_0011aabb", 4242).expect("handle");
        let script = build_terminate_script(&handle, 1500);
        assert!(script.contains("PID=4242"));
        assert!(script.contains("  sleep 1.500"));
        assert!(script.contains("if ! task_alive; then"));
        assert!(script.contains("  if task_alive; then send_signal KILL;"));
        let term = script.find("send_signal TERM").expect("term");
        let kill = script.find("send_signal KILL").expect("kill");
        assert!(term < kill);
        assert!(script.contains(
            "rm -f '/tmp/ssh_task_job_0011aabb.pid' '/tmp/ssh_task_job_0011aabb.log'"
        ));
        assert!(script.ends_with("echo \"__VASTCTL_CLEANUP__=$cleanup\""));
    }
}
