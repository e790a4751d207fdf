use super::{TaskManager, LIVENESS_FNS};
use crate::constants::tasks::MAX_TAIL_LINES;
use crate::errors::RemoteError;
use crate::services::task::{StatusReport, TaskHandle, TaskState};
use crate::utils::quote::shell_quote;

impl TaskManager {
    /// Liveness, the last `tail_lines` log lines and the total log line
    /// count, gathered over a single session. A missing log reads as empty.
    pub async fn status(
        &self,
        handle: &TaskHandle,
        tail_lines: usize,
    ) -> Result<StatusReport, RemoteError> {
        let tail_lines = tail_lines.min(MAX_TAIL_LINES);
        let scripts = MonitorScripts::new(handle, tail_lines);

        let (state, log_tail, total) = self
            .with_session(&handle.endpoint, move |session| {
                let state = session.run(&scripts.liveness)?;
                let tail = session.run(&scripts.tail)?;
                let count = session.run(&scripts.line_count)?;
                Ok((state.stdout, tail.stdout, count.stdout))
            })
            .await
            .map_err(|err| handle.tag(err))?;

        let report = StatusReport {
            task_id: handle.task_id.clone(),
            process_id: handle.process_id,
            state: TaskState::parse(&state),
            log_tail,
            total_log_lines: total.trim().parse::<u64>().unwrap_or(0),
            tail_lines,
            host: handle.endpoint.host.clone(),
            port: handle.endpoint.port,
        };
        self.logger.debug(
            "Task status",
            Some(&serde_json::json!({
                "task_id": report.task_id,
                "state": report.state,
                "total_log_lines": report.total_log_lines,
            })),
        );
        Ok(report)
    }
}

struct MonitorScripts {
    liveness: String,
    tail: String,
    line_count: String,
}

impl MonitorScripts {
    fn new(handle: &TaskHandle, tail_lines: usize) -> Self {
        let log = shell_quote(&handle.log_path);
        Self {
            liveness: format!(
                "PID={}\n{}\nif task_alive; then echo RUNNING; else echo STOPPED; fi",
                handle.process_id, LIVENESS_FNS
            ),
            tail: format!("if [ -f {log} ]; then tail -n {tail_lines} {log}; fi"),
            line_count: format!("if [ -f {log} ]; then wc -l < {log}; else echo 0; fi"),
        }
    }
}
