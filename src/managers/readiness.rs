use crate::constants::readiness::{
    STATUS_EXITED, STATUS_FAILED, STATUS_RUNNING, STATUS_TIMED_OUT, STATUS_UNKNOWN,
};
use crate::errors::RemoteError;
use crate::services::config::Config;
use crate::services::logger::Logger;
use async_trait::async_trait;
use serde::Serialize;
use std::time::Duration;
use tokio::time::Instant;

/// Anything that can report an instance's lifecycle status string
/// (`"running"`, `"loading"`, `"exited"`, ...).
#[async_trait]
pub trait InstanceStatusSource: Send + Sync {
    async fn query_instance_status(&self, instance_id: u64) -> Result<String, RemoteError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReadinessOutcome {
    Ready,
    FailedTerminal,
    TimedOut,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReadinessReport {
    pub instance_id: u64,
    pub outcome: ReadinessOutcome,
    pub status: String,
    pub elapsed_ms: u64,
    pub polls: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recommendation: Option<String>,
}

impl ReadinessReport {
    pub fn is_ready(&self) -> bool {
        self.outcome == ReadinessOutcome::Ready
    }
}

#[derive(Clone)]
pub struct ReadinessPoller {
    logger: Logger,
    poll_interval: Duration,
}

impl ReadinessPoller {
    pub fn new(logger: Logger, config: &Config) -> Self {
        Self {
            logger: logger.child("readiness"),
            poll_interval: config.ready_poll_interval(),
        }
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Polls `source` until the instance is running, reports a terminal
    /// failure, or `timeout` elapses. Query errors are logged and polling
    /// continues. Never fails: every way out is a report.
    pub async fn wait_ready(
        &self,
        source: &dyn InstanceStatusSource,
        instance_id: u64,
        timeout: Duration,
    ) -> ReadinessReport {
        let started = Instant::now();
        let mut polls = 0u32;
        let mut last_status = STATUS_UNKNOWN.to_string();

        while started.elapsed() < timeout {
            polls += 1;
            match source.query_instance_status(instance_id).await {
                Ok(status) => {
                    let normalized = status.trim().to_ascii_lowercase();
                    if normalized == STATUS_RUNNING {
                        let report = self.report(
                            instance_id,
                            ReadinessOutcome::Ready,
                            status,
                            started,
                            polls,
                        );
                        self.logger.info(
                            "Instance is ready",
                            Some(&serde_json::json!({
                                "instance_id": instance_id,
                                "elapsed_ms": report.elapsed_ms,
                            })),
                        );
                        return report;
                    }
                    if normalized == STATUS_FAILED || normalized == STATUS_EXITED {
                        self.logger.error(
                            "Instance reached a terminal status",
                            Some(&serde_json::json!({ "instance_id": instance_id, "status": status })),
                        );
                        return self.report(
                            instance_id,
                            ReadinessOutcome::FailedTerminal,
                            status,
                            started,
                            polls,
                        );
                    }
                    self.logger.debug(
                        "Instance not ready yet",
                        Some(&serde_json::json!({ "instance_id": instance_id, "status": status })),
                    );
                    last_status = status;
                }
                Err(err) => {
                    self.logger.warn(
                        "Instance status query failed",
                        Some(&serde_json::json!({
                            "instance_id": instance_id,
                            "error": err.message,
                        })),
                    );
                }
            }

            let remaining = timeout.saturating_sub(started.elapsed());
            if remaining.is_zero() {
                break;
            }
            tokio::time::sleep(self.poll_interval.min(remaining)).await;
        }

        self.logger.warn(
            "Instance did not become ready in time",
            Some(&serde_json::json!({
                "instance_id": instance_id,
                "timeout_ms": timeout.as_millis() as u64,
                "last_status": last_status,
            })),
        );
        self.report(
            instance_id,
            ReadinessOutcome::TimedOut,
            STATUS_TIMED_OUT.to_string(),
            started,
            polls,
        )
    }

    fn report(
        &self,
        instance_id: u64,
        outcome: ReadinessOutcome,
        status: String,
        started: Instant,
        polls: u32,
    ) -> ReadinessReport {
        let recommendation = match outcome {
            ReadinessOutcome::Ready => None,
            ReadinessOutcome::FailedTerminal => Some(format!(
                "Instance {} reported '{}'. Destroy it and create a new one.",
                instance_id, status
            )),
            ReadinessOutcome::TimedOut => Some(format!(
                "Instance {} did not start in time. Destroy it and create a new one instead of waiting longer.",
                instance_id
            )),
        };
        ReadinessReport {
            instance_id,
            outcome,
            status,
            elapsed_ms: started.elapsed().as_millis() as u64,
            polls,
            recommendation,
        }
    }
}
