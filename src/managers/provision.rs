use crate::errors::RemoteError;
use crate::managers::tasks::TaskManager;
use crate::services::logger::Logger;
use crate::services::shell::RemoteEndpoint;
use crate::utils::quote::shell_quote;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;

static USER_NAME_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[a-z_][a-z0-9_-]{0,31}$").unwrap());

const SUDOERS_FILE: &str = "/etc/sudoers.d/90-nopasswd-sudo";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StepResult {
    pub step: String,
    pub command: String,
    pub exit_code: i32,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub stdout: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub stderr: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProvisionReport {
    pub host: String,
    pub port: u16,
    pub user_name: String,
    pub completed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failed_step: Option<String>,
    pub steps: Vec<StepResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ssh_command: Option<String>,
}

/// Bootstraps a fresh instance: system upgrade, an unprivileged sudo user
/// sharing root's authorized keys, passwordless sudo.
#[derive(Clone)]
pub struct ProvisionManager {
    logger: Logger,
    tasks: TaskManager,
}

impl ProvisionManager {
    pub fn new(logger: Logger, tasks: TaskManager) -> Self {
        Self {
            logger: logger.child("provision"),
            tasks,
        }
    }

    /// Runs each bootstrap step in its own session, stopping at the first
    /// step that exits non-zero. A failed step is reported, not raised;
    /// errors are reserved for connection and credential problems.
    pub async fn prepare_host(
        &self,
        endpoint: &RemoteEndpoint,
        user_name: &str,
    ) -> Result<ProvisionReport, RemoteError> {
        validate_user_name(user_name)?;
        if endpoint.user != "root" {
            self.logger.warn(
                "Host preparation expects a root session",
                Some(&serde_json::json!({ "target": endpoint.describe() })),
            );
        }

        let mut report = ProvisionReport {
            host: endpoint.host.clone(),
            port: endpoint.port,
            user_name: user_name.to_string(),
            completed: false,
            failed_step: None,
            steps: Vec::new(),
            ssh_command: None,
        };

        for (step, command) in bootstrap_steps(user_name) {
            self.logger.info(
                "Running bootstrap step",
                Some(&serde_json::json!({ "step": step, "target": endpoint.describe() })),
            );
            let output = self.tasks.exec(endpoint, &command).await?;
            let ok = output.success();
            report.steps.push(StepResult {
                step: step.to_string(),
                command,
                exit_code: output.exit_code,
                stdout: output.stdout,
                stderr: output.stderr,
            });
            if !ok {
                self.logger.error(
                    "Bootstrap step failed",
                    Some(&serde_json::json!({ "step": step, "exit_code": output.exit_code })),
                );
                report.failed_step = Some(step.to_string());
                return Ok(report);
            }
        }

        report.completed = true;
        report.ssh_command = Some(format!(
            "ssh -i {} -p {} {}@{}",
            shell_quote(&endpoint.key_file.display().to_string()),
            endpoint.port,
            user_name,
            endpoint.host
        ));
        self.logger.info(
            "Host prepared",
            Some(&serde_json::json!({ "target": endpoint.describe(), "user_name": user_name })),
        );
        Ok(report)
    }
}

pub fn validate_user_name(user_name: &str) -> Result<(), RemoteError> {
    if USER_NAME_RE.is_match(user_name) {
        return Ok(());
    }
    Err(
        RemoteError::invalid_params(format!("Invalid user_name: {:?}", user_name)).with_hint(
            "user_name must start with a lowercase letter or '_' and contain only [a-z0-9_-] (max 32).",
        ),
    )
}

fn bootstrap_steps(user: &str) -> Vec<(&'static str, String)> {
    vec![
        (
            "upgrade packages",
            "export DEBIAN_FRONTEND=noninteractive; apt update && apt upgrade -y".to_string(),
        ),
        ("create user", format!("useradd -m --shell /bin/bash {}", user)),
        ("grant sudo group", format!("usermod -aG sudo {}", user)),
        ("create ssh directory", format!("mkdir -p /home/{}/.ssh", user)),
        (
            "copy authorized keys",
            format!("cp ~/.ssh/authorized_keys /home/{}/.ssh/authorized_keys", user),
        ),
        (
            "fix ssh ownership",
            format!("chown -R {user}:{user} /home/{user}/.ssh", user = user),
        ),
        (
            "enable passwordless sudo",
            format!(
                "bash -c 'echo \"%sudo ALL=(ALL) NOPASSWD: ALL\" > {}'",
                SUDOERS_FILE
            ),
        ),
        ("restrict sudoers mode", format!("chmod 0440 {}", SUDOERS_FILE)),
    ]
}
