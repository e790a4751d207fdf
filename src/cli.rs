use crate::app::{App, TransportKind};
use crate::constants::{network, tasks};
use crate::errors::RemoteError;
use crate::services::config::Config;
use crate::services::shell::RemoteEndpoint;
use crate::services::task::TaskHandle;
use clap::{Args, Parser, Subcommand};
use serde::Serialize;
use std::path::PathBuf;
use std::time::Duration;

/// Exit code for a report whose outcome is a failure (instance not ready,
/// bootstrap step failed). Errors exit with 1.
const EXIT_UNSUCCESSFUL: i32 = 2;

#[derive(Debug, Parser)]
#[command(
    name = "vastctl",
    version,
    about = "Run and supervise background jobs on rented instances over SSH"
)]
pub struct Cli {
    /// Run session commands with the local shell instead of over SSH.
    #[arg(long, global = true)]
    local: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Args)]
struct EndpointArgs {
    /// Resolve host and port from the Vast.ai API.
    #[arg(long, conflicts_with = "host", required_unless_present = "host")]
    instance_id: Option<u64>,

    #[arg(long, short = 'H')]
    host: Option<String>,

    /// Ignored with --instance-id.
    #[arg(long, short = 'p', default_value_t = network::SSH_DEFAULT_PORT)]
    port: u16,

    #[arg(long, short = 'u', default_value = network::SSH_DEFAULT_USER)]
    user: String,

    /// Private key; defaults to SSH_KEY_FILE or ~/.ssh/id_rsa.
    #[arg(long, short = 'k')]
    key_file: Option<PathBuf>,
}

impl EndpointArgs {
    async fn endpoint(&self, app: &App) -> Result<RemoteEndpoint, RemoteError> {
        let (host, port) = resolve_host(app, self.instance_id, self.host.clone(), self.port).await?;
        Ok(RemoteEndpoint::new(
            host,
            port,
            self.user.clone(),
            resolve_key_file(self.key_file.as_ref(), &app.config),
        ))
    }
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run a command once and print its output.
    Exec {
        #[command(flatten)]
        target: EndpointArgs,
        #[arg(required = true, trailing_var_arg = true, allow_hyphen_values = true)]
        command: Vec<String>,
    },
    /// Start a detached background task and print its handle.
    Launch {
        #[command(flatten)]
        target: EndpointArgs,
        /// Prefix for the generated task id.
        #[arg(long)]
        name: Option<String>,
        #[arg(required = true, trailing_var_arg = true, allow_hyphen_values = true)]
        command: Vec<String>,
    },
    /// Report whether a task is running, with the tail of its log.
    Status {
        #[command(flatten)]
        target: EndpointArgs,
        #[arg(long)]
        task_id: String,
        #[arg(long)]
        pid: u32,
        #[arg(long, default_value_t = tasks::DEFAULT_TAIL_LINES)]
        tail: usize,
    },
    /// Stop a task (TERM, then KILL after the grace period) and remove its files.
    Kill {
        #[command(flatten)]
        target: EndpointArgs,
        #[arg(long)]
        task_id: String,
        #[arg(long)]
        pid: u32,
        #[arg(long)]
        grace_ms: Option<u64>,
    },
    /// Wait for a Vast.ai instance to reach the running state.
    WaitReady {
        #[arg(long)]
        instance_id: u64,
        /// Seconds; defaults to VASTCTL_READY_TIMEOUT or 300.
        #[arg(long)]
        timeout: Option<u64>,
    },
    /// Create a sudo user on a fresh instance, connecting as root.
    Prepare {
        /// Resolve host and port from the Vast.ai API.
        #[arg(long, conflicts_with = "host", required_unless_present = "host")]
        instance_id: Option<u64>,
        #[arg(long, short = 'H')]
        host: Option<String>,
        #[arg(long, short = 'p', default_value_t = network::SSH_DEFAULT_PORT)]
        port: u16,
        #[arg(long, short = 'k')]
        key_file: Option<PathBuf>,
        /// Defaults to USER_NAME or user01.
        #[arg(long)]
        user_name: Option<String>,
    },
}

pub async fn run() -> Result<i32, RemoteError> {
    let cli = Cli::parse();
    let mut config = Config::from_env();
    if let Command::Kill {
        grace_ms: Some(grace_ms),
        ..
    } = &cli.command
    {
        config = config.with_grace_period_ms(*grace_ms);
    }
    let transport = if cli.local {
        TransportKind::Local
    } else {
        TransportKind::Ssh
    };
    let app = App::initialize(config, transport)?;
    execute(&app, cli.command).await
}

async fn execute(app: &App, command: Command) -> Result<i32, RemoteError> {
    let config = &app.config;
    match command {
        Command::Exec { target, command } => {
            let output = app
                .tasks
                .exec(&target.endpoint(app).await?, &command.join(" "))
                .await?;
            print_json(&output)?;
            Ok(if output.success() { 0 } else { EXIT_UNSUCCESSFUL })
        }
        Command::Launch {
            target,
            name,
            command,
        } => {
            let handle = app
                .tasks
                .launch(&target.endpoint(app).await?, &command.join(" "), name.as_deref())
                .await?;
            print_json(&handle)?;
            Ok(0)
        }
        Command::Status {
            target,
            task_id,
            pid,
            tail,
        } => {
            let handle = TaskHandle::from_parts(target.endpoint(app).await?, &task_id, pid)?;
            print_json(&app.tasks.status(&handle, tail).await?)?;
            Ok(0)
        }
        Command::Kill {
            target,
            task_id,
            pid,
            ..
        } => {
            let handle = TaskHandle::from_parts(target.endpoint(app).await?, &task_id, pid)?;
            print_json(&app.tasks.terminate(&handle).await?)?;
            Ok(0)
        }
        Command::WaitReady {
            instance_id,
            timeout,
        } => {
            let timeout = timeout
                .map(Duration::from_secs)
                .unwrap_or_else(|| config.ready_timeout());
            let report = app
                .readiness
                .wait_ready(app.vast.as_ref(), instance_id, timeout)
                .await;
            print_json(&report)?;
            Ok(if report.is_ready() { 0 } else { EXIT_UNSUCCESSFUL })
        }
        Command::Prepare {
            instance_id,
            host,
            port,
            key_file,
            user_name,
        } => {
            let (host, port) = resolve_host(app, instance_id, host, port).await?;
            let endpoint = RemoteEndpoint::new(
                host,
                port,
                network::SSH_DEFAULT_USER,
                resolve_key_file(key_file.as_ref(), config),
            );
            let user_name = user_name.unwrap_or_else(|| config.provision_user.clone());
            let report = app.provision.prepare_host(&endpoint, &user_name).await?;
            print_json(&report)?;
            Ok(if report.completed { 0 } else { EXIT_UNSUCCESSFUL })
        }
    }
}

async fn resolve_host(
    app: &App,
    instance_id: Option<u64>,
    host: Option<String>,
    port: u16,
) -> Result<(String, u16), RemoteError> {
    match (instance_id, host) {
        (Some(id), _) => app.vast.instance_ssh_endpoint(id).await,
        (None, Some(host)) => Ok((host, port)),
        (None, None) => Err(RemoteError::invalid_params(
            "either --instance-id or --host is required",
        )),
    }
}

fn resolve_key_file(explicit: Option<&PathBuf>, config: &Config) -> PathBuf {
    explicit
        .map(crate::services::config::expand_home_path)
        .unwrap_or_else(|| config.ssh_key_file.clone())
}

fn print_json<T: Serialize>(value: &T) -> Result<(), RemoteError> {
    let text = serde_json::to_string_pretty(value)
        .map_err(|err| RemoteError::internal(format!("Failed to render output: {}", err)))?;
    println!("{}", text);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn launch_keeps_the_trailing_command() {
        let cli = Cli::try_parse_from([
            "vastctl", "launch", "-H", "10.0.0.2", "--name", "train", "--", "python", "train.py",
            "--epochs", "3",
        ])
        .expect("parse");
        match cli.command {
            Command::Launch {
                target,
                name,
                command,
            } => {
                assert_eq!(target.host.as_deref(), Some("10.0.0.2"));
                assert!(target.instance_id.is_none());
                assert_eq!(target.port, 22);
                assert_eq!(target.user, "root");
                assert_eq!(name.as_deref(), Some("train"));
                assert_eq!(command.join(" "), "python train.py --epochs 3");
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn task_commands_accept_an_instance_id_instead_of_a_host() {
        let cli = Cli::try_parse_from(["vastctl", "exec", "--instance-id", "4711", "nvidia-smi"])
            .expect("parse");
        match cli.command {
            Command::Exec { target, command } => {
                assert_eq!(target.instance_id, Some(4711));
                assert!(target.host.is_none());
                assert_eq!(command, vec!["nvidia-smi".to_string()]);
            }
            other => panic!("unexpected command: {:?}", other),
        }
        assert!(Cli::try_parse_from([
            "vastctl", "launch", "--instance-id", "4711", "--", "sleep", "5"
        ])
        .is_ok());
        assert!(Cli::try_parse_from([
            "vastctl", "kill", "--instance-id", "4711", "--task-id", "job_0011aabb", "--pid", "42"
        ])
        .is_ok());
    }

    #[test]
    fn task_commands_need_exactly_one_target() {
        assert!(Cli::try_parse_from(["vastctl", "exec", "uptime"]).is_err());
        assert!(Cli::try_parse_from([
            "vastctl", "exec", "--instance-id", "7", "-H", "10.0.0.2", "uptime"
        ])
        .is_err());
    }

    #[test]
    fn prepare_requires_a_target() {
        assert!(Cli::try_parse_from(["vastctl", "prepare"]).is_err());
        assert!(Cli::try_parse_from(["vastctl", "prepare", "--instance-id", "7"]).is_ok());
        assert!(
            Cli::try_parse_from(["vastctl", "prepare", "--instance-id", "7", "-H", "h"]).is_err()
        );
    }
}
