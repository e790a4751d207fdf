use crate::constants::network as network_constants;
use crate::errors::RemoteError;
use crate::services::config::Config;
use crate::services::logger::Logger;
use crate::services::shell::{CommandOutput, RemoteEndpoint, RemoteShell, ShellSession};
use std::io::Read;
use std::process::{Command, Stdio};
use std::time::{Duration, Instant};

/// Runs session commands with the local `sh` instead of a remote host.
///
/// The endpoint is only used for log context; no key is loaded and nothing
/// is authenticated. Useful for dry runs and for exercising the task
/// scripts against a real process table.
#[derive(Clone)]
pub struct LocalShell {
    logger: Logger,
    command_timeout: Duration,
}

impl LocalShell {
    pub fn new(logger: Logger, config: &Config) -> Self {
        Self {
            logger: logger.child("local"),
            command_timeout: config.command_timeout(),
        }
    }
}

impl RemoteShell for LocalShell {
    fn open(&self, endpoint: &RemoteEndpoint) -> Result<Box<dyn ShellSession>, RemoteError> {
        endpoint.validate()?;
        self.logger.debug(
            "Opening local session",
            Some(&serde_json::json!({ "target": endpoint.describe() })),
        );
        Ok(Box::new(LocalSession {
            command_timeout: self.command_timeout,
        }))
    }
}

struct LocalSession {
    command_timeout: Duration,
}

impl ShellSession for LocalSession {
    fn run(&mut self, command: &str) -> Result<CommandOutput, RemoteError> {
        let started = Instant::now();
        let mut child = Command::new("sh")
            .arg("-c")
            .arg(command)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|err| RemoteError::connect(format!("Failed to spawn sh: {}", err)))?;

        let stdout_reader = child.stdout.take().map(spawn_reader);
        let stderr_reader = child.stderr.take().map(spawn_reader);

        let status = loop {
            if let Some(status) = child.try_wait()? {
                break status;
            }
            if started.elapsed() > self.command_timeout {
                let _ = child.kill();
                let _ = child.wait();
                return Err(RemoteError::timeout(format!(
                    "Local command did not finish within {} ms",
                    self.command_timeout.as_millis()
                )));
            }
            std::thread::sleep(Duration::from_millis(
                network_constants::READ_IDLE_SLEEP_MS,
            ));
        };

        let stdout = join_reader(stdout_reader);
        let stderr = join_reader(stderr_reader);
        Ok(CommandOutput {
            stdout: stdout.trim_end().to_string(),
            stderr: stderr.trim_end().to_string(),
            exit_code: status.code().unwrap_or(-1),
            duration_ms: started.elapsed().as_millis() as u64,
        })
    }
}

fn spawn_reader<R: Read + Send + 'static>(mut reader: R) -> std::thread::JoinHandle<Vec<u8>> {
    std::thread::spawn(move || {
        let mut buf = Vec::new();
        let _ = reader.read_to_end(&mut buf);
        buf
    })
}

fn join_reader(handle: Option<std::thread::JoinHandle<Vec<u8>>>) -> String {
    handle
        .and_then(|h| h.join().ok())
        .map(|bytes| String::from_utf8_lossy(&bytes).to_string())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::RemoteErrorKind;

    fn endpoint() -> RemoteEndpoint {
        RemoteEndpoint::new("localhost", 22, "tester", "/unused")
    }

    #[test]
    fn captures_streams_and_exit_code() {
        let shell = LocalShell::new(Logger::new("test"), &Config::default());
        let mut session = shell.open(&endpoint()).expect("session");
        let out = session
            .run("echo out; echo err >&2; exit 3")
            .expect("output");
        assert_eq!(out.stdout, "out");
        assert_eq!(out.stderr, "err");
        assert_eq!(out.exit_code, 3);
        assert!(!out.success());
    }

    #[test]
    fn long_commands_hit_the_timeout() {
        let config = Config::default().with_command_timeout_ms(200);
        let shell = LocalShell::new(Logger::new("test"), &config);
        let mut session = shell.open(&endpoint()).expect("session");
        let err = session.run("sleep 5").expect_err("timeout");
        assert_eq!(err.kind, RemoteErrorKind::Timeout);
    }
}
