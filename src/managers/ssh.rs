use crate::constants::network as network_constants;
use crate::errors::RemoteError;
use crate::services::config::Config;
use crate::services::key_loader::{Credential, KeyLoader};
use crate::services::logger::Logger;
use crate::services::shell::{CommandOutput, RemoteEndpoint, RemoteShell, ShellSession};
use base64::Engine;
use ssh2::{ErrorCode, Session};
use std::io::Read;
use std::net::{TcpStream, ToSocketAddrs};
use std::time::{Duration, Instant};

const LIBSSH2_ERROR_TIMEOUT: i32 = -9;
const LIBSSH2_ERROR_FILE: i32 = -16;
const LIBSSH2_ERROR_AUTHENTICATION_FAILED: i32 = -18;
const LIBSSH2_ERROR_PUBLICKEY_UNVERIFIED: i32 = -19;

/// Opens libssh2 sessions authenticated with the endpoint's private key.
///
/// Unknown host keys are accepted on first sight: targets are short-lived
/// rented machines whose keys are never known in advance. The observed
/// fingerprint is logged so it can be audited afterwards.
#[derive(Clone)]
pub struct SshTransport {
    logger: Logger,
    key_loader: KeyLoader,
    connect_timeout: Duration,
    command_timeout: Duration,
}

impl SshTransport {
    pub fn new(logger: Logger, config: &Config) -> Self {
        Self {
            logger: logger.child("ssh"),
            key_loader: KeyLoader::new(),
            connect_timeout: config.connect_timeout(),
            command_timeout: config.command_timeout(),
        }
    }
}

impl RemoteShell for SshTransport {
    fn open(&self, endpoint: &RemoteEndpoint) -> Result<Box<dyn ShellSession>, RemoteError> {
        endpoint.validate()?;
        let credential = self.key_loader.load(&endpoint.key_file)?;
        self.logger.info(
            "Connecting",
            Some(&serde_json::json!({
                "target": endpoint.describe(),
                "key_algorithm": credential.algorithm(),
            })),
        );
        let session = connect_session(endpoint, &credential, self.connect_timeout, &self.logger)?;
        self.logger.debug("SSH connection successful", None);
        Ok(Box::new(SshSession {
            session,
            logger: self.logger.clone(),
            command_timeout: self.command_timeout,
        }))
    }
}

struct SshSession {
    session: Session,
    logger: Logger,
    command_timeout: Duration,
}

impl ShellSession for SshSession {
    fn run(&mut self, command: &str) -> Result<CommandOutput, RemoteError> {
        let started = Instant::now();
        self.session.set_blocking(true);
        let mut channel = self
            .session
            .channel_session()
            .map_err(|err| map_ssh_error(err, "channel open"))?;
        channel
            .exec(command)
            .map_err(|err| map_ssh_error(err, "exec"))?;
        self.session.set_blocking(false);

        let mut stderr_stream = channel.stderr();
        let mut stdout = Vec::new();
        let mut stderr = Vec::new();
        let mut buf = [0u8; 8192];

        let timed_out = loop {
            let mut progressed = read_available(&mut channel, &mut buf, &mut stdout, "stdout")?;
            progressed |= read_available(&mut stderr_stream, &mut buf, &mut stderr, "stderr")?;
            if channel.eof() {
                break false;
            }
            if started.elapsed() > self.command_timeout {
                break true;
            }
            if !progressed {
                std::thread::sleep(Duration::from_millis(
                    network_constants::READ_IDLE_SLEEP_MS,
                ));
            }
        };

        self.session.set_blocking(true);
        if timed_out {
            let _ = channel.close();
            return Err(RemoteError::timeout(format!(
                "Remote command did not finish within {} ms",
                self.command_timeout.as_millis()
            ))
            .with_detail("stdout_partial", String::from_utf8_lossy(&stdout).to_string()));
        }

        // Exit status arrives after EOF; wait for the channel to close before reading it.
        channel
            .read_to_end(&mut stdout)
            .map_err(|err| RemoteError::connect(format!("SSH stdout read failed: {}", err)))?;
        stderr_stream
            .read_to_end(&mut stderr)
            .map_err(|err| RemoteError::connect(format!("SSH stderr read failed: {}", err)))?;
        channel
            .wait_close()
            .map_err(|err| map_ssh_error(err, "channel close"))?;
        let mut exit_code = channel
            .exit_status()
            .map_err(|err| map_ssh_error(err, "exit status"))?;
        if let Some(signal) = channel.exit_signal().ok().and_then(|sig| sig.exit_signal) {
            self.logger.debug(
                "Remote command killed by signal",
                Some(&serde_json::json!({ "signal": signal })),
            );
            if exit_code == 0 {
                exit_code = -1;
            }
        }

        Ok(CommandOutput {
            stdout: String::from_utf8_lossy(&stdout).trim_end().to_string(),
            stderr: String::from_utf8_lossy(&stderr).trim_end().to_string(),
            exit_code,
            duration_ms: started.elapsed().as_millis() as u64,
        })
    }
}

impl Drop for SshSession {
    fn drop(&mut self) {
        self.session.set_blocking(true);
        if let Err(err) = self.session.disconnect(None, "vastctl session closed", None) {
            self.logger.debug(
                "SSH disconnect failed",
                Some(&serde_json::json!({ "error": err.message() })),
            );
        }
        self.logger.debug("SSH connection closed", None);
    }
}

fn read_available(
    reader: &mut impl Read,
    buf: &mut [u8],
    sink: &mut Vec<u8>,
    label: &str,
) -> Result<bool, RemoteError> {
    match reader.read(buf) {
        Ok(n) if n > 0 => {
            sink.extend_from_slice(&buf[..n]);
            Ok(true)
        }
        Ok(_) => Ok(false),
        Err(err) if err.kind() == std::io::ErrorKind::WouldBlock => Ok(false),
        Err(err) => Err(RemoteError::connect(format!(
            "SSH {} read failed: {}",
            label, err
        ))),
    }
}

fn connect_session(
    endpoint: &RemoteEndpoint,
    credential: &Credential,
    timeout: Duration,
    logger: &Logger,
) -> Result<Session, RemoteError> {
    let addrs = (endpoint.host.as_str(), endpoint.port)
        .to_socket_addrs()
        .map_err(|err| {
            RemoteError::connect(format!("Failed to resolve {}: {}", endpoint.host, err))
        })?;
    let mut last_error = None;
    let mut tcp = None;
    for addr in addrs {
        match TcpStream::connect_timeout(&addr, timeout) {
            Ok(stream) => {
                tcp = Some(stream);
                break;
            }
            Err(err) => last_error = Some(err),
        }
    }
    let tcp = tcp.ok_or_else(|| {
        let reason = last_error
            .map(|err| err.to_string())
            .unwrap_or_else(|| "no address resolved".to_string());
        RemoteError::connect(format!("Failed to connect SSH: {}", reason))
    })?;
    tcp.set_read_timeout(Some(timeout)).ok();
    tcp.set_write_timeout(Some(timeout)).ok();

    let mut session =
        Session::new().map_err(|_| RemoteError::internal("Failed to create SSH session"))?;
    session.set_tcp_stream(tcp);
    session.set_timeout(timeout.as_millis().min(u32::MAX as u128) as u32);
    session
        .handshake()
        .map_err(|err| map_ssh_error(err, "handshake"))?;

    logger.info(
        "Accepted host key",
        Some(&serde_json::json!({
            "target": endpoint.describe(),
            "fingerprint": fingerprint_host_key_sha256(&session),
        })),
    );

    session
        .userauth_pubkey_memory(&endpoint.user, None, credential.private_key_pem(), None)
        .map_err(|err| match map_ssh_error(err, "authentication") {
            mapped if mapped.kind == crate::errors::RemoteErrorKind::Timeout => mapped,
            _ => RemoteError::auth(format!(
                "Authentication failed for {}",
                endpoint.describe()
            )),
        })?;
    if !session.authenticated() {
        return Err(RemoteError::auth(format!(
            "Authentication failed for {}",
            endpoint.describe()
        )));
    }
    session.set_keepalive(true, network_constants::KEEPALIVE_INTERVAL_SECS);
    Ok(session)
}

fn fingerprint_host_key_sha256(session: &Session) -> Option<String> {
    let hash = session.host_key_hash(ssh2::HashType::Sha256)?;
    let encoded = base64::engine::general_purpose::STANDARD_NO_PAD.encode(hash);
    Some(format!("SHA256:{}", encoded))
}

fn map_ssh_error(err: ssh2::Error, stage: &str) -> RemoteError {
    match err.code() {
        ErrorCode::Session(LIBSSH2_ERROR_TIMEOUT) => {
            RemoteError::timeout(format!("SSH {} timed out", stage))
        }
        ErrorCode::Session(
            LIBSSH2_ERROR_AUTHENTICATION_FAILED
            | LIBSSH2_ERROR_PUBLICKEY_UNVERIFIED
            | LIBSSH2_ERROR_FILE,
        ) => RemoteError::auth(format!("SSH {} rejected: {}", stage, err.message())),
        _ => RemoteError::connect(format!("SSH {} failed: {}", stage, err.message())),
    }
}
