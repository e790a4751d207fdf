use crate::errors::RemoteError;
use crate::managers::local::LocalShell;
use crate::managers::provision::ProvisionManager;
use crate::managers::readiness::ReadinessPoller;
use crate::managers::ssh::SshTransport;
use crate::managers::tasks::TaskManager;
use crate::services::config::Config;
use crate::services::logger::Logger;
use crate::services::shell::RemoteShell;
use crate::services::vast_client::VastClient;
use std::sync::Arc;

/// Which session transport the managers run on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportKind {
    Ssh,
    Local,
}

pub struct App {
    pub logger: Logger,
    pub config: Config,
    pub tasks: TaskManager,
    pub readiness: ReadinessPoller,
    pub provision: ProvisionManager,
    pub vast: Arc<VastClient>,
}

impl App {
    pub fn initialize(config: Config, transport: TransportKind) -> Result<Self, RemoteError> {
        let logger = Logger::new("vastctl");

        let shell: Arc<dyn RemoteShell> = match transport {
            TransportKind::Ssh => Arc::new(SshTransport::new(logger.clone(), &config)),
            TransportKind::Local => Arc::new(LocalShell::new(logger.clone(), &config)),
        };
        let tasks = TaskManager::new(logger.clone(), shell, &config);
        let readiness = ReadinessPoller::new(logger.clone(), &config);
        let provision = ProvisionManager::new(logger.clone(), tasks.clone());
        let vast = Arc::new(VastClient::new(logger.clone(), &config)?);

        logger.debug(
            "Initialized",
            Some(&serde_json::json!({
                "transport": format!("{:?}", transport).to_lowercase(),
                "key_file": config.ssh_key_file,
                "server_url": config.server_url,
            })),
        );

        Ok(Self {
            logger,
            config,
            tasks,
            readiness,
            provision,
            vast,
        })
    }
}
