pub mod network {
    pub const SSH_DEFAULT_PORT: u16 = 22;
    pub const SSH_DEFAULT_USER: &str = "root";
    pub const TIMEOUT_SSH_CONNECT_MS: u64 = 30_000;
    pub const TIMEOUT_SSH_COMMAND_MS: u64 = 120_000;
    pub const TIMEOUT_API_REQUEST_MS: u64 = 30_000;
    pub const KEEPALIVE_INTERVAL_SECS: u32 = 30;
    pub const READ_IDLE_SLEEP_MS: u64 = 20;
}

pub mod tasks {
    pub const ARTIFACT_DIR: &str = "/tmp";
    pub const ARTIFACT_PREFIX: &str = "ssh_task_";
    pub const TASK_SUFFIX_LEN: usize = 8;
    pub const DEFAULT_TAIL_LINES: usize = 50;
    pub const MAX_TAIL_LINES: usize = 10_000;
    pub const DEFAULT_GRACE_PERIOD_MS: u64 = 2_000;
    pub const PID_READ_ATTEMPTS: u32 = 50;
    pub const PID_READ_INTERVAL_MS: u64 = 100;
    pub const MARKER_PREFIX: &str = "__VASTCTL_";
}

pub mod readiness {
    pub const DEFAULT_TIMEOUT_SECS: u64 = 300;
    pub const DEFAULT_POLL_INTERVAL_MS: u64 = 5_000;
    pub const STATUS_RUNNING: &str = "running";
    pub const STATUS_FAILED: &str = "failed";
    pub const STATUS_EXITED: &str = "exited";
    pub const STATUS_UNKNOWN: &str = "unknown";
    pub const STATUS_TIMED_OUT: &str = "timed_out";
}

pub mod api {
    pub const DEFAULT_SERVER_URL: &str = "https://console.vast.ai";
    pub const API_PREFIX: &str = "/api/v0";
    pub const USER_AGENT: &str = "vastctl/0.3";
}

pub mod provision {
    pub const DEFAULT_USER_NAME: &str = "user01";
}
