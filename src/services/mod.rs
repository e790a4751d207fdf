pub mod config;
pub mod key_loader;
pub mod logger;
pub mod shell;
pub mod task;
pub mod vast_client;
