pub mod local;
pub mod provision;
pub mod readiness;
pub mod ssh;
pub mod tasks;
