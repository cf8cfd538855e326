// spool_shared: data model, wire types and settings shared by the agent and its update helper

pub mod api_models;
pub mod config;
pub mod model;
pub mod print_job;

pub use config::{AgentConfig, ConfigError, ConfigManager};
pub use model::{AuthOutcome, DownloadProgress, FetchResult, Job, UpdateInfo};
pub use print_job::JobState;

/// Version string compiled into every binary of the workspace.
pub const AGENT_VERSION: &str = env!("CARGO_PKG_VERSION");
