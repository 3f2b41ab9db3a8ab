pub mod admission;
pub mod command;
pub mod config;
pub mod dedup;
pub mod event;
pub mod fetcher;
pub mod github;
pub mod health;
pub mod llm;
pub mod orchestrator;
pub mod outcome;
pub mod publisher;
pub mod webhook;

use std::sync::Arc;

pub use config::Config;
pub use github::GithubClient;
pub use llm::LlmGateway;
pub use orchestrator::Orchestrator;
pub use publisher::STATUS_CONTEXT;

pub const SERVICE_NAME: &str = "code-critics";

pub fn service_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

pub struct AppState {
    pub config: Arc<Config>,
    pub github: Arc<GithubClient>,
    /// `None` when neither provider could be constructed; jobs then fail
    /// with a provider-unavailable outcome and health reports misconfig.
    pub gateway: Option<Arc<LlmGateway>>,
    pub orchestrator: Arc<Orchestrator>,
}
