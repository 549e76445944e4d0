pub mod auth;
pub mod collectors;
pub mod config;
pub mod dedup;
pub mod fetcher;
pub mod identity;
pub mod orchestrator;
pub mod parser;
pub mod pipeline;
pub mod rate_limiter;
pub mod selector;
pub mod source_config;
pub mod traits;
pub mod types;
pub mod utils;

pub use types::*;
pub use collectors::build_collector;
pub use config::{
    AppConfig, CategoryQuota, DedupMethod, DedupPolicy, RecencyQuota, SelectionMode, SelectionPolicy,
};
pub use dedup::Deduplicator;
pub use fetcher::Fetcher;
pub use orchestrator::{CollectionReport, Job, Orchestrator, OutcomeStatus, SourceOutcome};
pub use pipeline::{Pipeline, RunReport};
pub use rate_limiter::RateLimiter;
pub use selector::Selector;
pub use source_config::SourceConfig;
pub use traits::Collector;
