use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::collectors::build_collector;
use crate::config::AppConfig;
use crate::source_config::SourceConfig;
use crate::traits::Collector;
use crate::types::{Item, Result};
use crate::utils::time::format_duration;

/// A collector scheduled for collection, with the source attributes that
/// matter for ordering and logging.
#[derive(Clone)]
pub struct Job {
    pub source_id: String,
    pub priority: u8,
    pub stable: bool,
    pub collector: Arc<dyn Collector>,
}

impl Job {
    pub fn new(priority: u8, stable: bool, collector: Arc<dyn Collector>) -> Self {
        Self {
            source_id: collector.source_id().to_string(),
            priority,
            stable,
            collector,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum OutcomeStatus {
    Succeeded,
    Failed(String),
    Panicked(String),
    TimedOut,
}

#[derive(Debug, Clone)]
pub struct SourceOutcome {
    pub source_id: String,
    pub status: OutcomeStatus,
    pub items: usize,
    pub duration: Duration,
}

impl SourceOutcome {
    pub fn is_success(&self) -> bool {
        self.status == OutcomeStatus::Succeeded
    }
}

#[derive(Debug, Default)]
pub struct CollectionReport {
    /// Merged items, in source priority order.
    pub items: Vec<Item>,
    pub outcomes: Vec<SourceOutcome>,
}

impl CollectionReport {
    pub fn failed_sources(&self) -> Vec<&str> {
        self.outcomes
            .iter()
            .filter(|o| !o.is_success())
            .map(|o| o.source_id.as_str())
            .collect()
    }

    pub fn succeeded(&self) -> usize {
        self.outcomes.iter().filter(|o| o.is_success()).count()
    }
}

struct BrokenSource {
    source_id: String,
    stable: bool,
    reason: String,
}

/// Runs every enabled source concurrently under one deadline and merges the
/// results in priority order. A failing, panicking or slow source only costs
/// its own items.
pub struct Orchestrator {
    jobs: Vec<Job>,
    broken: Vec<BrokenSource>,
    deadline: Duration,
}

impl Orchestrator {
    pub fn from_sources(sources: &[SourceConfig], config: &AppConfig) -> Self {
        let mut jobs = Vec::new();
        let mut broken = Vec::new();

        for source in sources.iter().filter(|s| s.is_enabled()) {
            match build_collector(source, &config.fetch, config.render.as_ref()) {
                Ok(collector) => jobs.push(Job::new(
                    source.priority,
                    source.status.stable,
                    Arc::from(collector),
                )),
                Err(e) => {
                    error!("Cannot build collector for {}: {}", source.id, e);
                    broken.push(BrokenSource {
                        source_id: source.id.clone(),
                        stable: source.status.stable,
                        reason: e.to_string(),
                    });
                }
            }
        }

        for id in config.sources_outliving_deadline(sources) {
            warn!(
                "{}: worst-case retry schedule exceeds the {}s collection deadline",
                id, config.collection_deadline_secs
            );
        }

        let skipped = sources.iter().filter(|s| !s.is_enabled()).count();
        if skipped > 0 {
            debug!("{} disabled sources skipped", skipped);
        }

        let mut orchestrator =
            Self::from_jobs(jobs, Duration::from_secs(config.collection_deadline_secs));
        orchestrator.broken = broken;
        orchestrator
    }

    pub fn from_jobs(mut jobs: Vec<Job>, deadline: Duration) -> Self {
        // stable: equal priorities keep configuration order
        jobs.sort_by_key(|job| job.priority);
        Self {
            jobs,
            broken: Vec::new(),
            deadline,
        }
    }

    pub fn source_count(&self) -> usize {
        self.jobs.len() + self.broken.len()
    }

    pub async fn collect_all(&self) -> CollectionReport {
        let started = Instant::now();
        let deadline = started + self.deadline;
        info!(
            "Collecting from {} sources (deadline {})",
            self.jobs.len(),
            format_duration(self.deadline)
        );

        let handles: Vec<(&Job, JoinHandle<(Result<Vec<Item>>, Duration)>)> = self
            .jobs
            .iter()
            .map(|job| {
                let collector = job.collector.clone();
                let handle = tokio::spawn(async move {
                    let started = Instant::now();
                    let result = collector.collect().await;
                    (result, started.elapsed())
                });
                (job, handle)
            })
            .collect();

        let mut report = CollectionReport::default();
        for (job, mut handle) in handles {
            let (status, items, duration) =
                match tokio::time::timeout_at(deadline, &mut handle).await {
                    Ok(Ok((Ok(items), elapsed))) => (OutcomeStatus::Succeeded, items, elapsed),
                    Ok(Ok((Err(e), elapsed))) => {
                        (OutcomeStatus::Failed(e.to_string()), Vec::new(), elapsed)
                    }
                    Ok(Err(join_error)) => {
                        (OutcomeStatus::Panicked(join_error.to_string()), Vec::new(), started.elapsed())
                    }
                    Err(_) => {
                        handle.abort();
                        (OutcomeStatus::TimedOut, Vec::new(), started.elapsed())
                    }
                };

            let before = items.len();
            let items: Vec<Item> = items
                .into_iter()
                .filter(|item| !item.url.trim().is_empty())
                .collect();
            if items.len() < before {
                debug!(
                    "{}: dropped {} items without url",
                    job.source_id,
                    before - items.len()
                );
            }

            let outcome = SourceOutcome {
                source_id: job.source_id.clone(),
                status,
                items: items.len(),
                duration,
            };
            log_outcome(&outcome, job.stable);
            report.items.extend(items);
            report.outcomes.push(outcome);
        }

        for broken in &self.broken {
            let outcome = SourceOutcome {
                source_id: broken.source_id.clone(),
                status: OutcomeStatus::Failed(broken.reason.clone()),
                items: 0,
                duration: Duration::ZERO,
            };
            log_outcome(&outcome, broken.stable);
            report.outcomes.push(outcome);
        }

        let failed = report.failed_sources();
        info!(
            "Collection finished: {}/{} sources succeeded, {} items",
            report.succeeded(),
            report.outcomes.len(),
            report.items.len()
        );
        if !failed.is_empty() {
            warn!("Failed sources: {}", failed.join(", "));
        }
        report
    }
}

fn log_outcome(outcome: &SourceOutcome, stable: bool) {
    let reason = match &outcome.status {
        OutcomeStatus::Succeeded => {
            info!(
                "{}: {} items in {}",
                outcome.source_id,
                outcome.items,
                format_duration(outcome.duration)
            );
            return;
        }
        OutcomeStatus::Failed(reason) => format!("failed: {}", reason),
        OutcomeStatus::Panicked(reason) => format!("panicked: {}", reason),
        OutcomeStatus::TimedOut => "timed out at the collection deadline".to_string(),
    };

    if stable {
        error!("{}: {}", outcome.source_id, reason);
    } else {
        warn!("{}: {}", outcome.source_id, reason);
    }
}

/// Build collectors for `sources` and run them once, returning only the items.
pub async fn collect_all(sources: &[SourceConfig], config: &AppConfig) -> Vec<Item> {
    Orchestrator::from_sources(sources, config)
        .collect_all()
        .await
        .items
}
