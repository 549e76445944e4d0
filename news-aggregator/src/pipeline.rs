use std::sync::Arc;

use chrono::Utc;
use tracing::{error, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::config::AppConfig;
use crate::dedup::Deduplicator;
use crate::orchestrator::{Orchestrator, SourceOutcome};
use crate::selector::Selector;
use crate::source_config::SourceConfig;
use crate::types::{CategoryDigest, DeliverySink, HistoryStore, Result, Selection, Summarizer};

/// What one run did, stage by stage.
#[derive(Debug)]
pub struct RunReport {
    pub run_id: Uuid,
    pub collected: usize,
    pub unique: usize,
    pub selection: Selection,
    pub digests: Vec<CategoryDigest>,
    pub delivered: bool,
    pub sources: Vec<SourceOutcome>,
}

impl RunReport {
    pub fn failed_sources(&self) -> Vec<&str> {
        self.sources
            .iter()
            .filter(|o| !o.is_success())
            .map(|o| o.source_id.as_str())
            .collect()
    }
}

/// collect → dedup → select → summarize → deliver, once.
///
/// Only a history store failure aborts a run. Failed sources, a failed
/// summary and a failed delivery are logged and reflected in the report.
pub struct Pipeline {
    orchestrator: Orchestrator,
    deduplicator: Deduplicator,
    selector: Selector,
    summarizer: Arc<dyn Summarizer>,
    delivery: Arc<dyn DeliverySink>,
}

impl Pipeline {
    pub fn new(
        config: &AppConfig,
        sources: &[SourceConfig],
        store: Arc<dyn HistoryStore>,
        summarizer: Arc<dyn Summarizer>,
        delivery: Arc<dyn DeliverySink>,
    ) -> Self {
        Self::from_parts(
            Orchestrator::from_sources(sources, config),
            Deduplicator::new(store, config.dedup.clone()),
            Selector::new(config.selection.clone(), sources),
            summarizer,
            delivery,
        )
    }

    pub fn from_parts(
        orchestrator: Orchestrator,
        deduplicator: Deduplicator,
        selector: Selector,
        summarizer: Arc<dyn Summarizer>,
        delivery: Arc<dyn DeliverySink>,
    ) -> Self {
        Self {
            orchestrator,
            deduplicator,
            selector,
            summarizer,
            delivery,
        }
    }

    pub async fn run_once(&self) -> Result<RunReport> {
        let run_id = Uuid::new_v4();
        let span = info_span!("run", %run_id);
        self.run(run_id).instrument(span).await
    }

    async fn run(&self, run_id: Uuid) -> Result<RunReport> {
        info!("Starting run over {} sources", self.orchestrator.source_count());

        let collection = self.orchestrator.collect_all().await;
        let collected = collection.items.len();

        let unique_items = self.deduplicator.deduplicate(collection.items).await?;
        let unique = unique_items.len();

        let selection = self.selector.select(unique_items);
        let selection = self
            .selector
            .backfill(selection, unique, self.deduplicator.store())
            .await;

        let digests = match self.summarizer.summarize(&selection).await {
            Ok(digests) => digests,
            Err(e) => {
                error!("Summarization failed, continuing without digests: {:#}", e);
                Vec::new()
            }
        };

        let delivered = match self.delivery.deliver(&selection, &digests).await {
            Ok(()) => true,
            Err(e) => {
                error!("Delivery failed: {:#}", e);
                false
            }
        };

        if delivered && self.selector.uses_backlog() {
            let sent: Vec<String> = selection.items().iter().map(|i| i.url_hash.clone()).collect();
            if let Err(e) = self.deduplicator.store().mark_sent(&sent, Utc::now()).await {
                warn!("Could not mark {} delivered items as sent: {}", sent.len(), e);
            }
        }

        let report = RunReport {
            run_id,
            collected,
            unique,
            selection,
            digests,
            delivered,
            sources: collection.outcomes,
        };

        let failed = report.failed_sources();
        if !failed.is_empty() && failed.len() == report.sources.len() {
            warn!("Every source failed this run: {}", failed.join(", "));
        }
        info!(
            "Run finished: {} collected, {} new, {} selected, delivered: {}",
            report.collected,
            report.unique,
            report.selection.len(),
            report.delivered
        );
        Ok(report)
    }
}
