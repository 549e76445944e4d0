mod common;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use common::{init_tracing, item, item_in, StaticCollector};
use interfaces::{BaselineSummarizer, MemoryHistoryStore};
use news_aggregator::collectors::normalize_entries;
use news_aggregator::{
    AggregatorError, Category, CategoryDigest, DedupMethod, DedupPolicy, Deduplicator,
    DeliverySink, HistoryStore, Job, Orchestrator, Pipeline, RawEntry, SeenIdentity, Selection,
    SelectionMode, SelectionPolicy, Selector, SourceConfig, Summarizer,
};
use tracing::info;

fn sources(json: serde_json::Value) -> Vec<SourceConfig> {
    serde_json::from_value(json).unwrap()
}

#[tokio::test]
async fn dedup_is_idempotent_across_runs() -> anyhow::Result<()> {
    init_tracing();
    let store = Arc::new(MemoryHistoryStore::new());
    let dedup = Deduplicator::new(store.clone(), DedupPolicy::default());

    let batch = vec![
        item("a", "https://a.example/1", "First", 0.0),
        item("a", "https://a.example/2", "Second", 0.0),
    ];

    let first = dedup.deduplicate(batch.clone()).await?;
    assert_eq!(first.len(), 2);
    assert_eq!(store.len(), 2);

    let second = dedup.deduplicate(batch).await?;
    assert!(second.is_empty(), "a second run over the same items yields nothing");
    assert_eq!(store.len(), 2);
    Ok(())
}

#[tokio::test]
async fn untitled_entries_dedup_on_url_only() -> anyhow::Result<()> {
    init_tracing();
    let store = Arc::new(MemoryHistoryStore::new());
    let dedup = Deduplicator::new(store.clone(), DedupPolicy::default());
    let bare = |url: &str| RawEntry {
        url: url.to_string(),
        ..RawEntry::default()
    };

    let first = normalize_entries(
        "links",
        Category::Community,
        None,
        vec![
            bare("https://links.example/1"),
            bare("https://links.example/2"),
            bare("https://links.example/3"),
        ],
    );
    assert!(first.iter().all(|i| i.content_hash.is_empty()));
    assert_eq!(dedup.deduplicate(first).await?.len(), 3);

    let next = normalize_entries(
        "links",
        Category::Community,
        None,
        vec![bare("https://links.example/4"), bare("https://links.example/1")],
    );
    let kept = dedup.deduplicate(next).await?;
    let urls: Vec<&str> = kept.iter().map(|i| i.url.as_str()).collect();
    assert_eq!(urls, vec!["https://links.example/4"]);
    assert_eq!(store.len(), 4);
    Ok(())
}

#[tokio::test]
async fn tracking_parameters_do_not_create_new_identities() -> anyhow::Result<()> {
    let store = Arc::new(MemoryHistoryStore::new());
    let dedup = Deduplicator::new(store.clone(), DedupPolicy::default());

    dedup
        .deduplicate(vec![item("a", "https://news.example/story", "Story", 0.0)])
        .await?;
    let again = dedup
        .deduplicate(vec![item(
            "b",
            "https://news.example/story?utm_source=newsletter&utm_campaign=x",
            "Story, retold",
            0.0,
        )])
        .await?;

    assert!(again.is_empty(), "only tracking params differ, so the url identity matches");
    Ok(())
}

#[tokio::test]
async fn same_content_under_two_urls_keeps_the_first() -> anyhow::Result<()> {
    let store = Arc::new(MemoryHistoryStore::new());
    let dedup = Deduplicator::new(store.clone(), DedupPolicy::default());

    // merge order already puts the higher-priority source first
    let kept = dedup
        .deduplicate(vec![
            item("priority-1", "https://primary.example/post", "Big model launch", 0.0),
            item("priority-5", "https://mirror.example/copy", "Big model launch", 0.0),
        ])
        .await?;

    assert_eq!(kept.len(), 1);
    assert_eq!(kept[0].source_id, "priority-1");
    assert_eq!(store.len(), 1);
    Ok(())
}

#[tokio::test]
async fn url_only_policy_ignores_content_matches() -> anyhow::Result<()> {
    let store = Arc::new(MemoryHistoryStore::new());
    let dedup = Deduplicator::new(
        store,
        DedupPolicy {
            method: DedupMethod::UrlHash,
            similarity_threshold: None,
        },
    );
    let kept = dedup
        .deduplicate(vec![
            item("a", "https://one.example/p", "Same words", 0.0),
            item("b", "https://two.example/p", "Same words", 0.0),
        ])
        .await?;
    assert_eq!(kept.len(), 2);
    Ok(())
}

#[tokio::test]
async fn similar_titles_collapse_when_threshold_is_set() -> anyhow::Result<()> {
    let store = Arc::new(MemoryHistoryStore::new());
    let dedup = Deduplicator::new(
        store,
        DedupPolicy {
            method: DedupMethod::Both,
            similarity_threshold: Some(0.85),
        },
    );
    let kept = dedup
        .deduplicate(vec![
            item("a", "https://one.example/p", "OpenAI releases GPT-5 today", 0.0),
            item("b", "https://two.example/p", "OpenAI released GPT-5 today", 0.0),
            item("c", "https://three.example/p", "Rust 2024 edition ships", 0.0),
        ])
        .await?;
    let sources: Vec<&str> = kept.iter().map(|i| i.source_id.as_str()).collect();
    assert_eq!(sources, vec!["a", "c"]);
    Ok(())
}

#[tokio::test]
async fn unavailable_store_is_fatal() {
    let dedup = Deduplicator::new(
        Arc::new(MemoryHistoryStore::unavailable()),
        DedupPolicy::default(),
    );
    let result = dedup
        .deduplicate(vec![item("a", "https://a.example/1", "One", 0.0)])
        .await;
    assert!(matches!(result, Err(AggregatorError::Store(_))));
}

#[test]
fn single_channel_respects_bound_and_filters() {
    let configs = sources(serde_json::json!([
        {"id": "hn", "category": "community", "priority": 3,
         "collector": {"type": "feed", "url": "https://hn.example/rss"},
         "filters": {"min_score": 10.0, "exclude_keywords": ["Crypto"], "max_age_hours": 24}},
        {"id": "papers", "category": "academic", "priority": 1,
         "collector": {"type": "feed", "url": "https://papers.example/rss"},
         "filters": {"include_keywords": ["transformer", "diffusion"]}}
    ]));
    let policy = SelectionPolicy {
        max_daily_items: 3,
        ..SelectionPolicy::default()
    };
    let selector = Selector::new(policy, &configs);
    let now = Utc.with_ymd_and_hms(2025, 3, 2, 12, 0, 0).unwrap();

    let mut stale = item("hn", "https://hn.example/old", "Old news", 50.0);
    stale.published_at = Some(now - chrono::Duration::hours(30));
    let mut fresh = item("hn", "https://hn.example/fresh", "Fresh news", 40.0);
    fresh.published_at = Some(now - chrono::Duration::hours(2));

    let selection = selector.select_at(
        vec![
            stale,
            fresh,
            item("hn", "https://hn.example/undated", "Undated post", 30.0),
            item("hn", "https://hn.example/low", "Low score", 5.0),
            item("hn", "https://hn.example/crypto", "CRYPTO moon", 99.0),
            item("papers", "https://papers.example/1", "A transformer study", 0.0),
            item("papers", "https://papers.example/2", "Graph theory", 0.0),
            item("hn", "https://hn.example/extra", "Extra post", 20.0),
        ],
        now,
    );

    let Selection::Single { items } = &selection else {
        panic!("expected single channel selection");
    };
    let urls: Vec<&str> = items.iter().map(|i| i.url.as_str()).collect();
    assert_eq!(
        urls,
        vec![
            "https://hn.example/fresh",
            "https://hn.example/undated",
            "https://hn.example/extra"
        ]
    );
    assert!(selection.len() <= 3);
}

#[test]
fn dual_channel_takes_top_three_tools() {
    let selector = Selector::new(
        SelectionPolicy {
            dual_channel_mode: true,
            tools_channel_count: 3,
            academic_media_channel_count: 2,
            ..SelectionPolicy::default()
        },
        &[],
    );

    let mut items: Vec<_> = (1..=5)
        .map(|i| {
            item_in(
                "gh",
                Category::Tools,
                &format!("https://github.example/{}", i),
                &format!("repo {}", i),
                i as f64 * 100.0,
            )
        })
        .collect();
    items.push(item_in("arxiv", Category::Academic, "https://arxiv.example/1", "paper", 1.0));

    let selection = selector.select(items);
    let Selection::Dual { tools, academic_media } = &selection else {
        panic!("expected dual channel selection");
    };
    let scores: Vec<f64> = tools.iter().map(|i| i.score).collect();
    assert_eq!(scores, vec![500.0, 400.0, 300.0]);
    assert_eq!(academic_media.len(), 1);
    assert_eq!(academic_media[0].category, Category::Academic);
}

struct FailingSummarizer;

#[async_trait]
impl Summarizer for FailingSummarizer {
    async fn summarize(&self, _selection: &Selection) -> anyhow::Result<Vec<CategoryDigest>> {
        anyhow::bail!("summary service unavailable")
    }
}

#[derive(Default)]
struct RecordingDelivery {
    fail: bool,
    called: AtomicBool,
}

#[async_trait]
impl DeliverySink for RecordingDelivery {
    async fn deliver(&self, _selection: &Selection, _digests: &[CategoryDigest]) -> anyhow::Result<()> {
        self.called.store(true, Ordering::SeqCst);
        if self.fail {
            anyhow::bail!("chat webhook returned 500");
        }
        Ok(())
    }
}

fn pipeline_with(
    store: Arc<dyn HistoryStore>,
    summarizer: Arc<dyn Summarizer>,
    delivery: Arc<dyn DeliverySink>,
) -> Pipeline {
    let jobs = vec![
        Job::new(
            1,
            true,
            Arc::new(StaticCollector::new(
                "lab",
                vec![
                    item("lab", "https://lab.example/a", "Lab result", 0.0),
                    item("lab", "https://lab.example/b", "Lab update", 0.0),
                ],
            )),
        ),
        Job::new(
            4,
            false,
            Arc::new(StaticCollector::new(
                "press",
                vec![item("press", "https://press.example/x", "Lab result", 0.0)],
            )),
        ),
    ];
    Pipeline::from_parts(
        Orchestrator::from_jobs(jobs, Duration::from_secs(30)),
        Deduplicator::new(store, DedupPolicy::default()),
        Selector::new(SelectionPolicy::default(), &[]),
        summarizer,
        delivery,
    )
}

#[tokio::test]
async fn run_once_end_to_end() -> anyhow::Result<()> {
    init_tracing();
    let store = Arc::new(MemoryHistoryStore::new());
    let delivery = Arc::new(RecordingDelivery::default());
    let pipeline = pipeline_with(store.clone(), Arc::new(BaselineSummarizer), delivery.clone());

    let report = pipeline.run_once().await?;
    info!("Run report: {:?}", report);

    assert_eq!(report.collected, 3);
    assert_eq!(report.unique, 2, "the press copy shares content with the lab post");
    assert_eq!(report.selection.len(), 2);
    assert!(report.delivered);
    assert!(delivery.called.load(Ordering::SeqCst));
    assert!(!report.digests.is_empty());
    assert!(report.failed_sources().is_empty());

    let second = pipeline.run_once().await?;
    assert_eq!(second.unique, 0);
    assert!(second.selection.is_empty());
    assert_ne!(report.run_id, second.run_id);
    Ok(())
}

#[tokio::test]
async fn summary_and_delivery_failures_do_not_abort() -> anyhow::Result<()> {
    init_tracing();
    let delivery = Arc::new(RecordingDelivery {
        fail: true,
        ..Default::default()
    });
    let pipeline = pipeline_with(
        Arc::new(MemoryHistoryStore::new()),
        Arc::new(FailingSummarizer),
        delivery.clone(),
    );

    let report = pipeline.run_once().await?;
    assert!(report.digests.is_empty());
    assert!(!report.delivered);
    assert_eq!(report.selection.len(), 2);
    assert!(delivery.called.load(Ordering::SeqCst));
    Ok(())
}

#[tokio::test]
async fn store_failure_aborts_the_run() {
    let pipeline = pipeline_with(
        Arc::new(MemoryHistoryStore::unavailable()),
        Arc::new(BaselineSummarizer),
        Arc::new(RecordingDelivery::default()),
    );
    assert!(matches!(
        pipeline.run_once().await,
        Err(AggregatorError::Store(_))
    ));
}

#[tokio::test]
async fn category_quota_backfills_from_unsent_history() -> anyhow::Result<()> {
    init_tracing();
    let store = Arc::new(MemoryHistoryStore::new());
    let earlier = Utc.with_ymd_and_hms(2025, 2, 1, 8, 0, 0).unwrap();
    let backlog: Vec<SeenIdentity> = [
        item("old", "https://old.example/1", "Kept for later", 7.0),
        item("old", "https://old.example/2", "Also kept", 9.0),
        item("old", "https://old.example/3", "Least interesting", 1.0),
    ]
    .iter()
    .map(|i| SeenIdentity::from_item(i, earlier))
    .collect();
    store.append(&backlog).await?;

    let jobs = vec![Job::new(
        1,
        true,
        Arc::new(StaticCollector::new(
            "lab",
            vec![
                item("lab", "https://lab.example/a", "Lab result", 0.0),
                item("lab", "https://lab.example/b", "Lab update", 0.0),
            ],
        )),
    )];
    let policy = SelectionPolicy {
        max_daily_items: 4,
        mode: SelectionMode::CategoryQuota,
        ..SelectionPolicy::default()
    };
    let pipeline = Pipeline::from_parts(
        Orchestrator::from_jobs(jobs, Duration::from_secs(30)),
        Deduplicator::new(store.clone(), DedupPolicy::default()),
        Selector::new(policy, &[]),
        Arc::new(BaselineSummarizer),
        Arc::new(RecordingDelivery::default()),
    );

    let report = pipeline.run_once().await?;
    let urls: Vec<&str> = report.selection.items().into_iter().map(|i| i.url.as_str()).collect();
    assert_eq!(
        urls,
        vec![
            "https://lab.example/a",
            "https://lab.example/b",
            "https://old.example/2",
            "https://old.example/1",
        ]
    );
    assert!(report.delivered);

    // delivered items are marked sent, so only the leftover comes back
    let second = pipeline.run_once().await?;
    assert_eq!(second.unique, 0);
    let urls: Vec<&str> = second.selection.items().into_iter().map(|i| i.url.as_str()).collect();
    assert_eq!(urls, vec!["https://old.example/3"]);
    Ok(())
}
