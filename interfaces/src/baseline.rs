use anyhow::Result;
use async_trait::async_trait;
use tracing::info;

use crate::defs::{CategoryDigest, Category, Channel, DeliverySink, Item, Selection, Summarizer};

#[derive(Clone)]
struct FocusedSummary {
    category: Category,
    line: String,
}

async fn summarize_item(item: &Item) -> Result<FocusedSummary> {
    let title = if item.title.is_empty() { item.url.as_str() } else { item.title.as_str() };
    Ok(FocusedSummary {
        category: item.category,
        line: format!("- {} ({})", title, item.url),
    })
}

async fn compose_digests(channel: Option<Channel>, summaries: &[FocusedSummary]) -> Result<Vec<CategoryDigest>> {
    let mut digests = Vec::new();
    for category in Category::ALL {
        let lines = summaries
            .iter()
            .filter(|summary| summary.category == category)
            .map(|summary| summary.line.clone())
            .collect::<Vec<String>>();
        if lines.is_empty() {
            continue;
        }
        digests.push(CategoryDigest {
            channel,
            category,
            text: lines.join("\n"),
        });
    }
    Ok(digests)
}

/// Stand-in for the text-generation service: one bullet per item, grouped by category.
pub struct BaselineSummarizer;

#[async_trait]
impl Summarizer for BaselineSummarizer {
    async fn summarize(&self, selection: &Selection) -> Result<Vec<CategoryDigest>> {
        let mut digests = Vec::new();
        for (channel, items) in selection.channels() {
            let summaries = futures::future::join_all(items.iter().map(summarize_item))
                .await
                .into_iter()
                .collect::<Result<Vec<_>>>()?;
            digests.extend(compose_digests(channel, &summaries).await?);
        }
        Ok(digests)
    }
}

/// Delivery that only writes the digest to the log.
pub struct LogDelivery;

#[async_trait]
impl DeliverySink for LogDelivery {
    async fn deliver(&self, selection: &Selection, digests: &[CategoryDigest]) -> Result<()> {
        info!("Delivering {} items in {} digest sections", selection.len(), digests.len());
        for digest in digests {
            let channel = match digest.channel {
                Some(Channel::Tools) => "tools",
                Some(Channel::AcademicMedia) => "academic_media",
                None => "all",
            };
            info!("[{}/{}]\n{}", channel, digest.category, digest.text);
        }
        Ok(())
    }
}
