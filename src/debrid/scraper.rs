//! Scraper contract
//!
//! Scrapers discover release candidates on indexers and aggregators. They
//! are external collaborators: this crate only defines the seam and a
//! helper that queries several of them at once.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::debrid::types::{ReleaseCandidate, attrs};
use crate::error::Result;

/// Normalised search inputs handed to every scraper
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchRequest {
    pub query: String,
    #[serde(default)]
    pub categories: Vec<String>,
    /// 0 means no limit
    #[serde(default)]
    pub max_results: usize,
    pub imdb_id: Option<String>,
    pub season: Option<u32>,
    pub episode: Option<u32>,
    #[serde(default)]
    pub is_daily: bool,
    /// `YYYY-MM-DD`, daily shows only
    pub target_air_date: Option<String>,
}

/// A source of release candidates
#[async_trait]
pub trait Scraper: Send + Sync {
    fn name(&self) -> &str;

    async fn search(&self, request: &SearchRequest) -> Result<Vec<ReleaseCandidate>>;
}

/// Results from one scraper
#[derive(Debug)]
pub struct ScraperSearchResult {
    pub scraper: String,
    pub candidates: Vec<ReleaseCandidate>,
    pub elapsed_ms: u64,
    pub error: Option<String>,
}

/// Search all scrapers concurrently. A failing scraper yields an empty
/// result carrying its error; it never fails the whole search.
pub async fn search_all(
    scrapers: &[Arc<dyn Scraper>],
    request: &SearchRequest,
) -> Vec<ScraperSearchResult> {
    let mut handles = Vec::with_capacity(scrapers.len());
    for scraper in scrapers {
        let scraper = Arc::clone(scraper);
        let request = request.clone();
        handles.push(tokio::spawn(async move {
            let start = Instant::now();
            let outcome = scraper.search(&request).await;
            let elapsed_ms = start.elapsed().as_millis() as u64;
            match outcome {
                Ok(candidates) => {
                    tracing::info!(
                        scraper = scraper.name(),
                        results = candidates.len(),
                        elapsed_ms,
                        "Scraper search finished"
                    );
                    ScraperSearchResult {
                        scraper: scraper.name().to_string(),
                        candidates,
                        elapsed_ms,
                        error: None,
                    }
                }
                Err(e) => {
                    tracing::error!(scraper = scraper.name(), error = %e, "Search failed");
                    ScraperSearchResult {
                        scraper: scraper.name().to_string(),
                        candidates: Vec::new(),
                        elapsed_ms,
                        error: Some(e.to_string()),
                    }
                }
            }
        }));
    }

    let mut results = Vec::with_capacity(handles.len());
    for handle in handles {
        match handle.await {
            Ok(result) => results.push(result),
            Err(e) => tracing::error!(error = %e, "Scraper search task panicked"),
        }
    }
    results
}

/// Key identifying the same release across scrapers
fn dedup_key(scraper: &str, candidate: &ReleaseCandidate) -> String {
    match candidate.info_hash() {
        Some(hash) => format!("magnet:{hash}"),
        None if !candidate.link.trim().is_empty() => candidate.link.trim().to_string(),
        None => format!("{scraper}:{}", candidate.title),
    }
}

/// Search every scraper and merge the results in scraper order, dropping
/// duplicates by info hash (or link). Candidates without a tracker
/// attribute are tagged with the scraper name.
pub async fn collect_candidates(
    scrapers: &[Arc<dyn Scraper>],
    request: &SearchRequest,
) -> Vec<ReleaseCandidate> {
    let mut seen = HashSet::new();
    let mut merged = Vec::new();

    for result in search_all(scrapers, request).await {
        for candidate in result.candidates {
            if !seen.insert(dedup_key(&result.scraper, &candidate)) {
                continue;
            }
            let candidate = if candidate.attribute(attrs::TRACKER).is_none() {
                candidate.with_attribute(attrs::TRACKER, result.scraper.clone())
            } else {
                candidate
            };
            merged.push(candidate);
        }
    }

    if request.max_results > 0 {
        merged.truncate(request.max_results);
    }
    merged
}
