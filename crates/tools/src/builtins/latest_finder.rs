//! `latest_finder` — recency-focused search that hunts for the newest
//! corroborated publication about a topic.
//!
//! Runs 2–3 recency-biased query rewrites, shrinking the search window each
//! iteration to the gap since the best date found so far, and stops when an
//! iteration brings no improvement. The reported date must be backed by at
//! least two distinct credible domains publishing within 48 hours.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Datelike, Utc};
use serde::Serialize;
use serde_json::json;
use tracing::debug;

use sleuth_core::{authority_score, host_of};
use sleuth_search::{extract_published_date, fetch_pages, SearchBackend, SearchDepth, SearchQuery};

use crate::{Tool, ToolParam, ToolReturn, ToolSpec};

const MAX_ITERATIONS: usize = 5;
/// Pages fetched per iteration.
const MAX_FETCHES_PER_ITERATION: usize = 10;
/// Two distinct credible domains must agree for the date to count.
const MIN_CORROBORATING_DOMAINS: usize = 2;
/// Authority floor for a domain to count as credible.
const CREDIBILITY_THRESHOLD: u8 = 65;
/// Two sources "agree" when their dates fall within this many hours.
const AGREEMENT_WINDOW_HOURS: i64 = 48;

#[derive(Debug, Clone, Serialize)]
struct DatedSource {
    url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    title: Option<String>,
    published: DateTime<Utc>,
}

pub struct LatestFinderTool {
    backend: Arc<dyn SearchBackend>,
    fetch_timeout: Duration,
}

impl LatestFinderTool {
    pub fn new(backend: Arc<dyn SearchBackend>, fetch_timeout: Duration) -> Self {
        Self {
            backend,
            fetch_timeout,
        }
    }

    /// 2–3 query variants biased toward fresh coverage.
    fn recency_rewrites(query: &str) -> Vec<String> {
        let year = Utc::now().year();
        let mut rewrites = vec![
            format!("{query} latest news"),
            format!("{query} announcement {year}"),
        ];
        if query.split_whitespace().count() >= 2 {
            rewrites.push(query.to_string());
        }
        rewrites
    }
}

#[async_trait]
impl Tool for LatestFinderTool {
    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: "latest_finder".to_string(),
            description: "Find the most recent corroborated news or publication date for a \
                topic. Iteratively narrows the recency window and reports the newest date \
                at least two credible domains agree on."
                .to_string(),
            params: vec![ToolParam::required("query", "Topic to find the latest news for")
                .min_length(2)],
            counts_against_web_budget: true,
        }
    }

    async fn run(&self, args: &serde_json::Value) -> Result<ToolReturn> {
        let query = args["query"].as_str().unwrap_or_default();
        let rewrites = Self::recency_rewrites(query);

        let mut fetched_urls: HashSet<String> = HashSet::new();
        let mut collected: Vec<DatedSource> = Vec::new();
        let mut best: Option<DateTime<Utc>> = None;
        let mut days_window: u32 = 365;
        let mut iterations = 0usize;

        while iterations < MAX_ITERATIONS {
            iterations += 1;

            let mut candidate_urls: Vec<String> = Vec::new();
            for rewrite in &rewrites {
                let search = SearchQuery {
                    query: rewrite.clone(),
                    num: 5,
                    days: Some(days_window),
                    depth: SearchDepth::Basic,
                };
                match self.backend.search(&search).await {
                    Ok(hits) => {
                        for hit in hits {
                            if fetched_urls.insert(hit.url.clone()) {
                                candidate_urls.push(hit.url);
                            }
                        }
                    }
                    Err(e) => debug!(error = %e, "latest_finder search error"),
                }
            }

            let pages =
                fetch_pages(&candidate_urls, MAX_FETCHES_PER_ITERATION, self.fetch_timeout).await;
            for (url, body) in pages {
                let Some(body) = body else { continue };
                let Some(published) = extract_published_date(&body) else {
                    continue;
                };
                let title = body
                    .find("<title>")
                    .and_then(|s| body[s + 7..].find("</title>").map(|e| (s + 7, s + 7 + e)))
                    .map(|(s, e)| body[s..e].trim().to_string())
                    .filter(|t| !t.is_empty());
                collected.push(DatedSource {
                    url,
                    title,
                    published,
                });
            }

            let newest = collected.iter().map(|s| s.published).max();
            let improved = match (newest, best) {
                (Some(n), Some(b)) => n > b,
                (Some(_), None) => true,
                (None, _) => false,
            };
            if !improved {
                break;
            }
            best = newest;

            // Shrink the window to the gap since the best date; nothing older
            // can beat it.
            if let Some(best_date) = best {
                let gap_days = (Utc::now() - best_date).num_days().clamp(1, 365);
                days_window = gap_days as u32;
            }
        }

        let corroborating_domains = best
            .map(|best_date| {
                let mut domains: HashSet<String> = HashSet::new();
                for source in &collected {
                    let within = (best_date - source.published)
                        .num_hours()
                        .abs()
                        <= AGREEMENT_WINDOW_HOURS;
                    if !within {
                        continue;
                    }
                    if authority_score(&source.url) < CREDIBILITY_THRESHOLD {
                        continue;
                    }
                    if let Some(host) = host_of(&source.url) {
                        domains.insert(host);
                    }
                }
                domains.len()
            })
            .unwrap_or(0);

        let quality = corroborating_domains as u64;
        let payload = json!({
            "query": query,
            "latest_date": best.map(|d| d.to_rfc3339()),
            "sources": collected,
            "corroboration": {
                "distinct_sources": corroborating_domains,
                "min_required": MIN_CORROBORATING_DOMAINS,
                "credibility_threshold": CREDIBILITY_THRESHOLD,
                "ok": corroborating_domains >= MIN_CORROBORATING_DOMAINS,
            },
            "total_collected": collected.len(),
            "iterations": iterations,
        });
        Ok(ToolReturn::new(payload, quality))
    }
}
