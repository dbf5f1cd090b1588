//! Web search backends and page-content utilities.
//!
//! [`SearchBackend`] abstracts the external search provider; Tavily and
//! SerpApi implementations are selected by configuration. Callers should not
//! assume `snippet` and `content` are distinct: some providers only return
//! one of them (see [`SearchHit::snippet_or_content`]).

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::time::Duration;

pub mod dates;
pub mod fetch;

pub use dates::extract_published_date;
pub use fetch::{extract_page_text, fetch_pages};

/// Search result depth requested from the provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SearchDepth {
    Basic,
    Advanced,
}

impl Default for SearchDepth {
    fn default() -> Self {
        Self::Advanced
    }
}

/// Parameters for one backend search call.
#[derive(Debug, Clone)]
pub struct SearchQuery {
    pub query: String,
    /// Number of results wanted, 1..=10.
    pub num: usize,
    /// Restrict to pages published within the last N days.
    pub days: Option<u32>,
    pub depth: SearchDepth,
}

impl SearchQuery {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            num: 3,
            days: None,
            depth: SearchDepth::Advanced,
        }
    }
}

/// One search result.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SearchHit {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub snippet: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
}

impl SearchHit {
    /// Snippet text, whichever field the provider filled.
    pub fn snippet_or_content(&self) -> Option<&str> {
        self.snippet
            .as_deref()
            .filter(|s| !s.is_empty())
            .or(self.content.as_deref().filter(|s| !s.is_empty()))
    }
}

/// Abstract web-search provider.
#[async_trait]
pub trait SearchBackend: Send + Sync {
    async fn search(&self, query: &SearchQuery) -> Result<Vec<SearchHit>>;
}

// ── Tavily ───────────────────────────────────────────────────────────────────

/// Tavily search API backend.
pub struct TavilyBackend {
    client: reqwest::Client,
    api_key: String,
}

impl TavilyBackend {
    pub fn new(api_key: impl Into<String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(15))
            .build()
            .context("build tavily client")?;
        Ok(Self {
            client,
            api_key: api_key.into(),
        })
    }
}

#[async_trait]
impl SearchBackend for TavilyBackend {
    async fn search(&self, query: &SearchQuery) -> Result<Vec<SearchHit>> {
        let mut payload = json!({
            "api_key": self.api_key,
            "query": query.query,
            "max_results": query.num,
            "include_answer": false,
            "include_raw_content": false,
            "search_depth": match query.depth {
                SearchDepth::Basic => "basic",
                SearchDepth::Advanced => "advanced",
            },
        });
        if let Some(days) = query.days {
            payload["days"] = json!(days);
            payload["topic"] = json!("news");
        }

        let resp = self
            .client
            .post("https://api.tavily.com/search")
            .json(&payload)
            .send()
            .await
            .context("tavily request")?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(anyhow!("Tavily API error {status}: {body}"));
        }

        let body: serde_json::Value = resp.json().await.context("tavily response body")?;
        let hits = body
            .get("results")
            .and_then(|v| v.as_array())
            .map(|results| {
                results
                    .iter()
                    .take(query.num)
                    .filter_map(|item| {
                        let url = item["url"].as_str()?.trim();
                        if url.is_empty() {
                            return None;
                        }
                        Some(SearchHit {
                            title: non_empty(item["title"].as_str()),
                            url: url.to_string(),
                            // Tavily reports page text under "content".
                            snippet: non_empty(item["content"].as_str()),
                            content: None,
                        })
                    })
                    .collect::<Vec<_>>()
            })
            .unwrap_or_default();
        Ok(hits)
    }
}

// ── SerpApi ──────────────────────────────────────────────────────────────────

/// SerpApi (Google results) backend.
pub struct SerpApiBackend {
    client: reqwest::Client,
    api_key: String,
}

impl SerpApiBackend {
    pub fn new(api_key: impl Into<String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(15))
            .build()
            .context("build serpapi client")?;
        Ok(Self {
            client,
            api_key: api_key.into(),
        })
    }

    /// Google `tbs` recency window nearest to the requested day span.
    fn recency_param(days: u32) -> &'static str {
        match days {
            0..=1 => "qdr:d",
            2..=7 => "qdr:w",
            8..=31 => "qdr:m",
            _ => "qdr:y",
        }
    }
}

#[async_trait]
impl SearchBackend for SerpApiBackend {
    async fn search(&self, query: &SearchQuery) -> Result<Vec<SearchHit>> {
        let num = query.num.to_string();
        let mut params: Vec<(&str, &str)> = vec![
            ("engine", "google"),
            ("q", &query.query),
            ("num", &num),
            ("api_key", &self.api_key),
        ];
        let tbs;
        if let Some(days) = query.days {
            tbs = Self::recency_param(days);
            params.push(("tbs", tbs));
        }

        let resp = self
            .client
            .get("https://serpapi.com/search.json")
            .query(&params)
            .send()
            .await
            .context("serpapi request")?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(anyhow!("SerpApi error {status}: {body}"));
        }

        let body: serde_json::Value = resp.json().await.context("serpapi response body")?;
        let hits = body
            .get("organic_results")
            .and_then(|v| v.as_array())
            .map(|results| {
                results
                    .iter()
                    .take(query.num)
                    .filter_map(|item| {
                        let url = item["link"].as_str()?.trim();
                        if url.is_empty() {
                            return None;
                        }
                        Some(SearchHit {
                            title: non_empty(item["title"].as_str()),
                            url: url.to_string(),
                            snippet: non_empty(item["snippet"].as_str()),
                            content: None,
                        })
                    })
                    .collect::<Vec<_>>()
            })
            .unwrap_or_default();
        Ok(hits)
    }
}

fn non_empty(s: Option<&str>) -> Option<String> {
    s.map(str::trim)
        .filter(|s| !s.is_empty())
        .map(ToString::to_string)
}

// ── Tests ────────────────────────────────────────────────────────────────────
