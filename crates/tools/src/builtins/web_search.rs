//! `web_search` — backend search with optional parallel page-content fill.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use serde_json::json;
use tracing::debug;

use sleuth_search::{extract_page_text, fetch_pages, SearchBackend, SearchDepth, SearchQuery};

use crate::{ParamType, Tool, ToolParam, ToolReturn, ToolSpec};

/// Pages fetched per search when `include_content` is set.
const MAX_CONTENT_FETCHES: usize = 8;
/// Character budget for extracted page content.
const CONTENT_CHAR_BUDGET: usize = 8000;

pub struct WebSearchTool {
    backend: Arc<dyn SearchBackend>,
    fetch_timeout: Duration,
}

impl WebSearchTool {
    pub fn new(backend: Arc<dyn SearchBackend>, fetch_timeout: Duration) -> Self {
        Self {
            backend,
            fetch_timeout,
        }
    }
}

#[async_trait]
impl Tool for WebSearchTool {
    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: "web_search".to_string(),
            description: "Search the web and return result titles, URLs, snippets, and \
                (optionally) extracted page content. Use precise queries naming the \
                subject; repeated identical queries are blocked."
                .to_string(),
            params: vec![
                ToolParam::required("query", "Search query string").min_length(2),
                ToolParam::optional("num", "Number of results to return")
                    .typed(ParamType::Integer)
                    .bounded(1.0, 10.0)
                    .with_default(json!(3)),
                ToolParam::optional(
                    "include_content",
                    "Also fetch result pages and include extracted text",
                )
                .typed(ParamType::Boolean)
                .with_default(json!(true)),
                ToolParam::optional("days", "Restrict to pages from the last N days")
                    .typed(ParamType::Integer)
                    .bounded(1.0, 365.0),
                ToolParam::optional("depth", "Search depth")
                    .one_of(&["basic", "advanced"])
                    .with_default(json!("advanced")),
            ],
            counts_against_web_budget: true,
        }
    }

    async fn run(&self, args: &serde_json::Value) -> Result<ToolReturn> {
        let query = SearchQuery {
            query: args["query"].as_str().unwrap_or_default().to_string(),
            num: args["num"].as_u64().unwrap_or(3) as usize,
            days: args["days"].as_u64().map(|d| d as u32),
            depth: match args["depth"].as_str() {
                Some("basic") => SearchDepth::Basic,
                _ => SearchDepth::Advanced,
            },
        };
        let include_content = args["include_content"].as_bool().unwrap_or(true);

        let mut hits = match self.backend.search(&query).await {
            Ok(hits) => hits,
            Err(e) => {
                // Provider failures downgrade to an empty result set; the
                // loop carries on and the model can try a different query.
                debug!(error = %e, "search backend error");
                Vec::new()
            }
        };

        if include_content && !hits.is_empty() {
            let urls: Vec<String> = hits.iter().map(|h| h.url.clone()).collect();
            let pages = fetch_pages(&urls, MAX_CONTENT_FETCHES, self.fetch_timeout).await;
            for (url, body) in pages {
                let Some(body) = body else { continue };
                let text = extract_page_text(&body, CONTENT_CHAR_BUDGET);
                if text.is_empty() {
                    continue;
                }
                if let Some(hit) = hits.iter_mut().find(|h| h.url == url) {
                    if hit.snippet.as_deref().map_or(true, str::is_empty) {
                        hit.snippet = Some(text.chars().take(300).collect());
                    }
                    hit.content = Some(text);
                }
            }
        }

        let quality = hits.len() as u64;
        Ok(ToolReturn::new(serde_json::to_value(&hits)?, quality))
    }
}
