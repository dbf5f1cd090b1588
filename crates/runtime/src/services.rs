//! Explicit service context threaded through the agent and its tools.
//!
//! Everything the orchestrator touches (database, reasoners, search
//! backend, config, session history) lives in one constructed value rather
//! than module-level globals, so tests can assemble a `Services` from mocks.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};

use sleuth_config::AppConfig;
use sleuth_llm::{OpenAiClient, Reasoner};
use sleuth_search::{SearchBackend, SerpApiBackend, TavilyBackend};
use sleuth_store::Database;

use crate::history::SessionStore;

/// Shared service context for the lifetime of the process.
#[derive(Clone)]
pub struct Services {
    pub db: Database,
    /// Primary reasoning model driving the agent loop.
    pub reasoner: Arc<dyn Reasoner>,
    /// Cheaper auxiliary model for the router, intent classifier,
    /// plausibility tool, and summariser.
    pub aux_reasoner: Arc<dyn Reasoner>,
    pub search: Arc<dyn SearchBackend>,
    pub history: SessionStore,
    pub config: AppConfig,
}

impl Services {
    /// Wire up production services from configuration. Fails fast when the
    /// database cannot be opened or the search provider is unusable.
    pub fn from_config(config: AppConfig) -> Result<Self> {
        if config.database.url.is_empty() {
            bail!("DATABASE_URL is not set");
        }
        let db = Database::open(&config.database.url).context("open database")?;

        let reasoner = OpenAiClient::new(
            &config.llm.base_url,
            &config.llm.api_key,
            &config.llm.model,
            Duration::from_secs(config.llm.timeout_secs),
        )?;
        let aux_reasoner = OpenAiClient::new(
            &config.llm.base_url,
            &config.llm.api_key,
            config.llm.effective_inference_model(),
            Duration::from_secs(config.llm.aux_timeout_secs),
        )?
        .with_temperature(0.0);

        let search: Arc<dyn SearchBackend> = match config.search.provider.as_str() {
            "tavily" => Arc::new(TavilyBackend::new(&config.search.tavily_api_key)?),
            "serpapi" => Arc::new(SerpApiBackend::new(&config.search.serpapi_api_key)?),
            other => bail!("unknown search provider: {other}"),
        };

        Ok(Self {
            db,
            reasoner: Arc::new(reasoner),
            aux_reasoner: Arc::new(aux_reasoner),
            search,
            history: SessionStore::default(),
            config,
        })
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.config.search.fetch_timeout_secs)
    }
}
