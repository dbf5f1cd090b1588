//! Configuration for the sleuth enrichment engine.
//!
//! Settings come from an optional TOML file plus environment-variable
//! overrides; the env vars always win so a file-less deployment works with
//! nothing but the environment.

use std::env;
use std::fs;
use std::path::Path;

use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};

// ── LLM ──────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    /// API key for the OpenAI-compatible endpoint. Env: `OPENAI_API_KEY`.
    pub api_key: String,
    /// Base URL of the chat-completions API.
    pub base_url: String,
    /// Primary reasoning model. Env: `OPENAI_MODEL`.
    pub model: String,
    /// Cheaper auxiliary model used by the inference router, intent
    /// classifier, and summariser. Env: `OPENAI_INFERENCE_MODEL`.
    /// Empty means "same as `model`".
    pub inference_model: String,
    /// Request timeout for the primary model, in seconds.
    pub timeout_secs: u64,
    /// Request timeout for the auxiliary model, in seconds.
    pub aux_timeout_secs: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            base_url: "https://api.openai.com/v1".to_string(),
            model: "gpt-4o-mini".to_string(),
            inference_model: String::new(),
            timeout_secs: 60,
            aux_timeout_secs: 30,
        }
    }
}

impl LlmConfig {
    /// The model the auxiliary calls should use.
    pub fn effective_inference_model(&self) -> &str {
        if self.inference_model.is_empty() {
            &self.model
        } else {
            &self.inference_model
        }
    }
}

// ── Search ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    /// `tavily` or `serpapi`. Env: `SEARCH_PROVIDER`.
    pub provider: String,
    /// Env: `TAVILY_API_KEY`.
    pub tavily_api_key: String,
    /// Env: `SERPAPI_API_KEY`.
    pub serpapi_api_key: String,
    /// Per-page fetch timeout, in seconds.
    pub fetch_timeout_secs: u64,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            provider: "tavily".to_string(),
            tavily_api_key: String::new(),
            serpapi_api_key: String::new(),
            fetch_timeout_secs: 15,
        }
    }
}

// ── Database ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// Connection string (a SQLite path). Env: `DATABASE_URL`.
    pub url: String,
}

// ── Research budgets ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ResearchConfig {
    /// Optional hard cap on loop steps; tightens the intensity base only.
    /// Env: `RESEARCH_MAX_STEPS`. `0` means "no extra cap".
    pub max_steps: usize,
    /// Optional hard cap on web searches per run; tightens the intensity
    /// base only. Env: `RESEARCH_MAX_WEB_SEARCHES`. `0` means "no extra cap".
    pub max_web_searches: usize,
    /// Depth limit for nested `knowledge_query` research runs.
    pub max_recursion_depth: usize,
}

impl Default for ResearchConfig {
    fn default() -> Self {
        Self {
            max_steps: 0,
            max_web_searches: 0,
            max_recursion_depth: 2,
        }
    }
}

impl ResearchConfig {
    /// Compose the intensity base caps with the env caps: env values only
    /// ever tighten, never loosen.
    pub fn effective_caps(&self, base: (usize, usize)) -> (usize, usize) {
        let steps = if self.max_steps == 0 {
            base.0
        } else {
            base.0.min(self.max_steps)
        };
        let web = if self.max_web_searches == 0 {
            base.1
        } else {
            base.1.min(self.max_web_searches)
        };
        (steps, web)
    }
}

// ── Memory ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MemoryConfig {
    /// Retention window for per-session chat history. Env: `CHAT_MEMORY_WINDOW`.
    pub window: usize,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self { window: 8 }
    }
}

// ── Server ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0:8080".to_string(),
        }
    }
}

// ── Root ─────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub llm: LlmConfig,
    pub search: SearchConfig,
    pub database: DatabaseConfig,
    pub research: ResearchConfig,
    pub memory: MemoryConfig,
    pub server: ServerConfig,
}

impl AppConfig {
    /// Load from a TOML file (missing file is fine), then apply env overrides.
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self> {
        let mut config = Self::default();
        if let Ok(raw) = fs::read_to_string(path) {
            config = toml::from_str(&raw)?;
        }
        config.apply_env();
        config.validate()?;
        Ok(config)
    }

    /// Load from environment variables only.
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();
        config.apply_env();
        config.validate()?;
        Ok(config)
    }

    fn apply_env(&mut self) {
        if let Some(v) = non_empty_env("OPENAI_API_KEY") {
            self.llm.api_key = v;
        }
        if let Some(v) = non_empty_env("OPENAI_MODEL") {
            self.llm.model = v;
        }
        if let Some(v) = non_empty_env("OPENAI_INFERENCE_MODEL") {
            self.llm.inference_model = v;
        }
        if let Some(v) = non_empty_env("SEARCH_PROVIDER") {
            self.search.provider = v.to_lowercase();
        }
        if let Some(v) = non_empty_env("TAVILY_API_KEY") {
            self.search.tavily_api_key = v;
        }
        if let Some(v) = non_empty_env("SERPAPI_API_KEY") {
            self.search.serpapi_api_key = v;
        }
        if let Some(v) = non_empty_env("DATABASE_URL") {
            self.database.url = v;
        }
        if let Some(n) = non_empty_env("CHAT_MEMORY_WINDOW").and_then(|v| v.parse().ok()) {
            self.memory.window = n;
        }
        if let Some(n) = non_empty_env("RESEARCH_MAX_STEPS").and_then(|v| v.parse().ok()) {
            self.research.max_steps = n;
        }
        if let Some(n) = non_empty_env("RESEARCH_MAX_WEB_SEARCHES").and_then(|v| v.parse().ok()) {
            self.research.max_web_searches = n;
        }
    }

    fn validate(&self) -> Result<()> {
        match self.search.provider.as_str() {
            "tavily" | "serpapi" => {}
            other => bail!("unknown SEARCH_PROVIDER: {other:?} (expected tavily or serpapi)"),
        }
        if self.memory.window == 0 {
            bail!("CHAT_MEMORY_WINDOW must be at least 1");
        }
        Ok(())
    }

    pub fn save_to(&self, path: impl AsRef<Path>) -> Result<()> {
        if let Some(parent) = path.as_ref().parent() {
            fs::create_dir_all(parent)?;
        }
        let rendered = toml::to_string_pretty(self)?;
        fs::write(path, rendered)?;
        Ok(())
    }
}

fn non_empty_env(name: &str) -> Option<String> {
    env::var(name).ok().filter(|v| !v.trim().is_empty())
}

// ── Tests ────────────────────────────────────────────────────────────────────
