//! The four research tools exposed to the reasoner.

mod knowledge;
mod latest_finder;
mod plausibility;
mod web_search;

pub use knowledge::{FactResearcher, KnowledgeQueryTool};
pub use latest_finder::LatestFinderTool;
pub use plausibility::EvaluatePlausibilityTool;
pub use web_search::WebSearchTool;
