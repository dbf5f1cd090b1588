//! Domain types shared across the sleuth workspace.
//!
//! Everything here is plain data: the canonical entity/fact model, the
//! answer units ("magic variables") the research loop produces, the
//! inference-router output that steers evidence policy, and the
//! source-authority heuristic used to rank citations.

pub mod authority;
pub mod types;

pub use authority::{authority_score, dedup_and_rank_sources, host_of};
pub use types::{
    AttrConstraint, Dtype, EnrichmentResult, Entity, EvidencePolicy, Fact, FactValue, Intent,
    MagicVariable, ResearchIntensity, RouterOutput, SourceRef, Subject, VariableHint, VocabHints,
};
