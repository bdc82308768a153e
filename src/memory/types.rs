//! Core memory type definitions.
//!
//! Defines [`Sector`] (the five cognitive memory categories), [`Memory`]
//! (a full record), [`Entity`] (a node in the waypoint graph), and the
//! weight/rate/option structs consumed by the engine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The five cognitive memory sectors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Sector {
    /// Events, temporal experiences — slow decay.
    Episodic,
    /// Facts, knowledge, preferences — medium decay.
    Semantic,
    /// Skills, techniques, how-to knowledge — medium decay.
    Procedural,
    /// Feelings, sentiments, reactions — slow decay.
    Emotional,
    /// Synthesized insights and meta-observations — fastest decay.
    Reflective,
}

/// All sectors in their canonical order. Tie-breaking in classification
/// follows this order.
pub const ALL_SECTORS: [Sector; 5] = [
    Sector::Episodic,
    Sector::Semantic,
    Sector::Procedural,
    Sector::Emotional,
    Sector::Reflective,
];

impl Sector {
    /// SQL-compatible string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Episodic => "episodic",
            Self::Semantic => "semantic",
            Self::Procedural => "procedural",
            Self::Emotional => "emotional",
            Self::Reflective => "reflective",
        }
    }
}

impl std::fmt::Display for Sector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Sector {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "episodic" => Ok(Self::Episodic),
            "semantic" => Ok(Self::Semantic),
            "procedural" => Ok(Self::Procedural),
            "emotional" => Ok(Self::Emotional),
            "reflective" => Ok(Self::Reflective),
            _ => Err(format!("unknown sector: {s}")),
        }
    }
}

/// A memory record, matching the `memories` table schema.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Memory {
    /// Monotonically increasing rowid primary key.
    pub id: i64,
    /// Full text of the memory (typically `user | assistant`).
    pub content: String,
    /// Cognitive sector of this memory.
    pub sector: Sector,
    /// Intrinsic importance in `[0.0, 1.0]`, boosted on recall.
    pub salience: f64,
    /// Time-decayed salience, maintained by the decay sweeper. This is the
    /// eviction signal.
    pub decay_score: f64,
    /// UTC timestamp of the last recall (or creation if never recalled).
    pub last_accessed_at: DateTime<Utc>,
    /// Number of times this memory has been returned from search.
    pub access_count: i64,
    /// UTC creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Short text suitable for prompt injection (≤ ~200 chars).
    pub summary: String,
    /// Owner, typically `character:player`.
    pub user_id: String,
    /// Conversation session identifier; empty if none.
    pub session_id: String,
    /// Previous memory in the conversation chain; 0 = none.
    pub parent_id: i64,
}

/// An extracted entity, persisted as a waypoint in the association graph.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entity {
    pub text: String,
    /// Free-form type label, e.g. `"person"`, `"topic"`, `"place"`.
    #[serde(rename = "type")]
    pub entity_type: String,
}

/// Per-sector multipliers on a memory's contribution to the composite score.
/// A zero weight is treated as 1.0 at scoring time, so partially-specified
/// weight sets behave sensibly.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct SectorWeights {
    pub episodic: f64,
    pub semantic: f64,
    pub procedural: f64,
    pub emotional: f64,
    pub reflective: f64,
}

impl Default for SectorWeights {
    fn default() -> Self {
        Self {
            episodic: 1.0,
            semantic: 1.0,
            procedural: 1.0,
            emotional: 1.0,
            reflective: 1.0,
        }
    }
}

impl SectorWeights {
    pub fn weight(&self, sector: Sector) -> f64 {
        match sector {
            Sector::Episodic => self.episodic,
            Sector::Semantic => self.semantic,
            Sector::Procedural => self.procedural,
            Sector::Emotional => self.emotional,
            Sector::Reflective => self.reflective,
        }
    }
}

/// Per-sector exponential decay rates (λ, per day). Lower = slower decay.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct DecayRates {
    pub episodic: f64,
    pub semantic: f64,
    pub procedural: f64,
    pub emotional: f64,
    pub reflective: f64,
}

/// Decay rate applied when a stored sector string no longer parses.
pub const DEFAULT_LAMBDA: f64 = 0.02;

impl Default for DecayRates {
    fn default() -> Self {
        Self {
            episodic: 0.005,
            semantic: 0.02,
            procedural: 0.02,
            emotional: 0.005,
            reflective: 0.05,
        }
    }
}

impl DecayRates {
    pub fn lambda(&self, sector: Sector) -> f64 {
        match sector {
            Sector::Episodic => self.episodic,
            Sector::Semantic => self.semantic,
            Sector::Procedural => self.procedural,
            Sector::Emotional => self.emotional,
            Sector::Reflective => self.reflective,
        }
    }
}

/// Coefficients of the composite relevance formula.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoringWeights {
    pub similarity: f64,
    pub salience: f64,
    pub recency: f64,
    pub link_weight: f64,
}

impl Default for ScoringWeights {
    fn default() -> Self {
        Self {
            similarity: 0.6,
            salience: 0.2,
            recency: 0.1,
            link_weight: 0.1,
        }
    }
}

/// Full options for storing a memory with temporal context.
#[derive(Debug, Clone, Default)]
pub struct AddOptions {
    pub user_id: String,
    pub user_message: String,
    pub assistant_message: String,
    /// Optional session identifier.
    pub session_id: String,
    /// Optional parent memory id for conversation threading (0 = none).
    pub parent_id: i64,
    /// Skip classification when set.
    pub sector_hint: Option<Sector>,
    /// Override the default salience of 0.5.
    pub salience: Option<f64>,
    /// Pre-extracted entities; when set, the extractor is not consulted.
    pub entities: Option<Vec<Entity>>,
}

/// Search options extending the basic query with temporal/session filters.
#[derive(Debug, Clone, Default)]
pub struct SearchOptions {
    pub query: String,
    pub user_id: String,
    /// Maximum results; 0 means the default of 5.
    pub limit: usize,
    pub weights: Option<SectorWeights>,
    /// Only memories created at or after this instant.
    pub after: Option<DateTime<Utc>>,
    /// Only memories created at or before this instant.
    pub before: Option<DateTime<Utc>>,
    /// Restrict to a single session when non-empty.
    pub session_id: String,
    /// Restrict to these sectors; empty means all.
    pub sectors: Vec<Sector>,
}

/// A scored memory returned from retrieval.
#[derive(Debug, Clone, Serialize)]
pub struct SearchResult {
    #[serde(flatten)]
    pub memory: Memory,
    /// Blended relevance score (similarity, salience, recency, links).
    pub composite_score: f64,
    /// Raw cosine similarity to the query.
    pub similarity: f64,
}
