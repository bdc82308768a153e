//! Cognitive memory for AI characters — persistent, sectored, associative.
//!
//! Mnemos gives NPCs, companions, and chat agents a memory system inspired
//! by cognitive science. Every conversation exchange becomes a memory in one
//! of five sectors, each with its own decay temperature:
//!
//! | Sector | Purpose | Decay (λ/day) |
//! |--------|---------|---------------|
//! | **Episodic** | Events, visits, things that happened | 0.005 |
//! | **Semantic** | Facts, preferences, stable truths | 0.02 |
//! | **Procedural** | Skills, techniques, how-to | 0.02 |
//! | **Emotional** | Feelings, sentiments, reactions | 0.005 |
//! | **Reflective** | Synthesized insights | 0.05 |
//!
//! # Architecture
//!
//! - **Storage**: a single SQLite file (WAL mode), exhaustively scored in
//!   process — at the target scale of 50–500 memories per user there is no
//!   need for an ANN index
//! - **Retrieval**: cosine similarity blended with salience, recency, and
//!   associative link weight; high-salience memories are guaranteed to
//!   surface even when a query doesn't match them semantically
//! - **Associations**: extracted entities become waypoints; search expands
//!   one hop through shared waypoints before ranking
//! - **Lifecycle**: a background sweeper decays every memory on a per-sector
//!   schedule and prunes what falls below threshold; a reflection worker
//!   periodically synthesizes higher-order observations
//!
//! # Modules
//!
//! - [`config`] — TOML-loadable configuration with env overrides
//! - [`db`] — SQLite initialization, schema, and migrations
//! - [`scoring`] — the pure scoring math
//! - [`memory`] — store, entity graph, classifier, reflection, and the
//!   [`MemoryEngine`] facade
//! - [`providers`] — collaborator traits plus Gemini and Ollama
//!   implementations
//!
//! # Example
//!
//! ```no_run
//! use mnemos::{EngineConfig, MemoryEngine, Providers};
//!
//! # #[tokio::main]
//! # async fn main() -> anyhow::Result<()> {
//! let engine = MemoryEngine::init(EngineConfig::default(), Providers::default())?;
//!
//! engine.add("remember to greet me with Howdy", "You got it!", "lily:player1").await?;
//! let results = engine.search("hi", "lily:player1", 5, None).await;
//! for r in &results {
//!     println!("{:.2} {}", r.composite_score, r.memory.summary);
//! }
//!
//! engine.close().await;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod db;
pub mod memory;
pub mod providers;
pub mod scoring;

pub use config::EngineConfig;
pub use memory::engine::{MemoryEngine, Providers};
pub use memory::reflect::{ReflectOptions, Reflection};
pub use memory::store::Store;
pub use memory::types::{
    AddOptions, DecayRates, Entity, Memory, ScoringWeights, SearchOptions, SearchResult, Sector,
    SectorWeights,
};
