//! External collaborator contracts.
//!
//! The engine consumes four capabilities — embedding, sector classification,
//! entity extraction, and reflection — each a single-method trait injected at
//! construction. Built-in implementations live in [`gemini`] and [`ollama`];
//! anything satisfying the traits plugs in the same way.

pub mod gemini;
pub mod ollama;

use anyhow::Result;
use async_trait::async_trait;

use crate::memory::reflect::Reflection;
use crate::memory::types::{Entity, Memory, Sector};

/// Embedding task hint. Providers that do not distinguish query and document
/// embeddings may ignore it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskHint {
    /// Embedding a search query.
    RetrievalQuery,
    /// Embedding content for storage.
    RetrievalDocument,
}

impl TaskHint {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::RetrievalQuery => "RETRIEVAL_QUERY",
            Self::RetrievalDocument => "RETRIEVAL_DOCUMENT",
        }
    }
}

/// Generates fixed-dimension vector embeddings from text.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Embed `text`. The returned vector's length must equal
    /// [`dimension`](Self::dimension).
    async fn embed(&self, text: &str, task: TaskHint) -> Result<Vec<f32>>;

    /// The fixed number of dimensions this provider produces.
    fn dimension(&self) -> usize;
}

/// Determines which cognitive sector a memory belongs to. Synchronous —
/// implementations should be pure or cached, never blocking on I/O.
pub trait SectorClassifier: Send + Sync {
    fn classify(&self, content: &str) -> Sector;
}

/// Pulls entities from memory content for the waypoint graph.
pub trait EntityExtractor: Send + Sync {
    fn extract(&self, content: &str) -> Vec<Entity>;
}

/// Generates reflective observations from a batch of recent memories.
/// `character_context` is an optional prompt fragment describing the
/// character's personality or perspective.
#[async_trait]
pub trait ReflectionProvider: Send + Sync {
    async fn reflect(
        &self,
        memories: &[Memory],
        character_context: &str,
    ) -> Result<Vec<Reflection>>;
}

/// An LLM-backed sector verdict, used as the heuristic classifier's fallback
/// and by the async reclassification consumer.
#[async_trait]
pub trait RemoteSectorClassifier: Send + Sync {
    async fn classify_sector(&self, content: &str) -> Result<Sector>;
}
