//! Reflective synthesis — turning batches of recent memories into
//! higher-order observations.
//!
//! The pipeline loads a window of recent memories, filters out prior
//! reflections, asks the configured [`ReflectionProvider`] for observations,
//! drops candidates that duplicate existing reflective memories (embedding
//! similarity), and persists the rest as high-salience reflective memories
//! anchored to their entities.

use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::memory::store::Store;
use crate::memory::truncate_at_word;
use crate::memory::types::{Entity, Memory, Sector};
use crate::providers::{Embedder, ReflectionProvider, TaskHint};
use crate::scoring::cosine_similarity;

/// Candidates at or below this cosine similarity to an existing reflective
/// memory are kept; strictly above it they are dropped as duplicates.
const DUPLICATE_THRESHOLD: f64 = 0.85;

/// Association weight for entities mentioned in a reflection.
const REFLECTION_LINK_WEIGHT: f64 = 0.7;

/// Persisted reflections never start below this salience.
const MIN_REFLECTION_SALIENCE: f64 = 0.7;

/// A synthesized observation proposed by a [`ReflectionProvider`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Reflection {
    /// The observation text.
    pub content: String,
    /// How significant the observation is, in `[0.0, 1.0]`.
    #[serde(default)]
    pub salience: f64,
    /// Entities mentioned in the observation.
    #[serde(default)]
    pub entities: Vec<Entity>,
}

/// Options controlling one reflection pass.
#[derive(Debug, Clone, Default)]
pub struct ReflectOptions {
    pub user_id: String,
    /// Personality/perspective prompt fragment passed to the provider.
    pub character_context: String,
    /// How many recent memories to consider; 0 means the default of 50.
    pub memory_window: usize,
    /// Which sectors to draw from; empty means all.
    pub sectors: Vec<Sector>,
    /// Minimum non-reflective memories required; 0 means the default of 5.
    pub min_memories: usize,
}

/// Run one reflection pass for a user and persist the surviving candidates.
/// Returns the stored reflective memories with their assigned ids.
///
/// Too few eligible memories is not an error — the result is just empty.
/// Provider errors surface to the caller so batch orchestration can stop.
pub(crate) async fn run_reflection(
    store: &Arc<Store>,
    embedder: Option<&Arc<dyn Embedder>>,
    reflector: &Arc<dyn ReflectionProvider>,
    embedding_model: &str,
    opts: ReflectOptions,
) -> Result<Vec<Memory>> {
    let window = if opts.memory_window == 0 { 50 } else { opts.memory_window };
    let min_memories = if opts.min_memories == 0 { 5 } else { opts.min_memories };

    let recent = store
        .get_recent_memories(&opts.user_id, window, &opts.sectors)
        .context("load recent memories")?;

    // Never reflect on reflections.
    let input: Vec<Memory> = recent
        .into_iter()
        .filter(|m| m.sector != Sector::Reflective)
        .collect();
    if input.len() < min_memories {
        return Ok(Vec::new());
    }

    let candidates = reflector
        .reflect(&input, &opts.character_context)
        .await
        .context("reflection provider")?;
    if candidates.is_empty() {
        return Ok(Vec::new());
    }

    let candidates = deduplicate(store, embedder, &opts.user_id, candidates).await;

    let mut stored = Vec::new();
    for reflection in candidates {
        let salience = reflection.salience.clamp(MIN_REFLECTION_SALIENCE, 1.0);

        let mut memory = Memory {
            id: 0,
            content: reflection.content.clone(),
            sector: Sector::Reflective,
            salience,
            decay_score: salience,
            last_accessed_at: Utc::now(),
            access_count: 0,
            created_at: Utc::now(),
            summary: truncate_at_word(&reflection.content, 200),
            user_id: opts.user_id.clone(),
            session_id: String::new(),
            parent_id: 0,
        };

        let memory_id = match store.insert_memory(&memory) {
            Ok(id) => id,
            Err(err) => {
                tracing::warn!(error = %err, "storing reflection failed");
                continue;
            }
        };
        memory.id = memory_id;

        // Embed for future recall; a failure just leaves the memory vectorless.
        if let Some(embedder) = embedder {
            match embedder.embed(&reflection.content, TaskHint::RetrievalDocument).await {
                Ok(vector) => {
                    if let Err(err) =
                        store.insert_vector(memory_id, Sector::Reflective, &vector, embedding_model)
                    {
                        tracing::warn!(memory_id, error = %err, "storing reflection vector failed");
                    }
                }
                Err(err) => {
                    tracing::warn!(memory_id, error = %err, "embedding reflection failed");
                }
            }
        }

        for entity in &reflection.entities {
            match store.upsert_waypoint(&entity.text, &entity.entity_type) {
                Ok(wp_id) => {
                    if let Err(err) =
                        store.insert_association(memory_id, wp_id, REFLECTION_LINK_WEIGHT)
                    {
                        tracing::warn!(memory_id, error = %err, "associating reflection entity failed");
                    }
                }
                Err(err) => {
                    tracing::warn!(entity = %entity.text, error = %err, "waypoint upsert failed");
                }
            }
        }

        stored.push(memory);
    }

    if !stored.is_empty() {
        tracing::info!(user_id = %opts.user_id, count = stored.len(), "generated reflections");
    }

    Ok(stored)
}

/// Drop candidates whose embedding is strictly more similar than the
/// duplicate threshold to any existing reflective memory of the user.
/// Without an embedder (or when a candidate fails to embed) every candidate
/// is kept — better a near-duplicate insight than none.
async fn deduplicate(
    store: &Arc<Store>,
    embedder: Option<&Arc<dyn Embedder>>,
    user_id: &str,
    candidates: Vec<Reflection>,
) -> Vec<Reflection> {
    let Some(embedder) = embedder else {
        return candidates;
    };

    let existing = match store.get_memories_with_vectors(user_id) {
        Ok(rows) => rows,
        Err(err) => {
            tracing::warn!(error = %err, "loading reflective vectors for dedup failed");
            return candidates;
        }
    };
    let reflective_vectors: Vec<Vec<f32>> = existing
        .into_iter()
        .filter(|mwv| mwv.memory.sector == Sector::Reflective)
        .filter_map(|mwv| mwv.vector)
        .collect();
    if reflective_vectors.is_empty() {
        return candidates;
    }

    let mut unique = Vec::new();
    for candidate in candidates {
        let vector = match embedder.embed(&candidate.content, TaskHint::RetrievalDocument).await {
            Ok(v) => v,
            Err(err) => {
                tracing::warn!(error = %err, "embedding candidate for dedup failed, keeping it");
                unique.push(candidate);
                continue;
            }
        };

        let duplicate = reflective_vectors
            .iter()
            .any(|existing| cosine_similarity(&vector, existing) > DUPLICATE_THRESHOLD);
        if !duplicate {
            unique.push(candidate);
        }
    }

    unique
}
