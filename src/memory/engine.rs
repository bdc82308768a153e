//! The engine facade — everything a caller touches.
//!
//! [`MemoryEngine`] ties the store, the providers, and the background workers
//! into one lifecycle: `add` classifies, embeds, and persists a conversation
//! exchange; `search` scores every candidate, expands through the waypoint
//! graph, and guarantees high-salience memories surface; `reflect` runs
//! synthesis on demand; `close` winds everything down in order.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use chrono::Utc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::EngineConfig;
use crate::memory::classify::{AsyncReclassifier, EngineClassifier, HeuristicClassifier};
use crate::memory::graph::{expand_via_waypoints, DefaultEntityExtractor};
use crate::memory::reflect::{run_reflection, ReflectOptions};
use crate::memory::store::{MemoryWithVector, Store};
use crate::memory::truncate_at_word;
use crate::memory::types::{
    AddOptions, Memory, SearchOptions, SearchResult, Sector, SectorWeights,
};
use crate::memory::workers;
use crate::providers::gemini::{GeminiEmbedder, GeminiSectorClassifier};
use crate::providers::{
    Embedder, EntityExtractor, ReflectionProvider, RemoteSectorClassifier, SectorClassifier,
    TaskHint,
};
use crate::scoring::{composite_score, cosine_similarity, days_since};

/// Salience assigned to a memory stored without an explicit override.
const DEFAULT_SALIENCE: f64 = 0.5;

/// Association weight for entities extracted on the write path.
const ADD_LINK_WEIGHT: f64 = 0.5;

/// Salience boost applied to every memory returned from search.
const REINFORCE_BOOST: f64 = 0.15;

/// How many top-similarity candidates seed the waypoint expansion.
const EXPANSION_SEEDS: usize = 20;

/// Memories at or above this salience are guaranteed to surface.
const HIGH_SALIENCE_THRESHOLD: f64 = 0.6;

/// At most this many high-salience memories are injected per search.
const MAX_SALIENCE_BOOSTS: usize = 2;

/// Explicitly injected collaborators. Anything left `None` is resolved from
/// configuration (or omitted — the reflection provider is never auto-created).
#[derive(Default)]
pub struct Providers {
    pub embedder: Option<Arc<dyn Embedder>>,
    pub classifier: Option<Arc<dyn SectorClassifier>>,
    pub remote_classifier: Option<Arc<dyn RemoteSectorClassifier>>,
    pub entity_extractor: Option<Arc<dyn EntityExtractor>>,
    pub reflection_provider: Option<Arc<dyn ReflectionProvider>>,
}

/// The cognitive memory engine.
pub struct MemoryEngine {
    store: Arc<Store>,
    embedder: Option<Arc<dyn Embedder>>,
    classifier: EngineClassifier,
    extractor: Arc<dyn EntityExtractor>,
    reflector: Option<Arc<dyn ReflectionProvider>>,
    config: EngineConfig,
    /// Serializes the insert → vector → associate → enforce-cap sequence so
    /// the cap check observes a consistent count. Search never takes this.
    add_lock: tokio::sync::Mutex<()>,
    shutdown: CancellationToken,
    workers: std::sync::Mutex<Vec<JoinHandle<()>>>,
}

impl MemoryEngine {
    /// Create an engine: open and migrate the database, resolve providers,
    /// and start the background workers. Must be called from within a Tokio
    /// runtime (the workers are spawned immediately).
    pub fn init(config: EngineConfig, providers: Providers) -> Result<Self> {
        let store = Arc::new(Store::open(&config.storage.db_path)?);
        Self::with_store(config, providers, store)
    }

    /// Like [`init`](Self::init), but over an existing store. Useful for
    /// in-memory engines in tests.
    pub fn with_store(
        config: EngineConfig,
        providers: Providers,
        store: Arc<Store>,
    ) -> Result<Self> {
        let gemini_key = config.embedding.gemini_api_key.clone();

        let embedder = providers.embedder.or_else(|| {
            if gemini_key.is_empty() {
                tracing::warn!(
                    "no embedding provider configured — memories will be stored without \
                     vectors and search will return empty"
                );
                None
            } else {
                Some(Arc::new(GeminiEmbedder::new(&gemini_key, config.embedding.dimension))
                    as Arc<dyn Embedder>)
            }
        });

        let classifier = if let Some(external) = providers.classifier {
            EngineClassifier::External(external)
        } else if let Some(remote) = providers.remote_classifier {
            EngineClassifier::AsyncLlm(AsyncReclassifier::new(remote, store.clone()))
        } else if !gemini_key.is_empty() {
            let remote: Arc<dyn RemoteSectorClassifier> =
                Arc::new(GeminiSectorClassifier::new(&gemini_key));
            EngineClassifier::AsyncLlm(AsyncReclassifier::new(remote, store.clone()))
        } else {
            EngineClassifier::Heuristic(HeuristicClassifier::new())
        };

        let extractor = providers
            .entity_extractor
            .unwrap_or_else(|| Arc::new(DefaultEntityExtractor::new()));

        // The reflection provider is opt-in only; nothing is auto-created.
        let reflector = providers.reflection_provider;

        let shutdown = CancellationToken::new();
        let mut handles = Vec::new();

        handles.push(workers::spawn_decay_worker(
            store.clone(),
            config.storage.min_decay_score,
            config.decay.rates,
            config.decay.interval(),
            shutdown.clone(),
        ));

        if let Some(reflector) = &reflector {
            if let Some(interval) = config.reflection.interval() {
                handles.push(workers::spawn_reflection_worker(
                    store.clone(),
                    embedder.clone(),
                    reflector.clone(),
                    config.embedding.model.clone(),
                    config.reflection.memory_window,
                    config.reflection.min_memories,
                    interval,
                    shutdown.clone(),
                ));
            }
        }

        tracing::info!(
            db = %config.storage.db_path,
            dimension = config.embedding.dimension,
            decay_interval_hours = config.decay.interval_hours,
            "memory engine initialized"
        );

        Ok(Self {
            store,
            embedder,
            classifier,
            extractor,
            reflector,
            config,
            add_lock: tokio::sync::Mutex::new(()),
            shutdown,
            workers: std::sync::Mutex::new(handles),
        })
    }

    // ── Write path ──────────────────────────────────────────────────────────

    /// Store a conversation exchange as a memory. Returns the new memory id,
    /// or 0 for an empty user id.
    pub async fn add(
        &self,
        user_message: &str,
        assistant_message: &str,
        user_id: &str,
    ) -> Result<i64> {
        self.add_with_options(AddOptions {
            user_id: user_id.to_string(),
            user_message: user_message.to_string(),
            assistant_message: assistant_message.to_string(),
            ..Default::default()
        })
        .await
    }

    /// Full write path with temporal context, sector hints, and
    /// pre-extracted entities.
    pub async fn add_with_options(&self, opts: AddOptions) -> Result<i64> {
        if opts.user_id.is_empty() {
            return Ok(0);
        }

        let _guard = self.add_lock.lock().await;

        let content = format!("{} | {}", opts.user_message, opts.assistant_message);

        let sector = match opts.sector_hint {
            Some(hint) => hint,
            None => self.classifier.classify(&content).await,
        };

        // Embedding is best-effort: a failed or absent embedder stores the
        // memory without a vector.
        let vector = match &self.embedder {
            Some(embedder) => match embedder.embed(&content, TaskHint::RetrievalDocument).await {
                Ok(v) if v.len() == embedder.dimension() => Some(v),
                Ok(v) => {
                    tracing::warn!(
                        got = v.len(),
                        want = embedder.dimension(),
                        "embedding dimension mismatch, storing without vector"
                    );
                    None
                }
                Err(err) => {
                    tracing::warn!(error = %err, "embedding failed, storing without vector");
                    None
                }
            },
            None => None,
        };

        let summary =
            build_conversation_summary(&opts.user_message, &opts.assistant_message, 200);

        let memory = Memory {
            id: 0,
            content: content.clone(),
            sector,
            salience: opts.salience.unwrap_or(DEFAULT_SALIENCE),
            decay_score: opts.salience.unwrap_or(DEFAULT_SALIENCE),
            last_accessed_at: Utc::now(),
            access_count: 0,
            created_at: Utc::now(),
            summary,
            user_id: opts.user_id.clone(),
            session_id: opts.session_id.clone(),
            parent_id: opts.parent_id,
        };
        let memory_id = self.store.insert_memory(&memory).context("insert memory")?;

        if let Some(vector) = vector {
            if let Err(err) =
                self.store
                    .insert_vector(memory_id, sector, &vector, &self.config.embedding.model)
            {
                tracing::warn!(memory_id, error = %err, "insert vector failed");
            }
        }

        let entities = match opts.entities {
            Some(entities) => entities,
            None => self.extractor.extract(&content),
        };
        let entity_count = entities.len();
        for entity in &entities {
            let wp_id = match self.store.upsert_waypoint(&entity.text, &entity.entity_type) {
                Ok(id) => id,
                Err(err) => {
                    tracing::warn!(entity = %entity.text, error = %err, "waypoint upsert failed");
                    continue;
                }
            };
            if let Err(err) = self.store.insert_association(memory_id, wp_id, ADD_LINK_WEIGHT) {
                tracing::warn!(memory_id, waypoint_id = wp_id, error = %err, "association failed");
            }
        }

        if let Err(err) = self
            .store
            .enforce_memory_limit(&opts.user_id, self.config.storage.max_memories_per_user)
        {
            tracing::warn!(user_id = %opts.user_id, error = %err, "cap enforcement failed");
        }

        // Only unhinted memories are worth a second opinion.
        if opts.sector_hint.is_none() {
            self.classifier.submit_for_reclassification(memory_id, &content);
        }

        tracing::debug!(
            memory_id,
            sector = %sector,
            user_id = %opts.user_id,
            entities = entity_count,
            "stored memory"
        );
        Ok(memory_id)
    }

    // ── Read path ───────────────────────────────────────────────────────────

    /// Retrieve the most relevant memories for a user, scored by the
    /// composite formula. Best-effort: failures log and return empty.
    pub async fn search(
        &self,
        query: &str,
        user_id: &str,
        limit: usize,
        weights: Option<SectorWeights>,
    ) -> Vec<SearchResult> {
        self.search_with_options(SearchOptions {
            query: query.to_string(),
            user_id: user_id.to_string(),
            limit,
            weights,
            ..Default::default()
        })
        .await
    }

    /// Search with temporal, session, and sector filters.
    pub async fn search_with_options(&self, opts: SearchOptions) -> Vec<SearchResult> {
        if opts.user_id.is_empty() {
            return Vec::new();
        }
        let limit = if opts.limit == 0 { 5 } else { opts.limit };
        let weights = opts.weights.unwrap_or_default();

        let Some(embedder) = &self.embedder else {
            tracing::warn!("search skipped: no embedding provider configured");
            return Vec::new();
        };
        let query_vec = match embedder.embed(&opts.query, TaskHint::RetrievalQuery).await {
            Ok(v) => v,
            Err(err) => {
                tracing::warn!(error = %err, "query embedding failed");
                return Vec::new();
            }
        };

        let candidates = match self.store.get_memories_with_vectors(&opts.user_id) {
            Ok(rows) => rows,
            Err(err) => {
                tracing::warn!(error = %err, "loading candidate memories failed");
                return Vec::new();
            }
        };

        let candidates: Vec<MemoryWithVector> = candidates
            .into_iter()
            .filter(|c| passes_filters(&c.memory, &opts))
            .collect();
        if candidates.is_empty() {
            return Vec::new();
        }

        // Score by similarity; candidates without a vector can't participate.
        let mut scored: Vec<(MemoryWithVector, f64)> = candidates
            .into_iter()
            .filter(|c| c.vector.is_some())
            .map(|c| {
                let sim = match &c.vector {
                    Some(v) => cosine_similarity(&query_vec, v),
                    None => 0.0,
                };
                (c, sim)
            })
            .collect();
        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));

        // Top similarity hits seed one-hop expansion through the graph.
        let seed_ids: Vec<i64> = scored
            .iter()
            .take(EXPANSION_SEEDS)
            .map(|(c, _)| c.memory.id)
            .collect();
        let link_weights = expand_via_waypoints(&self.store, &seed_ids, &opts.user_id);

        let mut results: Vec<SearchResult> = scored
            .iter()
            .map(|(c, sim)| self.to_result(c, *sim, &weights, &link_weights))
            .collect();

        results.sort_by(|a, b| {
            b.composite_score
                .partial_cmp(&a.composite_score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        results.truncate(limit);

        let results =
            self.guarantee_high_salience(results, &scored, &weights, &link_weights, limit);

        for result in &results {
            if let Err(err) = self.store.reinforce_salience(result.memory.id, REINFORCE_BOOST) {
                tracing::warn!(memory_id = result.memory.id, error = %err, "reinforcement failed");
            }
        }

        results
    }

    fn to_result(
        &self,
        candidate: &MemoryWithVector,
        similarity: f64,
        weights: &SectorWeights,
        link_weights: &HashMap<i64, f64>,
    ) -> SearchResult {
        let mut sector_weight = weights.weight(candidate.memory.sector);
        if sector_weight == 0.0 {
            sector_weight = 1.0;
        }
        let link_weight = link_weights.get(&candidate.memory.id).copied().unwrap_or(0.0);
        let days = days_since(candidate.memory.last_accessed_at);
        let composite = composite_score(
            similarity,
            candidate.memory.decay_score,
            days,
            link_weight,
            sector_weight,
            &self.config.scoring,
        );
        SearchResult {
            memory: candidate.memory.clone(),
            composite_score: composite,
            similarity,
        }
    }

    /// Surface the user's most important memories even when their semantic
    /// similarity to the current query is low. Explicit requests ("greet me
    /// with X") must not be buried by a casual query that doesn't match.
    fn guarantee_high_salience(
        &self,
        mut results: Vec<SearchResult>,
        all_scored: &[(MemoryWithVector, f64)],
        weights: &SectorWeights,
        link_weights: &HashMap<i64, f64>,
        limit: usize,
    ) -> Vec<SearchResult> {
        let in_results: HashSet<i64> = results.iter().map(|r| r.memory.id).collect();

        let mut candidates: Vec<SearchResult> = all_scored
            .iter()
            .filter(|(c, _)| {
                !in_results.contains(&c.memory.id)
                    && c.memory.salience >= HIGH_SALIENCE_THRESHOLD
            })
            .map(|(c, sim)| self.to_result(c, *sim, weights, link_weights))
            .collect();
        if candidates.is_empty() {
            return results;
        }

        candidates.sort_by(|a, b| {
            b.memory
                .salience
                .partial_cmp(&a.memory.salience)
                .unwrap_or(std::cmp::Ordering::Equal)
        });

        for candidate in candidates.into_iter().take(MAX_SALIENCE_BOOSTS) {
            if results.len() >= limit {
                // Replace the lowest-ranked result rather than growing.
                let last = results.len() - 1;
                results[last] = candidate;
            } else {
                results.push(candidate);
            }
        }

        results
    }

    // ── Reflection ──────────────────────────────────────────────────────────

    /// Run reflective synthesis for a user now. Requires a configured
    /// reflection provider; provider errors surface to the caller.
    pub async fn reflect(&self, opts: ReflectOptions) -> Result<Vec<Memory>> {
        let Some(reflector) = &self.reflector else {
            bail!("no reflection provider configured");
        };
        run_reflection(
            &self.store,
            self.embedder.as_ref(),
            reflector,
            &self.config.embedding.model,
            opts,
        )
        .await
    }

    // ── Temporal queries ────────────────────────────────────────────────────

    /// All memories of a session, oldest first.
    pub fn get_session(&self, session_id: &str) -> Result<Vec<Memory>> {
        self.store.get_session_memories(session_id)
    }

    /// The most recent session id for a user, if any.
    pub fn get_last_session(&self, user_id: &str) -> Result<Option<String>> {
        self.store.get_last_session_id(user_id)
    }

    /// The most recent memories for a user, optionally filtered by sector.
    pub fn list_recent(
        &self,
        user_id: &str,
        limit: usize,
        sectors: &[Sector],
    ) -> Result<Vec<Memory>> {
        self.store.get_recent_memories(user_id, limit, sectors)
    }

    // ── Lifecycle ───────────────────────────────────────────────────────────

    /// Shut down: cancel the background workers, wait for them, drain the
    /// reclassification queue, and flush the store.
    pub async fn close(&self) {
        self.shutdown.cancel();

        let handles: Vec<JoinHandle<()>> = {
            let mut guard = self.workers.lock().unwrap_or_else(|p| p.into_inner());
            guard.drain(..).collect()
        };
        for handle in handles {
            if let Err(err) = handle.await {
                tracing::warn!(error = %err, "background worker panicked");
            }
        }

        self.classifier.close().await;

        if let Err(err) = self.store.flush() {
            tracing::warn!(error = %err, "store flush failed");
        }
        tracing::info!("memory engine closed");
    }
}

fn passes_filters(memory: &Memory, opts: &SearchOptions) -> bool {
    if let Some(after) = opts.after {
        if memory.created_at < after {
            return false;
        }
    }
    if let Some(before) = opts.before {
        if memory.created_at > before {
            return false;
        }
    }
    if !opts.session_id.is_empty() && memory.session_id != opts.session_id {
        return false;
    }
    if !opts.sectors.is_empty() && !opts.sectors.contains(&memory.sector) {
        return false;
    }
    true
}

/// Summarize both sides of an exchange: "user message → assistant response",
/// budgeted roughly 60/40 in the user's favor since recall keys off what the
/// user said.
fn build_conversation_summary(user_message: &str, assistant_message: &str, max_len: usize) -> String {
    let user_budget = max_len * 60 / 100;
    let assistant_budget = max_len.saturating_sub(user_budget).saturating_sub(5);

    let user_part = truncate_at_word(user_message, user_budget);
    let assistant_part = truncate_at_word(assistant_message, assistant_budget);

    format!("{user_part} → {assistant_part}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn summary_splits_budget_between_speakers() {
        let user = "a".repeat(300);
        let assistant = "b".repeat(300);
        let summary = build_conversation_summary(&user, &assistant, 200);
        assert!(summary.contains(" → "));
        // 60% of 200 for the user side plus the ellipsis.
        assert!(summary.starts_with(&"a".repeat(120)));
        assert!(summary.len() <= 215);
    }

    #[test]
    fn summary_keeps_short_messages_intact() {
        let summary = build_conversation_summary("hi", "hello there", 200);
        assert_eq!(summary, "hi → hello there");
    }

    #[test]
    fn filters_respect_session_and_sector() {
        let memory = Memory {
            id: 1,
            content: "x".into(),
            sector: Sector::Episodic,
            salience: 0.5,
            decay_score: 0.5,
            last_accessed_at: Utc::now(),
            access_count: 0,
            created_at: Utc::now(),
            summary: String::new(),
            user_id: "u".into(),
            session_id: "s1".into(),
            parent_id: 0,
        };

        let mut opts = SearchOptions::default();
        assert!(passes_filters(&memory, &opts));

        opts.session_id = "s2".into();
        assert!(!passes_filters(&memory, &opts));

        opts.session_id = "s1".into();
        opts.sectors = vec![Sector::Semantic];
        assert!(!passes_filters(&memory, &opts));

        opts.sectors = vec![Sector::Semantic, Sector::Episodic];
        assert!(passes_filters(&memory, &opts));
    }

    #[test]
    fn filters_respect_time_window() {
        let memory = Memory {
            id: 1,
            content: "x".into(),
            sector: Sector::Semantic,
            salience: 0.5,
            decay_score: 0.5,
            last_accessed_at: Utc::now(),
            access_count: 0,
            created_at: Utc::now() - chrono::Duration::days(10),
            summary: String::new(),
            user_id: "u".into(),
            session_id: String::new(),
            parent_id: 0,
        };

        let mut opts = SearchOptions::default();
        opts.after = Some(Utc::now() - chrono::Duration::days(30));
        assert!(passes_filters(&memory, &opts));

        opts.after = Some(Utc::now() - chrono::Duration::days(5));
        assert!(!passes_filters(&memory, &opts));

        opts.after = None;
        opts.before = Some(Utc::now() - chrono::Duration::days(15));
        assert!(!passes_filters(&memory, &opts));
    }
}
