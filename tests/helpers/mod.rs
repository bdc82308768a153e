#![allow(dead_code)]

use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::{bail, Result};
use async_trait::async_trait;
use mnemos::providers::{Embedder, ReflectionProvider, RemoteSectorClassifier, TaskHint};
use mnemos::{EngineConfig, Memory, MemoryEngine, Providers, Reflection, Sector, Store};

/// Embedding width used throughout the tests — small and fast.
pub const DIM: usize = 8;

/// Unit vector with a single spike. Distinct positions are orthogonal.
pub fn spike(at: usize) -> Vec<f32> {
    let mut v = vec![0.0f32; DIM];
    v[at % DIM] = 1.0;
    v
}

/// The content string the engine builds for an exchange; register this with
/// [`StubEmbedder::map`] to control a stored memory's vector.
pub fn exchange_content(user: &str, assistant: &str) -> String {
    format!("{user} | {assistant}")
}

/// Deterministic embedder: explicit per-text vectors with a hashed-spike
/// fallback, so unmapped texts still embed consistently.
pub struct StubEmbedder {
    overrides: Mutex<HashMap<String, Vec<f32>>>,
}

impl StubEmbedder {
    pub fn new() -> Self {
        Self {
            overrides: Mutex::new(HashMap::new()),
        }
    }

    pub fn map(self, text: &str, vector: Vec<f32>) -> Self {
        self.overrides
            .lock()
            .unwrap()
            .insert(text.to_string(), vector);
        self
    }
}

#[async_trait]
impl Embedder for StubEmbedder {
    async fn embed(&self, text: &str, _task: TaskHint) -> Result<Vec<f32>> {
        if let Some(v) = self.overrides.lock().unwrap().get(text) {
            return Ok(v.clone());
        }
        let mut hasher = std::collections::hash_map::DefaultHasher::new();
        text.hash(&mut hasher);
        Ok(spike(hasher.finish() as usize))
    }

    fn dimension(&self) -> usize {
        DIM
    }
}

/// Returns the same vector for every input — every text is a duplicate of
/// every other.
pub struct ConstEmbedder(pub Vec<f32>);

#[async_trait]
impl Embedder for ConstEmbedder {
    async fn embed(&self, _text: &str, _task: TaskHint) -> Result<Vec<f32>> {
        Ok(self.0.clone())
    }

    fn dimension(&self) -> usize {
        DIM
    }
}

/// Always fails, for degraded-path tests.
pub struct FailingEmbedder;

#[async_trait]
impl Embedder for FailingEmbedder {
    async fn embed(&self, _text: &str, _task: TaskHint) -> Result<Vec<f32>> {
        bail!("stub embedder offline")
    }

    fn dimension(&self) -> usize {
        DIM
    }
}

/// Remote classifier with a fixed verdict, counting invocations.
pub struct StubRemoteClassifier {
    pub verdict: Sector,
    pub calls: AtomicUsize,
}

impl StubRemoteClassifier {
    pub fn new(verdict: Sector) -> Self {
        Self {
            verdict,
            calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl RemoteSectorClassifier for StubRemoteClassifier {
    async fn classify_sector(&self, _content: &str) -> Result<Sector> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.verdict)
    }
}

/// Reflection provider emitting a fixed list, counting invocations.
pub struct StubReflector {
    pub reflections: Vec<Reflection>,
    pub calls: AtomicUsize,
}

impl StubReflector {
    pub fn new(reflections: Vec<Reflection>) -> Self {
        Self {
            reflections,
            calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl ReflectionProvider for StubReflector {
    async fn reflect(
        &self,
        _memories: &[Memory],
        _character_context: &str,
    ) -> Result<Vec<Reflection>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.reflections.clone())
    }
}

/// An engine over a fresh in-memory store, returning the store too so tests
/// can inspect persisted state through its public API.
pub fn engine_with(providers: Providers) -> (MemoryEngine, Arc<Store>) {
    let store = Arc::new(Store::open_in_memory().unwrap());
    let mut config = EngineConfig::default();
    config.embedding.dimension = DIM;
    let engine = MemoryEngine::with_store(config, providers, store.clone()).unwrap();
    (engine, store)
}

/// Same, but with a caller-tweaked config.
pub fn engine_with_config(
    mut config: EngineConfig,
    providers: Providers,
) -> (MemoryEngine, Arc<Store>) {
    config.embedding.dimension = DIM;
    let store = Arc::new(Store::open_in_memory().unwrap());
    let engine = MemoryEngine::with_store(config, providers, store.clone()).unwrap();
    (engine, store)
}
