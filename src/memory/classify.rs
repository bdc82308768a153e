//! Sector classification — a zero-cost keyword heuristic, with optional LLM
//! refinement that never blocks the write path.
//!
//! [`HeuristicClassifier`] scores content against per-sector signal lists.
//! [`AsyncReclassifier`] wraps it with a bounded background queue: `classify`
//! stays synchronous and returns the heuristic verdict immediately, while a
//! single consumer later asks the remote LLM and corrects the stored sector
//! when the two disagree.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::memory::store::Store;
use crate::memory::types::{Sector, ALL_SECTORS};
use crate::providers::{RemoteSectorClassifier, SectorClassifier};

/// Heuristic confidence below which the fallback provider is consulted.
const FALLBACK_CONFIDENCE: f64 = 0.6;

/// Score added per contained signal word.
const SIGNAL_SCORE: f64 = 0.3;

/// Max pending reclassification requests; overflow is silently dropped.
pub const RECLASS_QUEUE_CAPACITY: usize = 64;

/// Pause between consecutive remote calls, bounding outbound request rate.
const RECLASS_DELAY: Duration = Duration::from_millis(200);

const EPISODIC_SIGNALS: &[&str] = &[
    "last time", "remember when", "yesterday", "came in", "visited",
    "was here", "stopped by", "showed up", "dropped by", "earlier",
    "that time", "the other day", "first time", "came back", "returned",
];

const SEMANTIC_SIGNALS: &[&str] = &[
    "likes", "prefers", "is a", "works at", "always", "favorite",
    "usually", "enjoys", "listens to", "fan of", "into", "plays",
    "from", "lives in", "speaks", "knows about",
];

const PROCEDURAL_SIGNALS: &[&str] = &[
    "how to", "can do", "knows how", "skill", "technique",
    "method", "approach", "process", "step", "instruction",
];

const EMOTIONAL_SIGNALS: &[&str] = &[
    "feel", "love", "hate", "happy", "sad", "enjoy", "afraid",
    "angry", "excited", "nervous", "comfortable", "miss", "appreciate",
    "friendly", "rude", "kind", "warm", "cold", "annoyed", "grateful",
    "sweet", "nice", "mean", "fun", "boring",
];

const REFLECTIVE_SIGNALS: &[&str] = &[
    "pattern", "notice that", "tend to", "seem to", "often",
    "every time", "consistently", "in general", "overall",
    "reflects", "suggests", "implies", "correlat",
];

fn signals_for(sector: Sector) -> &'static [&'static str] {
    match sector {
        Sector::Episodic => EPISODIC_SIGNALS,
        Sector::Semantic => SEMANTIC_SIGNALS,
        Sector::Procedural => PROCEDURAL_SIGNALS,
        Sector::Emotional => EMOTIONAL_SIGNALS,
        Sector::Reflective => REFLECTIVE_SIGNALS,
    }
}

/// Keyword-scoring sector classifier with an optional async LLM fallback for
/// ambiguous content.
pub struct HeuristicClassifier {
    fallback: Option<Arc<dyn RemoteSectorClassifier>>,
}

impl HeuristicClassifier {
    /// A pure heuristic classifier — no fallback, no I/O, ever.
    pub fn new() -> Self {
        Self { fallback: None }
    }

    /// A classifier that consults `fallback` when heuristic confidence is
    /// below 0.6.
    pub fn with_fallback(fallback: Arc<dyn RemoteSectorClassifier>) -> Self {
        Self { fallback: Some(fallback) }
    }

    /// Score content against the signal lists. Returns the best sector and a
    /// confidence in `[0.0, 1.0]`. Ties break on the canonical sector order;
    /// no signal at all defaults to `semantic`.
    pub fn heuristic_classify(&self, content: &str) -> (Sector, f64) {
        let lower = content.to_lowercase();

        let mut best = Sector::Semantic;
        let mut best_score = 0.0;
        for sector in ALL_SECTORS {
            let score = signals_for(sector)
                .iter()
                .filter(|signal| lower.contains(*signal))
                .count() as f64
                * SIGNAL_SCORE;
            if score > best_score {
                best_score = score;
                best = sector;
            }
        }

        (best, best_score.min(1.0))
    }

    /// Classify with the fallback provider consulted on low confidence.
    /// Provider failures keep the heuristic verdict.
    pub async fn classify_with_fallback(&self, content: &str) -> Sector {
        let (sector, confidence) = self.heuristic_classify(content);
        if confidence >= FALLBACK_CONFIDENCE {
            return sector;
        }

        if let Some(fallback) = &self.fallback {
            match fallback.classify_sector(content).await {
                Ok(verdict) => return verdict,
                Err(err) => {
                    tracing::warn!(error = %err, "classifier fallback failed, keeping heuristic");
                }
            }
        }

        sector
    }
}

impl Default for HeuristicClassifier {
    fn default() -> Self {
        Self::new()
    }
}

impl SectorClassifier for HeuristicClassifier {
    fn classify(&self, content: &str) -> Sector {
        self.heuristic_classify(content).0
    }
}

struct ReclassRequest {
    memory_id: i64,
    content: String,
}

/// Composes the heuristic with a background LLM reclassification queue.
///
/// `classify` is synchronous and returns the heuristic verdict immediately.
/// [`submit_for_reclassification`](Self::submit_for_reclassification) is
/// non-blocking; a full queue drops the request and the heuristic sector
/// stands. Closing drains the queue before the consumer exits.
pub struct AsyncReclassifier {
    heuristic: HeuristicClassifier,
    tx: Mutex<Option<mpsc::Sender<ReclassRequest>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl AsyncReclassifier {
    /// Spawn the consumer task. Must be called from within a Tokio runtime.
    pub fn new(remote: Arc<dyn RemoteSectorClassifier>, store: Arc<Store>) -> Self {
        let (tx, rx) = mpsc::channel(RECLASS_QUEUE_CAPACITY);
        let worker = tokio::spawn(run_consumer(rx, remote, store));
        Self {
            heuristic: HeuristicClassifier::new(),
            tx: Mutex::new(Some(tx)),
            worker: Mutex::new(Some(worker)),
        }
    }

    /// The heuristic verdict, with zero added latency.
    pub fn classify(&self, content: &str) -> Sector {
        self.heuristic.heuristic_classify(content).0
    }

    /// Queue a stored memory for LLM reclassification. Never blocks: a full
    /// queue or a closed classifier ignores the request.
    pub fn submit_for_reclassification(&self, memory_id: i64, content: &str) {
        let guard = self.tx.lock().unwrap_or_else(|p| p.into_inner());
        let Some(tx) = guard.as_ref() else {
            return;
        };
        match tx.try_send(ReclassRequest {
            memory_id,
            content: content.to_string(),
        }) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(_)) => {
                tracing::debug!(memory_id, "reclassification queue full, dropping request");
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {}
        }
    }

    /// Close the queue and wait for the consumer to drain remaining items.
    /// Submissions after close are ignored.
    pub async fn close(&self) {
        let tx = self.tx.lock().unwrap_or_else(|p| p.into_inner()).take();
        drop(tx);

        let worker = self.worker.lock().unwrap_or_else(|p| p.into_inner()).take();
        if let Some(handle) = worker {
            if let Err(err) = handle.await {
                tracing::warn!(error = %err, "reclassification consumer panicked");
            }
        }
    }
}

/// Single consumer: drains the queue, asks the remote classifier, and fixes
/// the stored sector (memory row and vector row) when the verdict differs
/// from the heuristic for the same text.
async fn run_consumer(
    mut rx: mpsc::Receiver<ReclassRequest>,
    remote: Arc<dyn RemoteSectorClassifier>,
    store: Arc<Store>,
) {
    let heuristic = HeuristicClassifier::new();

    while let Some(req) = rx.recv().await {
        match remote.classify_sector(&req.content).await {
            Ok(verdict) => {
                let (heuristic_sector, _) = heuristic.heuristic_classify(&req.content);
                if verdict != heuristic_sector {
                    match store.update_memory_sector(req.memory_id, verdict) {
                        Ok(()) => tracing::info!(
                            memory_id = req.memory_id,
                            from = %heuristic_sector,
                            to = %verdict,
                            "reclassified memory"
                        ),
                        Err(err) => tracing::warn!(
                            memory_id = req.memory_id,
                            error = %err,
                            "sector update failed"
                        ),
                    }
                }
            }
            Err(err) => {
                tracing::warn!(memory_id = req.memory_id, error = %err, "LLM reclassification failed");
            }
        }
        tokio::time::sleep(RECLASS_DELAY).await;
    }
}

/// The classifier the engine actually runs — either the pure heuristic, the
/// async-reclassifying wrapper, or a caller-injected implementation.
pub(crate) enum EngineClassifier {
    Heuristic(HeuristicClassifier),
    AsyncLlm(AsyncReclassifier),
    External(Arc<dyn SectorClassifier>),
}

impl EngineClassifier {
    pub(crate) async fn classify(&self, content: &str) -> Sector {
        match self {
            Self::Heuristic(h) => h.classify_with_fallback(content).await,
            Self::AsyncLlm(a) => a.classify(content),
            Self::External(c) => c.classify(content),
        }
    }

    pub(crate) fn submit_for_reclassification(&self, memory_id: i64, content: &str) {
        if let Self::AsyncLlm(a) = self {
            a.submit_for_reclassification(memory_id, content);
        }
    }

    pub(crate) async fn close(&self) {
        if let Self::AsyncLlm(a) = self {
            a.close().await;
        }
    }
}
