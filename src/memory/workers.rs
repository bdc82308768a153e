//! Background sweepers — periodic decay and periodic reflection.
//!
//! Both are plain Tokio tasks whose only coupling to the engine is the shared
//! store and a cancellation token delivered at close. They exit promptly on
//! cancellation and never start a sweep after it fires.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::memory::reflect::{run_reflection, ReflectOptions};
use crate::memory::store::Store;
use crate::memory::types::DecayRates;
use crate::providers::{Embedder, ReflectionProvider};

/// Periodically apply exponential decay to all memories and prune dead rows,
/// edges, and orphaned waypoints.
pub(crate) fn spawn_decay_worker(
    store: Arc<Store>,
    min_score: f64,
    rates: DecayRates,
    interval: Duration,
    shutdown: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // An interval fires immediately; swallow that so the first sweep
        // lands one full period after startup.
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => return,
                _ = ticker.tick() => {
                    match store.run_decay_sweep(min_score, &rates) {
                        Ok((updated, deleted)) => {
                            if updated > 0 || deleted > 0 {
                                tracing::info!(updated, deleted, "decay sweep complete");
                            }
                        }
                        Err(err) => {
                            // The transaction rolled back; next tick retries
                            // from a clean state.
                            tracing::warn!(error = %err, "decay sweep failed");
                        }
                    }
                }
            }
        }
    })
}

/// Periodically run reflective synthesis for every user with stored
/// memories. Cancellation is checked between users so close stays prompt.
#[allow(clippy::too_many_arguments)]
pub(crate) fn spawn_reflection_worker(
    store: Arc<Store>,
    embedder: Option<Arc<dyn Embedder>>,
    reflector: Arc<dyn ReflectionProvider>,
    embedding_model: String,
    memory_window: usize,
    min_memories: usize,
    interval: Duration,
    shutdown: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => return,
                _ = ticker.tick() => {
                    run_reflection_cycle(
                        &store,
                        embedder.as_ref(),
                        &reflector,
                        &embedding_model,
                        memory_window,
                        min_memories,
                        &shutdown,
                    )
                    .await;
                }
            }
        }
    })
}

async fn run_reflection_cycle(
    store: &Arc<Store>,
    embedder: Option<&Arc<dyn Embedder>>,
    reflector: &Arc<dyn ReflectionProvider>,
    embedding_model: &str,
    memory_window: usize,
    min_memories: usize,
    shutdown: &CancellationToken,
) {
    let user_ids = match store.get_active_user_ids() {
        Ok(ids) => ids,
        Err(err) => {
            tracing::warn!(error = %err, "reflection cycle: listing users failed");
            return;
        }
    };

    for user_id in user_ids {
        if shutdown.is_cancelled() {
            return;
        }

        let opts = ReflectOptions {
            user_id: user_id.clone(),
            memory_window,
            min_memories,
            ..Default::default()
        };
        match run_reflection(store, embedder, reflector, embedding_model, opts).await {
            Ok(stored) => {
                if !stored.is_empty() {
                    tracing::info!(user_id = %user_id, count = stored.len(), "background reflection");
                }
            }
            Err(err) => {
                tracing::warn!(user_id = %user_id, error = %err, "background reflection failed");
            }
        }
    }
}
