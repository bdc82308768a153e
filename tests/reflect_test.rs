//! Reflective synthesis through the engine: gating, persistence, and
//! embedding-based deduplication.

mod helpers;

use std::sync::atomic::Ordering;
use std::sync::Arc;

use helpers::*;
use mnemos::{AddOptions, Entity, Providers, ReflectOptions, Reflection, Sector};

fn observation(content: &str, salience: f64) -> Reflection {
    Reflection {
        content: content.to_string(),
        salience,
        entities: vec![Entity {
            text: "jazz".to_string(),
            entity_type: "topic".to_string(),
        }],
    }
}

async fn seed_memories(engine: &mnemos::MemoryEngine, user_id: &str, count: usize) {
    for i in 0..count {
        engine
            .add_with_options(AddOptions {
                user_id: user_id.into(),
                user_message: format!("they mentioned jazz again, visit {i}"),
                assistant_message: "spinning a record".into(),
                sector_hint: Some(Sector::Episodic),
                ..Default::default()
            })
            .await
            .unwrap();
    }
}

#[tokio::test]
async fn reflect_without_provider_is_a_configuration_error() {
    let (engine, _store) = engine_with(Providers {
        embedder: Some(Arc::new(StubEmbedder::new())),
        ..Default::default()
    });

    let err = engine
        .reflect(ReflectOptions {
            user_id: "u".into(),
            ..Default::default()
        })
        .await
        .unwrap_err();
    assert!(err.to_string().contains("no reflection provider"));

    engine.close().await;
}

#[tokio::test]
async fn too_few_memories_returns_empty_without_calling_provider() {
    let reflector = Arc::new(StubReflector::new(vec![observation("should not appear", 0.8)]));
    let (engine, store) = engine_with(Providers {
        embedder: Some(Arc::new(StubEmbedder::new())),
        reflection_provider: Some(reflector.clone()),
        ..Default::default()
    });

    seed_memories(&engine, "u", 2).await;

    let stored = engine
        .reflect(ReflectOptions {
            user_id: "u".into(),
            min_memories: 5,
            ..Default::default()
        })
        .await
        .unwrap();
    assert!(stored.is_empty());
    assert_eq!(reflector.calls.load(Ordering::SeqCst), 0);
    assert_eq!(store.get_recent_memories("u", 50, &[Sector::Reflective]).unwrap().len(), 0);

    engine.close().await;
}

#[tokio::test]
async fn reflections_do_not_feed_back_into_reflection() {
    let reflector = Arc::new(StubReflector::new(vec![observation("meta", 0.8)]));
    let (engine, store) = engine_with(Providers {
        embedder: Some(Arc::new(StubEmbedder::new())),
        reflection_provider: Some(reflector.clone()),
        ..Default::default()
    });

    // Five memories, but all already reflective.
    for i in 0..5 {
        engine
            .add_with_options(AddOptions {
                user_id: "u".into(),
                user_message: format!("observation {i}"),
                assistant_message: "".into(),
                sector_hint: Some(Sector::Reflective),
                ..Default::default()
            })
            .await
            .unwrap();
    }
    assert_eq!(store.get_recent_memories("u", 50, &[]).unwrap().len(), 5);

    let stored = engine
        .reflect(ReflectOptions {
            user_id: "u".into(),
            ..Default::default()
        })
        .await
        .unwrap();
    assert!(stored.is_empty());
    assert_eq!(reflector.calls.load(Ordering::SeqCst), 0);

    engine.close().await;
}

#[tokio::test]
async fn reflections_persist_as_high_salience_reflective_memories() {
    let reflector = Arc::new(StubReflector::new(vec![
        observation("they play jazz when the bar is empty", 0.0),
        observation("they open up after midnight", 1.5),
    ]));
    let (engine, store) = engine_with(Providers {
        embedder: Some(Arc::new(StubEmbedder::new())),
        reflection_provider: Some(reflector.clone()),
        ..Default::default()
    });

    seed_memories(&engine, "u", 5).await;

    let stored = engine
        .reflect(ReflectOptions {
            user_id: "u".into(),
            character_context: "a wry bartender".into(),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(stored.len(), 2);
    assert!(stored.iter().all(|m| m.id > 0));
    assert!(stored.iter().all(|m| m.sector == Sector::Reflective));

    // Salience is clamped into [0.7, 1.0].
    let reflective = store.get_memories_with_vectors("u").unwrap();
    let reflective: Vec<_> = reflective
        .iter()
        .filter(|m| m.memory.sector == Sector::Reflective)
        .collect();
    assert_eq!(reflective.len(), 2);
    for m in &reflective {
        assert!(m.memory.salience >= 0.7 && m.memory.salience <= 1.0);
        assert!(m.vector.is_some());
        assert!(!m.memory.summary.is_empty());
        // The reflection's entities became waypoint associations.
        assert!(!store.get_associated_waypoint_ids(m.memory.id).unwrap().is_empty());
    }

    engine.close().await;
}

/// With an embedder that maps every text to the same vector, any candidate
/// duplicates the existing reflection and must be dropped.
#[tokio::test]
async fn near_duplicate_reflections_are_dropped() {
    let reflector = Arc::new(StubReflector::new(vec![observation("X", 0.8)]));
    let (engine, store) = engine_with(Providers {
        embedder: Some(Arc::new(ConstEmbedder(spike(1)))),
        reflection_provider: Some(reflector.clone()),
        ..Default::default()
    });

    seed_memories(&engine, "u", 5).await;

    // First pass stores "X" (no prior reflections to collide with).
    let first = engine
        .reflect(ReflectOptions {
            user_id: "u".into(),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(first.len(), 1);

    // Second pass proposes "X" again; similarity 1.0 > 0.85 drops it.
    let second = engine
        .reflect(ReflectOptions {
            user_id: "u".into(),
            ..Default::default()
        })
        .await
        .unwrap();
    assert!(second.is_empty());

    let reflective_count = store
        .get_memories_with_vectors("u")
        .unwrap()
        .iter()
        .filter(|m| m.memory.sector == Sector::Reflective)
        .count();
    assert_eq!(reflective_count, 1);

    engine.close().await;
}

#[tokio::test]
async fn embedding_failure_keeps_reflection_without_vector() {
    let reflector = Arc::new(StubReflector::new(vec![observation("vectorless insight", 0.8)]));
    let (engine, store) = engine_with(Providers {
        embedder: Some(Arc::new(FailingEmbedder)),
        reflection_provider: Some(reflector.clone()),
        ..Default::default()
    });

    seed_memories(&engine, "u", 5).await;

    let stored = engine
        .reflect(ReflectOptions {
            user_id: "u".into(),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(stored.len(), 1);

    let reflective: Vec<_> = store
        .get_memories_with_vectors("u")
        .unwrap()
        .into_iter()
        .filter(|m| m.memory.sector == Sector::Reflective)
        .collect();
    assert_eq!(reflective.len(), 1);
    assert!(reflective[0].vector.is_none());

    engine.close().await;
}
