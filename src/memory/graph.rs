//! Entity extraction and one-hop associative expansion.
//!
//! Entities anchor memories in the waypoint graph: `[BracketedNames]` become
//! people, quoted strings and capitalized phrases become topics, and a
//! caller-supplied list of known entities (a character's domain knowledge)
//! matches by case-insensitive substring.

use regex::Regex;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use crate::memory::store::Store;
use crate::memory::types::Entity;
use crate::providers::EntityExtractor;

/// Link weight given to any memory reached through one waypoint hop.
/// Multiple shared waypoints do not stack — the weight is a max, not a sum.
const HOP_LINK_WEIGHT: f64 = 0.8;

/// Maximum number of capitalized-phrase matches taken from one text.
const MAX_PROPER_NOUN_MATCHES: usize = 5;

/// Sentence openers and pronoun phrases that the capitalized-phrase rule
/// would otherwise misread as entities.
const STOPLIST: [&str; 12] = [
    "The", "This", "That", "What", "When", "Where", "How", "Why",
    "I Am", "You Are", "We Are", "They Are",
];

/// A known entity the extractor should always recognize, with its type.
#[derive(Debug, Clone)]
pub struct KnownEntity {
    pub text: String,
    pub entity_type: String,
}

/// Heuristic entity extractor covering bracketed speaker names, quoted
/// strings, known entities, and capitalized multi-word phrases.
pub struct DefaultEntityExtractor {
    bracket_re: Regex,
    quote_re: Regex,
    proper_re: Regex,
    known: Vec<KnownEntity>,
}

impl DefaultEntityExtractor {
    pub fn new() -> Self {
        Self::with_known_entities(Vec::new())
    }

    /// Build an extractor that additionally recognizes the given entities by
    /// case-insensitive substring match, tagging them with their own types.
    pub fn with_known_entities(known: Vec<KnownEntity>) -> Self {
        Self {
            bracket_re: Regex::new(r"\[([A-Za-z0-9_]+)\]").expect("static regex"),
            quote_re: Regex::new(r#""([^"]{2,40})""#).expect("static regex"),
            proper_re: Regex::new(r"(?:^|[.!?]\s+|\s)([A-Z][a-z]+(?:\s+[A-Z][a-z]+)+)")
                .expect("static regex"),
            known,
        }
    }
}

impl Default for DefaultEntityExtractor {
    fn default() -> Self {
        Self::new()
    }
}

impl EntityExtractor for DefaultEntityExtractor {
    fn extract(&self, content: &str) -> Vec<Entity> {
        let mut entities: Vec<Entity> = Vec::new();
        let mut seen: HashSet<String> = HashSet::new();

        let mut add = |text: &str, entity_type: &str, entities: &mut Vec<Entity>| {
            let text = text.trim();
            let lower = text.to_lowercase();
            if text.len() < 2 || text.len() > 60 || seen.contains(&lower) {
                return;
            }
            seen.insert(lower);
            entities.push(Entity {
                text: text.to_string(),
                entity_type: entity_type.to_string(),
            });
        };

        // 1. Speaker names in brackets: [PlayerName]: message
        for caps in self.bracket_re.captures_iter(content) {
            add(&caps[1], "person", &mut entities);
        }

        // 2. Quoted strings (song names, topics, verbatim requests)
        for caps in self.quote_re.captures_iter(content) {
            add(&caps[1], "topic", &mut entities);
        }

        // 3. Known entities by substring
        let lower_content = content.to_lowercase();
        for ke in &self.known {
            if lower_content.contains(&ke.text.to_lowercase()) {
                add(&ke.text, &ke.entity_type, &mut entities);
            }
        }

        // 4. Capitalized multi-word phrases ("Nebula Fizz", "Harajuku Station")
        for caps in self
            .proper_re
            .captures_iter(content)
            .take(MAX_PROPER_NOUN_MATCHES)
        {
            let text = caps[1].trim();
            if !is_stoplisted(text) {
                add(text, "topic", &mut entities);
            }
        }

        entities
    }
}

fn is_stoplisted(s: &str) -> bool {
    STOPLIST.iter().any(|c| c.eq_ignore_ascii_case(s))
}

/// One-hop graph expansion: for each seed memory, follow its waypoints to
/// other memories of the same user and assign each a constant link weight.
///
/// Seeds themselves are excluded. A memory reachable through several
/// waypoints still gets [`HOP_LINK_WEIGHT`], not a sum.
pub fn expand_via_waypoints(
    store: &Arc<Store>,
    seed_ids: &[i64],
    user_id: &str,
) -> HashMap<i64, f64> {
    let mut link_weights: HashMap<i64, f64> = HashMap::new();
    let exclude: HashSet<i64> = seed_ids.iter().copied().collect();

    for &seed in seed_ids {
        let waypoint_ids = match store.get_associated_waypoint_ids(seed) {
            Ok(ids) => ids,
            Err(err) => {
                tracing::warn!(memory_id = seed, error = %err, "waypoint lookup failed");
                continue;
            }
        };

        for wp_id in waypoint_ids {
            let linked = match store.get_memories_by_waypoint(wp_id, user_id, &exclude) {
                Ok(rows) => rows,
                Err(err) => {
                    tracing::warn!(waypoint_id = wp_id, error = %err, "waypoint expansion failed");
                    continue;
                }
            };
            for lm in linked {
                let entry = link_weights.entry(lm.memory.id).or_insert(0.0);
                if HOP_LINK_WEIGHT > *entry {
                    *entry = HOP_LINK_WEIGHT;
                }
            }
        }
    }

    link_weights
}
