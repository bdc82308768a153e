//! Core memory engine — persistence, the entity graph, classification,
//! reflection, and the public facade.
//!
//! The write path and read path both live on [`engine::MemoryEngine`];
//! persistence contracts are on [`store::Store`]; type definitions are in
//! [`types`].

pub mod classify;
pub mod engine;
pub mod graph;
pub mod reflect;
pub mod store;
pub mod types;
pub(crate) mod workers;

/// Serialize an f32 embedding as little-endian IEEE-754 bytes, 4 per lane.
pub fn encode_vector(v: &[f32]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(v.len() * 4);
    for f in v {
        buf.extend_from_slice(&f.to_le_bytes());
    }
    buf
}

/// Decode a little-endian f32 blob. Length is implied by the blob size;
/// trailing bytes short of a full lane are ignored.
pub fn decode_vector(b: &[u8]) -> Vec<f32> {
    b.chunks_exact(4)
        .map(|chunk| f32::from_le_bytes(chunk.try_into().unwrap()))
        .collect()
}

/// Truncate to at most `max` characters, backing up to the last word
/// boundary and appending "..." when anything was cut.
pub(crate) fn truncate_at_word(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        return s.to_string();
    }
    let truncated: String = s.chars().take(max).collect();
    match truncated.rfind(' ') {
        Some(cut) if cut > 0 => format!("{}...", &truncated[..cut]),
        _ => format!("{truncated}..."),
    }
}
