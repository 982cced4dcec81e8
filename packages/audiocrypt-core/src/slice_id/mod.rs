//! Opaque slice identifier generation, unique within a session (§4.5).

use sha2::{Digest, Sha256};

/// Contract for producing slice ids. Implementations must never repeat an
/// id for distinct `(session_id, index)` pairs within the same session.
pub trait SliceIdGenerator: Send + Sync {
    fn generate(&self, session_id: &str, index: u32, total: u32) -> String;
}

/// 21-char URL-safe random id. Default: secure and collision-resistant
/// without coordination.
#[derive(Default)]
pub struct NanoidGenerator;

impl SliceIdGenerator for NanoidGenerator {
    fn generate(&self, _session_id: &str, _index: u32, _total: u32) -> String {
        nanoid::nanoid!(21)
    }
}

/// Standard UUIDv4. Useful when ids cross into systems that already
/// expect UUID-shaped identifiers.
#[derive(Default)]
pub struct UuidV4Generator;

impl SliceIdGenerator for UuidV4Generator {
    fn generate(&self, _session_id: &str, _index: u32, _total: u32) -> String {
        uuid::Uuid::new_v4().to_string()
    }
}

/// `{prefix}_{session8}_{paddedIndex}`. Predictable by construction —
/// debug use only, never in production.
pub struct SequentialGenerator {
    pub prefix: String,
}

impl SliceIdGenerator for SequentialGenerator {
    fn generate(&self, session_id: &str, index: u32, total: u32) -> String {
        let width = total.to_string().len().max(1);
        let session8: String = session_id.chars().take(8).collect();
        format!("{}_{}_{:0width$}", self.prefix, session8, index, width = width)
    }
}

/// `{base36(now)}_{session6}_{base36(index)}`. Sorts naturally by
/// creation time.
pub struct TimestampGenerator {
    now_ms: u64,
}

impl TimestampGenerator {
    /// `now_ms` is injected rather than read internally so callers control
    /// the clock source (and tests stay deterministic).
    #[must_use]
    pub fn new(now_ms: u64) -> Self {
        Self { now_ms }
    }
}

impl SliceIdGenerator for TimestampGenerator {
    fn generate(&self, session_id: &str, index: u32, _total: u32) -> String {
        let session6: String = session_id.chars().take(6).collect();
        format!(
            "{}_{}_{}",
            to_base36(u128::from(self.now_ms)),
            session6,
            to_base36(u128::from(index))
        )
    }
}

/// First 16 hex chars of SHA-256(sessionId‖index‖total). Deterministic:
/// the same `(session_id, index, total)` always yields the same id, which
/// makes it cache-friendly across reconnects.
#[derive(Default)]
pub struct HashGenerator;

impl SliceIdGenerator for HashGenerator {
    fn generate(&self, session_id: &str, index: u32, total: u32) -> String {
        let mut hasher = Sha256::new();
        hasher.update(session_id.as_bytes());
        hasher.update(index.to_be_bytes());
        hasher.update(total.to_be_bytes());
        let digest = hasher.finalize();
        digest.iter().take(8).map(|b| format!("{b:02x}")).collect()
    }
}

fn to_base36(mut value: u128) -> String {
    const DIGITS: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";
    if value == 0 {
        return "0".to_string();
    }
    let mut out = Vec::new();
    while value > 0 {
        out.push(DIGITS[(value % 36) as usize]);
        value /= 36;
    }
    out.reverse();
    String::from_utf8(out).expect("base36 alphabet is ASCII")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn nanoid_generator_produces_21_chars() {
        let gen = NanoidGenerator;
        let id = gen.generate("session", 0, 10);
        assert_eq!(id.chars().count(), 21);
    }

    #[test]
    fn nanoid_ids_are_unique_across_calls() {
        let gen = NanoidGenerator;
        let ids: HashSet<_> = (0..100).map(|i| gen.generate("s", i, 100)).collect();
        assert_eq!(ids.len(), 100);
    }

    #[test]
    fn uuid_generator_produces_valid_uuid() {
        let gen = UuidV4Generator;
        let id = gen.generate("session", 0, 10);
        assert!(uuid::Uuid::parse_str(&id).is_ok());
    }

    #[test]
    fn sequential_generator_pads_index() {
        let gen = SequentialGenerator { prefix: "slice".to_string() };
        let id = gen.generate("abcdefghij", 3, 100);
        assert_eq!(id, "slice_abcdefgh_003");
    }

    #[test]
    fn sequential_generator_truncates_session_to_8_chars() {
        let gen = SequentialGenerator { prefix: "slice".to_string() };
        let id = gen.generate("short", 1, 10);
        assert_eq!(id, "slice_short_01");
    }

    #[test]
    fn timestamp_generator_is_base36_and_ordered_parts() {
        let gen = TimestampGenerator::new(1_700_000_000_000);
        let id = gen.generate("session123", 5, 100);
        let parts: Vec<&str> = id.split('_').collect();
        assert_eq!(parts.len(), 3);
        assert_eq!(parts[1], "sessio");
        assert_eq!(parts[2], to_base36(5));
    }

    #[test]
    fn hash_generator_is_deterministic() {
        let gen = HashGenerator;
        let a = gen.generate("session-1", 4, 10);
        let b = gen.generate("session-1", 4, 10);
        assert_eq!(a, b);
        assert_eq!(a.len(), 16);
    }

    #[test]
    fn hash_generator_differs_by_index() {
        let gen = HashGenerator;
        let a = gen.generate("session-1", 4, 10);
        let b = gen.generate("session-1", 5, 10);
        assert_ne!(a, b);
    }

    #[test]
    fn base36_round_trips_known_values() {
        assert_eq!(to_base36(0), "0");
        assert_eq!(to_base36(35), "z");
        assert_eq!(to_base36(36), "10");
    }
}
