//! Stable byte encoding of cache keys for the durable tier

use std::hash::Hash;

/// A key usable by every cache topology.
///
/// The encoding must be stable across processes because it addresses
/// records in the durable tier.
pub trait CacheKey: Hash + Eq + Clone + Send + Sync + 'static {
    /// Durable-tier representation of the key
    fn encode_key(&self) -> Vec<u8>;
}

impl CacheKey for u64 {
    fn encode_key(&self) -> Vec<u8> {
        format!("id:{}", self).into_bytes()
    }
}

impl CacheKey for String {
    fn encode_key(&self) -> Vec<u8> {
        format!("title:{}", self).into_bytes()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_id_and_title_keys_never_collide() {
        assert_eq!(42u64.encode_key(), b"id:42");
        assert_eq!("42".to_string().encode_key(), b"title:42");
    }
}
