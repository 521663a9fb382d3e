//! Redis Cluster slot calculation.
//!
//! Redis Cluster uses CRC16 to map keys to slots (0-16383).
//! This module provides utilities for calculating slot numbers from keys.

use crc::{Crc, CRC_16_XMODEM};

use crate::error::{CommitError, Error, Result};

/// Number of hash slots in Redis Cluster.
pub const SLOT_COUNT: u16 = 16384;

/// CRC-16/XMODEM algorithm used by Redis.
const CRC16: Crc<u16> = Crc::<u16>::new(&CRC_16_XMODEM);

/// Calculates the Redis Cluster slot for a given key.
///
/// Redis uses CRC16 modulo 16384 for slot calculation.
/// If the key contains `{...}`, only the content inside the braces
/// is used for hashing (hash tags).
///
/// # Examples
///
/// ```
/// use slotmux::key_slot;
///
/// assert_eq!(key_slot("foo"), key_slot("foo"));
/// assert_eq!(key_slot("{user1000}.following"), key_slot("{user1000}.followers"));
/// assert_ne!(key_slot("user1000"), key_slot("user2000"));
/// ```
pub fn key_slot(key: impl AsRef<[u8]>) -> u16 {
    let hash_key = extract_hash_tag(key.as_ref());
    CRC16.checksum(hash_key) % SLOT_COUNT
}

/// Returns the slot shared by all `keys`.
///
/// # Errors
///
/// Returns an error if `keys` is empty or the keys span several slots.
///
/// # Examples
///
/// ```
/// use slotmux::cluster::same_slot;
///
/// assert!(same_slot(&["{user1000}.following", "{user1000}.followers"]).is_ok());
/// assert!(same_slot(&["foo", "bar"]).is_err());
/// ```
pub fn same_slot<K: AsRef<[u8]>>(keys: &[K]) -> Result<u16> {
    let mut slots = keys.iter().map(|key| key_slot(key));
    let first = slots.next().ok_or_else(|| Error::InvalidArgument {
        message: "no keys provided".to_string(),
    })?;
    match slots.find(|&slot| slot != first) {
        Some(conflicting) => Err(CommitError::CrossSlot { first, conflicting }.into()),
        None => Ok(first),
    }
}

/// Extracts the hash tag from a key.
///
/// - `{user1000}.following` → `user1000`
/// - `foo{bar}baz` → `bar`
/// - `foo{}{bar}` → empty first tag, whole key is used
/// - `foo{bar` → unterminated, whole key is used
fn extract_hash_tag(key: &[u8]) -> &[u8] {
    if let Some(start) = key.iter().position(|&b| b == b'{') {
        let tag_start = start + 1;
        if let Some(len) = key[tag_start..].iter().position(|&b| b == b'}') {
            if len > 0 {
                return &key[tag_start..tag_start + len];
            }
        }
    }

    key
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_same_slot() {
        assert_eq!(same_slot(&["{user}:1", "{user}:2"]).unwrap(), key_slot("user"));
        assert!(matches!(
            same_slot(&["foo", "bar"]),
            Err(Error::Commit(CommitError::CrossSlot {
                first: 12182,
                conflicting: 5061
            }))
        ));
        let empty: [&str; 0] = [];
        assert!(matches!(same_slot(&empty), Err(Error::InvalidArgument { .. })));
    }

    #[test]
    fn test_slot_count() {
        assert_eq!(SLOT_COUNT, 16384);
    }

    #[test]
    fn test_crc16_check_value() {
        // Standard XMODEM check value.
        assert_eq!(CRC16.checksum(b"123456789"), 0x31C3);
    }

    #[test]
    fn test_key_slot_known_values() {
        // Values reported by CLUSTER KEYSLOT.
        assert_eq!(key_slot("foo"), 12182);
        assert_eq!(key_slot("123456789"), 12739);
    }

    #[test]
    fn test_key_slot_deterministic() {
        let slot1 = key_slot("mykey");
        let slot2 = key_slot("mykey");
        assert_eq!(slot1, slot2);
        assert!(slot1 < SLOT_COUNT);
    }

    #[test]
    fn test_key_slot_with_hash_tag() {
        let slot = key_slot("123456789");
        assert_eq!(key_slot("{123456789}test"), slot);
        assert_eq!(key_slot("test{123456789}"), slot);
        assert_eq!(key_slot("test{123456789}test{abc}"), slot);
        assert_ne!(key_slot("{}123456789"), slot);
    }

    #[test]
    fn test_key_slot_batch_keys() {
        assert_eq!(key_slot("{foo}1"), key_slot("{foo}2"));
        assert_ne!(key_slot("foo1"), key_slot("foo2"));
    }

    #[test]
    fn test_empty_braces_hash_whole_key() {
        assert_eq!(key_slot("foo{}bar"), CRC16.checksum(b"foo{}bar") % SLOT_COUNT);
        assert_eq!(key_slot("{}"), CRC16.checksum(b"{}") % SLOT_COUNT);
    }

    #[test]
    fn test_extract_hash_tag_simple() {
        assert_eq!(extract_hash_tag(b"foo{bar}"), b"bar");
        assert_eq!(extract_hash_tag(b"{user1000}.following"), b"user1000");
        assert_eq!(extract_hash_tag(b"prefix{tag}suffix"), b"tag");
    }

    #[test]
    fn test_extract_hash_tag_first_pair_wins() {
        assert_eq!(extract_hash_tag(b"foo{bar}{baz}"), b"bar");
        assert_eq!(extract_hash_tag(b"{a}{b}{c}"), b"a");
        // Inner '{' belongs to the tag.
        assert_eq!(extract_hash_tag(b"{{bar}}"), b"{bar");
    }

    #[test]
    fn test_extract_hash_tag_empty_and_unmatched() {
        assert_eq!(extract_hash_tag(b"foo{}bar"), b"foo{}bar");
        assert_eq!(extract_hash_tag(b"foo{}{bar}"), b"foo{}{bar}");
        assert_eq!(extract_hash_tag(b"foo{bar"), b"foo{bar");
        assert_eq!(extract_hash_tag(b"foo}bar"), b"foo}bar");
        assert_eq!(extract_hash_tag(b"{"), b"{");
    }

    #[test]
    fn test_key_slot_empty_key() {
        assert_eq!(key_slot(""), 0);
    }

    #[test]
    fn test_key_slot_distribution() {
        let slots: std::collections::HashSet<u16> =
            (0..100).map(|i| key_slot(format!("key{}", i))).collect();
        assert!(slots.len() >= 50, "keys should distribute across slots");
    }
}
