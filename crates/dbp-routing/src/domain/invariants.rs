//! # Domain Invariants
//!
//! Shard arithmetic shared by resolution, key reforming and key
//! enumeration. Resolution and reforming must agree, so both go through
//! these functions.

use super::value_objects::IndexType;

/// Hash shard index: `0` for a single table, else `|key| mod count`.
pub fn hash_shard_index(key: i64, count: i64) -> i64 {
    if count <= 1 {
        return 0;
    }
    key.unsigned_abs().rem_euclid(count as u64) as i64
}

/// Range slot index, `0` when the table is not split.
pub fn range_slot_index(key: i64, span: i64) -> i64 {
    if span == 0 {
        0
    } else {
        key / span
    }
}

/// Secondary bucket of `key` inside its slot.
pub fn secondary_bucket(key: i64, slot_index: i64, span: i64, secondary_span: i64) -> i64 {
    (key - slot_index * span) / secondary_span
}

/// Number of secondary buckets in one slot, rounded up.
pub fn secondary_bucket_count(span: i64, secondary_span: i64) -> i64 {
    if secondary_span <= 0 || span <= 0 {
        return 0;
    }
    (span - 1) / secondary_span + 1
}

/// Side of a paired slot that serves `key`.
pub fn parity_side(key: i64) -> IndexType {
    if key & 1 != 0 {
        IndexType::Odd
    } else {
        IndexType::Even
    }
}

/// Keep the parity of `original` when it was remapped into a paired slot.
pub fn preserve_parity(original: i64, canonical: i64, paired: bool) -> i64 {
    if paired && ((original ^ canonical) & 0x1) != 0 {
        canonical + 1
    } else {
        canonical
    }
}

/// Invariant: a key and its canonical key land in the same hash shard.
pub fn invariant_hash_canonical(key: i64, count: i64) -> bool {
    let canonical = hash_shard_index(key, count);
    hash_shard_index(canonical, count) == canonical
}

/// Invariant: admission leaves room for one more task.
pub fn invariant_admission(queued: usize, limit: usize) -> bool {
    queued < limit
}
