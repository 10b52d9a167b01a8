//! Jenkins one-at-a-time hash for string shard keys.

/// Hash `key` to a non-negative shard key.
pub fn jenkins_one_at_a_time(key: &[u8]) -> i64 {
    let mut hash: u32 = 0;
    for &byte in key {
        hash = hash.wrapping_add(u32::from(byte));
        hash = hash.wrapping_add(hash << 10);
        hash ^= hash >> 6;
    }
    hash = hash.wrapping_add(hash << 3);
    hash ^= hash >> 11;
    hash = hash.wrapping_add(hash << 15);
    i64::from(hash)
}

/// Hash a string shard key.
pub fn hash_string_key(key: &str) -> i64 {
    jenkins_one_at_a_time(key.as_bytes())
}
