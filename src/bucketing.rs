//! Deterministic bucketing.
//!
//! Sessions are mapped onto stable pseudo-random integers with a Java-style
//! string hash over UTF-16 code units, so a browser-side implementation of the
//! same hash agrees with this one for every seed.

const BUCKET_RANGE: u32 = 1 << 31;

/// Number of buckets used for allocation gating and variant draws.
pub const PERCENT_BUCKETS: u32 = 100;

/// Hash `seed` into `[0, 2^31)`. Pure and total.
pub fn bucket(seed: &str) -> u32 {
    let hash = seed
        .encode_utf16()
        .fold(0i32, |h, unit| h.wrapping_mul(31).wrapping_add(i32::from(unit)));
    // i32::MIN folds to 2^31, which the modulo maps back to 0.
    hash.unsigned_abs() % BUCKET_RANGE
}

/// Draw deciding whether a session takes part in an experiment at all.
pub fn allocation_bucket(session_id: &str, experiment_id: &str) -> u32 {
    bucket(&format!("{session_id}{experiment_id}")) % PERCENT_BUCKETS
}

/// Draw choosing the variant. Salted so it is independent of the allocation draw.
pub fn variant_bucket(session_id: &str, experiment_id: &str) -> u32 {
    bucket(&format!("{session_id}{experiment_id}variant")) % PERCENT_BUCKETS
}
