//! Benchmark utilities.

#![warn(missing_docs)]

use fractal_cache::{EntityId, Interval};
use rand::Rng;

/// `count` random slices inside `[0, span)`, each at most `max_len` long.
pub fn random_intervals(count: usize, span: usize, max_len: usize) -> Vec<Interval> {
    let mut rng = rand::thread_rng();
    (0..count)
        .map(|_| {
            let start = rng.gen_range(0..span.max(1));
            let len = rng.gen_range(1..=max_len.max(1));
            Interval::new(start, start + len - 1)
        })
        .collect()
}

/// `count` sequential ids with the given prefix.
pub fn generate_ids(prefix: &str, count: usize) -> Vec<EntityId> {
    (0..count)
        .map(|i| EntityId::new(format!("{prefix}{i}")))
        .collect()
}
