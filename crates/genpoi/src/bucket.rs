//! Splits a region set's chunk list into per-worker buckets.
//!
//! Chunks are grouped by the 32x32 region file that holds them, so one
//! worker reads a region file sequentially instead of many workers seeking
//! around the same file.

use anvil::chunk_to_region;

use crate::world::ChunkPos;

/// Resolve a requested worker count. Anything below 1 means "one per
/// available core".
pub fn resolve_workers(requested: i32) -> usize {
    if requested >= 1 {
        return requested as usize;
    }

    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

/// Bucket index for a chunk: `(floor(x/32) + floor(z/32)) mod workers`.
#[inline]
pub fn bucket_of(pos: &ChunkPos, workers: usize) -> usize {
    let region_sum = chunk_to_region(pos.x) as i64 + chunk_to_region(pos.z) as i64;
    region_sum.rem_euclid(workers as i64) as usize
}

/// Partition `chunks` into exactly `workers` buckets, preserving input order
/// inside each bucket. A single worker gets the input unchanged.
pub fn partition(chunks: Vec<ChunkPos>, workers: usize) -> Vec<Vec<ChunkPos>> {
    let workers = workers.max(1);
    if workers == 1 {
        return vec![chunks];
    }

    let mut buckets = vec![Vec::new(); workers];
    for pos in chunks {
        buckets[bucket_of(&pos, workers)].push(pos);
    }

    buckets
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::collections::HashMap;

    fn pos(x: i32, z: i32) -> ChunkPos {
        ChunkPos { x, z, mtime: 0 }
    }

    #[test]
    fn single_worker_keeps_input() {
        let chunks = vec![pos(0, 0), pos(100, -40), pos(-1, 3)];
        let buckets = partition(chunks.clone(), 1);
        assert_eq!(buckets, vec![chunks]);
    }

    #[test]
    fn uses_floor_division_for_negative_chunks() {
        // chunk -1 lives in region -1, chunk 31 in region 0
        assert_eq!(bucket_of(&pos(-1, 0), 4), 3);
        assert_eq!(bucket_of(&pos(31, 0), 4), 0);
        assert_eq!(bucket_of(&pos(32, 32), 4), 2);
    }

    #[test]
    fn always_produces_requested_bucket_count() {
        let buckets = partition(vec![pos(0, 0)], 6);
        assert_eq!(buckets.len(), 6);
        assert_eq!(buckets.iter().map(Vec::len).sum::<usize>(), 1);
    }

    #[test]
    fn resolves_worker_counts() {
        assert_eq!(resolve_workers(3), 3);
        assert!(resolve_workers(-1) >= 1);
        assert!(resolve_workers(0) >= 1);
    }

    proptest! {
        #[test]
        fn every_chunk_lands_in_exactly_one_bucket(
            coords in proptest::collection::hash_set((-2000i32..2000, -2000i32..2000), 0..300),
            workers in 1usize..12,
        ) {
            let chunks: Vec<ChunkPos> = coords.iter().map(|&(x, z)| pos(x, z)).collect();
            let buckets = partition(chunks.clone(), workers);
            prop_assert_eq!(buckets.len(), workers);

            let mut seen: HashMap<(i32, i32), usize> = HashMap::new();
            for bucket in &buckets {
                for c in bucket {
                    *seen.entry((c.x, c.z)).or_default() += 1;
                }
            }
            prop_assert_eq!(seen.len(), coords.len());
            prop_assert!(seen.values().all(|&n| n == 1));
        }

        #[test]
        fn chunks_of_one_region_share_a_bucket(
            rx in -50i32..50,
            rz in -50i32..50,
            locals in proptest::collection::vec((0i32..32, 0i32..32), 1..40),
            workers in 2usize..12,
        ) {
            let chunks: Vec<ChunkPos> = locals
                .iter()
                .map(|&(lx, lz)| pos(rx * 32 + lx, rz * 32 + lz))
                .collect();
            let buckets = partition(chunks, workers);
            let non_empty = buckets.iter().filter(|b| !b.is_empty()).count();
            prop_assert_eq!(non_empty, 1);
        }
    }
}
