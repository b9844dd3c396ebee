//! Parallel entity/tile-entity extraction over a region set.

use log::{debug, info, warn};
use rayon::prelude::*;
use std::time::Instant;

use crate::bucket::{partition, resolve_workers};
use crate::error::{Error, Result};
use crate::poi::Poi;
use crate::world::{ChunkError, ChunkPos, ChunkSource, RegionSet};

/// Progress counter that reports at 100, 200, .., 1000, 2000, .., 10000,
/// 20000, .. so log volume stays bounded on very large worlds.
#[derive(Debug, Clone, Copy)]
pub struct Progress {
    count: usize,
    every: usize,
    start: Instant,
}

impl Default for Progress {
    fn default() -> Self {
        Self::new()
    }
}

impl Progress {
    pub fn new() -> Self {
        Self {
            count: 0,
            every: 100,
            start: Instant::now(),
        }
    }

    /// Count one item. Returns the running total when it should be logged.
    #[inline]
    pub fn bump(&mut self) -> Option<usize> {
        self.count += 1;
        if self.count % self.every != 0 {
            return None;
        }
        if self.count == self.every * 10 {
            self.every = self.count;
        }
        Some(self.count)
    }

    pub fn count(&self) -> usize {
        self.count
    }

    /// Items per second since creation.
    pub fn rate(&self) -> f64 {
        let elapsed = self.start.elapsed().as_secs_f64().max(1e-9);
        self.count as f64 / elapsed
    }
}

/// Merged result of scanning a region set.
#[derive(Debug, Default)]
pub struct Extraction {
    pub pois: Vec<Poi>,
    pub chunks_scanned: usize,
    pub corrupt_chunks: usize,
}

impl Extraction {
    fn merge(&mut self, other: Extraction) {
        self.pois.extend(other.pois);
        self.chunks_scanned += other.chunks_scanned;
        self.corrupt_chunks += other.corrupt_chunks;
    }
}

/// Scan every chunk of `rset` for tile entities and entities.
///
/// `workers < 1` uses every available core; one worker scans inline on the
/// calling thread. Buckets are merged in bucket order. Corrupt chunks are
/// logged and skipped; any other read failure aborts the extraction.
pub fn extract(rset: &RegionSet, workers: i32) -> Result<Extraction> {
    let chunks = rset
        .source
        .iterate_chunks()
        .map_err(|source| Error::ChunkScan {
            path: rset.world_path.clone(),
            source,
        })?;

    let workers = resolve_workers(workers);
    info!(
        "Scanning {} chunks in {} with {} worker(s)",
        chunks.len(),
        rset.describe(),
        workers
    );

    let into_error = |source: ChunkError| Error::Extraction {
        regionset: rset.describe(),
        source,
    };

    let merged = if workers == 1 {
        scan_bucket(0, rset.source.as_ref(), &chunks).map_err(into_error)?
    } else {
        let buckets = partition(chunks, workers);
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(workers)
            .thread_name(|i| format!("genpoi-worker-{i}"))
            .build()?;

        let source = rset.source.as_ref();
        let results: Vec<std::result::Result<Extraction, ChunkError>> = pool.install(|| {
            buckets
                .par_iter()
                .enumerate()
                .map(|(index, bucket)| scan_bucket(index, source, bucket))
                .collect()
        });

        let mut merged = Extraction::default();
        for result in results {
            merged.merge(result.map_err(into_error)?);
        }
        merged
    };

    info!(
        "Found {} POIs in {} chunks of {} ({} corrupt)",
        merged.pois.len(),
        merged.chunks_scanned,
        rset.describe(),
        merged.corrupt_chunks
    );

    Ok(merged)
}

fn scan_bucket(
    index: usize,
    source: &dyn ChunkSource,
    chunks: &[ChunkPos],
) -> std::result::Result<Extraction, ChunkError> {
    let mut out = Extraction::default();
    let mut progress = Progress::new();

    debug!("Bucket {index}: {} chunks", chunks.len());

    source.visit_chunks(chunks, &mut |_pos, result| {
        match result {
            Ok(records) => {
                out.pois.extend(records.tile_entities);
                out.pois.extend(records.entities);
            }
            Err(ChunkError::Corrupt { x, z, reason }) => {
                warn!("Ignoring POIs in corrupt chunk {},{}: {}", x, z, reason);
                out.corrupt_chunks += 1;
            }
            Err(ChunkError::Missing { x, z }) => {
                debug!("Chunk {},{} vanished during scan", x, z);
            }
            Err(err) => return Err(err),
        }

        out.chunks_scanned += 1;
        if let Some(n) = progress.bump() {
            info!(
                "Bucket {index}: scanned {n} chunks ({:.0} chunks/s)",
                progress.rate()
            );
        }
        Ok(())
    })?;

    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::world::{ChunkRecords, RegionSetId};
    use serde_json::json;
    use std::collections::HashSet;
    use std::io;
    use std::path::PathBuf;
    use std::sync::Arc;

    /// In-memory chunk source: every chunk holds one tile entity tagged with
    /// its coordinates, except the ones listed as corrupt or broken.
    struct FakeSource {
        chunks: Vec<ChunkPos>,
        corrupt: HashSet<(i32, i32)>,
        broken: HashSet<(i32, i32)>,
    }

    impl FakeSource {
        fn grid(n: i32) -> Self {
            let chunks = (0..n)
                .flat_map(|x| (0..n).map(move |z| ChunkPos { x: x * 20, z: z * 20, mtime: 0 }))
                .collect();
            Self {
                chunks,
                corrupt: HashSet::new(),
                broken: HashSet::new(),
            }
        }
    }

    impl ChunkSource for FakeSource {
        fn dimension_tag(&self) -> Option<&str> {
            None
        }

        fn iterate_chunks(&self) -> io::Result<Vec<ChunkPos>> {
            Ok(self.chunks.clone())
        }

        fn get_chunk(&self, x: i32, z: i32) -> std::result::Result<ChunkRecords, ChunkError> {
            if self.corrupt.contains(&(x, z)) {
                return Err(ChunkError::Corrupt {
                    x,
                    z,
                    reason: "bad zlib".into(),
                });
            }
            if self.broken.contains(&(x, z)) {
                return Err(ChunkError::Io {
                    x,
                    z,
                    source: io::Error::new(io::ErrorKind::PermissionDenied, "denied"),
                });
            }
            let poi: Poi = serde_json::from_value(json!({"id": "Chest", "x": x, "y": 64, "z": z}))
                .unwrap();
            Ok(ChunkRecords {
                tile_entities: vec![poi],
                entities: Vec::new(),
            })
        }
    }

    fn rset(source: FakeSource) -> RegionSet {
        RegionSet {
            id: RegionSetId(0),
            world_path: PathBuf::from("/fake"),
            source: Arc::new(source),
        }
    }

    fn coords(extraction: &Extraction) -> HashSet<(i64, i64)> {
        extraction
            .pois
            .iter()
            .map(|p| {
                (
                    p.get("x").and_then(|v| v.as_i64()).unwrap(),
                    p.get("z").and_then(|v| v.as_i64()).unwrap(),
                )
            })
            .collect()
    }

    #[test]
    fn progress_thresholds_grow_geometrically() {
        let mut progress = Progress::new();
        let reported: Vec<usize> = (0..25_000).filter_map(|_| progress.bump()).collect();

        let mut expected: Vec<usize> = (1..=10).map(|i| i * 100).collect();
        expected.extend((2..=10).map(|i| i * 1000));
        expected.extend([20_000]);
        assert_eq!(reported, expected);
    }

    #[test]
    fn parallel_and_inline_scans_agree() {
        let inline = extract(&rset(FakeSource::grid(6)), 1).unwrap();
        let parallel = extract(&rset(FakeSource::grid(6)), 4).unwrap();

        assert_eq!(inline.pois.len(), 36);
        assert_eq!(parallel.pois.len(), 36);
        assert_eq!(coords(&inline), coords(&parallel));
        assert_eq!(parallel.chunks_scanned, 36);
    }

    #[test]
    fn corrupt_chunk_is_skipped_without_failing_siblings() {
        for workers in [1, 3] {
            let mut source = FakeSource::grid(4);
            source.corrupt.insert((20, 40));

            let extraction = extract(&rset(source), workers).unwrap();
            assert_eq!(extraction.corrupt_chunks, 1);
            assert_eq!(extraction.chunks_scanned, 16);
            assert_eq!(extraction.pois.len(), 15);
            assert!(!coords(&extraction).contains(&(20, 40)));
        }
    }

    #[test]
    fn io_failure_fails_the_extraction() {
        let mut source = FakeSource::grid(3);
        source.broken.insert((0, 20));

        match extract(&rset(source), 2) {
            Err(Error::Extraction { source: ChunkError::Io { x, z, .. }, .. }) => {
                assert_eq!((x, z), (0, 20));
            }
            other => panic!("expected extraction error, got {other:?}"),
        }
    }
}
