//! The coordinating flow: resolve renders, extract, classify, write.

use log::info;
use std::collections::{BTreeMap, HashMap};

use crate::bucket::resolve_workers;
use crate::config::{dimension_tag, Config};
use crate::error::{Error, Result};
use crate::extract::extract;
use crate::filter::FilterRegistry;
use crate::markers::{MarkerAggregator, MarkerSetKey};
use crate::output::{write_artifacts, MarkerIndex, MarkerIndexEntry, DEFAULT_ICON};
use crate::players::{player_pois, NameCache, NameResolver};
use crate::poi::Poi;
use crate::world::{dimension_from_tag, RegionSet, RegionSetId, WorldCache};

/// POIs gathered for one region set.
#[derive(Debug, Default)]
pub struct CachedPois {
    pub entities: Vec<Poi>,
    pub players: Vec<Poi>,
}

/// Extraction results per region set, computed at most once per run.
#[derive(Debug, Default)]
pub struct ExtractionCache {
    entries: HashMap<RegionSetId, CachedPois>,
}

impl ExtractionCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, id: RegionSetId) -> bool {
        self.entries.contains_key(&id)
    }

    /// Extract entities (unless `skip_scan`) and players for `target` on
    /// first use; later calls return the cached result.
    pub fn get_or_extract(
        &mut self,
        target: &RegionTarget,
        skip_scan: bool,
        resolver: &dyn NameResolver,
    ) -> Result<&CachedPois> {
        let id = target.regionset.id;
        if !self.entries.contains_key(&id) {
            let entities = if skip_scan {
                Vec::new()
            } else {
                extract(&target.regionset, target.workers)?.pois
            };
            let players = player_pois(&target.regionset.world_path, target.dimension, resolver);
            self.entries.insert(id, CachedPois { entities, players });
        }

        Ok(&self.entries[&id])
    }
}

/// A region set referenced by at least one render, with what is needed to
/// scan it.
#[derive(Debug, Clone)]
pub struct RegionTarget {
    pub regionset: RegionSet,
    pub dimension: i32,
    pub workers: i32,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub marker_sets: usize,
    pub records: usize,
    pub pois_classified: usize,
}

pub struct Pipeline<'a> {
    config: &'a Config,
    filters: FilterRegistry,
    resolver: NameCache<'a>,
    skip_scan: bool,
}

impl<'a> Pipeline<'a> {
    pub fn new(config: &'a Config, filters: FilterRegistry, resolver: Box<dyn NameResolver + 'a>) -> Self {
        Self {
            config,
            filters,
            resolver: NameCache::new(resolver),
            skip_scan: false,
        }
    }

    /// Skip chunk scanning; only manual and player POIs are classified.
    pub fn skip_scan(mut self, skip: bool) -> Self {
        self.skip_scan = skip;
        self
    }

    pub fn run(&self) -> Result<RunSummary> {
        let mut worlds = WorldCache::new();
        let mut cache = ExtractionCache::new();
        let (mut aggregator, index, targets) = self.prepare(&mut worlds)?;

        let mut pois_classified = 0;
        for target in targets.values() {
            info!("Processing region set {}", target.regionset.describe());
            let pois = cache.get_or_extract(target, self.skip_scan, &self.resolver)?;
            pois_classified += aggregator.classify(
                target.regionset.id,
                &self.filters,
                pois.entities.iter().chain(pois.players.iter()),
            )?;
        }

        write_artifacts(&self.config.outputdir, aggregator.sets(), &index)?;

        Ok(RunSummary {
            marker_sets: aggregator.sets().len(),
            records: aggregator.record_count(),
            pois_classified,
        })
    }

    /// Resolve every render to its region set, register its marker sets and
    /// seed them with the render's manual POIs.
    fn prepare(
        &self,
        worlds: &mut WorldCache,
    ) -> Result<(MarkerAggregator, MarkerIndex, BTreeMap<RegionSetId, RegionTarget>)> {
        let mut aggregator = MarkerAggregator::new();
        let mut index = MarkerIndex::new();
        let mut targets: BTreeMap<RegionSetId, RegionTarget> = BTreeMap::new();

        for (rname, render) in &self.config.renders {
            let world_path = self
                .config
                .worlds
                .get(&render.world)
                .ok_or_else(|| Error::UnknownWorld {
                    render: rname.clone(),
                    world: render.world.clone(),
                })?;

            let tag = dimension_tag(&render.dimension);
            let regionset = worlds.regionset(world_path, tag.as_deref())?.ok_or_else(|| {
                Error::MissingDimension {
                    render: rname.clone(),
                    dimension: render.dimension.clone(),
                    path: world_path.clone(),
                }
            })?;

            let entries = index.entry(rname.clone()).or_default();
            for marker in &render.markers {
                let filter = self.filters.id(&marker.filter).ok_or_else(|| Error::UnknownFilter {
                    render: rname.clone(),
                    marker: marker.name.clone(),
                    filter: marker.filter.clone(),
                })?;

                let set = aggregator.register(MarkerSetKey {
                    display_name: marker.name.clone(),
                    filter,
                    regionset: regionset.id,
                })?;
                set.seed(&self.filters, &render.manualpois)?;

                entries.push(MarkerIndexEntry {
                    group_name: set.internal_name().to_string(),
                    display_name: marker.name.clone(),
                    icon: marker.icon.clone().unwrap_or_else(|| DEFAULT_ICON.to_string()),
                    create_info_window: marker.create_info_window.unwrap_or(true),
                    checked: marker.checked.unwrap_or(false),
                });
            }

            if render.markers.is_empty() {
                continue;
            }

            let dimension = dimension_from_tag(regionset.tag()).ok_or_else(|| Error::UnknownDimension {
                render: rname.clone(),
                tag: regionset.tag().unwrap_or_default().to_string(),
            })?;

            // A region set shared by several renders scans with the largest
            // worker count any of them asks for.
            targets
                .entry(regionset.id)
                .and_modify(|t| {
                    if resolve_workers(render.processes) > resolve_workers(t.workers) {
                        t.workers = render.processes;
                    }
                })
                .or_insert_with(|| RegionTarget {
                    regionset: regionset.clone(),
                    dimension,
                    workers: render.processes,
                });
        }

        Ok((aggregator, index, targets))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::players::OfflineResolver;
    use crate::world::{ChunkError, ChunkPos, ChunkRecords, ChunkSource};
    use std::io;
    use std::path::PathBuf;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct CountingSource {
        scans: AtomicUsize,
    }

    impl ChunkSource for CountingSource {
        fn dimension_tag(&self) -> Option<&str> {
            None
        }

        fn iterate_chunks(&self) -> io::Result<Vec<ChunkPos>> {
            self.scans.fetch_add(1, Ordering::SeqCst);
            Ok(vec![ChunkPos { x: 0, z: 0, mtime: 0 }])
        }

        fn get_chunk(&self, _x: i32, _z: i32) -> std::result::Result<ChunkRecords, ChunkError> {
            Ok(ChunkRecords::default())
        }
    }

    #[test]
    fn extraction_is_cached_per_regionset() {
        let dir = tempfile::tempdir().unwrap();
        let source = Arc::new(CountingSource {
            scans: AtomicUsize::new(0),
        });
        let mut worlds = WorldCache::new();
        let regionset = worlds.insert(dir.path(), None, source.clone());
        let target = RegionTarget {
            regionset,
            dimension: 0,
            workers: 1,
        };

        let mut cache = ExtractionCache::new();
        cache.get_or_extract(&target, false, &OfflineResolver).unwrap();
        cache.get_or_extract(&target, false, &OfflineResolver).unwrap();
        assert!(cache.contains(target.regionset.id));
        assert_eq!(source.scans.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn skip_scan_never_touches_chunks() {
        let source = Arc::new(CountingSource {
            scans: AtomicUsize::new(0),
        });
        let mut worlds = WorldCache::new();
        let target = RegionTarget {
            regionset: worlds.insert(&PathBuf::from("/nonexistent"), None, source.clone()),
            dimension: 0,
            workers: 1,
        };

        let mut cache = ExtractionCache::new();
        let pois = cache.get_or_extract(&target, true, &OfflineResolver).unwrap();
        assert!(pois.entities.is_empty());
        assert_eq!(source.scans.load(Ordering::SeqCst), 0);
    }
}
