//! Worlds, region sets and the chunk source they expose.

use anvil::nbt::{self, Compound};
use anvil::{chunk_to_local, RegionFile, RegionPos};
use fastnbt::Value;
use log::{debug, warn};
use std::collections::HashMap;
use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use walkdir::WalkDir;

use crate::error::{Error, Result};
use crate::poi::Poi;

/// A chunk present in a region set, with its last-save timestamp.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkPos {
    pub x: i32,
    pub z: i32,
    pub mtime: u32,
}

/// Records decoded from one chunk.
#[derive(Debug, Clone, Default)]
pub struct ChunkRecords {
    pub tile_entities: Vec<Poi>,
    pub entities: Vec<Poi>,
}

#[derive(Debug, thiserror::Error)]
pub enum ChunkError {
    #[error("chunk {x},{z} is corrupt: {reason}")]
    Corrupt { x: i32, z: i32, reason: String },

    #[error("chunk {x},{z} does not exist")]
    Missing { x: i32, z: i32 },

    #[error("failed to read chunk {x},{z}: {source}")]
    Io {
        x: i32,
        z: i32,
        #[source]
        source: io::Error,
    },
}

impl ChunkError {
    fn from_io(x: i32, z: i32, err: io::Error) -> Self {
        if anvil::is_corruption(&err) {
            ChunkError::Corrupt {
                x,
                z,
                reason: err.to_string(),
            }
        } else if err.kind() == io::ErrorKind::NotFound {
            ChunkError::Missing { x, z }
        } else {
            ChunkError::Io { x, z, source: err }
        }
    }
}

pub type ChunkResult = std::result::Result<ChunkRecords, ChunkError>;

/// Enumerates and decodes the chunks of one region set. Implementations are
/// shared read-only between extraction workers.
pub trait ChunkSource: Send + Sync {
    /// Dimension tag: `None` for the overworld, `DIM-1`, `DIM1`, `DIM_MYST<n>`.
    fn dimension_tag(&self) -> Option<&str>;

    fn iterate_chunks(&self) -> io::Result<Vec<ChunkPos>>;

    fn get_chunk(&self, x: i32, z: i32) -> ChunkResult;

    /// Decode `chunks` in order, handing each result to `visit`. Stops at the
    /// first error `visit` returns. Sources backed by files may keep state
    /// (open files) between consecutive chunks.
    fn visit_chunks(
        &self,
        chunks: &[ChunkPos],
        visit: &mut dyn FnMut(ChunkPos, ChunkResult) -> std::result::Result<(), ChunkError>,
    ) -> std::result::Result<(), ChunkError> {
        for pos in chunks {
            visit(*pos, self.get_chunk(pos.x, pos.z))?;
        }
        Ok(())
    }
}

/// Map a region set's dimension tag to the numeric dimension stored in
/// player files. Unknown tags yield `None`.
pub fn dimension_from_tag(tag: Option<&str>) -> Option<i32> {
    match tag {
        None => Some(0),
        Some("DIM-1") => Some(-1),
        Some("DIM1") => Some(1),
        Some(other) => {
            let digits = other.strip_prefix("DIM_MYST")?;
            if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
                return None;
            }
            digits.parse().ok()
        }
    }
}

/// Run-scoped identity of a region set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RegionSetId(pub usize);

impl fmt::Display for RegionSetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Clone)]
pub struct RegionSet {
    pub id: RegionSetId,
    pub world_path: PathBuf,
    pub source: Arc<dyn ChunkSource>,
}

impl RegionSet {
    pub fn tag(&self) -> Option<&str> {
        self.source.dimension_tag()
    }

    /// Human-readable label for logs and errors.
    pub fn describe(&self) -> String {
        format!(
            "{}[{}]",
            self.world_path.display(),
            self.tag().unwrap_or("overworld")
        )
    }
}

impl fmt::Debug for RegionSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RegionSet")
            .field("id", &self.id)
            .field("world_path", &self.world_path)
            .field("tag", &self.tag())
            .finish()
    }
}

/// Chunk source over the `region/` (and, when present, `entities/`)
/// directories of one dimension.
#[derive(Debug, Clone)]
pub struct AnvilRegionSet {
    tag: Option<String>,
    region_dir: PathBuf,
    entities_dir: Option<PathBuf>,
}

impl AnvilRegionSet {
    /// Open the region set for `tag` under `world`, or `None` if the world
    /// has no region directory for it.
    pub fn open(world: &Path, tag: Option<&str>) -> Option<Self> {
        let base = match tag {
            Some(t) => world.join(t),
            None => world.to_path_buf(),
        };

        let region_dir = base.join("region");
        if !region_dir.is_dir() {
            return None;
        }

        let entities_dir = Some(base.join("entities")).filter(|p| p.is_dir());

        Some(Self {
            tag: tag.map(str::to_owned),
            region_dir,
            entities_dir,
        })
    }

    pub fn region_dir(&self) -> &Path {
        &self.region_dir
    }

    /// Region data and, when an `entities/` directory exists, the entities of
    /// chunk `(x, z)`.
    fn read_records(
        regions: &mut RegionCursor<'_>,
        entities: Option<&mut RegionCursor<'_>>,
        x: i32,
        z: i32,
    ) -> ChunkResult {
        let root = regions.read(x, z)?.ok_or(ChunkError::Missing { x, z })?;
        let mut records = decode_chunk(root);

        if let Some(entities) = entities {
            if let Some(root) = entities.read(x, z)? {
                records.entities.extend(take_compounds(root, "Entities"));
            }
        }

        Ok(records)
    }
}

/// Keeps the most recently used region file of one directory open, so
/// consecutive chunks of a region share one open file and header parse.
struct RegionCursor<'a> {
    dir: &'a Path,
    current: Option<(RegionPos, Option<RegionFile>)>,
}

impl<'a> RegionCursor<'a> {
    fn new(dir: &'a Path) -> Self {
        Self { dir, current: None }
    }

    /// Chunk NBT, or `None` when the region file or chunk slot is absent.
    fn read(&mut self, x: i32, z: i32) -> std::result::Result<Option<Compound>, ChunkError> {
        let pos = RegionPos::containing(x, z);
        if !matches!(&self.current, Some((open, _)) if *open == pos) {
            self.current = None;
            let file = match RegionFile::open(self.dir.join(pos.filename())) {
                Ok(r) => Some(r),
                Err(e) if e.kind() == io::ErrorKind::NotFound => None,
                Err(e) => return Err(ChunkError::from_io(x, z, e)),
            };
            self.current = Some((pos, file));
        }

        let Some((_, Some(region))) = self.current.as_mut() else {
            return Ok(None);
        };

        let bytes = match region.read_chunk(chunk_to_local(x), chunk_to_local(z)) {
            Ok(Some(bytes)) => bytes,
            Ok(None) => return Ok(None),
            Err(e) => return Err(ChunkError::from_io(x, z, e)),
        };

        nbt::parse_compound(&bytes)
            .map(Some)
            .map_err(|e| ChunkError::from_io(x, z, e))
    }
}

impl ChunkSource for AnvilRegionSet {
    fn dimension_tag(&self) -> Option<&str> {
        self.tag.as_deref()
    }

    fn iterate_chunks(&self) -> io::Result<Vec<ChunkPos>> {
        let mut chunks = Vec::new();

        for entry in WalkDir::new(&self.region_dir)
            .min_depth(1)
            .max_depth(1)
            .sort_by_file_name()
        {
            let entry = entry.map_err(io::Error::from)?;
            if !entry.file_type().is_file() {
                continue;
            }

            let Some(region_pos) = entry.file_name().to_str().and_then(RegionPos::from_filename)
            else {
                continue;
            };

            let region = match RegionFile::open(entry.path()) {
                Ok(r) => r,
                Err(e) if anvil::is_corruption(&e) => {
                    warn!("Skipping unreadable region file {}: {}", entry.path().display(), e);
                    continue;
                }
                Err(e) => return Err(e),
            };

            chunks.extend(region.chunks().map(|c| {
                let (x, z) = region_pos.chunk_at(c.local_x, c.local_z);
                ChunkPos {
                    x,
                    z,
                    mtime: c.timestamp,
                }
            }));
        }

        debug!("{}: {} chunks", self.region_dir.display(), chunks.len());
        Ok(chunks)
    }

    fn get_chunk(&self, x: i32, z: i32) -> ChunkResult {
        let mut regions = RegionCursor::new(&self.region_dir);
        let mut entities = self.entities_dir.as_deref().map(RegionCursor::new);
        Self::read_records(&mut regions, entities.as_mut(), x, z)
    }

    fn visit_chunks(
        &self,
        chunks: &[ChunkPos],
        visit: &mut dyn FnMut(ChunkPos, ChunkResult) -> std::result::Result<(), ChunkError>,
    ) -> std::result::Result<(), ChunkError> {
        let mut regions = RegionCursor::new(&self.region_dir);
        let mut entities = self.entities_dir.as_deref().map(RegionCursor::new);

        for pos in chunks {
            visit(
                *pos,
                Self::read_records(&mut regions, entities.as_mut(), pos.x, pos.z),
            )?;
        }
        Ok(())
    }
}

/// Pull tile entities and entities out of a chunk's root compound. Handles
/// both the pre-1.18 `Level` wrapper and the flattened `block_entities` form.
pub fn decode_chunk(mut root: Compound) -> ChunkRecords {
    let mut level = match root.remove("Level") {
        Some(Value::Compound(level)) => level,
        _ => root,
    };

    let mut tile_entities = take_compounds_from(&mut level, "TileEntities");
    tile_entities.extend(take_compounds_from(&mut level, "block_entities"));

    ChunkRecords {
        tile_entities,
        entities: take_compounds_from(&mut level, "Entities"),
    }
}

fn take_compounds(mut root: Compound, key: &str) -> Vec<Poi> {
    take_compounds_from(&mut root, key)
}

fn take_compounds_from(map: &mut Compound, key: &str) -> Vec<Poi> {
    match map.remove(key) {
        Some(Value::List(items)) => items
            .into_iter()
            .filter_map(|item| match item {
                Value::Compound(c) => Some(Poi::from(nbt::compound_to_json(c))),
                _ => None,
            })
            .collect(),
        _ => Vec::new(),
    }
}

/// Run-scoped cache of opened region sets, keyed by world path and tag.
/// Every distinct region set gets a sequential [`RegionSetId`].
#[derive(Default)]
pub struct WorldCache {
    regionsets: HashMap<(PathBuf, Option<String>), RegionSet>,
    next_id: usize,
}

impl WorldCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn regionset(&mut self, world: &Path, tag: Option<&str>) -> Result<Option<RegionSet>> {
        let key = (world.to_path_buf(), tag.map(str::to_owned));
        if let Some(rset) = self.regionsets.get(&key) {
            return Ok(Some(rset.clone()));
        }

        if !world.is_dir() {
            return Err(Error::ChunkScan {
                path: world.to_path_buf(),
                source: io::Error::new(io::ErrorKind::NotFound, "world directory not found"),
            });
        }

        let Some(source) = AnvilRegionSet::open(world, tag) else {
            return Ok(None);
        };

        Ok(Some(self.insert(world, tag, Arc::new(source))))
    }

    /// Register an arbitrary chunk source, e.g. one not backed by region files.
    /// Re-inserting a key replaces its source under a fresh id.
    pub fn insert(&mut self, world: &Path, tag: Option<&str>, source: Arc<dyn ChunkSource>) -> RegionSet {
        let id = RegionSetId(self.next_id);
        self.next_id += 1;

        let rset = RegionSet {
            id,
            world_path: world.to_path_buf(),
            source,
        };
        self.regionsets
            .insert((world.to_path_buf(), tag.map(str::to_owned)), rset.clone());
        rset
    }
}
