//! Player positions and spawn points.
//!
//! Player data lives in one of three places, checked in order:
//! `playerdata/<uuid>.dat`, `players/<name>.dat`, or the `Data.Player`
//! compound of `level.dat` for single-player worlds.

use anvil::nbt;
use fastnbt::Value as Nbt;
use log::{debug, warn};
use serde::Deserialize;
use serde_json::Value;
use std::cell::RefCell;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use walkdir::WalkDir;

use crate::poi::Poi;

pub const UUID_LOOKUP_URL: &str = "https://sessionserver.mojang.com/session/minecraft/profile/";

const LOOKUP_TIMEOUT: Duration = Duration::from_secs(10);

/// Resolves a player UUID to a display name.
pub trait NameResolver {
    /// `Ok(None)` means the service answered but had no name.
    fn resolve(&self, uuid: &str) -> anyhow::Result<Option<String>>;
}

impl<R: NameResolver + ?Sized> NameResolver for &R {
    fn resolve(&self, uuid: &str) -> anyhow::Result<Option<String>> {
        (**self).resolve(uuid)
    }
}

#[derive(Debug, Deserialize)]
struct Profile {
    name: Option<String>,
}

/// Looks names up on the Mojang session server.
pub struct SessionServerResolver {
    client: reqwest::blocking::Client,
    base_url: String,
}

impl SessionServerResolver {
    pub fn new() -> anyhow::Result<Self> {
        Self::with_base_url(UUID_LOOKUP_URL, LOOKUP_TIMEOUT)
    }

    pub fn with_base_url(base_url: &str, timeout: Duration) -> anyhow::Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("genpoi/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.to_string(),
        })
    }
}

impl NameResolver for SessionServerResolver {
    fn resolve(&self, uuid: &str) -> anyhow::Result<Option<String>> {
        let url = format!("{}{}", self.base_url, uuid.replace('-', ""));
        let profile: Profile = self.client.get(url).send()?.error_for_status()?.json()?;
        Ok(profile.name)
    }
}

/// Never resolves; players keep their UUID as name.
pub struct OfflineResolver;

impl NameResolver for OfflineResolver {
    fn resolve(&self, _uuid: &str) -> anyhow::Result<Option<String>> {
        Ok(None)
    }
}

/// Remembers every answer of the wrapped resolver for the run, so a player
/// seen in several dimensions is looked up once. A failed lookup is
/// remembered as "no name" after its first error.
pub struct NameCache<'a> {
    inner: Box<dyn NameResolver + 'a>,
    names: RefCell<HashMap<String, Option<String>>>,
}

impl<'a> NameCache<'a> {
    pub fn new(inner: Box<dyn NameResolver + 'a>) -> Self {
        Self {
            inner,
            names: RefCell::new(HashMap::new()),
        }
    }
}

impl NameResolver for NameCache<'_> {
    fn resolve(&self, uuid: &str) -> anyhow::Result<Option<String>> {
        if let Some(name) = self.names.borrow().get(uuid) {
            return Ok(name.clone());
        }

        let result = self.inner.resolve(uuid);
        let remembered = result.as_ref().ok().cloned().flatten();
        self.names.borrow_mut().insert(uuid.to_string(), remembered);
        result
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum PlayerStore {
    Uuid(PathBuf),
    Legacy(PathBuf),
    SinglePlayer(PathBuf),
}

impl PlayerStore {
    fn locate(world: &Path) -> Self {
        let uuid_dir = world.join("playerdata");
        if uuid_dir.is_dir() {
            return Self::Uuid(uuid_dir);
        }

        let legacy_dir = world.join("players");
        if legacy_dir.is_dir() {
            return Self::Legacy(legacy_dir);
        }

        Self::SinglePlayer(world.join("level.dat"))
    }

    fn files(&self) -> Vec<PathBuf> {
        let dir = match self {
            Self::Uuid(dir) | Self::Legacy(dir) => dir,
            Self::SinglePlayer(file) => {
                return file.is_file().then(|| file.clone()).into_iter().collect();
            }
        };

        WalkDir::new(dir)
            .min_depth(1)
            .max_depth(1)
            .sort_by_file_name()
            .into_iter()
            .filter_map(|entry| match entry {
                Ok(e) => Some(e),
                Err(err) => {
                    warn!("Skipping unreadable entry in {}: {}", dir.display(), err);
                    None
                }
            })
            .filter(|e| e.file_type().is_file())
            .map(|e| e.into_path())
            .filter(|p| p.extension().and_then(|e| e.to_str()) == Some("dat"))
            .collect()
    }
}

/// Numeric dimension stored in a player record. Older saves use integers,
/// newer ones namespaced ids.
pub fn stored_dimension(value: &Value) -> Option<i32> {
    match value {
        Value::Number(n) => n.as_i64().and_then(|d| i32::try_from(d).ok()),
        Value::String(s) => match s.as_str() {
            "minecraft:overworld" => Some(0),
            "minecraft:the_nether" => Some(-1),
            "minecraft:the_end" => Some(1),
            _ => None,
        },
        _ => None,
    }
}

/// Collect `Player` and `PlayerSpawn` POIs for the given numeric dimension.
///
/// Bad player files and failed name lookups are logged and skipped.
pub fn player_pois(world: &Path, dimension: i32, resolver: &dyn NameResolver) -> Vec<Poi> {
    let store = PlayerStore::locate(world);
    debug!("Player data for {}: {:?}", world.display(), store);

    let mut pois = Vec::new();
    for file in store.files() {
        let Some(data) = read_player(&store, &file) else {
            continue;
        };

        let stem = file
            .file_name()
            .and_then(|n| n.to_str())
            .and_then(|n| n.split('.').next())
            .unwrap_or_default()
            .to_string();

        let name = match &store {
            PlayerStore::SinglePlayer(_) => "Player".to_string(),
            PlayerStore::Legacy(_) => stem,
            PlayerStore::Uuid(_) => match resolver.resolve(&stem) {
                Ok(Some(name)) => name,
                Ok(None) => stem,
                Err(err) => {
                    warn!("Unable to get name for UUID {}: {:#}", stem, err);
                    stem
                }
            },
        };

        pois.extend(pois_for_player(data, &name, dimension));
    }

    pois
}

fn read_player(store: &PlayerStore, file: &Path) -> Option<Poi> {
    let root = match nbt::read_gzip_compound(file) {
        Ok(root) => root,
        Err(err) => {
            warn!("Skipping bad player dat file {}: {}", file.display(), err);
            return None;
        }
    };

    let compound = match store {
        PlayerStore::SinglePlayer(_) => {
            let player = match root.get("Data") {
                Some(Nbt::Compound(data)) => data.get("Player").cloned(),
                _ => None,
            };
            match player {
                Some(Nbt::Compound(player)) => player,
                _ => {
                    debug!("{} has no Data.Player compound", file.display());
                    return None;
                }
            }
        }
        _ => root,
    };

    Some(Poi::from(nbt::compound_to_json(compound)))
}

/// Turn one decoded player record into its POIs.
pub fn pois_for_player(mut data: Poi, name: &str, dimension: i32) -> Vec<Poi> {
    let mut out = Vec::with_capacity(2);

    let spawn = match (data.get("SpawnX"), data.get("SpawnY"), data.get("SpawnZ")) {
        (Some(x), Some(y), Some(z)) if dimension == 0 => Some(
            Poi::new()
                .with("id", "PlayerSpawn")
                .with("EntityId", name)
                .with("x", x.clone())
                .with("y", y.clone())
                .with("z", z.clone()),
        ),
        _ => None,
    };

    let here = data.get("Dimension").and_then(stored_dimension);
    if here == Some(dimension) {
        match last_position(&data) {
            Some([x, y, z]) => {
                data.insert("id", "Player");
                data.insert("EntityId", name);
                data.insert("x", x);
                data.insert("y", y);
                data.insert("z", z);
                out.push(data);
            }
            None => warn!("Player {} has no usable Pos; skipping position marker", name),
        }
    }

    out.extend(spawn);
    out
}

/// `Pos` truncated to whole blocks.
fn last_position(data: &Poi) -> Option<[i64; 3]> {
    let pos = data.get("Pos")?.as_array()?;
    if pos.len() != 3 {
        return None;
    }

    let mut out = [0i64; 3];
    for (slot, value) in out.iter_mut().zip(pos) {
        *slot = value.as_f64()?.trunc() as i64;
    }
    Some(out)
}
