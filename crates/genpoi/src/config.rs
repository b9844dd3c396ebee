//! Run configuration, loaded from a TOML file.

use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};
use crate::filter::FieldFilter;
use crate::poi::Poi;

/// Top-level config file.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Directory receiving the marker scripts.
    pub outputdir: PathBuf,

    /// World name -> world directory.
    pub worlds: BTreeMap<String, PathBuf>,

    /// Declarative filters referenced by marker sets.
    #[serde(default)]
    pub filters: BTreeMap<String, FieldFilter>,

    pub renders: BTreeMap<String, RenderConfig>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RenderConfig {
    /// Key into [`Config::worlds`].
    pub world: String,

    /// `overworld`, `nether`, `end`, or a raw region-set tag like `DIM_MYST3`.
    #[serde(default = "default_dimension")]
    pub dimension: String,

    #[serde(default)]
    pub markers: Vec<MarkerConfig>,

    /// POIs added to every marker set of this render, bypassing extraction.
    #[serde(default)]
    pub manualpois: Vec<Poi>,

    /// Extraction workers; below 1 means one per core.
    #[serde(default = "default_processes")]
    pub processes: i32,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MarkerConfig {
    /// Display name.
    pub name: String,

    /// Key into [`Config::filters`] (or a filter registered in code).
    pub filter: String,

    pub icon: Option<String>,

    #[serde(rename = "createInfoWindow")]
    pub create_info_window: Option<bool>,

    pub checked: Option<bool>,
}

fn default_dimension() -> String {
    "overworld".to_string()
}

fn default_processes() -> i32 {
    -1
}

/// Region-set tag for a configured dimension name. `None` is the overworld.
pub fn dimension_tag(name: &str) -> Option<String> {
    match name {
        "overworld" | "default" => None,
        "nether" => Some("DIM-1".to_string()),
        "end" => Some("DIM1".to_string()),
        other => Some(other.to_string()),
    }
}

impl Config {
    /// Read, parse and validate a config file. Relative paths are resolved
    /// against the file's directory.
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|source| Error::ConfigRead {
            path: path.to_path_buf(),
            source,
        })?;

        let mut config = Self::parse(&text).map_err(|source| Error::ConfigParse {
            path: path.to_path_buf(),
            source,
        })?;

        if let Some(base) = path.parent() {
            config.resolve_paths(base);
        }
        config.validate()?;

        Ok(config)
    }

    pub fn parse(text: &str) -> std::result::Result<Self, toml::de::Error> {
        toml::from_str(text)
    }

    fn resolve_paths(&mut self, base: &Path) {
        let resolve = |p: &mut PathBuf| {
            if p.is_relative() {
                *p = base.join(&*p);
            }
        };

        resolve(&mut self.outputdir);
        self.worlds.values_mut().for_each(resolve);
    }

    /// Every render must name a known world. Filter references are checked
    /// when the pipeline resolves them, since filters can also come from code.
    pub fn validate(&self) -> Result<()> {
        for (name, render) in &self.renders {
            if !self.worlds.contains_key(&render.world) {
                return Err(Error::UnknownWorld {
                    render: name.clone(),
                    world: render.world.clone(),
                });
            }
        }
        Ok(())
    }
}
