use serde::{Deserialize, Serialize};
use serde_json::{Map, Number, Value};

use crate::error::{Error, Result};

/// A raw point of interest: tile entity, entity, player, or a manual entry
/// from the config. Only the position is ever required.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Poi(Map<String, Value>);

/// World position. Numbers keep their original representation, so integer
/// block coordinates stay integers in the output.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Position {
    pub x: Number,
    pub y: Number,
    pub z: Number,
}

impl Position {
    /// A point given as `{"x", "y", "z"}` or as a 3-element list.
    pub fn from_value(value: &Value) -> Option<Self> {
        let number = |v: Option<&Value>| match v {
            Some(Value::Number(n)) => Some(n.clone()),
            _ => None,
        };
        let (x, y, z) = match value {
            Value::Object(map) => (map.get("x"), map.get("y"), map.get("z")),
            Value::Array(items) if items.len() == 3 => (items.first(), items.get(1), items.get(2)),
            _ => return None,
        };

        Some(Self {
            x: number(x)?,
            y: number(y)?,
            z: number(z)?,
        })
    }
}

impl Poi {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.0.get(key).and_then(Value::as_str)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.0.insert(key.into(), value.into());
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.insert(key, value);
        self
    }

    /// The `id` field, or `"?"` for logging.
    pub fn id(&self) -> &str {
        self.get_str("id").unwrap_or("?")
    }

    /// Each coordinate comes from its explicit `x`/`y`/`z` field when present,
    /// otherwise from the matching slot of a 3-element `Pos` list.
    pub fn position(&self) -> Result<Position> {
        let pos = match self.0.get("Pos") {
            Some(Value::Array(items)) if items.len() == 3 => Some(items),
            _ => None,
        };

        let coord = |key: &str, index: usize| -> Option<Number> {
            match self.0.get(key) {
                Some(Value::Number(n)) => Some(n.clone()),
                _ => match pos.map(|p| &p[index]) {
                    Some(Value::Number(n)) => Some(n.clone()),
                    _ => None,
                },
            }
        };

        match (coord("x", 0), coord("y", 1), coord("z", 2)) {
            (Some(x), Some(y), Some(z)) => Ok(Position { x, y, z }),
            _ => Err(Error::MissingPosition {
                id: self.id().to_string(),
            }),
        }
    }

    pub fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }
}

impl From<Map<String, Value>> for Poi {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}
