//! NBT decoding helpers.
//!
//! Chunk and player data are decoded with `fastnbt` into its dynamic
//! [`Value`] and then converted to `serde_json` values, which is the shape
//! the rest of the toolchain works with.

use fastnbt::Value;
use flate2::read::GzDecoder;
use std::collections::HashMap;
use std::io::{self, ErrorKind, Read};
use std::path::Path;

pub type Compound = HashMap<String, Value>;

/// Parse uncompressed NBT bytes whose root tag must be a compound.
pub fn parse_compound(bytes: &[u8]) -> io::Result<Compound> {
    let value: Value = fastnbt::from_bytes(bytes)
        .map_err(|e| io::Error::new(ErrorKind::InvalidData, e.to_string()))?;

    match value {
        Value::Compound(map) => Ok(map),
        _ => Err(io::Error::new(ErrorKind::InvalidData, "NBT root is not a compound")),
    }
}

/// Read a gzip-compressed NBT file (`level.dat`, `playerdata/*.dat`).
pub fn read_gzip_compound<P: AsRef<Path>>(path: P) -> io::Result<Compound> {
    let raw = std::fs::read(path)?;
    let mut bytes = Vec::with_capacity(raw.len() * 4);
    GzDecoder::new(raw.as_slice())
        .read_to_end(&mut bytes)
        .map_err(|e| io::Error::new(ErrorKind::InvalidData, e))?;
    parse_compound(&bytes)
}

/// Convert an NBT value to JSON. Integer tags stay integers, arrays become
/// JSON arrays, and non-finite floats become `null`.
pub fn to_json(value: Value) -> serde_json::Value {
    use serde_json::Value as Json;

    match value {
        Value::Byte(v) => Json::from(v),
        Value::Short(v) => Json::from(v),
        Value::Int(v) => Json::from(v),
        Value::Long(v) => Json::from(v),
        Value::Float(v) => float(v as f64),
        Value::Double(v) => float(v),
        Value::String(s) => Json::String(s),
        Value::ByteArray(a) => Json::Array(a.iter().map(|&b| Json::from(b)).collect()),
        Value::IntArray(a) => Json::Array(a.iter().map(|&i| Json::from(i)).collect()),
        Value::LongArray(a) => Json::Array(a.iter().map(|&l| Json::from(l)).collect()),
        Value::List(items) => Json::Array(items.into_iter().map(to_json).collect()),
        Value::Compound(map) => Json::Object(compound_to_json(map)),
    }
}

pub fn compound_to_json(map: Compound) -> serde_json::Map<String, serde_json::Value> {
    map.into_iter().map(|(k, v)| (k, to_json(v))).collect()
}

fn float(v: f64) -> serde_json::Value {
    serde_json::Number::from_f64(v)
        .map(serde_json::Value::Number)
        .unwrap_or(serde_json::Value::Null)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn compound(entries: Vec<(&str, Value)>) -> Value {
        Value::Compound(entries.into_iter().map(|(k, v)| (k.to_string(), v)).collect())
    }

    #[test]
    fn converts_nested_values() {
        let value = compound(vec![
            ("id", Value::String("Chest".into())),
            ("x", Value::Int(10)),
            ("Count", Value::Byte(3)),
            (
                "Pos",
                Value::List(vec![Value::Double(1.5), Value::Double(64.0), Value::Double(-2.25)]),
            ),
            ("Bad", Value::Float(f32::NAN)),
        ]);

        assert_eq!(
            to_json(value),
            json!({
                "id": "Chest",
                "x": 10,
                "Count": 3,
                "Pos": [1.5, 64.0, -2.25],
                "Bad": null,
            })
        );
    }

    #[test]
    fn round_trips_through_bytes() {
        let value = compound(vec![("Dimension", Value::Int(-1))]);
        let bytes = fastnbt::to_bytes(&value).unwrap();
        let parsed = parse_compound(&bytes).unwrap();
        assert_eq!(parsed.get("Dimension"), Some(&Value::Int(-1)));
    }

    #[test]
    fn rejects_non_nbt_bytes() {
        let err = parse_compound(b"definitely not nbt").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidData);
    }

    #[test]
    fn reads_gzip_files() {
        use flate2::write::GzEncoder;
        use std::io::Write;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("player.dat");
        let bytes = fastnbt::to_bytes(&compound(vec![("SpawnX", Value::Int(12))])).unwrap();
        let mut enc = GzEncoder::new(Vec::new(), flate2::Compression::default());
        enc.write_all(&bytes).unwrap();
        std::fs::write(&path, enc.finish().unwrap()).unwrap();

        let parsed = read_gzip_compound(&path).unwrap();
        assert_eq!(parsed.get("SpawnX"), Some(&Value::Int(12)));
    }
}
