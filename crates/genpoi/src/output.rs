//! Writes `markersDB.js`, `markers.js` and `baseMarkers.js`.

use log::info;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use crate::error::{Error, Result};
use crate::markers::MarkerSet;

pub const DEFAULT_ICON: &str = "signpost_icon.png";

pub const BASE_MARKERS: &str = "overviewer.util.injectMarkerScript('markersDB.js');\n\
overviewer.util.injectMarkerScript('markers.js');\n\
overviewer.collections.haveSigns=true;\n";

/// One marker set as listed under its render in `markers.js`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MarkerIndexEntry {
    pub group_name: String,
    pub display_name: String,
    pub icon: String,
    pub create_info_window: bool,
    pub checked: bool,
}

/// Render name -> marker sets shown on it, in config order.
pub type MarkerIndex = BTreeMap<String, Vec<MarkerIndexEntry>>;

/// Serialize `value` as `var <name>=<json>;` with 2-space indentation.
pub fn to_script<T: Serialize>(name: &str, value: &T) -> Result<String> {
    let json = serde_json::to_string_pretty(value)?;
    Ok(format!("var {name}={json};\n"))
}

/// Write all three artifacts into `dir`, creating it if needed.
pub fn write_artifacts(
    dir: &Path,
    db: &BTreeMap<String, MarkerSet>,
    index: &MarkerIndex,
) -> Result<()> {
    fs::create_dir_all(dir).map_err(|source| Error::Output {
        path: dir.to_path_buf(),
        source,
    })?;

    write(dir, "markersDB.js", &to_script("markersDB", db)?)?;
    write(dir, "markers.js", &to_script("markers", index)?)?;
    write(dir, "baseMarkers.js", BASE_MARKERS)?;

    info!("Wrote marker scripts to {}", dir.display());
    Ok(())
}

fn write(dir: &Path, file: &str, contents: &str) -> Result<()> {
    let path = dir.join(file);
    fs::write(&path, contents).map_err(|source| Error::Output { path, source })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Value};

    fn parse_script(text: &str, name: &str) -> Value {
        let body = text
            .strip_prefix(&format!("var {name}="))
            .and_then(|t| t.strip_suffix(";\n"))
            .expect("script wrapper");
        serde_json::from_str(body).unwrap()
    }

    #[test]
    fn index_uses_viewer_field_names() {
        let mut index = MarkerIndex::new();
        index.insert(
            "day".into(),
            vec![MarkerIndexEntry {
                group_name: "Signs_0_0".into(),
                display_name: "Signs".into(),
                icon: DEFAULT_ICON.into(),
                create_info_window: true,
                checked: false,
            }],
        );

        let script = to_script("markers", &index).unwrap();
        assert_eq!(
            parse_script(&script, "markers"),
            json!({"day": [{
                "groupName": "Signs_0_0",
                "displayName": "Signs",
                "icon": "signpost_icon.png",
                "createInfoWindow": true,
                "checked": false,
            }]})
        );
    }

    #[test]
    fn writes_three_files() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("nested").join("out");

        write_artifacts(&out, &BTreeMap::new(), &MarkerIndex::new()).unwrap();

        let db = fs::read_to_string(out.join("markersDB.js")).unwrap();
        assert_eq!(parse_script(&db, "markersDB"), json!({}));
        let markers = fs::read_to_string(out.join("markers.js")).unwrap();
        assert_eq!(parse_script(&markers, "markers"), json!({}));
        assert_eq!(fs::read_to_string(out.join("baseMarkers.js")).unwrap(), BASE_MARKERS);
        assert_eq!(BASE_MARKERS.lines().count(), 3);
    }
}
