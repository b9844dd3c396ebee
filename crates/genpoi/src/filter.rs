//! Marker-set filters and normalization of their output into marker records.

use log::warn;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use crate::error::Result;
use crate::poi::{Poi, Position};

/// What a filter decided about one POI.
#[derive(Debug, Clone, PartialEq)]
pub enum FilterOutcome {
    /// Display text, also used as hover text.
    Text(String),
    /// `(hovertext, text)`.
    Pair { hover: String, text: String },
    Structured(Structured),
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Structured {
    pub text: String,
    pub hovertext: Option<String>,
    pub polyline: Option<Vec<Position>>,
    pub color: Option<String>,
    pub icon: Option<String>,
}

impl FilterOutcome {
    fn is_falsy(&self) -> bool {
        matches!(self, FilterOutcome::Text(t) if t.is_empty())
    }
}

/// Classification strategy for one marker set.
pub trait PoiFilter: Send + Sync {
    /// `Ok(None)` excludes the POI from the marker set.
    fn classify(&self, poi: &Poi) -> anyhow::Result<Option<FilterOutcome>>;
}

impl<F> PoiFilter for F
where
    F: Fn(&Poi) -> Option<FilterOutcome> + Send + Sync,
{
    fn classify(&self, poi: &Poi) -> anyhow::Result<Option<FilterOutcome>> {
        Ok(self(poi))
    }
}

/// The canonical marker written to `markersDB.js`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MarkerRecord {
    #[serde(flatten)]
    pub position: Position,
    pub text: String,
    pub hovertext: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub icon: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub polyline: Option<Vec<Position>>,
    #[serde(rename = "strokeColor", skip_serializing_if = "Option::is_none")]
    pub stroke_color: Option<String>,
    #[serde(rename = "createInfoWindow", skip_serializing_if = "Option::is_none")]
    pub create_info_window: Option<Value>,
}

/// Build a record from a filter outcome. Falsy outcomes produce nothing.
///
/// A textual `icon` on the POI takes precedence over one supplied by the
/// filter. A `createInfoWindow` field on the POI is copied as-is.
pub fn normalize(poi: &Poi, outcome: Option<FilterOutcome>) -> Result<Option<MarkerRecord>> {
    let Some(outcome) = outcome.filter(|o| !o.is_falsy()) else {
        return Ok(None);
    };

    let position = poi.position()?;

    let (text, hovertext, polyline, stroke_color, filter_icon) = match outcome {
        FilterOutcome::Text(text) => (text.clone(), text, None, None, None),
        FilterOutcome::Pair { hover, text } => (text, hover, None, None, None),
        FilterOutcome::Structured(s) => {
            let hovertext = s.hovertext.unwrap_or_else(|| s.text.clone());
            let color = s.polyline.as_ref().and(s.color);
            (s.text, hovertext, s.polyline, color, s.icon)
        }
    };

    let icon = poi.get_str("icon").map(str::to_owned).or(filter_icon);

    Ok(Some(MarkerRecord {
        position,
        text,
        hovertext,
        icon,
        polyline,
        stroke_color,
        create_info_window: poi.get("createInfoWindow").cloned(),
    }))
}

/// Run `filter` on `poi` and normalize the result. A filter error is logged
/// and treated as "no record".
pub fn apply(filter: &dyn PoiFilter, poi: &Poi) -> Result<Option<MarkerRecord>> {
    match filter.classify(poi) {
        Ok(outcome) => normalize(poi, outcome),
        Err(err) => {
            warn!("Filter failed on POI '{}': {:#}", poi.id(), err);
            Ok(None)
        }
    }
}

/// Run-scoped identity of a filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FilterId(pub usize);

impl fmt::Display for FilterId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Named filters available to marker sets. Ids are handed out in
/// registration order.
#[derive(Default, Clone)]
pub struct FilterRegistry {
    filters: Vec<Arc<dyn PoiFilter>>,
    names: BTreeMap<String, FilterId>,
}

impl FilterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding every declarative filter from the config, in name order.
    pub fn from_config(filters: &BTreeMap<String, FieldFilter>) -> Self {
        let mut registry = Self::new();
        for (name, filter) in filters {
            registry.register(name, Arc::new(filter.clone()));
        }
        registry
    }

    /// Add or replace a filter under `name`. Replacing keeps the id.
    pub fn register(&mut self, name: &str, filter: Arc<dyn PoiFilter>) -> FilterId {
        if let Some(&id) = self.names.get(name) {
            self.filters[id.0] = filter;
            return id;
        }

        let id = FilterId(self.filters.len());
        self.filters.push(filter);
        self.names.insert(name.to_string(), id);
        id
    }

    pub fn id(&self, name: &str) -> Option<FilterId> {
        self.names.get(name).copied()
    }

    pub fn get(&self, id: FilterId) -> &dyn PoiFilter {
        self.filters[id.0].as_ref()
    }
}

/// Filter defined in the config file.
///
/// Matches POIs whose `id` is one of `ids` (any id when empty) and whose
/// fields equal every entry of `where`, then renders `{Field}` placeholders
/// of the text templates from the POI. Text that renders blank excludes the
/// POI.
///
/// `polyline` names a POI field holding a list of points (`{x, y, z}`
/// objects or 3-element lists); the line is drawn in `color`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FieldFilter {
    #[serde(default)]
    pub ids: Vec<String>,
    #[serde(rename = "where", default)]
    pub conditions: BTreeMap<String, Value>,
    pub text: String,
    pub hovertext: Option<String>,
    pub icon: Option<String>,
    pub color: Option<String>,
    pub polyline: Option<String>,
}

impl FieldFilter {
    fn matches(&self, poi: &Poi) -> bool {
        let id_ok = self.ids.is_empty() || self.ids.iter().any(|id| id == poi.id());
        id_ok
            && self
                .conditions
                .iter()
                .all(|(key, want)| poi.get(key) == Some(want))
    }
}

impl PoiFilter for FieldFilter {
    fn classify(&self, poi: &Poi) -> anyhow::Result<Option<FilterOutcome>> {
        if !self.matches(poi) {
            return Ok(None);
        }

        let text = render_template(&self.text, poi);
        if text.trim().is_empty() {
            return Ok(None);
        }

        let polyline = match self.polyline.as_deref() {
            Some(field) => polyline_points(poi, field)?,
            None => None,
        };

        if self.hovertext.is_none() && self.icon.is_none() && polyline.is_none() {
            return Ok(Some(FilterOutcome::Text(text)));
        }

        Ok(Some(FilterOutcome::Structured(Structured {
            text,
            hovertext: self.hovertext.as_deref().map(|t| render_template(t, poi)),
            polyline,
            color: self.color.clone(),
            icon: self.icon.clone(),
        })))
    }
}

/// Points of the polyline stored in `field`. A POI without the field is
/// drawn as a plain marker; a malformed list is an error.
fn polyline_points(poi: &Poi, field: &str) -> anyhow::Result<Option<Vec<Position>>> {
    let Some(value) = poi.get(field) else {
        return Ok(None);
    };

    let Value::Array(items) = value else {
        anyhow::bail!("polyline field '{field}' is not a list");
    };

    items
        .iter()
        .enumerate()
        .map(|(i, item)| {
            Position::from_value(item)
                .ok_or_else(|| anyhow::anyhow!("polyline field '{field}' has a bad point at {i}"))
        })
        .collect::<anyhow::Result<Vec<_>>>()
        .map(Some)
}

/// Substitute `{Field}` placeholders with POI values. `{{` and `}}` are
/// literal braces; an unterminated placeholder is copied verbatim.
pub fn render_template(template: &str, poi: &Poi) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(i) = rest.find(['{', '}']) {
        out.push_str(&rest[..i]);
        let tail = &rest[i..];

        if tail.starts_with("{{") || tail.starts_with("}}") {
            out.push_str(&tail[..1]);
            rest = &tail[2..];
            continue;
        }

        if tail.starts_with('}') {
            out.push('}');
            rest = &tail[1..];
            continue;
        }

        match tail.find('}') {
            Some(end) => {
                out.push_str(&field_text(poi.get(&tail[1..end])));
                rest = &tail[end + 1..];
            }
            None => {
                out.push_str(tail);
                rest = "";
            }
        }
    }

    out.push_str(rest);
    out
}

fn field_text(value: Option<&Value>) -> String {
    match value {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(s)) => plain_text(s),
        Some(Value::Number(n)) => n.to_string(),
        Some(Value::Bool(b)) => b.to_string(),
        Some(other) => other.to_string(),
    }
}

/// Signs store JSON text components (`{"text":"hi","extra":[..]}` or a
/// quoted string) since 1.8; flatten those to their plain text.
fn plain_text(raw: &str) -> String {
    let looks_like_json = raw.starts_with('{') || raw.starts_with('"') || raw.starts_with('[');
    match looks_like_json.then(|| serde_json::from_str::<Value>(raw)) {
        Some(Ok(component)) => flatten_component(&component),
        _ => raw.to_string(),
    }
}

fn flatten_component(component: &Value) -> String {
    match component {
        Value::String(s) => s.clone(),
        Value::Array(parts) => parts.iter().map(flatten_component).collect(),
        Value::Object(obj) => {
            let mut out = obj
                .get("text")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string();
            if let Some(Value::Array(extra)) = obj.get("extra") {
                out.extend(extra.iter().map(flatten_component));
            }
            out
        }
        _ => String::new(),
    }
}
