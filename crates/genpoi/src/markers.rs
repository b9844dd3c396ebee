//! Marker sets and the records accumulated into them.

use log::info;
use serde::Serialize;
use std::collections::btree_map::Entry;
use std::collections::BTreeMap;

use crate::error::{Error, Result};
use crate::extract::Progress;
use crate::filter::{apply, FilterId, FilterRegistry, MarkerRecord};
use crate::poi::Poi;
use crate::world::RegionSetId;

/// Replace everything that is not safe in an identifier with `_`.
pub fn sanitize(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' || c == '-' { c } else { '_' })
        .collect()
}

/// Identity of a marker set.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct MarkerSetKey {
    pub display_name: String,
    pub filter: FilterId,
    pub regionset: RegionSetId,
}

impl MarkerSetKey {
    /// `<sanitized name>_<filter id>_<region set id>`.
    pub fn internal_name(&self) -> String {
        format!(
            "{}_{}_{}",
            sanitize(&self.display_name),
            self.filter,
            self.regionset
        )
    }
}

/// One entry of `markersDB.js`.
#[derive(Debug, Clone, Serialize)]
pub struct MarkerSet {
    pub created: bool,
    pub name: String,
    pub raw: Vec<MarkerRecord>,
    #[serde(skip)]
    key: MarkerSetKey,
    #[serde(skip)]
    internal: String,
}

impl MarkerSet {
    pub fn key(&self) -> &MarkerSetKey {
        &self.key
    }

    pub fn internal_name(&self) -> &str {
        &self.internal
    }

    /// Classify `pois` into this set (the manual POIs of a render).
    pub fn seed(&mut self, filters: &FilterRegistry, pois: &[Poi]) -> Result<()> {
        let filter = filters.get(self.key.filter);
        for poi in pois {
            if let Some(record) = apply(filter, poi)? {
                self.raw.push(record);
            }
        }
        Ok(())
    }
}

/// Append-only store of marker sets, keyed by internal name.
#[derive(Debug, Default)]
pub struct MarkerAggregator {
    sets: BTreeMap<String, MarkerSet>,
    by_regionset: BTreeMap<RegionSetId, Vec<(String, FilterId)>>,
}

impl MarkerAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a marker set and return it. Registering the same key again
    /// returns the existing set; a different key that sanitizes to the same
    /// name is a configuration error.
    pub fn register(&mut self, key: MarkerSetKey) -> Result<&mut MarkerSet> {
        match self.sets.entry(key.internal_name()) {
            Entry::Occupied(entry) => {
                let existing = entry.into_mut();
                if existing.key != key {
                    return Err(Error::MarkerSetCollision {
                        internal: existing.internal.clone(),
                        first: existing.key.display_name.clone(),
                        second: key.display_name,
                    });
                }
                Ok(existing)
            }
            Entry::Vacant(entry) => {
                let internal = entry.key().clone();
                self.by_regionset
                    .entry(key.regionset)
                    .or_default()
                    .push((internal.clone(), key.filter));

                Ok(entry.insert(MarkerSet {
                    created: false,
                    name: key.display_name.clone(),
                    raw: Vec::new(),
                    key,
                    internal,
                }))
            }
        }
    }

    /// Classify `pois` against every marker set registered for `regionset`.
    /// Returns the number of POIs processed.
    pub fn classify<'a>(
        &mut self,
        regionset: RegionSetId,
        filters: &FilterRegistry,
        pois: impl IntoIterator<Item = &'a Poi>,
    ) -> Result<usize> {
        let Some(assignments) = self.by_regionset.get(&regionset) else {
            return Ok(0);
        };

        let mut progress = Progress::new();
        for poi in pois {
            for (internal, filter) in assignments {
                if let Some(record) = apply(filters.get(*filter), poi)? {
                    if let Some(set) = self.sets.get_mut(internal) {
                        set.raw.push(record);
                    }
                }
            }

            if let Some(n) = progress.bump() {
                info!("Processed {} POIs so far in region set {}", n, regionset);
            }
        }

        Ok(progress.count())
    }

    pub fn regionsets(&self) -> impl Iterator<Item = RegionSetId> + '_ {
        self.by_regionset.keys().copied()
    }

    pub fn get(&self, internal: &str) -> Option<&MarkerSet> {
        self.sets.get(internal)
    }

    pub fn sets(&self) -> &BTreeMap<String, MarkerSet> {
        &self.sets
    }

    pub fn record_count(&self) -> usize {
        self.sets.values().map(|s| s.raw.len()).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::FilterOutcome;
    use serde_json::json;
    use std::sync::Arc;

    fn poi(id: &str) -> Poi {
        serde_json::from_value(json!({"id": id, "x": 1, "y": 2, "z": 3})).unwrap()
    }

    fn registry() -> (FilterRegistry, FilterId, FilterId) {
        let mut registry = FilterRegistry::new();
        let chests = registry.register(
            "chests",
            Arc::new(|p: &Poi| (p.id() == "Chest").then(|| FilterOutcome::Text("Chest".into()))),
        );
        let signs = registry.register(
            "signs",
            Arc::new(|p: &Poi| (p.id() == "Sign").then(|| FilterOutcome::Text("Sign".into()))),
        );
        (registry, chests, signs)
    }

    fn key(name: &str, filter: FilterId, rset: usize) -> MarkerSetKey {
        MarkerSetKey {
            display_name: name.into(),
            filter,
            regionset: RegionSetId(rset),
        }
    }

    #[test]
    fn sanitizes_unsafe_characters() {
        assert_eq!(sanitize("My Signs (old)"), "My_Signs__old_");
        assert_eq!(sanitize("a-b_c9"), "a-b_c9");
        assert_eq!(sanitize("häuser"), "h_user");
    }

    fn register(agg: &mut MarkerAggregator, key: MarkerSetKey) -> String {
        agg.register(key).unwrap().internal_name().to_string()
    }

    #[test]
    fn same_name_different_filter_or_regionset_is_distinct() {
        let (filters, chests, signs) = registry();
        let mut agg = MarkerAggregator::new();

        let a = register(&mut agg, key("Stuff", chests, 0));
        let b = register(&mut agg, key("Stuff", signs, 0));
        let c = register(&mut agg, key("Stuff", chests, 1));
        assert_ne!(a, b);
        assert_ne!(a, c);
        assert_ne!(b, c);

        let pois = [poi("Chest"), poi("Sign"), poi("Chest")];
        assert_eq!(agg.classify(RegionSetId(0), &filters, &pois).unwrap(), 3);

        assert_eq!(agg.get(&a).unwrap().raw.len(), 2);
        assert_eq!(agg.get(&b).unwrap().raw.len(), 1);
        assert_eq!(agg.get(&c).unwrap().raw.len(), 0);
        assert_eq!(agg.record_count(), 3);
    }

    #[test]
    fn re_registering_the_same_key_reuses_the_set() {
        let (filters, chests, _) = registry();
        let mut agg = MarkerAggregator::new();

        let first = register(&mut agg, key("Chests", chests, 0));
        let second = register(&mut agg, key("Chests", chests, 0));
        assert_eq!(first, second);
        assert_eq!(agg.sets().len(), 1);

        agg.classify(RegionSetId(0), &filters, &[poi("Chest")]).unwrap();
        assert_eq!(agg.get(&first).unwrap().raw.len(), 1);
    }

    #[test]
    fn sanitization_collisions_are_rejected() {
        let (_, chests, _) = registry();
        let mut agg = MarkerAggregator::new();

        register(&mut agg, key("a b", chests, 0));
        match agg.register(key("a_b", chests, 0)) {
            Err(Error::MarkerSetCollision { internal, .. }) => assert_eq!(internal, "a_b_0_0"),
            Err(other) => panic!("expected collision, got {other:?}"),
            Ok(set) => panic!("expected collision, got set {}", set.internal_name()),
        }
    }

    #[test]
    fn seeding_uses_the_sets_filter() {
        let (filters, chests, _) = registry();
        let mut agg = MarkerAggregator::new();

        let set = agg.register(key("Chests", chests, 0)).unwrap();
        set.seed(&filters, &[poi("Chest"), poi("Sign")]).unwrap();
        assert_eq!(set.raw.len(), 1);
        assert_eq!(set.name, "Chests");
        assert_eq!(set.internal_name(), "Chests_0_0");
        assert!(!set.created);
    }
}
