//! # Object cache
//!
//! Flat table of every element seen so far, keyed by composite id. Ways and
//! relations point at their children by id and children keep the reverse
//! `member_of` list, so the member graph never holds references into the
//! table.
//!
//! ## Sub-modules
//! - `propagate`: re-deriving a parent's geometry and bounds from its members
//! - `intersects`: tri-state bbox test that copes with partial knowledge
//! - `query_cache`: per filter-string record of which regions were fetched

mod intersects;
mod propagate;
mod query_cache;

use std::collections::{BTreeMap, HashMap, VecDeque};

pub use intersects::*;
pub use query_cache::*;

use crate::error::{OverpassError, Result};
use crate::types::{
    BoundingBox, Coord, Element, Feature, FeatureData, FeatureKind, Member, Meta, OsmId,
    Properties, RawMember, subtract_bbox,
};

/// What the cache knows about an id.
#[derive(Debug, Clone, PartialEq)]
pub enum CacheEntry {
    /// The service was asked and did not return it.
    Missing,
    Known(Feature),
}

/// Result of a cache lookup. `Unknown` means "never asked", which is
/// different from `Missing`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Lookup<'a> {
    Unknown,
    Missing,
    Found(&'a Feature),
}

/// How the result section an element arrived in scopes its merge.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UpsertOptions {
    /// Properties the query asked for.
    pub properties: Properties,
    /// The bbox filter of the owning request, if any.
    pub bbox: Option<BoundingBox>,
    /// Elements in this section matched the ids but not the bbox.
    pub bbox_no_match: bool,
}

impl UpsertOptions {
    pub fn new(properties: Properties) -> Self {
        Self {
            properties,
            bbox: None,
            bbox_no_match: false,
        }
    }

    /// Used for children pulled in through a parent: nothing but what the
    /// element itself carries is known.
    pub fn id_only() -> Self {
        Self::new(Properties::ID_ONLY)
    }
}

#[derive(Debug, Default)]
pub struct ObjectCache {
    elements: HashMap<OsmId, CacheEntry>,
}

impl ObjectCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.elements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }

    pub fn get(&self, id: &OsmId) -> Lookup<'_> {
        match self.elements.get(id) {
            None => Lookup::Unknown,
            Some(CacheEntry::Missing) => Lookup::Missing,
            Some(CacheEntry::Known(feature)) => Lookup::Found(feature),
        }
    }

    pub fn feature(&self, id: &OsmId) -> Option<&Feature> {
        match self.elements.get(id) {
            Some(CacheEntry::Known(feature)) => Some(feature),
            _ => None,
        }
    }

    fn feature_mut(&mut self, id: &OsmId) -> Option<&mut Feature> {
        match self.elements.get_mut(id) {
            Some(CacheEntry::Known(feature)) => Some(feature),
            _ => None,
        }
    }

    /// Records that the service has no element with this id. Never
    /// overwrites a feature that is already known.
    pub fn mark_missing(&mut self, id: OsmId) {
        self.elements.entry(id).or_insert(CacheEntry::Missing);
    }

    /// Drops a "known missing" sentinel so the id is asked for again.
    pub fn forget_missing(&mut self, id: &OsmId) {
        if matches!(self.elements.get(id), Some(CacheEntry::Missing)) {
            self.elements.remove(id);
        }
    }

    /// Removes entries so they are fetched again. Returns how many were present.
    ///
    /// A member of a way or relation is reset to a placeholder that keeps its
    /// `member_of` edges, so a later fetch still reaches its parents.
    pub fn evict<'a>(&mut self, ids: impl IntoIterator<Item = &'a OsmId>) -> usize {
        let mut removed = 0;
        for id in ids {
            let Some(entry) = self.elements.remove(id) else {
                continue;
            };
            removed += 1;
            if let CacheEntry::Known(feature) = entry {
                if !feature.member_of.is_empty() {
                    let mut placeholder = Feature::placeholder(*id);
                    placeholder.member_of = feature.member_of;
                    self.elements.insert(*id, CacheEntry::Known(placeholder));
                }
            }
        }
        tracing::debug!("Evicted {} cache entries", removed);
        removed
    }

    /// Merges a raw element into the cache and propagates geometry changes
    /// up the member graph.
    pub fn upsert(&mut self, el: &Element, options: &UpsertOptions) -> Result<OsmId> {
        let id = el.osm_id().ok_or_else(|| {
            OverpassError::Decode(format!(
                "element of type '{}' without a usable id",
                el.type_field
            ))
        })?;

        let mut changed = self.merge_element(id, el, options);
        let mut queue = VecDeque::new();

        if let Some(nodes) = &el.nodes {
            if id.kind == FeatureKind::Line {
                self.attach_way_nodes(id, nodes, el.geometry.as_deref(), &mut queue);
            }
        }
        if options.properties.contains(Properties::MEMBERS) {
            if let Some(members) = &el.members {
                self.attach_relation_members(id, members, &mut queue);
            }
        }

        changed |= self.recompute(id);
        if changed {
            queue.extend(self.parents_of(&id));
        }
        self.propagate(queue);

        Ok(id)
    }

    fn parents_of(&self, id: &OsmId) -> Vec<OsmId> {
        let mut parents: Vec<OsmId> = self
            .feature(id)
            .map(|f| f.member_of.iter().map(|m| m.parent).collect())
            .unwrap_or_default();
        parents.sort();
        parents.dedup();
        parents
    }

    /// Applies the element's own fields. Returns true when anything that
    /// parents derive from (position, bounds, completeness) changed.
    fn merge_element(&mut self, id: OsmId, el: &Element, options: &UpsertOptions) -> bool {
        let entry = self
            .elements
            .entry(id)
            .or_insert_with(|| CacheEntry::Known(Feature::placeholder(id)));
        if matches!(entry, CacheEntry::Missing) {
            *entry = CacheEntry::Known(Feature::placeholder(id));
        }
        let CacheEntry::Known(feature) = entry else {
            return false;
        };

        let before = (feature.properties, feature.bounds);

        match &mut feature.data {
            FeatureData::Point { coord } => {
                if let Some(c) = el.coord() {
                    if !feature.properties.contains(Properties::GEOM) {
                        *coord = Some(c);
                        feature.bounds = Some(BoundingBox::from_coord(c));
                        feature.center = Some(c);
                        feature.properties |= Properties::DERIVED;
                    }
                }
            }
            FeatureData::Line { members, geometry } => {
                if members.is_none() {
                    if let Some(nodes) = &el.nodes {
                        *members = Some(
                            nodes
                                .iter()
                                .enumerate()
                                .map(|(sequence, n)| Member {
                                    id: OsmId::node(*n),
                                    role: None,
                                    sequence,
                                })
                                .collect(),
                        );
                    }
                }
                if let Some(geom) = &el.geometry {
                    if !feature.properties.contains(Properties::GEOM) && !geom.is_empty() {
                        if geom.iter().all(Option::is_some) {
                            feature.properties |= Properties::GEOM;
                        }
                        *geometry = Some(geom.clone());
                    }
                }
            }
            FeatureData::Area { members, .. } => {
                if members.is_none() && options.properties.contains(Properties::MEMBERS) {
                    if let Some(raw) = &el.members {
                        *members = Some(
                            raw.iter()
                                .enumerate()
                                .filter_map(|(sequence, m)| {
                                    Some(Member {
                                        id: m.osm_id()?,
                                        role: Some(m.role.clone()),
                                        sequence,
                                    })
                                })
                                .collect(),
                        );
                    }
                }
            }
        }

        if let Some(bounds) = el.bounds {
            if !feature.properties.contains(Properties::BBOX) {
                feature.bounds = Some(bounds);
                feature.properties |= Properties::BBOX;
            }
            if !feature.properties.contains(Properties::CENTER) {
                feature.center = Some(bounds.center());
                feature.properties |= Properties::CENTER;
            }
        } else if let Some(center) = el.center {
            if !feature.properties.contains(Properties::CENTER) {
                feature.center = Some(center);
                feature.properties |= Properties::CENTER;
            }
        }

        // Outside the request's bbox only the bounds count as loaded.
        let outside = match (&options.bbox, feature.bounds) {
            (Some(bbox), Some(bounds)) if feature.properties.contains(Properties::BBOX) => {
                !bbox.intersects(&bounds)
            }
            _ => false,
        };
        let granted = if outside {
            Properties::ID_ONLY
        } else {
            options.properties - Properties::DERIVED
        };
        feature.properties |= granted;

        if let Some(tags) = &el.tags {
            feature.tags = Some(tags.clone());
        } else if granted.contains(Properties::TAGS) && feature.tags.is_none() {
            feature.tags = Some(BTreeMap::new());
        }
        if let Some(meta) = Meta::from_element(el) {
            feature.meta = Some(meta);
        }

        if options.bbox_no_match && !feature.properties.contains(Properties::GEOM) {
            if let (Some(bbox), Some(bounds)) = (&options.bbox, feature.bounds) {
                let region = feature
                    .bounds_possible_match
                    .take()
                    .unwrap_or_else(|| bounds.to_multi_polygon());
                feature.bounds_possible_match = Some(subtract_bbox(&region, bbox));
            }
        }
        if feature.properties.contains(Properties::GEOM) {
            feature.bounds_possible_match = None;
        }

        before != (feature.properties, feature.bounds)
    }

    /// Way decomposition: every node gets an entry (a placeholder, or a
    /// positioned node when the way came with `out geom`) and a back edge.
    fn attach_way_nodes(
        &mut self,
        way: OsmId,
        nodes: &[u64],
        geometry: Option<&[Option<Coord>]>,
        queue: &mut VecDeque<OsmId>,
    ) {
        for (sequence, node) in nodes.iter().enumerate() {
            let coord = geometry.and_then(|g| g.get(sequence).copied().flatten());
            let node_id = OsmId::node(*node);
            let element = Element::node(*node, coord);
            let changed = self.merge_element(node_id, &element, &UpsertOptions::id_only());
            if let Some(feature) = self.feature_mut(&node_id) {
                feature.add_member_of(way, None, sequence);
            }
            if changed {
                queue.extend(self.parents_of(&node_id).into_iter().filter(|p| *p != way));
            }
        }
    }

    fn attach_relation_members(
        &mut self,
        relation: OsmId,
        members: &[RawMember],
        queue: &mut VecDeque<OsmId>,
    ) {
        for (sequence, member) in members.iter().enumerate() {
            let Some(member_id) = member.osm_id() else {
                tracing::warn!("Skipping member of {} with type '{}'", relation, member.type_field);
                continue;
            };
            let changed = self.merge_element(
                member_id,
                &Element::from_member(member),
                &UpsertOptions::id_only(),
            );
            if let Some(feature) = self.feature_mut(&member_id) {
                feature.add_member_of(relation, Some(member.role.clone()), sequence);
            }
            if changed {
                // the member itself may need to derive bounds from fresh geometry
                queue.push_back(member_id);
                queue.extend(self.parents_of(&member_id).into_iter().filter(|p| *p != relation));
            }
        }
    }

    /// Re-derives every queued feature and walks up to the parents of those
    /// that changed. Terminates because derived state only ever grows.
    fn propagate(&mut self, mut queue: VecDeque<OsmId>) {
        while let Some(id) = queue.pop_front() {
            if self.recompute(id) {
                queue.extend(self.parents_of(&id));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use geo::Area;
    use serde_json::json;

    fn el(value: serde_json::Value) -> Element {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn missing_is_not_unknown() {
        let mut cache = ObjectCache::new();
        assert_eq!(cache.get(&OsmId::node(1)), Lookup::Unknown);
        cache.mark_missing(OsmId::node(1));
        assert_eq!(cache.get(&OsmId::node(1)), Lookup::Missing);
        cache.forget_missing(&OsmId::node(1));
        assert_eq!(cache.get(&OsmId::node(1)), Lookup::Unknown);
    }

    #[test]
    fn properties_only_grow() {
        let mut cache = ObjectCache::new();
        let node = el(json!({"type": "node", "id": 1, "lat": 1.0, "lon": 2.0, "tags": {"a": "b"}}));
        cache.upsert(&node, &UpsertOptions::new(Properties::DEFAULT)).unwrap();
        let first = cache.feature(&OsmId::node(1)).unwrap().clone();
        assert!(first.has(Properties::TAGS | Properties::GEOM | Properties::BBOX));

        let bare = el(json!({"type": "node", "id": 1}));
        cache.upsert(&bare, &UpsertOptions::id_only()).unwrap();
        let second = cache.feature(&OsmId::node(1)).unwrap();
        assert_eq!(second.properties, first.properties);
        assert_eq!(second.coord(), Some(Coord::new(1.0, 2.0)));
        assert_eq!(second.tags, first.tags);
    }

    #[test]
    fn way_nodes_become_placeholders_with_back_edges() {
        let mut cache = ObjectCache::new();
        let way = el(json!({"type": "way", "id": 5, "nodes": [2, 3], "tags": {}}));
        cache.upsert(&way, &UpsertOptions::new(Properties::DEFAULT)).unwrap();

        let n3 = cache.feature(&OsmId::node(3)).unwrap();
        assert_eq!(n3.properties, Properties::ID_ONLY);
        assert_eq!(n3.member_of[0].parent, OsmId::way(5));
        assert_eq!(n3.member_of[0].sequence, 1);
        assert!(!cache.feature(&OsmId::way(5)).unwrap().has(Properties::GEOM));
    }

    #[test]
    fn node_arrival_completes_way_geometry() {
        let mut cache = ObjectCache::new();
        cache
            .upsert(
                &el(json!({"type": "way", "id": 5, "nodes": [2, 3]})),
                &UpsertOptions::new(Properties::MEMBERS),
            )
            .unwrap();
        cache
            .upsert(
                &el(json!({"type": "node", "id": 2, "lat": 0.0, "lon": 0.0})),
                &UpsertOptions::new(Properties::GEOM),
            )
            .unwrap();

        let way = cache.feature(&OsmId::way(5)).unwrap();
        assert!(!way.has(Properties::GEOM));
        assert!(!way.has(Properties::BBOX));
        assert!(way.bounds.is_some());

        cache
            .upsert(
                &el(json!({"type": "node", "id": 3, "lat": 1.0, "lon": 1.0})),
                &UpsertOptions::new(Properties::GEOM),
            )
            .unwrap();
        let way = cache.feature(&OsmId::way(5)).unwrap();
        assert!(way.has(Properties::GEOM | Properties::BBOX | Properties::CENTER));
        assert_eq!(way.bounds, Some(BoundingBox::new(0.0, 0.0, 1.0, 1.0)));
    }

    #[test]
    fn way_with_out_geom_positions_its_nodes() {
        let mut cache = ObjectCache::new();
        let way = el(json!({
            "type": "way", "id": 5, "nodes": [2, 3],
            "geometry": [{"lat": 0.0, "lon": 0.0}, {"lat": 1.0, "lon": 2.0}]
        }));
        cache.upsert(&way, &UpsertOptions::new(Properties::ALL)).unwrap();
        assert!(cache.feature(&OsmId::node(3)).unwrap().has(Properties::GEOM));
        let way = cache.feature(&OsmId::way(5)).unwrap();
        assert!(way.has(Properties::GEOM | Properties::BBOX));
        assert_eq!(way.bounds, Some(BoundingBox::new(0.0, 0.0, 1.0, 2.0)));
    }

    #[test]
    fn geometry_is_frozen_once_complete() {
        let mut cache = ObjectCache::new();
        let way = el(json!({
            "type": "way", "id": 5,
            "geometry": [{"lat": 0.0, "lon": 0.0}, {"lat": 1.0, "lon": 2.0}]
        }));
        cache.upsert(&way, &UpsertOptions::new(Properties::GEOM)).unwrap();
        let frozen = cache.feature(&OsmId::way(5)).unwrap().data.clone();

        let moved = el(json!({
            "type": "way", "id": 5,
            "geometry": [{"lat": 9.0, "lon": 9.0}, {"lat": 9.5, "lon": 9.5}]
        }));
        cache.upsert(&moved, &UpsertOptions::new(Properties::GEOM)).unwrap();
        assert_eq!(cache.feature(&OsmId::way(5)).unwrap().data, frozen);
    }

    #[test]
    fn exclusion_shrinks_possible_match() {
        let mut cache = ObjectCache::new();
        let way = el(json!({
            "type": "way", "id": 5,
            "bounds": {"minlat": 0.0, "minlon": 0.0, "maxlat": 2.0, "maxlon": 2.0}
        }));
        let mut options = UpsertOptions::new(Properties::BBOX);
        options.bbox_no_match = true;

        options.bbox = Some(BoundingBox::new(0.0, 0.0, 1.0, 1.0));
        cache.upsert(&way, &options).unwrap();
        let first = cache.feature(&OsmId::way(5)).unwrap();
        let a1 = first.bounds_possible_match.as_ref().unwrap().unsigned_area();
        assert!((a1 - 3.0).abs() < 1e-9);

        options.bbox = Some(BoundingBox::new(1.0, 0.0, 2.0, 1.0));
        cache.upsert(&way, &options).unwrap();
        let second = cache.feature(&OsmId::way(5)).unwrap();
        let a2 = second.bounds_possible_match.as_ref().unwrap().unsigned_area();
        assert!(a2 <= a1);
        assert!((a2 - 2.0).abs() < 1e-9);
        assert_eq!(second.kind(), FeatureKind::Line);
    }

    #[test]
    fn outside_bbox_only_grants_bounds() {
        let mut cache = ObjectCache::new();
        let node = el(json!({"type": "node", "id": 1, "lat": 5.0, "lon": 5.0, "tags": {"x": "y"}}));
        let mut options = UpsertOptions::new(Properties::TAGS | Properties::MEMBERS);
        options.bbox = Some(BoundingBox::new(0.0, 0.0, 1.0, 1.0));
        cache.upsert(&node, &options).unwrap();
        let f = cache.feature(&OsmId::node(1)).unwrap();
        assert!(f.has(Properties::BBOX | Properties::CENTER));
        assert!(!f.has(Properties::MEMBERS));
    }

    #[test]
    fn evict_forces_refetch() {
        let mut cache = ObjectCache::new();
        cache
            .upsert(&el(json!({"type": "node", "id": 1})), &UpsertOptions::id_only())
            .unwrap();
        assert_eq!(cache.evict(&[OsmId::node(1), OsmId::node(2)]), 1);
        assert_eq!(cache.get(&OsmId::node(1)), Lookup::Unknown);
    }

    #[test]
    fn evicted_member_still_completes_its_way() {
        let mut cache = ObjectCache::new();
        let props = UpsertOptions::new(Properties::DEFAULT);
        cache
            .upsert(&el(json!({"type": "way", "id": 5, "nodes": [2, 3]})), &props)
            .unwrap();
        cache
            .upsert(&el(json!({"type": "node", "id": 3, "lat": 1.0, "lon": 1.0})), &props)
            .unwrap();

        assert_eq!(cache.evict(&[OsmId::node(2)]), 1);
        let n2 = cache.feature(&OsmId::node(2)).unwrap();
        assert_eq!(n2.properties, Properties::ID_ONLY);
        assert_eq!(n2.member_of.len(), 1);

        cache
            .upsert(&el(json!({"type": "node", "id": 2, "lat": 0.0, "lon": 0.0})), &props)
            .unwrap();
        assert!(cache.feature(&OsmId::way(5)).unwrap().has(Properties::GEOM));
    }

    #[test]
    fn rejects_elements_without_id() {
        let mut cache = ObjectCache::new();
        let err = cache
            .upsert(&el(json!({"type": "area", "id": 1})), &UpsertOptions::id_only())
            .unwrap_err();
        assert!(matches!(err, OverpassError::Decode(_)));
    }
}
