use std::collections::{HashMap, HashSet};

use geo::{Area, BooleanOps, MultiPolygon};
use rstar::{AABB, RTree, RTreeObject};

use crate::types::{AREA_EPSILON, BoundingBox, OsmId};

/// Result feature of a bbox query, indexed by its bounds.
#[derive(Debug, Clone, PartialEq)]
struct IndexedFeature {
    id: OsmId,
    envelope: AABB<[f64; 2]>,
}

impl RTreeObject for IndexedFeature {
    type Envelope = AABB<[f64; 2]>;

    fn envelope(&self) -> Self::Envelope {
        self.envelope
    }
}

/// Everything remembered for one filter string.
#[derive(Debug)]
pub struct QueryRegion {
    covered: MultiPolygon<f64>,
    index: RTree<IndexedFeature>,
    /// Matches whose bounds were not known when they arrived.
    unbounded: Vec<OsmId>,
    ids: HashSet<OsmId>,
}

impl Default for QueryRegion {
    fn default() -> Self {
        Self {
            covered: MultiPolygon::new(vec![]),
            index: RTree::new(),
            unbounded: Vec::new(),
            ids: HashSet::new(),
        }
    }
}

impl QueryRegion {
    pub fn covered(&self) -> &MultiPolygon<f64> {
        &self.covered
    }

    /// The part of `bbox` not yet fetched for this query.
    pub fn remaining(&self, bbox: &BoundingBox) -> MultiPolygon<f64> {
        bbox.to_multi_polygon().difference(&self.covered)
    }

    pub fn is_covered(&self, bbox: &BoundingBox) -> bool {
        self.remaining(bbox).unsigned_area() <= AREA_EPSILON
    }

    /// Ids that may lie inside `bbox`: those whose bounds overlap it plus
    /// those without bounds.
    pub fn candidates(&self, bbox: &BoundingBox) -> Vec<OsmId> {
        let mut ids: Vec<OsmId> = self
            .index
            .locate_in_envelope_intersecting(&bbox.envelope())
            .map(|f| f.id)
            .collect();
        ids.extend(self.unbounded.iter().copied());
        ids
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }
}

/// Per filter-string memory of fetched regions and their matches. The key
/// is the literal query text, so two spellings of the same filter are
/// cached separately.
#[derive(Debug, Default)]
pub struct QueryCache {
    regions: HashMap<String, QueryRegion>,
}

impl QueryCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn region(&self, query: &str) -> Option<&QueryRegion> {
        self.regions.get(query)
    }

    /// Missing entries count as "nothing covered".
    pub fn remaining(&self, query: &str, bbox: &BoundingBox) -> MultiPolygon<f64> {
        match self.regions.get(query) {
            Some(region) => region.remaining(bbox),
            None => bbox.to_multi_polygon(),
        }
    }

    pub fn is_covered(&self, query: &str, bbox: &BoundingBox) -> bool {
        self.regions
            .get(query)
            .is_some_and(|region| region.is_covered(bbox))
    }

    pub fn candidates(&self, query: &str, bbox: &BoundingBox) -> Vec<OsmId> {
        self.regions
            .get(query)
            .map(|region| region.candidates(bbox))
            .unwrap_or_default()
    }

    /// Remembers a match. Returns false when it was already recorded.
    pub fn record_feature(&mut self, query: &str, id: OsmId, bounds: Option<BoundingBox>) -> bool {
        let region = self.regions.entry(query.to_string()).or_default();
        if !region.ids.insert(id) {
            return false;
        }
        match bounds {
            Some(bounds) => region.index.insert(IndexedFeature {
                id,
                envelope: bounds.envelope(),
            }),
            None => region.unbounded.push(id),
        }
        true
    }

    /// Marks `bbox` as completely fetched for `query`.
    pub fn record_covered(&mut self, query: &str, bbox: &BoundingBox) {
        let region = self.regions.entry(query.to_string()).or_default();
        region.covered = region.covered.union(&bbox.to_multi_polygon());
    }

    /// Forgets everything about one filter string.
    pub fn clear(&mut self, query: &str) -> bool {
        self.regions.remove(query).is_some()
    }

    /// Drops every region that returned one of `ids`; their covered area can
    /// no longer be answered from the object cache.
    pub fn evict(&mut self, ids: &HashSet<OsmId>) {
        self.regions.retain(|query, region| {
            let keep = region.ids.is_disjoint(ids);
            if !keep {
                tracing::debug!("Dropping cached region of query '{}'", query);
            }
            keep
        });
    }
}
