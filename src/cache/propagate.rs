use crate::types::{
    BoundingBox, Coord, Feature, FeatureData, FeatureKind, KnownArea, OsmId, Properties,
};

use super::ObjectCache;

/// What a parent reads from one of its members.
struct MemberState {
    kind: FeatureKind,
    complete: bool,
    bbox_known: bool,
    bounds: Option<BoundingBox>,
    coord: Option<Coord>,
    geometries: Vec<geo::Geometry<f64>>,
}

impl MemberState {
    fn of(feature: &Feature) -> Self {
        Self {
            kind: feature.kind(),
            complete: feature.has(Properties::GEOM),
            bbox_known: feature.has(Properties::BBOX),
            bounds: feature.bounds,
            coord: feature.coord(),
            geometries: if feature.kind() == FeatureKind::Area {
                vec![]
            } else {
                feature.own_geometries()
            },
        }
    }
}

impl ObjectCache {
    fn member_state(&self, id: &OsmId) -> Option<MemberState> {
        self.feature(id).map(MemberState::of)
    }

    /// Re-derives geometry, bounds and center of `id` from its members.
    /// Returns true when anything its own parents depend on changed.
    pub(super) fn recompute(&mut self, id: OsmId) -> bool {
        let Some(feature) = self.feature(&id) else {
            return false;
        };
        let member_ids = feature.member_ids().unwrap_or_default();
        let before = signature(feature);

        // Reads happen first so the mutable borrow below is the only one.
        let states: Vec<Option<MemberState>> =
            member_ids.iter().map(|m| self.member_state(m)).collect();

        let Some(feature) = self.feature_mut(&id) else {
            return false;
        };
        match feature.kind() {
            FeatureKind::Point => {}
            FeatureKind::Line => recompute_line(feature, &states),
            FeatureKind::Area => recompute_area(feature, &states),
        }

        if feature.has(Properties::GEOM) {
            feature.bounds_possible_match = None;
        }

        before != signature(feature)
    }
}

/// Completeness, bounds and how many member slots are resolved. Derived state
/// only grows, so comparing this is enough to detect change and guarantees
/// propagation stops.
fn signature(feature: &Feature) -> (Properties, Option<BoundingBox>, usize) {
    let resolved = match &feature.data {
        FeatureData::Point { coord } => usize::from(coord.is_some()),
        FeatureData::Line { geometry, .. } => geometry
            .as_ref()
            .map(|g| g.iter().filter(|c| c.is_some()).count())
            .unwrap_or(0),
        FeatureData::Area { geometry, .. } => geometry.as_ref().map(Vec::len).unwrap_or(0),
    };
    (feature.properties, feature.bounds, resolved)
}

fn recompute_line(feature: &mut Feature, nodes: &[Option<MemberState>]) {
    let complete = feature.has(Properties::GEOM);
    let FeatureData::Line { members, geometry } = &mut feature.data else {
        return;
    };

    if !complete && members.is_some() && !nodes.is_empty() {
        let coords: Vec<Option<Coord>> = nodes
            .iter()
            .map(|n| n.as_ref().and_then(|n| n.coord))
            .collect();
        if coords.iter().any(Option::is_some) {
            if coords.iter().all(Option::is_some) {
                feature.properties |= Properties::GEOM;
            }
            *geometry = Some(coords);
        }
    }

    // Partial geometry gives a lower bound for the bounds; only a complete
    // one makes them authoritative.
    if !feature.properties.contains(Properties::BBOX) {
        if let Some(geometry) = geometry {
            if let Some(bounds) = BoundingBox::from_coords(geometry.iter().flatten()) {
                feature.bounds = Some(bounds);
                if feature.properties.contains(Properties::GEOM) {
                    feature.properties |= Properties::BBOX;
                }
            }
        }
    }
    if !feature.properties.contains(Properties::CENTER) {
        if let Some(bounds) = feature.bounds {
            feature.center = Some(bounds.center());
            if feature.properties.contains(Properties::GEOM) {
                feature.properties |= Properties::CENTER;
            }
        }
    }
}

fn recompute_area(feature: &mut Feature, members: &[Option<MemberState>]) {
    let has_members = feature.members().is_some();

    if has_members && !feature.has(Properties::GEOM) {
        let mut geometries = Vec::new();
        let mut complete = true;
        for member in members {
            match member {
                Some(m) if m.kind == FeatureKind::Area => {}
                Some(m) => {
                    geometries.extend(m.geometries.iter().cloned());
                    complete &= m.complete;
                }
                None => complete = false,
            }
        }
        if let FeatureData::Area { geometry, .. } = &mut feature.data {
            if !geometries.is_empty() || complete {
                *geometry = Some(geometries);
            }
        }
        if complete {
            feature.properties |= Properties::GEOM;
        }
    }

    if has_members && !feature.has(Properties::BBOX) {
        let mut bounds: Option<BoundingBox> = None;
        let mut all_known = true;
        for member in members {
            match member.as_ref().and_then(|m| m.bounds.map(|b| (b, m.bbox_known))) {
                Some((b, known)) => {
                    bounds = Some(bounds.map_or(b, |acc| acc.union(&b)));
                    all_known &= known;
                }
                None => all_known = false,
            }
        }
        if let Some(bounds) = bounds {
            feature.bounds = Some(bounds);
            if all_known {
                feature.properties |= Properties::BBOX | Properties::CENTER;
                feature.center = Some(bounds.center());
            }
        }
    }

    // Members that still might show up anywhere inside the relation.
    let Some(outer) = feature.bounds.filter(|_| feature.has(Properties::BBOX)) else {
        return;
    };
    let estimate = if has_members {
        let uncertain: Vec<BoundingBox> = members
            .iter()
            .filter_map(|member| match member {
                Some(m) if m.kind != FeatureKind::Area && m.complete => None,
                Some(m) if m.bbox_known => m.bounds,
                _ => Some(outer),
            })
            .collect();
        KnownArea::from_uncertain(&uncertain)
    } else {
        KnownArea::outside(&outer)
    };
    if let FeatureData::Area {
        known_member_area, ..
    } = &mut feature.data
    {
        match known_member_area {
            Some(known) => known.merge(&estimate),
            None => *known_member_area = Some(estimate),
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::cache::{ObjectCache, UpsertOptions};
    use crate::types::{BoundingBox, Element, FeatureData, OsmId, Properties};
    use serde_json::json;

    fn el(value: serde_json::Value) -> Element {
        serde_json::from_value(value).unwrap()
    }

    fn relation_of_two_ways(cache: &mut ObjectCache) {
        cache
            .upsert(
                &el(json!({
                    "type": "relation", "id": 9,
                    "members": [
                        {"type": "way", "ref": 1, "role": "outer"},
                        {"type": "way", "ref": 2, "role": "outer"}
                    ]
                })),
                &UpsertOptions::new(Properties::MEMBERS),
            )
            .unwrap();
    }

    #[test]
    fn relation_completes_when_members_do() {
        let mut cache = ObjectCache::new();
        relation_of_two_ways(&mut cache);
        assert!(!cache.feature(&OsmId::relation(9)).unwrap().has(Properties::GEOM));

        cache
            .upsert(
                &el(json!({"type": "way", "id": 1,
                    "geometry": [{"lat": 0.0, "lon": 0.0}, {"lat": 1.0, "lon": 1.0}]})),
                &UpsertOptions::new(Properties::GEOM),
            )
            .unwrap();
        let relation = cache.feature(&OsmId::relation(9)).unwrap();
        assert!(!relation.has(Properties::GEOM));
        assert!(!relation.has(Properties::BBOX));
        assert_eq!(relation.bounds, Some(BoundingBox::new(0.0, 0.0, 1.0, 1.0)));

        cache
            .upsert(
                &el(json!({"type": "way", "id": 2,
                    "geometry": [{"lat": 1.0, "lon": 1.0}, {"lat": 2.0, "lon": 3.0}]})),
                &UpsertOptions::new(Properties::GEOM),
            )
            .unwrap();
        let relation = cache.feature(&OsmId::relation(9)).unwrap();
        assert!(relation.has(Properties::GEOM | Properties::BBOX | Properties::CENTER));
        assert_eq!(relation.bounds, Some(BoundingBox::new(0.0, 0.0, 2.0, 3.0)));
        match &relation.data {
            FeatureData::Area { geometry, .. } => assert_eq!(geometry.as_ref().unwrap().len(), 2),
            other => panic!("unexpected data {:?}", other),
        }
    }

    #[test]
    fn node_updates_reach_relations_through_ways() {
        let mut cache = ObjectCache::new();
        cache
            .upsert(
                &el(json!({"type": "relation", "id": 9,
                    "members": [{"type": "way", "ref": 1, "role": ""}]})),
                &UpsertOptions::new(Properties::MEMBERS),
            )
            .unwrap();
        cache
            .upsert(
                &el(json!({"type": "way", "id": 1, "nodes": [10, 11]})),
                &UpsertOptions::new(Properties::MEMBERS),
            )
            .unwrap();
        for (id, lat) in [(10, 0.0), (11, 1.0)] {
            cache
                .upsert(
                    &el(json!({"type": "node", "id": id, "lat": lat, "lon": lat})),
                    &UpsertOptions::new(Properties::GEOM),
                )
                .unwrap();
        }
        assert!(cache.feature(&OsmId::way(1)).unwrap().has(Properties::GEOM));
        let relation = cache.feature(&OsmId::relation(9)).unwrap();
        assert!(relation.has(Properties::GEOM | Properties::BBOX));
    }

    #[test]
    fn self_referencing_relation_terminates() {
        let mut cache = ObjectCache::new();
        cache
            .upsert(
                &el(json!({"type": "relation", "id": 9, "members": [
                    {"type": "relation", "ref": 9, "role": "subarea"},
                    {"type": "node", "ref": 1, "role": "", "lat": 1.0, "lon": 1.0}
                ]})),
                &UpsertOptions::new(Properties::MEMBERS),
            )
            .unwrap();
        let relation = cache.feature(&OsmId::relation(9)).unwrap();
        // nested relations do not block completeness of the own geometry
        assert!(relation.has(Properties::GEOM));
    }
}
