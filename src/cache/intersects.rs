use std::collections::HashSet;

use crate::types::{
    BoundingBox, Feature, FeatureData, FeatureKind, OsmId, Properties, overlaps_with_area,
};

use super::ObjectCache;

/// Answer of a bbox test against a partially known feature.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Intersection {
    Outside = 0,
    /// Not enough data loaded to decide.
    Indeterminate = 1,
    Inside = 2,
}

impl ObjectCache {
    /// Does the feature `id` touch `bbox`? Never answers `Outside` or
    /// `Inside` unless the loaded data proves it.
    pub fn intersects(&self, id: &OsmId, bbox: &BoundingBox) -> Intersection {
        let mut visiting = HashSet::new();
        self.intersects_inner(id, bbox, &mut visiting)
    }

    fn intersects_inner(
        &self,
        id: &OsmId,
        bbox: &BoundingBox,
        visiting: &mut HashSet<OsmId>,
    ) -> Intersection {
        let Some(feature) = self.feature(id) else {
            return Intersection::Indeterminate;
        };
        // relation cycles
        if !visiting.insert(*id) {
            return Intersection::Indeterminate;
        }
        let result = self.feature_intersects(feature, bbox, visiting);
        visiting.remove(id);
        result
    }

    fn feature_intersects(
        &self,
        feature: &Feature,
        bbox: &BoundingBox,
        visiting: &mut HashSet<OsmId>,
    ) -> Intersection {
        if feature.has(Properties::BBOX) {
            if let Some(bounds) = &feature.bounds {
                if !bounds.intersects(bbox) {
                    return Intersection::Outside;
                }
                if bounds.within(bbox) {
                    return Intersection::Inside;
                }
            }
        }

        let complete = feature.has(Properties::GEOM);
        match &feature.data {
            FeatureData::Point { coord: Some(coord) } => {
                return if bbox.contains_coord(*coord) {
                    Intersection::Inside
                } else {
                    Intersection::Outside
                };
            }
            FeatureData::Point { coord: None } => {}
            FeatureData::Line { .. } => {
                if feature.geometry_touches(bbox) {
                    return Intersection::Inside;
                }
                if complete {
                    return Intersection::Outside;
                }
            }
            FeatureData::Area {
                members,
                known_member_area,
                ..
            } => {
                if feature.geometry_touches(bbox) {
                    return Intersection::Inside;
                }
                if let Some(members) = members {
                    let mut pending = false;
                    for member in members {
                        // own geometry already covers resolved non-relation members
                        if complete && member.id.kind != FeatureKind::Area {
                            continue;
                        }
                        match self.intersects_inner(&member.id, bbox, visiting) {
                            Intersection::Inside => return Intersection::Inside,
                            Intersection::Indeterminate => pending = true,
                            Intersection::Outside => {}
                        }
                    }
                    if complete && !pending {
                        return Intersection::Outside;
                    }
                    if known_member_area.as_ref().is_some_and(|known| known.check(bbox)) {
                        return Intersection::Outside;
                    }
                }
            }
        }

        if !complete {
            if let Some(possible) = &feature.bounds_possible_match {
                if !overlaps_with_area(possible, bbox) {
                    return Intersection::Outside;
                }
            }
        }

        Intersection::Indeterminate
    }
}
