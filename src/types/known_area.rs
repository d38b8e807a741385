use geo::{Area, BooleanOps, MultiPolygon};

use super::{AREA_EPSILON, BoundingBox};

/// Region of the map where every member of a relation is accounted for.
///
/// Starts as "everything outside the relation's own bounds" (no member can
/// lie there) and grows as members resolve, because the still-uncertain part
/// is narrowed down to the bounds of the members that remain unresolved.
#[derive(Debug, Clone, PartialEq)]
pub struct KnownArea {
    area: MultiPolygon<f64>,
}

impl KnownArea {
    /// Everything outside `bounds`.
    pub fn outside(bounds: &BoundingBox) -> Self {
        Self::from_uncertain(&[*bounds])
    }

    /// Everything outside the union of `uncertain`.
    pub fn from_uncertain(uncertain: &[BoundingBox]) -> Self {
        let mut unknown = MultiPolygon::new(vec![]);
        for bounds in uncertain {
            unknown = unknown.union(&bounds.to_multi_polygon());
        }
        let area = BoundingBox::world().to_multi_polygon().difference(&unknown);
        Self { area }
    }

    /// Fold in a newer estimate. Members never become unresolved again, so
    /// the known area only grows.
    pub fn merge(&mut self, other: &KnownArea) {
        self.area = self.area.union(&other.area);
    }

    /// True when `bbox` lies entirely inside the known area.
    pub fn check(&self, bbox: &BoundingBox) -> bool {
        let outside = bbox.to_multi_polygon().difference(&self.area);
        outside.unsigned_area() <= AREA_EPSILON
    }

    pub fn area(&self) -> &MultiPolygon<f64> {
        &self.area
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn outside_of_bounds_is_known() {
        let known = KnownArea::outside(&BoundingBox::new(0.0, 0.0, 1.0, 1.0));
        assert!(known.check(&BoundingBox::new(2.0, 2.0, 3.0, 3.0)));
        assert!(!known.check(&BoundingBox::new(0.5, 0.5, 3.0, 3.0)));
    }

    #[test]
    fn merging_narrows_the_unknown() {
        let mut known = KnownArea::outside(&BoundingBox::new(0.0, 0.0, 2.0, 2.0));
        known.merge(&KnownArea::from_uncertain(&[BoundingBox::new(0.0, 0.0, 1.0, 1.0)]));
        assert!(known.check(&BoundingBox::new(1.5, 1.5, 1.8, 1.8)));
        assert!(!known.check(&BoundingBox::new(0.2, 0.2, 0.4, 0.4)));
    }
}
