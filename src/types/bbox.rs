use geo::{Area, BooleanOps, MultiPolygon, Polygon, Rect};
use rstar::AABB;
use serde::{Deserialize, Serialize};

use super::Coord;

/// Axis aligned lat/lon rectangle, serialized the way Overpass writes `bounds`.
#[derive(Default, Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub minlat: f64,
    pub minlon: f64,
    pub maxlat: f64,
    pub maxlon: f64,
}

impl BoundingBox {
    /// Builds a box from two corners in any order.
    pub fn new(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> Self {
        Self {
            minlat: lat1.min(lat2),
            minlon: lon1.min(lon2),
            maxlat: lat1.max(lat2),
            maxlon: lon1.max(lon2),
        }
    }

    pub fn world() -> Self {
        Self::new(-90.0, -180.0, 90.0, 180.0)
    }

    pub fn from_coord(coord: Coord) -> Self {
        Self::new(coord.lat, coord.long, coord.lat, coord.long)
    }

    /// Smallest box around every coordinate, `None` for an empty iterator.
    pub fn from_coords<'a>(coords: impl IntoIterator<Item = &'a Coord>) -> Option<Self> {
        let mut iter = coords.into_iter();
        let mut bounds = Self::from_coord(*iter.next()?);
        for coord in iter {
            bounds.extend_coord(*coord);
        }
        Some(bounds)
    }

    pub fn extend_coord(&mut self, coord: Coord) {
        self.minlat = self.minlat.min(coord.lat);
        self.minlon = self.minlon.min(coord.long);
        self.maxlat = self.maxlat.max(coord.lat);
        self.maxlon = self.maxlon.max(coord.long);
    }

    pub fn extend(&mut self, other: &BoundingBox) {
        self.minlat = self.minlat.min(other.minlat);
        self.minlon = self.minlon.min(other.minlon);
        self.maxlat = self.maxlat.max(other.maxlat);
        self.maxlon = self.maxlon.max(other.maxlon);
    }

    pub fn union(&self, other: &BoundingBox) -> BoundingBox {
        let mut bounds = *self;
        bounds.extend(other);
        bounds
    }

    /// Closed-interval overlap test: touching edges count as intersecting.
    pub fn intersects(&self, other: &BoundingBox) -> bool {
        self.minlat <= other.maxlat
            && other.minlat <= self.maxlat
            && self.minlon <= other.maxlon
            && other.minlon <= self.maxlon
    }

    /// True when `self` lies completely inside `other`.
    pub fn within(&self, other: &BoundingBox) -> bool {
        self.minlat >= other.minlat
            && self.maxlat <= other.maxlat
            && self.minlon >= other.minlon
            && self.maxlon <= other.maxlon
    }

    pub fn contains_coord(&self, coord: Coord) -> bool {
        coord.lat >= self.minlat
            && coord.lat <= self.maxlat
            && coord.long >= self.minlon
            && coord.long <= self.maxlon
    }

    pub fn center(&self) -> Coord {
        Coord::new(
            (self.minlat + self.maxlat) / 2.0,
            (self.minlon + self.maxlon) / 2.0,
        )
    }

    /// `minlat,minlon,maxlat,maxlon` as used by Overpass QL bbox filters.
    pub fn to_lat_lon_string(&self) -> String {
        format!(
            "{},{},{},{}",
            self.minlat, self.minlon, self.maxlat, self.maxlon
        )
    }

    pub fn to_rect(&self) -> Rect<f64> {
        Rect::new(
            geo::coord! { x: self.minlon, y: self.minlat },
            geo::coord! { x: self.maxlon, y: self.maxlat },
        )
    }

    pub fn to_polygon(&self) -> Polygon<f64> {
        self.to_rect().to_polygon()
    }

    pub fn to_multi_polygon(&self) -> MultiPolygon<f64> {
        MultiPolygon::new(vec![self.to_polygon()])
    }

    pub fn envelope(&self) -> AABB<[f64; 2]> {
        AABB::from_corners([self.minlon, self.minlat], [self.maxlon, self.maxlat])
    }
}

impl From<Rect<f64>> for BoundingBox {
    fn from(rect: Rect<f64>) -> Self {
        Self::new(rect.min().y, rect.min().x, rect.max().y, rect.max().x)
    }
}

/// Areas below this (in square degrees) are treated as empty; polygon
/// clipping leaves slivers of that order along shared edges.
pub const AREA_EPSILON: f64 = 1e-12;

/// Does `region` leave any area (not just a shared edge or corner) inside `bbox`?
pub fn overlaps_with_area(region: &MultiPolygon<f64>, bbox: &BoundingBox) -> bool {
    let remaining = bbox.to_multi_polygon().intersection(region);
    remaining.unsigned_area() > AREA_EPSILON
}

/// `region` minus `bbox`; the result never covers more than `region`.
pub fn subtract_bbox(region: &MultiPolygon<f64>, bbox: &BoundingBox) -> MultiPolygon<f64> {
    region.difference(&bbox.to_multi_polygon())
}
