use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use geo::{Intersects, LineString, MultiPolygon, Point, Polygon};
use geojson::JsonObject;
use serde_json::Value;

use super::{BoundingBox, Coord, Element, FeatureKind, KnownArea, OsmId, Properties};

/// Reference from a way or relation to one of its children.
#[derive(Debug, Clone, PartialEq)]
pub struct Member {
    pub id: OsmId,
    pub role: Option<String>,
    pub sequence: usize,
}

/// Reverse edge recorded on a child: "I am the `sequence`th member of `parent`".
#[derive(Debug, Clone, PartialEq)]
pub struct MemberOf {
    pub parent: OsmId,
    pub role: Option<String>,
    pub sequence: usize,
}

/// Provenance as reported with `out meta`.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Meta {
    pub timestamp: Option<DateTime<Utc>>,
    pub version: Option<u64>,
    pub changeset: Option<u64>,
    pub user: Option<String>,
    pub uid: Option<u64>,
}

impl Meta {
    pub fn from_element(el: &Element) -> Option<Self> {
        let raw = el.timestamp.as_ref()?;
        Some(Meta {
            timestamp: DateTime::parse_from_rfc3339(raw)
                .ok()
                .map(|t| t.with_timezone(&Utc)),
            version: el.version,
            changeset: el.changeset,
            user: el.user.clone(),
            uid: el.uid,
        })
    }
}

/// Kind specific part of a feature.
#[derive(Debug, Clone, PartialEq)]
pub enum FeatureData {
    Point {
        coord: Option<Coord>,
    },
    Line {
        /// Node references, known once the way was loaded with `body`/`skel`.
        members: Option<Vec<Member>>,
        /// One slot per node; `None` where that node has no position yet.
        geometry: Option<Vec<Option<Coord>>>,
    },
    Area {
        members: Option<Vec<Member>>,
        /// Geometries of the members resolved so far, in member order.
        geometry: Option<Vec<geo::Geometry<f64>>>,
        known_member_area: Option<KnownArea>,
    },
}

impl FeatureData {
    pub fn empty(kind: FeatureKind) -> Self {
        match kind {
            FeatureKind::Point => FeatureData::Point { coord: None },
            FeatureKind::Line => FeatureData::Line {
                members: None,
                geometry: None,
            },
            FeatureKind::Area => FeatureData::Area {
                members: None,
                geometry: None,
                known_member_area: None,
            },
        }
    }
}

/// Cached representation of one OSM element.
#[derive(Debug, Clone, PartialEq)]
pub struct Feature {
    pub id: OsmId,
    pub properties: Properties,
    pub tags: Option<BTreeMap<String, String>>,
    pub meta: Option<Meta>,
    pub bounds: Option<BoundingBox>,
    pub center: Option<Coord>,
    /// Where the feature may still be, given bbox queries that excluded it.
    /// Only kept while the geometry is unknown.
    pub bounds_possible_match: Option<MultiPolygon<f64>>,
    pub member_of: Vec<MemberOf>,
    pub data: FeatureData,
}

impl Feature {
    /// A feature nothing is known about yet except its id.
    pub fn placeholder(id: OsmId) -> Self {
        Self {
            id,
            properties: Properties::ID_ONLY,
            tags: None,
            meta: None,
            bounds: None,
            center: None,
            bounds_possible_match: None,
            member_of: Vec::new(),
            data: FeatureData::empty(id.kind),
        }
    }

    pub fn kind(&self) -> FeatureKind {
        self.id.kind
    }

    pub fn osm_id(&self) -> u64 {
        self.id.id
    }

    pub fn has(&self, properties: Properties) -> bool {
        self.properties.contains(properties)
    }

    pub fn members(&self) -> Option<&[Member]> {
        match &self.data {
            FeatureData::Point { .. } => None,
            FeatureData::Line { members, .. } | FeatureData::Area { members, .. } => {
                members.as_deref()
            }
        }
    }

    pub fn member_ids(&self) -> Option<Vec<OsmId>> {
        self.members()
            .map(|members| members.iter().map(|m| m.id).collect())
    }

    /// Records that `parent` references this feature. Re-registering the
    /// same slot is a no-op.
    pub fn add_member_of(&mut self, parent: OsmId, role: Option<String>, sequence: usize) {
        let exists = self
            .member_of
            .iter()
            .any(|m| m.parent == parent && m.sequence == sequence);
        if !exists {
            self.member_of.push(MemberOf {
                parent,
                role,
                sequence,
            });
        }
    }

    /// Human readable label: name, operator or ref, falling back to the id.
    pub fn title(&self) -> String {
        self.tags
            .as_ref()
            .and_then(|tags| {
                tags.get("name")
                    .or_else(|| tags.get("operator"))
                    .or_else(|| tags.get("ref"))
                    .cloned()
            })
            .unwrap_or_else(|| self.id.to_string())
    }

    pub fn coord(&self) -> Option<Coord> {
        match &self.data {
            FeatureData::Point { coord } => *coord,
            _ => None,
        }
    }

    /// Closed ways are rings: first node equals last node.
    pub fn is_closed(&self) -> bool {
        match &self.data {
            FeatureData::Line { members, geometry } => {
                if let Some(members) = members {
                    return members.len() > 2
                        && members.first().map(|m| m.id) == members.last().map(|m| m.id);
                }
                match geometry {
                    Some(geom) if geom.len() > 2 => {
                        geom.first().copied().flatten().is_some()
                            && geom.first() == geom.last()
                    }
                    _ => false,
                }
            }
            _ => false,
        }
    }

    /// Geometry of this feature alone as geo types, one entry per connected
    /// piece. Lines are split where node positions are still unknown.
    pub fn own_geometries(&self) -> Vec<geo::Geometry<f64>> {
        match &self.data {
            FeatureData::Point { coord } => coord
                .map(|c| vec![geo::Geometry::Point(Point::from(c))])
                .unwrap_or_default(),
            FeatureData::Line { geometry, .. } => {
                let Some(geometry) = geometry else {
                    return vec![];
                };
                if self.has(Properties::GEOM) && self.is_closed() {
                    let ring: LineString<f64> =
                        geometry.iter().flatten().map(|c| c.to_geo()).collect();
                    return vec![geo::Geometry::Polygon(Polygon::new(ring, vec![]))];
                }
                line_runs(geometry)
                    .into_iter()
                    .map(geo::Geometry::LineString)
                    .collect()
            }
            FeatureData::Area { geometry, .. } => geometry.clone().unwrap_or_default(),
        }
    }

    /// Does any piece of the known geometry touch `bbox`?
    pub fn geometry_touches(&self, bbox: &BoundingBox) -> bool {
        let rect = bbox.to_rect();
        self.own_geometries().iter().any(|g| geometry_intersects(g, &rect))
    }

    /// GeoJSON rendition: `id` is `type/osm_id`, properties carry the tags
    /// plus `@id` and `@`-prefixed meta fields.
    pub fn to_geojson(&self) -> geojson::Feature {
        let geometries: Vec<geojson::Geometry> = self
            .own_geometries()
            .iter()
            .filter_map(to_geojson_geometry)
            .collect();

        let geometry = match (&self.data, geometries.len()) {
            (_, 0) => None,
            (FeatureData::Area { .. }, _) => Some(geojson::Geometry::new(
                geojson::Value::GeometryCollection(geometries),
            )),
            (_, 1) => geometries.into_iter().next(),
            _ => Some(geojson::Geometry::new(
                geojson::Value::GeometryCollection(geometries),
            )),
        };

        geojson::Feature {
            bbox: self
                .bounds
                .map(|b| vec![b.minlon, b.minlat, b.maxlon, b.maxlat]),
            geometry,
            id: Some(geojson::feature::Id::String(self.type_id())),
            properties: Some(self.geojson_properties()),
            foreign_members: None,
        }
    }

    fn type_id(&self) -> String {
        format!("{}/{}", self.kind().osm_type(), self.osm_id())
    }

    fn geojson_properties(&self) -> JsonObject {
        let mut ret = JsonObject::new();
        ret.insert("@id".to_string(), Value::String(self.type_id()));

        if let Some(tags) = &self.tags {
            for (k, v) in tags {
                ret.insert(k.clone(), Value::String(v.clone()));
            }
        }

        if let Some(meta) = &self.meta {
            if let Some(timestamp) = meta.timestamp {
                ret.insert("@timestamp".to_string(), Value::String(timestamp.to_rfc3339()));
            }
            if let Some(version) = meta.version {
                ret.insert("@version".to_string(), Value::from(version));
            }
            if let Some(changeset) = meta.changeset {
                ret.insert("@changeset".to_string(), Value::from(changeset));
            }
            if let Some(user) = &meta.user {
                ret.insert("@user".to_string(), Value::String(user.clone()));
            }
            if let Some(uid) = meta.uid {
                ret.insert("@uid".to_string(), Value::from(uid));
            }
        }

        ret
    }
}

/// Split a gappy coordinate list into the runs that can be drawn.
fn line_runs(geometry: &[Option<Coord>]) -> Vec<LineString<f64>> {
    let mut runs = Vec::new();
    let mut current: Vec<geo::Coord<f64>> = Vec::new();
    for slot in geometry {
        match slot {
            Some(c) => current.push(c.to_geo()),
            None => {
                if !current.is_empty() {
                    runs.push(LineString::new(std::mem::take(&mut current)));
                }
            }
        }
    }
    if !current.is_empty() {
        runs.push(LineString::new(current));
    }
    runs
}

pub(crate) fn geometry_intersects(geometry: &geo::Geometry<f64>, rect: &geo::Rect<f64>) -> bool {
    match geometry {
        geo::Geometry::Point(p) => p.intersects(rect),
        geo::Geometry::LineString(ls) if ls.0.len() == 1 => Point::from(ls.0[0]).intersects(rect),
        geo::Geometry::LineString(ls) => ls.intersects(rect),
        geo::Geometry::Polygon(p) => p.intersects(rect),
        geo::Geometry::MultiPolygon(mp) => mp.0.iter().any(|p| p.intersects(rect)),
        geo::Geometry::MultiLineString(ml) => ml.0.iter().any(|ls| ls.intersects(rect)),
        geo::Geometry::GeometryCollection(gc) => {
            gc.0.iter().any(|g| geometry_intersects(g, rect))
        }
        _ => false,
    }
}

fn position(c: &geo::Coord<f64>) -> Vec<f64> {
    vec![c.x, c.y]
}

fn to_geojson_geometry(geometry: &geo::Geometry<f64>) -> Option<geojson::Geometry> {
    let value = match geometry {
        geo::Geometry::Point(p) => geojson::Value::Point(position(&p.0)),
        geo::Geometry::LineString(ls) => {
            geojson::Value::LineString(ls.0.iter().map(position).collect())
        }
        geo::Geometry::Polygon(p) => {
            geojson::Value::Polygon(vec![p.exterior().0.iter().map(position).collect()])
        }
        _ => return None,
    };
    Some(geojson::Geometry::new(value))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn way_with(coords: Vec<Option<Coord>>, node_ids: &[u64]) -> Feature {
        let mut way = Feature::placeholder(OsmId::way(1));
        way.data = FeatureData::Line {
            members: Some(
                node_ids
                    .iter()
                    .enumerate()
                    .map(|(i, id)| Member {
                        id: OsmId::node(*id),
                        role: None,
                        sequence: i,
                    })
                    .collect(),
            ),
            geometry: Some(coords),
        };
        way
    }

    #[test]
    fn title_prefers_name() {
        let mut f = Feature::placeholder(OsmId::node(3));
        assert_eq!(f.title(), "n3");
        f.tags = Some(BTreeMap::from([
            ("ref".to_string(), "A1".to_string()),
            ("operator".to_string(), "ACME".to_string()),
        ]));
        assert_eq!(f.title(), "ACME");
    }

    #[test]
    fn gaps_split_lines() {
        let way = way_with(
            vec![
                Some(Coord::new(0.0, 0.0)),
                Some(Coord::new(0.0, 1.0)),
                None,
                Some(Coord::new(1.0, 1.0)),
                Some(Coord::new(1.0, 2.0)),
            ],
            &[1, 2, 3, 4, 5],
        );
        assert_eq!(way.own_geometries().len(), 2);
        assert!(way.geometry_touches(&BoundingBox::new(0.5, 1.5, 1.5, 2.5)));
        assert!(!way.geometry_touches(&BoundingBox::new(5.0, 5.0, 6.0, 6.0)));
    }

    #[test]
    fn closed_complete_way_is_polygon() {
        let mut way = way_with(
            vec![
                Some(Coord::new(0.0, 0.0)),
                Some(Coord::new(0.0, 4.0)),
                Some(Coord::new(4.0, 4.0)),
                Some(Coord::new(0.0, 0.0)),
            ],
            &[1, 2, 3, 1],
        );
        way.properties |= Properties::GEOM;
        assert!(way.is_closed());
        // a bbox strictly inside the ring still intersects the area
        assert!(way.geometry_touches(&BoundingBox::new(0.5, 2.0, 1.0, 2.5)));
        let geojson = way.to_geojson();
        assert!(matches!(
            geojson.geometry.unwrap().value,
            geojson::Value::Polygon(_)
        ));
    }

    #[test]
    fn geojson_carries_tags_and_meta() {
        let el: Element = serde_json::from_value(serde_json::json!({
            "type": "node", "id": 7, "timestamp": "2020-01-02T03:04:05Z",
            "version": 3, "user": "mapper"
        }))
        .unwrap();
        let mut node = Feature::placeholder(OsmId::node(7));
        node.meta = Meta::from_element(&el);
        node.tags = Some(BTreeMap::from([("amenity".to_string(), "cafe".to_string())]));
        node.data = FeatureData::Point {
            coord: Some(Coord::new(1.0, 2.0)),
        };

        let gj = node.to_geojson();
        let props = gj.properties.unwrap();
        assert_eq!(props["@id"], "node/7");
        assert_eq!(props["amenity"], "cafe");
        assert_eq!(props["@version"], 3);
        assert_eq!(props["@timestamp"], "2020-01-02T03:04:05+00:00");
        assert_eq!(gj.geometry.unwrap().value, geojson::Value::Point(vec![2.0, 1.0]));
    }
}
