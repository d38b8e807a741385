use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::{BoundingBox, Coord, FeatureKind, OsmId};

// Overpass API `[out:json]` payload, field names as the service writes them.
#[derive(Default, Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OverpassResponse {
    pub version: Option<f64>,
    pub generator: Option<String>,
    pub osm3s: Option<Osm3s>,
    #[serde(default)]
    pub elements: Vec<Element>,
    /// Set when the service hit a runtime error or timeout; the elements are then incomplete.
    pub remark: Option<String>,
}

#[derive(Default, Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Osm3s {
    #[serde(rename = "timestamp_osm_base")]
    pub timestamp_osm_base: Option<String>,
    #[serde(rename = "timestamp_areas_base")]
    pub timestamp_areas_base: Option<String>,
    pub copyright: Option<String>,
}

/// One entry of `elements`: a node, way or relation, or an `out count;` separator.
#[derive(Default, Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Element {
    #[serde(rename = "type", default)]
    pub type_field: String,
    pub id: Option<u64>,
    pub lat: Option<f64>,
    pub lon: Option<f64>,
    pub tags: Option<BTreeMap<String, String>>,
    pub bounds: Option<BoundingBox>,
    pub center: Option<Coord>,
    pub nodes: Option<Vec<u64>>,
    /// Way geometry from `out geom`; entries are `null` where a node was clipped.
    pub geometry: Option<Vec<Option<Coord>>>,
    pub members: Option<Vec<RawMember>>,
    pub count: Option<serde_json::Value>,

    pub timestamp: Option<String>,
    pub version: Option<u64>,
    pub changeset: Option<u64>,
    pub user: Option<String>,
    pub uid: Option<u64>,
}

/// Relation member as listed by `out body`/`out geom`.
#[derive(Default, Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawMember {
    #[serde(rename = "type")]
    pub type_field: String,
    #[serde(rename = "ref")]
    pub reference: u64,
    #[serde(default)]
    pub role: String,
    pub lat: Option<f64>,
    pub lon: Option<f64>,
    pub geometry: Option<Vec<Option<Coord>>>,
}

impl Element {
    /// `out count;` emits `{"type": "count", ...}`; some servers only send a `count` field.
    pub fn is_separator(&self) -> bool {
        self.count.is_some() || self.type_field == "count"
    }

    pub fn kind(&self) -> Option<FeatureKind> {
        FeatureKind::from_osm_type(&self.type_field)
    }

    pub fn osm_id(&self) -> Option<OsmId> {
        Some(OsmId::new(self.kind()?, self.id?))
    }

    pub fn coord(&self) -> Option<Coord> {
        Some(Coord::new(self.lat?, self.lon?))
    }

    /// Lower a relation member into the element shape the cache merges.
    pub fn from_member(member: &RawMember) -> Self {
        Element {
            type_field: member.type_field.clone(),
            id: Some(member.reference),
            lat: member.lat,
            lon: member.lon,
            geometry: member.geometry.clone(),
            ..Default::default()
        }
    }

    /// Node element synthesized from a way's `nodes`/`geometry` pair.
    pub fn node(id: u64, coord: Option<Coord>) -> Self {
        Element {
            type_field: "node".to_string(),
            id: Some(id),
            lat: coord.map(|c| c.lat),
            lon: coord.map(|c| c.long),
            ..Default::default()
        }
    }
}

impl RawMember {
    pub fn osm_id(&self) -> Option<OsmId> {
        Some(OsmId::new(
            FeatureKind::from_osm_type(&self.type_field)?,
            self.reference,
        ))
    }
}
