use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::OverpassError;

/// Node, way or relation, named after the geometry each one carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum FeatureKind {
    Point,
    Line,
    Area,
}

impl FeatureKind {
    /// One letter prefix used in composite ids (`n`, `w`, `r`).
    pub fn prefix(&self) -> char {
        match self {
            FeatureKind::Point => 'n',
            FeatureKind::Line => 'w',
            FeatureKind::Area => 'r',
        }
    }

    /// Name of the element type in Overpass QL and JSON.
    pub fn osm_type(&self) -> &'static str {
        match self {
            FeatureKind::Point => "node",
            FeatureKind::Line => "way",
            FeatureKind::Area => "relation",
        }
    }

    pub fn from_osm_type(value: &str) -> Option<Self> {
        match value {
            "node" => Some(FeatureKind::Point),
            "way" => Some(FeatureKind::Line),
            "relation" => Some(FeatureKind::Area),
            _ => None,
        }
    }

    fn from_prefix(value: char) -> Option<Self> {
        match value {
            'n' => Some(FeatureKind::Point),
            'w' => Some(FeatureKind::Line),
            'r' => Some(FeatureKind::Area),
            _ => None,
        }
    }
}

/// Composite cache key: kind prefix plus the numeric OSM id, e.g. `w5`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct OsmId {
    pub kind: FeatureKind,
    pub id: u64,
}

impl OsmId {
    pub const fn new(kind: FeatureKind, id: u64) -> Self {
        Self { kind, id }
    }

    pub const fn node(id: u64) -> Self {
        Self::new(FeatureKind::Point, id)
    }

    pub const fn way(id: u64) -> Self {
        Self::new(FeatureKind::Line, id)
    }

    pub const fn relation(id: u64) -> Self {
        Self::new(FeatureKind::Area, id)
    }
}

impl fmt::Display for OsmId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.kind.prefix(), self.id)
    }
}

impl FromStr for OsmId {
    type Err = OverpassError;

    /// Accepts exactly `^[nwr][0-9]+$`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut chars = s.chars();
        let kind = chars
            .next()
            .and_then(FeatureKind::from_prefix)
            .ok_or_else(|| OverpassError::MalformedId(s.to_string()))?;
        let digits = chars.as_str();
        if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
            return Err(OverpassError::MalformedId(s.to_string()));
        }
        let id = digits
            .parse::<u64>()
            .map_err(|_| OverpassError::MalformedId(s.to_string()))?;
        Ok(OsmId { kind, id })
    }
}
