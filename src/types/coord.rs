use serde::{Deserialize, Serialize};

/// A WGS84 position as Overpass hands it out (`{"lat": .., "lon": ..}`).
#[derive(Default, Debug, Clone, PartialEq, Serialize, Deserialize, Copy)]
#[serde(rename_all = "camelCase")]
pub struct Coord {
    pub lat: f64,
    #[serde(rename = "lon")]
    pub long: f64,
}

impl Coord {
    pub const fn new(lat: f64, long: f64) -> Self {
        Self { lat, long }
    }

    /// geo works in x/y, which is lon/lat.
    pub fn to_geo(&self) -> geo::Coord<f64> {
        geo::Coord {
            x: self.long,
            y: self.lat,
        }
    }
}

impl From<Coord> for geo::Point<f64> {
    fn from(coord: Coord) -> Self {
        geo::Point::from(coord.to_geo())
    }
}
