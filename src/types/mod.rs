mod bbox;
mod coord;
mod feature;
mod known_area;
mod osm_id;
mod overpass_types;
mod properties;

pub use bbox::*;
pub use coord::*;
pub use feature::*;
pub use known_area::*;
pub use osm_id::*;
pub use overpass_types::*;
pub use properties::*;
