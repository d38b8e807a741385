//! Client-side engine for the Overpass API.
//!
//! Callers ask for OSM features by id or by bounding box; the frontend
//! batches those requests into effort-bounded queries, keeps every element
//! it ever received in a cache that tracks which properties are known, and
//! answers from that cache whenever it can.
//!
//! ```no_run
//! use overpass_frontend::{FrontendOptions, GetOptions, OverpassFrontend};
//!
//! let mut frontend = OverpassFrontend::with_http(FrontendOptions::default());
//! frontend.get(
//!     &["n1", "w2"],
//!     GetOptions::default(),
//!     |result, index| println!("{index}: {result:?}"),
//!     |result| println!("done: {result:?}"),
//! );
//! frontend.run_until_idle().ok();
//! ```

pub mod cache;
pub mod config;
pub mod error;
pub mod frontend;
pub mod overpass;
pub mod query;
pub mod request;
pub mod types;

pub use config::FrontendOptions;
pub use error::{OverpassError, Result};
pub use frontend::{OverpassFrontend, State};
pub use overpass::{OverpassClient, Transport};
pub use request::{BBoxOptions, FeatureResult, GetOptions, RequestEvent, RequestId};
pub use types::{BoundingBox, Coord, Feature, OsmId, Properties};
