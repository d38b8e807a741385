//! Compiling pending requests into Overpass QL.
//!
//! One round produces one [`Context`]: the concatenated query text of every
//! admitted request plus a [`SubRequest`] per request describing which
//! [`Part`]s its result section is split into.

mod bbox;
mod context;
mod get;

pub use bbox::*;
pub use context::*;
pub use get::*;
