mod client;

use std::time::Duration;

pub use client::*;
use ureq::Agent;

use crate::config::{DEFAULT_URL, FrontendOptions};
use crate::error::Result;
use crate::types::OverpassResponse;

/// Posts one query and returns the decoded answer. The frontend only ever
/// has a single call in flight.
pub trait Transport {
    fn send(&mut self, url: &str, query: &str) -> Result<OverpassResponse>;
}

/// Blocking HTTP transport backed by a `ureq` agent.
#[derive(Clone)]
pub struct OverpassClient {
    pub agent: Agent,
}

impl Default for OverpassClient {
    fn default() -> Self {
        OverpassClient::new(Duration::from_secs(180))
    }
}

impl OverpassClient {
    pub fn new(timeout: Duration) -> Self {
        let config = Agent::config_builder()
            .timeout_global(Some(timeout))
            .build();
        let agent: Agent = config.into();
        OverpassClient { agent }
    }

    pub fn from_options(options: &FrontendOptions) -> Self {
        if options.url != DEFAULT_URL {
            tracing::info!("Using Overpass endpoint {}", options.url);
        }
        OverpassClient::new(options.timeout())
    }
}
