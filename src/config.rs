use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{OverpassError, Result};
use crate::types::FeatureKind;

pub const DEFAULT_URL: &str = "https://overpass-api.de/api/interpreter";

/// Tunables of one frontend session. Missing keys in a config file fall
/// back to the defaults below.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FrontendOptions {
    pub url: String,
    /// Effort budget of one round.
    pub effort_per_request: u32,
    pub effort_node: u32,
    pub effort_way: u32,
    pub effort_relation: u32,
    /// Minimum effort charged for a bbox query; its maximum is unbounded.
    pub effort_bbox_query: u32,
    /// Pacing delay between compiling a round and sending it.
    pub time_gap_ms: u64,
    /// Consecutive failures of a round that are retried before giving up.
    pub max_retries: u32,
    pub timeout_secs: u64,
    /// When false the event loop advances its clock without sleeping.
    pub real_time: bool,
}

impl Default for FrontendOptions {
    fn default() -> Self {
        Self {
            url: DEFAULT_URL.to_string(),
            effort_per_request: 1000,
            effort_node: 1,
            effort_way: 4,
            effort_relation: 64,
            effort_bbox_query: 256,
            time_gap_ms: 10,
            max_retries: 3,
            timeout_secs: 180,
            real_time: true,
        }
    }
}

impl FrontendOptions {
    pub fn effort(&self, kind: FeatureKind) -> u32 {
        match kind {
            FeatureKind::Point => self.effort_node,
            FeatureKind::Line => self.effort_way,
            FeatureKind::Area => self.effort_relation,
        }
    }

    pub fn time_gap(&self) -> Duration {
        Duration::from_millis(self.time_gap_ms)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path)
            .map_err(|e| OverpassError::Config(format!("{}: {}", path.display(), e)))?;
        Ok(toml::from_str(&contents)?)
    }

    /// Reads `config.toml` from the per-user config directory, or returns
    /// the defaults when there is none.
    pub fn from_config_dir() -> Result<Self> {
        let Some(dirs) = directories::ProjectDirs::from("de", "overpass", "overpass-frontend")
        else {
            tracing::warn!("No home directory found, using default options");
            return Ok(Self::default());
        };
        let path = dirs.config_dir().join("config.toml");
        if path.exists() {
            tracing::info!("Loading options from {}", path.display());
            Self::load(&path)
        } else {
            tracing::debug!("No config at {}, using defaults", path.display());
            Ok(Self::default())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn partial_toml_keeps_defaults() {
        let options: FrontendOptions =
            toml::from_str("effort_per_request = 50\nreal_time = false\n").unwrap();
        assert_eq!(
            options,
            FrontendOptions {
                effort_per_request: 50,
                real_time: false,
                ..Default::default()
            }
        );
        assert_eq!(options.effort(FeatureKind::Area), 64);
    }

    #[test]
    fn bad_toml_is_a_config_error() {
        let err = toml::from_str::<FrontendOptions>("effort_node = \"many\"")
            .map_err(OverpassError::from)
            .unwrap_err();
        assert!(matches!(err, OverpassError::Config(_)));
    }

    #[test]
    fn missing_file_is_a_config_error() {
        let err = FrontendOptions::load("/definitely/not/here.toml").unwrap_err();
        assert!(matches!(err, OverpassError::Config(_)));
    }
}
