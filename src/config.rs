//! Run configuration, validated before any record is processed.

use crate::error::{Result, ShrinkError};
use serde::Deserialize;
use std::collections::HashSet;

/// What to do when a way references a node id never seen in the node phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MissingNodePolicy {
    /// Treat the input as corrupt and abort the run. Default.
    #[default]
    FailFast,
    /// Drop the way, count it, and keep going.
    Skip,
}

/// Highway classes that make a way routable by default. Matches the classes
/// the routing profiles care about.
const DEFAULT_HIGHWAY_CLASSES: &[&str] = &[
    "motorway",
    "motorway_link",
    "trunk",
    "trunk_link",
    "primary",
    "primary_link",
    "secondary",
    "secondary_link",
    "tertiary",
    "tertiary_link",
    "unclassified",
    "residential",
    "living_street",
    "service",
];

/// Way tags kept in the output; everything else is stripped.
const DEFAULT_RETAINED_TAGS: &[&str] = &["highway", "oneway", "maxspeed", "junction", "access"];

fn default_resolution() -> f64 {
    5.0
}

fn default_highway_classes() -> HashSet<String> {
    DEFAULT_HIGHWAY_CLASSES.iter().map(|s| s.to_string()).collect()
}

fn default_retained_tags() -> HashSet<String> {
    DEFAULT_RETAINED_TAGS.iter().map(|s| s.to_string()).collect()
}

fn default_preserve_restrictions() -> bool {
    true
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Grid resolution in meters. Presets are 1/2/5/10 but any positive
    /// value works.
    pub grid_resolution_meters: f64,
    /// Accepted `highway` tag values; a way whose class is not in this set
    /// is dropped.
    pub tag_include_set: HashSet<String>,
    /// Tag keys copied through to emitted ways.
    pub retained_tags: HashSet<String>,
    /// Whether turn restriction relations are carried into the output.
    pub preserve_restrictions: bool,
    pub missing_node_policy: MissingNodePolicy,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            grid_resolution_meters: default_resolution(),
            tag_include_set: default_highway_classes(),
            retained_tags: default_retained_tags(),
            preserve_restrictions: default_preserve_restrictions(),
            missing_node_policy: MissingNodePolicy::default(),
        }
    }
}

impl Config {
    /// Reject unusable configurations up front, before the first record.
    pub fn validate(&self) -> Result<()> {
        if !self.grid_resolution_meters.is_finite() || self.grid_resolution_meters <= 0.0 {
            return Err(ShrinkError::Configuration(format!(
                "grid resolution must be a positive number of meters, got {}",
                self.grid_resolution_meters
            )));
        }
        if self.tag_include_set.is_empty() {
            return Err(ShrinkError::Configuration(
                "tag include set is empty; every way would be dropped".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        assert!(Config::default().validate().is_ok());
        assert_eq!(Config::default().missing_node_policy, MissingNodePolicy::FailFast);
    }

    #[test]
    fn rejects_nonpositive_resolution() {
        for bad in [0.0, -5.0, f64::NAN, f64::INFINITY] {
            let config = Config {
                grid_resolution_meters: bad,
                ..Default::default()
            };
            assert!(config.validate().is_err(), "accepted resolution {bad}");
        }
    }

    #[test]
    fn rejects_empty_include_set() {
        let config = Config {
            tag_include_set: HashSet::new(),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn deserializes_from_json() {
        let config: Config = serde_json::from_str(
            r#"{
                "grid_resolution_meters": 2.0,
                "tag_include_set": ["primary", "secondary"],
                "preserve_restrictions": false,
                "missing_node_policy": "skip"
            }"#,
        )
        .unwrap();

        assert_eq!(config.grid_resolution_meters, 2.0);
        assert_eq!(config.tag_include_set.len(), 2);
        assert!(!config.preserve_restrictions);
        assert_eq!(config.missing_node_policy, MissingNodePolicy::Skip);
        // Unspecified fields fall back to defaults.
        assert!(config.retained_tags.contains("oneway"));
    }
}
