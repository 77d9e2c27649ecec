//! Way filtering: tag profile test, node remapping, duplicate collapse.

use crate::config::{Config, MissingNodePolicy};
use crate::error::{Result, ShrinkError};
use crate::node_index::NodeIndex;
use crate::osm::OsmWay;
use crate::stats::DropReason;
use std::collections::HashSet;

/// Outcome of filtering one way.
#[derive(Debug)]
pub enum WayOutcome {
    /// Remapped, deduplicated, tag-stripped way ready for the output stream.
    Emit(OsmWay),
    Drop(DropReason),
}

/// The tag-inclusion profile: which ways survive and which of their tags do.
pub struct WayFilter {
    include_classes: HashSet<String>,
    retained_tags: HashSet<String>,
    missing_node_policy: MissingNodePolicy,
}

impl WayFilter {
    pub fn new(config: &Config) -> Self {
        WayFilter {
            include_classes: config.tag_include_set.clone(),
            retained_tags: config.retained_tags.clone(),
            missing_node_policy: config.missing_node_policy,
        }
    }

    /// True if the way's `highway` class is in the inclusion profile.
    pub fn accepts(&self, way: &OsmWay) -> bool {
        way.tags
            .get("highway")
            .is_some_and(|class| self.include_classes.contains(class))
    }

    /// Filter one way against the sealed node index.
    ///
    /// A node ref missing from the index means the way references a node the
    /// node phase never produced: fatal `CorruptInput` under fail-fast, a
    /// counted drop under the skip policy. Consecutive duplicate
    /// representatives collapse to one, and a way left with fewer than two
    /// distinct representatives is degenerate and dropped.
    pub fn filter(&self, way: &OsmWay, index: &NodeIndex) -> Result<WayOutcome> {
        if !self.accepts(way) {
            return Ok(WayOutcome::Drop(DropReason::TagExcluded));
        }

        let mut remapped: Vec<i64> = Vec::with_capacity(way.node_refs.len());
        for &node_ref in &way.node_refs {
            let representative = match index.lookup_node(node_ref)? {
                Some(rep) => rep,
                None => match self.missing_node_policy {
                    MissingNodePolicy::FailFast => {
                        return Err(ShrinkError::CorruptInput(format!(
                            "way {} references node {} absent from the node phase",
                            way.id, node_ref
                        )));
                    }
                    MissingNodePolicy::Skip => {
                        return Ok(WayOutcome::Drop(DropReason::MissingNode));
                    }
                },
            };
            // Collapse runs of the same representative left behind by
            // snapping neighbors into one cell.
            if remapped.last() != Some(&representative) {
                remapped.push(representative);
            }
        }

        let distinct: HashSet<i64> = remapped.iter().copied().collect();
        if distinct.len() < 2 {
            return Ok(WayOutcome::Drop(DropReason::Degenerate));
        }

        let tags = way
            .tags
            .iter()
            .filter(|(k, _)| self.retained_tags.contains(k.as_str()))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();

        Ok(WayOutcome::Emit(OsmWay {
            id: way.id,
            node_refs: remapped,
            tags,
        }))
    }
}
