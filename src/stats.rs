//! Aggregate run counters, produced once at finalize.

use serde::Serialize;
use std::time::Duration;

/// Why a way was removed from the output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum DropReason {
    /// Tag set did not match the inclusion profile.
    TagExcluded,
    /// Referenced a node never seen in the node phase (permissive policy
    /// only; under fail-fast this aborts the run instead).
    MissingNode,
    /// Fewer than two distinct representative nodes after remapping.
    Degenerate,
}

/// Why a turn restriction was rejected. Never fatal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum RejectReason {
    /// More than one via member, or none.
    MultiVia,
    /// Via node absent from the index, from/to way dropped, or the
    /// restriction kind tag missing.
    Unresolved,
}

/// One rejected restriction, kept for diagnostics.
#[derive(Debug, Clone, Serialize)]
pub struct RejectedRestriction {
    pub relation_id: i64,
    pub reason: RejectReason,
}

/// Counters accumulated over the whole run. The pipeline fills this in as it
/// goes and hands it out once at finalize; formatting belongs to the caller.
#[derive(Debug, Clone, Default, Serialize)]
pub struct Stats {
    pub nodes_in: u64,
    pub nodes_out: u64,
    pub ways_in: u64,
    pub ways_out: u64,
    pub relations_in: u64,
    pub restrictions_out: u64,

    pub ways_dropped_tag_excluded: u64,
    pub ways_dropped_missing_node: u64,
    pub ways_dropped_degenerate: u64,
    pub restrictions_rejected_multi_via: u64,
    pub restrictions_rejected_unresolved: u64,

    /// Relation ids of rejected restrictions, in encounter order.
    pub rejected_restrictions: Vec<RejectedRestriction>,

    pub elapsed: Duration,
}

impl Stats {
    pub fn record_dropped_way(&mut self, reason: DropReason) {
        match reason {
            DropReason::TagExcluded => self.ways_dropped_tag_excluded += 1,
            DropReason::MissingNode => self.ways_dropped_missing_node += 1,
            DropReason::Degenerate => self.ways_dropped_degenerate += 1,
        }
    }

    pub fn record_rejected_restriction(&mut self, relation_id: i64, reason: RejectReason) {
        match reason {
            RejectReason::MultiVia => self.restrictions_rejected_multi_via += 1,
            RejectReason::Unresolved => self.restrictions_rejected_unresolved += 1,
        }
        self.rejected_restrictions.push(RejectedRestriction {
            relation_id,
            reason,
        });
    }

    /// Percentage of input nodes removed by deduplication.
    pub fn node_reduction_percent(&self) -> f64 {
        Self::reduction(self.nodes_in, self.nodes_out)
    }

    /// Percentage of input ways removed by filtering.
    pub fn way_reduction_percent(&self) -> f64 {
        Self::reduction(self.ways_in, self.ways_out)
    }

    fn reduction(input: u64, output: u64) -> f64 {
        if input == 0 {
            return 0.0;
        }
        (input - output) as f64 / input as f64 * 100.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn drop_reasons_increment_their_own_counter() {
        let mut stats = Stats::default();
        stats.record_dropped_way(DropReason::TagExcluded);
        stats.record_dropped_way(DropReason::TagExcluded);
        stats.record_dropped_way(DropReason::Degenerate);

        assert_eq!(stats.ways_dropped_tag_excluded, 2);
        assert_eq!(stats.ways_dropped_degenerate, 1);
        assert_eq!(stats.ways_dropped_missing_node, 0);
    }

    #[test]
    fn rejected_restrictions_keep_attribution() {
        let mut stats = Stats::default();
        stats.record_rejected_restriction(77, RejectReason::MultiVia);
        stats.record_rejected_restriction(78, RejectReason::Unresolved);

        assert_eq!(stats.restrictions_rejected_multi_via, 1);
        assert_eq!(stats.restrictions_rejected_unresolved, 1);
        assert_eq!(stats.rejected_restrictions.len(), 2);
        assert_eq!(stats.rejected_restrictions[0].relation_id, 77);
    }

    #[test]
    fn reduction_handles_empty_input() {
        let stats = Stats::default();
        assert_eq!(stats.node_reduction_percent(), 0.0);

        let stats = Stats {
            nodes_in: 200,
            nodes_out: 50,
            ..Default::default()
        };
        assert_eq!(stats.node_reduction_percent(), 75.0);
    }
}
