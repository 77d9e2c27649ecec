//! Turn restriction extraction, remapping, and buffering.

use crate::error::Result;
use crate::node_index::NodeIndex;
use crate::osm::{MemberType, OsmRelation, OsmRelationMember};
use crate::stats::RejectReason;
use serde::Serialize;

/// A turn restriction with its via node remapped to the representative id.
/// The `kind` string is the raw `restriction` tag value, e.g. "no_left_turn"
/// or "only_straight_on".
#[derive(Debug, Clone, Serialize)]
pub struct TurnRestriction {
    pub relation_id: i64,
    pub from_way: i64,
    pub via_node: i64,
    pub to_way: i64,
    pub kind: String,
}

/// Outcome of collecting one restriction relation.
#[derive(Debug)]
pub enum RestrictionOutcome {
    Buffered,
    Rejected(RejectReason),
    /// Not a `type=restriction` relation at all; ignored.
    NotARestriction,
}

/// Buffers remapped restrictions until the relation phase is exhausted.
///
/// Buffering is unbounded on purpose: restriction volume is orders of
/// magnitude below node/way volume, so holding them in memory until finalize
/// costs little and avoids a second pass.
#[derive(Default)]
pub struct RestrictionCollector {
    buffered: Vec<TurnRestriction>,
}

impl RestrictionCollector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Examine one relation and buffer it if it is a resolvable single-via
    /// turn restriction.
    ///
    /// Rejection precedence is deterministic: the via member count is checked
    /// first (`multi-via`), then the restriction kind tag, the via node, the
    /// from-way, and the to-way in that order (all `unresolved`).
    pub fn collect(&mut self, relation: &OsmRelation, index: &NodeIndex) -> Result<RestrictionOutcome> {
        if !relation.is_turn_restriction() {
            return Ok(RestrictionOutcome::NotARestriction);
        }

        let via_members: Vec<&OsmRelationMember> = relation
            .members
            .iter()
            .filter(|m| m.role == "via")
            .collect();
        if via_members.len() != 1 {
            return Ok(RestrictionOutcome::Rejected(RejectReason::MultiVia));
        }
        let via = via_members[0];

        let Some(kind) = relation.restriction_kind() else {
            return Ok(RestrictionOutcome::Rejected(RejectReason::Unresolved));
        };

        // Via-way restrictions span multiple intersections and are out of
        // scope for a node-indexed remap.
        if via.member_type != MemberType::Node {
            return Ok(RestrictionOutcome::Rejected(RejectReason::Unresolved));
        }
        let Some(via_node) = index.lookup_node(via.member_id)? else {
            return Ok(RestrictionOutcome::Rejected(RejectReason::Unresolved));
        };

        let from_way = relation
            .members
            .iter()
            .find(|m| m.role == "from" && m.member_type == MemberType::Way)
            .map(|m| m.member_id);
        let Some(from_way) = from_way else {
            return Ok(RestrictionOutcome::Rejected(RejectReason::Unresolved));
        };
        if !index.is_way_kept(from_way)? {
            return Ok(RestrictionOutcome::Rejected(RejectReason::Unresolved));
        }

        let to_way = relation
            .members
            .iter()
            .find(|m| m.role == "to" && m.member_type == MemberType::Way)
            .map(|m| m.member_id);
        let Some(to_way) = to_way else {
            return Ok(RestrictionOutcome::Rejected(RejectReason::Unresolved));
        };
        if !index.is_way_kept(to_way)? {
            return Ok(RestrictionOutcome::Rejected(RejectReason::Unresolved));
        }

        self.buffered.push(TurnRestriction {
            relation_id: relation.id,
            from_way,
            via_node,
            to_way,
            kind: kind.to_string(),
        });
        Ok(RestrictionOutcome::Buffered)
    }

    pub fn len(&self) -> usize {
        self.buffered.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffered.is_empty()
    }

    /// Drain the buffer at finalize, in encounter order.
    pub fn flush(self) -> Vec<TurnRestriction> {
        self.buffered
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grid::grid_cell;
    use std::collections::HashMap;

    fn member(role: &str, member_type: MemberType, id: i64) -> OsmRelationMember {
        OsmRelationMember {
            member_type,
            member_id: id,
            role: role.to_string(),
        }
    }

    fn restriction_relation(id: i64, members: Vec<OsmRelationMember>) -> OsmRelation {
        let mut tags = HashMap::new();
        tags.insert("type".to_string(), "restriction".to_string());
        tags.insert("restriction".to_string(), "no_left_turn".to_string());
        OsmRelation { id, members, tags }
    }

    fn index_with(node: (i64, f64, f64), kept_ways: &[i64]) -> NodeIndex {
        let mut index = NodeIndex::in_memory();
        index.register(grid_cell(node.1, node.2, 5.0), node.0).unwrap();
        index.seal().unwrap();
        for &way in kept_ways {
            index.mark_way_kept(way).unwrap();
        }
        index
    }

    #[test]
    fn valid_restriction_is_buffered_with_remapped_via() {
        let mut index = NodeIndex::in_memory();
        // Node 5 shares a cell with node 4, so 5 remaps to 4.
        index.register(grid_cell(50.000010, 4.000010, 5.0), 4).unwrap();
        index.register(grid_cell(50.000020, 4.000020, 5.0), 5).unwrap();
        index.seal().unwrap();
        index.mark_way_kept(10).unwrap();
        index.mark_way_kept(20).unwrap();

        let mut collector = RestrictionCollector::new();
        let relation = restriction_relation(
            100,
            vec![
                member("from", MemberType::Way, 10),
                member("via", MemberType::Node, 5),
                member("to", MemberType::Way, 20),
            ],
        );

        assert!(matches!(
            collector.collect(&relation, &index).unwrap(),
            RestrictionOutcome::Buffered
        ));

        let flushed = collector.flush();
        assert_eq!(flushed.len(), 1);
        assert_eq!(flushed[0].relation_id, 100);
        assert_eq!(flushed[0].via_node, 4);
        assert_eq!(flushed[0].from_way, 10);
        assert_eq!(flushed[0].to_way, 20);
        assert_eq!(flushed[0].kind, "no_left_turn");
    }

    #[test]
    fn two_via_members_are_rejected_as_multi_via() {
        let index = index_with((5, 50.0, 4.0), &[10, 20]);
        let mut collector = RestrictionCollector::new();
        let relation = restriction_relation(
            100,
            vec![
                member("from", MemberType::Way, 10),
                member("via", MemberType::Node, 5),
                member("via", MemberType::Node, 6),
                member("to", MemberType::Way, 20),
            ],
        );

        assert!(matches!(
            collector.collect(&relation, &index).unwrap(),
            RestrictionOutcome::Rejected(RejectReason::MultiVia)
        ));
        assert!(collector.is_empty());
    }

    #[test]
    fn multi_via_wins_over_unresolved_members() {
        // Via nodes unknown AND duplicated: the via count check runs first.
        let index = index_with((5, 50.0, 4.0), &[]);
        let mut collector = RestrictionCollector::new();
        let relation = restriction_relation(
            100,
            vec![
                member("via", MemberType::Node, 888),
                member("via", MemberType::Node, 999),
            ],
        );

        assert!(matches!(
            collector.collect(&relation, &index).unwrap(),
            RestrictionOutcome::Rejected(RejectReason::MultiVia)
        ));
    }

    #[test]
    fn unknown_via_node_is_unresolved() {
        let index = index_with((5, 50.0, 4.0), &[10, 20]);
        let mut collector = RestrictionCollector::new();
        let relation = restriction_relation(
            100,
            vec![
                member("from", MemberType::Way, 10),
                member("via", MemberType::Node, 999),
                member("to", MemberType::Way, 20),
            ],
        );

        assert!(matches!(
            collector.collect(&relation, &index).unwrap(),
            RestrictionOutcome::Rejected(RejectReason::Unresolved)
        ));
    }

    #[test]
    fn dropped_from_way_is_unresolved() {
        let index = index_with((5, 50.0, 4.0), &[20]); // way 10 not kept
        let mut collector = RestrictionCollector::new();
        let relation = restriction_relation(
            100,
            vec![
                member("from", MemberType::Way, 10),
                member("via", MemberType::Node, 5),
                member("to", MemberType::Way, 20),
            ],
        );

        assert!(matches!(
            collector.collect(&relation, &index).unwrap(),
            RestrictionOutcome::Rejected(RejectReason::Unresolved)
        ));
    }

    #[test]
    fn non_restriction_relation_is_ignored() {
        let index = index_with((5, 50.0, 4.0), &[]);
        let mut collector = RestrictionCollector::new();
        let mut tags = HashMap::new();
        tags.insert("type".to_string(), "multipolygon".to_string());
        let relation = OsmRelation {
            id: 100,
            members: vec![],
            tags,
        };

        assert!(matches!(
            collector.collect(&relation, &index).unwrap(),
            RestrictionOutcome::NotARestriction
        ));
    }

    #[test]
    fn via_way_restriction_is_unresolved() {
        let index = index_with((5, 50.0, 4.0), &[10, 20]);
        let mut collector = RestrictionCollector::new();
        let relation = restriction_relation(
            100,
            vec![
                member("from", MemberType::Way, 10),
                member("via", MemberType::Way, 15),
                member("to", MemberType::Way, 20),
            ],
        );

        assert!(matches!(
            collector.collect(&relation, &index).unwrap(),
            RestrictionOutcome::Rejected(RejectReason::Unresolved)
        ));
    }
}
