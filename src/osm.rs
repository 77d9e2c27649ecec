use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OsmNode {
    pub id: i64,
    pub lat: f64,
    pub lon: f64,
    pub tags: HashMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OsmWay {
    pub id: i64,
    pub node_refs: Vec<i64>,
    pub tags: HashMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum MemberType {
    Node,
    Way,
    Relation,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OsmRelationMember {
    pub member_type: MemberType,
    pub member_id: i64,
    pub role: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OsmRelation {
    pub id: i64,
    pub members: Vec<OsmRelationMember>,
    pub tags: HashMap<String, String>,
}

impl OsmRelation {
    /// True if this relation is tagged `type=restriction`.
    pub fn is_turn_restriction(&self) -> bool {
        self.tags.get("type").is_some_and(|v| v == "restriction")
    }

    /// The `restriction` tag value (e.g. "no_left_turn", "only_straight_on").
    pub fn restriction_kind(&self) -> Option<&str> {
        self.tags.get("restriction").map(String::as_str)
    }
}

/// One decoded record in the three-phase stream order the PBF format
/// guarantees: all nodes, then all ways, then all relations.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Record {
    Node(OsmNode),
    Way(OsmWay),
    Relation(OsmRelation),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum RecordKind {
    Node,
    Way,
    Relation,
}

impl Record {
    pub fn id(&self) -> i64 {
        match self {
            Record::Node(node) => node.id,
            Record::Way(way) => way.id,
            Record::Relation(relation) => relation.id,
        }
    }

    pub fn kind(&self) -> RecordKind {
        match self {
            Record::Node(_) => RecordKind::Node,
            Record::Way(_) => RecordKind::Way,
            Record::Relation(_) => RecordKind::Relation,
        }
    }
}

impl RecordKind {
    pub fn name(&self) -> &'static str {
        match self {
            RecordKind::Node => "node",
            RecordKind::Way => "way",
            RecordKind::Relation => "relation",
        }
    }
}
