//! Shrink OSM PBF extracts into minimized, routing-ready record streams.
//!
//! Coordinates are quantized to a fixed metric grid, co-located nodes are
//! collapsed onto one representative per grid cell, ways are filtered down
//! to a routing tag profile, and turn restrictions are remapped so the
//! output keeps full road-network connectivity and turn legality at a
//! fraction of the input size.

pub mod config;
pub mod error;
pub mod filter;
pub mod grid;
pub mod node_index;
pub mod osm;
pub mod pipeline;
pub mod restrictions;
pub mod stats;

pub use config::{Config, MissingNodePolicy};
pub use error::{Result, ShrinkError};
pub use filter::{WayFilter, WayOutcome};
pub use grid::{grid_cell, nano_to_degrees, snap_coordinate, GridCell};
pub use node_index::NodeIndex;
pub use osm::{MemberType, OsmNode, OsmRelation, OsmRelationMember, OsmWay, Record, RecordKind};
pub use pipeline::{run, run_piped, Shrinker};
pub use restrictions::{RestrictionCollector, RestrictionOutcome, TurnRestriction};
pub use stats::{DropReason, RejectReason, Stats};
