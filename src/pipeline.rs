//! Single-pass shrink pipeline: nodes, ways, relations, finalize.

use crate::config::Config;
use crate::error::{Result, ShrinkError};
use crate::filter::{WayFilter, WayOutcome};
use crate::grid::{grid_cell, nano_to_degrees, snap_coordinate};
use crate::node_index::NodeIndex;
use crate::osm::{MemberType, OsmNode, OsmRelation, OsmRelationMember, Record, RecordKind};
use crate::restrictions::{RestrictionCollector, RestrictionOutcome, TurnRestriction};
use crate::stats::Stats;
use log::{debug, info};
use std::collections::HashMap;
use std::sync::mpsc;
use std::thread;
use std::time::Instant;

/// Bound on in-flight records between the decode thread and the processing
/// thread. Small and fixed so pipelining never grows the memory footprint.
const PIPELINE_DEPTH: usize = 1024;

const PROGRESS_INTERVAL: u64 = 1_000_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum Phase {
    Nodes,
    Ways,
    Relations,
}

impl Phase {
    fn of(kind: RecordKind) -> Phase {
        match kind {
            RecordKind::Node => Phase::Nodes,
            RecordKind::Way => Phase::Ways,
            RecordKind::Relation => Phase::Relations,
        }
    }
}

/// The shrink engine. Feed it records in the three-phase order the wire
/// format guarantees, then call [`Shrinker::finalize`].
///
/// Owns all mutable run state: the node index, the restriction buffer, and
/// the counters. Processing is strictly sequential; representative selection
/// depends on encounter order and must never be parallelized.
pub struct Shrinker {
    config: Config,
    filter: WayFilter,
    index: NodeIndex,
    collector: RestrictionCollector,
    stats: Stats,
    phase: Phase,
    records_seen: u64,
    started: Instant,
}

impl Shrinker {
    /// Build a pipeline with a disk-backed node index. Configuration errors
    /// surface here, before any record is processed.
    pub fn new(config: Config) -> Result<Self> {
        config.validate()?;
        let index = NodeIndex::open()?;
        Ok(Self::with_index(config, index))
    }

    /// Build a pipeline with an in-memory node index, for small fixtures.
    pub fn new_in_memory(config: Config) -> Result<Self> {
        config.validate()?;
        Ok(Self::with_index(config, NodeIndex::in_memory()))
    }

    fn with_index(config: Config, index: NodeIndex) -> Self {
        let filter = WayFilter::new(&config);
        Shrinker {
            config,
            filter,
            index,
            collector: RestrictionCollector::new(),
            stats: Stats::default(),
            phase: Phase::Nodes,
            records_seen: 0,
            started: Instant::now(),
        }
    }

    /// Process one record, returning the output record if one is emitted at
    /// this stream position. Buffered restrictions come out at finalize
    /// instead.
    ///
    /// A record kind belonging to an earlier phase than the current one
    /// (e.g. a node after the first way) is structural corruption and aborts
    /// the run.
    pub fn process(&mut self, record: &Record) -> Result<Option<Record>> {
        self.advance_phase(record.kind())?;

        self.records_seen += 1;
        if self.records_seen % PROGRESS_INTERVAL == 0 {
            info!(
                "processed {} records ({} nodes in, {} ways in)",
                self.records_seen, self.stats.nodes_in, self.stats.ways_in
            );
        }

        match record {
            Record::Node(node) => Ok(self.process_node(node)?.map(Record::Node)),
            Record::Way(way) => {
                self.stats.ways_in += 1;
                match self.filter.filter(way, &self.index)? {
                    WayOutcome::Emit(filtered) => {
                        self.index.mark_way_kept(filtered.id)?;
                        self.stats.ways_out += 1;
                        Ok(Some(Record::Way(filtered)))
                    }
                    WayOutcome::Drop(reason) => {
                        debug!("dropped way {} ({reason:?})", way.id);
                        self.stats.record_dropped_way(reason);
                        Ok(None)
                    }
                }
            }
            Record::Relation(relation) => {
                self.stats.relations_in += 1;
                if !self.config.preserve_restrictions {
                    return Ok(None);
                }
                match self.collector.collect(relation, &self.index)? {
                    RestrictionOutcome::Buffered | RestrictionOutcome::NotARestriction => Ok(None),
                    RestrictionOutcome::Rejected(reason) => {
                        debug!("rejected restriction {} ({reason:?})", relation.id);
                        self.stats.record_rejected_restriction(relation.id, reason);
                        Ok(None)
                    }
                }
            }
        }
    }

    fn process_node(&mut self, node: &OsmNode) -> Result<Option<OsmNode>> {
        self.stats.nodes_in += 1;

        let resolution = self.config.grid_resolution_meters;
        let cell = grid_cell(node.lat, node.lon, resolution);
        let representative = self.index.register(cell, node.id)?;
        if representative != node.id {
            // Aliased onto an earlier node in the same cell; collapsed away.
            return Ok(None);
        }

        self.stats.nodes_out += 1;
        let (lat_nano, lon_nano) = snap_coordinate(node.lat, node.lon, resolution);
        Ok(Some(OsmNode {
            id: node.id,
            lat: nano_to_degrees(lat_nano),
            lon: nano_to_degrees(lon_nano),
            // Node tags are not routing data; the output carries coordinates
            // and connectivity only.
            tags: HashMap::new(),
        }))
    }

    fn advance_phase(&mut self, kind: RecordKind) -> Result<()> {
        let incoming = Phase::of(kind);
        if incoming < self.phase {
            return Err(ShrinkError::CorruptInput(format!(
                "{} record arrived after the {} phase ended",
                kind.name(),
                match self.phase {
                    Phase::Nodes => "node",
                    Phase::Ways => "way",
                    Phase::Relations => "relation",
                }
            )));
        }
        if incoming > self.phase {
            if self.phase == Phase::Nodes {
                // Node phase is over; the index becomes read-only.
                self.index.seal()?;
                info!(
                    "node phase complete: {} nodes in, {} representatives",
                    self.stats.nodes_in, self.stats.nodes_out
                );
            }
            self.phase = incoming;
        }
        Ok(())
    }

    /// Flush buffered restrictions and produce the final statistics. The
    /// node index is released here.
    pub fn finalize(mut self) -> Result<(Vec<Record>, Stats)> {
        // An all-nodes input never left the node phase; seal for consistency.
        if self.phase == Phase::Nodes {
            self.index.seal()?;
        }

        let restrictions = self.collector.flush();
        self.stats.restrictions_out = restrictions.len() as u64;
        let records = restrictions
            .into_iter()
            .map(|r| Record::Relation(restriction_to_relation(r)))
            .collect();

        self.stats.elapsed = self.started.elapsed();
        info!(
            "finalize: {:.1}% node reduction, {:.1}% way reduction, {} restrictions kept",
            self.stats.node_reduction_percent(),
            self.stats.way_reduction_percent(),
            self.stats.restrictions_out
        );
        Ok((records, self.stats))
    }
}

/// Re-encode a buffered restriction as a relation record for the output
/// stream.
fn restriction_to_relation(restriction: TurnRestriction) -> OsmRelation {
    let mut tags = HashMap::new();
    tags.insert("type".to_string(), "restriction".to_string());
    tags.insert("restriction".to_string(), restriction.kind);
    OsmRelation {
        id: restriction.relation_id,
        members: vec![
            OsmRelationMember {
                member_type: MemberType::Way,
                member_id: restriction.from_way,
                role: "from".to_string(),
            },
            OsmRelationMember {
                member_type: MemberType::Node,
                member_id: restriction.via_node,
                role: "via".to_string(),
            },
            OsmRelationMember {
                member_type: MemberType::Way,
                member_id: restriction.to_way,
                role: "to".to_string(),
            },
        ],
        tags,
    }
}

/// Drive the pipeline over a record source, pushing emitted records into
/// `sink`. The terminal [`Stats`] value is the return, not a sink record, so
/// a stream missing it is detectably truncated.
pub fn run<I, F>(config: Config, records: I, mut sink: F) -> Result<Stats>
where
    I: IntoIterator<Item = Record>,
    F: FnMut(Record) -> Result<()>,
{
    let mut shrinker = Shrinker::new(config)?;
    for record in records {
        if let Some(out) = shrinker.process(&record)? {
            sink(out)?;
        }
    }
    let (flushed, stats) = shrinker.finalize()?;
    for record in flushed {
        sink(record)?;
    }
    Ok(stats)
}

/// Like [`run`], but decodes on a separate thread with a bounded
/// single-producer/single-consumer handoff, overlapping input latency with
/// processing. Record order is preserved; this changes throughput, never
/// results.
pub fn run_piped<I, F>(config: Config, records: I, mut sink: F) -> Result<Stats>
where
    I: IntoIterator<Item = Record> + Send + 'static,
    I::IntoIter: Send,
    F: FnMut(Record) -> Result<()>,
{
    let (tx, rx) = mpsc::sync_channel::<Record>(PIPELINE_DEPTH);
    let producer = thread::spawn(move || {
        for record in records {
            // A closed channel means the consumer hit a fatal error and
            // stopped; just stop producing.
            if tx.send(record).is_err() {
                return;
            }
        }
    });

    let mut shrinker = Shrinker::new(config)?;
    let mut result: Result<()> = Ok(());
    while let Ok(record) = rx.recv() {
        match shrinker.process(&record) {
            Ok(Some(out)) => {
                if let Err(e) = sink(out) {
                    result = Err(e);
                    break;
                }
            }
            Ok(None) => {}
            Err(e) => {
                result = Err(e);
                break;
            }
        }
    }
    // Dropping the receiver unblocks the producer if we bailed early.
    drop(rx);
    producer
        .join()
        .map_err(|_| ShrinkError::Io(std::io::Error::other("decode thread panicked")))?;
    result?;

    let (flushed, stats) = shrinker.finalize()?;
    for record in flushed {
        sink(record)?;
    }
    Ok(stats)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(id: i64, lat: f64, lon: f64) -> Record {
        Record::Node(OsmNode {
            id,
            lat,
            lon,
            tags: HashMap::new(),
        })
    }

    fn way(id: i64, refs: &[i64]) -> Record {
        let mut tags = HashMap::new();
        tags.insert("highway".to_string(), "residential".to_string());
        Record::Way(crate::osm::OsmWay {
            id,
            node_refs: refs.to_vec(),
            tags,
        })
    }

    #[test]
    fn node_after_way_is_corrupt_input() {
        let mut shrinker = Shrinker::new_in_memory(Config::default()).unwrap();
        shrinker.process(&node(1, 50.0, 4.0)).unwrap();
        shrinker.process(&node(2, 50.1, 4.1)).unwrap();
        shrinker.process(&way(10, &[1, 2])).unwrap();

        let err = shrinker.process(&node(3, 50.2, 4.2)).unwrap_err();
        assert!(matches!(err, ShrinkError::CorruptInput(_)));
    }

    #[test]
    fn way_after_relation_is_corrupt_input() {
        let mut shrinker = Shrinker::new_in_memory(Config::default()).unwrap();
        shrinker.process(&node(1, 50.0, 4.0)).unwrap();
        let relation = Record::Relation(OsmRelation {
            id: 100,
            members: vec![],
            tags: HashMap::new(),
        });
        shrinker.process(&relation).unwrap();

        let err = shrinker.process(&way(10, &[1])).unwrap_err();
        assert!(matches!(err, ShrinkError::CorruptInput(_)));
    }

    #[test]
    fn construction_fails_on_bad_config() {
        let config = Config {
            grid_resolution_meters: -1.0,
            ..Default::default()
        };
        assert!(matches!(
            Shrinker::new_in_memory(config),
            Err(ShrinkError::Configuration(_))
        ));
    }
}
