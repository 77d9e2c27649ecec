use anyhow::{Context, Result};
use clap::{Arg, Command};
use osmpbf::{Element, ElementReader};
use pbfshrink::{
    Config, MemberType, MissingNodePolicy, OsmNode, OsmRelation, OsmRelationMember, OsmWay,
    Record, Stats,
};
use serde_json::json;
use std::collections::HashMap;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;
use std::sync::mpsc;
use std::thread;

fn main() -> Result<()> {
    env_logger::init();

    let matches = Command::new("pbfshrink")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Shrink OSM PBF files into minimized routing-ready JSON streams")
        .arg(
            Arg::new("input")
                .help("Input PBF file path")
                .required(true)
                .index(1),
        )
        .arg(
            Arg::new("output")
                .short('o')
                .long("output")
                .value_name("FILE")
                .help("Output file, newline-delimited JSON (stdout if not specified)"),
        )
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("FILE")
                .help("JSON configuration file; CLI flags override its values"),
        )
        .arg(
            Arg::new("resolution")
                .short('r')
                .long("resolution")
                .value_name("METERS")
                .value_parser(clap::value_parser!(f64))
                .help("Grid resolution in meters (presets: 1, 2, 5, 10; default 5)"),
        )
        .arg(
            Arg::new("tags")
                .short('t')
                .long("tags")
                .value_name("CLASSES")
                .help("Comma-separated highway classes to keep (e.g., primary,secondary)"),
        )
        .arg(
            Arg::new("no-restrictions")
                .long("no-restrictions")
                .action(clap::ArgAction::SetTrue)
                .help("Drop turn restriction relations instead of remapping them"),
        )
        .arg(
            Arg::new("skip-missing-nodes")
                .long("skip-missing-nodes")
                .action(clap::ArgAction::SetTrue)
                .help("Drop ways with unknown node refs instead of aborting"),
        )
        .arg(
            Arg::new("stats-json")
                .long("stats-json")
                .value_name("FILE")
                .help("Write the run statistics as JSON to this file"),
        )
        .get_matches();

    let input_path = matches.get_one::<String>("input").unwrap();
    let output_path = matches.get_one::<String>("output");
    let stats_json_path = matches.get_one::<String>("stats-json");

    if !Path::new(input_path).exists() {
        anyhow::bail!("Input file does not exist: {}", input_path);
    }

    let mut config = match matches.get_one::<String>("config") {
        Some(path) => {
            let text = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file: {}", path))?;
            serde_json::from_str(&text)
                .with_context(|| format!("Failed to parse config file: {}", path))?
        }
        None => Config::default(),
    };
    if let Some(&resolution) = matches.get_one::<f64>("resolution") {
        config.grid_resolution_meters = resolution;
    }
    if let Some(tags) = matches.get_one::<String>("tags") {
        config.tag_include_set = tags.split(',').map(|t| t.trim().to_string()).collect();
    }
    if matches.get_flag("no-restrictions") {
        config.preserve_restrictions = false;
    }
    if matches.get_flag("skip-missing-nodes") {
        config.missing_node_policy = MissingNodePolicy::Skip;
    }

    let result = shrink_file(input_path, output_path, stats_json_path, config);
    if result.is_err() {
        // Partial output is unusable once a fatal error occurred.
        if let Some(path) = output_path {
            let _ = std::fs::remove_file(path);
        }
    }
    result
}

fn shrink_file(
    input_path: &str,
    output_path: Option<&String>,
    stats_json_path: Option<&String>,
    config: Config,
) -> Result<()> {
    let mut writer: Box<dyn Write> = match output_path {
        Some(path) => {
            let file = File::create(path)
                .with_context(|| format!("Failed to create output file: {}", path))?;
            Box::new(BufWriter::new(file))
        }
        None => Box::new(std::io::stdout()),
    };

    // Decode on a separate thread and hand records over a bounded channel so
    // PBF decompression overlaps with processing.
    let (tx, rx) = mpsc::sync_channel::<Record>(1024);
    let decode_thread = {
        let input_path = input_path.to_string();
        thread::spawn(move || -> Result<()> {
            let reader = ElementReader::from_path(&input_path)
                .with_context(|| format!("Failed to open PBF file: {}", input_path))?;
            reader
                .for_each(|element| {
                    // A closed channel means processing stopped; nothing left
                    // to do but drain the reader.
                    let _ = tx.send(element_to_record(element));
                })
                .context("Failed to read PBF elements")?;
            Ok(())
        })
    };

    let stats = pbfshrink::run(config, rx.into_iter(), |record| {
        writeln!(writer, "{}", record_to_json(&record)).map_err(pbfshrink::ShrinkError::from)
    })
    .context("Shrink pipeline failed")?;

    writer.flush()?;
    decode_thread
        .join()
        .map_err(|_| anyhow::anyhow!("Decode thread panicked"))??;

    report(&stats);
    if let Some(path) = stats_json_path {
        let file = File::create(path)
            .with_context(|| format!("Failed to create stats file: {}", path))?;
        serde_json::to_writer_pretty(BufWriter::new(file), &stats)?;
    }

    Ok(())
}

fn element_to_record(element: Element) -> Record {
    match element {
        Element::Node(node) => Record::Node(OsmNode {
            id: node.id(),
            lat: node.lat(),
            lon: node.lon(),
            tags: collect_tags(node.tags()),
        }),
        Element::DenseNode(node) => Record::Node(OsmNode {
            id: node.id(),
            lat: node.lat(),
            lon: node.lon(),
            tags: collect_tags(node.tags()),
        }),
        Element::Way(way) => Record::Way(OsmWay {
            id: way.id(),
            node_refs: way.refs().collect(),
            tags: collect_tags(way.tags()),
        }),
        Element::Relation(relation) => {
            let members = relation
                .members()
                .map(|member| {
                    let member_type = match member.member_type {
                        osmpbf::RelMemberType::Node => MemberType::Node,
                        osmpbf::RelMemberType::Way => MemberType::Way,
                        osmpbf::RelMemberType::Relation => MemberType::Relation,
                    };
                    OsmRelationMember {
                        member_type,
                        member_id: member.member_id,
                        role: member.role().unwrap_or("").to_string(),
                    }
                })
                .collect();
            Record::Relation(OsmRelation {
                id: relation.id(),
                members,
                tags: collect_tags(relation.tags()),
            })
        }
    }
}

fn collect_tags<'a, I: Iterator<Item = (&'a str, &'a str)>>(tags: I) -> HashMap<String, String> {
    tags.map(|(k, v)| (k.to_string(), v.to_string())).collect()
}

fn record_to_json(record: &Record) -> String {
    let value = match record {
        Record::Node(node) => json!({
            "id": node.id,
            "type": "node",
            "lat": node.lat,
            "lon": node.lon,
            "tags": node.tags,
        }),
        Record::Way(way) => json!({
            "id": way.id,
            "type": "way",
            "nodes": way.node_refs,
            "tags": way.tags,
        }),
        Record::Relation(relation) => {
            let members: Vec<serde_json::Value> = relation
                .members
                .iter()
                .map(|member| {
                    json!({
                        "type": match member.member_type {
                            MemberType::Node => "node",
                            MemberType::Way => "way",
                            MemberType::Relation => "relation",
                        },
                        "ref": member.member_id,
                        "role": member.role,
                    })
                })
                .collect();
            json!({
                "id": relation.id,
                "type": "relation",
                "members": members,
                "tags": relation.tags,
            })
        }
    };
    value.to_string()
}

fn report(stats: &Stats) {
    eprintln!(
        "Nodes: {} -> {} ({:.1}% reduction)",
        stats.nodes_in,
        stats.nodes_out,
        stats.node_reduction_percent()
    );
    eprintln!(
        "Ways: {} -> {} ({:.1}% reduction)",
        stats.ways_in,
        stats.ways_out,
        stats.way_reduction_percent()
    );
    eprintln!(
        "  dropped: {} tag-excluded, {} missing-node, {} degenerate",
        stats.ways_dropped_tag_excluded,
        stats.ways_dropped_missing_node,
        stats.ways_dropped_degenerate
    );
    eprintln!(
        "Restrictions: {} kept, {} rejected ({} multi-via, {} unresolved)",
        stats.restrictions_out,
        stats.rejected_restrictions.len(),
        stats.restrictions_rejected_multi_via,
        stats.restrictions_rejected_unresolved
    );
    eprintln!("Elapsed: {:.1}s", stats.elapsed.as_secs_f64());
}
