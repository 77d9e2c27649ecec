//! Disk-backed node deduplication index.
//!
//! Maps grid cells and original node ids to the representative node id chosen
//! for each cell. Planet-scale inputs hold billions of nodes, so the index
//! lives in LMDB on disk with a bounded in-memory write-back buffer; resident
//! memory stays within a fixed budget no matter how many keys are written.
//! The store is ephemeral: the run discards it on drop.

use crate::error::{Result, ShrinkError};
use crate::grid::GridCell;
use lmdb::{Database, Environment, Transaction, WriteFlags};
use std::collections::HashMap;
use std::fs;
use tempfile::TempDir;

/// Entries buffered before a batched LMDB write transaction. At ~33 bytes of
/// key/value per entry the buffer tops out around tens of MB including map
/// overhead, which is the index's whole resident-memory budget.
const FLUSH_THRESHOLD: usize = 256 * 1024;

const CELL_PREFIX: u8 = b'c';
const NODE_PREFIX: u8 = b'n';
const WAY_PREFIX: u8 = b'w';

enum Backend {
    Lmdb {
        env: Environment,
        db: Database,
        // Kept alive for RAII cleanup of the database file on drop.
        _temp_dir: TempDir,
    },
    /// BTreeMap stand-in for small test fixtures; same contract, no disk.
    Memory(std::collections::BTreeMap<Vec<u8>, i64>),
}

pub struct NodeIndex {
    backend: Backend,
    pending: HashMap<Vec<u8>, i64>,
    sealed: bool,
}

fn cell_key(cell: GridCell) -> Vec<u8> {
    let mut key = Vec::with_capacity(17);
    key.push(CELL_PREFIX);
    key.extend_from_slice(&cell.lat_bucket.to_be_bytes());
    key.extend_from_slice(&cell.lon_bucket.to_be_bytes());
    key
}

fn id_key(prefix: u8, id: i64) -> Vec<u8> {
    let mut key = Vec::with_capacity(9);
    key.push(prefix);
    key.extend_from_slice(&id.to_be_bytes());
    key
}

impl NodeIndex {
    /// Open a disk-backed index in a fresh temporary directory.
    pub fn open() -> Result<Self> {
        let temp_dir = TempDir::new()?;
        let path = temp_dir.path().join("node-index");
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let env = Environment::new()
            .set_flags(lmdb::EnvironmentFlags::NO_SUB_DIR)
            .set_map_size(500 * 1024 * 1024 * 1024) // sparse; sized for planet files
            .open(&path)?;
        let db = env.open_db(None)?;

        Ok(NodeIndex {
            backend: Backend::Lmdb {
                env,
                db,
                _temp_dir: temp_dir,
            },
            pending: HashMap::new(),
            sealed: false,
        })
    }

    /// Open an in-memory index for small fixtures.
    pub fn in_memory() -> Self {
        NodeIndex {
            backend: Backend::Memory(Default::default()),
            pending: HashMap::new(),
            sealed: false,
        }
    }

    /// Register one node, exactly once, in stream order.
    ///
    /// The first node seen in a cell becomes that cell's representative and
    /// is aliased to itself; every later node in the cell is aliased to it.
    /// Returns the representative id either way. First-seen order, not id
    /// value, decides the representative, so identical input order always
    /// reproduces the same choice.
    pub fn register(&mut self, cell: GridCell, node_id: i64) -> Result<i64> {
        if self.sealed {
            return Err(ShrinkError::IndexStorage(
                "register called on sealed index".into(),
            ));
        }
        let representative = match self.get(&cell_key(cell))? {
            Some(rep) => rep,
            None => {
                self.put(cell_key(cell), node_id)?;
                node_id
            }
        };
        self.put(id_key(NODE_PREFIX, node_id), representative)?;
        Ok(representative)
    }

    /// Representative id for a cell, if any node has been registered in it.
    pub fn lookup_cell(&self, cell: GridCell) -> Result<Option<i64>> {
        self.get(&cell_key(cell))
    }

    /// Representative id for an original node id, if it was seen in the node
    /// phase.
    pub fn lookup_node(&self, node_id: i64) -> Result<Option<i64>> {
        self.get(&id_key(NODE_PREFIX, node_id))
    }

    /// End of the node phase: flush buffered writes and refuse further
    /// `register` calls. Cell and node keys are read-only from here on.
    pub fn seal(&mut self) -> Result<()> {
        self.flush()?;
        self.sealed = true;
        Ok(())
    }

    /// Record that a way survived filtering. Restriction resolution later
    /// needs to know which from/to ways still exist in the output.
    pub fn mark_way_kept(&mut self, way_id: i64) -> Result<()> {
        self.put(id_key(WAY_PREFIX, way_id), way_id)
    }

    pub fn is_way_kept(&self, way_id: i64) -> Result<bool> {
        Ok(self.get(&id_key(WAY_PREFIX, way_id))?.is_some())
    }

    fn put(&mut self, key: Vec<u8>, value: i64) -> Result<()> {
        self.pending.insert(key, value);
        if self.pending.len() >= FLUSH_THRESHOLD {
            self.flush()?;
        }
        Ok(())
    }

    fn get(&self, key: &[u8]) -> Result<Option<i64>> {
        if let Some(&v) = self.pending.get(key) {
            return Ok(Some(v));
        }
        match &self.backend {
            Backend::Lmdb { env, db, .. } => {
                let txn = env.begin_ro_txn()?;
                match txn.get(*db, &key) {
                    Ok(value) => {
                        let bytes: [u8; 8] = value.try_into().map_err(|_| {
                            ShrinkError::IndexStorage(format!(
                                "malformed index value ({} bytes)",
                                value.len()
                            ))
                        })?;
                        Ok(Some(i64::from_be_bytes(bytes)))
                    }
                    Err(lmdb::Error::NotFound) => Ok(None),
                    Err(e) => Err(e.into()),
                }
            }
            Backend::Memory(map) => Ok(map.get(key).copied()),
        }
    }

    /// Write all buffered entries in a single transaction and empty the
    /// buffer. Called when the buffer hits its cap and at `seal`.
    fn flush(&mut self) -> Result<()> {
        if self.pending.is_empty() {
            return Ok(());
        }
        match &mut self.backend {
            Backend::Lmdb { env, db, .. } => {
                let mut txn = env.begin_rw_txn()?;
                for (key, value) in self.pending.drain() {
                    txn.put(*db, &key, &value.to_be_bytes(), WriteFlags::empty())?;
                }
                txn.commit()?;
            }
            Backend::Memory(map) => {
                map.extend(self.pending.drain());
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grid::grid_cell;

    fn cell(lat: f64, lon: f64) -> GridCell {
        grid_cell(lat, lon, 5.0)
    }

    #[test]
    fn first_node_in_cell_becomes_representative() -> Result<()> {
        let mut index = NodeIndex::in_memory();

        let c = cell(50.000010, 4.000010);
        assert_eq!(index.register(c, 1)?, 1);
        assert_eq!(index.register(c, 2)?, 1);

        assert_eq!(index.lookup_cell(c)?, Some(1));
        assert_eq!(index.lookup_node(1)?, Some(1)); // self-alias
        assert_eq!(index.lookup_node(2)?, Some(1));
        assert_eq!(index.lookup_node(3)?, None);
        Ok(())
    }

    #[test]
    fn representative_is_first_seen_not_smallest_id() -> Result<()> {
        let mut index = NodeIndex::in_memory();

        let c = cell(50.0, 4.0);
        assert_eq!(index.register(c, 900)?, 900);
        assert_eq!(index.register(c, 7)?, 900);
        assert_eq!(index.lookup_node(7)?, Some(900));
        Ok(())
    }

    #[test]
    fn sealed_index_rejects_registration() -> Result<()> {
        let mut index = NodeIndex::in_memory();
        index.register(cell(50.0, 4.0), 1)?;
        index.seal()?;

        assert!(index.register(cell(51.0, 5.0), 2).is_err());
        // Reads still work after sealing.
        assert_eq!(index.lookup_node(1)?, Some(1));
        Ok(())
    }

    #[test]
    fn way_marks_are_independent_of_node_keys() -> Result<()> {
        let mut index = NodeIndex::in_memory();
        index.register(cell(50.0, 4.0), 42)?;
        index.seal()?;

        index.mark_way_kept(42)?;
        assert!(index.is_way_kept(42)?);
        assert!(!index.is_way_kept(43)?);
        Ok(())
    }

    #[test]
    fn lmdb_backend_round_trip() -> Result<()> {
        let mut index = NodeIndex::open()?;

        let c = cell(50.000010, 4.000010);
        assert_eq!(index.register(c, 1)?, 1);
        assert_eq!(index.register(c, 2)?, 1);
        index.seal()?;

        assert_eq!(index.lookup_cell(c)?, Some(1));
        assert_eq!(index.lookup_node(2)?, Some(1));
        assert_eq!(index.lookup_node(99)?, None);
        Ok(())
    }

    #[test]
    fn lmdb_backend_survives_buffer_flushes() -> Result<()> {
        let mut index = NodeIndex::open()?;

        // Enough distinct cells to force several batched write transactions.
        let n = (super::FLUSH_THRESHOLD * 2 + 100) as i64;
        for i in 0..n {
            let c = GridCell {
                lat_bucket: i,
                lon_bucket: -i,
            };
            assert_eq!(index.register(c, i)?, i);
        }
        index.seal()?;

        for i in (0..n).step_by(997) {
            assert_eq!(index.lookup_node(i)?, Some(i));
        }
        Ok(())
    }
}
