//! Host key-value store abstraction.
//!
//! The underlying key-value store's transactional API is an external
//! collaborator (see the purpose/scope notes): production backends are
//! not specified here. This module defines the minimal trait surface
//! the aggregator actually drives — MVCC read views, read-write
//! transactions, big-endian key-range cursors, `first_key`/`last_key` —
//! plus [`MemDb`], a `BTreeMap`-backed in-memory implementation used by
//! tests and local experimentation. `MemDb` is not a production
//! backend.

use crate::error::{AggError, AggResult};
use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use std::collections::BTreeMap;

/// A table name within the host store. The aggregator addresses tables
/// by name (e.g. `"AccountHistoryKeys"`, `"AccountIdx"`,
/// `"AccountHistoryVals"`, `"AccountSettings"`, and analogous
/// quadruples/pairs for the other domains); table layout beyond naming
/// is owned by the domain implementations in `aggstate-storage`.
pub type TableId = &'static str;

/// A read view over the host store: either a read-only MVCC snapshot or
/// the read half of a read-write transaction.
pub trait ReadTx: Send + Sync {
    /// Point lookup.
    fn get(&self, table: TableId, key: &[u8]) -> AggResult<Option<Vec<u8>>>;

    /// Inclusive-from, exclusive-to range scan, returned in
    /// big-endian key order. Materialized eagerly: adequate for the
    /// in-memory reference backend and for the step sizes used in
    /// tests; production backends should favor a lazy cursor, which is
    /// an implementation detail of the external collaborator.
    fn range(&self, table: TableId, from: &[u8], to: &[u8]) -> AggResult<Vec<(Vec<u8>, Vec<u8>)>>;

    /// The lexicographically first key in the table, if any.
    fn first_key(&self, table: TableId) -> AggResult<Option<Vec<u8>>>;

    /// The lexicographically last key in the table, if any.
    fn last_key(&self, table: TableId) -> AggResult<Option<Vec<u8>>>;
}

/// A read-write transaction. Writes are not visible to other
/// transactions until [`WriteTx::commit`].
pub trait WriteTx: ReadTx {
    /// Upsert a key.
    fn put(&mut self, table: TableId, key: &[u8], value: &[u8]) -> AggResult<()>;

    /// Delete a key; a no-op if absent.
    fn delete(&mut self, table: TableId, key: &[u8]) -> AggResult<()>;

    /// Delete every key in `[from, to)`.
    fn delete_range(&mut self, table: TableId, from: &[u8], to: &[u8]) -> AggResult<()>;

    /// Commit the transaction, making writes visible to subsequent views.
    fn commit(self: Box<Self>) -> AggResult<()>;
}

/// The host key-value store.
pub trait Db: Send + Sync {
    /// Open a read-only MVCC view.
    fn view(&self) -> AggResult<Box<dyn ReadTx + '_>>;

    /// Begin a read-write transaction.
    fn begin_rw(&self) -> AggResult<Box<dyn WriteTx + '_>>;
}

type TableMap = BTreeMap<Vec<u8>, Vec<u8>>;

/// An in-memory, `BTreeMap`-backed [`Db`] for tests and local
/// experimentation. Not a production backend: `view()` clones the
/// entire store to obtain a snapshot, which is correct but unsuited to
/// large datasets.
#[derive(Default)]
pub struct MemDb {
    tables: RwLock<FxHashMap<TableId, TableMap>>,
}

impl MemDb {
    /// An empty store.
    pub fn new() -> Self {
        MemDb {
            tables: RwLock::new(FxHashMap::default()),
        }
    }

    fn snapshot(&self) -> FxHashMap<TableId, TableMap> {
        self.tables.read().clone()
    }
}

struct MemReadTx {
    tables: FxHashMap<TableId, TableMap>,
}

impl ReadTx for MemReadTx {
    fn get(&self, table: TableId, key: &[u8]) -> AggResult<Option<Vec<u8>>> {
        Ok(self.tables.get(table).and_then(|t| t.get(key).cloned()))
    }

    fn range(&self, table: TableId, from: &[u8], to: &[u8]) -> AggResult<Vec<(Vec<u8>, Vec<u8>)>> {
        let Some(t) = self.tables.get(table) else {
            return Ok(Vec::new());
        };
        Ok(t.range(from.to_vec()..to.to_vec())
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect())
    }

    fn first_key(&self, table: TableId) -> AggResult<Option<Vec<u8>>> {
        Ok(self
            .tables
            .get(table)
            .and_then(|t| t.keys().next().cloned()))
    }

    fn last_key(&self, table: TableId) -> AggResult<Option<Vec<u8>>> {
        Ok(self
            .tables
            .get(table)
            .and_then(|t| t.keys().next_back().cloned()))
    }
}

enum PendingOp {
    Put(Vec<u8>),
    Delete,
}

struct MemWriteTx<'db> {
    db: &'db MemDb,
    base: FxHashMap<TableId, TableMap>,
    pending: FxHashMap<TableId, BTreeMap<Vec<u8>, PendingOp>>,
}

impl<'db> MemWriteTx<'db> {
    fn effective(&self, table: TableId) -> TableMap {
        let mut merged = self.base.get(table).cloned().unwrap_or_default();
        if let Some(ops) = self.pending.get(table) {
            for (k, op) in ops {
                match op {
                    PendingOp::Put(v) => {
                        merged.insert(k.clone(), v.clone());
                    }
                    PendingOp::Delete => {
                        merged.remove(k);
                    }
                }
            }
        }
        merged
    }
}

impl<'db> ReadTx for MemWriteTx<'db> {
    fn get(&self, table: TableId, key: &[u8]) -> AggResult<Option<Vec<u8>>> {
        if let Some(ops) = self.pending.get(table) {
            if let Some(op) = ops.get(key) {
                return Ok(match op {
                    PendingOp::Put(v) => Some(v.clone()),
                    PendingOp::Delete => None,
                });
            }
        }
        Ok(self.base.get(table).and_then(|t| t.get(key).cloned()))
    }

    fn range(&self, table: TableId, from: &[u8], to: &[u8]) -> AggResult<Vec<(Vec<u8>, Vec<u8>)>> {
        Ok(self
            .effective(table)
            .range(from.to_vec()..to.to_vec())
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect())
    }

    fn first_key(&self, table: TableId) -> AggResult<Option<Vec<u8>>> {
        Ok(self.effective(table).keys().next().cloned())
    }

    fn last_key(&self, table: TableId) -> AggResult<Option<Vec<u8>>> {
        Ok(self.effective(table).keys().next_back().cloned())
    }
}

impl<'db> WriteTx for MemWriteTx<'db> {
    fn put(&mut self, table: TableId, key: &[u8], value: &[u8]) -> AggResult<()> {
        self.pending
            .entry(table)
            .or_default()
            .insert(key.to_vec(), PendingOp::Put(value.to_vec()));
        Ok(())
    }

    fn delete(&mut self, table: TableId, key: &[u8]) -> AggResult<()> {
        self.pending
            .entry(table)
            .or_default()
            .insert(key.to_vec(), PendingOp::Delete);
        Ok(())
    }

    fn delete_range(&mut self, table: TableId, from: &[u8], to: &[u8]) -> AggResult<()> {
        let keys: Vec<Vec<u8>> = self
            .effective(table)
            .range(from.to_vec()..to.to_vec())
            .map(|(k, _)| k.clone())
            .collect();
        let ops = self.pending.entry(table).or_default();
        for k in keys {
            ops.insert(k, PendingOp::Delete);
        }
        Ok(())
    }

    fn commit(self: Box<Self>) -> AggResult<()> {
        let mut tables = self.db.tables.write();
        for (table, ops) in self.pending {
            let entry = tables.entry(table).or_default();
            for (k, op) in ops {
                match op {
                    PendingOp::Put(v) => {
                        entry.insert(k, v);
                    }
                    PendingOp::Delete => {
                        entry.remove(&k);
                    }
                }
            }
        }
        Ok(())
    }
}

impl Db for MemDb {
    fn view(&self) -> AggResult<Box<dyn ReadTx + '_>> {
        Ok(Box::new(MemReadTx {
            tables: self.snapshot(),
        }))
    }

    fn begin_rw(&self) -> AggResult<Box<dyn WriteTx + '_>> {
        Ok(Box::new(MemWriteTx {
            db: self,
            base: self.snapshot(),
            pending: FxHashMap::default(),
        }))
    }
}

/// Helper so `AggError::DbRead`/`DbWrite` can wrap an arbitrary
/// `io::Error`-shaped failure with a context string, matching the
/// propagation policy ("domain-local errors are wrapped with the
/// domain name").
pub fn wrap_read_err(context: &str, detail: impl std::fmt::Display) -> AggError {
    AggError::db_read(
        context,
        std::io::Error::new(std::io::ErrorKind::Other, detail.to_string()),
    )
}
