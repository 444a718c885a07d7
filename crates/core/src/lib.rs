//! Core types shared across the aggregation engine
//!
//! This crate defines the foundational vocabulary used throughout the
//! engine:
//! - [`TxNum`] / [`Step`]: the txnum/step ordering axis
//! - [`AggregatorConfig`]: run-wide tunables (aggregation step, keepInDB, ...)
//! - [`AggError`] / [`AggResult`]: the unified error hierarchy
//! - [`kv`]: the host key-value store abstraction (external collaborator)

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod error;
pub mod kv;
pub mod txnum;

pub use config::{
    AggregatorConfig, ReadAheadMode, LOCALITY_INDEX_UINT64_LIMIT, STEPS_IN_BIGGEST_FILE,
};
pub use error::{AggError, AggResult};
pub use kv::{wrap_read_err, Db, MemDb, ReadTx, TableId, WriteTx};
pub use txnum::{Step, TxNum};
