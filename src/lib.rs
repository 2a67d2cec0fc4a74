//! `vectrsql`: an embeddable hybrid vector-relational database. A single
//! process links this crate, gets a `Database`, and talks to it through one
//! entry point — `Database::execute(sql)` — backed by MVCC storage with
//! snapshot isolation, a write-ahead log for crash recovery, B-tree
//! secondary indexes, and a per-column HNSW-style graph for approximate
//! nearest-neighbor search over embedding columns.
//!
//! Module layout mirrors the four subsystems that make up the core of the
//! engine, leaves first: [`core`] (the `Value`/`Column` data model and
//! error types shared everywhere), [`mvcc`] (transaction manager and commit
//! log), [`storage`] (the versioned heap), [`index`] and [`ann`] (secondary
//! indexes), [`wal`] (durability and recovery), [`expr`] and [`query`] (the
//! execution engine), [`parser`] (the SQL front end), [`persistence`]
//! (full-database save/load), and [`config`]. [`database`] ties all of it
//! together behind the public `Database` type re-exported at the crate root.

pub mod ann;
pub mod config;
pub mod core;
pub mod database;
pub mod expr;
pub mod index;
pub mod mvcc;
pub mod parser;
pub mod persistence;
pub mod query;
pub mod storage;
pub mod wal;

pub use config::{DatabaseConfig, ValidationMode, VectorSearchConfig};
pub use core::{Column, DataType, DatabaseError, DbResult, Value};
pub use database::Database;
pub use query::QueryResult;
