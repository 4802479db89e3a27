//! store-core — the command engine, database, persistence and replication
//! core shared by the `storekeeperd` daemon, the `storekeeper-cli` client and
//! the `storekeeper-dump` offline inspector.
//!
//! Modules:
//! - `container` — growable string helpers, ordered list, resizable hash table, packed map
//! - `value` — the polymorphic value object and its per-type encodings
//! - `db` — per-database keyspace, TTL map, blocking/io-wait registries
//! - `client` — connection-independent client/command state
//! - `protocol` — inline/multi-bulk request framing and reply encoding
//! - `shared` — the process-wide interned reply pool
//! - `commands` — the command table and per-type command handlers
//! - `persistence` — the snapshot ("dump") codec and append-only log
//! - `replication` — master/replica bootstrap and command fan-out
//! - `blocking` — BLPOP/BRPOP waiter coordination
//! - `swap` — page-based value swap subsystem
//! - `cron` — periodic housekeeping shared by the event loop
//! - `server` — the `Store`, wiring every module into one call path

pub mod blocking;
pub mod client;
pub mod commands;
pub mod config;
pub mod container;
pub mod cron;
pub mod db;
pub mod error;
pub mod persistence;
pub mod protocol;
pub mod replication;
pub mod server;
pub mod shared;
pub mod swap;
pub mod value;

pub use error::StoreError;

/// Short git SHA this build was compiled from, embedded by `build.rs`.
pub const GIT_SHA: &str = env!("GIT_SHA");
