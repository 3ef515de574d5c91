//! # leaderless
//!
//! Leaderless quorum replication over independent Postgres stores:
//! - Every replica holds a full copy of the table; no replica is primary
//! - Writes commit when at least W replicas acknowledge
//! - Reads succeed when enough replicas return the identical row
//! - A small HTTP surface exposes one record type (`name`, `age`)
//!
//! ## Architecture

#![allow(clippy::result_large_err)]
//!
//! ```text
//!              HTTP (PUT/GET /api)
//!                     │
//! ┌───────────────────▼─────────────────────┐
//! │            Coordinator                  │
//! │  validate → ensure table → quorum op    │
//! │   - WriteCoordinator: W acks, commit    │
//! │   - ReadCoordinator: R matching rows    │
//! └───────────┬─────────────────────────────┘
//!             │ one transaction per replica
//!   ┌─────────┴──────────┬──────────────┐
//!   │                    │              │
//! ┌─▼──────────┐   ┌─────▼──────┐   ┌───▼──────────┐
//! │ Postgres 0 │   │ Postgres 1 │   │ Postgres 2   │
//! │ full copy  │   │ full copy  │   │ full copy    │
//! └────────────┘   └────────────┘   └──────────────┘
//! ```
//!
//! ## Usage
//!
//! ### Start the coordinator
//! ```bash
//! LEADERLESS__REPLICAS__ENDPOINTS=pg-0,pg-1,pg-2 \
//! LEADERLESS__DATABASE__PASSWORD=secret \
//! leaderless-server --write-fraction 0.51 --read-fraction 0.51
//! ```
//!
//! ### Write and read
//! ```bash
//! curl -X PUT localhost/api -d '{"name": "alice", "age": 30}'
//! curl -X GET localhost/api -d '{"name": "alice"}'
//! ```
//!
//! ### Reset the demo table
//! ```bash
//! leaderless-reaper run --every 10m
//! ```

pub mod common;
pub mod coordinator;
pub mod ops;
pub mod replica;

// Re-export commonly used types
pub use common::{Error, Result, ServiceConfig as Config};
pub use coordinator::{Coordinator, QuorumEngine};

/// Current version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
