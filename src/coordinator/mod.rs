//! Quorum coordination
//!
//! The coordinator is responsible for:
//! - Quorum thresholds (write `W`, read `R`, their overlap)
//! - Write orchestration (fan-out, quorum decision, commit)
//! - Read orchestration (fan-out, tally, agreement)
//! - Table lifecycle on every replica
//! - The public HTTP API

pub mod http;
pub mod quorum;
pub mod read;
pub mod server;
pub mod table;
pub mod write;

pub use quorum::QuorumPolicy;
pub use read::{ReadCoordinator, ReadOutcome};
pub use server::Coordinator;
pub use table::TableManager;
pub use write::{ReplicaOutcome, WriteCoordinator, WriteOutcome};

use crate::common::metrics::MetricsRegistry;
use crate::common::{Result, ServiceConfig};
use crate::replica::{ReplicaSet, Statement, Value};
use std::sync::Arc;

/// Write and read coordinators over one replica set, plus the table manager.
#[derive(Clone)]
pub struct QuorumEngine {
    pub writes: WriteCoordinator,
    pub reads: ReadCoordinator,
    pub tables: TableManager,
    pub metrics: Arc<MetricsRegistry>,
}

impl QuorumEngine {
    pub fn new(set: ReplicaSet, policy: QuorumPolicy, metrics: Arc<MetricsRegistry>) -> Self {
        for problem in policy.unreachable() {
            tracing::warn!("Quorum can never be reached: {}", problem);
        }
        let writes = WriteCoordinator::new(set.clone(), policy, metrics.clone());
        let reads = ReadCoordinator::new(set, policy, metrics.clone());
        let tables = TableManager::new(writes.clone());
        Self {
            writes,
            reads,
            tables,
            metrics,
        }
    }

    /// Validate the config, then build the Postgres replica set and policy.
    ///
    /// Fails before any traffic is served when the quorum fractions do not
    /// overlap.
    pub fn from_config(config: &ServiceConfig) -> Result<Self> {
        config.validate()?;
        let set = ReplicaSet::connect(config)?;
        let policy = QuorumPolicy::from_config(config, set.len())?;
        Ok(Self::new(set, policy, Arc::new(MetricsRegistry::new())))
    }

    pub fn policy(&self) -> &QuorumPolicy {
        self.writes.policy()
    }

    pub async fn ensure_table(&self) -> Result<bool> {
        self.tables.ensure().await
    }

    /// Insert or overwrite one record through the write quorum.
    pub async fn write_record(&self, name: &str, age: i32) -> Result<WriteOutcome> {
        self.writes
            .execute(&Statement::Upsert {
                name: name.to_string(),
                age,
            })
            .await
    }

    /// Age agreed on by the read threshold, or `None`.
    ///
    /// Agreement that the record does not exist is also `None`.
    pub async fn read_age(&self, name: &str) -> Result<Option<i64>> {
        let outcome = self
            .reads
            .execute(&Statement::SelectAge {
                name: name.to_string(),
            })
            .await?;
        Ok(outcome
            .row()
            .and_then(|row| row.first())
            .and_then(Value::as_int))
    }

    /// One trivial write and one trivial read, both through quorum.
    pub async fn ready(&self) -> bool {
        let write = match self.writes.execute(&Statement::Ping).await {
            Ok(outcome) => outcome.committed,
            Err(e) => {
                tracing::warn!(error = %e, "Readiness write failed");
                false
            }
        };
        let read = match self.reads.execute(&Statement::Ping).await {
            Ok(outcome) => outcome.agreed(),
            Err(e) => {
                tracing::warn!(error = %e, "Readiness read failed");
                false
            }
        };
        write && read
    }
}
