//! Maintenance reaper
//!
//! Out-of-band demo reset: log how many rows each replica holds, then drop
//! the table everywhere. No quorum applies. Each replica is handled on its
//! own session and a failure on one never stops the others.
//!
//! Nothing coordinates with the serving process; a drop that races an
//! in-flight write or read leaves that operation's outcome undefined.

use crate::common::{Result, ServiceConfig};
use crate::coordinator::ReplicaOutcome;
use crate::replica::set::with_deadline;
use crate::replica::{Replica, ReplicaSet, Statement, Value};
use futures_util::future::join_all;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;

/// Row count reported by one replica.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReplicaCount {
    pub replica: String,
    pub rows: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct DropReport {
    pub dropped: usize,
    pub replicas: Vec<ReplicaOutcome>,
}

pub struct Reaper {
    set: ReplicaSet,
}

impl Reaper {
    pub fn new(set: ReplicaSet) -> Self {
        Self { set }
    }

    pub fn from_config(config: &ServiceConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self::new(ReplicaSet::connect(config)?))
    }

    /// Count rows on every replica and log the counts.
    ///
    /// Diverging counts are only reported, never reconciled.
    pub async fn count_rows(&self) -> Vec<ReplicaCount> {
        let deadline = self.set.deadline();
        let counts: Vec<ReplicaCount> =
            join_all(self.set.replicas().iter().map(|replica| async move {
                let result = count_one(replica.as_ref(), deadline).await;
                let id = replica.id().to_string();
                match result {
                    Ok(rows) => ReplicaCount {
                        replica: id,
                        rows: Some(rows),
                        error: None,
                    },
                    Err(e) => {
                        tracing::warn!(replica = %id, error = %e, "Row count failed");
                        ReplicaCount {
                            replica: id,
                            rows: None,
                            error: Some(e.to_string()),
                        }
                    }
                }
            }))
            .await;

        let summary: Vec<Option<i64>> = counts.iter().map(|c| c.rows).collect();
        let diverged = summary.windows(2).any(|w| w[0] != w[1]);
        tracing::info!(counts = ?summary, diverged, "Row counts per replica");
        counts
    }

    /// Drop the table on every replica, ignoring per-replica failures.
    pub async fn drop_table(&self) -> DropReport {
        let deadline = self.set.deadline();
        let replicas: Vec<ReplicaOutcome> =
            join_all(self.set.replicas().iter().map(|replica| async move {
                let result = drop_one(replica.as_ref(), deadline).await;
                let id = replica.id().to_string();
                if let Err(e) = &result {
                    tracing::warn!(replica = %id, error = %e, "Drop failed, ignoring");
                }
                ReplicaOutcome {
                    replica: id,
                    error: result.err().map(|e| e.to_string()),
                }
            }))
            .await;

        let dropped = replicas.iter().filter(|o| o.succeeded()).count();
        tracing::info!(dropped, replicas = replicas.len(), "Have dropped all tables");
        DropReport { dropped, replicas }
    }

    /// One maintenance pass: count, then drop.
    pub async fn run_cycle(&self) -> (Vec<ReplicaCount>, DropReport) {
        let counts = self.count_rows().await;
        let report = self.drop_table().await;
        (counts, report)
    }
}

async fn count_one(replica: &dyn Replica, deadline: Duration) -> Result<i64> {
    let id = replica.id();
    let mut session = with_deadline(id, deadline, replica.begin()).await?;
    let row = with_deadline(
        id,
        deadline,
        session.fetch_optional(&Statement::CountRows),
    )
    .await?;
    Ok(row
        .and_then(|r| r.first().and_then(Value::as_int))
        .unwrap_or(0))
}

async fn drop_one(replica: &dyn Replica, deadline: Duration) -> Result<()> {
    let id = replica.id();
    let mut session = with_deadline(id, deadline, replica.begin()).await?;
    with_deadline(id, deadline, session.execute(&Statement::DropTable)).await?;
    with_deadline(id, deadline, session.commit()).await
}

/// Build a reaper straight from replica handles.
pub fn reaper_for(replicas: Vec<Arc<dyn Replica>>, deadline: Duration) -> Result<Reaper> {
    Ok(Reaper::new(ReplicaSet::new(replicas, deadline)?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::replica::MemoryReplica;

    fn reaper(mems: &[MemoryReplica]) -> Reaper {
        reaper_for(
            mems.iter()
                .cloned()
                .map(|m| Arc::new(m) as Arc<dyn Replica>)
                .collect(),
            Duration::from_millis(200),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_count_rows_reports_divergence() {
        let mems: Vec<_> = (0..3).map(|i| MemoryReplica::new(format!("m{}", i))).collect();
        mems[0].put_direct("alice", 30);
        mems[0].put_direct("bob", 41);
        mems[1].put_direct("alice", 30);

        let counts = reaper(&mems).count_rows().await;
        assert_eq!(counts[0].rows, Some(2));
        assert_eq!(counts[1].rows, Some(1));
        // No table on the third replica.
        assert_eq!(counts[2].rows, None);
        assert!(counts[2].error.is_some());
        assert!(mems.iter().all(|m| m.open_sessions() == 0));
    }

    #[tokio::test]
    async fn test_drop_is_best_effort() {
        let mems: Vec<_> = (0..3).map(|i| MemoryReplica::new(format!("m{}", i))).collect();
        mems.iter().for_each(|m| m.put_direct("alice", 30));
        mems[1].fail_execute(true);

        let report = reaper(&mems).drop_table().await;
        assert_eq!(report.dropped, 2);
        assert!(!report.replicas[1].succeeded());
        assert!(mems[0].records().is_none());
        assert!(mems[1].records().is_some());
        assert!(mems[2].records().is_none());
    }

    #[tokio::test]
    async fn test_run_cycle_with_unreachable_replica() {
        let mems: Vec<_> = (0..2).map(|i| MemoryReplica::new(format!("m{}", i))).collect();
        mems.iter().for_each(|m| m.put_direct("alice", 30));
        mems[0].fail_acquire(true);

        let (counts, report) = reaper(&mems).run_cycle().await;
        assert_eq!(counts[0].rows, None);
        assert_eq!(counts[1].rows, Some(1));
        assert_eq!(report.dropped, 1);
        assert!(mems[1].records().is_none());
    }
}
