//! Write coordinator
//!
//! Runs one statement on every replica and commits it once enough of them
//! executed it:
//!
//! 1. lease one session per replica (acquisition failure is a hard error)
//! 2. execute on all sessions concurrently, each under the replica deadline;
//!    a failed or timed-out replica is recorded, never fatal
//! 3. if at least `W` replicas succeeded, commit every succeeded session
//!    and roll back every failed one
//! 4. otherwise commit nothing
//! 5. release the lease (uncommitted work is rolled back)

use crate::common::metrics::MetricsRegistry;
use crate::common::Result;
use crate::coordinator::quorum::QuorumPolicy;
use crate::replica::set::with_deadline;
use crate::replica::{ReplicaSet, Statement};
use futures_util::future::join_all;
use serde::Serialize;
use std::sync::Arc;

/// What happened on one replica during a fan-out.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReplicaOutcome {
    pub replica: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ReplicaOutcome {
    pub fn succeeded(&self) -> bool {
        self.error.is_none()
    }
}

/// Result of a coordinated write.
#[derive(Debug, Clone, Serialize)]
pub struct WriteOutcome {
    /// Replicas whose execution succeeded.
    pub acknowledged: usize,
    /// Write quorum `W`.
    pub required: usize,
    /// Quorum reached and the succeeded sessions were committed.
    pub committed: bool,
    /// Per-replica results, in replica order.
    pub replicas: Vec<ReplicaOutcome>,
}

#[derive(Clone)]
pub struct WriteCoordinator {
    set: ReplicaSet,
    policy: QuorumPolicy,
    metrics: Arc<MetricsRegistry>,
}

impl WriteCoordinator {
    pub fn new(set: ReplicaSet, policy: QuorumPolicy, metrics: Arc<MetricsRegistry>) -> Self {
        Self {
            set,
            policy,
            metrics,
        }
    }

    pub fn policy(&self) -> &QuorumPolicy {
        &self.policy
    }

    /// Fan a statement out to every replica and apply the write quorum.
    ///
    /// Returns `Err` only when a session could not be leased from some
    /// replica. Per-replica execution failures end up in the outcome.
    pub async fn execute(&self, statement: &Statement) -> Result<WriteOutcome> {
        tracing::debug!(statement = statement.kind(), "Coordinated write");

        let mut lease = self.set.acquire_all().await?;
        let deadline = lease.deadline();

        let replicas: Vec<ReplicaOutcome> =
            join_all(lease.sessions_mut().map(|leased| async move {
                let result =
                    with_deadline(&leased.replica, deadline, leased.session.execute(statement))
                        .await;
                ReplicaOutcome {
                    replica: leased.replica.clone(),
                    error: result.err().map(|e| e.to_string()),
                }
            }))
            .await;

        for outcome in replicas.iter().filter(|o| !o.succeeded()) {
            self.metrics.record_replica_failure(&outcome.replica);
            tracing::warn!(
                replica = %outcome.replica,
                statement = statement.kind(),
                error = outcome.error.as_deref().unwrap_or_default(),
                "Replica write failed"
            );
        }

        let acknowledged = replicas.iter().filter(|o| o.succeeded()).count();
        let required = self.policy.write_quorum();
        let committed = self.policy.write_reached(acknowledged);

        tracing::info!(
            statement = statement.kind(),
            acknowledged,
            required,
            replicas = replicas.len(),
            committed,
            "Write fan-out finished"
        );

        if committed {
            let finals = join_all(lease.sessions_mut().zip(replicas.iter()).map(
                |(leased, outcome)| async move {
                    let result = if outcome.succeeded() {
                        with_deadline(&leased.replica, deadline, leased.session.commit()).await
                    } else {
                        with_deadline(&leased.replica, deadline, leased.session.rollback()).await
                    };
                    (leased.replica.clone(), outcome.succeeded(), result)
                },
            ))
            .await;

            for (replica, was_commit, result) in finals {
                if let Err(e) = result {
                    if was_commit {
                        self.metrics.record_replica_failure(&replica);
                    }
                    tracing::warn!(
                        replica = %replica,
                        statement = statement.kind(),
                        error = %e,
                        "{} failed after quorum was reached",
                        if was_commit { "Commit" } else { "Rollback" }
                    );
                }
            }
            self.metrics.writes_committed.inc();
        } else {
            self.metrics.writes_failed.inc();
        }

        lease.release().await;

        Ok(WriteOutcome {
            acknowledged,
            required,
            committed,
            replicas,
        })
    }
}
