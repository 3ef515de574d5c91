//! Read coordinator
//!
//! Runs one query on every replica, tallies the returned rows by exact
//! equality ("no row" is a value of its own) and accepts the most common
//! row only if enough replicas returned it.
//!
//! Unlike writes, reads do not tolerate a failing replica: one error or
//! timeout aborts the whole read.

use crate::common::metrics::MetricsRegistry;
use crate::common::{Error, Result};
use crate::coordinator::quorum::QuorumPolicy;
use crate::replica::set::with_deadline;
use crate::replica::{ReplicaSet, Row, Statement};
use futures_util::future::join_all;
use std::collections::HashMap;
use std::sync::Arc;

/// Result of a coordinated read.
#[derive(Debug, Clone, PartialEq)]
pub struct ReadOutcome {
    /// The agreed row (`Some(None)` = replicas agreed there is no row).
    pub value: Option<Option<Row>>,
    /// Replicas that returned the most common row.
    pub matching: usize,
    /// Matching replicas needed for agreement.
    pub required: usize,
}

impl ReadOutcome {
    pub fn agreed(&self) -> bool {
        self.value.is_some()
    }

    /// The agreed row, if replicas agreed on one that exists.
    pub fn row(&self) -> Option<&Row> {
        self.value.as_ref().and_then(|v| v.as_ref())
    }
}

/// Pick the winning row from per-replica results, in replica order.
///
/// Returns the row with the highest count and that count. When two
/// different rows share the highest count there is no winner.
pub fn tally(rows: &[Option<Row>]) -> (Option<Option<Row>>, usize) {
    let mut counts: HashMap<&Option<Row>, usize> = HashMap::new();
    for row in rows {
        *counts.entry(row).or_default() += 1;
    }

    let best = counts.values().copied().max().unwrap_or(0);
    let mut leaders = rows.iter().filter(|row| counts[row] == best);
    match leaders.next() {
        Some(winner) => {
            if leaders.all(|row| row == winner) {
                (Some(winner.clone()), best)
            } else {
                (None, best)
            }
        }
        None => (None, best),
    }
}

#[derive(Clone)]
pub struct ReadCoordinator {
    set: ReplicaSet,
    policy: QuorumPolicy,
    metrics: Arc<MetricsRegistry>,
}

impl ReadCoordinator {
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

    /// Fan a query out to every replica and apply the read threshold.
    ///
    /// Any replica failure (including acquisition and timeouts) is returned
    /// as `Err`. Sessions are never committed.
    pub async fn execute(&self, statement: &Statement) -> Result<ReadOutcome> {
        tracing::debug!(statement = statement.kind(), "Coordinated read");

        let mut lease = match self.set.acquire_all().await {
            Ok(lease) => lease,
            Err(e) => {
                self.metrics.reads_failed.inc();
                return Err(e);
            }
        };
        let deadline = lease.deadline();

        let results = join_all(lease.sessions_mut().map(|leased| async move {
            let result = with_deadline(
                &leased.replica,
                deadline,
                leased.session.fetch_optional(statement),
            )
            .await;
            (leased.replica.clone(), result)
        }))
        .await;

        lease.release().await;

        let mut rows = Vec::with_capacity(results.len());
        let mut abort = None;
        for (replica, result) in results {
            match result {
                Ok(row) => rows.push(row),
                Err(e) => {
                    self.metrics.record_replica_failure(&replica);
                    tracing::warn!(
                        replica = %replica,
                        statement = statement.kind(),
                        error = %e,
                        "Replica read failed, aborting read"
                    );
                    abort.get_or_insert(Error::ReplicaFailed {
                        replica,
                        reason: e.to_string(),
                    });
                }
            }
        }
        if let Some(e) = abort {
            self.metrics.reads_failed.inc();
            return Err(e);
        }

        let (winner, matching) = tally(&rows);
        let required = self.policy.read_threshold();
        let value = winner.filter(|_| self.policy.read_reached(matching));

        tracing::info!(
            statement = statement.kind(),
            matching,
            required,
            distinct = rows.iter().collect::<std::collections::HashSet<_>>().len(),
            agreed = value.is_some(),
            "Read fan-out finished"
        );

        if value.is_some() {
            self.metrics.reads_agreed.inc();
        } else {
            self.metrics.reads_failed.inc();
        }

        Ok(ReadOutcome {
            value,
            matching,
            required,
        })
    }
}
