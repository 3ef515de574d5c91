//! Replica set and scoped session leases
//!
//! The set is fixed for the process lifetime: built once from config,
//! never resized. Every coordinator call leases one session per replica
//! and gives all of them back when the lease goes away, on success and
//! on every error path.

use crate::common::config::ServiceConfig;
use crate::common::{Error, Result};
use crate::replica::{PgReplica, Replica, ReplicaSession};
use futures_util::future::join_all;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

/// Run one per-replica step under the replica deadline.
pub async fn with_deadline<T, F>(replica: &str, deadline: Duration, step: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match tokio::time::timeout(deadline, step).await {
        Ok(result) => result,
        Err(_) => Err(Error::Timeout(format!(
            "replica {} did not answer within {:?}",
            replica, deadline
        ))),
    }
}

/// The fixed, ordered collection of N replicas.
#[derive(Clone)]
pub struct ReplicaSet {
    replicas: Vec<Arc<dyn Replica>>,
    deadline: Duration,
}

impl std::fmt::Debug for ReplicaSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReplicaSet")
            .field("replicas", &self.ids())
            .field("deadline", &self.deadline)
            .finish()
    }
}

impl ReplicaSet {
    pub fn new(replicas: Vec<Arc<dyn Replica>>, deadline: Duration) -> Result<Self> {
        if replicas.is_empty() {
            return Err(Error::InvalidConfig(
                "a replica set needs at least one replica".into(),
            ));
        }
        Ok(Self { replicas, deadline })
    }

    fn lease(&self, sessions: Vec<LeasedSession>) -> Lease {
        Lease {
            sessions,
            deadline: self.deadline,
        }
    }

    /// Build one lazily-connecting Postgres pool per configured endpoint.
    pub fn connect(config: &ServiceConfig) -> Result<Self> {
        let deadline = config.replica_timeout();
        let replicas = config
            .endpoints()?
            .iter()
            .map(|endpoint| {
                Arc::new(PgReplica::connect_lazy(
                    endpoint,
                    &config.database,
                    &config.table,
                    deadline,
                )) as Arc<dyn Replica>
            })
            .collect();
        Self::new(replicas, deadline)
    }

    pub fn len(&self) -> usize {
        self.replicas.len()
    }

    pub fn is_empty(&self) -> bool {
        self.replicas.is_empty()
    }

    pub fn deadline(&self) -> Duration {
        self.deadline
    }

    pub fn ids(&self) -> Vec<String> {
        self.replicas.iter().map(|r| r.id().to_string()).collect()
    }

    pub fn replicas(&self) -> &[Arc<dyn Replica>] {
        &self.replicas
    }

    /// Lease one session from every replica.
    ///
    /// All replicas are asked concurrently. If any of them cannot hand out a
    /// session the whole acquisition fails, and the sessions that were
    /// obtained are released before the error is returned.
    pub async fn acquire_all(&self) -> Result<Lease> {
        let attempts = join_all(self.replicas.iter().map(|replica| async move {
            let id = replica.id().to_string();
            let session = with_deadline(&id, self.deadline, replica.begin()).await;
            (id, session)
        }))
        .await;

        let mut sessions = Vec::with_capacity(attempts.len());
        let mut first_error = None;
        for (replica, attempt) in attempts {
            match attempt {
                Ok(session) => sessions.push(LeasedSession { replica, session }),
                Err(e) => {
                    tracing::error!(replica = %replica, error = %e, "Failed to acquire session");
                    first_error.get_or_insert(e);
                }
            }
        }

        match first_error {
            Some(e) => {
                self.lease(sessions).release().await;
                Err(e)
            }
            None => Ok(self.lease(sessions)),
        }
    }
}

/// A session tagged with the replica it came from.
pub struct LeasedSession {
    pub replica: String,
    pub session: Box<dyn ReplicaSession>,
}

/// One session per replica, in replica order.
///
/// Dropping the lease drops every session, which rolls back anything not
/// committed and returns each connection to its own pool.
pub struct Lease {
    sessions: Vec<LeasedSession>,
    deadline: Duration,
}

impl Lease {
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    pub fn deadline(&self) -> Duration {
        self.deadline
    }

    pub fn sessions_mut(&mut self) -> std::slice::IterMut<'_, LeasedSession> {
        self.sessions.iter_mut()
    }

    /// Explicitly roll back every session and hand them back.
    ///
    /// Rollback of an already finalized session is a no-op. Errors are
    /// logged only: the connections go back to their pools either way.
    pub async fn release(mut self) {
        let deadline = self.deadline;
        let results = join_all(self.sessions.iter_mut().map(|leased| async move {
            let result =
                with_deadline(&leased.replica, deadline, leased.session.rollback()).await;
            (leased.replica.clone(), result)
        }))
        .await;
        for (replica, result) in results {
            if let Err(e) = result {
                tracing::debug!(replica = %replica, error = %e, "Rollback on release failed");
            }
        }
    }
}
