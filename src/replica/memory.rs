//! In-memory replica
//!
//! Behaves like a single Postgres endpoint closely enough for the quorum
//! engine: per-session transactions, a table that may not exist yet, and
//! a failed statement poisoning the rest of its transaction. Faults can be
//! switched on at runtime to simulate an unhealthy replica.

use crate::common::{Error, Result};
use crate::replica::{Replica, ReplicaSession, Row, Statement, Value};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

type Table = BTreeMap<String, i32>;

#[derive(Debug, Default)]
struct Faults {
    acquire: AtomicBool,
    execute: AtomicBool,
    upsert: AtomicBool,
    fetch: AtomicBool,
    hang: AtomicBool,
}

#[derive(Debug, Default)]
struct Counters {
    open_sessions: AtomicUsize,
    commits: AtomicUsize,
    rollbacks: AtomicUsize,
}

#[derive(Debug)]
struct Shared {
    // `None` means the table has not been created.
    table: Mutex<Option<Table>>,
    faults: Faults,
    counters: Counters,
}

/// In-process replica. Cloning shares the underlying store.
#[derive(Debug, Clone)]
pub struct MemoryReplica {
    id: String,
    shared: Arc<Shared>,
}

impl MemoryReplica {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            shared: Arc::new(Shared {
                table: Mutex::new(None),
                faults: Faults::default(),
                counters: Counters::default(),
            }),
        }
    }

    /// Make `begin` fail, as if the pool could not hand out a connection.
    pub fn fail_acquire(&self, on: bool) {
        self.shared.faults.acquire.store(on, Ordering::SeqCst);
    }

    /// Make every `execute` fail.
    pub fn fail_execute(&self, on: bool) {
        self.shared.faults.execute.store(on, Ordering::SeqCst);
    }

    /// Make only record upserts fail; table and ping statements still run.
    pub fn fail_upsert(&self, on: bool) {
        self.shared.faults.upsert.store(on, Ordering::SeqCst);
    }

    /// Make every `fetch_optional` fail.
    pub fn fail_fetch(&self, on: bool) {
        self.shared.faults.fetch.store(on, Ordering::SeqCst);
    }

    /// Make statements block forever (only a deadline gets them back).
    pub fn hang(&self, on: bool) {
        self.shared.faults.hang.store(on, Ordering::SeqCst);
    }

    /// Committed records, or `None` if the table does not exist.
    pub fn records(&self) -> Option<BTreeMap<String, i32>> {
        lock(&self.shared.table).clone()
    }

    /// Write a record outside any transaction, creating the table if needed.
    /// Used to make replicas diverge.
    pub fn put_direct(&self, name: &str, age: i32) {
        lock(&self.shared.table)
            .get_or_insert_with(Table::new)
            .insert(name.to_string(), age);
    }

    pub fn open_sessions(&self) -> usize {
        self.shared.counters.open_sessions.load(Ordering::SeqCst)
    }

    pub fn commits(&self) -> usize {
        self.shared.counters.commits.load(Ordering::SeqCst)
    }

    pub fn rollbacks(&self) -> usize {
        self.shared.counters.rollbacks.load(Ordering::SeqCst)
    }

    fn fault(&self, what: &str) -> Error {
        Error::ReplicaFailed {
            replica: self.id.clone(),
            reason: format!("injected {} failure", what),
        }
    }
}

fn lock(table: &Mutex<Option<Table>>) -> std::sync::MutexGuard<'_, Option<Table>> {
    // A panic while holding the lock cannot leave the map half-written.
    table.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[async_trait]
impl Replica for MemoryReplica {
    fn id(&self) -> &str {
        &self.id
    }

    async fn begin(&self) -> Result<Box<dyn ReplicaSession>> {
        if self.shared.faults.acquire.load(Ordering::SeqCst) {
            return Err(Error::ReplicaUnavailable {
                replica: self.id.clone(),
                reason: "injected acquire failure".into(),
            });
        }
        self.shared
            .counters
            .open_sessions
            .fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(MemorySession {
            replica: self.clone(),
            pending: Vec::new(),
            aborted: false,
            finished: false,
        }))
    }
}

struct MemorySession {
    replica: MemoryReplica,
    pending: Vec<Statement>,
    aborted: bool,
    finished: bool,
}

impl MemorySession {
    /// Committed state with this session's pending writes applied.
    fn view(&self) -> Option<Table> {
        let mut table = lock(&self.replica.shared.table).clone();
        for statement in &self.pending {
            apply(&mut table, statement);
        }
        table
    }

    async fn gate(&mut self, injected: bool, what: &str) -> Result<()> {
        if self.replica.shared.faults.hang.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        if self.finished {
            return Err(Error::Internal("session already finished".into()));
        }
        if self.aborted {
            return Err(Error::ReplicaFailed {
                replica: self.replica.id.clone(),
                reason: "current transaction is aborted".into(),
            });
        }
        if injected {
            self.aborted = true;
            return Err(self.replica.fault(what));
        }
        Ok(())
    }

    fn run(&mut self, statement: &Statement) -> Result<Option<Row>> {
        let view = self.view();
        let row = match statement {
            Statement::Ping => Some(vec![Value::Int(1)]),
            Statement::CreateTable | Statement::DropTable => None,
            Statement::Upsert { .. } => {
                if view.is_none() {
                    self.aborted = true;
                    return Err(Error::NoTable);
                }
                None
            }
            Statement::SelectAge { name } => match view {
                Some(table) => table.get(name).map(|age| vec![Value::Int(*age as i64)]),
                None => {
                    self.aborted = true;
                    return Err(Error::NoTable);
                }
            },
            Statement::CountRows => match view {
                Some(table) => Some(vec![Value::Int(table.len() as i64)]),
                None => {
                    self.aborted = true;
                    return Err(Error::NoTable);
                }
            },
        };
        if statement.mutates() {
            self.pending.push(statement.clone());
        }
        Ok(row)
    }
}

fn apply(table: &mut Option<Table>, statement: &Statement) {
    match statement {
        Statement::CreateTable => {
            table.get_or_insert_with(Table::new);
        }
        Statement::DropTable => *table = None,
        Statement::Upsert { name, age } => {
            if let Some(t) = table.as_mut() {
                t.insert(name.clone(), *age);
            }
        }
        _ => {}
    }
}

#[async_trait]
impl ReplicaSession for MemorySession {
    async fn execute(&mut self, statement: &Statement) -> Result<()> {
        let faults = &self.replica.shared.faults;
        let injected = faults.execute.load(Ordering::SeqCst)
            || (faults.upsert.load(Ordering::SeqCst)
                && matches!(statement, Statement::Upsert { .. }));
        self.gate(injected, "execute").await?;
        self.run(statement).map(|_| ())
    }

    async fn fetch_optional(&mut self, statement: &Statement) -> Result<Option<Row>> {
        let injected = self.replica.shared.faults.fetch.load(Ordering::SeqCst);
        self.gate(injected, "fetch").await?;
        self.run(statement)
    }

    async fn commit(&mut self) -> Result<()> {
        if self.finished {
            return Err(Error::Internal("session already finished".into()));
        }
        self.finished = true;
        if self.aborted {
            self.pending.clear();
            self.replica
                .shared
                .counters
                .rollbacks
                .fetch_add(1, Ordering::SeqCst);
            return Err(Error::ReplicaFailed {
                replica: self.replica.id.clone(),
                reason: "commit of an aborted transaction".into(),
            });
        }
        {
            let mut table = lock(&self.replica.shared.table);
            for statement in self.pending.drain(..) {
                apply(&mut table, &statement);
            }
        }
        self.replica
            .shared
            .counters
            .commits
            .fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn rollback(&mut self) -> Result<()> {
        if self.finished {
            return Ok(());
        }
        self.finished = true;
        self.pending.clear();
        self.replica
            .shared
            .counters
            .rollbacks
            .fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

impl Drop for MemorySession {
    fn drop(&mut self) {
        self.replica
            .shared
            .counters
            .open_sessions
            .fetch_sub(1, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_commit_makes_writes_visible() {
        let replica = MemoryReplica::new("mem-0");
        let mut session = replica.begin().await.unwrap();
        session.execute(&Statement::CreateTable).await.unwrap();
        session
            .execute(&Statement::Upsert {
                name: "alice".into(),
                age: 30,
            })
            .await
            .unwrap();

        // Own writes are visible before commit, others' are not.
        let row = session
            .fetch_optional(&Statement::SelectAge {
                name: "alice".into(),
            })
            .await
            .unwrap();
        assert_eq!(row, Some(vec![Value::Int(30)]));
        assert!(replica.records().is_none());

        session.commit().await.unwrap();
        assert_eq!(replica.records().unwrap().get("alice"), Some(&30));
        assert_eq!(replica.commits(), 1);
    }

    #[tokio::test]
    async fn test_drop_discards_and_releases() {
        let replica = MemoryReplica::new("mem-0");
        {
            let mut session = replica.begin().await.unwrap();
            session.execute(&Statement::CreateTable).await.unwrap();
            assert_eq!(replica.open_sessions(), 1);
        }
        assert_eq!(replica.open_sessions(), 0);
        assert!(replica.records().is_none());
    }

    #[tokio::test]
    async fn test_missing_table_aborts_transaction() {
        let replica = MemoryReplica::new("mem-0");
        let mut session = replica.begin().await.unwrap();
        let err = session
            .execute(&Statement::Upsert {
                name: "bob".into(),
                age: 41,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NoTable));

        // Everything after the failure is rejected, including commit.
        assert!(session.execute(&Statement::Ping).await.is_err());
        assert!(session.commit().await.is_err());
        assert_eq!(replica.commits(), 0);
    }

    #[tokio::test]
    async fn test_injected_faults() {
        let replica = MemoryReplica::new("mem-0");
        replica.fail_acquire(true);
        assert!(replica.begin().await.is_err());
        replica.fail_acquire(false);

        replica.fail_fetch(true);
        let mut session = replica.begin().await.unwrap();
        assert!(session.execute(&Statement::Ping).await.is_ok());
        assert!(session.fetch_optional(&Statement::Ping).await.is_err());
    }

    #[tokio::test]
    async fn test_upsert_fault_spares_other_statements() {
        let replica = MemoryReplica::new("mem-0");
        replica.fail_upsert(true);

        let mut session = replica.begin().await.unwrap();
        session.execute(&Statement::CreateTable).await.unwrap();
        session.execute(&Statement::Ping).await.unwrap();
        session.commit().await.unwrap();
        assert_eq!(replica.records(), Some(BTreeMap::new()));

        let mut session = replica.begin().await.unwrap();
        let upsert = Statement::Upsert {
            name: "alice".into(),
            age: 30,
        };
        assert!(session.execute(&upsert).await.is_err());
        drop(session);
        assert_eq!(replica.records(), Some(BTreeMap::new()));
    }

    #[tokio::test]
    async fn test_count_and_drop() {
        let replica = MemoryReplica::new("mem-0");
        replica.put_direct("alice", 30);
        replica.put_direct("bob", 41);

        let mut session = replica.begin().await.unwrap();
        let count = session.fetch_optional(&Statement::CountRows).await.unwrap();
        assert_eq!(count, Some(vec![Value::Int(2)]));
        session.execute(&Statement::DropTable).await.unwrap();
        session.commit().await.unwrap();
        assert!(replica.records().is_none());
    }
}
