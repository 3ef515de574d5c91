//! Replica abstraction
//!
//! A replica is one independent store holding its own full copy of the
//! records. Nothing here knows about quorums: a replica only opens
//! sessions, and a session runs typed statements inside one transaction.
//!
//! Backends:
//! - [`postgres::PgReplica`]: a pooled Postgres endpoint (sqlx)
//! - [`memory::MemoryReplica`]: an in-process store with fault injection

pub mod memory;
pub mod postgres;
pub mod set;

pub use memory::MemoryReplica;
pub use postgres::PgReplica;
pub use set::{Lease, LeasedSession, ReplicaSet};

use crate::common::Result;
use async_trait::async_trait;
use serde::Serialize;

/// A single column value as returned by a replica.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(untagged)]
pub enum Value {
    Int(i64),
    Text(String),
}

impl Value {
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(v) => Some(*v),
            Value::Text(_) => None,
        }
    }
}

/// One result row. Rows compare by exact value equality.
pub type Row = Vec<Value>;

/// Commands a coordinator can fan out to replicas.
///
/// Parameters travel inside the variant, so each backend binds them its own way.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Statement {
    /// `SELECT 1`
    Ping,
    CreateTable,
    /// Insert or overwrite one record.
    Upsert { name: String, age: i32 },
    SelectAge { name: String },
    CountRows,
    DropTable,
}

impl Statement {
    /// Short label for logs and metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            Statement::Ping => "ping",
            Statement::CreateTable => "create_table",
            Statement::Upsert { .. } => "upsert",
            Statement::SelectAge { .. } => "select_age",
            Statement::CountRows => "count_rows",
            Statement::DropTable => "drop_table",
        }
    }

    /// Does this statement change replica state?
    pub fn mutates(&self) -> bool {
        matches!(
            self,
            Statement::CreateTable | Statement::Upsert { .. } | Statement::DropTable
        )
    }
}

/// One store endpoint.
#[async_trait]
pub trait Replica: Send + Sync {
    /// Stable identifier used in logs (usually the address).
    fn id(&self) -> &str;

    /// Open a session (one pooled connection inside a transaction).
    async fn begin(&self) -> Result<Box<dyn ReplicaSession>>;
}

/// A connection checked out from a replica, inside an open transaction.
///
/// Dropping a session without committing discards its pending work and
/// hands the connection back to its pool.
#[async_trait]
pub trait ReplicaSession: Send {
    async fn execute(&mut self, statement: &Statement) -> Result<()>;

    /// Run a query and return its first row, if any.
    async fn fetch_optional(&mut self, statement: &Statement) -> Result<Option<Row>>;

    async fn commit(&mut self) -> Result<()>;

    async fn rollback(&mut self) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_statement_mutates() {
        assert!(Statement::CreateTable.mutates());
        assert!(Statement::DropTable.mutates());
        assert!(Statement::Upsert {
            name: "alice".into(),
            age: 30
        }
        .mutates());
        assert!(!Statement::Ping.mutates());
        assert!(!Statement::CountRows.mutates());
        assert!(!Statement::SelectAge {
            name: "alice".into()
        }
        .mutates());
    }

    #[test]
    fn test_rows_tally_by_value() {
        use std::collections::HashMap;

        let rows: Vec<Option<Row>> = vec![
            Some(vec![Value::Int(30)]),
            None,
            Some(vec![Value::Int(30)]),
            Some(vec![Value::Text("30".into())]),
        ];
        let mut tally: HashMap<Option<Row>, usize> = HashMap::new();
        for row in rows {
            *tally.entry(row).or_default() += 1;
        }
        assert_eq!(tally[&Some(vec![Value::Int(30)])], 2);
        assert_eq!(tally[&None], 1);
        assert_eq!(tally.len(), 3);
    }
}
