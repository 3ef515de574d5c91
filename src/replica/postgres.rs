//! Postgres replica backed by a sqlx connection pool.
//!
//! Every endpoint gets its own pool (bounded by `min_connections` and
//! `max_connections`). A session is a pool-owned transaction: committing
//! finalizes it, dropping it rolls back and returns the connection.

use crate::common::config::{DatabaseConfig, ReplicaEndpoint};
use crate::common::{Error, Result};
use crate::replica::{Replica, ReplicaSession, Row, Statement, Value};
use async_trait::async_trait;
use sqlx::postgres::{PgConnectOptions, PgPool, PgPoolOptions, PgRow};
use sqlx::{Postgres, Row as _, Transaction};
use std::time::Duration;

pub struct PgReplica {
    id: String,
    pool: PgPool,
    table: String,
}

impl PgReplica {
    /// Build the pool without connecting; connections open on first use.
    pub fn connect_lazy(
        endpoint: &ReplicaEndpoint,
        database: &DatabaseConfig,
        table: &str,
        acquire_timeout: Duration,
    ) -> Self {
        let options = PgConnectOptions::new()
            .host(&endpoint.host)
            .port(endpoint.port)
            .username(&database.user)
            .password(&database.password)
            .database(&database.dbname);

        let pool = PgPoolOptions::new()
            .min_connections(database.min_connections)
            .max_connections(database.max_connections)
            .acquire_timeout(acquire_timeout)
            .connect_lazy_with(options);

        tracing::debug!(
            replica = %endpoint,
            min_connections = database.min_connections,
            max_connections = database.max_connections,
            "Replica pool created"
        );

        Self {
            id: endpoint.to_string(),
            pool,
            table: table.to_string(),
        }
    }
}

#[async_trait]
impl Replica for PgReplica {
    fn id(&self) -> &str {
        &self.id
    }

    async fn begin(&self) -> Result<Box<dyn ReplicaSession>> {
        let tx = self
            .pool
            .begin()
            .await
            .map_err(|e| Error::ReplicaUnavailable {
                replica: self.id.clone(),
                reason: e.to_string(),
            })?;
        Ok(Box::new(PgSession {
            table: self.table.clone(),
            tx: Some(tx),
        }))
    }
}

/// Render a statement for the given table. Parameters are bound as `$n`.
pub fn render(statement: &Statement, table: &str) -> String {
    match statement {
        Statement::Ping => "SELECT 1".to_string(),
        Statement::CreateTable => format!(
            "CREATE TABLE IF NOT EXISTS {} (name TEXT PRIMARY KEY NOT NULL, age integer NOT NULL)",
            table
        ),
        Statement::Upsert { .. } => format!(
            "INSERT INTO {} (name, age) VALUES ($1, $2) \
             ON CONFLICT (name) DO UPDATE SET age = EXCLUDED.age",
            table
        ),
        Statement::SelectAge { .. } => format!("SELECT age FROM {} WHERE name = $1", table),
        Statement::CountRows => format!("SELECT COUNT(*) FROM {}", table),
        Statement::DropTable => format!("DROP TABLE IF EXISTS {}", table),
    }
}

struct PgSession {
    table: String,
    // Taken on commit/rollback.
    tx: Option<Transaction<'static, Postgres>>,
}

impl PgSession {
    fn tx(&mut self) -> Result<&mut Transaction<'static, Postgres>> {
        self.tx
            .as_mut()
            .ok_or_else(|| Error::Internal("session already finished".into()))
    }
}

fn decode(statement: &Statement, row: &PgRow) -> Result<Row> {
    let value = match statement {
        // COUNT(*) is bigint, everything else that returns a row is integer.
        Statement::CountRows => row.try_get::<i64, _>(0)?,
        _ => row.try_get::<i32, _>(0)? as i64,
    };
    Ok(vec![Value::Int(value)])
}

#[async_trait]
impl ReplicaSession for PgSession {
    async fn execute(&mut self, statement: &Statement) -> Result<()> {
        let sql = render(statement, &self.table);
        let tx = self.tx()?;
        match statement {
            Statement::Upsert { name, age } => {
                sqlx::query(&sql)
                    .bind(name)
                    .bind(*age)
                    .execute(&mut **tx)
                    .await?;
            }
            Statement::SelectAge { name } => {
                sqlx::query(&sql).bind(name).execute(&mut **tx).await?;
            }
            _ => {
                sqlx::query(&sql).execute(&mut **tx).await?;
            }
        }
        Ok(())
    }

    async fn fetch_optional(&mut self, statement: &Statement) -> Result<Option<Row>> {
        let sql = render(statement, &self.table);
        let tx = self.tx()?;
        let row = match statement {
            Statement::SelectAge { name } => {
                sqlx::query(&sql)
                    .bind(name)
                    .fetch_optional(&mut **tx)
                    .await?
            }
            Statement::Upsert { name, age } => {
                sqlx::query(&sql)
                    .bind(name)
                    .bind(*age)
                    .fetch_optional(&mut **tx)
                    .await?
            }
            _ => sqlx::query(&sql).fetch_optional(&mut **tx).await?,
        };
        row.map(|row| decode(statement, &row)).transpose()
    }

    async fn commit(&mut self) -> Result<()> {
        match self.tx.take() {
            Some(tx) => Ok(tx.commit().await?),
            None => Err(Error::Internal("session already finished".into())),
        }
    }

    async fn rollback(&mut self) -> Result<()> {
        if let Some(tx) = self.tx.take() {
            tx.rollback().await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render() {
        assert_eq!(render(&Statement::Ping, "mytable"), "SELECT 1");
        assert_eq!(
            render(&Statement::CountRows, "mytable"),
            "SELECT COUNT(*) FROM mytable"
        );
        assert_eq!(
            render(
                &Statement::SelectAge {
                    name: "alice".into()
                },
                "people"
            ),
            "SELECT age FROM people WHERE name = $1"
        );
        assert!(render(&Statement::CreateTable, "people")
            .starts_with("CREATE TABLE IF NOT EXISTS people"));
        assert!(render(
            &Statement::Upsert {
                name: "alice".into(),
                age: 30
            },
            "people"
        )
        .contains("ON CONFLICT (name) DO UPDATE"));
        assert_eq!(
            render(&Statement::DropTable, "people"),
            "DROP TABLE IF EXISTS people"
        );
    }
}
