//! Table lifecycle
//!
//! The record table is created lazily and idempotently on every replica,
//! through the write quorum, before each API operation.

use crate::common::Result;
use crate::coordinator::write::WriteCoordinator;
use crate::replica::Statement;

#[derive(Clone)]
pub struct TableManager {
    writes: WriteCoordinator,
}

impl TableManager {
    pub fn new(writes: WriteCoordinator) -> Self {
        Self { writes }
    }

    /// `CREATE TABLE IF NOT EXISTS` on every replica.
    ///
    /// `Ok(false)` means the write quorum was missed; callers must not
    /// proceed with the operation in that case.
    pub async fn ensure(&self) -> Result<bool> {
        let outcome = self.writes.execute(&Statement::CreateTable).await?;
        if !outcome.committed {
            tracing::error!(
                acknowledged = outcome.acknowledged,
                required = outcome.required,
                "Table creation did not reach write quorum"
            );
        }
        Ok(outcome.committed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::config::ReadAgreement;
    use crate::common::metrics::MetricsRegistry;
    use crate::coordinator::quorum::QuorumPolicy;
    use crate::replica::{MemoryReplica, Replica, ReplicaSet};
    use std::sync::Arc;
    use std::time::Duration;

    fn manager(mems: &[MemoryReplica]) -> TableManager {
        let set = ReplicaSet::new(
            mems.iter()
                .cloned()
                .map(|m| Arc::new(m) as Arc<dyn Replica>)
                .collect(),
            Duration::from_millis(200),
        )
        .unwrap();
        let policy = QuorumPolicy::new(mems.len(), 0.51, 0.51, ReadAgreement::Strict).unwrap();
        TableManager::new(WriteCoordinator::new(
            set,
            policy,
            Arc::new(MetricsRegistry::new()),
        ))
    }

    #[tokio::test]
    async fn test_ensure_is_idempotent() {
        let mems: Vec<_> = (0..3).map(|i| MemoryReplica::new(format!("m{}", i))).collect();
        mems[0].put_direct("alice", 30);
        let tables = manager(&mems);

        assert!(tables.ensure().await.unwrap());
        assert!(tables.ensure().await.unwrap());
        assert!(mems.iter().all(|m| m.records().is_some()));
        // Existing rows survive.
        assert_eq!(mems[0].records().unwrap().get("alice"), Some(&30));
    }

    #[tokio::test]
    async fn test_ensure_without_quorum() {
        let mems: Vec<_> = (0..3).map(|i| MemoryReplica::new(format!("m{}", i))).collect();
        mems[0].fail_execute(true);
        mems[2].fail_execute(true);

        assert!(!manager(&mems).ensure().await.unwrap());
        assert!(mems.iter().all(|m| m.records().is_none()));
    }
}
