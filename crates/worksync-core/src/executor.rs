use crate::error::RemoteWriteError;
use crate::model::{OperationDraft, OperationKind};
use crate::remote::RemoteStore;
use std::sync::Arc;

/// Applies exactly one mutation to the remote store.
///
/// Stateless: no retries and no queue access. Retry policy belongs to the
/// orchestrator, queue bookkeeping to the store.
pub struct OperationExecutor {
    remote: Arc<dyn RemoteStore>,
}

impl OperationExecutor {
    pub fn new(remote: Arc<dyn RemoteStore>) -> Self {
        Self { remote }
    }

    pub async fn execute(&self, op: &OperationDraft) -> Result<(), RemoteWriteError> {
        match op.kind {
            OperationKind::Create => {
                self.remote
                    .write_record(&op.collection, &op.record_id, &op.payload)
                    .await
            }
            OperationKind::Update => {
                self.remote
                    .patch_record(&op.collection, &op.record_id, &op.payload)
                    .await
            }
            OperationKind::Delete => self.remote.delete_record(&op.collection, &op.record_id).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::{MemoryRemote, RemoteCallKind};
    use serde_json::json;

    #[tokio::test]
    async fn each_kind_maps_to_one_remote_call() {
        let remote = Arc::new(MemoryRemote::new());
        remote.seed("items", "x2", json!({"qtd": 1}));
        let executor = OperationExecutor::new(remote.clone());

        executor
            .execute(&OperationDraft::create("items", "x1", json!({"nome": "Pá"})))
            .await
            .unwrap();
        executor
            .execute(&OperationDraft::update("items", "x2", json!({"qtd": 2})))
            .await
            .unwrap();
        executor
            .execute(&OperationDraft::delete("items", "x2"))
            .await
            .unwrap();

        let kinds: Vec<RemoteCallKind> = remote.calls().iter().map(|c| c.kind).collect();
        assert_eq!(
            kinds,
            vec![
                RemoteCallKind::Write,
                RemoteCallKind::Patch,
                RemoteCallKind::Delete
            ]
        );
        assert_eq!(remote.record("items", "x1"), Some(json!({"nome": "Pá"})));
        assert!(remote.record("items", "x2").is_none());
    }

    #[tokio::test]
    async fn update_of_vanished_record_surfaces_the_error() {
        let remote = Arc::new(MemoryRemote::new());
        let executor = OperationExecutor::new(remote);

        let err = executor
            .execute(&OperationDraft::update("items", "ghost", json!({"qtd": 1})))
            .await
            .unwrap_err();
        assert!(matches!(err, RemoteWriteError::MissingRecord { .. }));
    }

    #[tokio::test]
    async fn delete_of_vanished_record_is_fine() {
        let remote = Arc::new(MemoryRemote::new());
        let executor = OperationExecutor::new(remote);

        executor
            .execute(&OperationDraft::delete("items", "already-gone"))
            .await
            .unwrap();
    }
}
