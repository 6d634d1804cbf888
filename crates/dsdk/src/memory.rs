//! In-memory store and transaction context, for tests and single-node runs.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_core::future::BoxFuture;
use futures_util::stream;
use tokio::sync::RwLock;

use common::{ProcessId, RuntimeId};

use crate::error::{Result, SdkError};
use crate::flow::{DataFlow, epoch_secs};
use crate::store::{
    DEFAULT_RECOVERY_LEASE, DataFlowStore, RecoveryStream, TransactionContext, TransactionScope,
    TxWork,
};

/// In-memory data flow store.
///
/// Lookups return detached clones, so engine-side mutations only become
/// visible through `create`/`save` — giving the same rollback behavior as
/// the relational store even though [`LocalTransactionContext`] cannot undo
/// writes.
#[derive(Clone)]
pub struct InMemoryDataFlowStore {
    flows: Arc<RwLock<HashMap<String, DataFlow>>>,
    runtime_id: RuntimeId,
    recovery_lease: Duration,
}

impl InMemoryDataFlowStore {
    /// Creates an empty store owned by the given runtime.
    pub fn new(runtime_id: RuntimeId) -> Self {
        Self {
            flows: Arc::new(RwLock::new(HashMap::new())),
            runtime_id,
            recovery_lease: DEFAULT_RECOVERY_LEASE,
        }
    }

    /// Overrides the recovery lease threshold.
    pub fn with_recovery_lease(mut self, lease: Duration) -> Self {
        self.recovery_lease = lease;
        self
    }

    /// Returns the number of stored flows.
    pub async fn flow_count(&self) -> usize {
        self.flows.read().await.len()
    }

    /// Removes every stored flow.
    pub async fn clear(&self) {
        self.flows.write().await.clear();
    }
}

#[async_trait]
impl DataFlowStore for InMemoryDataFlowStore {
    async fn find_by_id(&self, _scope: &TransactionScope, id: &ProcessId) -> Result<DataFlow> {
        self.flows
            .read()
            .await
            .get(id.as_str())
            .cloned()
            .ok_or_else(|| SdkError::NotFound(id.to_string()))
    }

    async fn create(&self, _scope: &TransactionScope, flow: &DataFlow) -> Result<()> {
        let mut flows = self.flows.write().await;
        if flows.contains_key(flow.id().as_str()) {
            return Err(SdkError::AlreadyExists(flow.id().to_string()));
        }
        flows.insert(flow.id().to_string(), flow.clone());
        Ok(())
    }

    async fn save(&self, _scope: &TransactionScope, flow: &DataFlow) -> Result<()> {
        let mut flows = self.flows.write().await;
        if !flows.contains_key(flow.id().as_str()) {
            return Err(SdkError::NotFound(flow.id().to_string()));
        }
        flows.insert(flow.id().to_string(), flow.clone());
        Ok(())
    }

    async fn acquire_flows_for_recovery(
        &self,
        _scope: &TransactionScope,
    ) -> Result<RecoveryStream> {
        let now = epoch_secs();
        let stale_before = now - self.recovery_lease.as_secs() as i64;

        let mut flows = self.flows.write().await;
        let mut acquired = Vec::new();
        for flow in flows.values_mut() {
            if flow.runtime_id() == &self.runtime_id
                && !flow.state().is_terminal()
                && flow.updated_at() < stale_before
            {
                // Lease: re-stamping hides the flow from concurrent sweeps.
                flow.touch(now);
                acquired.push(Ok(flow.clone()));
            }
        }
        Ok(Box::pin(stream::iter(acquired)))
    }
}

/// Pass-through transaction context for stores without transactional handles.
///
/// Runs the work closure once with an empty scope; the error decides the
/// outcome exactly as with a real transaction, there is just nothing to
/// commit or roll back.
#[derive(Clone, Copy, Default)]
pub struct LocalTransactionContext;

impl LocalTransactionContext {
    pub fn new() -> Self {
        Self
    }
}

impl TransactionContext for LocalTransactionContext {
    fn execute<'a>(&'a self, work: TxWork<'a>) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move { work(TransactionScope::none()).await })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::DataFlowState;
    use futures_util::StreamExt;

    fn runtime() -> RuntimeId {
        RuntimeId::new("runtime-a")
    }

    fn flow(id: &str, state: DataFlowState, updated_at: i64) -> DataFlow {
        DataFlow::builder()
            .id(id)
            .state(state)
            .updated_at(updated_at)
            .runtime_id(runtime())
            .build()
            .unwrap()
    }

    async fn collect(stream: RecoveryStream) -> Vec<DataFlow> {
        stream.map(|item| item.unwrap()).collect().await
    }

    #[tokio::test]
    async fn create_and_find_roundtrip() {
        let store = InMemoryDataFlowStore::new(runtime());
        let scope = TransactionScope::none();
        let flow = flow("p1", DataFlowState::Started, epoch_secs());

        store.create(&scope, &flow).await.unwrap();

        let found = store.find_by_id(&scope, &ProcessId::new("p1")).await.unwrap();
        assert_eq!(found, flow);
        assert_eq!(store.flow_count().await, 1);
    }

    #[tokio::test]
    async fn find_missing_flow_is_not_found() {
        let store = InMemoryDataFlowStore::new(runtime());
        let result = store
            .find_by_id(&TransactionScope::none(), &ProcessId::new("missing"))
            .await;
        assert!(matches!(result, Err(SdkError::NotFound(_))));
    }

    #[tokio::test]
    async fn create_rejects_existing_id() {
        let store = InMemoryDataFlowStore::new(runtime());
        let scope = TransactionScope::none();
        let flow = flow("p1", DataFlowState::Started, epoch_secs());

        store.create(&scope, &flow).await.unwrap();
        let result = store.create(&scope, &flow).await;

        assert!(matches!(result, Err(SdkError::AlreadyExists(_))));
    }

    #[tokio::test]
    async fn save_requires_existing_record() {
        let store = InMemoryDataFlowStore::new(runtime());
        let scope = TransactionScope::none();
        let flow = flow("p1", DataFlowState::Started, epoch_secs());

        let result = store.save(&scope, &flow).await;
        assert!(matches!(result, Err(SdkError::NotFound(_))));

        store.create(&scope, &flow).await.unwrap();
        assert!(store.save(&scope, &flow).await.is_ok());
    }

    #[tokio::test]
    async fn find_returns_detached_copies() {
        let store = InMemoryDataFlowStore::new(runtime());
        let scope = TransactionScope::none();
        store
            .create(&scope, &flow("p1", DataFlowState::Starting, epoch_secs()))
            .await
            .unwrap();

        let mut copy = store.find_by_id(&scope, &ProcessId::new("p1")).await.unwrap();
        copy.transition_to_started().unwrap();

        // The mutation is invisible until saved.
        let stored = store.find_by_id(&scope, &ProcessId::new("p1")).await.unwrap();
        assert_eq!(stored.state(), DataFlowState::Starting);
    }

    #[tokio::test]
    async fn recovery_sees_only_stale_non_terminal_flows_of_this_runtime() {
        let store = InMemoryDataFlowStore::new(runtime());
        let scope = TransactionScope::none();
        let stale = epoch_secs() - 600;

        store
            .create(&scope, &flow("stale", DataFlowState::Starting, stale))
            .await
            .unwrap();
        store
            .create(&scope, &flow("fresh", DataFlowState::Starting, epoch_secs()))
            .await
            .unwrap();
        store
            .create(&scope, &flow("done", DataFlowState::Terminated, stale))
            .await
            .unwrap();
        let foreign = DataFlow::builder()
            .id("foreign")
            .state(DataFlowState::Starting)
            .updated_at(stale)
            .runtime_id("runtime-b")
            .build()
            .unwrap();
        store.create(&scope, &foreign).await.unwrap();

        let acquired = collect(store.acquire_flows_for_recovery(&scope).await.unwrap()).await;

        assert_eq!(acquired.len(), 1);
        assert_eq!(acquired[0].id().as_str(), "stale");
    }

    #[tokio::test]
    async fn acquisition_leases_flows_against_concurrent_sweeps() {
        let store = InMemoryDataFlowStore::new(runtime());
        let scope = TransactionScope::none();
        store
            .create(&scope, &flow("p1", DataFlowState::Starting, epoch_secs() - 600))
            .await
            .unwrap();

        let first = collect(store.acquire_flows_for_recovery(&scope).await.unwrap()).await;
        let second = collect(store.acquire_flows_for_recovery(&scope).await.unwrap()).await;

        assert_eq!(first.len(), 1);
        assert!(second.is_empty());
    }

    #[tokio::test]
    async fn local_transaction_context_propagates_the_work_result() {
        let trx = LocalTransactionContext::new();

        let ok = trx
            .execute(Box::new(|_scope| Box::pin(async { Ok(()) })))
            .await;
        assert!(ok.is_ok());

        let err = trx
            .execute(Box::new(|_scope| {
                Box::pin(async { Err(SdkError::Store("boom".to_string())) })
            }))
            .await;
        assert!(matches!(err, Err(SdkError::Store(_))));
    }
}
