//! Persistence contract consumed by the engine.

use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_core::Stream;
use futures_core::future::BoxFuture;
use tokio::sync::Mutex;

use common::ProcessId;

use crate::error::Result;
use crate::flow::DataFlow;

/// Default lease threshold after which an unprogressed flow becomes visible
/// to recovery.
pub const DEFAULT_RECOVERY_LEASE: Duration = Duration::from_secs(60);

/// A lazy, finite, single-pass cursor over flows needing recovery attention.
///
/// Mid-iteration failures surface as `Err` items; dropping the stream
/// releases the cursor and any lease it holds.
pub type RecoveryStream = Pin<Box<dyn Stream<Item = Result<DataFlow>> + Send>>;

/// Work executed inside a single transactional scope.
pub type TxWork<'a> = Box<dyn FnOnce(TransactionScope) -> BoxFuture<'a, Result<()>> + Send + 'a>;

pub(crate) type PgTxHandle = Arc<Mutex<Option<sqlx::Transaction<'static, sqlx::Postgres>>>>;

/// Handle to the transaction backing the current unit of work.
///
/// Handed to the work closure by the [`TransactionContext`] and threaded
/// through every store call, so relational stores can attach their
/// statements to the live transaction. Stores without transactional handles
/// ignore it.
#[derive(Clone, Default)]
pub struct TransactionScope {
    pg: Option<PgTxHandle>,
}

impl TransactionScope {
    /// A scope with no backing transaction.
    pub fn none() -> Self {
        Self::default()
    }

    pub(crate) fn with_pg(handle: PgTxHandle) -> Self {
        Self { pg: Some(handle) }
    }

    pub(crate) fn pg(&self) -> Option<&PgTxHandle> {
        self.pg.as_ref()
    }
}

/// Scoped unit of work wrapping each engine operation.
///
/// The work closure is invoked exactly once and all store operations inside
/// it observe a single consistent snapshot. A non-`Ok` return rolls the
/// transaction back, `Ok` commits. Implementations must be safe to call
/// concurrently for distinct flows.
pub trait TransactionContext: Send + Sync {
    fn execute<'a>(&'a self, work: TxWork<'a>) -> BoxFuture<'a, Result<()>>;
}

/// Persistence contract for data flows.
///
/// The store is the engine's sole source of truth for deduplication; there
/// is no in-memory cache in front of it.
#[async_trait]
pub trait DataFlowStore: Send + Sync {
    /// Looks up a flow by process id, returning
    /// [`SdkError::NotFound`](crate::error::SdkError::NotFound) when absent.
    async fn find_by_id(&self, scope: &TransactionScope, id: &ProcessId) -> Result<DataFlow>;

    /// Inserts a new flow, failing with
    /// [`SdkError::AlreadyExists`](crate::error::SdkError::AlreadyExists) on a
    /// key clash.
    async fn create(&self, scope: &TransactionScope, flow: &DataFlow) -> Result<()>;

    /// Updates an existing flow, failing with
    /// [`SdkError::NotFound`](crate::error::SdkError::NotFound) when absent.
    async fn save(&self, scope: &TransactionScope, flow: &DataFlow) -> Result<()>;

    /// Acquires the recovery cursor: flows owned by this runtime, in a
    /// non-terminal state, whose last update is older than the lease
    /// threshold. Implementations may lease the returned flows to keep
    /// concurrent sweeps from picking them up.
    async fn acquire_flows_for_recovery(&self, scope: &TransactionScope) -> Result<RecoveryStream>;
}
