//! PostgreSQL-backed store and transaction context.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_core::future::BoxFuture;
use futures_util::stream;
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use tokio::sync::Mutex;
use url::Url;

use common::{ProcessId, RuntimeId};

use crate::error::{Result, SdkError};
use crate::flow::{DataFlow, TransferType, epoch_secs};
use crate::store::{
    DEFAULT_RECOVERY_LEASE, DataFlowStore, PgTxHandle, RecoveryStream, TransactionContext,
    TransactionScope, TxWork,
};

const FIND_BY_ID_SQL: &str = "SELECT * FROM data_flows WHERE id = $1";

const INSERT_SQL: &str = r#"
INSERT INTO data_flows (
    id, created_at, updated_at, state_timestamp, participant_id,
    counter_party_id, dataspace_context, consumer, state,
    source_data_address, destination_data_address, callback_address,
    destination_type, flow_type, runtime_id
) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15)
"#;

const UPDATE_SQL: &str = r#"
UPDATE data_flows SET
    created_at = $2, updated_at = $3, state_timestamp = $4,
    participant_id = $5, counter_party_id = $6, dataspace_context = $7,
    consumer = $8, state = $9, source_data_address = $10,
    destination_data_address = $11, callback_address = $12,
    destination_type = $13, flow_type = $14, runtime_id = $15
WHERE id = $1
"#;

// Leases and returns stale flows in one statement, so concurrent sweeps
// cannot acquire the same batch.
const ACQUIRE_SQL: &str = r#"
UPDATE data_flows
SET updated_at = $1
WHERE runtime_id = $2 AND state != 'TERMINATED' AND updated_at < $3
RETURNING *
"#;

/// PostgreSQL-backed data flow store.
#[derive(Clone)]
pub struct PostgresDataFlowStore {
    pool: PgPool,
    runtime_id: RuntimeId,
    recovery_lease: Duration,
}

impl PostgresDataFlowStore {
    /// Creates a new store owned by the given runtime.
    pub fn new(pool: PgPool, runtime_id: RuntimeId) -> Self {
        Self {
            pool,
            runtime_id,
            recovery_lease: DEFAULT_RECOVERY_LEASE,
        }
    }

    /// Overrides the recovery lease threshold.
    pub fn with_recovery_lease(mut self, lease: Duration) -> Self {
        self.recovery_lease = lease;
        self
    }

    /// Gets a reference to the underlying connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Runs the database migrations.
    pub async fn run_migrations(&self) -> std::result::Result<(), sqlx::migrate::MigrateError> {
        sqlx::migrate!("../../migrations").run(&self.pool).await
    }

    fn row_to_flow(row: PgRow) -> Result<DataFlow> {
        let mut builder = DataFlow::builder()
            .id(row.try_get::<String, _>("id")?)
            .created_at(row.try_get("created_at")?)
            .updated_at(row.try_get("updated_at")?)
            .state_timestamp(row.try_get("state_timestamp")?)
            .participant_id(row.try_get::<String, _>("participant_id")?)
            .counter_party_id(row.try_get::<String, _>("counter_party_id")?)
            .dataspace_context(row.try_get::<String, _>("dataspace_context")?)
            .consumer(row.try_get("consumer")?)
            .state(
                row.try_get::<String, _>("state")?
                    .parse()
                    .map_err(SdkError::Store)?,
            )
            .runtime_id(row.try_get::<String, _>("runtime_id")?);

        if let Some(value) = row.try_get::<Option<serde_json::Value>, _>("source_data_address")? {
            builder = builder.source_data_address(serde_json::from_value(value)?);
        }
        if let Some(value) =
            row.try_get::<Option<serde_json::Value>, _>("destination_data_address")?
        {
            builder = builder.destination_data_address(serde_json::from_value(value)?);
        }
        if let Some(raw) = row.try_get::<Option<String>, _>("callback_address")? {
            let url = Url::parse(&raw)
                .map_err(|e| SdkError::Store(format!("invalid callback address in store: {e}")))?;
            builder = builder.callback_address(url);
        }
        let destination_type: Option<String> = row.try_get("destination_type")?;
        let flow_type: Option<String> = row.try_get("flow_type")?;
        if let (Some(destination_type), Some(flow_type)) = (destination_type, flow_type) {
            builder = builder.transfer_type(TransferType {
                destination_type,
                flow_type: flow_type.parse().map_err(SdkError::Store)?,
            });
        }

        builder.build()
    }

    fn bind_flow<'q>(
        query: sqlx::query::Query<'q, sqlx::Postgres, sqlx::postgres::PgArguments>,
        flow: &'q DataFlow,
    ) -> Result<sqlx::query::Query<'q, sqlx::Postgres, sqlx::postgres::PgArguments>> {
        let source = flow
            .source_data_address()
            .map(serde_json::to_value)
            .transpose()?;
        let destination = flow
            .destination_data_address()
            .map(serde_json::to_value)
            .transpose()?;

        Ok(query
            .bind(flow.id().as_str())
            .bind(flow.created_at())
            .bind(flow.updated_at())
            .bind(flow.state_timestamp())
            .bind(flow.participant_id())
            .bind(flow.counter_party_id())
            .bind(flow.dataspace_context())
            .bind(flow.consumer())
            .bind(flow.state().as_str())
            .bind(source)
            .bind(destination)
            .bind(flow.callback_address().map(|url| url.to_string()))
            .bind(flow.transfer_type().map(|t| t.destination_type.clone()))
            .bind(flow.transfer_type().map(|t| t.flow_type.as_str()))
            .bind(flow.runtime_id().as_str()))
    }
}

#[async_trait]
impl DataFlowStore for PostgresDataFlowStore {
    async fn find_by_id(&self, scope: &TransactionScope, id: &ProcessId) -> Result<DataFlow> {
        let query = sqlx::query(FIND_BY_ID_SQL).bind(id.as_str());
        let row = match scope.pg() {
            Some(handle) => {
                let mut guard = handle.lock().await;
                let tx = active(&mut guard)?;
                query.fetch_optional(&mut **tx).await?
            }
            None => query.fetch_optional(&self.pool).await?,
        };
        match row {
            Some(row) => Self::row_to_flow(row),
            None => Err(SdkError::NotFound(id.to_string())),
        }
    }

    async fn create(&self, scope: &TransactionScope, flow: &DataFlow) -> Result<()> {
        let query = Self::bind_flow(sqlx::query(INSERT_SQL), flow)?;
        let result = match scope.pg() {
            Some(handle) => {
                let mut guard = handle.lock().await;
                let tx = active(&mut guard)?;
                query.execute(&mut **tx).await
            }
            None => query.execute(&self.pool).await,
        };
        result.map_err(|e| {
            if let sqlx::Error::Database(ref db_err) = e {
                if db_err.constraint() == Some("data_flows_pkey") {
                    return SdkError::AlreadyExists(flow.id().to_string());
                }
            }
            SdkError::Database(e)
        })?;
        Ok(())
    }

    async fn save(&self, scope: &TransactionScope, flow: &DataFlow) -> Result<()> {
        let query = Self::bind_flow(sqlx::query(UPDATE_SQL), flow)?;
        let result = match scope.pg() {
            Some(handle) => {
                let mut guard = handle.lock().await;
                let tx = active(&mut guard)?;
                query.execute(&mut **tx).await?
            }
            None => query.execute(&self.pool).await?,
        };
        if result.rows_affected() == 0 {
            return Err(SdkError::NotFound(flow.id().to_string()));
        }
        Ok(())
    }

    async fn acquire_flows_for_recovery(
        &self,
        scope: &TransactionScope,
    ) -> Result<RecoveryStream> {
        let now = epoch_secs();
        let stale_before = now - self.recovery_lease.as_secs() as i64;
        let query = sqlx::query(ACQUIRE_SQL)
            .bind(now)
            .bind(self.runtime_id.as_str())
            .bind(stale_before);

        let rows = match scope.pg() {
            Some(handle) => {
                let mut guard = handle.lock().await;
                let tx = active(&mut guard)?;
                query.fetch_all(&mut **tx).await?
            }
            None => query.fetch_all(&self.pool).await?,
        };

        // Row conversion failures surface as in-band cursor errors.
        let flows: Vec<Result<DataFlow>> = rows.into_iter().map(Self::row_to_flow).collect();
        Ok(Box::pin(stream::iter(flows)))
    }
}

fn active<'g>(
    guard: &'g mut Option<sqlx::Transaction<'static, sqlx::Postgres>>,
) -> Result<&'g mut sqlx::Transaction<'static, sqlx::Postgres>> {
    guard
        .as_mut()
        .ok_or_else(|| SdkError::Store("transaction is no longer active".to_string()))
}

/// Transaction context backed by a PostgreSQL connection pool.
///
/// Opens one database transaction per unit of work, threads it through the
/// [`TransactionScope`] and commits on success, rolling back otherwise.
#[derive(Clone)]
pub struct PgTransactionContext {
    pool: PgPool,
}

impl PgTransactionContext {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

impl TransactionContext for PgTransactionContext {
    fn execute<'a>(&'a self, work: TxWork<'a>) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            let tx = self.pool.begin().await?;
            let handle: PgTxHandle = Arc::new(Mutex::new(Some(tx)));
            let scope = TransactionScope::with_pg(Arc::clone(&handle));

            match work(scope).await {
                Ok(()) => {
                    if let Some(tx) = handle.lock().await.take() {
                        tx.commit().await?;
                    }
                    Ok(())
                }
                Err(err) => {
                    if let Some(tx) = handle.lock().await.take() {
                        if let Err(rollback_err) = tx.rollback().await {
                            tracing::warn!(error = %rollback_err, "transaction rollback failed");
                        }
                    }
                    Err(err)
                }
            }
        })
    }
}
