//! HTTP signaling adapter binding the data plane SDK to the dataspace
//! signaling API.
//!
//! Routes the protocol verbs to engine operations, with structured logging
//! (tracing) and Prometheus metrics.

pub mod config;
pub mod dataplane;
pub mod error;
pub mod routes;

use std::sync::Arc;

use axum::Router;
use axum::routing::{get, post};
use dsdk::{DataFlowStore, TransactionContext};
use metrics_exporter_prometheus::PrometheusHandle;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use routes::signaling::AppState;

/// Creates the axum application router with all routes and shared state.
pub fn create_app<S, T>(state: Arc<AppState<S, T>>, metrics_handle: PrometheusHandle) -> Router
where
    S: DataFlowStore + 'static,
    T: TransactionContext + 'static,
{
    let metrics_router = Router::new()
        .route("/metrics", get(routes::metrics::get))
        .with_state(metrics_handle);

    Router::new()
        .route("/health", get(routes::health::check))
        .route("/prepare", post(routes::signaling::prepare::<S, T>))
        .route("/start", post(routes::signaling::start::<S, T>))
        .route("/terminate/{process_id}", post(routes::signaling::terminate::<S, T>))
        .route("/suspend/{process_id}", post(routes::signaling::suspend::<S, T>))
        .route("/status", get(routes::signaling::status::<S, T>))
        .with_state(state)
        .merge(metrics_router)
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
}

/// Builds an SDK wired to the in-memory store and the default pull data
/// plane, returning the shared application state.
pub fn create_default_state(
    config: &config::Config,
) -> dsdk::Result<Arc<AppState<dsdk::InMemoryDataFlowStore, dsdk::LocalTransactionContext>>> {
    use dataplane::{FlowEventLogger, PullPrepareProcessor, PullStartProcessor};
    use dsdk::{DataPlaneSdk, InMemoryDataFlowStore, LocalTransactionContext, RuntimeId};

    let runtime_id = RuntimeId::new(config.runtime_id.clone());
    let store =
        InMemoryDataFlowStore::new(runtime_id.clone()).with_recovery_lease(config.recovery_lease());

    let sdk = DataPlaneSdk::builder()
        .store(store)
        .transaction_context(LocalTransactionContext::new())
        .runtime_id(runtime_id)
        .on_prepare(Arc::new(PullPrepareProcessor::new(&config.dataplane_id)))
        .on_start(Arc::new(PullStartProcessor::new(
            &config.dataplane_id,
            &config.public_endpoint,
        )))
        .on_terminate(Arc::new(FlowEventLogger))
        .on_suspend(Arc::new(FlowEventLogger))
        .on_recover(Arc::new(FlowEventLogger))
        .build()?;

    Ok(Arc::new(AppState { sdk }))
}
