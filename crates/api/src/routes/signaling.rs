//! Signaling endpoints routing protocol verbs to engine operations.
//!
//! Handlers read the raw request body and parse through the message DTOs so
//! that malformed JSON and validation failures keep their distinct error
//! kinds on the wire.

use std::sync::Arc;

use axum::Json;
use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use dsdk::{
    DataFlowPrepareMessage, DataFlowResponseMessage, DataFlowStartMessage, DataFlowStatusResponse,
    DataFlowStore, DataFlowTransitionMessage, DataPlaneSdk, ProcessId, RequestContext, SdkError,
    TransactionContext,
};
use serde::Deserialize;

use crate::error::ApiError;

/// Shared application state accessible from all handlers.
pub struct AppState<S: DataFlowStore, T: TransactionContext> {
    pub sdk: DataPlaneSdk<S, T>,
}

#[derive(Deserialize)]
pub struct StatusParams {
    pub id: String,
}

/// POST /prepare — consumer-side preparation for receiving data.
#[tracing::instrument(skip_all)]
pub async fn prepare<S, T>(
    State(state): State<Arc<AppState<S, T>>>,
    body: Bytes,
) -> Result<Json<DataFlowResponseMessage>, ApiError>
where
    S: DataFlowStore + 'static,
    T: TransactionContext + 'static,
{
    let message = DataFlowPrepareMessage::from_json(&body)?;
    let response = state.sdk.prepare(&RequestContext::new(), message).await?;
    Ok(Json(response))
}

/// POST /start — starts a flow on the provider side or activates a prepared
/// consumer flow.
#[tracing::instrument(skip_all)]
pub async fn start<S, T>(
    State(state): State<Arc<AppState<S, T>>>,
    body: Bytes,
) -> Result<Json<DataFlowResponseMessage>, ApiError>
where
    S: DataFlowStore + 'static,
    T: TransactionContext + 'static,
{
    let message = DataFlowStartMessage::from_json(&body)?;
    let response = state.sdk.start(&RequestContext::new(), message).await?;
    Ok(Json(response))
}

/// POST /terminate/{process_id} — terminates a flow.
#[tracing::instrument(skip_all, fields(process_id = %process_id))]
pub async fn terminate<S, T>(
    State(state): State<Arc<AppState<S, T>>>,
    Path(process_id): Path<String>,
    body: Bytes,
) -> Result<StatusCode, ApiError>
where
    S: DataFlowStore + 'static,
    T: TransactionContext + 'static,
{
    let message = parse_transition(&body)?;
    if !message.reason.is_empty() {
        tracing::info!(reason = %message.reason, "flow termination requested");
    }
    state
        .sdk
        .terminate(&RequestContext::new(), &ProcessId::new(process_id))
        .await?;
    Ok(StatusCode::OK)
}

/// POST /suspend/{process_id} — suspends a flow.
#[tracing::instrument(skip_all, fields(process_id = %process_id))]
pub async fn suspend<S, T>(
    State(state): State<Arc<AppState<S, T>>>,
    Path(process_id): Path<String>,
    body: Bytes,
) -> Result<StatusCode, ApiError>
where
    S: DataFlowStore + 'static,
    T: TransactionContext + 'static,
{
    let message = parse_transition(&body)?;
    if !message.reason.is_empty() {
        tracing::info!(reason = %message.reason, "flow suspension requested");
    }
    state
        .sdk
        .suspend(&RequestContext::new(), &ProcessId::new(process_id))
        .await?;
    Ok(StatusCode::OK)
}

/// GET /status?id={processId} — reports a flow's current state.
#[tracing::instrument(skip_all, fields(process_id = %params.id))]
pub async fn status<S, T>(
    State(state): State<Arc<AppState<S, T>>>,
    Query(params): Query<StatusParams>,
) -> Result<Json<DataFlowStatusResponse>, ApiError>
where
    S: DataFlowStore + 'static,
    T: TransactionContext + 'static,
{
    let response = state
        .sdk
        .status(&RequestContext::new(), &ProcessId::new(params.id))
        .await?;
    Ok(Json(response))
}

// Transition messages accompany terminate/suspend; an empty body is treated
// as a message without a reason.
fn parse_transition(body: &[u8]) -> Result<DataFlowTransitionMessage, ApiError> {
    if body.is_empty() {
        return Ok(DataFlowTransitionMessage::default());
    }
    serde_json::from_slice(body)
        .map_err(|e| SdkError::InvalidInput(format!("error deserializing message: {e}")).into())
}
