//! Default pull data plane wired by the server binary.
//!
//! Answers Prepare with `Prepared` and Start with `Started` plus a generated
//! endpoint/token data address. Retried messages regenerate the token without
//! creating new server-side artifacts, so duplicates stay idempotent.

use async_trait::async_trait;
use dsdk::{
    DataAddress, DataFlow, DataFlowHandler, DataFlowProcessor, DataFlowResponseMessage,
    DataFlowState, HandlerError, ProcessorOptions,
};
use uuid::Uuid;

/// Acknowledges prepare signals: the consumer endpoint needs no setup before
/// the transfer starts.
pub struct PullPrepareProcessor {
    dataplane_id: String,
}

impl PullPrepareProcessor {
    pub fn new(dataplane_id: impl Into<String>) -> Self {
        Self {
            dataplane_id: dataplane_id.into(),
        }
    }
}

#[async_trait]
impl DataFlowProcessor for PullPrepareProcessor {
    async fn process(
        &self,
        flow: &mut DataFlow,
        options: &ProcessorOptions,
    ) -> Result<DataFlowResponseMessage, HandlerError> {
        if options.duplicate {
            tracing::debug!(process_id = %flow.id(), "acknowledging retried prepare");
        }
        Ok(DataFlowResponseMessage {
            dataplane_id: self.dataplane_id.clone(),
            data_address: None,
            state: DataFlowState::Prepared,
            error: None,
        })
    }
}

/// Starts pull transfers by issuing an access token for the public endpoint.
pub struct PullStartProcessor {
    dataplane_id: String,
    endpoint: String,
}

impl PullStartProcessor {
    pub fn new(dataplane_id: impl Into<String>, endpoint: impl Into<String>) -> Self {
        Self {
            dataplane_id: dataplane_id.into(),
            endpoint: endpoint.into(),
        }
    }

    fn issue_address(&self) -> DataAddress {
        DataAddress::builder()
            .property("endpoint", self.endpoint.clone())
            .property("token", Uuid::new_v4().to_string())
            .build()
    }
}

#[async_trait]
impl DataFlowProcessor for PullStartProcessor {
    async fn process(
        &self,
        flow: &mut DataFlow,
        options: &ProcessorOptions,
    ) -> Result<DataFlowResponseMessage, HandlerError> {
        if options.duplicate {
            // Tokens are transient, a retry simply gets a fresh one.
            tracing::debug!(process_id = %flow.id(), "reissuing data address for retried start");
        }
        Ok(DataFlowResponseMessage {
            dataplane_id: self.dataplane_id.clone(),
            data_address: Some(self.issue_address()),
            state: DataFlowState::Started,
            error: None,
        })
    }
}

/// Logs terminate, suspend and recover signals; the default data plane holds
/// no per-flow resources to release.
pub struct FlowEventLogger;

#[async_trait]
impl DataFlowHandler for FlowEventLogger {
    async fn handle(&self, flow: &DataFlow) -> Result<(), HandlerError> {
        tracing::info!(process_id = %flow.id(), state = %flow.state(), "data flow event");
        Ok(())
    }
}
