//! Data flow entity and builder.

use common::{ProcessId, RuntimeId};
use serde::{Deserialize, Serialize};
use url::Url;

use crate::address::DataAddress;
use crate::error::{Result, SdkError};
use crate::state::DataFlowState;

/// Flow directionality: the consumer fetches (`Pull`) or the provider sends
/// (`Push`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum FlowType {
    #[serde(alias = "pull")]
    Pull,
    #[serde(alias = "push")]
    Push,
}

impl FlowType {
    /// Returns the wire representation of the flow type.
    pub fn as_str(&self) -> &'static str {
        match self {
            FlowType::Pull => "PULL",
            FlowType::Push => "PUSH",
        }
    }
}

impl std::fmt::Display for FlowType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for FlowType {
    type Err = String;

    fn from_str(value: &str) -> std::result::Result<Self, Self::Err> {
        match value {
            "PULL" | "pull" => Ok(FlowType::Pull),
            "PUSH" | "push" => Ok(FlowType::Push),
            other => Err(format!("unknown flow type: {other}")),
        }
    }
}

/// The kind of transfer negotiated for a flow.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferType {
    pub destination_type: String,
    pub flow_type: FlowType,
}

/// A single data transfer lifecycle, keyed by the signaling `processID`.
///
/// Flows are created by the engine on the first successful Prepare (consumer
/// side) or Start (provider side) and mutated only inside the engine's
/// transactional path. Terminated flows are kept for audit and never deleted.
#[derive(Debug, Clone, PartialEq)]
pub struct DataFlow {
    id: ProcessId,
    created_at: i64,
    updated_at: i64,
    state_timestamp: i64,
    participant_id: String,
    counter_party_id: String,
    dataspace_context: String,
    consumer: bool,
    state: DataFlowState,
    source_data_address: Option<DataAddress>,
    destination_data_address: Option<DataAddress>,
    callback_address: Option<Url>,
    transfer_type: Option<TransferType>,
    runtime_id: RuntimeId,
}

impl DataFlow {
    /// Creates a new data flow builder.
    pub fn builder() -> DataFlowBuilder {
        DataFlowBuilder::default()
    }

    pub fn id(&self) -> &ProcessId {
        &self.id
    }

    pub fn created_at(&self) -> i64 {
        self.created_at
    }

    pub fn updated_at(&self) -> i64 {
        self.updated_at
    }

    pub fn state_timestamp(&self) -> i64 {
        self.state_timestamp
    }

    pub fn participant_id(&self) -> &str {
        &self.participant_id
    }

    pub fn counter_party_id(&self) -> &str {
        &self.counter_party_id
    }

    pub fn dataspace_context(&self) -> &str {
        &self.dataspace_context
    }

    /// True on the receiving side of the transfer, false on the providing side.
    /// Fixed at creation.
    pub fn consumer(&self) -> bool {
        self.consumer
    }

    pub fn state(&self) -> DataFlowState {
        self.state
    }

    pub fn source_data_address(&self) -> Option<&DataAddress> {
        self.source_data_address.as_ref()
    }

    pub fn destination_data_address(&self) -> Option<&DataAddress> {
        self.destination_data_address.as_ref()
    }

    pub fn callback_address(&self) -> Option<&Url> {
        self.callback_address.as_ref()
    }

    pub fn transfer_type(&self) -> Option<&TransferType> {
        self.transfer_type.as_ref()
    }

    pub fn runtime_id(&self) -> &RuntimeId {
        &self.runtime_id
    }

    /// Replaces the source data address.
    pub fn set_source_data_address(&mut self, address: Option<DataAddress>) {
        self.source_data_address = address;
    }

    /// Replaces the destination data address.
    pub fn set_destination_data_address(&mut self, address: Option<DataAddress>) {
        self.destination_data_address = address;
    }

    pub fn transition_to_preparing(&mut self) -> Result<()> {
        self.transition_to(DataFlowState::Preparing)
    }

    pub fn transition_to_prepared(&mut self) -> Result<()> {
        self.transition_to(DataFlowState::Prepared)
    }

    pub fn transition_to_starting(&mut self) -> Result<()> {
        self.transition_to(DataFlowState::Starting)
    }

    pub fn transition_to_started(&mut self) -> Result<()> {
        self.transition_to(DataFlowState::Started)
    }

    pub fn transition_to_suspended(&mut self) -> Result<()> {
        self.transition_to(DataFlowState::Suspended)
    }

    pub fn transition_to_terminated(&mut self) -> Result<()> {
        self.transition_to(DataFlowState::Terminated)
    }

    /// Checks the transition against the state table; on success updates the
    /// state and stamps `state_timestamp` strictly after its previous value.
    fn transition_to(&mut self, target: DataFlowState) -> Result<()> {
        if !self.state.can_transition_to(target) {
            return Err(SdkError::TransitionForbidden {
                id: self.id.to_string(),
                from: self.state,
                to: target,
            });
        }
        let now = epoch_secs();
        self.state = target;
        self.state_timestamp = now.max(self.state_timestamp + 1);
        self.updated_at = now;
        Ok(())
    }

    /// Re-stamps `updated_at`, used by stores when leasing flows for recovery.
    pub(crate) fn touch(&mut self, at: i64) {
        self.updated_at = at;
    }
}

/// Current wall-clock time as epoch seconds.
pub(crate) fn epoch_secs() -> i64 {
    chrono::Utc::now().timestamp()
}

/// Builder for [`DataFlow`] instances.
///
/// `id` and `state` are required; timestamps default to now and everything
/// else to empty.
#[derive(Debug, Default)]
pub struct DataFlowBuilder {
    id: Option<ProcessId>,
    created_at: Option<i64>,
    updated_at: Option<i64>,
    state_timestamp: Option<i64>,
    participant_id: Option<String>,
    counter_party_id: Option<String>,
    dataspace_context: Option<String>,
    consumer: bool,
    state: Option<DataFlowState>,
    source_data_address: Option<DataAddress>,
    destination_data_address: Option<DataAddress>,
    callback_address: Option<Url>,
    transfer_type: Option<TransferType>,
    runtime_id: Option<RuntimeId>,
}

impl DataFlowBuilder {
    pub fn id(mut self, id: impl Into<ProcessId>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn created_at(mut self, created_at: i64) -> Self {
        self.created_at = Some(created_at);
        self
    }

    pub fn updated_at(mut self, updated_at: i64) -> Self {
        self.updated_at = Some(updated_at);
        self
    }

    pub fn state_timestamp(mut self, state_timestamp: i64) -> Self {
        self.state_timestamp = Some(state_timestamp);
        self
    }

    pub fn participant_id(mut self, participant_id: impl Into<String>) -> Self {
        self.participant_id = Some(participant_id.into());
        self
    }

    pub fn counter_party_id(mut self, counter_party_id: impl Into<String>) -> Self {
        self.counter_party_id = Some(counter_party_id.into());
        self
    }

    pub fn dataspace_context(mut self, dataspace_context: impl Into<String>) -> Self {
        self.dataspace_context = Some(dataspace_context.into());
        self
    }

    pub fn consumer(mut self, consumer: bool) -> Self {
        self.consumer = consumer;
        self
    }

    pub fn state(mut self, state: DataFlowState) -> Self {
        self.state = Some(state);
        self
    }

    pub fn source_data_address(mut self, address: DataAddress) -> Self {
        self.source_data_address = Some(address);
        self
    }

    pub fn destination_data_address(mut self, address: DataAddress) -> Self {
        self.destination_data_address = Some(address);
        self
    }

    pub fn callback_address(mut self, callback_address: Url) -> Self {
        self.callback_address = Some(callback_address);
        self
    }

    pub fn transfer_type(mut self, transfer_type: TransferType) -> Self {
        self.transfer_type = Some(transfer_type);
        self
    }

    pub fn runtime_id(mut self, runtime_id: impl Into<RuntimeId>) -> Self {
        self.runtime_id = Some(runtime_id.into());
        self
    }

    /// Builds the flow, rejecting an empty id or a missing state.
    pub fn build(self) -> Result<DataFlow> {
        let id = self
            .id
            .filter(|id| !id.is_empty())
            .ok_or_else(|| SdkError::Validation("data flow id must not be empty".to_string()))?;
        let state = self
            .state
            .ok_or_else(|| SdkError::Validation("data flow state must be set".to_string()))?;

        let now = epoch_secs();
        Ok(DataFlow {
            id,
            created_at: self.created_at.unwrap_or(now),
            updated_at: self.updated_at.unwrap_or(now),
            state_timestamp: self.state_timestamp.unwrap_or(now),
            participant_id: self.participant_id.unwrap_or_default(),
            counter_party_id: self.counter_party_id.unwrap_or_default(),
            dataspace_context: self.dataspace_context.unwrap_or_default(),
            consumer: self.consumer,
            state,
            source_data_address: self.source_data_address,
            destination_data_address: self.destination_data_address,
            callback_address: self.callback_address,
            transfer_type: self.transfer_type,
            runtime_id: self.runtime_id.unwrap_or_default(),
        })
    }
}
