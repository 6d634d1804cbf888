//! Signaling message DTOs and their validation.
//!
//! Deserialization is lenient: missing scalar fields default to empty and
//! nested structures to `None`, then [`validate`](DataFlowBaseMessage::validate)
//! rejects the gaps. This keeps the two failure kinds apart: malformed JSON
//! is an input error, a structurally sound payload with missing or invalid
//! fields is a validation error.

use common::ProcessId;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::address::DataAddress;
use crate::error::{Result, SdkError};
use crate::flow::TransferType;
use crate::state::DataFlowState;

/// Fields shared by every inbound signaling message.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DataFlowBaseMessage {
    #[serde(rename = "messageID", default)]
    pub message_id: String,

    #[serde(rename = "participantID", default)]
    pub participant_id: String,

    #[serde(rename = "counterPartyID", default)]
    pub counter_party_id: String,

    #[serde(default)]
    pub dataspace_context: String,

    #[serde(rename = "processID", default)]
    pub process_id: ProcessId,

    #[serde(rename = "agreementID", default)]
    pub agreement_id: String,

    #[serde(rename = "datasetID", default)]
    pub dataset_id: String,

    #[serde(default)]
    pub callback_address: String,

    #[serde(default)]
    pub transfer_type: Option<TransferType>,

    #[serde(default)]
    pub destination_data_address: Option<DataAddress>,
}

impl DataFlowBaseMessage {
    /// Checks the message invariants: all required fields present, the
    /// callback address a parseable URL, the transfer type complete.
    pub fn validate(&self) -> Result<()> {
        require(&self.message_id, "messageID")?;
        require(&self.participant_id, "participantID")?;
        require(&self.counter_party_id, "counterPartyID")?;
        require(&self.dataspace_context, "dataspaceContext")?;
        require(self.process_id.as_str(), "processID")?;
        require(&self.agreement_id, "agreementID")?;
        require(&self.dataset_id, "datasetID")?;
        require(&self.callback_address, "callbackAddress")?;
        self.callback_url()?;

        let transfer_type = self
            .transfer_type
            .as_ref()
            .ok_or_else(|| SdkError::Validation("transferType is required".to_string()))?;
        require(&transfer_type.destination_type, "transferType.destinationType")?;

        if self.destination_data_address.is_none() {
            return Err(SdkError::Validation(
                "destinationDataAddress is required".to_string(),
            ));
        }
        Ok(())
    }

    /// Parses the callback address; only meaningful after [`validate`](Self::validate).
    pub fn callback_url(&self) -> Result<Url> {
        Url::parse(&self.callback_address).map_err(|e| {
            SdkError::Validation(format!("callbackAddress is not a valid URL: {e}"))
        })
    }
}

/// Asks the consumer side to prepare for receiving data.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DataFlowPrepareMessage {
    #[serde(flatten)]
    pub base: DataFlowBaseMessage,
}

impl DataFlowPrepareMessage {
    /// Deserializes and validates a prepare message from a JSON payload.
    pub fn from_json(payload: &[u8]) -> Result<Self> {
        let message: Self = parse(payload)?;
        message.validate()?;
        Ok(message)
    }

    pub fn validate(&self) -> Result<()> {
        self.base.validate()
    }
}

/// Starts a data flow: creates it on the provider side, activates a prepared
/// flow on the consumer side.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DataFlowStartMessage {
    #[serde(flatten)]
    pub base: DataFlowBaseMessage,

    #[serde(default)]
    pub source_data_address: Option<DataAddress>,
}

impl DataFlowStartMessage {
    /// Deserializes and validates a start message from a JSON payload.
    pub fn from_json(payload: &[u8]) -> Result<Self> {
        let message: Self = parse(payload)?;
        message.validate()?;
        Ok(message)
    }

    pub fn validate(&self) -> Result<()> {
        self.base.validate()?;
        if self.source_data_address.is_none() {
            return Err(SdkError::Validation(
                "sourceDataAddress is required".to_string(),
            ));
        }
        Ok(())
    }
}

/// Accompanies terminate and suspend requests.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DataFlowTransitionMessage {
    #[serde(default)]
    pub reason: String,
}

/// The engine's answer to prepare and start messages.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DataFlowResponseMessage {
    #[serde(rename = "dataplaneID", default)]
    pub dataplane_id: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_address: Option<DataAddress>,

    pub state: DataFlowState,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Answer to a status query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataFlowStatusResponse {
    pub state: DataFlowState,

    #[serde(rename = "dataFlowID")]
    pub data_flow_id: ProcessId,
}

fn parse<'de, T: Deserialize<'de>>(payload: &'de [u8]) -> Result<T> {
    serde_json::from_slice(payload)
        .map_err(|e| SdkError::InvalidInput(format!("error deserializing message: {e}")))
}

fn require(value: &str, field: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(SdkError::Validation(format!("{field} is required")));
    }
    Ok(())
}
