//! Data flow state machine.

use serde::{Deserialize, Serialize};

/// The lifecycle state of a data flow.
///
/// State transitions:
/// ```text
/// ∅ ──► Preparing ──► Prepared ──► Starting ──► Started
///           │             │            │           │
///           └─────────────┴────────────┴───────────┴──► Suspended ──► Terminated
/// ```
/// `Preparing`, `Starting` and `Started` permit idempotent re-entry so that
/// retried signals can be re-applied; every non-terminated state may move to
/// `Suspended` or `Terminated`; `Terminated` is final.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum DataFlowState {
    /// Consumer side is getting ready to receive data.
    Preparing,

    /// Consumer side is ready to receive data.
    Prepared,

    /// Transfer is being set up.
    Starting,

    /// Transfer is active.
    Started,

    /// Transfer is paused; it can only resume into termination.
    Suspended,

    /// Transfer is finished (terminal state).
    Terminated,
}

impl DataFlowState {
    /// Returns true if the state machine permits moving to `target`.
    pub fn can_transition_to(&self, target: DataFlowState) -> bool {
        use DataFlowState::*;
        match target {
            Preparing => matches!(self, Preparing),
            Prepared => matches!(self, Preparing),
            Starting => matches!(self, Prepared | Starting),
            Started => matches!(self, Prepared | Starting | Started),
            Suspended | Terminated => !self.is_terminal(),
        }
    }

    /// Returns true if this is a terminal state (no further transitions possible).
    pub fn is_terminal(&self) -> bool {
        matches!(self, DataFlowState::Terminated)
    }

    /// Returns true while the flow is in flight: the handler acknowledged the
    /// signal but the flow is not yet settled.
    pub fn is_transient(&self) -> bool {
        matches!(self, DataFlowState::Preparing | DataFlowState::Starting)
    }

    /// Returns the wire representation of the state.
    pub fn as_str(&self) -> &'static str {
        match self {
            DataFlowState::Preparing => "PREPARING",
            DataFlowState::Prepared => "PREPARED",
            DataFlowState::Starting => "STARTING",
            DataFlowState::Started => "STARTED",
            DataFlowState::Suspended => "SUSPENDED",
            DataFlowState::Terminated => "TERMINATED",
        }
    }
}

impl std::fmt::Display for DataFlowState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for DataFlowState {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "PREPARING" => Ok(DataFlowState::Preparing),
            "PREPARED" => Ok(DataFlowState::Prepared),
            "STARTING" => Ok(DataFlowState::Starting),
            "STARTED" => Ok(DataFlowState::Started),
            "SUSPENDED" => Ok(DataFlowState::Suspended),
            "TERMINATED" => Ok(DataFlowState::Terminated),
            other => Err(format!("unknown data flow state: {other}")),
        }
    }
}
