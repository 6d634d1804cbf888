//! Data Plane SDK core.
//!
//! Sits behind a dataspace "Data Plane Signaling" API and manages the
//! lifecycle of long-lived data transfer flows: a persistent per-flow state
//! machine, store-backed deduplication of retried messages, transactional
//! orchestration of user-supplied handlers and a recovery sweep for flows
//! interrupted by crashes.

pub mod address;
pub mod context;
pub mod engine;
pub mod error;
pub mod flow;
pub mod memory;
pub mod messages;
pub mod postgres;
pub mod state;
pub mod store;

pub use common::{ProcessId, RuntimeId};

pub use address::{DataAddress, DataAddressBuilder, ENDPOINT_PROPERTIES};
pub use context::RequestContext;
pub use engine::{
    DataFlowHandler, DataFlowProcessor, DataPlaneSdk, DataPlaneSdkBuilder, ProcessorOptions,
};
pub use error::{HandlerError, Result, SdkError};
pub use flow::{DataFlow, DataFlowBuilder, FlowType, TransferType};
pub use memory::{InMemoryDataFlowStore, LocalTransactionContext};
pub use messages::{
    DataFlowBaseMessage, DataFlowPrepareMessage, DataFlowResponseMessage, DataFlowStartMessage,
    DataFlowStatusResponse, DataFlowTransitionMessage,
};
pub use postgres::{PgTransactionContext, PostgresDataFlowStore};
pub use state::DataFlowState;
pub use store::{
    DEFAULT_RECOVERY_LEASE, DataFlowStore, RecoveryStream, TransactionContext, TransactionScope,
    TxWork,
};
