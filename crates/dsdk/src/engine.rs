//! The signaling engine.
//!
//! Classifies each inbound signal as new, duplicate or transition, delegates
//! side effects to the installed handlers and persists the outcome — all
//! inside one transactional scope per operation. Deduplication is
//! store-backed: the store is the only source of truth for "have I seen this
//! process id", which keeps retries correct across restarts and across
//! instances sharing a store.

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use futures_util::StreamExt;

use common::{ProcessId, RuntimeId};

use crate::address::DataAddress;
use crate::context::RequestContext;
use crate::error::{HandlerError, Result, SdkError};
use crate::flow::DataFlow;
use crate::messages::{
    DataFlowBaseMessage, DataFlowPrepareMessage, DataFlowResponseMessage, DataFlowStartMessage,
    DataFlowStatusResponse,
};
use crate::state::DataFlowState;
use crate::store::{DataFlowStore, TransactionContext, TransactionScope};

/// Options passed to [`DataFlowProcessor`] invocations.
#[derive(Debug, Clone, Default)]
pub struct ProcessorOptions {
    /// True when the triggering message is a retry of one already applied.
    /// Processors must behave idempotently in that case: they may regenerate
    /// transient artifacts such as tokens, but must not create duplicates.
    pub duplicate: bool,

    /// Source address carried by a start message, if any.
    pub source_data_address: Option<DataAddress>,
}

/// Extension point handling prepare and start signals.
///
/// Implementations may mutate the passed flow; the engine persists it after
/// the call. The returned response's `state` selects the flow's next state.
#[async_trait]
pub trait DataFlowProcessor: Send + Sync {
    async fn process(
        &self,
        flow: &mut DataFlow,
        options: &ProcessorOptions,
    ) -> std::result::Result<DataFlowResponseMessage, HandlerError>;
}

/// Extension point for side-effecting terminate, suspend and recover signals.
#[async_trait]
pub trait DataFlowHandler: Send + Sync {
    async fn handle(&self, flow: &DataFlow) -> std::result::Result<(), HandlerError>;
}

/// The data plane SDK engine.
///
/// Built through [`DataPlaneSdkBuilder`], which validates that the store, the
/// transaction context and all five handlers are installed.
pub struct DataPlaneSdk<S, T>
where
    S: DataFlowStore,
    T: TransactionContext,
{
    store: S,
    trx: T,
    runtime_id: RuntimeId,
    on_prepare: Arc<dyn DataFlowProcessor>,
    on_start: Arc<dyn DataFlowProcessor>,
    on_terminate: Arc<dyn DataFlowHandler>,
    on_suspend: Arc<dyn DataFlowHandler>,
    on_recover: Arc<dyn DataFlowHandler>,
}

impl<S, T> DataPlaneSdk<S, T>
where
    S: DataFlowStore,
    T: TransactionContext,
{
    /// Creates a new SDK builder.
    pub fn builder() -> DataPlaneSdkBuilder<S, T> {
        DataPlaneSdkBuilder::new()
    }

    /// Returns the runtime id stamped onto flows created by this node.
    pub fn runtime_id(&self) -> &RuntimeId {
        &self.runtime_id
    }

    /// Handles a prepare signal on the consumer side.
    ///
    /// A flow already in `Preparing` or `Prepared` marks the message as a
    /// duplicate: the processor runs with `duplicate = true` (it may
    /// regenerate a data address) and the stored record stays untouched.
    #[tracing::instrument(skip(self, ctx, message), fields(process_id = %message.base.process_id))]
    pub async fn prepare(
        &self,
        ctx: &RequestContext,
        message: DataFlowPrepareMessage,
    ) -> Result<DataFlowResponseMessage> {
        metrics::counter!("signaling_operations_total", "operation" => "prepare").increment(1);
        let started = Instant::now();
        let process_id = message.base.process_id.clone();
        self.check_ready(ctx, &process_id)?;

        let mut response = None;
        let out = &mut response;
        self.trx
            .execute(Box::new(move |scope| {
                Box::pin(async move {
                    let existing = self.find_existing(&scope, &process_id).await?;
                    let produced = match existing {
                        Some(mut flow)
                            if matches!(
                                flow.state(),
                                DataFlowState::Preparing | DataFlowState::Prepared
                            ) =>
                        {
                            metrics::counter!("signaling_duplicates_total", "operation" => "prepare")
                                .increment(1);
                            tracing::debug!("duplicate prepare message");
                            let options = ProcessorOptions {
                                duplicate: true,
                                source_data_address: None,
                            };
                            self.invoke_processor(&self.on_prepare, &mut flow, &options)
                                .await?
                        }
                        Some(flow) => {
                            return Err(SdkError::TransitionForbidden {
                                id: process_id.to_string(),
                                from: flow.state(),
                                to: DataFlowState::Preparing,
                            });
                        }
                        None => {
                            let mut flow = self.new_flow(
                                &message.base,
                                true,
                                DataFlowState::Preparing,
                                None,
                            )?;
                            let produced = self
                                .invoke_processor(
                                    &self.on_prepare,
                                    &mut flow,
                                    &ProcessorOptions::default(),
                                )
                                .await?;
                            match produced.state {
                                DataFlowState::Preparing => flow.transition_to_preparing()?,
                                DataFlowState::Prepared => flow.transition_to_prepared()?,
                                other => {
                                    return Err(invalid_handler_state(
                                        &process_id,
                                        "on_prepare",
                                        other,
                                    ));
                                }
                            }
                            self.store.create(&scope, &flow).await?;
                            produced
                        }
                    };
                    *out = Some(produced);
                    Ok(())
                })
            }))
            .await?;

        metrics::histogram!("signaling_operation_seconds", "operation" => "prepare")
            .record(started.elapsed().as_secs_f64());
        response.ok_or_else(|| SdkError::Store("prepare produced no response".to_string()))
    }

    /// Handles a start signal.
    ///
    /// Creates the flow on the provider side, activates a prepared flow on
    /// the consumer side and re-applies the handler state on duplicates.
    #[tracing::instrument(skip(self, ctx, message), fields(process_id = %message.base.process_id))]
    pub async fn start(
        &self,
        ctx: &RequestContext,
        message: DataFlowStartMessage,
    ) -> Result<DataFlowResponseMessage> {
        metrics::counter!("signaling_operations_total", "operation" => "start").increment(1);
        let started = Instant::now();
        let process_id = message.base.process_id.clone();
        self.check_ready(ctx, &process_id)?;

        let mut response = None;
        let out = &mut response;
        self.trx
            .execute(Box::new(move |scope| {
                Box::pin(async move {
                    let existing = self.find_existing(&scope, &process_id).await?;
                    let options = ProcessorOptions {
                        duplicate: false,
                        source_data_address: message.source_data_address.clone(),
                    };
                    let produced = match existing {
                        Some(mut flow)
                            if matches!(
                                flow.state(),
                                DataFlowState::Starting | DataFlowState::Started
                            ) =>
                        {
                            metrics::counter!("signaling_duplicates_total", "operation" => "start")
                                .increment(1);
                            tracing::debug!("duplicate start message");
                            let options = ProcessorOptions {
                                duplicate: true,
                                source_data_address: message.source_data_address.clone(),
                            };
                            let produced = self
                                .invoke_processor(&self.on_start, &mut flow, &options)
                                .await?;
                            self.apply_start_state(&produced, &mut flow, &process_id)?;
                            self.store.save(&scope, &flow).await?;
                            produced
                        }
                        Some(mut flow)
                            if flow.consumer() && flow.state() == DataFlowState::Prepared =>
                        {
                            // Consumer activation by the counterparty's start signal.
                            flow.set_source_data_address(message.source_data_address.clone());
                            let produced = self
                                .invoke_processor(&self.on_start, &mut flow, &options)
                                .await?;
                            self.apply_start_state(&produced, &mut flow, &process_id)?;
                            self.store.save(&scope, &flow).await?;
                            produced
                        }
                        Some(flow) => {
                            return Err(SdkError::TransitionForbidden {
                                id: process_id.to_string(),
                                from: flow.state(),
                                to: DataFlowState::Started,
                            });
                        }
                        None => {
                            let mut flow = self.new_flow(
                                &message.base,
                                false,
                                DataFlowState::Starting,
                                message.source_data_address.as_ref(),
                            )?;
                            let produced = self
                                .invoke_processor(&self.on_start, &mut flow, &options)
                                .await?;
                            self.apply_start_state(&produced, &mut flow, &process_id)?;
                            self.store.create(&scope, &flow).await?;
                            produced
                        }
                    };
                    *out = Some(produced);
                    Ok(())
                })
            }))
            .await?;

        metrics::histogram!("signaling_operation_seconds", "operation" => "start")
            .record(started.elapsed().as_secs_f64());
        response.ok_or_else(|| SdkError::Store("start produced no response".to_string()))
    }

    /// Terminates a flow. Returns success without invoking the handler when
    /// the flow is already terminated.
    #[tracing::instrument(skip(self, ctx))]
    pub async fn terminate(&self, ctx: &RequestContext, process_id: &ProcessId) -> Result<()> {
        metrics::counter!("signaling_operations_total", "operation" => "terminate").increment(1);
        self.check_ready(ctx, process_id)?;

        self.trx
            .execute(Box::new(move |scope| {
                Box::pin(async move {
                    let mut flow = self.store.find_by_id(&scope, process_id).await?;
                    if flow.state() == DataFlowState::Terminated {
                        tracing::debug!(%process_id, "duplicate terminate message");
                        return Ok(());
                    }
                    flow.transition_to_terminated()?;
                    self.invoke_handler(&self.on_terminate, &flow).await?;
                    self.store.save(&scope, &flow).await
                })
            }))
            .await
    }

    /// Suspends a flow. Returns success without invoking the handler when the
    /// flow is already suspended.
    #[tracing::instrument(skip(self, ctx))]
    pub async fn suspend(&self, ctx: &RequestContext, process_id: &ProcessId) -> Result<()> {
        metrics::counter!("signaling_operations_total", "operation" => "suspend").increment(1);
        self.check_ready(ctx, process_id)?;

        self.trx
            .execute(Box::new(move |scope| {
                Box::pin(async move {
                    let mut flow = self.store.find_by_id(&scope, process_id).await?;
                    if flow.state() == DataFlowState::Suspended {
                        tracing::debug!(%process_id, "duplicate suspend message");
                        return Ok(());
                    }
                    flow.transition_to_suspended()?;
                    self.invoke_handler(&self.on_suspend, &flow).await?;
                    self.store.save(&scope, &flow).await
                })
            }))
            .await
    }

    /// Sweeps flows owned by this runtime that need recovery attention.
    ///
    /// Invokes the recovery handler once per acquired flow. Per-flow handler
    /// failures are collected into one aggregated error without aborting the
    /// sweep; a cursor read failure aborts. Cancellation is honored between
    /// flows, never mid-flow.
    #[tracing::instrument(skip_all)]
    pub async fn recover(&self, ctx: &RequestContext) -> Result<()> {
        metrics::counter!("signaling_operations_total", "operation" => "recover").increment(1);
        if ctx.is_cancelled() {
            return Err(SdkError::Cancelled);
        }

        self.trx
            .execute(Box::new(move |scope| {
                Box::pin(async move {
                    let mut flows = self.store.acquire_flows_for_recovery(&scope).await?;
                    let mut failures = Vec::new();
                    while let Some(item) = flows.next().await {
                        if ctx.is_cancelled() {
                            return Err(SdkError::Cancelled);
                        }
                        let flow = item
                            .map_err(|e| SdkError::Store(format!("recovering data flows: {e}")))?;
                        tracing::info!(process_id = %flow.id(), state = %flow.state(), "recovering data flow");
                        if let Err(e) = self.on_recover.handle(&flow).await {
                            tracing::warn!(process_id = %flow.id(), error = %e, "recovery handler failed");
                            failures.push(format!("{}: {e}", flow.id()));
                        }
                    }
                    if failures.is_empty() {
                        Ok(())
                    } else {
                        metrics::counter!("signaling_recovery_failures_total")
                            .increment(failures.len() as u64);
                        Err(SdkError::Recovery { failures })
                    }
                })
            }))
            .await
    }

    /// Reports the current state of a flow.
    #[tracing::instrument(skip(self, ctx))]
    pub async fn status(
        &self,
        ctx: &RequestContext,
        process_id: &ProcessId,
    ) -> Result<DataFlowStatusResponse> {
        self.check_ready(ctx, process_id)?;

        let mut response = None;
        let out = &mut response;
        self.trx
            .execute(Box::new(move |scope| {
                Box::pin(async move {
                    let flow = self.store.find_by_id(&scope, process_id).await?;
                    *out = Some(DataFlowStatusResponse {
                        state: flow.state(),
                        data_flow_id: flow.id().clone(),
                    });
                    Ok(())
                })
            }))
            .await?;

        response.ok_or_else(|| SdkError::Store("status produced no response".to_string()))
    }

    fn check_ready(&self, ctx: &RequestContext, process_id: &ProcessId) -> Result<()> {
        if process_id.is_empty() {
            return Err(SdkError::Validation("processID must not be empty".to_string()));
        }
        if ctx.is_cancelled() {
            return Err(SdkError::Cancelled);
        }
        Ok(())
    }

    async fn find_existing(
        &self,
        scope: &TransactionScope,
        id: &ProcessId,
    ) -> Result<Option<DataFlow>> {
        match self.store.find_by_id(scope, id).await {
            Ok(flow) => Ok(Some(flow)),
            Err(SdkError::NotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn invoke_processor(
        &self,
        processor: &Arc<dyn DataFlowProcessor>,
        flow: &mut DataFlow,
        options: &ProcessorOptions,
    ) -> Result<DataFlowResponseMessage> {
        let id = flow.id().clone();
        processor
            .process(flow, options)
            .await
            .map_err(|e| SdkError::Handler {
                id: id.into_string(),
                source: e,
            })
    }

    async fn invoke_handler(
        &self,
        handler: &Arc<dyn DataFlowHandler>,
        flow: &DataFlow,
    ) -> Result<()> {
        handler.handle(flow).await.map_err(|e| SdkError::Handler {
            id: flow.id().to_string(),
            source: e,
        })
    }

    /// Applies the state reported by an `on_start` processor.
    fn apply_start_state(
        &self,
        response: &DataFlowResponseMessage,
        flow: &mut DataFlow,
        process_id: &ProcessId,
    ) -> Result<()> {
        match response.state {
            DataFlowState::Starting => flow.transition_to_starting(),
            DataFlowState::Started => flow.transition_to_started(),
            other => Err(invalid_handler_state(process_id, "on_start", other)),
        }
    }

    /// Builds a fresh flow from the message, stamped with this runtime's id.
    fn new_flow(
        &self,
        base: &DataFlowBaseMessage,
        consumer: bool,
        state: DataFlowState,
        source: Option<&DataAddress>,
    ) -> Result<DataFlow> {
        let mut builder = DataFlow::builder()
            .id(base.process_id.clone())
            .participant_id(base.participant_id.clone())
            .counter_party_id(base.counter_party_id.clone())
            .dataspace_context(base.dataspace_context.clone())
            .consumer(consumer)
            .state(state)
            .runtime_id(self.runtime_id.clone());
        if let Some(transfer_type) = base.transfer_type.clone() {
            builder = builder.transfer_type(transfer_type);
        }
        if let Some(destination) = base.destination_data_address.clone() {
            builder = builder.destination_data_address(destination);
        }
        if let Some(source) = source {
            builder = builder.source_data_address(source.clone());
        }
        if !base.callback_address.is_empty() {
            builder = builder.callback_address(base.callback_url()?);
        }
        builder.build()
    }
}

fn invalid_handler_state(id: &ProcessId, handler: &str, state: DataFlowState) -> SdkError {
    SdkError::handler(
        id.to_string(),
        format!("{handler} returned an invalid state {state}"),
    )
}

/// Builder validating the full handler set before producing a
/// [`DataPlaneSdk`].
///
/// Installing a handler twice overwrites the earlier one; the last call wins.
pub struct DataPlaneSdkBuilder<S, T> {
    store: Option<S>,
    transaction_context: Option<T>,
    runtime_id: Option<RuntimeId>,
    on_prepare: Option<Arc<dyn DataFlowProcessor>>,
    on_start: Option<Arc<dyn DataFlowProcessor>>,
    on_terminate: Option<Arc<dyn DataFlowHandler>>,
    on_suspend: Option<Arc<dyn DataFlowHandler>>,
    on_recover: Option<Arc<dyn DataFlowHandler>>,
}

impl<S, T> DataPlaneSdkBuilder<S, T>
where
    S: DataFlowStore,
    T: TransactionContext,
{
    pub fn new() -> Self {
        Self {
            store: None,
            transaction_context: None,
            runtime_id: None,
            on_prepare: None,
            on_start: None,
            on_terminate: None,
            on_suspend: None,
            on_recover: None,
        }
    }

    pub fn store(mut self, store: S) -> Self {
        self.store = Some(store);
        self
    }

    pub fn transaction_context(mut self, transaction_context: T) -> Self {
        self.transaction_context = Some(transaction_context);
        self
    }

    /// Sets the runtime id stamped onto flows created by this node. Defaults
    /// to a random id, which disables cross-restart recovery.
    pub fn runtime_id(mut self, runtime_id: impl Into<RuntimeId>) -> Self {
        self.runtime_id = Some(runtime_id.into());
        self
    }

    pub fn on_prepare(mut self, processor: Arc<dyn DataFlowProcessor>) -> Self {
        self.on_prepare = Some(processor);
        self
    }

    pub fn on_start(mut self, processor: Arc<dyn DataFlowProcessor>) -> Self {
        self.on_start = Some(processor);
        self
    }

    pub fn on_terminate(mut self, handler: Arc<dyn DataFlowHandler>) -> Self {
        self.on_terminate = Some(handler);
        self
    }

    pub fn on_suspend(mut self, handler: Arc<dyn DataFlowHandler>) -> Self {
        self.on_suspend = Some(handler);
        self
    }

    pub fn on_recover(mut self, handler: Arc<dyn DataFlowHandler>) -> Self {
        self.on_recover = Some(handler);
        self
    }

    /// Builds the SDK, failing unless the store, the transaction context and
    /// all five handlers are installed.
    pub fn build(self) -> Result<DataPlaneSdk<S, T>> {
        let store = self.store.ok_or_else(|| required("store"))?;
        let trx = self
            .transaction_context
            .ok_or_else(|| required("transaction context"))?;
        let on_prepare = self.on_prepare.ok_or_else(|| required("on_prepare handler"))?;
        let on_start = self.on_start.ok_or_else(|| required("on_start handler"))?;
        let on_terminate = self
            .on_terminate
            .ok_or_else(|| required("on_terminate handler"))?;
        let on_suspend = self.on_suspend.ok_or_else(|| required("on_suspend handler"))?;
        let on_recover = self.on_recover.ok_or_else(|| required("on_recover handler"))?;
        let runtime_id = self
            .runtime_id
            .unwrap_or_else(|| RuntimeId::new(uuid::Uuid::new_v4().to_string()));

        Ok(DataPlaneSdk {
            store,
            trx,
            runtime_id,
            on_prepare,
            on_start,
            on_terminate,
            on_suspend,
            on_recover,
        })
    }
}

impl<S, T> Default for DataPlaneSdkBuilder<S, T>
where
    S: DataFlowStore,
    T: TransactionContext,
{
    fn default() -> Self {
        Self::new()
    }
}

fn required(what: &str) -> SdkError {
    SdkError::Configuration(format!("{what} is required"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flow::{FlowType, TransferType, epoch_secs};
    use crate::memory::{InMemoryDataFlowStore, LocalTransactionContext};
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::time::Duration;
    use tokio_util::sync::CancellationToken;

    const RUNTIME: &str = "test-runtime";

    /// Processor reporting a fixed target state, recording its invocations.
    struct StubProcessor {
        state: DataFlowState,
        data_address: Option<DataAddress>,
        fail: AtomicBool,
        calls: AtomicUsize,
        duplicate_calls: AtomicUsize,
    }

    impl StubProcessor {
        fn new(state: DataFlowState) -> Arc<Self> {
            Arc::new(Self {
                state,
                data_address: None,
                fail: AtomicBool::new(false),
                calls: AtomicUsize::new(0),
                duplicate_calls: AtomicUsize::new(0),
            })
        }

        fn with_address(state: DataFlowState, data_address: DataAddress) -> Arc<Self> {
            Arc::new(Self {
                state,
                data_address: Some(data_address),
                fail: AtomicBool::new(false),
                calls: AtomicUsize::new(0),
                duplicate_calls: AtomicUsize::new(0),
            })
        }

        fn set_fail(&self, fail: bool) {
            self.fail.store(fail, Ordering::SeqCst);
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }

        fn duplicate_calls(&self) -> usize {
            self.duplicate_calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl DataFlowProcessor for StubProcessor {
        async fn process(
            &self,
            _flow: &mut DataFlow,
            options: &ProcessorOptions,
        ) -> std::result::Result<DataFlowResponseMessage, HandlerError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if options.duplicate {
                self.duplicate_calls.fetch_add(1, Ordering::SeqCst);
            }
            if self.fail.load(Ordering::SeqCst) {
                return Err("processor failed".into());
            }
            Ok(DataFlowResponseMessage {
                dataplane_id: "dp-test".to_string(),
                data_address: self.data_address.clone(),
                state: self.state,
                error: None,
            })
        }
    }

    /// Handler recording its invocations, optionally failing for one flow.
    #[derive(Default)]
    struct StubHandler {
        fail_for: Option<ProcessId>,
        calls: AtomicUsize,
    }

    impl StubHandler {
        fn new() -> Arc<Self> {
            Arc::new(Self::default())
        }

        fn failing_for(id: &str) -> Arc<Self> {
            Arc::new(Self {
                fail_for: Some(ProcessId::new(id)),
                calls: AtomicUsize::new(0),
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl DataFlowHandler for StubHandler {
        async fn handle(&self, flow: &DataFlow) -> std::result::Result<(), HandlerError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail_for.as_ref() == Some(flow.id()) {
                return Err("handler failed".into());
            }
            Ok(())
        }
    }

    struct Fixture {
        sdk: DataPlaneSdk<InMemoryDataFlowStore, LocalTransactionContext>,
        store: InMemoryDataFlowStore,
        on_prepare: Arc<StubProcessor>,
        on_start: Arc<StubProcessor>,
        on_terminate: Arc<StubHandler>,
        on_suspend: Arc<StubHandler>,
        on_recover: Arc<StubHandler>,
    }

    fn fixture() -> Fixture {
        fixture_with(
            StubProcessor::new(DataFlowState::Prepared),
            StubProcessor::with_address(
                DataFlowState::Started,
                DataAddress::builder()
                    .property("endpoint", "http://x")
                    .property("token", "t2")
                    .build(),
            ),
            StubHandler::new(),
        )
    }

    fn fixture_with(
        on_prepare: Arc<StubProcessor>,
        on_start: Arc<StubProcessor>,
        on_recover: Arc<StubHandler>,
    ) -> Fixture {
        let store = InMemoryDataFlowStore::new(RuntimeId::new(RUNTIME))
            .with_recovery_lease(Duration::from_secs(60));
        let on_terminate = StubHandler::new();
        let on_suspend = StubHandler::new();
        let sdk = DataPlaneSdk::builder()
            .store(store.clone())
            .transaction_context(LocalTransactionContext::new())
            .runtime_id(RUNTIME)
            .on_prepare(on_prepare.clone())
            .on_start(on_start.clone())
            .on_terminate(on_terminate.clone())
            .on_suspend(on_suspend.clone())
            .on_recover(on_recover.clone())
            .build()
            .unwrap();
        Fixture {
            sdk,
            store,
            on_prepare,
            on_start,
            on_terminate,
            on_suspend,
            on_recover,
        }
    }

    fn prepare_message(process_id: &str) -> DataFlowPrepareMessage {
        DataFlowPrepareMessage {
            base: base_message(process_id),
        }
    }

    fn start_message(process_id: &str) -> DataFlowStartMessage {
        DataFlowStartMessage {
            base: base_message(process_id),
            source_data_address: Some(DataAddress::builder().property("token", "t").build()),
        }
    }

    fn base_message(process_id: &str) -> DataFlowBaseMessage {
        DataFlowBaseMessage {
            message_id: "msg-1".to_string(),
            participant_id: "participant-1".to_string(),
            counter_party_id: "counterparty-1".to_string(),
            dataspace_context: "ctx-1".to_string(),
            process_id: ProcessId::new(process_id),
            agreement_id: "agreement-1".to_string(),
            dataset_id: "dataset-1".to_string(),
            callback_address: "https://example.com/callback".to_string(),
            transfer_type: Some(TransferType {
                destination_type: "com.test.http".to_string(),
                flow_type: FlowType::Pull,
            }),
            destination_data_address: Some(DataAddress::default()),
        }
    }

    async fn stored_flow(store: &InMemoryDataFlowStore, id: &str) -> DataFlow {
        store
            .find_by_id(&TransactionScope::none(), &ProcessId::new(id))
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn prepare_creates_consumer_flow() {
        let f = fixture();

        let response = f
            .sdk
            .prepare(&RequestContext::new(), prepare_message("p1"))
            .await
            .unwrap();

        assert_eq!(response.state, DataFlowState::Prepared);
        let flow = stored_flow(&f.store, "p1").await;
        assert!(flow.consumer());
        assert_eq!(flow.state(), DataFlowState::Prepared);
        assert_eq!(flow.participant_id(), "participant-1");
        assert_eq!(flow.runtime_id().as_str(), RUNTIME);
        assert!(flow.callback_address().is_some());
    }

    #[tokio::test]
    async fn duplicate_prepare_invokes_handler_once_with_duplicate_flag() {
        let f = fixture();

        let first = f
            .sdk
            .prepare(&RequestContext::new(), prepare_message("p1"))
            .await
            .unwrap();
        let second = f
            .sdk
            .prepare(&RequestContext::new(), prepare_message("p1"))
            .await
            .unwrap();

        assert_eq!(first, second);
        assert_eq!(f.on_prepare.calls(), 2);
        assert_eq!(f.on_prepare.duplicate_calls(), 1);
        assert_eq!(f.store.flow_count().await, 1);
        assert_eq!(stored_flow(&f.store, "p1").await.state(), DataFlowState::Prepared);
    }

    #[tokio::test]
    async fn prepare_rejects_flow_in_wrong_state() {
        let f = fixture();
        f.sdk
            .start(&RequestContext::new(), start_message("p1"))
            .await
            .unwrap();

        let result = f
            .sdk
            .prepare(&RequestContext::new(), prepare_message("p1"))
            .await;

        assert!(matches!(result, Err(SdkError::TransitionForbidden { .. })));
    }

    #[tokio::test]
    async fn prepare_fails_on_invalid_handler_state() {
        let f = fixture_with(
            StubProcessor::new(DataFlowState::Started),
            StubProcessor::new(DataFlowState::Started),
            StubHandler::new(),
        );

        let result = f
            .sdk
            .prepare(&RequestContext::new(), prepare_message("p1"))
            .await;

        assert!(matches!(result, Err(SdkError::Handler { .. })));
        assert_eq!(f.store.flow_count().await, 0);
    }

    #[tokio::test]
    async fn start_creates_provider_flow() {
        let f = fixture();

        let response = f
            .sdk
            .start(&RequestContext::new(), start_message("p1"))
            .await
            .unwrap();

        assert_eq!(response.state, DataFlowState::Started);
        assert!(response.data_address.is_some());
        let flow = stored_flow(&f.store, "p1").await;
        assert!(!flow.consumer());
        assert_eq!(flow.state(), DataFlowState::Started);
        assert!(flow.source_data_address().is_some());
    }

    #[tokio::test]
    async fn duplicate_start_reapplies_state_and_keeps_single_record() {
        let f = fixture();

        f.sdk
            .start(&RequestContext::new(), start_message("p1"))
            .await
            .unwrap();
        let response = f
            .sdk
            .start(&RequestContext::new(), start_message("p1"))
            .await
            .unwrap();

        assert_eq!(response.state, DataFlowState::Started);
        assert_eq!(f.on_start.duplicate_calls(), 1);
        assert_eq!(f.store.flow_count().await, 1);
        assert_eq!(stored_flow(&f.store, "p1").await.state(), DataFlowState::Started);
    }

    #[tokio::test]
    async fn start_activates_prepared_consumer_flow() {
        let f = fixture();

        f.sdk
            .prepare(&RequestContext::new(), prepare_message("p2"))
            .await
            .unwrap();
        let response = f
            .sdk
            .start(&RequestContext::new(), start_message("p2"))
            .await
            .unwrap();

        assert_eq!(response.state, DataFlowState::Started);
        let flow = stored_flow(&f.store, "p2").await;
        assert!(flow.consumer());
        assert_eq!(flow.state(), DataFlowState::Started);
        assert!(flow.source_data_address().is_some());
        assert_eq!(f.on_start.duplicate_calls(), 0);
    }

    #[tokio::test]
    async fn start_rejects_terminated_flow() {
        let f = fixture();
        f.sdk
            .start(&RequestContext::new(), start_message("p1"))
            .await
            .unwrap();
        f.sdk
            .terminate(&RequestContext::new(), &ProcessId::new("p1"))
            .await
            .unwrap();

        let result = f.sdk.start(&RequestContext::new(), start_message("p1")).await;

        assert!(matches!(result, Err(SdkError::TransitionForbidden { .. })));
    }

    #[tokio::test]
    async fn terminate_unknown_flow_is_not_found() {
        let f = fixture();

        let result = f
            .sdk
            .terminate(&RequestContext::new(), &ProcessId::new("unknown"))
            .await;

        assert!(matches!(result, Err(SdkError::NotFound(_))));
        assert_eq!(f.on_terminate.calls(), 0);
    }

    #[tokio::test]
    async fn terminate_is_idempotent() {
        let f = fixture();
        f.sdk
            .start(&RequestContext::new(), start_message("p1"))
            .await
            .unwrap();

        f.sdk
            .terminate(&RequestContext::new(), &ProcessId::new("p1"))
            .await
            .unwrap();
        let timestamp = stored_flow(&f.store, "p1").await.state_timestamp();
        f.sdk
            .terminate(&RequestContext::new(), &ProcessId::new("p1"))
            .await
            .unwrap();

        assert_eq!(f.on_terminate.calls(), 1);
        let flow = stored_flow(&f.store, "p1").await;
        assert_eq!(flow.state(), DataFlowState::Terminated);
        assert_eq!(flow.state_timestamp(), timestamp);
    }

    #[tokio::test]
    async fn suspend_is_idempotent() {
        let f = fixture();
        f.sdk
            .start(&RequestContext::new(), start_message("p1"))
            .await
            .unwrap();

        f.sdk
            .suspend(&RequestContext::new(), &ProcessId::new("p1"))
            .await
            .unwrap();
        f.sdk
            .suspend(&RequestContext::new(), &ProcessId::new("p1"))
            .await
            .unwrap();

        assert_eq!(f.on_suspend.calls(), 1);
        assert_eq!(stored_flow(&f.store, "p1").await.state(), DataFlowState::Suspended);
    }

    #[tokio::test]
    async fn suspended_flow_can_terminate_but_not_start() {
        let f = fixture();
        f.sdk
            .start(&RequestContext::new(), start_message("p1"))
            .await
            .unwrap();
        f.sdk
            .suspend(&RequestContext::new(), &ProcessId::new("p1"))
            .await
            .unwrap();

        let start_result = f.sdk.start(&RequestContext::new(), start_message("p1")).await;
        assert!(matches!(start_result, Err(SdkError::TransitionForbidden { .. })));

        f.sdk
            .terminate(&RequestContext::new(), &ProcessId::new("p1"))
            .await
            .unwrap();
        assert_eq!(stored_flow(&f.store, "p1").await.state(), DataFlowState::Terminated);
    }

    #[tokio::test]
    async fn handler_failure_rolls_back_new_flow() {
        let f = fixture();
        f.on_start.set_fail(true);

        let result = f.sdk.start(&RequestContext::new(), start_message("p1")).await;

        assert!(matches!(result, Err(SdkError::Handler { .. })));
        assert_eq!(f.store.flow_count().await, 0);
    }

    #[tokio::test]
    async fn handler_failure_leaves_existing_flow_untouched() {
        let f = fixture();
        f.sdk
            .start(&RequestContext::new(), start_message("p1"))
            .await
            .unwrap();
        let before = stored_flow(&f.store, "p1").await;

        f.on_start.set_fail(true);
        let result = f.sdk.start(&RequestContext::new(), start_message("p1")).await;

        assert!(matches!(result, Err(SdkError::Handler { .. })));
        assert_eq!(stored_flow(&f.store, "p1").await, before);
    }

    #[tokio::test]
    async fn empty_process_id_is_rejected_before_any_handler_call() {
        let f = fixture();

        let result = f.sdk.prepare(&RequestContext::new(), prepare_message("")).await;

        assert!(matches!(result, Err(SdkError::Validation(_))));
        assert_eq!(f.on_prepare.calls(), 0);
        assert_eq!(f.store.flow_count().await, 0);
    }

    #[tokio::test]
    async fn cancelled_context_aborts_before_the_transaction() {
        let f = fixture();
        let token = CancellationToken::new();
        token.cancel();
        let ctx = RequestContext::with_cancellation(token);

        let result = f.sdk.start(&ctx, start_message("p1")).await;

        assert!(matches!(result, Err(SdkError::Cancelled)));
        assert_eq!(f.on_start.calls(), 0);
    }

    #[tokio::test]
    async fn status_reports_current_state() {
        let f = fixture();
        f.sdk
            .prepare(&RequestContext::new(), prepare_message("p1"))
            .await
            .unwrap();

        let status = f
            .sdk
            .status(&RequestContext::new(), &ProcessId::new("p1"))
            .await
            .unwrap();

        assert_eq!(status.state, DataFlowState::Prepared);
        assert_eq!(status.data_flow_id.as_str(), "p1");
    }

    #[tokio::test]
    async fn status_of_unknown_flow_is_not_found() {
        let f = fixture();
        let result = f
            .sdk
            .status(&RequestContext::new(), &ProcessId::new("missing"))
            .await;
        assert!(matches!(result, Err(SdkError::NotFound(_))));
    }

    async fn seed_stale_flow(store: &InMemoryDataFlowStore, id: &str, state: DataFlowState) {
        let flow = DataFlow::builder()
            .id(id)
            .state(state)
            .updated_at(epoch_secs() - 600)
            .runtime_id(RUNTIME)
            .build()
            .unwrap();
        store.create(&TransactionScope::none(), &flow).await.unwrap();
    }

    #[tokio::test]
    async fn recover_invokes_handler_once_per_stale_flow() {
        let f = fixture();
        seed_stale_flow(&f.store, "r1", DataFlowState::Starting).await;
        seed_stale_flow(&f.store, "r2", DataFlowState::Starting).await;

        f.sdk.recover(&RequestContext::new()).await.unwrap();

        assert_eq!(f.on_recover.calls(), 2);
    }

    #[tokio::test]
    async fn recover_aggregates_failures_without_aborting_the_sweep() {
        let f = fixture_with(
            StubProcessor::new(DataFlowState::Prepared),
            StubProcessor::new(DataFlowState::Started),
            StubHandler::failing_for("r1"),
        );
        seed_stale_flow(&f.store, "r1", DataFlowState::Starting).await;
        seed_stale_flow(&f.store, "r2", DataFlowState::Starting).await;

        let result = f.sdk.recover(&RequestContext::new()).await;

        assert_eq!(f.on_recover.calls(), 2);
        match result {
            Err(SdkError::Recovery { failures }) => {
                assert_eq!(failures.len(), 1);
                assert!(failures[0].contains("r1"));
            }
            other => panic!("expected aggregated recovery error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn recover_skips_fresh_and_terminated_flows() {
        let f = fixture();
        seed_stale_flow(&f.store, "stale", DataFlowState::Starting).await;
        seed_stale_flow(&f.store, "done", DataFlowState::Terminated).await;
        let fresh = DataFlow::builder()
            .id("fresh")
            .state(DataFlowState::Starting)
            .runtime_id(RUNTIME)
            .build()
            .unwrap();
        f.store.create(&TransactionScope::none(), &fresh).await.unwrap();

        f.sdk.recover(&RequestContext::new()).await.unwrap();

        assert_eq!(f.on_recover.calls(), 1);
    }

    #[tokio::test]
    async fn builder_requires_every_handler() {
        let store = InMemoryDataFlowStore::new(RuntimeId::new(RUNTIME));
        let result = DataPlaneSdk::builder()
            .store(store)
            .transaction_context(LocalTransactionContext::new())
            .on_prepare(StubProcessor::new(DataFlowState::Prepared))
            .on_start(StubProcessor::new(DataFlowState::Started))
            .on_terminate(StubHandler::new())
            .on_suspend(StubHandler::new())
            // on_recover deliberately missing
            .build();

        assert!(matches!(result, Err(SdkError::Configuration(_))));
    }

    #[tokio::test]
    async fn builder_overwrites_handlers_installed_twice() {
        let first = StubHandler::new();
        let second = StubHandler::new();
        let store = InMemoryDataFlowStore::new(RuntimeId::new(RUNTIME));
        let sdk = DataPlaneSdk::builder()
            .store(store.clone())
            .transaction_context(LocalTransactionContext::new())
            .runtime_id(RUNTIME)
            .on_prepare(StubProcessor::new(DataFlowState::Prepared))
            .on_start(StubProcessor::new(DataFlowState::Started))
            .on_terminate(StubHandler::new())
            .on_suspend(StubHandler::new())
            .on_recover(first.clone())
            .on_recover(second.clone())
            .build()
            .unwrap();

        seed_stale_flow(&store, "r1", DataFlowState::Starting).await;
        sdk.recover(&RequestContext::new()).await.unwrap();

        assert_eq!(first.calls(), 0);
        assert_eq!(second.calls(), 1);
    }
}
