//! Per-request execution context.

use tokio_util::sync::CancellationToken;

/// Carries cancellation for a single engine operation.
///
/// Adapters create one per inbound request. Operations observe cancellation
/// before opening their transaction; the recovery sweep re-checks between
/// flows, never mid-flow. Work already committed is not reversed.
#[derive(Debug, Clone, Default)]
pub struct RequestContext {
    cancellation: CancellationToken,
}

impl RequestContext {
    /// Creates a context that is never cancelled externally.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a context driven by the given cancellation token.
    pub fn with_cancellation(cancellation: CancellationToken) -> Self {
        Self { cancellation }
    }

    /// Returns the underlying cancellation token.
    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancellation
    }

    /// Returns true once the request has been cancelled.
    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
    }
}
