//! Per-request operation context: acting user, correlation id and cancellation.

use std::time::Duration;
use tokio_util::sync::CancellationToken;

use super::correlation::CorrelationId;

#[derive(Debug, Clone)]
pub struct OpContext {
    pub user: String,
    pub correlation: CorrelationId,
    /// Caller-owned token; cancelling it aborts pending metadata calls.
    pub cancel: CancellationToken,
    /// Upper bound for each metadata call. Falls back to the configured default when None.
    pub timeout: Option<Duration>,
}

impl OpContext {
    pub fn new(user: &str) -> Self {
        Self { user: user.to_string(), correlation: CorrelationId::new(), cancel: CancellationToken::new(), timeout: None }
    }

    pub fn with_correlation(mut self, request_id: Option<&str>) -> Self {
        self.correlation = CorrelationId::from_opt_str(request_id);
        self
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}
