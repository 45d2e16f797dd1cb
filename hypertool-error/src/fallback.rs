use mcp_types::CallToolResult;

use crate::error::ProxyError;

/// Context handed to a [`FallbackHandler`] when the primary operation has
/// exhausted retries (or failed with a non-retryable error).
pub struct FallbackContext<'a> {
    pub original_error: &'a ProxyError,
    pub operation: &'a str,
    pub attempt: u32,
}

/// One link in the fallback chain. `canHandle` decides
/// whether this handler applies to the failure; `execute` produces the
/// value returned to the caller in its place.
pub trait FallbackHandler: Send + Sync {
    fn can_handle(&self, ctx: &FallbackContext<'_>) -> bool;
    fn execute(&self, ctx: &FallbackContext<'_>) -> CallToolResult;
}

/// Turns a `ServerUnavailableError` into a structured, in-band tool result
/// rather than letting it propagate as a transport-level exception, so the
/// upstream client's model sees a useful message instead of a protocol
/// error.
pub struct ServerUnavailableFallback;

impl FallbackHandler for ServerUnavailableFallback {
    fn can_handle(&self, ctx: &FallbackContext<'_>) -> bool {
        matches!(ctx.original_error, ProxyError::ServerUnavailable { .. })
    }

    fn execute(&self, ctx: &FallbackContext<'_>) -> CallToolResult {
        let mut result = CallToolResult::text(
            format!(
                "'{}' is currently unavailable: {}",
                ctx.operation, ctx.original_error
            ),
            true,
        );
        result.fallback = Some(true);
        result
    }
}

/// Ordered list of fallback handlers; the first one whose `can_handle`
/// returns `true` wins.
#[derive(Default)]
pub struct FallbackChain {
    handlers: Vec<Box<dyn FallbackHandler>>,
}

impl FallbackChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_handler(mut self, handler: Box<dyn FallbackHandler>) -> Self {
        self.handlers.push(handler);
        self
    }

    pub fn standard() -> Self {
        Self::new().with_handler(Box::new(ServerUnavailableFallback))
    }

    /// Returns `Some(result)` from the first handler that can handle this
    /// error, or `None` if nothing in the chain applies (the caller should
    /// then surface `original_error` unchanged).
    pub fn handle(&self, ctx: &FallbackContext<'_>) -> Option<CallToolResult> {
        self.handlers
            .iter()
            .find(|h| h.can_handle(ctx))
            .map(|h| h.execute(ctx))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn server_unavailable_fallback_marks_result_as_fallback() {
        let err = ProxyError::ServerUnavailable {
            server: "git".into(),
            reason: "circuit open".into(),
        };
        let ctx = FallbackContext {
            original_error: &err,
            operation: "git_status",
            attempt: 1,
        };
        let chain = FallbackChain::standard();
        let result = chain.handle(&ctx).expect("fallback should handle this");
        assert_eq!(result.is_error, Some(true));
        assert_eq!(result.fallback, Some(true));
    }

    #[test]
    fn chain_returns_none_when_no_handler_matches() {
        let err = ProxyError::ToolNotFound("git.status".into());
        let ctx = FallbackContext {
            original_error: &err,
            operation: "git_status",
            attempt: 1,
        };
        let chain = FallbackChain::standard();
        assert!(chain.handle(&ctx).is_none());
    }
}
