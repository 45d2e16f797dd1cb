//! Coalesces the core's `ToolsChanged`/`ToolsetChanged` events into a
//! single `notifications/tools/list_changed` JSON-RPC notification: multiple
//! rapid changes within a short debounce window produce one notification
//! carrying the final state.

use std::sync::Arc;
use std::time::Duration;

use hypertool_core::ProxyEvent;
use hypertool_core::ProxyRuntime;
use mcp_types::JSONRPCMessage;
use mcp_types::JSONRPCNotification;
use mcp_types::JSONRPC_VERSION;
use tokio::sync::mpsc;
use tracing::debug;

/// Debounce window: events arriving within this interval of the previous
/// one are folded into a single outgoing notification.
const DEBOUNCE_WINDOW: Duration = Duration::from_millis(150);

/// Runs until `runtime`'s event bus is dropped (never, in practice — it
/// lives as long as the process). Only `ToolsChanged` and `ToolsetChanged`
/// affect the upstream-visible tool list; persona and circuit-breaker
/// events are ignored here.
pub async fn run_list_changed_notifier(runtime: Arc<ProxyRuntime>, outgoing: mpsc::Sender<JSONRPCMessage>) {
    let receiver = runtime.events.subscribe();
    loop {
        let Ok(first) = receiver.recv().await else {
            break;
        };
        if !affects_tool_list(&first) {
            continue;
        }

        // Drain any further relevant events that arrive within the
        // debounce window so a burst collapses to one notification.
        loop {
            match tokio::time::timeout(DEBOUNCE_WINDOW, receiver.recv()).await {
                Ok(Ok(event)) if affects_tool_list(&event) => continue,
                Ok(Ok(_)) => continue,
                _ => break,
            }
        }

        debug!("coalesced tool-list change, sending notifications/tools/list_changed");
        let notification = JSONRPCMessage::Notification(JSONRPCNotification {
            jsonrpc: JSONRPC_VERSION.to_string(),
            method: "notifications/tools/list_changed".to_string(),
            params: None,
        });
        if outgoing.send(notification).await.is_err() {
            break;
        }
    }
}

fn affects_tool_list(event: &ProxyEvent) -> bool {
    matches!(
        event,
        ProxyEvent::ToolsChanged { .. } | ProxyEvent::ToolsetChanged { .. }
    )
}
