use std::collections::HashMap;
use std::sync::atomic::AtomicI64;
use std::sync::atomic::Ordering;

use mcp_types::RequestId;
use tokio::sync::oneshot;
use tokio::sync::Mutex;
use tracing::warn;

/// Tracks in-flight requests on one connection so that responses, which may
/// arrive out of order and interleaved with other in-flight calls, can be
/// routed back to the caller that sent them.
pub(crate) struct PendingRequests {
    next_id: AtomicI64,
    callbacks: Mutex<HashMap<RequestId, oneshot::Sender<mcp_types::Result>>>,
}

impl PendingRequests {
    pub(crate) fn new() -> Self {
        Self {
            next_id: AtomicI64::new(0),
            callbacks: Mutex::new(HashMap::new()),
        }
    }

    pub(crate) fn next_request_id(&self) -> RequestId {
        RequestId::Integer(self.next_id.fetch_add(1, Ordering::Relaxed))
    }

    pub(crate) async fn register(&self, id: RequestId) -> oneshot::Receiver<mcp_types::Result> {
        let (tx, rx) = oneshot::channel();
        self.callbacks.lock().await.insert(id, tx);
        rx
    }

    /// Resolves the callback registered for `id`, if any. Called from the
    /// transport's read loop as responses arrive.
    pub(crate) async fn resolve(&self, id: RequestId, result: mcp_types::Result) {
        let entry = self.callbacks.lock().await.remove(&id);
        match entry {
            Some(tx) => {
                let _ = tx.send(result);
            }
            None => warn!("no pending request for id {id:?}"),
        }
    }

    /// Fails every outstanding callback, e.g. because the underlying
    /// transport died mid-call.
    pub(crate) async fn fail_all(&self, error: mcp_types::JSONRPCErrorError) {
        let mut callbacks = self.callbacks.lock().await;
        for (_, tx) in callbacks.drain() {
            let _ = tx.send(Err(error.clone()));
        }
    }
}
