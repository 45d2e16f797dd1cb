use serde::Serialize;

use crate::tool_cache::ToolChangeSummary;
use hypertool_error::CircuitState;

/// Every change-notification the proxy's subsystems emit. Delivered to each
/// subscriber in the order raised, per subscriber, over an
/// `async_channel` so slow subscribers don't stall producers.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type")]
pub enum ProxyEvent {
    ToolsChanged {
        server_name: String,
        summary: ToolChangeSummary,
    },
    ToolsetChanged {
        previous_toolset: Option<String>,
        new_toolset: Option<String>,
        change_type: ToolsetChangeType,
    },
    PersonaActivated {
        persona: String,
        toolset: Option<String>,
    },
    PersonaDeactivated,
    CircuitStateChanged {
        server_name: String,
        from: CircuitState,
        to: CircuitState,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolsetChangeType {
    Equipped,
    Updated,
    Unequipped,
}

/// Process-wide fan-out bus. Cloning an `EventBus` clones the sender only;
/// all clones publish to the same set of subscribers.
#[derive(Clone)]
pub struct EventBus {
    sender: async_channel::Sender<ProxyEvent>,
    receiver_template: async_channel::Receiver<ProxyEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        let (sender, receiver_template) = async_channel::unbounded();
        Self {
            sender,
            receiver_template,
        }
    }

    pub fn publish(&self, event: ProxyEvent) {
        // An unbounded channel with no current subscribers still accepts
        // sends; they're simply dropped when the last receiver is gone.
        let _ = self.sender.try_send(event);
    }

    pub fn subscribe(&self) -> async_channel::Receiver<ProxyEvent> {
        self.receiver_template.clone()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
