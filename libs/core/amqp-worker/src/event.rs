//! Consumer lifecycle: phases, status snapshot and events

use serde::Serialize;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

/// Consumer state machine phase
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConsumerPhase {
    #[default]
    Stopped,
    Connecting,
    Binding,
    Consuming,
    Reconnecting,
}

impl ConsumerPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConsumerPhase::Stopped => "stopped",
            ConsumerPhase::Connecting => "connecting",
            ConsumerPhase::Binding => "binding",
            ConsumerPhase::Consuming => "consuming",
            ConsumerPhase::Reconnecting => "reconnecting",
        }
    }
}

/// Snapshot returned by `QueueConsumer::status()`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ConnectionState {
    pub is_running: bool,
    pub reconnect_attempts: u32,
    pub phase: ConsumerPhase,
}

impl ConnectionState {
    /// Anything other than `Stopped`: a start() is in progress or done.
    pub fn is_active(&self) -> bool {
        self.is_running || self.phase != ConsumerPhase::Stopped
    }
}

/// Read-only view of the consumer state, shared with health handlers
#[derive(Debug, Clone, Default)]
pub struct StatusHandle(Arc<RwLock<ConnectionState>>);

impl StatusHandle {
    pub fn get(&self) -> ConnectionState {
        *self.0.read().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn update<R>(&self, f: impl FnOnce(&mut ConnectionState) -> R) -> R {
        let mut state = self.0.write().unwrap_or_else(PoisonError::into_inner);
        f(&mut state)
    }
}

/// Events published on the consumer's broadcast channel
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LifecycleEvent {
    /// Consuming from the queue
    Started,
    /// `stop()` completed
    Stopped,
    /// Connection closed or errored while consuming
    ConnectionLost { reason: String },
    /// About to wait and retry the connection
    Reconnecting { attempt: u32 },
    /// Reconnection ceiling reached; consumer stays stopped
    ReconnectAbandoned { attempts: u32 },
    MessageAcked {
        message_id: String,
        duration: Duration,
    },
    MessageRequeued {
        message_id: String,
        retry_count: u32,
    },
    MessageDeadLettered {
        message_id: String,
        retry_count: u32,
    },
}
