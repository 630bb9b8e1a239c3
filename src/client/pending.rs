//! Packet identifier allocation and acknowledgement tracking

use std::collections::HashMap;
use std::fmt;

/// What a pending packet id is waiting on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationKind {
    Publish,
    Subscribe,
    Unsubscribe,
}

/// Outcome handed to an acknowledgement callback
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckResult {
    /// PUBACK for QoS 1, PUBCOMP for QoS 2
    Published { packet_id: u16 },
    Subscribed { packet_id: u16, granted_qos: u8 },
    Unsubscribed { packet_id: u16 },
}

impl AckResult {
    pub fn packet_id(&self) -> u16 {
        match self {
            AckResult::Published { packet_id }
            | AckResult::Subscribed { packet_id, .. }
            | AckResult::Unsubscribed { packet_id } => *packet_id,
        }
    }
}

/// Invoked at most once when the matching acknowledgement arrives
pub type AckCallback = Box<dyn FnOnce(AckResult) + Send>;

/// An in-flight publish, subscribe or unsubscribe
pub struct PendingOperation {
    pub id: u16,
    pub kind: OperationKind,
    callback: Option<AckCallback>,
}

impl fmt::Debug for PendingOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PendingOperation")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("has_callback", &self.callback.is_some())
            .finish()
    }
}

/// Allocates packet ids and correlates acknowledgements with their callers.
///
/// The id counter wraps at 65535 and skips 0. Entries do not survive a
/// reconnect: [`clear`](Self::clear) drops them without invoking callbacks.
#[derive(Debug, Default)]
pub struct PendingAckTracker {
    last_id: u16,
    pending: HashMap<u16, PendingOperation>,
}

impl PendingAckTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Increment and return the counter. Never returns 0.
    pub fn next_id(&mut self) -> u16 {
        self.last_id = self.last_id.wrapping_add(1);
        if self.last_id == 0 {
            self.last_id = 1;
        }
        self.last_id
    }

    /// Restart numbering; called on every successful CONNACK
    pub fn reset_ids(&mut self) {
        self.last_id = 0;
    }

    pub fn register(&mut self, id: u16, kind: OperationKind, callback: Option<AckCallback>) {
        if self.pending.contains_key(&id) {
            tracing::warn!(
                target: "mqtt_client",
                "Packet id {} reused while still pending, replacing entry",
                id
            );
        }
        self.pending.insert(id, PendingOperation { id, kind, callback });
    }

    /// Invoke and remove the entry for `id`.
    ///
    /// Returns false when the id is unknown, which is not an error: acks for ids
    /// forgotten across a reconnect are dropped.
    pub fn resolve(&mut self, id: u16, result: AckResult) -> bool {
        let Some(operation) = self.pending.remove(&id) else {
            tracing::debug!(target: "mqtt_client", "Ignoring ack for unknown packet id {}", id);
            return false;
        };
        if let Some(callback) = operation.callback {
            callback(result);
        }
        true
    }

    pub fn contains(&self, id: u16) -> bool {
        self.pending.contains_key(&id)
    }

    pub fn kind_of(&self, id: u16) -> Option<OperationKind> {
        self.pending.get(&id).map(|operation| operation.kind)
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Forget every pending operation without calling back
    pub fn clear(&mut self) {
        if !self.pending.is_empty() {
            tracing::debug!(
                target: "mqtt_client",
                "Dropping {} pending operations",
                self.pending.len()
            );
        }
        self.pending.clear();
    }
}
