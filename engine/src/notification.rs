//! Change notification protocol.
//!
//! Messages are JSON-encoded with a `type` tag. A notification says *that*
//! a table changed, never *what* changed; receivers re-read the snapshot.

use crate::{Action, MutationIntent, TableName, Timestamp};
use serde::{Deserialize, Serialize};

/// A broadcast signal that shared state has changed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangeNotification {
    /// Table the publisher mutated
    pub table: TableName,
    /// What the publisher did
    pub action: Action,
    /// When the publisher sent the notification (milliseconds since epoch)
    pub timestamp: Timestamp,
    /// Capture time of the snapshot the publisher dumped before sending
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub snapshot_at: Option<Timestamp>,
}

impl ChangeNotification {
    /// Create a notification for a mutation.
    pub fn new(intent: MutationIntent, timestamp: Timestamp) -> Self {
        Self {
            table: intent.table,
            action: intent.action,
            timestamp,
            snapshot_at: None,
        }
    }

    /// Attach the capture time of the snapshot this notification announces.
    pub fn with_snapshot_at(mut self, captured_at: Timestamp) -> Self {
        self.snapshot_at = Some(captured_at);
        self
    }

    /// Whether a snapshot captured at `captured_at` predates the one this
    /// notification announces.
    ///
    /// Notifications without a snapshot token never report staleness.
    pub fn is_newer_than(&self, captured_at: Option<Timestamp>) -> bool {
        match (self.snapshot_at, captured_at) {
            (Some(expected), Some(seen)) => seen < expected,
            (Some(_), None) => true,
            (None, _) => false,
        }
    }
}

/// Messages exchanged over the change channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ChannelMessage {
    /// Some instance mutated replicated state and dumped a new snapshot.
    StateChanged(ChangeNotification),
}

impl ChannelMessage {
    /// Create a state-changed message.
    pub fn state_changed(notification: ChangeNotification) -> Self {
        ChannelMessage::StateChanged(notification)
    }

    /// The change notification carried by this message.
    pub fn notification(&self) -> &ChangeNotification {
        match self {
            ChannelMessage::StateChanged(n) => n,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_changed_wire_format() {
        let msg = ChannelMessage::state_changed(ChangeNotification::new(
            MutationIntent::new("patients", Action::Insert),
            1706745600000,
        ));

        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "type": "state-changed",
                "table": "patients",
                "action": "insert",
                "timestamp": 1706745600000u64,
            })
        );
    }

    #[test]
    fn deserialize_with_snapshot_token() {
        let json = r#"{
            "type": "state-changed",
            "table": "patients",
            "action": "delete",
            "timestamp": 20,
            "snapshotAt": 19
        }"#;

        let msg: ChannelMessage = serde_json::from_str(json).unwrap();
        let n = msg.notification();
        assert_eq!(n.action, Action::Delete);
        assert_eq!(n.snapshot_at, Some(19));
    }

    #[test]
    fn unknown_message_type_is_rejected() {
        let json = r#"{"type": "db-updated"}"#;
        assert!(serde_json::from_str::<ChannelMessage>(json).is_err());
    }

    #[test]
    fn staleness() {
        let n = ChangeNotification::new(MutationIntent::new("patients", Action::Update), 100)
            .with_snapshot_at(90);

        assert!(n.is_newer_than(Some(80)));
        assert!(n.is_newer_than(None));
        assert!(!n.is_newer_than(Some(90)));
        assert!(!n.is_newer_than(Some(95)));

        let untagged = ChangeNotification::new(MutationIntent::new("patients", Action::Update), 100);
        assert!(!untagged.is_newer_than(None));
    }
}
