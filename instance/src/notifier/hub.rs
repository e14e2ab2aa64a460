//! Channel hub.
//!
//! Tracks the live members of each named topic and fans messages out to
//! every member of the sender's topic except the sender itself.

use std::sync::Arc;

use dashmap::DashMap;
use tabsync_engine::ChannelMessage;
use tokio::sync::mpsc;

/// Sender for channel messages.
pub type MessageSender = mpsc::UnboundedSender<ChannelMessage>;

/// A single live channel member.
#[derive(Debug)]
pub struct Member {
    /// Unique identifier for this member
    pub id: String,
    /// Topic the member joined
    pub topic: String,
    /// Channel to deliver messages to this member
    pub sender: MessageSender,
}

/// Registry of channel members, shared by every instance in a process.
///
/// Thread-safe and can be shared via `Arc`.
#[derive(Debug, Default)]
pub struct ChannelHub {
    /// All live members, keyed by member ID.
    members: DashMap<String, Member>,
    /// Index of member IDs by topic.
    by_topic: DashMap<String, Vec<String>>,
}

impl ChannelHub {
    /// Create a new hub.
    pub fn new() -> Self {
        Self {
            members: DashMap::new(),
            by_topic: DashMap::new(),
        }
    }

    /// Create a new hub wrapped in Arc for sharing.
    pub fn new_shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Join a topic.
    ///
    /// Returns the member ID.
    pub fn join(&self, topic: &str, sender: MessageSender) -> String {
        let member_id = uuid::Uuid::new_v4().to_string();

        self.members.insert(
            member_id.clone(),
            Member {
                id: member_id.clone(),
                topic: topic.to_string(),
                sender,
            },
        );

        self.by_topic
            .entry(topic.to_string())
            .or_default()
            .push(member_id.clone());

        tracing::debug!(member_id = %member_id, topic = %topic, "Channel member joined");

        member_id
    }

    /// Leave the hub. Leaving twice is a no-op.
    pub fn leave(&self, member_id: &str) {
        if let Some((_, member)) = self.members.remove(member_id) {
            if let Some(mut ids) = self.by_topic.get_mut(&member.topic) {
                ids.retain(|id| id != member_id);
            }
            // Re-checked under the shard lock: a concurrent join may have
            // refilled the topic since the retain.
            self.by_topic.remove_if(&member.topic, |_, ids| ids.is_empty());

            tracing::debug!(member_id = %member_id, topic = %member.topic, "Channel member left");
        }
    }

    /// Deliver a message to every member of the sender's topic except the
    /// sender.
    ///
    /// Returns the number of members the message was handed to. Members whose
    /// receiver is gone are skipped silently.
    pub fn broadcast_except(&self, sender_id: &str, message: &ChannelMessage) -> usize {
        let Some(topic) = self.members.get(sender_id).map(|m| m.topic.clone()) else {
            tracing::warn!(sender = %sender_id, "Broadcast from unknown member dropped");
            return 0;
        };

        let recipients: Vec<String> = self
            .by_topic
            .get(&topic)
            .map(|ids| ids.iter().filter(|id| *id != sender_id).cloned().collect())
            .unwrap_or_default();

        let mut sent_count = 0;
        for id in recipients {
            if let Some(member) = self.members.get(&id) {
                if member.sender.send(message.clone()).is_ok() {
                    sent_count += 1;
                }
            }
        }

        tracing::debug!(
            sender = %sender_id,
            topic = %topic,
            recipients = sent_count,
            "Broadcast message to channel members"
        );

        sent_count
    }

    /// Get the number of live members across all topics.
    pub fn member_count(&self) -> usize {
        self.members.len()
    }

    /// Get the number of live members of one topic.
    pub fn topic_member_count(&self, topic: &str) -> usize {
        self.by_topic.get(topic).map(|ids| ids.len()).unwrap_or(0)
    }
}
