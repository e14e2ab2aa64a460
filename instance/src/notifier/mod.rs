//! Change notifier.
//!
//! Each instance joins the hub under the deployment's topic. Publishing is
//! fire-and-forget and never reaches the publisher; delivery to everyone
//! else is asynchronous, best-effort and unordered relative to snapshot
//! writes.

mod hub;

pub use hub::{ChannelHub, Member, MessageSender};

use std::future::Future;
use std::sync::Arc;

use parking_lot::Mutex;
use tabsync_engine::{ChangeNotification, ChannelMessage};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// One instance's handle on the change channel.
#[derive(Debug)]
pub struct ChangeNotifier {
    hub: Arc<ChannelHub>,
    topic: String,
    member_id: String,
    inbox: Mutex<Option<mpsc::UnboundedReceiver<ChannelMessage>>>,
}

impl ChangeNotifier {
    /// Join `topic` on `hub`.
    pub fn join(hub: Arc<ChannelHub>, topic: impl Into<String>) -> Self {
        let topic = topic.into();
        let (tx, rx) = mpsc::unbounded_channel();
        let member_id = hub.join(&topic, tx);

        Self {
            hub,
            topic,
            member_id,
            inbox: Mutex::new(Some(rx)),
        }
    }

    /// This instance's member ID on the hub.
    pub fn member_id(&self) -> &str {
        &self.member_id
    }

    /// The topic this notifier publishes on.
    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Broadcast a notification to every other live instance.
    ///
    /// Returns the number of instances it was handed to.
    pub fn publish(&self, notification: ChangeNotification) -> usize {
        let message = ChannelMessage::state_changed(notification);
        self.hub.broadcast_except(&self.member_id, &message)
    }

    /// Register a handler for incoming notifications.
    ///
    /// Each delivered notification runs the handler on its own task, so a
    /// slow handler does not hold back the next delivery. Returns `None` if a
    /// handler is already registered.
    pub fn subscribe<F, Fut>(&self, handler: F) -> Option<Subscription>
    where
        F: Fn(ChangeNotification) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let mut inbox = self.inbox.lock().take()?;
        let member_id = self.member_id.clone();

        let task = tokio::spawn(async move {
            while let Some(message) = inbox.recv().await {
                let notification = message.notification().clone();
                tracing::trace!(
                    member_id = %member_id,
                    table = %notification.table,
                    action = %notification.action,
                    "Change notification received"
                );
                tokio::spawn(handler(notification));
            }
        });

        Some(Subscription { task })
    }

    /// Leave the channel. Later publishes from others no longer reach this
    /// instance.
    pub fn close(&self) {
        self.hub.leave(&self.member_id);
        self.inbox.lock().take();
    }
}

impl Drop for ChangeNotifier {
    fn drop(&mut self) {
        self.hub.leave(&self.member_id);
    }
}

/// A registered notification handler. Dropping it unsubscribes.
#[derive(Debug)]
pub struct Subscription {
    task: JoinHandle<()>,
}

impl Subscription {
    /// Stop delivering notifications to the handler.
    pub fn unsubscribe(self) {
        self.task.abort();
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.task.abort();
    }
}
