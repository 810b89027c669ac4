//! User callbacks.

use async_trait::async_trait;
use serde_json::Value;
use vrclink_api::{Friend, Instance, Location, Notification, World};

/// Receives pipeline events.
///
/// Every method has a no-op default; implement only the ones you need.
/// Callbacks run on the read loop, one at a time and in arrival order, so a
/// slow callback delays the events behind it. Panics are caught and logged.
///
/// `before` is the cached entry prior to the event, `None` when the friend was
/// not in the roster.
#[async_trait]
pub trait EventHandler: Send + Sync {
    /// The pipeline connection opened.
    async fn on_connect(&self) {}

    /// The pipeline connection closed, whether requested or not.
    async fn on_disconnect(&self) {}

    async fn on_friend_online(&self, _before: Option<Friend>, _after: Friend) {}

    async fn on_friend_active(&self, _before: Option<Friend>, _after: Friend) {}

    async fn on_friend_offline(&self, _before: Option<Friend>, _after: Friend) {}

    async fn on_friend_add(&self, _friend: Friend) {}

    /// A friend was removed; `None` if they were not in the roster.
    async fn on_friend_delete(&self, _friend: Option<Friend>) {}

    async fn on_friend_update(&self, _before: Option<Friend>, _after: Friend) {}

    /// A friend moved. `world` and `instance` are `None` unless `location`
    /// names a visible instance.
    async fn on_friend_location(
        &self,
        _friend: Friend,
        _world: Option<World>,
        _location: Location,
        _instance: Option<Instance>,
    ) {
    }

    async fn on_notification(&self, _notification: Notification) {}

    /// An event type with no dedicated callback.
    async fn on_unhandled_event(&self, _event_type: &str, _payload: Value) {}
}

/// Handler that ignores everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopHandler;

#[async_trait]
impl EventHandler for NoopHandler {}
