//! Routes decoded events to cache mutations and callbacks.
//!
//! Routing is split in two steps. [`EventRouter::apply`] resolves ids and
//! mutates the cache, producing a [`PresenceEvent`]. [`EventRouter::deliver`]
//! hands that event to the [`EventHandler`]. The supervisor uses the split to
//! keep mutations while dropping callbacks after a requested disconnect.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures_util::FutureExt;
use serde_json::Value;
use tracing::{debug, error, warn};
use vrclink_api::{
    ApiError, Friend, Instance, Location, Notification, PresenceState, ResourceResolver, World,
};

use crate::{EventHandler, PipelineError, PresenceCache};

/// The outcome of one routed event, as passed to callbacks.
#[derive(Debug, Clone, PartialEq)]
pub enum PresenceEvent {
    Connected,
    Disconnected,
    FriendOnline {
        before: Option<Friend>,
        after: Friend,
    },
    FriendActive {
        before: Option<Friend>,
        after: Friend,
    },
    FriendOffline {
        before: Option<Friend>,
        after: Friend,
    },
    FriendAdd(Friend),
    FriendDelete(Option<Friend>),
    FriendUpdate {
        before: Option<Friend>,
        after: Friend,
    },
    FriendLocation {
        friend: Friend,
        world: Option<World>,
        location: Location,
        instance: Option<Instance>,
    },
    Notification(Notification),
    Unhandled {
        event_type: String,
        payload: Value,
    },
}

impl PresenceEvent {
    /// Short name for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            PresenceEvent::Connected => "connect",
            PresenceEvent::Disconnected => "disconnect",
            PresenceEvent::FriendOnline { .. } => "friend-online",
            PresenceEvent::FriendActive { .. } => "friend-active",
            PresenceEvent::FriendOffline { .. } => "friend-offline",
            PresenceEvent::FriendAdd(_) => "friend-add",
            PresenceEvent::FriendDelete(_) => "friend-delete",
            PresenceEvent::FriendUpdate { .. } => "friend-update",
            PresenceEvent::FriendLocation { .. } => "friend-location",
            PresenceEvent::Notification(_) => "notification",
            PresenceEvent::Unhandled { .. } => "unhandled",
        }
    }
}

/// Applies pipeline events to a [`PresenceCache`] and notifies a handler.
#[derive(Clone)]
pub struct EventRouter {
    cache: Arc<PresenceCache>,
    resolver: Arc<dyn ResourceResolver>,
    handler: Arc<dyn EventHandler>,
}

impl EventRouter {
    pub fn new(
        cache: Arc<PresenceCache>,
        resolver: Arc<dyn ResourceResolver>,
        handler: Arc<dyn EventHandler>,
    ) -> Self {
        Self {
            cache,
            resolver,
            handler,
        }
    }

    pub fn cache(&self) -> &Arc<PresenceCache> {
        &self.cache
    }

    /// Apply an event and deliver the result.
    pub async fn dispatch(&self, event_type: &str, payload: Value) -> Result<(), PipelineError> {
        if let Some(event) = self.apply(event_type, payload).await? {
            self.deliver(event).await;
        }
        Ok(())
    }

    /// Resolve and mutate the cache for one event.
    ///
    /// Returns `Ok(None)` when a resolver call failed; the event is skipped
    /// without touching the cache.
    pub async fn apply(
        &self,
        event_type: &str,
        payload: Value,
    ) -> Result<Option<PresenceEvent>, PipelineError> {
        debug!(event_type = %event_type, "routing event");

        let event = match event_type {
            "friend-online" => {
                let after = user_from(&payload)?.with_presence(PresenceState::Online);
                let before = self.cache.upsert(after.clone());
                PresenceEvent::FriendOnline { before, after }
            }
            "friend-active" => {
                let after = user_from(&payload)?.with_presence(PresenceState::Active);
                let before = self.cache.upsert(after.clone());
                PresenceEvent::FriendActive { before, after }
            }
            "friend-offline" => {
                let user_id = user_id_from(&payload)?;
                let fetched = self.resolver.fetch_user(user_id).await;
                let Some(friend) = self.resolve("user", user_id, fetched) else {
                    return Ok(None);
                };
                let after = friend.with_presence(PresenceState::Offline);
                let before = self.cache.upsert(after.clone());
                PresenceEvent::FriendOffline { before, after }
            }
            "friend-add" => {
                let friend = user_from(&payload)?;
                self.cache.upsert(friend.clone());
                PresenceEvent::FriendAdd(friend)
            }
            "friend-delete" => {
                let user_id = user_id_from(&payload)?;
                PresenceEvent::FriendDelete(self.cache.remove(user_id))
            }
            "friend-update" => {
                let mut after = user_from(&payload)?;
                if !has_explicit_state(&payload) {
                    if let Some(state) = self.cache.state_of(&after.id) {
                        after.presence_state = state;
                    }
                }
                let before = self.cache.upsert(after.clone());
                PresenceEvent::FriendUpdate { before, after }
            }
            "friend-location" => match self.apply_location(&payload).await? {
                Some(event) => event,
                None => return Ok(None),
            },
            "notification" => {
                let notification = Notification::from_json(&payload)
                    .map_err(|e| PipelineError::MalformedEvent(format!("notification: {e}")))?;
                PresenceEvent::Notification(notification)
            }
            _ => {
                debug!(event_type = %event_type, "no route for event type");
                PresenceEvent::Unhandled {
                    event_type: event_type.to_string(),
                    payload,
                }
            }
        };

        Ok(Some(event))
    }

    async fn apply_location(
        &self,
        payload: &Value,
    ) -> Result<Option<PresenceEvent>, PipelineError> {
        let mut friend = user_from(payload)?;

        let location = match payload.get("location").and_then(Value::as_str) {
            Some(raw) => Location::parse(raw)
                .map_err(|e| PipelineError::MalformedEvent(e.to_string()))?,
            None => friend.location.clone().ok_or_else(|| {
                PipelineError::MalformedEvent("friend-location without location".to_string())
            })?,
        };

        let (world, instance) = match location.instance() {
            Some(target) => {
                let world = match world_from(payload) {
                    Some(world) => world,
                    None => {
                        let fetched = self.resolver.fetch_world(&target.world_id).await;
                        let Some(world) = self.resolve("world", &target.world_id, fetched) else {
                            return Ok(None);
                        };
                        world
                    }
                };

                let fetched = self
                    .resolver
                    .fetch_instance(&target.world_id, &target.instance_id)
                    .await;
                let Some(instance) = self.resolve("instance", &target.instance_id, fetched) else {
                    return Ok(None);
                };

                (Some(world), Some(instance))
            }
            None => (None, None),
        };

        if !has_explicit_state(payload) {
            // Moving between locations implies the friend is in game.
            friend.presence_state = self
                .cache
                .state_of(&friend.id)
                .unwrap_or(PresenceState::Online);
        }
        friend.location = Some(location.clone());
        self.cache.upsert(friend.clone());

        Ok(Some(PresenceEvent::FriendLocation {
            friend,
            world,
            location,
            instance,
        }))
    }

    fn resolve<T>(&self, kind: &str, id: &str, result: Result<T, ApiError>) -> Option<T> {
        match result {
            Ok(value) => Some(value),
            Err(e) => {
                warn!(kind = %kind, id = %id, error = %e, "resolver failed, skipping event");
                None
            }
        }
    }

    /// Invoke the handler callback for an event.
    ///
    /// A panicking callback is logged and otherwise ignored.
    pub async fn deliver(&self, event: PresenceEvent) {
        let kind = event.kind();
        let handler = Arc::clone(&self.handler);

        let call = async move {
            match event {
                PresenceEvent::Connected => handler.on_connect().await,
                PresenceEvent::Disconnected => handler.on_disconnect().await,
                PresenceEvent::FriendOnline { before, after } => {
                    handler.on_friend_online(before, after).await
                }
                PresenceEvent::FriendActive { before, after } => {
                    handler.on_friend_active(before, after).await
                }
                PresenceEvent::FriendOffline { before, after } => {
                    handler.on_friend_offline(before, after).await
                }
                PresenceEvent::FriendAdd(friend) => handler.on_friend_add(friend).await,
                PresenceEvent::FriendDelete(friend) => handler.on_friend_delete(friend).await,
                PresenceEvent::FriendUpdate { before, after } => {
                    handler.on_friend_update(before, after).await
                }
                PresenceEvent::FriendLocation {
                    friend,
                    world,
                    location,
                    instance,
                } => {
                    handler
                        .on_friend_location(friend, world, location, instance)
                        .await
                }
                PresenceEvent::Notification(notification) => {
                    handler.on_notification(notification).await
                }
                PresenceEvent::Unhandled {
                    event_type,
                    payload,
                } => handler.on_unhandled_event(&event_type, payload).await,
            }
        };

        if AssertUnwindSafe(call).catch_unwind().await.is_err() {
            error!(event = kind, "event callback panicked");
        }
    }
}

fn user_from(payload: &Value) -> Result<Friend, PipelineError> {
    let user = payload
        .get("user")
        .ok_or_else(|| PipelineError::MalformedEvent("payload has no user".to_string()))?;
    Friend::from_json(user).map_err(|e| PipelineError::MalformedEvent(e.to_string()))
}

fn user_id_from(payload: &Value) -> Result<&str, PipelineError> {
    payload
        .get("userId")
        .and_then(Value::as_str)
        .filter(|id| !id.is_empty())
        .ok_or_else(|| PipelineError::MalformedEvent("payload has no userId".to_string()))
}

fn has_explicit_state(payload: &Value) -> bool {
    payload
        .get("user")
        .and_then(PresenceState::from_user_json)
        .is_some()
}

/// A world object embedded in the payload, if it carries one.
fn world_from(payload: &Value) -> Option<World> {
    payload
        .get("world")
        .filter(|w| w.get("id").and_then(Value::as_str).is_some_and(|id| !id.is_empty()))
        .and_then(|w| serde_json::from_value(w.clone()).ok())
}
