//! In-memory collaborators for unit tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use vrclink_api::{
    ApiError, ApiResponse, Friend, Instance, Location, Method, Notification, ResourceResolver,
    SessionProvider, World,
};

use crate::{EventHandler, PresenceEvent};

/// Session and resolver backed by maps.
#[derive(Default)]
pub(crate) struct FakeApi {
    users: Mutex<HashMap<String, Value>>,
    worlds: Mutex<HashMap<String, Value>>,
    instances: Mutex<HashMap<String, Value>>,
    friends: Mutex<Vec<Friend>>,
    user_delay: Mutex<Duration>,
    token: Mutex<Option<String>>,
    user_fetches: AtomicUsize,
    world_fetches: AtomicUsize,
    instance_fetches: AtomicUsize,
    logged_out: AtomicBool,
}

impl FakeApi {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            token: Mutex::new(Some("authcookie_test".to_string())),
            ..Default::default()
        })
    }

    pub fn add_user(&self, user: Value) {
        let id = user["id"].as_str().unwrap().to_string();
        self.users.lock().unwrap().insert(id, user);
    }

    pub fn add_world(&self, world: Value) {
        let id = world["id"].as_str().unwrap().to_string();
        self.worlds.lock().unwrap().insert(id, world);
    }

    pub fn add_instance(&self, instance: Value) {
        let id = instance["id"].as_str().unwrap().to_string();
        self.instances.lock().unwrap().insert(id, instance);
    }

    pub fn set_friends(&self, friends: Vec<Friend>) {
        *self.friends.lock().unwrap() = friends;
    }

    pub fn set_user_delay(&self, delay: Duration) {
        *self.user_delay.lock().unwrap() = delay;
    }

    pub fn set_token(&self, token: Option<&str>) {
        *self.token.lock().unwrap() = token.map(str::to_string);
    }

    pub fn user_fetches(&self) -> usize {
        self.user_fetches.load(Ordering::SeqCst)
    }

    pub fn world_fetches(&self) -> usize {
        self.world_fetches.load(Ordering::SeqCst)
    }

    pub fn instance_fetches(&self) -> usize {
        self.instance_fetches.load(Ordering::SeqCst)
    }

    pub fn logged_out(&self) -> bool {
        self.logged_out.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SessionProvider for FakeApi {
    async fn session_token(&self) -> Result<String, ApiError> {
        self.token
            .lock()
            .unwrap()
            .clone()
            .ok_or(ApiError::NotAuthenticated)
    }

    async fn call(
        &self,
        _method: Method,
        path: &str,
        _params: &[(&str, &str)],
    ) -> Result<ApiResponse, ApiError> {
        Ok(ApiResponse {
            status: 200,
            data: serde_json::json!({ "path": path }),
        })
    }

    async fn logout(&self) -> Result<(), ApiError> {
        self.logged_out.store(true, Ordering::SeqCst);
        *self.token.lock().unwrap() = None;
        Ok(())
    }
}

#[async_trait]
impl ResourceResolver for FakeApi {
    async fn fetch_user(&self, id: &str) -> Result<Friend, ApiError> {
        self.user_fetches.fetch_add(1, Ordering::SeqCst);
        let delay = *self.user_delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        let user = self.users.lock().unwrap().get(id).cloned();
        match user {
            Some(user) => Friend::from_json(&user),
            None => Err(ApiError::NotFound {
                kind: "user",
                id: id.to_string(),
            }),
        }
    }

    async fn fetch_world(&self, id: &str) -> Result<World, ApiError> {
        self.world_fetches.fetch_add(1, Ordering::SeqCst);
        let world = self.worlds.lock().unwrap().get(id).cloned();
        match world {
            Some(world) => Ok(serde_json::from_value(world)?),
            None => Err(ApiError::NotFound {
                kind: "world",
                id: id.to_string(),
            }),
        }
    }

    async fn fetch_instance(
        &self,
        world_id: &str,
        instance_id: &str,
    ) -> Result<Instance, ApiError> {
        self.instance_fetches.fetch_add(1, Ordering::SeqCst);
        let id = format!("{world_id}:{instance_id}");
        let instance = self.instances.lock().unwrap().get(&id).cloned();
        match instance {
            Some(instance) => Ok(serde_json::from_value(instance)?),
            None => Err(ApiError::NotFound {
                kind: "instance",
                id,
            }),
        }
    }

    async fn fetch_friends(&self, offline: bool) -> Result<Vec<Friend>, ApiError> {
        Ok(self
            .friends
            .lock()
            .unwrap()
            .iter()
            .filter(|f| (f.presence_state == vrclink_api::PresenceState::Offline) == offline)
            .cloned()
            .collect())
    }
}

/// Handler that records every callback as a [`PresenceEvent`].
#[derive(Default)]
pub(crate) struct RecordingHandler {
    events: Mutex<Vec<PresenceEvent>>,
    panic: bool,
}

impl RecordingHandler {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Records, then panics in every callback.
    pub fn panicking() -> Arc<Self> {
        Arc::new(Self {
            panic: true,
            ..Default::default()
        })
    }

    pub fn events(&self) -> Vec<PresenceEvent> {
        self.events.lock().unwrap().clone()
    }

    pub fn count(&self, kind: &str) -> usize {
        self.events
            .lock()
            .unwrap()
            .iter()
            .filter(|e| e.kind() == kind)
            .count()
    }

    /// Wait until at least `n` events of `kind` were recorded.
    pub async fn wait_for(&self, kind: &str, n: usize) {
        let waited = tokio::time::timeout(Duration::from_secs(5), async {
            while self.count(kind) < n {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await;
        assert!(
            waited.is_ok(),
            "timed out waiting for {n} {kind} events, got {:?}",
            self.events()
        );
    }

    fn record(&self, event: PresenceEvent) {
        self.events.lock().unwrap().push(event);
        if self.panic {
            panic!("callback failure");
        }
    }
}

#[async_trait]
impl EventHandler for RecordingHandler {
    async fn on_connect(&self) {
        self.record(PresenceEvent::Connected);
    }

    async fn on_disconnect(&self) {
        self.record(PresenceEvent::Disconnected);
    }

    async fn on_friend_online(&self, before: Option<Friend>, after: Friend) {
        self.record(PresenceEvent::FriendOnline { before, after });
    }

    async fn on_friend_active(&self, before: Option<Friend>, after: Friend) {
        self.record(PresenceEvent::FriendActive { before, after });
    }

    async fn on_friend_offline(&self, before: Option<Friend>, after: Friend) {
        self.record(PresenceEvent::FriendOffline { before, after });
    }

    async fn on_friend_add(&self, friend: Friend) {
        self.record(PresenceEvent::FriendAdd(friend));
    }

    async fn on_friend_delete(&self, friend: Option<Friend>) {
        self.record(PresenceEvent::FriendDelete(friend));
    }

    async fn on_friend_update(&self, before: Option<Friend>, after: Friend) {
        self.record(PresenceEvent::FriendUpdate { before, after });
    }

    async fn on_friend_location(
        &self,
        friend: Friend,
        world: Option<World>,
        location: Location,
        instance: Option<Instance>,
    ) {
        self.record(PresenceEvent::FriendLocation {
            friend,
            world,
            location,
            instance,
        });
    }

    async fn on_notification(&self, notification: Notification) {
        self.record(PresenceEvent::Notification(notification));
    }

    async fn on_unhandled_event(&self, event_type: &str, payload: Value) {
        self.record(PresenceEvent::Unhandled {
            event_type: event_type.to_string(),
            payload,
        });
    }
}
