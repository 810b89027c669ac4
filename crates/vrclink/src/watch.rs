//! Live presence watcher.

use std::sync::Arc;

use async_trait::async_trait;
use miette::{Result, miette};
use serde_json::Value;
use tokio::runtime::Handle;
use tracing::{info, warn};
use vrclink_api::{Friend, Instance, Location, Notification, NotificationKind, VrcClient, World};
use vrclink_pipeline::{EventHandler, PresenceClient, SupervisorConfig};

/// Logs every pipeline event.
struct LoggingHandler;

#[async_trait]
impl EventHandler for LoggingHandler {
    async fn on_connect(&self) {
        info!("watching friend activity");
    }

    async fn on_disconnect(&self) {
        warn!("pipeline disconnected");
    }

    async fn on_friend_online(&self, before: Option<Friend>, after: Friend) {
        info!(
            friend = %after.display_name,
            was = %before.map(|f| f.presence_state.to_string()).unwrap_or_default(),
            "came online"
        );
    }

    async fn on_friend_active(&self, _before: Option<Friend>, after: Friend) {
        info!(friend = %after.display_name, "is active on the web");
    }

    async fn on_friend_offline(&self, _before: Option<Friend>, after: Friend) {
        info!(friend = %after.display_name, "went offline");
    }

    async fn on_friend_add(&self, friend: Friend) {
        info!(friend = %friend.display_name, "new friend");
    }

    async fn on_friend_delete(&self, friend: Option<Friend>) {
        match friend {
            Some(friend) => info!(friend = %friend.display_name, "unfriended"),
            None => info!("unfriended by someone not in the roster"),
        }
    }

    async fn on_friend_update(&self, before: Option<Friend>, after: Friend) {
        let status_changed = before
            .as_ref()
            .is_some_and(|b| b.status_description != after.status_description);
        if status_changed {
            info!(
                friend = %after.display_name,
                status = %after.status_description.as_deref().unwrap_or(""),
                "changed status"
            );
        } else {
            info!(friend = %after.display_name, "updated profile");
        }
    }

    async fn on_friend_location(
        &self,
        friend: Friend,
        world: Option<World>,
        location: Location,
        instance: Option<Instance>,
    ) {
        info!(
            friend = %friend.display_name,
            location = %describe_location(&location, world.as_ref(), instance.as_ref()),
            "moved"
        );
    }

    async fn on_notification(&self, notification: Notification) {
        let from = notification.sender_username.as_deref().unwrap_or("someone");
        match &notification.kind {
            NotificationKind::Invite { world_name, .. } => info!(
                from = %from,
                world = %world_name.as_deref().unwrap_or("unknown world"),
                "invite received"
            ),
            kind => info!(from = %from, kind = %kind.type_tag(), "notification received"),
        }
    }

    async fn on_unhandled_event(&self, event_type: &str, _payload: Value) {
        info!(event_type = %event_type, "unhandled pipeline event");
    }
}

fn describe_location(
    location: &Location,
    world: Option<&World>,
    instance: Option<&Instance>,
) -> String {
    match location {
        Location::Offline => "offline".to_string(),
        Location::Private => "a private world".to_string(),
        Location::Traveling => "traveling".to_string(),
        Location::Instance(target) => {
            let world_name = world
                .map(|w| w.name.as_str())
                .filter(|name| !name.is_empty())
                .unwrap_or(target.world_id.as_str());
            let mut description = format!("{} #{}", world_name, target.name);
            if let Some(users) = instance.and_then(|i| i.n_users) {
                description.push_str(&format!(" ({users} users)"));
            }
            if let Some(region) = &target.region {
                description.push_str(&format!(" [{region}]"));
            }
            description
        }
    }
}

/// Bootstrap the roster, connect, and log until ctrl-c or until the
/// connection is gone for good.
pub async fn run(client: VrcClient, config: SupervisorConfig) -> Result<()> {
    let presence = PresenceClient::new(
        Arc::new(client),
        Arc::new(LoggingHandler),
        config,
        Handle::current(),
    );

    let counts = presence
        .refresh_friends()
        .await
        .map_err(|e| miette!("failed to load friends: {}", e))?;
    info!(
        online = counts.online,
        active = counts.active,
        offline = counts.offline,
        "friends loaded"
    );

    presence
        .connect()
        .await
        .map_err(|e| miette!("failed to connect to pipeline: {}", e))?;

    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            result.map_err(|e| miette!("failed to listen for ctrl-c: {}", e))?;
            info!("interrupted, logging out");
        }
        _ = presence.closed() => {
            info!(state = ?presence.state(), "pipeline closed, logging out");
        }
    }

    presence
        .logout()
        .await
        .map_err(|e| miette!("logout failed: {}", e))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_describe_location() {
        assert_eq!(
            describe_location(&Location::Private, None, None),
            "a private world"
        );

        let location = Location::parse("wrld_1:42~friends(usr_2)~region(eu)").unwrap();
        assert_eq!(describe_location(&location, None, None), "wrld_1 #42 [eu]");

        let world: World =
            serde_json::from_value(serde_json::json!({"id": "wrld_1", "name": "The Great Pug"}))
                .unwrap();
        let instance: Instance = serde_json::from_value(serde_json::json!({
            "id": "wrld_1:42~friends(usr_2)~region(eu)",
            "worldId": "wrld_1",
            "instanceId": "42~friends(usr_2)~region(eu)",
            "n_users": 5
        }))
        .unwrap();
        assert_eq!(
            describe_location(&location, Some(&world), Some(&instance)),
            "The Great Pug #42 (5 users) [eu]"
        );
    }
}
