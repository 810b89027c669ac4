//! Core types for VRChat API objects.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

use crate::{ApiError, Location};

/// Whether and how a friend is currently reachable.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PresenceState {
    /// In game.
    Online,
    /// On the website or companion app, not in game.
    Active,
    #[default]
    Offline,
}

impl PresenceState {
    /// All states, in bucket order.
    pub const ALL: [PresenceState; 3] = [
        PresenceState::Online,
        PresenceState::Active,
        PresenceState::Offline,
    ];

    /// The presence state a user payload states explicitly, if any.
    ///
    /// Reads `presenceState`, falling back to the API's `state` key.
    pub fn from_user_json(value: &Value) -> Option<Self> {
        value
            .get("presenceState")
            .or_else(|| value.get("state"))
            .and_then(Value::as_str)
            .and_then(|s| s.parse().ok())
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PresenceState::Online => "online",
            PresenceState::Active => "active",
            PresenceState::Offline => "offline",
        }
    }
}

impl fmt::Display for PresenceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

impl FromStr for PresenceState {
    type Err = ApiError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "online" => Ok(PresenceState::Online),
            "active" => Ok(PresenceState::Active),
            "offline" => Ok(PresenceState::Offline),
            other => Err(ApiError::InvalidResponse(format!(
                "unknown presence state: {other}"
            ))),
        }
    }
}

/// A user as seen from the logged-in account (a friend, or any looked-up user).
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Friend {
    pub id: String,
    pub display_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    pub presence_state: PresenceState,
    /// User-chosen status ("active", "join me", "ask me", "busy").
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status_description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<Location>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_platform: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
}

impl Friend {
    /// Build a friend from a user JSON object.
    ///
    /// Only `id` is required. A missing display name falls back to the id and
    /// a missing presence state to [`PresenceState::Offline`]. Location strings
    /// that do not parse are dropped.
    pub fn from_json(value: &Value) -> Result<Self, ApiError> {
        let obj = as_object(value, "user")?;

        let id = str_field(obj, "id")
            .filter(|id| !id.is_empty())
            .ok_or_else(|| ApiError::InvalidResponse("user payload has no id".to_string()))?;

        Ok(Self {
            display_name: str_field(obj, "displayName").unwrap_or_else(|| id.clone()),
            id,
            username: str_field(obj, "username"),
            presence_state: PresenceState::from_user_json(value).unwrap_or_default(),
            status: str_field(obj, "status"),
            status_description: str_field(obj, "statusDescription"),
            location: obj
                .get("location")
                .and_then(Value::as_str)
                .and_then(|s| Location::parse(s).ok()),
            last_platform: str_field(obj, "last_platform")
                .or_else(|| str_field(obj, "lastPlatform")),
            tags: obj
                .get("tags")
                .and_then(Value::as_array)
                .map(|tags| {
                    tags.iter()
                        .filter_map(Value::as_str)
                        .map(str::to_string)
                        .collect()
                })
                .unwrap_or_default(),
        })
    }

    /// Return a copy in the given presence state.
    pub fn with_presence(mut self, state: PresenceState) -> Self {
        self.presence_state = state;
        self
    }
}

impl<'de> Deserialize<'de> for Friend {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = Value::deserialize(deserializer)?;
        Friend::from_json(&value).map_err(serde::de::Error::custom)
    }
}

/// The logged-in user: a regular profile plus account-only data.
#[derive(Debug, Clone, PartialEq)]
pub struct CurrentUser {
    pub profile: Friend,
    pub email: Option<String>,
    /// Ids of every friend.
    pub friends: Vec<String>,
    pub online_friends: Vec<String>,
    pub active_friends: Vec<String>,
    pub offline_friends: Vec<String>,
}

impl CurrentUser {
    pub fn from_json(value: &Value) -> Result<Self, ApiError> {
        let obj = as_object(value, "current user")?;
        let ids = |key: &str| -> Vec<String> {
            obj.get(key)
                .and_then(Value::as_array)
                .map(|ids| {
                    ids.iter()
                        .filter_map(Value::as_str)
                        .map(str::to_string)
                        .collect()
                })
                .unwrap_or_default()
        };

        Ok(Self {
            profile: Friend::from_json(value)?,
            email: str_field(obj, "email"),
            friends: ids("friends"),
            online_friends: ids("onlineFriends"),
            active_friends: ids("activeFriends"),
            offline_friends: ids("offlineFriends"),
        })
    }
}

/// A world.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct World {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub author_id: Option<String>,
    #[serde(default)]
    pub author_name: Option<String>,
    #[serde(default)]
    pub capacity: Option<u32>,
    #[serde(default)]
    pub occupants: Option<u32>,
    #[serde(default)]
    pub release_status: Option<String>,
}

/// A running instance of a world.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Instance {
    /// `{world_id}:{instance_id}`.
    pub id: String,
    pub world_id: String,
    pub instance_id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default, rename = "n_users")]
    pub n_users: Option<u32>,
    #[serde(default)]
    pub capacity: Option<u32>,
    #[serde(default)]
    pub region: Option<String>,
    #[serde(default)]
    pub full: bool,
}

/// A notification, with its details decoded according to its type tag.
#[derive(Debug, Clone, PartialEq)]
pub struct Notification {
    pub id: String,
    pub sender_user_id: Option<String>,
    pub sender_username: Option<String>,
    pub created_at: Option<DateTime<Utc>>,
    pub seen: bool,
    pub message: Option<String>,
    pub kind: NotificationKind,
}

/// Type-specific notification content.
#[derive(Debug, Clone, PartialEq)]
pub enum NotificationKind {
    FriendRequest,
    Invite {
        world_id: Option<String>,
        world_name: Option<String>,
    },
    InviteResponse {
        in_response_to: Option<String>,
        response_message: Option<String>,
    },
    RequestInvite {
        platform: Option<String>,
    },
    RequestInviteResponse {
        in_response_to: Option<String>,
        response_message: Option<String>,
    },
    VoteToKick {
        details: Value,
    },
    /// A type tag this client does not know about.
    Other {
        type_tag: String,
        details: Value,
    },
}

impl NotificationKind {
    /// The wire type tag.
    pub fn type_tag(&self) -> &str {
        match self {
            NotificationKind::FriendRequest => "friendRequest",
            NotificationKind::Invite { .. } => "invite",
            NotificationKind::InviteResponse { .. } => "inviteResponse",
            NotificationKind::RequestInvite { .. } => "requestInvite",
            NotificationKind::RequestInviteResponse { .. } => "requestInviteResponse",
            NotificationKind::VoteToKick { .. } => "votetokick",
            NotificationKind::Other { type_tag, .. } => type_tag,
        }
    }
}

impl Notification {
    /// Build a notification from its JSON object.
    ///
    /// `details` may be a nested object or a JSON-encoded string; both decode
    /// the same way.
    pub fn from_json(value: &Value) -> Result<Self, ApiError> {
        let obj = as_object(value, "notification")?;

        let id = str_field(obj, "id")
            .ok_or_else(|| ApiError::InvalidResponse("notification has no id".to_string()))?;
        let type_tag = str_field(obj, "type")
            .ok_or_else(|| ApiError::InvalidResponse("notification has no type".to_string()))?;

        let details = match obj.get("details") {
            Some(Value::String(s)) if !s.is_empty() => serde_json::from_str(s)?,
            Some(Value::Object(map)) => Value::Object(map.clone()),
            _ => Value::Object(Map::new()),
        };
        let detail = |key: &str| details.get(key).and_then(Value::as_str).map(str::to_string);

        let kind = match type_tag.as_str() {
            "friendRequest" => NotificationKind::FriendRequest,
            "invite" => NotificationKind::Invite {
                world_id: detail("worldId"),
                world_name: detail("worldName"),
            },
            "inviteResponse" => NotificationKind::InviteResponse {
                in_response_to: detail("inResponseTo"),
                response_message: detail("responseMessage"),
            },
            "requestInvite" => NotificationKind::RequestInvite {
                platform: detail("platform"),
            },
            "requestInviteResponse" => NotificationKind::RequestInviteResponse {
                in_response_to: detail("inResponseTo"),
                response_message: detail("responseMessage"),
            },
            "votetokick" => NotificationKind::VoteToKick { details },
            _ => NotificationKind::Other { type_tag, details },
        };

        Ok(Self {
            id,
            sender_user_id: str_field(obj, "senderUserId"),
            sender_username: str_field(obj, "senderUsername"),
            created_at: obj
                .get("created_at")
                .or_else(|| obj.get("createdAt"))
                .and_then(Value::as_str)
                .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
                .map(|dt| dt.with_timezone(&Utc)),
            seen: obj.get("seen").and_then(Value::as_bool).unwrap_or(false),
            message: str_field(obj, "message"),
            kind,
        })
    }
}

/// Remote client configuration served at `/config`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteConfig {
    #[serde(alias = "clientApiKey")]
    pub api_key: String,
}

/// Raw result of an authenticated REST call.
#[derive(Debug, Clone, PartialEq)]
pub struct ApiResponse {
    pub status: u16,
    pub data: Value,
}

fn as_object<'a>(value: &'a Value, what: &str) -> Result<&'a Map<String, Value>, ApiError> {
    value
        .as_object()
        .ok_or_else(|| ApiError::InvalidResponse(format!("{what} payload is not an object")))
}

fn str_field(obj: &Map<String, Value>, key: &str) -> Option<String> {
    obj.get(key).and_then(Value::as_str).map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn test_friend_from_minimal_json() {
        let friend = Friend::from_json(&json!({
            "id": "usr_1",
            "displayName": "Alice",
            "presenceState": "online"
        }))
        .unwrap();

        assert_eq!(friend.id, "usr_1");
        assert_eq!(friend.display_name, "Alice");
        assert_eq!(friend.presence_state, PresenceState::Online);
        assert!(friend.location.is_none());
    }

    #[test]
    fn test_friend_state_key_fallback() {
        let friend = Friend::from_json(&json!({
            "id": "usr_1",
            "displayName": "Alice",
            "state": "active",
            "status": "join me",
            "location": "wrld_1:1~region(eu)",
            "last_platform": "standalonewindows",
            "tags": ["system_trust_basic"]
        }))
        .unwrap();

        assert_eq!(friend.presence_state, PresenceState::Active);
        assert_eq!(friend.status.as_deref(), Some("join me"));
        assert_eq!(friend.last_platform.as_deref(), Some("standalonewindows"));
        assert_eq!(friend.tags, vec!["system_trust_basic".to_string()]);
        assert_eq!(
            friend.location.unwrap().instance().unwrap().region.as_deref(),
            Some("eu")
        );
    }

    #[test]
    fn test_friend_defaults() {
        let friend = Friend::from_json(&json!({"id": "usr_9"})).unwrap();
        assert_eq!(friend.display_name, "usr_9");
        assert_eq!(friend.presence_state, PresenceState::Offline);
        assert_eq!(PresenceState::from_user_json(&json!({"id": "usr_9"})), None);
    }

    #[test]
    fn test_friend_requires_id() {
        assert!(Friend::from_json(&json!({"displayName": "nobody"})).is_err());
        assert!(Friend::from_json(&json!("usr_1")).is_err());
    }

    #[test]
    fn test_friend_serialize_roundtrip() {
        let friend = Friend::from_json(&json!({
            "id": "usr_1",
            "displayName": "Alice",
            "presenceState": "active",
            "location": "private"
        }))
        .unwrap();

        let decoded: Friend =
            serde_json::from_value(serde_json::to_value(&friend).unwrap()).unwrap();
        assert_eq!(decoded, friend);
    }

    #[test]
    fn test_current_user_from_json() {
        let user = CurrentUser::from_json(&json!({
            "id": "usr_me",
            "displayName": "Me",
            "email": "me@example.com",
            "friends": ["usr_1", "usr_2"],
            "onlineFriends": ["usr_1"],
            "offlineFriends": ["usr_2"]
        }))
        .unwrap();

        assert_eq!(user.profile.id, "usr_me");
        assert_eq!(user.friends.len(), 2);
        assert_eq!(user.online_friends, vec!["usr_1".to_string()]);
        assert!(user.active_friends.is_empty());
    }

    #[test]
    fn test_notification_invite_with_string_details() {
        let notification = Notification::from_json(&json!({
            "id": "not_1",
            "senderUserId": "usr_2",
            "senderUsername": "bob",
            "type": "invite",
            "message": "This is a generated invite",
            "seen": false,
            "created_at": "2024-01-01T12:00:00.000Z",
            "details": "{\"worldId\":\"wrld_1:123\",\"worldName\":\"Home\"}"
        }))
        .unwrap();

        assert_eq!(
            notification.kind,
            NotificationKind::Invite {
                world_id: Some("wrld_1:123".to_string()),
                world_name: Some("Home".to_string()),
            }
        );
        assert_eq!(notification.kind.type_tag(), "invite");
        assert!(notification.created_at.is_some());
    }

    #[test]
    fn test_notification_request_invite_object_details() {
        let notification = Notification::from_json(&json!({
            "id": "not_2",
            "type": "requestInvite",
            "details": {"platform": "android"}
        }))
        .unwrap();

        assert_eq!(
            notification.kind,
            NotificationKind::RequestInvite {
                platform: Some("android".to_string())
            }
        );
    }

    #[test]
    fn test_notification_unknown_type() {
        let notification = Notification::from_json(&json!({
            "id": "not_3",
            "type": "group.announcement",
            "details": "{}"
        }))
        .unwrap();

        match notification.kind {
            NotificationKind::Other { type_tag, details } => {
                assert_eq!(type_tag, "group.announcement");
                assert_eq!(details, json!({}));
            }
            other => panic!("expected Other, got {other:?}"),
        }
    }

    #[test]
    fn test_notification_requires_type() {
        assert!(Notification::from_json(&json!({"id": "not_4"})).is_err());
    }

    #[test]
    fn test_remote_config_key_alias() {
        let config: RemoteConfig =
            serde_json::from_value(json!({"clientApiKey": "abc"})).unwrap();
        assert_eq!(config.api_key, "abc");
    }
}
