//! Location string parsing.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Error when parsing a location string.
#[derive(Debug, Error)]
#[error("invalid location: {0}")]
pub struct LocationError(String);

/// Where a user currently is.
///
/// Locations have the format `{world_id}:{instance_id}` where the instance id
/// is a name followed by `~`-separated tags, e.g.
/// `wrld_abc:12345~hidden(usr_xyz)~region(eu)~nonce(f00)`. A handful of
/// sentinel strings stand in for users that cannot be located.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Location {
    /// The user is offline (also used for an empty location).
    Offline,
    /// The user is in a private world.
    Private,
    /// The user is loading into a new instance.
    Traveling,
    /// The user is in a visible instance.
    Instance(InstanceLocation),
}

/// Access level of an instance, from its owner tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InstanceAccess {
    Public,
    /// Friends of friends ("friends+").
    Hidden,
    Friends,
    /// Invite only; `can_request_invite` upgrades it to "invite+".
    Private,
    Group,
}

/// A parsed `{world_id}:{instance_id}` location.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct InstanceLocation {
    pub world_id: String,
    /// Everything after the `:`, tags included.
    pub instance_id: String,
    /// The instance name (the part before the first `~`).
    pub name: String,
    pub access: InstanceAccess,
    /// User or group id from the access tag.
    pub owner_id: Option<String>,
    pub region: Option<String>,
    pub nonce: Option<String>,
    pub can_request_invite: bool,
}

impl Location {
    /// Parse a location string.
    ///
    /// # Example
    ///
    /// ```
    /// use vrclink_api::Location;
    ///
    /// let loc = Location::parse("wrld_1:42~friends(usr_2)~region(eu)").unwrap();
    /// let instance = loc.instance().unwrap();
    /// assert_eq!(instance.world_id, "wrld_1");
    /// assert_eq!(instance.name, "42");
    /// assert_eq!(instance.owner_id.as_deref(), Some("usr_2"));
    /// assert!(Location::parse("private").unwrap().is_private());
    /// ```
    pub fn parse(s: &str) -> Result<Self, LocationError> {
        match s {
            "" | "offline" => return Ok(Location::Offline),
            "private" => return Ok(Location::Private),
            "traveling" => return Ok(Location::Traveling),
            _ => {}
        }

        let (world_id, instance_id) = s
            .split_once(':')
            .ok_or_else(|| LocationError(format!("expected world:instance: {s}")))?;

        if world_id.is_empty() || instance_id.is_empty() {
            return Err(LocationError(format!("empty component in location: {s}")));
        }

        let mut parts = instance_id.split('~');
        let name = parts.next().unwrap_or_default().to_string();

        let mut parsed = InstanceLocation {
            world_id: world_id.to_string(),
            instance_id: instance_id.to_string(),
            name,
            access: InstanceAccess::Public,
            owner_id: None,
            region: None,
            nonce: None,
            can_request_invite: false,
        };

        for tag in parts {
            let (key, value) = match tag.split_once('(') {
                Some((key, rest)) => (key, rest.strip_suffix(')').map(str::to_string)),
                None => (tag, None),
            };

            match key {
                "hidden" => {
                    parsed.access = InstanceAccess::Hidden;
                    parsed.owner_id = value;
                }
                "friends" => {
                    parsed.access = InstanceAccess::Friends;
                    parsed.owner_id = value;
                }
                "private" => {
                    parsed.access = InstanceAccess::Private;
                    parsed.owner_id = value;
                }
                "group" => {
                    parsed.access = InstanceAccess::Group;
                    parsed.owner_id = value;
                }
                "region" => parsed.region = value,
                "nonce" => parsed.nonce = value,
                "canRequestInvite" => parsed.can_request_invite = true,
                // Unknown tags are carried in instance_id untouched.
                _ => {}
            }
        }

        Ok(Location::Instance(parsed))
    }

    /// Whether the user is in a private world.
    pub fn is_private(&self) -> bool {
        matches!(self, Location::Private)
    }

    /// The instance reference, if the location names one.
    pub fn instance(&self) -> Option<&InstanceLocation> {
        match self {
            Location::Instance(instance) => Some(instance),
            _ => None,
        }
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Location::Offline => write!(f, "offline"),
            Location::Private => write!(f, "private"),
            Location::Traveling => write!(f, "traveling"),
            Location::Instance(i) => write!(f, "{}:{}", i.world_id, i.instance_id),
        }
    }
}

impl FromStr for Location {
    type Err = LocationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Location::parse(s)
    }
}

impl TryFrom<String> for Location {
    type Error = LocationError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Location::parse(&s)
    }
}

impl From<Location> for String {
    fn from(location: Location) -> Self {
        location.to_string()
    }
}
