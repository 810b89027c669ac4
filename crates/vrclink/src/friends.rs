//! One-shot friend listing.

use miette::{Result, miette};
use vrclink_api::{Friend, Location, PresenceState, ResourceResolver, VrcClient};

pub async fn run(client: &VrcClient, include_offline: bool) -> Result<()> {
    let mut friends = client
        .fetch_friends(false)
        .await
        .map_err(|e| miette!("failed to fetch friends: {}", e))?;

    if include_offline {
        friends.extend(
            client
                .fetch_friends(true)
                .await
                .map_err(|e| miette!("failed to fetch offline friends: {}", e))?,
        );
    }

    sort_for_display(&mut friends);
    for friend in &friends {
        println!("{}", format_row(friend));
    }
    println!("{} friends", friends.len());

    Ok(())
}

fn state_rank(state: PresenceState) -> u8 {
    match state {
        PresenceState::Online => 0,
        PresenceState::Active => 1,
        PresenceState::Offline => 2,
    }
}

/// Online first, then active, then offline; alphabetical within each.
fn sort_for_display(friends: &mut [Friend]) {
    friends.sort_by(|a, b| {
        state_rank(a.presence_state)
            .cmp(&state_rank(b.presence_state))
            .then_with(|| a.display_name.to_lowercase().cmp(&b.display_name.to_lowercase()))
    });
}

fn format_row(friend: &Friend) -> String {
    let location = match &friend.location {
        Some(Location::Instance(instance)) => instance.world_id.clone(),
        Some(other) => other.to_string(),
        None => "-".to_string(),
    };
    let status = friend.status_description.as_deref().unwrap_or("");

    format!(
        "{:<8} {:<24} {:<40} {}",
        friend.presence_state, friend.display_name, location, status
    )
    .trim_end()
    .to_string()
}
