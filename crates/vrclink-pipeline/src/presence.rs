//! Top-level presence session.

use std::sync::Arc;
use std::time::Duration;

use tokio::runtime::Handle;
use tracing::{info, warn};
use vrclink_api::{Friend, PresenceState, ResourceResolver, SessionProvider};

use crate::{
    BucketCounts, ConnectionState, ConnectionSupervisor, EventHandler, EventRouter, PipelineError,
    PresenceCache, SupervisorConfig,
};

/// How long logout waits for the read loop to finish before draining.
const LOGOUT_GRACE: Duration = Duration::from_secs(5);

/// A logged-in client's live friend roster and pipeline connection.
pub struct PresenceClient<C> {
    client: Arc<C>,
    cache: Arc<PresenceCache>,
    supervisor: ConnectionSupervisor,
}

impl<C> PresenceClient<C>
where
    C: SessionProvider + ResourceResolver + 'static,
{
    /// Create a client. Nothing connects until [`Self::connect`].
    pub fn new(
        client: Arc<C>,
        handler: Arc<dyn EventHandler>,
        config: SupervisorConfig,
        handle: Handle,
    ) -> Self {
        let cache = PresenceCache::new();
        let router = EventRouter::new(Arc::clone(&cache), client.clone(), handler);
        let supervisor = ConnectionSupervisor::new(client.clone(), router, config, handle);

        Self {
            client,
            cache,
            supervisor,
        }
    }

    pub fn client(&self) -> &Arc<C> {
        &self.client
    }

    pub fn cache(&self) -> &Arc<PresenceCache> {
        &self.cache
    }

    /// Load the full friend list, replacing the roster.
    pub async fn refresh_friends(&self) -> Result<BucketCounts, PipelineError> {
        let mut friends = self.client.fetch_friends(false).await?;
        friends.extend(self.client.fetch_friends(true).await?);

        self.cache.replace_all(friends);
        let counts = self.cache.counts();

        info!(
            online = counts.online,
            active = counts.active,
            offline = counts.offline,
            "friend roster refreshed"
        );
        Ok(counts)
    }

    pub async fn connect(&self) -> Result<(), PipelineError> {
        self.supervisor.connect().await
    }

    pub fn disconnect(&self) {
        self.supervisor.disconnect();
    }

    pub fn state(&self) -> ConnectionState {
        self.supervisor.state()
    }

    pub async fn wait_for_state(&self, state: ConnectionState) {
        self.supervisor.wait_for_state(state).await;
    }

    /// Wait until the connection is down for good. See
    /// [`ConnectionSupervisor::closed`].
    pub async fn closed(&self) {
        self.supervisor.closed().await;
    }

    /// Disconnect, forget the roster and end the session.
    pub async fn logout(&self) -> Result<(), PipelineError> {
        self.supervisor.disconnect();

        let closed = tokio::time::timeout(LOGOUT_GRACE, self.supervisor.closed()).await;
        if closed.is_err() {
            warn!("pipeline still closing at logout");
        }

        self.cache.drain();
        self.client.logout().await?;
        Ok(())
    }

    pub fn friend(&self, id: &str) -> Option<Friend> {
        self.cache.lookup(id)
    }

    pub fn friends_in(&self, state: PresenceState) -> Vec<Friend> {
        self.cache.list_bucket(state)
    }

    pub fn counts(&self) -> BucketCounts {
        self.cache.counts()
    }
}
