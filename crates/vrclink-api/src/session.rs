//! Collaborator interfaces used by the real-time pipeline.
//!
//! [`VrcClient`](crate::VrcClient) implements both traits over HTTP; tests
//! and embedders can supply their own.

use async_trait::async_trait;
use reqwest::Method;

use crate::{ApiError, ApiResponse, Friend, Instance, World};

/// Supplies the session token and performs authenticated REST calls.
#[async_trait]
pub trait SessionProvider: Send + Sync {
    /// The current session token. Fails with [`ApiError::NotAuthenticated`]
    /// when there is no completed login.
    async fn session_token(&self) -> Result<String, ApiError>;

    /// Perform an authenticated call, returning the status and JSON body
    /// without interpreting the status.
    async fn call(
        &self,
        method: Method,
        path: &str,
        params: &[(&str, &str)],
    ) -> Result<ApiResponse, ApiError>;

    /// End the session.
    async fn logout(&self) -> Result<(), ApiError>;
}

/// Materializes typed objects from ids.
#[async_trait]
pub trait ResourceResolver: Send + Sync {
    async fn fetch_user(&self, id: &str) -> Result<Friend, ApiError>;

    async fn fetch_world(&self, id: &str) -> Result<World, ApiError>;

    async fn fetch_instance(&self, world_id: &str, instance_id: &str)
    -> Result<Instance, ApiError>;

    /// Every friend in one group: online and active friends, or offline ones.
    async fn fetch_friends(&self, offline: bool) -> Result<Vec<Friend>, ApiError>;
}
