//! REST client and data model for the VRChat API.
//!
//! This crate provides the typed objects the real-time pipeline works with
//! (friends, worlds, instances, notifications, locations) and an HTTP client
//! that logs in and resolves them by id.
//!
//! ## Features
//!
//! - **Client**: login with username/password and optional TOTP, session cookies
//! - **Resolvers**: fetch users, worlds, instances and the friend list
//! - **Locations**: parse `wrld_...:instance~tag(...)` location strings

mod client;
mod error;
mod location;
mod session;
mod types;

pub use client::{ClientConfig, DEFAULT_API_BASE, VrcClient};
pub use error::ApiError;
pub use location::{InstanceAccess, InstanceLocation, Location, LocationError};
pub use reqwest::Method;
pub use session::{ResourceResolver, SessionProvider};
pub use types::*;
