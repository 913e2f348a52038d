//! falimy-core - Offline-first sync layer for Falimy
//!
//! This crate holds the local replica of a family's lists, members,
//! locations and geofences, and keeps it reconciled with the PocketBase
//! backend through full syncs and a realtime push channel. Hosts (the CLI
//! today) build a [`SessionContext`] per login and read the replica through
//! live queries on the [`LocalStore`].

pub mod auth;
pub mod config;
pub mod db;
pub mod error;
pub mod models;
pub mod remote;
pub mod session;
pub mod store;
pub mod sync;
pub mod util;

pub use auth::{AuthError, AuthIdentity, AuthSession, PocketBaseAuthClient, SessionPersistence};
pub use config::ClientConfig;
pub use error::{Error, Result};
pub use models::{Collection, LocalId, Model, Record, ServerId};
pub use remote::{MemoryRemote, PocketBaseClient, RemoteClient};
pub use session::{AppLifecycle, SessionContext, SessionOptions};
pub use store::{LiveQuery, LocalStore, Query};
pub use sync::{RealtimeState, SyncStatus};
