//! # filecast-server
//!
//! Real-time fan-out of file contents to WebSocket clients.
//!
//! - Hub: single event loop owning the session registry; slow sessions are evicted
//! - Sessions: batched write pump, keepalive pings, pong-driven liveness
//! - HTTP endpoints: `/ws` upgrade, `/health`, `/metrics`
//! - Directory watcher: every newly created file is broadcast once
//! - Ordered shutdown via `CancellationToken`

#![deny(unsafe_code)]

pub mod config;
pub mod hub;
pub mod liveness;
pub mod metrics;
pub mod queue;
pub mod server;
pub mod service;
pub mod session;
pub mod shutdown;
pub mod supervisor;
pub mod watcher;

pub use config::BroadcastConfig;
pub use hub::{Hub, HubError, HubHandle, HubState, SessionId};
pub use service::{BroadcastService, ServiceError, ServiceHandle};
