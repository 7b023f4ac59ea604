//! Transport abstractions for redstream.
//!
//! A [`Connection`] is one live link to a pub/sub + key/value server. It is
//! expensive, so connections are shared: the [`ConnectionCache`] hands out at
//! most one connection per configuration string and every queue manager or
//! storage provider borrows from it.
//!
//! Backends live in their own crates (`redstream-transport-redis`,
//! `redstream-transport-memory`) and are checked against the suite in
//! [`testing`].

pub mod cache;
pub mod config;
pub mod connection;
pub mod error;
pub mod registry;
pub mod testing;

pub use cache::ConnectionCache;
pub use config::{ConnectionConfig, RedisOptions};
pub use connection::{Connection, ConnectionFactory, ConnectionHandle, MessageHandler, SubscriptionId};
pub use error::TransportError;
pub use registry::SubscriptionRegistry;
