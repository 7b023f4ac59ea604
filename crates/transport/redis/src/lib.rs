//! Redis backend for the redstream transport.
//!
//! Commands (`PUBLISH`, `GET`, `SET`, `DEL` and a compare-and-set script) go
//! through a `deadpool-redis` pool. Each subscribed channel holds a dedicated
//! pub/sub connection whose message stream is drained by a background task
//! into the connection's
//! [`SubscriptionRegistry`](redstream_transport::SubscriptionRegistry); the
//! task reopens the subscription if the server drops it.

mod connection;
mod factory;
mod listeners;
mod scripts;

pub use connection::RedisConnection;
pub use factory::RedisConnectionFactory;
