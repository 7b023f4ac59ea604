mod broker;
mod connection;
mod factory;

pub use broker::MemoryBroker;
pub use connection::MemoryConnection;
pub use factory::MemoryConnectionFactory;
