pub mod context;
pub mod hash;
pub mod queue;
pub mod stream;
pub mod token;
pub mod types;

pub use context::RequestContext;
pub use hash::uniform_hash;
pub use queue::QueueId;
pub use stream::StreamId;
pub use token::SequenceToken;
pub use types::{ClusterId, ProviderName, ServiceId, StreamNamespace};
