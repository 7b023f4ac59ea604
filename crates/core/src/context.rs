use std::collections::BTreeMap;

/// Ambient request context carried alongside a batch of events.
///
/// A `BTreeMap` keeps the encoded form independent of insertion order.
pub type RequestContext = BTreeMap<String, serde_json::Value>;
