use std::fmt;

use serde::{Deserialize, Serialize};

/// A receiver-local position assigned to a dequeued batch and its events.
///
/// Sequence numbers are only meaningful to the receiver that assigned them:
/// they restart at zero when a receiver is recreated and say nothing about
/// global ordering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SequenceToken {
    pub sequence_number: i64,
    pub event_index: i32,
}

impl SequenceToken {
    /// Token for a whole batch.
    #[must_use]
    pub const fn new(sequence_number: i64) -> Self {
        Self {
            sequence_number,
            event_index: 0,
        }
    }

    /// Token for the event at `index` within this token's batch.
    #[must_use]
    pub const fn for_event(&self, index: i32) -> Self {
        Self {
            sequence_number: self.sequence_number,
            event_index: index,
        }
    }
}

impl fmt::Display for SequenceToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}:{}]", self.sequence_number, self.event_index)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_tokens_share_sequence_number() {
        let t = SequenceToken::new(7);
        let e = t.for_event(3);
        assert_eq!(e.sequence_number, 7);
        assert_eq!(e.event_index, 3);
        assert!(t < e);
    }

    #[test]
    fn display() {
        assert_eq!(SequenceToken::new(5).for_event(2).to_string(), "[5:2]");
    }
}
