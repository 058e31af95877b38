use std::cmp::Ordering;

use crate::events::Envelope;

/// Total order over transport events: reference timestamp first, and at equal
/// timestamps the lexicographically smaller sender id wins the tie. Every
/// last-writer-wins decision in the coordinator goes through this one
/// comparison, so peers that saw the same events agree on the winner no
/// matter the delivery order.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EventStamp {
    pub timestamp: u64,
    pub sender_id: String,
}

impl EventStamp {
    pub fn new(timestamp: u64, sender_id: impl Into<String>) -> Self {
        Self {
            timestamp,
            sender_id: sender_id.into(),
        }
    }

    /// Whether an event carrying `self` replaces state stamped with `other`.
    pub fn supersedes(&self, other: &EventStamp) -> bool {
        self > other
    }
}

impl From<&Envelope> for EventStamp {
    fn from(envelope: &Envelope) -> Self {
        EventStamp::new(envelope.timestamp, envelope.client_id.clone())
    }
}

impl Ord for EventStamp {
    fn cmp(&self, other: &Self) -> Ordering {
        // Greater = winner. The sender comparison is reversed so that at
        // equal timestamps the smaller id ends up on top.
        self.timestamp
            .cmp(&other.timestamp)
            .then_with(|| other.sender_id.cmp(&self.sender_id))
    }
}

impl PartialOrd for EventStamp {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn later_timestamp_supersedes() {
        let old = EventStamp::new(1000, "zed");
        let new = EventStamp::new(1001, "alice");
        assert!(new.supersedes(&old));
        assert!(!old.supersedes(&new));
    }

    #[test]
    fn equal_timestamps_resolve_to_smaller_sender() {
        let a = EventStamp::new(5000, "a");
        let b = EventStamp::new(5000, "b");
        assert!(a.supersedes(&b));
        assert!(!b.supersedes(&a));
    }

    #[test]
    fn identical_stamps_never_supersede() {
        let a = EventStamp::new(5000, "a");
        assert!(!a.supersedes(&a.clone()));
    }

    #[test]
    fn winner_is_arrival_order_independent() {
        // Apply two conflicting writes in both orders; the surviving stamp
        // must be the same either way.
        let x = EventStamp::new(5000, "a");
        let y = EventStamp::new(5000, "b");

        let mut state = x.clone();
        if y.supersedes(&state) {
            state = y.clone();
        }
        let forward = state;

        let mut state = y;
        if x.supersedes(&state) {
            state = x;
        }
        let backward = state;

        assert_eq!(forward, backward);
        assert_eq!(forward.sender_id, "a");
    }
}
