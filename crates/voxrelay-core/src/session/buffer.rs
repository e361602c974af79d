//! Pending-output buffer for suspended sessions.
//!
//! While a session has no transport connection, outbound messages land here
//! instead. The buffer is capacity-bounded with a configurable overflow
//! policy and preserves FIFO order; on reconnect it is drained atomically
//! and flushed in order.

use std::collections::VecDeque;

use voxrelay_types::config::OverflowPolicy;
use voxrelay_types::event::RelayMessage;

/// What happened to a pushed message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PushOutcome {
    Stored,
    /// Stored, at the cost of the oldest buffered message.
    DroppedOldest,
    /// Not stored; the buffer kept its existing contents.
    Rejected,
}

/// Bounded FIFO of outbound messages awaiting a reconnect.
#[derive(Debug)]
pub struct PendingOutputBuffer {
    queue: VecDeque<RelayMessage>,
    capacity: usize,
    policy: OverflowPolicy,
    dropped: u64,
}

impl PendingOutputBuffer {
    pub fn new(capacity: usize, policy: OverflowPolicy) -> Self {
        Self {
            queue: VecDeque::with_capacity(capacity.min(64)),
            capacity: capacity.max(1),
            policy,
            dropped: 0,
        }
    }

    pub fn push(&mut self, message: RelayMessage) -> PushOutcome {
        if self.queue.len() < self.capacity {
            self.queue.push_back(message);
            return PushOutcome::Stored;
        }
        match self.policy {
            OverflowPolicy::DropOldest => {
                self.queue.pop_front();
                self.queue.push_back(message);
                self.dropped += 1;
                PushOutcome::DroppedOldest
            }
            OverflowPolicy::RejectNew => {
                self.dropped += 1;
                PushOutcome::Rejected
            }
        }
    }

    /// Take everything, in insertion order.
    pub fn drain(&mut self) -> Vec<RelayMessage> {
        self.queue.drain(..).collect()
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// Messages lost to the overflow policy since creation.
    pub fn dropped(&self) -> u64 {
        self.dropped
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn msg(n: usize) -> RelayMessage {
        RelayMessage::chunk(format!("chunk {n}"), false)
    }

    #[test]
    fn preserves_fifo_order() {
        let mut buf = PendingOutputBuffer::new(8, OverflowPolicy::DropOldest);
        for n in 0..3 {
            assert_eq!(buf.push(msg(n)), PushOutcome::Stored);
        }
        let drained = buf.drain();
        assert_eq!(drained, vec![msg(0), msg(1), msg(2)]);
        assert!(buf.is_empty());
    }

    #[test]
    fn drop_oldest_keeps_newest() {
        let mut buf = PendingOutputBuffer::new(2, OverflowPolicy::DropOldest);
        buf.push(msg(0));
        buf.push(msg(1));
        assert_eq!(buf.push(msg(2)), PushOutcome::DroppedOldest);
        assert_eq!(buf.drain(), vec![msg(1), msg(2)]);
        assert_eq!(buf.dropped(), 1);
    }

    #[test]
    fn reject_new_keeps_oldest() {
        let mut buf = PendingOutputBuffer::new(2, OverflowPolicy::RejectNew);
        buf.push(msg(0));
        buf.push(msg(1));
        assert_eq!(buf.push(msg(2)), PushOutcome::Rejected);
        assert_eq!(buf.drain(), vec![msg(0), msg(1)]);
        assert_eq!(buf.dropped(), 1);
    }

    #[test]
    fn zero_capacity_is_clamped_to_one() {
        let mut buf = PendingOutputBuffer::new(0, OverflowPolicy::DropOldest);
        assert_eq!(buf.push(msg(0)), PushOutcome::Stored);
        assert_eq!(buf.push(msg(1)), PushOutcome::DroppedOldest);
        assert_eq!(buf.len(), 1);
    }
}
