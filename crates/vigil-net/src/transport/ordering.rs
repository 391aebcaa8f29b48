//! Per-peer inbound ordering.
//!
//! Sequence numbers live on a ring of 1..=255 (0 is reserved for
//! "unassigned"), so all comparisons are ring-distance based. Packets are
//! released to the application strictly in ascending sequence order; a gap
//! is waited on until it fills or the reorder horizon expires (the sender
//! shares one outbound counter across every peer, so a hole in one peer's
//! view can be a packet that legitimately went elsewhere).

use crate::protocol::Packet;
use std::collections::BTreeMap;
use std::time::Instant;

/// Advances a sequence number on the 1..=255 ring.
pub(crate) fn next_seq(seq: u8) -> u8 {
    if seq == u8::MAX { 1 } else { seq + 1 }
}

/// Forward distance from `from` to `to` on the 255-value ring.
fn ring_distance(from: u8, to: u8) -> u16 {
    let from = from as u16;
    let to = to as u16;
    if to >= from { to - from } else { to + 255 - from }
}

/// Entry occupying one sequence slot.
pub(crate) enum Slot {
    /// A payload packet awaiting in-order release.
    Deliver(Packet),
    /// A sequence the transport consumed itself (flow control, packets that
    /// failed checksum validation). It advances the cursor without reaching
    /// the application.
    Consumed,
}

pub(crate) struct PeerQueue {
    /// Next sequence number to release.
    expected: u8,
    buffered: BTreeMap<u8, Slot>,
    /// Set while the head of the queue is blocked on a missing sequence.
    stalled_since: Option<Instant>,
}

impl PeerQueue {
    pub(crate) fn new() -> Self {
        PeerQueue {
            expected: 1,
            buffered: BTreeMap::new(),
            stalled_since: None,
        }
    }

    /// Number of packets waiting in the reorder buffer.
    pub(crate) fn depth(&self) -> usize {
        self.buffered.len()
    }

    /// Buffers `seq`. Returns false for a duplicate (already released, the
    /// cursor moved past it, or the slot is occupied), in which case the
    /// caller re-acknowledges to quench the peer's retransmissions.
    pub(crate) fn insert(&mut self, seq: u8, slot: Slot) -> bool {
        if seq == 0 {
            return false;
        }
        // Anything more than half the ring ahead is interpreted as behind.
        if ring_distance(self.expected, seq) > 127 || self.buffered.contains_key(&seq) {
            return false;
        }
        self.buffered.insert(seq, slot);
        if self.stalled_since.is_none() && seq != self.expected {
            self.stalled_since = Some(Instant::now());
        }
        true
    }

    /// Releases the run of consecutive packets starting at the cursor.
    pub(crate) fn pop_ready(&mut self) -> Vec<Packet> {
        let mut ready = Vec::new();
        while let Some(slot) = self.buffered.remove(&self.expected) {
            if let Slot::Deliver(packet) = slot {
                ready.push(packet);
            }
            self.expected = next_seq(self.expected);
        }
        self.stalled_since = if self.buffered.is_empty() {
            None
        } else {
            Some(Instant::now())
        };
        ready
    }

    /// Whether the head of the queue has been blocked on a gap longer than
    /// `horizon` seconds worth of waiting.
    pub(crate) fn stalled_longer_than(&self, horizon: std::time::Duration) -> bool {
        self.stalled_since
            .is_some_and(|since| since.elapsed() > horizon)
    }

    /// Abandons the missing sequences: jumps the cursor to the closest
    /// buffered one and releases from there.
    pub(crate) fn force_release(&mut self) -> Vec<Packet> {
        if let Some(&seq) = self
            .buffered
            .keys()
            .min_by_key(|&&s| ring_distance(self.expected, s))
        {
            self.expected = seq;
        }
        self.pop_ready()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::Payload;
    use std::time::Duration;

    fn packet(seq: u8) -> Packet {
        Packet {
            seq,
            ack: 0,
            payload: Payload::FlowControl { can_send: true },
        }
    }

    fn seqs(packets: &[Packet]) -> Vec<u8> {
        packets.iter().map(|p| p.seq).collect()
    }

    #[test]
    fn releases_in_sequence_order() {
        let mut queue = PeerQueue::new();
        assert!(queue.insert(1, Slot::Deliver(packet(1))));
        assert_eq!(seqs(&queue.pop_ready()), vec![1]);
        assert!(queue.insert(2, Slot::Deliver(packet(2))));
        assert_eq!(seqs(&queue.pop_ready()), vec![2]);
    }

    #[test]
    fn out_of_order_arrivals_wait_for_the_gap() {
        let mut queue = PeerQueue::new();
        // 7 arrives before 5 and 6; cursor sits at 5 after 1..=4.
        for seq in 1..=4 {
            queue.insert(seq, Slot::Deliver(packet(seq)));
        }
        queue.pop_ready();

        assert!(queue.insert(7, Slot::Deliver(packet(7))));
        assert!(queue.pop_ready().is_empty());
        assert!(queue.insert(6, Slot::Deliver(packet(6))));
        assert!(queue.pop_ready().is_empty());
        assert!(queue.insert(5, Slot::Deliver(packet(5))));
        assert_eq!(seqs(&queue.pop_ready()), vec![5, 6, 7]);
    }

    #[test]
    fn duplicates_are_rejected() {
        let mut queue = PeerQueue::new();
        assert!(queue.insert(1, Slot::Deliver(packet(1))));
        // Still buffered.
        assert!(!queue.insert(1, Slot::Deliver(packet(1))));
        queue.pop_ready();
        // Already released.
        assert!(!queue.insert(1, Slot::Deliver(packet(1))));
    }

    #[test]
    fn consumed_slots_advance_without_delivery() {
        let mut queue = PeerQueue::new();
        queue.insert(1, Slot::Consumed);
        queue.insert(2, Slot::Deliver(packet(2)));
        assert_eq!(seqs(&queue.pop_ready()), vec![2]);
    }

    #[test]
    fn force_release_skips_dead_gaps() {
        let mut queue = PeerQueue::new();
        queue.insert(4, Slot::Deliver(packet(4)));
        queue.insert(5, Slot::Deliver(packet(5)));
        assert!(queue.pop_ready().is_empty());
        assert_eq!(seqs(&queue.force_release()), vec![4, 5]);
        // Cursor resumes after the released run.
        assert!(queue.insert(6, Slot::Deliver(packet(6))));
        assert_eq!(seqs(&queue.pop_ready()), vec![6]);
    }

    #[test]
    fn sequence_ring_wraps_past_255() {
        let mut queue = PeerQueue::new();
        queue.expected = 255;
        assert!(queue.insert(255, Slot::Deliver(packet(255))));
        assert!(queue.insert(1, Slot::Deliver(packet(1))));
        assert_eq!(seqs(&queue.pop_ready()), vec![255, 1]);
        assert_eq!(queue.expected, 2);
    }

    #[test]
    fn stall_tracking_follows_the_head() {
        let mut queue = PeerQueue::new();
        assert!(!queue.stalled_longer_than(Duration::ZERO));
        queue.insert(3, Slot::Deliver(packet(3)));
        assert!(queue.stalled_longer_than(Duration::ZERO));
        queue.insert(1, Slot::Deliver(packet(1)));
        queue.insert(2, Slot::Deliver(packet(2)));
        queue.pop_ready();
        assert!(!queue.stalled_longer_than(Duration::ZERO));
    }
}
