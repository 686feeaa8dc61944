//! # Shared Bus
//!
//! A minimal gossip/broadcast primitive for the `MAIN_CHAIN` service's
//! `BLOCKS` channel: any number of producers publish [`shared_types::Block`]
//! values, any number of subscribers receive every value published after
//! they subscribed. No reply is expected.
//!
//! The actual muddle-style peer network is out of scope of this crate; this
//! is the local fan-out primitive that a network adapter would sit behind.

use shared_types::Block;
use thiserror::Error;
use tokio::sync::broadcast;

/// Default number of in-flight gossip messages buffered per subscriber
/// before the slowest subscriber starts missing messages.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 256;

/// Errors a subscriber can observe while draining the gossip channel.
#[derive(Debug, Error)]
pub enum GossipRecvError {
    /// The channel has no senders left; it will never yield another block.
    #[error("gossip channel closed")]
    Closed,
    /// The subscriber fell behind and missed `skipped` messages.
    #[error("subscriber lagged, skipped {skipped} messages")]
    Lagged {
        /// Number of messages dropped before this subscriber could catch up.
        skipped: u64,
    },
}

/// A fan-out channel carrying gossiped blocks.
///
/// Clones are cheap and share the same underlying broadcast queue, mirroring
/// how a muddle endpoint handle would be shared between the block
/// coordinator (publisher, after mining) and the chain sync service
/// (subscriber, for inbound gossip).
#[derive(Clone)]
pub struct GossipBus {
    sender: broadcast::Sender<Block>,
}

impl GossipBus {
    /// Create a bus with the default channel capacity.
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CHANNEL_CAPACITY)
    }

    /// Create a bus buffering up to `capacity` unread messages per subscriber.
    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Broadcast a block to every current subscriber. No reply is expected;
    /// the return value is purely informational.
    pub fn publish(&self, block: Block) -> usize {
        self.sender.send(block).unwrap_or(0)
    }

    /// Subscribe to future blocks. Blocks published before this call are not
    /// replayed.
    pub fn subscribe(&self) -> GossipSubscription {
        GossipSubscription {
            receiver: self.sender.subscribe(),
        }
    }

    /// Number of active subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for GossipBus {
    fn default() -> Self {
        Self::new()
    }
}

/// A subscriber's handle onto the gossip channel.
pub struct GossipSubscription {
    receiver: broadcast::Receiver<Block>,
}

impl GossipSubscription {
    /// Try to receive a block without blocking. Used by cooperative state
    /// machines that must never suspend on I/O.
    pub fn try_recv(&mut self) -> Result<Option<Block>, GossipRecvError> {
        match self.receiver.try_recv() {
            Ok(block) => Ok(Some(block)),
            Err(broadcast::error::TryRecvError::Empty) => Ok(None),
            Err(broadcast::error::TryRecvError::Closed) => Err(GossipRecvError::Closed),
            Err(broadcast::error::TryRecvError::Lagged(skipped)) => {
                Err(GossipRecvError::Lagged { skipped })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared_types::Block;

    fn sample_block(n: u64) -> Block {
        let mut b = Block::genesis(0, 1);
        b.block_number = n;
        b.previous_hash = [n as u8; 32];
        b.update_digest();
        b
    }

    #[test]
    fn subscriber_receives_published_block() {
        let bus = GossipBus::new();
        let mut sub = bus.subscribe();
        bus.publish(sample_block(1));
        let received = sub.try_recv().unwrap();
        assert_eq!(received.unwrap().block_number, 1);
    }

    #[test]
    fn subscriber_sees_nothing_before_publish() {
        let bus = GossipBus::new();
        let mut sub = bus.subscribe();
        assert!(sub.try_recv().unwrap().is_none());
    }

    #[test]
    fn late_subscriber_misses_earlier_blocks() {
        let bus = GossipBus::new();
        bus.publish(sample_block(1));
        let mut sub = bus.subscribe();
        bus.publish(sample_block(2));
        let received = sub.try_recv().unwrap().unwrap();
        assert_eq!(received.block_number, 2);
    }

    #[test]
    fn publish_with_no_subscribers_does_not_panic() {
        let bus = GossipBus::new();
        assert_eq!(bus.publish(sample_block(1)), 0);
    }
}
