//! # Outbound Buffer
//!
//! Holds messages for the backend while the connection is down.
//!
//! ```text
//!   send() ──► [ oldest ... newest ] ──► flushed in order on reconnect
//!                  ▲
//!                  └── dropped first when full
//! ```
//!
//! Heartbeats and pongs are not buffered; a stale keepalive tells the
//! backend nothing.

use std::collections::VecDeque;

use tracing::warn;

use crate::protocol::ChannelMessage;

#[derive(Debug)]
pub struct OutboundBuffer {
    queue: VecDeque<ChannelMessage>,
    capacity: usize,
}

impl OutboundBuffer {
    pub fn new(capacity: usize) -> Self {
        OutboundBuffer {
            queue: VecDeque::new(),
            capacity: capacity.max(1),
        }
    }

    /// Queues a message. Returns false if it was discarded.
    pub fn push(&mut self, message: ChannelMessage, connected: bool) -> bool {
        if !connected && message.is_ephemeral() {
            return false;
        }

        if self.queue.len() >= self.capacity {
            if let Some(dropped) = self.queue.pop_front() {
                warn!(
                    message_type = dropped.type_name(),
                    capacity = self.capacity,
                    "Outbound buffer full, dropping oldest message"
                );
            }
        }

        self.queue.push_back(message);
        true
    }

    pub fn front(&self) -> Option<&ChannelMessage> {
        self.queue.front()
    }

    pub fn pop_front(&mut self) -> Option<ChannelMessage> {
        self.queue.pop_front()
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// Drops keepalives queued while the connection was still up.
    pub fn discard_ephemeral(&mut self) {
        self.queue.retain(|message| !message.is_ephemeral());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn error(n: usize) -> ChannelMessage {
        ChannelMessage::error("TEST", &n.to_string(), None)
    }

    #[test]
    fn test_drops_oldest_when_full() {
        let mut buffer = OutboundBuffer::new(3);
        for n in 0..5 {
            assert!(buffer.push(error(n), false));
        }

        assert_eq!(buffer.len(), 3);
        let kept: Vec<_> = std::iter::from_fn(|| buffer.pop_front()).collect();
        assert_eq!(kept, vec![error(2), error(3), error(4)]);
    }

    #[test]
    fn test_keepalives_are_not_buffered_offline() {
        let mut buffer = OutboundBuffer::new(10);
        assert!(!buffer.push(ChannelMessage::heartbeat("s1"), false));
        assert!(buffer.is_empty());

        assert!(buffer.push(ChannelMessage::pong("t"), true));
        assert!(buffer.push(error(1), true));
        buffer.discard_ephemeral();
        assert_eq!(buffer.front(), Some(&error(1)));
    }
}
