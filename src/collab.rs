//! Interfaces of the systems the engine works with but does not own.
//!
//! Implementations must be thread-safe: fragment arrivals come in on the
//! transport's threads, requests go out from the request worker.

use std::io;

use bytes::Bytes;

use crate::{
    delivery::Delivery,
    message::{Message, MessageHeader, MessageId},
    request::DataRequest,
};

/// Link used to broadcast retransmission requests.
pub trait Transport: Send + Sync {
    /// Fragments received but not yet handed to the engine.
    fn incoming_queue_len(&self) -> usize;

    /// Largest encoded request the link can carry.
    fn max_request_size(&self) -> usize;

    /// Interfaces requests should go out on; `None` means all of them.
    ///
    /// Interfaces whose receive rate falls below `receive_rate_threshold`
    /// are the ones worth asking on.
    fn target_interfaces(&self, receive_rate_threshold: f32) -> Option<Vec<String>> {
        let _ = receive_rate_threshold;
        None
    }

    /// Broadcast one request.
    ///
    /// # Errors
    ///
    /// Returns any I/O error raised by the link.
    fn broadcast(&self, request: &DataRequest, interfaces: Option<&[String]>) -> io::Result<()>;
}

/// Store of complete messages and of fragments kept for later reuse.
pub trait MessageCache: Send + Sync {
    /// Take ownership of a complete message.
    fn store_complete(&self, header: &MessageHeader, payload: Bytes);

    /// Whether the complete message named by `id` is held.
    fn has_complete(&self, id: &MessageId) -> bool;

    /// Fragments held for `id`, in any order.
    fn fragments(&self, id: &MessageId) -> Vec<Message>;
}

/// What the local node subscribes to and how.
pub trait LocalNode: Send + Sync {
    /// Identifier placed in outgoing requests.
    fn node_id(&self) -> String;

    /// Whether a local client subscribes to `group` with `tag`.
    fn is_subscribed(&self, group: &str, tag: u16) -> bool;

    fn requires_sequencing(&self, group: &str, tag: u16) -> bool;

    fn requires_reliability(&self, group: &str, tag: u16) -> bool;

    /// Whether the message answers a history request a client has open.
    fn is_in_history(&self, header: &MessageHeader) -> bool;

    /// Neighbours currently heard from.
    fn active_neighbors(&self) -> u16;

    /// Session identifier placed in outgoing requests.
    fn session_id(&self) -> Option<String> { None }
}

/// Application boundary receiving ordered deliveries.
pub trait DeliverySink: Send + Sync {
    fn deliver(&self, delivery: Delivery);
}
