//! Metric helpers for `dissemination`.
//!
//! This module defines metric names and simple helper functions wrapping the
//! [`metrics`](https://docs.rs/metrics) crate. With the `metrics` feature
//! disabled the helpers compile to nothing.

#[cfg(feature = "metrics")]
use metrics::counter;

/// Name of the counter tracking fragments handed to the engine.
pub const FRAGMENTS_RECEIVED: &str = "dissemination_fragments_received_total";
/// Name of the counter tracking messages released to the application.
pub const MESSAGES_DELIVERED: &str = "dissemination_messages_delivered_total";
/// Name of the counter tracking retransmission requests broadcast.
pub const REQUESTS_SENT: &str = "dissemination_requests_sent_total";
/// Name of the counter tracking encoded request bytes broadcast.
pub const REQUEST_BYTES: &str = "dissemination_request_bytes_total";
/// Name of the counter tracking error occurrences.
pub const ERRORS_TOTAL: &str = "dissemination_errors_total";

/// What happened to a fragment.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FragmentDisposition {
    /// The fragment was dropped before reaching the index.
    Dropped,
    /// The fragment was added to an in-flight message.
    Stored,
    /// The fragment completed a message or its metadata.
    Completed,
    /// The fragment was rejected with an error.
    Rejected,
}

impl FragmentDisposition {
    #[cfg_attr(not(feature = "metrics"), allow(dead_code))]
    fn as_str(self) -> &'static str {
        match self {
            FragmentDisposition::Dropped => "dropped",
            FragmentDisposition::Stored => "stored",
            FragmentDisposition::Completed => "completed",
            FragmentDisposition::Rejected => "rejected",
        }
    }
}

/// Record a processed fragment.
pub fn inc_fragments(disposition: FragmentDisposition) {
    #[cfg(feature = "metrics")]
    counter!(FRAGMENTS_RECEIVED, "outcome" => disposition.as_str()).increment(1);
    #[cfg(not(feature = "metrics"))]
    let _ = disposition;
}

/// Record messages released to the application.
pub fn inc_delivered(count: usize) {
    #[cfg(feature = "metrics")]
    counter!(MESSAGES_DELIVERED).increment(u64::try_from(count).unwrap_or(u64::MAX));
    #[cfg(not(feature = "metrics"))]
    let _ = count;
}

/// Record a broadcast request of `bytes` encoded bytes.
pub fn inc_requests(bytes: usize) {
    #[cfg(feature = "metrics")]
    {
        counter!(REQUESTS_SENT).increment(1);
        counter!(REQUEST_BYTES).increment(u64::try_from(bytes).unwrap_or(u64::MAX));
    }
    #[cfg(not(feature = "metrics"))]
    let _ = bytes;
}

/// Record an error occurrence.
pub fn inc_errors() {
    #[cfg(feature = "metrics")]
    counter!(ERRORS_TOTAL).increment(1);
}
