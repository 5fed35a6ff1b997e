//! A reassembled message on its way to the application.

use bytes::Bytes;

use crate::{
    message::{MessageHeader, MessageId},
    request::RequestDetails,
};

/// Whether a delivery carries the whole message or only its metadata prefix.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DeliveryKind {
    Full,
    Metadata,
}

/// A reassembled message released for delivery.
///
/// The payload shares the buffer that was handed to the cache; neither side
/// can mutate it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Delivery {
    header: MessageHeader,
    payload: Bytes,
    kind: DeliveryKind,
    request_details: Option<RequestDetails>,
}

impl Delivery {
    #[must_use]
    pub fn new(header: MessageHeader, payload: Bytes, kind: DeliveryKind) -> Self {
        Self {
            header,
            payload,
            kind,
            request_details: None,
        }
    }

    /// Attach the pull request this delivery answers.
    #[must_use]
    pub fn with_request_details(mut self, details: Option<RequestDetails>) -> Self {
        self.request_details = details;
        self
    }

    #[must_use]
    pub fn header(&self) -> &MessageHeader { &self.header }

    #[must_use]
    pub fn id(&self) -> &MessageId { self.header.id() }

    #[must_use]
    pub fn payload(&self) -> &Bytes { &self.payload }

    #[must_use]
    pub const fn kind(&self) -> DeliveryKind { self.kind }

    #[must_use]
    pub fn request_details(&self) -> Option<&RequestDetails> { self.request_details.as_ref() }
}
