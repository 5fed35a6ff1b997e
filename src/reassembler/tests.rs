//! Unit tests for fragment admission and completion.

use std::{
    io,
    sync::{Arc, Mutex},
    time::Instant,
};

use bytes::Bytes;
use rstest::{fixture, rstest};

use super::{BuildError, DropReason, FragmentOutcome, Reassembler};
use crate::{
    cache::MemoryCache,
    collab::{DeliverySink, LocalNode, MessageCache, Transport},
    config::{ConfigError, ReassemblerConfig, RequestLimit},
    delivery::{Delivery, DeliveryKind},
    fragment::ReassemblyError,
    message::{ChunkId, Message, MessageHeader, MessageId},
    range::ByteRange,
    request::{ChunkRange, DataRequest, Priority, RequestDetails, RequestedRanges},
};

#[derive(Default)]
struct Link(Mutex<Vec<DataRequest>>);

impl Transport for Link {
    fn incoming_queue_len(&self) -> usize { 0 }

    fn max_request_size(&self) -> usize { 1_000 }

    fn broadcast(&self, request: &DataRequest, _: Option<&[String]>) -> io::Result<()> {
        self.0.lock().expect("link lock").push(request.clone());
        Ok(())
    }
}

struct Node;

impl LocalNode for Node {
    fn node_id(&self) -> String { "me".into() }

    fn is_subscribed(&self, group: &str, _: u16) -> bool { group == "G" }

    fn requires_sequencing(&self, _: &str, _: u16) -> bool { false }

    fn requires_reliability(&self, _: &str, _: u16) -> bool { true }

    fn is_in_history(&self, _: &MessageHeader) -> bool { false }

    fn active_neighbors(&self) -> u16 { 2 }
}

#[derive(Default)]
struct Sink(Mutex<Vec<Delivery>>);

impl DeliverySink for Sink {
    fn deliver(&self, delivery: Delivery) { self.0.lock().expect("sink lock").push(delivery); }
}

struct Fixture {
    engine: Reassembler,
    link: Arc<Link>,
    cache: Arc<MemoryCache>,
    sink: Arc<Sink>,
}

impl Fixture {
    fn delivered(&self) -> Vec<Delivery> { self.sink.0.lock().expect("sink lock").clone() }

    fn sent(&self) -> Vec<DataRequest> { self.link.0.lock().expect("link lock").clone() }
}

fn build(config: ReassemblerConfig) -> Fixture {
    let link = Arc::new(Link::default());
    let cache = Arc::new(MemoryCache::new());
    let sink = Arc::new(Sink::default());
    let engine = Reassembler::builder()
        .config(config)
        .transport(link.clone())
        .cache(cache.clone())
        .local_node(Arc::new(Node))
        .sink(sink.clone())
        .seed(1)
        .build()
        .expect("complete builder");
    Fixture {
        engine,
        link,
        cache,
        sink,
    }
}

#[fixture]
fn harness() -> Fixture { build(ReassemblerConfig::default()) }

fn body() -> Bytes { (0..=255u8).cycle().take(300).collect::<Vec<_>>().into() }

fn part(group: &str, seq: u32, offset: u32, length: u32) -> Message {
    let id = MessageId::new(group, "S", seq);
    let start = offset as usize;
    Message::new(
        MessageHeader::new(id, 300).with_fragment(offset, length),
        body().slice(start..start + length as usize),
    )
}

#[rstest]
fn builder_reports_missing_collaborators() {
    let err = Reassembler::builder()
        .transport(Arc::new(Link::default()))
        .build()
        .expect_err("cache missing");
    assert_eq!(err, BuildError::MissingCollaborator("cache"));

    let err = Reassembler::builder()
        .config(ReassemblerConfig {
            default_request_probability: 101.0,
            ..ReassemblerConfig::default()
        })
        .build()
        .expect_err("invalid config");
    assert_eq!(err, BuildError::Config(ConfigError::InvalidProbability(101.0)));
}

#[rstest]
fn zero_length_message_is_dropped(harness: Fixture) {
    let header = MessageHeader::new(MessageId::new("G", "S", 0), 0).with_fragment(0, 0);
    let outcome = harness
        .engine
        .fragment_arrived(Message::new(header, Bytes::new()), false)
        .expect("dummy is not an error");
    assert_eq!(outcome, FragmentOutcome::Dropped(DropReason::DummyMessage));
    assert_eq!(harness.engine.in_flight_len(), 0);
}

#[rstest]
fn malformed_fragments_leave_no_state(harness: Fixture) {
    let id = MessageId::new("G", "S", 0);
    let short = Message::new(
        MessageHeader::new(id.clone(), 300).with_fragment(0, 100),
        Bytes::from_static(b"short"),
    );
    assert!(matches!(
        harness.engine.fragment_arrived(short, false),
        Err(ReassemblyError::PayloadLengthMismatch { .. })
    ));

    let beyond = Message::new(
        MessageHeader::new(id.clone(), 300).with_fragment(300, 1),
        Bytes::from_static(b"x"),
    );
    assert!(matches!(
        harness.engine.fragment_arrived(beyond, false),
        Err(ReassemblyError::FragmentOutOfRange { .. })
    ));
    assert!(!harness.engine.contains_message(&id));
}

#[rstest]
fn chunk_declaring_metadata_is_rejected(harness: Fixture) {
    let id = MessageId::new("G", "S", 2).with_chunk(ChunkId::new(1));
    let header = MessageHeader::new(id.clone(), 300)
        .with_fragment(0, 100)
        .with_metadata_length(50);
    assert_eq!(
        harness
            .engine
            .fragment_arrived(Message::new(header, body().slice(0..100)), false),
        Err(ReassemblyError::ChunkWithMetadata { id: id.clone() })
    );
    assert!(!harness.engine.is_being_reassembled(&id));
    assert!(harness.delivered().is_empty());
}

#[rstest]
fn duplicate_fragment_is_rejected_and_record_kept(harness: Fixture) {
    let id = MessageId::new("G", "S", 0);
    assert_eq!(
        harness.engine.fragment_arrived(part("G", 0, 0, 100), false),
        Ok(FragmentOutcome::Stored)
    );
    assert!(matches!(
        harness.engine.fragment_arrived(part("G", 0, 0, 100), false),
        Err(ReassemblyError::DuplicateFragment { .. })
    ));
    assert!(harness.engine.contains_fragment(part("G", 0, 0, 100).header()));
    assert!(harness.engine.has_fragment(&id, ByteRange::new(10, 90)));
    assert!(!harness.engine.has_fragment(&id, ByteRange::new(90, 110)));
}

#[rstest]
fn unsubscribed_traffic_is_dropped_unless_opportunistic(harness: Fixture) {
    assert_eq!(
        harness.engine.fragment_arrived(part("H", 0, 0, 100), true),
        Ok(FragmentOutcome::Dropped(DropReason::NotSubscribed))
    );

    let opportunistic = build(ReassemblerConfig {
        request_opportunistic: true,
        ..ReassemblerConfig::default()
    });
    assert_eq!(
        opportunistic.engine.fragment_arrived(part("H", 0, 0, 100), true),
        Ok(FragmentOutcome::Stored)
    );
    assert!(
        opportunistic
            .engine
            .is_being_reassembled(&MessageId::new("H", "S", 0))
    );
}

#[rstest]
fn overheard_message_is_cached_not_delivered(harness: Fixture) {
    let id = MessageId::new("G", "S", 0);
    harness
        .engine
        .fragment_arrived(part("G", 0, 0, 200), true)
        .expect("stored");
    let outcome = harness
        .engine
        .fragment_arrived(part("G", 0, 200, 100), true)
        .expect("completes");
    assert_eq!(outcome, FragmentOutcome::Cached);
    assert!(harness.delivered().is_empty());
    assert!(harness.cache.has_complete(&id));
    assert!(!harness.engine.contains_message(&id));
}

#[rstest]
fn complete_message_is_delivered_once(harness: Fixture) {
    let now = Instant::now();
    for (offset, length) in [(200, 100), (0, 100)] {
        harness
            .engine
            .fragment_arrived_at(part("G", 0, offset, length), false, now)
            .expect("stored");
    }
    let outcome = harness
        .engine
        .fragment_arrived_at(part("G", 0, 100, 100), false, now)
        .expect("completes");
    assert_eq!(outcome, FragmentOutcome::Delivered);
    let delivered = harness.delivered();
    assert_eq!(delivered.len(), 1);
    assert_eq!(delivered[0].payload(), &body());
    assert_eq!(delivered[0].header().fragment_length(), 300);

    // A late retransmission of the same message is recognised as complete.
    assert_eq!(
        harness.engine.fragment_arrived_at(part("G", 0, 0, 100), false, now),
        Ok(FragmentOutcome::Dropped(DropReason::AlreadyComplete))
    );
}

#[rstest]
fn metadata_prefix_is_delivered_before_the_message(harness: Fixture) {
    let with_metadata = |offset: u32, length: u32| {
        let message = part("G", 0, offset, length);
        let (header, payload) = message.into_parts();
        Message::new(header.with_metadata_length(50), payload)
    };
    assert_eq!(
        harness.engine.fragment_arrived(with_metadata(0, 100), false),
        Ok(FragmentOutcome::MetadataDelivered)
    );
    assert_eq!(
        harness.engine.fragment_arrived(with_metadata(200, 100), false),
        Ok(FragmentOutcome::Stored)
    );
    assert_eq!(
        harness.engine.fragment_arrived(with_metadata(100, 100), false),
        Ok(FragmentOutcome::Delivered)
    );
    let kinds: Vec<DeliveryKind> = harness.delivered().iter().map(Delivery::kind).collect();
    assert_eq!(kinds, vec![DeliveryKind::Metadata, DeliveryKind::Full]);
    assert_eq!(harness.delivered()[0].payload().len(), 50);
}

#[rstest]
fn request_limit_and_probability_are_validated(harness: Fixture) {
    assert_eq!(
        harness.engine.set_request_limit(-2),
        Err(ConfigError::InvalidRequestLimit(-2))
    );
    harness.engine.set_request_limit(3).expect("valid limit");
    assert_eq!(harness.engine.request_limit(), RequestLimit::Limited(3));
    harness.engine.set_request_limit(-1).expect("valid limit");
    assert_eq!(harness.engine.request_limit(), RequestLimit::Unlimited);

    assert!(
        harness
            .engine
            .set_request_probability(Priority::BestEffort, 120.0)
            .is_err()
    );
    harness
        .engine
        .set_request_probability(Priority::BestEffort, 25.0)
        .expect("valid probability");
    assert!((harness.engine.request_probability(Priority::BestEffort) - 25.0).abs() < f32::EPSILON);
}

#[rstest]
fn pull_request_details_travel_with_the_delivery(harness: Fixture) {
    let details = RequestDetails::new("query-1", 7);
    assert_eq!(harness.engine.add_request(&details, "G", "S", [0]), 1);
    assert!(harness.engine.is_being_reassembled(&MessageId::new("G", "S", 0)));

    harness
        .engine
        .fragment_arrived(part("G", 0, 0, 300), false)
        .expect("completes");
    let delivered = harness.delivered();
    assert_eq!(
        delivered[0].request_details().map(RequestDetails::query_id),
        Some("query-1")
    );
    assert!(!harness.engine.is_being_reassembled(&MessageId::new("G", "S", 0)));
}

#[rstest]
fn chunk_requests_are_sent_immediately(harness: Fixture) {
    let sent = harness
        .engine
        .send_chunk_request(
            "G",
            "S",
            4,
            &[ChunkRange::new(ChunkId::new(3), ChunkId::new(1))],
        )
        .expect("broadcast");
    assert_eq!(sent, 1);
    let requests = harness.sent();
    assert_eq!(requests[0].requester, "me");
    assert_eq!(requests[0].entries[0].id, MessageId::new("G", "S", 4));
    assert_eq!(
        requests[0].entries[0].ranges,
        RequestedRanges::Chunks(vec![ChunkRange::new(ChunkId::new(1), ChunkId::new(3))])
    );
}
