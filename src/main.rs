//! Simulation of fragment loss and recovery on a broadcast link.
//!
//! A publisher fragments a batch of messages and loses a share of the
//! fragments. The receiver's request cycle asks for what is missing and the
//! publisher answers, until every message is delivered or the cycle budget
//! runs out.

mod cli;

use std::{
    io,
    sync::{Arc, Mutex, PoisonError},
    time::{Duration, Instant},
};

use bytes::Bytes;
use clap::Parser;
use dissemination::{
    DataRequest,
    Delivery,
    DeliverySink,
    LocalNode,
    MemoryCache,
    Message,
    MessageHeader,
    MessageId,
    Reassembler,
    ReassemblerConfig,
    Transport,
    request::RequestedRanges,
};
use rand::{Rng, SeedableRng, rngs::StdRng};
use tracing::{info, warn};

const GROUP: &str = "sim";
const PUBLISHER: &str = "publisher";
const CYCLE_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Default)]
struct Link {
    sent: Mutex<Vec<DataRequest>>,
}

impl Link {
    fn take(&self) -> Vec<DataRequest> {
        std::mem::take(&mut *self.sent.lock().unwrap_or_else(PoisonError::into_inner))
    }
}

impl Transport for Link {
    fn incoming_queue_len(&self) -> usize { 0 }

    fn max_request_size(&self) -> usize { 512 }

    fn broadcast(&self, request: &DataRequest, _interfaces: Option<&[String]>) -> io::Result<()> {
        self.sent
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(request.clone());
        Ok(())
    }
}

struct Subscriber {
    sequenced: bool,
    reliable: bool,
}

impl LocalNode for Subscriber {
    fn node_id(&self) -> String { "receiver".into() }

    fn is_subscribed(&self, group: &str, _tag: u16) -> bool { group == GROUP }

    fn requires_sequencing(&self, _group: &str, _tag: u16) -> bool { self.sequenced }

    fn requires_reliability(&self, _group: &str, _tag: u16) -> bool { self.reliable }

    fn is_in_history(&self, _header: &MessageHeader) -> bool { false }

    fn active_neighbors(&self) -> u16 { 1 }
}

#[derive(Default)]
struct Inbox {
    delivered: Mutex<Vec<MessageId>>,
}

impl DeliverySink for Inbox {
    fn deliver(&self, delivery: Delivery) {
        info!(id = %delivery.id(), bytes = delivery.payload().len(), "delivered");
        self.delivered
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(delivery.id().clone());
    }
}

/// Split `body` into fragments of at most `mtu` bytes.
fn fragment(id: &MessageId, body: &Bytes, mtu: u32) -> Vec<Message> {
    let total = u32::try_from(body.len()).unwrap_or(u32::MAX);
    let step = mtu.max(1);
    (0..total)
        .step_by(usize::try_from(step).unwrap_or(usize::MAX))
        .map(|offset| {
            let length = step.min(total - offset);
            let start = usize::try_from(offset).unwrap_or(usize::MAX);
            let end = start + usize::try_from(length).unwrap_or(usize::MAX);
            Message::new(
                MessageHeader::new(id.clone(), total).with_fragment(offset, length),
                body.slice(start..end),
            )
        })
        .collect()
}

/// Fragments of every request entry the publisher can answer.
fn answer(request: &DataRequest, published: &[Vec<Message>]) -> Vec<Message> {
    let mut replies = Vec::new();
    for entry in &request.entries {
        let Some(fragments) = usize::try_from(entry.id.seq())
            .ok()
            .and_then(|seq| published.get(seq))
        else {
            continue;
        };
        replies.extend(fragments.iter().filter(|f| match &entry.ranges {
            RequestedRanges::WholeMessage => true,
            RequestedRanges::Bytes(ranges) => ranges.iter().any(|r| {
                r.start() < f.header().fragment_end() && f.header().fragment_offset() < r.end()
            }),
            RequestedRanges::Chunks(_) => false,
        }).cloned());
    }
    replies
}

fn transmit(
    reassembler: &Reassembler,
    fragments: impl IntoIterator<Item = Message>,
    loss: u8,
    rng: &mut StdRng,
    now: Instant,
) -> usize {
    let mut lost = 0;
    for message in fragments {
        if rng.gen_range(0..100) < loss {
            lost += 1;
            continue;
        }
        if let Err(err) = reassembler.fragment_arrived_at(message, false, now) {
            warn!("fragment rejected: {err}");
        }
    }
    lost
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Enable structured logging for the simulator.
    // Applications embedding the library should install their own subscriber.
    tracing_subscriber::fmt::init();

    let cli = cli::Cli::parse();
    let (sequenced, reliable) = cli.ordering.flags();
    let link = Arc::new(Link::default());
    let inbox = Arc::new(Inbox::default());
    let reassembler = Reassembler::builder()
        .config(ReassemblerConfig {
            missing_fragment_timeout: CYCLE_INTERVAL,
            // The receiver listens from the publisher's first message on.
            initial_sequence_id: Some(0),
            ..ReassemblerConfig::default()
        })
        .transport(link.clone())
        .cache(Arc::new(MemoryCache::new()))
        .local_node(Arc::new(Subscriber {
            sequenced,
            reliable,
        }))
        .sink(inbox.clone())
        .seed(cli.seed)
        .build()?;

    let mut rng = StdRng::seed_from_u64(cli.seed);
    let published: Vec<Vec<Message>> = (0..cli.messages)
        .map(|seq| {
            let body: Vec<u8> = (0..cli.size)
                .map(|i| u8::try_from(i % 251).unwrap_or_default())
                .collect();
            fragment(&MessageId::new(GROUP, PUBLISHER, seq), &Bytes::from(body), cli.mtu)
        })
        .collect();

    let start = Instant::now();
    let lost = transmit(
        &reassembler,
        published.iter().flatten().cloned(),
        cli.loss,
        &mut rng,
        start,
    );
    info!(lost, "initial transmission done");

    let mut now = start;
    for cycle in 1..=cli.cycles {
        now += CYCLE_INTERVAL;
        let report = reassembler.run_request_cycle_at(now)?;
        let requests = link.take();
        info!(
            cycle,
            requests = report.requests_sent,
            bytes = report.bytes_sent,
            "request cycle"
        );
        if requests.is_empty() && reassembler.in_flight_len() == 0 {
            break;
        }
        let replies = requests.iter().flat_map(|r| answer(r, &published));
        transmit(&reassembler, replies.collect::<Vec<_>>(), cli.loss, &mut rng, now);
    }

    let delivered = inbox
        .delivered
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .iter()
        .map(|id| id.seq().to_string())
        .collect::<Vec<_>>();
    println!(
        "delivered {} of {} messages: [{}]",
        delivered.len(),
        cli.messages,
        delivered.join(", ")
    );
    Ok(())
}
