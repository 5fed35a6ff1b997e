//! Ordering guarantees under arbitrary fragment interleavings.

use std::{
    sync::{Arc, Mutex},
    thread,
    time::Instant,
};

use crossbeam::channel::{self, Receiver, Sender};
use dissemination::{
    Delivery,
    DeliverySink,
    FragmentOutcome,
    MemoryCache,
    Message,
    MessageId,
    Reassembler,
};
use dissemination_testing::{
    Harness,
    RecordingTransport,
    StaticNode,
    fragment_message,
    pattern,
};
use proptest::prelude::*;
use rstest::rstest;

/// Fragments of `count` messages from one sender, in publishing order.
fn published(count: u32) -> Vec<Message> {
    (0..count)
        .flat_map(|seq| {
            let body = pattern(40 + 17 * seq as usize);
            fragment_message(&MessageId::new("G", "S", seq), &body, 32)
        })
        .collect()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn sequenced_reliable_delivery_is_in_order(
        fragments in Just(published(6)).prop_shuffle(),
    ) {
        let harness = Harness::new();
        for fragment in fragments {
            harness.feed(fragment).expect("accepted");
        }
        prop_assert_eq!(harness.sink.seqs(), (0..6).collect::<Vec<_>>());
        prop_assert_eq!(harness.reassembler.in_flight_len(), 0);
    }

    #[test]
    fn unordered_reliable_delivery_reports_each_message_once(
        fragments in Just(published(6)).prop_shuffle(),
    ) {
        let harness = Harness::with(
            Harness::config(),
            StaticNode::new(&["G"], false, true),
        );
        for fragment in fragments {
            harness.feed(fragment).expect("accepted");
        }
        let mut seqs = harness.sink.seqs();
        seqs.sort_unstable();
        prop_assert_eq!(seqs, (0..6).collect::<Vec<_>>());
    }
}

#[rstest]
fn skipping_a_lost_message_releases_its_successors() {
    let harness = Harness::new();
    let now = Instant::now();
    for fragment in published(4)
        .into_iter()
        .filter(|f| f.header().id().seq() != 1)
    {
        harness.feed_at(fragment, now).expect("accepted");
    }
    assert_eq!(harness.sink.seqs(), vec![0]);

    let released = harness
        .reassembler
        .skip_message(&MessageId::new("G", "S", 1), now);
    assert_eq!(released, 2);
    assert_eq!(harness.sink.seqs(), vec![0, 2, 3]);
}

#[rstest]
fn sequenced_best_effort_drops_late_messages() {
    let harness = Harness::with(
        Harness::config(),
        StaticNode::new(&["G"], true, false),
    );
    let mut fragments = published(3);
    // Publish seq 2 before seq 1.
    fragments.sort_by_key(|f| match f.header().id().seq() {
        1 => 2,
        2 => 1,
        seq => seq,
    });
    for fragment in fragments {
        let _ = harness.feed(fragment);
    }
    assert_eq!(harness.sink.seqs(), vec![0, 2]);
}

/// Sink that holds the delivery of sequence id 0 until released.
struct GatedSink {
    seqs: Mutex<Vec<u32>>,
    entered: Sender<()>,
    resume: Receiver<()>,
}

impl DeliverySink for GatedSink {
    fn deliver(&self, delivery: Delivery) {
        let seq = delivery.id().seq();
        if seq == 0 {
            self.entered.send(()).expect("test is waiting");
            self.resume.recv().expect("test resumes the sink");
        }
        self.seqs.lock().expect("sink lock").push(seq);
    }
}

#[test]
fn concurrent_releases_reach_the_sink_in_order() {
    let (entered_tx, entered) = channel::bounded(1);
    let (resume, resume_rx) = channel::bounded(1);
    let sink = Arc::new(GatedSink {
        seqs: Mutex::new(Vec::new()),
        entered: entered_tx,
        resume: resume_rx,
    });
    let reassembler = Reassembler::builder()
        .config(Harness::config())
        .transport(Arc::new(RecordingTransport::new()))
        .cache(Arc::new(MemoryCache::new()))
        .local_node(Arc::new(StaticNode::sequenced_reliable()))
        .sink(sink.clone())
        .seed(7)
        .build()
        .expect("complete builder");
    let whole = |seq| fragment_message(&MessageId::new("G", "S", seq), &pattern(40), 40);

    for fragment in whole(1) {
        reassembler.fragment_arrived(fragment, false).expect("buffered");
    }
    let first = reassembler.clone();
    let head = whole(0);
    let receiver = thread::spawn(move || {
        for fragment in head {
            first.fragment_arrived(fragment, false).expect("delivered");
        }
    });

    entered.recv().expect("sequence id 0 reached the sink");
    for fragment in whole(2) {
        assert_eq!(
            reassembler.fragment_arrived(fragment, false),
            Ok(FragmentOutcome::Delivered)
        );
    }
    resume.send(()).expect("sink is waiting");
    receiver.join().expect("receiver thread");

    assert_eq!(*sink.seqs.lock().expect("sink lock"), vec![0, 1, 2]);
}
