//! Unit tests for per-sender ordering and gap reporting.

use std::time::{Duration, Instant};

use bytes::Bytes;
use rstest::{fixture, rstest};

use super::{Discipline, SubscriptionTable};
use crate::{
    config::{ReassemblerConfig, RequestLimit},
    delivery::{Delivery, DeliveryKind},
    message::{ChunkId, MessageHeader, MessageId, SenderKey},
};

fn delivery(seq: u32) -> Delivery {
    let header = MessageHeader::new(MessageId::new("G", "S", seq), 4);
    Delivery::new(header, Bytes::from_static(b"body"), DeliveryKind::Full)
}

fn seqs(deliveries: &[Delivery]) -> Vec<u32> { deliveries.iter().map(|d| d.id().seq()).collect() }

fn sender() -> SenderKey { SenderKey::new("G", "S") }

#[fixture]
fn table() -> SubscriptionTable {
    SubscriptionTable::new(&ReassemblerConfig {
        initial_sequence_id: Some(1),
        ..ReassemblerConfig::default()
    })
}

fn arrive(
    table: &SubscriptionTable,
    discipline: Discipline,
    order: &[u32],
    now: Instant,
) -> Vec<u32> {
    order
        .iter()
        .flat_map(|&seq| table.message_arrived(delivery(seq), discipline, false, now))
        .map(|d| d.id().seq())
        .collect()
}

#[rstest]
#[case(&[1, 2, 3, 4])]
#[case(&[4, 3, 2, 1])]
#[case(&[2, 4, 1, 3])]
#[case(&[3, 1, 4, 2])]
fn sequenced_reliable_delivers_in_order(table: SubscriptionTable, #[case] order: &[u32]) {
    let delivered = arrive(&table, Discipline::SequencedReliable, order, Instant::now());
    assert_eq!(delivered, vec![1, 2, 3, 4]);
    assert_eq!(table.expected_seq_id(&sender()), Some(5));
}

#[rstest]
fn sequenced_reliable_withholds_until_predecessor(table: SubscriptionTable) {
    let now = Instant::now();
    assert!(arrive(&table, Discipline::SequencedReliable, &[2, 3], now).is_empty());
    assert!(!table.is_relevant(&MessageId::new("G", "S", 3)));
    assert!(table.is_relevant(&MessageId::new("G", "S", 1)));

    let released = table.message_arrived(delivery(1), Discipline::SequencedReliable, false, now);
    assert_eq!(seqs(&released), vec![1, 2, 3]);
    assert!(!table.is_relevant(&MessageId::new("G", "S", 2)));
}

#[rstest]
fn explicit_skip_releases_successors_and_late_arrival_is_dropped(table: SubscriptionTable) {
    let now = Instant::now();
    arrive(&table, Discipline::SequencedReliable, &[1, 3, 4], now);

    let released = table.skip_message(&MessageId::new("G", "S", 2), now);
    assert_eq!(seqs(&released), vec![3, 4]);

    let late = table.message_arrived(delivery(2), Discipline::SequencedReliable, false, now);
    assert!(late.is_empty());
    assert!(!table.is_relevant(&MessageId::new("G", "S", 2)));
}

#[rstest]
fn sequenced_unreliable_drops_stale(table: SubscriptionTable) {
    let delivered = arrive(
        &table,
        Discipline::SequencedUnreliable,
        &[1, 3, 2, 5, 4, 6],
        Instant::now(),
    );
    assert_eq!(delivered, vec![1, 3, 5, 6]);
    assert_eq!(table.expected_seq_id(&sender()), Some(7));
}

#[rstest]
fn non_sequenced_reliable_delivers_immediately_and_tracks_gaps(table: SubscriptionTable) {
    let now = Instant::now();
    let delivered = arrive(&table, Discipline::NonSequencedReliable, &[1, 4, 4, 2], now);
    assert_eq!(delivered, vec![1, 4, 2]);
    assert_eq!(table.expected_seq_id(&sender()), Some(3));
    assert!(table.is_relevant(&MessageId::new("G", "S", 3)));
    assert!(!table.is_relevant(&MessageId::new("G", "S", 2)));
    assert!(table.is_relevant(&MessageId::new("G", "S", 9)));

    let report = table.missing_messages(now, RequestLimit::Unlimited, false, |_| false);
    let missing: Vec<u32> = report.missing.iter().map(|m| m.id.seq()).collect();
    assert_eq!(missing, vec![3]);
    assert!(report.missing[0].requirements.reliable);
}

#[rstest]
fn non_sequenced_unreliable_delivers_each_id_once(table: SubscriptionTable) {
    let delivered = arrive(
        &table,
        Discipline::NonSequencedUnreliable,
        &[5, 2, 5, 1, 2],
        Instant::now(),
    );
    assert_eq!(delivered, vec![5, 2, 1]);
    assert!(!table.is_relevant(&MessageId::new("G", "S", 5)));
    assert!(table.is_relevant(&MessageId::new("G", "S", 3)));
    assert_eq!(table.expected_seq_id(&sender()), Some(3));
}

#[rstest]
fn discipline_is_fixed_by_first_arrival(table: SubscriptionTable) {
    let now = Instant::now();
    arrive(&table, Discipline::SequencedUnreliable, &[1], now);
    arrive(&table, Discipline::NonSequencedUnreliable, &[1], now);
    assert_eq!(
        table.discipline(&sender()),
        Some(Discipline::SequencedUnreliable)
    );
}

#[rstest]
fn history_messages_bypass_ordering(table: SubscriptionTable) {
    let now = Instant::now();
    arrive(&table, Discipline::SequencedReliable, &[1, 2, 3], now);
    let replayed = table.message_arrived(delivery(1), Discipline::SequencedReliable, true, now);
    assert_eq!(seqs(&replayed), vec![1]);
    assert_eq!(table.expected_seq_id(&sender()), Some(4));
}

fn metadata(seq: u32) -> Delivery {
    let header = MessageHeader::new(MessageId::new("G", "S", seq), 10).with_metadata_length(4);
    Delivery::new(header, Bytes::from_static(b"meta"), DeliveryKind::Metadata)
}

fn kinds(deliveries: &[Delivery]) -> Vec<(u32, DeliveryKind)> {
    deliveries.iter().map(|d| (d.id().seq(), d.kind())).collect()
}

#[rstest]
fn sequenced_metadata_waits_for_predecessors(table: SubscriptionTable) {
    let now = Instant::now();
    let discipline = Discipline::SequencedReliable;
    assert_eq!(arrive(&table, discipline, &[1], now), vec![1]);
    assert!(table.message_arrived(metadata(3), discipline, false, now).is_empty());

    let released = table.message_arrived(delivery(2), discipline, false, now);
    assert_eq!(
        kinds(&released),
        vec![(2, DeliveryKind::Full), (3, DeliveryKind::Metadata)]
    );
    assert_eq!(table.expected_seq_id(&sender()), Some(3));
    assert!(table.is_relevant(&MessageId::new("G", "S", 3)));

    let released = table.message_arrived(delivery(3), discipline, false, now);
    assert_eq!(kinds(&released), vec![(3, DeliveryKind::Full)]);
    assert!(table.message_arrived(metadata(2), discipline, false, now).is_empty());
}

#[rstest]
fn metadata_at_the_watermark_is_released_at_once(table: SubscriptionTable) {
    let now = Instant::now();
    let released = table.message_arrived(metadata(1), Discipline::SequencedReliable, false, now);
    assert_eq!(kinds(&released), vec![(1, DeliveryKind::Metadata)]);
    assert_eq!(table.expected_seq_id(&sender()), Some(1));
}

#[rstest]
fn unsequenced_metadata_does_not_move_the_watermark(table: SubscriptionTable) {
    let now = Instant::now();
    let discipline = Discipline::NonSequencedReliable;
    arrive(&table, discipline, &[1], now);
    let released = table.message_arrived(metadata(5), discipline, false, now);
    assert_eq!(kinds(&released), vec![(5, DeliveryKind::Metadata)]);
    assert_eq!(table.expected_seq_id(&sender()), Some(2));
}

#[rstest]
#[case(Discipline::SequencedReliable)]
#[case(Discipline::SequencedUnreliable)]
#[case(Discipline::NonSequencedReliable)]
#[case(Discipline::NonSequencedUnreliable)]
fn late_joiner_starts_at_the_first_message_heard(#[case] discipline: Discipline) {
    let table = SubscriptionTable::new(&ReassemblerConfig::default());
    let now = Instant::now();
    assert_eq!(arrive(&table, discipline, &[1_000], now), vec![1_000]);
    assert_eq!(table.expected_seq_id(&sender()), Some(1_001));
    if discipline != Discipline::NonSequencedUnreliable {
        assert!(!table.is_relevant(&MessageId::new("G", "S", 999)));
    }

    let report = table.missing_messages(now, RequestLimit::Unlimited, false, |_| false);
    assert!(report.missing.is_empty());
    assert!(report.released.is_empty());
}

#[rstest]
fn late_joiner_still_orders_what_follows() {
    let table = SubscriptionTable::new(&ReassemblerConfig::default());
    let now = Instant::now();
    let delivered = arrive(&table, Discipline::SequencedReliable, &[500, 502, 501], now);
    assert_eq!(delivered, vec![500, 501, 502]);
}

#[rstest]
fn unsequenced_gap_tracking_is_bounded(table: SubscriptionTable) {
    let now = Instant::now();
    arrive(&table, Discipline::NonSequencedReliable, &[1, 10_000], now);
    assert_eq!(table.expected_seq_id(&sender()), Some(10_000 - 4_096));
    assert!(!table.is_relevant(&MessageId::new("G", "S", 2)));
    assert!(table.is_relevant(&MessageId::new("G", "S", 9_999)));

    let report = table.missing_messages(now, RequestLimit::Unlimited, false, |_| false);
    assert_eq!(report.missing.len(), 256);
    assert_eq!(report.missing[0].id.seq(), 10_000 - 4_096);
}

#[rstest]
fn chunks_are_delivered_once_each(table: SubscriptionTable) {
    let now = Instant::now();
    let chunk = |c| {
        let id = MessageId::new("G", "S", 7).with_chunk(ChunkId::new(c));
        Delivery::new(
            MessageHeader::new(id, 1),
            Bytes::from_static(b"c"),
            DeliveryKind::Full,
        )
    };
    let discipline = Discipline::SequencedReliable;
    assert_eq!(table.message_arrived(chunk(2), discipline, false, now).len(), 1);
    assert_eq!(table.message_arrived(chunk(1), discipline, false, now).len(), 1);
    assert!(table.message_arrived(chunk(2), discipline, false, now).is_empty());
    assert_eq!(
        table.delivered_chunks(&sender(), 7),
        vec![ChunkId::new(1), ChunkId::new(2)]
    );
    assert!(!table.is_relevant(&MessageId::new("G", "S", 7).with_chunk(ChunkId::new(1))));
    // Chunks never create an ordering state.
    assert_eq!(table.expected_seq_id(&sender()), None);
}

#[rstest]
fn gaps_skip_ids_already_in_progress(table: SubscriptionTable) {
    let now = Instant::now();
    arrive(&table, Discipline::SequencedReliable, &[1, 5], now);
    let report = table.missing_messages(now, RequestLimit::Unlimited, false, |id| id.seq() == 3);
    let missing: Vec<u32> = report.missing.iter().map(|m| m.id.seq()).collect();
    assert_eq!(missing, vec![2, 4]);
    assert!(report.missing.iter().all(|m| m.requirements.sequenced));
}

#[rstest]
fn exhausted_retry_budget_skips_the_gap(table: SubscriptionTable) {
    let now = Instant::now();
    arrive(&table, Discipline::SequencedReliable, &[1, 3, 4], now);
    let limit = RequestLimit::Limited(2);

    for round in 0..2 {
        let report = table.missing_messages(now, limit, false, |_| false);
        assert_eq!(report.missing.len(), 1, "round {round} requests id 2");
        assert!(report.released.is_empty());
    }
    let report = table.missing_messages(now, limit, false, |_| false);
    assert!(report.missing.is_empty());
    assert_eq!(seqs(&report.released), vec![3, 4]);
    assert_eq!(table.expected_seq_id(&sender()), Some(5));
}

#[test]
fn gap_is_skipped_after_time_budget() {
    let table = SubscriptionTable::new(&ReassemblerConfig {
        initial_sequence_id: Some(1),
        sequenced_skip_after: Some(Duration::from_secs(30)),
        ..ReassemblerConfig::default()
    });
    let start = Instant::now();
    arrive(&table, Discipline::SequencedReliable, &[1, 3], start);

    let early = table.missing_messages(
        start + Duration::from_secs(29),
        RequestLimit::Unlimited,
        false,
        |_| false,
    );
    assert!(early.released.is_empty());

    let late = table.missing_messages(
        start + Duration::from_secs(30),
        RequestLimit::Unlimited,
        false,
        |_| false,
    );
    assert_eq!(seqs(&late.released), vec![3]);
    assert!(late.missing.is_empty());
}

#[test]
fn backoff_suppresses_repeat_requests_until_new_peer() {
    let table = SubscriptionTable::new(&ReassemblerConfig {
        initial_sequence_id: Some(1),
        exponential_backoff: true,
        missing_fragment_timeout: Duration::from_secs(1),
        ..ReassemblerConfig::default()
    });
    let start = Instant::now();
    arrive(&table, Discipline::NonSequencedReliable, &[1, 3], start);

    let first = table.missing_messages(start, RequestLimit::Unlimited, false, |_| false);
    assert_eq!(first.missing.len(), 1);
    let soon = start + Duration::from_millis(500);
    assert!(
        table
            .missing_messages(soon, RequestLimit::Unlimited, false, |_| false)
            .missing
            .is_empty()
    );
    assert_eq!(
        table
            .missing_messages(soon, RequestLimit::Unlimited, true, |_| false)
            .missing
            .len(),
        1
    );
}
