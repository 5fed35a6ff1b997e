//! Tests for the coverage scan and byte reassembly.

use bytes::Bytes;
use rstest::rstest;

use super::{pattern, slice};
use crate::{
    fragment::{Completeness, FragmentRecord, ReassemblyError, completeness},
    message::MessageId,
};

fn records(payload: &[u8], spans: &[(u32, u32)]) -> Vec<FragmentRecord> {
    let mut held: Vec<FragmentRecord> = spans
        .iter()
        .map(|&(offset, length)| slice(payload, offset, length))
        .collect();
    held.sort_by_key(FragmentRecord::offset);
    held
}

fn union(spans: &[(u32, u32)]) -> u32 {
    let mut set = crate::range::RangeSet::new();
    for &(offset, length) in spans {
        set.insert_range(crate::range::ByteRange::new(offset, offset + length));
    }
    u32::try_from(set.covered()).expect("small")
}

#[test]
fn zero_length_message_is_dummy() {
    assert_eq!(
        completeness::classify(std::iter::empty(), 0, None, 0),
        Completeness::Dummy
    );
}

#[rstest]
#[case(&[(0, 100), (100, 100), (200, 100)], Completeness::Complete)]
#[case(&[(0, 150), (100, 200)], Completeness::Complete)]
#[case(&[(0, 100), (200, 100)], Completeness::Incomplete)]
#[case(&[(100, 200)], Completeness::Incomplete)]
#[case(&[(0, 299)], Completeness::Incomplete)]
#[case(&[(0, 200), (50, 50), (150, 150)], Completeness::Complete)]
fn classifies_without_metadata(#[case] spans: &[(u32, u32)], #[case] expected: Completeness) {
    let payload = pattern(300);
    let held = records(&payload, spans);
    assert_eq!(
        completeness::classify(&held, 300, None, union(spans)),
        expected
    );
}

#[rstest]
#[case(&[(0, 40)], Completeness::MetadataComplete)]
#[case(&[(0, 20), (20, 30)], Completeness::MetadataComplete)]
#[case(&[(0, 20), (30, 30)], Completeness::Incomplete)]
#[case(&[(0, 100)], Completeness::Complete)]
fn classifies_metadata_prefix(#[case] spans: &[(u32, u32)], #[case] expected: Completeness) {
    let payload = pattern(100);
    let held = records(&payload, spans);
    assert_eq!(
        completeness::classify(&held, 100, Some(40), union(spans)),
        expected
    );
}

#[test]
fn scan_is_skipped_when_too_few_bytes_are_held() {
    let payload = pattern(10);
    let held = records(&payload, &[(0, 10)]);
    // An understated byte count short-circuits before the scan.
    assert_eq!(
        completeness::classify(&held, 10, None, 9),
        Completeness::Incomplete
    );
}

#[test]
fn reassembly_trims_overlap_and_truncates_tail() {
    let payload = pattern(300);
    let mut held = records(&payload, &[(0, 150), (100, 150)]);
    let mut tail = payload[250..].to_vec();
    tail.extend_from_slice(b"trailing junk");
    held.push(FragmentRecord::new(250, false, Bytes::from(tail)));

    let id = MessageId::new("G", "S", 1);
    let buffer = completeness::reassemble(&id, &held, 300).expect("complete coverage");
    assert_eq!(buffer, payload);
}

#[test]
fn reassembly_of_prefix_stops_at_requested_length() {
    let payload = pattern(100);
    let held = records(&payload, &[(0, 30), (30, 30)]);
    let id = MessageId::new("G", "S", 1);
    let buffer = completeness::reassemble(&id, &held, 40).expect("prefix covered");
    assert_eq!(buffer, payload[..40]);
}

#[test]
fn reassembly_reports_first_hole() {
    let payload = pattern(100);
    let held = records(&payload, &[(0, 30), (50, 50)]);
    let id = MessageId::new("G", "S", 1);
    let err = completeness::reassemble(&id, &held, 100).expect_err("gap must fail");
    assert_eq!(err, ReassemblyError::MissingFragment { id, at: 30 });
}
