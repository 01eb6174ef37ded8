//! Wisdom consolidation across a group, end to end.

use pencilfft::comm::{Communicator, LocalGroup, ThreadLevel};
use pencilfft::fft::ScalarFft;
use pencilfft::wisdom::{broadcast_wisdom, export_wisdom, gather_wisdom, import_wisdom, WisdomError};

#[test]
fn gather_then_broadcast_converges_every_rank() {
    for size in [2usize, 3, 4, 7] {
        let code = LocalGroup::run(size, ThreadLevel::Multiple, move |comm| {
            let fft = ScalarFft::<f64>::default();
            // Disjoint per-rank knowledge, two lengths each.
            fft.plan(8 + comm.rank());
            fft.plan(100 + comm.rank());
            let ranks: Vec<usize> = (0..comm.size()).collect();
            gather_wisdom(&comm, &fft, &ranks).unwrap();
            broadcast_wisdom(&comm, &fft, &ranks).unwrap();
            let mut expected: Vec<usize> = (0..size).map(|r| 8 + r).collect();
            expected.extend((0..size).map(|r| 100 + r));
            expected.sort_unstable();
            assert_eq!(fft.planned_sizes(), expected);
            0
        });
        assert_eq!(code, 0, "group size {size}");
    }
}

#[test]
fn wisdom_survives_an_export_import_cycle_between_planners() {
    let donor = ScalarFft::<f64>::default();
    donor.plan(64);
    donor.plan(48);
    let blob = export_wisdom(&donor);
    let receiver = ScalarFft::<f64>::default();
    import_wisdom(&receiver, &blob).unwrap();
    assert_eq!(receiver.planned_sizes(), vec![48, 64]);
    // Importing is a merge, not a replacement.
    receiver.plan(12);
    import_wisdom(&receiver, &blob).unwrap();
    assert_eq!(receiver.planned_sizes(), vec![12, 48, 64]);
}

#[test]
fn tampered_blob_is_fatal_to_the_import() {
    let donor = ScalarFft::<f64>::default();
    donor.plan(32);
    let mut blob = export_wisdom(&donor);
    // Flip one payload byte: the checksum must catch it.
    let last = blob.len() - 1;
    blob[last] ^= 0x01;
    let receiver = ScalarFft::<f64>::default();
    assert_eq!(import_wisdom(&receiver, &blob), Err(WisdomError::Checksum));
    // Nothing was planned from the bad blob.
    assert!(receiver.planned_sizes().is_empty());
}

#[test]
fn empty_wisdom_blobs_merge_harmlessly() {
    let code = LocalGroup::run(3, ThreadLevel::Multiple, |comm| {
        let fft = ScalarFft::<f64>::default();
        let ranks: Vec<usize> = (0..comm.size()).collect();
        gather_wisdom(&comm, &fft, &ranks).unwrap();
        broadcast_wisdom(&comm, &fft, &ranks).unwrap();
        assert!(fft.planned_sizes().is_empty());
        0
    });
    assert_eq!(code, 0);
}
