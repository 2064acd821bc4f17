//! A slow data consumer costs dropped batches, never memory or sampling ticks.

use std::time::Duration;

use crossbeam_channel as xch;
use proptest::prelude::*;
use timeswipe_core::mocks::ScriptedFrontend;
use timeswipe_core::{AcquisitionCfg, CalibrationPreset, Driver, DropOldestQueue, ErrorCode};

proptest! {
    #[test]
    fn queue_never_exceeds_capacity_and_keeps_newest(
        cap in 1usize..16,
        n in 0usize..64,
    ) {
        let q = DropOldestQueue::new(cap);
        let mut evicted = Vec::new();
        for i in 0..n {
            if let Some(old) = q.push(i) {
                evicted.push(old);
            }
            prop_assert!(q.len() <= cap);
        }
        let kept: Vec<usize> = std::iter::from_fn(|| q.pop()).collect();
        let expect_kept: Vec<usize> = (n.saturating_sub(cap)..n).collect();
        prop_assert_eq!(kept, expect_kept);
        let expect_evicted: Vec<usize> = (0..n.saturating_sub(cap)).collect();
        prop_assert_eq!(evicted, expect_evicted);
    }
}

#[test]
fn slow_consumer_is_told_how_many_batches_were_dropped() {
    let d = Driver::builder()
        .with_frontend(ScriptedFrontend::constant([0.0; 4]))
        .with_acquisition(AcquisitionCfg {
            sample_rate_hz: 4000,
            batch_rows: 4,
            queue_capacity: 2,
            ..AcquisitionCfg::default()
        })
        .with_calibration(CalibrationPreset::identity())
        .build()
        .unwrap();
    let (etx, erx) = xch::unbounded();
    d.on_error(move |e| {
        let _ = etx.send(e);
    })
    .unwrap();

    let (tx, rx) = xch::unbounded();
    d.start(move |b, dropped| {
        std::thread::sleep(Duration::from_millis(20));
        let _ = tx.send((b.first_tick(), dropped));
    })
    .unwrap();

    let mut reported = 0u64;
    let mut firsts = Vec::new();
    for _ in 0..5 {
        let (first, dropped) = rx.recv_timeout(Duration::from_secs(3)).unwrap();
        reported += dropped;
        firsts.push(first);
    }
    d.stop().unwrap();

    assert!(reported > 0);
    assert!(firsts.windows(2).all(|w| w[1] > w[0]), "{firsts:?}");
    let stats = d.stats();
    assert!(stats.dropped_batches >= reported);
    let mut overrun = false;
    while let Ok(ev) = erx.try_recv() {
        overrun |= ev.contains(ErrorCode::BatchOverrun);
    }
    assert!(overrun);
}
