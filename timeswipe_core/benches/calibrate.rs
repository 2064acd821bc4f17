use criterion::{BatchSize, Criterion, black_box, criterion_group, criterion_main};
use timeswipe_core::calibration::calibrate;
use timeswipe_core::settings::{SettingsStore, StreamParams};
use timeswipe_core::{AcquisitionCfg, RawRow};

// Sine-like counts around mid-scale
fn synth_rows(n: usize) -> Vec<RawRow> {
    (0..n)
        .map(|i| {
            let t = i as f64 / 1000.0;
            std::array::from_fn(|ch| 32_767.0 + 3_276.0 * (t * (ch + 1) as f64).sin())
        })
        .collect()
}

fn bench_calibrate(c: &mut Criterion) {
    let store = SettingsStore::new(StreamParams::from(&AcquisitionCfg::default()));
    store.set_offsets([32_767.0; 4]).unwrap();
    store.set_gains([1.0 / 32_768.0; 4]).unwrap();
    store.set_transmissions([10.0, 10.0, 2.5, 2.5]).unwrap();
    let rows = synth_rows(1000);

    c.bench_function("calibrate_1000_rows", |b| {
        b.iter_batched(
            || store.snapshot(),
            |snap| {
                let mut acc = 0.0;
                for r in &rows {
                    if let Ok(out) = calibrate(black_box(r), &snap) {
                        acc += out[0];
                    }
                }
                black_box(acc)
            },
            BatchSize::SmallInput,
        )
    });

    c.bench_function("snapshot_per_tick", |b| {
        b.iter(|| black_box(store.snapshot().bridge_epoch))
    });
}

criterion_group!(benches, bench_calibrate);
criterion_main!(benches);
