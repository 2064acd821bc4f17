//! Subcommands that drive the acquisition engine.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use eyre::WrapErr;
use shared::Latest;
use serde_json::json;
use timeswipe_core::{
    ButtonEvent, CHANNELS, Driver, DriverError, ErrorEvent, RawRow, SampleBatch, StreamStats,
};

use crate::cli::RtLock;
use crate::rt::setup_rt_once;

/// How often the main thread checks for Ctrl-C and the deadline.
const POLL: Duration = Duration::from_millis(20);
const SELF_CHECK_TIMEOUT: Duration = Duration::from_secs(2);

pub struct StreamArgs {
    pub seconds: f64,
    pub bridge: Option<i64>,
    pub stats: bool,
    pub rt: bool,
    pub rt_prio: Option<i32>,
    pub rt_lock: RtLock,
    pub rt_cpu: Option<usize>,
}

fn mean(rows: &[RawRow]) -> [f64; CHANNELS] {
    let mut acc = [0.0; CHANNELS];
    for r in rows {
        for (a, v) in acc.iter_mut().zip(r) {
            *a += v;
        }
    }
    let n = rows.len().max(1) as f64;
    acc.map(|a| a / n)
}

fn print_batch(json_mode: bool, b: &SampleBatch, dropped: u64) {
    let m = mean(b.rows());
    if json_mode {
        println!(
            "{}",
            json!({
                "type": "batch",
                "first_tick": b.first_tick(),
                "rows": b.len(),
                "dropped": dropped,
                "mean": m,
            })
        );
    } else {
        println!(
            "batch tick={} rows={} dropped={} mean=[{:.3}, {:.3}, {:.3}, {:.3}]",
            b.first_tick(),
            b.len(),
            dropped,
            m[0],
            m[1],
            m[2],
            m[3]
        );
    }
}

fn print_button(json_mode: bool, e: ButtonEvent) {
    if json_mode {
        println!(
            "{}",
            json!({ "type": "button", "pressed": e.pressed, "counter": e.counter })
        );
    } else {
        let what = if e.pressed { "pressed" } else { "released" };
        println!("button {what} (#{})", e.counter);
    }
}

fn print_errors(json_mode: bool, e: &ErrorEvent) {
    if json_mode {
        let entries: Vec<_> = e
            .entries()
            .iter()
            .map(|x| json!({ "code": x.code.as_str(), "count": x.count, "message": x.message }))
            .collect();
        println!("{}", json!({ "type": "errors", "entries": entries }));
    } else {
        for x in e.entries() {
            println!("error {} x{}: {}", x.code, x.count, x.message);
        }
    }
}

fn print_stats(json_mode: bool, s: &StreamStats) {
    if json_mode {
        println!(
            "{}",
            json!({
                "type": "stats",
                "ticks": s.ticks,
                "rows_delivered": s.rows_delivered,
                "batches_delivered": s.batches_delivered,
                "discarded_ticks": s.discarded_ticks,
                "faults": s.faults,
                "incomplete_ticks": s.incomplete_ticks,
                "dropped_batches": s.dropped_batches,
                "dropped_events": s.dropped_events,
                "late_ticks": s.late_ticks,
            })
        );
    } else {
        eprintln!(
            "stats: ticks={} rows={} batches={} discarded={} faults={} incomplete={} dropped_batches={} dropped_events={} late={}",
            s.ticks,
            s.rows_delivered,
            s.batches_delivered,
            s.discarded_ticks,
            s.faults,
            s.incomplete_ticks,
            s.dropped_batches,
            s.dropped_events,
            s.late_ticks
        );
    }
}

fn register_event_printers(driver: &Driver, json_mode: bool) -> eyre::Result<()> {
    driver.on_button(move |e| print_button(json_mode, e))?;
    driver.on_error(move |e| print_errors(json_mode, &e))?;
    Ok(())
}

pub fn run_stream(
    driver: &Driver,
    args: &StreamArgs,
    json_mode: bool,
    shutdown: &Arc<AtomicBool>,
) -> eyre::Result<()> {
    if !(args.seconds.is_finite() && args.seconds > 0.0) {
        return Err(eyre::Report::new(DriverError::InvalidArgument(format!(
            "--seconds must be > 0, got {}",
            args.seconds
        ))));
    }
    if let Some(b) = args.bridge {
        driver.set_bridge(b)?;
    }
    setup_rt_once(args.rt, args.rt_prio, args.rt_lock, args.rt_cpu);
    register_event_printers(driver, json_mode)?;

    let batches = Arc::new(AtomicU64::new(0));
    let rows = Arc::new(AtomicU64::new(0));
    let (b, r) = (Arc::clone(&batches), Arc::clone(&rows));
    driver.start(move |batch, dropped| {
        b.fetch_add(1, Ordering::Relaxed);
        r.fetch_add(batch.len() as u64, Ordering::Relaxed);
        print_batch(json_mode, &batch, dropped);
    })?;

    let started = Instant::now();
    let run_for = Duration::from_secs_f64(args.seconds);
    while started.elapsed() < run_for && !shutdown.load(Ordering::Relaxed) {
        std::thread::sleep(POLL);
    }
    let interrupted = shutdown.load(Ordering::Relaxed);
    driver.stop()?;

    let elapsed_ms = started.elapsed().as_millis() as u64;
    let (nb, nr) = (batches.load(Ordering::Relaxed), rows.load(Ordering::Relaxed));
    if json_mode {
        println!(
            "{}",
            json!({
                "type": "summary",
                "batches": nb,
                "rows": nr,
                "elapsed_ms": elapsed_ms,
                "interrupted": interrupted,
            })
        );
    } else {
        println!("stream complete: {nb} batches, {nr} rows in {elapsed_ms} ms");
        if interrupted {
            println!("(stopped by Ctrl-C)");
        }
    }
    if args.stats {
        print_stats(json_mode, &driver.stats());
    }
    Ok(())
}

pub fn run_settings(driver: &Driver, document: &str) -> eyre::Result<()> {
    let doc: serde_json::Value =
        serde_json::from_str(document).wrap_err("settings document is not valid JSON")?;
    let answer = driver.set_settings(&doc)?;
    println!("{answer}");
    Ok(())
}

pub fn self_check(driver: &Driver, json_mode: bool) -> eyre::Result<()> {
    let first = Latest::default();
    let last_error = Latest::default();
    {
        let last_error = last_error.clone();
        driver.on_error(move |e: ErrorEvent| {
            if let Some(x) = e.entries().last() {
                last_error.put(format!("{}: {}", x.code, x.message));
            }
        })?;
    }
    let sink = first.clone();
    driver.start(move |batch, _| {
        if let Some(row) = batch.rows().first() {
            sink.put(*row);
        }
    })?;
    let deadline = Instant::now() + SELF_CHECK_TIMEOUT;
    while first.peek().is_none() && Instant::now() < deadline {
        std::thread::sleep(POLL);
    }
    driver.stop()?;

    let Some(row) = first.peek() else {
        let detail = last_error
            .peek()
            .unwrap_or_else(|| "no error reported".to_string());
        let err = if detail.contains("ConfigurationIncomplete") {
            DriverError::ConfigurationIncomplete(detail)
        } else {
            DriverError::AcquisitionFault(format!(
                "sensor did not deliver data within {} ms; last error: {detail}",
                SELF_CHECK_TIMEOUT.as_millis()
            ))
        };
        return Err(eyre::Report::new(err));
    };
    let acq = driver.acquisition();
    if json_mode {
        println!(
            "{}",
            json!({
                "type": "self_check",
                "ok": true,
                "sample_rate_hz": acq.sample_rate_hz,
                "batch_rows": acq.batch_rows,
                "first_row": row,
            })
        );
    } else {
        println!(
            "self-check ok: {} Hz, {} rows/batch, first row {:?}",
            acq.sample_rate_hz, acq.batch_rows, row
        );
    }
    Ok(())
}

/// Tiny shared slot for values produced on a consumer thread.
mod shared {
    use std::sync::{Arc, Mutex};

    #[derive(Clone)]
    pub struct Latest<T>(Arc<Mutex<Option<T>>>);

    impl<T> Default for Latest<T> {
        fn default() -> Self {
            Self(Arc::new(Mutex::new(None)))
        }
    }

    impl<T: Clone> Latest<T> {
        pub fn put(&self, v: T) {
            if let Ok(mut g) = self.0.lock() {
                *g = Some(v);
            }
        }

        pub fn peek(&self) -> Option<T> {
            self.0.lock().ok().and_then(|g| g.clone())
        }
    }
}
