//! Event multiplexer: decouples the acquisition thread from consumer callbacks.
//!
//! The acquisition thread only ever pushes into lock-free bounded queues and
//! rings a doorbell; it never waits on a consumer. Two delivery workers, one
//! for data and one for button/error events, drain the queues and run the
//! callbacks. Each worker passes through a [`DeliveryGate`] around every
//! callback so that once the gate is closed no new delivery can begin.
//!
//! When the data consumer falls behind, the oldest batch is evicted, counted
//! and reported as `BatchOverrun`; the next delivered batch carries the number
//! of batches dropped since the previous delivery.

use std::sync::Arc;
use std::sync::atomic::{AtomicU8, AtomicU64, Ordering};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crossbeam_channel as xch;
use crossbeam_queue::ArrayQueue;
use parking_lot::Mutex;

use crate::error::{DriverError, DriverResult};
use crate::events::{ButtonEvent, ErrorCode, ErrorEvent, ErrorSet, SampleBatch};
use crate::stats::{Stats, bump};

/// Button transitions buffered for the event consumer.
pub const BUTTON_QUEUE_CAPACITY: usize = 128;

/// Upper bound on how long a worker sleeps without a doorbell.
const IDLE_WAKE: Duration = Duration::from_millis(50);

pub type DataConsumer = Box<dyn FnMut(SampleBatch, u64) + Send>;
pub type ButtonConsumer = Box<dyn FnMut(ButtonEvent) + Send>;
pub type ErrorConsumer = Box<dyn FnMut(ErrorEvent) + Send>;

/// Event callbacks registered on the driver.
///
/// A worker takes a callback out for the duration of one call and puts it
/// back afterwards unless a new one was registered meanwhile; the lock is
/// never held while user code runs.
#[derive(Default)]
pub(crate) struct EventConsumers {
    pub button: Registration<ButtonConsumer>,
    pub error: Registration<ErrorConsumer>,
}

/// One callback slot. The generation changes on every registration so a
/// callback returned by a detached worker never displaces a newer one.
pub(crate) struct Registration<T> {
    current: Option<T>,
    generation: u64,
}

impl<T> Default for Registration<T> {
    fn default() -> Self {
        Self {
            current: None,
            generation: 0,
        }
    }
}

impl<T> Registration<T> {
    pub fn set(&mut self, cb: T) {
        self.current = Some(cb);
        self.generation += 1;
    }

    fn lend(&mut self) -> Option<(T, u64)> {
        self.current.take().map(|cb| (cb, self.generation))
    }

    fn give_back(&mut self, cb: T, generation: u64) {
        if self.generation == generation {
            self.current = Some(cb);
        }
    }
}

/// Run the registered callback for `event` without holding the lock.
fn call<E>(
    consumers: &Mutex<EventConsumers>,
    slot: fn(&mut EventConsumers) -> &mut Registration<Box<dyn FnMut(E) + Send>>,
    event: E,
) {
    let lent = slot(&mut consumers.lock()).lend();
    if let Some((mut cb, generation)) = lent {
        cb(event);
        slot(&mut consumers.lock()).give_back(cb, generation);
    }
}

/// Bounded FIFO that makes room by evicting its oldest element.
pub struct DropOldestQueue<T> {
    inner: ArrayQueue<T>,
}

impl<T> DropOldestQueue<T> {
    /// # Panics
    /// Never: a zero capacity is raised to one.
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: ArrayQueue::new(capacity.max(1)),
        }
    }

    /// Push `value`, returning the element evicted to make room, if any.
    pub fn push(&self, value: T) -> Option<T> {
        self.inner.force_push(value)
    }

    pub fn pop(&self) -> Option<T> {
        self.inner.pop()
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.inner.capacity()
    }

    /// Remove everything, returning how many elements were discarded.
    pub fn clear(&self) -> usize {
        let mut n = 0;
        while self.inner.pop().is_some() {
            n += 1;
        }
        n
    }
}

const OPEN: u8 = 0;
const DELIVERING: u8 = 1;
const CLOSED: u8 = 2;

/// Admission control around consumer callbacks.
///
/// `OPEN -> DELIVERING -> OPEN` brackets one callback; `close` moves to
/// `CLOSED` from either state and is never undone.
#[derive(Debug, Default)]
pub(crate) struct DeliveryGate {
    state: AtomicU8,
}

impl DeliveryGate {
    fn try_enter(&self) -> bool {
        self.state
            .compare_exchange(OPEN, DELIVERING, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    fn exit(&self) {
        // Fails only when closed mid-delivery, which must stay closed.
        let _ = self
            .state
            .compare_exchange(DELIVERING, OPEN, Ordering::AcqRel, Ordering::Acquire);
    }

    /// Close the gate. Returns `true` if a callback was in progress.
    fn close(&self) -> bool {
        self.state.swap(CLOSED, Ordering::AcqRel) == DELIVERING
    }

    fn is_closed(&self) -> bool {
        self.state.load(Ordering::Acquire) == CLOSED
    }
}

/// State shared by the producer and both workers for one activation.
struct Channels {
    batches: DropOldestQueue<SampleBatch>,
    buttons: DropOldestQueue<ButtonEvent>,
    errors: Mutex<ErrorSet>,
    dropped_since_delivery: AtomicU64,
    data_bell: xch::Sender<()>,
    event_bell: xch::Sender<()>,
    data_gate: DeliveryGate,
    event_gate: DeliveryGate,
    stats: Arc<Stats>,
}

#[inline]
fn ring(bell: &xch::Sender<()>) {
    // A full doorbell already guarantees a wakeup.
    let _ = bell.try_send(());
}

/// Producer half, owned by the acquisition thread. Never blocks.
#[derive(Clone)]
pub(crate) struct MuxProducer {
    ch: Arc<Channels>,
}

impl MuxProducer {
    pub(crate) fn publish_batch(&self, batch: SampleBatch) {
        if let Some(evicted) = self.ch.batches.push(batch) {
            self.ch.dropped_since_delivery.fetch_add(1, Ordering::AcqRel);
            bump(&self.ch.stats.dropped_batches);
            tracing::warn!(
                first_tick = evicted.first_tick(),
                rows = evicted.len(),
                "data consumer behind; dropped oldest batch"
            );
            self.report(
                ErrorCode::BatchOverrun,
                format!("dropped batch starting at tick {}", evicted.first_tick()),
            );
        }
        ring(&self.ch.data_bell);
    }

    pub(crate) fn publish_button(&self, event: ButtonEvent) {
        if let Some(evicted) = self.ch.buttons.push(event) {
            bump(&self.ch.stats.dropped_events);
            self.report(
                ErrorCode::EventOverrun,
                format!("dropped button transition {}", evicted.counter),
            );
        }
        ring(&self.ch.event_bell);
    }

    pub(crate) fn report(&self, code: ErrorCode, message: impl Into<String>) {
        self.ch.errors.lock().record(code, message);
        ring(&self.ch.event_bell);
    }

    #[cfg(test)]
    fn queued_batches(&self) -> usize {
        self.ch.batches.len()
    }
}

struct Worker {
    name: &'static str,
    handle: JoinHandle<()>,
    done: xch::Receiver<()>,
}

impl Worker {
    fn spawn<F>(name: &'static str, body: F) -> DriverResult<Self>
    where
        F: FnOnce() + Send + 'static,
    {
        let (done_tx, done) = xch::bounded::<()>(0);
        let handle = std::thread::Builder::new()
            .name(name.into())
            .spawn(move || {
                // Disconnects `done` when the thread ends, panics included.
                let _done = done_tx;
                body();
            })
            .map_err(|e| DriverError::AcquisitionFault(format!("spawn {name}: {e}")))?;
        Ok(Self { name, handle, done })
    }

    /// Join if the thread ends before `deadline`, otherwise detach it.
    fn finish(self, deadline: Instant) -> bool {
        match self.done.recv_deadline(deadline) {
            Err(xch::RecvTimeoutError::Timeout) => {
                tracing::warn!(worker = self.name, "consumer still busy; detaching worker");
                false
            }
            _ => {
                if self.handle.join().is_err() {
                    tracing::warn!(worker = self.name, "worker panicked");
                }
                true
            }
        }
    }
}

fn run_data_worker(ch: Arc<Channels>, bell: xch::Receiver<()>, mut consumer: DataConsumer) {
    loop {
        let _ = bell.recv_timeout(IDLE_WAKE);
        if ch.data_gate.is_closed() {
            break;
        }
        loop {
            // Claim the drop count before taking the batch so evictions that
            // race with this pop are reported with the next delivery.
            let dropped = ch.dropped_since_delivery.swap(0, Ordering::AcqRel);
            let Some(batch) = ch.batches.pop() else {
                if dropped > 0 {
                    ch.dropped_since_delivery.fetch_add(dropped, Ordering::AcqRel);
                }
                break;
            };
            if !ch.data_gate.try_enter() {
                return;
            }
            let rows = batch.len() as u64;
            consumer(batch, dropped);
            ch.data_gate.exit();
            ch.stats.rows_delivered.fetch_add(rows, Ordering::Relaxed);
            bump(&ch.stats.batches_delivered);
        }
    }
    tracing::trace!("data worker exiting");
}

fn run_event_worker(
    ch: Arc<Channels>,
    bell: xch::Receiver<()>,
    consumers: Arc<Mutex<EventConsumers>>,
) {
    loop {
        let _ = bell.recv_timeout(IDLE_WAKE);
        if ch.event_gate.is_closed() {
            break;
        }
        while let Some(event) = ch.buttons.pop() {
            if !ch.event_gate.try_enter() {
                return;
            }
            call(&consumers, |c| &mut c.button, event);
            ch.event_gate.exit();
        }
        let pending = ch.errors.lock().take();
        if let Some(event) = pending {
            if !ch.event_gate.try_enter() {
                return;
            }
            call(&consumers, |c| &mut c.error, event);
            ch.event_gate.exit();
        }
    }
    tracing::trace!("event worker exiting");
}

/// Whether consumers may currently receive deliveries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MuxState {
    Idle,
    Active,
}

struct Active {
    ch: Arc<Channels>,
    data: Worker,
    events: Worker,
}

/// Outcome of [`EventMux::deactivate`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct Deactivation {
    /// Workers that did not finish before the deadline.
    pub detached: usize,
    /// Batches still queued and discarded.
    pub discarded_batches: usize,
}

pub(crate) struct EventMux {
    active: Option<Active>,
}

impl EventMux {
    pub(crate) fn new() -> Self {
        Self { active: None }
    }

    #[cfg(test)]
    pub(crate) fn state(&self) -> MuxState {
        if self.active.is_some() {
            MuxState::Active
        } else {
            MuxState::Idle
        }
    }

    /// Spawn the delivery workers and return the producer half.
    pub(crate) fn activate(
        &mut self,
        queue_capacity: usize,
        data: DataConsumer,
        consumers: Arc<Mutex<EventConsumers>>,
        stats: Arc<Stats>,
    ) -> DriverResult<MuxProducer> {
        if self.active.is_some() {
            return Err(DriverError::AlreadyRunning);
        }
        let (data_bell, data_rx) = xch::bounded(1);
        let (event_bell, event_rx) = xch::bounded(1);
        let ch = Arc::new(Channels {
            batches: DropOldestQueue::new(queue_capacity),
            buttons: DropOldestQueue::new(BUTTON_QUEUE_CAPACITY),
            errors: Mutex::new(ErrorSet::default()),
            dropped_since_delivery: AtomicU64::new(0),
            data_bell,
            event_bell,
            data_gate: DeliveryGate::default(),
            event_gate: DeliveryGate::default(),
            stats,
        });

        let data_ch = Arc::clone(&ch);
        let data = Worker::spawn("timeswipe-data", move || {
            run_data_worker(data_ch, data_rx, data);
        })?;
        let event_ch = Arc::clone(&ch);
        let events = match Worker::spawn("timeswipe-events", move || {
            run_event_worker(event_ch, event_rx, consumers);
        }) {
            Ok(w) => w,
            Err(e) => {
                ch.data_gate.close();
                ring(&ch.data_bell);
                data.finish(Instant::now() + IDLE_WAKE);
                return Err(e);
            }
        };

        let producer = MuxProducer {
            ch: Arc::clone(&ch),
        };
        self.active = Some(Active { ch, data, events });
        Ok(producer)
    }

    /// Stop all deliveries. After this returns no callback starts again.
    /// Workers still inside a callback at `deadline` are detached.
    pub(crate) fn deactivate(&mut self, deadline: Instant) -> Deactivation {
        let Some(Active { ch, data, events }) = self.active.take() else {
            return Deactivation::default();
        };
        let data_busy = ch.data_gate.close();
        let event_busy = ch.event_gate.close();
        if data_busy || event_busy {
            tracing::debug!(data_busy, event_busy, "closing gates during delivery");
        }
        ring(&ch.data_bell);
        ring(&ch.event_bell);

        let detached = [data, events]
            .into_iter()
            .map(|w| w.finish(deadline))
            .filter(|joined| !joined)
            .count();
        let discarded_batches = ch.batches.clear();
        ch.buttons.clear();
        if discarded_batches > 0 {
            tracing::debug!(discarded_batches, "discarded undelivered batches");
        }
        Deactivation {
            detached,
            discarded_batches,
        }
    }
}

impl Drop for EventMux {
    fn drop(&mut self) {
        self.deactivate(Instant::now() + IDLE_WAKE);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn batch(tick: u64) -> SampleBatch {
        SampleBatch::new(tick, vec![[tick as f64; 4]])
    }

    #[test]
    fn drop_oldest_queue_evicts_front() {
        let q = DropOldestQueue::new(2);
        assert_eq!(q.push(1), None);
        assert_eq!(q.push(2), None);
        assert_eq!(q.push(3), Some(1));
        assert_eq!(q.len(), 2);
        assert_eq!(q.pop(), Some(2));
        assert_eq!(q.clear(), 1);
        assert!(q.is_empty());
    }

    #[test]
    fn gate_blocks_after_close() {
        let g = DeliveryGate::default();
        assert!(g.try_enter());
        assert!(g.close());
        g.exit();
        assert!(g.is_closed());
        assert!(!g.try_enter());
    }

    #[test]
    fn slow_consumer_gets_drop_count() {
        let mut mux = EventMux::new();
        let stats = Arc::new(Stats::default());
        let (gate_tx, gate_rx) = xch::bounded::<()>(0);
        let (seen_tx, seen_rx) = xch::unbounded();
        let producer = mux
            .activate(
                2,
                Box::new(move |b: SampleBatch, dropped| {
                    let _ = seen_tx.send((b.first_tick(), dropped));
                    let _ = gate_rx.recv();
                }),
                Arc::new(Mutex::new(EventConsumers::default())),
                Arc::clone(&stats),
            )
            .unwrap();

        // First batch is taken by the worker, which then blocks in the callback.
        producer.publish_batch(batch(0));
        assert_eq!(seen_rx.recv_timeout(Duration::from_secs(2)).unwrap(), (0, 0));
        for t in 1..=4 {
            producer.publish_batch(batch(t));
            assert!(producer.queued_batches() <= 2);
        }
        assert_eq!(stats.dropped_batches.load(Ordering::Relaxed), 2);

        gate_tx.send(()).unwrap();
        assert_eq!(seen_rx.recv_timeout(Duration::from_secs(2)).unwrap(), (3, 2));
        gate_tx.send(()).unwrap();
        assert_eq!(seen_rx.recv_timeout(Duration::from_secs(2)).unwrap(), (4, 0));
        gate_tx.send(()).unwrap();
        mux.deactivate(Instant::now() + Duration::from_secs(1));
        assert_eq!(mux.state(), MuxState::Idle);
    }

    #[test]
    fn new_registration_survives_a_detached_callback() {
        let mut mux = EventMux::new();
        let consumers = Arc::new(Mutex::new(EventConsumers::default()));
        let (entered_tx, entered_rx) = xch::bounded::<()>(1);
        let (release_tx, release_rx) = xch::unbounded::<()>();
        let old_calls = Arc::new(AtomicUsize::new(0));
        let oc = Arc::clone(&old_calls);
        consumers.lock().button.set(Box::new(move |_: ButtonEvent| {
            oc.fetch_add(1, Ordering::SeqCst);
            let _ = entered_tx.try_send(());
            let _ = release_rx.recv();
        }));
        let producer = mux
            .activate(
                4,
                Box::new(|_, _| {}),
                Arc::clone(&consumers),
                Arc::new(Stats::default()),
            )
            .unwrap();
        producer.publish_button(ButtonEvent {
            pressed: true,
            counter: 1,
        });
        entered_rx.recv_timeout(Duration::from_secs(2)).unwrap();
        let report = mux.deactivate(Instant::now() + Duration::from_millis(200));
        assert_eq!(report.detached, 1);

        // Registration must not wait for the stuck callback.
        let (tx, rx) = xch::unbounded();
        let t0 = Instant::now();
        consumers.lock().button.set(Box::new(move |e: ButtonEvent| {
            let _ = tx.send(e);
        }));
        assert!(t0.elapsed() < Duration::from_millis(100));
        release_tx.send(()).unwrap();
        std::thread::sleep(Duration::from_millis(100));

        let producer = mux
            .activate(
                4,
                Box::new(|_, _| {}),
                Arc::clone(&consumers),
                Arc::new(Stats::default()),
            )
            .unwrap();
        producer.publish_button(ButtonEvent {
            pressed: false,
            counter: 2,
        });
        let ev = rx.recv_timeout(Duration::from_secs(2)).unwrap();
        assert_eq!((ev.pressed, ev.counter), (false, 2));
        mux.deactivate(Instant::now() + Duration::from_secs(1));
        assert_eq!(old_calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn errors_are_coalesced_per_delivery() {
        let mut mux = EventMux::new();
        let (tx, rx) = xch::unbounded();
        let mut registered = EventConsumers::default();
        registered.error.set(Box::new(move |e: ErrorEvent| {
            let _ = tx.send(e);
        }));
        let consumers = Arc::new(Mutex::new(registered));
        let producer = mux
            .activate(4, Box::new(|_, _| {}), consumers, Arc::new(Stats::default()))
            .unwrap();
        producer.report(ErrorCode::AcquisitionFault, "x");
        let ev = rx.recv_timeout(Duration::from_secs(2)).unwrap();
        assert!(ev.contains(ErrorCode::AcquisitionFault));
        mux.deactivate(Instant::now() + Duration::from_secs(1));
    }

    #[test]
    fn nothing_delivered_after_deactivate() {
        let mut mux = EventMux::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&calls);
        let producer = mux
            .activate(
                4,
                Box::new(move |_, _| {
                    c.fetch_add(1, Ordering::SeqCst);
                }),
                Arc::new(Mutex::new(EventConsumers::default())),
                Arc::new(Stats::default()),
            )
            .unwrap();
        mux.deactivate(Instant::now() + Duration::from_secs(1));
        let before = calls.load(Ordering::SeqCst);
        producer.publish_batch(batch(9));
        std::thread::sleep(Duration::from_millis(100));
        assert_eq!(calls.load(Ordering::SeqCst), before);
    }
}
