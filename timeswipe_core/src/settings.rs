//! Settings store: calibration and routing state shared by the command path
//! and the acquisition tick.
//!
//! Writers build a new `Snapshot` and swap it in under a short write lock;
//! the tick clones the current `Arc<Snapshot>` once and never sees a
//! half-applied update.
//!
//! Settings documents are JSON objects mapping a key to either a literal
//! value or the query placeholder `"?"`:
//!
//! | key            | value                   | writable |
//! |----------------|-------------------------|----------|
//! | `Bridge`       | `0` or `1`              | yes      |
//! | `Offset`       | 4 finite numbers        | yes      |
//! | `Gain`         | 4 finite non-zero       | yes      |
//! | `Transmission` | 4 finite non-zero       | yes      |
//! | `SampleRate`   | Hz, 1..=48000           | stopped  |
//! | `BurstSize`    | rows per batch, >= 1    | stopped  |
//! | `SettlingTicks`| ticks                   | no       |
//! | `QueueCapacity`| batches                 | no       |
//! | `Channels`     | channel count           | no       |
//!
//! `SampleRate` and `BurstSize` shape the next stream and are frozen while
//! one runs.

use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use serde_json::{Map, Value};
use timeswipe_traits::{Bridge, CHANNELS};

use crate::builder::MAX_SAMPLE_RATE_HZ;
use crate::config::{AcquisitionCfg, CalibrationPreset};
use crate::error::{DriverError, DriverResult};

pub const QUERY: &str = "?";
pub const UNKNOWN: &str = "!unknown";

pub const KEY_BRIDGE: &str = "Bridge";
pub const KEY_OFFSET: &str = "Offset";
pub const KEY_GAIN: &str = "Gain";
pub const KEY_TRANSMISSION: &str = "Transmission";
pub const KEY_SAMPLE_RATE: &str = "SampleRate";
pub const KEY_BURST_SIZE: &str = "BurstSize";
pub const KEY_SETTLING_TICKS: &str = "SettlingTicks";
pub const KEY_QUEUE_CAPACITY: &str = "QueueCapacity";
pub const KEY_CHANNELS: &str = "Channels";

/// Immutable view of the settings at one instant.
#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot {
    pub bridge: Bridge,
    /// Bumped by every `set_bridge`; the sampler arms its settling guard
    /// whenever it observes a new value.
    pub bridge_epoch: u64,
    pub offsets: [f64; CHANNELS],
    pub gains: Option<[f64; CHANNELS]>,
    pub transmissions: Option<[f64; CHANNELS]>,
}

impl Default for Snapshot {
    fn default() -> Self {
        Self {
            bridge: Bridge::Off,
            bridge_epoch: 0,
            offsets: [0.0; CHANNELS],
            gains: None,
            transmissions: None,
        }
    }
}

/// Acquisition parameters reported through settings documents.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamParams {
    pub sample_rate_hz: u32,
    pub batch_rows: usize,
    pub settling_ticks: u32,
    pub queue_capacity: usize,
}

impl From<&AcquisitionCfg> for StreamParams {
    fn from(c: &AcquisitionCfg) -> Self {
        Self {
            sample_rate_hz: c.sample_rate_hz,
            batch_rows: c.batch_rows,
            settling_ticks: c.settling_ticks,
            queue_capacity: c.queue_capacity,
        }
    }
}

/// Largest accepted `BurstSize`.
pub const MAX_BURST_SIZE: usize = 1_000_000;

/// A validated assignment from a settings document.
#[derive(Debug, Clone, Copy, PartialEq)]
enum Assignment {
    Bridge(Bridge),
    Offsets([f64; CHANNELS]),
    Gains([f64; CHANNELS]),
    Transmissions([f64; CHANNELS]),
    SampleRate(u32),
    BurstSize(usize),
}

impl Assignment {
    /// Key of an assignment that changes the stream shape.
    fn shape_key(self) -> Option<&'static str> {
        match self {
            Assignment::SampleRate(_) => Some(KEY_SAMPLE_RATE),
            Assignment::BurstSize(_) => Some(KEY_BURST_SIZE),
            _ => None,
        }
    }

    fn apply(self, snap: &mut Snapshot, shape: &mut StreamParams) {
        match self {
            Assignment::Bridge(b) => {
                snap.bridge = b;
                snap.bridge_epoch = snap.bridge_epoch.wrapping_add(1);
            }
            Assignment::Offsets(v) => snap.offsets = v,
            Assignment::Gains(v) => snap.gains = Some(v),
            Assignment::Transmissions(v) => snap.transmissions = Some(v),
            Assignment::SampleRate(hz) => shape.sample_rate_hz = hz,
            Assignment::BurstSize(rows) => shape.batch_rows = rows,
        }
    }
}

/// Stream shape plus whether a running stream has frozen it.
#[derive(Debug)]
struct Shape {
    params: StreamParams,
    frozen: bool,
}

#[derive(Debug)]
pub struct SettingsStore {
    current: RwLock<Arc<Snapshot>>,
    shape: Mutex<Shape>,
}

impl SettingsStore {
    pub fn new(params: StreamParams) -> Self {
        Self {
            current: RwLock::new(Arc::new(Snapshot::default())),
            shape: Mutex::new(Shape {
                params,
                frozen: false,
            }),
        }
    }

    /// Current settings; cheap enough to call once per tick.
    #[inline]
    pub fn snapshot(&self) -> Arc<Snapshot> {
        self.current.read().clone()
    }

    pub fn params(&self) -> StreamParams {
        self.shape.lock().params
    }

    /// Freeze the stream shape for a starting stream and return it.
    pub(crate) fn freeze_params(&self) -> StreamParams {
        let mut shape = self.shape.lock();
        shape.frozen = true;
        shape.params
    }

    pub(crate) fn release_params(&self) {
        self.shape.lock().frozen = false;
    }

    /// Store a validated batch. Shape changes are refused while a stream runs;
    /// then nothing is stored.
    fn commit(&self, assignments: &[Assignment]) -> DriverResult<()> {
        if assignments.is_empty() {
            return Ok(());
        }
        let mut shape = self.shape.lock();
        let blocked = assignments
            .iter()
            .find_map(|a| a.shape_key())
            .filter(|_| shape.frozen);
        if let Some(key) = blocked {
            return Err(DriverError::invalid(format!(
                "{key} can only change while the stream is stopped"
            )));
        }
        let mut guard = self.current.write();
        let mut next = Snapshot::clone(&guard);
        let mut params = shape.params;
        for a in assignments {
            a.apply(&mut next, &mut params);
        }
        *guard = Arc::new(next);
        shape.params = params;
        Ok(())
    }

    /// Select the bridge and arm the settling guard, even if the selection is unchanged.
    pub fn set_bridge(&self, selection: i64) -> DriverResult<()> {
        let bridge = Bridge::try_from(selection).map_err(|e| DriverError::invalid(e.to_string()))?;
        self.commit(&[Assignment::Bridge(bridge)])?;
        tracing::debug!(?bridge, "bridge selected");
        Ok(())
    }

    pub fn set_offsets(&self, offsets: [f64; CHANNELS]) -> DriverResult<()> {
        check_offsets(KEY_OFFSET, &offsets)?;
        self.commit(&[Assignment::Offsets(offsets)])
    }

    pub fn set_gains(&self, gains: [f64; CHANNELS]) -> DriverResult<()> {
        check_factors(KEY_GAIN, &gains)?;
        self.commit(&[Assignment::Gains(gains)])
    }

    pub fn set_transmissions(&self, transmissions: [f64; CHANNELS]) -> DriverResult<()> {
        check_factors(KEY_TRANSMISSION, &transmissions)?;
        self.commit(&[Assignment::Transmissions(transmissions)])
    }

    /// Tick rate of the next stream; rejected while one runs.
    pub fn set_sample_rate(&self, hz: u32) -> DriverResult<()> {
        check_sample_rate(hz)?;
        self.commit(&[Assignment::SampleRate(hz)])
    }

    /// Rows per batch of the next stream; rejected while one runs.
    pub fn set_burst_size(&self, rows: usize) -> DriverResult<()> {
        check_burst_size(rows)?;
        self.commit(&[Assignment::BurstSize(rows)])
    }

    /// Assign one key from a JSON value.
    pub fn set(&self, name: &str, value: &Value) -> DriverResult<()> {
        let a = parse_assignment(name, value)?;
        self.commit(&[a])
    }

    /// Apply a preset field by field; all fields are validated before any is stored.
    pub fn apply_preset(&self, preset: &CalibrationPreset) -> DriverResult<()> {
        let mut batch = Vec::with_capacity(4);
        if let Some(b) = preset.bridge {
            batch.push(Assignment::Bridge(
                Bridge::try_from(b).map_err(|e| DriverError::invalid(e.to_string()))?,
            ));
        }
        if let Some(v) = preset.offsets {
            check_offsets(KEY_OFFSET, &v)?;
            batch.push(Assignment::Offsets(v));
        }
        if let Some(v) = preset.gains {
            check_factors(KEY_GAIN, &v)?;
            batch.push(Assignment::Gains(v));
        }
        if let Some(v) = preset.transmissions {
            check_factors(KEY_TRANSMISSION, &v)?;
            batch.push(Assignment::Transmissions(v));
        }
        self.commit(&batch)
    }

    /// Apply a settings document.
    ///
    /// Literal values are validated together and committed as one update;
    /// any invalid literal rejects the whole document and nothing changes.
    /// The response echoes every key with its value after the update. Queried
    /// keys the store does not know resolve to `"!unknown"`.
    pub fn apply(&self, document: &Value) -> DriverResult<Value> {
        let Value::Object(doc) = document else {
            return Err(DriverError::invalid("settings document must be a JSON object"));
        };

        let mut assignments = Vec::new();
        for (key, value) in doc {
            if is_query(value) {
                continue;
            }
            assignments.push(parse_assignment(key, value)?);
        }
        self.commit(&assignments)?;
        Ok(self.describe(doc))
    }

    /// Report the current value of every key in `query`. Never writes: the
    /// values in the document are ignored, and keys the store does not know
    /// resolve to `"!unknown"`.
    pub fn get(&self, query: &Value) -> DriverResult<Value> {
        let Value::Object(doc) = query else {
            return Err(DriverError::invalid("settings document must be a JSON object"));
        };
        Ok(self.describe(doc))
    }

    fn describe(&self, doc: &Map<String, Value>) -> Value {
        let snap = self.snapshot();
        let params = self.params();
        let mut out = Map::with_capacity(doc.len());
        for key in doc.keys() {
            let resolved = resolve(&snap, &params, key)
                .unwrap_or_else(|| Value::String(UNKNOWN.to_string()));
            out.insert(key.clone(), resolved);
        }
        Value::Object(out)
    }
}

fn resolve(snap: &Snapshot, p: &StreamParams, key: &str) -> Option<Value> {
    let v = match key {
        KEY_BRIDGE => Value::from(snap.bridge.as_i64()),
        KEY_OFFSET => numbers(&snap.offsets),
        KEY_GAIN => snap.gains.as_ref().map_or(Value::Null, numbers),
        KEY_TRANSMISSION => snap.transmissions.as_ref().map_or(Value::Null, numbers),
        KEY_SAMPLE_RATE => Value::from(p.sample_rate_hz),
        KEY_BURST_SIZE => Value::from(p.batch_rows),
        KEY_SETTLING_TICKS => Value::from(p.settling_ticks),
        KEY_QUEUE_CAPACITY => Value::from(p.queue_capacity),
        KEY_CHANNELS => Value::from(CHANNELS),
        _ => return None,
    };
    Some(v)
}

fn is_query(v: &Value) -> bool {
    matches!(v, Value::String(s) if s == QUERY)
}

fn parse_assignment(key: &str, value: &Value) -> DriverResult<Assignment> {
    match key {
        KEY_BRIDGE => {
            let n = value
                .as_i64()
                .ok_or_else(|| DriverError::invalid(format!("{key} must be an integer")))?;
            let b = Bridge::try_from(n).map_err(|e| DriverError::invalid(e.to_string()))?;
            Ok(Assignment::Bridge(b))
        }
        KEY_OFFSET => {
            let v = channel_array(key, value)?;
            check_offsets(key, &v)?;
            Ok(Assignment::Offsets(v))
        }
        KEY_GAIN => {
            let v = channel_array(key, value)?;
            check_factors(key, &v)?;
            Ok(Assignment::Gains(v))
        }
        KEY_TRANSMISSION => {
            let v = channel_array(key, value)?;
            check_factors(key, &v)?;
            Ok(Assignment::Transmissions(v))
        }
        KEY_SAMPLE_RATE => {
            let hz = value
                .as_u64()
                .and_then(|v| u32::try_from(v).ok())
                .ok_or_else(|| DriverError::invalid(format!("{key} must be a positive integer")))?;
            check_sample_rate(hz)?;
            Ok(Assignment::SampleRate(hz))
        }
        KEY_BURST_SIZE => {
            let rows = value
                .as_u64()
                .and_then(|v| usize::try_from(v).ok())
                .ok_or_else(|| DriverError::invalid(format!("{key} must be a positive integer")))?;
            check_burst_size(rows)?;
            Ok(Assignment::BurstSize(rows))
        }
        KEY_SETTLING_TICKS | KEY_QUEUE_CAPACITY | KEY_CHANNELS => {
            Err(DriverError::invalid(format!("{key} is read-only")))
        }
        other => Err(DriverError::invalid(format!("unknown setting {other}"))),
    }
}

fn channel_array(key: &str, value: &Value) -> DriverResult<[f64; CHANNELS]> {
    let items = value
        .as_array()
        .ok_or_else(|| DriverError::invalid(format!("{key} must be an array of {CHANNELS} numbers")))?;
    if items.len() != CHANNELS {
        return Err(DriverError::invalid(format!(
            "{key} needs {CHANNELS} values, got {}",
            items.len()
        )));
    }
    let mut out = [0.0; CHANNELS];
    for (slot, item) in out.iter_mut().zip(items) {
        *slot = item
            .as_f64()
            .ok_or_else(|| DriverError::invalid(format!("{key} values must be numbers")))?;
    }
    Ok(out)
}

fn check_sample_rate(hz: u32) -> DriverResult<()> {
    if !(1..=MAX_SAMPLE_RATE_HZ).contains(&hz) {
        return Err(DriverError::invalid(format!(
            "{KEY_SAMPLE_RATE} must be in [1, {MAX_SAMPLE_RATE_HZ}], got {hz}"
        )));
    }
    Ok(())
}

fn check_burst_size(rows: usize) -> DriverResult<()> {
    if !(1..=MAX_BURST_SIZE).contains(&rows) {
        return Err(DriverError::invalid(format!(
            "{KEY_BURST_SIZE} must be in [1, {MAX_BURST_SIZE}], got {rows}"
        )));
    }
    Ok(())
}

fn check_offsets(key: &str, v: &[f64; CHANNELS]) -> DriverResult<()> {
    if let Some(ch) = v.iter().position(|x| !x.is_finite()) {
        return Err(DriverError::invalid(format!("{key}[{ch}] must be finite")));
    }
    Ok(())
}

fn check_factors(key: &str, v: &[f64; CHANNELS]) -> DriverResult<()> {
    if let Some(ch) = v.iter().position(|x| !x.is_finite() || *x == 0.0) {
        return Err(DriverError::invalid(format!(
            "{key}[{ch}] must be finite and non-zero"
        )));
    }
    Ok(())
}

/// Largest magnitude at which every integer is exactly representable in f64.
const EXACT_INT_LIMIT: f64 = 9_007_199_254_740_992.0;

/// Whole numbers are reported as JSON integers.
#[allow(clippy::cast_possible_truncation)]
fn number(v: f64) -> Value {
    if v.fract() == 0.0 && v.abs() < EXACT_INT_LIMIT {
        Value::from(v as i64)
    } else {
        Value::from(v)
    }
}

fn numbers(v: &[f64; CHANNELS]) -> Value {
    Value::Array(v.iter().copied().map(number).collect())
}
