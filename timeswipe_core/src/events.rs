//! Values delivered to consumers.

use timeswipe_traits::RawRow;

use crate::error::DriverError;

/// Calibrated rows of consecutive delivered ticks, in tick order.
#[derive(Debug, Clone, PartialEq)]
pub struct SampleBatch {
    first_tick: u64,
    rows: Vec<RawRow>,
}

impl SampleBatch {
    pub(crate) fn new(first_tick: u64, rows: Vec<RawRow>) -> Self {
        Self { first_tick, rows }
    }

    /// Tick index of the first row, counted from the start of the stream.
    pub fn first_tick(&self) -> u64 {
        self.first_tick
    }

    pub fn rows(&self) -> &[RawRow] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn into_rows(self) -> Vec<RawRow> {
        self.rows
    }
}

/// A debounced button transition.
///
/// `counter` grows by one with every transition for the lifetime of the
/// driver; odd values are presses, even values releases.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ButtonEvent {
    pub pressed: bool,
    pub counter: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ErrorCode {
    /// Hardware read failed; the tick produced no row.
    AcquisitionFault,
    /// Calibration was not fully set; the tick produced no row.
    ConfigurationIncomplete,
    /// The data consumer fell behind and a batch was dropped.
    BatchOverrun,
    /// The event consumer fell behind and a button transition was dropped.
    EventOverrun,
}

impl ErrorCode {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorCode::AcquisitionFault => "AcquisitionFault",
            ErrorCode::ConfigurationIncomplete => "ConfigurationIncomplete",
            ErrorCode::BatchOverrun => "BatchOverrun",
            ErrorCode::EventOverrun => "EventOverrun",
        }
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One error code seen since the last error delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorEntry {
    pub code: ErrorCode,
    /// Occurrences since the last delivery.
    pub count: u64,
    /// Description of the most recent occurrence.
    pub message: String,
}

/// Non-empty set of errors observed since the previous error delivery,
/// ordered by first occurrence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorEvent {
    entries: Vec<ErrorEntry>,
}

impl ErrorEvent {
    pub fn entries(&self) -> &[ErrorEntry] {
        &self.entries
    }

    pub fn contains(&self, code: ErrorCode) -> bool {
        self.entries.iter().any(|e| e.code == code)
    }

    pub fn count(&self, code: ErrorCode) -> u64 {
        self.entries
            .iter()
            .find(|e| e.code == code)
            .map_or(0, |e| e.count)
    }
}

/// Accumulates errors between deliveries, deduplicated by code.
#[derive(Debug, Default)]
pub(crate) struct ErrorSet {
    entries: Vec<ErrorEntry>,
}

impl ErrorSet {
    pub(crate) fn record(&mut self, code: ErrorCode, message: impl Into<String>) {
        let message = message.into();
        match self.entries.iter_mut().find(|e| e.code == code) {
            Some(e) => {
                e.count += 1;
                e.message = message;
            }
            None => self.entries.push(ErrorEntry {
                code,
                count: 1,
                message,
            }),
        }
    }

    /// Take the accumulated set, leaving it empty. `None` when nothing was recorded.
    pub(crate) fn take(&mut self) -> Option<ErrorEvent> {
        if self.entries.is_empty() {
            return None;
        }
        Some(ErrorEvent {
            entries: std::mem::take(&mut self.entries),
        })
    }
}

/// Error code used when a per-tick failure is turned into an event.
pub(crate) fn code_for(err: &DriverError) -> ErrorCode {
    match err {
        DriverError::ConfigurationIncomplete(_) => ErrorCode::ConfigurationIncomplete,
        _ => ErrorCode::AcquisitionFault,
    }
}
