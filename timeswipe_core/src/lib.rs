#![cfg_attr(all(not(debug_assertions), not(test)), deny(warnings))]
#![cfg_attr(
    all(not(debug_assertions), not(test)),
    deny(clippy::all, clippy::pedantic, clippy::nursery)
)]
#![allow(
    clippy::module_name_repetitions,
    clippy::missing_errors_doc,
    clippy::cast_possible_truncation
)]
#![cfg_attr(not(test), deny(clippy::unwrap_used, clippy::expect_used))]
//! Four-channel acquisition driver (hardware-agnostic).
//!
//! All hardware interaction goes through `timeswipe_traits::SensorFrontend`
//! and `timeswipe_traits::ButtonSource`.
//!
//! ## Architecture
//!
//! - **Settings store**: bridge routing and per-channel calibration behind
//!   copy-on-write snapshots (`settings` module)
//! - **Calibration**: `(raw − offset) × gain × transmission` (`calibration`)
//! - **Sampler**: fixed-rate tick thread with startup and settling discard,
//!   button polling and batching (`sampler`)
//! - **Event multiplexer**: bounded drop-oldest queues and delivery workers
//!   for data, button and error consumers (`mux`)
//! - **Stream controller**: start/stop state machine and command surface
//!   (`Driver`)
//!
//! ## Threads
//!
//! A running stream uses three threads: `timeswipe-acq` owns the hardware,
//! `timeswipe-data` runs the data consumer and `timeswipe-events` runs the
//! button and error consumers. The acquisition thread never waits on a
//! consumer.

pub mod builder;
pub mod button;
pub mod calibration;
pub mod config;
pub mod conversions;
pub mod driver;
pub mod error;
pub mod events;
pub mod hw_error;
pub mod mocks;
pub mod mux;
pub mod sampler;
pub mod settings;
pub mod stats;
pub mod util;

pub use builder::{DriverBuilder, MAX_SAMPLE_RATE_HZ, Missing, Set};
pub use config::{AcquisitionCfg, ButtonCfg, CalibrationPreset};
pub use driver::{Driver, StreamState};
pub use error::{BuildError, DriverError, DriverResult, Report, Result};
pub use events::{ButtonEvent, ErrorCode, ErrorEntry, ErrorEvent, SampleBatch};
pub use mux::{BUTTON_QUEUE_CAPACITY, DropOldestQueue};
pub use settings::{SettingsStore, Snapshot, StreamParams};
pub use stats::StreamStats;
pub use timeswipe_traits::{Bridge, CHANNELS, RawRow};
