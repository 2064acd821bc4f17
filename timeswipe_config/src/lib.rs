#![cfg_attr(all(not(debug_assertions), not(test)), deny(warnings))]
#![cfg_attr(
    all(not(debug_assertions), not(test)),
    deny(clippy::all, clippy::pedantic, clippy::nursery)
)]
#![allow(clippy::module_name_repetitions, clippy::missing_errors_doc)]
//! Config schemas and calibration parsing for the acquisition driver.
//!
//! - `Config` and sub-structs are deserialized from TOML and validated.
//! - Named input profiles carry a full calibration set (bridge, offsets,
//!   gains, transmissions) selectable at startup.
//! - Calibration CSV loader enforces headers and one row per channel.
use std::collections::BTreeMap;

use serde::Deserialize;

/// Channel count the calibration arrays must match.
pub const CHANNELS: usize = 4;

/// Highest tick rate the board supports.
pub const MAX_SAMPLE_RATE_HZ: u32 = 48_000;

/// Calibration CSV schema.
///
/// Expected headers:
/// channel,offset,gain,transmission
///
/// Example:
/// channel,offset,gain,transmission
/// 0,32768,1.0,1.0
#[derive(Debug, Deserialize, Clone, Copy)]
pub struct CalibrationRow {
    pub channel: usize,
    pub offset: f64,
    pub gain: f64,
    pub transmission: f64,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct Acquisition {
    /// Tick rate of the sampler.
    pub sample_rate_hz: u32,
    /// Rows per delivered batch ("burst size").
    pub batch_rows: usize,
    /// Completed batches buffered before the oldest is dropped.
    pub queue_capacity: usize,
    /// Ticks discarded after a bridge change.
    pub settling_ticks: u32,
    /// Ticks discarded after every start (stale board RAM).
    pub startup_discard_ticks: u32,
    /// Bound on one hardware read.
    pub read_timeout_ms: u64,
}

impl Default for Acquisition {
    fn default() -> Self {
        Self {
            sample_rate_hz: 1000,
            batch_rows: 100,
            queue_capacity: 8,
            settling_ticks: 50,
            startup_discard_ticks: 1,
            read_timeout_ms: 5,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct ButtonCfg {
    /// Polling interval of the button level.
    pub poll_ms: u64,
    /// Consecutive equal polls required to accept a new level.
    pub debounce_n: u8,
    /// Treat low level as pressed when true.
    pub active_low: bool,
}

impl Default for ButtonCfg {
    fn default() -> Self {
        Self {
            poll_ms: 10,
            debounce_n: 3,
            active_low: false,
        }
    }
}

/// Startup calibration. Missing gains or transmissions leave the store
/// incomplete; the driver then reports every tick as misconfigured.
#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct CalibrationCfg {
    pub bridge: Option<i64>,
    pub offsets: Option<[f64; CHANNELS]>,
    pub gains: Option<[f64; CHANNELS]>,
    pub transmissions: Option<[f64; CHANNELS]>,
}

/// A named input: a complete calibration set for one sensor arrangement.
#[derive(Debug, Deserialize, Clone)]
pub struct Profile {
    pub bridge: i64,
    pub offsets: [f64; CHANNELS],
    pub gains: [f64; CHANNELS],
    pub transmissions: [f64; CHANNELS],
}

impl From<&Profile> for CalibrationCfg {
    fn from(p: &Profile) -> Self {
        Self {
            bridge: Some(p.bridge),
            offsets: Some(p.offsets),
            gains: Some(p.gains),
            transmissions: Some(p.transmissions),
        }
    }
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct Logging {
    pub file: Option<String>,  // path to .log (JSON lines)
    pub level: Option<String>, // "info","debug"
    /// Log rotation policy: "never" | "daily" | "hourly" (default: never)
    pub rotation: Option<String>,
}

#[derive(Debug, Deserialize, Clone, Copy, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    #[default]
    Sim,
    Gpio,
}

#[derive(Debug, Deserialize, Clone, Copy)]
#[serde(default)]
pub struct Pins {
    /// DATA0..DATA7 (BCM numbering); DATA0 is the byte's most significant bit.
    pub data: [u8; 8],
    pub clock: u8,
    pub pi_ok: u8,
    pub fail: u8,
    pub reset: u8,
    pub button: Option<u8>,
}

impl Default for Pins {
    fn default() -> Self {
        Self {
            data: [24, 25, 7, 5, 6, 12, 13, 16],
            clock: 4,
            pi_ok: 15,
            fail: 18,
            reset: 17,
            button: None,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct Hardware {
    pub backend: Backend,
    pub pins: Pins,
    /// Simulated waveform midpoint in raw counts.
    pub sim_midpoint: f64,
    /// Simulated waveform amplitude in raw counts.
    pub sim_amplitude: f64,
}

impl Default for Hardware {
    fn default() -> Self {
        Self {
            backend: Backend::Sim,
            pins: Pins::default(),
            sim_midpoint: 32767.0,
            sim_amplitude: 3276.0,
        }
    }
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    /// Settings document applied once before the first start.
    pub startup_script: Option<String>,
    pub acquisition: Acquisition,
    pub button: ButtonCfg,
    pub calibration: CalibrationCfg,
    pub profiles: BTreeMap<String, Profile>,
    pub logging: Logging,
    pub hardware: Hardware,
}

pub fn load_toml(s: &str) -> Result<Config, toml::de::Error> {
    toml::from_str::<Config>(s)
}

/// Per-channel calibration loaded from CSV.
#[derive(Debug, Clone, PartialEq)]
pub struct CalibrationTable {
    pub offsets: [f64; CHANNELS],
    pub gains: [f64; CHANNELS],
    pub transmissions: [f64; CHANNELS],
}

impl CalibrationTable {
    /// Build from one row per channel, in any order.
    pub fn from_rows(rows: Vec<CalibrationRow>) -> eyre::Result<Self> {
        if rows.len() != CHANNELS {
            eyre::bail!(
                "calibration requires exactly {CHANNELS} rows, got {}",
                rows.len()
            );
        }
        let mut seen = [false; CHANNELS];
        let mut table = Self {
            offsets: [0.0; CHANNELS],
            gains: [0.0; CHANNELS],
            transmissions: [0.0; CHANNELS],
        };
        for row in rows {
            let ch = row.channel;
            if ch >= CHANNELS {
                eyre::bail!("calibration channel {ch} out of range 0..{CHANNELS}");
            }
            if seen[ch] {
                eyre::bail!("calibration channel {ch} listed twice");
            }
            seen[ch] = true;
            check_offset(&format!("channel {ch} offset"), row.offset)?;
            check_factor(&format!("channel {ch} gain"), row.gain)?;
            check_factor(&format!("channel {ch} transmission"), row.transmission)?;
            table.offsets[ch] = row.offset;
            table.gains[ch] = row.gain;
            table.transmissions[ch] = row.transmission;
        }
        Ok(table)
    }
}

impl TryFrom<Vec<CalibrationRow>> for CalibrationTable {
    type Error = eyre::Report;
    fn try_from(rows: Vec<CalibrationRow>) -> Result<Self, Self::Error> {
        Self::from_rows(rows)
    }
}

impl From<&CalibrationTable> for CalibrationCfg {
    fn from(t: &CalibrationTable) -> Self {
        Self {
            bridge: None,
            offsets: Some(t.offsets),
            gains: Some(t.gains),
            transmissions: Some(t.transmissions),
        }
    }
}

pub fn load_calibration_csv(path: &std::path::Path) -> eyre::Result<CalibrationTable> {
    let mut rdr = csv::ReaderBuilder::new()
        .has_headers(true)
        .trim(csv::Trim::All)
        .from_path(path)
        .map_err(|e| eyre::eyre!("open calibration CSV {:?}: {}", path, e))?;

    // Enforce exact headers
    let headers = rdr
        .headers()
        .map_err(|e| eyre::eyre!("read CSV headers {:?}: {}", path, e))?
        .clone();
    let expected = ["channel", "offset", "gain", "transmission"];
    let actual: Vec<String> = headers.iter().map(|s| s.to_string()).collect();
    if actual != expected {
        eyre::bail!(
            "calibration CSV must have headers 'channel,offset,gain,transmission', got: {}",
            actual.join(",")
        );
    }

    let mut rows = Vec::new();
    for (idx, rec) in rdr.deserialize::<CalibrationRow>().enumerate() {
        match rec {
            Ok(row) => rows.push(row),
            Err(e) => {
                eyre::bail!("invalid CSV row {}: {}", idx + 2, e);
            }
        }
    }

    CalibrationTable::try_from(rows)
}

fn check_factor(what: &str, v: f64) -> eyre::Result<()> {
    if !v.is_finite() || v == 0.0 {
        eyre::bail!("{what} must be finite and non-zero");
    }
    Ok(())
}

fn check_offset(what: &str, v: f64) -> eyre::Result<()> {
    if !v.is_finite() {
        eyre::bail!("{what} must be finite");
    }
    Ok(())
}

fn check_bridge(what: &str, v: i64) -> eyre::Result<()> {
    if !(0..=1).contains(&v) {
        eyre::bail!("{what} must be 0 or 1");
    }
    Ok(())
}

fn check_calibration(
    section: &str,
    bridge: Option<i64>,
    offsets: Option<&[f64; CHANNELS]>,
    gains: Option<&[f64; CHANNELS]>,
    transmissions: Option<&[f64; CHANNELS]>,
) -> eyre::Result<()> {
    if let Some(b) = bridge {
        check_bridge(&format!("{section}.bridge"), b)?;
    }
    for (i, v) in offsets.into_iter().flatten().enumerate() {
        check_offset(&format!("{section}.offsets[{i}]"), *v)?;
    }
    for (i, v) in gains.into_iter().flatten().enumerate() {
        check_factor(&format!("{section}.gains[{i}]"), *v)?;
    }
    for (i, v) in transmissions.into_iter().flatten().enumerate() {
        check_factor(&format!("{section}.transmissions[{i}]"), *v)?;
    }
    Ok(())
}

impl Config {
    /// Calibration to apply at startup: the named profile if given, else `[calibration]`.
    pub fn select_calibration(&self, profile: Option<&str>) -> eyre::Result<CalibrationCfg> {
        match profile {
            None => Ok(self.calibration.clone()),
            Some(name) => self.profiles.get(name).map(CalibrationCfg::from).ok_or_else(|| {
                let known: Vec<&str> = self.profiles.keys().map(String::as_str).collect();
                eyre::eyre!(
                    "unknown input profile '{name}' (known: {})",
                    if known.is_empty() {
                        "none".to_string()
                    } else {
                        known.join(", ")
                    }
                )
            }),
        }
    }

    pub fn validate(&self) -> eyre::Result<()> {
        // Acquisition
        let acq = &self.acquisition;
        if !(1..=MAX_SAMPLE_RATE_HZ).contains(&acq.sample_rate_hz) {
            eyre::bail!("acquisition.sample_rate_hz must be in [1, {MAX_SAMPLE_RATE_HZ}]");
        }
        if acq.batch_rows == 0 {
            eyre::bail!("acquisition.batch_rows must be >= 1");
        }
        if acq.batch_rows > 1_000_000 {
            eyre::bail!("acquisition.batch_rows is unreasonably large (>1e6)");
        }
        if acq.queue_capacity == 0 {
            eyre::bail!("acquisition.queue_capacity must be >= 1");
        }
        if acq.queue_capacity > 1024 {
            eyre::bail!("acquisition.queue_capacity must be <= 1024");
        }
        if acq.settling_ticks > 10 * MAX_SAMPLE_RATE_HZ {
            eyre::bail!("acquisition.settling_ticks is unreasonably large (>10s at max rate)");
        }
        if acq.read_timeout_ms == 0 {
            eyre::bail!("acquisition.read_timeout_ms must be >= 1");
        }

        // Button
        if self.button.poll_ms == 0 {
            eyre::bail!("button.poll_ms must be >= 1");
        }
        if self.button.debounce_n == 0 {
            eyre::bail!("button.debounce_n must be >= 1");
        }

        // Calibration and profiles
        let cal = &self.calibration;
        check_calibration(
            "calibration",
            cal.bridge,
            cal.offsets.as_ref(),
            cal.gains.as_ref(),
            cal.transmissions.as_ref(),
        )?;
        for (name, p) in &self.profiles {
            check_calibration(
                &format!("profiles.{name}"),
                Some(p.bridge),
                Some(&p.offsets),
                Some(&p.gains),
                Some(&p.transmissions),
            )?;
        }

        // Startup script
        if let Some(script) = &self.startup_script {
            match serde_json::from_str::<serde_json::Value>(script) {
                Ok(serde_json::Value::Object(_)) => {}
                Ok(_) => eyre::bail!("startup_script must be a JSON object"),
                Err(e) => eyre::bail!("startup_script is not valid JSON: {e}"),
            }
        }

        // Logging
        if let Some(rot) = self.logging.rotation.as_deref()
            && !matches!(rot, "never" | "daily" | "hourly")
        {
            eyre::bail!("logging.rotation must be one of never|daily|hourly");
        }

        // Hardware
        let hw = &self.hardware;
        if !hw.sim_midpoint.is_finite() || !hw.sim_amplitude.is_finite() {
            eyre::bail!("hardware.sim_midpoint and hardware.sim_amplitude must be finite");
        }
        let mut used = std::collections::BTreeSet::new();
        let pins = &hw.pins;
        for p in pins
            .data
            .iter()
            .chain([&pins.clock, &pins.pi_ok, &pins.fail, &pins.reset])
        {
            if *p > 27 {
                eyre::bail!("hardware.pins: BCM pin {p} out of range 0..=27");
            }
            if !used.insert(*p) {
                eyre::bail!("hardware.pins: BCM pin {p} assigned twice");
            }
        }

        Ok(())
    }
}
