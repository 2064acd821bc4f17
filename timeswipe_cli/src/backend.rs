//! Hardware assembly: config → front end, button and driver.

use eyre::WrapErr;
use timeswipe_config::{Backend, Config};
use timeswipe_core::{AcquisitionCfg, ButtonCfg, CalibrationPreset, Driver};
use timeswipe_hardware::{SimulatedButton, SimulatedFrontend, Waveform};

/// Build a stopped driver for the configured backend, with `calibration`
/// loaded and the config's startup script applied.
pub fn open_driver(cfg: &Config, calibration: &CalibrationPreset) -> eyre::Result<Driver> {
    let acquisition = AcquisitionCfg::from(&cfg.acquisition);
    let button_cfg = ButtonCfg::from(&cfg.button);

    let builder = Driver::builder()
        .with_acquisition(acquisition)
        .with_button_cfg(button_cfg)
        .with_calibration(calibration.clone());

    let driver = match cfg.hardware.backend {
        Backend::Sim => {
            let fe = SimulatedFrontend::new(cfg.acquisition.sample_rate_hz).with_waveform(
                Waveform::Sine {
                    midpoint: cfg.hardware.sim_midpoint,
                    amplitude: cfg.hardware.sim_amplitude,
                },
            );
            apply_test_hooks(&fe);
            tracing::debug!("using simulated backend");
            builder
                .with_button(SimulatedButton::new())
                .with_frontend(fe)
                .build()?
        }
        Backend::Gpio => open_gpio(cfg, builder)?,
    };

    if let Some(script) = cfg.startup_script.as_deref() {
        let doc: serde_json::Value =
            serde_json::from_str(script).wrap_err("startup_script is not valid JSON")?;
        let applied = driver
            .set_settings(&doc)
            .wrap_err("startup_script rejected")?;
        tracing::info!(%applied, "startup script applied");
    }
    Ok(driver)
}

/// Fault injection for integration tests of the binary.
fn apply_test_hooks(fe: &SimulatedFrontend) {
    let control = fe.control();
    if let Some(n) = std::env::var("TIMESWIPE_TEST_SIM_FAULTS")
        .ok()
        .and_then(|v| v.parse::<u32>().ok())
    {
        control.fail_next(n);
    }
    if std::env::var_os("TIMESWIPE_TEST_SIM_STUCK").is_some() {
        control.set_stuck(true);
    }
}

#[cfg(all(feature = "hardware", target_os = "linux"))]
fn open_gpio(
    cfg: &Config,
    builder: timeswipe_core::DriverBuilder<timeswipe_core::Missing>,
) -> eyre::Result<Driver> {
    use timeswipe_hardware::gpio::{GpioButton, GpioFrontend, GpioPins};

    let p = &cfg.hardware.pins;
    let pins = GpioPins {
        data: p.data,
        clock: p.clock,
        pi_ok: p.pi_ok,
        fail: p.fail,
        reset: p.reset,
    };
    let fe = GpioFrontend::open(&pins).wrap_err("open board GPIO/SPI")?;
    tracing::info!(?pins, "opened GPIO backend");
    let builder = match p.button {
        Some(pin) => {
            let button = GpioButton::open(pin, cfg.button.active_low)
                .wrap_err_with(|| format!("open button pin {pin}"))?;
            builder.with_button(button)
        }
        None => builder,
    };
    builder.with_frontend(fe).build()
}

#[cfg(not(all(feature = "hardware", target_os = "linux")))]
fn open_gpio(
    _cfg: &Config,
    _builder: timeswipe_core::DriverBuilder<timeswipe_core::Missing>,
) -> eyre::Result<Driver> {
    eyre::bail!("hardware.backend = \"gpio\" requires a Linux build with the `hardware` feature")
}

/// Calibration for this run: the selected profile (or `[calibration]`),
/// with the CSV table replacing its per-channel values when given.
pub fn resolve_calibration(
    cfg: &Config,
    input: Option<&str>,
    csv: Option<&std::path::Path>,
) -> eyre::Result<CalibrationPreset> {
    let mut selected = cfg.select_calibration(input)?;
    if let Some(path) = csv {
        let table = timeswipe_config::load_calibration_csv(path)?;
        let from_csv = timeswipe_config::CalibrationCfg::from(&table);
        selected.offsets = from_csv.offsets;
        selected.gains = from_csv.gains;
        selected.transmissions = from_csv.transmissions;
        tracing::info!(path = %path.display(), "calibration loaded from CSV");
    }
    Ok(CalibrationPreset::from(&selected))
}
