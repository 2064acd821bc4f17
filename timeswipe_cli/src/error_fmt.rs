//! Human-readable error descriptions and structured JSON error formatting.

use timeswipe_core::error::{BuildError, DriverError};

/// Map an eyre::Report to a human-readable explanation with likely causes and fix hints.
pub fn humanize(err: &eyre::Report) -> String {
    // Typed matches first
    if let Some(be) = err.downcast_ref::<BuildError>() {
        return match be {
            BuildError::MissingFrontend => {
                "What happened: No sensor front end was provided to the driver.\nLikely causes: The configured backend failed to open or was not wired into the builder.\nHow to fix: Check [hardware] in the config and the startup log.".to_string()
            }
            BuildError::InvalidConfig(msg) => format!(
                "What happened: Invalid configuration ({msg}).\nLikely causes: Out-of-range values in [acquisition] or [button].\nHow to fix: Edit the config file, then rerun."
            ),
        };
    }

    if let Some(de) = err.downcast_ref::<DriverError>() {
        return match de {
            DriverError::AcquisitionFault(msg) if msg.contains("timed out") => format!(
                "What happened: The board did not deliver data in time ({msg}).\nLikely causes: Board not powered, PI_OK never asserted, or wrong data/clock pins.\nHow to fix: Check [hardware.pins], power and the ribbon cable, then run `timeswipe self-check`."
            ),
            DriverError::AcquisitionFault(msg) => format!(
                "What happened: Acquisition fault ({msg}).\nLikely causes: Board command rejected, GPIO permissions, or a bus error.\nHow to fix: Re-run with --log-level=debug and check the board's FAIL line."
            ),
            DriverError::ConfigurationIncomplete(msg) => format!(
                "What happened: Calibration is incomplete ({msg}).\nLikely causes: [calibration] lacks gains or transmissions and no input profile was selected.\nHow to fix: Set them in the config, pass --input NAME or --calibration FILE."
            ),
            DriverError::InvalidArgument(msg) => format!(
                "What happened: Invalid argument ({msg}).\nHow to fix: Check the settings document; writable keys are Bridge, Offset, Gain and Transmission."
            ),
            other => format!(
                "What happened: {other}.\nHow to fix: Re-run with --log-level=debug for details."
            ),
        };
    }

    // String-based heuristics for errors coming from init or config
    let msg = format!("{err:#}");
    let lower = msg.to_ascii_lowercase();

    if lower.contains("calibration csv must have headers") {
        return "Invalid headers in calibration CSV. Expected 'channel,offset,gain,transmission'."
            .to_string();
    }

    if lower.contains("unknown input profile") {
        return format!(
            "What happened: {msg}.\nHow to fix: Pass one of the [profiles.NAME] sections from the config to --input."
        );
    }

    if lower.contains("read config") || lower.contains("parse config") || lower.contains("must be")
    {
        return format!(
            "What happened: Configuration is invalid ({msg}).\nHow to fix: Edit the TOML config and try again."
        );
    }

    if lower.contains("gpio") || lower.contains("spi") {
        return format!(
            "What happened: Failed to open the board ({msg}).\nLikely causes: Wrong pin numbers, SPI disabled, or insufficient GPIO permissions.\nHow to fix: Enable SPI, check [hardware.pins], and run with access to /dev/gpiomem."
        );
    }

    // Generic fallback
    format!(
        "Something went wrong.\nHow to fix: Re-run with --log-level=debug for details. Original: {msg}"
    )
}

/// Stable exit codes per error class; anything untyped returns 1.
pub fn exit_code_for_error(err: &eyre::Report) -> i32 {
    match err.downcast_ref::<DriverError>() {
        Some(DriverError::AcquisitionFault(_)) => 3,
        Some(DriverError::ConfigurationIncomplete(_)) => 4,
        Some(DriverError::InvalidArgument(_)) => 5,
        Some(DriverError::AlreadyRunning | DriverError::NotRunning) => 6,
        None => 1,
    }
}

fn reason_name(err: &eyre::Report) -> &'static str {
    if let Some(de) = err.downcast_ref::<DriverError>() {
        return match de {
            DriverError::InvalidArgument(_) => "InvalidArgument",
            DriverError::ConfigurationIncomplete(_) => "ConfigurationIncomplete",
            DriverError::AcquisitionFault(_) => "AcquisitionFault",
            DriverError::AlreadyRunning => "AlreadyRunning",
            DriverError::NotRunning => "NotRunning",
        };
    }
    if err.downcast_ref::<BuildError>().is_some() {
        return "InvalidConfig";
    }
    "Error"
}

/// Structured JSON for errors when --json is enabled.
pub fn format_error_json(err: &eyre::Report) -> String {
    serde_json::json!({
        "type": "error",
        "reason": reason_name(err),
        "message": humanize(err),
    })
    .to_string()
}
