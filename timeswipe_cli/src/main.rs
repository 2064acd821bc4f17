#![cfg_attr(all(not(debug_assertions), not(test)), deny(warnings))]
#![cfg_attr(not(test), deny(clippy::unwrap_used, clippy::expect_used))]
//! `timeswipe` command line: stream, settings and self-check.
//!
//! Data lines and JSON errors go to stdout; logs and human-readable errors
//! go to stderr.

mod backend;
mod cli;
mod error_fmt;
mod rt;
mod stream;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use clap::Parser;
use eyre::WrapErr;
use timeswipe_config::{Config, Logging};
use tracing_subscriber::{EnvFilter, Layer, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use crate::cli::{Cli, Commands, FILE_GUARD, JSON_MODE};
use crate::error_fmt::{exit_code_for_error, format_error_json, humanize};
use crate::stream::StreamArgs;

fn main() {
    let _ = color_eyre::install();
    let cli = Cli::parse();
    let _ = JSON_MODE.set(cli.json);

    if let Err(e) = run(cli) {
        if JSON_MODE.get().copied().unwrap_or(false) {
            println!("{}", format_error_json(&e));
        } else {
            eprintln!("{}", humanize(&e));
        }
        std::process::exit(exit_code_for_error(&e));
    }
}

fn run(cli: Cli) -> eyre::Result<()> {
    let text = std::fs::read_to_string(&cli.config)
        .wrap_err_with(|| format!("read config {}", cli.config.display()))?;
    let cfg: Config = toml::from_str(&text).wrap_err("parse config")?;
    cfg.validate()?;

    init_tracing(cli.json, &cli.log_level, &cfg.logging)?;
    tracing::debug!(config = %cli.config.display(), backend = ?cfg.hardware.backend, "config loaded");

    let preset =
        backend::resolve_calibration(&cfg, cli.input.as_deref(), cli.calibration.as_deref())?;
    let driver = backend::open_driver(&cfg, &preset)?;

    match cli.cmd {
        Commands::Stream {
            seconds,
            bridge,
            stats,
            rt,
            rt_prio,
            rt_lock,
            rt_cpu,
        } => {
            let shutdown = Arc::new(AtomicBool::new(false));
            {
                let flag = Arc::clone(&shutdown);
                ctrlc::set_handler(move || flag.store(true, Ordering::Relaxed))
                    .wrap_err("install Ctrl-C handler")?;
            }
            let args = StreamArgs {
                seconds,
                bridge,
                stats,
                rt,
                rt_prio,
                rt_lock,
                rt_cpu,
            };
            stream::run_stream(&driver, &args, cli.json, &shutdown)
        }
        Commands::Settings { document } => stream::run_settings(&driver, &document),
        Commands::SelfCheck => stream::self_check(&driver, cli.json),
    }
}

fn rotation(policy: Option<&str>) -> eyre::Result<tracing_appender::rolling::Rotation> {
    use tracing_appender::rolling::Rotation;
    match policy.unwrap_or("never") {
        "never" => Ok(Rotation::NEVER),
        "daily" => Ok(Rotation::DAILY),
        "hourly" => Ok(Rotation::HOURLY),
        other => eyre::bail!("logging.rotation must be never|daily|hourly, got {other:?}"),
    }
}

/// Console logs on stderr, filtered by `RUST_LOG` or `--log-level`; an
/// optional JSON file log from `[logging]`.
fn init_tracing(json: bool, level: &str, logging: &Logging) -> eyre::Result<()> {
    let console_filter =
        EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new(level))?;
    let console = if json {
        fmt::layer()
            .json()
            .with_writer(std::io::stderr)
            .with_filter(console_filter)
            .boxed()
    } else {
        fmt::layer()
            .with_writer(std::io::stderr)
            .with_target(false)
            .with_filter(console_filter)
            .boxed()
    };

    let file = match logging.file.as_deref() {
        Some(path) => {
            let path = std::path::Path::new(path);
            let dir = path
                .parent()
                .filter(|p| !p.as_os_str().is_empty())
                .unwrap_or_else(|| std::path::Path::new("."));
            let name = path
                .file_name()
                .ok_or_else(|| eyre::eyre!("logging.file has no file name: {}", path.display()))?;
            let appender = tracing_appender::rolling::RollingFileAppender::new(
                rotation(logging.rotation.as_deref())?,
                dir,
                name,
            );
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let _ = FILE_GUARD.set(guard);
            let filter = EnvFilter::try_new(logging.level.as_deref().unwrap_or("info"))?;
            Some(
                fmt::layer()
                    .json()
                    .with_writer(writer)
                    .with_ansi(false)
                    .with_filter(filter),
            )
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(console)
        .with(file)
        .try_init()
        .wrap_err("initialize logging")?;
    Ok(())
}
