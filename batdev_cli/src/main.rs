mod cli;
mod error_fmt;
mod session;

use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use batdev_config::{Config, Logging};
use batdev_core::SessionSummary;
use clap::Parser;
use eyre::{Result, WrapErr};
use serde_json::json;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer, Registry, fmt};

use crate::cli::{Cli, FILE_GUARD, JSON_MODE};
use crate::error_fmt::{
    ERROR_EXIT, describe_status, exit_code_for_status, format_error_json, humanize,
};
use crate::session::{SelfCheck, effective_calibration, mode_name};

fn main() {
    let cli = Cli::parse();
    let _ = JSON_MODE.set(cli.json);
    if let Err(e) = color_eyre::install() {
        eprintln!("failed to install error reporter: {e}");
    }

    let code = match run(&cli) {
        Ok(code) => code,
        Err(e) => {
            tracing::error!(error = %format!("{e:#}"), "batdev failed");
            if JSON_MODE.get().copied().unwrap_or(false) {
                eprintln!("{}", format_error_json(&e));
            } else {
                eprintln!("Error: {}", humanize(&e));
            }
            ERROR_EXIT
        }
    };
    std::process::exit(code);
}

fn load_config(path: &Path) -> Result<Config> {
    let text = std::fs::read_to_string(path)
        .wrap_err_with(|| format!("read config {}", path.display()))?;
    let cfg = batdev_config::load_toml(&text).wrap_err("parse config")?;
    cfg.validate().wrap_err("invalid configuration")?;
    Ok(cfg)
}

fn run(cli: &Cli) -> Result<i32> {
    let cfg = load_config(&cli.config)?;
    init_tracing(cli, &cfg.logging)?;

    let csv = cli
        .calibration
        .as_deref()
        .map(batdev_config::load_calibration_csv)
        .transpose()?;
    let calibration = effective_calibration(&cfg, csv.as_ref());
    tracing::debug!(?calibration, "calibration in effect");

    let Some((mode, opts)) = cli.cmd.session() else {
        let check = session::self_check(&cfg, calibration)?;
        print_self_check(&check, cli.json);
        return Ok(0);
    };

    let shutdown = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&shutdown);
    ctrlc::set_handler(move || flag.store(true, Ordering::Relaxed))
        .wrap_err("install Ctrl-C handler")?;

    let summary = session::run(
        &cfg,
        calibration,
        mode,
        cli.json,
        opts.fast,
        opts.max_ticks,
        &shutdown,
    )?;
    print_summary(mode_name(mode), &summary, cli.json);
    Ok(exit_code_for_status(mode, summary.status))
}

/// Console logs go to stderr so stdout stays a clean record stream; `[logging].file`
/// adds a JSON file sink with its own level.
fn init_tracing(cli: &Cli, logging: &Logging) -> Result<()> {
    let console_filter = match EnvFilter::try_from_default_env() {
        Ok(f) => f,
        Err(_) => EnvFilter::try_new(&cli.log_level).wrap_err("invalid --log-level")?,
    };
    let mut layers: Vec<Box<dyn Layer<Registry> + Send + Sync>> = Vec::new();
    if cli.json {
        layers.push(
            fmt::layer()
                .json()
                .with_writer(std::io::stderr)
                .with_filter(console_filter)
                .boxed(),
        );
    } else {
        layers.push(
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(false)
                .with_filter(console_filter)
                .boxed(),
        );
    }

    if let Some(file) = logging.file.as_deref() {
        let path = Path::new(file);
        let dir = path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        let name = path
            .file_name()
            .ok_or_else(|| eyre::eyre!("logging.file has no file name: {file}"))?;
        let appender = match logging.rotation.as_deref().unwrap_or("never") {
            "daily" => tracing_appender::rolling::daily(dir, name),
            "hourly" => tracing_appender::rolling::hourly(dir, name),
            _ => tracing_appender::rolling::never(dir, name),
        };
        let (writer, guard) = tracing_appender::non_blocking(appender);
        let _ = FILE_GUARD.set(guard);
        let level = EnvFilter::try_new(logging.level.as_deref().unwrap_or("info"))
            .wrap_err("invalid logging.level")?;
        layers.push(
            fmt::layer()
                .json()
                .with_ansi(false)
                .with_writer(writer)
                .with_filter(level)
                .boxed(),
        );
    }

    tracing_subscriber::registry()
        .with(layers)
        .try_init()
        .wrap_err("install tracing subscriber")?;
    Ok(())
}

fn print_summary(mode: &str, s: &SessionSummary, json: bool) {
    if json {
        println!(
            "{}",
            json!({
                "mode": mode,
                "status": s.status.name(),
                "status_code": s.status.code(),
                "elapsed_ms": s.elapsed_ms,
                "charge_mah": s.charge_mah,
                "discharge_mah": s.discharge_mah,
                "nudges": s.nudges,
                "pot_level": s.pot_level,
            })
        );
    } else {
        #[allow(clippy::cast_precision_loss)]
        let secs = s.elapsed_ms as f64 / 1000.0;
        println!(
            "{mode} finished: {} ({}) - {}",
            s.status,
            s.status.code(),
            describe_status(s.status)
        );
        println!(
            "in {:.1} mAh, out {:.1} mAh, {secs:.1} s, {} nudges",
            s.charge_mah, s.discharge_mah, s.nudges
        );
    }
}

fn print_self_check(c: &SelfCheck, json: bool) {
    let [shunt_ma, bus_v, therm_load_c, therm_ambient_c] = c.readings;
    if json {
        println!(
            "{}",
            json!({
                "self_check": "ok",
                "shunt_ma": shunt_ma,
                "bus_v": bus_v,
                "therm_load_c": therm_load_c,
                "therm_ambient_c": therm_ambient_c,
                "diode_conducting": c.diode_conducting,
                "power_good": c.power_good,
                "battery_present": c.battery_present,
            })
        );
    } else {
        println!("self-check ok");
        println!(
            "  shunt {shunt_ma:.1} mA, bus {bus_v:.3} V, load {therm_load_c:.1} C, ambient {therm_ambient_c:.1} C"
        );
        println!(
            "  diode conducting: {}, power good: {}, battery present: {}",
            c.diode_conducting, c.power_good, c.battery_present
        );
    }
}
