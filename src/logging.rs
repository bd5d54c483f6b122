//! Logging setup on top of the `log` facade and the `env_logger` backend.
//!
//! The level comes from, in priority order:
//!
//! 1. the `RUST_LOG` environment variable, if set
//! 2. `--quiet` (errors only) or `-v`/`-vv` (debug/trace)
//! 3. info
//!
//! Without `RUST_LOG` only this crate follows the flags; dependencies log at
//! warn or quieter.
//!
//! Debug builds print a timestamp and, when verbose, the module path. Release
//! builds print only the level and the message.
//!
//! ```rust,no_run
//! use equipmatch::logging::init_logging;
//!
//! init_logging(1, false);
//! log::debug!("matching started");
//! ```

use env_logger::Builder;
use log::LevelFilter;
use std::env;
use std::io::Write;

/// Crate whose records follow the CLI verbosity; dependencies stay at warn.
const CRATE_TARGET: &str = "equipmatch";

/// Initialize the logging subsystem from CLI verbosity flags.
///
/// Call before any logging happens. Only the first call in a process
/// installs a logger; later calls are ignored.
pub fn init_logging(verbose: u8, quiet: bool) {
    let mut builder = Builder::new();
    let from_env = match env::var("RUST_LOG") {
        Ok(spec) => {
            builder.parse_filters(&spec);
            Some(spec)
        }
        Err(_) => {
            let level = determine_level(verbose, quiet);
            builder
                .filter_level(level.min(LevelFilter::Warn))
                .filter_module(CRATE_TARGET, level);
            None
        }
    };

    configure_format(&mut builder, verbose);
    if builder.try_init().is_err() {
        return;
    }

    match from_env {
        Some(spec) => log::debug!("Logging configured from RUST_LOG={spec}"),
        None => log::debug!("Logging at {} for {}", current_level_name(), CRATE_TARGET),
    }
}

/// Map CLI flags to a level filter. `quiet` beats `verbose`.
fn determine_level(verbose: u8, quiet: bool) -> LevelFilter {
    if quiet {
        return LevelFilter::Error;
    }
    match verbose {
        0 => LevelFilter::Info,
        1 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    }
}

fn configure_format(builder: &mut Builder, verbose: u8) {
    #[cfg(debug_assertions)]
    {
        builder.format(move |buf, record| {
            let timestamp = buf.timestamp_seconds();
            let level = record.level();
            let level_style = buf.default_level_style(level);

            if verbose >= 1 {
                writeln!(
                    buf,
                    "{} {level_style}{:<5}{level_style:#} [{}] {}",
                    timestamp,
                    level,
                    record.module_path().unwrap_or("unknown"),
                    record.args()
                )
            } else {
                writeln!(
                    buf,
                    "{} {level_style}{:<5}{level_style:#} {}",
                    timestamp,
                    level,
                    record.args()
                )
            }
        });
    }

    #[cfg(not(debug_assertions))]
    {
        let _ = verbose;
        builder.format(|buf, record| {
            let level = record.level();
            let level_style = buf.default_level_style(level);
            writeln!(
                buf,
                "{level_style}{:<5}{level_style:#} {}",
                level,
                record.args()
            )
        });
    }
}

/// Name of the most verbose level any target is enabled at.
#[must_use]
pub fn current_level_name() -> &'static str {
    match log::max_level() {
        LevelFilter::Off => "off",
        LevelFilter::Error => "error",
        LevelFilter::Warn => "warn",
        LevelFilter::Info => "info",
        LevelFilter::Debug => "debug",
        LevelFilter::Trace => "trace",
    }
}
