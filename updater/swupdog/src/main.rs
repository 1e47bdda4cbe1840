#![deny(rust_2018_idioms)]
#![warn(clippy::pedantic)]

/*!
swupdog transitions an installed system from its current release to the
newest one the server publishes: it reconciles the two releases' manifest
trees, acquires changed content via binary deltas or full downloads with
bounded retries, stages everything at shadow paths, and commits the
transition with atomic renames between global syncs. Locally-published
mix content overlays upstream in the same critical section.
*/

mod config;
mod delta;
mod download;
mod error;
mod lock;
mod mix;
mod mom;
mod packs;
mod retry;
mod scripts;
mod signature;
mod subscriptions;
mod telemetry;
mod transport;
mod update;
mod version;

use crate::config::Config;
use crate::error::Result;
use log::info;
use simplelog::{ColorChoice, Config as LogConfig, LevelFilter, TermLogger, TerminalMode};
use snafu::ResultExt;
use std::path::PathBuf;
use std::process;
use std::str::FromStr;

/// Prints a more specific message before exiting through usage().
fn usage_msg<S: AsRef<str>>(msg: S) -> ! {
    eprintln!("{}\n", msg.as_ref());
    usage();
}

fn usage() -> ! {
    #[rustfmt::skip]
    eprintln!("\
USAGE:
    swupdog <OPTIONS>

OPTIONS:
    [ -c | --config path ]        Configuration file (default {})
    [ -p | --path prefix ]        Root directory to apply the update under
    [ -u | --url url ]            Override both version and content URLs
    [ -d | --download-only ]      Download update content but do not apply it
    [ --log-level trace|debug|info|warn|error ]  Set logging verbosity",
        config::DEFAULT_CONFIG_PATH);
    process::exit(1)
}

/// The specified command line argument values.
struct Arguments {
    log_level: LevelFilter,
    config_path: PathBuf,
    path_prefix: Option<PathBuf>,
    url: Option<String>,
    download_only: bool,
}

fn parse_args(args: std::env::Args) -> Arguments {
    let mut log_level = None;
    let mut config_path = None;
    let mut path_prefix = None;
    let mut url = None;
    let mut download_only = false;

    let mut iter = args.skip(1);
    while let Some(arg) = iter.next() {
        match arg.as_ref() {
            "--log-level" => {
                let log_level_str = iter
                    .next()
                    .unwrap_or_else(|| usage_msg("Did not give argument to --log-level"));
                log_level = Some(LevelFilter::from_str(&log_level_str).unwrap_or_else(|_| {
                    usage_msg(format!("Invalid log level '{}'", log_level_str))
                }));
            }
            "-c" | "--config" => {
                config_path = Some(PathBuf::from(
                    iter.next()
                        .unwrap_or_else(|| usage_msg("Did not give argument to --config")),
                ));
            }
            "-p" | "--path" => {
                path_prefix = Some(PathBuf::from(
                    iter.next()
                        .unwrap_or_else(|| usage_msg("Did not give argument to --path")),
                ));
            }
            "-u" | "--url" => {
                url = Some(
                    iter.next()
                        .unwrap_or_else(|| usage_msg("Did not give argument to --url")),
                );
            }
            "-d" | "--download-only" => {
                download_only = true;
            }
            _ => usage(),
        }
    }

    Arguments {
        log_level: log_level.unwrap_or(LevelFilter::Info),
        config_path: config_path.unwrap_or_else(|| PathBuf::from(config::DEFAULT_CONFIG_PATH)),
        path_prefix,
        url,
        download_only,
    }
}

fn main_inner() -> Result<i32> {
    let arguments = parse_args(std::env::args());

    // TerminalMode::Mixed will send errors to stderr and anything less to stdout.
    TermLogger::init(
        arguments.log_level,
        LogConfig::default(),
        TerminalMode::Mixed,
        ColorChoice::Auto,
    )
    .context(error::LoggerSnafu)?;

    let mut config = Config::load(&arguments.config_path)?;
    if let Some(path_prefix) = arguments.path_prefix {
        config.path_prefix = path_prefix;
    }
    if let Some(url) = arguments.url {
        config.version_url = url.clone();
        config.content_url = url;
    }
    if arguments.download_only {
        config.download_only = true;
    }

    info!("Update started.");
    Ok(update::run_update(&config))
}

fn main() -> ! {
    process::exit(match main_inner() {
        Ok(code) => code,
        Err(err) => {
            eprintln!("{}", err);
            err.exit_code()
        }
    })
}
