//! Version negotiation: the installed version marker and the server's
//! latest-version marker.

use crate::config::Config;
use crate::error::{self, Result};
use crate::transport::Fetcher;
use log::warn;
use snafu::ResultExt;
use std::fs;

fn parse_version(content: &str) -> Result<u32> {
    content
        .trim()
        .parse()
        .context(error::VersionParseSnafu { content })
}

/// Reads the installed version from the state directory.
pub(crate) fn read_current_version(config: &Config) -> Result<u32> {
    let path = config.version_file();
    let content = fs::read_to_string(&path).context(error::CurrentVersionReadSnafu { path })?;
    parse_version(&content)
}

/// Reads the newest published version from the server. This is also the
/// reachability probe: if this fails, there is no server to update from.
pub(crate) fn read_server_version(config: &Config, fetcher: &dyn Fetcher) -> Result<u32> {
    let url = format!("{}/version/format/latest", config.version_url);
    let bytes = fetcher.fetch_bytes(&url)?;
    parse_version(&String::from_utf8_lossy(&bytes))
}

/// Records a newly-applied version in the state directory. Failures here
/// never change the update's exit status; the caller logs and moves on.
pub(crate) fn write_latest_version(config: &Config, version: u32) -> Result<()> {
    let path = config.version_file();
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).context(error::LatestVersionWriteSnafu { path: &path })?;
    }
    fs::write(&path, format!("{}\n", version))
        .context(error::LatestVersionWriteSnafu { path: &path })
}

/// Best-effort wrapper around [`write_latest_version`].
pub(crate) fn record_applied_version(config: &Config, version: u32) {
    if let Err(err) = write_latest_version(config, version) {
        warn!("Failed to record applied version: {}", err);
    }
}
