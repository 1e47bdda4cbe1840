//! Updater configuration, read once at startup and passed by reference
//! into every component. The mix branch gets a derived record rather than
//! mutated globals.

use crate::error::{self, Result};
use serde::Deserialize;
use snafu::ResultExt;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub(crate) const DEFAULT_CONFIG_PATH: &str = "/etc/swupdog.toml";

fn default_path_prefix() -> PathBuf {
    PathBuf::from("/")
}

fn default_state_dir() -> PathBuf {
    PathBuf::from("/var/lib/swupdog")
}

fn default_max_tries() -> u32 {
    3
}

fn default_retry_delay_secs() -> u64 {
    10
}

fn default_require_current_manifest() -> bool {
    true
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct Config {
    /// Base URL the latest-version marker is read from.
    pub version_url: String,
    /// Base URL for manifests, packs, deltas, and file blobs.
    pub content_url: String,
    /// Root directory the update is applied under.
    #[serde(default = "default_path_prefix")]
    pub path_prefix: PathBuf,
    #[serde(default = "default_state_dir")]
    pub state_dir: PathBuf,
    /// Bounded retry count for any single network operation.
    #[serde(default = "default_max_tries")]
    pub max_tries: u32,
    /// First backoff delay; doubles on every retry.
    #[serde(default = "default_retry_delay_secs")]
    pub retry_delay_secs: u64,
    /// Stop after the download phase, leaving the tree untouched.
    #[serde(default)]
    pub download_only: bool,
    /// Content URLs are local filesystem paths, not HTTP.
    #[serde(default)]
    pub local_download: bool,
    /// Failing to load the installed release's MoM aborts the update when
    /// set; otherwise the update proceeds with deltas disabled.
    #[serde(default = "default_require_current_manifest")]
    pub require_current_manifest: bool,
    #[serde(default)]
    pub pre_update_script: Option<PathBuf>,
    #[serde(default)]
    pub post_update_script: Option<PathBuf>,
}

impl Config {
    pub(crate) fn load(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path).context(error::ConfigReadSnafu { path })?;
        toml::from_str(&raw).context(error::ConfigParseSnafu { path })
    }

    pub(crate) fn retry_delay(&self) -> Duration {
        Duration::from_secs(self.retry_delay_secs)
    }

    /// Content-addressed blobs, by hex hash.
    pub(crate) fn staged_dir(&self) -> PathBuf {
        self.state_dir.join("staged")
    }

    /// In-flight downloads (packs, deltas, unverified blobs).
    pub(crate) fn download_dir(&self) -> PathBuf {
        self.state_dir.join("download")
    }

    pub(crate) fn telemetry_dir(&self) -> PathBuf {
        self.state_dir.join("telemetry")
    }

    /// Cached manifests for one release.
    pub(crate) fn manifest_cache_dir(&self, version: u32) -> PathBuf {
        self.state_dir.join(version.to_string())
    }

    /// The installed version marker.
    pub(crate) fn version_file(&self) -> PathBuf {
        self.state_dir.join("version").join("format")
    }

    /// Marker files naming the installed bundles.
    pub(crate) fn bundles_dir(&self) -> PathBuf {
        self.path_prefix.join("usr/share/swupdog/bundles")
    }

    /// Locally-published mix content, when present.
    pub(crate) fn mix_dir(&self) -> PathBuf {
        self.path_prefix.join("usr/share/swupdog/mix")
    }

    /// The record the mix branch runs under: content comes from the mix
    /// directory on the local filesystem, state is kept apart from
    /// upstream state so version numbers cannot collide, and retries are
    /// disabled because a local miss is never transient.
    pub(crate) fn for_mix(&self) -> Config {
        let mix = self.mix_dir().display().to_string();
        Config {
            version_url: mix.clone(),
            content_url: mix,
            path_prefix: self.path_prefix.clone(),
            state_dir: self.state_dir.join("mix"),
            max_tries: 0,
            retry_delay_secs: self.retry_delay_secs,
            download_only: false,
            local_download: true,
            require_current_manifest: false,
            pre_update_script: None,
            post_update_script: None,
        }
    }
}
