//! The mix overlay: locally-published content that overlays upstream at
//! update time.
//!
//! The mix branch reruns the manifest pipeline against the mix directory
//! using a derived configuration (local content, isolated state, no
//! retries). Its failures never fail the upstream update; the caller
//! logs and drops the overlay.

use crate::config::Config;
use crate::error::{self, Result};
use crate::mom::ManifestStore;
use crate::signature::DigestSidecar;
use crate::subscriptions::{recurse_manifest, Subscription};
use crate::transport::Transport;
use crate::version;
use log::info;
use snafu::ResultExt;
use std::fs;
use update_manifest::{
    consolidate_files, create_update_list, files_from_bundles, link_renames, FileEntry, Mom,
};

pub(crate) struct MixUpdate {
    /// The derived configuration the overlay runs under.
    pub config: Config,
    pub updates: Vec<FileEntry>,
    pub server_version: u32,
}

pub(crate) fn check_mix_exists(config: &Config) -> bool {
    config.mix_dir().is_dir()
}

// Mix bundle markers live beside the mix content; a mix without markers
// subscribes to everything it publishes.
fn read_mix_subscriptions(config: &Config, server_mom: &Mom) -> Vec<Subscription> {
    let dir = config.mix_dir().join("bundles");
    let Ok(entries) = fs::read_dir(&dir) else {
        return server_mom
            .bundles
            .iter()
            .map(|bundle| Subscription::new(bundle.name.clone()))
            .collect();
    };
    let mut subs: Vec<Subscription> = entries
        .filter_map(|entry| entry.ok())
        .filter_map(|entry| entry.file_name().into_string().ok())
        .map(Subscription::new)
        .collect();
    subs.sort_by(|a, b| a.component.cmp(&b.component));
    subs
}

/// Builds the mix update list, or `None` when the published mix is not
/// newer than what is applied. Content comes from the local filesystem,
/// so nothing here retries; the first miss is final.
pub(crate) fn setup_mix_update(config: &Config) -> Result<Option<MixUpdate>> {
    let mix_config = config.for_mix();
    for dir in [mix_config.staged_dir(), mix_config.download_dir()] {
        fs::create_dir_all(&dir).context(error::StateDirCreateSnafu { path: &dir })?;
    }

    let transport = Transport::new(&mix_config)?;
    let store = ManifestStore::new(&mix_config, &transport, &DigestSidecar);

    // First mix application starts from nothing.
    let current = version::read_current_version(&mix_config).unwrap_or(0);
    let latest = version::read_server_version(&mix_config, &transport)?;
    if latest <= current {
        info!(
            "Mix version on disk ({}) is not newer than applied mix version ({})",
            latest, current
        );
        return Ok(None);
    }

    let current_mom = if current > 0 {
        Some(store.load_mom(current)?)
    } else {
        None
    };
    let server_mom = store.load_mom(latest)?;
    let subs = read_mix_subscriptions(&mix_config, &server_mom);

    let current_manifests = match &current_mom {
        Some(mom) => recurse_manifest(&mix_config, &store, mom, &subs)?,
        None => Vec::new(),
    };
    let server_manifests = recurse_manifest(&mix_config, &store, &server_mom, &subs)?;

    let current_files = consolidate_files(files_from_bundles(&current_manifests));
    let server_files = consolidate_files(files_from_bundles(&server_manifests));
    let mut updates = create_update_list(&current_files, &server_files);
    link_renames(&mut updates, &current_files);

    info!(
        "Mix overlay: {} files from mix version {} to {}",
        updates.len(),
        current,
        latest
    );
    Ok(Some(MixUpdate {
        config: mix_config,
        updates,
        server_version: latest,
    }))
}
