//! Subscriptions: which bundles this system has opted into, and the
//! transitive closure of their includes.

use crate::config::Config;
use crate::error::{self, Result};
use crate::mom::ManifestStore;
use crate::retry::with_retries;
use log::warn;
use snafu::ResultExt;
use std::collections::{HashSet, VecDeque};
use std::fs;
use update_manifest::{Manifest, Mom};

/// One installed bundle, with its versions on both sides of the update
/// once [`set_subscription_versions`] has run.
#[derive(Debug, Clone)]
pub(crate) struct Subscription {
    pub component: String,
    pub current_version: u32,
    pub server_version: u32,
}

impl Subscription {
    pub(crate) fn new<S: Into<String>>(component: S) -> Self {
        Self {
            component: component.into(),
            current_version: 0,
            server_version: 0,
        }
    }
}

/// Seeds the subscription set from the on-disk bundle markers.
pub(crate) fn read_subscriptions(config: &Config) -> Result<Vec<Subscription>> {
    let dir = config.bundles_dir();
    let entries = fs::read_dir(&dir).context(error::ReadBundlesSnafu { path: &dir })?;
    let mut subs = Vec::new();
    for entry in entries {
        let entry = entry.context(error::ReadBundlesSnafu { path: &dir })?;
        if let Ok(name) = entry.file_name().into_string() {
            subs.push(Subscription::new(name));
        }
    }
    subs.sort_by(|a, b| a.component.cmp(&b.component));
    Ok(subs)
}

/// Materializes the sub-manifests a MoM implies for a subscription set:
/// fetch each subscribed bundle's manifest, scan its includes, enqueue
/// unseen names, until the frontier is empty. Bundle names are visited at
/// most once, so the result is unique by name. Each fetch retries on the
/// configured schedule; exhaustion fails the recursion.
pub(crate) fn recurse_manifest(
    config: &Config,
    store: &ManifestStore<'_>,
    mom: &Mom,
    subs: &[Subscription],
) -> Result<Vec<Manifest>> {
    let mut seen: HashSet<String> = HashSet::new();
    let mut frontier: VecDeque<String> = VecDeque::new();
    for sub in subs {
        if seen.insert(sub.component.clone()) {
            frontier.push_back(sub.component.clone());
        }
    }

    let mut manifests = Vec::new();
    while let Some(name) = frontier.pop_front() {
        let Some(info) = mom.bundle(&name) else {
            warn!(
                "Subscribed bundle '{}' is not in the version {} manifest",
                name, mom.version
            );
            continue;
        };
        let manifest = with_retries(
            "downloading sub-manifest",
            config.max_tries,
            config.retry_delay(),
            || store.load_bundle_manifest(info),
        )
        .map_err(|err| {
            warn!("Cannot load sub-manifest for '{}': {}", name, err);
            error::RecurseManifestSnafu { bundle: &name }.build()
        })?;
        for include in &manifest.includes {
            if seen.insert(include.clone()) {
                frontier.push_back(include.clone());
            }
        }
        manifests.push(manifest);
    }
    Ok(manifests)
}

/// Extends a subscription set with every bundle the recursion pulled in
/// through includes.
pub(crate) fn add_included_manifests(
    subs: &[Subscription],
    manifests: &[Manifest],
) -> Vec<Subscription> {
    let have: HashSet<&str> = subs.iter().map(|s| s.component.as_str()).collect();
    let mut extended = subs.to_vec();
    for manifest in manifests {
        if !have.contains(manifest.name.as_str()) {
            extended.push(Subscription::new(manifest.name.clone()));
        }
    }
    extended
}

/// Records, per bundle, the version installed and the version the server
/// publishes. The pair is the directed current-to-server link the delta
/// and pack stages consume.
pub(crate) fn set_subscription_versions(
    subs: &mut [Subscription],
    current_mom: Option<&Mom>,
    server_mom: &Mom,
) {
    for sub in subs {
        sub.current_version = current_mom
            .and_then(|mom| mom.bundle(&sub.component))
            .map_or(0, |b| b.version);
        sub.server_version = server_mom.bundle(&sub.component).map_or(0, |b| b.version);
    }
}
