//! The update driver: composes version negotiation, manifest loading,
//! downloads, staging, and commit, and owns the single teardown path
//! every outcome funnels through (telemetry, step times, lock release).

use crate::config::Config;
use crate::download::DownloadEngine;
use crate::error::{self, Result};
use crate::lock;
use crate::mix::{self, MixUpdate};
use crate::mom::ManifestStore;
use crate::packs;
use crate::retry::with_retries;
use crate::scripts;
use crate::signature::DigestSidecar;
use crate::subscriptions;
use crate::telemetry::{self, UpdateRecord};
use crate::transport::Transport;
use crate::version;
use log::{error, info, warn};
use snafu::ResultExt;
use stagecoach::{StagedTree, TransitionMarker};
use std::fs;
use std::path::PathBuf;
use std::time::{Duration, Instant};
use update_manifest::{
    consolidate_files, create_update_list, files_from_bundles, link_renames, FileEntry,
};

/// Wall-clock per pipeline step, reported at the end of the run.
struct StepTimes(Vec<(&'static str, Duration)>);

impl StepTimes {
    fn new() -> Self {
        Self(Vec::new())
    }

    fn time<T>(&mut self, step: &'static str, body: impl FnOnce() -> T) -> T {
        let start = Instant::now();
        let result = body();
        self.0.push((step, start.elapsed()));
        result
    }

    fn print(&self) {
        for (step, took) in &self.0 {
            info!("{}: {:.1}s", step, took.as_secs_f64());
        }
    }
}

/// Runs the whole update and returns the process exit code. Exactly one
/// telemetry record is emitted no matter which stage failed.
pub(crate) fn run_update(config: &Config) -> i32 {
    let start = Instant::now();
    let mut times = StepTimes::new();
    let mut versions = (None, None);
    let result = drive(config, &mut times, &mut versions);
    let elapsed = start.elapsed();
    let (current_version, server_version) = versions;

    let code = match &result {
        Ok(()) => 0,
        Err(err) => {
            error!("{}", err);
            err.exit_code()
        }
    };
    telemetry::emit(
        config,
        &UpdateRecord {
            current_version,
            server_version,
            result: code,
            elapsed,
        },
    );
    times.print();

    if let (Some(current), Some(server)) = (current_version, server_version) {
        if server > current {
            info!("Update took {:.1} seconds", elapsed.as_secs_f64());
        }
        if code == 0 && server > current {
            info!(
                "Update successful. System updated from version {} to version {}",
                current, server
            );
        } else if code == 0 {
            info!(
                "Update complete. System already up-to-date at version {}",
                current
            );
        }
    }
    code
}

#[allow(clippy::too_many_lines)]
fn drive(
    config: &Config,
    times: &mut StepTimes,
    versions: &mut (Option<u32>, Option<u32>),
) -> Result<()> {
    prepare_state_dirs(config)?;
    let _lock = lock::acquire(&config.state_dir)?;

    // A marker means a previous run died inside its commit; sweep its
    // leftovers before touching anything.
    if TransitionMarker::is_present(&config.state_dir) {
        TransitionMarker::sweep(&config.state_dir);
    }

    let transport = Transport::new(config)?;
    let store = ManifestStore::new(config, &transport, &DigestSidecar);

    // Step 1: versions.
    let (current_version, server_version) = times.time("Get versions", || -> Result<_> {
        let current = version::read_current_version(config)?;
        versions.0 = Some(current);
        let server = match version::read_server_version(config, &transport) {
            Ok(server) => server,
            Err(err) => {
                error!("Network issue, unable to reach update server: {}", err);
                return error::NoServerSnafu.fail();
            }
        };
        versions.1 = Some(server);
        Ok((current, server))
    })?;

    if server_version <= current_version {
        info!(
            "Version on server ({}) is not newer than system version ({})",
            server_version, current_version
        );
        return Ok(());
    }
    info!(
        "Preparing to update from {} to {}",
        current_version, server_version
    );

    // Step 2: housekeeping. In-flight leftovers of a dead run are stale.
    clean_download_dir(config)?;

    // Step 3: the MoMs for both releases.
    let (current_mom, server_mom) = times.time("Load manifests", || -> Result<_> {
        let current_mom = match with_retries(
            "downloading current MoM",
            config.max_tries,
            config.retry_delay(),
            || store.load_mom(current_version),
        ) {
            Ok(mom) => Some(mom),
            Err(err) if !config.require_current_manifest => {
                warn!("Cannot load current manifest, continuing without deltas: {}", err);
                None
            }
            Err(err) => {
                error!("Failure retrieving manifest from server: {}", err);
                return error::MomNotFoundSnafu {
                    version: current_version,
                }
                .fail();
            }
        };
        let server_mom = with_retries(
            "downloading server MoM",
            config.max_tries,
            config.retry_delay(),
            || store.load_mom(server_version),
        )
        .map_err(|err| {
            error!(
                "Unable to load manifest after retrying (config or network problem?): {}",
                err
            );
            error::MomNotFoundSnafu {
                version: server_version,
            }
            .build()
        })?;
        Ok((current_mom, server_mom))
    })?;

    // Step 4: sub-manifests on both sides; recursion pulls in includes.
    let subs = subscriptions::read_subscriptions(config)?;
    let (current_files, server_files, latest_subs) =
        times.time("Recurse and consolidate manifests", || -> Result<_> {
            let current_manifests = match &current_mom {
                Some(mom) => subscriptions::recurse_manifest(config, &store, mom, &subs)?,
                None => Vec::new(),
            };
            let server_manifests =
                subscriptions::recurse_manifest(config, &store, &server_mom, &subs)?;
            let mut latest_subs = subscriptions::add_included_manifests(&subs, &server_manifests);
            subscriptions::set_subscription_versions(
                &mut latest_subs,
                current_mom.as_ref(),
                &server_mom,
            );
            let current_files = consolidate_files(files_from_bundles(&current_manifests));
            let server_files = consolidate_files(files_from_bundles(&server_manifests));
            Ok((current_files, server_files, latest_subs))
        })?;

    times.time("Pre-update scripts", || {
        scripts::run_hook(
            "pre-update",
            config.pre_update_script.as_deref(),
            &config.path_prefix,
        );
    });

    // Step 5: packs. Missing packs are normal; a dead server is not.
    times.time("Download packs", || -> Result<()> {
        with_retries(
            "downloading packs",
            config.max_tries,
            config.retry_delay(),
            || packs::download_subscribed_packs(config, &transport, &latest_subs),
        )
        .map_err(|err| {
            error!("No network, or server unavailable for pack downloads: {}", err);
            error::NoServerSnafu.build()
        })
    })?;

    // Step 6: the update list.
    let updates = times.time("Create update list", || {
        let mut updates = create_update_list(&current_files, &server_files);
        link_renames(&mut updates, &current_files);
        updates
    });
    print_statistics(&updates);

    // Mix setup failures cost the overlay, never the upstream update.
    let mix = if mix::check_mix_exists(config) {
        match mix::setup_mix_update(config) {
            Ok(mix) => mix,
            Err(err) => {
                warn!("Cannot set up mix content, continuing without it: {}", err);
                None
            }
        }
    } else {
        None
    };

    // Step 7: downloads. Upstream retries on its schedule; mix content is
    // only fetched once everything upstream has arrived, so both lists
    // can stage together.
    let nonpack = times.time("Download loop", || {
        let engine = DownloadEngine::new(config, &transport);
        engine
            .download_all(&updates, server_version)
            .map(|outcome| outcome.nonpack)
    })?;
    let mix = match mix {
        Some(m) => match download_mix(&m) {
            Ok(()) => Some(m),
            Err(err) => {
                warn!("Mix content download failed, continuing without it: {}", err);
                None
            }
        },
        None => None,
    };

    if config.download_only {
        info!("Downloads complete; skipping staging as requested");
        return error::DownloadOnlySnafu.fail();
    }

    // Steps 8 and 9: the critical section.
    times.time("Staging and commit", || {
        apply(config, &updates, mix.as_ref())
    })?;

    // A failure to record the new version never fails the update.
    version::record_applied_version(config, server_version);
    info!("Update was applied.");

    times.time("Post-update scripts", || {
        scripts::run_hook(
            "post-update",
            config.post_update_script.as_deref(),
            &config.path_prefix,
        );
    });

    if nonpack > 0 {
        info!("{} files were not in a pack", nonpack);
    }
    Ok(())
}

fn download_mix(mix: &MixUpdate) -> Result<()> {
    let transport = Transport::new(&mix.config)?;
    let engine = DownloadEngine::new(&mix.config, &transport);
    engine
        .download_all(&mix.updates, mix.server_version)
        .map(drop)
}

/// Stages upstream and mix content, then commits both inside one marked
/// critical section. Upstream staging failure is fatal and leaves the
/// committer unentered; mix staging failure only drops the overlay.
fn apply(config: &Config, updates: &[FileEntry], mix: Option<&MixUpdate>) -> Result<()> {
    let tree = StagedTree::new(&config.path_prefix, config.staged_dir());
    tree.stage_all(updates).context(error::StagingSnafu)?;

    let mix = match mix {
        Some(m) => {
            let mix_tree = StagedTree::new(&config.path_prefix, m.config.staged_dir());
            match mix_tree.stage_all(&m.updates) {
                Ok(_) => Some((m, mix_tree)),
                Err(err) => {
                    warn!("Mix staging failed, continuing with upstream content only: {}", err);
                    mix_tree.sweep_shadows(&m.updates);
                    None
                }
            }
        }
        None => None,
    };

    let mut shadows: Vec<PathBuf> = updates.iter().map(|entry| tree.shadow_path(entry)).collect();
    if let Some((m, mix_tree)) = &mix {
        shadows.extend(m.updates.iter().map(|entry| mix_tree.shadow_path(entry)));
    }
    let marker =
        TransitionMarker::write(&config.state_dir, &shadows).context(error::CommitSnafu)?;

    let mut outcome = tree.commit(updates);
    if outcome.is_ok() {
        if let Some((m, mix_tree)) = &mix {
            // The overlay commits second so its content wins.
            outcome = mix_tree.commit(&m.updates);
        }
    }
    match outcome {
        Ok(()) => {
            if let Err(err) = marker.clear() {
                warn!("Could not remove transition marker: {}", err);
            }
            if let Some((m, _)) = &mix {
                version::record_applied_version(&m.config, m.server_version);
            }
            Ok(())
        }
        Err(err) => {
            // Partially applied. Drop what never made it and report a
            // hard failure.
            tree.sweep_shadows(updates);
            if let Some((m, mix_tree)) = &mix {
                mix_tree.sweep_shadows(&m.updates);
            }
            if let Err(marker_err) = marker.clear() {
                warn!("Could not remove transition marker: {}", marker_err);
            }
            Err(err).context(error::CommitSnafu)
        }
    }
}

fn print_statistics(updates: &[FileEntry]) {
    let deleted = updates.iter().filter(|u| u.is_deleted()).count();
    let changed = updates.iter().filter(|u| u.delta_from.is_some()).count();
    let new = updates.len() - deleted - changed;
    info!(
        "{} files to update: {} changed, {} new, {} deleted",
        updates.len(),
        changed,
        new,
        deleted
    );
}

fn prepare_state_dirs(config: &Config) -> Result<()> {
    for dir in [
        config.state_dir.clone(),
        config.staged_dir(),
        config.download_dir(),
        config.telemetry_dir(),
    ] {
        fs::create_dir_all(&dir).context(error::StateDirCreateSnafu { path: &dir })?;
    }
    Ok(())
}

fn clean_download_dir(config: &Config) -> Result<()> {
    let dir = config.download_dir();
    if dir.is_dir() {
        fs::remove_dir_all(&dir).context(error::StateDirCreateSnafu { path: &dir })?;
    }
    fs::create_dir_all(&dir).context(error::StateDirCreateSnafu { path: &dir })
}
