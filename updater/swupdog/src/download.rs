//! The delta and full-download engines, and the bounded retry loop that
//! drives them.
//!
//! Each round attempts deltas first, then opens a download batch for
//! whatever is still missing. A non-empty failed set sleeps out the next
//! backoff delay and the following round works the failed subset only.
//! Nothing here touches the tree under `path_prefix`; until the stager
//! runs, all output lands in the state directory.

use crate::config::Config;
use crate::delta;
use crate::error::{self, Result};
use crate::retry::Backoff;
use crate::transport::Fetcher;
use log::{debug, error, info};
use snafu::ResultExt;
use std::fs;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};
use std::thread;
use update_manifest::{FileEntry, FileHash};

/// Concurrent requests per download batch.
const SESSION_WORKERS: usize = 8;

#[derive(Debug)]
pub(crate) struct DownloadOutcome {
    /// Files that had to be fetched individually rather than arriving in
    /// a pack.
    pub nonpack: usize,
}

pub(crate) struct DownloadEngine<'a> {
    config: &'a Config,
    fetcher: &'a dyn Fetcher,
}

impl<'a> DownloadEngine<'a> {
    pub(crate) fn new(config: &'a Config, fetcher: &'a dyn Fetcher) -> Self {
        Self { config, fetcher }
    }

    fn blob_path(&self, hash: FileHash) -> PathBuf {
        self.config.staged_dir().join(hash.to_string())
    }

    /// Whether the entry's verified content is already in the staged
    /// directory, from a pack, an earlier round, or a delta.
    fn blob_ready(&self, entry: &FileEntry) -> bool {
        FileHash::of_file(self.blob_path(entry.hash)).map_or(false, |hash| hash == entry.hash)
    }

    // Blobs are completed under a .part name and renamed in, so a crash
    // never leaves a half-written blob under a valid hash name.
    fn store_blob(&self, hash: FileHash, content: &[u8]) -> Result<()> {
        let partial = self.config.download_dir().join(format!("{}.part", hash));
        fs::write(&partial, content).context(error::StagedBlobWriteSnafu { path: &partial })?;
        let blob = self.blob_path(hash);
        fs::rename(&partial, &blob).context(error::StagedBlobWriteSnafu { path: &blob })
    }

    /// The delta pass: try to synthesize each missing regular file from
    /// local content. Success is silent and failures are absorbed; every
    /// entry this pass does not produce falls to the full download.
    fn try_delta_pass(&self, candidates: &[FileEntry], version: u32) {
        for entry in candidates {
            if !entry.is_file() || self.blob_ready(entry) {
                continue;
            }
            match self.try_delta(entry, version) {
                Ok(true) => debug!("synthesized {} from local content", entry.path),
                Ok(false) => {}
                Err(err) => debug!("no delta for {}: {}", entry.path, err),
            }
        }
    }

    fn try_delta(&self, entry: &FileEntry, version: u32) -> Result<bool> {
        // A rename candidate's exact content already exists on disk under
        // another name; no download needed at all.
        if let Some(rename_from) = &entry.rename_from {
            let source = self
                .config
                .path_prefix
                .join(rename_from.trim_start_matches('/'));
            let content = fs::read(&source).context(error::FetchLocalSnafu { path: &source })?;
            if FileHash::of_bytes(&content) == entry.hash {
                self.store_blob(entry.hash, &content)?;
                return Ok(true);
            }
            return Ok(false);
        }

        let Some(from) = entry.delta_from else {
            return Ok(false);
        };
        let installed = self
            .config
            .path_prefix
            .join(entry.path.trim_start_matches('/'));
        let predecessor =
            fs::read(&installed).context(error::FetchLocalSnafu { path: &installed })?;
        if FileHash::of_bytes(&predecessor) != from {
            // Locally modified; the full download will supply it.
            return Ok(false);
        }

        let name = delta::delta_name(from, entry.hash);
        let url = format!("{}/{}/delta/{}", self.config.content_url, version, name);
        let dest = self.config.download_dir().join(&name);
        self.fetcher.fetch(&url, &dest)?;
        let patch = fs::read(&dest).context(error::FetchLocalSnafu { path: &dest })?;
        let _ = fs::remove_file(&dest);

        let target = delta::apply_delta(&patch, &predecessor)?;
        self.store_blob(entry.hash, &target)?;
        Ok(true)
    }

    /// One full-download batch: every candidate with content that is not
    /// already staged is queued, the batch drains to quiescence, and the
    /// failed subset comes back in filename order.
    fn full_download(&self, candidates: &[FileEntry], version: u32) -> Vec<FileEntry> {
        let queue: Vec<&FileEntry> = candidates
            .iter()
            .filter(|entry| entry.has_content() && !self.blob_ready(entry))
            .collect();
        if queue.is_empty() {
            return Vec::new();
        }
        info!("Downloading {} files", queue.len());

        let next = AtomicUsize::new(0);
        let failed = Mutex::new(Vec::new());
        let workers = SESSION_WORKERS.min(queue.len());
        thread::scope(|scope| {
            for _ in 0..workers {
                scope.spawn(|| loop {
                    let idx = next.fetch_add(1, Ordering::SeqCst);
                    let Some(entry) = queue.get(idx) else {
                        break;
                    };
                    if let Err(err) = self.fetch_one(entry, version) {
                        debug!("download of {} failed: {}", entry.path, err);
                        failed
                            .lock()
                            .unwrap_or_else(PoisonError::into_inner)
                            .push((*entry).clone());
                    }
                });
            }
        });

        let mut failed = failed
            .into_inner()
            .unwrap_or_else(PoisonError::into_inner);
        update_manifest::sort_by_filename(&mut failed);
        failed
    }

    fn fetch_one(&self, entry: &FileEntry, version: u32) -> Result<()> {
        let url = format!("{}/{}/files/{}", self.config.content_url, version, entry.hash);
        let dest = self.config.download_dir().join(entry.hash.to_string());
        self.fetcher.fetch(&url, &dest)?;
        let actual =
            FileHash::of_file(&dest).context(error::FetchLocalSnafu { path: &dest })?;
        if actual != entry.hash {
            let _ = fs::remove_file(&dest);
            return error::BlobVerifySnafu {
                hash: entry.hash,
                actual,
            }
            .fail();
        }
        fs::rename(&dest, self.blob_path(entry.hash))
            .context(error::StagedBlobWriteSnafu { path: &dest })
    }

    /// Acquires content for the whole update list: delta pass, download
    /// batch, then geometric backoff and another round over the failed
    /// subset, up to the configured retry bound.
    pub(crate) fn download_all(
        &self,
        updates: &[FileEntry],
        version: u32,
    ) -> Result<DownloadOutcome> {
        let nonpack = updates
            .iter()
            .filter(|entry| entry.has_content() && !self.blob_ready(entry))
            .count();

        let mut candidates: Vec<FileEntry> = updates.to_vec();
        let mut backoff = Backoff::new(self.config.retry_delay(), self.config.max_tries);
        let mut retries = 0;
        loop {
            self.try_delta_pass(&candidates, version);
            let failed = self.full_download(&candidates, version);
            if failed.is_empty() {
                return Ok(DownloadOutcome { nonpack });
            }
            match backoff.next() {
                Some(delay) => {
                    retries += 1;
                    thread::sleep(delay);
                    info!("Starting download retry #{}", retries);
                    candidates = failed;
                }
                None => {
                    error!("Could not download all files, aborting update");
                    return error::CouldNotDownloadSnafu {
                        failed: failed.len(),
                    }
                    .fail();
                }
            }
        }
    }
}
