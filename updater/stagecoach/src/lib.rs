#![warn(clippy::pedantic)]

/*!
Shadow staging and commit for the update client.

Verified content is materialized at a shadow path adjacent to its final
location (`<path>.update`), then applied with atomic renames bracketed by
global `sync()` calls. The interval from the first rename to the final
sync is the on-disk critical section; a transition marker written before
it lets a later run detect and sweep an interrupted commit.
*/

mod commit;
pub mod error;
mod stage;

use crate::error::Result;
use crate::stage::remove_existing;
use log::info;
use snafu::ResultExt;
use std::fs;
use std::path::{Path, PathBuf};
use update_manifest::{FileEntry, FileHash};

/// The staging area for one update: the root the update applies under and
/// the directory of verified content-addressed blobs.
#[derive(Debug, Clone)]
pub struct StagedTree {
    path_prefix: PathBuf,
    staged_dir: PathBuf,
}

impl StagedTree {
    pub fn new<P1: Into<PathBuf>, P2: Into<PathBuf>>(path_prefix: P1, staged_dir: P2) -> Self {
        Self {
            path_prefix: path_prefix.into(),
            staged_dir: staged_dir.into(),
        }
    }

    /// Location of a verified blob in the staged directory.
    pub fn blob_path(&self, hash: FileHash) -> PathBuf {
        self.staged_dir.join(hash.to_string())
    }

    /// Where the entry lives once the update is applied.
    pub fn final_path(&self, entry: &FileEntry) -> PathBuf {
        self.path_prefix.join(entry.path.trim_start_matches('/'))
    }

    /// The shadow adjacent to the final location.
    pub fn shadow_path(&self, entry: &FileEntry) -> PathBuf {
        let mut shadow = self.final_path(entry).into_os_string();
        shadow.push(".update");
        PathBuf::from(shadow)
    }
}

/// Journal of an in-flight commit. Written before the first rename,
/// removed after the post-rename sync.
#[derive(Debug)]
pub struct TransitionMarker {
    path: PathBuf,
}

impl TransitionMarker {
    const FILENAME: &'static str = "transition";

    /// Persists the shadow list so an interrupted commit can be swept by
    /// the next run.
    pub fn write(state_dir: &Path, shadows: &[PathBuf]) -> Result<Self> {
        let path = state_dir.join(Self::FILENAME);
        let mut body = String::new();
        for shadow in shadows {
            body.push_str(&shadow.to_string_lossy());
            body.push('\n');
        }
        fs::write(&path, body).context(error::MarkerWriteSnafu { path: &path })?;
        Ok(Self { path })
    }

    pub fn clear(self) -> Result<()> {
        fs::remove_file(&self.path).context(error::MarkerRemoveSnafu { path: &self.path })
    }

    pub fn is_present(state_dir: &Path) -> bool {
        state_dir.join(Self::FILENAME).is_file()
    }

    /// Removes whatever shadows a previous, interrupted commit left
    /// behind, then the marker itself. Best-effort; returns the number of
    /// shadows removed.
    pub fn sweep(state_dir: &Path) -> usize {
        let path = state_dir.join(Self::FILENAME);
        let Ok(body) = fs::read_to_string(&path) else {
            return 0;
        };
        let mut removed = 0;
        for line in body.lines().filter(|line| !line.is_empty()) {
            let shadow = Path::new(line);
            if fs::symlink_metadata(shadow).is_ok() && remove_existing(shadow).is_ok() {
                removed += 1;
            }
        }
        let _ = fs::remove_file(&path);
        if removed > 0 {
            info!("Swept {} shadow files from an interrupted update", removed);
        }
        removed
    }
}
