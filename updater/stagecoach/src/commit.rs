//! Commit: renaming shadows to their final names between global syncs.

use crate::error::{self, Result};
use crate::stage::{remove_existing, set_mode};
use crate::StagedTree;
use log::{debug, info};
use snafu::ResultExt;
use std::fs;
use update_manifest::{FileEntry, FileKind};

impl StagedTree {
    /// Applies the staged update: one global `sync()`, a rename of every
    /// shadow to its final name in list order, and a second `sync()` once
    /// the walk completes. Renames are atomic per entry; the first failure
    /// stops the walk and the update is partially applied.
    pub fn commit(&self, updates: &[FileEntry]) -> Result<()> {
        info!("Applying staged content");
        nix::unistd::sync();
        for entry in updates {
            if entry.do_not_update {
                continue;
            }
            self.rename_to_final(entry)?;
        }
        nix::unistd::sync();
        Ok(())
    }

    fn rename_to_final(&self, entry: &FileEntry) -> Result<()> {
        let final_path = self.final_path(entry);
        let shadow = self.shadow_path(entry);
        debug!("applying {}", entry.path);

        match entry.kind {
            FileKind::Tombstone => remove_existing(&final_path),
            FileKind::Directory => {
                if final_path.is_dir() {
                    set_mode(&final_path, entry.mode)?;
                    // The shadow was only created when the final directory
                    // was absent at staging time.
                    if shadow.is_dir() {
                        let _ = fs::remove_dir(&shadow);
                    }
                    Ok(())
                } else {
                    remove_existing(&final_path)?;
                    fs::rename(&shadow, &final_path).context(error::RenameSnafu {
                        from: &shadow,
                        to: &final_path,
                    })
                }
            }
            FileKind::Regular | FileKind::Symlink => {
                // rename(2) replaces files and symlinks atomically but not
                // directories, so clear a directory out of the way first.
                if final_path.is_dir() {
                    remove_existing(&final_path)?;
                }
                fs::rename(&shadow, &final_path).context(error::RenameSnafu {
                    from: &shadow,
                    to: &final_path,
                })
            }
        }
    }

    /// Best-effort removal of shadows after a failed commit. Returns how
    /// many were removed.
    pub fn sweep_shadows(&self, updates: &[FileEntry]) -> usize {
        let mut removed = 0;
        for entry in updates {
            let shadow = self.shadow_path(entry);
            if fs::symlink_metadata(&shadow).is_ok() && remove_existing(&shadow).is_ok() {
                removed += 1;
            }
        }
        if removed > 0 {
            info!("Removed {} leftover shadow files", removed);
        }
        removed
    }
}
