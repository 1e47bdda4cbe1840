//! Staging: materializing verified content at shadow paths.

use crate::error::{self, Result};
use crate::StagedTree;
use log::{debug, info};
use snafu::{ensure, ResultExt};
use std::fs;
use std::os::unix::fs::{symlink, PermissionsExt};
use std::path::{Path, PathBuf};
use update_manifest::{FileEntry, FileHash, FileKind};

impl StagedTree {
    /// Stages every entry that is not a tombstone and not frozen, walking
    /// the list in its given order. The caller passes the update list in
    /// ascending filename order so parent directories are handled before
    /// their contents. The first failure aborts; shadows staged so far are
    /// left in place for inspection.
    pub fn stage_all(&self, updates: &[FileEntry]) -> Result<usize> {
        info!("Staging file content");
        let mut staged = 0;
        for entry in updates {
            if entry.do_not_update || entry.is_deleted() {
                continue;
            }
            self.stage_entry(entry)?;
            staged += 1;
        }
        Ok(staged)
    }

    fn stage_entry(&self, entry: &FileEntry) -> Result<()> {
        let final_path = self.final_path(entry);
        let shadow = self.shadow_path(entry);
        if let Some(parent) = final_path.parent() {
            fs::create_dir_all(parent).context(error::CreateParentSnafu { path: &final_path })?;
        }
        debug!("staging {}", entry.path);

        match entry.kind {
            FileKind::Directory => {
                // An existing directory only needs its permissions
                // refreshed, which the commit walk does in place.
                if !final_path.is_dir() {
                    if !shadow.is_dir() {
                        remove_existing(&shadow)?;
                        fs::create_dir(&shadow)
                            .context(error::MaterializeSnafu { path: &shadow })?;
                    }
                    set_mode(&shadow, entry.mode)?;
                    take_ownership(&shadow)?;
                }
            }
            FileKind::Regular => {
                let blob = self.blob_path(entry.hash);
                verify_blob(&blob, entry)?;
                remove_existing(&shadow)?;
                // Shadows are copies rather than hardlinks so per-entry
                // modes never alias through a shared blob inode.
                fs::copy(&blob, &shadow).context(error::MaterializeSnafu { path: &shadow })?;
                set_mode(&shadow, entry.mode)?;
                take_ownership(&shadow)?;
            }
            FileKind::Symlink => {
                let blob = self.blob_path(entry.hash);
                verify_blob(&blob, entry)?;
                let target = fs::read(&blob).context(error::MissingBlobSnafu { path: &blob })?;
                let target = PathBuf::from(String::from_utf8_lossy(&target).into_owned());
                remove_existing(&shadow)?;
                symlink(&target, &shadow).context(error::MaterializeSnafu { path: &shadow })?;
            }
            FileKind::Tombstone => {}
        }
        Ok(())
    }
}

fn verify_blob(blob: &Path, entry: &FileEntry) -> Result<()> {
    let actual = FileHash::of_file(blob).context(error::MissingBlobSnafu { path: blob })?;
    ensure!(
        actual == entry.hash,
        error::HashMismatchSnafu {
            path: blob,
            expected: entry.hash,
            actual,
        }
    );
    Ok(())
}

pub(crate) fn set_mode(path: &Path, mode: u32) -> Result<()> {
    fs::set_permissions(path, fs::Permissions::from_mode(mode))
        .context(error::SetPermissionsSnafu { path })
}

// Manifest entries install as root-owned; unprivileged runs keep the
// invoking user so tests and download-only runs work without CAP_CHOWN.
pub(crate) fn take_ownership(path: &Path) -> Result<()> {
    if !nix::unistd::geteuid().is_root() {
        return Ok(());
    }
    nix::unistd::chown(
        path,
        Some(nix::unistd::Uid::from_raw(0)),
        Some(nix::unistd::Gid::from_raw(0)),
    )
    .context(error::SetOwnershipSnafu { path })
}

pub(crate) fn remove_existing(path: &Path) -> Result<()> {
    match fs::symlink_metadata(path) {
        Ok(meta) if meta.is_dir() => {
            fs::remove_dir_all(path).context(error::RemoveSnafu { path })
        }
        Ok(_) => fs::remove_file(path).context(error::RemoveSnafu { path }),
        Err(_) => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use tempfile::TempDir;

    struct Scratch {
        _root: TempDir,
        prefix: PathBuf,
        staged: PathBuf,
        tree: StagedTree,
    }

    fn scratch() -> Scratch {
        let root = TempDir::new().unwrap();
        let prefix = root.path().join("rootfs");
        let staged = root.path().join("staged");
        fs::create_dir_all(&prefix).unwrap();
        fs::create_dir_all(&staged).unwrap();
        let tree = StagedTree::new(&prefix, &staged);
        Scratch {
            _root: root,
            prefix,
            staged,
            tree,
        }
    }

    fn regular(path: &str, content: &[u8]) -> FileEntry {
        FileEntry {
            path: path.to_string(),
            hash: FileHash::of_bytes(content),
            kind: FileKind::Regular,
            mode: 0o644,
            do_not_update: false,
            delta_from: None,
            rename_from: None,
        }
    }

    fn put_blob(scratch: &Scratch, content: &[u8]) {
        let hash = FileHash::of_bytes(content);
        fs::write(scratch.staged.join(hash.to_string()), content).unwrap();
    }

    #[test]
    fn stages_regular_file_as_shadow() {
        let scratch = scratch();
        put_blob(&scratch, b"release 110");
        let entry = regular("/usr/lib/os-release", b"release 110");

        assert_eq!(scratch.tree.stage_all(&[entry.clone()]).unwrap(), 1);

        let shadow = scratch.tree.shadow_path(&entry);
        assert_eq!(fs::read(&shadow).unwrap(), b"release 110");
        assert!(!scratch.tree.final_path(&entry).exists());
        let mode = fs::metadata(&shadow).unwrap().permissions().mode();
        assert_eq!(mode & 0o7777, 0o644);
    }

    #[test]
    fn corrupt_blob_aborts_staging() {
        let scratch = scratch();
        let entry = regular("/usr/bin/tool", b"good bits");
        // Blob stored under the declared hash, but with the wrong content.
        fs::write(
            scratch.staged.join(entry.hash.to_string()),
            b"tampered bits",
        )
        .unwrap();

        let err = scratch.tree.stage_all(&[entry.clone()]).unwrap_err();
        assert!(matches!(err, Error::HashMismatch { .. }));
        assert!(!scratch.tree.shadow_path(&entry).exists());
    }

    #[test]
    fn missing_blob_aborts_staging() {
        let scratch = scratch();
        let entry = regular("/usr/bin/tool", b"never downloaded");
        assert!(matches!(
            scratch.tree.stage_all(&[entry]).unwrap_err(),
            Error::MissingBlob { .. }
        ));
    }

    #[test]
    fn failure_leaves_earlier_shadows_in_place() {
        let scratch = scratch();
        put_blob(&scratch, b"first");
        let staged_fine = regular("/etc/a-first", b"first");
        let broken = regular("/etc/b-broken", b"no blob for this one");

        assert!(scratch
            .tree
            .stage_all(&[staged_fine.clone(), broken])
            .is_err());
        assert!(scratch.tree.shadow_path(&staged_fine).exists());
        assert!(!scratch.tree.final_path(&staged_fine).exists());
    }

    #[test]
    fn tombstones_and_frozen_entries_stage_nothing() {
        let scratch = scratch();
        let mut frozen = regular("/etc/frozen", b"frozen");
        frozen.do_not_update = true;
        let tombstone = FileEntry {
            path: "/etc/stale".to_string(),
            hash: FileHash::ZERO,
            kind: FileKind::Tombstone,
            mode: 0o644,
            do_not_update: false,
            delta_from: None,
            rename_from: None,
        };

        assert_eq!(scratch.tree.stage_all(&[frozen, tombstone]).unwrap(), 0);
        assert_eq!(fs::read_dir(&scratch.prefix).unwrap().count(), 0);
    }

    #[test]
    fn stages_symlink_from_blob_target() {
        let scratch = scratch();
        put_blob(&scratch, b"libfoo.so.2");
        let entry = FileEntry {
            path: "/usr/lib/libfoo.so".to_string(),
            hash: FileHash::of_bytes(b"libfoo.so.2"),
            kind: FileKind::Symlink,
            mode: 0o777,
            do_not_update: false,
            delta_from: None,
            rename_from: None,
        };

        scratch.tree.stage_all(std::slice::from_ref(&entry)).unwrap();
        let shadow = scratch.tree.shadow_path(&entry);
        assert_eq!(
            fs::read_link(&shadow).unwrap(),
            PathBuf::from("libfoo.so.2")
        );
    }

    #[test]
    fn new_directory_staged_existing_directory_untouched() {
        let scratch = scratch();
        let fresh = FileEntry {
            path: "/opt/newdir".to_string(),
            hash: FileHash::ZERO,
            kind: FileKind::Directory,
            mode: 0o750,
            do_not_update: false,
            delta_from: None,
            rename_from: None,
        };
        let existing = FileEntry {
            path: "/etc".to_string(),
            hash: FileHash::ZERO,
            kind: FileKind::Directory,
            mode: 0o755,
            do_not_update: false,
            delta_from: None,
            rename_from: None,
        };
        fs::create_dir_all(scratch.prefix.join("etc")).unwrap();

        scratch.tree.stage_all(&[existing.clone(), fresh.clone()]).unwrap();
        assert!(scratch.tree.shadow_path(&fresh).is_dir());
        assert!(!scratch.tree.shadow_path(&existing).exists());
    }
}
