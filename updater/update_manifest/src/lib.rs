#![warn(clippy::pedantic)]

/*!
The manifest model for the update client.

A release is described by a manifest of manifests (MoM) whose entries name
the bundle sub-manifests composing that release. Each bundle sub-manifest
owns a list of file entries; cross-version relationships (peers, renames)
are computed as lookups over consolidated lists and never own anything.

Manifests are stored as JSON, signed out of band; this crate only parses,
validates, and consolidates them.
*/

mod consolidate;
pub mod error;
mod hash;

pub use crate::consolidate::{
    consolidate_files, create_update_list, files_from_bundles, link_manifests, link_renames,
    sort_by_filename, BundleFile, PeerLink,
};
pub use crate::hash::{FileHash, HASH_LEN};

use crate::error::Result;
use serde::{Deserialize, Serialize};
use snafu::{ensure, ResultExt};
use std::collections::HashSet;
use std::fs;
use std::path::Path;

/// What a file entry is on disk. A tombstone marks a path the release no
/// longer carries; it downloads nothing and unlinks at commit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FileKind {
    Regular,
    Directory,
    Symlink,
    Tombstone,
}

fn default_mode() -> u32 {
    0o644
}

/// The unit of transfer. Two entries with the same hash and kind are
/// content-equivalent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileEntry {
    /// Absolute path under the update root.
    pub path: String,
    pub hash: FileHash,
    pub kind: FileKind,
    #[serde(default = "default_mode")]
    pub mode: u32,
    #[serde(default)]
    pub do_not_update: bool,

    /// Hash of this path's content in the installed release, when the path
    /// exists on both sides. Filled by linking; a delta can be synthesized
    /// from that blob.
    #[serde(skip)]
    pub delta_from: Option<FileHash>,
    /// Installed path holding identical content under a different name.
    /// Filled by rename detection.
    #[serde(skip)]
    pub rename_from: Option<String>,
}

impl FileEntry {
    pub fn is_file(&self) -> bool {
        matches!(self.kind, FileKind::Regular)
    }

    pub fn is_directory(&self) -> bool {
        matches!(self.kind, FileKind::Directory)
    }

    pub fn is_symlink(&self) -> bool {
        matches!(self.kind, FileKind::Symlink)
    }

    pub fn is_deleted(&self) -> bool {
        matches!(self.kind, FileKind::Tombstone)
    }

    /// Entries with a downloadable blob: regular files, and symlinks whose
    /// blob holds the link target.
    pub fn has_content(&self) -> bool {
        matches!(self.kind, FileKind::Regular | FileKind::Symlink)
    }
}

/// A bundle sub-manifest: a versioned, named collection of file entries.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Manifest {
    pub name: String,
    pub version: u32,
    /// Bundles pulled in transitively when this one is subscribed.
    #[serde(default)]
    pub includes: Vec<String>,
    #[serde(default)]
    pub files: Vec<FileEntry>,
}

/// One MoM entry naming a bundle sub-manifest.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BundleInfo {
    pub name: String,
    /// Version of the bundle's last change, which names the directory its
    /// sub-manifest is published under.
    pub version: u32,
    pub hash: FileHash,
}

/// The manifest of manifests for one release.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Mom {
    pub version: u32,
    pub bundles: Vec<BundleInfo>,
}

impl Mom {
    pub fn bundle(&self, name: &str) -> Option<&BundleInfo> {
        self.bundles.iter().find(|b| b.name == name)
    }

    fn validate(&self) -> Result<()> {
        let mut seen = HashSet::new();
        for bundle in &self.bundles {
            ensure!(
                seen.insert(bundle.name.as_str()),
                error::DuplicateBundleSnafu {
                    name: &bundle.name
                }
            );
        }
        Ok(())
    }
}

pub fn parse_mom(bytes: &[u8]) -> Result<Mom> {
    let mom: Mom = serde_json::from_slice(bytes).context(error::ManifestParseSnafu)?;
    mom.validate()?;
    Ok(mom)
}

pub fn parse_manifest(bytes: &[u8]) -> Result<Manifest> {
    serde_json::from_slice(bytes).context(error::ManifestParseSnafu)
}

pub fn load_mom(path: &Path) -> Result<Mom> {
    let bytes = fs::read(path).context(error::ManifestReadSnafu { path })?;
    parse_mom(&bytes)
}

pub fn load_manifest(path: &Path) -> Result<Manifest> {
    let bytes = fs::read(path).context(error::ManifestReadSnafu { path })?;
    parse_manifest(&bytes)
}

pub fn write_manifest(path: &Path, manifest: &Manifest) -> Result<()> {
    let json = serde_json::to_string_pretty(manifest).context(error::ManifestSerializeSnafu)?;
    fs::write(path, json).context(error::ManifestWriteSnafu { path })
}
