//! Consolidation of bundle file lists and cross-version linking.
//!
//! The consolidated list for a release is the union of its subscribed
//! bundles' files with duplicate paths resolved. Linking pairs the two
//! releases' consolidated lists by path and produces the update list the
//! download and staging stages walk.

use crate::{FileEntry, FileHash, Manifest};
use std::collections::{BTreeMap, HashMap};

/// A file entry tagged with the bundle that contributed it, so duplicate
/// paths can be resolved by bundle version.
#[derive(Debug, Clone)]
pub struct BundleFile {
    pub file: FileEntry,
    pub bundle: String,
    pub bundle_version: u32,
}

/// Flattens every sub-manifest's files into one sequence.
pub fn files_from_bundles(bundles: &[Manifest]) -> Vec<BundleFile> {
    let mut files = Vec::new();
    for manifest in bundles {
        for file in &manifest.files {
            files.push(BundleFile {
                file: file.clone(),
                bundle: manifest.name.clone(),
                bundle_version: manifest.version,
            });
        }
    }
    files
}

// When two bundles carry the same path, the higher-version bundle wins;
// ties go to the lexicographically earlier bundle name.
fn beats(challenger: &BundleFile, incumbent: &BundleFile) -> bool {
    challenger.bundle_version > incumbent.bundle_version
        || (challenger.bundle_version == incumbent.bundle_version
            && challenger.bundle < incumbent.bundle)
}

/// Eliminates duplicate paths from a flattened file sequence. The result
/// holds one entry per path, sorted by filename ascending.
pub fn consolidate_files(files: Vec<BundleFile>) -> Vec<FileEntry> {
    let mut winners: BTreeMap<String, BundleFile> = BTreeMap::new();
    for candidate in files {
        match winners.get(&candidate.file.path) {
            Some(incumbent) if !beats(&candidate, incumbent) => {}
            _ => {
                winners.insert(candidate.file.path.clone(), candidate);
            }
        }
    }
    winners.into_values().map(|winner| winner.file).collect()
}

/// Pairing of two releases' consolidated lists by path. Indices point into
/// the respective lists; the table is a lookup aid and owns nothing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerLink {
    pub path: String,
    pub current: Option<usize>,
    pub server: Option<usize>,
}

/// Pairs each server-side entry with its current-side counterpart by path.
/// Entries present on only one side get a half-filled link: server-only
/// links are new files, current-only links are paths the new release no
/// longer mentions.
pub fn link_manifests(current: &[FileEntry], server: &[FileEntry]) -> Vec<PeerLink> {
    let mut by_path: BTreeMap<&str, PeerLink> = BTreeMap::new();
    for (idx, file) in current.iter().enumerate() {
        by_path
            .entry(file.path.as_str())
            .or_insert_with(|| PeerLink {
                path: file.path.clone(),
                current: None,
                server: None,
            })
            .current = Some(idx);
    }
    for (idx, file) in server.iter().enumerate() {
        by_path
            .entry(file.path.as_str())
            .or_insert_with(|| PeerLink {
                path: file.path.clone(),
                current: None,
                server: None,
            })
            .server = Some(idx);
    }
    by_path.into_values().collect()
}

/// Builds the update list: every server entry whose current peer is absent
/// or content-different, minus entries flagged `do_not_update`. Tombstones
/// whose peer is already the identical tombstone are dropped so repeated
/// runs stay idempotent. The result is sorted by filename ascending, which
/// puts directories before their contents.
pub fn create_update_list(current: &[FileEntry], server: &[FileEntry]) -> Vec<FileEntry> {
    let links = link_manifests(current, server);
    let mut updates = Vec::new();
    for link in &links {
        let Some(server_idx) = link.server else {
            continue;
        };
        let entry = &server[server_idx];
        if entry.do_not_update {
            continue;
        }
        let peer = link.current.map(|idx| &current[idx]);
        if let Some(peer) = peer {
            if peer.hash == entry.hash && peer.kind == entry.kind {
                continue;
            }
        }
        let mut update = entry.clone();
        if update.is_file() {
            update.delta_from = peer.filter(|p| p.is_file()).map(|p| p.hash);
        }
        updates.push(update);
    }
    sort_by_filename(&mut updates);
    updates
}

/// Identifies rename candidates: update-list entries whose exact content
/// already exists in the installed release under a different path. Those
/// can be synthesized locally without any download.
pub fn link_renames(updates: &mut [FileEntry], current: &[FileEntry]) {
    let mut by_hash: HashMap<FileHash, &str> = HashMap::new();
    for file in current {
        if file.is_file() && !file.hash.is_zero() {
            by_hash.entry(file.hash).or_insert(file.path.as_str());
        }
    }
    for update in updates.iter_mut() {
        if !update.is_file() || update.delta_from.is_some() {
            continue;
        }
        if let Some(&path) = by_hash.get(&update.hash) {
            if path != update.path {
                update.rename_from = Some(path.to_string());
            }
        }
    }
}

/// Ascending filename order: for any path, all of its strict prefix
/// directories sort earlier.
pub fn sort_by_filename(updates: &mut [FileEntry]) {
    updates.sort_by(|a, b| a.path.cmp(&b.path));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::FileKind;

    fn entry(path: &str, content: &str, kind: FileKind) -> FileEntry {
        FileEntry {
            path: path.to_string(),
            hash: match kind {
                FileKind::Regular | FileKind::Symlink => FileHash::of_bytes(content.as_bytes()),
                FileKind::Directory | FileKind::Tombstone => FileHash::ZERO,
            },
            kind,
            mode: if kind == FileKind::Directory {
                0o755
            } else {
                0o644
            },
            do_not_update: false,
            delta_from: None,
            rename_from: None,
        }
    }

    fn bundle(name: &str, version: u32, files: Vec<FileEntry>) -> Manifest {
        Manifest {
            name: name.to_string(),
            version,
            includes: Vec::new(),
            files,
        }
    }

    #[test]
    fn consolidation_prefers_higher_bundle_version() {
        let old = bundle("editors", 100, vec![entry("/usr/bin/vi", "old", FileKind::Regular)]);
        let new = bundle("os-core", 110, vec![entry("/usr/bin/vi", "new", FileKind::Regular)]);
        let consolidated = consolidate_files(files_from_bundles(&[old, new]));
        assert_eq!(consolidated.len(), 1);
        assert_eq!(consolidated[0].hash, FileHash::of_bytes(b"new"));
    }

    #[test]
    fn consolidation_ties_resolved_by_bundle_name() {
        let b = bundle("bbb", 100, vec![entry("/usr/bin/vi", "from-b", FileKind::Regular)]);
        let a = bundle("aaa", 100, vec![entry("/usr/bin/vi", "from-a", FileKind::Regular)]);
        let consolidated = consolidate_files(files_from_bundles(&[b, a]));
        assert_eq!(consolidated[0].hash, FileHash::of_bytes(b"from-a"));
    }

    #[test]
    fn consolidation_sorts_and_dedups() {
        let bundles = [
            bundle(
                "one",
                100,
                vec![
                    entry("/usr/bin/b", "b", FileKind::Regular),
                    entry("/usr", "", FileKind::Directory),
                ],
            ),
            bundle(
                "two",
                100,
                vec![
                    entry("/usr/bin", "", FileKind::Directory),
                    entry("/usr", "", FileKind::Directory),
                ],
            ),
        ];
        let consolidated = consolidate_files(files_from_bundles(&bundles));
        let paths: Vec<&str> = consolidated.iter().map(|f| f.path.as_str()).collect();
        assert_eq!(paths, vec!["/usr", "/usr/bin", "/usr/bin/b"]);
    }

    #[test]
    fn update_list_is_a_changed_subset() {
        let current = vec![
            entry("/etc/same", "same", FileKind::Regular),
            entry("/etc/changed", "v100", FileKind::Regular),
        ];
        let server = vec![
            entry("/etc/same", "same", FileKind::Regular),
            entry("/etc/changed", "v110", FileKind::Regular),
            entry("/etc/new", "brand-new", FileKind::Regular),
        ];
        let updates = create_update_list(&current, &server);
        let paths: Vec<&str> = updates.iter().map(|f| f.path.as_str()).collect();
        assert_eq!(paths, vec!["/etc/changed", "/etc/new"]);

        // No update entry is hash-equal to its current peer.
        for update in &updates {
            let peer = current.iter().find(|c| c.path == update.path);
            assert!(peer.map_or(true, |p| p.hash != update.hash));
        }

        // Changed regular files learn their predecessor hash; new files do not.
        assert_eq!(updates[0].delta_from, Some(FileHash::of_bytes(b"v100")));
        assert_eq!(updates[1].delta_from, None);
    }

    #[test]
    fn update_list_orders_directories_before_contents() {
        let current = Vec::new();
        let server = vec![
            entry("/usr/lib/os-release", "r", FileKind::Regular),
            entry("/usr", "", FileKind::Directory),
            entry("/usr/lib", "", FileKind::Directory),
        ];
        let updates = create_update_list(&current, &server);
        let paths: Vec<&str> = updates.iter().map(|f| f.path.as_str()).collect();
        assert_eq!(paths, vec!["/usr", "/usr/lib", "/usr/lib/os-release"]);
        for (idx, update) in updates.iter().enumerate() {
            for (prefix_idx, prefix) in updates.iter().enumerate() {
                if prefix.is_directory()
                    && update.path.starts_with(&format!("{}/", prefix.path))
                {
                    assert!(prefix_idx < idx);
                }
            }
        }
    }

    #[test]
    fn tombstones_trigger_removal_once() {
        let current = vec![entry("/etc/stale", "stale", FileKind::Regular)];
        let server = vec![entry("/etc/stale", "", FileKind::Tombstone)];
        let updates = create_update_list(&current, &server);
        assert_eq!(updates.len(), 1);
        assert!(updates[0].is_deleted());

        // Once the tombstone is applied both sides agree and nothing is listed.
        let applied = vec![entry("/etc/stale", "", FileKind::Tombstone)];
        assert!(create_update_list(&applied, &server).is_empty());
    }

    #[test]
    fn do_not_update_entries_are_excluded() {
        let mut frozen = entry("/boot/vmlinuz", "v110", FileKind::Regular);
        frozen.do_not_update = true;
        let current = vec![entry("/boot/vmlinuz", "v100", FileKind::Regular)];
        let updates = create_update_list(&current, &[frozen]);
        assert!(updates.is_empty());
    }

    #[test]
    fn kind_change_with_same_blob_is_still_an_update() {
        let current = vec![entry("/etc/alias", "target", FileKind::Regular)];
        let server = vec![entry("/etc/alias", "target", FileKind::Symlink)];
        let updates = create_update_list(&current, &server);
        assert_eq!(updates.len(), 1);
        assert!(updates[0].is_symlink());
    }

    #[test]
    fn renames_matched_by_hash_across_paths() {
        let current = vec![entry("/usr/bin/old-name", "same-bits", FileKind::Regular)];
        let server = vec![
            entry("/usr/bin/new-name", "same-bits", FileKind::Regular),
            entry("/usr/bin/old-name", "", FileKind::Tombstone),
        ];
        let mut updates = create_update_list(&current, &server);
        link_renames(&mut updates, &current);

        let renamed = updates.iter().find(|u| u.path == "/usr/bin/new-name").unwrap();
        assert_eq!(renamed.rename_from.as_deref(), Some("/usr/bin/old-name"));
        // The tombstone side carries no rename link.
        let tombstone = updates.iter().find(|u| u.is_deleted()).unwrap();
        assert!(tombstone.rename_from.is_none());
    }

    #[test]
    fn link_manifests_builds_a_bipartite_side_table() {
        let current = vec![
            entry("/both", "x", FileKind::Regular),
            entry("/current-only", "y", FileKind::Regular),
        ];
        let server = vec![
            entry("/both", "x2", FileKind::Regular),
            entry("/server-only", "z", FileKind::Regular),
        ];
        let links = link_manifests(&current, &server);
        let find = |p: &str| links.iter().find(|l| l.path == p).unwrap();
        assert_eq!(find("/both").current, Some(0));
        assert_eq!(find("/both").server, Some(0));
        assert_eq!(find("/current-only").server, None);
        assert_eq!(find("/server-only").current, None);
    }
}
