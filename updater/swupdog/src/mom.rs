//! Fetching, verifying, and caching manifests.
//!
//! The MoM for a release is fetched with its detached signature and
//! verified before parsing; bundle sub-manifests are pinned by the hash
//! their MoM declares, extending the signature's reach to every file
//! list. Fetched manifests are cached under `<state_dir>/<version>/` so a
//! re-run after a failure starts warm.

use crate::config::Config;
use crate::error::{self, Result};
use crate::signature::SignatureVerifier;
use crate::transport::Fetcher;
use log::debug;
use snafu::{ensure, ResultExt};
use std::fs;
use std::path::{Path, PathBuf};
use update_manifest::{BundleInfo, FileHash, Manifest, Mom};

pub(crate) struct ManifestStore<'a> {
    config: &'a Config,
    fetcher: &'a dyn Fetcher,
    verifier: &'a dyn SignatureVerifier,
}

impl<'a> ManifestStore<'a> {
    pub(crate) fn new(
        config: &'a Config,
        fetcher: &'a dyn Fetcher,
        verifier: &'a dyn SignatureVerifier,
    ) -> Self {
        Self {
            config,
            fetcher,
            verifier,
        }
    }

    fn cached(&self, version: u32, name: &str) -> Result<PathBuf> {
        let dir = self.config.manifest_cache_dir(version);
        fs::create_dir_all(&dir).context(error::StateDirCreateSnafu { path: &dir })?;
        let path = dir.join(name);
        if !path.is_file() {
            let url = format!("{}/{}/{}", self.config.content_url, version, name);
            self.fetcher.fetch(&url, &path)?;
        }
        Ok(path)
    }

    /// Loads the manifest of manifests for a release, fetching it and its
    /// signature unless already cached.
    pub(crate) fn load_mom(&self, version: u32) -> Result<Mom> {
        let path = self.cached(version, "Manifest.MoM")?;
        let sig_path = self.cached(version, "Manifest.MoM.sig")?;
        let bytes = read_cached(&path)?;
        let signature = read_cached(&sig_path)?;
        ensure!(
            self.verifier.verify(&bytes, &signature),
            error::SignatureInvalidSnafu {
                what: format!("Manifest.MoM for version {}", version),
            }
        );
        debug!("loaded manifest of manifests for version {}", version);
        Ok(update_manifest::parse_mom(&bytes)?)
    }

    /// Loads one bundle's sub-manifest, pinned by the hash its MoM entry
    /// declares.
    pub(crate) fn load_bundle_manifest(&self, bundle: &BundleInfo) -> Result<Manifest> {
        let name = format!("Manifest.{}", bundle.name);
        let path = self.cached(bundle.version, &name)?;
        let bytes = read_cached(&path)?;
        if FileHash::of_bytes(&bytes) != bundle.hash {
            // A stale or tampered cache entry gets one refetch before we
            // give up on the bundle.
            let _ = fs::remove_file(&path);
            let path = self.cached(bundle.version, &name)?;
            let bytes = read_cached(&path)?;
            ensure!(
                FileHash::of_bytes(&bytes) == bundle.hash,
                error::ManifestHashMismatchSnafu {
                    bundle: &bundle.name,
                }
            );
            return Ok(update_manifest::parse_manifest(&bytes)?);
        }
        Ok(update_manifest::parse_manifest(&bytes)?)
    }
}

fn read_cached(path: &Path) -> Result<Vec<u8>> {
    fs::read(path).context(error::FetchLocalSnafu { path })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::signature::DigestSidecar;
    use crate::transport::Transport;
    use std::path::Path;
    use tempfile::TempDir;
    use update_manifest::FileKind;

    struct Srv {
        _root: TempDir,
        config: Config,
    }

    fn serve(root: TempDir, content: &Path) -> Srv {
        let config: Config = toml::from_str(&format!(
            r#"
            version_url = "{0}"
            content_url = "{0}"
            state_dir = "{1}"
            local_download = true
            "#,
            content.display(),
            root.path().join("state").display(),
        ))
        .unwrap();
        Srv {
            _root: root,
            config,
        }
    }

    fn publish_mom(content: &Path, version: u32, body: &str) {
        let dir = content.join(version.to_string());
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join("Manifest.MoM"), body).unwrap();
        fs::write(
            dir.join("Manifest.MoM.sig"),
            format!("{}\n", FileHash::of_bytes(body.as_bytes())),
        )
        .unwrap();
    }

    #[test]
    fn mom_fetches_verifies_and_caches() {
        let root = TempDir::new().unwrap();
        let content = root.path().join("srv");
        publish_mom(
            &content,
            110,
            r#"{"version":110,"bundles":[
                {"name":"os-core","version":110,
                 "hash":"5c4dbcacb1e6e6b2a2b0c80f52c3c35e11cd8e7592ff22a1e2a20bcba0019e82"}
            ]}"#,
        );
        let srv = serve(root, &content);
        let transport = Transport::new(&srv.config).unwrap();
        let store = ManifestStore::new(&srv.config, &transport, &DigestSidecar);

        let mom = store.load_mom(110).unwrap();
        assert_eq!(mom.version, 110);
        assert!(srv
            .config
            .manifest_cache_dir(110)
            .join("Manifest.MoM")
            .is_file());

        // Second load is served from the cache even if the source is gone.
        fs::remove_dir_all(&content).unwrap();
        assert_eq!(store.load_mom(110).unwrap().version, 110);
    }

    #[test]
    fn bad_signature_is_fatal() {
        let root = TempDir::new().unwrap();
        let content = root.path().join("srv");
        publish_mom(&content, 110, r#"{"version":110,"bundles":[]}"#);
        fs::write(
            content.join("110/Manifest.MoM.sig"),
            format!("{}\n", FileHash::of_bytes(b"somebody else's manifest")),
        )
        .unwrap();
        let srv = serve(root, &content);
        let transport = Transport::new(&srv.config).unwrap();
        let store = ManifestStore::new(&srv.config, &transport, &DigestSidecar);

        assert!(matches!(
            store.load_mom(110),
            Err(Error::SignatureInvalid { .. })
        ));
    }

    #[test]
    fn bundle_manifest_pinned_by_mom_hash() {
        let root = TempDir::new().unwrap();
        let content = root.path().join("srv");
        let body = r#"{"name":"os-core","version":110,"files":[
            {"path":"/usr","hash":"0000000000000000000000000000000000000000000000000000000000000000","kind":"directory","mode":493}
        ]}"#;
        let dir = content.join("110");
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join("Manifest.os-core"), body).unwrap();
        let srv = serve(root, &content);
        let transport = Transport::new(&srv.config).unwrap();
        let store = ManifestStore::new(&srv.config, &transport, &DigestSidecar);

        let good = BundleInfo {
            name: "os-core".to_string(),
            version: 110,
            hash: FileHash::of_bytes(body.as_bytes()),
        };
        let manifest = store.load_bundle_manifest(&good).unwrap();
        assert_eq!(manifest.files.len(), 1);
        assert_eq!(manifest.files[0].kind, FileKind::Directory);

        let pinned_elsewhere = BundleInfo {
            hash: FileHash::of_bytes(b"different body"),
            ..good
        };
        assert!(matches!(
            store.load_bundle_manifest(&pinned_elsewhere),
            Err(Error::ManifestHashMismatch { .. })
        ));
    }
}
