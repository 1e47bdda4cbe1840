//! Pack download: per-bundle archives of staged blobs, fetched once
//! instead of file by file. A missing pack is normal (small bundles are
//! not always packed) and the per-file download pass covers the gap;
//! network failures bubble up so the caller can retry.

use crate::config::Config;
use crate::error::{self, Result};
use crate::subscriptions::Subscription;
use crate::transport::Fetcher;
use flate2::read::GzDecoder;
use log::{debug, info};
use snafu::ResultExt;
use std::fs::{self, File};
use std::path::Path;
use tar::Archive;

fn pack_name(sub: &Subscription) -> String {
    format!("pack-{}-from-{}.tar.gz", sub.component, sub.current_version)
}

/// Fetches and extracts the pack for every bundle that changed between
/// the two releases.
pub(crate) fn download_subscribed_packs(
    config: &Config,
    fetcher: &dyn Fetcher,
    subs: &[Subscription],
) -> Result<()> {
    for sub in subs {
        if sub.server_version == 0 || sub.server_version == sub.current_version {
            continue;
        }
        let name = pack_name(sub);
        let url = format!("{}/{}/{}", config.content_url, sub.server_version, name);
        let dest = config.download_dir().join(&name);
        match fetcher.fetch(&url, &dest) {
            Ok(()) => {
                unpack(&dest, &config.staged_dir())?;
                let _ = fs::remove_file(&dest);
                info!("Extracted pack for {}", sub.component);
            }
            Err(err) if err.is_not_found() => {
                debug!(
                    "No pack published for {} ({} to {})",
                    sub.component, sub.current_version, sub.server_version
                );
            }
            Err(err) => return Err(err),
        }
    }
    Ok(())
}

/// Unpacks a gzipped tar of hash-named blobs into the staged directory.
fn unpack(pack: &Path, staged_dir: &Path) -> Result<()> {
    let file = File::open(pack).context(error::PackReadSnafu { path: pack })?;
    let mut archive = Archive::new(GzDecoder::new(file));
    archive
        .unpack(staged_dir)
        .context(error::PackUnpackSnafu { path: pack })
}
