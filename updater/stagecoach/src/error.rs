use snafu::Snafu;
use std::path::PathBuf;
use update_manifest::FileHash;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum Error {
    #[snafu(display("Failed to create parent directory for {}: {}", path.display(), source))]
    CreateParent {
        path: PathBuf,
        source: std::io::Error,
    },

    #[snafu(display(
        "Staged content for {} hashes to {}, manifest declares {}",
        path.display(),
        actual,
        expected
    ))]
    HashMismatch {
        path: PathBuf,
        expected: FileHash,
        actual: FileHash,
    },

    #[snafu(display("Failed to write transition marker {}: {}", path.display(), source))]
    MarkerWrite {
        path: PathBuf,
        source: std::io::Error,
    },

    #[snafu(display("Failed to remove transition marker {}: {}", path.display(), source))]
    MarkerRemove {
        path: PathBuf,
        source: std::io::Error,
    },

    #[snafu(display("Failed to materialize shadow {}: {}", path.display(), source))]
    Materialize {
        path: PathBuf,
        source: std::io::Error,
    },

    #[snafu(display("Failed to read staged blob {}: {}", path.display(), source))]
    MissingBlob {
        path: PathBuf,
        source: std::io::Error,
    },

    #[snafu(display("Failed to remove {}: {}", path.display(), source))]
    Remove {
        path: PathBuf,
        source: std::io::Error,
    },

    #[snafu(display("Failed to rename {} to {}: {}", from.display(), to.display(), source))]
    Rename {
        from: PathBuf,
        to: PathBuf,
        source: std::io::Error,
    },

    #[snafu(display("Failed to set permissions on {}: {}", path.display(), source))]
    SetPermissions {
        path: PathBuf,
        source: std::io::Error,
    },

    #[snafu(display("Failed to set ownership on {}: {}", path.display(), source))]
    SetOwnership {
        path: PathBuf,
        source: nix::Error,
    },
}
