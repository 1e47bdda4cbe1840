use snafu::{Backtrace, Snafu};
use std::path::PathBuf;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum Error {
    #[snafu(display("Duplicate bundle '{}' in manifest of manifests", name))]
    DuplicateBundle { name: String, backtrace: Backtrace },

    #[snafu(display("Invalid content hash '{}'", input))]
    HashParse { input: String, backtrace: Backtrace },

    #[snafu(display("Failed to parse manifest: {}", source))]
    ManifestParse {
        source: serde_json::Error,
        backtrace: Backtrace,
    },

    #[snafu(display("Failed to read manifest file {}: {}", path.display(), source))]
    ManifestRead {
        path: PathBuf,
        source: std::io::Error,
        backtrace: Backtrace,
    },

    #[snafu(display("Failed to serialize manifest: {}", source))]
    ManifestSerialize {
        source: serde_json::Error,
        backtrace: Backtrace,
    },

    #[snafu(display("Failed to write manifest file {}: {}", path.display(), source))]
    ManifestWrite {
        path: PathBuf,
        source: std::io::Error,
        backtrace: Backtrace,
    },
}
