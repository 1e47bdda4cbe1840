use snafu::{Backtrace, Snafu};
use std::path::PathBuf;
use update_manifest::FileHash;

pub(crate) type Result<T> = std::result::Result<T, Error>;

// Distinguished exit codes, assigned at the process boundary only.
const EXIT_FAILURE: i32 = 1;
const EMOM_NOTFOUND: i32 = 4;
const ERECURSE_MANIFEST: i32 = 6;
const EMANIFEST_LOAD: i32 = 7;
const EDOWNLOAD_ONLY: i32 = 8;
const ELOCK_BUSY: i32 = 13;
const ENOSWUPDSERVER: i32 = 14;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub(crate) enum Error {
    #[snafu(display("Downloaded blob for {} hashes to {}", hash, actual))]
    BlobVerify { hash: FileHash, actual: FileHash },

    #[snafu(display("Failed to apply staged content: {}", source))]
    Commit { source: stagecoach::error::Error },

    #[snafu(display("Failed to parse config file {}: {}", path.display(), source))]
    ConfigParse {
        path: PathBuf,
        source: toml::de::Error,
        backtrace: Backtrace,
    },

    #[snafu(display("Failed to read config file {}: {}", path.display(), source))]
    ConfigRead {
        path: PathBuf,
        source: std::io::Error,
        backtrace: Backtrace,
    },

    #[snafu(display("Could not download all files ({} failed after retries)", failed))]
    CouldNotDownload { failed: usize, backtrace: Backtrace },

    #[snafu(display("Failed to read current version from {}: {}", path.display(), source))]
    CurrentVersionRead {
        path: PathBuf,
        source: std::io::Error,
        backtrace: Backtrace,
    },

    #[snafu(display("Malformed delta blob"))]
    DeltaMalformed { backtrace: Backtrace },

    #[snafu(display("Delta produced content hashing to {}, wanted {}", actual, expected))]
    DeltaMismatch {
        expected: FileHash,
        actual: FileHash,
    },

    #[snafu(display("Failed to process delta stream: {}", source))]
    DeltaStream { source: std::io::Error },

    #[snafu(display("Downloads complete; staging skipped as requested"))]
    DownloadOnly,

    #[snafu(display("Failed to fetch {}: {}", url, source))]
    Fetch {
        url: String,
        source: reqwest::Error,
    },

    #[snafu(display("Failed to read local content {}: {}", path.display(), source))]
    FetchLocal {
        path: PathBuf,
        source: std::io::Error,
    },

    #[snafu(display("Server returned {} for {}", status, url))]
    FetchStatus { url: String, status: u16 },

    #[snafu(display("Failed to write downloaded content to {}: {}", path.display(), source))]
    FetchWrite {
        path: PathBuf,
        source: std::io::Error,
    },

    #[snafu(display("Failed to build HTTP client: {}", source))]
    HttpClient { source: reqwest::Error },

    #[snafu(display("Failed to write latest version marker {}: {}", path.display(), source))]
    LatestVersionWrite {
        path: PathBuf,
        source: std::io::Error,
    },

    #[snafu(display("Another updater holds the lock {}", path.display()))]
    LockBusy {
        path: PathBuf,
        source: std::io::Error,
    },

    #[snafu(display("Failed to open lock file {}: {}", path.display(), source))]
    LockFile {
        path: PathBuf,
        source: std::io::Error,
    },

    #[snafu(display("Logger setup error: {}", source))]
    Logger { source: log::SetLoggerError },

    #[snafu(display("{}", source))]
    Manifest {
        source: update_manifest::error::Error,
    },

    #[snafu(display(
        "Sub-manifest for bundle '{}' does not match the hash its MoM declares",
        bundle
    ))]
    ManifestHashMismatch {
        bundle: String,
        backtrace: Backtrace,
    },

    #[snafu(display("Failure retrieving manifest of manifests for version {}", version))]
    MomNotFound { version: u32, backtrace: Backtrace },

    #[snafu(display("Server unavailable, unable to proceed with update"))]
    NoServer { backtrace: Backtrace },

    #[snafu(display("Failed to read pack {}: {}", path.display(), source))]
    PackRead {
        path: PathBuf,
        source: std::io::Error,
    },

    #[snafu(display("Failed to unpack {}: {}", path.display(), source))]
    PackUnpack {
        path: PathBuf,
        source: std::io::Error,
    },

    #[snafu(display("Failed to list installed bundles in {}: {}", path.display(), source))]
    ReadBundles {
        path: PathBuf,
        source: std::io::Error,
    },

    #[snafu(display("Cannot load sub-manifests for bundle '{}'", bundle))]
    RecurseManifest { bundle: String, backtrace: Backtrace },

    #[snafu(display("Signature of {} did not verify", what))]
    SignatureInvalid { what: String, backtrace: Backtrace },

    #[snafu(display("Failed to write staged blob {}: {}", path.display(), source))]
    StagedBlobWrite {
        path: PathBuf,
        source: std::io::Error,
    },

    #[snafu(display("File staging failed: {}", source))]
    Staging { source: stagecoach::error::Error },

    #[snafu(display("Failed to create state directory {}: {}", path.display(), source))]
    StateDirCreate {
        path: PathBuf,
        source: std::io::Error,
    },

    #[snafu(display("Invalid URL '{}': {}", url, source))]
    UrlParse {
        url: String,
        source: url::ParseError,
    },

    #[snafu(display("Could not parse '{}' as a version: {}", content, source))]
    VersionParse {
        content: String,
        source: std::num::ParseIntError,
        backtrace: Backtrace,
    },
}

impl Error {
    /// True for fetch failures that mean "this item is not published", as
    /// opposed to transient network trouble.
    pub(crate) fn is_not_found(&self) -> bool {
        match self {
            Error::FetchStatus { status: 404, .. } => true,
            Error::FetchLocal { source, .. } => source.kind() == std::io::ErrorKind::NotFound,
            _ => false,
        }
    }

    /// Maps the error to the process exit code. Internal results are a sum
    /// type everywhere else; the numeric codes exist only at this boundary.
    pub(crate) fn exit_code(&self) -> i32 {
        match self {
            Error::MomNotFound { .. } => EMOM_NOTFOUND,
            Error::RecurseManifest { .. } => ERECURSE_MANIFEST,
            Error::Manifest { .. }
            | Error::ManifestHashMismatch { .. }
            | Error::SignatureInvalid { .. } => EMANIFEST_LOAD,
            Error::DownloadOnly => EDOWNLOAD_ONLY,
            Error::LockBusy { .. } => ELOCK_BUSY,
            Error::NoServer { .. } => ENOSWUPDSERVER,
            _ => EXIT_FAILURE,
        }
    }
}

impl From<update_manifest::error::Error> for Error {
    fn from(source: update_manifest::error::Error) -> Self {
        Error::Manifest { source }
    }
}
