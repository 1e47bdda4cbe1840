//! The fetch primitive: a blocking HTTP client that downloads to files,
//! with a local mode for mix content that reads straight from the
//! filesystem. Batch multiplexing lives in the download engine; this
//! module only knows how to move one blob.

use crate::config::Config;
use crate::error::{self, Result};
use log::debug;
use reqwest::blocking::Client;
use snafu::{ensure, ResultExt};
use std::fs::{self, File};
use std::io;
use std::path::Path;
use std::time::Duration;
use url::Url;

/// Per-request timeout. Retries and backoff are the caller's concern.
const REQUEST_TIMEOUT_SECS: u64 = 120;

/// The seam every network consumer goes through, so the download engines
/// can be driven by a scripted implementation in tests.
pub(crate) trait Fetcher: Sync {
    fn fetch(&self, url: &str, dest: &Path) -> Result<()>;
    fn fetch_bytes(&self, url: &str) -> Result<Vec<u8>>;
}

pub(crate) struct Transport {
    client: Client,
    local: bool,
}

impl Transport {
    pub(crate) fn new(config: &Config) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .context(error::HttpClientSnafu)?;
        Ok(Self {
            client,
            local: config.local_download,
        })
    }

    fn get(&self, url: &str) -> Result<reqwest::blocking::Response> {
        let parsed = Url::parse(url).context(error::UrlParseSnafu { url })?;
        debug!("fetching {}", url);
        let response = self
            .client
            .get(parsed)
            .send()
            .context(error::FetchSnafu { url })?;
        ensure!(
            response.status().is_success(),
            error::FetchStatusSnafu {
                url,
                status: response.status().as_u16(),
            }
        );
        Ok(response)
    }
}

impl Fetcher for Transport {
    fn fetch(&self, url: &str, dest: &Path) -> Result<()> {
        if self.local {
            let src = Path::new(url);
            fs::copy(src, dest)
                .map(drop)
                .context(error::FetchLocalSnafu { path: src })
        } else {
            let mut response = self.get(url)?;
            let mut file = File::create(dest).context(error::FetchWriteSnafu { path: dest })?;
            io::copy(&mut response, &mut file)
                .map(drop)
                .context(error::FetchWriteSnafu { path: dest })
        }
    }

    fn fetch_bytes(&self, url: &str) -> Result<Vec<u8>> {
        if self.local {
            let src = Path::new(url);
            fs::read(src).context(error::FetchLocalSnafu { path: src })
        } else {
            let response = self.get(url)?;
            let bytes = response.bytes().context(error::FetchSnafu { url })?;
            Ok(bytes.to_vec())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use httptest::{matchers::request, responders::status_code, Expectation, Server};
    use tempfile::TempDir;

    fn transport(local: bool) -> Transport {
        Transport {
            client: Client::new(),
            local,
        }
    }

    #[test]
    fn remote_fetch_writes_body_to_dest() {
        let server = Server::run();
        server.expect(
            Expectation::matching(request::method_path("GET", "/110/files/abc"))
                .respond_with(status_code(200).body("blob bytes")),
        );
        let dir = TempDir::new().unwrap();
        let dest = dir.path().join("abc");

        let url = server.url_str("/110/files/abc");
        transport(false).fetch(&url, &dest).unwrap();
        assert_eq!(fs::read(&dest).unwrap(), b"blob bytes");
    }

    #[test]
    fn missing_remote_content_reports_status() {
        let server = Server::run();
        server.expect(
            Expectation::matching(request::method_path("GET", "/gone"))
                .respond_with(status_code(404)),
        );
        let err = transport(false)
            .fetch_bytes(&server.url_str("/gone"))
            .unwrap_err();
        assert!(matches!(err, Error::FetchStatus { status: 404, .. }));
        assert!(err.is_not_found());
    }

    #[test]
    fn local_fetch_copies_files() {
        let dir = TempDir::new().unwrap();
        let src = dir.path().join("mix-blob");
        let dest = dir.path().join("copied");
        fs::write(&src, b"mix content").unwrap();

        let transport = transport(true);
        transport
            .fetch(&src.display().to_string(), &dest)
            .unwrap();
        assert_eq!(fs::read(&dest).unwrap(), b"mix content");
        assert_eq!(
            transport.fetch_bytes(&src.display().to_string()).unwrap(),
            b"mix content"
        );
    }

    #[test]
    fn local_miss_is_not_found() {
        let dir = TempDir::new().unwrap();
        let err = transport(true)
            .fetch_bytes(&dir.path().join("absent").display().to_string())
            .unwrap_err();
        assert!(err.is_not_found());
    }
}
