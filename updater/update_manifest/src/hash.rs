//! Content hashes for file entries.
//!
//! A `FileHash` is a SHA-256 digest of a blob's content. Manifests carry
//! them hex-encoded; on disk, staged blobs are stored under their hex name.

use crate::error::{self, Error};
use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest, Sha256};
use std::fmt;
use std::fs::File;
use std::io::{self, Read};
use std::path::Path;
use std::str::FromStr;

pub const HASH_LEN: usize = 32;

#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FileHash([u8; HASH_LEN]);

impl FileHash {
    /// The all-zero hash, carried by entries with no content of their own
    /// (tombstones and directories).
    pub const ZERO: FileHash = FileHash([0; HASH_LEN]);

    pub fn of_bytes(data: &[u8]) -> Self {
        FileHash(Sha256::digest(data).into())
    }

    pub fn of_reader<R: Read>(reader: &mut R) -> io::Result<Self> {
        let mut hasher = Sha256::new();
        let mut buf = [0u8; 8192];
        loop {
            let n = match reader.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            };
            hasher.update(&buf[..n]);
        }
        Ok(FileHash(hasher.finalize().into()))
    }

    pub fn of_file<P: AsRef<Path>>(path: P) -> io::Result<Self> {
        Self::of_reader(&mut File::open(path)?)
    }

    pub fn from_digest(digest: [u8; HASH_LEN]) -> Self {
        FileHash(digest)
    }

    pub fn as_bytes(&self) -> &[u8; HASH_LEN] {
        &self.0
    }

    pub fn is_zero(&self) -> bool {
        *self == Self::ZERO
    }
}

impl fmt::Display for FileHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

impl fmt::Debug for FileHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FileHash({})", self)
    }
}

impl FromStr for FileHash {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes = hex::decode(s).ok().filter(|b| b.len() == HASH_LEN);
        match bytes {
            Some(b) => {
                let mut digest = [0u8; HASH_LEN];
                digest.copy_from_slice(&b);
                Ok(FileHash(digest))
            }
            None => error::HashParseSnafu { input: s }.fail(),
        }
    }
}

impl Serialize for FileHash {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for FileHash {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        FileHash::from_str(&s).map_err(D::Error::custom)
    }
}
