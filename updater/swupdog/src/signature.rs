//! Manifest signature verification seam.

use std::str::FromStr;
use update_manifest::FileHash;

/// Verifies a fetched blob against its detached signature. The updater
/// only ever asks yes or no; key handling stays behind the trait.
pub(crate) trait SignatureVerifier {
    fn verify(&self, blob: &[u8], signature: &[u8]) -> bool;
}

/// Sidecar digest verification: the `.sig` file holds the hex SHA-256 of
/// the signed blob. Deployments with signing keys substitute an
/// asymmetric verifier behind the same trait.
pub(crate) struct DigestSidecar;

impl SignatureVerifier for DigestSidecar {
    fn verify(&self, blob: &[u8], signature: &[u8]) -> bool {
        let Ok(text) = std::str::from_utf8(signature) else {
            return false;
        };
        match FileHash::from_str(text.trim()) {
            Ok(declared) => declared == FileHash::of_bytes(blob),
            Err(_) => false,
        }
    }
}
