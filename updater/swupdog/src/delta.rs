//! The binary delta codec.
//!
//! A delta blob is published under `<from-hash>-<to-hash>` and rebuilds
//! the target from the predecessor's bytes: a fixed header naming both
//! hashes, then a compressed stream of copy and insert ops. Application
//! verifies the predecessor before patching and the output after, so a
//! bad delta can only ever cost a fallback to full download.

use crate::error::{self, Result};
use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use flate2::Compression;
use snafu::{ensure, ResultExt};
use std::io::{Read, Write};
use update_manifest::{FileHash, HASH_LEN};

const MAGIC: &[u8; 8] = b"SWUPDLT1";
const HEADER_LEN: usize = 8 + 2 * HASH_LEN;
const OP_COPY: u8 = 0;
const OP_INSERT: u8 = 1;

/// The name a delta is published under.
pub(crate) fn delta_name(from: FileHash, to: FileHash) -> String {
    format!("{}-{}", from, to)
}

fn push_copy(ops: &mut Vec<u8>, offset: usize, len: usize) {
    if len == 0 {
        return;
    }
    ops.push(OP_COPY);
    ops.extend_from_slice(&(offset as u64).to_le_bytes());
    ops.extend_from_slice(&(len as u64).to_le_bytes());
}

fn push_insert(ops: &mut Vec<u8>, data: &[u8]) {
    if data.is_empty() {
        return;
    }
    ops.push(OP_INSERT);
    ops.extend_from_slice(&(data.len() as u64).to_le_bytes());
    ops.extend_from_slice(data);
}

/// Encodes a delta from `from` to `to`. The encoder reuses the longest
/// common prefix and suffix of the two blobs and inserts the middle; the
/// server side may publish smarter deltas in the same format.
pub(crate) fn make_delta(from: &[u8], to: &[u8]) -> Result<Vec<u8>> {
    let prefix = from.iter().zip(to).take_while(|(a, b)| a == b).count();
    let limit = from.len().min(to.len()) - prefix;
    let suffix = from
        .iter()
        .rev()
        .zip(to.iter().rev())
        .take(limit)
        .take_while(|(a, b)| a == b)
        .count();

    let mut ops = Vec::new();
    push_copy(&mut ops, 0, prefix);
    push_insert(&mut ops, &to[prefix..to.len() - suffix]);
    push_copy(&mut ops, from.len() - suffix, suffix);

    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(&ops).context(error::DeltaStreamSnafu)?;
    let compressed = encoder.finish().context(error::DeltaStreamSnafu)?;

    let mut delta = Vec::with_capacity(HEADER_LEN + compressed.len());
    delta.extend_from_slice(MAGIC);
    delta.extend_from_slice(FileHash::of_bytes(from).as_bytes());
    delta.extend_from_slice(FileHash::of_bytes(to).as_bytes());
    delta.extend_from_slice(&compressed);
    Ok(delta)
}

fn header_hash(delta: &[u8], at: usize) -> Result<FileHash> {
    let digest: [u8; HASH_LEN] = delta[at..at + HASH_LEN]
        .try_into()
        .map_err(|_| error::DeltaMalformedSnafu.build())?;
    Ok(FileHash::from_digest(digest))
}

fn read_u64(ops: &[u8], at: usize) -> Result<(usize, usize)> {
    let bytes: [u8; 8] = ops
        .get(at..at + 8)
        .and_then(|s| s.try_into().ok())
        .ok_or_else(|| error::DeltaMalformedSnafu.build())?;
    let value = usize::try_from(u64::from_le_bytes(bytes))
        .map_err(|_| error::DeltaMalformedSnafu.build())?;
    Ok((value, at + 8))
}

/// Applies a delta to the predecessor's bytes and returns the target
/// content. Both the predecessor and the result are checked against the
/// hashes the delta declares.
pub(crate) fn apply_delta(delta: &[u8], predecessor: &[u8]) -> Result<Vec<u8>> {
    ensure!(
        delta.len() >= HEADER_LEN && &delta[..MAGIC.len()] == MAGIC,
        error::DeltaMalformedSnafu
    );
    let from = header_hash(delta, MAGIC.len())?;
    let to = header_hash(delta, MAGIC.len() + HASH_LEN)?;

    let actual = FileHash::of_bytes(predecessor);
    ensure!(
        actual == from,
        error::DeltaMismatchSnafu {
            expected: from,
            actual,
        }
    );

    let mut ops = Vec::new();
    ZlibDecoder::new(&delta[HEADER_LEN..])
        .read_to_end(&mut ops)
        .context(error::DeltaStreamSnafu)?;

    let mut output = Vec::new();
    let mut pos = 0;
    while pos < ops.len() {
        let op = ops[pos];
        pos += 1;
        match op {
            OP_COPY => {
                let (offset, next) = read_u64(&ops, pos)?;
                let (len, next) = read_u64(&ops, next)?;
                pos = next;
                let end = offset
                    .checked_add(len)
                    .filter(|end| *end <= predecessor.len())
                    .ok_or_else(|| error::DeltaMalformedSnafu.build())?;
                output.extend_from_slice(&predecessor[offset..end]);
            }
            OP_INSERT => {
                let (len, next) = read_u64(&ops, pos)?;
                let end = next
                    .checked_add(len)
                    .filter(|end| *end <= ops.len())
                    .ok_or_else(|| error::DeltaMalformedSnafu.build())?;
                output.extend_from_slice(&ops[next..end]);
                pos = end;
            }
            _ => return error::DeltaMalformedSnafu.fail(),
        }
    }

    let produced = FileHash::of_bytes(&output);
    ensure!(
        produced == to,
        error::DeltaMismatchSnafu {
            expected: to,
            actual: produced,
        }
    );
    Ok(output)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;

    #[test]
    fn round_trips_an_edit_in_the_middle() {
        let from = b"config option=off\nkeep this tail\n".to_vec();
        let to = b"config option=on\nkeep this tail\n".to_vec();
        let delta = make_delta(&from, &to).unwrap();
        assert_eq!(apply_delta(&delta, &from).unwrap(), to);
        // A one-byte edit compresses far below the full content.
        assert!(delta.len() < to.len() + HEADER_LEN);
    }

    #[test]
    fn round_trips_disjoint_content() {
        let from = b"entirely old".to_vec();
        let to = vec![0xa5u8; 4096];
        let delta = make_delta(&from, &to).unwrap();
        assert_eq!(apply_delta(&delta, &from).unwrap(), to);
    }

    #[test]
    fn round_trips_from_empty_predecessor() {
        let delta = make_delta(b"", b"fresh content").unwrap();
        assert_eq!(apply_delta(&delta, b"").unwrap(), b"fresh content");
    }

    #[test]
    fn wrong_predecessor_is_rejected() {
        let delta = make_delta(b"version 100", b"version 110").unwrap();
        assert!(matches!(
            apply_delta(&delta, b"locally modified"),
            Err(Error::DeltaMismatch { .. })
        ));
    }

    #[test]
    fn garbage_is_rejected() {
        assert!(matches!(
            apply_delta(b"not a delta", b""),
            Err(Error::DeltaMalformed { .. })
        ));
        let mut delta = make_delta(b"a", b"b").unwrap();
        delta[0] = b'X';
        assert!(matches!(
            apply_delta(&delta, b"a"),
            Err(Error::DeltaMalformed { .. })
        ));
    }

    #[test]
    fn truncated_op_stream_is_rejected() {
        let delta = make_delta(b"version 100", b"version 110 plus more").unwrap();
        assert!(apply_delta(&delta[..delta.len() - 4], b"version 100").is_err());
    }

    #[test]
    fn delta_names_pair_the_hashes() {
        let from = FileHash::of_bytes(b"old");
        let to = FileHash::of_bytes(b"new");
        assert_eq!(delta_name(from, to), format!("{}-{}", from, to));
    }
}
