//! `bun.lockb`: the binary lockfile.
//!
//! Layout: magic header, format version (u32 LE), payload length (u64 LE),
//! `bincode` payload of the graph, then a 32-byte blake3 checksum of
//! everything before it.

use crate::pkg::error::PkgError;
use crate::pkg::graph::DependencyGraph;

pub const MAGIC: &[u8] = b"#!/usr/bin/env bun\nbun-lockfile-format-v0\n";
pub const FORMAT_VERSION: u32 = 3;

const CHECKSUM_LEN: usize = 32;
const HEADER_LEN: usize = MAGIC.len() + 4 + 8;

/// Serialize `graph`.
///
/// # Errors
/// Returns `LOCKFILE_INVALID` if the graph cannot be serialized.
pub fn encode(graph: &DependencyGraph) -> Result<Vec<u8>, PkgError> {
    let payload = bincode::serialize(graph)
        .map_err(|e| PkgError::lockfile_invalid(format!("failed to encode lockfile: {e}")))?;

    let mut out = Vec::with_capacity(HEADER_LEN + payload.len() + CHECKSUM_LEN);
    out.extend_from_slice(MAGIC);
    out.extend_from_slice(&FORMAT_VERSION.to_le_bytes());
    out.extend_from_slice(&(payload.len() as u64).to_le_bytes());
    out.extend_from_slice(&payload);
    let checksum = blake3::hash(&out);
    out.extend_from_slice(checksum.as_bytes());
    Ok(out)
}

/// Parse a binary lockfile.
///
/// # Errors
/// Returns `LOCKFILE_INVALID` for a wrong magic, an unknown version, a
/// truncated file, a checksum mismatch, or an undecodable payload.
pub fn decode(bytes: &[u8]) -> Result<DependencyGraph, PkgError> {
    let invalid = |msg: &str| PkgError::lockfile_invalid(format!("bun.lockb: {msg}"));

    if !bytes.starts_with(MAGIC) {
        return Err(invalid("not a bun lockfile"));
    }
    if bytes.len() < HEADER_LEN + CHECKSUM_LEN {
        return Err(invalid("truncated header"));
    }

    let (body, checksum) = bytes.split_at(bytes.len() - CHECKSUM_LEN);
    if blake3::hash(body).as_bytes() != checksum {
        return Err(invalid("checksum mismatch"));
    }

    let mut version = [0u8; 4];
    version.copy_from_slice(&body[MAGIC.len()..MAGIC.len() + 4]);
    let version = u32::from_le_bytes(version);
    if version != FORMAT_VERSION {
        return Err(invalid(&format!(
            "unsupported format version {version} (expected {FORMAT_VERSION})"
        )));
    }

    let mut len = [0u8; 8];
    len.copy_from_slice(&body[MAGIC.len() + 4..HEADER_LEN]);
    let len = usize::try_from(u64::from_le_bytes(len)).map_err(|_| invalid("payload too large"))?;
    let payload = &body[HEADER_LEN..];
    if payload.len() != len {
        return Err(invalid("payload length mismatch"));
    }

    bincode::deserialize(payload).map_err(|e| invalid(&format!("corrupt payload: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pkg::lockfile::text::tests::sample_graph;

    #[test]
    fn test_roundtrip() {
        let graph = sample_graph();
        let bytes = encode(&graph).unwrap();
        assert!(bytes.starts_with(MAGIC));
        assert_eq!(decode(&bytes).unwrap(), graph);
        assert_eq!(encode(&graph).unwrap(), bytes);
    }

    #[test]
    fn test_detects_corruption() {
        let mut bytes = encode(&sample_graph()).unwrap();
        let mid = bytes.len() / 2;
        bytes[mid] ^= 0xff;
        let err = decode(&bytes).unwrap_err();
        assert_eq!(err.code(), crate::pkg::error::codes::LOCKFILE_INVALID);
        assert!(err.message().contains("checksum"));
    }

    #[test]
    fn test_rejects_foreign_files() {
        assert!(decode(b"{\"lockfileVersion\": 1}").is_err());
        assert!(decode(MAGIC).is_err());
    }
}
