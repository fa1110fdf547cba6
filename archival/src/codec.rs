//! Serialization, compression, and digest primitives for archives

use crate::types::{ArchivalError, ArchiveFormat, CompressionAlgorithm};
use audit_relay_contracts::AuditRecord;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use flate2::read::{GzDecoder, ZlibDecoder};
use flate2::write::{GzEncoder, ZlibEncoder};
use flate2::Compression;
use sha2::{Digest, Sha256};
use std::io::{Read, Write};

/// Serialize a batch per the archive format.
pub fn serialize_records(
    records: &[AuditRecord],
    format: ArchiveFormat,
) -> Result<Vec<u8>, ArchivalError> {
    match format {
        ArchiveFormat::Json => Ok(serde_json::to_vec(records)?),
        ArchiveFormat::Jsonl => {
            let mut out = Vec::new();
            for (i, record) in records.iter().enumerate() {
                if i > 0 {
                    out.push(b'\n');
                }
                out.extend_from_slice(&serde_json::to_vec(record)?);
            }
            Ok(out)
        }
    }
}

/// Inverse of [`serialize_records`] for the same format.
pub fn deserialize_records(
    bytes: &[u8],
    format: ArchiveFormat,
) -> Result<Vec<AuditRecord>, ArchivalError> {
    match format {
        ArchiveFormat::Json => Ok(serde_json::from_slice(bytes)?),
        ArchiveFormat::Jsonl => {
            let mut records = Vec::new();
            for line in bytes.split(|b| *b == b'\n') {
                if line.is_empty() {
                    continue;
                }
                records.push(serde_json::from_slice(line)?);
            }
            Ok(records)
        }
    }
}

/// Compress at the given level (clamped to 0..=9). `none` is identity.
pub fn compress(
    data: &[u8],
    algorithm: CompressionAlgorithm,
    level: u32,
) -> Result<Vec<u8>, ArchivalError> {
    let level = Compression::new(level.min(9));
    match algorithm {
        CompressionAlgorithm::Gzip => {
            let mut encoder = GzEncoder::new(Vec::new(), level);
            encoder.write_all(data)?;
            Ok(encoder.finish()?)
        }
        CompressionAlgorithm::Deflate => {
            let mut encoder = ZlibEncoder::new(Vec::new(), level);
            encoder.write_all(data)?;
            Ok(encoder.finish()?)
        }
        CompressionAlgorithm::None => Ok(data.to_vec()),
    }
}

pub fn decompress(data: &[u8], algorithm: CompressionAlgorithm) -> Result<Vec<u8>, ArchivalError> {
    match algorithm {
        CompressionAlgorithm::Gzip => {
            let mut out = Vec::new();
            GzDecoder::new(data).read_to_end(&mut out)?;
            Ok(out)
        }
        CompressionAlgorithm::Deflate => {
            let mut out = Vec::new();
            ZlibDecoder::new(data).read_to_end(&mut out)?;
            Ok(out)
        }
        CompressionAlgorithm::None => Ok(data.to_vec()),
    }
}

pub fn sha256_hex(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    let digest = hasher.finalize();
    digest.iter().map(|b| format!("{b:02x}")).collect()
}

/// Normalize a stored payload that may be raw bytes or base64 text.
///
/// Text-column backends store the payload base64-encoded; binary columns
/// store it raw. A strict base64 decode plus a sanity check on the
/// decoded leading bytes disambiguates: compressed payloads carry a magic
/// prefix, and raw JSON text is never valid strict base64.
pub fn decode_stored_payload(raw: &[u8], algorithm: CompressionAlgorithm) -> Vec<u8> {
    let Ok(text) = std::str::from_utf8(raw) else {
        return raw.to_vec();
    };
    let Ok(decoded) = BASE64.decode(text.trim_end()) else {
        return raw.to_vec();
    };
    let matches_algorithm = match algorithm {
        CompressionAlgorithm::Gzip => decoded.starts_with(&[0x1f, 0x8b]),
        CompressionAlgorithm::Deflate => decoded.first() == Some(&0x78),
        CompressionAlgorithm::None => true,
    };
    if matches_algorithm {
        decoded
    } else {
        raw.to_vec()
    }
}
