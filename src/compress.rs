//! Payload compression codec.
//!
//! Canonical bytes are stored either verbatim or compressed with the
//! algorithm named by the frame's canonical encoding. Decompression
//! verifies the declared uncompressed length.

use std::io::Write;

use flate2::Compression;
use flate2::write::{DeflateDecoder, DeflateEncoder};

use crate::error::{Result, WaxError};
use crate::types::CanonicalEncoding;

/// Compresses `bytes` with `algorithm`. `Plain` is identity and the
/// empty input always maps to the empty output.
pub fn compress(bytes: &[u8], algorithm: CanonicalEncoding) -> Result<Vec<u8>> {
    if bytes.is_empty() {
        return Ok(Vec::new());
    }
    match algorithm {
        CanonicalEncoding::Plain => Ok(bytes.to_vec()),
        CanonicalEncoding::Lz4 => Ok(lz4_flex::block::compress(bytes)),
        CanonicalEncoding::Deflate => {
            let mut encoder = DeflateEncoder::new(Vec::new(), Compression::default());
            encoder.write_all(bytes)?;
            Ok(encoder.finish()?)
        }
        CanonicalEncoding::Lzfse => Err(WaxError::CompressionUnsupported { algorithm: "lzfse" }),
    }
}

/// Decompresses `bytes` and verifies the result is exactly
/// `uncompressed_length` bytes long.
pub fn decompress(
    bytes: &[u8],
    algorithm: CanonicalEncoding,
    uncompressed_length: u64,
) -> Result<Vec<u8>> {
    if bytes.is_empty() {
        return if uncompressed_length == 0 {
            Ok(Vec::new())
        } else {
            Err(WaxError::DecompressedLengthMismatch {
                expected: uncompressed_length,
                actual: 0,
            })
        };
    }
    let out = match algorithm {
        CanonicalEncoding::Plain => bytes.to_vec(),
        CanonicalEncoding::Lz4 => {
            let expected = usize::try_from(uncompressed_length).map_err(|_| {
                WaxError::DecodeBound {
                    what: "blob bytes",
                    limit: crate::codec::MAX_BLOB_BYTES,
                    actual: uncompressed_length,
                }
            })?;
            lz4_flex::block::decompress(bytes, expected).map_err(|err| WaxError::DecodeInvalid {
                context: "lz4 payload",
                reason: err.to_string().into(),
            })?
        }
        CanonicalEncoding::Deflate => {
            let mut decoder = DeflateDecoder::new(Vec::new());
            decoder.write_all(bytes)?;
            decoder.finish()?
        }
        CanonicalEncoding::Lzfse => {
            return Err(WaxError::CompressionUnsupported { algorithm: "lzfse" });
        }
    };
    if out.len() as u64 != uncompressed_length {
        return Err(WaxError::DecompressedLengthMismatch {
            expected: uncompressed_length,
            actual: out.len() as u64,
        });
    }
    Ok(out)
}
