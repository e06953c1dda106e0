//! Commit footer: the 64-byte trailer written after every TOC.

use memchr::memrchr;

use crate::checksum::sha256;
use crate::constants::{FOOTER_MAGIC, FOOTER_SIZE};

/// Parsed representation of the footer trailer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitFooter {
    pub toc_len: u64,
    pub toc_sha256: [u8; 32],
    pub generation: u64,
    pub wal_committed_seq: u64,
}

impl CommitFooter {
    /// Serialises the footer into a fixed-size byte array.
    #[must_use]
    pub fn encode(&self) -> [u8; FOOTER_SIZE] {
        let mut buf = [0u8; FOOTER_SIZE];
        buf[..8].copy_from_slice(&FOOTER_MAGIC);
        buf[8..16].copy_from_slice(&self.toc_len.to_le_bytes());
        buf[16..48].copy_from_slice(&self.toc_sha256);
        buf[48..56].copy_from_slice(&self.generation.to_le_bytes());
        buf[56..64].copy_from_slice(&self.wal_committed_seq.to_le_bytes());
        buf
    }

    /// Attempts to decode a footer from a byte slice.
    #[must_use]
    pub fn decode(bytes: &[u8]) -> Option<Self> {
        if bytes.len() != FOOTER_SIZE || bytes[..8] != FOOTER_MAGIC {
            return None;
        }
        let mut toc_sha256 = [0u8; 32];
        toc_sha256.copy_from_slice(&bytes[16..48]);
        Some(Self {
            toc_len: u64::from_le_bytes(bytes[8..16].try_into().ok()?),
            toc_sha256,
            generation: u64::from_le_bytes(bytes[48..56].try_into().ok()?),
            wal_committed_seq: u64::from_le_bytes(bytes[56..64].try_into().ok()?),
        })
    }

    #[must_use]
    pub fn hash_matches(&self, toc_bytes: &[u8]) -> bool {
        sha256(toc_bytes) == self.toc_sha256
    }
}

/// Result of scanning a byte window for the last valid commit footer.
#[derive(Debug)]
pub struct FooterSlice<'a> {
    /// Footer offset relative to the scanned window.
    pub footer_offset: usize,
    /// TOC offset relative to the scanned window.
    pub toc_offset: usize,
    pub footer: CommitFooter,
    pub toc_bytes: &'a [u8],
}

/// Scans the provided bytes backwards to locate the most recent footer
/// whose TOC hash verifies.
#[must_use]
pub fn find_last_valid_footer(bytes: &[u8]) -> Option<FooterSlice<'_>> {
    if bytes.len() < FOOTER_SIZE {
        return None;
    }

    let total_len = bytes.len();
    let mut search_end = bytes.len();
    while let Some(pos) = memrchr(FOOTER_MAGIC[0], &bytes[..search_end]) {
        if pos + FOOTER_SIZE > total_len {
            if pos == 0 {
                break;
            }
            search_end = pos;
            continue;
        }
        let candidate = &bytes[pos..pos + FOOTER_SIZE];
        if let Some(footer) = CommitFooter::decode(candidate) {
            let toc_end = pos;
            let toc_len = usize::try_from(footer.toc_len).unwrap_or(0);
            if toc_len == 0 || toc_len > toc_end {
                search_end = pos;
                continue;
            }
            let toc_offset = toc_end - toc_len;
            let toc_bytes = &bytes[toc_offset..toc_end];
            if !footer.hash_matches(toc_bytes) {
                search_end = pos;
                continue;
            }
            return Some(FooterSlice {
                footer_offset: pos,
                toc_offset,
                footer,
                toc_bytes,
            });
        }
        if pos == 0 {
            break;
        }
        search_end = pos;
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn build_sample_bytes(generation: u64, toc: &[u8]) -> Vec<u8> {
        let mut buffer = Vec::new();
        buffer.extend_from_slice(toc);
        let footer = CommitFooter {
            toc_len: toc.len() as u64,
            toc_sha256: sha256(toc),
            generation,
            wal_committed_seq: generation * 10,
        };
        buffer.extend_from_slice(&footer.encode());
        buffer
    }

    #[test]
    fn encode_decode_roundtrip() {
        let footer = CommitFooter {
            toc_len: 123,
            toc_sha256: [0xAB; 32],
            generation: 99,
            wal_committed_seq: 1_024,
        };
        let encoded = footer.encode();
        let decoded = CommitFooter::decode(&encoded).expect("decode");
        assert_eq!(footer, decoded);
    }

    #[test]
    fn decode_rejects_foreign_magic() {
        let mut encoded = CommitFooter {
            toc_len: 1,
            toc_sha256: [0; 32],
            generation: 1,
            wal_committed_seq: 0,
        }
        .encode();
        encoded[..8].copy_from_slice(b"MV2FOOT!");
        assert!(CommitFooter::decode(&encoded).is_none());
    }

    #[test]
    fn scan_finds_footer() {
        let toc = vec![0xAA, 0xBB, 0xCC];
        let bytes = build_sample_bytes(7, &toc);
        let slice = find_last_valid_footer(&bytes).expect("footer present");
        assert_eq!(slice.footer.generation, 7);
        assert_eq!(slice.toc_bytes, toc);
        assert_eq!(
            &bytes[slice.footer_offset..slice.footer_offset + FOOTER_SIZE],
            &slice.footer.encode()
        );
    }

    #[test]
    fn scan_skips_corrupt_footer() {
        let toc = vec![1u8, 2, 3, 4];
        let mut bytes = build_sample_bytes(1, &toc);
        // Corrupt the hash of the first footer.
        let idx = bytes.len() - FOOTER_SIZE + 20;
        bytes[idx] ^= 0xFF;
        // Append a valid second footer.
        let mut extra_toc = vec![9u8; 10];
        extra_toc.push(42);
        let appended = build_sample_bytes(2, &extra_toc);
        bytes.extend_from_slice(&appended);
        let slice = find_last_valid_footer(&bytes).expect("footer present");
        assert_eq!(slice.footer.generation, 2);
        assert_eq!(slice.toc_bytes, &extra_toc);
    }

    #[test]
    fn scan_prefers_the_newest_valid_footer() {
        let mut bytes = build_sample_bytes(1, &[5u8; 8]);
        bytes.extend_from_slice(&build_sample_bytes(2, &[6u8; 8]));
        let slice = find_last_valid_footer(&bytes).expect("footer present");
        assert_eq!(slice.footer.generation, 2);
    }
}
