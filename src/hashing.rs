//! Streaming MD5 checksumming.
//!
//! The archive format fixes the digest algorithm to MD5, so hashing is
//! incremental over fixed-size blocks: the same helper serves local file
//! scans and the wire receive path, where bytes arrive frame by frame.

use md5::{Digest, Md5};

/// Incremental checksum builder over byte blocks.
pub struct Checksummer {
    hasher: Md5,
    bytes: u64,
}

impl Checksummer {
    pub fn new() -> Self {
        Self {
            hasher: Md5::new(),
            bytes: 0,
        }
    }

    /// Feed one block of data.
    pub fn update(&mut self, block: &[u8]) {
        self.hasher.update(block);
        self.bytes += block.len() as u64;
    }

    /// Total number of bytes fed so far.
    pub fn bytes(&self) -> u64 {
        self.bytes
    }

    /// Finish and return the lowercase hex digest.
    pub fn finish(self) -> String {
        hex::encode(self.hasher.finalize())
    }
}

impl Default for Checksummer {
    fn default() -> Self {
        Self::new()
    }
}
