//! Content digests used as the deduplication key.
//!
//! The origin reports each attachment's MD5 as standard base64, so locally
//! computed digests use the same encoding and compare byte-for-byte with the
//! reported ones.

use std::path::Path;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use md5::{Digest, Md5};
use tokio::io::AsyncReadExt;

use crate::constants::HASH_BUFFER_SIZE;

/// Incremental digest over a byte stream.
#[derive(Debug, Clone, Default)]
pub struct DigestComputer {
    hasher: Md5,
    bytes: u64,
}

impl DigestComputer {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed the next chunk of the stream.
    pub fn update(&mut self, chunk: &[u8]) {
        self.hasher.update(chunk);
        self.bytes += chunk.len() as u64;
    }

    /// Number of bytes consumed so far.
    #[must_use]
    pub fn bytes(&self) -> u64 {
        self.bytes
    }

    /// Finish and return the base64-encoded digest.
    #[must_use]
    pub fn finalize(self) -> String {
        STANDARD.encode(self.hasher.finalize())
    }
}

/// Digest of an in-memory buffer.
#[must_use]
pub fn digest_bytes(data: &[u8]) -> String {
    let mut computer = DigestComputer::new();
    computer.update(data);
    computer.finalize()
}

/// Digest of a file on disk, read in bounded chunks.
pub async fn digest_file(path: &Path) -> std::io::Result<String> {
    let mut file = tokio::fs::File::open(path).await?;
    let mut computer = DigestComputer::new();
    let mut buf = vec![0u8; HASH_BUFFER_SIZE];
    loop {
        let n = file.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        computer.update(&buf[..n]);
    }
    Ok(computer.finalize())
}

/// Short filesystem-safe token derived from a digest.
///
/// Base64 digests may contain `/` and `+`, so the raw digest bytes are
/// re-encoded as lowercase hex. Digests that are not valid base64 fall back to
/// their alphanumeric characters.
#[must_use]
pub fn digest_token(digest: &str, len: usize) -> String {
    let token = STANDARD.decode(digest).map_or_else(
        |_| {
            digest
                .chars()
                .filter(char::is_ascii_alphanumeric)
                .collect::<String>()
                .to_lowercase()
        },
        hex::encode,
    );
    token.chars().take(len).collect()
}
