//! File hashing. The chain builder never hashes anything itself; it only
//! compares the digests produced here.

use std::path::Path;

use md5::Md5;
use sha2::{Digest, Sha256};
use tokio::io::AsyncReadExt;

const READ_CHUNK: usize = 64 * 1024;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum HashAlgorithm {
    #[default]
    Md5,
    Sha256,
}

impl HashAlgorithm {
    pub fn as_str(&self) -> &'static str {
        match self {
            HashAlgorithm::Md5 => "md5",
            HashAlgorithm::Sha256 => "sha256",
        }
    }
}

impl std::str::FromStr for HashAlgorithm {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> anyhow::Result<Self> {
        match s.to_lowercase().as_str() {
            "md5" => Ok(HashAlgorithm::Md5),
            "sha256" | "sha-256" => Ok(HashAlgorithm::Sha256),
            other => anyhow::bail!("Unsupported hash algorithm '{}'. Use: md5, sha256", other),
        }
    }
}

/// Hex digest of a file's contents, read in chunks.
pub async fn file_digest(path: &Path, algorithm: HashAlgorithm) -> std::io::Result<String> {
    match algorithm {
        HashAlgorithm::Md5 => digest_with::<Md5>(path).await,
        HashAlgorithm::Sha256 => digest_with::<Sha256>(path).await,
    }
}

/// MD5 hex digest, the checksum recorded on file events.
pub async fn md5_file(path: &Path) -> std::io::Result<String> {
    file_digest(path, HashAlgorithm::Md5).await
}

async fn digest_with<D: Digest>(path: &Path) -> std::io::Result<String> {
    let mut file = tokio::fs::File::open(path).await?;
    let mut hasher = D::new();
    let mut buf = vec![0u8; READ_CHUNK];
    loop {
        let n = file.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hex::encode(hasher.finalize()))
}
