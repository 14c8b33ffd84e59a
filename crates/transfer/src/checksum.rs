use std::fmt;
use std::io::Read;
use std::path::Path;
use std::str::FromStr;

use md5::Md5;
use serde::{Deserialize, Serialize};
use sha1::Sha1;
use sha2::{Digest, Sha256};

use crate::TransferError;

/// Digest algorithms usable for per-chunk integrity checks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChecksumAlgorithm {
    Md5,
    Sha1,
    Sha256,
}

impl ChecksumAlgorithm {
    /// Strongest first.
    pub const PREFERENCE: [ChecksumAlgorithm; 3] = [
        ChecksumAlgorithm::Sha256,
        ChecksumAlgorithm::Sha1,
        ChecksumAlgorithm::Md5,
    ];

    /// Name used in `Upload-Checksum` and `Tus-Checksum-Algorithm`.
    pub fn as_str(&self) -> &'static str {
        match self {
            ChecksumAlgorithm::Md5 => "md5",
            ChecksumAlgorithm::Sha1 => "sha1",
            ChecksumAlgorithm::Sha256 => "sha256",
        }
    }

    /// Picks the strongest algorithm that `advertised` contains.
    ///
    /// An empty list means the server did not say; sha1 is the protocol's
    /// baseline then.
    pub fn negotiate(advertised: &[String]) -> Option<Self> {
        if advertised.is_empty() {
            return Some(ChecksumAlgorithm::Sha1);
        }
        Self::PREFERENCE
            .into_iter()
            .find(|algo| advertised.iter().any(|a| a.eq_ignore_ascii_case(algo.as_str())))
    }

    /// Computes the raw digest of `data`.
    pub fn digest(&self, data: &[u8]) -> Vec<u8> {
        match self {
            ChecksumAlgorithm::Md5 => Md5::digest(data).to_vec(),
            ChecksumAlgorithm::Sha1 => Sha1::digest(data).to_vec(),
            ChecksumAlgorithm::Sha256 => Sha256::digest(data).to_vec(),
        }
    }
}

impl fmt::Display for ChecksumAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ChecksumAlgorithm {
    type Err = TransferError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "md5" => Ok(ChecksumAlgorithm::Md5),
            "sha1" => Ok(ChecksumAlgorithm::Sha1),
            "sha256" => Ok(ChecksumAlgorithm::Sha256),
            other => Err(TransferError::UnknownAlgorithm(other.to_string())),
        }
    }
}

/// Hex-encoded digest of `data`.
pub fn checksum_bytes(algorithm: ChecksumAlgorithm, data: &[u8]) -> String {
    hex::encode(algorithm.digest(data))
}

/// Hex-encoded digest of an entire file, streamed in 64 KiB reads.
pub fn calculate_file_checksum(
    algorithm: ChecksumAlgorithm,
    path: &Path,
) -> Result<String, TransferError> {
    let mut file = std::fs::File::open(path)?;
    let mut buf = vec![0u8; 64 * 1024];
    match algorithm {
        ChecksumAlgorithm::Md5 => stream_digest::<Md5>(&mut file, &mut buf),
        ChecksumAlgorithm::Sha1 => stream_digest::<Sha1>(&mut file, &mut buf),
        ChecksumAlgorithm::Sha256 => stream_digest::<Sha256>(&mut file, &mut buf),
    }
}

fn stream_digest<D: Digest>(reader: &mut impl Read, buf: &mut [u8]) -> Result<String, TransferError> {
    let mut hasher = D::new();
    loop {
        let n = reader.read(buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hex::encode(hasher.finalize()))
}
