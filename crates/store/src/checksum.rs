//! Content digests for packaged artifacts and installed collections.
//!
//! Files are hashed in fixed-size chunks so large archives never have to be held in
//! memory. Comparisons are case-insensitive and ignore surrounding whitespace.

use std::fmt::Display;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256, Sha384, Sha512};
use tokio::io::AsyncReadExt;
use walkdir::WalkDir;

use crate::error::{io_op, Result, StoreError};
use crate::manifest::relative_to_slash;

const CHUNK_SIZE: usize = 64 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ChecksumAlgorithm {
    #[default]
    Sha256,
    Sha384,
    Sha512,
    Blake3,
}

/// A digest tagged with the algorithm that produced it, written as `algorithm:hex`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Checksum {
    pub algorithm: ChecksumAlgorithm,
    pub value: String,
}

enum Hasher {
    Sha256(Sha256),
    Sha384(Sha384),
    Sha512(Sha512),
    Blake3(Box<blake3::Hasher>),
}

impl Hasher {
    fn new(algorithm: ChecksumAlgorithm) -> Self {
        match algorithm {
            ChecksumAlgorithm::Sha256 => Hasher::Sha256(Sha256::new()),
            ChecksumAlgorithm::Sha384 => Hasher::Sha384(Sha384::new()),
            ChecksumAlgorithm::Sha512 => Hasher::Sha512(Sha512::new()),
            ChecksumAlgorithm::Blake3 => Hasher::Blake3(Box::new(blake3::Hasher::new())),
        }
    }

    fn update(&mut self, data: &[u8]) {
        match self {
            Hasher::Sha256(h) => h.update(data),
            Hasher::Sha384(h) => h.update(data),
            Hasher::Sha512(h) => h.update(data),
            Hasher::Blake3(h) => {
                h.update(data);
            }
        }
    }

    fn finalize_hex(self) -> String {
        match self {
            Hasher::Sha256(h) => format!("{:x}", h.finalize()),
            Hasher::Sha384(h) => format!("{:x}", h.finalize()),
            Hasher::Sha512(h) => format!("{:x}", h.finalize()),
            Hasher::Blake3(h) => h.finalize().to_hex().to_string(),
        }
    }
}

impl ChecksumAlgorithm {
    /// Calculate the digest of an in-memory buffer.
    pub fn calculate(&self, data: &[u8]) -> String {
        let mut hasher = Hasher::new(*self);
        hasher.update(data);
        hasher.finalize_hex()
    }

    /// Hex length of a digest produced by this algorithm.
    pub fn hex_len(&self) -> usize {
        match self {
            ChecksumAlgorithm::Sha256 | ChecksumAlgorithm::Blake3 => 64,
            ChecksumAlgorithm::Sha384 => 96,
            ChecksumAlgorithm::Sha512 => 128,
        }
    }
}

impl FromStr for ChecksumAlgorithm {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "sha256" => Ok(ChecksumAlgorithm::Sha256),
            "sha384" => Ok(ChecksumAlgorithm::Sha384),
            "sha512" => Ok(ChecksumAlgorithm::Sha512),
            "blake3" => Ok(ChecksumAlgorithm::Blake3),
            other => Err(StoreError::InvalidConfiguration(format!(
                "unsupported checksum algorithm: {}",
                other
            ))),
        }
    }
}

impl Display for ChecksumAlgorithm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ChecksumAlgorithm::Sha256 => write!(f, "sha256"),
            ChecksumAlgorithm::Sha384 => write!(f, "sha384"),
            ChecksumAlgorithm::Sha512 => write!(f, "sha512"),
            ChecksumAlgorithm::Blake3 => write!(f, "blake3"),
        }
    }
}

impl Checksum {
    pub fn from_data(algorithm: ChecksumAlgorithm, data: &[u8]) -> Self {
        Self {
            value: algorithm.calculate(data),
            algorithm,
        }
    }

    /// Whether `other` is the same digest, ignoring case and surrounding whitespace.
    pub fn matches(&self, other: &str) -> bool {
        digests_equal(&self.value, other)
    }

    pub fn verify(&self, data: &[u8]) -> bool {
        self.matches(&self.algorithm.calculate(data))
    }
}

impl Display for Checksum {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.algorithm, self.value)
    }
}

impl FromStr for Checksum {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().split_once(':') {
            Some((algorithm, value)) => Ok(Checksum {
                algorithm: algorithm.parse()?,
                value: value.trim().to_lowercase(),
            }),
            None => Err(StoreError::InvalidConfiguration(
                "invalid checksum format, expected 'algorithm:checksum'".to_string(),
            )),
        }
    }
}

impl<'de> Deserialize<'de> for Checksum {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let string = String::deserialize(deserializer)?;
        string.parse().map_err(serde::de::Error::custom)
    }
}

impl Serialize for Checksum {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

pub fn digests_equal(a: &str, b: &str) -> bool {
    a.trim().eq_ignore_ascii_case(b.trim())
}

/// Hex digest of an in-memory buffer.
pub fn compute_bytes(data: &[u8], algorithm: ChecksumAlgorithm) -> String {
    algorithm.calculate(data)
}

/// Streams a file through the chosen algorithm and returns the hex digest.
pub async fn compute(path: &Path, algorithm: ChecksumAlgorithm) -> Result<String> {
    let mut file = tokio::fs::File::open(path)
        .await
        .map_err(io_op("open for checksum", path))?;

    let mut hasher = Hasher::new(algorithm);
    let mut buffer = vec![0u8; CHUNK_SIZE];
    loop {
        let read = file
            .read(&mut buffer)
            .await
            .map_err(io_op("read for checksum", path))?;
        if read == 0 {
            break;
        }
        hasher.update(&buffer[..read]);
    }

    Ok(hasher.finalize_hex())
}

/// Recomputes the digest of `path` and fails with `ChecksumMismatch` on divergence.
///
/// `expected` may be a bare hex digest (hashed with `algorithm`) or an
/// `algorithm:hex` string, in which case the embedded algorithm wins.
pub async fn verify(path: &Path, expected: &str, algorithm: ChecksumAlgorithm) -> Result<()> {
    let (algorithm, expected_hex) = match expected.parse::<Checksum>() {
        Ok(checksum) => (checksum.algorithm, checksum.value),
        Err(_) => (algorithm, expected.trim().to_string()),
    };

    let actual = compute(path, algorithm).await?;
    if digests_equal(&actual, &expected_hex) {
        Ok(())
    } else {
        Err(StoreError::ChecksumMismatch {
            path: path.to_path_buf(),
            expected: expected_hex.to_lowercase(),
            actual,
        })
    }
}

/// Deterministic digest of a directory tree.
///
/// Every regular file contributes its `/`-separated relative path, a NUL byte, its
/// length and its contents, visited in sorted path order. Entries whose relative path
/// starts with one of `skip_prefixes` are ignored.
pub async fn compute_dir(
    dir: &Path,
    algorithm: ChecksumAlgorithm,
    skip_prefixes: &[&str],
) -> Result<String> {
    let mut files: Vec<(String, PathBuf)> = Vec::new();
    for entry in WalkDir::new(dir).follow_links(false) {
        let entry = entry.map_err(|e| StoreError::IoOperation {
            operation: "walk directory for checksum".to_string(),
            path: dir.to_path_buf(),
            source: e.into(),
        })?;
        if !entry.file_type().is_file() {
            continue;
        }
        let Ok(relative) = entry.path().strip_prefix(dir) else {
            continue;
        };
        let relative = relative_to_slash(relative);
        if skip_prefixes.iter().any(|prefix| relative.starts_with(prefix)) {
            continue;
        }
        files.push((relative, entry.path().to_path_buf()));
    }
    files.sort_by(|a, b| a.0.cmp(&b.0));

    let mut hasher = Hasher::new(algorithm);
    let mut buffer = vec![0u8; CHUNK_SIZE];
    for (relative, path) in files {
        let mut file = tokio::fs::File::open(&path)
            .await
            .map_err(io_op("open for checksum", &path))?;
        let length = file
            .metadata()
            .await
            .map_err(io_op("stat for checksum", &path))?
            .len();

        hasher.update(relative.as_bytes());
        hasher.update(&[0]);
        hasher.update(&length.to_le_bytes());

        loop {
            let read = file
                .read(&mut buffer)
                .await
                .map_err(io_op("read for checksum", &path))?;
            if read == 0 {
                break;
            }
            hasher.update(&buffer[..read]);
        }
    }

    Ok(hasher.finalize_hex())
}

/// Path of the sidecar checksum file for an archive:
/// `name-1.0.0.tar.gz` becomes `name-1.0.0.checksums.txt`.
pub fn sidecar_path(archive: &Path) -> PathBuf {
    let file_name = archive
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();

    let stem = file_name
        .strip_suffix(".tar.gz")
        .or_else(|| file_name.strip_suffix(".tgz"))
        .unwrap_or(&file_name);

    archive.with_file_name(format!("{}.checksums.txt", stem))
}

/// Writes `<hex>  <archive file name>\n` next to the archive and returns the sidecar path.
pub async fn write_sidecar(archive: &Path, digest: &str) -> Result<PathBuf> {
    let sidecar = sidecar_path(archive);
    let file_name = archive
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();

    let content = format!("{}  {}\n", digest, file_name);
    tokio::fs::write(&sidecar, content)
        .await
        .map_err(io_op("write checksum sidecar", &sidecar))?;
    Ok(sidecar)
}

/// Parses sidecar content into `(digest, file name)` pairs.
pub fn parse_sidecar(content: &str) -> Vec<(String, String)> {
    content
        .lines()
        .filter_map(|line| {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                return None;
            }
            let (digest, name) = line.split_once(char::is_whitespace)?;
            Some((digest.to_lowercase(), name.trim().trim_start_matches('*').to_string()))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_known_digests() {
        assert_eq!(
            ChecksumAlgorithm::Sha256.calculate(b"hello"),
            "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824"
        );
        assert_eq!(ChecksumAlgorithm::Sha512.calculate(b"").len(), 128);
        assert_eq!(ChecksumAlgorithm::Blake3.calculate(b"").len(), 64);
    }

    #[test]
    fn test_checksum_string_form() {
        let checksum = Checksum::from_data(ChecksumAlgorithm::Sha256, b"hello");
        let text = checksum.to_string();
        assert!(text.starts_with("sha256:"));

        let parsed: Checksum = text.parse().unwrap();
        assert_eq!(parsed, checksum);
        assert!(parsed.matches(&format!("  {}  ", checksum.value.to_uppercase())));
        assert!(parsed.verify(b"hello"));
        assert!(!parsed.verify(b"hellO"));

        assert!("md5:abc".parse::<Checksum>().is_err());
        assert!("abc".parse::<Checksum>().is_err());
    }

    #[tokio::test]
    async fn test_compute_then_verify_and_tamper() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("artifact.bin");
        let data: Vec<u8> = (0..200_000u32).map(|i| (i % 251) as u8).collect();
        tokio::fs::write(&path, &data).await.unwrap();

        let digest = compute(&path, ChecksumAlgorithm::Sha256).await.unwrap();
        assert_eq!(digest, ChecksumAlgorithm::Sha256.calculate(&data));
        verify(&path, &digest, ChecksumAlgorithm::Sha256).await.unwrap();
        verify(&path, &format!("sha256:{}", digest.to_uppercase()), ChecksumAlgorithm::Sha512)
            .await
            .unwrap();

        let mut tampered = data.clone();
        tampered[1234] ^= 0x01;
        tokio::fs::write(&path, &tampered).await.unwrap();

        let changed = compute(&path, ChecksumAlgorithm::Sha256).await.unwrap();
        assert_ne!(changed, digest);
        let err = verify(&path, &digest, ChecksumAlgorithm::Sha256).await.unwrap_err();
        assert!(matches!(err, StoreError::ChecksumMismatch { .. }));
    }

    #[tokio::test]
    async fn test_compute_matches_compute_bytes() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("data.bin");
        let data = vec![7u8; CHUNK_SIZE * 2 + 13];
        tokio::fs::write(&path, &data).await.unwrap();

        for algorithm in [ChecksumAlgorithm::Sha512, ChecksumAlgorithm::Blake3] {
            assert_eq!(
                compute(&path, algorithm).await.unwrap(),
                compute_bytes(&data, algorithm)
            );
        }
    }

    #[tokio::test]
    async fn test_compute_missing_file_is_error() {
        let temp_dir = TempDir::new().unwrap();
        let result = compute(&temp_dir.path().join("nope"), ChecksumAlgorithm::Sha256).await;
        assert!(matches!(result, Err(StoreError::IoOperation { .. })));
    }

    #[tokio::test]
    async fn test_compute_dir_is_order_independent_and_content_sensitive() {
        let first = TempDir::new().unwrap();
        let second = TempDir::new().unwrap();

        tokio::fs::create_dir_all(first.path().join("skills")).await.unwrap();
        tokio::fs::write(first.path().join("skills/a.yaml"), "a").await.unwrap();
        tokio::fs::write(first.path().join("collection.yaml"), "name: x").await.unwrap();

        tokio::fs::write(second.path().join("collection.yaml"), "name: x").await.unwrap();
        tokio::fs::create_dir_all(second.path().join("skills")).await.unwrap();
        tokio::fs::write(second.path().join("skills/a.yaml"), "a").await.unwrap();

        let a = compute_dir(first.path(), ChecksumAlgorithm::Sha256, &[]).await.unwrap();
        let b = compute_dir(second.path(), ChecksumAlgorithm::Sha256, &[]).await.unwrap();
        assert_eq!(a, b);

        tokio::fs::write(second.path().join("skills/a.yaml"), "b").await.unwrap();
        let c = compute_dir(second.path(), ChecksumAlgorithm::Sha256, &[]).await.unwrap();
        assert_ne!(a, c);

        tokio::fs::create_dir_all(first.path().join(".git")).await.unwrap();
        tokio::fs::write(first.path().join(".git/HEAD"), "ref").await.unwrap();
        let d = compute_dir(first.path(), ChecksumAlgorithm::Sha256, &[".git/"]).await.unwrap();
        assert_eq!(a, d);
    }

    #[tokio::test]
    async fn test_sidecar_round_trip() {
        let temp_dir = TempDir::new().unwrap();
        let archive = temp_dir.path().join("devops-1.0.0.tar.gz");
        tokio::fs::write(&archive, b"archive").await.unwrap();

        let digest = compute(&archive, ChecksumAlgorithm::Sha256).await.unwrap();
        let sidecar = write_sidecar(&archive, &digest).await.unwrap();
        assert_eq!(sidecar, temp_dir.path().join("devops-1.0.0.checksums.txt"));

        let content = tokio::fs::read_to_string(&sidecar).await.unwrap();
        assert_eq!(content, format!("{}  devops-1.0.0.tar.gz\n", digest));
        assert_eq!(
            parse_sidecar(&content),
            vec![(digest, "devops-1.0.0.tar.gz".to_string())]
        );
    }
}
