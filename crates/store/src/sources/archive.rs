//! `.tar.gz` packing and unpacking for collection archives.

use std::fs::File;
use std::path::{Component, Path, PathBuf};

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{io_op, Result, StoreError};
use crate::manifest::MANIFEST_FILE;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Compression {
    None,
    Fast,
    #[default]
    Best,
}

impl Compression {
    fn level(self) -> flate2::Compression {
        match self {
            Compression::None => flate2::Compression::none(),
            Compression::Fast => flate2::Compression::fast(),
            Compression::Best => flate2::Compression::best(),
        }
    }
}

impl std::str::FromStr for Compression {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "none" => Ok(Compression::None),
            "fast" => Ok(Compression::Fast),
            "best" => Ok(Compression::Best),
            other => Err(StoreError::InvalidConfiguration(format!(
                "invalid compression: {} (must be: none, fast, best)",
                other
            ))),
        }
    }
}

pub fn is_archive(path: &str) -> bool {
    path.ends_with(".tar.gz") || path.ends_with(".tgz")
}

/// Unpacks `archive` into `dest`, refusing entries that would land outside it.
pub async fn extract(archive: &Path, dest: &Path) -> Result<()> {
    let archive = archive.to_path_buf();
    let dest = dest.to_path_buf();
    tokio::task::spawn_blocking(move || extract_blocking(&archive, &dest))
        .await
        .map_err(|e| StoreError::IoError(std::io::Error::other(e.to_string())))?
}

fn extract_blocking(archive_path: &Path, dest: &Path) -> Result<()> {
    let file = File::open(archive_path).map_err(io_op("open archive", archive_path))?;
    let mut archive = tar::Archive::new(GzDecoder::new(file));

    let entries = archive
        .entries()
        .map_err(io_op("read archive", archive_path))?;
    for entry in entries {
        let mut entry = entry.map_err(io_op("read archive entry", archive_path))?;
        let entry_path = entry
            .path()
            .map_err(io_op("read archive entry path", archive_path))?
            .into_owned();

        if !is_contained(&entry_path) {
            return Err(StoreError::InvalidPath(format!(
                "archive entry escapes extraction directory: {}",
                entry_path.display()
            )));
        }

        let kind = entry.header().entry_type();
        if kind.is_symlink() || kind.is_hard_link() {
            debug!("Skipping link entry in archive: {:?}", entry_path);
            continue;
        }

        entry
            .unpack_in(dest)
            .map_err(io_op("extract archive entry", &dest.join(&entry_path)))?;
    }
    Ok(())
}

fn is_contained(path: &Path) -> bool {
    path.components()
        .all(|c| matches!(c, Component::Normal(_) | Component::CurDir))
}

/// Writes `files` (archive name, source path) into a gzip-compressed tarball.
pub async fn create(output: &Path, files: Vec<(String, PathBuf)>, compression: Compression) -> Result<()> {
    let output = output.to_path_buf();
    tokio::task::spawn_blocking(move || create_blocking(&output, &files, compression))
        .await
        .map_err(|e| StoreError::IoError(std::io::Error::other(e.to_string())))?
}

fn create_blocking(output: &Path, files: &[(String, PathBuf)], compression: Compression) -> Result<()> {
    if let Some(parent) = output.parent() {
        std::fs::create_dir_all(parent).map_err(io_op("create archive directory", parent))?;
    }

    let file = File::create(output).map_err(io_op("create archive", output))?;
    let mut builder = tar::Builder::new(GzEncoder::new(file, compression.level()));
    builder.mode(tar::HeaderMode::Deterministic);

    for (name, source) in files {
        builder
            .append_path_with_name(source, name)
            .map_err(io_op("append to archive", source))?;
    }

    let encoder = builder
        .into_inner()
        .map_err(io_op("finish archive", output))?;
    encoder.finish().map_err(io_op("finish archive", output))?;
    Ok(())
}

/// Locates the collection root inside an unpacked archive: the directory itself, or
/// its single top-level subdirectory when the archive was packed with a prefix.
pub fn find_manifest_root(dir: &Path) -> Option<PathBuf> {
    if dir.join(MANIFEST_FILE).is_file() {
        return Some(dir.to_path_buf());
    }

    let mut candidates = std::fs::read_dir(dir)
        .ok()?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| path.is_dir() && path.join(MANIFEST_FILE).is_file());
    let first = candidates.next()?;
    match candidates.next() {
        Some(_) => None,
        None => Some(first),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_create_and_extract() {
        let temp_dir = TempDir::new().unwrap();
        let src = temp_dir.path().join("src");
        tokio::fs::create_dir_all(src.join("skills")).await.unwrap();
        tokio::fs::write(src.join("collection.yaml"), "name: x\n").await.unwrap();
        tokio::fs::write(src.join("skills/a.md"), "# A\n").await.unwrap();

        let archive = temp_dir.path().join("out/x-1.0.0.tar.gz");
        create(
            &archive,
            vec![
                ("collection.yaml".to_string(), src.join("collection.yaml")),
                ("skills/a.md".to_string(), src.join("skills/a.md")),
            ],
            Compression::Fast,
        )
        .await
        .unwrap();

        let dest = temp_dir.path().join("dest");
        tokio::fs::create_dir_all(&dest).await.unwrap();
        extract(&archive, &dest).await.unwrap();

        assert_eq!(
            tokio::fs::read_to_string(dest.join("skills/a.md")).await.unwrap(),
            "# A\n"
        );
        assert_eq!(find_manifest_root(&dest), Some(dest.clone()));
    }

    #[tokio::test]
    async fn test_traversal_entry_rejected() {
        let temp_dir = TempDir::new().unwrap();
        let archive = temp_dir.path().join("evil.tar.gz");

        {
            let file = File::create(&archive).unwrap();
            let mut builder = tar::Builder::new(GzEncoder::new(file, flate2::Compression::fast()));
            let data = b"owned";
            let mut header = tar::Header::new_gnu();
            header.set_size(data.len() as u64);
            header.set_mode(0o644);
            // set_path refuses "..", so write the raw name bytes
            let name = b"../escape.txt";
            header.as_old_mut().name[..name.len()].copy_from_slice(name);
            header.set_cksum();
            builder.append(&header, &data[..]).unwrap();
            builder.into_inner().unwrap().finish().unwrap().flush().unwrap();
        }

        let dest = temp_dir.path().join("dest");
        tokio::fs::create_dir_all(&dest).await.unwrap();
        let result = extract(&archive, &dest).await;
        assert!(matches!(result, Err(StoreError::InvalidPath(_))));
        assert!(!temp_dir.path().join("escape.txt").exists());
    }

    #[test]
    fn test_find_manifest_root_with_prefix() {
        let temp_dir = TempDir::new().unwrap();
        let nested = temp_dir.path().join("devops-1.0.0");
        std::fs::create_dir_all(&nested).unwrap();
        std::fs::write(nested.join(MANIFEST_FILE), "name: x\n").unwrap();
        assert_eq!(find_manifest_root(temp_dir.path()), Some(nested));
    }

    #[test]
    fn test_compression_parse() {
        assert_eq!("FAST".parse::<Compression>().unwrap(), Compression::Fast);
        assert!("ultra".parse::<Compression>().is_err());
        assert!(is_archive("a.tgz"));
        assert!(!is_archive("a.zip"));
    }
}
