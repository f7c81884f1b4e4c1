use std::path::{Component, Path, PathBuf};

use walkdir::WalkDir;

use crate::error::{io_op, Result, StoreError};
use crate::manifest::relative_to_slash;

/// Recursively copies `src` into `dst`, skipping any entry whose `/`-separated
/// relative path starts with one of `skip_prefixes`. Symlinks are not followed and
/// not copied.
pub async fn copy_tree(src: &Path, dst: &Path, skip_prefixes: &[&str]) -> Result<u64> {
    let src = src.to_path_buf();
    let dst = dst.to_path_buf();
    let skip: Vec<String> = skip_prefixes.iter().map(|s| s.to_string()).collect();
    tokio::task::spawn_blocking(move || copy_tree_blocking(&src, &dst, &skip))
        .await
        .map_err(|e| StoreError::IoError(std::io::Error::other(e)))?
}

fn copy_tree_blocking(src: &Path, dst: &Path, skip_prefixes: &[String]) -> Result<u64> {
    std::fs::create_dir_all(dst).map_err(io_op("create directory", dst))?;

    let mut copied = 0u64;
    let mut walker = WalkDir::new(src).follow_links(false).min_depth(1).into_iter();
    while let Some(entry) = walker.next() {
        let entry = entry.map_err(|e| StoreError::IoOperation {
            operation: "walk directory".to_string(),
            path: src.to_path_buf(),
            source: e.into(),
        })?;
        let Ok(relative) = entry.path().strip_prefix(src) else {
            continue;
        };

        let slash = relative_to_slash(relative);
        let as_dir = format!("{}/", slash);
        if skip_prefixes
            .iter()
            .any(|prefix| slash.starts_with(prefix.as_str()) || as_dir == *prefix)
        {
            if entry.file_type().is_dir() {
                walker.skip_current_dir();
            }
            continue;
        }

        let target = dst.join(relative);
        if entry.file_type().is_dir() {
            std::fs::create_dir_all(&target).map_err(io_op("create directory", &target))?;
        } else if entry.file_type().is_file() {
            if let Some(parent) = target.parent() {
                std::fs::create_dir_all(parent).map_err(io_op("create directory", parent))?;
            }
            copied += std::fs::copy(entry.path(), &target).map_err(io_op("copy file", entry.path()))?;
        }
    }
    Ok(copied)
}

/// Removes `dir` and then each empty parent up to, but excluding, `stop_at`.
pub async fn remove_empty_parents(dir: &Path, stop_at: &Path) {
    let mut current = Some(dir.to_path_buf());
    while let Some(path) = current {
        if path == stop_at || !path.starts_with(stop_at) {
            break;
        }
        if tokio::fs::remove_dir(&path).await.is_err() {
            break;
        }
        current = path.parent().map(Path::to_path_buf);
    }
}

/// `author/name` split into two safe path components.
pub fn id_components(id: &str) -> Result<(&str, &str)> {
    let (author, name) = id
        .split_once('/')
        .ok_or_else(|| StoreError::InvalidPath(format!("'{}' is not an author/name id", id)))?;
    for part in [author, name] {
        let mut components = Path::new(part).components();
        let single_normal = matches!(components.next(), Some(Component::Normal(_)))
            && components.next().is_none();
        if part.is_empty() || !single_normal || part.contains('\\') {
            return Err(StoreError::InvalidPath(format!(
                "'{}' is not a valid collection id",
                id
            )));
        }
    }
    Ok((author, name))
}

/// UTC timestamp usable in file names, e.g. `20250101T120000Z`.
pub fn timestamp_suffix() -> String {
    chrono::Utc::now().format("%Y%m%dT%H%M%S%.3fZ").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_id_components() {
        assert_eq!(id_components("alice/devops").unwrap(), ("alice", "devops"));
        assert!(id_components("devops").is_err());
        assert!(id_components("../devops").is_err());
        assert!(id_components("alice/..").is_err());
        assert!(id_components("alice/a/b").is_err());
        assert!(id_components("/devops").is_err());
    }

    #[tokio::test]
    async fn test_copy_tree_skips_prefixes() {
        let temp_dir = TempDir::new().unwrap();
        let src = temp_dir.path().join("src");
        tokio::fs::create_dir_all(src.join(".git/objects")).await.unwrap();
        tokio::fs::create_dir_all(src.join("skills")).await.unwrap();
        tokio::fs::write(src.join(".git/objects/x"), "blob").await.unwrap();
        tokio::fs::write(src.join("skills/a.md"), "# A").await.unwrap();
        tokio::fs::write(src.join("collection.yaml"), "name: x").await.unwrap();

        let dst = temp_dir.path().join("dst");
        copy_tree(&src, &dst, &[".git/"]).await.unwrap();

        assert!(dst.join("skills/a.md").is_file());
        assert!(dst.join("collection.yaml").is_file());
        assert!(!dst.join(".git").exists());
    }

    #[tokio::test]
    async fn test_remove_empty_parents() {
        let temp_dir = TempDir::new().unwrap();
        let leaf = temp_dir.path().join("alice/devops");
        tokio::fs::create_dir_all(&leaf).await.unwrap();

        remove_empty_parents(&leaf, temp_dir.path()).await;
        assert!(!temp_dir.path().join("alice").exists());
        assert!(temp_dir.path().exists());
    }
}
