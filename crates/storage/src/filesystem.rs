//! Filesystem access used by dataset scans and writes.

use std::fmt::Debug;
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use kflow_common::{KflowError, Result};
use url::Url;

/// Minimal file operations needed by the dataset layer.
pub trait FileSystem: Send + Sync + Debug {
    fn exists(&self, path: &Path) -> bool;

    fn is_dir(&self, path: &Path) -> bool;

    fn create_dir_all(&self, path: &Path) -> Result<()>;

    /// Every regular file below `root`, sorted by path.
    fn list_files_recursive(&self, root: &Path) -> Result<Vec<PathBuf>>;

    fn open(&self, path: &Path) -> Result<File>;

    fn create(&self, path: &Path) -> Result<File>;

    fn rename(&self, from: &Path, to: &Path) -> Result<()>;

    fn remove_file(&self, path: &Path) -> Result<()>;

    fn remove_dir_all(&self, path: &Path) -> Result<()>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct LocalFileSystem;

impl FileSystem for LocalFileSystem {
    fn exists(&self, path: &Path) -> bool {
        path.exists()
    }

    fn is_dir(&self, path: &Path) -> bool {
        path.is_dir()
    }

    fn create_dir_all(&self, path: &Path) -> Result<()> {
        fs::create_dir_all(path)?;
        Ok(())
    }

    fn list_files_recursive(&self, root: &Path) -> Result<Vec<PathBuf>> {
        let mut out = Vec::new();
        let mut pending = vec![root.to_path_buf()];
        while let Some(dir) = pending.pop() {
            for entry in fs::read_dir(&dir)? {
                let entry = entry?;
                let file_type = entry.file_type()?;
                if file_type.is_dir() {
                    pending.push(entry.path());
                } else if file_type.is_file() {
                    out.push(entry.path());
                }
            }
        }
        out.sort();
        Ok(out)
    }

    fn open(&self, path: &Path) -> Result<File> {
        Ok(File::open(path)?)
    }

    fn create(&self, path: &Path) -> Result<File> {
        Ok(File::create(path)?)
    }

    fn rename(&self, from: &Path, to: &Path) -> Result<()> {
        fs::rename(from, to)?;
        Ok(())
    }

    fn remove_file(&self, path: &Path) -> Result<()> {
        fs::remove_file(path)?;
        Ok(())
    }

    fn remove_dir_all(&self, path: &Path) -> Result<()> {
        fs::remove_dir_all(path)?;
        Ok(())
    }
}

/// Turn a plain path or `file://` URI into a local path.
pub fn resolve_uri(uri: &str) -> Result<PathBuf> {
    if uri.is_empty() {
        return Err(KflowError::InvalidConfig(
            "dataset location must not be empty".to_string(),
        ));
    }
    if !uri.contains("://") {
        return Ok(PathBuf::from(uri));
    }
    let url = Url::parse(uri)
        .map_err(|e| KflowError::InvalidConfig(format!("invalid dataset uri {uri}: {e}")))?;
    match url.scheme() {
        "file" => url.to_file_path().map_err(|_| {
            KflowError::InvalidConfig(format!("file uri {uri} has no local path"))
        }),
        other => Err(KflowError::Unsupported(format!(
            "filesystem scheme {other} is not supported (uri {uri})"
        ))),
    }
}

/// Hidden sibling of `path` used for staging and backups.
pub fn temp_sibling_path(path: &Path, label: &str) -> PathBuf {
    let parent = path
        .parent()
        .map(std::borrow::ToOwned::to_owned)
        .unwrap_or_else(|| PathBuf::from("."));
    let stem = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("target");
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| d.as_nanos());
    parent.join(format!(".kflow_{label}_{stem}_{nanos}.tmp"))
}

/// Move `staged` over `target`, restoring the previous target if the swap fails.
pub fn replace_file_atomically(fs: &dyn FileSystem, staged: &Path, target: &Path) -> Result<()> {
    if let Some(parent) = target.parent() {
        fs.create_dir_all(parent)?;
    }
    if !fs.exists(target) {
        return fs.rename(staged, target).map_err(|e| {
            KflowError::Execution(format!(
                "file commit failed: {} -> {} ({e})",
                staged.display(),
                target.display()
            ))
        });
    }

    let backup = temp_sibling_path(target, "backup");
    fs.rename(target, &backup).map_err(|e| {
        KflowError::Execution(format!(
            "file backup rename failed: {} -> {} ({e})",
            target.display(),
            backup.display()
        ))
    })?;

    match fs.rename(staged, target) {
        Ok(()) => {
            let _ = fs.remove_file(&backup);
            Ok(())
        }
        Err(e) => {
            let _ = fs.rename(&backup, target);
            Err(KflowError::Execution(format!(
                "file commit failed: {} -> {} ({e})",
                staged.display(),
                target.display()
            )))
        }
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    fn unique_dir(label: &str) -> PathBuf {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("clock")
            .as_nanos();
        std::env::temp_dir().join(format!("kflow_fs_{label}_{nanos}"))
    }

    #[test]
    fn resolves_paths_and_file_uris() {
        assert_eq!(
            resolve_uri("/tmp/data").expect("path"),
            PathBuf::from("/tmp/data")
        );
        assert_eq!(
            resolve_uri("file:///tmp/data").expect("uri"),
            PathBuf::from("/tmp/data")
        );
        assert!(matches!(
            resolve_uri("s3://bucket/key"),
            Err(KflowError::Unsupported(_))
        ));
        assert!(matches!(resolve_uri(""), Err(KflowError::InvalidConfig(_))));
    }

    #[test]
    fn lists_nested_files_sorted() {
        let fs = LocalFileSystem;
        let root = unique_dir("list");
        fs.create_dir_all(&root.join("b=2")).expect("mkdir");
        fs.create_dir_all(&root.join("a=1")).expect("mkdir");
        for p in ["b=2/x.parquet", "a=1/y.parquet", "top.txt"] {
            fs.create(&root.join(p)).expect("create");
        }
        let files = fs.list_files_recursive(&root).expect("list");
        let rel = files
            .iter()
            .map(|p| p.strip_prefix(&root).expect("prefix").to_path_buf())
            .collect::<Vec<_>>();
        assert_eq!(
            rel,
            vec![
                PathBuf::from("a=1/y.parquet"),
                PathBuf::from("b=2/x.parquet"),
                PathBuf::from("top.txt"),
            ]
        );
        fs.remove_dir_all(&root).expect("cleanup");
    }

    #[test]
    fn replace_overwrites_existing_target() {
        let fs = LocalFileSystem;
        let root = unique_dir("replace");
        fs.create_dir_all(&root).expect("mkdir");
        let target = root.join("part0.parquet");
        fs.create(&target)
            .expect("create")
            .write_all(b"old")
            .expect("write");
        let staged = temp_sibling_path(&target, "staged");
        fs.create(&staged)
            .expect("create")
            .write_all(b"new")
            .expect("write");
        replace_file_atomically(&fs, &staged, &target).expect("replace");
        assert_eq!(std::fs::read(&target).expect("read"), b"new");
        assert!(!staged.exists());
        assert_eq!(fs.list_files_recursive(&root).expect("list").len(), 1);
        fs.remove_dir_all(&root).expect("cleanup");
    }
}
