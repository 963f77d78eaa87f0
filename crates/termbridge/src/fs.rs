//! File-system primitive layer driven by the transfer manager and the sftp tools.

use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::io::{AsyncRead, AsyncWrite};

use crate::types::{BridgeError, BridgeResult, DirEntry, FileStat};

pub type BoxedReader = Box<dyn AsyncRead + Send + Unpin>;
pub type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// Remote side of a transfer. Paths are `/`-separated and interpreted by the implementation.
#[async_trait]
pub trait RemoteFs: Send + Sync {
    async fn stat(&self, path: &str) -> BridgeResult<FileStat>;

    async fn read_dir(&self, path: &str) -> BridgeResult<Vec<DirEntry>>;

    async fn open_read(&self, path: &str) -> BridgeResult<BoxedReader>;

    /// Create or truncate `path`, creating missing parent directories.
    async fn open_write(&self, path: &str) -> BridgeResult<BoxedWriter>;

    async fn rename(&self, from: &str, to: &str) -> BridgeResult<()>;

    async fn remove(&self, path: &str) -> BridgeResult<()>;

    async fn create_dir(&self, path: &str) -> BridgeResult<()>;
}

/// A `RemoteFs` backed by a directory on this machine.
///
/// Every path is resolved relative to `root`; `..` components that would climb
/// above the root are rejected.
#[derive(Debug, Clone)]
pub struct LocalFs {
    root: PathBuf,
}

impl LocalFs {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Map a remote path onto the root directory.
    pub fn resolve(&self, path: &str) -> BridgeResult<PathBuf> {
        let mut resolved = self.root.clone();
        let mut depth = 0usize;
        for component in Path::new(path).components() {
            match component {
                Component::Normal(part) => {
                    resolved.push(part);
                    depth += 1;
                }
                Component::ParentDir => {
                    if depth == 0 {
                        return Err(BridgeError::PathEscape(path.to_string()));
                    }
                    resolved.pop();
                    depth -= 1;
                }
                Component::CurDir | Component::RootDir | Component::Prefix(_) => {}
            }
        }
        Ok(resolved)
    }
}

fn not_found_as_missing(path: &str, e: std::io::Error) -> BridgeError {
    if e.kind() == std::io::ErrorKind::NotFound {
        BridgeError::SourceMissing(path.to_string())
    } else {
        BridgeError::Io(e)
    }
}

fn modified_time(meta: &std::fs::Metadata) -> Option<DateTime<Utc>> {
    meta.modified().ok().map(DateTime::<Utc>::from)
}

#[async_trait]
impl RemoteFs for LocalFs {
    async fn stat(&self, path: &str) -> BridgeResult<FileStat> {
        let resolved = self.resolve(path)?;
        let meta = tokio::fs::metadata(&resolved)
            .await
            .map_err(|e| not_found_as_missing(path, e))?;
        Ok(FileStat {
            path: path.to_string(),
            size: meta.len(),
            is_dir: meta.is_dir(),
            modified: modified_time(&meta),
        })
    }

    async fn read_dir(&self, path: &str) -> BridgeResult<Vec<DirEntry>> {
        let resolved = self.resolve(path)?;
        let mut dir = tokio::fs::read_dir(&resolved)
            .await
            .map_err(|e| not_found_as_missing(path, e))?;

        let mut entries = Vec::new();
        while let Some(entry) = dir.next_entry().await? {
            let meta = entry.metadata().await?;
            entries.push(DirEntry {
                name: entry.file_name().to_string_lossy().into_owned(),
                size: meta.len(),
                is_dir: meta.is_dir(),
            });
        }
        entries.sort_by(|a, b| b.is_dir.cmp(&a.is_dir).then_with(|| a.name.cmp(&b.name)));
        Ok(entries)
    }

    async fn open_read(&self, path: &str) -> BridgeResult<BoxedReader> {
        let resolved = self.resolve(path)?;
        let file = tokio::fs::File::open(&resolved)
            .await
            .map_err(|e| not_found_as_missing(path, e))?;
        Ok(Box::new(file))
    }

    async fn open_write(&self, path: &str) -> BridgeResult<BoxedWriter> {
        let resolved = self.resolve(path)?;
        if let Some(parent) = resolved.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let file = tokio::fs::File::create(&resolved).await?;
        Ok(Box::new(file))
    }

    async fn rename(&self, from: &str, to: &str) -> BridgeResult<()> {
        let src = self.resolve(from)?;
        let dst = self.resolve(to)?;
        tokio::fs::rename(&src, &dst)
            .await
            .map_err(|e| not_found_as_missing(from, e))
    }

    async fn remove(&self, path: &str) -> BridgeResult<()> {
        let resolved = self.resolve(path)?;
        let meta = tokio::fs::metadata(&resolved)
            .await
            .map_err(|e| not_found_as_missing(path, e))?;
        if meta.is_dir() {
            tokio::fs::remove_dir(&resolved).await?;
        } else {
            tokio::fs::remove_file(&resolved).await?;
        }
        Ok(())
    }

    async fn create_dir(&self, path: &str) -> BridgeResult<()> {
        let resolved = self.resolve(path)?;
        tokio::fs::create_dir_all(&resolved).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    #[test]
    fn test_resolve_stays_under_root() {
        let fs = LocalFs::new("/srv/data");
        assert_eq!(fs.resolve("/a/b.txt").unwrap(), PathBuf::from("/srv/data/a/b.txt"));
        assert_eq!(fs.resolve("a/../c").unwrap(), PathBuf::from("/srv/data/c"));
        assert_eq!(fs.resolve("/").unwrap(), PathBuf::from("/srv/data"));
    }

    #[test]
    fn test_resolve_rejects_escape() {
        let fs = LocalFs::new("/srv/data");
        assert!(matches!(fs.resolve("../etc/passwd"), Err(BridgeError::PathEscape(_))));
        assert!(matches!(fs.resolve("a/../../x"), Err(BridgeError::PathEscape(_))));
    }

    #[tokio::test]
    async fn test_write_read_list_remove() {
        let dir = tempfile::tempdir().unwrap();
        let fs = LocalFs::new(dir.path());

        let mut w = fs.open_write("nested/hello.txt").await.unwrap();
        w.write_all(b"hello").await.unwrap();
        w.shutdown().await.unwrap();
        drop(w);

        let stat = fs.stat("nested/hello.txt").await.unwrap();
        assert_eq!(stat.size, 5);
        assert!(!stat.is_dir);

        let mut r = fs.open_read("nested/hello.txt").await.unwrap();
        let mut buf = String::new();
        r.read_to_string(&mut buf).await.unwrap();
        assert_eq!(buf, "hello");

        fs.create_dir("nested/sub").await.unwrap();
        let entries = fs.read_dir("nested").await.unwrap();
        assert_eq!(entries.len(), 2);
        assert!(entries[0].is_dir, "directories sort first");

        fs.rename("nested/hello.txt", "nested/bye.txt").await.unwrap();
        fs.remove("nested/bye.txt").await.unwrap();
        assert!(matches!(
            fs.stat("nested/bye.txt").await,
            Err(BridgeError::SourceMissing(_))
        ));
    }
}
