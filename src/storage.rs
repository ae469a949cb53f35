//! Pod storage: read, write, and walk files addressed by pod path.
//!
//! Every file in a pod is addressed by an absolute *pod path* such as
//! `/content/pages/about.yaml`. Paths are validated before they reach a
//! backend: `..` segments are rejected outright, `.` and empty segments are
//! collapsed, and the result always starts with `/`.
//!
//! ```text
//! "content//pages/./a.yaml"  →  "/content/pages/a.yaml"
//! "/content/../podspec.yaml" →  InvalidPath
//! ```
//!
//! Two backends implement [`Storage`]:
//!
//! | Backend | `is_remote` | Notes |
//! |---------|-------------|-------|
//! | [`LocalStorage`] | `false` | Files under a root directory; the default |
//! | [`S3Storage`] | `true` | Objects under an optional key prefix in a bucket |
//!
//! Callers that need filesystem semantics (atomic rename, directory
//! listings that include empty directories) check [`Storage::is_remote`].

use s3::bucket::Bucket;
use s3::creds::Credentials;
use s3::region::Region;
use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Invalid pod path: {0}")]
    InvalidPath(String),
    #[error("File not found: {0}")]
    NotFound(String),
    #[error("File is not valid UTF-8: {0}")]
    Encoding(String),
    #[error("Remote storage error: {0}")]
    Remote(String),
}

/// One directory level produced by [`Storage::walk`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WalkEntry {
    /// Pod path of the directory, always ending without a trailing slash
    /// (the root is `/`).
    pub dir: String,
    /// Names of immediate subdirectories, sorted.
    pub subdirs: Vec<String>,
    /// Names of immediate files, sorted.
    pub files: Vec<String>,
}

/// Backend-agnostic file access for a pod.
pub trait Storage: Send + Sync {
    /// Remote backends cannot offer byte-for-byte local features.
    fn is_remote(&self) -> bool {
        false
    }

    fn read(&self, path: &str) -> Result<Vec<u8>, StorageError>;

    fn write(&self, path: &str, bytes: &[u8]) -> Result<(), StorageError>;

    fn exists(&self, path: &str) -> bool;

    fn delete(&self, path: &str) -> Result<(), StorageError>;

    /// List file pod paths under `dir`, sorted. Non-recursive listings only
    /// include direct children.
    fn list(&self, dir: &str, recursive: bool) -> Result<Vec<String>, StorageError>;

    /// Walk `dir` top-down, one entry per directory.
    fn walk(&self, dir: &str) -> Result<Vec<WalkEntry>, StorageError>;

    fn read_to_string(&self, path: &str) -> Result<String, StorageError> {
        let bytes = self.read(path)?;
        String::from_utf8(bytes).map_err(|_| StorageError::Encoding(path.to_string()))
    }

    fn copy(&self, from: &str, to: &str) -> Result<(), StorageError> {
        let bytes = self.read(from)?;
        self.write(to, &bytes)
    }

    fn rename(&self, from: &str, to: &str) -> Result<(), StorageError> {
        self.copy(from, to)?;
        self.delete(from)
    }

    /// Whether `path` names a directory that holds at least one file.
    fn is_dir(&self, path: &str) -> bool {
        self.list(path, false)
            .map(|files| !files.is_empty())
            .unwrap_or(false)
    }
}

/// Validate and normalize a pod path.
pub fn normalize_path(path: &str) -> Result<String, StorageError> {
    let mut segments = Vec::new();
    for segment in path.split(['/', '\\']) {
        match segment {
            "" | "." => {}
            ".." => return Err(StorageError::InvalidPath(path.to_string())),
            s => segments.push(s),
        }
    }
    Ok(format!("/{}", segments.join("/")))
}

/// Join a directory pod path and a child name.
pub fn join(dir: &str, name: &str) -> String {
    format!("{}/{}", dir.trim_end_matches('/'), name.trim_start_matches('/'))
}

/// Parent directory of a pod path (`/a/b.yaml` → `/a`).
pub fn dirname(path: &str) -> String {
    match path.trim_end_matches('/').rsplit_once('/') {
        Some(("", _)) | None => "/".to_string(),
        Some((parent, _)) => parent.to_string(),
    }
}

/// Final component of a pod path (`/a/b.yaml` → `b.yaml`).
pub fn basename(path: &str) -> &str {
    path.trim_end_matches('/')
        .rsplit('/')
        .next()
        .unwrap_or_default()
}

// ============================================================================
// Local filesystem
// ============================================================================

/// Files under a root directory on the local filesystem.
#[derive(Debug, Clone)]
pub struct LocalStorage {
    root: PathBuf,
}

impl LocalStorage {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn resolve(&self, path: &str) -> Result<PathBuf, StorageError> {
        let normalized = normalize_path(path)?;
        Ok(self.root.join(normalized.trim_start_matches('/')))
    }

    fn to_pod_path(&self, full: &Path) -> Option<String> {
        let rel = full.strip_prefix(&self.root).ok()?;
        let joined: Vec<String> = rel
            .components()
            .map(|c| c.as_os_str().to_string_lossy().into_owned())
            .collect();
        Some(format!("/{}", joined.join("/")))
    }
}

impl Storage for LocalStorage {
    fn read(&self, path: &str) -> Result<Vec<u8>, StorageError> {
        let full = self.resolve(path)?;
        if !full.is_file() {
            return Err(StorageError::NotFound(path.to_string()));
        }
        Ok(fs::read(full)?)
    }

    fn write(&self, path: &str, bytes: &[u8]) -> Result<(), StorageError> {
        let full = self.resolve(path)?;
        if let Some(parent) = full.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(full, bytes)?;
        Ok(())
    }

    fn exists(&self, path: &str) -> bool {
        self.resolve(path).map(|p| p.exists()).unwrap_or(false)
    }

    fn delete(&self, path: &str) -> Result<(), StorageError> {
        let full = self.resolve(path)?;
        if !full.exists() {
            return Err(StorageError::NotFound(path.to_string()));
        }
        if full.is_dir() {
            fs::remove_dir_all(full)?;
        } else {
            fs::remove_file(full)?;
        }
        Ok(())
    }

    fn list(&self, dir: &str, recursive: bool) -> Result<Vec<String>, StorageError> {
        let full = self.resolve(dir)?;
        if !full.is_dir() {
            return Ok(Vec::new());
        }
        let max_depth = if recursive { usize::MAX } else { 1 };
        let mut paths = Vec::new();
        for entry in walkdir::WalkDir::new(&full).min_depth(1).max_depth(max_depth) {
            let entry = entry.map_err(|e| StorageError::Io(e.into()))?;
            if entry.file_type().is_file()
                && let Some(pod_path) = self.to_pod_path(entry.path())
            {
                paths.push(pod_path);
            }
        }
        paths.sort();
        Ok(paths)
    }

    fn walk(&self, dir: &str) -> Result<Vec<WalkEntry>, StorageError> {
        let start = normalize_path(dir)?;
        let mut entries = Vec::new();
        let mut pending = vec![start];
        while let Some(current) = pending.pop() {
            let full = self.resolve(&current)?;
            if !full.is_dir() {
                continue;
            }
            let mut subdirs = Vec::new();
            let mut files = Vec::new();
            for child in fs::read_dir(&full)? {
                let child = child?;
                let name = child.file_name().to_string_lossy().into_owned();
                if child.file_type()?.is_dir() {
                    subdirs.push(name);
                } else {
                    files.push(name);
                }
            }
            subdirs.sort();
            files.sort();
            // Push in reverse so the walk stays in sorted, top-down order.
            for sub in subdirs.iter().rev() {
                pending.push(join(&current, sub));
            }
            entries.push(WalkEntry {
                dir: current,
                subdirs,
                files,
            });
        }
        Ok(entries)
    }

    fn rename(&self, from: &str, to: &str) -> Result<(), StorageError> {
        let src = self.resolve(from)?;
        let dst = self.resolve(to)?;
        if let Some(parent) = dst.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::rename(src, dst)?;
        Ok(())
    }

    fn is_dir(&self, path: &str) -> bool {
        self.resolve(path).map(|p| p.is_dir()).unwrap_or(false)
    }
}

// ============================================================================
// S3-compatible object store
// ============================================================================

/// Connection settings for an S3-compatible bucket.
#[derive(Debug, Clone, Default, serde::Deserialize)]
#[serde(default)]
pub struct S3Config {
    pub bucket: String,
    pub prefix: String,
    pub region: String,
    pub endpoint: String,
}

/// Objects in an S3-compatible bucket, keyed by `<prefix><pod path>`.
pub struct S3Storage {
    bucket: Box<Bucket>,
    prefix: String,
}

impl S3Storage {
    /// Connect using credentials from `AWS_ACCESS_KEY_ID` and
    /// `AWS_SECRET_ACCESS_KEY`.
    pub fn connect(config: &S3Config) -> Result<Self, StorageError> {
        let key = std::env::var("AWS_ACCESS_KEY_ID").ok();
        let secret = std::env::var("AWS_SECRET_ACCESS_KEY").ok();
        let creds = Credentials::new(key.as_deref(), secret.as_deref(), None, None, None)
            .map_err(|e| StorageError::Remote(e.to_string()))?;
        let region = if config.endpoint.is_empty() {
            config
                .region
                .parse::<Region>()
                .map_err(|e| StorageError::Remote(e.to_string()))?
        } else {
            Region::Custom {
                region: config.region.clone(),
                endpoint: config.endpoint.clone(),
            }
        };
        let bucket: Box<Bucket> = Bucket::new(&config.bucket, region, creds)
            .map_err(|e| StorageError::Remote(e.to_string()))?
            .into();
        Ok(Self {
            bucket,
            prefix: config.prefix.trim_matches('/').to_string(),
        })
    }

    fn key(&self, path: &str) -> Result<String, StorageError> {
        let normalized = normalize_path(path)?;
        if self.prefix.is_empty() {
            Ok(normalized)
        } else {
            Ok(format!("/{}{}", self.prefix, normalized))
        }
    }

    fn to_pod_path(&self, key: &str) -> String {
        let key = format!("/{}", key.trim_start_matches('/'));
        if self.prefix.is_empty() {
            return key;
        }
        let prefix = format!("/{}", self.prefix);
        key.strip_prefix(&prefix).unwrap_or(&key).to_string()
    }

    /// Upload `bytes` with an explicit `Content-Type`.
    pub fn write_typed(&self, path: &str, bytes: &[u8], content_type: &str) -> Result<(), StorageError> {
        let response = self
            .bucket
            .put_object_with_content_type(self.key(path)?, bytes, content_type)
            .map_err(|e| StorageError::Remote(e.to_string()))?;
        match response.status_code() {
            200..=299 => Ok(()),
            code => Err(StorageError::Remote(format!("PUT {path} returned {code}"))),
        }
    }

    pub fn bucket_name(&self) -> String {
        self.bucket.name()
    }

    fn list_keys(&self, dir: &str) -> Result<Vec<String>, StorageError> {
        let key = self.key(dir)?;
        let prefix = format!("{}/", key.trim_start_matches('/').trim_end_matches('/'));
        let prefix = if prefix == "/" { String::new() } else { prefix };
        let results = self
            .bucket
            .list(prefix, None)
            .map_err(|e| StorageError::Remote(e.to_string()))?;
        let mut paths: Vec<String> = results
            .iter()
            .flat_map(|page| page.contents.iter())
            .map(|object| self.to_pod_path(&object.key))
            .collect();
        paths.sort();
        Ok(paths)
    }
}

impl Storage for S3Storage {
    fn is_remote(&self) -> bool {
        true
    }

    fn read(&self, path: &str) -> Result<Vec<u8>, StorageError> {
        let response = self
            .bucket
            .get_object(self.key(path)?)
            .map_err(|e| StorageError::Remote(e.to_string()))?;
        match response.status_code() {
            200 => Ok(response.bytes().to_vec()),
            404 => Err(StorageError::NotFound(path.to_string())),
            code => Err(StorageError::Remote(format!("GET {path} returned {code}"))),
        }
    }

    fn write(&self, path: &str, bytes: &[u8]) -> Result<(), StorageError> {
        let response = self
            .bucket
            .put_object(self.key(path)?, bytes)
            .map_err(|e| StorageError::Remote(e.to_string()))?;
        match response.status_code() {
            200..=299 => Ok(()),
            code => Err(StorageError::Remote(format!("PUT {path} returned {code}"))),
        }
    }

    fn exists(&self, path: &str) -> bool {
        match self.key(path) {
            Ok(key) => self
                .bucket
                .get_object(key)
                .map(|r| r.status_code() == 200)
                .unwrap_or(false),
            Err(_) => false,
        }
    }

    fn delete(&self, path: &str) -> Result<(), StorageError> {
        let response = self
            .bucket
            .delete_object(self.key(path)?)
            .map_err(|e| StorageError::Remote(e.to_string()))?;
        match response.status_code() {
            200..=299 => Ok(()),
            code => Err(StorageError::Remote(format!("DELETE {path} returned {code}"))),
        }
    }

    fn list(&self, dir: &str, recursive: bool) -> Result<Vec<String>, StorageError> {
        let dir = normalize_path(dir)?;
        let paths = self.list_keys(&dir)?;
        if recursive {
            return Ok(paths);
        }
        Ok(paths
            .into_iter()
            .filter(|p| dirname(p) == dir)
            .collect())
    }

    fn walk(&self, dir: &str) -> Result<Vec<WalkEntry>, StorageError> {
        let start = normalize_path(dir)?;
        walk_from_paths(&start, &self.list_keys(&start)?)
    }
}

/// Synthesize a top-down walk from a flat, recursive file listing.
fn walk_from_paths(start: &str, paths: &[String]) -> Result<Vec<WalkEntry>, StorageError> {
    let mut dirs: BTreeSet<String> = BTreeSet::new();
    dirs.insert(start.to_string());
    for path in paths {
        let mut current = dirname(path);
        while current.len() > start.len() && dirs.insert(current.clone()) {
            current = dirname(&current);
        }
    }
    let entries = dirs
        .iter()
        .map(|dir| WalkEntry {
            dir: dir.clone(),
            subdirs: dirs
                .iter()
                .filter(|d| *d != dir && dirname(d) == *dir)
                .map(|d| basename(d).to_string())
                .collect(),
            files: paths
                .iter()
                .filter(|p| dirname(p) == *dir)
                .map(|p| basename(p).to_string())
                .collect(),
        })
        .collect();
    Ok(entries)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn normalize_collapses_segments() {
        assert_eq!(normalize_path("content//pages/./a.yaml").unwrap(), "/content/pages/a.yaml");
        assert_eq!(normalize_path("/").unwrap(), "/");
    }

    #[test]
    fn normalize_rejects_parent_segments() {
        assert!(matches!(
            normalize_path("/content/../../etc/passwd"),
            Err(StorageError::InvalidPath(_))
        ));
    }

    #[test]
    fn dirname_and_basename() {
        assert_eq!(dirname("/content/pages/a.yaml"), "/content/pages");
        assert_eq!(dirname("/podspec.yaml"), "/");
        assert_eq!(basename("/content/pages/a.yaml"), "a.yaml");
        assert_eq!(basename("/content/pages/"), "pages");
    }

    #[test]
    fn local_write_read_delete() {
        let tmp = TempDir::new().unwrap();
        let storage = LocalStorage::new(tmp.path());

        storage.write("/a/b/c.txt", b"hello").unwrap();
        assert!(storage.exists("/a/b/c.txt"));
        assert_eq!(storage.read_to_string("/a/b/c.txt").unwrap(), "hello");

        storage.delete("/a/b/c.txt").unwrap();
        assert!(!storage.exists("/a/b/c.txt"));
        assert!(matches!(storage.read("/a/b/c.txt"), Err(StorageError::NotFound(_))));
    }

    #[test]
    fn local_list_recursive_and_flat() {
        let tmp = TempDir::new().unwrap();
        let storage = LocalStorage::new(tmp.path());
        storage.write("/static/a.css", b"").unwrap();
        storage.write("/static/img/b.png", b"").unwrap();

        assert_eq!(
            storage.list("/static", true).unwrap(),
            vec!["/static/a.css", "/static/img/b.png"]
        );
        assert_eq!(storage.list("/static", false).unwrap(), vec!["/static/a.css"]);
        assert!(storage.list("/missing", true).unwrap().is_empty());
    }

    #[test]
    fn local_walk_is_top_down_and_sorted() {
        let tmp = TempDir::new().unwrap();
        let storage = LocalStorage::new(tmp.path());
        storage.write("/content/pages/a.yaml", b"").unwrap();
        storage.write("/content/posts/b.yaml", b"").unwrap();
        storage.write("/content/posts/old/c.yaml", b"").unwrap();

        let dirs: Vec<String> = storage
            .walk("/content")
            .unwrap()
            .into_iter()
            .map(|e| e.dir)
            .collect();
        assert_eq!(
            dirs,
            vec!["/content", "/content/pages", "/content/posts", "/content/posts/old"]
        );
    }

    #[test]
    fn local_rename_moves_file() {
        let tmp = TempDir::new().unwrap();
        let storage = LocalStorage::new(tmp.path());
        storage.write("/a.txt", b"x").unwrap();
        storage.rename("/a.txt", "/sub/b.txt").unwrap();
        assert!(!storage.exists("/a.txt"));
        assert_eq!(storage.read("/sub/b.txt").unwrap(), b"x");
    }

    #[test]
    fn walk_from_flat_listing() {
        let paths = vec![
            "/site/index.html".to_string(),
            "/site/de/about/index.html".to_string(),
        ];
        let entries = walk_from_paths("/site", &paths).unwrap();
        let root = &entries[0];
        assert_eq!(root.dir, "/site");
        assert_eq!(root.subdirs, vec!["de"]);
        assert_eq!(root.files, vec!["index.html"]);
        assert!(entries.iter().any(|e| e.dir == "/site/de/about"));
    }
}
