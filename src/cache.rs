//! Spill store for rendered output.
//!
//! A full build renders every route before anything is written or deployed.
//! Holding every body in memory is fine for small pods, but a large pod with
//! many locales can produce gigabytes of output. The render stage keeps
//! bodies inline until their running total passes
//! `render.spill_threshold_bytes`; after that each body is written here and
//! the [`RenderedDocument`](crate::render::RenderedDocument) keeps only the
//! file path.
//!
//! # Design
//!
//! The store is **content-addressed**: a body lives at `<dir>/<sha256>`, so
//! identical bodies (every locale's copy of an unchanged error page, say)
//! share one file, and a body that is already on disk from an earlier build
//! is not written again.
//!
//! ## Manifest
//!
//! `<dir>/.spill-manifest.json` maps serving paths to their keys for the
//! last build. [`SpillStore::prune`] removes files the previous manifest
//! referenced that the current build no longer does, so the directory does
//! not grow without bound across builds.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};
use thiserror::Error;

/// Name of the manifest file within the spill directory.
const MANIFEST_FILENAME: &str = ".spill-manifest.json";

/// Bump to discard manifests written by an incompatible version.
const MANIFEST_VERSION: u32 = 1;

#[derive(Error, Debug)]
pub enum CacheError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
    #[error("Manifest error: {0}")]
    Json(#[from] serde_json::Error),
}

/// A spilled body.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SpillEntry {
    pub key: String,
    pub size: u64,
}

/// Serving path → spilled body, for one build.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpillManifest {
    pub version: u32,
    pub entries: BTreeMap<String, SpillEntry>,
}

impl SpillManifest {
    pub fn empty() -> Self {
        Self {
            version: MANIFEST_VERSION,
            entries: BTreeMap::new(),
        }
    }

    /// Load from the spill directory. Missing, corrupt, or outdated
    /// manifests load as empty.
    pub fn load(dir: &Path) -> Self {
        let Ok(content) = std::fs::read_to_string(dir.join(MANIFEST_FILENAME)) else {
            return Self::empty();
        };
        match serde_json::from_str::<Self>(&content) {
            Ok(manifest) if manifest.version == MANIFEST_VERSION => manifest,
            _ => Self::empty(),
        }
    }

    pub fn save(&self, dir: &Path) -> Result<(), CacheError> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(dir.join(MANIFEST_FILENAME), json)?;
        Ok(())
    }

    fn keys(&self) -> BTreeSet<&str> {
        self.entries.values().map(|e| e.key.as_str()).collect()
    }
}

/// SHA-256 of `bytes`, as lowercase hex.
pub fn hash_bytes(bytes: &[u8]) -> String {
    format!("{:x}", Sha256::digest(bytes))
}

/// Counts for one build.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CacheStats {
    pub inline: u32,
    pub spilled: u32,
    pub reused: u32,
}

impl CacheStats {
    pub fn total(&self) -> u32 {
        self.inline + self.spilled + self.reused
    }
}

impl fmt::Display for CacheStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.spilled == 0 && self.reused == 0 {
            return write!(f, "{} in memory", self.inline);
        }
        write!(
            f,
            "{} in memory, {} spilled, {} reused ({} total)",
            self.inline,
            self.spilled,
            self.reused,
            self.total()
        )
    }
}

/// On-disk overflow for rendered bodies, shared by the render workers.
#[derive(Debug)]
pub struct SpillStore {
    dir: PathBuf,
    threshold: u64,
    held: AtomicU64,
    previous: SpillManifest,
    current: Mutex<SpillManifest>,
    stats: Mutex<CacheStats>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl SpillStore {
    /// Open (creating) the spill directory. Bodies stay in memory until
    /// `threshold` bytes are held.
    pub fn open(dir: impl Into<PathBuf>, threshold: u64) -> Result<Self, CacheError> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;
        let previous = SpillManifest::load(&dir);
        Ok(Self {
            dir,
            threshold,
            held: AtomicU64::new(0),
            previous,
            current: Mutex::new(SpillManifest::empty()),
            stats: Mutex::new(CacheStats::default()),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Reserve room for a `len`-byte body in memory. Returns false when the
    /// body must be spilled instead.
    pub fn admit(&self, len: u64) -> bool {
        let admitted = self
            .held
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |held| {
                (held + len <= self.threshold).then_some(held + len)
            })
            .is_ok();
        if admitted {
            lock(&self.stats).inline += 1;
        }
        admitted
    }

    /// Write `bytes` for `serving_path`, returning the file holding them.
    pub fn put(&self, serving_path: &str, bytes: &[u8]) -> Result<PathBuf, CacheError> {
        let key = hash_bytes(bytes);
        let target = self.dir.join(&key);
        if target.exists() {
            lock(&self.stats).reused += 1;
        } else {
            let partial = self.dir.join(format!("{key}.partial"));
            std::fs::write(&partial, bytes)?;
            std::fs::rename(&partial, &target)?;
            lock(&self.stats).spilled += 1;
        }
        lock(&self.current).entries.insert(
            serving_path.to_string(),
            SpillEntry {
                key,
                size: bytes.len() as u64,
            },
        );
        Ok(target)
    }

    pub fn stats(&self) -> CacheStats {
        *lock(&self.stats)
    }

    /// Persist this build's manifest.
    pub fn save(&self) -> Result<(), CacheError> {
        lock(&self.current).save(&self.dir)
    }

    /// Delete bodies the previous build spilled that this build did not.
    pub fn prune(&self) -> Result<usize, CacheError> {
        let current = lock(&self.current);
        let keep = current.keys();
        let mut removed = 0;
        for key in self.previous.keys() {
            if keep.contains(key) {
                continue;
            }
            let path = self.dir.join(key);
            if path.exists() {
                std::fs::remove_file(path)?;
                removed += 1;
            }
        }
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn hash_bytes_is_sha256() {
        assert_eq!(
            hash_bytes(b"abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn admits_until_threshold() {
        let tmp = TempDir::new().unwrap();
        let store = SpillStore::open(tmp.path(), 10).unwrap();
        assert!(store.admit(6));
        assert!(!store.admit(6));
        assert!(store.admit(4));
        assert!(!store.admit(1));
        assert_eq!(store.stats().inline, 2);
    }

    #[test]
    fn identical_bodies_share_a_file() {
        let tmp = TempDir::new().unwrap();
        let store = SpillStore::open(tmp.path(), 0).unwrap();
        let a = store.put("/a/", b"same").unwrap();
        let b = store.put("/b/", b"same").unwrap();
        assert_eq!(a, b);
        assert_eq!(std::fs::read(&a).unwrap(), b"same");
        assert_eq!(
            store.stats(),
            CacheStats {
                inline: 0,
                spilled: 1,
                reused: 1
            }
        );
    }

    #[test]
    fn manifest_round_trip() {
        let tmp = TempDir::new().unwrap();
        let store = SpillStore::open(tmp.path(), 0).unwrap();
        store.put("/a/", b"body").unwrap();
        store.save().unwrap();

        let loaded = SpillManifest::load(tmp.path());
        assert_eq!(loaded.entries["/a/"].key, hash_bytes(b"body"));
        assert_eq!(loaded.entries["/a/"].size, 4);
    }

    #[test]
    fn corrupt_or_outdated_manifest_loads_empty() {
        let tmp = TempDir::new().unwrap();
        std::fs::write(tmp.path().join(MANIFEST_FILENAME), "{oops").unwrap();
        assert!(SpillManifest::load(tmp.path()).entries.is_empty());

        std::fs::write(
            tmp.path().join(MANIFEST_FILENAME),
            r#"{"version": 999, "entries": {"/a/": {"key": "k", "size": 1}}}"#,
        )
        .unwrap();
        assert!(SpillManifest::load(tmp.path()).entries.is_empty());
    }

    #[test]
    fn prune_removes_stale_bodies() {
        let tmp = TempDir::new().unwrap();
        let first = SpillStore::open(tmp.path(), 0).unwrap();
        let old = first.put("/old/", b"old").unwrap();
        let kept = first.put("/kept/", b"kept").unwrap();
        first.save().unwrap();

        let second = SpillStore::open(tmp.path(), 0).unwrap();
        second.put("/kept/", b"kept").unwrap();
        assert_eq!(second.prune().unwrap(), 1);
        assert!(!old.exists());
        assert!(kept.exists());
    }

    #[test]
    fn stats_display() {
        let only_inline = CacheStats {
            inline: 3,
            ..Default::default()
        };
        assert_eq!(only_inline.to_string(), "3 in memory");
        let mixed = CacheStats {
            inline: 3,
            spilled: 2,
            reused: 1,
        };
        assert_eq!(mixed.to_string(), "3 in memory, 2 spilled, 1 reused (6 total)");
    }
}
