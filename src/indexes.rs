//! Deploy indexes and the diffs between them.
//!
//! An [`Index`] records the SHA-1 of every file a build produced, plus who
//! deployed it, when, and from which commit. Comparing the new index with
//! the one stored at the destination yields a [`Diff`]:
//!
//! | Bucket | Meaning |
//! |--------|---------|
//! | `adds` | in the new index only |
//! | `edits` | in both, SHA differs |
//! | `deletes` | in the old index only (suppressed for partial diffs) |
//! | `nochanges` | in both, same SHA |
//!
//! Both are stored as JSON at the destination (`index.proto.json`,
//! `diff.proto.json`).

use crate::render::RenderedDocument;
use serde::{Deserialize, Serialize};
use sha1::{Digest, Sha1};
use std::collections::BTreeMap;
use std::path::Path;
use std::process::Command;
use thiserror::Error;

pub const INDEX_BASENAME: &str = "index.proto.json";
pub const DIFF_BASENAME: &str = "diff.proto.json";
pub const STATS_BASENAME: &str = "stats.proto.json";

/// Commit log lines shown for a first deploy.
const GIT_LOG_MAX: usize = 25;

#[derive(Error, Debug)]
pub enum IndexError {
    #[error("Corrupt index: {0}")]
    Corrupt(#[from] serde_json::Error),
}

/// Lowercase hex SHA-1 of `bytes`.
pub fn sha1_hex(bytes: &[u8]) -> String {
    format!("{:x}", Sha1::digest(bytes))
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Author {
    pub name: String,
    pub email: String,
}

impl std::fmt::Display for Author {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} <{}>", self.name, self.email)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Commit {
    pub sha: String,
    #[serde(default)]
    pub has_unstaged_changes: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileMessage {
    pub path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sha: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deployed: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deployed_by: Option<Author>,
}

// ============================================================================
// Index
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Index {
    pub deployed: Option<String>,
    pub deployed_by: Option<Author>,
    pub commit: Option<Commit>,
    pub files: Vec<FileMessage>,
}

impl Index {
    /// An empty index stamped with the current time.
    pub fn create() -> Self {
        Self {
            deployed: Some(chrono::Utc::now().to_rfc3339()),
            ..Self::default()
        }
    }

    pub fn from_rendered<'a>(docs: impl IntoIterator<Item = &'a RenderedDocument>) -> Self {
        let mut index = Self::create();
        for doc in docs {
            index.add_file(&doc.path, &doc.hash);
        }
        index
    }

    pub fn add_file(&mut self, path: &str, sha: &str) -> &FileMessage {
        let path = format!("/{}", path.trim_start_matches('/'));
        self.files.push(FileMessage {
            path,
            sha: Some(sha.to_string()),
            ..FileMessage::default()
        });
        &self.files[self.files.len() - 1]
    }

    /// Fill author and commit from the git repository at `dir`, when there
    /// is one.
    pub fn add_repo(&mut self, dir: &Path) {
        let Some(sha) = git(dir, &["rev-parse", "HEAD"]) else {
            log::debug!("No git repository at {}", dir.display());
            return;
        };
        let has_unstaged_changes = git(dir, &["status", "--porcelain"]).is_some_and(|s| !s.is_empty());
        self.commit = Some(Commit {
            sha,
            has_unstaged_changes,
        });
        match (git(dir, &["config", "user.name"]), git(dir, &["config", "user.email"])) {
            (Some(name), Some(email)) => self.deployed_by = Some(Author { name, email }),
            _ => log::warn!("Couldn't find user info in repository config."),
        }
    }

    pub fn paths_to_shas(&self) -> BTreeMap<&str, &str> {
        self.files
            .iter()
            .map(|f| (f.path.as_str(), f.sha.as_deref().unwrap_or_default()))
            .collect()
    }

    pub fn to_json(&self) -> Result<String, IndexError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn from_json(json: &str) -> Result<Self, IndexError> {
        Ok(serde_json::from_str(json)?)
    }
}

fn git(dir: &Path, args: &[&str]) -> Option<String> {
    let output = Command::new("git").arg("-C").arg(dir).args(args).output().ok()?;
    if !output.status.success() {
        return None;
    }
    Some(String::from_utf8_lossy(&output.stdout).trim().to_string())
}

// ============================================================================
// Diff
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    Add,
    Edit,
    Delete,
}

impl Action {
    pub fn label(&self) -> &'static str {
        match self {
            Action::Add => "add",
            Action::Edit => "edit",
            Action::Delete => "delete",
        }
    }
}

/// One row of [`Diff::pretty_print`].
#[derive(Debug, Clone, PartialEq)]
pub struct DiffRow {
    pub action: Action,
    pub path: String,
    pub deployed: String,
    pub deployed_by: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Diff {
    pub is_partial: bool,
    /// `[theirs, ours]`.
    pub indexes: Vec<Index>,
    pub adds: Vec<FileMessage>,
    pub edits: Vec<FileMessage>,
    pub deletes: Vec<FileMessage>,
    pub nochanges: Vec<FileMessage>,
    pub what_changed: Option<String>,
}

/// Accumulates a diff against `theirs` one file at a time.
struct DiffBuilder<'a> {
    theirs: &'a Index,
    their_shas: BTreeMap<&'a str, &'a str>,
    diff: Diff,
}

impl<'a> DiffBuilder<'a> {
    fn new(theirs: &'a Index, is_partial: bool) -> Self {
        Self {
            theirs,
            their_shas: theirs.paths_to_shas(),
            diff: Diff {
                is_partial,
                ..Diff::default()
            },
        }
    }

    fn deployed(&self, path: &str) -> FileMessage {
        FileMessage {
            path: path.to_string(),
            deployed: self.theirs.deployed.clone(),
            deployed_by: self.theirs.deployed_by.clone(),
            ..FileMessage::default()
        }
    }

    /// Classify `path`; returns true when it must be written.
    fn push(&mut self, path: &str, sha: &str) -> bool {
        match self.their_shas.remove(path) {
            Some(theirs) if theirs == sha => {
                let message = self.deployed(path);
                self.diff.nochanges.push(message);
                false
            }
            Some(_) => {
                let message = self.deployed(path);
                self.diff.edits.push(message);
                true
            }
            None => {
                self.diff.adds.push(FileMessage {
                    path: path.to_string(),
                    ..FileMessage::default()
                });
                true
            }
        }
    }

    fn finish(mut self, ours: Index) -> Diff {
        if !self.diff.is_partial {
            let remaining: Vec<String> = self.their_shas.keys().map(|p| p.to_string()).collect();
            for path in remaining {
                let message = self.deployed(&path);
                self.diff.deletes.push(message);
            }
        }
        self.diff.indexes = vec![self.theirs.clone(), ours];
        self.diff
    }
}

impl Diff {
    /// Compare `index` (new) against `theirs` (deployed).
    pub fn create(index: &Index, theirs: &Index, is_partial: bool) -> Self {
        let mut builder = DiffBuilder::new(theirs, is_partial);
        for file in &index.files {
            builder.push(&file.path, file.sha.as_deref().unwrap_or_default());
        }
        builder.finish(index.clone())
    }

    /// Build the new index and the diff while consuming rendered output.
    /// Only added and edited documents are kept, keyed by path.
    pub fn from_rendered(
        theirs: &Index,
        docs: impl IntoIterator<Item = RenderedDocument>,
        is_partial: bool,
        repo: Option<&Path>,
    ) -> (Diff, Index, BTreeMap<String, RenderedDocument>) {
        let mut index = Index::create();
        if let Some(dir) = repo {
            index.add_repo(dir);
        }
        let mut builder = DiffBuilder::new(theirs, is_partial);
        let mut changed = BTreeMap::new();
        for doc in docs {
            let path = index.add_file(&doc.path, &doc.hash).path.clone();
            if builder.push(&path, &doc.hash) {
                changed.insert(path, doc);
            }
        }
        let mut diff = builder.finish(index.clone());
        if let (Some(dir), Some(ours)) = (repo, index.commit.as_ref()) {
            diff.what_changed = commit_log(dir, theirs.commit.as_ref(), ours);
        }
        (diff, index, changed)
    }

    pub fn is_empty(&self) -> bool {
        self.adds.is_empty() && self.edits.is_empty() && self.deletes.is_empty()
    }

    /// `(path, action)` in apply order: adds, edits, deletes.
    pub fn stream(&self) -> impl Iterator<Item = (&str, Action)> {
        let adds = self.adds.iter().map(|f| (f.path.as_str(), Action::Add));
        let edits = self.edits.iter().map(|f| (f.path.as_str(), Action::Edit));
        let deletes = self.deletes.iter().map(|f| (f.path.as_str(), Action::Delete));
        adds.chain(edits).chain(deletes)
    }

    /// Table rows for every changed file, sorted by path.
    pub fn pretty_print(&self) -> Vec<DiffRow> {
        let row = |action: Action, file: &FileMessage| DiffRow {
            action,
            path: file.path.clone(),
            deployed: file
                .deployed
                .as_deref()
                .map(|d| d.chars().take(16).collect::<String>().replace('T', " "))
                .unwrap_or_default(),
            deployed_by: file.deployed_by.as_ref().map(Author::to_string).unwrap_or_default(),
        };
        let mut rows: Vec<DiffRow> = self
            .adds
            .iter()
            .map(|f| row(Action::Add, f))
            .chain(self.edits.iter().map(|f| row(Action::Edit, f)))
            .chain(self.deletes.iter().map(|f| row(Action::Delete, f)))
            .collect();
        rows.sort_by(|a, b| a.path.cmp(&b.path));
        rows
    }

    /// `abc1234..def5678` between the two deploy commits, when known.
    pub fn between_commits(&self) -> Option<String> {
        let [theirs, ours] = self.indexes.as_slice() else {
            return None;
        };
        let ours_commit = ours.commit.as_ref()?;
        let short = |c: Option<&Commit>| c.map(|c| c.sha.chars().take(7).collect::<String>()).unwrap_or_default();
        let mut text = format!("{}..{}", short(theirs.commit.as_ref()), short(Some(ours_commit)));
        if ours_commit.has_unstaged_changes {
            text.push_str(" (with unstaged changes)");
        }
        Some(text)
    }

    pub fn to_json(&self) -> Result<String, IndexError> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

/// `git log` lines between two deploys (or the latest commits on a first
/// deploy), capped for display.
pub fn commit_log(dir: &Path, theirs: Option<&Commit>, ours: &Commit) -> Option<String> {
    let format = "--pretty=format:[%h] %ad <%ae> %s";
    match theirs.filter(|c| !c.sha.is_empty()) {
        Some(theirs) => {
            let range = format!("{}..{}", theirs.sha, ours.sha);
            let log = git(dir, &["log", "--date=short", format, &range]);
            if log.is_none() {
                log::info!("Unable to determine changes between deploys.");
            }
            log
        }
        None => {
            let log = git(dir, &["log", "--date=short", format])?;
            let lines: Vec<&str> = log.lines().collect();
            if lines.len() <= GIT_LOG_MAX {
                return Some(log);
            }
            let mut kept: Vec<String> = lines[..GIT_LOG_MAX].iter().map(|l| l.to_string()).collect();
            kept.push(format!(" ... +{} more commits.", lines.len() - GIT_LOG_MAX));
            Some(kept.join("\n"))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn index(files: &[(&str, &str)]) -> Index {
        let mut index = Index::create();
        for (path, content) in files {
            index.add_file(path, &sha1_hex(content.as_bytes()));
        }
        index
    }

    fn paths(files: &[FileMessage]) -> Vec<&str> {
        files.iter().map(|f| f.path.as_str()).collect()
    }

    #[test]
    fn sha1_hex_digest() {
        assert_eq!(sha1_hex(b"abc"), "a9993e364706816aba3e25717850c26c9cd0d89d");
    }

    #[test]
    fn classifies_changes() {
        let theirs = index(&[("/a", "x"), ("/b", "y")]);
        let ours = index(&[("/a", "x"), ("/b", "Y"), ("/c", "z")]);
        let diff = Diff::create(&ours, &theirs, false);
        assert_eq!(paths(&diff.adds), vec!["/c"]);
        assert_eq!(paths(&diff.edits), vec!["/b"]);
        assert!(diff.deletes.is_empty());
        assert_eq!(paths(&diff.nochanges), vec!["/a"]);
        assert!(!diff.is_empty());
    }

    #[test]
    fn swapping_indexes_swaps_adds_and_deletes() {
        let a = index(&[("/a", "x"), ("/b", "y")]);
        let b = index(&[("/a", "x"), ("/b", "Y"), ("/c", "z")]);
        let forward = Diff::create(&b, &a, false);
        let backward = Diff::create(&a, &b, false);
        assert_eq!(paths(&forward.adds), paths(&backward.deletes));
        assert_eq!(paths(&forward.deletes), paths(&backward.adds));
        assert_eq!(paths(&forward.edits), paths(&backward.edits));
        assert_eq!(paths(&forward.nochanges), paths(&backward.nochanges));
    }

    #[test]
    fn partial_diffs_never_delete() {
        let theirs = index(&[("/a", "x"), ("/gone", "y")]);
        let ours = index(&[("/a", "x")]);
        assert_eq!(paths(&Diff::create(&ours, &theirs, false).deletes), vec!["/gone"]);
        let partial = Diff::create(&ours, &theirs, true);
        assert!(partial.deletes.is_empty());
        assert!(partial.is_empty());
    }

    #[test]
    fn paths_are_absolute() {
        let mut index = Index::default();
        assert_eq!(index.add_file("about/index.html", "1").path, "/about/index.html");
    }

    #[test]
    fn stream_orders_actions() {
        let theirs = index(&[("/e", "1"), ("/d", "1")]);
        let ours = index(&[("/e", "2"), ("/a", "1")]);
        let diff = Diff::create(&ours, &theirs, false);
        let actions: Vec<(&str, Action)> = diff.stream().collect();
        assert_eq!(
            actions,
            vec![("/a", Action::Add), ("/e", Action::Edit), ("/d", Action::Delete)]
        );
        let rows: Vec<String> = diff.pretty_print().into_iter().map(|r| r.path).collect();
        assert_eq!(rows, vec!["/a", "/d", "/e"]);
    }

    #[test]
    fn json_round_trip() {
        let index = index(&[("/a", "x")]);
        let restored = Index::from_json(&index.to_json().unwrap()).unwrap();
        assert_eq!(restored, index);
        assert!(matches!(Index::from_json("{"), Err(IndexError::Corrupt(_))));
    }

    #[test]
    fn deployer_in_rows() {
        let mut theirs = index(&[("/a", "x")]);
        theirs.deployed = Some("2026-01-02T03:04:05+00:00".to_string());
        theirs.deployed_by = Some(Author {
            name: "Kim".to_string(),
            email: "kim@example.com".to_string(),
        });
        let ours = index(&[("/a", "y")]);
        let rows = Diff::create(&ours, &theirs, false).pretty_print();
        assert_eq!(rows[0].deployed, "2026-01-02 03:04");
        assert_eq!(rows[0].deployed_by, "Kim <kim@example.com>");
    }
}
