//! Dependency graph between rendered outputs and the files they read.
//!
//! Every edge is `dependent → source`: a serving path depends on its view,
//! partials, document files and catalogs; a document pod path depends on
//! the documents it references through `!g.doc`. When a source changes, the
//! affected set is the reverse closure from that source:
//!
//! ```text
//! /about/           → /views/base.html, /content/pages/about.yaml
//! /content/pages/about.yaml → /content/pages/team.yaml
//!
//! affected(/content/pages/team.yaml) = {/content/pages/about.yaml, /about/}
//! ```
//!
//! Templates that include each other make the graph cyclic; the closure
//! walks with a visited set and never orders nodes.
//!
//! The graph persists between runs at [`DEPENDENCY_CACHE_PATH`].

use crate::storage::{Storage, StorageError};
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use thiserror::Error;

pub const DEPENDENCY_CACHE_PATH: &str = "/.grow/cache/dependencies.json";

#[derive(Error, Debug)]
pub enum DependencyError {
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
    #[error("Invalid dependency cache: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct DependencyGraph {
    sources: BTreeMap<String, BTreeSet<String>>,
    dependents: BTreeMap<String, BTreeSet<String>>,
}

impl DependencyGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that `dependent` read `source`.
    pub fn add(&mut self, dependent: &str, source: &str) {
        if dependent == source {
            return;
        }
        self.sources
            .entry(dependent.to_string())
            .or_default()
            .insert(source.to_string());
        self.dependents
            .entry(source.to_string())
            .or_default()
            .insert(dependent.to_string());
    }

    pub fn add_all<I, S>(&mut self, dependent: &str, sources: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        for source in sources {
            self.add(dependent, source.as_ref());
        }
    }

    /// Drop every edge out of `dependent`, before it is re-rendered.
    pub fn reset(&mut self, dependent: &str) {
        let Some(sources) = self.sources.remove(dependent) else {
            return;
        };
        for source in sources {
            if let Some(set) = self.dependents.get_mut(&source) {
                set.remove(dependent);
                if set.is_empty() {
                    self.dependents.remove(&source);
                }
            }
        }
    }

    pub fn sources_of(&self, dependent: &str) -> Vec<String> {
        self.sources
            .get(dependent)
            .map(|s| s.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Direct dependents of `source`.
    pub fn dependents_of(&self, source: &str) -> Vec<String> {
        self.dependents
            .get(source)
            .map(|s| s.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Everything that transitively depends on any of `changed`.
    pub fn affected<S: AsRef<str>>(&self, changed: &[S]) -> BTreeSet<String> {
        let mut visited: BTreeSet<String> = BTreeSet::new();
        let mut queue: VecDeque<String> = changed.iter().map(|s| s.as_ref().to_string()).collect();
        while let Some(node) = queue.pop_front() {
            if let Some(dependents) = self.dependents.get(&node) {
                for dependent in dependents {
                    if visited.insert(dependent.clone()) {
                        queue.push_back(dependent.clone());
                    }
                }
            }
        }
        visited
    }

    /// Everything depending on any known source matching `pattern`
    /// (`*`, `?`, `[...]`).
    pub fn match_dependents(&self, pattern: &str) -> BTreeSet<String> {
        let matched: Vec<&String> = self
            .dependents
            .keys()
            .filter(|source| glob_match(pattern, source))
            .collect();
        self.affected(&matched)
    }

    pub fn len(&self) -> usize {
        self.sources.values().map(BTreeSet::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }

    /// Sorted `dependent → [sources]` map.
    pub fn export(&self) -> BTreeMap<String, Vec<String>> {
        self.sources
            .iter()
            .map(|(k, v)| (k.clone(), v.iter().cloned().collect()))
            .collect()
    }

    pub fn from_export(export: BTreeMap<String, Vec<String>>) -> Self {
        let mut graph = Self::new();
        for (dependent, sources) in export {
            graph.add_all(&dependent, sources);
        }
        graph
    }

    /// Load the persisted graph; a missing cache is an empty graph.
    pub fn load(storage: &dyn Storage) -> Result<Self, DependencyError> {
        if !storage.exists(DEPENDENCY_CACHE_PATH) {
            return Ok(Self::new());
        }
        let bytes = storage.read(DEPENDENCY_CACHE_PATH)?;
        let export: BTreeMap<String, Vec<String>> = serde_json::from_slice(&bytes)?;
        Ok(Self::from_export(export))
    }

    pub fn save(&self, storage: &dyn Storage) -> Result<(), DependencyError> {
        let json = serde_json::to_string_pretty(&self.export())?;
        storage.write(DEPENDENCY_CACHE_PATH, json.as_bytes())?;
        Ok(())
    }
}

/// Shell-style glob: `*` matches any run (including `/`), `?` one
/// character, `[...]` a class (`[!...]` negated, ranges allowed).
pub fn glob_match(pattern: &str, text: &str) -> bool {
    let pattern: Vec<char> = pattern.chars().collect();
    let text: Vec<char> = text.chars().collect();
    glob_at(&pattern, &text)
}

fn glob_at(pattern: &[char], text: &[char]) -> bool {
    let Some((&first, rest)) = pattern.split_first() else {
        return text.is_empty();
    };
    match first {
        '*' => (0..=text.len()).any(|skip| glob_at(rest, &text[skip..])),
        '?' => !text.is_empty() && glob_at(rest, &text[1..]),
        '[' => {
            let Some(close) = rest.iter().position(|&c| c == ']') else {
                return text.first() == Some(&'[') && glob_at(rest, &text[1..]);
            };
            let Some(&c) = text.first() else {
                return false;
            };
            let class = &rest[..close];
            let (negated, class) = match class.split_first() {
                Some(('!', tail)) => (true, tail),
                _ => (false, class),
            };
            if class_matches(class, c) != negated {
                glob_at(&rest[close + 1..], &text[1..])
            } else {
                false
            }
        }
        literal => text.first() == Some(&literal) && glob_at(rest, &text[1..]),
    }
}

fn class_matches(class: &[char], c: char) -> bool {
    let mut i = 0;
    while i < class.len() {
        if i + 2 < class.len() && class[i + 1] == '-' {
            if class[i] <= c && c <= class[i + 2] {
                return true;
            }
            i += 3;
        } else {
            if class[i] == c {
                return true;
            }
            i += 1;
        }
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::LocalStorage;
    use tempfile::TempDir;

    fn graph() -> DependencyGraph {
        let mut graph = DependencyGraph::new();
        graph.add_all("/about/", ["/views/base.html", "/content/pages/about.yaml"]);
        graph.add_all("/team/", ["/views/base.html", "/content/pages/team.yaml"]);
        graph.add("/content/pages/about.yaml", "/content/pages/team.yaml");
        graph
    }

    #[test]
    fn reverse_closure_follows_references() {
        let affected = graph().affected(&["/content/pages/team.yaml"]);
        let expected: BTreeSet<String> = ["/about/", "/team/", "/content/pages/about.yaml"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        assert_eq!(affected, expected);
    }

    #[test]
    fn cycles_terminate() {
        let mut graph = DependencyGraph::new();
        graph.add("/views/a.html", "/views/b.html");
        graph.add("/views/b.html", "/views/a.html");
        graph.add("/x/", "/views/a.html");
        let affected = graph.affected(&["/views/a.html"]);
        assert!(affected.contains("/x/"));
        assert!(affected.contains("/views/b.html"));
    }

    #[test]
    fn reset_drops_outgoing_edges() {
        let mut graph = graph();
        graph.reset("/about/");
        assert!(graph.sources_of("/about/").is_empty());
        assert_eq!(graph.dependents_of("/views/base.html"), vec!["/team/"]);
    }

    #[test]
    fn glob_dependents() {
        let graph = graph();
        let affected = graph.match_dependents("/views/*.html");
        assert!(affected.contains("/about/") && affected.contains("/team/"));
        assert!(graph.match_dependents("/nope/*").is_empty());
    }

    #[test]
    fn glob_syntax() {
        assert!(glob_match("/content/*/a.yaml", "/content/pages/a.yaml"));
        assert!(glob_match("/a?.md", "/ab.md"));
        assert!(glob_match("/[a-c].md", "/b.md"));
        assert!(!glob_match("/[!a-c].md", "/b.md"));
        assert!(!glob_match("/a*.md", "/b.md"));
    }

    #[test]
    fn persists_sorted_export() {
        let tmp = TempDir::new().unwrap();
        let storage = LocalStorage::new(tmp.path());
        let graph = graph();
        graph.save(&storage).unwrap();
        assert_eq!(DependencyGraph::load(&storage).unwrap(), graph);

        let empty = TempDir::new().unwrap();
        assert!(DependencyGraph::load(&LocalStorage::new(empty.path())).unwrap().is_empty());
    }
}
