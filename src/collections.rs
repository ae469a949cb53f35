//! Collections: directories of documents sharing a `_blueprint.yaml`.
//!
//! A directory under `/content/` is a collection iff it holds a
//! `_blueprint.yaml`. The blueprint supplies defaults for every document the
//! collection owns:
//!
//! ```yaml
//! $path: /{base}/
//! $view: /views/base.html
//! $order: 2
//! $localization:
//!   path: /{locale}/{base}/
//!   locales: [de, fr]
//! author: Editorial team      # user field, a default for every document
//! ```
//!
//! Built-in keys are read as `$key`, falling back to a plain `key`.
//!
//! # Ownership
//!
//! A collection owns the document at a pod path iff no nearer ancestor
//! directory of that path has its own blueprint. Subdirectories without a
//! blueprint are walked as part of the enclosing collection.
//!
//! ```text
//! content/pages/_blueprint.yaml
//! content/pages/a.yaml             ← pages
//! content/pages/team/b.yaml        ← pages (no blueprint in team/)
//! content/pages/blog/_blueprint.yaml
//! content/pages/blog/c.md          ← pages/blog
//! ```

use crate::data::{self, DataError};
use crate::documents::{Document, DocumentError, LocalePath};
use crate::locales::Locale;
use crate::pod::Pod;
use crate::podspec::PodSpec;
use crate::storage::{self, Storage, StorageError};
use crate::untag::{self, UntagParams};
use serde_json::{Map, Value};
use std::cmp::Ordering;
use std::collections::BTreeSet;
use std::sync::Arc;
use thiserror::Error;

pub const CONTENT_PATH: &str = "/content";
pub const BLUEPRINT_FILENAME: &str = "_blueprint.yaml";

/// Blueprint keys with built-in meaning; never merged into document fields.
const BUILTIN_KEYS: &[&str] = &[
    "path",
    "view",
    "localization",
    "order",
    "title",
    "titles",
    "hidden",
    "root",
];

#[derive(Error, Debug)]
pub enum CollectionError {
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
    #[error("Malformed blueprint: {0}")]
    Data(#[from] DataError),
    #[error("Collection not found: {0}")]
    NotFound(String),
}

/// Options for [`Collection::list_docs`].
#[derive(Debug, Clone, Default)]
pub struct ListDocs {
    pub include_hidden: bool,
    /// Locale variant to load; `None` lists default variants.
    pub locale: Option<Locale>,
    /// Field to sort by; defaults to `$order`.
    pub order_by: Option<String>,
    pub reverse: bool,
    /// Also list documents owned by nested collections.
    pub recursive: bool,
}

/// A loaded blueprint and the directory it governs.
#[derive(Debug, Clone)]
pub struct Collection {
    pod_path: String,
    raw: Value,
    fields: Value,
}

impl Collection {
    /// Load the collection rooted at `pod_path` (e.g. `/content/pages`).
    pub fn load(
        storage: &dyn Storage,
        podspec: &PodSpec,
        pod_path: &str,
    ) -> Result<Self, CollectionError> {
        let pod_path = storage::normalize_path(pod_path)?;
        let blueprint = storage::join(&pod_path, BLUEPRINT_FILENAME);
        if !storage.exists(&blueprint) {
            return Err(CollectionError::NotFound(pod_path));
        }
        let loaded = data::load_yaml_file(storage, &blueprint)?;
        let raw = match loaded.value {
            Value::Object(_) => loaded.value,
            _ => Value::Object(Map::new()),
        };
        let params = UntagParams::with_env(podspec.env().name.clone());
        let fields = untag::untag(&raw, None, &params);
        Ok(Self {
            pod_path,
            raw,
            fields,
        })
    }

    pub fn pod_path(&self) -> &str {
        &self.pod_path
    }

    pub fn blueprint_path(&self) -> String {
        storage::join(&self.pod_path, BLUEPRINT_FILENAME)
    }

    /// Directory name (`pages`).
    pub fn basename(&self) -> &str {
        storage::basename(&self.pod_path)
    }

    /// Path relative to `/content` (`/pages`).
    pub fn collection_path(&self) -> &str {
        self.pod_path
            .strip_prefix(CONTENT_PATH)
            .unwrap_or(&self.pod_path)
    }

    /// Blueprint before untagging.
    pub fn raw(&self) -> &Value {
        &self.raw
    }

    fn builtin(&self, name: &str) -> Option<&Value> {
        self.fields
            .get(format!("${name}").as_str())
            .or_else(|| self.fields.get(name))
    }

    fn builtin_str(&self, name: &str) -> Option<String> {
        self.builtin(name).and_then(Value::as_str).map(str::to_string)
    }

    pub fn path_format(&self) -> Option<String> {
        self.builtin_str("path")
    }

    pub fn view(&self) -> Option<String> {
        self.builtin_str("view")
    }

    pub fn title(&self) -> Option<String> {
        self.builtin_str("title")
    }

    pub fn titles(&self, key: &str) -> Option<String> {
        self.builtin("titles")
            .and_then(|t| t.get(key))
            .and_then(Value::as_str)
            .map(str::to_string)
            .or_else(|| self.title())
    }

    /// Sort order among collections; unordered collections sort last.
    pub fn order(&self) -> i64 {
        self.builtin("order").and_then(Value::as_i64).unwrap_or(i64::MAX)
    }

    pub fn hidden(&self) -> bool {
        self.builtin("hidden").and_then(Value::as_bool).unwrap_or(false)
    }

    /// `$root`, substituted for `{collection.root}`.
    pub fn root(&self) -> String {
        self.builtin_str("root").unwrap_or_default()
    }

    /// The localization block; `Some(Null)` means localization is disabled.
    pub fn localization(&self) -> Option<&Value> {
        self.builtin("localization")
    }

    /// `localization.path`, else `$path` when it already has `{locale}`.
    pub fn localized_path_format(&self) -> Option<String> {
        if let Some(path) = self
            .localization()
            .and_then(|l| l.get("path"))
            .and_then(Value::as_str)
        {
            return Some(path.to_string());
        }
        self.path_format().filter(|p| p.contains("{locale}"))
    }

    pub fn locales(&self, podspec: &PodSpec) -> Vec<Locale> {
        match self.localization() {
            Some(Value::Null) => Vec::new(),
            Some(l) => match l.get("locales").and_then(Value::as_array) {
                Some(items) => items
                    .iter()
                    .filter_map(Value::as_str)
                    .map(Locale::parse)
                    .collect(),
                None => podspec.list_locales(),
            },
            None => podspec.list_locales(),
        }
    }

    pub fn default_locale(&self, podspec: &PodSpec) -> Option<Locale> {
        self.localization()
            .and_then(|l| l.get("default_locale"))
            .and_then(Value::as_str)
            .map(Locale::parse)
            .or_else(|| podspec.default_locale())
    }

    pub fn locale_groups(&self) -> Option<Map<String, Value>> {
        self.localization()
            .and_then(|l| l.get("groups"))
            .and_then(Value::as_object)
            .cloned()
    }

    /// User fields of the blueprint (tagged), used as document defaults.
    pub fn default_fields(&self) -> Value {
        let map = self
            .raw
            .as_object()
            .map(|m| {
                m.iter()
                    .filter(|(key, _)| !is_builtin_key(key))
                    .map(|(k, v)| (k.clone(), v.clone()))
                    .collect()
            })
            .unwrap_or_default();
        Value::Object(map)
    }

    /// Pod paths of documents in this collection, sorted. Localized
    /// variants are folded into their base file when it exists.
    pub fn doc_paths(
        &self,
        storage: &dyn Storage,
        recursive: bool,
    ) -> Result<Vec<String>, CollectionError> {
        let mut nested: Vec<String> = Vec::new();
        let mut files: BTreeSet<String> = BTreeSet::new();
        for entry in storage.walk(&self.pod_path)? {
            if entry.dir != self.pod_path
                && entry.files.iter().any(|f| f == BLUEPRINT_FILENAME)
            {
                nested.push(format!("{}/", entry.dir));
            }
            if !recursive && nested.iter().any(|n| format!("{}/", entry.dir).starts_with(n)) {
                continue;
            }
            if is_ignored_dir(&entry.dir, &self.pod_path) {
                continue;
            }
            for name in &entry.files {
                if name.starts_with('_') || name.starts_with('.') {
                    continue;
                }
                files.insert(storage::join(&entry.dir, name));
            }
        }

        Ok(files
            .iter()
            .filter(|path| {
                let parsed = LocalePath::parse(path);
                parsed.locale.is_none() || !files.contains(&parsed.base_path())
            })
            .cloned()
            .collect())
    }

    /// Whether this collection owns the document at `doc_path`.
    pub fn owns(&self, storage: &dyn Storage, doc_path: &str) -> bool {
        nearest_collection_path(storage, doc_path).is_some_and(|p| p == self.pod_path)
    }

    /// Documents owned by this collection, filtered and sorted.
    pub fn list_docs(
        &self,
        pod: &Pod,
        options: &ListDocs,
    ) -> Result<Vec<Arc<Document>>, DocumentError> {
        let paths = self
            .doc_paths(pod.storage(), options.recursive)
            .map_err(|e| match e {
                CollectionError::Storage(s) => DocumentError::Storage(s),
                CollectionError::Data(d) => DocumentError::Data(d),
                CollectionError::NotFound(p) => DocumentError::NoCollection(p),
            })?;

        let mut docs = Vec::new();
        for path in paths {
            let doc = pod.get_doc(&path, options.locale.clone())?;
            if doc.hidden() && !options.include_hidden {
                log::debug!("Skipping hidden document {}", path);
                continue;
            }
            docs.push(doc);
        }

        let order_by = options.order_by.as_deref().unwrap_or("$order");
        docs.sort_by(|a, b| {
            compare_values(a.get(order_by), b.get(order_by))
                .then_with(|| natural_cmp(a.base(), b.base()))
                .then_with(|| a.pod_path().cmp(b.pod_path()))
        });
        if options.reverse {
            docs.reverse();
        }
        Ok(docs)
    }

    /// Every (document, locale) variant in this collection that can be
    /// served: default variants first, then each configured locale.
    pub fn list_servable_documents(&self, pod: &Pod) -> Result<Vec<Arc<Document>>, DocumentError> {
        let mut servable = Vec::new();
        for doc in self.list_docs(pod, &ListDocs::default())? {
            if !self.owns(pod.storage(), doc.pod_path()) {
                continue;
            }
            let default_locale = doc.default_locale().cloned();
            let locales: Vec<Locale> = doc.locales().to_vec();
            let base_path = doc.base_pod_path();
            // A localized file without a base file is its only variant.
            let localized_only = base_path != doc.pod_path();
            if doc.has_serving_path() {
                servable.push(doc);
            }
            if localized_only {
                continue;
            }
            for locale in locales {
                if Some(&locale) == default_locale.as_ref() {
                    continue;
                }
                let localized = pod.get_doc(&base_path, Some(locale))?;
                if localized.has_serving_path() {
                    servable.push(localized);
                }
            }
        }
        Ok(servable)
    }
}

fn is_builtin_key(key: &str) -> bool {
    let key = key.strip_prefix('$').unwrap_or(key);
    let key = key.split('@').next().unwrap_or(key);
    BUILTIN_KEYS.contains(&key)
}

/// Directories starting with `_` or `.` hold no documents.
fn is_ignored_dir(dir: &str, collection_path: &str) -> bool {
    dir.strip_prefix(collection_path)
        .unwrap_or_default()
        .split('/')
        .any(|segment| segment.starts_with('_') || segment.starts_with('.'))
}

/// Pod path of the nearest ancestor directory holding a blueprint.
pub fn nearest_collection_path(storage: &dyn Storage, doc_path: &str) -> Option<String> {
    let mut dir = storage::dirname(doc_path);
    while dir.starts_with(CONTENT_PATH) && dir.len() > CONTENT_PATH.len() {
        if storage.exists(&storage::join(&dir, BLUEPRINT_FILENAME)) {
            return Some(dir);
        }
        dir = storage::dirname(&dir);
    }
    None
}

/// Pod paths of every collection under `/content`, sorted.
pub fn collection_paths(storage: &dyn Storage) -> Result<Vec<String>, CollectionError> {
    let mut paths: Vec<String> = storage
        .walk(CONTENT_PATH)?
        .into_iter()
        .filter(|entry| entry.files.iter().any(|f| f == BLUEPRINT_FILENAME))
        .map(|entry| entry.dir)
        .collect();
    paths.sort();
    Ok(paths)
}

/// Order values: numbers numerically, strings naturally, missing last.
fn compare_values(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    match (a, b) {
        (None, None) => Ordering::Equal,
        (None, Some(_)) => Ordering::Greater,
        (Some(_), None) => Ordering::Less,
        (Some(Value::Number(x)), Some(Value::Number(y))) => x
            .as_f64()
            .partial_cmp(&y.as_f64())
            .unwrap_or(Ordering::Equal),
        (Some(x), Some(y)) => natural_cmp(
            &data::scalar_string(x).unwrap_or_default(),
            &data::scalar_string(y).unwrap_or_default(),
        ),
    }
}

/// Compare strings so that digit runs compare by value (`a2` < `a10`).
pub fn natural_cmp(a: &str, b: &str) -> Ordering {
    let mut a_chars = a.chars().peekable();
    let mut b_chars = b.chars().peekable();
    loop {
        match (a_chars.peek().copied(), b_chars.peek().copied()) {
            (None, None) => return Ordering::Equal,
            (None, Some(_)) => return Ordering::Less,
            (Some(_), None) => return Ordering::Greater,
            (Some(x), Some(y)) if x.is_ascii_digit() && y.is_ascii_digit() => {
                let mut x_num = String::new();
                while let Some(c) = a_chars.peek().copied().filter(char::is_ascii_digit) {
                    x_num.push(c);
                    a_chars.next();
                }
                let mut y_num = String::new();
                while let Some(c) = b_chars.peek().copied().filter(char::is_ascii_digit) {
                    y_num.push(c);
                    b_chars.next();
                }
                let x_trimmed = x_num.trim_start_matches('0');
                let y_trimmed = y_num.trim_start_matches('0');
                let ordering = x_trimmed
                    .len()
                    .cmp(&y_trimmed.len())
                    .then_with(|| x_trimmed.cmp(y_trimmed));
                if ordering != Ordering::Equal {
                    return ordering;
                }
            }
            (Some(x), Some(y)) => {
                if x != y {
                    return x.cmp(&y);
                }
                a_chars.next();
                b_chars.next();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::{PodBuilder, doc_bases};

    #[test]
    fn builtin_keys_with_and_without_dollar() {
        let pod = PodBuilder::new()
            .file("/podspec.yaml", "{}")
            .file(
                "/content/pages/_blueprint.yaml",
                "path: /{base}/\n$view: /views/page.html\n$order: 3\n",
            )
            .open();
        let collection = pod.get_collection("/content/pages").unwrap();
        assert_eq!(collection.path_format(), Some("/{base}/".to_string()));
        assert_eq!(collection.view(), Some("/views/page.html".to_string()));
        assert_eq!(collection.order(), 3);
        assert_eq!(collection.basename(), "pages");
        assert_eq!(collection.collection_path(), "/pages");
    }

    #[test]
    fn missing_blueprint_is_not_a_collection() {
        let pod = PodBuilder::new()
            .file("/podspec.yaml", "{}")
            .file("/content/loose/a.yaml", "{}")
            .open();
        assert!(matches!(
            pod.get_collection("/content/loose"),
            Err(CollectionError::NotFound(_))
        ));
    }

    #[test]
    fn locales_follow_localization_block() {
        let pod = PodBuilder::new()
            .file("/podspec.yaml", "localization:\n  locales: [en, de]\n")
            .file("/content/a/_blueprint.yaml", "$path: /{base}/\n")
            .file("/content/b/_blueprint.yaml", "$localization:\n  locales: [fr]\n")
            .file("/content/c/_blueprint.yaml", "$localization: null\n")
            .open();
        let podspec = pod.podspec();
        assert_eq!(
            pod.get_collection("/content/a").unwrap().locales(podspec),
            Locale::parse_list(&["en", "de"])
        );
        assert_eq!(
            pod.get_collection("/content/b").unwrap().locales(podspec),
            vec![Locale::parse("fr")]
        );
        assert!(pod.get_collection("/content/c").unwrap().locales(podspec).is_empty());
    }

    #[test]
    fn nested_collections_own_their_subtree() {
        let pod = PodBuilder::new()
            .file("/podspec.yaml", "{}")
            .file("/content/pages/_blueprint.yaml", "$path: /{base}/\n")
            .file("/content/pages/a.yaml", "{}")
            .file("/content/pages/team/b.yaml", "{}")
            .file("/content/pages/blog/_blueprint.yaml", "$path: /blog/{base}/\n")
            .file("/content/pages/blog/c.yaml", "{}")
            .open();
        let pages = pod.get_collection("/content/pages").unwrap();
        let storage = pod.storage();

        assert!(pages.owns(storage, "/content/pages/team/b.yaml"));
        assert!(!pages.owns(storage, "/content/pages/blog/c.yaml"));
        assert_eq!(
            pages.doc_paths(storage, false).unwrap(),
            vec!["/content/pages/a.yaml", "/content/pages/team/b.yaml"]
        );
        assert_eq!(pages.doc_paths(storage, true).unwrap().len(), 3);
    }

    #[test]
    fn doc_paths_skip_private_files_and_fold_variants() {
        let pod = PodBuilder::new()
            .file("/podspec.yaml", "{}")
            .file("/content/pages/_blueprint.yaml", "$path: /{base}/\n")
            .file("/content/pages/a.yaml", "{}")
            .file("/content/pages/a@de.yaml", "{}")
            .file("/content/pages/only@fr.yaml", "{}")
            .file("/content/pages/_draft.yaml", "{}")
            .file("/content/pages/_partials/x.yaml", "{}")
            .open();
        let pages = pod.get_collection("/content/pages").unwrap();
        assert_eq!(
            pages.doc_paths(pod.storage(), false).unwrap(),
            vec!["/content/pages/a.yaml", "/content/pages/only@fr.yaml"]
        );
    }

    #[test]
    fn list_docs_orders_and_hides() {
        let pod = PodBuilder::new()
            .file("/podspec.yaml", "{}")
            .file("/content/pages/_blueprint.yaml", "$path: /{base}/\n")
            .file("/content/pages/c.yaml", "$order: 1\n")
            .file("/content/pages/a.yaml", "$order: 2\n")
            .file("/content/pages/b.yaml", "$order: 2\n")
            .file("/content/pages/z.yaml", "{}")
            .file("/content/pages/h.yaml", "$order: 0\n$hidden: true\n")
            .open();
        let pages = pod.get_collection("/content/pages").unwrap();

        let docs = pages.list_docs(&pod, &ListDocs::default()).unwrap();
        assert_eq!(doc_bases(&docs), vec!["c", "a", "b", "z"]);

        let docs = pages
            .list_docs(&pod, &ListDocs { include_hidden: true, reverse: true, ..Default::default() })
            .unwrap();
        assert_eq!(doc_bases(&docs), vec!["z", "b", "a", "c", "h"]);
    }

    #[test]
    fn servable_documents_expand_locales() {
        let pod = PodBuilder::new()
            .file(
                "/podspec.yaml",
                "localization:\n  default_locale: en\n  locales: [en, de]\n",
            )
            .file(
                "/content/pages/_blueprint.yaml",
                "$path: /{base}/\nlocalization:\n  path: /{locale}/{base}/\n",
            )
            .file("/content/pages/hi.yaml", "{}")
            .open();
        let pages = pod.get_collection("/content/pages").unwrap();
        let docs = pages.list_servable_documents(&pod).unwrap();
        let locales: Vec<Option<String>> = docs
            .iter()
            .map(|d| d.locale().map(|l| l.to_string()))
            .collect();
        assert_eq!(locales, vec![None, Some("de".to_string())]);
    }

    #[test]
    fn localized_only_document_is_listed_once() {
        let pod = PodBuilder::new()
            .file(
                "/podspec.yaml",
                "localization:\n  default_locale: en\n  locales: [en, de, fr]\n",
            )
            .file(
                "/content/pages/_blueprint.yaml",
                "$path: /{base}/\nlocalization:\n  path: /{locale}/{base}/\n",
            )
            .file("/content/pages/only@de.yaml", "{}")
            .open();
        let pages = pod.get_collection("/content/pages").unwrap();
        let docs = pages.list_servable_documents(&pod).unwrap();
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0].pod_path(), "/content/pages/only@de.yaml");
        assert_eq!(docs[0].locale(), Some(&Locale::parse("de")));
    }

    #[test]
    fn natural_ordering() {
        assert_eq!(natural_cmp("a2", "a10"), Ordering::Less);
        assert_eq!(natural_cmp("b", "a10"), Ordering::Greater);
        assert_eq!(natural_cmp("x", "x"), Ordering::Equal);
    }

    #[test]
    fn lists_collections() {
        let pod = PodBuilder::new()
            .file("/podspec.yaml", "{}")
            .file("/content/pages/_blueprint.yaml", "{}")
            .file("/content/pages/blog/_blueprint.yaml", "{}")
            .file("/content/strings/x.yaml", "{}")
            .open();
        assert_eq!(
            collection_paths(pod.storage()).unwrap(),
            vec!["/content/pages", "/content/pages/blog"]
        );
    }
}
