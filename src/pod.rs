//! The pod: storage, podspec and the caches every stage shares.
//!
//! A [`Pod`] is created once per command and passed by reference to the
//! router, the render workers, the catalogs and the deploy driver. Documents
//! and collections are materialized lazily and cached by pod path (and
//! locale, for documents); the caches are plain `RwLock` maps so render
//! workers can fill them concurrently.
//!
//! Every document load records `pod_path → source` edges in the dependency
//! graph for the files it was merged from and the files its YAML tags
//! referenced, so a changed file invalidates its readers.

use crate::catalogs::{Catalogs, TranslationStats, Translations};
use crate::collections::{self, Collection, CollectionError, ListDocs};
use crate::dependency::{DependencyError, DependencyGraph};
use crate::documents::{Document, DocumentError};
use crate::locales::{Locale, LocaleRegistry};
use crate::podspec::{Env, PODSPEC_PATH, PodSpec, PodSpecError};
use crate::storage::{self, LocalStorage, Storage, StorageError};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PodError {
    #[error("Podspec error: {0}")]
    PodSpec(#[from] PodSpecError),
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
    #[error("Dependency cache error: {0}")]
    Dependency(#[from] DependencyError),
}

type DocKey = (String, Option<Locale>);

pub struct Pod {
    storage: Arc<dyn Storage>,
    root: Option<PathBuf>,
    podspec: PodSpec,
    registry: LocaleRegistry,
    collections: RwLock<HashMap<String, Arc<Collection>>>,
    documents: RwLock<HashMap<DocKey, Arc<Document>>>,
    dependencies: RwLock<DependencyGraph>,
    stats: TranslationStats,
    translations: RwLock<HashMap<Locale, Arc<Translations>>>,
}

fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl std::fmt::Debug for Pod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pod")
            .field("root", &self.root)
            .field("env", &self.podspec.env().name)
            .finish()
    }
}

impl Pod {
    /// Open the pod in a local directory.
    pub fn open(root: impl AsRef<Path>, env: Env) -> Result<Self, PodError> {
        let root = root.as_ref().to_path_buf();
        let mut pod = Self::with_storage(Arc::new(LocalStorage::new(&root)), env)?;
        pod.root = Some(root);
        Ok(pod)
    }

    /// Open a pod over any storage backend.
    pub fn with_storage(storage: Arc<dyn Storage>, env: Env) -> Result<Self, PodError> {
        let podspec = PodSpec::load(storage.as_ref(), env)?;
        let registry = podspec.locale_registry();
        let dependencies = DependencyGraph::load(storage.as_ref()).unwrap_or_else(|e| {
            log::warn!("Ignoring dependency cache: {}", e);
            DependencyGraph::new()
        });
        Ok(Self {
            storage,
            root: None,
            podspec,
            registry,
            collections: RwLock::new(HashMap::new()),
            documents: RwLock::new(HashMap::new()),
            dependencies: RwLock::new(dependencies),
            stats: TranslationStats::new(),
            translations: RwLock::new(HashMap::new()),
        })
    }

    pub fn storage(&self) -> &dyn Storage {
        self.storage.as_ref()
    }

    pub fn storage_handle(&self) -> Arc<dyn Storage> {
        Arc::clone(&self.storage)
    }

    /// Local directory of the pod, when it lives on the filesystem.
    pub fn root_dir(&self) -> Option<&Path> {
        self.root.as_deref()
    }

    pub fn podspec(&self) -> &PodSpec {
        &self.podspec
    }

    pub fn env(&self) -> &Env {
        self.podspec.env()
    }

    pub fn registry(&self) -> &LocaleRegistry {
        &self.registry
    }

    /// Switch environments. Cached documents and collections were untagged
    /// for the old environment and are dropped.
    pub fn set_env(&mut self, env: Env) {
        self.podspec.set_env(env);
        self.registry = self.podspec.locale_registry();
        write(&self.collections).clear();
        write(&self.documents).clear();
    }

    pub fn list_locales(&self) -> Vec<Locale> {
        self.podspec.list_locales()
    }

    pub fn catalogs(&self) -> Catalogs<'_> {
        Catalogs::new(self)
    }

    pub fn stats(&self) -> &TranslationStats {
        &self.stats
    }

    pub(crate) fn translation_cache(&self) -> &RwLock<HashMap<Locale, Arc<Translations>>> {
        &self.translations
    }

    // ========================================================================
    // Collections and documents
    // ========================================================================

    pub fn get_collection(&self, pod_path: &str) -> Result<Arc<Collection>, CollectionError> {
        let pod_path = storage::normalize_path(pod_path)?;
        if let Some(found) = read(&self.collections).get(&pod_path) {
            return Ok(Arc::clone(found));
        }
        let collection = Arc::new(Collection::load(self.storage(), &self.podspec, &pod_path)?);
        write(&self.collections).insert(pod_path, Arc::clone(&collection));
        Ok(collection)
    }

    pub fn list_collections(&self) -> Result<Vec<Arc<Collection>>, CollectionError> {
        collections::collection_paths(self.storage())?
            .iter()
            .map(|path| self.get_collection(path))
            .collect()
    }

    /// The collection owning the document at `doc_path`.
    pub fn collection_for(&self, doc_path: &str) -> Result<Arc<Collection>, DocumentError> {
        let path = collections::nearest_collection_path(self.storage(), doc_path)
            .ok_or_else(|| DocumentError::NoCollection(doc_path.to_string()))?;
        self.get_collection(&path).map_err(|e| match e {
            CollectionError::Storage(s) => DocumentError::Storage(s),
            CollectionError::Data(d) => DocumentError::Data(d),
            CollectionError::NotFound(p) => DocumentError::NoCollection(p),
        })
    }

    /// The document at `pod_path` for `locale` (`None` for the default
    /// variant), loading it on first use.
    pub fn get_doc(&self, pod_path: &str, locale: Option<Locale>) -> Result<Arc<Document>, DocumentError> {
        let pod_path = storage::normalize_path(pod_path)?;
        let key = (pod_path, locale);
        if let Some(found) = read(&self.documents).get(&key) {
            return Ok(Arc::clone(found));
        }
        let (pod_path, locale) = key;
        let collection = self.collection_for(&pod_path)?;
        let doc = Arc::new(Document::load(
            self.storage(),
            &self.podspec,
            collection,
            &pod_path,
            locale.clone(),
        )?);
        {
            let mut graph = write(&self.dependencies);
            graph.add_all(doc.pod_path(), doc.source_paths());
            graph.add_all(doc.pod_path(), doc.references());
        }
        write(&self.documents).insert((pod_path, locale), Arc::clone(&doc));
        Ok(doc)
    }

    /// Drop cached state read from `pod_path`.
    pub fn invalidate(&self, pod_path: &str) {
        if pod_path == PODSPEC_PATH {
            write(&self.collections).clear();
            write(&self.documents).clear();
            write(&self.translations).clear();
            return;
        }
        if pod_path.starts_with(crate::catalogs::TRANSLATIONS_ROOT) {
            write(&self.translations).clear();
            return;
        }
        if storage::basename(pod_path) == collections::BLUEPRINT_FILENAME {
            write(&self.collections).remove(&storage::dirname(pod_path));
        }
        let affected = read(&self.dependencies).affected(&[pod_path]);
        write(&self.documents).retain(|(path, _), doc| {
            path != pod_path
                && !affected.contains(path)
                && !doc.source_paths().iter().any(|s| s == pod_path)
        });
    }

    /// Neighbours of `doc` in its collection's listing order.
    pub fn adjacent_docs(
        &self,
        doc: &Document,
    ) -> Result<(Option<Arc<Document>>, Option<Arc<Document>>), DocumentError> {
        let docs = doc.collection().list_docs(
            self,
            &ListDocs {
                locale: doc.locale().cloned(),
                ..Default::default()
            },
        )?;
        let Some(index) = docs.iter().position(|d| d.pod_path() == doc.pod_path()) else {
            return Ok((None, None));
        };
        let prev = index.checked_sub(1).and_then(|i| docs.get(i)).cloned();
        let next = docs.get(index + 1).cloned();
        Ok((prev, next))
    }

    // ========================================================================
    // Dependencies and hashing
    // ========================================================================

    pub fn dependencies(&self) -> RwLockReadGuard<'_, DependencyGraph> {
        read(&self.dependencies)
    }

    /// Record that `dependent` (a serving path or pod path) read `source`.
    pub fn record_dependency(&self, dependent: &str, source: &str) {
        write(&self.dependencies).add(dependent, source);
    }

    pub fn record_dependencies<S: AsRef<str>>(&self, dependent: &str, sources: &[S]) {
        let mut graph = write(&self.dependencies);
        for source in sources {
            graph.add(dependent, source.as_ref());
        }
    }

    pub fn reset_dependencies(&self, dependent: &str) {
        write(&self.dependencies).reset(dependent);
    }

    pub fn save_dependencies(&self) -> Result<(), PodError> {
        read(&self.dependencies).save(self.storage())?;
        Ok(())
    }

    /// SHA-1 hex digest of a pod file.
    pub fn hash_file(&self, pod_path: &str) -> Result<String, StorageError> {
        let bytes = self.storage.read(pod_path)?;
        Ok(crate::indexes::sha1_hex(&bytes))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::PodBuilder;

    fn pod() -> crate::test_helpers::TestPod {
        PodBuilder::new()
            .file("/podspec.yaml", "localization:\n  default_locale: en\n  locales: [en, de]\n")
            .file("/content/pages/_blueprint.yaml", "$path: /{base}/\n$view: /views/base.html\n")
            .file("/content/pages/a.yaml", "$order: 1\ntitle: A\nlink: !g.doc /content/pages/b.yaml\n")
            .file("/content/pages/b.yaml", "$order: 2\ntitle: B\n")
            .file("/content/pages/c.yaml", "$order: 3\ntitle: C\n")
            .open()
    }

    #[test]
    fn missing_podspec_is_an_error() {
        let tmp = tempfile::TempDir::new().unwrap();
        assert!(matches!(
            Pod::open(tmp.path(), Env::default()),
            Err(PodError::PodSpec(PodSpecError::Missing))
        ));
    }

    #[test]
    fn documents_are_cached_per_locale() {
        let pod = pod();
        let first = pod.get_doc("/content/pages/a.yaml", None).unwrap();
        let again = pod.get_doc("content/pages//a.yaml", None).unwrap();
        assert!(Arc::ptr_eq(&first, &again));
        let de = pod.get_doc("/content/pages/a.yaml", Some(Locale::parse("de"))).unwrap();
        assert!(!Arc::ptr_eq(&first, &de));
    }

    #[test]
    fn document_outside_collection() {
        let pod = pod();
        assert!(matches!(
            pod.get_doc("/content/loose.yaml", None),
            Err(DocumentError::NoCollection(_))
        ));
    }

    #[test]
    fn loads_record_dependencies() {
        let pod = pod();
        pod.get_doc("/content/pages/a.yaml", None).unwrap();
        let sources = pod.dependencies().sources_of("/content/pages/a.yaml");
        assert!(sources.contains(&"/content/pages/b.yaml".to_string()));
        assert!(sources.contains(&"/content/pages/_blueprint.yaml".to_string()));
    }

    #[test]
    fn invalidation_drops_readers() {
        let pod = pod();
        let a = pod.get_doc("/content/pages/a.yaml", None).unwrap();
        let c = pod.get_doc("/content/pages/c.yaml", None).unwrap();
        pod.storage()
            .write("/content/pages/b.yaml", b"$order: 2\ntitle: B2\n")
            .unwrap();
        pod.invalidate("/content/pages/b.yaml");
        assert!(!Arc::ptr_eq(&a, &pod.get_doc("/content/pages/a.yaml", None).unwrap()));
        assert!(Arc::ptr_eq(&c, &pod.get_doc("/content/pages/c.yaml", None).unwrap()));
        assert_eq!(
            pod.get_doc("/content/pages/b.yaml", None).unwrap().get_str("title"),
            Some("B2")
        );
    }

    #[test]
    fn adjacent_documents_follow_order() {
        let pod = pod();
        let b = pod.get_doc("/content/pages/b.yaml", None).unwrap();
        let (prev, next) = pod.adjacent_docs(&b).unwrap();
        assert_eq!(prev.unwrap().base(), "a");
        assert_eq!(next.unwrap().base(), "c");

        let a = pod.get_doc("/content/pages/a.yaml", None).unwrap();
        assert!(pod.adjacent_docs(&a).unwrap().0.is_none());
    }

    #[test]
    fn hashes_files() {
        let pod = pod();
        pod.storage().write("/static/x.txt", b"abc").unwrap();
        assert_eq!(
            pod.hash_file("/static/x.txt").unwrap(),
            "a9993e364706816aba3e25717850c26c9cd0d89d"
        );
    }

    #[test]
    fn set_env_drops_caches() {
        let mut pod = pod();
        let before = pod.get_doc("/content/pages/a.yaml", None).unwrap();
        pod.set_env(Env::named("prod"));
        assert_eq!(pod.env().name, "prod");
        assert!(!Arc::ptr_eq(&before, &pod.get_doc("/content/pages/a.yaml", None).unwrap()));
    }
}
