//! Shared test utilities for the grow test suite.
//!
//! [`PodBuilder`] writes files into a temporary pod; lookups panic with the
//! available alternatives when they miss, so a failing assertion says what
//! was actually produced.
//!
//! # Usage
//!
//! ```rust
//! use crate::test_helpers::*;
//!
//! let pod = PodBuilder::new()
//!     .file("/podspec.yaml", "{}")
//!     .file("/content/pages/_blueprint.yaml", "$path: /{base}/\n$view: /views/base.html\n")
//!     .file("/content/pages/hi.yaml", "{}")
//!     .file("/views/base.html", "OK")
//!     .open();
//!
//! let outputs = render_all(&pod);
//! assert_eq!(find_rendered(&outputs, "/hi/").text().unwrap(), "OK");
//! ```

use std::ops::Deref;
use std::sync::Arc;
use tempfile::TempDir;

use crate::documents::{Document, DocumentError};
use crate::locales::Locale;
use crate::pod::Pod;
use crate::podspec::Env;
use crate::render::{RenderedDocument, Renderer};
use crate::router::Router;

// =========================================================================
// Pod fixtures
// =========================================================================

/// Builds a pod in a temporary directory, one file at a time.
pub struct PodBuilder {
    tmp: TempDir,
}

impl PodBuilder {
    pub fn new() -> Self {
        Self {
            tmp: TempDir::new().unwrap(),
        }
    }

    /// Write `content` at pod path `path`, replacing any earlier version.
    pub fn file(self, path: &str, content: &str) -> Self {
        let target = self.tmp.path().join(path.trim_start_matches('/'));
        std::fs::create_dir_all(target.parent().unwrap()).unwrap();
        std::fs::write(target, content).unwrap();
        self
    }

    /// A fresh pod over the files written so far.
    pub fn pod(&self) -> Pod {
        Pod::open(self.tmp.path(), Env::default()).unwrap()
    }

    pub fn try_load_doc(&self, path: &str, locale: Option<Locale>) -> Result<Document, DocumentError> {
        let pod = self.pod();
        let doc = pod.get_doc(path, locale)?;
        Ok(Document::clone(&doc))
    }

    pub fn load_doc(&self, path: &str, locale: Option<Locale>) -> Document {
        self.try_load_doc(path, locale)
            .unwrap_or_else(|e| panic!("failed to load '{path}': {e}"))
    }

    /// Open the pod, keeping the temp directory alive alongside it.
    pub fn open(self) -> TestPod {
        let pod = Arc::new(self.pod());
        TestPod { _tmp: self.tmp, pod }
    }
}

/// A pod whose files live in a temp directory removed on drop.
pub struct TestPod {
    _tmp: TempDir,
    pod: Arc<Pod>,
}

impl TestPod {
    /// A handle for the renderer.
    pub fn shared(&self) -> Arc<Pod> {
        Arc::clone(&self.pod)
    }

    pub fn path(&self) -> &std::path::Path {
        self._tmp.path()
    }
}

impl Deref for TestPod {
    type Target = Pod;

    fn deref(&self) -> &Pod {
        &self.pod
    }
}

impl std::ops::DerefMut for TestPod {
    fn deref_mut(&mut self) -> &mut Pod {
        Arc::get_mut(&mut self.pod).expect("pod handle still shared")
    }
}

// =========================================================================
// Lookups: panic with a clear message on miss
// =========================================================================

/// Document bases in list order.
pub fn doc_bases(docs: &[Arc<Document>]) -> Vec<String> {
    docs.iter().map(|d| d.base().to_string()).collect()
}

/// Find a document by base and locale. Panics if not found.
pub fn find_doc<'a>(docs: &'a [Arc<Document>], base: &str, locale: Option<&str>) -> &'a Document {
    docs.iter()
        .find(|d| d.base() == base && d.locale().map(Locale::as_str) == locale)
        .map(|d| d.as_ref())
        .unwrap_or_else(|| {
            let available: Vec<String> = docs
                .iter()
                .map(|d| format!("{}@{:?}", d.base(), d.locale().map(Locale::as_str)))
                .collect();
            panic!("document '{base}' ({locale:?}) not found. Available: {available:?}")
        })
}

/// Build every route of the pod and render it. Panics on render errors.
pub fn render_all(pod: &TestPod) -> Vec<RenderedDocument> {
    let mut router = Router::new(pod);
    router.add_all().unwrap();
    Renderer::new(pod.shared())
        .render_routes(&router)
        .unwrap_or_else(|e| panic!("render failed: {e}"))
}

/// Find a rendered output by serving path. Panics if not found.
pub fn find_rendered<'a>(outputs: &'a [RenderedDocument], path: &str) -> &'a RenderedDocument {
    outputs.iter().find(|r| r.path == path).unwrap_or_else(|| {
        panic!("output '{path}' not found. Available: {:?}", rendered_paths(outputs))
    })
}

/// All serving paths rendered, sorted.
pub fn rendered_paths(outputs: &[RenderedDocument]) -> Vec<String> {
    let mut paths: Vec<String> = outputs.iter().map(|r| r.path.clone()).collect();
    paths.sort();
    paths
}
