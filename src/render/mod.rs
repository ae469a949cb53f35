//! Render coordinator: every route through its controller, in parallel.
//!
//! | Kind | Controller | Body |
//! |------|------------|------|
//! | `doc` | the document's view with `{doc, env, podspec, g}` | text |
//! | `static` | the source file | bytes |
//! | `sitemap` | the configured template, else built-in XML | text |
//! | `error` | the error view with `{error, env, podspec, g}` | text |
//!
//! Templates can call `_` (translate), `static_url`, `g_doc` and `g_docs`.
//! Every file a render reads is recorded in the pod's dependency graph as an
//! edge from the serving path, so a changed file maps back to the routes
//! that need rendering again.
//!
//! A failing route never aborts the batch: failures are collected and
//! returned together as [`RenderErrors`] once every route was attempted.

mod controllers;
pub mod engine;

pub use controllers::{content_type, doc_value};
pub use engine::{EngineError, Helpers, TemplateEngine, TeraEngine};

use crate::cache::{CacheError, SpillStore};
use crate::collections::CollectionError;
use crate::documents::DocumentError;
use crate::indexes::sha1_hex;
use crate::pod::Pod;
use crate::router::{RouteInfo, Router, RouterError};
use crate::storage::StorageError;
use rayon::prelude::*;
use std::borrow::Cow;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum RenderError {
    #[error("{0}")]
    Router(#[from] RouterError),
    #[error("{0}")]
    Document(#[from] DocumentError),
    #[error("{0}")]
    Collection(#[from] CollectionError),
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
    #[error("{0}")]
    Engine(#[from] EngineError),
    #[error("{0} has no view")]
    MissingView(String),
    #[error("Invalid sitemap filter: {0}")]
    Filter(#[from] regex::Error),
    #[error("Spill cache error: {0}")]
    Cache(#[from] CacheError),
    #[error("No route matches {0}")]
    NoRoute(String),
}

impl RenderError {
    /// The template being evaluated when the error occurred.
    pub fn template(&self) -> Option<&str> {
        match self {
            RenderError::Engine(EngineError::Template { name, .. }) => Some(name),
            RenderError::Engine(EngineError::NotFound(name)) => Some(name),
            _ => None,
        }
    }
}

/// One route that failed to render.
#[derive(Debug, Clone, PartialEq)]
pub struct RouteFailure {
    pub path: String,
    pub template: Option<String>,
    pub message: String,
}

impl fmt::Display for RouteFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.template {
            Some(template) => write!(f, "{} ({}): {}", self.path, template, self.message),
            None => write!(f, "{}: {}", self.path, self.message),
        }
    }
}

/// Every failure of a render batch.
#[derive(Error, Debug)]
pub struct RenderErrors {
    pub failures: Vec<RouteFailure>,
}

impl fmt::Display for RenderErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} route(s) failed to render:", self.failures.len())?;
        for failure in &self.failures {
            write!(f, "\n  {}", failure)?;
        }
        Ok(())
    }
}

// ============================================================================
// Rendered output
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
enum Body {
    Inline(Vec<u8>),
    Spilled(PathBuf),
}

/// The output of one route.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderedDocument {
    /// Serving path.
    pub path: String,
    /// SHA-1 of the body, as lowercase hex.
    pub hash: String,
    pub content_type: &'static str,
    pub size: u64,
    body: Body,
}

impl RenderedDocument {
    pub fn new(path: impl Into<String>, bytes: Vec<u8>) -> Self {
        let path = path.into();
        Self {
            hash: sha1_hex(&bytes),
            content_type: content_type(&path),
            size: bytes.len() as u64,
            body: Body::Inline(bytes),
            path,
        }
    }

    fn spill(mut self, store: &SpillStore) -> Result<Self, CacheError> {
        if let Body::Inline(bytes) = &self.body {
            let file = store.put(&self.path, bytes)?;
            self.body = Body::Spilled(file);
        }
        Ok(self)
    }

    pub fn is_spilled(&self) -> bool {
        matches!(self.body, Body::Spilled(_))
    }

    pub fn bytes(&self) -> std::io::Result<Cow<'_, [u8]>> {
        match &self.body {
            Body::Inline(bytes) => Ok(Cow::Borrowed(bytes)),
            Body::Spilled(file) => std::fs::read(file).map(Cow::Owned),
        }
    }

    pub fn text(&self) -> std::io::Result<String> {
        Ok(String::from_utf8_lossy(&self.bytes()?).into_owned())
    }

    /// File path the body is written to: directory-style paths get
    /// `index.html`.
    pub fn output_path(&self) -> String {
        output_path(&self.path)
    }
}

pub fn output_path(serving_path: &str) -> String {
    if serving_path.ends_with('/') {
        format!("{serving_path}index.html")
    } else {
        serving_path.to_string()
    }
}

// ============================================================================
// Renderer
// ============================================================================

pub struct Renderer {
    pod: Arc<Pod>,
    engine: Option<Arc<dyn TemplateEngine>>,
    threads: Option<usize>,
    spill: Option<Arc<SpillStore>>,
}

impl Renderer {
    pub fn new(pod: Arc<Pod>) -> Self {
        Self {
            pod,
            engine: None,
            threads: None,
            spill: None,
        }
    }

    /// Size of the worker pool; the global rayon pool is used otherwise.
    pub fn with_threads(mut self, threads: usize) -> Self {
        self.threads = Some(threads);
        self
    }

    pub fn with_spill(mut self, store: Arc<SpillStore>) -> Self {
        self.spill = Some(store);
        self
    }

    /// Use a preloaded engine instead of compiling the pod's templates.
    pub fn with_engine(mut self, engine: Arc<dyn TemplateEngine>) -> Self {
        self.engine = Some(engine);
        self
    }

    fn engine(&self) -> Result<Arc<dyn TemplateEngine>, RenderError> {
        match &self.engine {
            Some(engine) => Ok(Arc::clone(engine)),
            None => Ok(Arc::new(TeraEngine::load(self.pod.storage())?)),
        }
    }

    fn render_with(
        &self,
        engine: &dyn TemplateEngine,
        path: &str,
        info: &RouteInfo,
    ) -> Result<RenderedDocument, RenderError> {
        let output = controllers::render(&self.pod, engine, path, info)?;
        self.pod.reset_dependencies(path);
        self.pod.record_dependencies(path, &output.sources);

        let rendered = RenderedDocument::new(path, output.bytes);
        match &self.spill {
            Some(store) if !store.admit(rendered.size) => Ok(rendered.spill(store)?),
            _ => Ok(rendered),
        }
    }

    /// Render one route.
    pub fn render_route(&self, path: &str, info: &RouteInfo) -> Result<RenderedDocument, RenderError> {
        let engine = self.engine()?;
        self.render_with(engine.as_ref(), path, info)
    }

    /// Render the route serving `path`.
    pub fn render_path(&self, router: &Router<'_>, path: &str) -> Result<RenderedDocument, RenderError> {
        let info = router
            .resolve(path)
            .ok_or_else(|| RenderError::NoRoute(path.to_string()))?;
        self.render_route(path, &info)
    }

    /// Render every concrete route of `router`. Output is sorted by path.
    pub fn render_routes(&self, router: &Router<'_>) -> Result<Vec<RenderedDocument>, RenderErrors> {
        let engine = self.engine().map_err(|e| RenderErrors {
            failures: vec![RouteFailure {
                path: "/".to_string(),
                template: e.template().map(str::to_string),
                message: e.to_string(),
            }],
        })?;
        let routes = router.concrete_routes();
        log::info!("Rendering {} routes", routes.len());

        let render_all = || -> Vec<Result<RenderedDocument, RouteFailure>> {
            routes
                .par_iter()
                .map(|(path, info)| {
                    self.render_with(engine.as_ref(), path, info)
                        .map_err(|e| RouteFailure {
                            path: path.clone(),
                            template: e.template().map(str::to_string),
                            message: e.to_string(),
                        })
                })
                .collect()
        };
        let results = match self.threads {
            Some(threads) => match rayon::ThreadPoolBuilder::new().num_threads(threads).build() {
                Ok(pool) => pool.install(render_all),
                Err(e) => {
                    log::warn!("Falling back to the global thread pool: {}", e);
                    render_all()
                }
            },
            None => render_all(),
        };

        let mut rendered = Vec::with_capacity(results.len());
        let mut failures = Vec::new();
        for result in results {
            match result {
                Ok(doc) => rendered.push(doc),
                Err(failure) => {
                    log::warn!("Failed to render {}", failure);
                    failures.push(failure);
                }
            }
        }
        if !failures.is_empty() {
            failures.sort_by(|a, b| a.path.cmp(&b.path));
            return Err(RenderErrors { failures });
        }
        rendered.sort_by(|a, b| a.path.cmp(&b.path));
        if let Some(store) = &self.spill {
            log::info!("Rendered output: {}", store.stats());
        }
        Ok(rendered)
    }
}
