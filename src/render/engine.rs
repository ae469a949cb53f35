//! Template engine seam and its tera implementation.
//!
//! Templates are every file under `/views/` and `/partials/`, registered by
//! pod path so `{% extends "/views/base.html" %}` and
//! `{% include "/partials/nav.html" %}` name files the way the rest of the
//! pod does. Sources are rewritten once at load so the gettext-style
//! `_("Hello")` call reads as tera's keyword form `_(text="Hello")`.
//!
//! Each template is checked on its own before the batch is registered. A
//! template that fails to parse, or extends one that is missing or broken,
//! is left out; rendering a view whose closure reaches it fails with the
//! broken template's name while every other view still renders.
//!
//! Functions that depend on the route being rendered (translation locale,
//! dependency recording) are passed per render as [`Helpers`]; the compiled
//! templates are shared and each render works on its own clone, so no lock
//! is held while a template runs.

use crate::storage::{Storage, StorageError};
use regex::Regex;
use serde_json::Value;
use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, LazyLock};
use tera::{Context, Tera};
use thiserror::Error;

pub const TEMPLATE_ROOTS: [&str; 2] = ["/views", "/partials"];

static POSITIONAL_TRANSLATE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(^|[^\w.])_\(\s*("(?:[^"\\]|\\.)*"|'(?:[^'\\]|\\.)*')"#).expect("valid regex")
});

static TEMPLATE_REFERENCE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"\{%-?\s*(extends|include|import)\s+["']([^"']+)["']"#).expect("valid regex")
});

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Template not found: {0}")]
    NotFound(String),
    #[error("{name}: {message}")]
    Template { name: String, message: String },
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
}

/// A function callable from templates.
pub type HelperFn = Arc<dyn Fn(&HashMap<String, Value>) -> Result<Value, String> + Send + Sync>;

/// Named functions registered for one render.
#[derive(Clone, Default)]
pub struct Helpers {
    functions: Vec<(&'static str, HelperFn)>,
}

impl Helpers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<F>(&mut self, name: &'static str, function: F)
    where
        F: Fn(&HashMap<String, Value>) -> Result<Value, String> + Send + Sync + 'static,
    {
        self.functions.push((name, Arc::new(function)));
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.functions.iter().map(|(name, _)| *name).collect()
    }
}

/// What the render stage needs from a template engine.
pub trait TemplateEngine: Send + Sync {
    /// Compile a batch of `(name, source)` templates. Templates may extend
    /// or include each other within the batch.
    fn compile(&mut self, templates: Vec<(String, String)>) -> Result<(), EngineError>;

    fn has_template(&self, name: &str) -> bool;

    /// Render the template `name` against `context`.
    fn render(&self, name: &str, context: &Value, helpers: &Helpers) -> Result<String, EngineError>;

    /// Render an uncompiled source string.
    fn render_source(&self, source: &str, context: &Value, helpers: &Helpers) -> Result<String, EngineError>;

    /// `name` plus every template it extends, includes or imports,
    /// transitively.
    fn template_closure(&self, name: &str) -> Vec<String>;
}

/// Rewrite positional `_("…")` calls to `_(text="…")`.
pub fn preprocess(source: &str) -> String {
    POSITIONAL_TRANSLATE
        .replace_all(source, "${1}_(text=${2}")
        .into_owned()
}

fn error_chain(err: &dyn std::error::Error) -> String {
    let mut parts = vec![err.to_string()];
    let mut source = err.source();
    while let Some(err) = source {
        parts.push(err.to_string());
        source = err.source();
    }
    parts.join(": ")
}

/// Templates named by `{% extends %}` / `{% include %}` / `{% import %}`
/// in `source`, with the keyword.
fn references(source: &str) -> Vec<(&str, &str)> {
    TEMPLATE_REFERENCE
        .captures_iter(source)
        .filter_map(|caps| Some((caps.get(1)?.as_str(), caps.get(2)?.as_str())))
        .collect()
}

/// Parse one template alone, standing in empty parents for what it
/// extends or imports.
fn check_template(name: &str, source: &str) -> Result<(), String> {
    let mut scratch = Tera::default();
    let mut batch: Vec<(&str, &str)> = references(source)
        .into_iter()
        .filter(|(kind, target)| *kind != "include" && *target != name)
        .map(|(_, target)| (target, ""))
        .collect();
    batch.push((name, source));
    scratch
        .add_raw_templates(batch)
        .map_err(|e| error_chain(&e))
}

#[derive(Clone)]
pub struct TeraEngine {
    tera: Tera,
    sources: HashMap<String, String>,
    /// Templates that failed on their own, with the reason.
    broken: HashMap<String, String>,
}

impl Default for TeraEngine {
    fn default() -> Self {
        let mut tera = Tera::default();
        // No autoescaping: views apply `| escape` themselves.
        tera.autoescape_on(vec![]);
        Self {
            tera,
            sources: HashMap::new(),
            broken: HashMap::new(),
        }
    }
}

impl TeraEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Compile every template under the pod's template roots.
    pub fn load(storage: &dyn Storage) -> Result<Self, EngineError> {
        let mut templates = Vec::new();
        for root in TEMPLATE_ROOTS {
            for path in storage.list(root, true)? {
                match storage.read_to_string(&path) {
                    Ok(source) => templates.push((path, source)),
                    Err(StorageError::Encoding(_)) => log::debug!("Skipping binary template {}", path),
                    Err(e) => return Err(e.into()),
                }
            }
        }
        let mut engine = Self::new();
        engine.compile(templates)?;
        log::debug!(
            "Compiled {} templates ({} broken)",
            engine.sources.len(),
            engine.broken.len()
        );
        Ok(engine)
    }

    /// Broken templates and their errors, sorted by name.
    pub fn broken(&self) -> Vec<(&str, &str)> {
        let mut broken: Vec<(&str, &str)> = self
            .broken
            .iter()
            .map(|(name, message)| (name.as_str(), message.as_str()))
            .collect();
        broken.sort();
        broken
    }

    fn broken_in_closure(&self, name: &str) -> Option<EngineError> {
        self.template_closure(name)
            .into_iter()
            .find_map(|template| {
                self.broken.get(&template).map(|message| EngineError::Template {
                    name: template.clone(),
                    message: message.clone(),
                })
            })
    }

    fn instance(&self, helpers: &Helpers) -> Tera {
        let mut tera = self.tera.clone();
        for (name, function) in &helpers.functions {
            let function = Arc::clone(function);
            tera.register_function(name, move |args: &HashMap<String, Value>| {
                function(args).map_err(tera::Error::msg)
            });
        }
        tera
    }
}

fn context_of(name: &str, value: &Value) -> Result<Context, EngineError> {
    Context::from_value(value.clone()).map_err(|e| EngineError::Template {
        name: name.to_string(),
        message: error_chain(&e),
    })
}

impl TemplateEngine for TeraEngine {
    fn compile(&mut self, templates: Vec<(String, String)>) -> Result<(), EngineError> {
        let prepared: Vec<(String, String)> = templates
            .into_iter()
            .map(|(name, source)| (name, preprocess(&source)))
            .collect();

        let mut good: BTreeSet<String> = BTreeSet::new();
        for (name, source) in &prepared {
            match check_template(name, source) {
                Ok(()) => {
                    self.broken.remove(name);
                    good.insert(name.clone());
                }
                Err(message) => {
                    log::warn!("Broken template {}: {}", name, message);
                    self.broken.insert(name.clone(), message);
                }
            }
        }
        self.sources.extend(prepared.iter().cloned());

        // Parents must be registered for a child to be; drop children of
        // missing or left-out parents until the set is stable.
        loop {
            let mut dropped = Vec::new();
            for name in &good {
                let source = self.sources.get(name).map(String::as_str).unwrap_or_default();
                for (kind, target) in references(source) {
                    if kind == "include" || target == name {
                        continue;
                    }
                    let available = good.contains(target)
                        || (self.sources.contains_key(target)
                            && !self.broken.contains_key(target)
                            && !prepared.iter().any(|(n, _)| n == target));
                    if available {
                        continue;
                    }
                    if !self.sources.contains_key(target) {
                        self.broken
                            .insert(name.clone(), format!("Template not found: {}", target));
                    }
                    dropped.push(name.clone());
                    break;
                }
            }
            if dropped.is_empty() {
                break;
            }
            for name in dropped {
                good.remove(&name);
            }
        }

        self.tera
            .add_raw_templates(
                prepared
                    .iter()
                    .filter(|(name, _)| good.contains(name))
                    .map(|(n, s)| (n.as_str(), s.as_str())),
            )
            .map_err(|e| EngineError::Template {
                name: good.iter().next().cloned().unwrap_or_default(),
                message: error_chain(&e),
            })
    }

    fn has_template(&self, name: &str) -> bool {
        self.sources.contains_key(name)
    }

    fn render(&self, name: &str, context: &Value, helpers: &Helpers) -> Result<String, EngineError> {
        if !self.has_template(name) {
            return Err(EngineError::NotFound(name.to_string()));
        }
        if let Some(err) = self.broken_in_closure(name) {
            return Err(err);
        }
        let context = context_of(name, context)?;
        self.instance(helpers)
            .render(name, &context)
            .map_err(|e| EngineError::Template {
                name: name.to_string(),
                message: error_chain(&e),
            })
    }

    fn render_source(&self, source: &str, context: &Value, helpers: &Helpers) -> Result<String, EngineError> {
        let context = context_of("<inline>", context)?;
        self.instance(helpers)
            .render_str(&preprocess(source), &context)
            .map_err(|e| EngineError::Template {
                name: "<inline>".to_string(),
                message: error_chain(&e),
            })
    }

    fn template_closure(&self, name: &str) -> Vec<String> {
        let mut seen = BTreeSet::new();
        let mut queue = vec![name.to_string()];
        while let Some(current) = queue.pop() {
            if !seen.insert(current.clone()) {
                continue;
            }
            if let Some(source) = self.sources.get(&current) {
                for (_, target) in references(source) {
                    queue.push(target.to_string());
                }
            }
        }
        seen.into_iter().collect()
    }
}
