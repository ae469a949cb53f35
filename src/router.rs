//! Route assembly: collections, static directories, and pod-level routes.
//!
//! The router walks the pod and fills a [`Routes`] store with one entry per
//! serving path:
//!
//! | Source | Kind | Path |
//! |--------|------|------|
//! | servable documents | `doc` | formatted `$path` / `$localization.path` |
//! | files under `static_dirs` | `static` | `serve_at` + relative path, fingerprinted on request |
//! | `error_routes` | `error` | `/{key}.html` (`default` → `/404.html`) |
//! | `sitemap` | `sitemap` | `sitemap.path`, else `{root}/sitemap.xml` |
//!
//! In [`RouteMode::Concrete`] every locale variant gets its own path. In
//! [`RouteMode::Pattern`] a localized path pattern containing `{locale}` is
//! added once as `/:locale/...` with the allowed locale names as options;
//! [`Router::concrete_routes`] expands those back into concrete paths.
//!
//! Two routes claiming the same path fail the build with
//! [`RouteError::PathConflict`], whose message names both routes.

use crate::collections::{CollectionError, ListDocs};
use crate::documents::{Document, DocumentError};
use crate::locales::Locale;
use crate::path_filter::PathFilter;
use crate::path_format::{self, PathFormat, PathFormatError};
use crate::pod::Pod;
use crate::podspec::{PodSpecError, SitemapConfig, StaticDirConfig};
use crate::routes::{RouteError, RouteOptions, Routes};
use crate::storage::StorageError;
use regex::{Regex, RegexBuilder};
use serde::Serialize;
use std::collections::{BTreeSet, HashSet};
use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, LazyLock};
use thiserror::Error;

static FINGERPRINT: LazyLock<Regex> = LazyLock::new(|| {
    RegexBuilder::new(r"(.*)(-[a-f0-9]{40})((\.min|)[\.][a-z0-9]{1,5})$")
        .case_insensitive(true)
        .build()
        .expect("valid regex")
});

#[derive(Error, Debug)]
pub enum RouterError {
    #[error("{0}")]
    Route(#[from] RouteError),
    #[error("{0}")]
    Document(#[from] DocumentError),
    #[error("{0}")]
    Collection(#[from] CollectionError),
    #[error("{0}")]
    PathFormat(#[from] PathFormatError),
    #[error("{0}")]
    PodSpec(#[from] PodSpecError),
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
    #[error("{0} is not found in any static file configuration in the podspec.")]
    MissingStaticConfig(String),
    #[error("Invalid route filter pattern: {0}")]
    Filter(#[from] regex::Error),
}

// ============================================================================
// Route info
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RouteKind {
    Doc,
    Static,
    Sitemap,
    Error,
}

impl RouteKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RouteKind::Doc => "doc",
            RouteKind::Static => "static",
            RouteKind::Sitemap => "sitemap",
            RouteKind::Error => "error",
        }
    }
}

impl fmt::Display for RouteKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RouteKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "doc" => Ok(RouteKind::Doc),
            "static" => Ok(RouteKind::Static),
            "sitemap" => Ok(RouteKind::Sitemap),
            "error" => Ok(RouteKind::Error),
            other => Err(format!("unknown route kind: {other}")),
        }
    }
}

/// What a route serves.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum RouteInfo {
    /// A document variant. `locale` is `None` for the default variant, or
    /// for a pattern route whose locale comes from the `:locale` parameter.
    Doc {
        pod_path: String,
        locale: Option<Locale>,
        collection_path: String,
    },
    Static {
        pod_path: String,
        locale: Option<Locale>,
        fingerprinted: bool,
    },
    Sitemap(SitemapConfig),
    Error { key: String, view: String },
}

impl RouteInfo {
    pub fn kind(&self) -> RouteKind {
        match self {
            RouteInfo::Doc { .. } => RouteKind::Doc,
            RouteInfo::Static { .. } => RouteKind::Static,
            RouteInfo::Sitemap(_) => RouteKind::Sitemap,
            RouteInfo::Error { .. } => RouteKind::Error,
        }
    }

    pub fn pod_path(&self) -> Option<&str> {
        match self {
            RouteInfo::Doc { pod_path, .. } | RouteInfo::Static { pod_path, .. } => Some(pod_path),
            RouteInfo::Error { view, .. } => Some(view),
            RouteInfo::Sitemap(_) => None,
        }
    }

    pub fn locale(&self) -> Option<&Locale> {
        match self {
            RouteInfo::Doc { locale, .. } | RouteInfo::Static { locale, .. } => locale.as_ref(),
            _ => None,
        }
    }

    pub fn collection_path(&self) -> Option<&str> {
        match self {
            RouteInfo::Doc { collection_path, .. } => Some(collection_path),
            _ => None,
        }
    }

    fn with_locale(&self, new_locale: Locale) -> Self {
        let mut info = self.clone();
        if let RouteInfo::Doc { locale, .. } | RouteInfo::Static { locale, .. } = &mut info {
            *locale = Some(new_locale);
        }
        info
    }
}

impl fmt::Display for RouteInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RouteInfo::Doc { pod_path, locale, .. } | RouteInfo::Static { pod_path, locale, .. } => {
                write!(f, "{} {}", self.kind(), pod_path)?;
                if let Some(locale) = locale {
                    write!(f, " ({locale})")?;
                }
                Ok(())
            }
            RouteInfo::Sitemap(config) => {
                write!(f, "sitemap {}", config.path.as_deref().unwrap_or_default())
            }
            RouteInfo::Error { key, view } => write!(f, "error {key} {view}"),
        }
    }
}

// ============================================================================
// Fingerprints
// ============================================================================

/// Insert `fingerprint` before the extension, keeping `.min.<ext>` together.
///
/// ```text
/// /static/app.js      → /static/app-<fp>.js
/// /static/app.min.js  → /static/app-<fp>.min.js
/// ```
pub fn apply_fingerprint(path: &str, fingerprint: &str) -> String {
    let name_start = path.rfind('/').map_or(0, |i| i + 1);
    let (base, ext) = match path[name_start..].rfind('.') {
        Some(dot) if dot > 0 => path.split_at(name_start + dot),
        _ => (path, ""),
    };
    match base.strip_suffix(".min") {
        Some(base) => format!("{base}-{fingerprint}.min{ext}"),
        None => format!("{base}-{fingerprint}{ext}"),
    }
}

/// Remove a fingerprint added by [`apply_fingerprint`].
pub fn strip_fingerprint(path: &str) -> String {
    FINGERPRINT.replace(path, "$1$3").into_owned()
}

// ============================================================================
// Filters
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FilterType {
    #[default]
    Whitelist,
    Blacklist,
}

/// Criteria for [`Router::filter`]. A route matches when any criterion
/// does; whitelists keep matching routes, blacklists drop them.
#[derive(Debug, Clone, Default)]
pub struct RouteFilter {
    pub filter_type: FilterType,
    pub collection_paths: Vec<String>,
    /// Regular expressions matched at the start of the serving path.
    pub paths: Vec<String>,
    /// Locale codes; `None` matches routes without a locale.
    pub locales: Vec<String>,
    pub kinds: Vec<RouteKind>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RouteMode {
    #[default]
    Concrete,
    Pattern,
}

// ============================================================================
// Router
// ============================================================================

pub struct Router<'p> {
    pod: &'p Pod,
    routes: Routes<RouteInfo>,
    path_filter: PathFilter,
}

impl<'p> Router<'p> {
    pub fn new(pod: &'p Pod) -> Self {
        Self {
            pod,
            routes: Routes::new(),
            path_filter: PathFilter::default(),
        }
    }

    pub fn with_path_filter(mut self, path_filter: PathFilter) -> Self {
        self.path_filter = path_filter;
        self
    }

    pub fn pod(&self) -> &'p Pod {
        self.pod
    }

    pub fn routes(&self) -> &Routes<RouteInfo> {
        &self.routes
    }

    fn path_format(&self) -> PathFormat<'p> {
        PathFormat::new(self.pod.podspec(), self.pod.registry())
    }

    fn add(&mut self, path: &str, info: RouteInfo, options: Option<RouteOptions>) -> Result<(), RouterError> {
        log::debug!("Route {} -> {}", path, info);
        self.routes.add(path, info, options)?;
        Ok(())
    }

    /// Add every document, static file, and pod-level route.
    pub fn add_all(&mut self) -> Result<(), RouterError> {
        self.add_all_with(RouteMode::Concrete)
    }

    pub fn add_all_with(&mut self, mode: RouteMode) -> Result<(), RouterError> {
        self.add_all_docs(mode)?;
        self.add_all_static()?;
        self.add_all_other()
    }

    pub fn add_all_docs(&mut self, mode: RouteMode) -> Result<(), RouterError> {
        let mut skipped = 0;
        for collection in self.pod.list_collections()? {
            let docs = match mode {
                RouteMode::Concrete => collection.list_servable_documents(self.pod)?,
                RouteMode::Pattern => collection
                    .list_docs(self.pod, &ListDocs::default())?
                    .into_iter()
                    .filter(|d| collection.owns(self.pod.storage(), d.pod_path()))
                    .collect(),
            };
            for doc in docs {
                let added = match mode {
                    RouteMode::Concrete => self.add_doc(&doc)?,
                    RouteMode::Pattern => self.add_doc_pattern(&doc)?,
                };
                if !added {
                    skipped += 1;
                }
            }
        }
        if skipped > 0 {
            log::info!("Ignored {} documents.", skipped);
        }
        Ok(())
    }

    /// Add one document variant at its serving path. Returns false when the
    /// document has no serving path or the path filter rejects it.
    pub fn add_doc(&mut self, doc: &Document) -> Result<bool, RouterError> {
        if !doc.has_serving_path() {
            return Ok(false);
        }
        let path = serving_path(self.pod, doc)?;
        if !self.path_filter.is_valid(&path) {
            return Ok(false);
        }
        let info = RouteInfo::Doc {
            pod_path: doc.pod_path().to_string(),
            locale: doc.locale().cloned(),
            collection_path: doc.collection().pod_path().to_string(),
        };
        self.add(&path, info, None)?;
        Ok(true)
    }

    fn add_doc_pattern(&mut self, doc: &Arc<Document>) -> Result<bool, RouterError> {
        let added = self.add_doc(doc)?;
        if doc.base_pod_path() != doc.pod_path() {
            return Ok(added);
        }
        let default_locale = doc.default_locale().cloned();
        let locales: Vec<Locale> = doc
            .locales()
            .iter()
            .filter(|l| Some(*l) != default_locale.as_ref())
            .cloned()
            .collect();
        let localized = doc.path_format_localized();
        match localized {
            Some(pattern) if pattern.contains("{locale}") && !locales.is_empty() => {
                let path = self.path_format().format_doc_pattern(doc, &pattern, None);
                let names = locales
                    .iter()
                    .map(|l| self.pod.registry().serving_name(l))
                    .collect();
                let info = RouteInfo::Doc {
                    pod_path: doc.pod_path().to_string(),
                    locale: None,
                    collection_path: doc.collection().pod_path().to_string(),
                };
                self.add(&path, info, Some(RouteOptions::from([("locale".to_string(), names)])))?;
                Ok(true)
            }
            _ => {
                let mut any = added;
                for locale in locales {
                    let variant = self.pod.get_doc(&doc.base_pod_path(), Some(locale))?;
                    any |= self.add_doc(&variant)?;
                }
                Ok(any)
            }
        }
    }

    /// One route per file in each configured static directory, plus the
    /// localized variants of localized directories.
    pub fn add_all_static(&mut self) -> Result<(), RouterError> {
        let default_locale = self.pod.podspec().default_locale();
        let mut skipped = 0;
        for config in self.pod.podspec().static_dirs()? {
            let source_dir = config.static_dir.trim_end_matches('/');
            for file in self.pod.storage().list(source_dir, true)? {
                let relative = &file[source_dir.len()..];
                let path = static_path(self.pod, &config, relative, None, &file)?;
                if !self.path_filter.is_valid(&path) {
                    skipped += 1;
                    continue;
                }
                let info = RouteInfo::Static {
                    pod_path: file.clone(),
                    locale: None,
                    fingerprinted: config.fingerprinted,
                };
                self.add(&path, info, None)?;

                let Some(localization) = &config.localization else {
                    continue;
                };
                for locale in self.pod.list_locales() {
                    if Some(&locale) == default_locale.as_ref() {
                        continue;
                    }
                    let source = localized_source(self.pod, &localization.static_dir, relative, &locale)
                        .unwrap_or_else(|| file.clone());
                    let path = static_path(self.pod, &config, relative, Some(&locale), &source)?;
                    let info = RouteInfo::Static {
                        pod_path: source,
                        locale: Some(locale),
                        fingerprinted: config.fingerprinted,
                    };
                    self.add(&path, info, None)?;
                }
            }
        }
        if skipped > 0 {
            log::info!("Ignored {} static files.", skipped);
        }
        Ok(())
    }

    /// Error pages and the sitemap.
    pub fn add_all_other(&mut self) -> Result<(), RouterError> {
        for (key, view) in self.pod.podspec().error_routes() {
            let key = if key == "default" { "404".to_string() } else { key };
            let path = format!("/{key}.html");
            self.add(&path, RouteInfo::Error { key, view }, None)?;
        }

        if let Some(mut sitemap) = self.pod.podspec().sitemap()? {
            let default_path =
                path_format::strip_double_slash(&format!("{}/sitemap.xml", self.pod.podspec().root()));
            let path = self
                .path_format()
                .format_pod(sitemap.path.as_deref().unwrap_or(&default_path));
            sitemap.path = Some(path.clone());
            self.add(&path, RouteInfo::Sitemap(sitemap), None)?;
        }
        Ok(())
    }

    /// Keep or drop routes by collection, path, locale, or kind.
    pub fn filter(&mut self, filter: &RouteFilter) -> Result<usize, RouterError> {
        let patterns = filter
            .paths
            .iter()
            .map(|p| Regex::new(&format!("^(?:{p})")))
            .collect::<Result<Vec<_>, _>>()?;
        let default_locale = self.pod.podspec().default_locale();
        let matches = |path: &str, info: &RouteInfo| -> bool {
            if let Some(collection) = info.collection_path()
                && filter.collection_paths.iter().any(|c| c.trim_end_matches('/') == collection)
            {
                return true;
            }
            if patterns.iter().any(|re| re.is_match(path)) {
                return true;
            }
            if matches!(info.kind(), RouteKind::Doc | RouteKind::Static) {
                let locale = info.locale().or(default_locale.as_ref());
                let hit = match locale {
                    Some(locale) => filter.locales.iter().any(|l| Locale::parse(l) == *locale),
                    None => filter.locales.iter().any(|l| l == "None"),
                };
                if hit {
                    return true;
                }
            }
            filter.kinds.contains(&info.kind())
        };
        let count = match filter.filter_type {
            FilterType::Whitelist => self.routes.filter(|path, info| matches(path, info)),
            FilterType::Blacklist => self.routes.filter(|path, info| !matches(path, info)),
        };
        if count > 0 {
            let label = match filter.filter_type {
                FilterType::Whitelist => "Whitelist",
                FilterType::Blacklist => "Blacklist",
            };
            log::info!("{} filtered out {} routes.", label, count);
        }
        Ok(count)
    }

    /// Keep only routes reading one of `changed` (directly or through the
    /// dependency graph).
    pub fn filter_changed<S: AsRef<str>>(&mut self, changed: &[S]) -> usize {
        let mut affected: HashSet<String> = self.pod.dependencies().affected(changed).into_iter().collect();
        affected.extend(changed.iter().map(|c| c.as_ref().to_string()));
        self.routes.filter(|path, info| {
            affected.contains(path) || info.pod_path().is_some_and(|p| affected.contains(p))
        })
    }

    /// Keep shard `current` (1-based) of `count`, balanced per route kind.
    pub fn shard(&mut self, count: usize, current: usize) -> Result<(), RouterError> {
        self.routes.shard(count, current, |info| info.kind().to_string())?;
        Ok(())
    }

    /// Switch to the flat store once every path is concrete.
    pub fn use_simple(&mut self) -> Result<(), RouterError> {
        self.routes = self.routes.to_simple()?;
        Ok(())
    }

    /// Remove the routes of `remove` and add those of `add`.
    pub fn reconcile_documents(
        &mut self,
        remove: &[Arc<Document>],
        add: &[Arc<Document>],
    ) -> Result<(), RouterError> {
        for doc in remove {
            if doc.has_serving_path() {
                self.routes.remove(&serving_path(self.pod, doc)?);
            }
        }
        for doc in add {
            self.add_doc(doc)?;
        }
        Ok(())
    }

    /// Every route as a concrete `(path, info)` pair; pattern routes expand
    /// over their `:locale` options.
    pub fn concrete_routes(&self) -> Vec<(String, RouteInfo)> {
        let mut out = Vec::new();
        for (path, info, options) in self.routes.nodes() {
            if !path.contains(':') && !path.contains('*') {
                out.push((path, info));
                continue;
            }
            let Some(names) = options.as_ref().and_then(|o| o.get("locale")) else {
                log::debug!("Skipping unexpandable route {}", path);
                continue;
            };
            for name in names {
                let locale = self
                    .pod
                    .registry()
                    .locale_of_alias(name)
                    .cloned()
                    .unwrap_or_else(|| Locale::parse(name));
                out.push((path.replace(":locale", name), info.with_locale(locale)));
            }
        }
        out
    }

    /// The route serving `path`, with the locale bound by a `:locale`
    /// parameter applied.
    pub fn resolve(&self, path: &str) -> Option<RouteInfo> {
        let matched = self.routes.matches(path)?;
        match matched.params.get("locale") {
            Some(name) => {
                let locale = self
                    .pod
                    .registry()
                    .locale_of_alias(name)
                    .cloned()
                    .unwrap_or_else(|| Locale::parse(name));
                Some(matched.value.with_locale(locale))
            }
            None => Some(matched.value),
        }
    }
}

// ============================================================================
// Serving paths
// ============================================================================

/// Concrete serving path of a document variant.
pub fn serving_path(pod: &Pod, doc: &Document) -> Result<String, RouterError> {
    let pattern = doc.path_format().unwrap_or_default();
    let parent = match doc.parent_path() {
        Some(parent) => Some(pod.get_doc(parent, doc.locale().cloned())?),
        None => None,
    };
    let path = PathFormat::new(pod.podspec(), pod.registry()).format_doc(
        doc,
        &pattern,
        parent.as_deref(),
        None,
        true,
    )?;
    Ok(path)
}

/// Serving paths of every locale variant of `doc`, keyed by locale.
pub fn localized_serving_paths(pod: &Pod, doc: &Document) -> Result<Vec<(Locale, String)>, RouterError> {
    let mut paths = Vec::new();
    if doc.base_pod_path() != doc.pod_path() {
        if let Some(locale) = doc.locale()
            && doc.has_serving_path()
        {
            paths.push((locale.clone(), serving_path(pod, doc)?));
        }
        return Ok(paths);
    }
    for locale in doc.locales() {
        let variant = pod.get_doc(&doc.base_pod_path(), Some(locale.clone()))?;
        if variant.has_serving_path() {
            paths.push((locale.clone(), serving_path(pod, &variant)?));
        }
    }
    Ok(paths)
}

fn localized_source(pod: &Pod, dir_pattern: &str, relative: &str, locale: &Locale) -> Option<String> {
    let dir = dir_pattern.replace("{locale}", locale.as_str());
    let source = format!("{}{}", dir.trim_end_matches('/'), relative);
    pod.storage().exists(&source).then_some(source)
}

fn static_path(
    pod: &Pod,
    config: &StaticDirConfig,
    relative: &str,
    locale: Option<&Locale>,
    source: &str,
) -> Result<String, RouterError> {
    let serve_at = match (locale, &config.localization) {
        (Some(_), Some(localization)) => &localization.serve_at,
        _ => &config.serve_at,
    };
    let pattern = format!("{}{}", serve_at.trim_end_matches('/'), relative);
    let path = PathFormat::new(pod.podspec(), pod.registry()).format_static(&pattern, locale);
    if config.fingerprinted {
        return Ok(apply_fingerprint(&path, &pod.hash_file(source)?));
    }
    Ok(path)
}

/// The static directory config containing `pod_path`.
pub fn static_config_for_pod_path(pod: &Pod, pod_path: &str) -> Result<StaticDirConfig, RouterError> {
    for config in pod.podspec().static_dirs()? {
        if pod_path.starts_with(&config.static_dir) {
            return Ok(config);
        }
        if let Some(localization) = &config.localization {
            let prefix = localization.static_dir.split("{locale}").next().unwrap_or_default();
            if !prefix.is_empty() && pod_path.starts_with(prefix) {
                return Ok(config);
            }
        }
    }
    Err(RouterError::MissingStaticConfig(pod_path.to_string()))
}

/// The static directory config serving `serving_path`.
pub fn static_config_for_serving_path(pod: &Pod, serving_path: &str) -> Result<StaticDirConfig, RouterError> {
    let format = PathFormat::new(pod.podspec(), pod.registry());
    for config in pod.podspec().static_dirs()? {
        if serving_path.starts_with(&format.format_pod(&config.serve_at)) {
            return Ok(config);
        }
        if let Some(localization) = &config.localization {
            let prefix = localization.serve_at.split("{locale}").next().unwrap_or_default();
            if !prefix.is_empty() && serving_path.starts_with(prefix) {
                return Ok(config);
            }
        }
    }
    Err(RouterError::MissingStaticConfig(serving_path.to_string()))
}

/// Serving path of the static file at `pod_path`, localized when the
/// directory has a localized variant for `locale`.
pub fn static_url(pod: &Pod, pod_path: &str, locale: Option<&Locale>) -> Result<String, RouterError> {
    let config = static_config_for_pod_path(pod, pod_path)?;
    let source_dir = config.static_dir.trim_end_matches('/');
    let relative = pod_path.strip_prefix(source_dir).unwrap_or(pod_path);
    let default_locale = pod.podspec().default_locale();
    let locale = locale.filter(|l| Some(*l) != default_locale.as_ref() && config.localization.is_some());
    let source = match (locale, &config.localization) {
        (Some(locale), Some(localization)) => {
            localized_source(pod, &localization.static_dir, relative, locale)
                .unwrap_or_else(|| pod_path.to_string())
        }
        _ => pod_path.to_string(),
    };
    static_path(pod, &config, relative, locale, &source)
}

/// Distinct collection paths among the doc routes.
pub fn routed_collections(routes: &Routes<RouteInfo>) -> BTreeSet<String> {
    routes
        .nodes()
        .into_iter()
        .filter_map(|(_, info, _)| info.collection_path().map(str::to_string))
        .collect()
}
