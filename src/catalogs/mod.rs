//! Translation catalogs: extraction, merge, compile, import and lookup.
//!
//! Catalogs live under `/translations`:
//!
//! ```text
//! translations/
//! ├── messages.pot                 # template: every msgid, no translations
//! ├── de/LC_MESSAGES/messages.po   # per-locale translations
//! └── de/LC_MESSAGES/messages.mo   # compiled form read at render time
//! ```
//!
//! The lifecycle is `extract` (sources → template, or → per-locale catalogs
//! in localized mode), `init`/`update` (template → per-locale catalogs,
//! keeping existing translations), `import_translations` (external files →
//! per-locale catalogs), then `compile` (`.po` → `.mo`). Rendering only
//! reads: [`Catalogs::translate`] looks up a compiled table cached on the
//! [`Pod`] and ticks the pod's [`TranslationStats`].
//!
//! Extract, update and import run single-threaded; lookups are lock-free
//! reads of a shared `Arc<Translations>` once a locale is cached.

pub mod catalog;
pub mod extract;
pub mod importers;
pub mod mo;
pub mod po;
pub mod stats;

pub use catalog::{Catalog, Location, Message, DEFAULT_PROJECT_TITLE};
pub use importers::{ImportOptions, ImportSummary};
pub use mo::Translations;
pub use stats::{StatsExport, TranslationStats};

use crate::collections::{self, CollectionError};
use crate::data::{self, DataError};
use crate::dependency::glob_match;
use crate::locales::Locale;
use crate::pod::Pod;
use crate::storage::{self, StorageError};
use extract::Extraction;
use po::{PoError, WriteOptions};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use thiserror::Error;

pub const TRANSLATIONS_ROOT: &str = "/translations";
pub const TEMPLATE_BASENAME: &str = "messages.pot";
pub const CATALOG_BASENAME: &str = "messages.po";
pub const COMPILED_BASENAME: &str = "messages.mo";

const IGNORED_PREFIXES: &[char] = &['.', '_'];

#[derive(Error, Debug)]
pub enum CatalogError {
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
    #[error("Corrupt catalog {path}: {source}")]
    Parse { path: String, source: PoError },
    #[error("Corrupt compiled catalog {path}: {source}")]
    Compiled { path: String, source: mo::MoError },
    #[error("Collection error: {0}")]
    Collection(#[from] CollectionError),
    #[error("Data error: {0}")]
    Data(#[from] DataError),
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
    #[error("Zip error: {0}")]
    Zip(#[from] zip::result::ZipError),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("{0}")]
    Usage(String),
    #[error("Import error: {0}")]
    Import(String),
    #[error("{count} untranslated messages in {locale}")]
    Untranslated { locale: Locale, count: usize },
}

/// Flags for [`Catalogs::extract`]. Unset flags fall back to
/// `localization.extract` in the podspec.
#[derive(Debug, Clone, Default)]
pub struct ExtractOptions {
    pub include_obsolete: Option<bool>,
    pub localized: Option<bool>,
    pub include_header: Option<bool>,
    pub fuzzy: Option<bool>,
    pub locales: Vec<Locale>,
    /// Shell globs limiting which source files are read.
    pub paths: Vec<String>,
    pub audit: bool,
    pub out_path: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ExtractResult {
    /// `(pod_path, string)` for untagged strings, sorted and unique.
    pub untagged: Vec<(String, String)>,
    pub catalogs: Vec<Catalog>,
}

/// Flags for [`Catalogs::update`].
#[derive(Debug, Clone, Default)]
pub struct UpdateOptions {
    pub fuzzy: Option<bool>,
    pub include_header: Option<bool>,
    pub include_obsolete: Option<bool>,
}

/// Options for [`Catalogs::filter`].
#[derive(Debug, Clone, Default)]
pub struct FilterOptions {
    pub locales: Vec<Locale>,
    pub paths: Vec<String>,
    pub localized: bool,
    pub include_header: bool,
    pub out_dir: Option<String>,
    pub out_path: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CompileSummary {
    pub locale: Locale,
    pub translated: usize,
    pub total: usize,
}

/// Resolved extraction flags.
#[derive(Debug, Clone, Copy)]
struct ExtractFlags {
    include_obsolete: bool,
    localized: bool,
    include_header: bool,
    fuzzy: bool,
}

/// The catalogs of one pod, rooted at the directory of a template path.
pub struct Catalogs<'p> {
    pod: &'p Pod,
    template_path: String,
    root: String,
}

impl<'p> Catalogs<'p> {
    pub fn new(pod: &'p Pod) -> Self {
        Self::with_template(pod, &storage::join(TRANSLATIONS_ROOT, TEMPLATE_BASENAME))
    }

    /// Catalogs rooted elsewhere, e.g. an output directory for `diff`.
    pub fn with_template(pod: &'p Pod, template_path: &str) -> Self {
        let template_path = if template_path.ends_with(TEMPLATE_BASENAME) {
            template_path.to_string()
        } else {
            storage::join(template_path, TEMPLATE_BASENAME)
        };
        Self {
            pod,
            root: storage::dirname(&template_path),
            template_path,
        }
    }

    pub fn template_path(&self) -> &str {
        &self.template_path
    }

    pub fn root(&self) -> &str {
        &self.root
    }

    pub fn catalog_path(&self, locale: &Locale) -> String {
        format!("{}/{}/LC_MESSAGES/{}", self.root.trim_end_matches('/'), locale, CATALOG_BASENAME)
    }

    pub fn compiled_path(&self, locale: &Locale) -> String {
        format!("{}/{}/LC_MESSAGES/{}", self.root.trim_end_matches('/'), locale, COMPILED_BASENAME)
    }

    /// The catalog for `locale`; empty when no file exists yet.
    pub fn get(&self, locale: &Locale) -> Result<Catalog, CatalogError> {
        self.load(&self.catalog_path(locale), Some(locale.clone()))
    }

    pub fn get_template(&self) -> Result<Catalog, CatalogError> {
        self.load(&self.template_path, None)
    }

    pub fn exists(&self, locale: &Locale) -> bool {
        self.pod.storage().exists(&self.catalog_path(locale))
    }

    fn load(&self, path: &str, locale: Option<Locale>) -> Result<Catalog, CatalogError> {
        if !self.pod.storage().exists(path) {
            return Ok(Catalog::new(locale));
        }
        let source = self.pod.storage().read_to_string(path)?;
        po::parse(&source, locale).map_err(|source| CatalogError::Parse {
            path: path.to_string(),
            source,
        })
    }

    /// Like `load`, but a corrupt or unreadable catalog is replaced by an
    /// empty one with a warning.
    fn get_or_empty(&self, path: &str, locale: Option<Locale>) -> Catalog {
        self.load(path, locale.clone()).unwrap_or_else(|e| {
            log::warn!("{}; starting from an empty catalog", e);
            Catalog::new(locale)
        })
    }

    /// Write `catalog` to `path` with the project title comment.
    pub fn save(&self, catalog: &mut Catalog, path: &str, include_header: bool) -> Result<(), CatalogError> {
        let title = self
            .pod
            .podspec()
            .project_title()
            .unwrap_or_else(|| DEFAULT_PROJECT_TITLE.to_string());
        catalog.set_project_title(&title);
        let text = po::write(
            catalog,
            WriteOptions {
                include_header,
                include_obsolete: false,
            },
        );
        self.pod.storage().write(path, text.as_bytes())?;
        Ok(())
    }

    /// Locales with a directory under the catalog root, sorted.
    pub fn list_locales(&self) -> Result<Vec<Locale>, CatalogError> {
        let prefix = format!("{}/", self.root.trim_end_matches('/'));
        let mut locales = BTreeSet::new();
        for path in self.pod.storage().list(&self.root, true)? {
            let Some(relative) = path.strip_prefix(&prefix) else {
                continue;
            };
            if let Some((dir, rest)) = relative.split_once('/')
                && !rest.is_empty()
            {
                let locale = Locale::parse(dir);
                if locale.as_str() != dir {
                    log::warn!(
                        "Translation directories are case sensitive (move {} -> {})",
                        dir,
                        locale
                    );
                }
                locales.insert(locale);
            }
        }
        Ok(locales.into_iter().collect())
    }

    fn extract_flags(&self, options: &ExtractOptions) -> ExtractFlags {
        let config = self
            .pod
            .podspec()
            .localization()
            .map(|l| l.extract)
            .unwrap_or_default();
        ExtractFlags {
            include_obsolete: options.include_obsolete.unwrap_or(config.include_obsolete),
            localized: options.localized.unwrap_or(config.localized),
            include_header: options.include_header.unwrap_or(config.include_header),
            fuzzy: options.fuzzy.unwrap_or(config.fuzzy_matching),
        }
    }

    // ========================================================================
    // Template → locale catalogs
    // ========================================================================

    /// Create catalogs for `locales` from the template.
    pub fn init(&self, locales: &[Locale], include_header: Option<bool>) -> Result<(), CatalogError> {
        let flags = self.extract_flags(&ExtractOptions {
            include_header,
            ..Default::default()
        });
        let template = self.get_template()?;
        for locale in locales {
            let mut catalog = Catalog::new(Some(locale.clone()));
            for message in template.messages() {
                let mut message = message.clone();
                message.strings = vec![String::new(); message.strings.len().max(1)];
                catalog.insert(message);
            }
            self.save(&mut catalog, &self.catalog_path(locale), flags.include_header)?;
            log::info!("Created: {}", self.catalog_path(locale));
        }
        Ok(())
    }

    /// Merge the template into each locale catalog, keeping translations.
    pub fn update(&self, locales: &[Locale], options: &UpdateOptions) -> Result<(), CatalogError> {
        let flags = self.extract_flags(&ExtractOptions {
            include_obsolete: options.include_obsolete,
            include_header: options.include_header,
            fuzzy: options.fuzzy,
            ..Default::default()
        });
        let template = self.get_template()?;
        for locale in locales {
            log::info!("Updating: {}", locale);
            if !self.exists(locale) {
                self.init(std::slice::from_ref(locale), Some(flags.include_header))?;
                continue;
            }
            let mut catalog = self.get(locale)?;
            merge_into(&mut catalog, &template, flags.fuzzy, flags.include_obsolete);
            self.save(&mut catalog, &self.catalog_path(locale), flags.include_header)?;
        }
        Ok(())
    }

    // ========================================================================
    // Extraction
    // ========================================================================

    /// Collect messages from every source and save them.
    ///
    /// In localized mode each locale catalog receives the messages of the
    /// documents whose locale set includes it; otherwise the template is
    /// rewritten. Audit mode collects untagged strings and saves nothing.
    pub fn extract(&self, options: &ExtractOptions) -> Result<ExtractResult, CatalogError> {
        let flags = self.extract_flags(options);
        let pod = self.pod;
        let storage = pod.storage();
        let pod_locales = pod.podspec().list_locales();
        let in_paths = |path: &str| {
            options.paths.is_empty()
                || options.paths.iter().any(|p| {
                    glob_match(p.trim_start_matches('/'), path.trim_start_matches('/'))
                })
        };
        let mut extraction = Extraction::new();

        for collection in pod.list_collections()? {
            let blueprint_path = collection.blueprint_path();
            if in_paths(&blueprint_path) {
                log::info!("Extracting: {}", blueprint_path);
                extraction.add_fields(&blueprint_path, collection.raw(), &collection.locales(pod.podspec()));
            }

            let doc_paths = match collection.doc_paths(storage, false) {
                Ok(paths) => paths,
                Err(e) => {
                    log::warn!("Skipping {}: {}", collection.pod_path(), e);
                    continue;
                }
            };
            for path in doc_paths {
                if !in_paths(&path) || !collection.owns(storage, &path) {
                    continue;
                }
                let doc = match pod.get_doc(&path, None) {
                    Ok(doc) => doc,
                    Err(e) => {
                        log::warn!("Skipping {}: {}", path, e);
                        continue;
                    }
                };
                let locales = doc.locales().to_vec();
                log::info!(
                    "Extracting: {} ({} locale{})",
                    doc.pod_path(),
                    locales.len(),
                    if locales.len() == 1 { "" } else { "s" }
                );
                extraction.add_fields(doc.pod_path(), doc.raw_fields(), &[]);
                extraction.add_template(doc.pod_path(), doc.body(), &[]);
                for locale in locales {
                    let variant = match pod.get_doc(doc.pod_path(), Some(locale.clone())) {
                        Ok(variant) => variant,
                        Err(e) => {
                            log::warn!("Skipping {} ({}): {}", doc.pod_path(), locale, e);
                            continue;
                        }
                    };
                    let scope = [locale];
                    extraction.add_fields(doc.pod_path(), variant.raw_fields(), &scope);
                    extraction.add_template(doc.pod_path(), variant.body(), &scope);
                }
            }
        }

        // Data files outside any collection.
        let mut data_paths: Vec<String> = Vec::new();
        for path in storage.list(collections::CONTENT_PATH, true).unwrap_or_default() {
            if collections::nearest_collection_path(storage, &path).is_none() {
                data_paths.push(path);
            }
        }
        data_paths.extend(storage.list("/data", true).unwrap_or_default());
        for path in data_paths {
            if !in_paths(&path) {
                continue;
            }
            if !(path.ends_with(".yaml") || path.ends_with(".yml") || path.ends_with(".csv")) {
                continue;
            }
            log::info!("Extracting: {}", path);
            match read_data_fields(storage, &path) {
                Ok(rows) => {
                    for fields in rows {
                        extraction.add_fields(&path, &fields, &pod_locales);
                    }
                }
                Err(e) => log::warn!("Skipping {}: {}", path, e),
            }
        }

        if !options.audit {
            for dir in ["/views", "/partials"] {
                for path in storage.list(dir, true).unwrap_or_default() {
                    let relative = path.strip_prefix(dir).unwrap_or(&path).trim_start_matches('/');
                    if !in_paths(&path)
                        || relative.starts_with(IGNORED_PREFIXES)
                        || storage::basename(&path).starts_with(IGNORED_PREFIXES)
                    {
                        continue;
                    }
                    if dir == "/partials" && (path.ends_with(".yaml") || path.ends_with(".yml")) {
                        log::info!("Extracting: {}", path);
                        match read_data_fields(storage, &path) {
                            Ok(rows) => {
                                for fields in rows {
                                    extraction.add_fields(&path, &fields, &pod_locales);
                                }
                            }
                            Err(e) => log::warn!("Skipping {}: {}", path, e),
                        }
                        continue;
                    }
                    if dir == "/partials" && !(path.ends_with(".html") || path.ends_with(".htm")) {
                        continue;
                    }
                    log::info!("Extracting: {}", path);
                    match storage.read_to_string(&path) {
                        Ok(source) => extraction.add_template(&path, &source, &pod_locales),
                        Err(e) => log::warn!("Skipping {}: {}", path, e),
                    }
                }
            }
        }

        if in_paths(crate::podspec::PODSPEC_PATH) {
            log::info!("Extracting: {}", crate::podspec::PODSPEC_PATH);
            extraction.add_fields(crate::podspec::PODSPEC_PATH, pod.podspec().raw(), &pod_locales);
        }

        let mut untagged = std::mem::take(&mut extraction.untagged);
        untagged.sort();
        untagged.dedup();

        if flags.localized && options.out_path.is_none() {
            let mut saved = Vec::new();
            for (locale, new_catalog) in extraction.localized {
                if !options.locales.is_empty() && !options.locales.contains(&locale) {
                    continue;
                }
                let mut existing = self.get_or_empty(&self.catalog_path(&locale), Some(locale.clone()));
                merge_into(&mut existing, &new_catalog, flags.fuzzy, flags.include_obsolete);
                if !options.audit {
                    let path = self.catalog_path(&locale);
                    self.save(&mut existing, &path, flags.include_header)?;
                    let total = existing.len();
                    let missing = existing.list_untranslated::<&str>(&[]).len();
                    log::info!("Saved: {} ({}/{})", path, total - missing, total);
                }
                saved.push(existing);
            }
            return Ok(ExtractResult {
                untagged,
                catalogs: saved,
            });
        }

        let mut template = self.get_or_empty(&self.template_path, None);
        merge_into(&mut template, &extraction.unlocalized, flags.fuzzy, flags.include_obsolete);
        if !options.audit {
            let path = options.out_path.clone().unwrap_or_else(|| self.template_path.clone());
            self.save(&mut template, &path, flags.include_header)?;
            log::info!("Saved: {} ({} messages)", path, template.len());
        }
        Ok(ExtractResult {
            untagged,
            catalogs: vec![template],
        })
    }

    // ========================================================================
    // Compile and lookup
    // ========================================================================

    /// Compile every locale catalog to its MO file.
    pub fn compile(&self) -> Result<Vec<CompileSummary>, CatalogError> {
        self.clear_cache();
        let podspec = self.pod.podspec();
        let require = podspec
            .localization()
            .map(|l| l.require_translations)
            .unwrap_or_default();
        let use_fuzzy = podspec
            .get("localization.compile_fuzzy")
            .and_then(Value::as_bool)
            .unwrap_or_default();

        let mut summaries = Vec::new();
        let mut skipped = Vec::new();
        for locale in self.list_locales()? {
            if !self.exists(&locale) {
                skipped.push(locale.to_string());
                continue;
            }
            let catalog = match self.get(&locale) {
                Ok(catalog) => catalog,
                Err(e @ CatalogError::Parse { .. }) => {
                    log::warn!("Skipping: {}", e);
                    continue;
                }
                Err(e) => return Err(e),
            };
            let total = catalog.messages().filter(|m| !m.id.is_empty()).count();
            let translated = catalog
                .messages()
                .filter(|m| !m.id.is_empty() && m.is_translated())
                .count();
            if require && translated < total {
                return Err(CatalogError::Untranslated {
                    locale,
                    count: total - translated,
                });
            }
            log::info!("Compiled: {} ({}/{})", locale, translated, total);

            let path = self.compiled_path(&locale);
            let bytes = mo::write(&catalog, use_fuzzy);
            let unchanged = self.pod.storage().exists(&path)
                && self.pod.storage().read(&path).is_ok_and(|existing| existing == bytes);
            if !unchanged {
                self.pod.storage().write(&path, &bytes)?;
            }
            summaries.push(CompileSummary {
                locale,
                translated,
                total,
            });
        }
        if !skipped.is_empty() {
            skipped.sort();
            log::info!("No translations to compile -> {}", skipped.join(", "));
        }
        Ok(summaries)
    }

    /// The compiled table for `locale`, cached on the pod. Looks for the
    /// full code, then the bare language; an MO file wins over a PO file.
    pub fn translations(&self, locale: &Locale) -> Arc<Translations> {
        if let Some(found) = self.pod.translation_cache().read().ok().and_then(|c| c.get(locale).cloned()) {
            return found;
        }
        let loaded = Arc::new(self.load_translations(locale));
        if let Ok(mut cache) = self.pod.translation_cache().write() {
            cache.insert(locale.clone(), loaded.clone());
        }
        loaded
    }

    fn load_translations(&self, locale: &Locale) -> Translations {
        let storage = self.pod.storage();
        let mut candidates = vec![locale.clone()];
        let language = Locale::parse(locale.language());
        if language != *locale {
            candidates.push(language);
        }
        for candidate in candidates {
            let mo_path = self.compiled_path(&candidate);
            if storage.exists(&mo_path) {
                match storage.read(&mo_path).map(|bytes| Translations::from_mo(&bytes)) {
                    Ok(Ok(translations)) => return translations,
                    Ok(Err(e)) => log::warn!("Corrupt compiled catalog {}: {}", mo_path, e),
                    Err(e) => log::warn!("Unreadable compiled catalog {}: {}", mo_path, e),
                }
            }
            if self.exists(&candidate) {
                match self.get(&candidate) {
                    Ok(catalog) => return Translations::from_catalog(&catalog, false),
                    Err(e) => log::warn!("{}", e),
                }
            }
        }
        Translations::empty()
    }

    /// Translate `msgid` for `locale`, ticking the pod's stats. Returns the
    /// msgid itself when no translation exists.
    pub fn translate(&self, locale: &Locale, msgid: &str, location: Option<&str>) -> String {
        let translations = self.translations(locale);
        let found = translations.gettext(msgid);
        let default_locale = self.pod.podspec().default_locale();
        self.pod
            .stats()
            .tick(msgid, found.is_some(), locale, default_locale.as_ref(), location);
        found.map(str::to_string).unwrap_or_else(|| msgid.to_string())
    }

    pub fn clear_cache(&self) {
        if let Ok(mut cache) = self.pod.translation_cache().write() {
            cache.clear();
        }
    }

    // ========================================================================
    // Filter and diff
    // ========================================================================

    /// Untranslated messages per locale, optionally limited to messages
    /// located in `paths`.
    pub fn list_untranslated(
        &self,
        locales: &[Locale],
        paths: &[String],
    ) -> Result<BTreeMap<Locale, Vec<Message>>, CatalogError> {
        let mut untranslated = BTreeMap::new();
        for locale in locales {
            let catalog = self.get(locale)?;
            let messages: Vec<Message> = catalog
                .list_untranslated(paths)
                .into_iter()
                .cloned()
                .collect();
            untranslated.insert(locale.clone(), messages);
        }
        Ok(untranslated)
    }

    /// Write catalogs holding only untranslated messages: one per locale
    /// under `out_dir` when localized, else one combined file at `out_path`.
    pub fn filter(&self, options: &FilterOptions) -> Result<Vec<Catalog>, CatalogError> {
        if options.localized && options.out_dir.is_none() {
            return Err(CatalogError::Usage(
                "Must specify --out_dir when using --localized in order to generate localized catalogs."
                    .to_string(),
            ));
        }
        if !options.localized && options.out_path.is_none() {
            return Err(CatalogError::Usage(
                "Must specify -o when not using --localized.".to_string(),
            ));
        }

        let mut combined = Catalog::new(None);
        let mut filtered = Vec::new();
        for (locale, missing) in self.list_untranslated(&options.locales, &options.paths)? {
            let total = self.get(&locale)?.len();
            for message in &missing {
                combined.add(message.clone());
            }
            let Some(out_dir) = options.out_dir.as_deref().filter(|_| options.localized) else {
                continue;
            };
            let target = Catalogs::with_template(self.pod, out_dir);
            let mut catalog = Catalog::new(Some(locale.clone()));
            for message in &missing {
                catalog.insert(message.clone());
            }
            let path = target.catalog_path(&locale);
            if catalog.is_empty() {
                log::info!("Skipping: {} (0 missing of {})", path, total);
            } else {
                log::info!("Saving: {} ({} missing of {})", path, missing.len(), total);
                self.save(&mut catalog, &path, options.include_header)?;
            }
            filtered.push(catalog);
        }
        if options.localized {
            return Ok(filtered);
        }

        let out_path = options.out_path.clone().unwrap_or_default();
        self.save(&mut combined, &out_path, options.include_header)?;
        log::info!("Saved: {} ({} messages)", out_path, combined.len());
        Ok(vec![combined])
    }

    /// For each locale here, write the messages missing from `other` into
    /// catalogs under `out_dir`. Returns the count per locale.
    pub fn diff(&self, other: &Catalogs<'_>, out_dir: &str) -> Result<BTreeMap<Locale, usize>, CatalogError> {
        let target = Catalogs::with_template(self.pod, out_dir);
        let mut counts = BTreeMap::new();
        for locale in self.list_locales()? {
            let this = self.get(&locale)?;
            let theirs = other.get(&locale)?;
            let mut diffed = target.get(&locale)?;
            let mut count = 0;
            for message in this.diff(&theirs) {
                diffed.insert(message.clone());
                count += 1;
            }
            self.save(&mut diffed, &target.catalog_path(&locale), false)?;
            if count > 0 {
                log::info!("Found different messages for {} -> {}", locale, count);
                counts.insert(locale, count);
            }
        }
        Ok(counts)
    }
}

/// Merge `source` into `target` and settle obsolete entries: kept as live
/// messages with `include_obsolete`, otherwise dropped.
fn merge_into(target: &mut Catalog, source: &Catalog, fuzzy: bool, include_obsolete: bool) {
    target.update(source, fuzzy);
    if include_obsolete {
        target.merge_obsolete();
    }
    target.clear_obsolete();
}

/// CSV rows as `header → value` objects.
/// Field mappings of a YAML data file, or one mapping per CSV row.
fn read_data_fields(storage: &dyn storage::Storage, path: &str) -> Result<Vec<Value>, CatalogError> {
    if path.ends_with(".csv") {
        let rows = read_csv_rows(&storage.read(path)?)?;
        return Ok(rows.into_iter().map(Value::Object).collect());
    }
    let source = storage.read_to_string(path)?;
    Ok(vec![data::parse_plain(path, &source)?])
}

fn read_csv_rows(bytes: &[u8]) -> Result<Vec<Map<String, Value>>, CatalogError> {
    let mut reader = csv::Reader::from_reader(bytes);
    let headers = reader.headers()?.clone();
    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record?;
        let row = headers
            .iter()
            .zip(record.iter())
            .map(|(k, v)| (k.to_string(), Value::String(v.to_string())))
            .collect();
        rows.push(row);
    }
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::PodBuilder;

    fn pod() -> crate::test_helpers::TestPod {
        PodBuilder::new()
            .file(
                "/podspec.yaml",
                "localization:\n  default_locale: en\n  locales: [de, fr]\ntranslators:\n  project_title: Example\n",
            )
            .file(
                "/content/pages/_blueprint.yaml",
                "$path: /{base}/\n$view: /views/base.html\ntitle@: Pages\n",
            )
            .file("/content/pages/about.yaml", "title@: About us\ntitle@#: Heading\nplain: Untagged text\n")
            .file("/content/pages/news.md", "---\n$localization:\n  locales: [de]\ntitle@: News\n---\n{{ _('Latest') }}\n")
            .file("/data/menu.yaml", "home@: Home\n")
            .file("/views/base.html", "<h1>{{ _(\"Hello\") }}</h1>\n")
            .file("/views/_ignored.html", "{{ _('Ignored') }}")
            .open()
    }

    #[test]
    fn extracts_template_from_all_sources() {
        let pod = pod();
        let result = pod.catalogs().extract(&ExtractOptions::default()).unwrap();
        let template = &result.catalogs[0];
        for id in ["Pages", "About us", "News", "Latest", "Home", "Hello"] {
            assert!(template.contains(id, None), "missing {}", id);
        }
        assert!(!template.contains("Ignored", None));
        assert_eq!(template.get("About us", None).unwrap().auto_comments, vec!["Heading"]);

        let saved = pod.storage().read_to_string("/translations/messages.pot").unwrap();
        assert!(saved.starts_with("# PROJECT TITLE:\n# Example\n"));
        assert!(saved.contains("msgid \"Hello\""));
        assert!(result
            .untagged
            .contains(&("/content/pages/about.yaml".to_string(), "Untagged text".to_string())));
    }

    #[test]
    fn localized_extraction_scopes_document_messages() {
        let pod = pod();
        pod.catalogs()
            .extract(&ExtractOptions {
                localized: Some(true),
                ..Default::default()
            })
            .unwrap();
        let catalogs = pod.catalogs();
        let de = catalogs.get(&Locale::parse("de")).unwrap();
        let fr = catalogs.get(&Locale::parse("fr")).unwrap();
        assert!(de.contains("News", None));
        assert!(!fr.contains("News", None));
        assert!(fr.contains("Hello", None));
        assert!(fr.contains("About us", None));
    }

    #[test]
    fn audit_saves_nothing() {
        let pod = pod();
        let result = pod
            .catalogs()
            .extract(&ExtractOptions {
                audit: true,
                ..Default::default()
            })
            .unwrap();
        assert!(!result.untagged.is_empty());
        assert!(!pod.storage().exists("/translations/messages.pot"));
        assert!(!result.catalogs[0].contains("Hello", None));
    }

    #[test]
    fn update_preserves_translations() {
        let pod = pod();
        let catalogs = pod.catalogs();
        catalogs.extract(&ExtractOptions::default()).unwrap();
        let de = Locale::parse("de");
        catalogs.init(std::slice::from_ref(&de), None).unwrap();

        let mut catalog = catalogs.get(&de).unwrap();
        catalog.get_mut("Hello", None).unwrap().set_string("Hallo");
        catalog.insert(Message::new("Stale", "Alt"));
        catalogs.save(&mut catalog, &catalogs.catalog_path(&de), true).unwrap();

        catalogs.update(std::slice::from_ref(&de), &UpdateOptions::default()).unwrap();
        let updated = catalogs.get(&de).unwrap();
        assert_eq!(updated.get("Hello", None).unwrap().string(), "Hallo");
        assert!(!updated.contains("Stale", None));
        assert!(updated.contains("Latest", None));
    }

    #[test]
    fn compile_and_translate() {
        let pod = pod();
        let catalogs = pod.catalogs();
        let de = Locale::parse("de");
        let mut catalog = Catalog::new(Some(de.clone()));
        catalog.insert(Message::new("Hello", "Hallo"));
        catalog.insert(Message::new("World", ""));
        catalogs.save(&mut catalog, &catalogs.catalog_path(&de), true).unwrap();

        let summaries = catalogs.compile().unwrap();
        assert_eq!(
            summaries,
            vec![CompileSummary {
                locale: de.clone(),
                translated: 1,
                total: 2
            }]
        );
        assert!(pod.storage().exists("/translations/de/LC_MESSAGES/messages.mo"));

        assert_eq!(catalogs.translate(&de, "Hello", None), "Hallo");
        assert_eq!(catalogs.translate(&de, "World", Some("/views/base.html")), "World");
        assert_eq!(catalogs.translate(&Locale::parse("de_AT"), "Hello", None), "Hallo");
        assert_eq!(pod.stats().untranslated()["de"]["World"], 1);
    }

    #[test]
    fn compile_skips_corrupt_catalogs() {
        let pod = PodBuilder::new()
            .file("/podspec.yaml", "localization:\n  locales: [de]\n")
            .file("/translations/de/LC_MESSAGES/messages.po", "msgid \"a\nbroken")
            .open();
        assert!(pod.catalogs().compile().unwrap().is_empty());
    }

    #[test]
    fn require_translations_fails_compile() {
        let pod = PodBuilder::new()
            .file("/podspec.yaml", "localization:\n  locales: [de]\n  require_translations: true\n")
            .file("/translations/de/LC_MESSAGES/messages.po", "msgid \"a\"\nmsgstr \"\"\n")
            .open();
        assert!(matches!(
            pod.catalogs().compile(),
            Err(CatalogError::Untranslated { count: 1, .. })
        ));
    }

    #[test]
    fn filter_requires_destination() {
        let pod = pod();
        let error = pod
            .catalogs()
            .filter(&FilterOptions {
                localized: true,
                ..Default::default()
            })
            .unwrap_err();
        assert!(matches!(error, CatalogError::Usage(_)));
    }

    #[test]
    fn filter_writes_untranslated_subset() {
        let pod = pod();
        let catalogs = pod.catalogs();
        let de = Locale::parse("de");
        let mut catalog = Catalog::new(Some(de.clone()));
        catalog.insert(Message::new("Hello", "Hallo"));
        catalog.insert(Message::new("World", "").with_location("/views/base.html", None));
        catalogs.save(&mut catalog, &catalogs.catalog_path(&de), true).unwrap();

        let filtered = catalogs
            .filter(&FilterOptions {
                locales: vec![de.clone()],
                out_path: Some("/out/missing.po".to_string()),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(filtered[0].len(), 1);
        let text = pod.storage().read_to_string("/out/missing.po").unwrap();
        assert!(text.contains("msgid \"World\""));
        assert!(!text.contains("Hello"));
    }

    #[test]
    fn diff_writes_missing_messages() {
        let pod = pod();
        let catalogs = pod.catalogs();
        let other = Catalogs::with_template(&pod, "/other");
        let de = Locale::parse("de");

        let mut ours = Catalog::new(Some(de.clone()));
        ours.insert(Message::new("A", "Ae"));
        ours.insert(Message::new("B", "Be"));
        catalogs.save(&mut ours, &catalogs.catalog_path(&de), true).unwrap();
        let mut theirs = Catalog::new(Some(de.clone()));
        theirs.insert(Message::new("A", ""));
        other.save(&mut theirs, &other.catalog_path(&de), true).unwrap();

        let counts = catalogs.diff(&other, "/diffed").unwrap();
        assert_eq!(counts[&de], 1);
        let diffed = Catalogs::with_template(&pod, "/diffed").get(&de).unwrap();
        assert!(diffed.contains("B", None));
        assert!(!diffed.contains("A", None));
    }

    #[test]
    fn lists_locale_directories() {
        let pod = PodBuilder::new()
            .file("/podspec.yaml", "")
            .file("/translations/messages.pot", "")
            .file("/translations/fr/LC_MESSAGES/messages.po", "")
            .file("/translations/de/LC_MESSAGES/messages.po", "")
            .open();
        assert_eq!(
            pod.catalogs().list_locales().unwrap(),
            vec![Locale::parse("de"), Locale::parse("fr")]
        );
    }

    #[test]
    fn extraction_skips_unreadable_documents() {
        let pod = PodBuilder::new()
            .file("/podspec.yaml", "")
            .file("/content/pages/_blueprint.yaml", "$path: /{base}/\n")
            .file("/content/pages/good.yaml", "title@: Hello\n")
            .file("/content/pages/bad.md", "---\na: 1\n---\nb\n---\nc\n")
            .file("/data/broken.yaml", "key@: [unclosed\n")
            .file("/data/menu.yaml", "home@: Home\n")
            .open();
        let result = pod.catalogs().extract(&ExtractOptions::default()).unwrap();
        let template = &result.catalogs[0];
        assert!(template.contains("Hello", None));
        assert!(template.contains("Home", None));
    }

    #[test]
    fn corrupt_template_is_replaced_on_extract() {
        let pod = PodBuilder::new()
            .file("/podspec.yaml", "")
            .file("/content/pages/_blueprint.yaml", "$path: /{base}/\n")
            .file("/content/pages/good.yaml", "title@: Hello\n")
            .file("/translations/messages.pot", "msgid \"unterminated\n")
            .open();
        let result = pod.catalogs().extract(&ExtractOptions::default()).unwrap();
        assert!(result.catalogs[0].contains("Hello", None));
        let saved = pod.storage().read_to_string("/translations/messages.pot").unwrap();
        assert!(saved.contains("msgid \"Hello\""));
    }

    #[test]
    fn corrupt_locale_catalog_is_replaced_on_localized_extract() {
        let pod = PodBuilder::new()
            .file("/podspec.yaml", "localization:\n  default_locale: en\n  locales: [de]\n")
            .file("/content/pages/_blueprint.yaml", "$path: /{base}/\n")
            .file("/content/pages/good.yaml", "title@: Hello\n")
            .file("/translations/de/LC_MESSAGES/messages.po", "msgid \"unterminated\n")
            .open();
        let result = pod
            .catalogs()
            .extract(&ExtractOptions {
                localized: Some(true),
                ..Default::default()
            })
            .unwrap();
        assert!(result.catalogs.iter().any(|c| c.contains("Hello", None)));
        assert!(pod.catalogs().get(&Locale::parse("de")).unwrap().contains("Hello", None));
    }

    #[test]
    fn corrupt_compiled_catalog_falls_back_to_po() {
        let pod = PodBuilder::new()
            .file("/podspec.yaml", "localization:\n  default_locale: en\n  locales: [de]\n")
            .file("/translations/de/LC_MESSAGES/messages.po", "msgid \"Hello\"\nmsgstr \"Hallo\"\n")
            .open();
        let mut header = Vec::new();
        for word in [0x950412de_u32, 0, u32::MAX, 28, 28] {
            header.extend_from_slice(&word.to_le_bytes());
        }
        pod.storage()
            .write("/translations/de/LC_MESSAGES/messages.mo", &header)
            .unwrap();
        assert_eq!(pod.catalogs().translate(&Locale::parse("de"), "Hello", None), "Hallo");
    }
}
