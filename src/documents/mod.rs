//! Content documents: parsing, locale inheritance, and accessors.
//!
//! A document is a file under `/content/` owned by a [`Collection`]. Its
//! pod path may carry a locale suffix (`about@de.yaml`); files that share a
//! base form an inheritance chain, merged from most general to most
//! specific:
//!
//! ```text
//! about.yaml          ← base (default locale)
//! about@de.yaml       ← overrides base for de and de_*
//! about@de_AT.yaml    ← overrides both for de_AT
//! ```
//!
//! The merged front matter is laid over the collection blueprint's user
//! fields (the document wins) and then untagged for the document's locale.
//!
//! # Locale
//!
//! `locale` is `None` for the default variant. The default is resolved late
//! through [`Document::effective_locale`], so a document loaded without a
//! locale always follows whatever `default_locale` the podspec currently
//! names. An explicit `$locale` field wins over the filename suffix, which
//! wins over the requested locale.

pub mod front_matter;

use crate::collections::Collection;
use crate::data::{self, DataError};
use crate::locales::Locale;
use crate::podspec::PodSpec;
use crate::storage::{self, Storage, StorageError};
use crate::untag;
use front_matter::DocumentFormat;
use pulldown_cmark::{Options, Parser, html};
use regex::Regex;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::sync::{Arc, LazyLock};
use thiserror::Error;

static PATH_LOCALE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"@([^-_@]+)([-_]?)([^.@]*)(\.[^.]+)$").expect("valid regex")
});

#[derive(Error, Debug)]
pub enum DocumentError {
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
    #[error("{0}")]
    Data(#[from] DataError),
    #[error(
        "Document contains too many front matter blocks: {0}. Remove superfluous `---` separators."
    )]
    BadFormat(String),
    #[error("Document not found: {0}")]
    NotFound(String),
    #[error("Document {0} is not inside a collection")]
    NoCollection(String),
}

/// A pod path split into directory, base, locale suffix, and extension.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalePath {
    pub dir: String,
    pub base: String,
    pub ext: String,
    pub locale: Option<Locale>,
}

impl LocalePath {
    pub fn parse(pod_path: &str) -> Self {
        let dir = storage::dirname(pod_path);
        let name = storage::basename(pod_path);
        if let Some(caps) = PATH_LOCALE.captures(name) {
            let whole = caps.get(0).map_or(0, |m| m.start());
            let lang = caps.get(1).map_or("", |m| m.as_str());
            let region = caps.get(3).map_or("", |m| m.as_str());
            let ext = caps.get(4).map_or("", |m| m.as_str());
            let code = if region.is_empty() {
                lang.to_string()
            } else {
                format!("{lang}_{region}")
            };
            return Self {
                dir,
                base: name[..whole].to_string(),
                ext: ext.to_string(),
                locale: Some(Locale::parse(&code)),
            };
        }
        let (base, ext) = match name.rsplit_once('.') {
            Some((base, ext)) => (base.to_string(), format!(".{ext}")),
            None => (name.to_string(), String::new()),
        };
        Self {
            dir,
            base,
            ext,
            locale: None,
        }
    }

    /// Pod path of the unlocalized file.
    pub fn base_path(&self) -> String {
        storage::join(&self.dir, &format!("{}{}", self.base, self.ext))
    }

    /// Pod path of the file for `locale`.
    pub fn localized_path(&self, locale: &Locale) -> String {
        storage::join(&self.dir, &format!("{}@{}{}", self.base, locale, self.ext))
    }
}

/// A parsed document for one locale.
#[derive(Debug, Clone)]
pub struct Document {
    pod_path: String,
    path: LocalePath,
    format: DocumentFormat,
    collection: Arc<Collection>,
    locale: Option<Locale>,
    default_locale: Option<Locale>,
    locales: Vec<Locale>,
    raw_fields: Value,
    fields: Value,
    body: String,
    source_paths: Vec<String>,
    references: Vec<String>,
}

impl Document {
    /// Load the document at `pod_path` for `locale`.
    pub fn load(
        storage: &dyn Storage,
        podspec: &PodSpec,
        collection: Arc<Collection>,
        pod_path: &str,
        locale: Option<Locale>,
    ) -> Result<Self, DocumentError> {
        let pod_path = storage::normalize_path(pod_path)?;
        let path = LocalePath::parse(&pod_path);
        let format = DocumentFormat::from_path(&pod_path);
        let mut locale = path.locale.clone().or(locale);

        // The base file decides the default locale, which decides the chain.
        let base_path = path.base_path();
        let base_fields = if storage.exists(&base_path) {
            read_parts(storage, &base_path, format)?.0
        } else {
            Value::Object(Map::new())
        };
        let default_locale = localization_default(&base_fields)
            .or_else(|| collection.default_locale(podspec));
        let effective = locale.clone().or_else(|| default_locale.clone());

        let chain = locale_chain(storage, &path, effective.as_ref())?;
        if chain.is_empty() {
            return Err(DocumentError::NotFound(pod_path));
        }

        let mut raw_fields = Value::Object(Map::new());
        let mut body = String::new();
        let mut references = Vec::new();
        for file in &chain {
            let (fields, file_body, refs) = read_parts(storage, file, format)?;
            raw_fields = data::deep_merge(raw_fields, fields);
            if !file_body.is_empty() {
                body = file_body;
            }
            references.extend(refs);
        }

        if let Some(explicit) = raw_fields.get("$locale").and_then(Value::as_str) {
            locale = Some(Locale::parse(explicit));
        }

        let localization = raw_fields.get("$localization");
        let locales = match localization {
            Some(Value::Null) => Vec::new(),
            Some(l) if l.get("locales").is_some() => l
                .get("locales")
                .and_then(Value::as_array)
                .map(|items| {
                    items
                        .iter()
                        .filter_map(Value::as_str)
                        .map(Locale::parse)
                        .collect()
                })
                .unwrap_or_default(),
            _ => collection.locales(podspec),
        };

        let mut params = podspec.untag_params();
        if let Some(groups) = collection.locale_groups() {
            params.locale_groups.insert(0, groups);
        }
        let effective = locale.clone().or_else(|| default_locale.clone());
        let merged = data::deep_merge(collection.default_fields(), raw_fields.clone());
        let fields = untag::untag(&merged, effective.as_ref(), &params);

        let mut source_paths = chain;
        source_paths.push(collection.blueprint_path());

        Ok(Self {
            pod_path,
            path,
            format,
            collection,
            locale,
            default_locale,
            locales,
            raw_fields,
            fields,
            body,
            source_paths,
            references,
        })
    }

    pub fn pod_path(&self) -> &str {
        &self.pod_path
    }

    /// Pod path of the unlocalized base file.
    pub fn base_pod_path(&self) -> String {
        self.path.base_path()
    }

    /// File name without locale suffix or extension.
    pub fn base(&self) -> &str {
        &self.path.base
    }

    pub fn ext(&self) -> &str {
        &self.path.ext
    }

    pub fn format(&self) -> DocumentFormat {
        self.format
    }

    pub fn collection(&self) -> &Arc<Collection> {
        &self.collection
    }

    /// The locale this variant was loaded for; `None` is the default variant.
    pub fn locale(&self) -> Option<&Locale> {
        self.locale.as_ref()
    }

    pub fn default_locale(&self) -> Option<&Locale> {
        self.default_locale.as_ref()
    }

    /// The locale the document renders in, resolving the default late.
    pub fn effective_locale(&self) -> Option<Locale> {
        self.locale.clone().or_else(|| self.default_locale.clone())
    }

    /// Whether this variant is the default-locale variant.
    pub fn is_default_locale(&self) -> bool {
        match (&self.locale, &self.default_locale) {
            (None, _) => true,
            (Some(locale), Some(default)) => locale == default,
            (Some(_), None) => false,
        }
    }

    /// Locales this document is available in.
    pub fn locales(&self) -> &[Locale] {
        &self.locales
    }

    /// Untagged fields, including blueprint defaults.
    pub fn fields(&self) -> &Value {
        &self.fields
    }

    /// Merged front matter before untagging, without blueprint defaults.
    pub fn raw_fields(&self) -> &Value {
        &self.raw_fields
    }

    pub fn get(&self, key_path: &str) -> Option<&Value> {
        data::lookup(&self.fields, key_path)
    }

    pub fn get_str(&self, key_path: &str) -> Option<&str> {
        self.get(key_path).and_then(Value::as_str)
    }

    pub fn body(&self) -> &str {
        &self.body
    }

    /// The body as HTML: markdown is rendered, everything else is raw.
    pub fn html(&self) -> String {
        match self.format {
            DocumentFormat::Markdown => render_markdown(&self.body),
            _ => self.body.clone(),
        }
    }

    /// Files read to build this document (locale chain and blueprint).
    pub fn source_paths(&self) -> &[String] {
        &self.source_paths
    }

    /// Pod paths referenced through `!g.*` tags.
    pub fn references(&self) -> &[String] {
        &self.references
    }

    pub fn title(&self) -> Option<&str> {
        self.get_str("$title").or_else(|| self.get_str("title"))
    }

    /// `$titles.<key>`, falling back to the title.
    pub fn titles(&self, key: &str) -> Option<&str> {
        self.get("$titles")
            .and_then(|t| t.get(key))
            .and_then(Value::as_str)
            .or_else(|| self.title())
    }

    pub fn hidden(&self) -> bool {
        self.get("$hidden").and_then(Value::as_bool).unwrap_or(false)
    }

    pub fn order(&self) -> Option<i64> {
        self.get("$order").and_then(Value::as_i64)
    }

    pub fn category(&self) -> Option<&str> {
        self.get_str("$category")
    }

    pub fn date(&self) -> Option<String> {
        self.get("$date").and_then(data::scalar_string)
    }

    /// Pod path named by `$parent`.
    pub fn parent_path(&self) -> Option<&str> {
        self.get_str("$parent")
    }

    /// `$slug`, else the slugified title.
    pub fn slug(&self) -> Option<String> {
        if let Some(slug) = self.get_str("$slug") {
            return Some(slug.to_string());
        }
        self.title().map(slugify)
    }

    /// `$view`, else the collection's view.
    pub fn view(&self) -> Option<String> {
        self.get_str("$view")
            .map(str::to_string)
            .or_else(|| self.collection.view())
    }

    /// Path relative to the collection (`/sub/a.yaml`).
    pub fn collection_sub_path(&self) -> String {
        self.pod_path[self.collection.pod_path().len().min(self.pod_path.len())..].to_string()
    }

    /// Directory inside the collection (`/sub/`).
    pub fn collection_base_path(&self) -> String {
        let sub = self.collection_sub_path();
        let name = storage::basename(&self.pod_path);
        sub[..sub.len() - name.len()].to_string()
    }

    /// The unlocalized path pattern.
    pub fn path_format_base(&self) -> Option<String> {
        self.get_str("$path")
            .map(str::to_string)
            .or_else(|| self.collection.path_format())
    }

    /// The localized path pattern, when one is configured.
    pub fn path_format_localized(&self) -> Option<String> {
        if let Some(path) = self.get("$localization").and_then(|l| l.get("path")).and_then(Value::as_str) {
            return Some(path.to_string());
        }
        if let Some(path) = self.get_str("$path")
            && path.contains("{locale}")
        {
            return Some(path.to_string());
        }
        self.collection.localized_path_format()
    }

    /// The pattern used for this variant: localized for non-default
    /// locales when available, else the base pattern.
    pub fn path_format(&self) -> Option<String> {
        if !self.is_default_locale()
            && let Some(localized) = self.path_format_localized()
        {
            return Some(localized);
        }
        self.path_format_base()
    }

    /// Whether this variant can be served: it has a pattern and is not hidden.
    pub fn has_serving_path(&self) -> bool {
        !self.hidden() && self.path_format().is_some_and(|p| !p.is_empty())
    }
}

fn read_parts(
    storage: &dyn Storage,
    pod_path: &str,
    format: DocumentFormat,
) -> Result<(Value, String, Vec<String>), DocumentError> {
    let content = storage.read_to_string(pod_path)?;
    let (front, body) = front_matter::split_front_matter(&content, format, pod_path)?;
    let (fields, references) = match front {
        Some(front) => {
            let loaded = data::load_yaml(storage, pod_path, &front)?;
            (loaded.value, loaded.references)
        }
        None => (Value::Null, Vec::new()),
    };
    let fields = match fields {
        Value::Object(_) => fields,
        _ => Value::Object(Map::new()),
    };
    Ok((fields, body, references))
}

fn localization_default(fields: &Value) -> Option<Locale> {
    fields
        .get("$localization")
        .and_then(|l| l.get("default_locale"))
        .and_then(Value::as_str)
        .map(Locale::parse)
}

/// Existing files for `locale`, most general first.
fn locale_chain(
    storage: &dyn Storage,
    path: &LocalePath,
    locale: Option<&Locale>,
) -> Result<Vec<String>, DocumentError> {
    let mut siblings: BTreeMap<Locale, String> = BTreeMap::new();
    for file in storage.list(&path.dir, false)? {
        let sibling = LocalePath::parse(&file);
        if sibling.base == path.base
            && sibling.ext == path.ext
            && let Some(l) = sibling.locale
        {
            siblings.insert(l, file);
        }
    }

    let mut chain = Vec::new();
    let base_path = path.base_path();
    if storage.exists(&base_path) {
        chain.push(base_path);
    }
    if let Some(locale) = locale {
        let language = Locale::parse(locale.language());
        if language != *locale
            && let Some(file) = siblings.get(&language)
        {
            chain.push(file.clone());
        }
        if let Some(file) = siblings.get(locale) {
            chain.push(file.clone());
        }
    }
    Ok(chain)
}

/// Render markdown to HTML with tables, footnotes, and strikethrough.
pub fn render_markdown(source: &str) -> String {
    let mut options = Options::empty();
    options.insert(Options::ENABLE_TABLES);
    options.insert(Options::ENABLE_FOOTNOTES);
    options.insert(Options::ENABLE_STRIKETHROUGH);
    let parser = Parser::new_ext(source, options);
    let mut out = String::new();
    html::push_html(&mut out, parser);
    out
}

/// Lowercase, ASCII-alphanumeric words joined by `-`.
pub fn slugify(text: &str) -> String {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .collect::<Vec<_>>()
        .join("-")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::PodBuilder;
    use serde_json::json;

    fn load(pod: &PodBuilder, path: &str, locale: Option<&str>) -> Document {
        pod.load_doc(path, locale.map(Locale::parse))
    }

    #[test]
    fn locale_path_parsing() {
        let path = LocalePath::parse("/content/pages/about@de_AT.yaml");
        assert_eq!(path.base, "about");
        assert_eq!(path.ext, ".yaml");
        assert_eq!(path.locale, Some(Locale::parse("de_AT")));
        assert_eq!(path.base_path(), "/content/pages/about.yaml");

        let plain = LocalePath::parse("/content/pages/about.md");
        assert_eq!(plain.base, "about");
        assert_eq!(plain.locale, None);
        assert_eq!(
            plain.localized_path(&Locale::parse("fr")),
            "/content/pages/about@fr.md"
        );
    }

    #[test]
    fn inheritance_follows_locale_specificity() {
        let pod = PodBuilder::new()
            .file("/podspec.yaml", "{}")
            .file("/content/pages/_blueprint.yaml", "$path: /{base}/\n$view: /views/base.html\n")
            .file("/content/pages/a.yaml", "k: 1\nonly_base: base\n")
            .file("/content/pages/a@en.yaml", "k: 2\n")
            .file("/content/pages/a@en_US.yaml", "k: 3\n");

        assert_eq!(load(&pod, "/content/pages/a.yaml", Some("en_US")).get("k"), Some(&json!(3)));
        assert_eq!(load(&pod, "/content/pages/a.yaml", Some("en")).get("k"), Some(&json!(2)));
        assert_eq!(load(&pod, "/content/pages/a.yaml", None).get("k"), Some(&json!(1)));
        assert_eq!(
            load(&pod, "/content/pages/a.yaml", Some("en_US")).get_str("only_base"),
            Some("base")
        );
    }

    #[test]
    fn locale_from_path_suffix_and_explicit_field() {
        let pod = PodBuilder::new()
            .file("/podspec.yaml", "{}")
            .file("/content/pages/_blueprint.yaml", "$path: /{base}/\n")
            .file("/content/pages/a.yaml", "{}\n")
            .file("/content/pages/a@de.yaml", "title: Hallo\n")
            .file("/content/pages/b.yaml", "$locale: fr\n");

        let doc = load(&pod, "/content/pages/a@de.yaml", None);
        assert_eq!(doc.locale(), Some(&Locale::parse("de")));
        assert_eq!(doc.title(), Some("Hallo"));

        let doc = load(&pod, "/content/pages/b.yaml", Some("it"));
        assert_eq!(doc.locale(), Some(&Locale::parse("fr")));
    }

    #[test]
    fn blueprint_fields_are_defaults() {
        let pod = PodBuilder::new()
            .file("/podspec.yaml", "{}")
            .file(
                "/content/pages/_blueprint.yaml",
                "$path: /{base}/\nauthor: Team\ncolor: blue\n",
            )
            .file("/content/pages/a.yaml", "color: red\n");
        let doc = load(&pod, "/content/pages/a.yaml", None);
        assert_eq!(doc.get_str("author"), Some("Team"));
        assert_eq!(doc.get_str("color"), Some("red"));
        assert_eq!(doc.get("$path"), None);
        assert_eq!(doc.path_format(), Some("/{base}/".to_string()));
    }

    #[test]
    fn tagged_fields_are_untagged_for_locale() {
        let pod = PodBuilder::new()
            .file("/podspec.yaml", "{}")
            .file("/content/pages/_blueprint.yaml", "$path: /{base}/\n")
            .file("/content/pages/a.yaml", "$title@: Hello\n$title@de: Hallo\n");
        assert_eq!(load(&pod, "/content/pages/a.yaml", None).title(), Some("Hello"));
        assert_eq!(load(&pod, "/content/pages/a.yaml", Some("de")).title(), Some("Hallo"));
        assert!(
            load(&pod, "/content/pages/a.yaml", None)
                .raw_fields()
                .get("$title@de")
                .is_some()
        );
    }

    #[test]
    fn markdown_body_renders_to_html() {
        let pod = PodBuilder::new()
            .file("/podspec.yaml", "{}")
            .file("/content/posts/_blueprint.yaml", "$path: /posts/{base}/\n")
            .file("/content/posts/hello.md", "---\n$title: Hello\n---\n# Heading\n");
        let doc = load(&pod, "/content/posts/hello.md", None);
        assert_eq!(doc.body(), "# Heading");
        assert_eq!(doc.html().trim(), "<h1>Heading</h1>");
    }

    #[test]
    fn localization_rules() {
        let pod = PodBuilder::new()
            .file(
                "/podspec.yaml",
                "localization:\n  default_locale: en\n  locales: [en, de, fr]\n",
            )
            .file(
                "/content/pages/_blueprint.yaml",
                "$path: /{base}/\nlocalization:\n  path: /{locale}/{base}/\n",
            )
            .file("/content/pages/all.yaml", "{}\n")
            .file("/content/pages/some.yaml", "$localization:\n  locales: [de]\n")
            .file("/content/pages/none.yaml", "$localization: null\n");

        let all = load(&pod, "/content/pages/all.yaml", None);
        assert_eq!(all.locales(), Locale::parse_list(&["en", "de", "fr"]).as_slice());
        assert_eq!(all.effective_locale(), Some(Locale::parse("en")));
        assert_eq!(all.path_format(), Some("/{base}/".to_string()));

        let de = load(&pod, "/content/pages/all.yaml", Some("de"));
        assert_eq!(de.path_format(), Some("/{locale}/{base}/".to_string()));

        let en = load(&pod, "/content/pages/all.yaml", Some("en"));
        assert!(en.is_default_locale());
        assert_eq!(en.path_format(), Some("/{base}/".to_string()));

        assert_eq!(
            load(&pod, "/content/pages/some.yaml", None).locales(),
            &[Locale::parse("de")]
        );
        assert!(load(&pod, "/content/pages/none.yaml", None).locales().is_empty());
    }

    #[test]
    fn hidden_docs_have_no_serving_path() {
        let pod = PodBuilder::new()
            .file("/podspec.yaml", "{}")
            .file("/content/pages/_blueprint.yaml", "$path: /{base}/\n")
            .file("/content/pages/a.yaml", "$hidden: true\n");
        assert!(!load(&pod, "/content/pages/a.yaml", None).has_serving_path());
    }

    #[test]
    fn missing_document_is_not_found() {
        let pod = PodBuilder::new()
            .file("/podspec.yaml", "{}")
            .file("/content/pages/_blueprint.yaml", "$path: /{base}/\n");
        let err = pod.try_load_doc("/content/pages/nope.yaml", None).unwrap_err();
        assert!(matches!(err, DocumentError::NotFound(_)));
    }

    #[test]
    fn slug_from_title() {
        assert_eq!(slugify("Hello, World! 2024"), "hello-world-2024");
    }

    #[test]
    fn collection_relative_paths() {
        let pod = PodBuilder::new()
            .file("/podspec.yaml", "{}")
            .file("/content/pages/_blueprint.yaml", "$path: /{base}/\n")
            .file("/content/pages/sub/a.yaml", "{}\n");
        let doc = load(&pod, "/content/pages/sub/a.yaml", None);
        assert_eq!(doc.collection_sub_path(), "/sub/a.yaml");
        assert_eq!(doc.collection_base_path(), "/sub/");
    }
}
