//! Path patterns: expand `{token}` placeholders into serving paths.
//!
//! Tokens are resolved, in order, from the document's top-level fields,
//! the built-in tokens below, and finally the podspec:
//!
//! | Token | Value |
//! |-------|-------|
//! | `{base}` | document base name; empty for `index` when the pattern ends in `/{base}` or `/{base}/` |
//! | `{locale}` | serving alias of the locale, else its code, else empty |
//! | `{root}` | podspec `root` |
//! | `{env.<key>}` | environment attribute (`env.fingerprint`, `env.host`, ...) |
//! | `{collection.base_path}` | document directory inside the collection (`/sub/`) |
//! | `{collection.basename}` | collection directory name |
//! | `{collection.root}` | the collection's `$root` |
//! | `{category}`, `{slug}` | `$category`, `$slug` (else the slugified title) |
//! | `{date}`, `{date.year}`, ... | `$date` (date part only) and its components |
//! | `{parent.<token>}` | any token, resolved against the `$parent` document |
//! | `{<token>\|lower}` | any of the above, lowercased |
//!
//! After substitution `//` collapses to `/`, and a trailing `/` is added
//! when the view renders HTML and the path does not already name a file.
//!
//! In strict mode an unresolved token fails with
//! [`PathFormatError::MissingOption`]; otherwise it is left in place so a
//! later pass (or [`parameterize`]) can deal with it.

use crate::data;
use crate::documents::Document;
use crate::locales::{Locale, LocaleRegistry};
use crate::podspec::PodSpec;
use chrono::{Datelike, NaiveDate};
use regex::Regex;
use std::sync::LazyLock;
use thiserror::Error;

static PLACEHOLDER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\{([^{}]+)\}").expect("valid regex"));
static PARAM_SECTION: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"/\{([^}]*)\}/").expect("valid regex"));
static PARAM_END: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"/\{([^}]*)\}$").expect("valid regex"));

const HTML_EXTENSIONS: &[&str] = &[".html", ".htm"];
const FILE_EXTENSIONS: &[&str] = &[".html", ".htm", ".xml", ".svg"];
const INDEX_BASE_ENDINGS: &[&str] = &["/{base}", "/{base}/"];

#[derive(Error, Debug, PartialEq)]
pub enum PathFormatError {
    #[error("Missing option `{token}` in path `{pattern}` for {pod_path}")]
    MissingOption {
        pattern: String,
        token: String,
        pod_path: String,
    },
}

/// Formats serving paths using pod-level and document-level values.
pub struct PathFormat<'a> {
    podspec: &'a PodSpec,
    registry: &'a LocaleRegistry,
}

impl<'a> PathFormat<'a> {
    pub fn new(podspec: &'a PodSpec, registry: &'a LocaleRegistry) -> Self {
        Self { podspec, registry }
    }

    /// Format `pattern` for `doc`. `parent` is the `$parent` document, when
    /// the caller has loaded it. `locale` overrides the document's own.
    pub fn format_doc(
        &self,
        doc: &Document,
        pattern: &str,
        parent: Option<&Document>,
        locale: Option<&Locale>,
        strict: bool,
    ) -> Result<String, PathFormatError> {
        let locale = locale.cloned().or_else(|| doc.effective_locale());
        let locale_name = self.locale_name(locale.as_ref());
        let path = substitute(pattern, strict, doc.pod_path(), |token| {
            if token == "locale" {
                return Some(locale_name.clone());
            }
            self.doc_token(doc, pattern, parent, token)
        })?;
        let path = strip_double_slash(&path);
        Ok(trailing_slash(&path, doc.view().as_deref()))
    }

    /// Like [`format_doc`](Self::format_doc) but keeps `{locale}` (and any
    /// other unresolved segment) as a route parameter.
    pub fn format_doc_pattern(&self, doc: &Document, pattern: &str, parent: Option<&Document>) -> String {
        let path = substitute(pattern, false, doc.pod_path(), |token| {
            if token == "locale" {
                return None;
            }
            self.doc_token(doc, pattern, parent, token)
        })
        .unwrap_or_else(|_| pattern.to_string());
        let path = strip_double_slash(&parameterize(&path));
        trailing_slash(&path, doc.view().as_deref())
    }

    /// Format a path using pod-level tokens only (`{root}`, `{env.*}`).
    pub fn format_pod(&self, pattern: &str) -> String {
        let path = substitute(pattern, false, "", |token| self.pod_token(token))
            .unwrap_or_else(|_| pattern.to_string());
        strip_double_slash(&path)
    }

    /// Format a static directory's `serve_at` for `locale`.
    pub fn format_static(&self, pattern: &str, locale: Option<&Locale>) -> String {
        let locale_name = self.locale_name(locale);
        let path = substitute(pattern, false, "", |token| {
            if token == "locale" {
                return Some(locale_name.clone());
            }
            self.pod_token(token)
        })
        .unwrap_or_else(|_| pattern.to_string());
        strip_double_slash(&path)
    }

    fn locale_name(&self, locale: Option<&Locale>) -> String {
        locale
            .map(|l| self.registry.serving_name(l))
            .unwrap_or_default()
    }

    fn doc_token(
        &self,
        doc: &Document,
        pattern: &str,
        parent: Option<&Document>,
        token: &str,
    ) -> Option<String> {
        if let Some(inner) = token.strip_suffix("|lower") {
            return self
                .doc_token(doc, pattern, parent, inner)
                .map(|v| v.to_lowercase());
        }
        if let Some(parent_token) = token.strip_prefix("parent.") {
            let parent = parent?;
            return self.doc_token(parent, "", None, parent_token);
        }
        if !token.starts_with('$')
            && let Some(value) = doc.fields().get(token)
            && let Some(s) = data::scalar_string(value)
        {
            return Some(s);
        }
        builtin_token(doc, pattern, token).or_else(|| self.pod_token(token))
    }

    fn pod_token(&self, token: &str) -> Option<String> {
        if let Some(inner) = token.strip_suffix("|lower") {
            return self.pod_token(inner).map(|v| v.to_lowercase());
        }
        if token == "root" {
            return Some(self.podspec.root());
        }
        if let Some(key) = token.strip_prefix("env.") {
            return data::lookup(&self.podspec.env().to_value(), key).and_then(data::scalar_string);
        }
        self.podspec.get(token).and_then(data::scalar_string)
    }
}

fn builtin_token(doc: &Document, pattern: &str, token: &str) -> Option<String> {
    match token {
        "base" => {
            if doc.base() == "index" && INDEX_BASE_ENDINGS.iter().any(|e| pattern.ends_with(e)) {
                Some(String::new())
            } else {
                Some(doc.base().to_string())
            }
        }
        "collection.base_path" | "collection.sub_path" => Some(doc.collection_base_path()),
        "collection.basename" => Some(doc.collection().basename().to_string()),
        "collection.root" => Some(doc.collection().root()),
        "category" => doc.category().map(str::to_string),
        "slug" => doc.slug(),
        "date" => doc.date().map(|d| date_part(&d).to_string()),
        "date.year" => parse_date(doc).map(|d| d.year().to_string()),
        "date.month" => parse_date(doc).map(|d| d.month().to_string()),
        "date.day" => parse_date(doc).map(|d| d.day().to_string()),
        _ => None,
    }
}

fn date_part(date: &str) -> &str {
    date.split(['T', ' ']).next().unwrap_or(date)
}

fn parse_date(doc: &Document) -> Option<NaiveDate> {
    let date = doc.date()?;
    NaiveDate::parse_from_str(date_part(&date), "%Y-%m-%d").ok()
}

/// Replace every `{token}` for which `resolve` yields a value. In strict
/// mode the first unresolved token is an error.
fn substitute(
    pattern: &str,
    strict: bool,
    pod_path: &str,
    resolve: impl Fn(&str) -> Option<String>,
) -> Result<String, PathFormatError> {
    let mut out = String::with_capacity(pattern.len());
    let mut last = 0;
    for caps in PLACEHOLDER.captures_iter(pattern) {
        let Some(whole) = caps.get(0) else { continue };
        let token = caps.get(1).map_or("", |m| m.as_str());
        out.push_str(&pattern[last..whole.start()]);
        match resolve(token) {
            Some(value) => out.push_str(&value),
            None if strict => {
                return Err(PathFormatError::MissingOption {
                    pattern: pattern.to_string(),
                    token: token.to_string(),
                    pod_path: pod_path.to_string(),
                });
            }
            None => out.push_str(whole.as_str()),
        }
        last = whole.end();
    }
    out.push_str(&pattern[last..]);
    Ok(out)
}

/// Turn leftover `{x}` segments into `:x` route parameters.
pub fn parameterize(path: &str) -> String {
    let path = PARAM_SECTION.replace_all(path, "/:$1/");
    PARAM_END.replace_all(&path, "/:$1").into_owned()
}

pub fn strip_double_slash(path: &str) -> String {
    let mut path = path.to_string();
    while path.contains("//") {
        path = path.replace("//", "/");
    }
    path
}

/// Add a trailing `/` for HTML views unless the path already names a file.
pub fn trailing_slash(path: &str, view: Option<&str>) -> String {
    let Some(view) = view else {
        return path.to_string();
    };
    if !HTML_EXTENSIONS.iter().any(|e| view.ends_with(e))
        || FILE_EXTENSIONS.iter().any(|e| path.ends_with(e))
        || path.is_empty()
        || path.ends_with('/')
    {
        return path.to_string();
    }
    format!("{path}/")
}

/// Whether any `{token}` is left in `path`.
pub fn has_placeholders(path: &str) -> bool {
    PLACEHOLDER.is_match(path)
}

/// Tokens a pattern references, in order of appearance.
pub fn tokens(pattern: &str) -> Vec<String> {
    PLACEHOLDER
        .captures_iter(pattern)
        .filter_map(|c| c.get(1).map(|m| m.as_str().to_string()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::PodBuilder;

    fn pod() -> PodBuilder {
        PodBuilder::new()
            .file(
                "/podspec.yaml",
                "root: /site/\nlocalization:\n  default_locale: en\n  locales: [en, de]\n  aliases:\n    deutsch: de\n",
            )
            .file(
                "/content/pages/_blueprint.yaml",
                "$path: /{base}/\n$view: /views/base.html\n$root: /docs\n",
            )
            .file("/content/pages/index.yaml", "{}")
            .file(
                "/content/pages/sub/post.yaml",
                "$title: Hello World\n$date: 2024-03-05T10:00:00\n$category: News\n$parent: /content/pages/index.yaml\nauthor: kim\n",
            )
    }

    fn format(pod: &PodBuilder, path: &str, pattern: &str, locale: Option<&str>) -> String {
        let opened = pod.pod();
        let doc = pod.load_doc(path, locale.map(Locale::parse));
        let registry = opened.podspec().locale_registry();
        PathFormat::new(opened.podspec(), &registry)
            .format_doc(&doc, pattern, None, None, true)
            .unwrap()
    }

    #[test]
    fn index_base_collapses() {
        let pod = pod();
        assert_eq!(format(&pod, "/content/pages/index.yaml", "/{base}/", None), "/");
        assert_eq!(
            format(&pod, "/content/pages/index.yaml", "/{base}.html", None),
            "/index.html"
        );
    }

    #[test]
    fn builtin_tokens() {
        let pod = pod();
        let path = "/content/pages/sub/post.yaml";
        assert_eq!(format(&pod, path, "{root}/{base}", None), "/site/post/");
        assert_eq!(
            format(&pod, path, "/{collection.basename}{collection.base_path}{slug}/", None),
            "/pages/sub/hello-world/"
        );
        assert_eq!(
            format(&pod, path, "/{date.year}/{date.month}/{date}/", None),
            "/2024/3/2024-03-05/"
        );
        assert_eq!(format(&pod, path, "/{category|lower}/{author}/", None), "/news/kim/");
        assert_eq!(format(&pod, path, "{collection.root}/{base}/", None), "/docs/post/");
    }

    #[test]
    fn locale_uses_alias() {
        let pod = pod();
        assert_eq!(
            format(&pod, "/content/pages/index.yaml", "/{locale}/{base}/", Some("de")),
            "/deutsch/"
        );
        assert_eq!(
            format(&pod, "/content/pages/index.yaml", "/{locale}/x/", None),
            "/en/x/"
        );
    }

    #[test]
    fn missing_token_is_an_error_in_strict_mode() {
        let pod = pod();
        let opened = pod.pod();
        let doc = pod.load_doc("/content/pages/index.yaml", None);
        let registry = opened.podspec().locale_registry();
        let formatter = PathFormat::new(opened.podspec(), &registry);
        let err = formatter
            .format_doc(&doc, "/{nope}/", None, None, true)
            .unwrap_err();
        assert!(matches!(err, PathFormatError::MissingOption { ref token, .. } if token == "nope"));
        assert_eq!(
            formatter.format_doc(&doc, "/{nope}/", None, None, false).unwrap(),
            "/{nope}/"
        );
    }

    #[test]
    fn parent_tokens_resolve_against_parent() {
        let pod = pod();
        let opened = pod.pod();
        let doc = pod.load_doc("/content/pages/sub/post.yaml", None);
        let parent = pod.load_doc("/content/pages/index.yaml", None);
        let registry = opened.podspec().locale_registry();
        let formatter = PathFormat::new(opened.podspec(), &registry);
        assert_eq!(
            formatter
                .format_doc(&doc, "/{parent.base}/{base}/", Some(&parent), None, true)
                .unwrap(),
            "/index/post/"
        );
    }

    #[test]
    fn pattern_mode_keeps_locale_parameter() {
        let pod = pod();
        let opened = pod.pod();
        let doc = pod.load_doc("/content/pages/sub/post.yaml", None);
        let registry = opened.podspec().locale_registry();
        let formatter = PathFormat::new(opened.podspec(), &registry);
        assert_eq!(
            formatter.format_doc_pattern(&doc, "/{locale}/{base}/", None),
            "/:locale/post/"
        );
    }

    #[test]
    fn parameterize_sections_and_tail() {
        assert_eq!(parameterize("/{a}/b/{c}"), "/:a/b/:c");
        assert_eq!(parameterize("/x{a}/"), "/x{a}/");
    }

    #[test]
    fn trailing_slash_rules() {
        let html = Some("/views/base.html");
        assert_eq!(trailing_slash("/a", html), "/a/");
        assert_eq!(trailing_slash("/a/", html), "/a/");
        assert_eq!(trailing_slash("/feed.xml", html), "/feed.xml");
        assert_eq!(trailing_slash("/a", Some("/views/feed.xml")), "/a");
        assert_eq!(trailing_slash("/a", None), "/a");
    }

    #[test]
    fn double_slashes_collapse() {
        assert_eq!(strip_double_slash("//a///b/"), "/a/b/");
    }

    #[test]
    fn static_paths_use_pod_tokens() {
        let pod = pod();
        let opened = pod.pod();
        let registry = opened.podspec().locale_registry();
        let formatter = PathFormat::new(opened.podspec(), &registry);
        assert_eq!(formatter.format_pod("{root}/static/"), "/site/static/");
        assert_eq!(
            formatter.format_static("/static/{locale}/", Some(&Locale::parse("de"))),
            "/static/deutsch/"
        );
        assert_eq!(formatter.format_static("/{env.fingerprint}/", None), "/fingerprint/");
    }
}
