//! One controller per route kind.

use super::RenderError;
use super::engine::{Helpers, TemplateEngine};
use crate::collections::ListDocs;
use crate::data;
use crate::documents::Document;
use crate::locales::Locale;
use crate::pod::Pod;
use crate::podspec::{SitemapConfig, SitemapFilter};
use crate::router::{self, RouteInfo};
use regex::Regex;
use serde_json::{Map, Value, json};
use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex};

const DEFAULT_SITEMAP: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<urlset xmlns="http://www.sitemaps.org/schemas/sitemap/0.9" xmlns:xhtml="http://www.w3.org/1999/xhtml">
{%- for entry in entries %}
  <url>
    <loc>{{ entry.url }}</loc>
    {%- for alt in entry.alternates %}
    <xhtml:link href="{{ alt.url }}" hreflang="{{ alt.hreflang }}" rel="alternate"/>
    {%- endfor %}
  </url>
{%- endfor %}
</urlset>
"#;

/// Body of one route plus the pod paths it read.
pub(super) struct Output {
    pub bytes: Vec<u8>,
    pub sources: Vec<String>,
}

/// Pod paths read during one render.
#[derive(Clone, Default)]
struct Recorder(Arc<Mutex<BTreeSet<String>>>);

impl Recorder {
    fn record(&self, path: impl Into<String>) {
        self.0
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(path.into());
    }

    fn extend<I: IntoIterator<Item = S>, S: Into<String>>(&self, paths: I) {
        for path in paths {
            self.record(path);
        }
    }

    fn take(&self) -> Vec<String> {
        std::mem::take(&mut *self.0.lock().unwrap_or_else(|poisoned| poisoned.into_inner()))
            .into_iter()
            .collect()
    }
}

pub(super) fn render(
    pod: &Arc<Pod>,
    engine: &dyn TemplateEngine,
    path: &str,
    info: &RouteInfo,
) -> Result<Output, RenderError> {
    match info {
        RouteInfo::Doc { pod_path, locale, .. } => render_doc(pod, engine, pod_path, locale.clone()),
        RouteInfo::Static { pod_path, .. } => Ok(Output {
            bytes: pod.storage().read(pod_path)?,
            sources: vec![pod_path.clone()],
        }),
        RouteInfo::Sitemap(config) => render_sitemap(pod, engine, config),
        RouteInfo::Error { key, view } => render_error(pod, engine, path, key, view),
    }
}

// ============================================================================
// Context
// ============================================================================

/// Template view of a document: its fields plus computed attributes.
pub fn doc_value(pod: &Pod, doc: &Document) -> Value {
    let mut map = match doc.fields() {
        Value::Object(fields) => fields.clone(),
        _ => Map::new(),
    };
    let locale = doc.effective_locale();
    let url = doc
        .has_serving_path()
        .then(|| router::serving_path(pod, doc).ok())
        .flatten();
    let computed = [
        ("pod_path", json!(doc.pod_path())),
        ("base", json!(doc.base())),
        ("collection", json!(doc.collection().basename())),
        ("url", json!(url)),
        ("locale", json!(locale.as_ref().map(Locale::as_str))),
        ("default_locale", json!(doc.default_locale().map(Locale::as_str))),
        (
            "locales",
            json!(doc.locales().iter().map(Locale::as_str).collect::<Vec<_>>()),
        ),
        ("title", json!(doc.title())),
        ("html", json!(doc.html())),
        ("body", json!(doc.body())),
        ("hreflang", json!(locale.as_ref().map(Locale::hreflang))),
        (
            "direction",
            json!(locale.as_ref().map(Locale::direction).unwrap_or("ltr")),
        ),
        ("date", json!(doc.date())),
        ("slug", json!(doc.slug())),
        ("order", json!(doc.order())),
    ];
    for (key, value) in computed {
        map.insert(key.to_string(), value);
    }
    Value::Object(map)
}

fn summary(pod: &Pod, doc: Option<&Arc<Document>>) -> Value {
    let Some(doc) = doc else {
        return Value::Null;
    };
    let url = router::serving_path(pod, doc).ok();
    json!({"pod_path": doc.pod_path(), "title": doc.title(), "url": url})
}

fn globals(pod: &Pod, locale: Option<&Locale>) -> Value {
    json!({
        "locale": locale.map(Locale::as_str),
        "default_locale": pod.podspec().default_locale().map(|l| l.to_string()),
        "locales": pod.list_locales().iter().map(Locale::as_str).collect::<Vec<_>>(),
    })
}

fn base_context(pod: &Pod, locale: Option<&Locale>) -> Map<String, Value> {
    let mut context = Map::new();
    context.insert("env".to_string(), pod.env().to_value());
    context.insert("podspec".to_string(), pod.podspec().data().clone());
    context.insert("g".to_string(), globals(pod, locale));
    context
}

// ============================================================================
// Template functions
// ============================================================================

fn string_arg(args: &HashMap<String, Value>, name: &str) -> Result<String, String> {
    args.get(name)
        .and_then(data::scalar_string)
        .ok_or_else(|| format!("missing '{name}' argument"))
}

fn locale_arg(args: &HashMap<String, Value>, fallback: Option<&Locale>) -> Option<Locale> {
    args.get("locale")
        .and_then(Value::as_str)
        .map(Locale::parse)
        .or_else(|| fallback.cloned())
}

/// `%(name)s` placeholders take the call's other arguments.
fn interpolate(text: &str, args: &HashMap<String, Value>) -> String {
    let mut out = text.to_string();
    for (key, value) in args {
        if key == "text" {
            continue;
        }
        if let Some(value) = data::scalar_string(value) {
            out = out.replace(&format!("%({key})s"), &value);
        }
    }
    out
}

fn helpers(pod: &Arc<Pod>, locale: Option<Locale>, location: &str, recorder: &Recorder) -> Helpers {
    let mut helpers = Helpers::new();
    let require = pod
        .podspec()
        .localization()
        .map(|c| c.require_translations)
        .unwrap_or(false);

    let (p, l, loc, rec) = (Arc::clone(pod), locale.clone(), location.to_string(), recorder.clone());
    helpers.register("_", move |args| {
        let text = string_arg(args, "text")?;
        let Some(locale) = &l else {
            return Ok(Value::String(interpolate(&text, args)));
        };
        let catalogs = p.catalogs();
        rec.record(catalogs.catalog_path(locale));
        let is_default = p.podspec().default_locale().as_ref() == Some(locale);
        if require && !is_default && catalogs.translations(locale).gettext(&text).is_none() {
            return Err(format!("Missing translation for '{text}' ({locale})"));
        }
        let translated = catalogs.translate(locale, &text, Some(&loc));
        Ok(Value::String(interpolate(&translated, args)))
    });

    let (p, l, rec) = (Arc::clone(pod), locale.clone(), recorder.clone());
    helpers.register("static_url", move |args| {
        let path = string_arg(args, "path")?;
        let locale = locale_arg(args, l.as_ref());
        rec.record(path.clone());
        router::static_url(&p, &path, locale.as_ref())
            .map(Value::String)
            .map_err(|e| e.to_string())
    });

    let (p, l, rec) = (Arc::clone(pod), locale.clone(), recorder.clone());
    helpers.register("g_doc", move |args| {
        let path = string_arg(args, "path")?;
        let locale = locale_arg(args, l.as_ref());
        rec.record(path.clone());
        let doc = p.get_doc(&path, locale).map_err(|e| e.to_string())?;
        Ok(doc_value(&p, &doc))
    });

    let (p, l, rec) = (Arc::clone(pod), locale, recorder.clone());
    helpers.register("g_docs", move |args| {
        let path = string_arg(args, "collection")?;
        let collection = p.get_collection(&path).map_err(|e| e.to_string())?;
        rec.record(collection.blueprint_path());
        let options = ListDocs {
            locale: locale_arg(args, l.as_ref()),
            order_by: args.get("order_by").and_then(Value::as_str).map(str::to_string),
            reverse: args.get("reverse").and_then(Value::as_bool).unwrap_or(false),
            include_hidden: args.get("include_hidden").and_then(Value::as_bool).unwrap_or(false),
            recursive: args.get("recursive").and_then(Value::as_bool).unwrap_or(false),
        };
        let docs = collection.list_docs(&p, &options).map_err(|e| e.to_string())?;
        rec.extend(docs.iter().map(|d| d.pod_path().to_string()));
        Ok(Value::Array(docs.iter().map(|d| doc_value(&p, d)).collect()))
    });

    helpers
}

// ============================================================================
// Controllers
// ============================================================================

fn render_doc(
    pod: &Arc<Pod>,
    engine: &dyn TemplateEngine,
    pod_path: &str,
    locale: Option<Locale>,
) -> Result<Output, RenderError> {
    let doc = pod.get_doc(pod_path, locale)?;
    let view = doc
        .view()
        .ok_or_else(|| RenderError::MissingView(pod_path.to_string()))?;
    let locale = doc.effective_locale();

    let recorder = Recorder::default();
    recorder.record(doc.pod_path());
    recorder.extend(engine.template_closure(&view));

    let (prev, next) = pod.adjacent_docs(&doc).unwrap_or_default();
    let mut value = doc_value(pod, &doc);
    if let Value::Object(map) = &mut value {
        map.insert("prev".to_string(), summary(pod, prev.as_ref()));
        map.insert("next".to_string(), summary(pod, next.as_ref()));
    }
    let mut context = base_context(pod, locale.as_ref());
    context.insert("doc".to_string(), value);

    let helpers = helpers(pod, locale, &view, &recorder);
    let html = engine.render(&view, &Value::Object(context), &helpers)?;
    Ok(Output {
        bytes: html.into_bytes(),
        sources: recorder.take(),
    })
}

fn render_error(
    pod: &Arc<Pod>,
    engine: &dyn TemplateEngine,
    path: &str,
    key: &str,
    view: &str,
) -> Result<Output, RenderError> {
    let locale = pod.podspec().default_locale();
    let recorder = Recorder::default();
    recorder.extend(engine.template_closure(view));

    let mut context = base_context(pod, locale.as_ref());
    context.insert("error".to_string(), json!({"key": key, "path": path}));

    let helpers = helpers(pod, locale, view, &recorder);
    let html = engine.render(view, &Value::Object(context), &helpers)?;
    Ok(Output {
        bytes: html.into_bytes(),
        sources: recorder.take(),
    })
}

// ============================================================================
// Sitemap
// ============================================================================

struct CompiledFilter {
    blacklist: bool,
    collections: Vec<String>,
    paths: Vec<Regex>,
    locales: Vec<String>,
}

impl CompiledFilter {
    fn new(filter: &SitemapFilter) -> Result<Self, regex::Error> {
        let paths = filter
            .paths
            .iter()
            .map(|p| Regex::new(&format!("^{}", p.trim_start_matches('^'))))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            blacklist: filter.kind == "blacklist",
            collections: filter.collections.clone(),
            paths,
            locales: filter.locales.clone(),
        })
    }

    /// Whether the filter keeps a document.
    fn keeps(&self, collection: &str, path: &str, locale: Option<&str>) -> bool {
        let mut matched = true;
        if !self.collections.is_empty() {
            matched &= self.collections.iter().any(|c| c == collection);
        }
        if !self.paths.is_empty() {
            matched &= self.paths.iter().any(|re| re.is_match(path));
        }
        if !self.locales.is_empty() {
            matched &= locale.is_some_and(|l| self.locales.iter().any(|x| x == l));
        }
        matched != self.blacklist
    }
}

fn collection_matches(wanted: &[String], basename: &str, pod_path: &str) -> bool {
    wanted.is_empty()
        || wanted
            .iter()
            .any(|w| w == basename || w.trim_end_matches('/') == pod_path.trim_end_matches('/'))
}

fn render_sitemap(
    pod: &Arc<Pod>,
    engine: &dyn TemplateEngine,
    config: &SitemapConfig,
) -> Result<Output, RenderError> {
    let filters = config
        .filters
        .iter()
        .map(CompiledFilter::new)
        .collect::<Result<Vec<_>, _>>()?;
    let base_url = pod.env().url();
    let recorder = Recorder::default();

    let mut entries = Vec::new();
    for collection in pod.list_collections()? {
        if !collection_matches(&config.collections, collection.basename(), collection.pod_path()) {
            continue;
        }
        recorder.record(collection.blueprint_path());
        for doc in collection.list_servable_documents(pod)? {
            let locale = doc.effective_locale();
            let locale_name = locale.as_ref().map(|l| l.to_string());
            if !config.locales.is_empty()
                && !locale_name.as_ref().is_some_and(|l| config.locales.contains(l))
            {
                continue;
            }
            let path = router::serving_path(pod, &doc)?;
            if !filters
                .iter()
                .all(|f| f.keeps(collection.basename(), &path, locale_name.as_deref()))
            {
                continue;
            }
            let alternates: Vec<Value> = if doc.locales().len() > 1 {
                router::localized_serving_paths(pod, &doc)?
                    .into_iter()
                    .map(|(l, p)| json!({"hreflang": l.hreflang(), "url": format!("{base_url}{p}")}))
                    .collect()
            } else {
                Vec::new()
            };
            recorder.record(doc.pod_path());
            entries.push(json!({
                "url": format!("{base_url}{path}"),
                "path": path,
                "locale": locale_name,
                "pod_path": doc.pod_path(),
                "title": doc.title(),
                "alternates": alternates,
            }));
        }
    }
    entries.sort_by(|a, b| a["url"].as_str().cmp(&b["url"].as_str()));

    let mut context = base_context(pod, None);
    context.insert("entries".to_string(), Value::Array(entries));
    let helpers = helpers(pod, None, config.template.as_deref().unwrap_or("<sitemap>"), &recorder);
    let xml = match &config.template {
        Some(template) => {
            recorder.extend(engine.template_closure(template));
            engine.render(template, &Value::Object(context), &helpers)?
        }
        None => engine.render_source(DEFAULT_SITEMAP, &Value::Object(context), &helpers)?,
    };
    Ok(Output {
        bytes: xml.into_bytes(),
        sources: recorder.take(),
    })
}

// ============================================================================
// Content types
// ============================================================================

/// MIME type for a serving path. Directory-style paths serve HTML.
pub fn content_type(path: &str) -> &'static str {
    if path.ends_with('/') {
        return "text/html";
    }
    let ext = path
        .rsplit('/')
        .next()
        .and_then(|name| name.rsplit_once('.'))
        .map(|(_, ext)| ext.to_ascii_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "html" | "htm" => "text/html",
        "xml" => "application/xml",
        "css" => "text/css",
        "js" => "application/javascript",
        "json" => "application/json",
        "svg" => "image/svg+xml",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "txt" => "text/plain",
        _ => "application/octet-stream",
    }
}
