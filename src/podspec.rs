//! `podspec.yaml` loading and environment-specific views.
//!
//! The podspec is parsed once into its raw form and then *untagged* for the
//! active [`Env`]: keys such as `root@env.prod` are resolved against the
//! environment name. Switching environments re-derives the view from the
//! untouched raw data, so nothing from a previous environment leaks through.
//!
//! ```yaml
//! localization:
//!   default_locale: en
//!   locales: [en, de, fr]
//!   aliases:
//!     en_ALL: en
//! static_dirs:
//! - static_dir: /source/
//!   serve_at: /static/
//!   fingerprinted: true
//! sitemap:
//!   enabled: true
//! deployments:
//!   prod:
//!     destination: local
//!     out_dir: build/
//! ```

use crate::data::{self, DataError};
use crate::locales::{Locale, LocaleRegistry};
use crate::storage::Storage;
use crate::untag::{self, UntagParams};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use thiserror::Error;

pub const PODSPEC_PATH: &str = "/podspec.yaml";

#[derive(Error, Debug)]
pub enum PodSpecError {
    #[error("Pod has no podspec.yaml")]
    Missing,
    #[error("Invalid podspec: {0}")]
    Data(#[from] DataError),
    #[error("Invalid podspec key {key}: {message}")]
    InvalidKey { key: String, message: String },
}

// =============================================================================
// Environment
// =============================================================================

/// A named profile selecting host, scheme, and port for URLs, plus the
/// switches that change build behavior.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Env {
    pub name: String,
    pub host: String,
    pub port: Option<u16>,
    pub scheme: String,
    pub cached: bool,
    pub dev: bool,
    /// Value substituted for `{env.fingerprint}` in path patterns.
    pub fingerprint: String,
}

impl Default for Env {
    fn default() -> Self {
        Self {
            name: "default".to_string(),
            host: "localhost".to_string(),
            port: None,
            scheme: "http".to_string(),
            cached: true,
            dev: false,
            fingerprint: "fingerprint".to_string(),
        }
    }
}

impl Env {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Base URL without a trailing slash; default ports are omitted.
    pub fn url(&self) -> String {
        match self.port {
            None | Some(80) | Some(443) => format!("{}://{}", self.scheme, self.host),
            Some(port) => format!("{}://{}:{}", self.scheme, self.host, port),
        }
    }

    pub fn to_value(&self) -> Value {
        let mut value = serde_json::to_value(self).unwrap_or(Value::Null);
        if let Value::Object(map) = &mut value {
            map.insert("url".to_string(), Value::String(self.url()));
        }
        value
    }
}

// =============================================================================
// Typed sections
// =============================================================================

/// Extraction defaults under `localization.extract`.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct ExtractConfig {
    pub include_obsolete: bool,
    pub localized: bool,
    pub include_header: bool,
    pub fuzzy_matching: bool,
    pub locales: Vec<String>,
    pub paths: Vec<String>,
}

/// The `localization` section.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct LocalizationConfig {
    pub default_locale: Option<String>,
    pub locales: Vec<String>,
    pub aliases: BTreeMap<String, String>,
    pub import_as: BTreeMap<String, String>,
    pub groups: Map<String, Value>,
    pub extract: ExtractConfig,
    pub require_translations: bool,
}

/// Localized variant of a static directory.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct StaticLocalization {
    pub static_dir: String,
    pub serve_at: String,
}

/// One entry of `static_dirs`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct StaticDirConfig {
    pub static_dir: String,
    pub serve_at: String,
    #[serde(default)]
    pub fingerprinted: bool,
    #[serde(default)]
    pub localization: Option<StaticLocalization>,
}

/// Filter applied to the sitemap's document set.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct SitemapFilter {
    #[serde(rename = "type")]
    pub kind: String,
    pub collections: Vec<String>,
    pub paths: Vec<String>,
    pub locales: Vec<String>,
}

/// The `sitemap` section.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct SitemapConfig {
    pub enabled: bool,
    pub path: Option<String>,
    pub collections: Vec<String>,
    pub locales: Vec<String>,
    pub template: Option<String>,
    pub filters: Vec<SitemapFilter>,
}

// =============================================================================
// PodSpec
// =============================================================================

/// The parsed podspec plus its untagged view for the active environment.
#[derive(Debug, Clone)]
pub struct PodSpec {
    raw: Value,
    data: Value,
    env: Env,
}

impl PodSpec {
    /// Load `/podspec.yaml` from storage.
    pub fn load(storage: &dyn Storage, env: Env) -> Result<Self, PodSpecError> {
        if !storage.exists(PODSPEC_PATH) {
            return Err(PodSpecError::Missing);
        }
        let loaded = data::load_yaml_file(storage, PODSPEC_PATH)?;
        Ok(Self::from_value(loaded.value, env))
    }

    pub fn from_value(raw: Value, env: Env) -> Self {
        let raw = if raw.is_null() {
            Value::Object(Map::new())
        } else {
            raw
        };
        let data = untag::untag(&raw, None, &UntagParams::with_env(env.name.clone()));
        Self { raw, data, env }
    }

    /// Switch environments and re-derive the untagged view.
    pub fn set_env(&mut self, env: Env) {
        self.data = untag::untag(&self.raw, None, &UntagParams::with_env(env.name.clone()));
        self.env = env;
    }

    pub fn env(&self) -> &Env {
        &self.env
    }

    pub fn raw(&self) -> &Value {
        &self.raw
    }

    pub fn data(&self) -> &Value {
        &self.data
    }

    /// Dotted lookup in the untagged view.
    pub fn get(&self, key_path: &str) -> Option<&Value> {
        data::lookup(&self.data, key_path)
    }

    pub fn get_or(&self, key_path: &str, default: Value) -> Value {
        self.get(key_path).cloned().unwrap_or(default)
    }

    fn section<T: for<'de> Deserialize<'de> + Default>(&self, key: &str) -> Result<T, PodSpecError> {
        match self.get(key) {
            None | Some(Value::Null) => Ok(T::default()),
            Some(value) => serde_json::from_value(value.clone()).map_err(|e| PodSpecError::InvalidKey {
                key: key.to_string(),
                message: e.to_string(),
            }),
        }
    }

    pub fn localization(&self) -> Result<LocalizationConfig, PodSpecError> {
        self.section("localization")
    }

    /// `localization.default_locale`, falling back to a top-level
    /// `default_locale`.
    pub fn default_locale(&self) -> Option<Locale> {
        self.get("localization.default_locale")
            .or_else(|| self.get("default_locale"))
            .and_then(Value::as_str)
            .map(Locale::parse)
    }

    pub fn list_locales(&self) -> Vec<Locale> {
        self.localization()
            .map(|l| Locale::parse_list(&l.locales))
            .unwrap_or_default()
    }

    pub fn locale_registry(&self) -> LocaleRegistry {
        let localization = self.localization().unwrap_or_default();
        LocaleRegistry::new(&localization.aliases, &localization.import_as)
    }

    /// Parameters for untagging pod content under this environment.
    pub fn untag_params(&self) -> UntagParams {
        let mut params = UntagParams::with_env(self.env.name.clone());
        if let Some(groups) = self.get("localization.groups").and_then(Value::as_object) {
            params.locale_groups.push(groups.clone());
        }
        params
    }

    /// URL prefix substituted for `{root}`.
    pub fn root(&self) -> String {
        self.get("root")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .trim_end_matches('/')
            .to_string()
    }

    pub fn static_dirs(&self) -> Result<Vec<StaticDirConfig>, PodSpecError> {
        self.section("static_dirs")
    }

    /// The sitemap config, when enabled.
    pub fn sitemap(&self) -> Result<Option<SitemapConfig>, PodSpecError> {
        let config: SitemapConfig = self.section("sitemap")?;
        Ok(config.enabled.then_some(config))
    }

    /// `error_routes` as (key, view) pairs, e.g. `("404", "/views/404.html")`.
    pub fn error_routes(&self) -> BTreeMap<String, String> {
        self.get("error_routes")
            .and_then(Value::as_object)
            .map(|map| {
                map.iter()
                    .filter_map(|(k, v)| Some((k.clone(), v.as_str()?.to_string())))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Raw deployment configs keyed by name.
    pub fn deployments(&self) -> Map<String, Value> {
        self.get("deployments")
            .and_then(Value::as_object)
            .cloned()
            .unwrap_or_default()
    }

    pub fn project_title(&self) -> Option<String> {
        self.get("translators.project_title")
            .and_then(Value::as_str)
            .map(str::to_string)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::LocalStorage;
    use serde_json::json;
    use tempfile::TempDir;

    #[test]
    fn missing_podspec_is_an_error() {
        let tmp = TempDir::new().unwrap();
        let storage = LocalStorage::new(tmp.path());
        assert!(matches!(
            PodSpec::load(&storage, Env::default()),
            Err(PodSpecError::Missing)
        ));
    }

    #[test]
    fn empty_podspec_loads_with_defaults() {
        let tmp = TempDir::new().unwrap();
        let storage = LocalStorage::new(tmp.path());
        storage.write(PODSPEC_PATH, b"{}\n").unwrap();
        let podspec = PodSpec::load(&storage, Env::default()).unwrap();
        assert_eq!(podspec.default_locale(), None);
        assert!(podspec.list_locales().is_empty());
        assert!(podspec.static_dirs().unwrap().is_empty());
        assert_eq!(podspec.sitemap().unwrap(), None);
    }

    #[test]
    fn localization_section() {
        let podspec = PodSpec::from_value(
            json!({"localization": {"default_locale": "en", "locales": ["en", "de_de"]}}),
            Env::default(),
        );
        assert_eq!(podspec.default_locale(), Some(Locale::parse("en")));
        assert_eq!(podspec.list_locales(), Locale::parse_list(&["en", "de_DE"]));
    }

    #[test]
    fn env_tagged_keys_follow_environment() {
        let mut podspec = PodSpec::from_value(
            json!({"root": "/dev", "root@env.prod": "/site"}),
            Env::default(),
        );
        assert_eq!(podspec.root(), "/dev");

        podspec.set_env(Env::named("prod"));
        assert_eq!(podspec.root(), "/site");
        assert!(podspec.raw().get("root@env.prod").is_some());

        podspec.set_env(Env::named("staging"));
        assert_eq!(podspec.root(), "/dev");
    }

    #[test]
    fn dotted_get_with_default() {
        let podspec = PodSpec::from_value(json!({"a": {"b": 1}}), Env::default());
        assert_eq!(podspec.get("a.b"), Some(&json!(1)));
        assert_eq!(podspec.get_or("a.c", json!("x")), json!("x"));
    }

    #[test]
    fn env_url_omits_default_ports() {
        let mut env = Env::named("prod");
        env.host = "example.com".to_string();
        env.scheme = "https".to_string();
        assert_eq!(env.url(), "https://example.com");
        env.port = Some(8080);
        assert_eq!(env.url(), "https://example.com:8080");
    }

    #[test]
    fn static_dirs_and_sitemap_sections() {
        let podspec = PodSpec::from_value(
            json!({
                "static_dirs": [{"static_dir": "/source/", "serve_at": "/static/", "fingerprinted": true}],
                "sitemap": {"enabled": true, "collections": ["pages"]},
            }),
            Env::default(),
        );
        let dirs = podspec.static_dirs().unwrap();
        assert_eq!(dirs[0].serve_at, "/static/");
        assert!(dirs[0].fingerprinted);
        assert_eq!(podspec.sitemap().unwrap().unwrap().collections, vec!["pages"]);
    }

    #[test]
    fn malformed_section_names_the_key() {
        let podspec = PodSpec::from_value(json!({"static_dirs": "nope"}), Env::default());
        let err = podspec.static_dirs().unwrap_err();
        assert!(err.to_string().contains("static_dirs"));
    }
}
