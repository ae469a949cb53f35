//! Untagging: resolve `@`-suffixed keys against a locale and parameters.
//!
//! Any mapping key may carry a suffix that decides whether its value
//! survives, and under which name:
//!
//! | Key | Kept as | When |
//! |-----|---------|------|
//! | `title` | `title` | always, unless a tagged variant already resolved |
//! | `title@` | `title` | always; marks the value for translation |
//! | `title@#` | | never; a translator comment |
//! | `title@de` | `title` | the active locale matches `^de$` (case-insensitive) |
//! | `title@env.prod` | `title` | the environment name matches `^prod$` |
//! | `title@locale.rtl` | `title` | the active locale is in the `rtl` locale group |
//!
//! Locale tags are anchored regular expressions, so `title@de.*` applies to
//! every German locale. A resolved tagged key always beats the plain key,
//! whichever order they appear in.
//!
//! Lists tagged with a bare `@` are additionally kept under their tagged
//! name so extraction can still find them after untagging.

use crate::locales::Locale;
use regex::{Regex, RegexBuilder};
use serde_json::{Map, Value};
use std::collections::HashSet;
use std::sync::LazyLock;

static LOCALIZED_KEY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(.*)@([^@]+)$").expect("valid regex")
});

static PARAM_KEY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(.*)@(?i:(env|locale))\.([^@]+)$").expect("valid regex")
});

/// Parameter matchers available to `key@<param>.<value>` tags.
#[derive(Debug, Clone, Default)]
pub struct UntagParams {
    /// Name of the active environment, tested by `@env.<regex>`.
    pub env_name: Option<String>,
    /// Locale group tables searched, in order, after the data's own
    /// `$localization.groups` (typically the collection's, then the podspec's).
    pub locale_groups: Vec<Map<String, Value>>,
}

impl UntagParams {
    pub fn with_env(env_name: impl Into<String>) -> Self {
        Self {
            env_name: Some(env_name.into()),
            locale_groups: Vec::new(),
        }
    }
}

/// Untag `data` for `locale` (which may be absent, e.g. when untagging the
/// podspec for an environment only).
pub fn untag(data: &Value, locale: Option<&Locale>, params: &UntagParams) -> Value {
    let mut groups = Vec::new();
    if let Some(own) = data
        .get("$localization")
        .and_then(|l| l.get("groups"))
        .and_then(Value::as_object)
    {
        groups.push(own.clone());
    }
    groups.extend(params.locale_groups.iter().cloned());
    let ctx = Context {
        locale,
        env_name: params.env_name.as_deref(),
        groups: &groups,
    };
    ctx.untag_value(data)
}

/// Whether any key in `data` (recursively) still carries a tag suffix.
pub fn has_tags(data: &Value) -> bool {
    match data {
        Value::Object(map) => map
            .iter()
            .any(|(k, v)| LOCALIZED_KEY.is_match(k) || has_tags(v)),
        Value::Array(items) => items.iter().any(has_tags),
        _ => false,
    }
}

struct Context<'a> {
    locale: Option<&'a Locale>,
    env_name: Option<&'a str>,
    groups: &'a [Map<String, Value>],
}

impl Context<'_> {
    fn untag_value(&self, value: &Value) -> Value {
        match value {
            Value::Object(map) => Value::Object(self.untag_map(map)),
            Value::Array(items) => Value::Array(items.iter().map(|v| self.untag_value(v)).collect()),
            other => other.clone(),
        }
    }

    fn untag_map(&self, map: &Map<String, Value>) -> Map<String, Value> {
        let mut out = Map::new();
        let mut resolved_tags: HashSet<String> = HashSet::new();

        for (key, value) in map {
            if key.ends_with("@#") {
                continue;
            }
            let untagged = self.untag_value(value);

            if let Some(base) = key.strip_suffix('@') {
                if untagged.is_array() {
                    out.insert(key.clone(), untagged.clone());
                }
                if !resolved_tags.contains(base) {
                    out.insert(base.to_string(), untagged);
                }
                continue;
            }

            if let Some(caps) = PARAM_KEY.captures(key) {
                let base = caps.get(1).map_or("", |m| m.as_str());
                let param = caps.get(2).map_or("", |m| m.as_str()).to_lowercase();
                let expected = caps.get(3).map_or("", |m| m.as_str());
                if self.param_matches(&param, expected) {
                    out.insert(base.to_string(), untagged);
                    resolved_tags.insert(base.to_string());
                }
                continue;
            }

            if let Some(caps) = LOCALIZED_KEY.captures(key) {
                let base = caps.get(1).map_or("", |m| m.as_str());
                let tag = caps.get(2).map_or("", |m| m.as_str());
                if let Some(locale) = self.locale
                    && anchored_match(tag, locale.as_str())
                {
                    out.insert(base.to_string(), untagged);
                    resolved_tags.insert(base.to_string());
                }
                continue;
            }

            if !resolved_tags.contains(key) {
                out.insert(key.clone(), untagged);
            }
        }
        out
    }

    fn param_matches(&self, param: &str, expected: &str) -> bool {
        match param {
            "env" => self
                .env_name
                .is_some_and(|name| anchored_match(expected, name)),
            "locale" => {
                let Some(locale) = self.locale else {
                    return false;
                };
                let Some(members) = self.group(expected) else {
                    return false;
                };
                anchored_match(&members.join("|"), locale.as_str())
            }
            _ => false,
        }
    }

    fn group(&self, name: &str) -> Option<Vec<String>> {
        self.groups.iter().find_map(|groups| {
            let members = groups.get(name)?;
            Some(match members {
                Value::Array(items) => items
                    .iter()
                    .filter_map(Value::as_str)
                    .map(str::to_string)
                    .collect(),
                Value::String(single) => vec![single.clone()],
                _ => Vec::new(),
            })
        })
    }
}

/// Case-insensitive `^(?:pattern)$` match; an invalid pattern never matches.
fn anchored_match(pattern: &str, text: &str) -> bool {
    RegexBuilder::new(&format!("^(?:{pattern})$"))
        .case_insensitive(true)
        .build()
        .map(|re| re.is_match(text))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn de() -> Locale {
        Locale::parse("de")
    }

    #[test]
    fn plain_keys_pass_through() {
        let data = json!({"title": "Hello", "nested": {"a": 1}});
        assert_eq!(untag(&data, Some(&de()), &UntagParams::default()), data);
    }

    #[test]
    fn comments_are_dropped() {
        let data = json!({"title@": "Hello", "title@#": "Greeting on the home page"});
        assert_eq!(
            untag(&data, None, &UntagParams::default()),
            json!({"title": "Hello"})
        );
    }

    #[test]
    fn trailing_at_keeps_lists_under_tagged_key() {
        let data = json!({"items@": ["a", "b"]});
        assert_eq!(
            untag(&data, None, &UntagParams::default()),
            json!({"items": ["a", "b"], "items@": ["a", "b"]})
        );
    }

    #[test]
    fn locale_tag_selects_matching_value() {
        let data = json!({"title": "Hello", "title@de": "Hallo", "title@fr": "Bonjour"});
        let params = UntagParams::default();
        assert_eq!(untag(&data, Some(&de()), &params), json!({"title": "Hallo"}));
        assert_eq!(
            untag(&data, Some(&Locale::parse("it")), &params),
            json!({"title": "Hello"})
        );
        assert_eq!(untag(&data, None, &params), json!({"title": "Hello"}));
    }

    #[test]
    fn locale_tag_is_an_anchored_regex() {
        let data = json!({"title": "Hello", "title@de.*": "Hallo"});
        let params = UntagParams::default();
        assert_eq!(
            untag(&data, Some(&Locale::parse("de_AT")), &params),
            json!({"title": "Hallo"})
        );
        let data = json!({"title": "Hello", "title@d": "Nope"});
        assert_eq!(untag(&data, Some(&de()), &params), json!({"title": "Hello"}));
    }

    #[test]
    fn env_param_matches_environment_name() {
        let data = json!({"host": "localhost", "host@env.prod": "example.com"});
        assert_eq!(
            untag(&data, None, &UntagParams::with_env("prod")),
            json!({"host": "example.com"})
        );
        assert_eq!(
            untag(&data, None, &UntagParams::with_env("staging")),
            json!({"host": "localhost"})
        );
    }

    #[test]
    fn locale_group_param_uses_groups_in_order() {
        let data = json!({
            "$localization": {"groups": {"rtl": ["ar", "he_IL"]}},
            "dir": "ltr",
            "dir@locale.rtl": "rtl",
        });
        let params = UntagParams::default();
        let out = untag(&data, Some(&Locale::parse("ar")), &params);
        assert_eq!(out["dir"], "rtl");
        let out = untag(&data, Some(&de()), &params);
        assert_eq!(out["dir"], "ltr");

        let podspec_groups = json!({"dach": ["de", "de_AT", "de_CH"]});
        let params = UntagParams {
            env_name: None,
            locale_groups: vec![podspec_groups.as_object().unwrap().clone()],
        };
        let data = json!({"x": 1, "x@locale.dach": 2});
        assert_eq!(untag(&data, Some(&Locale::parse("de_CH")), &params)["x"], 2);
    }

    #[test]
    fn nested_objects_and_lists_are_untagged() {
        let data = json!({"items": [{"label": "Home", "label@de": "Start"}]});
        assert_eq!(
            untag(&data, Some(&de()), &UntagParams::default()),
            json!({"items": [{"label": "Start"}]})
        );
    }

    #[test]
    fn untag_is_idempotent_once_tags_are_gone() {
        let data = json!({"a": 1, "a@de": 2, "b@": "x", "c": {"d@de": 3}});
        let once = untag(&data, Some(&de()), &UntagParams::default());
        assert!(!has_tags(&once));
        let twice = untag(&once, Some(&de()), &UntagParams::default());
        assert_eq!(once, twice);
    }
}
