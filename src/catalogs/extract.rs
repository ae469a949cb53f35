//! Message discovery in YAML fields and template sources.
//!
//! Tagged YAML fields end with `@`; a sibling `key@#` becomes the extracted
//! comment of `key@`:
//!
//! ```yaml
//! title@: About us
//! title@#: Page heading, keep it short.
//! tags@: [News, Events]
//! ```
//!
//! Template sources and document bodies mark messages with `_("...")`,
//! `_('...')` or `_(text="...")`.

use super::catalog::{Catalog, Message};
use crate::locales::Locale;
use regex::Regex;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::sync::LazyLock;

static TRANSLATE_CALL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?:^|[^\w.])_\(\s*(?:text\s*=\s*)?(?:"((?:[^"\\]|\\.)*)"|'((?:[^'\\]|\\.)*)')"#)
        .expect("valid regex")
});

/// Every `_()` message in a template source, with its 1-based line.
pub fn template_messages(source: &str) -> Vec<(u32, String)> {
    TRANSLATE_CALL
        .captures_iter(source)
        .filter_map(|caps| {
            let text = caps.get(1).or_else(|| caps.get(2))?;
            let line = source[..text.start()].matches('\n').count() as u32 + 1;
            Some((line, unescape(text.as_str())))
        })
        .filter(|(_, msgid)| !msgid.is_empty())
        .collect()
}

fn unescape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut chars = text.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('t') => out.push('\t'),
            Some(other) => out.push(other),
            None => out.push('\\'),
        }
    }
    out
}

/// Accumulates messages from every extraction source.
///
/// An empty locale list reaches the unlocalized catalog only.
#[derive(Debug, Default)]
pub struct Extraction {
    pub localized: BTreeMap<Locale, Catalog>,
    pub unlocalized: Catalog,
    pub untagged: Vec<(String, String)>,
}

impl Extraction {
    pub fn new() -> Self {
        Self {
            unlocalized: Catalog::new(None),
            ..Default::default()
        }
    }

    pub fn add(&mut self, message: Message, locales: &[Locale]) {
        for locale in locales {
            self.localized
                .entry(locale.clone())
                .or_insert_with(|| Catalog::new(None))
                .add(message.clone());
        }
        self.unlocalized.add(message);
    }

    /// Walk raw (still tagged) YAML data from `path`.
    pub fn add_fields(&mut self, path: &str, data: &Value, locales: &[Locale]) {
        if let Value::Object(map) = data {
            self.walk_map(path, map, locales);
        } else if let Value::Array(items) = data {
            for item in items {
                self.add_fields(path, item, locales);
            }
        }
    }

    fn walk_map(&mut self, path: &str, map: &Map<String, Value>, locales: &[Locale]) {
        for (key, value) in map {
            match value {
                Value::String(msgid) => self.handle_field(path, key, msgid, map, locales),
                Value::Array(items) => {
                    for item in items {
                        match item {
                            Value::String(msgid) => self.handle_field(path, key, msgid, map, locales),
                            other => self.add_fields(path, other, locales),
                        }
                    }
                }
                Value::Object(inner) => self.walk_map(path, inner, locales),
                _ => {}
            }
        }
    }

    fn handle_field(
        &mut self,
        path: &str,
        key: &str,
        msgid: &str,
        node: &Map<String, Value>,
        locales: &[Locale],
    ) {
        if key.is_empty() {
            return;
        }
        if !key.ends_with('@') {
            if !msgid.is_empty() && !key.starts_with('$') && !key.contains('@') {
                self.untagged.push((path.to_string(), msgid.to_string()));
            }
            return;
        }
        if msgid.is_empty() {
            return;
        }
        let mut message = Message::new(msgid, "").with_location(path, None);
        if let Some(comment) = node.get(&format!("{}#", key)).and_then(Value::as_str)
            && !comment.is_empty()
        {
            message = message.with_auto_comment(comment);
        }
        self.add(message, locales);
    }

    /// Add every `_()` call found in a template or document body.
    pub fn add_template(&mut self, path: &str, source: &str, locales: &[Locale]) {
        for (line, msgid) in template_messages(source) {
            self.add(Message::new(msgid, "").with_location(path, Some(line)), locales);
        }
    }
}
