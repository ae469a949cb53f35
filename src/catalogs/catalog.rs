//! In-memory gettext catalog: messages keyed by `(msgid, msgctxt)`.
//!
//! A catalog is either a *template* (`locale == None`, every `msgstr`
//! empty) or a per-locale translation table. Messages are held sorted by
//! id then context, which is also the order they are written in.

use crate::locales::Locale;
use std::collections::{BTreeMap, BTreeSet};

/// Minimum similarity for a fuzzy match when merging a template.
const FUZZY_CUTOFF: f64 = 0.6;

pub const DEFAULT_PROJECT_TITLE: &str = "Untitled Grow Website";

/// Sort and lookup key of a message.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct MessageKey {
    pub id: String,
    pub context: Option<String>,
}

impl MessageKey {
    pub fn new(id: impl Into<String>, context: Option<String>) -> Self {
        Self {
            id: id.into(),
            context,
        }
    }
}

/// A source location (`#: /views/base.html:12`).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Location {
    pub path: String,
    pub line: Option<u32>,
}

impl Location {
    pub fn new(path: impl Into<String>, line: Option<u32>) -> Self {
        Self {
            path: path.into(),
            line: line.filter(|l| *l > 0),
        }
    }

    /// Parse `path` or `path:line`.
    pub fn parse(text: &str) -> Self {
        match text.rsplit_once(':') {
            Some((path, line)) if line.chars().all(|c| c.is_ascii_digit()) && !line.is_empty() => {
                Self::new(path, line.parse().ok())
            }
            _ => Self::new(text, None),
        }
    }
}

impl std::fmt::Display for Location {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.line {
            Some(line) => write!(f, "{}:{}", self.path, line),
            None => write!(f, "{}", self.path),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Message {
    pub id: String,
    pub context: Option<String>,
    pub plural: Option<String>,
    /// `msgstr`, or `msgstr[n]` for plural messages.
    pub strings: Vec<String>,
    pub locations: BTreeSet<Location>,
    pub flags: BTreeSet<String>,
    /// `#.` comments.
    pub auto_comments: Vec<String>,
    /// `# ` comments.
    pub user_comments: Vec<String>,
}

impl Message {
    pub fn new(id: impl Into<String>, string: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            strings: vec![string.into()],
            ..Default::default()
        }
    }

    pub fn key(&self) -> MessageKey {
        MessageKey::new(self.id.clone(), self.context.clone())
    }

    /// The singular translation, empty when untranslated.
    pub fn string(&self) -> &str {
        self.strings.first().map(String::as_str).unwrap_or_default()
    }

    pub fn set_string(&mut self, string: impl Into<String>) {
        match self.strings.first_mut() {
            Some(first) => *first = string.into(),
            None => self.strings.push(string.into()),
        }
    }

    pub fn is_translated(&self) -> bool {
        self.strings.iter().any(|s| !s.is_empty())
    }

    pub fn is_fuzzy(&self) -> bool {
        self.flags.contains("fuzzy")
    }

    /// Untranslated, or translated but flagged fuzzy.
    pub fn needs_translation(&self) -> bool {
        !self.is_translated() || self.is_fuzzy()
    }

    pub fn with_location(mut self, path: &str, line: Option<u32>) -> Self {
        self.locations.insert(Location::new(path, line));
        self
    }

    pub fn with_auto_comment(mut self, comment: impl Into<String>) -> Self {
        self.auto_comments.push(comment.into());
        self
    }

    /// Whether any location path matches one of `patterns` (shell globs,
    /// leading slashes ignored on both sides).
    pub fn in_paths<S: AsRef<str>>(&self, patterns: &[S]) -> bool {
        self.locations.iter().any(|location| {
            let path = location.path.trim_start_matches('/');
            patterns.iter().any(|pattern| {
                crate::dependency::glob_match(pattern.as_ref().trim_start_matches('/'), path)
            })
        })
    }
}

/// One gettext catalog.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Catalog {
    pub locale: Option<Locale>,
    /// Lines of the leading `# ` comment block, without the `# ` prefix.
    pub header_comment: Vec<String>,
    /// Header fields in file order (`Language`, `Content-Type`, ...).
    pub headers: Vec<(String, String)>,
    /// Whether the header entry itself is flagged fuzzy.
    pub fuzzy_header: bool,
    messages: BTreeMap<MessageKey, Message>,
    obsolete: BTreeMap<MessageKey, Message>,
}

impl Catalog {
    pub fn new(locale: Option<Locale>) -> Self {
        let mut catalog = Self {
            locale,
            ..Default::default()
        };
        catalog.headers = catalog.default_headers();
        catalog
    }

    fn default_headers(&self) -> Vec<(String, String)> {
        let mut headers = vec![
            ("Project-Id-Version".to_string(), "PROJECT VERSION".to_string()),
            ("MIME-Version".to_string(), "1.0".to_string()),
            (
                "Content-Type".to_string(),
                "text/plain; charset=utf-8".to_string(),
            ),
            ("Content-Transfer-Encoding".to_string(), "8bit".to_string()),
        ];
        if let Some(locale) = &self.locale {
            headers.insert(1, ("Language".to_string(), locale.to_string()));
            headers.push((
                "Plural-Forms".to_string(),
                "nplurals=2; plural=(n != 1);".to_string(),
            ));
        }
        headers
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn set_header(&mut self, name: &str, value: impl Into<String>) {
        let value = value.into();
        match self.headers.iter_mut().find(|(k, _)| k.eq_ignore_ascii_case(name)) {
            Some((_, v)) => *v = value,
            None => self.headers.push((name.to_string(), value)),
        }
    }

    /// Replace the header comment with the project title block.
    pub fn set_project_title(&mut self, title: &str) {
        let title_line = match &self.locale {
            Some(locale) => format!("{} ({})", title, locale.language()),
            None => title.to_string(),
        };
        self.header_comment = vec!["PROJECT TITLE:".to_string(), title_line];
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn contains(&self, id: &str, context: Option<&str>) -> bool {
        self.get(id, context).is_some()
    }

    pub fn get(&self, id: &str, context: Option<&str>) -> Option<&Message> {
        self.messages
            .get(&MessageKey::new(id, context.map(str::to_string)))
    }

    pub fn get_mut(&mut self, id: &str, context: Option<&str>) -> Option<&mut Message> {
        self.messages
            .get_mut(&MessageKey::new(id, context.map(str::to_string)))
    }

    /// Insert or replace a message wholesale.
    pub fn insert(&mut self, message: Message) {
        self.messages.insert(message.key(), message);
    }

    /// Add a message, merging locations, flags and comments into an existing
    /// entry with the same key. The existing translation is kept.
    pub fn add(&mut self, message: Message) {
        match self.messages.get_mut(&message.key()) {
            Some(existing) => {
                existing.locations.extend(message.locations);
                existing.flags.extend(message.flags);
                for comment in message.auto_comments {
                    if !existing.auto_comments.contains(&comment) {
                        existing.auto_comments.push(comment);
                    }
                }
                if existing.plural.is_none() {
                    existing.plural = message.plural;
                }
            }
            None => self.insert(message),
        }
    }

    pub fn remove(&mut self, id: &str, context: Option<&str>) -> Option<Message> {
        self.messages
            .remove(&MessageKey::new(id, context.map(str::to_string)))
    }

    pub fn messages(&self) -> impl Iterator<Item = &Message> {
        self.messages.values()
    }

    pub fn obsolete(&self) -> impl Iterator<Item = &Message> {
        self.obsolete.values()
    }

    pub fn insert_obsolete(&mut self, message: Message) {
        self.obsolete.insert(message.key(), message);
    }

    pub fn clear_obsolete(&mut self) {
        self.obsolete.clear();
    }

    /// Move obsolete entries back into the live message table.
    pub fn merge_obsolete(&mut self) {
        let obsolete = std::mem::take(&mut self.obsolete);
        for (key, message) in obsolete {
            self.messages.entry(key).or_insert(message);
        }
    }

    pub fn translated_count(&self) -> usize {
        self.messages.values().filter(|m| m.is_translated()).count()
    }

    /// Messages still needing work, fuzzy ones included, optionally limited
    /// to those with a location matching `paths`.
    pub fn list_untranslated<S: AsRef<str>>(&self, paths: &[S]) -> Vec<&Message> {
        self.messages
            .values()
            .filter(|m| paths.is_empty() || m.in_paths(paths))
            .filter(|m| m.needs_translation())
            .collect()
    }

    /// Messages present here but absent from `other`.
    pub fn diff<'a>(&'a self, other: &Catalog) -> Vec<&'a Message> {
        self.messages
            .iter()
            .filter(|(key, _)| !key.id.is_empty() && !other.messages.contains_key(key))
            .map(|(_, m)| m)
            .collect()
    }

    /// Merge a template into this catalog.
    ///
    /// Every template message ends up here with its template locations and
    /// comments; existing translations are kept. Messages absent from the
    /// template become obsolete. With `fuzzy`, a new message inherits the
    /// translation of the most similar obsolete message and is flagged
    /// `fuzzy`.
    pub fn update(&mut self, template: &Catalog, fuzzy: bool) {
        let mut previous = std::mem::take(&mut self.messages);
        let mut remaining_obsolete = std::mem::take(&mut self.obsolete);

        for (key, template_message) in &template.messages {
            let mut message = match previous.remove(key) {
                Some(mut existing) => {
                    existing.locations = template_message.locations.clone();
                    existing.auto_comments = template_message.auto_comments.clone();
                    existing.plural = template_message.plural.clone();
                    existing
                }
                None => {
                    let mut message = template_message.clone();
                    message.strings = vec![String::new(); template_message.strings.len().max(1)];
                    message
                }
            };
            if !message.is_translated() && fuzzy {
                let candidate = previous
                    .iter()
                    .chain(remaining_obsolete.iter())
                    .filter(|(_, m)| m.is_translated() && m.context == message.context)
                    .map(|(k, m)| (similarity(&k.id, &message.id), m))
                    .filter(|(score, _)| *score >= FUZZY_CUTOFF)
                    .max_by(|a, b| a.0.total_cmp(&b.0));
                if let Some((_, similar)) = candidate {
                    message.strings = similar.strings.clone();
                    message.flags.insert("fuzzy".to_string());
                }
            }
            self.messages.insert(key.clone(), message);
        }

        for (key, message) in previous {
            if !key.id.is_empty() {
                remaining_obsolete.insert(key, message);
            }
        }
        self.obsolete = remaining_obsolete;
    }
}

/// Ratio of matching characters: `2 * lcs / (len(a) + len(b))`.
pub fn similarity(a: &str, b: &str) -> f64 {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    let total = a.len() + b.len();
    if total == 0 {
        return 1.0;
    }
    let mut row = vec![0usize; b.len() + 1];
    for ca in &a {
        let mut diagonal = 0;
        for (j, cb) in b.iter().enumerate() {
            let above = row[j + 1];
            row[j + 1] = if ca == cb {
                diagonal + 1
            } else {
                above.max(row[j])
            };
            diagonal = above;
        }
    }
    (2 * row[b.len()]) as f64 / total as f64
}

#[cfg(test)]
mod tests {
    use super::*;

    fn template(ids: &[&str]) -> Catalog {
        let mut catalog = Catalog::new(None);
        for id in ids {
            catalog.add(Message::new(*id, "").with_location("/views/base.html", Some(3)));
        }
        catalog
    }

    #[test]
    fn update_keeps_translations_and_obsoletes_missing() {
        let mut de = Catalog::new(Some(Locale::parse("de")));
        de.insert(Message::new("Hello", "Hallo"));
        de.insert(Message::new("Gone", "Weg"));

        de.update(&template(&["Hello", "World"]), false);

        assert_eq!(de.get("Hello", None).unwrap().string(), "Hallo");
        assert!(!de.get("World", None).unwrap().is_translated());
        assert!(!de.contains("Gone", None));
        assert_eq!(de.obsolete().count(), 1);
        assert_eq!(
            de.get("Hello", None).unwrap().locations.iter().next().unwrap().to_string(),
            "/views/base.html:3"
        );
    }

    #[test]
    fn fuzzy_update_carries_similar_translation() {
        let mut de = Catalog::new(Some(Locale::parse("de")));
        de.insert(Message::new("Hello world", "Hallo Welt"));

        de.update(&template(&["Hello world!"]), true);

        let message = de.get("Hello world!", None).unwrap();
        assert_eq!(message.string(), "Hallo Welt");
        assert!(message.is_fuzzy());
        assert!(message.needs_translation());
    }

    #[test]
    fn merge_obsolete_restores_entries() {
        let mut de = Catalog::new(Some(Locale::parse("de")));
        de.insert(Message::new("Gone", "Weg"));
        de.update(&template(&[]), false);
        assert!(de.is_empty());
        de.merge_obsolete();
        assert_eq!(de.get("Gone", None).unwrap().string(), "Weg");
    }

    #[test]
    fn add_merges_locations() {
        let mut catalog = template(&["Hello"]);
        catalog.add(Message::new("Hello", "").with_location("/content/a.yaml", None));
        assert_eq!(catalog.len(), 1);
        assert_eq!(catalog.get("Hello", None).unwrap().locations.len(), 2);
    }

    #[test]
    fn context_distinguishes_messages() {
        let mut catalog = Catalog::new(None);
        catalog.insert(Message::new("May", ""));
        let mut month = Message::new("May", "");
        month.context = Some("month".to_string());
        catalog.insert(month);
        assert_eq!(catalog.len(), 2);
        assert!(catalog.contains("May", Some("month")));
    }

    #[test]
    fn untranslated_filtered_by_location() {
        let mut de = Catalog::new(Some(Locale::parse("de")));
        de.insert(Message::new("A", "").with_location("/content/pages/a.yaml", None));
        de.insert(Message::new("B", "").with_location("/views/base.html", None));
        de.insert(Message::new("C", "Ce").with_location("/views/base.html", None));

        assert_eq!(de.list_untranslated::<&str>(&[]).len(), 2);
        let ids: Vec<&str> = de
            .list_untranslated(&["content/*"])
            .iter()
            .map(|m| m.id.as_str())
            .collect();
        assert_eq!(ids, vec!["A"]);
    }

    #[test]
    fn diff_lists_messages_missing_from_other() {
        let mut a = Catalog::new(None);
        a.insert(Message::new("A", ""));
        a.insert(Message::new("B", ""));
        let mut b = Catalog::new(None);
        b.insert(Message::new("A", ""));
        let ids: Vec<&str> = a.diff(&b).iter().map(|m| m.id.as_str()).collect();
        assert_eq!(ids, vec!["B"]);
    }

    #[test]
    fn location_parsing() {
        assert_eq!(Location::parse("/a.html:12"), Location::new("/a.html", Some(12)));
        assert_eq!(Location::parse("/a.yaml"), Location::new("/a.yaml", None));
        assert_eq!(Location::new("/a.yaml", Some(0)).to_string(), "/a.yaml");
    }

    #[test]
    fn project_title_comment() {
        let mut de = Catalog::new(Some(Locale::parse("de_DE")));
        de.set_project_title(DEFAULT_PROJECT_TITLE);
        assert_eq!(de.header_comment[1], "Untitled Grow Website (de)");
        assert_eq!(de.header("language"), Some("de_DE"));
    }

    #[test]
    fn similarity_ratio() {
        assert_eq!(similarity("abc", "abc"), 1.0);
        assert_eq!(similarity("abc", "xyz"), 0.0);
        assert!(similarity("Hello world", "Hello world!") > 0.9);
    }
}
