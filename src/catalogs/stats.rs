//! Translation lookups recorded during a render.
//!
//! Every `_()` call ticks the collector with its locale and, when the
//! render knows it, the pod path of the template or document it came from.
//! A tick is *untranslated* when the lookup produced no translation, the
//! message is not blank, and the locale is not the pod's default locale.
//! Render workers tick concurrently, so the state lives behind a mutex.

use super::catalog::{Catalog, Message};
use crate::locales::Locale;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Mutex, MutexGuard};

/// Rows shown per table unless all rows are requested.
pub const ROW_COUNT: usize = 7;

/// `locale → msgid → count`.
pub type MessageCounts = BTreeMap<String, BTreeMap<String, usize>>;

#[derive(Debug, Clone, PartialEq)]
struct Occurrence {
    locale: String,
    id: String,
    location: Option<String>,
}

#[derive(Debug, Default)]
struct State {
    messages: MessageCounts,
    untranslated: BTreeMap<String, BTreeSet<String>>,
    occurrences: Vec<Occurrence>,
    untagged: Vec<(String, String)>,
}

#[derive(Debug, Default)]
pub struct TranslationStats {
    state: Mutex<State>,
}

/// JSON form written to `stats.proto.json`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatsExport {
    pub messages: MessageCounts,
    pub untranslated: MessageCounts,
    pub untagged: Vec<(String, String)>,
}

impl TranslationStats {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn tick(
        &self,
        msgid: &str,
        translated: bool,
        locale: &Locale,
        default_locale: Option<&Locale>,
        location: Option<&str>,
    ) {
        if msgid.is_empty() {
            return;
        }
        let mut state = self.lock();
        *state
            .messages
            .entry(locale.to_string())
            .or_default()
            .entry(msgid.to_string())
            .or_default() += 1;

        if !translated && !msgid.trim().is_empty() && Some(locale) != default_locale {
            state.occurrences.push(Occurrence {
                locale: locale.to_string(),
                id: msgid.to_string(),
                location: location.map(str::to_string),
            });
            state
                .untranslated
                .entry(locale.to_string())
                .or_default()
                .insert(msgid.to_string());
        }
    }

    /// Record untagged `(pod_path, string)` pairs found by an extraction audit.
    pub fn add_untagged(&self, untagged: Vec<(String, String)>) {
        self.lock().untagged = untagged;
    }

    pub fn untagged(&self) -> Vec<(String, String)> {
        self.lock().untagged.clone()
    }

    pub fn messages(&self) -> MessageCounts {
        self.lock().messages.clone()
    }

    /// Untranslated messages per locale, with their lookup counts.
    pub fn untranslated(&self) -> MessageCounts {
        let state = self.lock();
        untranslated_counts(&state, |_| true)
    }

    /// Untranslated messages that were also reported untagged.
    pub fn missing(&self) -> MessageCounts {
        let state = self.lock();
        let untagged: BTreeSet<&str> = state.untagged.iter().map(|(_, s)| s.as_str()).collect();
        let mut counts = untranslated_counts(&state, |id| untagged.contains(id));
        counts.retain(|_, messages| !messages.is_empty());
        counts
    }

    /// Distinct untranslated message ids across all locales.
    pub fn count_untranslated(&self) -> usize {
        let state = self.lock();
        state
            .untranslated
            .values()
            .flatten()
            .collect::<BTreeSet<_>>()
            .len()
    }

    /// Number of untranslated lookups, counting repeats.
    pub fn count_occurrences(&self) -> usize {
        self.lock().occurrences.len()
    }

    pub fn export(&self) -> StatsExport {
        StatsExport {
            messages: self.messages(),
            untranslated: self.untranslated(),
            untagged: self.untagged(),
        }
    }

    /// One catalog per locale holding that locale's untranslated messages,
    /// located where they were looked up.
    pub fn export_untranslated_catalogs(&self) -> BTreeMap<Locale, Catalog> {
        let state = self.lock();
        let mut catalogs: BTreeMap<Locale, Catalog> = BTreeMap::new();
        for (locale, ids) in &state.untranslated {
            let locale = Locale::parse(locale);
            let catalog = catalogs
                .entry(locale.clone())
                .or_insert_with(|| Catalog::new(Some(locale.clone())));
            for id in ids {
                let mut message = Message::new(id.clone(), "");
                for occurrence in &state.occurrences {
                    if occurrence.locale == locale.as_str()
                        && &occurrence.id == id
                        && let Some(location) = &occurrence.location
                    {
                        message = message.with_location(location, None);
                    }
                }
                catalog.add(message);
            }
        }
        catalogs
    }

    /// Plain-text log of every untranslated lookup, grouped per occurrence.
    pub fn untranslated_report(&self, now: &str) -> String {
        const WIDTH: usize = 80;
        let solid = "=".repeat(WIDTH);
        let text_line = |text: &str| format!("=== {:^72} ===\n", text);

        let count = self.count_untranslated();
        let state = self.lock();
        let mut out = String::new();
        out.push_str(&format!("{}\n", solid));
        out.push_str(&text_line("Untranslated Strings"));
        out.push_str(&format!("{}\n", solid));
        out.push_str(&text_line(&format!(
            "{} occurrences of {} untranslated strings",
            state.occurrences.len(),
            count
        )));
        out.push_str(&text_line(now));
        out.push_str(&format!("{}\n\n", solid));
        if state.occurrences.is_empty() {
            out.push_str(&text_line("No untranslated strings found."));
            return out;
        }
        for occurrence in &state.occurrences {
            out.push_str(&format!("{} :: {}\n", occurrence.locale, occurrence.id));
            if let Some(location) = &occurrence.location {
                out.push_str(&format!("  at {}\n", location));
            }
            out.push('\n');
        }
        out
    }

    pub fn reset(&self) {
        *self.lock() = State::default();
    }
}

fn untranslated_counts(state: &State, keep: impl Fn(&str) -> bool) -> MessageCounts {
    let mut counts = MessageCounts::new();
    for (locale, ids) in &state.untranslated {
        let entry = counts.entry(locale.clone()).or_default();
        for id in ids.iter().filter(|id| keep(id)) {
            let count = state
                .messages
                .get(locale)
                .and_then(|m| m.get(id))
                .copied()
                .unwrap_or_default();
            entry.insert(id.clone(), count);
        }
    }
    counts
}
