//! CLI output formatting for builds, deploys and catalog commands.
//!
//! # Output Format
//!
//! ## Routes
//!
//! ```text
//! Routes (3)
//! /hi/                  doc /content/pages/hi.yaml
//! /de/hi/               doc /content/pages/hi.yaml (de)
//! /static/app.css       static /source/app.css
//! ```
//!
//! ## Diff
//!
//! ```text
//! Changes
//!     add     /c/
//!     edit    /b/       2024-01-01 10:00  Ada <ada@example.com>
//! 1 add, 1 edit, 0 deletes, 1 unchanged
//! Commits: abc1234..def5678
//! ```
//!
//! ## Translation stats
//!
//! ```text
//! de: 12 messages, 2 untranslated
//!     Hello world (3)
//!     Sign in (1)
//! ```
//!
//! # Architecture
//!
//! Each report has a `format_*` function (returns `Vec<String>`) for
//! testability and a `print_*` wrapper that writes to stdout. Format
//! functions are pure: no I/O, no side effects.

use crate::cache::CacheStats;
use crate::catalogs::stats::ROW_COUNT;
use crate::catalogs::{CompileSummary, ImportSummary, Message, StatsExport};
use crate::indexes::Diff;
use crate::locales::Locale;
use crate::router::RouteInfo;
use std::collections::BTreeMap;
use std::time::Duration;

/// Return indentation string: 4 spaces per depth level.
fn indent(depth: usize) -> String {
    "    ".repeat(depth)
}

/// Truncate to `max` characters, adding "..." if truncated.
fn truncate(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        text.to_string()
    } else {
        let truncated: String = text.chars().take(max).collect();
        format!("{}...", truncated)
    }
}

fn plural(count: usize, one: &str, many: &str) -> String {
    if count == 1 {
        format!("{count} {one}")
    } else {
        format!("{count} {many}")
    }
}

// ============================================================================
// Routes
// ============================================================================

pub fn format_routes(routes: &[(String, RouteInfo)]) -> Vec<String> {
    let width = routes.iter().map(|(p, _)| p.len()).max().unwrap_or(0);
    let mut lines = vec![format!("Routes ({})", routes.len())];
    for (path, info) in routes {
        lines.push(format!("{:<width$}  {}", path, info));
    }
    lines
}

pub fn print_routes(routes: &[(String, RouteInfo)]) {
    for line in format_routes(routes) {
        println!("{}", line);
    }
}

// ============================================================================
// Build
// ============================================================================

pub fn format_build_summary(
    written: usize,
    out_dir: &str,
    cache: Option<CacheStats>,
    elapsed: Duration,
) -> Vec<String> {
    let mut lines = vec![format!(
        "Built {} to {} in {:.1}s",
        plural(written, "file", "files"),
        out_dir,
        elapsed.as_secs_f64()
    )];
    if let Some(stats) = cache {
        lines.push(format!("{}Rendered: {}", indent(1), stats));
    }
    lines
}

pub fn print_build_summary(written: usize, out_dir: &str, cache: Option<CacheStats>, elapsed: Duration) {
    for line in format_build_summary(written, out_dir, cache, elapsed) {
        println!("{}", line);
    }
}

// ============================================================================
// Diff
// ============================================================================

pub fn format_diff(diff: &Diff) -> Vec<String> {
    let rows = diff.pretty_print();
    let mut lines = Vec::new();
    if !rows.is_empty() {
        lines.push("Changes".to_string());
        let width = rows.iter().map(|r| r.path.len()).max().unwrap_or(0);
        for row in &rows {
            let mut line = format!("{}{:<7} {:<width$}", indent(1), row.action.label(), row.path);
            if !row.deployed.is_empty() || !row.deployed_by.is_empty() {
                line.push_str(&format!("  {}  {}", row.deployed, row.deployed_by));
            }
            lines.push(line.trim_end().to_string());
        }
    }
    lines.push(format!(
        "{}, {}, {}, {} unchanged",
        plural(diff.adds.len(), "add", "adds"),
        plural(diff.edits.len(), "edit", "edits"),
        plural(diff.deletes.len(), "delete", "deletes"),
        diff.nochanges.len()
    ));
    if diff.is_partial {
        lines.push(format!("{}Partial deploy: deletes are skipped", indent(1)));
    }
    if let Some(range) = diff.between_commits() {
        lines.push(format!("Commits: {}", range));
    }
    if let Some(log) = &diff.what_changed {
        lines.extend(log.lines().map(|l| format!("{}{}", indent(1), l)));
    }
    lines
}

pub fn print_diff(diff: &Diff) {
    for line in format_diff(diff) {
        println!("{}", line);
    }
}

// ============================================================================
// Translations
// ============================================================================

/// Per-locale message and untranslated counts, with the most requested
/// untranslated messages. `all` lifts the row limit.
pub fn format_stats(stats: &StatsExport, all: bool) -> Vec<String> {
    let mut lines = Vec::new();
    for (locale, messages) in &stats.messages {
        let untranslated = stats.untranslated.get(locale);
        let missing = untranslated.map(BTreeMap::len).unwrap_or(0);
        lines.push(format!(
            "{}: {}, {} untranslated",
            locale,
            plural(messages.len(), "message", "messages"),
            missing
        ));
        let Some(untranslated) = untranslated else {
            continue;
        };
        let mut rows: Vec<(&String, &usize)> = untranslated.iter().collect();
        rows.sort_by(|a, b| b.1.cmp(a.1).then_with(|| a.0.cmp(b.0)));
        let limit = if all { rows.len() } else { ROW_COUNT };
        for (id, count) in rows.iter().take(limit) {
            lines.push(format!("{}{} ({})", indent(1), truncate(id, 60), count));
        }
        if rows.len() > limit {
            lines.push(format!("{}... {} more", indent(1), rows.len() - limit));
        }
    }
    if !stats.untagged.is_empty() {
        lines.push(format!("Untagged strings ({})", stats.untagged.len()));
        for (path, string) in &stats.untagged {
            lines.push(format!("{}{}: {}", indent(1), path, truncate(string, 60)));
        }
    }
    if lines.is_empty() {
        lines.push("No translations requested.".to_string());
    }
    lines
}

pub fn print_stats(stats: &StatsExport, all: bool) {
    for line in format_stats(stats, all) {
        println!("{}", line);
    }
}

pub fn format_untranslated(untranslated: &BTreeMap<Locale, Vec<Message>>) -> Vec<String> {
    let mut lines = Vec::new();
    for (locale, messages) in untranslated {
        lines.push(format!("{} ({} untranslated)", locale, messages.len()));
        for message in messages {
            lines.push(format!("{}{}", indent(1), message.id));
            for location in &message.locations {
                lines.push(format!("{}{}", indent(2), location));
            }
        }
    }
    lines
}

pub fn print_untranslated(untranslated: &BTreeMap<Locale, Vec<Message>>) {
    for line in format_untranslated(untranslated) {
        println!("{}", line);
    }
}

pub fn format_compile(summaries: &[CompileSummary]) -> Vec<String> {
    if summaries.is_empty() {
        return vec!["No catalogs to compile.".to_string()];
    }
    summaries
        .iter()
        .map(|s| format!("{}: {}/{} translated", s.locale, s.translated, s.total))
        .collect()
}

pub fn print_compile(summaries: &[CompileSummary]) {
    for line in format_compile(summaries) {
        println!("{}", line);
    }
}

pub fn format_import(summary: &ImportSummary) -> Vec<String> {
    if !summary.changed {
        return vec!["No translations imported.".to_string()];
    }
    vec![format!(
        "Imported {} of {}",
        plural(summary.imported, "translation", "translations"),
        summary.total
    )]
}

pub fn print_import(summary: &ImportSummary) {
    for line in format_import(summary) {
        println!("{}", line);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::indexes::{Author, FileMessage};

    fn file(path: &str) -> FileMessage {
        FileMessage {
            path: path.to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn truncate_long_text() {
        assert_eq!(truncate("short", 10), "short");
        assert_eq!(truncate(&"a".repeat(12), 10), format!("{}...", "a".repeat(10)));
    }

    #[test]
    fn plural_forms() {
        assert_eq!(plural(1, "add", "adds"), "1 add");
        assert_eq!(plural(0, "add", "adds"), "0 adds");
    }

    #[test]
    fn routes_are_aligned() {
        let routes = vec![
            (
                "/hi/".to_string(),
                RouteInfo::Doc {
                    pod_path: "/content/pages/hi.yaml".to_string(),
                    locale: None,
                    collection_path: "/content/pages".to_string(),
                },
            ),
            (
                "/de/hi/".to_string(),
                RouteInfo::Doc {
                    pod_path: "/content/pages/hi.yaml".to_string(),
                    locale: Some(Locale::parse("de")),
                    collection_path: "/content/pages".to_string(),
                },
            ),
        ];
        let lines = format_routes(&routes);
        assert_eq!(lines[0], "Routes (2)");
        assert_eq!(lines[1], "/hi/     doc /content/pages/hi.yaml");
        assert_eq!(lines[2], "/de/hi/  doc /content/pages/hi.yaml (de)");
    }

    #[test]
    fn diff_lists_changes_sorted_with_counts() {
        let diff = Diff {
            adds: vec![file("/c/")],
            edits: vec![FileMessage {
                deployed: Some("2024-01-01T10:00:00+00:00".to_string()),
                deployed_by: Some(Author {
                    name: "Ada".to_string(),
                    email: "ada@example.com".to_string(),
                }),
                ..file("/b/")
            }],
            nochanges: vec![file("/a/")],
            ..Default::default()
        };
        let lines = format_diff(&diff);
        assert_eq!(lines[0], "Changes");
        assert_eq!(lines[1], "    edit    /b/  2024-01-01 10:00  Ada <ada@example.com>");
        assert_eq!(lines[2], "    add     /c/");
        assert_eq!(lines[3], "1 add, 1 edit, 0 deletes, 1 unchanged");
    }

    #[test]
    fn empty_diff_has_only_counts() {
        let lines = format_diff(&Diff::default());
        assert_eq!(lines, vec!["0 adds, 0 edits, 0 deletes, 0 unchanged"]);
    }

    #[test]
    fn stats_limit_rows_unless_all() {
        let mut untranslated = BTreeMap::new();
        let mut messages = BTreeMap::new();
        let mut missing = BTreeMap::new();
        for i in 0..10 {
            messages.insert(format!("m{i}"), i);
            missing.insert(format!("m{i}"), i);
        }
        untranslated.insert("de".to_string(), missing);
        let stats = StatsExport {
            messages: BTreeMap::from([("de".to_string(), messages)]),
            untranslated,
            untagged: vec![],
        };
        let lines = format_stats(&stats, false);
        assert_eq!(lines[0], "de: 10 messages, 10 untranslated");
        assert_eq!(lines[1], "    m9 (9)");
        assert_eq!(lines.len(), 1 + ROW_COUNT + 1);
        assert_eq!(lines.last().unwrap(), "    ... 3 more");
        assert_eq!(format_stats(&stats, true).len(), 11);
    }

    #[test]
    fn compile_and_import_summaries() {
        let summaries = vec![CompileSummary {
            locale: Locale::parse("de"),
            translated: 3,
            total: 4,
        }];
        assert_eq!(format_compile(&summaries), vec!["de: 3/4 translated"]);
        assert_eq!(format_compile(&[]), vec!["No catalogs to compile."]);
        let summary = ImportSummary {
            changed: true,
            imported: 2,
            total: 5,
        };
        assert_eq!(format_import(&summary), vec!["Imported 2 translations of 5"]);
    }

    #[test]
    fn build_summary_shows_cache_stats() {
        let stats = CacheStats {
            inline: 3,
            ..Default::default()
        };
        let lines = format_build_summary(3, "build", Some(stats), Duration::from_millis(1500));
        assert_eq!(lines[0], "Built 3 files to build in 1.5s");
        assert_eq!(lines[1], "    Rendered: 3 in memory");
    }
}
