//! Gettext `.po` / `.pot` text format.
//!
//! ```text
//! # PROJECT TITLE:
//! # Example (de)
//! msgid ""
//! msgstr ""
//! "Language: de\n"
//! "Content-Type: text/plain; charset=utf-8\n"
//!
//! #. Shown in the page header.
//! #: /views/base.html:12
//! #, fuzzy
//! msgctxt "nav"
//! msgid "Home"
//! msgstr "Startseite"
//!
//! #~ msgid "Old"
//! #~ msgstr "Alt"
//! ```
//!
//! Strings are written on one line unless they contain an interior
//! newline, in which case they are split after each `\n`.

use super::catalog::{Catalog, Location, Message};
use crate::locales::Locale;
use thiserror::Error;

#[derive(Error, Debug, PartialEq)]
#[error("line {line}: {message}")]
pub struct PoError {
    pub line: usize,
    pub message: String,
}

fn err(line: usize, message: impl Into<String>) -> PoError {
    PoError {
        line,
        message: message.into(),
    }
}

// ============================================================================
// Parsing
// ============================================================================

#[derive(Clone, Copy, PartialEq)]
enum Field {
    Context,
    Id,
    Plural,
    Str(usize),
}

#[derive(Default)]
struct Entry {
    message: Message,
    has_id: bool,
    obsolete: bool,
    last: Option<Field>,
}

impl Entry {
    fn is_started(&self) -> bool {
        self.has_id
            || !self.message.locations.is_empty()
            || !self.message.flags.is_empty()
            || !self.message.auto_comments.is_empty()
            || !self.message.user_comments.is_empty()
            || self.message.context.is_some()
    }

    fn append(&mut self, field: Field, text: &str) {
        let message = &mut self.message;
        match field {
            Field::Context => message.context.get_or_insert_with(String::new).push_str(text),
            Field::Id => message.id.push_str(text),
            Field::Plural => message.plural.get_or_insert_with(String::new).push_str(text),
            Field::Str(n) => {
                if message.strings.len() <= n {
                    message.strings.resize(n + 1, String::new());
                }
                message.strings[n].push_str(text);
            }
        }
    }
}

/// Parse a catalog. An empty source yields an empty catalog with default
/// headers.
pub fn parse(source: &str, locale: Option<Locale>) -> Result<Catalog, PoError> {
    let mut catalog = Catalog::new(locale);
    let mut entry = Entry::default();
    let mut seen_header = false;
    let mut leading_comment: Vec<String> = Vec::new();
    let mut in_leading_block = true;

    for (index, raw_line) in source.lines().enumerate() {
        let lineno = index + 1;
        let line = raw_line.trim();
        if line.is_empty() {
            if entry.has_id {
                finish(&mut catalog, std::mem::take(&mut entry), &mut seen_header, &mut leading_comment);
                in_leading_block = false;
            }
            continue;
        }

        let (line, obsolete) = match line.strip_prefix("#~") {
            Some(rest) => (rest.trim_start(), true),
            None => (line, false),
        };

        if let Some(comment) = line.strip_prefix('#') {
            if entry.has_id {
                finish(&mut catalog, std::mem::take(&mut entry), &mut seen_header, &mut leading_comment);
                in_leading_block = false;
            }
            match comment.chars().next() {
                Some(':') => {
                    for location in comment[1..].split_whitespace() {
                        entry.message.locations.insert(Location::parse(location));
                    }
                }
                Some(',') => {
                    for flag in comment[1..].split(',') {
                        let flag = flag.trim();
                        if !flag.is_empty() {
                            entry.message.flags.insert(flag.to_string());
                        }
                    }
                }
                Some('.') => entry.message.auto_comments.push(comment[1..].trim().to_string()),
                Some('|') => {}
                _ => {
                    let text = comment.strip_prefix(' ').unwrap_or(comment).to_string();
                    if in_leading_block && !seen_header {
                        leading_comment.push(text);
                    } else {
                        entry.message.user_comments.push(text);
                    }
                }
            }
            continue;
        }

        if line.starts_with('"') {
            let Some(field) = entry.last else {
                return Err(err(lineno, "continuation line without a keyword"));
            };
            let text = unquote(line).map_err(|m| err(lineno, m))?;
            entry.append(field, &text);
            continue;
        }

        let (keyword, rest) = line
            .split_once(char::is_whitespace)
            .ok_or_else(|| err(lineno, format!("unexpected line: {}", line)))?;
        let field = match keyword {
            "msgctxt" => Field::Context,
            "msgid" => Field::Id,
            "msgid_plural" => Field::Plural,
            "msgstr" => Field::Str(0),
            k if k.starts_with("msgstr[") && k.ends_with(']') => {
                let n = k["msgstr[".len()..k.len() - 1]
                    .parse()
                    .map_err(|_| err(lineno, format!("bad plural index: {}", k)))?;
                Field::Str(n)
            }
            other => return Err(err(lineno, format!("unknown keyword: {}", other))),
        };

        // A new msgctxt/msgid after a complete entry starts the next one.
        if entry.has_id && matches!(field, Field::Context | Field::Id) && !entry.message.strings.is_empty()
        {
            finish(&mut catalog, std::mem::take(&mut entry), &mut seen_header, &mut leading_comment);
            in_leading_block = false;
        }
        if field == Field::Id {
            entry.has_id = true;
        }
        if matches!(field, Field::Context) {
            entry.message.context = Some(String::new());
        }
        if let Field::Str(n) = field
            && entry.message.strings.len() <= n
        {
            entry.message.strings.resize(n + 1, String::new());
        }
        entry.obsolete = obsolete;
        entry.last = Some(field);
        let text = unquote(rest.trim()).map_err(|m| err(lineno, m))?;
        entry.append(field, &text);
    }

    if entry.has_id {
        finish(&mut catalog, entry, &mut seen_header, &mut leading_comment);
    } else if entry.is_started() {
        return Err(err(source.lines().count(), "entry without msgid"));
    }
    if !leading_comment.is_empty() {
        catalog.header_comment = leading_comment;
    }
    Ok(catalog)
}

fn finish(
    catalog: &mut Catalog,
    entry: Entry,
    seen_header: &mut bool,
    leading_comment: &mut Vec<String>,
) {
    let Entry {
        mut message,
        obsolete,
        ..
    } = entry;
    if message.strings.is_empty() {
        message.strings.push(String::new());
    }
    if message.id.is_empty() && message.context.is_none() && !*seen_header {
        *seen_header = true;
        catalog.headers = parse_headers(message.string());
        catalog.fuzzy_header = message.is_fuzzy();
        if !message.user_comments.is_empty() {
            leading_comment.extend(message.user_comments);
        }
        return;
    }
    if obsolete {
        catalog.insert_obsolete(message);
    } else {
        catalog.insert(message);
    }
}

fn parse_headers(text: &str) -> Vec<(String, String)> {
    text.lines()
        .filter_map(|line| line.split_once(':'))
        .map(|(k, v)| (k.trim().to_string(), v.trim().to_string()))
        .collect()
}

fn unquote(text: &str) -> Result<String, String> {
    let inner = text
        .strip_prefix('"')
        .and_then(|t| t.strip_suffix('"'))
        .ok_or_else(|| format!("expected a quoted string: {}", text))?;
    let mut out = String::with_capacity(inner.len());
    let mut chars = inner.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('t') => out.push('\t'),
            Some('r') => out.push('\r'),
            Some('"') => out.push('"'),
            Some('\\') => out.push('\\'),
            Some(other) => {
                out.push('\\');
                out.push(other);
            }
            None => return Err("trailing backslash".to_string()),
        }
    }
    Ok(out)
}

// ============================================================================
// Writing
// ============================================================================

/// Options for [`write`].
#[derive(Debug, Clone, Copy, Default)]
pub struct WriteOptions {
    pub include_header: bool,
    pub include_obsolete: bool,
}

pub fn write(catalog: &Catalog, options: WriteOptions) -> String {
    let mut out = String::new();
    for line in &catalog.header_comment {
        if line.is_empty() {
            out.push_str("#\n");
        } else {
            out.push_str(&format!("# {}\n", line));
        }
    }
    if options.include_header {
        if catalog.fuzzy_header {
            out.push_str("#, fuzzy\n");
        }
        out.push_str("msgid \"\"\nmsgstr \"\"\n");
        for (name, value) in &catalog.headers {
            out.push_str(&format!("\"{}\"\n", escape(&format!("{}: {}\n", name, value))));
        }
        out.push('\n');
    } else if !catalog.header_comment.is_empty() {
        out.push('\n');
    }

    for message in catalog.messages() {
        write_message(&mut out, message, "");
        out.push('\n');
    }
    if options.include_obsolete {
        for message in catalog.obsolete() {
            write_message(&mut out, message, "#~ ");
            out.push('\n');
        }
    }
    while out.ends_with("\n\n") {
        out.pop();
    }
    out
}

fn write_message(out: &mut String, message: &Message, prefix: &str) {
    for comment in &message.user_comments {
        out.push_str(&format!("# {}\n", comment));
    }
    for comment in &message.auto_comments {
        out.push_str(&format!("#. {}\n", comment));
    }
    if !message.locations.is_empty() {
        let locations: Vec<String> = message.locations.iter().map(Location::to_string).collect();
        out.push_str(&format!("#: {}\n", locations.join(" ")));
    }
    let flags: Vec<&str> = message
        .flags
        .iter()
        .map(String::as_str)
        .filter(|f| *f != "python-format")
        .collect();
    if !flags.is_empty() {
        out.push_str(&format!("#, {}\n", flags.join(", ")));
    }
    if let Some(context) = &message.context {
        write_field(out, prefix, "msgctxt", context);
    }
    write_field(out, prefix, "msgid", &message.id);
    match &message.plural {
        Some(plural) => {
            write_field(out, prefix, "msgid_plural", plural);
            let count = message.strings.len().max(2);
            for n in 0..count {
                let text = message.strings.get(n).map(String::as_str).unwrap_or_default();
                write_field(out, prefix, &format!("msgstr[{}]", n), text);
            }
        }
        None => write_field(out, prefix, "msgstr", message.string()),
    }
}

fn write_field(out: &mut String, prefix: &str, keyword: &str, text: &str) {
    let interior_newline = text.trim_end_matches('\n').contains('\n');
    if !interior_newline {
        out.push_str(&format!("{}{} \"{}\"\n", prefix, keyword, escape(text)));
        return;
    }
    out.push_str(&format!("{}{} \"\"\n", prefix, keyword));
    for chunk in text.split_inclusive('\n') {
        out.push_str(&format!("{}\"{}\"\n", prefix, escape(chunk)));
    }
}

fn escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '"' => out.push_str("\\\""),
            '\n' => out.push_str("\\n"),
            '\t' => out.push_str("\\t"),
            '\r' => out.push_str("\\r"),
            c => out.push(c),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"# PROJECT TITLE:
# Example (de)
msgid ""
msgstr ""
"Language: de\n"
"Content-Type: text/plain; charset=utf-8\n"

#. Shown in the page header.
#: /views/base.html:12 /content/pages/a.yaml
#, fuzzy
msgctxt "nav"
msgid "Home"
msgstr "Startseite"

msgid ""
"Line one\n"
"Line \"two\""
msgstr "Zeile"

msgid "One file"
msgid_plural "Many files"
msgstr[0] "Eine Datei"
msgstr[1] "Viele Dateien"

#~ msgid "Old"
#~ msgstr "Alt"
"#;

    #[test]
    fn parses_entries_and_header() {
        let catalog = parse(SAMPLE, Some(Locale::parse("de"))).unwrap();
        assert_eq!(catalog.header("Language"), Some("de"));
        assert_eq!(catalog.header_comment, vec!["PROJECT TITLE:", "Example (de)"]);
        assert_eq!(catalog.len(), 3);

        let home = catalog.get("Home", Some("nav")).unwrap();
        assert_eq!(home.string(), "Startseite");
        assert!(home.is_fuzzy());
        assert_eq!(home.auto_comments, vec!["Shown in the page header."]);
        assert_eq!(home.locations.len(), 2);

        let multi = catalog.get("Line one\nLine \"two\"", None).unwrap();
        assert_eq!(multi.string(), "Zeile");

        let plural = catalog.get("One file", None).unwrap();
        assert_eq!(plural.plural.as_deref(), Some("Many files"));
        assert_eq!(plural.strings, vec!["Eine Datei", "Viele Dateien"]);

        let obsolete: Vec<&str> = catalog.obsolete().map(|m| m.id.as_str()).collect();
        assert_eq!(obsolete, vec!["Old"]);
    }

    #[test]
    fn written_catalog_parses_back() {
        let catalog = parse(SAMPLE, Some(Locale::parse("de"))).unwrap();
        let text = write(
            &catalog,
            WriteOptions {
                include_header: true,
                include_obsolete: true,
            },
        );
        assert!(text.contains("msgctxt \"nav\"\nmsgid \"Home\"\nmsgstr \"Startseite\"\n"));
        assert!(text.contains("msgid \"\"\n\"Line one\\n\"\n\"Line \\\"two\\\"\"\n"));
        assert!(text.contains("#~ msgid \"Old\""));
        assert_eq!(parse(&text, Some(Locale::parse("de"))).unwrap(), catalog);
    }

    #[test]
    fn header_omitted_by_default() {
        let mut catalog = Catalog::new(None);
        catalog.insert(Message::new("Hello", ""));
        let text = write(&catalog, WriteOptions::default());
        assert_eq!(text, "msgid \"Hello\"\nmsgstr \"\"\n");
    }

    #[test]
    fn empty_source_is_empty_catalog() {
        let catalog = parse("", None).unwrap();
        assert!(catalog.is_empty());
        assert_eq!(catalog.header("Content-Type"), Some("text/plain; charset=utf-8"));
    }

    #[test]
    fn corrupt_source_reports_line() {
        let error = parse("msgid \"a\"\nmsgstr \"b\nbogus", None).unwrap_err();
        assert_eq!(error.line, 2);
        assert!(parse("\"orphan\"", None).is_err());
    }
}
