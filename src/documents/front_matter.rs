//! Splitting raw document content into front matter and body.
//!
//! A document holds at most one YAML block fenced by `---` lines, followed
//! by the body:
//!
//! ```text
//! ---
//! $title: About
//! ---
//! # About us
//! ```
//!
//! A leading fence is optional. More than one front-matter block is a
//! format error. YAML documents are front matter only; their body is empty.

use super::DocumentError;
use regex::Regex;
use std::sync::LazyLock;

static BOUNDARY: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^-{3,}[ \t\r]*$").expect("valid regex"));

/// How a document's content is interpreted, decided by extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentFormat {
    Yaml,
    Markdown,
    Html,
    Text,
}

impl DocumentFormat {
    pub fn from_path(pod_path: &str) -> Self {
        let ext = pod_path
            .rsplit_once('.')
            .map(|(_, ext)| ext.to_lowercase())
            .unwrap_or_default();
        match ext.as_str() {
            "yaml" | "yml" => Self::Yaml,
            "md" | "markdown" | "mdown" | "mkdn" | "mkd" => Self::Markdown,
            "html" | "htm" => Self::Html,
            _ => Self::Text,
        }
    }
}

/// Split `content` into `(front_matter, body)`.
pub fn split_front_matter(
    content: &str,
    format: DocumentFormat,
    pod_path: &str,
) -> Result<(Option<String>, String), DocumentError> {
    let mut parts: Vec<&str> = BOUNDARY.split(content).collect();
    if parts.first().is_some_and(|p| p.trim().is_empty()) && parts.len() > 1 {
        parts.remove(0);
    }

    if format == DocumentFormat::Yaml {
        if parts.len() > 1 {
            return Err(DocumentError::BadFormat(pod_path.to_string()));
        }
        let front = parts.first().map(|p| p.trim()).unwrap_or_default();
        return Ok(((!front.is_empty()).then(|| front.to_string()), String::new()));
    }

    match parts.as_slice() {
        [] => Ok((None, String::new())),
        [body] => Ok((None, body.trim().to_string())),
        [front, body] => {
            let front = front.trim();
            Ok((
                (!front.is_empty()).then(|| front.to_string()),
                body.trim().to_string(),
            ))
        }
        _ => Err(DocumentError::BadFormat(pod_path.to_string())),
    }
}

/// Join front matter and body back into file content.
pub fn format_document(front_matter: Option<&str>, body: &str) -> String {
    match front_matter.map(str::trim).filter(|f| !f.is_empty()) {
        Some(front) if !body.trim().is_empty() => {
            format!("---\n{}\n---\n{}\n", front, body.trim())
        }
        Some(front) => format!("{front}\n"),
        None => format!("{}\n", body.trim()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_from_extension() {
        assert_eq!(DocumentFormat::from_path("/a/b.yaml"), DocumentFormat::Yaml);
        assert_eq!(DocumentFormat::from_path("/a/b.MD"), DocumentFormat::Markdown);
        assert_eq!(DocumentFormat::from_path("/a/b.htm"), DocumentFormat::Html);
        assert_eq!(DocumentFormat::from_path("/a/b.txt"), DocumentFormat::Text);
    }

    #[test]
    fn markdown_with_fenced_front_matter() {
        let (front, body) = split_front_matter(
            "---\n$title: About\n---\n# About us\n",
            DocumentFormat::Markdown,
            "/content/pages/about.md",
        )
        .unwrap();
        assert_eq!(front.as_deref(), Some("$title: About"));
        assert_eq!(body, "# About us");
    }

    #[test]
    fn markdown_without_front_matter() {
        let (front, body) =
            split_front_matter("Just text.\n", DocumentFormat::Markdown, "/a.md").unwrap();
        assert_eq!(front, None);
        assert_eq!(body, "Just text.");
    }

    #[test]
    fn front_matter_without_leading_fence() {
        let (front, body) =
            split_front_matter("a: 1\n---\nbody", DocumentFormat::Html, "/a.html").unwrap();
        assert_eq!(front.as_deref(), Some("a: 1"));
        assert_eq!(body, "body");
    }

    #[test]
    fn two_front_matter_blocks_fail() {
        let err = split_front_matter(
            "---\na: 1\n---\nb: 2\n---\nbody\n",
            DocumentFormat::Markdown,
            "/content/pages/x.md",
        )
        .unwrap_err();
        assert!(matches!(err, DocumentError::BadFormat(path) if path == "/content/pages/x.md"));
    }

    #[test]
    fn yaml_is_all_front_matter() {
        let (front, body) =
            split_front_matter("---\na: 1\n", DocumentFormat::Yaml, "/a.yaml").unwrap();
        assert_eq!(front.as_deref(), Some("a: 1"));
        assert_eq!(body, "");

        let (front, _) = split_front_matter("", DocumentFormat::Yaml, "/a.yaml").unwrap();
        assert_eq!(front, None);
    }

    #[test]
    fn yaml_with_second_block_fails() {
        assert!(split_front_matter("a: 1\n---\nb: 2\n", DocumentFormat::Yaml, "/a.yaml").is_err());
    }

    #[test]
    fn format_document_round_trips_layout() {
        assert_eq!(format_document(Some("a: 1"), "Body"), "---\na: 1\n---\nBody\n");
        assert_eq!(format_document(Some("a: 1"), ""), "a: 1\n");
        assert_eq!(format_document(None, "Body"), "Body\n");
    }
}
