use regex::Regex;
use std::fmt;
use std::fs::File;
use std::io::Read;
use std::path::Path;
use std::sync::OnceLock;

use tracing::{debug, warn};

use crate::error::{Result, ValidationError};

/// How much of a document is scanned for schema hints
const HINT_SCAN_LIMIT: u64 = 64 * 1024;

const XSD_NAMESPACE: &str = "http://www.w3.org/2001/XMLSchema";

/// `xsi:schemaLocation="ns1 loc1 ns2 loc2"`, any prefix
static SCHEMA_LOCATION_REGEX: OnceLock<Regex> = OnceLock::new();

/// `xsi:noNamespaceSchemaLocation="loc"`, any prefix
static NO_NAMESPACE_REGEX: OnceLock<Regex> = OnceLock::new();

static DOCTYPE_REGEX: OnceLock<Regex> = OnceLock::new();

static SCHEME_REGEX: OnceLock<Regex> = OnceLock::new();

/// A comment, closed or cut off at the end of the scanned text
static COMMENT_REGEX: OnceLock<Regex> = OnceLock::new();

/// The start tag of an element
static START_TAG_REGEX: OnceLock<Regex> = OnceLock::new();

fn get_schema_location_regex() -> &'static Regex {
    SCHEMA_LOCATION_REGEX.get_or_init(|| {
        Regex::new(r#"[\w.\-]+:schemaLocation\s*=\s*(?:"([^"]*)"|'([^']*)')"#)
            .expect("Failed to compile schema location regex")
    })
}

fn get_no_namespace_regex() -> &'static Regex {
    NO_NAMESPACE_REGEX.get_or_init(|| {
        Regex::new(r#"[\w.\-]+:noNamespaceSchemaLocation\s*=\s*(?:"([^"]*)"|'([^']*)')"#)
            .expect("Failed to compile no namespace regex")
    })
}

fn get_doctype_regex() -> &'static Regex {
    DOCTYPE_REGEX.get_or_init(|| Regex::new(r"<!DOCTYPE\s").expect("Failed to compile doctype regex"))
}

fn get_scheme_regex() -> &'static Regex {
    SCHEME_REGEX.get_or_init(|| {
        Regex::new(r"^[a-zA-Z][a-zA-Z0-9+.\-]+:").expect("Failed to compile scheme regex")
    })
}

fn get_comment_regex() -> &'static Regex {
    COMMENT_REGEX
        .get_or_init(|| Regex::new(r"(?s)<!--.*?(?:-->|\z)").expect("Failed to compile comment regex"))
}

fn get_start_tag_regex() -> &'static Regex {
    START_TAG_REGEX
        .get_or_init(|| Regex::new(r"<[A-Za-z_:]").expect("Failed to compile start tag regex"))
}

/// Whether `text` reaches the root element's start tag.
fn contains_start_tag(text: &str) -> bool {
    get_start_tag_regex().is_match(&get_comment_regex().replace_all(text, ""))
}

/// What a schema is compiled from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SchemaSource {
    /// A schema document, by URL or path.
    Location(String),
    /// Schema text held in memory.
    Inline(String),
}

impl fmt::Display for SchemaSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SchemaSource::Location(location) => f.write_str(location),
            SchemaSource::Inline(_) => f.write_str("<inline schema>"),
        }
    }
}

/// Schema and DTD declarations found in a document's prolog and root element.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SchemaHints {
    /// `(namespace, location)` pairs from `xsi:schemaLocation`
    pub namespaced: Vec<(String, String)>,
    /// `xsi:noNamespaceSchemaLocation`
    pub no_namespace: Option<String>,
    pub has_doctype: bool,
    /// The scan stopped before the root element, so hints may be missing.
    pub root_missing: bool,
}

impl SchemaHints {
    /// Scan the start of the document at `path`.
    pub fn from_file(path: &Path) -> Result<Self> {
        let file = File::open(path).map_err(|source| ValidationError::DocumentUnreadable {
            path: path.to_path_buf(),
            source,
        })?;
        let mut head = Vec::new();
        file.take(HINT_SCAN_LIMIT).read_to_end(&mut head)?;
        let text = String::from_utf8_lossy(&head);

        let mut hints = Self::from_text(&text);
        if head.len() as u64 == HINT_SCAN_LIMIT && !contains_start_tag(&text) {
            warn!(
                path = %path.display(),
                limit = HINT_SCAN_LIMIT,
                "root element not found in the scanned prolog, schema hints may be missed"
            );
            hints.root_missing = true;
        }
        Ok(hints)
    }

    pub fn from_text(text: &str) -> Self {
        let namespaced = get_schema_location_regex()
            .captures_iter(text)
            .filter_map(|caps| caps.get(1).or_else(|| caps.get(2)))
            .flat_map(|value| {
                let tokens: Vec<&str> = value.as_str().split_whitespace().collect();
                tokens
                    .chunks_exact(2)
                    .map(|pair| (pair[0].to_string(), pair[1].to_string()))
                    .collect::<Vec<_>>()
            })
            .collect();

        let no_namespace = get_no_namespace_regex()
            .captures(text)
            .and_then(|caps| caps.get(1).or_else(|| caps.get(2)))
            .map(|value| value.as_str().trim().to_string())
            .filter(|value| !value.is_empty());

        Self {
            namespaced,
            no_namespace,
            has_doctype: get_doctype_regex().is_match(text),
            root_missing: false,
        }
    }

    pub fn has_schema(&self) -> bool {
        !self.namespaced.is_empty() || self.no_namespace.is_some()
    }

    /// The schema to compile for these hints, with relative locations
    /// resolved against `base_dir`.
    ///
    /// A lone `noNamespaceSchemaLocation` is compiled directly; anything
    /// involving namespaces becomes an in-memory schema importing each one.
    pub fn schema_source(&self, base_dir: &Path) -> Option<SchemaSource> {
        if self.namespaced.is_empty() {
            let location = self.no_namespace.as_deref()?;
            return Some(SchemaSource::Location(absolute_location(location, base_dir)));
        }

        let mut text = format!(r#"<xs:schema xmlns:xs="{}">"#, XSD_NAMESPACE);
        for (namespace, location) in &self.namespaced {
            text.push_str(&format!(
                r#"<xs:import namespace="{}" schemaLocation="{}"/>"#,
                escape_attribute(namespace),
                escape_attribute(&absolute_location(location, base_dir))
            ));
        }
        if let Some(location) = &self.no_namespace {
            text.push_str(&format!(
                r#"<xs:include schemaLocation="{}"/>"#,
                escape_attribute(&absolute_location(location, base_dir))
            ));
        }
        text.push_str("</xs:schema>");
        debug!(imports = self.namespaced.len(), "built wrapper schema");
        Some(SchemaSource::Inline(text))
    }
}

/// URLs and absolute paths are kept, relative paths joined to `base_dir`.
fn absolute_location(location: &str, base_dir: &Path) -> String {
    if get_scheme_regex().is_match(location) || Path::new(location).is_absolute() {
        location.to_string()
    } else {
        base_dir.join(location).to_string_lossy().into_owned()
    }
}

fn escape_attribute(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&apos;"),
            other => escaped.push(other),
        }
    }
    escaped
}
