//! Validation findings and the error handler that collects them.

use std::sync::OnceLock;

use percent_encoding::percent_decode_str;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{Result, ValidationError};

/// Drive paths serialized as `/C:/...` by URI handling on Windows
static DRIVE_ARTIFACT_REGEX: OnceLock<Regex> = OnceLock::new();

fn get_drive_artifact_regex() -> &'static Regex {
    DRIVE_ARTIFACT_REGEX
        .get_or_init(|| Regex::new(r"^/[a-zA-Z]:/").expect("Failed to compile drive regex"))
}

/// A single validation finding.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Diagnostic {
    pub message: String,
    /// Absolute, decoded file path of the entity the finding belongs to.
    pub location: String,
    /// 1-based, 0 when unknown.
    pub line: u32,
    /// 1-based, 0 when unknown.
    pub column: u32,
    pub warning: bool,
}

impl Diagnostic {
    pub fn new(
        message: impl Into<String>,
        location: impl Into<String>,
        line: u32,
        column: u32,
        warning: bool,
    ) -> Self {
        Self {
            message: message.into(),
            location: location.into(),
            line,
            column,
            warning,
        }
    }

    pub fn is_error(&self) -> bool {
        !self.warning
    }
}

/// A problem as the parser reports it, before location normalization.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseReport {
    pub message: String,
    /// System identifier of the entity being parsed, if the parser knows it.
    pub system_id: Option<String>,
    pub line: u32,
    pub column: u32,
}

impl ParseReport {
    pub fn new(message: impl Into<String>, system_id: Option<String>, line: u32, column: u32) -> Self {
        Self {
            message: message.into(),
            system_id,
            line,
            column,
        }
    }
}

/// Receives well-formedness and validity problems while a document is parsed.
///
/// An `Err` means the handler itself broke; the validation is abandoned and
/// the error is surfaced to the caller instead of a diagnostic list.
pub trait ErrorHandler {
    fn warning(&mut self, report: ParseReport) -> Result<()>;
    fn error(&mut self, report: ParseReport) -> Result<()>;
    fn fatal_error(&mut self, report: ParseReport) -> Result<()>;
}

/// Accumulates every reported problem as a [`Diagnostic`] instead of
/// stopping at the first one.
#[derive(Debug)]
pub struct DiagnosticCollector {
    default_location: String,
    diagnostics: Vec<Diagnostic>,
    first_fatal: Option<usize>,
}

impl DiagnosticCollector {
    /// `default_location` is used for reports that carry no system id.
    pub fn new(default_location: impl Into<String>) -> Self {
        Self {
            default_location: default_location.into(),
            diagnostics: Vec::new(),
            first_fatal: None,
        }
    }

    pub fn diagnostics(&self) -> &[Diagnostic] {
        &self.diagnostics
    }

    /// The first diagnostic reported through [`ErrorHandler::fatal_error`].
    pub fn first_fatal(&self) -> Option<&Diagnostic> {
        self.first_fatal.and_then(|index| self.diagnostics.get(index))
    }

    pub fn into_diagnostics(self) -> Vec<Diagnostic> {
        self.diagnostics
    }

    fn add(&mut self, report: ParseReport, warning: bool) -> Result<()> {
        let location = match report.system_id.as_deref() {
            Some(system_id) if !system_id.is_empty() => normalize_location(system_id)?,
            _ => self.default_location.clone(),
        };
        self.diagnostics.push(Diagnostic {
            message: report.message,
            location,
            line: report.line,
            column: report.column,
            warning,
        });
        Ok(())
    }
}

impl ErrorHandler for DiagnosticCollector {
    fn warning(&mut self, report: ParseReport) -> Result<()> {
        self.add(report, true)
    }

    fn error(&mut self, report: ParseReport) -> Result<()> {
        self.add(report, false)
    }

    fn fatal_error(&mut self, report: ParseReport) -> Result<()> {
        self.add(report, false)?;
        if self.first_fatal.is_none() {
            self.first_fatal = Some(self.diagnostics.len() - 1);
        }
        Ok(())
    }
}

/// Turn a parser system id into a plain file path.
///
/// Drops the leading slash of `/C:/...`. Only `file:` URLs are
/// percent-decoded: the parser reports files it opened by raw path, where a
/// `%` is just a character. `+` is kept as is.
pub fn normalize_location(system_id: &str) -> Result<String> {
    let (mut location, is_url) = match strip_file_scheme(system_id) {
        Some(rest) => (rest, true),
        None => (system_id, false),
    };
    if get_drive_artifact_regex().is_match(location) {
        location = &location[1..];
    }
    if is_url {
        decode_path(location)
    } else {
        Ok(location.to_string())
    }
}

/// The part after `file://` or `file:`, if `location` is a file URL.
fn strip_file_scheme(location: &str) -> Option<&str> {
    let rest = location
        .get(..5)
        .filter(|scheme| scheme.eq_ignore_ascii_case("file:"))
        .map(|_| &location[5..])?;
    Some(rest.strip_prefix("//").unwrap_or(rest))
}

/// Strict percent-decoding: malformed escapes and invalid UTF-8 are errors.
pub(crate) fn decode_path(raw: &str) -> Result<String> {
    let bytes = raw.as_bytes();
    let mut index = 0;
    while let Some(offset) = bytes[index..].iter().position(|&b| b == b'%') {
        let escape = index + offset;
        let valid = bytes
            .get(escape + 1..escape + 3)
            .is_some_and(|hex| hex.iter().all(u8::is_ascii_hexdigit));
        if !valid {
            return Err(ValidationError::LocationDecode {
                location: raw.to_string(),
                reason: format!("malformed escape at byte {}", escape),
            });
        }
        index = escape + 3;
    }

    percent_decode_str(raw)
        .decode_utf8()
        .map(|decoded| decoded.into_owned())
        .map_err(|e| ValidationError::LocationDecode {
            location: raw.to_string(),
            reason: e.to_string(),
        })
}
