//! Output and reporting
//!
//! Human output prints one line per diagnostic in the usual
//! `location:line:column: severity: message` shape; JSON output is an array
//! with one object per document.

use serde::Serialize;

use crate::cli::{OutputFormat, VerbosityLevel};
use crate::diagnostic::Diagnostic;

/// What happened to one document.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Outcome {
    Diagnostics(Vec<Diagnostic>),
    /// The validator could not run (caller input or infrastructure).
    Failure(String),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DocumentReport {
    pub file: String,
    #[serde(flatten)]
    pub outcome: Outcome,
}

impl DocumentReport {
    pub fn error_count(&self) -> usize {
        match &self.outcome {
            Outcome::Diagnostics(diagnostics) => diagnostics.iter().filter(|d| d.is_error()).count(),
            Outcome::Failure(_) => 0,
        }
    }

    pub fn warning_count(&self) -> usize {
        match &self.outcome {
            Outcome::Diagnostics(diagnostics) => diagnostics.iter().filter(|d| d.warning).count(),
            Outcome::Failure(_) => 0,
        }
    }

    pub fn is_failure(&self) -> bool {
        matches!(self.outcome, Outcome::Failure(_))
    }
}

/// Process exit code for a run: 2 if any document could not be validated,
/// 1 if any has error diagnostics, 0 otherwise.
pub fn exit_code(reports: &[DocumentReport]) -> i32 {
    if reports.iter().any(DocumentReport::is_failure) {
        2
    } else if reports.iter().any(|report| report.error_count() > 0) {
        1
    } else {
        0
    }
}

pub struct Output {
    format: OutputFormat,
    verbosity: VerbosityLevel,
    show_colors: bool,
}

impl Output {
    pub fn new(format: OutputFormat, verbosity: VerbosityLevel) -> Self {
        Self {
            format,
            verbosity,
            show_colors: atty::is(atty::Stream::Stdout),
        }
    }

    pub fn with_colors(mut self, show_colors: bool) -> Self {
        self.show_colors = show_colors;
        self
    }

    fn colorize(&self, text: &str, color: &str) -> String {
        if self.show_colors {
            format!("\x1b[{}m{}\x1b[0m", color, text)
        } else {
            text.to_string()
        }
    }

    pub fn render(&self, reports: &[DocumentReport]) -> serde_json::Result<String> {
        match self.format {
            OutputFormat::Json => serde_json::to_string_pretty(reports),
            OutputFormat::Human => Ok(self.format_human(reports)),
        }
    }

    fn format_human(&self, reports: &[DocumentReport]) -> String {
        let mut output = String::new();
        for report in reports {
            for line in self.format_report(report) {
                output.push_str(&line);
                output.push('\n');
            }
        }
        if self.verbosity != VerbosityLevel::Quiet {
            output.push_str(&self.format_summary(reports));
            output.push('\n');
        }
        output
    }

    pub fn format_report(&self, report: &DocumentReport) -> Vec<String> {
        match &report.outcome {
            Outcome::Failure(message) => vec![format!(
                "{}: {} {}",
                report.file,
                self.colorize("failure:", "35"),
                message
            )],
            Outcome::Diagnostics(diagnostics) => {
                let lines: Vec<String> = diagnostics
                    .iter()
                    .filter(|d| d.is_error() || self.verbosity != VerbosityLevel::Quiet)
                    .map(|d| self.format_diagnostic(d))
                    .collect();
                if lines.is_empty() && self.verbosity == VerbosityLevel::Verbose {
                    vec![format!("{}: {}", report.file, self.colorize("ok", "32"))]
                } else {
                    lines
                }
            }
        }
    }

    pub fn format_diagnostic(&self, diagnostic: &Diagnostic) -> String {
        let severity = if diagnostic.warning {
            self.colorize("warning:", "33")
        } else {
            self.colorize("error:", "31")
        };
        format!(
            "{}:{}:{}: {} {}",
            diagnostic.location, diagnostic.line, diagnostic.column, severity, diagnostic.message
        )
    }

    fn format_summary(&self, reports: &[DocumentReport]) -> String {
        let errors: usize = reports.iter().map(DocumentReport::error_count).sum();
        let warnings: usize = reports.iter().map(DocumentReport::warning_count).sum();
        let failures = reports.iter().filter(|r| r.is_failure()).count();
        format!(
            "{} document{}: {} error{}, {} warning{}, {} failure{}",
            reports.len(),
            plural(reports.len()),
            errors,
            plural(errors),
            warnings,
            plural(warnings),
            failures,
            plural(failures)
        )
    }
}

fn plural(count: usize) -> &'static str {
    if count == 1 { "" } else { "s" }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reports() -> Vec<DocumentReport> {
        vec![
            DocumentReport {
                file: "/w/ok.xml".to_string(),
                outcome: Outcome::Diagnostics(vec![]),
            },
            DocumentReport {
                file: "/w/bad.xml".to_string(),
                outcome: Outcome::Diagnostics(vec![
                    Diagnostic::new("Element 'x' is not allowed", "/w/bad.xml", 12, 5, false),
                    Diagnostic::new("unused declaration", "/w/bad.dtd", 3, 0, true),
                ]),
            },
        ]
    }

    #[test]
    fn test_human_output() {
        let output = Output::new(OutputFormat::Human, VerbosityLevel::Normal).with_colors(false);
        let rendered = output.render(&reports()).unwrap();
        assert!(rendered.contains("/w/bad.xml:12:5: error: Element 'x' is not allowed\n"));
        assert!(rendered.contains("/w/bad.dtd:3:0: warning: unused declaration\n"));
        assert!(rendered.contains("2 documents: 1 error, 1 warning, 0 failures"));
        assert!(!rendered.contains("ok.xml"));
    }

    #[test]
    fn test_quiet_output_shows_errors_only() {
        let output = Output::new(OutputFormat::Human, VerbosityLevel::Quiet).with_colors(false);
        let rendered = output.render(&reports()).unwrap();
        assert_eq!(rendered, "/w/bad.xml:12:5: error: Element 'x' is not allowed\n");
    }

    #[test]
    fn test_verbose_output_lists_clean_documents() {
        let output = Output::new(OutputFormat::Human, VerbosityLevel::Verbose).with_colors(false);
        let rendered = output.render(&reports()).unwrap();
        assert!(rendered.starts_with("/w/ok.xml: ok\n"));
    }

    #[test]
    fn test_json_output() {
        let mut reports = reports();
        reports.push(DocumentReport {
            file: "missing.xml".to_string(),
            outcome: Outcome::Failure("Cannot open document".to_string()),
        });
        let output = Output::new(OutputFormat::Json, VerbosityLevel::Normal);
        let value: serde_json::Value =
            serde_json::from_str(&output.render(&reports).unwrap()).unwrap();

        assert_eq!(value[0]["file"], "/w/ok.xml");
        assert_eq!(value[0]["diagnostics"].as_array().unwrap().len(), 0);
        assert_eq!(value[1]["diagnostics"][0]["line"], 12);
        assert_eq!(value[1]["diagnostics"][1]["warning"], true);
        assert_eq!(value[2]["failure"], "Cannot open document");
    }

    #[test]
    fn test_exit_code() {
        let mut reports = reports();
        assert_eq!(exit_code(&reports[..1]), 0);
        assert_eq!(exit_code(&reports), 1);
        reports.push(DocumentReport {
            file: "missing.xml".to_string(),
            outcome: Outcome::Failure("gone".to_string()),
        });
        assert_eq!(exit_code(&reports), 2);
    }
}
