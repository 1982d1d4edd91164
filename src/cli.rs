use clap::{Parser, ValueEnum};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::validator::ValidationMode;

/// Verbosity levels for output
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Serialize, Deserialize)]
pub enum VerbosityLevel {
    /// Only show errors
    Quiet,
    /// Show diagnostics and a summary
    #[default]
    Normal,
    /// Also show documents without diagnostics
    Verbose,
}

/// Validation mode selected on the command line
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum ModeArg {
    /// Well-formedness only
    None,
    /// Validate against the DOCTYPE
    #[default]
    Dtd,
    /// Validate against xsi:schemaLocation hints
    Schema,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Human,
    Json,
}

/// Validate XML documents against their DTDs and schemas, caching remote
/// entities on disk
#[derive(Parser, Debug, Clone)]
#[command(name = "xml-validator")]
#[command(version)]
pub struct Cli {
    /// Documents to validate
    #[arg(required = true)]
    pub files: Vec<PathBuf>,

    /// Resolve relative document paths against this configured project
    #[arg(short = 'p', long = "project")]
    pub project: Option<String>,

    /// What to validate against
    #[arg(short = 'm', long = "mode", value_enum, default_value_t = ModeArg::Dtd)]
    pub mode: ModeArg,

    /// Validate against this XML Schema (path or URL), overriding --mode
    #[arg(short = 's', long = "schema")]
    pub schema: Option<String>,

    /// Configuration file (TOML or JSON)
    #[arg(short = 'c', long = "config")]
    pub config: Option<PathBuf>,

    /// Directory for cached remote entities
    #[arg(long = "cache-dir")]
    pub cache_dir: Option<PathBuf>,

    /// Directory of bundled fallback DTDs and schemas
    #[arg(long = "resources-dir")]
    pub resources_dir: Option<PathBuf>,

    /// HTTP request timeout in seconds
    #[arg(long = "timeout")]
    pub timeout: Option<u64>,

    /// Number of retry attempts for failed downloads
    #[arg(long = "retry-attempts")]
    pub retry_attempts: Option<u32>,

    /// Number of documents validated concurrently
    #[arg(short = 't', long = "threads")]
    pub threads: Option<usize>,

    /// Output format
    #[arg(short = 'f', long = "format", value_enum)]
    pub format: Option<OutputFormat>,

    /// Enable verbose output
    #[arg(short = 'v', long = "verbose")]
    pub verbose: bool,

    /// Enable quiet mode (errors only)
    #[arg(short = 'q', long = "quiet", conflicts_with = "verbose")]
    pub quiet: bool,
}

impl Cli {
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// The validation mode the flags ask for.
    pub fn validation_mode(&self) -> ValidationMode {
        if let Some(schema) = &self.schema {
            return ValidationMode::external_schema(schema);
        }
        match self.mode {
            ModeArg::None => ValidationMode::None,
            ModeArg::Dtd => ValidationMode::DtdDeclared,
            ModeArg::Schema => ValidationMode::SchemaDeclared,
        }
    }
}
