//! Validation engine
//!
//! A validation runs synchronously on the calling thread: the document is
//! streamed through libxml2 with a [`DiagnosticCollector`] receiving problems,
//! an [`EntityResolver`] serving external entities and an optional
//! [`ContentHandler`] receiving content events. Independent validations may
//! run on as many threads as the caller likes; [`Validator::validate_async`]
//! moves one onto tokio's blocking pool.

use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};
use std::time::Instant;

use regex::Regex;
use tracing::{debug, info, warn};

use crate::cache::RemoteCache;
use crate::config::Config;
use crate::diagnostic::{Diagnostic, DiagnosticCollector};
use crate::error::{Result, ValidationError};
use crate::handler::ContentHandler;
use crate::http_client::{Fetcher, HttpClientConfig, HttpFetcher};
use crate::libxml2::{ParseSession, compile_schema, parse_document, parser_options};
use crate::locator::{BundledResources, ProjectLocator, ProjectRegistry, ResourceLocator};
use crate::resolver::{DEFAULT_MAX_REWRITES, EntityResolver};
use crate::schema_loader::{SchemaHints, SchemaSource};

static SCHEME_REGEX: OnceLock<Regex> = OnceLock::new();

fn get_scheme_regex() -> &'static Regex {
    SCHEME_REGEX.get_or_init(|| {
        Regex::new(r"^[a-zA-Z][a-zA-Z0-9+.\-]+:").expect("Failed to compile scheme regex")
    })
}

/// What a document is validated against.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationMode {
    /// Well-formedness only. External DTDs are still loaded.
    None,
    /// The DTD named by the document's DOCTYPE.
    DtdDeclared,
    /// The schemas named by `xsi:schemaLocation` and
    /// `xsi:noNamespaceSchemaLocation`, plus the DOCTYPE if there is one.
    SchemaDeclared,
    /// The given XML Schema, ignoring the document's own hints.
    ExternalSchema(String),
}

impl ValidationMode {
    /// External schema mode for a path or URL.
    ///
    /// Backslashes become `/` and a bare filesystem path gets a `file://`
    /// prefix; URLs are kept as they are.
    pub fn external_schema(location: impl AsRef<str>) -> Self {
        let location = location.as_ref().replace('\\', "/");
        if get_scheme_regex().is_match(&location) {
            ValidationMode::ExternalSchema(location)
        } else {
            ValidationMode::ExternalSchema(format!("file://{}", location))
        }
    }

    pub fn validates(&self) -> bool {
        !matches!(self, ValidationMode::None)
    }
}

/// One document to validate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationRequest {
    /// Project whose root relative paths resolve against; `None` means the
    /// current directory.
    pub project: Option<String>,
    pub path: PathBuf,
    pub mode: ValidationMode,
}

impl ValidationRequest {
    pub fn new(path: impl Into<PathBuf>, mode: ValidationMode) -> Self {
        Self {
            project: None,
            path: path.into(),
            mode,
        }
    }

    pub fn in_project(mut self, project: impl Into<String>) -> Self {
        self.project = Some(project.into());
        self
    }
}

/// Ignores every content event.
struct NoContent;

impl ContentHandler for NoContent {}

/// Validates documents, sharing one remote cache and fetcher across calls.
pub struct Validator {
    cache: Arc<RemoteCache>,
    fetcher: Arc<dyn Fetcher>,
    projects: Arc<dyn ProjectLocator>,
    resources: Arc<dyn ResourceLocator>,
    max_rewrites: usize,
}

impl Validator {
    pub fn new(cache: Arc<RemoteCache>, fetcher: Arc<dyn Fetcher>) -> Self {
        Self {
            cache,
            fetcher,
            projects: Arc::new(ProjectRegistry::default()),
            resources: Arc::new(BundledResources::none()),
            max_rewrites: DEFAULT_MAX_REWRITES,
        }
    }

    /// A validator wired from configuration: the process-wide cache, an HTTP
    /// fetcher, configured projects and bundled resources.
    pub fn from_config(config: &Config) -> Result<Self> {
        let cache = match RemoteCache::install_global(&config.cache.directory) {
            Ok(cache) => cache,
            Err(existing) => {
                if existing.root() != config.cache.directory {
                    warn!(
                        requested = %config.cache.directory.display(),
                        active = %existing.root().display(),
                        "cache root already installed"
                    );
                }
                existing
            }
        };

        let fetcher = HttpFetcher::new(HttpClientConfig {
            timeout_seconds: config.network.timeout_seconds,
            retry_attempts: config.network.retry_attempts,
            retry_delay_ms: config.network.retry_delay_ms,
            max_retry_delay_ms: config.network.max_retry_delay_ms,
            ..Default::default()
        })?;

        let resources = match &config.resources.directory {
            Some(directory) => BundledResources::new(directory),
            None => BundledResources::none(),
        };

        Ok(Self::new(cache, Arc::new(fetcher))
            .with_projects(Arc::new(ProjectRegistry::new(config.projects.clone())))
            .with_resources(Arc::new(resources))
            .with_max_rewrites(config.validation.max_rewrites))
    }

    pub fn with_projects(mut self, projects: Arc<dyn ProjectLocator>) -> Self {
        self.projects = projects;
        self
    }

    pub fn with_resources(mut self, resources: Arc<dyn ResourceLocator>) -> Self {
        self.resources = resources;
        self
    }

    pub fn with_max_rewrites(mut self, max_rewrites: usize) -> Self {
        self.max_rewrites = max_rewrites;
        self
    }

    pub fn cache(&self) -> &Arc<RemoteCache> {
        &self.cache
    }

    /// Validate one document and return every diagnostic, in the order the
    /// parser reported them.
    ///
    /// Document problems are never `Err`. A fatal (well-formedness) error
    /// yields exactly one diagnostic, located at the document.
    pub fn validate(&self, request: &ValidationRequest) -> Result<Vec<Diagnostic>> {
        self.validate_with_handler(request, &mut NoContent)
    }

    /// Convenience for a document outside any project.
    pub fn validate_file(&self, path: &Path, mode: ValidationMode) -> Result<Vec<Diagnostic>> {
        self.validate(&ValidationRequest::new(path, mode))
    }

    /// Like [`validate`](Self::validate), streaming content events to
    /// `content` as the document is parsed.
    pub fn validate_with_handler(
        &self,
        request: &ValidationRequest,
        content: &mut dyn ContentHandler,
    ) -> Result<Vec<Diagnostic>> {
        let started = Instant::now();
        let path = self.document_path(request)?;
        File::open(&path).map_err(|source| ValidationError::DocumentUnreadable {
            path: path.clone(),
            source,
        })?;

        let location = path.to_string_lossy().into_owned();
        let base_dir = path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        let (schema_source, dtd_validation) = plan(&request.mode, &path, &base_dir)?;

        let mut collector = DiagnosticCollector::new(location.clone());
        let mut resolver = EntityResolver::new(
            &base_dir,
            Arc::clone(&self.cache),
            Arc::clone(&self.fetcher),
            Arc::clone(&self.resources),
        )
        .with_max_rewrites(self.max_rewrites);

        // a schema that fails to compile is reported; the document is still
        // checked for well-formedness
        let schema = match &schema_source {
            Some(source) => {
                let session = ParseSession::new(&mut collector, &mut resolver);
                let schema = compile_schema(source, &session)?;
                if let Some(failure) = session.into_failure() {
                    return Err(failure);
                }
                if schema.is_none() {
                    debug!(schema = %source, "schema did not compile");
                }
                schema
            }
            None => None,
        };

        let session = ParseSession::new(&mut collector, &mut resolver);
        parse_document(
            &path,
            parser_options(dtd_validation),
            schema.as_ref(),
            &session,
            content,
        )?;
        let (failure, first_fatal) = session.finish();
        if let Some(failure) = failure {
            return Err(failure);
        }

        let diagnostics = match first_fatal {
            Some(fatal) => vec![Diagnostic::new(
                fatal.message,
                location,
                fatal.line,
                fatal.column,
                false,
            )],
            None => collector.into_diagnostics(),
        };

        info!(
            path = %path.display(),
            diagnostics = diagnostics.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "validated document"
        );
        Ok(diagnostics)
    }

    /// Run [`validate`](Self::validate) on tokio's blocking pool.
    pub async fn validate_async(
        self: Arc<Self>,
        request: ValidationRequest,
    ) -> Result<Vec<Diagnostic>> {
        tokio::task::spawn_blocking(move || self.validate(&request))
            .await
            .map_err(|e| ValidationError::Task(e.to_string()))?
    }

    fn document_path(&self, request: &ValidationRequest) -> Result<PathBuf> {
        if request.path.is_absolute() {
            return Ok(request.path.clone());
        }
        match &request.project {
            Some(project) => Ok(self.projects.project_root(project)?.join(&request.path)),
            None => Ok(std::path::absolute(&request.path)?),
        }
    }
}

/// The schema to compile and whether DTD validation is on, for a mode.
fn plan(
    mode: &ValidationMode,
    path: &Path,
    base_dir: &Path,
) -> Result<(Option<SchemaSource>, bool)> {
    Ok(match mode {
        ValidationMode::None => (None, false),
        ValidationMode::DtdDeclared => (None, true),
        ValidationMode::SchemaDeclared => {
            let hints = SchemaHints::from_file(path)?;
            if !hints.has_schema() {
                debug!(path = %path.display(), "no schema hints in document");
            }
            (hints.schema_source(base_dir), hints.has_doctype)
        }
        ValidationMode::ExternalSchema(location) => {
            let hints = SchemaHints::from_file(path)?;
            (
                Some(SchemaSource::Location(location.clone())),
                hints.has_doctype,
            )
        }
    })
}
