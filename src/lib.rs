//! # xml-validator Library
//!
//! Validates XML documents against the DTD or XML Schemas they declare, or
//! against an external schema, collecting every diagnostic instead of
//! stopping at the first. External entities are resolved through a tiered
//! resolver that serves remote DTDs and schemas from a disk cache.

pub mod cache;
pub mod cli;
pub mod config;
pub mod diagnostic;
pub mod error;
pub mod handler;
pub mod http_client;
pub mod libxml2;
pub mod locator;
pub mod output;
pub mod query;
pub mod resolver;
pub mod schema_loader;
pub mod validator;

pub use cache::{CacheEntry, RemoteCache, default_cache_root};
pub use cli::{Cli, VerbosityLevel};
pub use config::{Config, ConfigError, ConfigManager};
pub use diagnostic::{Diagnostic, DiagnosticCollector, ErrorHandler, ParseReport, normalize_location};
pub use error::{ErrorCategory, FetchError, Result, ValidationError};
pub use handler::{Attribute, ContentHandler, EventRecorder, QualifiedName};
pub use http_client::{Fetcher, HttpClientConfig, HttpFetcher};
pub use locator::{BundledResources, ProjectLocator, ProjectRegistry, ResourceLocator};
pub use output::{DocumentReport, Outcome, Output, exit_code};
pub use query::{CompiledQuery, QueryCompiler};
pub use resolver::{DEFAULT_MAX_REWRITES, EntityResolver, Resolution, ResolutionContext, ResolveEntity};
pub use schema_loader::{SchemaHints, SchemaSource};
pub use validator::{ValidationMode, ValidationRequest, Validator};
