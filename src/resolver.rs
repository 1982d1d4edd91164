//! Tiered resolution of external entities (DTDs, schema imports).
//!
//! In order: Windows drive-letter repair, cached remote entities mapped back
//! to their origin, remote `http(s)` entities fetched into the disk cache,
//! local files (with a bundled-resource fallback), and finally pass-through.

use std::borrow::Cow;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};

use regex::Regex;
use reqwest::Url;
use tracing::{debug, info};

use crate::cache::{CacheEntry, RemoteCache, authority_dir, parse_remote_url};
use crate::diagnostic::decode_path;
use crate::error::{Result, ValidationError};
use crate::http_client::Fetcher;
use crate::locator::ResourceLocator;

/// Upper bound on cache-to-origin rewrites for one system id.
pub const DEFAULT_MAX_REWRITES: usize = 8;

/// `file://C/...`, a drive letter that lost its colon
static LOST_DRIVE_COLON_REGEX: OnceLock<Regex> = OnceLock::new();

/// `C:/...` or `C:\...`
static DRIVE_PATH_REGEX: OnceLock<Regex> = OnceLock::new();

/// A URI scheme of two or more characters, so `C:` is not one
static SCHEME_REGEX: OnceLock<Regex> = OnceLock::new();

fn get_lost_drive_colon_regex() -> &'static Regex {
    LOST_DRIVE_COLON_REGEX.get_or_init(|| {
        Regex::new(r"^file://([a-zA-Z])/").expect("Failed to compile drive colon regex")
    })
}

fn get_drive_path_regex() -> &'static Regex {
    DRIVE_PATH_REGEX
        .get_or_init(|| Regex::new(r"^/?[a-zA-Z]:[/\\]").expect("Failed to compile drive regex"))
}

fn get_scheme_regex() -> &'static Regex {
    SCHEME_REGEX.get_or_init(|| {
        Regex::new(r"^[a-zA-Z][a-zA-Z0-9+.\-]+:").expect("Failed to compile scheme regex")
    })
}

/// Supplies the content of external entities while a document is parsed.
pub trait ResolveEntity {
    fn resolve_entity(&mut self, public_id: Option<&str>, system_id: &str) -> Result<Resolution>;
}

/// Where the parser should read an entity from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    /// A remote entity, served from its cache slot.
    Cached(CacheEntry),
    /// A local file. It may not exist; the parser then reports it.
    Local(PathBuf),
    /// A bundled fallback resource, as a URL.
    Bundled(String),
    /// Left for the parser to handle as given.
    Passthrough(String),
}

impl Resolution {
    /// The location handed to the parser.
    pub fn location(&self) -> String {
        match self {
            Resolution::Cached(entry) => entry.local_path.to_string_lossy().into_owned(),
            Resolution::Local(path) => path.to_string_lossy().into_owned(),
            Resolution::Bundled(url) => Url::parse(url)
                .ok()
                .filter(|parsed| parsed.scheme() == "file")
                .and_then(|parsed| parsed.to_file_path().ok())
                .map(|path| path.to_string_lossy().into_owned())
                .unwrap_or_else(|| url.clone()),
            Resolution::Passthrough(location) => location.clone(),
        }
    }
}

/// Per-validation resolution state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolutionContext {
    /// Directory relative local references resolve against.
    pub base_path: PathBuf,
    /// Origin (`scheme://host[:port]`) of the last remote entity resolved.
    pub last_remote_base: Option<String>,
    /// Origin of every remote entity resolved so far, keyed by its cache
    /// directory name (`host` or `host_port`).
    pub remote_origins: BTreeMap<String, String>,
}

impl ResolutionContext {
    pub fn new(base_path: impl Into<PathBuf>) -> Self {
        Self {
            base_path: base_path.into(),
            last_remote_base: None,
            remote_origins: BTreeMap::new(),
        }
    }
}

pub struct EntityResolver {
    context: ResolutionContext,
    cache: Arc<RemoteCache>,
    fetcher: Arc<dyn Fetcher>,
    resources: Arc<dyn ResourceLocator>,
    max_rewrites: usize,
}

impl EntityResolver {
    pub fn new(
        base_path: impl Into<PathBuf>,
        cache: Arc<RemoteCache>,
        fetcher: Arc<dyn Fetcher>,
        resources: Arc<dyn ResourceLocator>,
    ) -> Self {
        Self {
            context: ResolutionContext::new(base_path),
            cache,
            fetcher,
            resources,
            max_rewrites: DEFAULT_MAX_REWRITES,
        }
    }

    pub fn with_max_rewrites(mut self, max_rewrites: usize) -> Self {
        self.max_rewrites = max_rewrites;
        self
    }

    pub fn context(&self) -> &ResolutionContext {
        &self.context
    }

    /// Run the tiers over `system_id`.
    pub fn resolve(&mut self, system_id: &str) -> Result<Resolution> {
        let mut location = repair_drive_letter(system_id).into_owned();
        let mut rewrites = 0;

        loop {
            if let Some(remote) = self.cached_origin(&location) {
                rewrites += 1;
                if rewrites > self.max_rewrites {
                    return Err(ValidationError::TooManyRewrites {
                        system_id: system_id.to_string(),
                        limit: self.max_rewrites,
                    });
                }
                debug!(from = %location, to = %remote, "cached entity mapped back to its origin");
                location = remote;
                continue;
            }

            if is_remote(&location) {
                return self.resolve_remote(&location).map(Resolution::Cached);
            }

            return Ok(match local_reference(&location) {
                Some(reference) => self.resolve_local(reference),
                None => {
                    debug!(location = %location, "passing entity through");
                    Resolution::Passthrough(location)
                }
            });
        }
    }

    /// The remote URL a location under the cache root was fetched from.
    ///
    /// Only hosts resolved earlier in this validation are mapped back; any
    /// other cache path is read as a local file.
    fn cached_origin(&self, location: &str) -> Option<String> {
        let relative = self.cache.relative_to_root(location)?;
        let relative = relative.trim_start_matches('/');
        let (dir, rest) = relative.split_once('/').unwrap_or((relative, ""));
        let origin = self.context.remote_origins.get(dir)?;
        Some(format!("{}/{}", origin.trim_end_matches('/'), rest))
    }

    fn resolve_remote(&mut self, url: &str) -> Result<CacheEntry> {
        let parsed = parse_remote_url(url)?;
        let origin = parsed.origin().ascii_serialization();
        self.context
            .remote_origins
            .insert(authority_dir(&parsed)?, origin.clone());
        self.context.last_remote_base = Some(origin);

        if let Some(local_path) = self.cache.get(url)? {
            debug!(url, path = %local_path.display(), "remote entity served from cache");
            return Ok(CacheEntry {
                remote_url: url.to_string(),
                local_path,
            });
        }

        info!(url, "fetching remote entity");
        let fetcher = Arc::clone(&self.fetcher);
        let local_path = self.cache.fill(url, |sink| {
            fetcher.fetch(url, sink).map_err(ValidationError::from)
        })?;
        Ok(CacheEntry {
            remote_url: url.to_string(),
            local_path,
        })
    }

    fn resolve_local(&self, reference: LocalReference) -> Resolution {
        let path = if is_absolute_path(&reference.path) {
            PathBuf::from(&reference.path)
        } else {
            self.context.base_path.join(&reference.path)
        };

        if path.exists() {
            debug!(path = %path.display(), "local entity");
            return Resolution::Local(path);
        }

        // the parser escapes paths when it builds URIs against a base
        if let Some(decoded) = decoded_existing_path(&path) {
            debug!(path = %decoded.display(), "local entity, unescaped");
            return Resolution::Local(decoded);
        }

        if let Some(logical_path) = bundled_resource_key(&path)
            && let Some(url) = self.resources.lookup(&logical_path)
        {
            debug!(path = %path.display(), resource = %url, "using bundled resource");
            return Resolution::Bundled(url);
        }

        debug!(path = %path.display(), "local entity not found");
        Resolution::Local(path)
    }
}

impl ResolveEntity for EntityResolver {
    fn resolve_entity(&mut self, public_id: Option<&str>, system_id: &str) -> Result<Resolution> {
        debug!(public_id, system_id, "resolving entity");
        self.resolve(system_id)
    }
}

#[derive(Debug, PartialEq, Eq)]
struct LocalReference {
    path: String,
}

fn repair_drive_letter(system_id: &str) -> Cow<'_, str> {
    get_lost_drive_colon_regex().replace(system_id, "file://$1:/")
}

fn is_remote(location: &str) -> bool {
    let lower = location.get(..8).unwrap_or(location).to_ascii_lowercase();
    lower.starts_with("http://") || lower.starts_with("https://")
}

/// Local file references: `file:` URLs and scheme-less paths.
fn local_reference(location: &str) -> Option<LocalReference> {
    let file_url = location
        .get(..5)
        .filter(|scheme| scheme.eq_ignore_ascii_case("file:"))
        .map(|_| &location[5..]);

    match file_url {
        Some(rest) => {
            let rest = rest.strip_prefix("//").unwrap_or(rest);
            let rest = if rest.starts_with('/') && get_drive_path_regex().is_match(rest) {
                &rest[1..]
            } else {
                rest
            };
            let path = decode_path(rest).unwrap_or_else(|_| rest.to_string());
            Some(LocalReference { path })
        }
        None if get_scheme_regex().is_match(location) => None,
        None => Some(LocalReference {
            path: location.to_string(),
        }),
    }
}

/// `path` percent-decoded, if that differs from `path` and names a file.
fn decoded_existing_path(path: &Path) -> Option<PathBuf> {
    let raw = path.to_str()?;
    let decoded = decode_path(raw).ok()?;
    (decoded != raw)
        .then(|| PathBuf::from(decoded))
        .filter(|decoded| decoded.exists())
}

fn is_absolute_path(path: &str) -> bool {
    path.starts_with('/') || Path::new(path).is_absolute() || get_drive_path_regex().is_match(path)
}

/// `{ext}/{stem}.{ext}`, the bundled-resource key for a missing file.
fn bundled_resource_key(path: &Path) -> Option<String> {
    let extension = path.extension()?.to_str()?;
    let stem = path.file_stem()?.to_str()?;
    Some(format!("{}/{}.{}", extension, stem, extension))
}
