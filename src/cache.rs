//! Disk cache for remote entities.
//!
//! Each remote URL maps to one file below the cache root, laid out as
//! `{root}/{host}[_{port}]/{path}` so that a cached schema's relative imports
//! land next to it. Files are published with an atomic rename, so a reader
//! never sees a partially written slot under its final name.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};

use percent_encoding::{AsciiSet, CONTROLS, utf8_percent_encode};
use reqwest::Url;
use tempfile::NamedTempFile;
use tracing::{debug, info, warn};

use crate::error::{Result, ValidationError};

/// Characters escaped in the path of a URI built from a file path
const PATH_ESCAPES: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'"')
    .add(b'#')
    .add(b'%')
    .add(b'<')
    .add(b'>')
    .add(b'?')
    .add(b'[')
    .add(b']')
    .add(b'^')
    .add(b'`')
    .add(b'{')
    .add(b'|')
    .add(b'}');

/// Process-wide cache, installed once at startup
static GLOBAL_CACHE: OnceLock<Arc<RemoteCache>> = OnceLock::new();

/// Default cache root: a fixed directory under the system temp dir.
pub fn default_cache_root() -> PathBuf {
    std::env::temp_dir().join("xml-validator")
}

/// A remote entity and the local file holding its content.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry {
    pub remote_url: String,
    pub local_path: PathBuf,
}

#[derive(Debug)]
pub struct RemoteCache {
    root: PathBuf,
}

impl RemoteCache {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Install the process-wide cache rooted at `root`.
    ///
    /// Only the first call wins; later calls get the already installed cache
    /// back as `Err`.
    pub fn install_global(
        root: impl Into<PathBuf>,
    ) -> std::result::Result<Arc<RemoteCache>, Arc<RemoteCache>> {
        let cache = Arc::new(RemoteCache::new(root));
        match GLOBAL_CACHE.set(Arc::clone(&cache)) {
            Ok(()) => Ok(cache),
            Err(_) => Err(Self::global()),
        }
    }

    /// The process-wide cache, defaulting to [`default_cache_root`].
    pub fn global() -> Arc<RemoteCache> {
        Arc::clone(GLOBAL_CACHE.get_or_init(|| Arc::new(RemoteCache::new(default_cache_root()))))
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Deterministic slot path for `url`.
    pub fn slot_path(&self, url: &str) -> Result<PathBuf> {
        let parsed = parse_remote_url(url)?;
        let mut path = self.root.join(authority_dir(&parsed)?);

        let mut segments: Vec<String> = parsed
            .path_segments()
            .map(|segments| segments.map(sanitize_segment).collect())
            .unwrap_or_default();
        // "http://host" and "http://host/dir/" both name a directory
        match segments.last_mut() {
            Some(last) if last.is_empty() => *last = "index".to_string(),
            None => segments.push("index".to_string()),
            _ => {}
        }
        if let Some(query) = parsed.query().filter(|q| !q.is_empty())
            && let Some(last) = segments.last_mut()
        {
            last.push('_');
            last.push_str(&sanitize_query(query));
        }

        for segment in segments.iter().filter(|s| !s.is_empty()) {
            path.push(segment);
        }
        Ok(path)
    }

    /// Local path of a complete cached copy of `url`, if there is one.
    ///
    /// An empty file counts as absent.
    pub fn get(&self, url: &str) -> Result<Option<PathBuf>> {
        let path = self.slot_path(url)?;
        Ok(is_present(&path).then_some(path))
    }

    pub fn entry(&self, url: &str) -> Result<Option<CacheEntry>> {
        Ok(self.get(url)?.map(|local_path| CacheEntry {
            remote_url: url.to_string(),
            local_path,
        }))
    }

    /// Store `bytes` as the content of `url`.
    pub fn put(&self, url: &str, bytes: &[u8]) -> Result<PathBuf> {
        self.fill(url, |sink| {
            sink.write_all(bytes)?;
            Ok(bytes.len() as u64)
        })
    }

    /// Fill the slot for `url` with whatever `write` produces.
    ///
    /// The payload goes to a temporary file next to the slot and is renamed
    /// into place only after `write` returns `Ok`. On failure nothing is left
    /// under the slot name, including a stale empty file from earlier.
    pub fn fill<F>(&self, url: &str, write: F) -> Result<PathBuf>
    where
        F: FnOnce(&mut dyn Write) -> Result<u64>,
    {
        let path = self.slot_path(url)?;
        let parent = path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| self.root.clone());

        fs::create_dir_all(&parent).map_err(|source| ValidationError::CacheWrite {
            path: parent.clone(),
            source,
        })?;
        let mut staging =
            NamedTempFile::new_in(&parent).map_err(|source| ValidationError::CacheWrite {
                path: parent.clone(),
                source,
            })?;

        let written = match write(staging.as_file_mut()) {
            Ok(written) => written,
            Err(error) => {
                drop(staging);
                discard_stale(&path);
                warn!(url, error = %error, "rolled back cache slot");
                return Err(error);
            }
        };

        let published = staging
            .as_file_mut()
            .flush()
            .and_then(|_| staging.as_file().sync_all())
            .map_err(|source| ValidationError::CacheWrite {
                path: path.clone(),
                source,
            })
            .and_then(|_| {
                staging
                    .persist(&path)
                    .map_err(|e| ValidationError::CacheWrite {
                        path: path.clone(),
                        source: e.error,
                    })
            });
        if let Err(error) = published {
            discard_stale(&path);
            return Err(error);
        }

        info!(url, path = %path.display(), bytes = written, "cached remote entity");
        Ok(path)
    }

    /// If `location` points inside the cache root, the part after the root
    /// (starting with `/`).
    ///
    /// Accepts `file://` URLs as well as bare paths, with either separator.
    /// The root may appear escaped, as the parser writes it into URIs it
    /// builds against a cached file (`my cache` as `my%20cache`).
    pub fn relative_to_root(&self, location: &str) -> Option<String> {
        let root = self.root.to_string_lossy().replace('\\', "/");
        let root = root.trim_end_matches('/');
        let escaped_root = utf8_percent_encode(root, PATH_ESCAPES).to_string();
        let location = location.replace('\\', "/");

        let mut roots = vec![root.to_string()];
        if escaped_root != root {
            roots.push(escaped_root);
        }
        let candidates: Vec<String> = roots
            .iter()
            .flat_map(|root| [format!("file://{}", root), format!("file:{}", root), root.clone()])
            .collect();
        candidates.iter().find_map(|prefix| {
            let rest = location.strip_prefix(prefix.as_str())?;
            if rest.is_empty() || rest.starts_with('/') {
                Some(rest.to_string())
            } else {
                None
            }
        })
    }
}

fn is_present(path: &Path) -> bool {
    fs::metadata(path)
        .map(|metadata| metadata.is_file() && metadata.len() > 0)
        .unwrap_or(false)
}

fn discard_stale(path: &Path) {
    if path.is_file() && !is_present(path) && fs::remove_file(path).is_ok() {
        debug!(path = %path.display(), "removed empty cache slot");
    }
}

pub(crate) fn parse_remote_url(url: &str) -> Result<Url> {
    let parsed = Url::parse(url).map_err(|e| ValidationError::MalformedUrl {
        url: url.to_string(),
        reason: e.to_string(),
    })?;
    if parsed.host_str().is_none() {
        return Err(ValidationError::MalformedUrl {
            url: url.to_string(),
            reason: "missing host".to_string(),
        });
    }
    Ok(parsed)
}

/// Directory name for the URL's host and port.
pub(crate) fn authority_dir(url: &Url) -> Result<String> {
    let host = url.host_str().ok_or_else(|| ValidationError::MalformedUrl {
        url: url.to_string(),
        reason: "missing host".to_string(),
    })?;
    let host: String = host
        .chars()
        .map(|c| if matches!(c, ':' | '[' | ']') { '_' } else { c })
        .collect();
    Ok(match url.port() {
        Some(port) => format!("{}_{}", host, port),
        None => host,
    })
}

fn sanitize_segment(segment: &str) -> String {
    match segment {
        "." | ".." => "_".to_string(),
        other => other.replace(['\\', ':'], "_"),
    }
}

fn sanitize_query(query: &str) -> String {
    query
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') {
                c
            } else {
                '_'
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn cache() -> (TempDir, RemoteCache) {
        let dir = TempDir::new().unwrap();
        let cache = RemoteCache::new(dir.path());
        (dir, cache)
    }

    #[test]
    fn test_slot_path_preserves_structure() {
        let (dir, cache) = cache();
        let path = cache
            .slot_path("http://schemas.example.com/xsd/v1/order.xsd")
            .unwrap();
        assert_eq!(
            path,
            dir.path().join("schemas.example.com/xsd/v1/order.xsd")
        );

        let sibling = cache
            .slot_path("http://schemas.example.com/xsd/v1/common.xsd")
            .unwrap();
        assert_eq!(path.parent(), sibling.parent());
    }

    #[test]
    fn test_slot_path_is_deterministic() {
        let (_dir, cache) = cache();
        let url = "http://example.com/a/b.dtd";
        assert_eq!(cache.slot_path(url).unwrap(), cache.slot_path(url).unwrap());
    }

    #[test]
    fn test_slot_path_port_query_and_directory() {
        let (dir, cache) = cache();
        assert_eq!(
            cache.slot_path("http://localhost:8080/s.xsd").unwrap(),
            dir.path().join("localhost_8080/s.xsd")
        );
        assert_eq!(
            cache.slot_path("http://example.com/get?name=a.xsd").unwrap(),
            dir.path().join("example.com/get_name_a.xsd")
        );
        assert_eq!(
            cache.slot_path("http://example.com/dir/").unwrap(),
            dir.path().join("example.com/dir/index")
        );
        // dot segments are resolved by URL parsing and never escape the root
        assert_eq!(
            cache.slot_path("http://example.com/a/../../b.xsd").unwrap(),
            dir.path().join("example.com/b.xsd")
        );
    }

    #[test]
    fn test_slot_path_rejects_malformed_urls() {
        let (_dir, cache) = cache();
        assert!(matches!(
            cache.slot_path("http//broken"),
            Err(ValidationError::MalformedUrl { .. })
        ));
    }

    #[test]
    fn test_put_then_get_round_trip() {
        let (_dir, cache) = cache();
        let url = "http://example.com/schemas/a.xsd";
        assert!(cache.get(url).unwrap().is_none());

        let stored = cache.put(url, b"<xs:schema/>").unwrap();
        let found = cache.get(url).unwrap().unwrap();
        assert_eq!(stored, found);
        assert_eq!(fs::read(&found).unwrap(), b"<xs:schema/>");

        let entry = cache.entry(url).unwrap().unwrap();
        assert_eq!(entry.remote_url, url);
        assert_eq!(entry.local_path, found);
    }

    #[test]
    fn test_empty_slot_counts_as_absent() {
        let (_dir, cache) = cache();
        let url = "http://example.com/empty.xsd";
        let path = cache.slot_path(url).unwrap();
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, b"").unwrap();

        assert!(cache.get(url).unwrap().is_none());
    }

    #[test]
    fn test_failed_fill_leaves_no_file() {
        let (_dir, cache) = cache();
        let url = "http://example.com/partial.xsd";

        let result = cache.fill(url, |sink| {
            sink.write_all(b"<xs:schema")?;
            Err(ValidationError::Io(std::io::Error::new(
                std::io::ErrorKind::ConnectionReset,
                "connection reset",
            )))
        });
        assert!(result.is_err());

        let path = cache.slot_path(url).unwrap();
        assert!(!path.exists());
        let leftovers: Vec<_> = fs::read_dir(path.parent().unwrap()).unwrap().collect();
        assert!(leftovers.is_empty(), "staging file was not cleaned up");
    }

    #[test]
    fn test_failed_fill_removes_stale_empty_slot() {
        let (_dir, cache) = cache();
        let url = "http://example.com/stale.xsd";
        let path = cache.slot_path(url).unwrap();
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, b"").unwrap();

        let result = cache.fill(url, |_| {
            Err(ValidationError::Config("simulated failure".to_string()))
        });
        assert!(result.is_err());
        assert!(!path.exists());
    }

    #[test]
    fn test_fill_replaces_existing_content() {
        let (_dir, cache) = cache();
        let url = "http://example.com/a.xsd";
        cache.put(url, b"first").unwrap();
        let path = cache.put(url, b"second").unwrap();
        assert_eq!(fs::read(path).unwrap(), b"second");
    }

    #[test]
    fn test_relative_to_root() {
        let cache = RemoteCache::new("/tmp/xml-cache");
        assert_eq!(
            cache.relative_to_root("/tmp/xml-cache/example.com/a.xsd"),
            Some("/example.com/a.xsd".to_string())
        );
        assert_eq!(
            cache.relative_to_root("file:///tmp/xml-cache/example.com/a.xsd"),
            Some("/example.com/a.xsd".to_string())
        );
        assert_eq!(
            cache.relative_to_root(r"\tmp\xml-cache\example.com\a.xsd"),
            Some("/example.com/a.xsd".to_string())
        );
        assert_eq!(cache.relative_to_root("/tmp/xml-cache-other/a.xsd"), None);
        assert_eq!(cache.relative_to_root("http://example.com/a.xsd"), None);
    }

    #[test]
    fn test_relative_to_root_with_escaped_root() {
        let cache = RemoteCache::new("/tmp/my cache");
        assert_eq!(
            cache.relative_to_root("/tmp/my%20cache/example.com/xsd/types.xsd"),
            Some("/example.com/xsd/types.xsd".to_string())
        );
        assert_eq!(
            cache.relative_to_root("file:///tmp/my%20cache/example.com/a.xsd"),
            Some("/example.com/a.xsd".to_string())
        );
        assert_eq!(
            cache.relative_to_root("/tmp/my cache/example.com/a.xsd"),
            Some("/example.com/a.xsd".to_string())
        );
        // escaped segments below the root are left for the origin URL
        assert_eq!(
            cache.relative_to_root("/tmp/my%20cache/example.com/a%20b.xsd"),
            Some("/example.com/a%20b.xsd".to_string())
        );
        assert_eq!(cache.relative_to_root("/tmp/my%20cache2/a.xsd"), None);
    }

    #[test]
    fn test_global_cache_is_installed_once() {
        let first = RemoteCache::global();
        let second = RemoteCache::global();
        assert!(Arc::ptr_eq(&first, &second));
        assert!(RemoteCache::install_global("/somewhere/else").is_err());
    }
}
