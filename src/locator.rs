//! Collaborators that map logical names to locations on disk.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use reqwest::Url;

use crate::error::{Result, ValidationError};

/// Maps a project name to the directory its documents live in.
pub trait ProjectLocator: Send + Sync {
    fn project_root(&self, name: &str) -> Result<PathBuf>;
}

/// Looks up a resource shipped with the tool, by logical path such as
/// `xsd/web-app.xsd`. Returns a URL.
pub trait ResourceLocator: Send + Sync {
    fn lookup(&self, logical_path: &str) -> Option<String>;
}

/// Project roots taken from configuration.
#[derive(Debug, Clone, Default)]
pub struct ProjectRegistry {
    projects: BTreeMap<String, PathBuf>,
}

impl ProjectRegistry {
    pub fn new(projects: BTreeMap<String, PathBuf>) -> Self {
        Self { projects }
    }

    pub fn with_project(mut self, name: impl Into<String>, root: impl Into<PathBuf>) -> Self {
        self.projects.insert(name.into(), root.into());
        self
    }
}

impl ProjectLocator for ProjectRegistry {
    fn project_root(&self, name: &str) -> Result<PathBuf> {
        self.projects
            .get(name)
            .cloned()
            .ok_or_else(|| ValidationError::UnknownProject {
                name: name.to_string(),
            })
    }
}

/// Resources bundled in a directory on disk.
#[derive(Debug, Clone, Default)]
pub struct BundledResources {
    root: Option<PathBuf>,
}

impl BundledResources {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: Some(root.into()),
        }
    }

    /// A locator that never finds anything.
    pub fn none() -> Self {
        Self { root: None }
    }

    pub fn root(&self) -> Option<&Path> {
        self.root.as_deref()
    }
}

impl ResourceLocator for BundledResources {
    fn lookup(&self, logical_path: &str) -> Option<String> {
        let root = self.root.as_ref()?;
        let relative = logical_path.trim_start_matches('/');
        if relative.split('/').any(|segment| segment == "..") {
            return None;
        }
        let candidate = root.join(relative);
        if !candidate.is_file() {
            return None;
        }
        let absolute = std::path::absolute(&candidate).ok()?;
        Url::from_file_path(&absolute).ok().map(String::from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_project_registry_lookup() {
        let registry = ProjectRegistry::default().with_project("shop", "/work/shop");
        assert_eq!(registry.project_root("shop").unwrap(), PathBuf::from("/work/shop"));

        let err = registry.project_root("missing").unwrap_err();
        assert!(matches!(err, ValidationError::UnknownProject { ref name } if name == "missing"));
    }

    #[test]
    fn test_bundled_resources_lookup() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir_all(dir.path().join("xsd")).unwrap();
        std::fs::write(dir.path().join("xsd/web-app.xsd"), "<xs:schema/>").unwrap();

        let resources = BundledResources::new(dir.path());
        let url = resources.lookup("/xsd/web-app.xsd").unwrap();
        assert!(url.starts_with("file:///"));
        assert!(url.ends_with("xsd/web-app.xsd"));

        assert!(resources.lookup("xsd/other.xsd").is_none());
        assert!(resources.lookup("../escape.xsd").is_none());
    }

    #[test]
    fn test_no_bundled_resources() {
        assert!(BundledResources::none().lookup("dtd/a.dtd").is_none());
    }
}
