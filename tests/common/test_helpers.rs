use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tempfile::TempDir;
use xml_validator::{RemoteCache, Validator};

use super::mocks::MockFetcher;

/// A scratch workspace with a documents directory and an entity cache.
pub struct TestWorkspace {
    pub temp_dir: TempDir,
    pub fetcher: MockFetcher,
    pub cache: Arc<RemoteCache>,
}

impl TestWorkspace {
    pub fn new() -> Self {
        Self::with_cache_dir_name("cache")
    }

    /// A workspace whose cache root is `name` inside the scratch directory.
    pub fn with_cache_dir_name(name: &str) -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let cache = Arc::new(RemoteCache::new(temp_dir.path().join(name)));
        fs::create_dir_all(temp_dir.path().join("docs")).unwrap();
        Self {
            temp_dir,
            fetcher: MockFetcher::new(),
            cache,
        }
    }

    pub fn docs_dir(&self) -> PathBuf {
        self.temp_dir.path().join("docs")
    }

    pub fn cache_dir(&self) -> PathBuf {
        self.cache.root().to_path_buf()
    }

    /// Write `content` to `name` under the documents directory.
    pub fn write(&self, name: &str, content: &str) -> PathBuf {
        let path = self.docs_dir().join(name);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(&path, content).unwrap();
        path
    }

    /// A validator backed by this workspace's cache and mock fetcher.
    pub fn validator(&self) -> Validator {
        Validator::new(Arc::clone(&self.cache), Arc::new(self.fetcher.clone()))
    }

    /// Number of files stored in the cache.
    pub fn cached_file_count(&self) -> usize {
        count_files(&self.cache_dir())
    }
}

fn count_files(dir: &Path) -> usize {
    let Ok(entries) = fs::read_dir(dir) else {
        return 0;
    };
    entries
        .flatten()
        .map(|entry| {
            let path = entry.path();
            if path.is_dir() { count_files(&path) } else { 1 }
        })
        .sum()
}

pub const NOTE_DTD: &str = r#"<!ELEMENT note (to, body)>
<!ELEMENT to (#PCDATA)>
<!ELEMENT body (#PCDATA)>
"#;

pub fn valid_note(dtd: &str) -> String {
    format!(
        r#"<?xml version="1.0"?>
<!DOCTYPE note SYSTEM "{dtd}">
<note><to>Tove</to><body>Hello</body></note>
"#
    )
}

/// Schema whose `item` elements require an `id` attribute.
pub const CATALOG_XSD: &str = r#"<?xml version="1.0"?>
<xs:schema xmlns:xs="http://www.w3.org/2001/XMLSchema">
  <xs:element name="catalog">
    <xs:complexType>
      <xs:sequence>
        <xs:element name="item" maxOccurs="unbounded">
          <xs:complexType>
            <xs:simpleContent>
              <xs:extension base="xs:string">
                <xs:attribute name="id" type="xs:string" use="required"/>
              </xs:extension>
            </xs:simpleContent>
          </xs:complexType>
        </xs:element>
      </xs:sequence>
    </xs:complexType>
  </xs:element>
</xs:schema>
"#;

/// A catalog document of 12 lines whose last `item` (line 12) has no `id`.
pub fn catalog_missing_id(schema_location: &str) -> String {
    let mut lines = vec![
        r#"<?xml version="1.0"?>"#.to_string(),
        format!(
            r#"<catalog xmlns:xsi="http://www.w3.org/2001/XMLSchema-instance" xsi:noNamespaceSchemaLocation="{schema_location}">"#
        ),
    ];
    for n in 1..=9 {
        lines.push(format!(r#"  <item id="i{n}">entry {n}</item>"#));
    }
    lines.push("  <item>entry without id</item>".to_string());
    lines.push("</catalog>".to_string());
    lines.join("\n")
}

pub fn valid_catalog(schema_location: &str) -> String {
    format!(
        r#"<?xml version="1.0"?>
<catalog xmlns:xsi="http://www.w3.org/2001/XMLSchema-instance" xsi:noNamespaceSchemaLocation="{schema_location}">
  <item id="a">first</item>
</catalog>
"#
    )
}
