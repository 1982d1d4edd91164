//! XPath queries over documents on disk.
//!
//! [`QueryCompiler`] is a plain value owned by the caller; nothing here is a
//! process-wide mutable singleton.

use std::ffi::{CStr, CString};
use std::marker::PhantomData;
use std::path::Path;
use std::ptr;
use std::sync::OnceLock;

use libc::{c_char, c_int, c_void};
use regex::Regex;
use tracing::debug;

use crate::error::{LibXml2Error, Result, ValidationError};
use crate::libxml2::{XML_PARSE_NONET, initialize};

static ELEMENT_NAME_REGEX: OnceLock<Regex> = OnceLock::new();

fn get_element_name_regex() -> &'static Regex {
    ELEMENT_NAME_REGEX.get_or_init(|| {
        Regex::new(r"^[A-Za-z_][\w.\-]*(?::[A-Za-z_][\w.\-]*)?$")
            .expect("Failed to compile element name regex")
    })
}

#[repr(C)]
pub struct XmlDoc {
    _private: [u8; 0],
}

#[repr(C)]
pub struct XmlXPathCompExpr {
    _private: [u8; 0],
}

#[repr(C)]
pub struct XmlXPathContext {
    _private: [u8; 0],
}

#[repr(C)]
pub struct XmlXPathObject {
    _private: [u8; 0],
}

#[cfg_attr(target_os = "windows", link(name = "libxml2"))]
#[cfg_attr(not(target_os = "windows"), link(name = "xml2"))]
unsafe extern "C" {
    static xmlFree: Option<unsafe extern "C" fn(mem: *mut c_void)>;

    pub fn xmlReadFile(url: *const c_char, encoding: *const c_char, options: c_int) -> *mut XmlDoc;
    pub fn xmlFreeDoc(doc: *mut XmlDoc);

    pub fn xmlXPathCompile(expr: *const c_char) -> *mut XmlXPathCompExpr;
    pub fn xmlXPathFreeCompExpr(comp: *mut XmlXPathCompExpr);
    pub fn xmlXPathNewContext(doc: *mut XmlDoc) -> *mut XmlXPathContext;
    pub fn xmlXPathFreeContext(ctxt: *mut XmlXPathContext);
    pub fn xmlXPathCompiledEval(
        comp: *mut XmlXPathCompExpr,
        ctxt: *mut XmlXPathContext,
    ) -> *mut XmlXPathObject;
    pub fn xmlXPathCastToString(obj: *mut XmlXPathObject) -> *mut c_char;
    pub fn xmlXPathFreeObject(obj: *mut XmlXPathObject);
}

/// Compiles XPath expressions.
#[derive(Debug, Clone, Copy, Default)]
pub struct QueryCompiler;

impl QueryCompiler {
    pub fn new() -> Self {
        initialize();
        QueryCompiler
    }

    pub fn compile(&self, expression: &str) -> Result<CompiledQuery> {
        initialize();
        let c_expression = CString::new(expression).map_err(|_| ValidationError::Query {
            expression: expression.to_string(),
            details: "expression contains a NUL byte".to_string(),
        })?;

        let ptr = unsafe { xmlXPathCompile(c_expression.as_ptr()) };
        if ptr.is_null() {
            return Err(ValidationError::Query {
                expression: expression.to_string(),
                details: "invalid XPath expression".to_string(),
            });
        }
        Ok(CompiledQuery {
            ptr,
            expression: expression.to_string(),
            _not_sync: PhantomData,
        })
    }

    /// Text of the first child of the first element named `name` in
    /// `document`, or an empty string when there is none.
    pub fn element_value(&self, document: &Path, name: &str) -> Result<String> {
        if !get_element_name_regex().is_match(name) {
            return Err(ValidationError::Query {
                expression: name.to_string(),
                details: "not an element name".to_string(),
            });
        }
        self.compile(&format!("string((//*[name()='{}'])[1]/node()[1])", name))?
            .evaluate_string(document)
    }
}

/// A compiled XPath expression.
///
/// Can be moved to another thread but not shared between threads.
pub struct CompiledQuery {
    ptr: *mut XmlXPathCompExpr,
    expression: String,
    _not_sync: PhantomData<std::cell::Cell<()>>,
}

// Safety: the compiled expression is owned exclusively by this value
unsafe impl Send for CompiledQuery {}

impl std::fmt::Debug for CompiledQuery {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompiledQuery")
            .field("expression", &self.expression)
            .finish()
    }
}

impl Drop for CompiledQuery {
    fn drop(&mut self) {
        unsafe { xmlXPathFreeCompExpr(self.ptr) }
    }
}

/// Owned `xmlDoc`, freed on drop.
struct Document(*mut XmlDoc);

impl Drop for Document {
    fn drop(&mut self) {
        unsafe { xmlFreeDoc(self.0) }
    }
}

impl CompiledQuery {
    pub fn expression(&self) -> &str {
        &self.expression
    }

    /// Evaluate against the document at `path`, converting the result with
    /// XPath `string()` semantics.
    pub fn evaluate_string(&self, path: &Path) -> Result<String> {
        let path_str = path.to_string_lossy();
        let c_path = CString::new(path_str.as_ref()).map_err(|_| LibXml2Error::InvalidPath {
            path: path_str.to_string(),
        })?;

        let doc = unsafe { xmlReadFile(c_path.as_ptr(), ptr::null(), XML_PARSE_NONET) };
        if doc.is_null() {
            return Err(LibXml2Error::DocumentLoadFailed {
                path: path.to_path_buf(),
            }
            .into());
        }
        let doc = Document(doc);

        unsafe {
            let ctxt = xmlXPathNewContext(doc.0);
            if ctxt.is_null() {
                return Err(LibXml2Error::XPathContextFailed.into());
            }
            let object = xmlXPathCompiledEval(self.ptr, ctxt);
            xmlXPathFreeContext(ctxt);
            if object.is_null() {
                return Err(ValidationError::Query {
                    expression: self.expression.clone(),
                    details: "evaluation failed".to_string(),
                });
            }

            let raw = xmlXPathCastToString(object);
            xmlXPathFreeObject(object);
            if raw.is_null() {
                return Ok(String::new());
            }
            let value = CStr::from_ptr(raw).to_string_lossy().into_owned();
            if let Some(free) = xmlFree {
                free(raw as *mut c_void);
            }
            debug!(expression = %self.expression, path = %path.display(), "evaluated query");
            Ok(value)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn document(content: &str) -> (TempDir, std::path::PathBuf) {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("web.xml");
        std::fs::write(&path, content).unwrap();
        (dir, path)
    }

    #[test]
    fn test_compile_invalid_expression() {
        let err = QueryCompiler::new().compile("//[").unwrap_err();
        assert!(matches!(err, ValidationError::Query { ref expression, .. } if expression == "//["));
    }

    #[test]
    fn test_evaluate_string() {
        let (_dir, path) = document("<app><name>shop</name><name>other</name></app>");
        let query = QueryCompiler::new().compile("string(/app/name[2])").unwrap();
        assert_eq!(query.expression(), "string(/app/name[2])");
        assert_eq!(query.evaluate_string(&path).unwrap(), "other");
        assert_eq!(query.evaluate_string(&path).unwrap(), "other");
    }

    #[test]
    fn test_element_value() {
        let (_dir, path) = document(
            "<web-app><display-name>Shop</display-name><servlet><display-name>Cart</display-name></servlet></web-app>",
        );
        let compiler = QueryCompiler::new();
        assert_eq!(compiler.element_value(&path, "display-name").unwrap(), "Shop");
        assert_eq!(compiler.element_value(&path, "missing").unwrap(), "");
        assert!(compiler.element_value(&path, "a']|//x['").is_err());
    }

    #[test]
    fn test_unreadable_document() {
        let query = QueryCompiler::new().compile("count(//*)").unwrap();
        let err = query.evaluate_string(Path::new("/definitely/not/here.xml")).unwrap_err();
        assert!(matches!(err, ValidationError::LibXml2Internal { .. }));
    }

    #[test]
    fn test_compiled_query_moves_across_threads() {
        let (_dir, path) = document("<a><b/><b/></a>");
        let query = QueryCompiler::new().compile("count(//b)").unwrap();
        let value = std::thread::spawn(move || query.evaluate_string(&path).unwrap())
            .join()
            .unwrap();
        assert_eq!(value, "2");
    }
}
