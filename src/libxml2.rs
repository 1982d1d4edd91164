//! LibXML2 FFI wrapper
//!
//! The document is streamed with the `xmlTextReader` API; DTD validation is a
//! parser option and XML Schema validation is attached to the reader with
//! `xmlTextReaderSetSchema`.
//!
//! ## Thread Safety Strategy
//!
//! - **Initialization**: `xmlInitParser` and the installation of the external
//!   entity loader happen exactly once, guarded by [`std::sync::Once`].
//! - **Schema parsing**: NOT thread-safe in libxml2, serialized by a global
//!   mutex.
//! - **Document parsing and validation**: parallel, one reader per thread.
//!   Compiled schemas are shared read-only through [`XmlSchemaPtr`].
//! - **Entity loading**: libxml2 has a single process-wide entity loader. It
//!   dispatches to the [`ParseSession`] bound to the current thread, so every
//!   validation reaches its own resolver.

use std::cell::{Cell, RefCell};
use std::ffi::{CStr, CString};
use std::marker::PhantomData;
use std::path::Path;
use std::ptr;
use std::sync::{Arc, Mutex, Once, OnceLock};

use libc::{c_char, c_int, c_void};
use tracing::{debug, trace};

use crate::diagnostic::{ErrorHandler, ParseReport};
use crate::error::{LibXml2Error, LibXml2Result, ValidationError};
use crate::handler::{Attribute, ContentHandler, QualifiedName};
use crate::resolver::ResolveEntity;
use crate::schema_loader::SchemaSource;

/// Global initialization flag for libxml2
static LIBXML2_INIT: Once = Once::new();

/// libxml2's own entity loader, saved before ours is installed
static DEFAULT_ENTITY_LOADER: OnceLock<XmlExternalEntityLoader> = OnceLock::new();

/// Schema parsing is not thread-safe in libxml2
static SCHEMA_PARSE_LOCK: Mutex<()> = Mutex::new(());

thread_local! {
    /// The session whose resolver serves entity loads on this thread
    static ACTIVE_SESSION: Cell<*const c_void> = const { Cell::new(ptr::null()) };
}

// xmlParserOption
pub const XML_PARSE_RECOVER: c_int = 1 << 0;
pub const XML_PARSE_NOENT: c_int = 1 << 1;
pub const XML_PARSE_DTDLOAD: c_int = 1 << 2;
pub const XML_PARSE_DTDATTR: c_int = 1 << 3;
pub const XML_PARSE_DTDVALID: c_int = 1 << 4;
pub const XML_PARSE_NONET: c_int = 1 << 11;

// xmlErrorLevel
const XML_ERR_WARNING: c_int = 1;
const XML_ERR_FATAL: c_int = 3;

// xmlReaderTypes
const XML_READER_TYPE_ELEMENT: c_int = 1;
const XML_READER_TYPE_TEXT: c_int = 3;
const XML_READER_TYPE_CDATA: c_int = 4;
const XML_READER_TYPE_PROCESSING_INSTRUCTION: c_int = 7;
const XML_READER_TYPE_WHITESPACE: c_int = 13;
const XML_READER_TYPE_SIGNIFICANT_WHITESPACE: c_int = 14;
const XML_READER_TYPE_END_ELEMENT: c_int = 15;

const XMLNS_NAMESPACE: &str = "http://www.w3.org/2000/xmlns/";

/// Parser options for a document parse.
///
/// External DTDs are always loaded (for defaulted attributes and entities)
/// and the network is never touched by libxml2 itself: remote entities go
/// through the resolver.
pub fn parser_options(dtd_validation: bool) -> c_int {
    let options = XML_PARSE_NOENT | XML_PARSE_DTDLOAD | XML_PARSE_DTDATTR | XML_PARSE_NONET;
    if dtd_validation {
        options | XML_PARSE_DTDVALID
    } else {
        options
    }
}

// Opaque libxml2 structures
#[repr(C)]
pub struct XmlSchema {
    _private: [u8; 0],
}

#[repr(C)]
pub struct XmlSchemaParserCtxt {
    _private: [u8; 0],
}

#[repr(C)]
pub struct XmlTextReader {
    _private: [u8; 0],
}

#[repr(C)]
pub struct xmlError {
    pub domain: c_int,
    pub code: c_int,
    pub message: *const c_char,
    pub level: c_int,
    pub file: *const c_char,
    pub line: c_int,
    pub str1: *const c_char,
    pub str2: *const c_char,
    pub str3: *const c_char,
    pub int1: c_int,
    /// Column, when known
    pub int2: c_int,
    pub ctxt: *mut c_void,
    pub node: *mut c_void,
}

pub type XmlStructuredErrorFunc =
    Option<unsafe extern "C" fn(user_data: *mut c_void, error: *const xmlError)>;

/// Returns an `xmlParserInputPtr`, or null when the entity cannot be loaded.
pub type XmlExternalEntityLoader = Option<
    unsafe extern "C" fn(url: *const c_char, id: *const c_char, ctxt: *mut c_void) -> *mut c_void,
>;

// External libxml2 FFI declarations
#[cfg_attr(target_os = "windows", link(name = "libxml2"))]
#[cfg_attr(not(target_os = "windows"), link(name = "xml2"))]
unsafe extern "C" {
    pub fn xmlInitParser();

    pub fn xmlSetExternalEntityLoader(loader: XmlExternalEntityLoader);
    pub fn xmlGetExternalEntityLoader() -> XmlExternalEntityLoader;

    // Schema parsing functions
    pub fn xmlSchemaNewParserCtxt(url: *const c_char) -> *mut XmlSchemaParserCtxt;
    pub fn xmlSchemaNewMemParserCtxt(
        buffer: *const c_char,
        size: c_int,
    ) -> *mut XmlSchemaParserCtxt;
    pub fn xmlSchemaSetParserStructuredErrors(
        ctxt: *mut XmlSchemaParserCtxt,
        serror: XmlStructuredErrorFunc,
        ctx: *mut c_void,
    );
    pub fn xmlSchemaParse(ctxt: *mut XmlSchemaParserCtxt) -> *mut XmlSchema;
    pub fn xmlSchemaFreeParserCtxt(ctxt: *mut XmlSchemaParserCtxt);
    pub fn xmlSchemaFree(schema: *mut XmlSchema);

    // Streaming reader
    pub fn xmlReaderForFile(
        filename: *const c_char,
        encoding: *const c_char,
        options: c_int,
    ) -> *mut XmlTextReader;
    pub fn xmlFreeTextReader(reader: *mut XmlTextReader);
    pub fn xmlTextReaderSetStructuredErrorHandler(
        reader: *mut XmlTextReader,
        f: XmlStructuredErrorFunc,
        arg: *mut c_void,
    );
    pub fn xmlTextReaderSetSchema(reader: *mut XmlTextReader, schema: *mut XmlSchema) -> c_int;
    pub fn xmlTextReaderRead(reader: *mut XmlTextReader) -> c_int;
    pub fn xmlTextReaderNodeType(reader: *mut XmlTextReader) -> c_int;
    pub fn xmlTextReaderIsEmptyElement(reader: *mut XmlTextReader) -> c_int;
    pub fn xmlTextReaderConstLocalName(reader: *mut XmlTextReader) -> *const c_char;
    pub fn xmlTextReaderConstName(reader: *mut XmlTextReader) -> *const c_char;
    pub fn xmlTextReaderConstNamespaceUri(reader: *mut XmlTextReader) -> *const c_char;
    pub fn xmlTextReaderConstValue(reader: *mut XmlTextReader) -> *const c_char;
    pub fn xmlTextReaderMoveToNextAttribute(reader: *mut XmlTextReader) -> c_int;
    pub fn xmlTextReaderMoveToElement(reader: *mut XmlTextReader) -> c_int;
}

/// Initialize libxml2 and install the session-dispatching entity loader.
///
/// Safe to call any number of times from any thread.
pub fn initialize() {
    LIBXML2_INIT.call_once(|| unsafe {
        xmlInitParser();
        let _ = DEFAULT_ENTITY_LOADER.set(xmlGetExternalEntityLoader());
        xmlSetExternalEntityLoader(Some(load_external_entity));
    });
}

/// Callbacks and failure state of one parse, shared with libxml2 callbacks.
///
/// libxml2 calls back through raw pointers, so everything in here uses
/// interior mutability. The first infrastructure failure wins; once one is
/// recorded, further entity loads are refused and the parse is stopped.
pub struct ParseSession<'a> {
    errors: RefCell<&'a mut dyn ErrorHandler>,
    resolver: RefCell<&'a mut dyn ResolveEntity>,
    failure: RefCell<Option<ValidationError>>,
    first_fatal: RefCell<Option<ParseReport>>,
}

impl<'a> ParseSession<'a> {
    pub fn new(errors: &'a mut dyn ErrorHandler, resolver: &'a mut dyn ResolveEntity) -> Self {
        Self {
            errors: RefCell::new(errors),
            resolver: RefCell::new(resolver),
            failure: RefCell::new(None),
            first_fatal: RefCell::new(None),
        }
    }

    pub fn has_failed(&self) -> bool {
        self.failure.borrow().is_some()
    }

    pub fn fatal_seen(&self) -> bool {
        self.first_fatal.borrow().is_some()
    }

    /// The recorded infrastructure failure, if any.
    pub fn into_failure(self) -> Option<ValidationError> {
        self.failure.into_inner()
    }

    /// The infrastructure failure and the first fatal report, if any.
    pub fn finish(self) -> (Option<ValidationError>, Option<ParseReport>) {
        (self.failure.into_inner(), self.first_fatal.into_inner())
    }

    fn fail(&self, error: ValidationError) {
        let mut failure = self.failure.borrow_mut();
        if failure.is_none() {
            debug!(error = %error, "parse session failed");
            *failure = Some(error);
        }
    }

    fn report(&self, level: c_int, report: ParseReport) {
        let Ok(mut handler) = self.errors.try_borrow_mut() else {
            return;
        };
        let outcome = match level {
            XML_ERR_FATAL => {
                let mut first_fatal = self.first_fatal.borrow_mut();
                if first_fatal.is_none() {
                    *first_fatal = Some(report.clone());
                }
                drop(first_fatal);
                handler.fatal_error(report)
            }
            level if level <= XML_ERR_WARNING => handler.warning(report),
            _ => handler.error(report),
        };
        drop(handler);
        if let Err(error) = outcome {
            self.fail(error);
        }
    }

    /// Location libxml2 should load for an entity, or `None` to refuse it.
    fn resolve(&self, public_id: Option<&str>, system_id: &str) -> Option<String> {
        if self.has_failed() {
            return None;
        }
        let resolution = {
            let Ok(mut resolver) = self.resolver.try_borrow_mut() else {
                return Some(system_id.to_string());
            };
            resolver.resolve_entity(public_id, system_id)
        };
        match resolution {
            Ok(resolution) => Some(resolution.location()),
            Err(error) => {
                self.fail(error);
                None
            }
        }
    }

    fn as_user_data(&self) -> *mut c_void {
        self as *const ParseSession<'_> as *mut c_void
    }
}

/// Binds a session to the current thread, restoring the previous binding on drop.
struct ActiveSessionGuard {
    previous: *const c_void,
}

impl ActiveSessionGuard {
    fn bind(session: &ParseSession<'_>) -> Self {
        let current = session as *const ParseSession<'_> as *const c_void;
        let previous = ACTIVE_SESSION.with(|active| active.replace(current));
        Self { previous }
    }
}

impl Drop for ActiveSessionGuard {
    fn drop(&mut self) {
        ACTIVE_SESSION.with(|active| active.set(self.previous));
    }
}

unsafe fn c_str_to_string(ptr: *const c_char) -> Option<String> {
    if ptr.is_null() {
        None
    } else {
        Some(unsafe { CStr::from_ptr(ptr) }.to_string_lossy().into_owned())
    }
}

/// Callback for libxml2 to report parse and validity errors (structured)
unsafe extern "C" fn relay_structured_error(user_data: *mut c_void, error: *const xmlError) {
    if user_data.is_null() || error.is_null() {
        return;
    }
    let session = unsafe { &*(user_data as *const ParseSession<'_>) };
    let error = unsafe { &*error };

    let message = unsafe { c_str_to_string(error.message) }.unwrap_or_default();
    let report = ParseReport::new(
        message.trim_end(),
        unsafe { c_str_to_string(error.file) },
        u32::try_from(error.line).unwrap_or(0),
        u32::try_from(error.int2).unwrap_or(0),
    );
    trace!(level = error.level, line = report.line, message = %report.message, "libxml2 report");
    session.report(error.level, report);
}

/// Process-wide entity loader: resolve through the session bound to this
/// thread, then let libxml2's own loader open the result.
unsafe extern "C" fn load_external_entity(
    url: *const c_char,
    id: *const c_char,
    ctxt: *mut c_void,
) -> *mut c_void {
    let Some(default_loader) = DEFAULT_ENTITY_LOADER.get().copied().flatten() else {
        return ptr::null_mut();
    };

    let active = ACTIVE_SESSION.with(Cell::get);
    if active.is_null() || url.is_null() {
        return unsafe { default_loader(url, id, ctxt) };
    }
    let session = unsafe { &*(active as *const ParseSession<'_>) };

    let Some(system_id) = (unsafe { c_str_to_string(url) }) else {
        return ptr::null_mut();
    };
    let public_id = unsafe { c_str_to_string(id) };

    let Some(location) = session.resolve(public_id.as_deref(), &system_id) else {
        return ptr::null_mut();
    };
    match CString::new(location) {
        Ok(location) => unsafe { default_loader(location.as_ptr(), id, ctxt) },
        Err(_) => {
            session.fail(
                LibXml2Error::InvalidPath {
                    path: system_id.clone(),
                }
                .into(),
            );
            ptr::null_mut()
        }
    }
}

/// Thread-safe wrapper for a compiled libxml2 schema
///
/// Compiled schemas are read-only and may be shared for validation across
/// threads; the schema is freed when the last clone is dropped.
#[derive(Debug, Clone)]
pub struct XmlSchemaPtr {
    inner: Arc<XmlSchemaInner>,
}

#[derive(Debug)]
struct XmlSchemaInner {
    ptr: *mut XmlSchema,
    _phantom: PhantomData<XmlSchema>,
}

// Safety: xmlSchema structures are thread-safe for reading once parsed
unsafe impl Send for XmlSchemaInner {}
unsafe impl Sync for XmlSchemaInner {}

impl XmlSchemaPtr {
    /// # Safety
    ///
    /// `ptr` must be null or a schema returned by `xmlSchemaParse` that
    /// nothing else frees.
    unsafe fn from_raw(ptr: *mut XmlSchema) -> Option<Self> {
        (!ptr.is_null()).then(|| XmlSchemaPtr {
            inner: Arc::new(XmlSchemaInner {
                ptr,
                _phantom: PhantomData,
            }),
        })
    }

    fn as_ptr(&self) -> *mut XmlSchema {
        self.inner.ptr
    }
}

impl Drop for XmlSchemaInner {
    fn drop(&mut self) {
        if !self.ptr.is_null() {
            unsafe {
                xmlSchemaFree(self.ptr);
            }
            self.ptr = ptr::null_mut();
        }
    }
}

/// Compile a schema, reporting its problems through the session.
///
/// `Ok(None)` means the schema did not compile; the reasons were reported as
/// diagnostics. Imports and includes are loaded through the session's
/// resolver.
pub fn compile_schema(
    source: &SchemaSource,
    session: &ParseSession<'_>,
) -> LibXml2Result<Option<XmlSchemaPtr>> {
    initialize();
    let _lock = SCHEMA_PARSE_LOCK.lock().unwrap_or_else(|e| e.into_inner());
    let _active = ActiveSessionGuard::bind(session);

    let ctxt = match source {
        SchemaSource::Location(location) => {
            let c_location = CString::new(location.as_str()).map_err(|_| {
                LibXml2Error::InvalidPath {
                    path: location.clone(),
                }
            })?;
            unsafe { xmlSchemaNewParserCtxt(c_location.as_ptr()) }
        }
        SchemaSource::Inline(text) => unsafe {
            xmlSchemaNewMemParserCtxt(text.as_ptr() as *const c_char, text.len() as c_int)
        },
    };
    if ctxt.is_null() {
        return Err(LibXml2Error::SchemaContextFailed {
            location: source.to_string(),
        });
    }

    debug!(schema = %source, "compiling schema");
    unsafe {
        xmlSchemaSetParserStructuredErrors(
            ctxt,
            Some(relay_structured_error),
            session.as_user_data(),
        );
        let schema = xmlSchemaParse(ctxt);
        xmlSchemaFreeParserCtxt(ctxt);
        Ok(XmlSchemaPtr::from_raw(schema))
    }
}

/// Owned `xmlTextReader`, freed on drop.
struct TextReader {
    ptr: *mut XmlTextReader,
}

impl Drop for TextReader {
    fn drop(&mut self) {
        unsafe { xmlFreeTextReader(self.ptr) }
    }
}

impl TextReader {
    fn open(path: &Path, options: c_int) -> LibXml2Result<Self> {
        let path_str = path.to_str().ok_or_else(|| LibXml2Error::InvalidPath {
            path: path.to_string_lossy().into_owned(),
        })?;
        let c_path = CString::new(path_str).map_err(|_| LibXml2Error::InvalidPath {
            path: path_str.to_string(),
        })?;

        let ptr = unsafe { xmlReaderForFile(c_path.as_ptr(), ptr::null(), options) };
        if ptr.is_null() {
            return Err(LibXml2Error::ReaderCreationFailed {
                path: path.to_path_buf(),
            });
        }
        Ok(Self { ptr })
    }

    fn text(&self, f: unsafe extern "C" fn(*mut XmlTextReader) -> *const c_char) -> String {
        unsafe { c_str_to_string(f(self.ptr)) }.unwrap_or_default()
    }

    fn name(&self) -> QualifiedName {
        QualifiedName {
            namespace_uri: self.text(xmlTextReaderConstNamespaceUri),
            local_name: self.text(xmlTextReaderConstLocalName),
            qualified_name: self.text(xmlTextReaderConstName),
        }
    }

    fn attributes(&self) -> Vec<Attribute> {
        let mut attributes = Vec::new();
        while unsafe { xmlTextReaderMoveToNextAttribute(self.ptr) } == 1 {
            let name = self.name();
            if name.namespace_uri == XMLNS_NAMESPACE {
                continue;
            }
            attributes.push(Attribute {
                name,
                value: self.text(xmlTextReaderConstValue),
            });
        }
        unsafe { xmlTextReaderMoveToElement(self.ptr) };
        attributes
    }

    fn dispatch(&self, content: &mut dyn ContentHandler) {
        match unsafe { xmlTextReaderNodeType(self.ptr) } {
            XML_READER_TYPE_ELEMENT => {
                let name = self.name();
                let empty = unsafe { xmlTextReaderIsEmptyElement(self.ptr) } == 1;
                let attributes = self.attributes();
                content.start_element(&name, &attributes);
                if empty {
                    content.end_element(&name);
                }
            }
            XML_READER_TYPE_END_ELEMENT => content.end_element(&self.name()),
            XML_READER_TYPE_TEXT
            | XML_READER_TYPE_CDATA
            | XML_READER_TYPE_SIGNIFICANT_WHITESPACE => {
                content.characters(&self.text(xmlTextReaderConstValue))
            }
            XML_READER_TYPE_WHITESPACE => {
                content.ignorable_whitespace(&self.text(xmlTextReaderConstValue))
            }
            XML_READER_TYPE_PROCESSING_INSTRUCTION => content.processing_instruction(
                &self.text(xmlTextReaderConstName),
                &self.text(xmlTextReaderConstValue),
            ),
            _ => {}
        }
    }
}

/// Stream `path` through libxml2, validating with `options` and `schema`.
///
/// Problems go to the session's error handler and entity loads to its
/// resolver; content events go to `content`. Parsing stops at the first
/// fatal error or at the first infrastructure failure recorded in the
/// session. `Err` is returned only when libxml2 could not be set up.
pub fn parse_document(
    path: &Path,
    options: c_int,
    schema: Option<&XmlSchemaPtr>,
    session: &ParseSession<'_>,
    content: &mut dyn ContentHandler,
) -> LibXml2Result<()> {
    initialize();
    let _active = ActiveSessionGuard::bind(session);

    let reader = TextReader::open(path, options)?;
    unsafe {
        // the handler has to be in place before the schema is attached
        xmlTextReaderSetStructuredErrorHandler(
            reader.ptr,
            Some(relay_structured_error),
            session.as_user_data(),
        );
    }
    if let Some(schema) = schema
        && unsafe { xmlTextReaderSetSchema(reader.ptr, schema.as_ptr()) } != 0
    {
        return Err(LibXml2Error::SchemaContextFailed {
            location: path.to_string_lossy().into_owned(),
        });
    }

    content.start_document();
    loop {
        if session.has_failed() || session.fatal_seen() {
            break;
        }
        match unsafe { xmlTextReaderRead(reader.ptr) } {
            1 => reader.dispatch(content),
            0 => {
                content.end_document();
                break;
            }
            _ => break,
        }
    }
    Ok(())
}
