use std::collections::HashMap;
use std::io::Write;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use mockall::mock;
use xml_validator::{FetchError, Fetcher, ProjectLocator, ResourceLocator};

/// What the mock fetcher does for a URL.
#[derive(Clone)]
enum MockResponse {
    Body(Vec<u8>),
    /// Writes part of the body, then fails.
    Interrupted(Vec<u8>),
    Status(u16),
}

/// In-memory fetcher that records every request it serves.
#[derive(Clone, Default)]
pub struct MockFetcher {
    responses: Arc<Mutex<HashMap<String, MockResponse>>>,
    request_log: Arc<Mutex<Vec<String>>>,
}

impl MockFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_response(&self, url: &str, body: &str) {
        self.responses
            .lock()
            .unwrap()
            .insert(url.to_string(), MockResponse::Body(body.as_bytes().to_vec()));
    }

    pub fn add_interrupted_response(&self, url: &str, partial: &str) {
        self.responses.lock().unwrap().insert(
            url.to_string(),
            MockResponse::Interrupted(partial.as_bytes().to_vec()),
        );
    }

    pub fn add_status_response(&self, url: &str, status: u16) {
        self.responses
            .lock()
            .unwrap()
            .insert(url.to_string(), MockResponse::Status(status));
    }

    pub fn get_request_log(&self) -> Vec<String> {
        self.request_log.lock().unwrap().clone()
    }

    pub fn request_count(&self, url: &str) -> usize {
        self.request_log
            .lock()
            .unwrap()
            .iter()
            .filter(|u| u.as_str() == url)
            .count()
    }

    pub fn clear_request_log(&self) {
        self.request_log.lock().unwrap().clear();
    }
}

impl Fetcher for MockFetcher {
    fn fetch(&self, url: &str, sink: &mut dyn Write) -> Result<u64, FetchError> {
        self.request_log.lock().unwrap().push(url.to_string());
        let response = self.responses.lock().unwrap().get(url).cloned();
        match response {
            Some(MockResponse::Body(body)) => {
                sink.write_all(&body).map_err(|source| FetchError::Interrupted {
                    url: url.to_string(),
                    source,
                })?;
                Ok(body.len() as u64)
            }
            Some(MockResponse::Interrupted(partial)) => {
                let _ = sink.write_all(&partial);
                Err(FetchError::Interrupted {
                    url: url.to_string(),
                    source: std::io::Error::new(std::io::ErrorKind::ConnectionReset, "reset"),
                })
            }
            Some(MockResponse::Status(status)) => Err(FetchError::HttpStatus {
                url: url.to_string(),
                status,
                message: "mock status".to_string(),
            }),
            None => Err(FetchError::HttpStatus {
                url: url.to_string(),
                status: 404,
                message: "Not Found".to_string(),
            }),
        }
    }
}

mock! {
    pub Resources {}

    impl ResourceLocator for Resources {
        fn lookup(&self, logical_path: &str) -> Option<String>;
    }
}

mock! {
    pub Projects {}

    impl ProjectLocator for Projects {
        fn project_root(&self, name: &str) -> xml_validator::Result<PathBuf>;
    }
}
