//! HTTP fetch capability used by every plugin source.
//!
//! Sources build [`HttpRequest`]s and interpret status codes themselves; a
//! [`Fetcher`] only performs the request. Tests swap in canned fetchers.

use crate::config::HTTP_TIMEOUT_SECS;
use crate::error::{PluginError, PluginResult};
use std::collections::HashMap;
use std::fmt;
use std::io::Read;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpRequest {
    pub url: String,
    pub headers: Vec<(String, String)>,
}

impl HttpRequest {
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            headers: Vec::new(),
        }
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn header_value(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Same request with `name` removed.
    pub fn without_header(&self, name: &str) -> Self {
        Self {
            url: self.url.clone(),
            headers: self
                .headers
                .iter()
                .filter(|(k, _)| !k.eq_ignore_ascii_case(name))
                .cloned()
                .collect(),
        }
    }
}

pub struct HttpResponse {
    pub status: u16,
    /// Header names are lowercase
    pub headers: HashMap<String, String>,
    pub body: Box<dyn Read + Send>,
    pub content_length: Option<u64>,
}

impl HttpResponse {
    /// A 200 response carrying `body`, mostly for tests and local sources.
    pub fn ok(body: impl Into<Vec<u8>>) -> Self {
        let body = body.into();
        Self {
            status: 200,
            headers: HashMap::new(),
            content_length: Some(body.len() as u64),
            body: Box::new(std::io::Cursor::new(body)),
        }
    }

    pub fn status(status: u16) -> Self {
        Self {
            status,
            headers: HashMap::new(),
            content_length: Some(0),
            body: Box::new(std::io::empty()),
        }
    }

    pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.insert(name.to_ascii_lowercase(), value.into());
        self
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(|v| v.as_str())
    }

    /// Read the whole body, as used for JSON API responses.
    pub fn text(mut self, url: &str) -> PluginResult<String> {
        let mut buf = String::new();
        self.body
            .read_to_string(&mut buf)
            .map_err(PluginError::from_read)?;
        if buf.is_empty() {
            return Err(PluginError::malformed(url, "empty response body"));
        }
        Ok(buf)
    }
}

impl fmt::Debug for HttpResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpResponse")
            .field("status", &self.status)
            .field("headers", &self.headers)
            .field("content_length", &self.content_length)
            .finish_non_exhaustive()
    }
}

/// Performs one HTTP GET.
///
/// Connection failures are errors; any received response, whatever its
/// status, is `Ok`.
pub trait Fetcher: Send + Sync {
    fn fetch(&self, request: &HttpRequest) -> PluginResult<HttpResponse>;
}

impl<F> Fetcher for F
where
    F: Fn(&HttpRequest) -> PluginResult<HttpResponse> + Send + Sync,
{
    fn fetch(&self, request: &HttpRequest) -> PluginResult<HttpResponse> {
        self(request)
    }
}

/// Blocking reqwest client.
pub struct ReqwestFetcher {
    client: reqwest::blocking::Client,
}

impl ReqwestFetcher {
    pub fn new() -> PluginResult<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(HTTP_TIMEOUT_SECS))
            .user_agent(concat!("horus-plugins/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| PluginError::Network {
                url: String::new(),
                message: format!("failed to create HTTP client: {}", e),
            })?;
        Ok(Self { client })
    }
}

impl Fetcher for ReqwestFetcher {
    fn fetch(&self, request: &HttpRequest) -> PluginResult<HttpResponse> {
        let mut builder = self.client.get(&request.url);
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }

        log::debug!("GET {}", request.url);
        let response = builder.send().map_err(|e| PluginError::Network {
            url: request.url.clone(),
            message: e.to_string(),
        })?;

        let status = response.status().as_u16();
        let headers = response
            .headers()
            .iter()
            .filter_map(|(k, v)| {
                v.to_str()
                    .ok()
                    .map(|v| (k.as_str().to_ascii_lowercase(), v.to_string()))
            })
            .collect();
        let content_length = response.content_length();
        log::debug!("GET {} -> {} ({:?} bytes)", request.url, status, content_length);

        Ok(HttpResponse {
            status,
            headers,
            body: Box::new(response),
            content_length,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_headers() {
        let req = HttpRequest::get("https://example.com")
            .header("Accept", "application/json")
            .header("Authorization", "token abc");
        assert_eq!(req.header_value("accept"), Some("application/json"));

        let anon = req.without_header("authorization");
        assert_eq!(anon.header_value("Authorization"), None);
        assert_eq!(anon.header_value("Accept"), Some("application/json"));
    }

    #[test]
    fn test_response_helpers() {
        let resp = HttpResponse::ok("hello").with_header("X-Ratelimit-Remaining", "0");
        assert!(resp.is_success());
        assert_eq!(resp.header("x-ratelimit-remaining"), Some("0"));
        assert_eq!(resp.content_length, Some(5));
        assert_eq!(resp.text("u").unwrap(), "hello");

        assert!(!HttpResponse::status(404).is_success());
    }

    #[test]
    fn test_closure_fetcher() {
        let fetcher = |req: &HttpRequest| -> PluginResult<HttpResponse> {
            Ok(HttpResponse::ok(req.url.clone()))
        };
        let resp = fetcher.fetch(&HttpRequest::get("abc")).unwrap();
        assert_eq!(resp.text("abc").unwrap(), "abc");
    }

    #[test]
    fn test_empty_body_is_malformed() {
        let err = HttpResponse::status(200).text("u").unwrap_err();
        assert!(matches!(err, PluginError::MalformedResponse { .. }));
    }
}
