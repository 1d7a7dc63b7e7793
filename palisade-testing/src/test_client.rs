// In-process test client

use bytes::Bytes;
use http::header::{CONTENT_TYPE, HOST, HeaderMap, HeaderName, HeaderValue};
use http::{Method, Request, Response};
use palisade_core::{Application, Error, Map, Registry, Result, RouteMatcher, buffer_streamed};
use std::sync::Arc;

const DEFAULT_HOST: &str = "localhost";

/// Drives a sealed registry through the same matcher the connector uses,
/// without opening a socket.
pub struct TestClient {
    registry: Arc<Registry>,
    matcher: RouteMatcher,
    host: String,
}

impl TestClient {
    /// Create a client over every binding of `registry`
    pub fn new(registry: Arc<Registry>) -> Result<Self> {
        let mut matcher = RouteMatcher::new();
        for binding in registry.bindings() {
            matcher.insert(
                &binding.name,
                binding.record.method.clone(),
                &binding.record.uri,
                &binding.hosts,
            )?;
        }
        Ok(Self {
            registry,
            matcher,
            host: DEFAULT_HOST.to_string(),
        })
    }

    /// Seal `app` and create a client over its registry
    pub fn from_app(app: &Application) -> Result<Self> {
        Self::new(app.setup())
    }

    /// Host header sent when a request has none
    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    /// Make a GET request
    pub async fn get(&self, path: &str) -> TestResponse {
        self.send(TestRequestBuilder::new(Method::GET, path)).await
    }

    /// Make a POST request
    pub async fn post(&self, path: &str, body: impl Into<Bytes>) -> TestResponse {
        self.send(TestRequestBuilder::new(Method::POST, path).body(body))
            .await
    }

    /// Make a PUT request
    pub async fn put(&self, path: &str, body: impl Into<Bytes>) -> TestResponse {
        self.send(TestRequestBuilder::new(Method::PUT, path).body(body))
            .await
    }

    /// Make a DELETE request
    pub async fn delete(&self, path: &str) -> TestResponse {
        self.send(TestRequestBuilder::new(Method::DELETE, path)).await
    }

    /// Send a built request
    pub async fn send(&self, builder: TestRequestBuilder) -> TestResponse {
        match builder.build(&self.host) {
            Ok(request) => self.request(request).await,
            Err(error) => TestResponse::Error(error),
        }
    }

    /// Match and serve a raw request on a blocking worker
    pub async fn request(&self, request: Request<Bytes>) -> TestResponse {
        let host = request
            .headers()
            .get(HOST)
            .and_then(|v| v.to_str().ok())
            .unwrap_or(self.host.as_str())
            .to_string();

        let (name, params) = self
            .matcher
            .at(&host, request.method(), request.uri().path())
            .map(|m| (m.name, m.params))
            .unwrap_or_else(|| (String::new(), Map::new()));

        let registry = self.registry.clone();
        // Streamed bodies are read whole so assertions see every byte.
        let served = tokio::task::spawn_blocking(move || {
            buffer_streamed(registry.serve(&name, params, request))
        })
        .await;

        match served {
            Ok(Ok(response)) => TestResponse::Success(response),
            Ok(Err(error)) => TestResponse::Error(Error::Io(error)),
            Err(error) if error.is_panic() => std::panic::resume_unwind(error.into_panic()),
            Err(error) => TestResponse::Error(Error::Internal(error.to_string())),
        }
    }
}

/// Builder for test requests
pub struct TestRequestBuilder {
    method: Method,
    path: String,
    headers: Vec<(String, String)>,
    body: Bytes,
    query: Vec<(String, String)>,
    error: Option<Error>,
}

impl TestRequestBuilder {
    /// Create a new request builder
    pub fn new(method: Method, path: &str) -> Self {
        Self {
            method,
            path: path.to_string(),
            headers: Vec::new(),
            body: Bytes::new(),
            query: Vec::new(),
            error: None,
        }
    }

    /// Add a header
    pub fn header(mut self, key: &str, value: &str) -> Self {
        self.headers.push((key.to_string(), value.to_string()));
        self
    }

    /// Set the body
    pub fn body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    /// Set JSON body
    pub fn json<T: serde::Serialize>(mut self, data: &T) -> Self {
        match serde_json::to_vec(data) {
            Ok(body) => {
                self.body = body.into();
                self.header(CONTENT_TYPE.as_str(), "application/json")
            }
            Err(e) => {
                self.error = Some(Error::Serialization(e.to_string()));
                self
            }
        }
    }

    /// Set a url-encoded form body
    pub fn form(mut self, fields: &[(&str, &str)]) -> Self {
        match serde_urlencoded::to_string(fields) {
            Ok(body) => {
                self.body = body.into();
                self.header(CONTENT_TYPE.as_str(), "application/x-www-form-urlencoded")
            }
            Err(e) => {
                self.error = Some(Error::Serialization(e.to_string()));
                self
            }
        }
    }

    /// Add a query parameter
    pub fn query(mut self, key: &str, value: &str) -> Self {
        self.query.push((key.to_string(), value.to_string()));
        self
    }

    /// Build the request; `host` is used when no Host header was given.
    pub fn build(self, host: &str) -> Result<Request<Bytes>> {
        if let Some(error) = self.error {
            return Err(error);
        }

        let mut uri = self.path;
        if !self.query.is_empty() {
            let query = serde_urlencoded::to_string(&self.query)
                .map_err(|e| Error::Serialization(e.to_string()))?;
            uri.push(if uri.contains('?') { '&' } else { '?' });
            uri.push_str(&query);
        }

        let mut headers = HeaderMap::new();
        for (key, value) in &self.headers {
            let name = HeaderName::try_from(key.as_str())
                .map_err(|e| Error::Internal(format!("header {key}: {e}")))?;
            let value = HeaderValue::try_from(value.as_str())
                .map_err(|e| Error::Internal(format!("header {key}: {e}")))?;
            headers.append(name, value);
        }
        if !headers.contains_key(HOST) {
            let value = HeaderValue::try_from(host)
                .map_err(|e| Error::Internal(format!("host {host}: {e}")))?;
            headers.insert(HOST, value);
        }

        let mut request = Request::builder()
            .method(self.method)
            .uri(uri)
            .body(self.body)
            .map_err(|e| Error::Internal(e.to_string()))?;
        *request.headers_mut() = headers;
        Ok(request)
    }
}

/// Response from a test request
#[derive(Debug)]
pub enum TestResponse {
    Success(Response<Bytes>),
    Error(Error),
}

impl TestResponse {
    /// Assert the response is successful
    pub fn assert_success(&self) -> &Response<Bytes> {
        match self {
            TestResponse::Success(response) => response,
            TestResponse::Error(error) => {
                panic!("Expected success response, got error: {:?}", error)
            }
        }
    }

    /// Assert the response is an error
    pub fn assert_error(&self) -> &Error {
        match self {
            TestResponse::Error(error) => error,
            TestResponse::Success(_) => {
                panic!("Expected error response, got success")
            }
        }
    }

    /// Get the status code
    pub fn status(&self) -> Option<u16> {
        match self {
            TestResponse::Success(response) => Some(response.status().as_u16()),
            TestResponse::Error(_) => None,
        }
    }

    /// Get the response body as string
    pub fn body_string(&self) -> Option<String> {
        match self {
            TestResponse::Success(response) => String::from_utf8(response.body().to_vec()).ok(),
            TestResponse::Error(_) => None,
        }
    }

    /// Get the response body as JSON
    pub fn body_json<T: serde::de::DeserializeOwned>(&self) -> std::result::Result<T, String> {
        match self {
            TestResponse::Success(response) => serde_json::from_slice(response.body())
                .map_err(|e| format!("Serialization error: {}", e)),
            TestResponse::Error(error) => Err(format!("{:?}", error)),
        }
    }

    /// Get a header value
    pub fn header(&self, key: &str) -> Option<&str> {
        match self {
            TestResponse::Success(response) => {
                response.headers().get(key).and_then(|v| v.to_str().ok())
            }
            TestResponse::Error(_) => None,
        }
    }

    /// Every `Set-Cookie` value
    pub fn cookies(&self) -> Vec<&str> {
        match self {
            TestResponse::Success(response) => response
                .headers()
                .get_all(http::header::SET_COOKIE)
                .iter()
                .filter_map(|v| v.to_str().ok())
                .collect(),
            TestResponse::Error(_) => Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_builder() {
        let req = TestRequestBuilder::new(Method::GET, "/test")
            .header("Authorization", "Bearer token")
            .query("foo", "bar baz")
            .build("example.com")
            .unwrap();

        assert_eq!(*req.method(), Method::GET);
        assert_eq!(req.uri().path(), "/test");
        assert_eq!(req.uri().query(), Some("foo=bar+baz"));
        assert_eq!(req.headers()["authorization"], "Bearer token");
        assert_eq!(req.headers()["host"], "example.com");
    }

    #[test]
    fn test_explicit_host_kept() {
        let req = TestRequestBuilder::new(Method::GET, "/")
            .header("Host", "shop.test")
            .build("example.com")
            .unwrap();
        assert_eq!(req.headers().get_all("host").iter().count(), 1);
        assert_eq!(req.headers()["host"], "shop.test");
    }

    #[test]
    fn test_form_body() {
        let req = TestRequestBuilder::new(Method::POST, "/login")
            .form(&[("user", "ann"), ("note", "a&b")])
            .build("localhost")
            .unwrap();
        assert_eq!(req.body().as_ref(), b"user=ann&note=a%26b");
        assert_eq!(
            req.headers()["content-type"],
            "application/x-www-form-urlencoded"
        );
    }

    #[test]
    fn test_invalid_header_is_error() {
        let result = TestRequestBuilder::new(Method::GET, "/")
            .header("bad header", "x")
            .build("localhost");
        assert!(result.is_err());
    }
}
