use crate::common::http::HttpClient;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::{collections::BTreeMap, fmt, str::FromStr, sync::Arc};

/// The HTTP methods a mock rule can be registered for. `ANY` matches every request method.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Method {
    GET,
    POST,
    PUT,
    PATCH,
    DELETE,
    HEAD,
    #[default]
    ANY,
}

impl Method {
    /// Returns `true` if a request sent with `request_method` is covered by this method.
    pub fn matches(&self, request_method: &str) -> bool {
        match self {
            Method::ANY => true,
            method => method.to_string().eq_ignore_ascii_case(request_method),
        }
    }
}

impl FromStr for Method {
    type Err = String;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        match input.trim().to_uppercase().as_str() {
            "GET" => Ok(Method::GET),
            "POST" => Ok(Method::POST),
            "PUT" => Ok(Method::PUT),
            "PATCH" => Ok(Method::PATCH),
            "DELETE" => Ok(Method::DELETE),
            "HEAD" => Ok(Method::HEAD),
            "ANY" => Ok(Method::ANY),
            _ => Err(format!("Invalid HTTP method {}", input)),
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Everything a mock body generator gets to know about the intercepted request.
#[derive(Clone)]
pub struct RequestInfo {
    pub url: String,
    pub method: String,
    pub query: BTreeMap<String, String>,
    pub headers: Vec<(String, String)>,
    /// The request body parsed as JSON or as a form-urlencoded object, if possible.
    pub body: Option<Value>,
    pub raw_body: Bytes,
    pub(crate) original_call: Option<OriginalCall>,
}

impl RequestInfo {
    /// Returns the first header value with the given name (case-insensitive).
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    /// Performs the real, unmocked request on demand. Useful for body generators that only
    /// want to override parts of the real response.
    pub async fn do_original_call(&self) -> RemoteResponse {
        match &self.original_call {
            Some(call) => call.execute().await,
            None => RemoteResponse::from_error("no original call available for this request"),
        }
    }
}

impl fmt::Debug for RequestInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestInfo")
            .field("url", &self.url)
            .field("method", &self.method)
            .field("query", &self.query)
            .field("headers", &self.headers)
            .field("body", &self.body)
            .field("raw_body", &String::from_utf8_lossy(&self.raw_body))
            .finish()
    }
}

/// A lazily executed real request, detached from the mock pipeline.
#[derive(Clone)]
pub(crate) struct OriginalCall {
    pub client: Arc<dyn HttpClient + Send + Sync>,
    pub method: http::Method,
    pub uri: http::Uri,
    pub headers: http::HeaderMap,
    pub body: Bytes,
}

impl OriginalCall {
    pub fn to_request(&self) -> Result<http::Request<Bytes>, http::Error> {
        let mut builder = http::Request::builder()
            .method(self.method.clone())
            .uri(self.uri.clone());

        if let Some(headers) = builder.headers_mut() {
            headers.extend(self.headers.clone());
        }

        builder.body(self.body.clone())
    }

    pub async fn execute(&self) -> RemoteResponse {
        let req = match self.to_request() {
            Ok(req) => req,
            Err(err) => return RemoteResponse::from_error(err),
        };

        match self.client.send(req).await {
            Ok(res) => RemoteResponse::from(res),
            Err(err) => RemoteResponse::from_error(err),
        }
    }
}

/// The captured answer of a real network call. Network-level failures are reported in
/// `error` instead of being raised, so body generators can tell them apart from mocks.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct RemoteResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Bytes,
    pub error: Option<String>,
}

impl RemoteResponse {
    pub fn from_error<E: fmt::Display>(err: E) -> Self {
        Self {
            error: Some(err.to_string()),
            ..Self::default()
        }
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).to_string()
    }

    pub fn json(&self) -> Option<Value> {
        serde_json::from_slice(&self.body).ok()
    }

    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }
}

impl From<http::Response<Bytes>> for RemoteResponse {
    fn from(value: http::Response<Bytes>) -> Self {
        let (parts, body) = value.into_parts();
        Self {
            status: parts.status.as_u16(),
            headers: header_map_to_vec(&parts.headers),
            body,
            error: None,
        }
    }
}

/// A synthesized response, produced by the mock pipeline before it is turned into the
/// transport specific response type.
#[derive(Debug, Clone, PartialEq)]
pub struct MockResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Bytes,
}

impl MockResponse {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }
}

impl TryFrom<MockResponse> for http::Response<Bytes> {
    type Error = http::Error;

    fn try_from(value: MockResponse) -> Result<Self, Self::Error> {
        let mut builder = http::Response::builder().status(value.status);
        for (name, value) in value.headers {
            builder = builder.header(name, value);
        }
        builder.body(value.body)
    }
}

pub(crate) fn header_map_to_vec(headers: &http::HeaderMap) -> Vec<(String, String)> {
    headers
        .iter()
        .map(|(name, value)| {
            (
                name.as_str().to_string(),
                String::from_utf8_lossy(value.as_bytes()).to_string(),
            )
        })
        .collect()
}
