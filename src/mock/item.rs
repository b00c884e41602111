use crate::{
    common::{
        data::{Method, RemoteResponse, RequestInfo},
        util::{is_truthy, value_to_text},
    },
    mock::{
        body::{BodyContext, BodyResult, MockBody, MockPayload},
        remote::{RemoteDirective, RemoteInfo},
    },
};
use http::{HeaderName, HeaderValue};
use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Deserializer};
use serde_json::{Map, Value};
use std::{
    fmt,
    str::FromStr,
    sync::{
        atomic::{AtomicI64, Ordering},
        Arc,
    },
};
use thiserror::Error;

lazy_static! {
    static ref DELAY_PATTERN: Regex = Regex::new(r"^\d{1,15}$").expect("valid delay pattern");
    static ref TIMES_PATTERN: Regex = Regex::new(r"^-?\d{1,5}$").expect("valid times pattern");
    static ref STATUS_PATTERN: Regex = Regex::new(r"^[1-5]\d\d$").expect("valid status pattern");
}

#[derive(Error, Debug)]
pub enum Error {
    #[error("{0}")]
    InvalidRemote(String),
}

/// Sentinel returned by body generators that want a call to reach the real transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Bypass;

/// The URL a rule applies to.
#[derive(Debug, Clone)]
pub enum MockUrl {
    Text(String),
    Pattern(Regex),
}

impl MockUrl {
    pub fn is_pattern(&self) -> bool {
        matches!(self, MockUrl::Pattern(_))
    }
}

impl fmt::Display for MockUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MockUrl::Text(text) => f.write_str(text),
            MockUrl::Pattern(regex) => write!(f, "/{}/", regex.as_str()),
        }
    }
}

impl From<&str> for MockUrl {
    fn from(value: &str) -> Self {
        MockUrl::Text(value.to_string())
    }
}

impl From<String> for MockUrl {
    fn from(value: String) -> Self {
        MockUrl::Text(value)
    }
}

impl From<Regex> for MockUrl {
    fn from(value: Regex) -> Self {
        MockUrl::Pattern(value)
    }
}

/// Loosely typed description of a mock rule, as written by hand or loaded from a mock file.
///
/// Numeric and boolean fields are kept as raw values and validated when the [MockItem] is
/// built; values that do not validate silently fall back to their defaults.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct MockItemInfo {
    #[serde(deserialize_with = "lenient_url")]
    pub url: Option<MockUrl>,
    #[serde(deserialize_with = "lenient_text")]
    pub method: Option<String>,
    pub status: Option<Value>,
    pub headers: Option<Value>,
    /// Legacy spelling of `headers`.
    pub header: Option<Value>,
    pub remote_request_headers: Option<Value>,
    pub delay: Option<Value>,
    pub times: Option<Value>,
    pub disable: Option<Value>,
    #[serde(deserialize_with = "literal_body")]
    pub body: Option<MockBody>,
    /// Legacy spelling of `body`.
    #[serde(deserialize_with = "literal_body")]
    pub response: Option<MockBody>,
    #[serde(deserialize_with = "lenient_text")]
    pub remote: Option<String>,
    pub de_proxy: Option<Value>,
}

impl MockItemInfo {
    pub fn new(url: impl Into<MockUrl>) -> Self {
        Self {
            url: Some(url.into()),
            ..Self::default()
        }
    }

    pub fn method(mut self, method: impl Into<String>) -> Self {
        self.method = Some(method.into());
        self
    }

    pub fn status(mut self, status: u16) -> Self {
        self.status = Some(Value::from(status));
        self
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        insert_entry(&mut self.headers, name.into(), value.into());
        self
    }

    pub fn remote_request_header(
        mut self,
        name: impl Into<String>,
        value: impl Into<String>,
    ) -> Self {
        insert_entry(&mut self.remote_request_headers, name.into(), value.into());
        self
    }

    pub fn delay(mut self, millis: u64) -> Self {
        self.delay = Some(Value::from(millis));
        self
    }

    pub fn times(mut self, times: i64) -> Self {
        self.times = Some(Value::from(times));
        self
    }

    pub fn disable(mut self, disable: bool) -> Self {
        self.disable = Some(Value::from(disable));
        self
    }

    pub fn body(mut self, body: impl Into<MockBody>) -> Self {
        self.body = Some(body.into());
        self
    }

    pub fn response(mut self, body: impl Into<MockBody>) -> Self {
        self.response = Some(body.into());
        self
    }

    pub fn remote(mut self, directive: impl Into<String>) -> Self {
        self.remote = Some(directive.into());
        self
    }

    pub fn de_proxy(mut self, de_proxy: bool) -> Self {
        self.de_proxy = Some(Value::from(de_proxy));
        self
    }
}

/// A validated mock rule.
pub struct MockItem {
    url: Option<MockUrl>,
    method: Method,
    status: u16,
    headers: Vec<(String, String)>,
    remote_request_headers: Vec<(String, String)>,
    delay: u64,
    times: Option<AtomicI64>,
    disable: bool,
    body: MockBody,
    remote: Option<RemoteDirective>,
    de_proxy: bool,
    key: Option<String>,
}

impl MockItem {
    /// Builds a rule from its loose description. A missing or invalid URL does not fail:
    /// the resulting item simply has no key and will not be registered. Only a malformed
    /// remote directive is an error.
    pub fn new(info: MockItemInfo) -> Result<Self, Error> {
        let remote = match info.remote.as_deref() {
            Some(directive) => RemoteDirective::parse(directive).map_err(Error::InvalidRemote)?,
            None => None,
        };

        let url = info.url.filter(|url| match url {
            MockUrl::Text(text) => !text.trim().is_empty(),
            MockUrl::Pattern(_) => true,
        });

        let method = info
            .method
            .as_deref()
            .and_then(|m| m.parse::<Method>().ok())
            .unwrap_or(Method::ANY);

        let key = url.as_ref().map(|url| format!("{}-{}", url, method));

        Ok(Self {
            key,
            url,
            method,
            status: validated(&info.status, &STATUS_PATTERN)
                .and_then(|s| s.parse().ok())
                .unwrap_or(200),
            headers: string_pairs(info.headers.as_ref().or(info.header.as_ref())),
            remote_request_headers: string_pairs(info.remote_request_headers.as_ref()),
            delay: validated(&info.delay, &DELAY_PATTERN)
                .and_then(|d| d.parse().ok())
                .unwrap_or(0),
            times: validated(&info.times, &TIMES_PATTERN)
                .and_then(|t| t.parse().ok())
                .map(AtomicI64::new),
            disable: flag(&info.disable),
            body: Self::select_body(info.body, info.response),
            remote,
            de_proxy: flag(&info.de_proxy),
        })
    }

    /// Picks the payload source: `body` first, then `response`, else an empty string.
    fn select_body(body: Option<MockBody>, response: Option<MockBody>) -> MockBody {
        body.or(response).unwrap_or_default()
    }

    /// Replaces the payload source, using the same priority as the constructor.
    pub fn set_body(&mut self, body: Option<MockBody>, response: Option<MockBody>) {
        self.body = Self::select_body(body, response);
    }

    /// The sentinel a body generator returns to let a call reach the real transport.
    pub fn bypass(&self) -> Bypass {
        Bypass
    }

    pub fn key(&self) -> Option<&str> {
        self.key.as_deref()
    }

    pub fn url(&self) -> Option<&MockUrl> {
        self.url.as_ref()
    }

    pub fn method(&self) -> Method {
        self.method
    }

    pub fn status(&self) -> u16 {
        self.status
    }

    pub fn headers(&self) -> &[(String, String)] {
        &self.headers
    }

    pub fn remote_request_headers(&self) -> &[(String, String)] {
        &self.remote_request_headers
    }

    pub fn delay(&self) -> u64 {
        self.delay
    }

    /// Remaining number of matches, `None` if unlimited.
    pub fn times(&self) -> Option<i64> {
        self.times.as_ref().map(|t| t.load(Ordering::SeqCst))
    }

    pub fn is_disabled(&self) -> bool {
        self.disable
    }

    pub fn de_proxy(&self) -> bool {
        self.de_proxy
    }

    pub fn has_remote(&self) -> bool {
        self.remote.is_some()
    }

    pub fn body(&self) -> &MockBody {
        &self.body
    }

    pub(crate) fn has_budget(&self) -> bool {
        self.times().map_or(true, |t| t > 0)
    }

    pub(crate) fn consume(&self) {
        if let Some(times) = &self.times {
            times.fetch_sub(1, Ordering::SeqCst);
        }
    }

    /// Resolves the remote directive against the URL of the intercepted request.
    /// Returns `None` if this rule has no remote directive.
    pub fn get_remote_info(&self, request_url: &str) -> Option<RemoteInfo> {
        self.remote
            .as_ref()
            .map(|directive| directive.resolve(request_url))
    }

    /// Produces the payload for one request. A deferred body is awaited first; the value
    /// it yields is then either returned as is or, if it is a generator, invoked.
    pub async fn send_body(
        self: Arc<Self>,
        request: &RequestInfo,
        remote: Option<&RemoteResponse>,
    ) -> BodyResult {
        let mut body = self.body.clone();
        let body = loop {
            match body {
                MockBody::Deferred(future) => body = future.await,
                resolved => break resolved,
            }
        };

        let item: &MockItem = &self;
        match body {
            MockBody::Literal(payload) => Ok(payload),
            MockBody::Sync(f) => f(request, item),
            MockBody::SyncWithRemote(f) => match remote {
                Some(remote) => f(remote, request, item),
                None => f(
                    &RemoteResponse::from_error("no remote directive configured"),
                    request,
                    item,
                ),
            },
            MockBody::Async(f) => {
                let ctx = BodyContext {
                    request: request.clone(),
                    remote: remote.cloned(),
                    item: self.clone(),
                };
                f(ctx).await
            }
            MockBody::Deferred(_) => Ok(MockPayload::default()),
        }
    }
}

impl fmt::Debug for MockItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MockItem")
            .field("key", &self.key)
            .field("method", &self.method)
            .field("status", &self.status)
            .field("headers", &self.headers)
            .field("delay", &self.delay)
            .field("times", &self.times())
            .field("disable", &self.disable)
            .field("remote", &self.remote)
            .field("de_proxy", &self.de_proxy)
            .field("body", &self.body)
            .finish()
    }
}

fn validated(value: &Option<Value>, pattern: &Regex) -> Option<String> {
    value
        .as_ref()
        .and_then(value_to_text)
        .filter(|text| pattern.is_match(text))
}

fn flag(value: &Option<Value>) -> bool {
    match value {
        Some(Value::Bool(b)) => *b,
        Some(value) => value_to_text(value).map_or(false, |text| is_truthy(&text)),
        None => false,
    }
}

/// Collects header pairs, dropping entries that are not valid HTTP header names or values.
fn string_pairs(value: Option<&Value>) -> Vec<(String, String)> {
    let map = match value {
        Some(Value::Object(map)) => map,
        _ => return Vec::new(),
    };

    map.iter()
        .filter_map(|(k, v)| value_to_text(v).map(|v| (k.clone(), v)))
        .filter(|(name, value)| {
            let valid =
                HeaderName::from_str(name).is_ok() && HeaderValue::from_str(value).is_ok();
            if !valid {
                tracing::debug!("Ignoring invalid header {:?}: {:?}", name, value);
            }
            valid
        })
        .collect()
}

fn insert_entry(target: &mut Option<Value>, name: String, value: String) {
    if !matches!(target, Some(Value::Object(_))) {
        *target = Some(Value::Object(Map::new()));
    }
    if let Some(Value::Object(map)) = target {
        map.insert(name, Value::String(value));
    }
}

// ===============================================================================================
// Lenient deserializers: wrongly typed values become `None` instead of failing the whole rule.
// ===============================================================================================
fn lenient_url<'de, D>(deserializer: D) -> Result<Option<MockUrl>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    Ok(match value {
        Value::String(text) => Some(MockUrl::Text(text)),
        Value::Object(map) => map
            .get("regex")
            .and_then(Value::as_str)
            .and_then(|pattern| Regex::new(pattern).ok())
            .map(MockUrl::Pattern),
        _ => None,
    })
}

fn lenient_text<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    Ok(value_to_text(&value))
}

fn literal_body<'de, D>(deserializer: D) -> Result<Option<MockBody>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    Ok(Some(MockBody::Literal(MockPayload::Json(value))))
}

#[cfg(test)]
mod test {
    use super::*;
    use serde_json::json;

    fn request(url: &str) -> RequestInfo {
        RequestInfo {
            url: url.to_string(),
            method: "GET".to_string(),
            query: Default::default(),
            headers: vec![],
            body: None,
            raw_body: Default::default(),
            original_call: None,
        }
    }

    #[test]
    fn defaults_are_applied() {
        let item = MockItem::new(MockItemInfo::new("/api/users")).unwrap();

        assert_eq!(item.key(), Some("/api/users-ANY"));
        assert_eq!(item.method(), Method::ANY);
        assert_eq!(item.status(), 200);
        assert_eq!(item.delay(), 0);
        assert_eq!(item.times(), None);
        assert!(!item.is_disabled());
        assert!(!item.has_remote());
    }

    #[test]
    fn missing_or_invalid_url_produces_no_key() {
        let item = MockItem::new(MockItemInfo::default()).unwrap();
        assert_eq!(item.key(), None);

        let info: MockItemInfo = serde_json::from_value(json!({"url": 42})).unwrap();
        assert_eq!(MockItem::new(info).unwrap().key(), None);

        let info: MockItemInfo = serde_json::from_value(json!({"url": "  "})).unwrap();
        assert_eq!(MockItem::new(info).unwrap().key(), None);
    }

    #[test]
    fn invalid_headers_are_dropped() {
        // Arrange
        let info = MockItemInfo::new("/a")
            .header("bad name", "v")
            .header("x-ok", "1")
            .header("x-bad-value", "a\nb")
            .remote_request_header("bad name", "v")
            .remote_request_header("authorization", "token");

        // Act
        let item = MockItem::new(info).unwrap();

        // Assert
        assert_eq!(item.headers(), &[("x-ok".to_string(), "1".to_string())]);
        assert_eq!(
            item.remote_request_headers(),
            &[("authorization".to_string(), "token".to_string())]
        );
    }

    #[test]
    fn loose_values_are_validated() {
        let info: MockItemInfo = serde_json::from_value(json!({
            "url": "/a",
            "method": "post",
            "status": "404",
            "delay": "25",
            "times": 3,
            "disable": "yes",
            "header": {"x-a": "1", "x-num": 2}
        }))
        .unwrap();
        let item = MockItem::new(info).unwrap();

        assert_eq!(item.key(), Some("/a-POST"));
        assert_eq!(item.status(), 404);
        assert_eq!(item.delay(), 25);
        assert_eq!(item.times(), Some(3));
        assert!(item.is_disabled());
        assert_eq!(
            item.headers(),
            &[
                ("x-a".to_string(), "1".to_string()),
                ("x-num".to_string(), "2".to_string())
            ]
        );

        let info: MockItemInfo = serde_json::from_value(json!({
            "url": "/a",
            "method": "FETCH",
            "status": 700,
            "delay": -5,
            "times": "many"
        }))
        .unwrap();
        let item = MockItem::new(info).unwrap();

        assert_eq!(item.method(), Method::ANY);
        assert_eq!(item.status(), 200);
        assert_eq!(item.delay(), 0);
        assert_eq!(item.times(), None);
    }

    #[test]
    fn regex_url_key() {
        let info: MockItemInfo =
            serde_json::from_value(json!({"url": {"regex": "^/users/\\d+$"}, "method": "GET"}))
                .unwrap();
        let item = MockItem::new(info).unwrap();

        assert!(item.url().map_or(false, MockUrl::is_pattern));
        assert_eq!(item.key(), Some("/^/users/\\d+$/-GET"));
    }

    #[test]
    fn malformed_remote_is_an_error() {
        let result = MockItem::new(MockItemInfo::new("/a").remote("FETCH http://x.com"));
        assert!(matches!(result, Err(Error::InvalidRemote(_))));
    }

    #[test]
    fn body_takes_precedence_over_response() {
        let item =
            MockItem::new(MockItemInfo::new("/a").response("legacy").body("current")).unwrap();
        assert!(matches!(item.body(), MockBody::Literal(MockPayload::Text(t)) if t == "current"));

        let mut item = MockItem::new(MockItemInfo::new("/a")).unwrap();
        assert!(matches!(item.body(), MockBody::Literal(MockPayload::Text(t)) if t.is_empty()));

        item.set_body(None, Some(MockBody::from("legacy")));
        assert!(matches!(item.body(), MockBody::Literal(MockPayload::Text(t)) if t == "legacy"));
    }

    #[tokio::test]
    async fn literal_body_is_idempotent() {
        let item = Arc::new(MockItem::new(MockItemInfo::new("/a").body(json!({"id": 1}))).unwrap());
        let req = request("/a");

        let first = item.clone().send_body(&req, None).await.unwrap();
        let second = item.clone().send_body(&req, None).await.unwrap();

        assert_eq!(first, MockPayload::Json(json!({"id": 1})));
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn generator_bodies_are_invoked() {
        let item = Arc::new(
            MockItem::new(MockItemInfo::new("/a").body(MockBody::func(|req, item| {
                Ok(json!({"url": req.url, "status": item.status()}).into())
            })))
            .unwrap(),
        );

        let payload = item.send_body(&request("/a?x=1"), None).await.unwrap();
        assert_eq!(payload, MockPayload::Json(json!({"url": "/a?x=1", "status": 200})));
    }

    #[tokio::test]
    async fn deferred_body_resolving_to_generator() {
        let body = MockBody::deferred(async {
            MockBody::with_remote(|remote, _, _| Ok(format!("remote:{}", remote.text()).into()))
        });
        let item = Arc::new(
            MockItem::new(MockItemInfo::new("/a").remote("$url").body(body)).unwrap(),
        );
        let remote = RemoteResponse {
            status: 200,
            body: "hello".into(),
            ..RemoteResponse::default()
        };

        let payload = item
            .send_body(&request("/a"), Some(&remote))
            .await
            .unwrap();
        assert_eq!(payload, MockPayload::Text("remote:hello".to_string()));
    }

    #[tokio::test]
    async fn async_generator_can_bypass() {
        let item = Arc::new(
            MockItem::new(
                MockItemInfo::new("/a")
                    .body(MockBody::future_fn(|ctx| async move {
                        BodyResult::Ok(MockPayload::from(ctx.item.bypass()))
                    })),
            )
            .unwrap(),
        );

        let payload = item.send_body(&request("/a"), None).await.unwrap();
        assert!(payload.is_bypass());
    }

    #[test]
    fn remote_info_is_resolved_against_request_url() {
        let item =
            MockItem::new(MockItemInfo::new("/a").remote("GET https://x.com/$query.id")).unwrap();
        let info = item.get_remote_info("http://localhost/a?id=42").unwrap();

        assert_eq!(info.method.as_deref(), Some("GET"));
        assert_eq!(info.url, "https://x.com/42");

        let item = MockItem::new(MockItemInfo::new("/a")).unwrap();
        assert_eq!(item.get_remote_info("/a"), None);
    }
}
