use crate::{
    common::{
        data::header_map_to_vec,
        http::{Error as HttpClientError, HttpClient},
    },
    interceptor::{
        base::{to_header_map, BaseInterceptor, InterceptedResponse},
        Error,
    },
    mock::mocker::Mocker,
};
use async_trait::async_trait;
use bytes::Bytes;
use http::{Request, Response};
use serde::de::DeserializeOwned;
use std::{
    collections::BTreeMap,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
};
use tokio::sync::Notify;

struct AbortState {
    aborted: AtomicBool,
    notify: Notify,
}

/// Signals cancellation to every request it was handed to.
#[derive(Clone)]
pub struct AbortSignal {
    state: Arc<AbortState>,
}

impl AbortSignal {
    pub fn is_aborted(&self) -> bool {
        self.state.aborted.load(Ordering::SeqCst)
    }

    /// Resolves as soon as the signal is aborted.
    pub async fn aborted(&self) {
        let notified = self.state.notify.notified();
        tokio::pin!(notified);
        notified.as_mut().enable();

        if self.is_aborted() {
            return;
        }
        notified.await;
    }
}

/// Owns an [AbortSignal] and triggers it.
pub struct AbortController {
    signal: AbortSignal,
}

impl AbortController {
    pub fn new() -> Self {
        Self {
            signal: AbortSignal {
                state: Arc::new(AbortState {
                    aborted: AtomicBool::new(false),
                    notify: Notify::new(),
                }),
            },
        }
    }

    pub fn signal(&self) -> AbortSignal {
        self.signal.clone()
    }

    pub fn abort(&self) {
        self.signal.state.aborted.store(true, Ordering::SeqCst);
        self.signal.state.notify.notify_waiters();
    }
}

impl Default for AbortController {
    fn default() -> Self {
        Self::new()
    }
}

/// The options of a [FetchInterceptor::fetch] call.
#[derive(Clone, Default)]
pub struct FetchOptions {
    pub method: Option<String>,
    pub headers: Vec<(String, String)>,
    pub body: Option<Bytes>,
    pub signal: Option<AbortSignal>,
}

impl FetchOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn method(mut self, method: impl Into<String>) -> Self {
        self.method = Some(method.into());
        self
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = Some(body.into());
        self
    }

    /// Sends a JSON body and sets the content type accordingly.
    pub fn json(self, value: &serde_json::Value) -> Self {
        self.header("content-type", "application/json")
            .body(value.to_string())
    }

    pub fn signal(mut self, signal: AbortSignal) -> Self {
        self.signal = Some(signal);
        self
    }
}

/// A fully buffered response of a [FetchInterceptor::fetch] call.
#[derive(Debug, Clone)]
pub struct FetchResponse {
    pub status: u16,
    pub status_text: String,
    pub headers: Vec<(String, String)>,
    pub url: String,
    /// `true` if the response was synthesized from a mock rule.
    pub mocked: bool,
    body: Bytes,
}

impl FetchResponse {
    fn from_intercepted(intercepted: InterceptedResponse) -> Self {
        let (parts, body) = intercepted.response.into_parts();
        Self {
            status: parts.status.as_u16(),
            status_text: parts
                .status
                .canonical_reason()
                .unwrap_or_default()
                .to_string(),
            headers: header_map_to_vec(&parts.headers),
            url: intercepted.url,
            mocked: intercepted.mocked,
            body,
        }
    }

    /// `true` for status codes in the range 200-299.
    pub fn ok(&self) -> bool {
        (200..300).contains(&self.status)
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

    pub fn json<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_slice(&self.body)
    }

    pub fn bytes(&self) -> Bytes {
        self.body.clone()
    }

    pub fn array_buffer(&self) -> Vec<u8> {
        self.body.to_vec()
    }

    /// The body together with its content type.
    pub fn blob(&self) -> (Option<String>, Bytes) {
        (
            self.header("content-type").map(str::to_string),
            self.body.clone(),
        )
    }

    /// Parses a form-urlencoded body.
    pub fn form_data(&self) -> BTreeMap<String, String> {
        form_urlencoded::parse(&self.body)
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect()
    }
}

/// A fetch-like transport that answers matching requests from the mock rules of a [Mocker]
/// and passes everything else to its inner [HttpClient].
///
/// It implements [HttpClient] itself, so it can be dropped in wherever a client is expected.
#[derive(Clone)]
pub struct FetchInterceptor {
    base: BaseInterceptor,
}

impl FetchInterceptor {
    pub fn new(mocker: Arc<Mocker>, client: Arc<dyn HttpClient + Send + Sync>) -> Self {
        Self {
            base: BaseInterceptor::new(mocker, client),
        }
    }

    pub fn mocker(&self) -> &Arc<Mocker> {
        self.base.mocker()
    }

    pub async fn fetch(&self, url: &str, options: FetchOptions) -> Result<FetchResponse, Error> {
        let signal = options.signal.clone();

        match signal {
            Some(signal) => {
                if signal.is_aborted() {
                    return Err(Error::Aborted);
                }
                tokio::select! {
                    res = self.execute(url, options) => res,
                    _ = signal.aborted() => Err(Error::Aborted),
                }
            }
            None => self.execute(url, options).await,
        }
    }

    async fn execute(&self, url: &str, options: FetchOptions) -> Result<FetchResponse, Error> {
        let method = options.method.as_deref().unwrap_or("GET");
        let headers = to_header_map(&options.headers)?;
        let body = options.body.unwrap_or_default();

        let intercepted = self.base.dispatch(method, url, headers, body).await?;
        Ok(FetchResponse::from_intercepted(intercepted))
    }
}

#[async_trait]
impl HttpClient for FetchInterceptor {
    async fn send(&self, req: Request<Bytes>) -> Result<Response<Bytes>, HttpClientError> {
        let (parts, body) = req.into_parts();
        let url = parts.uri.to_string();

        match self
            .base
            .dispatch(parts.method.as_str(), &url, parts.headers, body)
            .await
        {
            Ok(intercepted) => Ok(intercepted.response),
            Err(Error::HttpClientError(err)) => Err(err),
            Err(err) => Err(HttpClientError::MockError(err.to_string())),
        }
    }
}
