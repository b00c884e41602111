use crate::{
    common::{
        data::{header_map_to_vec, MockResponse, OriginalCall, RemoteResponse, RequestInfo},
        http::HttpClient,
        runtime,
        util::{parse_body, parse_query, split_scheme},
    },
    config::ProxyMode,
    interceptor::Error,
    mock::{body::MockPayload, item::MockItem, mocker::Mocker, remote::RemoteInfo},
};
use bytes::Bytes;
use http::{HeaderMap, HeaderName, HeaderValue, Request, Response, Uri};
use std::{
    str::FromStr,
    sync::Arc,
    time::{Duration, Instant},
};

/// Value of the `x-powered-by` header carried by every mocked response.
pub const X_POWERED_BY: &str = "http-request-mock";

/// Headers that describe a single connection or an encoding that no longer applies once the
/// remote body has been collected and post-processed.
const DROPPED_REMOTE_HEADERS: [&str; 10] = [
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
    "content-length",
    "content-encoding",
];

/// The outcome of the mock pipeline for a matched rule.
#[derive(Debug, Clone, PartialEq)]
pub enum Resolution {
    Mocked(MockResponse),
    /// The body asked for the real transport to be used.
    Bypassed,
}

/// A response produced by [BaseInterceptor::dispatch].
#[derive(Debug)]
pub struct InterceptedResponse {
    /// The final request URL, after base URL resolution and proxy rewriting.
    pub url: String,
    pub mocked: bool,
    pub response: Response<Bytes>,
}

/// Functionality shared by all transport interceptors: URL resolution, proxy rewriting,
/// rule lookup and the mock response pipeline.
#[derive(Clone)]
pub struct BaseInterceptor {
    mocker: Arc<Mocker>,
    client: Arc<dyn HttpClient + Send + Sync>,
}

impl BaseInterceptor {
    pub fn new(mocker: Arc<Mocker>, client: Arc<dyn HttpClient + Send + Sync>) -> Self {
        Self { mocker, client }
    }

    pub fn mocker(&self) -> &Arc<Mocker> {
        &self.mocker
    }

    pub fn client(&self) -> &Arc<dyn HttpClient + Send + Sync> {
        &self.client
    }

    /// Resolves a request URL against the configured base URL and applies proxy rewriting.
    /// URLs that cannot be resolved are used as they are.
    pub fn get_full_request_url(&self, url: &str, method: &str) -> String {
        let url = url.trim();

        let full_url = if split_scheme(url).is_some() {
            url.to_string()
        } else {
            self.mocker
                .config()
                .base_url
                .as_deref()
                .and_then(|base| url::Url::parse(base).ok())
                .and_then(|base| base.join(url).ok())
                .map(|joined| joined.to_string())
                .unwrap_or_else(|| url.to_string())
        };

        self.check_proxy_url(&full_url, method)
    }

    /// Rewrites a URL to the proxy server if a proxy mode is configured and a rule without
    /// `de_proxy` matches: `{scheme}://{rest}` becomes `{proxy}/{scheme}/{rest}`.
    pub fn check_proxy_url(&self, url: &str, method: &str) -> String {
        let origin = match self.mocker.config().proxy_origin() {
            Some(origin) => origin,
            None => return url.to_string(),
        };

        let on_proxy = match self.mocker.config().proxy_mode {
            ProxyMode::Matched => url.starts_with(&origin),
            // Same-origin requests are the normal case; only skip URLs already rewritten.
            _ => ["http", "https"]
                .iter()
                .any(|scheme| url.starts_with(&format!("{}/{}/", origin, scheme))),
        };
        if on_proxy {
            return url.to_string();
        }

        let (scheme, rest) = match split_scheme(url) {
            Some(parts) => parts,
            None => return url.to_string(),
        };

        match self.mocker.match_mock_item(url, method) {
            Some(item) if !item.de_proxy() => {
                let rewritten = format!("{}/{}/{}", origin, scheme.to_lowercase(), rest);
                tracing::debug!("Rewriting {} to proxy URL {}", url, rewritten);
                rewritten
            }
            _ => url.to_string(),
        }
    }

    /// Claims the rule that should answer a request locally, consuming one unit of its
    /// `times` budget.
    pub fn match_mock_request(&self, url: &str, method: &str) -> Option<Arc<MockItem>> {
        let config = self.mocker.config();

        match config.proxy_mode {
            ProxyMode::None => self.mocker.claim_mock_item(url, method, |_| true),
            ProxyMode::Matched => {
                // Rewritten requests are answered by the proxy server.
                if config
                    .proxy_origin()
                    .map_or(false, |origin| url.starts_with(&origin))
                {
                    return None;
                }
                self.mocker.claim_mock_item(url, method, |_| true)
            }
            ProxyMode::Middleware => {
                self.mocker
                    .claim_mock_item(url, method, |item| item.de_proxy())
            }
        }
    }

    /// Collects everything a body generator can know about a request.
    pub fn get_request_info(
        &self,
        url: &str,
        method: &str,
        headers: &HeaderMap,
        body: Bytes,
    ) -> RequestInfo {
        let content_type = headers
            .get(http::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok());

        let method = method.to_uppercase();
        let original_call = match (
            http::Method::from_bytes(method.as_bytes()),
            Uri::from_str(url),
        ) {
            (Ok(method), Ok(uri)) => Some(OriginalCall {
                client: self.client.clone(),
                method,
                uri,
                headers: headers.clone(),
                body: body.clone(),
            }),
            _ => None,
        };

        RequestInfo {
            url: url.to_string(),
            method,
            query: parse_query(url),
            headers: header_map_to_vec(headers),
            body: parse_body(&body, content_type),
            raw_body: body,
            original_call,
        }
    }

    /// Runs the response pipeline of a matched rule: delay, remote round trip, body
    /// generation and logging.
    pub async fn respond(
        &self,
        item: Arc<MockItem>,
        request: &RequestInfo,
    ) -> Result<Resolution, Error> {
        let started = Instant::now();

        if item.delay() > 0 {
            runtime::sleep(Duration::from_millis(item.delay())).await;
        }

        let remote = match item.get_remote_info(&request.url) {
            Some(info) => Some(self.fetch_remote(&item, &info, request).await),
            None => None,
        };

        let payload = match item.clone().send_body(request, remote.as_ref()).await {
            Ok(payload) => payload,
            Err(err) => {
                tracing::warn!(
                    "Mock body of {} failed, responding with an empty body: {}",
                    item.key().unwrap_or_default(),
                    err
                );
                MockPayload::default()
            }
        };

        if payload.is_bypass() {
            if remote.is_some() {
                return Err(Error::BypassRemote);
            }
            tracing::debug!("Bypassing mock for {} {}", request.method, request.url);
            return Ok(Resolution::Bypassed);
        }

        self.mocker
            .send_response_log(started.elapsed(), &payload, request, &item);

        Ok(Resolution::Mocked(build_mock_response(
            &item,
            request,
            &payload,
            remote.as_ref(),
        )))
    }

    /// The complete interception of one request: resolve, match, mock or pass through.
    pub async fn dispatch(
        &self,
        method: &str,
        url: &str,
        headers: HeaderMap,
        body: Bytes,
    ) -> Result<InterceptedResponse, Error> {
        let method = if method.trim().is_empty() {
            "GET".to_string()
        } else {
            method.trim().to_uppercase()
        };
        let url = self.get_full_request_url(url, &method);

        if let Some(item) = self.match_mock_request(&url, &method) {
            tracing::trace!("Request {} {} matched {:?}", method, url, item.key());

            let request = self.get_request_info(&url, &method, &headers, body.clone());
            if let Resolution::Mocked(res) = self.respond(item, &request).await? {
                return Ok(InterceptedResponse {
                    url,
                    mocked: true,
                    response: Response::try_from(res)?,
                });
            }
        }

        let response = self.send_real(&method, &url, headers, body).await?;
        Ok(InterceptedResponse {
            url,
            mocked: false,
            response,
        })
    }

    /// Sends a request to the real transport.
    pub async fn send_real(
        &self,
        method: &str,
        url: &str,
        headers: HeaderMap,
        body: Bytes,
    ) -> Result<Response<Bytes>, Error> {
        let mut builder = Request::builder().method(method).uri(url);
        if let Some(target) = builder.headers_mut() {
            target.extend(headers);
        }
        let req = builder
            .body(body)
            .map_err(|err| Error::InvalidRequest(err.to_string()))?;

        Ok(self.client.send(req).await?)
    }

    async fn fetch_remote(
        &self,
        item: &MockItem,
        info: &RemoteInfo,
        request: &RequestInfo,
    ) -> RemoteResponse {
        let method = info
            .method
            .clone()
            .unwrap_or_else(|| request.method.clone());

        let url = if info.url.starts_with("//") {
            let scheme = split_scheme(&request.url).map_or("http", |(scheme, _)| scheme);
            format!("{}:{}", scheme, info.url)
        } else {
            info.url.clone()
        };

        let mut headers: Vec<(String, String)> = request
            .headers
            .iter()
            .filter(|(name, _)| {
                !name.eq_ignore_ascii_case("host") && !name.eq_ignore_ascii_case("content-length")
            })
            .cloned()
            .collect();
        for (name, value) in item.remote_request_headers() {
            set_header(&mut headers, name, value);
        }

        let headers = match to_header_map(&headers) {
            Ok(headers) => headers,
            Err(err) => return RemoteResponse::from_error(err),
        };

        let body = if method == "GET" || method == "HEAD" {
            Bytes::new()
        } else {
            request.raw_body.clone()
        };

        tracing::debug!("Requesting remote {} {}", method, url);
        match self.send_real(&method, &url, headers, body).await {
            Ok(res) => RemoteResponse::from(res),
            Err(err) => RemoteResponse::from_error(err),
        }
    }
}

fn build_mock_response(
    item: &MockItem,
    request: &RequestInfo,
    payload: &MockPayload,
    remote: Option<&RemoteResponse>,
) -> MockResponse {
    let (status, mut headers) = match remote {
        Some(remote) if !remote.is_error() => {
            let headers = remote
                .headers
                .iter()
                .filter(|(name, _)| {
                    !DROPPED_REMOTE_HEADERS
                        .iter()
                        .any(|dropped| name.eq_ignore_ascii_case(dropped))
                })
                .cloned()
                .collect();
            (remote.status, headers)
        }
        _ => (item.status(), Vec::new()),
    };

    for (name, value) in item.headers() {
        set_header(&mut headers, name, value);
    }

    let (body, content_type) = payload.encode();
    if let Some(content_type) = content_type {
        let has_content_type = headers
            .iter()
            .any(|(name, _)| name.eq_ignore_ascii_case("content-type"));
        if !has_content_type {
            headers.push(("content-type".to_string(), content_type.to_string()));
        }
    }
    set_header(&mut headers, "x-powered-by", X_POWERED_BY);

    let body = if request.method == "HEAD" {
        Bytes::new()
    } else {
        body
    };

    MockResponse {
        status,
        headers,
        body,
    }
}

fn set_header(headers: &mut Vec<(String, String)>, name: &str, value: &str) {
    headers.retain(|(existing, _)| !existing.eq_ignore_ascii_case(name));
    headers.push((name.to_string(), value.to_string()));
}

pub(crate) fn to_header_map(headers: &[(String, String)]) -> Result<HeaderMap, Error> {
    let mut map = HeaderMap::with_capacity(headers.len());
    for (name, value) in headers {
        let name = HeaderName::from_str(name)
            .map_err(|err| Error::InvalidHeader(format!("{}: {}", name, err)))?;
        let value = HeaderValue::from_str(value)
            .map_err(|err| Error::InvalidHeader(format!("{}: {}", name, err)))?;
        map.append(name, value);
    }
    Ok(map)
}
