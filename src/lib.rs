//! `http-request-mock` intercepts outgoing HTTP requests and answers them with mock responses.
//! It contains three major components:
//!
//! * a **mock registry** ([Mocker]) holding mock rules and deciding which rule governs a
//!   request,
//! * **interceptors** sitting in front of a real [HttpClient]: a fetch-like API, an
//!   XMLHttpRequest-like request object and a callback based `wx.request` API, and
//! * an optional **companion proxy server** that answers requests rewritten to it by
//!   interceptors running in proxy mode.
//!
//! # Getting Started
//! ```rust,no_run
//! use http_request_mock::prelude::*;
//! use serde_json::json;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() {
//!     let mocker = Arc::new(Mocker::new(MockerConfig::from_env()));
//!     mocker
//!         .get("https://api.example.com/users", json!([{"id": 1}]))
//!         .unwrap();
//!
//!     let client = MockingHttpClient::new(mocker.clone(), Arc::new(HyperHttpClient::new()));
//!     let res = client
//!         .fetch("https://api.example.com/users", FetchOptions::new())
//!         .await
//!         .unwrap();
//!
//!     assert_eq!(res.status, 200);
//!     assert_eq!(res.header("x-powered-by"), Some("http-request-mock"));
//! }
//! ```
//!
//! # Matching
//! A rule matches a request if it is enabled, still has budget left (`times`) and its method is
//! `ANY` or equal to the request method. Text URLs are compared exactly first and by substring
//! second, so the most specific rule wins. Regular expression URLs match immediately.
//!
//! # Bodies
//! A rule body is either a literal ([MockPayload]) or a generator function receiving the
//! request, the rule and, for rules with a `remote` directive, the real remote response.
//! Generators may return [Bypass] to let the call reach the real transport.
mod common;
mod config;
mod interceptor;
mod mock;
pub mod server;

pub use common::{
    data::{Method, MockResponse, RemoteResponse, RequestInfo},
    http::{Error as HttpClientError, HttpClient, HyperHttpClient},
};
pub use config::{MockerConfig, ProxyMode};
pub use interceptor::{
    AbortController, AbortSignal, BaseInterceptor, Error, FetchInterceptor, FetchOptions,
    FetchResponse, InterceptedResponse, ReadyState, Resolution, WxError, WxRequestInterceptor,
    WxRequestOptions, WxRequestTask, WxResponse, XhrEvent, XhrEventKind, XmlHttpRequest,
    XmlHttpRequestInterceptor, X_POWERED_BY,
};
pub use mock::{
    item::Error as MockItemError,
    persistence::{read_mock_files, Error as PersistenceError},
    BodyContext, BodyError, BodyResult, Bypass, MockBody, MockItem, MockItemInfo, MockPayload,
    MockUrl, Mocker, ProxyCommand, RemoteInfo, PROXY_MESSAGE_PREFIX,
};

/// A [FetchInterceptor] used as a drop-in [HttpClient] decorator.
pub type MockingHttpClient = FetchInterceptor;

pub mod prelude {
    #[doc(no_inline)]
    pub use crate::{
        Bypass, FetchOptions, HttpClient, HyperHttpClient, MockBody, MockItemInfo, Mocker,
        MockerConfig, MockingHttpClient, ProxyMode, RequestInfo,
    };
}
