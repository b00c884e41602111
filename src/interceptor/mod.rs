pub mod base;
pub mod fetch;
pub mod wx;
pub mod xhr;

use crate::common::http::Error as HttpClientError;
use thiserror::Error;

pub use base::{BaseInterceptor, InterceptedResponse, Resolution, X_POWERED_BY};
pub use fetch::{AbortController, AbortSignal, FetchInterceptor, FetchOptions, FetchResponse};
pub use wx::{WxError, WxRequestInterceptor, WxRequestOptions, WxRequestTask, WxResponse};
pub use xhr::{ReadyState, XhrEvent, XhrEventKind, XmlHttpRequest, XmlHttpRequestInterceptor};

#[derive(Error, Debug)]
pub enum Error {
    #[error("failed to send HTTP request: {0}")]
    HttpClientError(#[from] HttpClientError),
    #[error("a rule with a remote directive cannot bypass the mock")]
    BypassRemote,
    #[error("invalid header: {0}")]
    InvalidHeader(String),
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    #[error("the request was aborted")]
    Aborted,
    #[error("the request timed out")]
    Timeout,
    #[error("cannot create response: {0}")]
    ResponseConstructionError(#[from] http::Error),
    #[error("no Tokio runtime available")]
    NoRuntime,
    #[error("the request has not been opened")]
    NotOpened,
}
