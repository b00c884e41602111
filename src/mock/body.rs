use crate::{
    common::data::{RemoteResponse, RequestInfo},
    mock::item::{Bypass, MockItem},
};
use bytes::Bytes;
use futures_util::{
    future::{BoxFuture, Shared},
    FutureExt,
};
use serde_json::Value;
use std::{fmt, future::Future, sync::Arc};

pub type BodyError = Box<dyn std::error::Error + Send + Sync>;
pub type BodyResult = Result<MockPayload, BodyError>;

pub type BodyFn = dyn Fn(&RequestInfo, &MockItem) -> BodyResult + Send + Sync;
pub type RemoteBodyFn = dyn Fn(&RemoteResponse, &RequestInfo, &MockItem) -> BodyResult + Send + Sync;
pub type AsyncBodyFn = dyn Fn(BodyContext) -> BoxFuture<'static, BodyResult> + Send + Sync;

/// The value a mock body resolves to.
#[derive(Debug, Clone, PartialEq)]
pub enum MockPayload {
    Json(Value),
    Text(String),
    Binary(Bytes),
    /// Do not mock this call, send it to the real transport instead.
    Bypass(Bypass),
}

impl MockPayload {
    pub fn is_bypass(&self) -> bool {
        matches!(self, MockPayload::Bypass(_))
    }

    /// Encodes the payload for the wire. JSON strings are sent verbatim, all other JSON values
    /// are serialized and reported with the `application/json` content type.
    pub(crate) fn encode(&self) -> (Bytes, Option<&'static str>) {
        match self {
            MockPayload::Json(Value::String(text)) => (Bytes::from(text.clone()), None),
            MockPayload::Json(Value::Null) => (Bytes::new(), None),
            MockPayload::Json(value) => (
                Bytes::from(value.to_string()),
                Some("application/json"),
            ),
            MockPayload::Text(text) => (Bytes::from(text.clone()), None),
            MockPayload::Binary(bytes) => (bytes.clone(), None),
            MockPayload::Bypass(_) => (Bytes::new(), None),
        }
    }
}

impl Default for MockPayload {
    fn default() -> Self {
        MockPayload::Text(String::new())
    }
}

impl From<Value> for MockPayload {
    fn from(value: Value) -> Self {
        MockPayload::Json(value)
    }
}

impl From<&str> for MockPayload {
    fn from(value: &str) -> Self {
        MockPayload::Text(value.to_string())
    }
}

impl From<String> for MockPayload {
    fn from(value: String) -> Self {
        MockPayload::Text(value)
    }
}

impl From<Bytes> for MockPayload {
    fn from(value: Bytes) -> Self {
        MockPayload::Binary(value)
    }
}

impl From<Vec<u8>> for MockPayload {
    fn from(value: Vec<u8>) -> Self {
        MockPayload::Binary(Bytes::from(value))
    }
}

impl From<Bypass> for MockPayload {
    fn from(value: Bypass) -> Self {
        MockPayload::Bypass(value)
    }
}

/// Owned input of an asynchronous body generator.
#[derive(Clone)]
pub struct BodyContext {
    pub request: RequestInfo,
    pub remote: Option<RemoteResponse>,
    pub item: Arc<MockItem>,
}

/// The source of a mock response body.
///
/// A `Deferred` body is awaited first; whatever it resolves to is then treated like any
/// other body, so a deferred value may itself be a generator function.
#[derive(Clone)]
pub enum MockBody {
    Literal(MockPayload),
    Sync(Arc<BodyFn>),
    SyncWithRemote(Arc<RemoteBodyFn>),
    Async(Arc<AsyncBodyFn>),
    Deferred(Shared<BoxFuture<'static, MockBody>>),
}

impl MockBody {
    pub fn literal(value: impl Into<MockPayload>) -> Self {
        MockBody::Literal(value.into())
    }

    /// A generator called with the request and the matched rule.
    pub fn func<F>(f: F) -> Self
    where
        F: Fn(&RequestInfo, &MockItem) -> BodyResult + Send + Sync + 'static,
    {
        MockBody::Sync(Arc::new(f))
    }

    /// A generator for rules with a remote directive, called with the captured remote response.
    pub fn with_remote<F>(f: F) -> Self
    where
        F: Fn(&RemoteResponse, &RequestInfo, &MockItem) -> BodyResult + Send + Sync + 'static,
    {
        MockBody::SyncWithRemote(Arc::new(f))
    }

    pub fn future_fn<F, Fut>(f: F) -> Self
    where
        F: Fn(BodyContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = BodyResult> + Send + 'static,
    {
        MockBody::Async(Arc::new(move |ctx| f(ctx).boxed()))
    }

    pub fn deferred<Fut>(fut: Fut) -> Self
    where
        Fut: Future<Output = MockBody> + Send + 'static,
    {
        MockBody::Deferred(fut.boxed().shared())
    }

    pub fn is_literal(&self) -> bool {
        matches!(self, MockBody::Literal(_))
    }
}

impl Default for MockBody {
    fn default() -> Self {
        MockBody::Literal(MockPayload::default())
    }
}

impl fmt::Debug for MockBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MockBody::Literal(payload) => f.debug_tuple("Literal").field(payload).finish(),
            MockBody::Sync(_) => f.write_str("Sync(<fn>)"),
            MockBody::SyncWithRemote(_) => f.write_str("SyncWithRemote(<fn>)"),
            MockBody::Async(_) => f.write_str("Async(<fn>)"),
            MockBody::Deferred(_) => f.write_str("Deferred(<future>)"),
        }
    }
}

macro_rules! literal_body_from {
    ($($ty:ty),*) => {
        $(
            impl From<$ty> for MockBody {
                fn from(value: $ty) -> Self {
                    MockBody::Literal(value.into())
                }
            }
        )*
    };
}

literal_body_from!(MockPayload, Value, &str, String, Bytes, Vec<u8>, Bypass);
