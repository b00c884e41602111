use crate::{
    common::{data::header_map_to_vec, http::HttpClient, util::value_to_text},
    interceptor::{
        base::{to_header_map, BaseInterceptor},
        Error,
    },
    mock::mocker::Mocker,
};
use bytes::Bytes;
use serde_json::Value;
use std::{sync::Arc, time::Duration};
use tokio::{runtime::Handle, task::JoinHandle};

type SuccessCallback = Box<dyn FnOnce(WxResponse) + Send>;
type FailCallback = Box<dyn FnOnce(WxError) + Send>;
type CompleteCallback = Box<dyn FnOnce(Result<WxResponse, WxError>) + Send>;

/// The answer handed to the `success` callback.
#[derive(Debug, Clone, PartialEq)]
pub struct WxResponse {
    /// The body parsed as JSON if `data_type` is `json` and the body is valid JSON, else text.
    pub data: Value,
    pub status_code: u16,
    pub header: Vec<(String, String)>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct WxError {
    pub err_msg: String,
}

/// The options of a [WxRequestInterceptor::request] call.
pub struct WxRequestOptions {
    pub url: String,
    pub method: Option<String>,
    pub data: Option<Value>,
    pub header: Vec<(String, String)>,
    pub timeout: Option<Duration>,
    pub data_type: String,
    success: Option<SuccessCallback>,
    fail: Option<FailCallback>,
    complete: Option<CompleteCallback>,
}

impl WxRequestOptions {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            method: None,
            data: None,
            header: Vec::new(),
            timeout: None,
            data_type: "json".to_string(),
            success: None,
            fail: None,
            complete: None,
        }
    }

    pub fn method(mut self, method: impl Into<String>) -> Self {
        self.method = Some(method.into());
        self
    }

    pub fn data(mut self, data: impl Into<Value>) -> Self {
        self.data = Some(data.into());
        self
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.header.push((name.into(), value.into()));
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn data_type(mut self, data_type: impl Into<String>) -> Self {
        self.data_type = data_type.into();
        self
    }

    pub fn success<F>(mut self, f: F) -> Self
    where
        F: FnOnce(WxResponse) + Send + 'static,
    {
        self.success = Some(Box::new(f));
        self
    }

    pub fn fail<F>(mut self, f: F) -> Self
    where
        F: FnOnce(WxError) + Send + 'static,
    {
        self.fail = Some(Box::new(f));
        self
    }

    pub fn complete<F>(mut self, f: F) -> Self
    where
        F: FnOnce(Result<WxResponse, WxError>) + Send + 'static,
    {
        self.complete = Some(Box::new(f));
        self
    }
}

/// Handle of a running `wx.request` call.
pub struct WxRequestTask {
    task: JoinHandle<()>,
}

impl WxRequestTask {
    /// Mocked requests cannot be cancelled; this is a no-op.
    pub fn abort(&self) {}

    /// Header callbacks are never invoked; this is a no-op.
    pub fn on_headers_received<F>(&self, _f: F)
    where
        F: Fn(&[(String, String)]) + Send + 'static,
    {
    }

    /// Waits until all callbacks have been invoked.
    pub async fn wait(self) {
        if let Err(err) = self.task.await {
            tracing::warn!("wx.request task failed: {}", err);
        }
    }
}

/// A callback-style transport modelled after the mini-program `wx.request` API.
#[derive(Clone)]
pub struct WxRequestInterceptor {
    base: BaseInterceptor,
}

impl WxRequestInterceptor {
    pub fn new(mocker: Arc<Mocker>, client: Arc<dyn HttpClient + Send + Sync>) -> Self {
        Self {
            base: BaseInterceptor::new(mocker, client),
        }
    }

    /// Starts a request on the current Tokio runtime. The `success` or `fail` callback runs
    /// first, followed by `complete`.
    pub fn request(&self, mut options: WxRequestOptions) -> Result<WxRequestTask, Error> {
        let handle = Handle::try_current().map_err(|_| Error::NoRuntime)?;
        let base = self.base.clone();

        let success = options.success.take();
        let fail = options.fail.take();
        let complete = options.complete.take();

        let task = handle.spawn(async move {
            let result = execute(&base, options).await;

            match &result {
                Ok(res) => {
                    if let Some(success) = success {
                        success(res.clone());
                    }
                }
                Err(err) => {
                    if let Some(fail) = fail {
                        fail(err.clone());
                    }
                }
            }

            if let Some(complete) = complete {
                complete(result);
            }
        });

        Ok(WxRequestTask { task })
    }
}

async fn execute(base: &BaseInterceptor, options: WxRequestOptions) -> Result<WxResponse, WxError> {
    let method = options
        .method
        .as_deref()
        .unwrap_or("GET")
        .trim()
        .to_uppercase();

    let mut header = options.header.clone();
    let (url, body) = encode_data(&method, &options.url, options.data.as_ref(), &mut header);

    let headers = to_header_map(&header).map_err(to_wx_error)?;
    let request = base.dispatch(&method, &url, headers, body);

    let intercepted = match options.timeout {
        Some(timeout) => tokio::time::timeout(timeout, request)
            .await
            .unwrap_or(Err(Error::Timeout)),
        None => request.await,
    }
    .map_err(to_wx_error)?;

    let (parts, body) = intercepted.response.into_parts();
    let data = if options.data_type.eq_ignore_ascii_case("json") {
        serde_json::from_slice(&body)
            .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&body).to_string()))
    } else {
        Value::String(String::from_utf8_lossy(&body).to_string())
    };

    Ok(WxResponse {
        data,
        status_code: parts.status.as_u16(),
        header: header_map_to_vec(&parts.headers),
    })
}

/// GET requests carry object data in the query string, all other methods in the body.
fn encode_data(
    method: &str,
    url: &str,
    data: Option<&Value>,
    header: &mut Vec<(String, String)>,
) -> (String, Bytes) {
    let data = match data {
        Some(Value::Null) | None => return (url.to_string(), Bytes::new()),
        Some(data) => data,
    };

    if method == "GET" || method == "HEAD" {
        let pairs = match data {
            Value::Object(map) => map
                .iter()
                .map(|(k, v)| (k.clone(), value_to_text(v).unwrap_or_else(|| v.to_string())))
                .collect::<Vec<_>>(),
            _ => return (url.to_string(), Bytes::new()),
        };

        let query = form_urlencoded::Serializer::new(String::new())
            .extend_pairs(pairs)
            .finish();
        if query.is_empty() {
            return (url.to_string(), Bytes::new());
        }

        let separator = if url.contains('?') { '&' } else { '?' };
        return (format!("{}{}{}", url, separator, query), Bytes::new());
    }

    match data {
        Value::String(text) => (url.to_string(), Bytes::from(text.clone())),
        value => {
            let has_content_type = header
                .iter()
                .any(|(name, _)| name.eq_ignore_ascii_case("content-type"));
            if !has_content_type {
                header.push(("content-type".to_string(), "application/json".to_string()));
            }
            (url.to_string(), Bytes::from(value.to_string()))
        }
    }
}

fn to_wx_error(err: Error) -> WxError {
    WxError {
        err_msg: format!("request:fail {}", err),
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use serde_json::json;

    #[test]
    fn get_data_is_appended_to_query() {
        let mut header = Vec::new();
        let (url, body) = encode_data(
            "GET",
            "http://a.com/x?a=1",
            Some(&json!({"id": 7, "q": "a b"})),
            &mut header,
        );

        assert_eq!(url, "http://a.com/x?a=1&id=7&q=a+b");
        assert!(body.is_empty());
    }

    #[test]
    fn post_data_is_sent_as_json() {
        let mut header = Vec::new();
        let (url, body) = encode_data("POST", "/x", Some(&json!({"id": 7})), &mut header);

        assert_eq!(url, "/x");
        assert_eq!(body, Bytes::from_static(br#"{"id":7}"#));
        assert_eq!(
            header,
            vec![("content-type".to_string(), "application/json".to_string())]
        );

        let mut header = Vec::new();
        let (_, body) = encode_data("POST", "/x", Some(&json!("raw")), &mut header);
        assert_eq!(body, Bytes::from_static(b"raw"));
        assert!(header.is_empty());
    }
}
