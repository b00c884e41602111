use async_trait::async_trait;
use bytes::Bytes;
use http::{Request, Response};
use http_request_mock::{HttpClient, HttpClientError, Mocker, MockerConfig};
use std::sync::{Arc, Mutex};

/// A recorded call to the real transport.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedCall {
    pub method: String,
    pub uri: String,
    pub headers: Vec<(String, String)>,
    pub body: Bytes,
}

/// Stands in for the network: answers every call with `real:{uri}` and records it.
#[derive(Default)]
pub struct StubClient {
    calls: Mutex<Vec<RecordedCall>>,
}

impl StubClient {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl HttpClient for StubClient {
    async fn send(&self, req: Request<Bytes>) -> Result<Response<Bytes>, HttpClientError> {
        let (parts, body) = req.into_parts();
        let uri = parts.uri.to_string();

        self.calls.lock().unwrap().push(RecordedCall {
            method: parts.method.to_string(),
            uri: uri.clone(),
            headers: parts
                .headers
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_str().unwrap().to_string()))
                .collect(),
            body,
        });

        Ok(Response::builder()
            .status(200)
            .header("x-real", "1")
            .header("content-type", "text/plain")
            .body(Bytes::from(format!("real:{}", uri)))
            .unwrap())
    }
}

pub fn init_logger() {
    let _ = env_logger::try_init();
}

pub fn mocker() -> Arc<Mocker> {
    init_logger();
    Arc::new(Mocker::new(MockerConfig::new()))
}
