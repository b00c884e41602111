use crate::{
    common::{data::header_map_to_vec, http::HttpClient},
    interceptor::{
        base::{to_header_map, BaseInterceptor},
        Error,
    },
    mock::mocker::Mocker,
};
use bytes::Bytes;
use serde_json::Value;
use std::{
    sync::{Arc, Mutex, MutexGuard},
    time::Duration,
};
use tokio::{runtime::Handle, task::JoinHandle};

/// Creates [XmlHttpRequest] objects that share one [Mocker] and one inner client.
#[derive(Clone)]
pub struct XmlHttpRequestInterceptor {
    base: BaseInterceptor,
}

impl XmlHttpRequestInterceptor {
    pub fn new(mocker: Arc<Mocker>, client: Arc<dyn HttpClient + Send + Sync>) -> Self {
        Self {
            base: BaseInterceptor::new(mocker, client),
        }
    }

    pub fn create(&self) -> XmlHttpRequest {
        XmlHttpRequest::new(self.base.clone())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ReadyState {
    Unsent = 0,
    Opened = 1,
    HeadersReceived = 2,
    Loading = 3,
    Done = 4,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum XhrEventKind {
    ReadyStateChange,
    Load,
    LoadEnd,
    Timeout,
    Abort,
    Error,
}

/// A synthetic event passed to the listeners of an [XmlHttpRequest].
#[derive(Debug, Clone, PartialEq)]
pub struct XhrEvent {
    pub kind: XhrEventKind,
    pub ready_state: ReadyState,
    pub status: u16,
}

type Listener = Arc<dyn Fn(&XhrEvent) + Send + Sync>;

#[derive(Debug, Clone)]
struct XhrResponse {
    url: String,
    status: u16,
    status_text: String,
    headers: Vec<(String, String)>,
    body: Bytes,
}

struct XhrState {
    method: String,
    url: String,
    headers: Vec<(String, String)>,
    timeout: Option<Duration>,
    ready_state: ReadyState,
    response: Option<XhrResponse>,
    error: Option<String>,
    // Incremented by `open` and `abort`; a finishing request only publishes its result if the
    // generation it started with is still current.
    generation: u64,
}

/// An XMLHttpRequest-like request object. The request runs on a spawned task; getters can be
/// polled at any time and report empty values until the response is ready.
pub struct XmlHttpRequest {
    base: BaseInterceptor,
    state: Arc<Mutex<XhrState>>,
    listeners: Arc<Mutex<Vec<(XhrEventKind, Listener)>>>,
    task: Option<JoinHandle<()>>,
}

impl XmlHttpRequest {
    fn new(base: BaseInterceptor) -> Self {
        Self {
            base,
            state: Arc::new(Mutex::new(XhrState {
                method: "GET".to_string(),
                url: String::new(),
                headers: Vec::new(),
                timeout: None,
                ready_state: ReadyState::Unsent,
                response: None,
                error: None,
                generation: 0,
            })),
            listeners: Arc::new(Mutex::new(Vec::new())),
            task: None,
        }
    }

    fn state(&self) -> MutexGuard<'_, XhrState> {
        lock(&self.state)
    }

    pub fn open(&mut self, method: &str, url: &str) {
        let mut state = self.state();
        state.method = method.trim().to_uppercase();
        state.url = url.to_string();
        state.headers.clear();
        state.response = None;
        state.error = None;
        state.generation += 1;
        state.ready_state = ReadyState::Opened;
        drop(state);

        self.emit(XhrEventKind::ReadyStateChange);
    }

    pub fn set_request_header(&mut self, name: &str, value: &str) {
        self.state()
            .headers
            .push((name.to_string(), value.to_string()));
    }

    /// A zero duration disables the timeout.
    pub fn set_timeout(&mut self, timeout: Duration) {
        self.state().timeout = if timeout.is_zero() {
            None
        } else {
            Some(timeout)
        };
    }

    pub fn add_event_listener<F>(&mut self, kind: XhrEventKind, listener: F)
    where
        F: Fn(&XhrEvent) + Send + Sync + 'static,
    {
        lock(&self.listeners).push((kind, Arc::new(listener)));
    }

    /// Starts the request. Must be called from within a Tokio runtime.
    pub fn send(&mut self, body: impl Into<Bytes>) -> Result<(), Error> {
        let handle = Handle::try_current().map_err(|_| Error::NoRuntime)?;

        let (method, url, headers, timeout, generation) = {
            let state = self.state();
            if state.ready_state != ReadyState::Opened {
                return Err(Error::NotOpened);
            }
            (
                state.method.clone(),
                state.url.clone(),
                to_header_map(&state.headers)?,
                state.timeout,
                state.generation,
            )
        };

        let base = self.base.clone();
        let state = self.state.clone();
        let listeners = self.listeners.clone();
        let body = body.into();

        self.task = Some(handle.spawn(async move {
            let request = base.dispatch(&method, &url, headers, body);
            let result = match timeout {
                Some(timeout) => tokio::time::timeout(timeout, request)
                    .await
                    .unwrap_or(Err(Error::Timeout)),
                None => request.await,
            };

            let events = {
                let mut state = lock(&state);
                if state.generation != generation {
                    tracing::trace!("Discarding result of an aborted request to {}", url);
                    return;
                }

                state.ready_state = ReadyState::Done;
                match result {
                    Ok(intercepted) => {
                        let (parts, body) = intercepted.response.into_parts();
                        state.response = Some(XhrResponse {
                            url: intercepted.url,
                            status: parts.status.as_u16(),
                            status_text: parts
                                .status
                                .canonical_reason()
                                .unwrap_or_default()
                                .to_string(),
                            headers: header_map_to_vec(&parts.headers),
                            body,
                        });
                        vec![
                            XhrEventKind::ReadyStateChange,
                            XhrEventKind::Load,
                            XhrEventKind::LoadEnd,
                        ]
                    }
                    Err(Error::Timeout) => {
                        state.error = Some(Error::Timeout.to_string());
                        vec![
                            XhrEventKind::ReadyStateChange,
                            XhrEventKind::Timeout,
                            XhrEventKind::LoadEnd,
                        ]
                    }
                    Err(err) => {
                        tracing::debug!("Request to {} failed: {}", url, err);
                        state.error = Some(err.to_string());
                        vec![
                            XhrEventKind::ReadyStateChange,
                            XhrEventKind::Error,
                            XhrEventKind::LoadEnd,
                        ]
                    }
                }
            };

            for kind in events {
                dispatch_event(&state, &listeners, kind);
            }
        }));

        Ok(())
    }

    /// Cancels the request. A result that arrives later is discarded.
    pub fn abort(&mut self) {
        let was_pending = {
            let mut state = self.state();
            let pending = state.ready_state != ReadyState::Unsent
                && state.ready_state != ReadyState::Done;
            state.generation += 1;
            state.response = None;
            state.ready_state = ReadyState::Unsent;
            pending
        };

        if let Some(task) = self.task.take() {
            task.abort();
        }

        if was_pending {
            self.emit(XhrEventKind::Abort);
            self.emit(XhrEventKind::LoadEnd);
        }
    }

    /// Waits until the running request has finished.
    pub async fn wait(&mut self) {
        if let Some(task) = self.task.take() {
            if let Err(err) = task.await {
                if !err.is_cancelled() {
                    tracing::warn!("XHR task failed: {}", err);
                }
            }
        }
    }

    pub fn ready_state(&self) -> ReadyState {
        self.state().ready_state
    }

    pub fn status(&self) -> u16 {
        self.state().response.as_ref().map_or(0, |r| r.status)
    }

    pub fn status_text(&self) -> String {
        self.state()
            .response
            .as_ref()
            .map(|r| r.status_text.clone())
            .unwrap_or_default()
    }

    pub fn response(&self) -> Option<Bytes> {
        self.state().response.as_ref().map(|r| r.body.clone())
    }

    pub fn response_text(&self) -> String {
        self.state()
            .response
            .as_ref()
            .map(|r| String::from_utf8_lossy(&r.body).to_string())
            .unwrap_or_default()
    }

    pub fn response_json(&self) -> Option<Value> {
        self.state()
            .response
            .as_ref()
            .and_then(|r| serde_json::from_slice(&r.body).ok())
    }

    pub fn response_url(&self) -> String {
        self.state()
            .response
            .as_ref()
            .map(|r| r.url.clone())
            .unwrap_or_default()
    }

    pub fn get_response_header(&self, name: &str) -> Option<String> {
        self.state().response.as_ref().and_then(|r| {
            r.headers
                .iter()
                .find(|(key, _)| key.eq_ignore_ascii_case(name))
                .map(|(_, value)| value.clone())
        })
    }

    /// All response headers as `name: value` lines separated by CRLF.
    pub fn get_all_response_headers(&self) -> String {
        self.state()
            .response
            .as_ref()
            .map(|r| {
                r.headers
                    .iter()
                    .map(|(name, value)| format!("{}: {}\r\n", name, value))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// The message of the last network or mock failure, if any.
    pub fn error(&self) -> Option<String> {
        self.state().error.clone()
    }

    fn emit(&self, kind: XhrEventKind) {
        dispatch_event(&self.state, &self.listeners, kind);
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

fn dispatch_event(
    state: &Mutex<XhrState>,
    listeners: &Mutex<Vec<(XhrEventKind, Listener)>>,
    kind: XhrEventKind,
) {
    let event = {
        let state = lock(state);
        XhrEvent {
            kind,
            ready_state: state.ready_state,
            status: state.response.as_ref().map_or(0, |r| r.status),
        }
    };

    // Listeners are cloned out so they may call back into the request.
    let matching: Vec<Listener> = lock(listeners)
        .iter()
        .filter(|(k, _)| *k == kind)
        .map(|(_, l)| l.clone())
        .collect();

    for listener in matching {
        listener(&event);
    }
}
