use crate::{
    common::http::{Error as HttpClientError, HttpClient},
    interceptor::FetchInterceptor,
    mock::mocker::{Mocker, ProxyCommand, PROXY_MESSAGE_PREFIX},
    server::handler::Error::{ResponseConstructionError, UnknownCommand},
};
use async_trait::async_trait;
use bytes::Bytes;
use http::{HeaderValue, Method, Request, Response, StatusCode, Uri};
use std::sync::Arc;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("cannot create response: {0}")]
    ResponseConstructionError(#[from] http::Error),
    #[error("unknown control command: {0}")]
    UnknownCommand(String),
    #[error("invalid target URI: {0}")]
    InvalidTarget(String),
    #[error("failed to forward request: {0}")]
    HttpClientError(#[from] HttpClientError),
}

enum RoutePath {
    Message(String),
    Forward { scheme: String, rest: String },
    Unknown,
}

#[async_trait]
pub trait Handler {
    async fn handle(&self, req: Request<Bytes>) -> Result<Response<Bytes>, Error>;
}

/// Answers control messages and serves rewritten `/{scheme}/{host}/{path}` requests through a
/// [FetchInterceptor], so matching requests are mocked and all others reach the real target.
pub struct ProxyHandler {
    mocker: Arc<Mocker>,
    interceptor: FetchInterceptor,
}

impl ProxyHandler {
    pub fn new(mocker: Arc<Mocker>, client: Arc<dyn HttpClient + Send + Sync>) -> Self {
        Self {
            interceptor: FetchInterceptor::new(mocker.clone(), client),
            mocker,
        }
    }

    fn handle_message(&self, command: &str) -> Result<Response<Bytes>, Error> {
        let command =
            ProxyCommand::parse(command).ok_or_else(|| UnknownCommand(command.to_string()))?;
        self.mocker.apply(command);

        tracing::info!("Received control message '{}'", command.as_str());
        response(StatusCode::OK, Bytes::from_static(b"ok"))
    }

    async fn handle_forward(
        &self,
        req: Request<Bytes>,
        scheme: &str,
        rest: &str,
    ) -> Result<Response<Bytes>, Error> {
        let (mut parts, body) = req.into_parts();

        let mut target = format!("{}://{}", scheme, rest);
        if let Some(query) = parts.uri.query() {
            target.push('?');
            target.push_str(query);
        }

        parts.uri = target
            .parse::<Uri>()
            .map_err(|err| Error::InvalidTarget(format!("{}: {}", target, err)))?;
        parts.headers.remove(http::header::HOST);
        parts.headers.remove(http::header::ORIGIN);

        tracing::debug!("Forwarding {} {}", parts.method, target);
        let mut res = self
            .interceptor
            .send(Request::from_parts(parts, body))
            .await?;
        allow_any_origin(&mut res);

        Ok(res)
    }
}

#[async_trait]
impl Handler for ProxyHandler {
    async fn handle(&self, req: Request<Bytes>) -> Result<Response<Bytes>, Error> {
        tracing::trace!("Routing incoming request: {} {}", req.method(), req.uri());

        if req.method() == Method::OPTIONS {
            return preflight_response(&req);
        }

        match route(req.uri().path()) {
            RoutePath::Message(command) => match self.handle_message(&command) {
                Err(UnknownCommand(command)) => {
                    tracing::debug!("Ignoring unknown control message '{}'", command);
                    response(StatusCode::NOT_FOUND, Bytes::new())
                }
                result => result,
            },
            RoutePath::Forward { scheme, rest } => self.handle_forward(req, &scheme, &rest).await,
            RoutePath::Unknown => response(StatusCode::NOT_FOUND, Bytes::new()),
        }
    }
}

fn route(path: &str) -> RoutePath {
    let path = path.trim_start_matches('/');
    let (first, rest) = path.split_once('/').unwrap_or((path, ""));

    if first == PROXY_MESSAGE_PREFIX && !rest.is_empty() {
        return RoutePath::Message(rest.trim_end_matches('/').to_string());
    }

    if (first == "http" || first == "https") && !rest.is_empty() {
        return RoutePath::Forward {
            scheme: first.to_string(),
            rest: rest.to_string(),
        };
    }

    RoutePath::Unknown
}

fn response(status: StatusCode, body: Bytes) -> Result<Response<Bytes>, Error> {
    let mut res = Response::builder()
        .status(status)
        .body(body)
        .map_err(ResponseConstructionError)?;
    allow_any_origin(&mut res);
    Ok(res)
}

fn preflight_response(req: &Request<Bytes>) -> Result<Response<Bytes>, Error> {
    let requested_headers = req
        .headers()
        .get(http::header::ACCESS_CONTROL_REQUEST_HEADERS)
        .cloned()
        .unwrap_or_else(|| HeaderValue::from_static("*"));

    let mut res = response(StatusCode::NO_CONTENT, Bytes::new())?;
    let headers = res.headers_mut();
    headers.insert(
        http::header::ACCESS_CONTROL_ALLOW_METHODS,
        HeaderValue::from_static("GET, POST, PUT, PATCH, DELETE, HEAD, OPTIONS"),
    );
    headers.insert(http::header::ACCESS_CONTROL_ALLOW_HEADERS, requested_headers);
    Ok(res)
}

fn allow_any_origin(res: &mut Response<Bytes>) {
    res.headers_mut().insert(
        http::header::ACCESS_CONTROL_ALLOW_ORIGIN,
        HeaderValue::from_static("*"),
    );
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::{config::MockerConfig, mock::item::MockItemInfo};

    struct UnreachableClient;

    #[async_trait]
    impl HttpClient for UnreachableClient {
        async fn send(&self, _req: Request<Bytes>) -> Result<Response<Bytes>, HttpClientError> {
            Err(HttpClientError::Unknown)
        }
    }

    fn handler() -> ProxyHandler {
        ProxyHandler::new(
            Arc::new(Mocker::new(MockerConfig::new())),
            Arc::new(UnreachableClient),
        )
    }

    #[test]
    fn route_test() {
        assert!(matches!(route("/__hrm_msg__/reset"), RoutePath::Message(c) if c == "reset"));
        assert!(matches!(
            route("/https/a.com/users"),
            RoutePath::Forward { scheme, rest } if scheme == "https" && rest == "a.com/users"
        ));
        assert!(matches!(route("/favicon.ico"), RoutePath::Unknown));
        assert!(matches!(route("/http"), RoutePath::Unknown));
    }

    #[tokio::test]
    async fn control_messages_change_mocker_state() {
        let handler = handler();
        handler.mocker.get("/a", "").unwrap();

        let req = Request::get("/__hrm_msg__/disable")
            .body(Bytes::new())
            .unwrap();
        let res = handler.handle(req).await.unwrap();
        assert_eq!(res.status(), StatusCode::OK);
        assert!(!handler.mocker.is_enabled());

        let req = Request::get("/__hrm_msg__/reset").body(Bytes::new()).unwrap();
        handler.handle(req).await.unwrap();
        assert!(handler.mocker.mock_items().is_empty());

        let req = Request::get("/__hrm_msg__/explode").body(Bytes::new()).unwrap();
        let res = handler.handle(req).await.unwrap();
        assert_eq!(res.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn forwarded_requests_are_mocked() {
        let handler = handler();
        handler
            .mocker
            .get_with(
                "https://a.com/users",
                "users",
                MockItemInfo::default().header("x-rule", "1"),
            )
            .unwrap();

        let req = Request::get("/https/a.com/users?id=1")
            .header("host", "localhost:9001")
            .body(Bytes::new())
            .unwrap();
        let res = handler.handle(req).await.unwrap();

        assert_eq!(res.status(), StatusCode::OK);
        assert_eq!(res.headers().get("x-rule").unwrap(), "1");
        assert_eq!(res.headers().get("access-control-allow-origin").unwrap(), "*");
        assert_eq!(res.body(), &Bytes::from_static(b"users"));
    }
}
