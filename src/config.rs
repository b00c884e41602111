use crate::common::util::{is_truthy, read_env};
use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};

/// How requests are routed when a companion proxy server is in use.
///
/// * `Matched`: requests that match a mock rule are rewritten to
///   `http://{proxy_server}/{scheme}/{host}/{path}`, the proxy server answers them.
/// * `Middleware`: the proxy server is mounted on the same origin as the application, so
///   matched requests are rewritten to `{proxy_server}/{scheme}/{host}/{path}`.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum ProxyMode {
    #[default]
    None,
    Matched,
    Middleware,
}

impl FromStr for ProxyMode {
    type Err = String;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        match input.trim().to_lowercase().as_str() {
            "" | "none" => Ok(ProxyMode::None),
            "matched" => Ok(ProxyMode::Matched),
            "middleware" => Ok(ProxyMode::Middleware),
            _ => Err(format!("Invalid proxy mode {}", input)),
        }
    }
}

impl fmt::Display for ProxyMode {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let name = match self {
            ProxyMode::None => "none",
            ProxyMode::Matched => "matched",
            ProxyMode::Middleware => "middleware",
        };
        f.write_str(name)
    }
}

/// Configuration of a [Mocker](crate::Mocker) and the interceptors built on top of it.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
#[serde(default, rename_all = "camelCase")]
pub struct MockerConfig {
    /// The URL relative request URLs are resolved against (the "current location").
    pub base_url: Option<String>,
    pub proxy_mode: ProxyMode,
    /// `host:port` in matched mode, an origin such as `http://localhost:8080` in middleware mode.
    pub proxy_server: Option<String>,
    pub log: bool,
    pub disabled: bool,
}

impl MockerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reads the configuration from `HRM_BASE_URL`, `HRM_PROXY_MODE`, `HRM_PROXY_SERVER`,
    /// `HRM_LOG` and `HRM_DISABLED`. An unknown proxy mode falls back to no proxy.
    pub fn from_env() -> Self {
        let non_empty = |value: String| {
            if value.trim().is_empty() {
                None
            } else {
                Some(value)
            }
        };

        let proxy_mode = read_env("HRM_PROXY_MODE", "none")
            .parse()
            .unwrap_or_else(|err| {
                tracing::warn!("{}, proxy mode is disabled", err);
                ProxyMode::None
            });

        Self {
            base_url: non_empty(read_env("HRM_BASE_URL", "")),
            proxy_mode,
            proxy_server: non_empty(read_env("HRM_PROXY_SERVER", "")),
            log: is_truthy(&read_env("HRM_LOG", "false")),
            disabled: is_truthy(&read_env("HRM_DISABLED", "false")),
        }
    }

    pub fn base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = Some(url.into());
        self
    }

    pub fn proxy(mut self, mode: ProxyMode, server: impl Into<String>) -> Self {
        self.proxy_mode = mode;
        self.proxy_server = Some(server.into());
        self
    }

    pub fn log(mut self, enabled: bool) -> Self {
        self.log = enabled;
        self
    }

    pub fn disabled(mut self, disabled: bool) -> Self {
        self.disabled = disabled;
        self
    }

    /// The proxy server origin (scheme included), if a proxy mode is active.
    pub(crate) fn proxy_origin(&self) -> Option<String> {
        if self.proxy_mode == ProxyMode::None {
            return None;
        }

        let server = self.proxy_server.as_ref()?.trim().trim_end_matches('/');
        if server.is_empty() {
            return None;
        }

        if server.contains("://") {
            Some(server.to_string())
        } else {
            Some(format!("http://{}", server))
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn proxy_origin_test() {
        let matched = MockerConfig::new().proxy(ProxyMode::Matched, "localhost:9001");
        assert_eq!(
            matched.proxy_origin().as_deref(),
            Some("http://localhost:9001")
        );

        let middleware =
            MockerConfig::new().proxy(ProxyMode::Middleware, "https://app.example.com/");
        assert_eq!(
            middleware.proxy_origin().as_deref(),
            Some("https://app.example.com")
        );

        let none = MockerConfig::new().proxy(ProxyMode::None, "localhost:9001");
        assert_eq!(none.proxy_origin(), None);
    }

    #[test]
    fn deserialize_config_test() {
        let config: MockerConfig = serde_json::from_str(
            r#"{"baseUrl": "http://localhost:3000/", "proxyMode": "matched", "proxyServer": "localhost:9001", "log": true}"#,
        )
        .unwrap();

        assert_eq!(config.base_url.as_deref(), Some("http://localhost:3000/"));
        assert_eq!(config.proxy_mode, ProxyMode::Matched);
        assert!(config.log);
        assert!(!config.disabled);
    }
}
