use crate::{
    common::{
        data::{Method, RequestInfo},
        http::HttpClient,
        runtime,
        util::strip_scheme,
    },
    config::MockerConfig,
    mock::{
        body::{MockBody, MockPayload},
        item::{Error, MockItem, MockItemInfo, MockUrl},
        persistence,
    },
};
use bytes::Bytes;
use serde_json::Value;
use std::{
    path::Path,
    sync::{Arc, Mutex, MutexGuard},
    time::Duration,
};

/// Path prefix of the control messages understood by the companion proxy server.
pub const PROXY_MESSAGE_PREFIX: &str = "__hrm_msg__";

/// Control messages mirrored to the companion proxy server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProxyCommand {
    Reset,
    Enable,
    Disable,
    EnableLog,
    DisableLog,
}

impl ProxyCommand {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProxyCommand::Reset => "reset",
            ProxyCommand::Enable => "enable",
            ProxyCommand::Disable => "disable",
            ProxyCommand::EnableLog => "enableLog",
            ProxyCommand::DisableLog => "disableLog",
        }
    }

    pub fn parse(command: &str) -> Option<Self> {
        match command {
            "reset" => Some(ProxyCommand::Reset),
            "enable" => Some(ProxyCommand::Enable),
            "disable" => Some(ProxyCommand::Disable),
            "enableLog" => Some(ProxyCommand::EnableLog),
            "disableLog" => Some(ProxyCommand::DisableLog),
            _ => None,
        }
    }
}

struct MockerState {
    items: Vec<Arc<MockItem>>,
    disabled: bool,
    log: bool,
}

/// The registry of mock rules. It decides which rule, if any, governs an outgoing request.
///
/// A `Mocker` is created once, wrapped into an `Arc` and shared by all interceptors.
pub struct Mocker {
    state: Mutex<MockerState>,
    config: MockerConfig,
    notifier: Option<Arc<dyn HttpClient + Send + Sync>>,
}

impl Mocker {
    pub fn new(config: MockerConfig) -> Self {
        Self {
            state: Mutex::new(MockerState {
                items: Vec::new(),
                disabled: config.disabled,
                log: config.log,
            }),
            config,
            notifier: None,
        }
    }

    /// Sets the client used to mirror state changes to the companion proxy server.
    pub fn with_notifier(mut self, client: Arc<dyn HttpClient + Send + Sync>) -> Self {
        self.notifier = Some(client);
        self
    }

    pub fn config(&self) -> &MockerConfig {
        &self.config
    }

    fn state(&self) -> MutexGuard<'_, MockerState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    // ===========================================================================================
    // Registration
    // ===========================================================================================

    /// Registers a rule. Returns `Ok(None)` if the rule has no valid URL; a rule with the same
    /// URL and method replaces the existing one.
    pub fn mock(&self, info: MockItemInfo) -> Result<Option<Arc<MockItem>>, Error> {
        let item = MockItem::new(info)?;
        let key = match item.key() {
            Some(key) => key.to_string(),
            None => {
                tracing::debug!("Ignoring mock rule without a valid URL");
                return Ok(None);
            }
        };

        let item = Arc::new(item);
        let mut state = self.state();

        match state.items.iter().position(|i| i.key() == Some(key.as_str())) {
            Some(idx) => state.items[idx] = item.clone(),
            None => state.items.push(item.clone()),
        }

        tracing::debug!("Registered mock rule {}", key);
        Ok(Some(item))
    }

    /// Registers a rule described as JSON. Anything but a JSON object is ignored.
    pub fn mock_value(&self, value: &Value) -> Result<Option<Arc<MockItem>>, Error> {
        if !value.is_object() {
            return Ok(None);
        }

        match serde_json::from_value::<MockItemInfo>(value.clone()) {
            Ok(info) => self.mock(info),
            Err(err) => {
                tracing::debug!("Ignoring malformed mock rule: {}", err);
                Ok(None)
            }
        }
    }

    /// Registers many rules at once. Rules without a valid URL are skipped; the number of
    /// registered rules is returned.
    pub fn set_mock_data<I>(&self, infos: I) -> Result<usize, Error>
    where
        I: IntoIterator<Item = MockItemInfo>,
    {
        let mut count = 0;
        for info in infos {
            if self.mock(info)?.is_some() {
                count += 1;
            }
        }
        Ok(count)
    }

    /// Loads and registers all mock files of a directory.
    pub fn load_mock_files<P: AsRef<Path>>(&self, dir: P) -> Result<usize, persistence::Error> {
        let infos = persistence::read_mock_files(dir)?;
        Ok(self.set_mock_data(infos)?)
    }

    pub fn get(
        &self,
        url: impl Into<MockUrl>,
        body: impl Into<MockBody>,
    ) -> Result<Option<Arc<MockItem>>, Error> {
        self.get_with(url, body, MockItemInfo::default())
    }

    pub fn get_with(
        &self,
        url: impl Into<MockUrl>,
        body: impl Into<MockBody>,
        opts: MockItemInfo,
    ) -> Result<Option<Arc<MockItem>>, Error> {
        self.mock_method(Method::GET, url, Some(body.into()), opts)
    }

    pub fn post(
        &self,
        url: impl Into<MockUrl>,
        body: impl Into<MockBody>,
    ) -> Result<Option<Arc<MockItem>>, Error> {
        self.post_with(url, body, MockItemInfo::default())
    }

    pub fn post_with(
        &self,
        url: impl Into<MockUrl>,
        body: impl Into<MockBody>,
        opts: MockItemInfo,
    ) -> Result<Option<Arc<MockItem>>, Error> {
        self.mock_method(Method::POST, url, Some(body.into()), opts)
    }

    pub fn put(
        &self,
        url: impl Into<MockUrl>,
        body: impl Into<MockBody>,
    ) -> Result<Option<Arc<MockItem>>, Error> {
        self.put_with(url, body, MockItemInfo::default())
    }

    pub fn put_with(
        &self,
        url: impl Into<MockUrl>,
        body: impl Into<MockBody>,
        opts: MockItemInfo,
    ) -> Result<Option<Arc<MockItem>>, Error> {
        self.mock_method(Method::PUT, url, Some(body.into()), opts)
    }

    pub fn patch(
        &self,
        url: impl Into<MockUrl>,
        body: impl Into<MockBody>,
    ) -> Result<Option<Arc<MockItem>>, Error> {
        self.patch_with(url, body, MockItemInfo::default())
    }

    pub fn patch_with(
        &self,
        url: impl Into<MockUrl>,
        body: impl Into<MockBody>,
        opts: MockItemInfo,
    ) -> Result<Option<Arc<MockItem>>, Error> {
        self.mock_method(Method::PATCH, url, Some(body.into()), opts)
    }

    pub fn delete(
        &self,
        url: impl Into<MockUrl>,
        body: impl Into<MockBody>,
    ) -> Result<Option<Arc<MockItem>>, Error> {
        self.delete_with(url, body, MockItemInfo::default())
    }

    pub fn delete_with(
        &self,
        url: impl Into<MockUrl>,
        body: impl Into<MockBody>,
        opts: MockItemInfo,
    ) -> Result<Option<Arc<MockItem>>, Error> {
        self.mock_method(Method::DELETE, url, Some(body.into()), opts)
    }

    pub fn any(
        &self,
        url: impl Into<MockUrl>,
        body: impl Into<MockBody>,
    ) -> Result<Option<Arc<MockItem>>, Error> {
        self.any_with(url, body, MockItemInfo::default())
    }

    pub fn any_with(
        &self,
        url: impl Into<MockUrl>,
        body: impl Into<MockBody>,
        opts: MockItemInfo,
    ) -> Result<Option<Arc<MockItem>>, Error> {
        self.mock_method(Method::ANY, url, Some(body.into()), opts)
    }

    /// HEAD responses never carry a body.
    pub fn head(&self, url: impl Into<MockUrl>) -> Result<Option<Arc<MockItem>>, Error> {
        self.head_with(url, MockItemInfo::default())
    }

    pub fn head_with(
        &self,
        url: impl Into<MockUrl>,
        opts: MockItemInfo,
    ) -> Result<Option<Arc<MockItem>>, Error> {
        self.mock_method(Method::HEAD, url, None, opts)
    }

    fn mock_method(
        &self,
        method: Method,
        url: impl Into<MockUrl>,
        body: Option<MockBody>,
        opts: MockItemInfo,
    ) -> Result<Option<Arc<MockItem>>, Error> {
        let info = MockItemInfo {
            url: Some(url.into()),
            method: Some(method.to_string()),
            body,
            response: None,
            ..opts
        };
        self.mock(info)
    }

    /// A snapshot of all registered rules in registration order.
    pub fn mock_items(&self) -> Vec<Arc<MockItem>> {
        self.state().items.clone()
    }

    // ===========================================================================================
    // Matching
    // ===========================================================================================

    /// Finds the rule governing a request without consuming its `times` budget.
    ///
    /// Exact URL matches always win over substring matches, so a rule for `/api/users` is
    /// preferred over a rule for `/api` when requesting `/api/users`. Pattern rules match in
    /// either pass.
    pub fn match_mock_item(&self, req_url: &str, req_method: &str) -> Option<Arc<MockItem>> {
        let state = self.state();
        find_match(&state, req_url, req_method).cloned()
    }

    /// Finds the rule governing a request and, if `accept` agrees, consumes one unit of its
    /// `times` budget. Lookup and decrement happen under one lock.
    pub fn claim_mock_item<F>(
        &self,
        req_url: &str,
        req_method: &str,
        accept: F,
    ) -> Option<Arc<MockItem>>
    where
        F: FnOnce(&MockItem) -> bool,
    {
        let state = self.state();
        let item = find_match(&state, req_url, req_method)?;

        if !accept(item) {
            return None;
        }

        item.consume();
        Some(item.clone())
    }

    // ===========================================================================================
    // Global switches
    // ===========================================================================================

    /// Removes all rules.
    pub fn reset(&self) {
        self.apply(ProxyCommand::Reset);
        self.notify_proxy_server(ProxyCommand::Reset);
    }

    pub fn enable(&self) {
        self.apply(ProxyCommand::Enable);
        self.notify_proxy_server(ProxyCommand::Enable);
    }

    pub fn disable(&self) {
        self.apply(ProxyCommand::Disable);
        self.notify_proxy_server(ProxyCommand::Disable);
    }

    pub fn enable_log(&self) {
        self.apply(ProxyCommand::EnableLog);
        self.notify_proxy_server(ProxyCommand::EnableLog);
    }

    pub fn disable_log(&self) {
        self.apply(ProxyCommand::DisableLog);
        self.notify_proxy_server(ProxyCommand::DisableLog);
    }

    pub fn is_enabled(&self) -> bool {
        !self.state().disabled
    }

    pub fn is_log_enabled(&self) -> bool {
        self.state().log
    }

    /// Applies a control command locally without mirroring it to a proxy server.
    pub fn apply(&self, command: ProxyCommand) {
        let mut state = self.state();
        match command {
            ProxyCommand::Reset => state.items.clear(),
            ProxyCommand::Enable => state.disabled = false,
            ProxyCommand::Disable => state.disabled = true,
            ProxyCommand::EnableLog => state.log = true,
            ProxyCommand::DisableLog => state.log = false,
        }
        tracing::debug!("Applied command '{}'", command.as_str());
    }

    /// Builds the URL of a control message for the configured proxy server.
    pub(crate) fn proxy_message_url(&self, command: ProxyCommand) -> Option<String> {
        let origin = self.config.proxy_origin()?;
        let mut url = url::Url::parse(&origin).ok()?;
        url.path_segments_mut()
            .ok()?
            .pop_if_empty()
            .push(PROXY_MESSAGE_PREFIX)
            .push(command.as_str());
        Some(url.to_string())
    }

    /// Fire-and-forget: the result of the notification is never awaited.
    fn notify_proxy_server(&self, command: ProxyCommand) {
        let (client, url) = match (&self.notifier, self.proxy_message_url(command)) {
            (Some(client), Some(url)) => (client.clone(), url),
            _ => return,
        };

        let req = match http::Request::get(url.as_str()).body(Bytes::new()) {
            Ok(req) => req,
            Err(err) => {
                tracing::debug!("Cannot build proxy message request: {}", err);
                return;
            }
        };

        let spawned = runtime::spawn_detached(async move {
            if let Err(err) = client.send(req).await {
                tracing::debug!("Cannot notify proxy server: {}", err);
            }
        });

        if !spawned {
            tracing::debug!(
                "Not running inside a Tokio runtime, proxy server was not notified about '{}'",
                command.as_str()
            );
        }
    }

    // ===========================================================================================
    // Logging
    // ===========================================================================================

    /// Logs a served mock response when logging is enabled: a summary at info level and the
    /// complete request, response and rule at debug level.
    pub fn send_response_log(
        &self,
        spent: Duration,
        body: &MockPayload,
        request: &RequestInfo,
        item: &MockItem,
    ) {
        if !self.is_log_enabled() {
            return;
        }

        tracing::info!(
            spent_ms = spent.as_millis() as u64,
            method = %request.method,
            url = %request.url,
            status = item.status(),
            "[http-request-mock] {} {}",
            request.method,
            request.url
        );
        tracing::debug!(
            "[http-request-mock] request: {:?}, response: {:?}, mock item: {:?}",
            request,
            body,
            item
        );
    }
}

impl Default for Mocker {
    fn default() -> Self {
        Self::new(MockerConfig::default())
    }
}

fn find_match<'a>(
    state: &'a MockerState,
    req_url: &str,
    req_method: &str,
) -> Option<&'a Arc<MockItem>> {
    if state.disabled {
        return None;
    }

    let req_method = if req_method.is_empty() {
        "GET"
    } else {
        req_method
    };

    let candidates: Vec<&Arc<MockItem>> = state
        .items
        .iter()
        .filter(|item| !item.is_disabled() && item.has_budget() && item.method().matches(req_method))
        .collect();

    let protocol_relative = req_url.starts_with("//");

    for exact in [true, false] {
        for item in candidates.iter().copied() {
            match item.url() {
                Some(MockUrl::Pattern(regex)) => {
                    if regex.is_match(req_url) {
                        return Some(item);
                    }
                }
                Some(MockUrl::Text(url)) => {
                    let url = if protocol_relative {
                        strip_scheme(url)
                    } else {
                        url.as_str()
                    };

                    let matched = if exact {
                        req_url == url
                    } else {
                        req_url.contains(url)
                    };

                    if matched {
                        return Some(item);
                    }
                }
                None => {}
            }
        }
    }

    None
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::config::ProxyMode;
    use regex::Regex;
    use serde_json::json;

    #[test]
    fn exact_match_wins_over_substring_match() {
        let mocker = Mocker::default();
        mocker.get("/api", "api").unwrap();
        mocker.get("/api/users", "users").unwrap();

        let item = mocker.match_mock_item("/api/users", "GET").unwrap();
        assert_eq!(item.key(), Some("/api/users-GET"));

        let item = mocker.match_mock_item("/api/users/1", "GET").unwrap();
        assert_eq!(item.key(), Some("/api-GET"));
    }

    #[test]
    fn earliest_registered_substring_rule_wins() {
        // Arrange
        let mocker = Mocker::default();
        mocker.get("/a", "a").unwrap();
        mocker.get("/a/b", "ab").unwrap();

        // Act
        let item = mocker.match_mock_item("/a/b/c", "GET").unwrap();

        // Assert
        assert_eq!(item.key(), Some("/a-GET"));

        // Re-registering keeps the original position.
        mocker.get("/a", "a2").unwrap();
        let item = mocker.match_mock_item("/a/b/c", "GET").unwrap();
        assert!(matches!(item.body(), MockBody::Literal(MockPayload::Text(t)) if t == "a2"));
    }

    #[test]
    fn method_filter() {
        let mocker = Mocker::default();
        mocker.post("/api/users", "created").unwrap();

        assert!(mocker.match_mock_item("/api/users", "GET").is_none());
        assert!(mocker.match_mock_item("/api/users", "post").is_some());

        mocker.any("/api/any", "").unwrap();
        assert!(mocker.match_mock_item("/api/any", "OPTIONS").is_some());
    }

    #[test]
    fn pattern_rules_match_immediately() {
        let mocker = Mocker::default();
        mocker
            .get(Regex::new(r"/users/\d+$").unwrap(), "user")
            .unwrap();
        mocker.get("http://a.com/users/1", "exact").unwrap();

        let item = mocker.match_mock_item("http://a.com/users/1", "GET").unwrap();
        assert!(item.url().map_or(false, MockUrl::is_pattern));
    }

    #[test]
    fn disabled_rules_and_disabled_mocker_never_match() {
        let mocker = Mocker::default();
        mocker
            .get_with("/a", "", MockItemInfo::default().disable(true))
            .unwrap();
        assert!(mocker.match_mock_item("/a", "GET").is_none());

        mocker.get("/b", "").unwrap();
        mocker.disable();
        assert!(!mocker.is_enabled());
        assert!(mocker.match_mock_item("/b", "GET").is_none());

        mocker.enable();
        assert!(mocker.match_mock_item("/b", "GET").is_some());
    }

    #[test]
    fn times_budget_is_exhausted() {
        let mocker = Mocker::default();
        mocker
            .get_with("/a", "", MockItemInfo::default().times(2))
            .unwrap();

        assert!(mocker.claim_mock_item("/a", "GET", |_| true).is_some());
        assert!(mocker.claim_mock_item("/a", "GET", |_| true).is_some());
        assert!(mocker.claim_mock_item("/a", "GET", |_| true).is_none());
    }

    #[test]
    fn rejected_claims_keep_their_budget() {
        let mocker = Mocker::default();
        let item = mocker
            .get_with("/a", "", MockItemInfo::default().times(1))
            .unwrap()
            .unwrap();

        assert!(mocker.claim_mock_item("/a", "GET", |_| false).is_none());
        assert_eq!(item.times(), Some(1));
    }

    #[test]
    fn protocol_relative_requests() {
        let mocker = Mocker::default();
        mocker.get("https://a.com/x", "").unwrap();

        assert!(mocker.match_mock_item("//a.com/x", "GET").is_some());
    }

    #[test]
    fn last_registration_per_key_wins() {
        let mocker = Mocker::default();
        mocker.get("/a", "first").unwrap();
        mocker.get("/a", "second").unwrap();
        mocker.post("/a", "post").unwrap();

        assert_eq!(mocker.mock_items().len(), 2);
        let item = mocker.match_mock_item("/a", "GET").unwrap();
        assert!(matches!(item.body(), MockBody::Literal(MockPayload::Text(t)) if t == "second"));
    }

    #[test]
    fn invalid_rules_are_not_registered() {
        let mocker = Mocker::default();

        assert!(mocker.mock_value(&json!("not an object")).unwrap().is_none());
        assert!(mocker.mock_value(&json!({"method": "GET"})).unwrap().is_none());
        assert!(mocker
            .mock_value(&json!({"url": "/a", "status": 201}))
            .unwrap()
            .is_some());

        let count = mocker
            .set_mock_data(vec![
                MockItemInfo::new("/b"),
                MockItemInfo::default(),
                MockItemInfo::new("/c"),
            ])
            .unwrap();
        assert_eq!(count, 2);
        assert_eq!(mocker.mock_items().len(), 3);

        mocker.reset();
        assert!(mocker.mock_items().is_empty());
    }

    #[test]
    fn head_rules_carry_no_body() {
        let mocker = Mocker::default();
        let item = mocker.head("/a").unwrap().unwrap();

        assert_eq!(item.key(), Some("/a-HEAD"));
        assert!(matches!(item.body(), MockBody::Literal(MockPayload::Text(t)) if t.is_empty()));
    }

    #[test]
    fn proxy_message_urls() {
        let mocker = Mocker::new(MockerConfig::new().proxy(ProxyMode::Matched, "localhost:9001"));
        assert_eq!(
            mocker.proxy_message_url(ProxyCommand::EnableLog).as_deref(),
            Some("http://localhost:9001/__hrm_msg__/enableLog")
        );

        let mocker = Mocker::default();
        assert_eq!(mocker.proxy_message_url(ProxyCommand::Reset), None);
    }
}
