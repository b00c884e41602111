use crate::common::util::{parse_query, query_string};
use lazy_static::lazy_static;
use regex::{Captures, Regex};

lazy_static! {
    static ref REMOTE_DIRECTIVE: Regex = Regex::new(
        r"(?i)^(?:(GET|POST|PUT|PATCH|DELETE|HEAD|OPTIONS)\s+)?(https?://\S+|//\S+|\$url)$"
    )
    .expect("valid remote directive pattern");
    static ref QUERY_KEY: Regex =
        Regex::new(r"\$query\.([A-Za-z0-9_\-\[\]]+)").expect("valid query key pattern");
}

/// The resolved target of a remote directive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteInfo {
    /// `None` means the method of the intercepted request is reused.
    pub method: Option<String>,
    pub url: String,
}

/// A validated `[METHOD ]URL` or `$url` directive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct RemoteDirective {
    method: Option<String>,
    target: String,
}

impl RemoteDirective {
    /// Returns `Ok(None)` for an empty directive and an error message for a malformed one.
    pub fn parse(directive: &str) -> Result<Option<Self>, String> {
        let directive = directive.trim();
        if directive.is_empty() {
            return Ok(None);
        }

        let captures = REMOTE_DIRECTIVE.captures(directive).ok_or_else(|| {
            format!(
                "invalid remote directive '{}': expected '[METHOD ]URL' with an http://, \
                 https:// or // URL, or '$url'",
                directive
            )
        })?;

        Ok(Some(Self {
            method: captures.get(1).map(|m| m.as_str().to_uppercase()),
            target: captures[2].to_string(),
        }))
    }

    /// Resolves the directive for a concrete request URL.
    pub fn resolve(&self, request_url: &str) -> RemoteInfo {
        if self.target == "$url" {
            return RemoteInfo {
                method: self.method.clone(),
                url: request_url.to_string(),
            };
        }

        let query = parse_query(request_url);
        let url = QUERY_KEY.replace_all(&self.target, |caps: &Captures| {
            query.get(&caps[1]).cloned().unwrap_or_default()
        });
        let url = url.replace("$query", query_string(request_url));

        RemoteInfo {
            method: self.method.clone(),
            url,
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn parse_directive_forms() {
        let with_method = RemoteDirective::parse("post https://x.com/a").unwrap().unwrap();
        assert_eq!(with_method.method.as_deref(), Some("POST"));
        assert_eq!(with_method.target, "https://x.com/a");

        let bare = RemoteDirective::parse("//x.com/a").unwrap().unwrap();
        assert_eq!(bare.method, None);

        assert_eq!(RemoteDirective::parse("  ").unwrap(), None);
    }

    #[test]
    fn parse_directive_rejects_malformed_values() {
        assert!(RemoteDirective::parse("FETCH https://x.com").is_err());
        assert!(RemoteDirective::parse("GET x.com/a").is_err());
        assert!(RemoteDirective::parse("ftp://x.com").is_err());
    }

    #[test]
    fn resolve_url_placeholder() {
        let directive = RemoteDirective::parse("$url").unwrap().unwrap();
        let info = directive.resolve("http://a.com/users?id=1");
        assert_eq!(info.url, "http://a.com/users?id=1");
        assert_eq!(info.method, None);
    }

    #[test]
    fn resolve_query_placeholders() {
        let directive = RemoteDirective::parse("GET https://x.com/$query.id")
            .unwrap()
            .unwrap();
        let info = directive.resolve("http://a.com/users?id=42");
        assert_eq!(
            info,
            RemoteInfo {
                method: Some("GET".to_string()),
                url: "https://x.com/42".to_string()
            }
        );

        let directive = RemoteDirective::parse("https://x.com/search?$query&page=$query.missing")
            .unwrap()
            .unwrap();
        let info = directive.resolve("/search?q=rust&lang=en");
        assert_eq!(info.url, "https://x.com/search?q=rust&lang=en&page=");
    }
}
