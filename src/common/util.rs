use bytes::Bytes;
use serde_json::{Map, Value};
use std::collections::BTreeMap;

// ===============================================================================================
// Environment
// ===============================================================================================
#[doc(hidden)]
pub(crate) fn read_env(name: &str, default: &str) -> String {
    match std::env::var(name) {
        Ok(value) => value,
        Err(_) => default.to_string(),
    }
}

/// Interprets the usual spellings of a boolean flag ("true", "yes", "1", "on").
pub(crate) fn is_truthy(value: &str) -> bool {
    matches!(
        value.trim().to_lowercase().as_str(),
        "true" | "yes" | "1" | "on"
    )
}

// ===============================================================================================
// URLs
// ===============================================================================================
/// Returns the query part of a URL (without the leading `?` and without a fragment).
pub(crate) fn query_string(url: &str) -> &str {
    let without_fragment = url.split('#').next().unwrap_or("");
    match without_fragment.split_once('?') {
        Some((_, query)) => query,
        None => "",
    }
}

/// Parses the query string of a URL. Repeated keys keep the last value.
pub(crate) fn parse_query(url: &str) -> BTreeMap<String, String> {
    form_urlencoded::parse(query_string(url).as_bytes())
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect()
}

/// Removes a leading `scheme:` from a URL, so `http://a.com/x` becomes `//a.com/x`.
pub(crate) fn strip_scheme(url: &str) -> &str {
    match url.find("://") {
        Some(idx)
            if idx > 0
                && url[..idx]
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || c == '_') =>
        {
            &url[idx + 1..]
        }
        _ => url,
    }
}

/// Splits `scheme://rest` into its two parts.
pub(crate) fn split_scheme(url: &str) -> Option<(&str, &str)> {
    let (scheme, rest) = url.split_once("://")?;
    if scheme.eq_ignore_ascii_case("http") || scheme.eq_ignore_ascii_case("https") {
        Some((scheme, rest))
    } else {
        None
    }
}

// ===============================================================================================
// Bodies
// ===============================================================================================
/// Tries to interpret a request body as JSON first and as a form-urlencoded object second.
pub(crate) fn parse_body(raw: &Bytes, content_type: Option<&str>) -> Option<Value> {
    if raw.is_empty() {
        return None;
    }

    if let Ok(value) = serde_json::from_slice::<Value>(raw) {
        return Some(value);
    }

    let is_form = content_type
        .map(|ct| ct.contains("application/x-www-form-urlencoded"))
        .unwrap_or(false);
    let text = std::str::from_utf8(raw).ok()?;

    if is_form || looks_like_form(text) {
        let map: Map<String, Value> = form_urlencoded::parse(text.as_bytes())
            .map(|(k, v)| (k.into_owned(), Value::String(v.into_owned())))
            .collect();
        return Some(Value::Object(map));
    }

    None
}

fn looks_like_form(text: &str) -> bool {
    !text.is_empty()
        && !text.contains(char::is_whitespace)
        && text.split('&').all(|pair| {
            pair.split_once('=')
                .map(|(k, _)| !k.is_empty())
                .unwrap_or(false)
        })
}

/// Renders a value the way a loosely typed configuration value reads as text.
pub(crate) fn value_to_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use serde_json::json;

    #[test]
    fn parse_query_test() {
        let query = parse_query("http://a.com/x?id=42&name=a%20b&id=43#frag");
        assert_eq!(query.get("id").map(String::as_str), Some("43"));
        assert_eq!(query.get("name").map(String::as_str), Some("a b"));
        assert!(parse_query("/no-query").is_empty());
    }

    #[test]
    fn strip_scheme_test() {
        assert_eq!(strip_scheme("http://a.com/x"), "//a.com/x");
        assert_eq!(strip_scheme("//a.com/x"), "//a.com/x");
        assert_eq!(strip_scheme("/api?next=http://b.com"), "/api?next=http://b.com");
    }

    #[test]
    fn parse_body_test() {
        let json_body = Bytes::from_static(br#"{"a":1}"#);
        assert_eq!(parse_body(&json_body, None), Some(json!({"a": 1})));

        let form_body = Bytes::from_static(b"a=1&b=two");
        assert_eq!(
            parse_body(&form_body, Some("application/x-www-form-urlencoded")),
            Some(json!({"a": "1", "b": "two"}))
        );

        let text_body = Bytes::from_static(b"hello world");
        assert_eq!(parse_body(&text_body, Some("text/plain")), None);
    }
}
