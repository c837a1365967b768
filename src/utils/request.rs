use http::{HeaderMap, Uri};

/// Retrieves the value of a specific header.
///
/// Returns `None` if the header is not present or its value is not valid UTF-8.
pub fn get_header_value<'a>(headers: &'a HeaderMap, key: &str) -> Option<&'a str> {
    headers.get(key).and_then(|value| value.to_str().ok())
}

/// Retrieves the value of a specific cookie from the `Cookie` headers.
///
/// Returns the first occurrence of the cookie's value.
pub fn get_cookie_value<'a>(headers: &'a HeaderMap, cookie_name: &str) -> Option<&'a str> {
    for header in headers.get_all(http::header::COOKIE) {
        let Ok(cookies) = header.to_str() else {
            continue;
        };
        for item in cookies.split(';') {
            if let Some((k, v)) = item.trim().split_once('=') {
                if k.trim() == cookie_name {
                    return Some(v.trim());
                }
            }
        }
    }
    log::debug!("Cookie '{cookie_name}' not found");
    None
}

/// Retrieves the request host without its port.
///
/// Prefers the host from the URI (HTTP/2 authority), falls back to the
/// `Host` header.
pub fn get_request_host<'a>(uri: &'a Uri, headers: &'a HeaderMap) -> Option<&'a str> {
    if let Some(host) = uri.host() {
        if !host.is_empty() {
            return Some(host);
        }
    }
    get_header_value(headers, http::header::HOST.as_str()).map(strip_port)
}

fn strip_port(host: &str) -> &str {
    if host.starts_with('[') {
        // IPv6 literal, keep the brackets
        return match host.find(']') {
            Some(end) => &host[..=end],
            None => host,
        };
    }
    host.split(':').next().unwrap_or_default()
}

/// Path and query of the request as the client sent them.
pub fn request_uri(uri: &Uri) -> &str {
    uri.path_and_query()
        .map(|pq| pq.as_str())
        .unwrap_or_else(|| uri.path())
}

/// Decoded first value of a query parameter.
pub fn get_query_value(uri: &Uri, name: &str) -> Option<String> {
    let query = uri.query()?;
    url::form_urlencoded::parse(query.as_bytes())
        .find(|(k, _)| k == name)
        .map(|(_, v)| v.into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::HeaderValue;

    #[test]
    fn test_get_cookie_value() {
        let mut headers = HeaderMap::new();
        headers.insert(
            http::header::COOKIE,
            HeaderValue::from_static("theme=dark; a1b2c3 = token-value ;x=y"),
        );
        assert_eq!(get_cookie_value(&headers, "a1b2c3"), Some("token-value"));
        assert_eq!(get_cookie_value(&headers, "x"), Some("y"));
        assert_eq!(get_cookie_value(&headers, "missing"), None);
    }

    #[test]
    fn test_get_request_host() {
        let mut headers = HeaderMap::new();
        headers.insert(http::header::HOST, HeaderValue::from_static("example.local:8443"));
        let uri: Uri = "/login/".parse().unwrap();
        assert_eq!(get_request_host(&uri, &headers), Some("example.local"));

        let uri: Uri = "https://other.local/login/".parse().unwrap();
        assert_eq!(get_request_host(&uri, &headers), Some("other.local"));

        headers.insert(http::header::HOST, HeaderValue::from_static("[::1]:8080"));
        let uri: Uri = "/".parse().unwrap();
        assert_eq!(get_request_host(&uri, &headers), Some("[::1]"));
    }

    #[test]
    fn test_query_helpers() {
        let uri: Uri = "/app/?redirect-to=%2Fapp%2Fwidget&x=1".parse().unwrap();
        assert_eq!(request_uri(&uri), "/app/?redirect-to=%2Fapp%2Fwidget&x=1");
        assert_eq!(
            get_query_value(&uri, "redirect-to").as_deref(),
            Some("/app/widget")
        );
        assert_eq!(get_query_value(&uri, "y"), None);
    }
}
