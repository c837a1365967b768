//! Login-state redirect policy.
//!
//! A login bundle either forwards the client's original location on to the
//! next bundle (`consume_redirect == false`, e.g. the login page) or is the
//! place where that location is finally honoured (`consume_redirect ==
//! true`, e.g. the signed-in application).

use http::Uri;
use url::{form_urlencoded, Url};

use crate::utils::request::{get_query_value, request_uri};

pub const REDIRECT_QUERY_KEY: &str = "redirect-to";

/// Stand-in origin for resolving consumed targets.
const LOCAL_ORIGIN: &str = "http://edgeroute.local";

#[derive(Debug, PartialEq, Eq)]
pub enum Redirect {
    /// Serve the request under the bundle prefix.
    Pass,
    /// Answer with 307 to this location.
    To(String),
}

pub fn apply(prefix: &str, consume_redirect: bool, uri: &Uri) -> Redirect {
    let path = uri.path();

    if !consume_redirect {
        if path.starts_with(prefix) {
            return Redirect::Pass;
        }
        if path == "/" {
            return Redirect::To(prefix.to_string());
        }
        let query = form_urlencoded::Serializer::new(String::new())
            .append_pair(REDIRECT_QUERY_KEY, request_uri(uri))
            .finish();
        return Redirect::To(format!("{prefix}?{query}"));
    }

    match get_query_value(uri, REDIRECT_QUERY_KEY) {
        Some(next) if !next.is_empty() => match local_target(prefix, &next) {
            Some(location) => Redirect::To(location),
            None => Redirect::To(prefix.to_string()),
        },
        _ if !path.starts_with(prefix) => Redirect::To(prefix.to_string()),
        _ => Redirect::Pass,
    }
}

/// Normalizes a consumed `redirect-to` into a same-origin location.
///
/// Protocol-relative and absolute targets are refused, as is any target
/// whose path leaves `prefix` once dot segments are removed. The returned
/// path and query are percent-encoded.
fn local_target(prefix: &str, next: &str) -> Option<String> {
    let bytes = next.as_bytes();
    if bytes.first() != Some(&b'/') || matches!(bytes.get(1), Some(b'/' | b'\\')) {
        return None;
    }

    let base = Url::parse(LOCAL_ORIGIN).ok()?;
    let target = base.join(next).ok()?;
    if target.origin() != base.origin() || !target.path().starts_with(prefix) {
        return None;
    }

    let mut location = target.path().to_string();
    if let Some(query) = target.query() {
        location.push('?');
        location.push_str(query);
    }
    if let Some(fragment) = target.fragment() {
        location.push('#');
        location.push_str(fragment);
    }
    Some(location)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn uri(s: &str) -> Uri {
        s.parse().unwrap()
    }

    /// Applies the policy, follows at most one redirect and applies it again.
    fn settle(prefix: &str, consume: bool, start: &str) -> (String, Redirect) {
        match apply(prefix, consume, &uri(start)) {
            Redirect::Pass => (start.to_string(), Redirect::Pass),
            Redirect::To(next) => {
                let again = apply(prefix, consume, &uri(&next));
                (next, again)
            }
        }
    }

    #[test]
    fn test_prefix_passes_through() {
        assert_eq!(apply("/login/", false, &uri("/login/")), Redirect::Pass);
        assert_eq!(apply("/app/", true, &uri("/app/widget")), Redirect::Pass);
    }

    #[test]
    fn test_unconsumed_carries_original_uri() {
        assert_eq!(
            apply("/login/", false, &uri("/other")),
            Redirect::To("/login/?redirect-to=%2Fother".to_string())
        );
        assert_eq!(
            apply("/login/", false, &uri("/app/widget?tab=2")),
            Redirect::To("/login/?redirect-to=%2Fapp%2Fwidget%3Ftab%3D2".to_string())
        );
    }

    #[test]
    fn test_unconsumed_root_has_no_target() {
        assert_eq!(
            apply("/login/", false, &uri("/")),
            Redirect::To("/login/".to_string())
        );
    }

    #[test]
    fn test_consumed_honours_matching_target() {
        assert_eq!(
            apply("/app/", true, &uri("/app/?redirect-to=%2Fapp%2Fwidget")),
            Redirect::To("/app/widget".to_string())
        );
        assert_eq!(
            apply("/app/", true, &uri("/app/?redirect-to=%2Fapp%2Fwidget%3Ftab%3D2")),
            Redirect::To("/app/widget?tab=2".to_string())
        );
    }

    #[test]
    fn test_consumed_target_is_reencoded() {
        assert_eq!(
            apply("/app/", true, &uri("/app/?redirect-to=%2Fapp%2Fcaf%C3%A9")),
            Redirect::To("/app/caf%C3%A9".to_string())
        );
        assert_eq!(
            apply("/app/", true, &uri("/app/?redirect-to=%2Fapp%2Fx%3Fq%3Da%2520b%20c")),
            Redirect::To("/app/x?q=a%20b%20c".to_string())
        );
        match apply("/app/", true, &uri("/app/?redirect-to=%2Fapp%2F%0D%0ASet-Cookie%3Ax")) {
            Redirect::To(location) => {
                assert!(location.is_ascii());
                assert!(!location.contains('\r') && !location.contains('\n'));
                assert!(http::HeaderValue::from_str(&location).is_ok());
            }
            Redirect::Pass => panic!("target not consumed"),
        }
    }

    #[test]
    fn test_consumed_drops_foreign_target() {
        assert_eq!(
            apply("/app/", true, &uri("/app/?redirect-to=https%3A%2F%2Fevil.example")),
            Redirect::To("/app/".to_string())
        );
        assert_eq!(
            apply("/app/", true, &uri("/login/?redirect-to=%2Fother")),
            Redirect::To("/app/".to_string())
        );

        // protocol-relative targets satisfy a "/" prefix but leave the origin
        assert_eq!(
            apply("/", true, &uri("/?redirect-to=%2F%2Fevil.example%2Fphish")),
            Redirect::To("/".to_string())
        );
        assert_eq!(
            apply("/", true, &uri("/?redirect-to=%2F%5Cevil.example")),
            Redirect::To("/".to_string())
        );
        assert_eq!(
            apply("/", true, &uri("/?redirect-to=https%3A%2F%2Fevil.example%2F")),
            Redirect::To("/".to_string())
        );
        assert_eq!(
            apply("/app/", true, &uri("/app/?redirect-to=%2Fapp%2F..%2Fadmin")),
            Redirect::To("/app/".to_string())
        );
    }

    #[test]
    fn test_consumed_without_target() {
        assert_eq!(
            apply("/app/", true, &uri("/login/")),
            Redirect::To("/app/".to_string())
        );
        assert_eq!(
            apply("/app/", true, &uri("/app/?redirect-to=")),
            Redirect::Pass
        );
    }

    #[test]
    fn test_redirect_is_idempotent() {
        let cases = [
            ("/login/", false, "/other"),
            ("/login/", false, "/"),
            ("/login/", false, "/deep/path?q=1"),
            ("/login/", false, "/login/"),
            ("/app/", true, "/login/?redirect-to=%2Fapp%2Fwidget"),
            ("/app/", true, "/app/?redirect-to=%2Fnot-app"),
            ("/app/", true, "/elsewhere"),
            ("/app/", true, "/app/widget"),
        ];
        for (prefix, consume, start) in cases {
            let (settled, again) = settle(prefix, consume, start);
            assert_eq!(again, Redirect::Pass, "{start} settled at {settled}");
            assert!(settled.starts_with(prefix));
        }
    }
}
