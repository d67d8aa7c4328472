//! Cookie transport for the token pair.
//!
//! Access and refresh tokens travel only in `HttpOnly`, `SameSite=Lax`
//! cookies; the CSRF token uses a third, script-readable cookie for the
//! double-submit check. Clearing is idempotent and always safe to call.

use axum::http::{
    HeaderMap, HeaderValue,
    header::{COOKIE, SET_COOKIE},
};
use tracing::error;

use super::state::AuthConfig;

pub(crate) const ACCESS_COOKIE: &str = "access_token";
pub(crate) const REFRESH_COOKIE: &str = "refresh_token";
pub(crate) const CSRF_COOKIE: &str = "csrf_token";

fn build_cookie(
    config: &AuthConfig,
    name: &str,
    value: &str,
    max_age_seconds: i64,
    http_only: bool,
) -> Option<HeaderValue> {
    let mut cookie = format!("{name}={value}; Path=/; SameSite=Lax; Max-Age={max_age_seconds}");
    if http_only {
        cookie.push_str("; HttpOnly");
    }
    if config.cookie_secure() {
        cookie.push_str("; Secure");
    }
    if let Some(domain) = config.cookie_domain() {
        cookie.push_str("; Domain=");
        cookie.push_str(domain);
    }
    match HeaderValue::from_str(&cookie) {
        Ok(value) => Some(value),
        Err(err) => {
            error!("Failed to build {name} cookie: {err}");
            None
        }
    }
}

fn append(headers: &mut HeaderMap, cookie: Option<HeaderValue>) {
    if let Some(cookie) = cookie {
        headers.append(SET_COOKIE, cookie);
    }
}

/// Attach a token pair and CSRF token to the response. `refresh` is absent
/// when rotation is disabled and the presented refresh cookie stays valid.
pub(crate) fn append_auth_cookies(
    headers: &mut HeaderMap,
    config: &AuthConfig,
    access: &str,
    refresh: Option<&str>,
    csrf: &str,
) {
    append(
        headers,
        build_cookie(
            config,
            ACCESS_COOKIE,
            access,
            config.access_ttl_seconds(),
            true,
        ),
    );
    if let Some(refresh) = refresh {
        append(
            headers,
            build_cookie(
                config,
                REFRESH_COOKIE,
                refresh,
                config.refresh_ttl_seconds(),
                true,
            ),
        );
    }
    // Readable by scripts so browser clients can echo it in X-CSRF-Token.
    append(
        headers,
        build_cookie(config, CSRF_COOKIE, csrf, config.refresh_ttl_seconds(), false),
    );
}

/// Expire all auth cookies. Safe to call whether or not they exist.
pub(crate) fn append_cleared_cookies(headers: &mut HeaderMap, config: &AuthConfig) {
    for (name, http_only) in [(ACCESS_COOKIE, true), (REFRESH_COOKIE, true), (CSRF_COOKIE, false)]
    {
        append(headers, build_cookie(config, name, "", 0, http_only));
    }
}

/// Extract a named cookie from the request headers.
pub(crate) fn extract_cookie(headers: &HeaderMap, name: &str) -> Option<String> {
    for header in headers.get_all(COOKIE) {
        let Ok(value) = header.to_str() else {
            continue;
        };
        for pair in value.split(';') {
            let mut parts = pair.trim().splitn(2, '=');
            let key = parts.next()?.trim();
            let val = parts.next().unwrap_or("").trim();
            if key == name && !val.is_empty() {
                return Some(val.to_string());
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::SecretString;

    fn config() -> AuthConfig {
        AuthConfig::new(
            "https://ledger.example.com".to_string(),
            SecretString::from("test-secret-key-at-least-32-bytes!"),
        )
    }

    /// Move Set-Cookie response headers onto a request Cookie header, the way
    /// a browser would on the next request.
    fn replay_cookies(response: &HeaderMap) -> HeaderMap {
        let pairs: Vec<String> = response
            .get_all(SET_COOKIE)
            .iter()
            .filter_map(|value| value.to_str().ok())
            .filter_map(|cookie| cookie.split(';').next())
            .map(str::to_string)
            .collect();
        let mut request = HeaderMap::new();
        if let Ok(value) = HeaderValue::from_str(&pairs.join("; ")) {
            request.insert(COOKIE, value);
        }
        request
    }

    #[test]
    fn attach_then_extract_round_trips() {
        let config = config();
        let mut response = HeaderMap::new();
        append_auth_cookies(&mut response, &config, "access.jwt", Some("refresh.jwt"), "csrf-1");

        let request = replay_cookies(&response);
        assert_eq!(
            extract_cookie(&request, ACCESS_COOKIE).as_deref(),
            Some("access.jwt")
        );
        assert_eq!(
            extract_cookie(&request, REFRESH_COOKIE).as_deref(),
            Some("refresh.jwt")
        );
        assert_eq!(extract_cookie(&request, CSRF_COOKIE).as_deref(), Some("csrf-1"));
    }

    #[test]
    fn token_cookies_are_http_only_and_secure() {
        let config = config();
        let mut response = HeaderMap::new();
        append_auth_cookies(&mut response, &config, "a", Some("r"), "c");

        let cookies: Vec<&str> = response
            .get_all(SET_COOKIE)
            .iter()
            .filter_map(|value| value.to_str().ok())
            .collect();
        assert_eq!(cookies.len(), 3);
        for cookie in &cookies {
            assert!(cookie.contains("SameSite=Lax"), "{cookie}");
            assert!(cookie.contains("Secure"), "{cookie}");
        }
        assert!(cookies[0].starts_with("access_token=") && cookies[0].contains("HttpOnly"));
        assert!(cookies[1].starts_with("refresh_token=") && cookies[1].contains("HttpOnly"));
        assert!(cookies[2].starts_with("csrf_token=") && !cookies[2].contains("HttpOnly"));
    }

    #[test]
    fn insecure_mode_drops_secure_flag() {
        let config = config().with_insecure_cookies(true);
        let mut response = HeaderMap::new();
        append_auth_cookies(&mut response, &config, "a", Some("r"), "c");

        for value in response.get_all(SET_COOKIE) {
            let cookie = value.to_str().expect("ascii cookie");
            assert!(!cookie.contains("Secure"), "{cookie}");
        }
    }

    #[test]
    fn cookie_domain_is_emitted_when_configured() {
        let config = config().with_cookie_domain(Some("ledger.example.com".to_string()));
        let mut response = HeaderMap::new();
        append_auth_cookies(&mut response, &config, "a", None, "c");

        for value in response.get_all(SET_COOKIE) {
            let cookie = value.to_str().expect("ascii cookie");
            assert!(cookie.contains("Domain=ledger.example.com"), "{cookie}");
        }
    }

    #[test]
    fn rotation_disabled_leaves_refresh_cookie_alone() {
        let config = config();
        let mut response = HeaderMap::new();
        append_auth_cookies(&mut response, &config, "a", None, "c");

        let names: Vec<&str> = response
            .get_all(SET_COOKIE)
            .iter()
            .filter_map(|value| value.to_str().ok())
            .filter_map(|cookie| cookie.split('=').next())
            .collect();
        assert_eq!(names, vec![ACCESS_COOKIE, CSRF_COOKIE]);
    }

    #[test]
    fn clear_is_idempotent() {
        let config = config();
        let mut first = HeaderMap::new();
        append_cleared_cookies(&mut first, &config);
        let mut second = HeaderMap::new();
        append_cleared_cookies(&mut second, &config);

        for headers in [&first, &second] {
            let cookies: Vec<&str> = headers
                .get_all(SET_COOKIE)
                .iter()
                .filter_map(|value| value.to_str().ok())
                .collect();
            assert_eq!(cookies.len(), 3);
            for cookie in cookies {
                assert!(cookie.contains("Max-Age=0"), "{cookie}");
            }
        }

        // A cleared cookie replayed onto a request yields no value.
        let request = replay_cookies(&first);
        assert_eq!(extract_cookie(&request, ACCESS_COOKIE), None);
        assert_eq!(extract_cookie(&request, REFRESH_COOKIE), None);
    }

    #[test]
    fn extract_ignores_other_cookies() {
        let mut request = HeaderMap::new();
        request.insert(
            COOKIE,
            HeaderValue::from_static("theme=dark; access_token=tok; locale=en"),
        );
        assert_eq!(extract_cookie(&request, ACCESS_COOKIE).as_deref(), Some("tok"));
        assert_eq!(extract_cookie(&request, REFRESH_COOKIE), None);
    }
}
