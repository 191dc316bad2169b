//! Credential extraction for the `/ws` upgrade (§6).
//!
//! Precedence for a bearer-style token is cookie, then `Authorization:
//! Bearer`, then a `token=` URL parameter. The password-based upgrade
//! instead reads a `password=` URL parameter and matches it against the
//! two process-wide shared secrets (`Coordinator::authenticate_password`).
//! Both mechanisms resolve to the same credential string; `password=`
//! is tried last so a client that sends both is resolved by the more
//! specific field.

use axum::http::HeaderMap;
use axum_extra::extract::CookieJar;

use crate::config::AppConfig;

#[derive(Debug, serde::Deserialize, Default)]
pub struct WsAuthParams {
    pub token: Option<String>,
    pub password: Option<String>,
}

/// Resolve the single credential string this connection presented, per
/// the precedence order above. `None` means no credential was supplied
/// at all (distinct from "supplied but wrong", which the caller learns
/// from `Coordinator::authenticate_password` returning `None`).
pub fn extract_credential(
    config: &AppConfig,
    cookies: &CookieJar,
    headers: &HeaderMap,
    params: &WsAuthParams,
) -> Option<String> {
    if let Some(cookie) = cookies.get(&config.auth.session_cookie) {
        return Some(cookie.value().to_string());
    }
    if let Some(value) = headers.get(axum::http::header::AUTHORIZATION) {
        if let Ok(s) = value.to_str() {
            if let Some(token) = s.strip_prefix("Bearer ") {
                return Some(token.to_string());
            }
        }
    }
    if let Some(token) = &params.token {
        return Some(token.clone());
    }
    params.password.clone()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bearer_header_wins_over_query_token() {
        let config = AppConfig::default();
        let cookies = CookieJar::new();
        let mut headers = HeaderMap::new();
        headers.insert(axum::http::header::AUTHORIZATION, "Bearer abc".parse().unwrap());
        let params = WsAuthParams { token: Some("xyz".into()), password: None };
        assert_eq!(extract_credential(&config, &cookies, &headers, &params), Some("abc".to_string()));
    }

    #[test]
    fn falls_back_to_password_param() {
        let config = AppConfig::default();
        let cookies = CookieJar::new();
        let headers = HeaderMap::new();
        let params = WsAuthParams { token: None, password: Some("admin".into()) };
        assert_eq!(extract_credential(&config, &cookies, &headers, &params), Some("admin".to_string()));
    }

    #[test]
    fn no_credential_is_none() {
        let config = AppConfig::default();
        let cookies = CookieJar::new();
        let headers = HeaderMap::new();
        let params = WsAuthParams::default();
        assert_eq!(extract_credential(&config, &cookies, &headers, &params), None);
    }
}
