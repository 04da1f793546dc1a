//! Request signing with a shared access-key secret.
//!
//! `Authorization: Apollo {appId}:{signature}` plus `Timestamp: {millis}`, where
//! the signature is base64(HMAC-SHA1(secret, "{timestamp}\n{METHOD}\n{pathWithQuery}")).

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use hmac::Hmac;
use hmac::Mac;
use sha1::Sha1;
use url::Url;

use crate::constants::AUTHORIZATION_FORMAT_PREFIX;
use crate::constants::HTTP_HEADER_AUTHORIZATION;
use crate::constants::HTTP_HEADER_TIMESTAMP;
use crate::time::get_now_as_u64_ms;
use crate::NetworkError;
use crate::Result;

type HmacSha1 = Hmac<Sha1>;

const DELIMITER: &str = "\n";

pub fn signature(
    timestamp: u64,
    method: &str,
    path_with_query: &str,
    secret: &str,
) -> Result<String> {
    let string_to_sign = format!("{timestamp}{DELIMITER}{method}{DELIMITER}{path_with_query}");
    let mut mac = HmacSha1::new_from_slice(secret.as_bytes())
        .map_err(|e| crate::config::invalid(format!("access key secret rejected: {e}")))?;
    mac.update(string_to_sign.as_bytes());
    Ok(STANDARD.encode(mac.finalize().into_bytes()))
}

/// Path plus query string of `url`, the part covered by the signature.
pub(crate) fn path_with_query(url: &str) -> Result<String> {
    let parsed = Url::parse(url).map_err(|e| NetworkError::InvalidUrl(format!("{url}: {e}")))?;
    Ok(match parsed.query() {
        Some(query) => format!("{}?{}", parsed.path(), query),
        None => parsed.path().to_string(),
    })
}

pub fn build_http_headers(
    url: &str,
    app_id: &str,
    secret: &str,
) -> Result<Vec<(String, String)>> {
    build_http_headers_at(url, app_id, secret, get_now_as_u64_ms())
}

pub(crate) fn build_http_headers_at(
    url: &str,
    app_id: &str,
    secret: &str,
    timestamp: u64,
) -> Result<Vec<(String, String)>> {
    let signature = signature(timestamp, "GET", &path_with_query(url)?, secret)?;
    Ok(vec![
        (
            HTTP_HEADER_AUTHORIZATION.to_string(),
            format!("{AUTHORIZATION_FORMAT_PREFIX} {app_id}:{signature}"),
        ),
        (HTTP_HEADER_TIMESTAMP.to_string(), timestamp.to_string()),
    ])
}

/// Signature headers when a secret is configured, nothing otherwise.
pub(crate) fn signed_headers(
    url: &str,
    app_id: &str,
    secret: Option<&str>,
) -> Result<Vec<(String, String)>> {
    match secret.filter(|s| !s.trim().is_empty()) {
        Some(secret) => build_http_headers(url, app_id, secret),
        None => Ok(Vec::new()),
    }
}
