//! Browser-like request headers for direct page requests

use reqwest::header::{
    ACCEPT, ACCEPT_LANGUAGE, CACHE_CONTROL, DNT, HeaderMap, HeaderName, HeaderValue,
    InvalidHeaderValue, REFERER, UPGRADE_INSECURE_REQUESTS, USER_AGENT,
};

const ACCEPT_HTML: &str = "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8";
const ACCEPT_LANGUAGE_VALUE: &str = "en-US,en;q=0.5";

const SEC_FETCH_DEST: HeaderName = HeaderName::from_static("sec-fetch-dest");
const SEC_FETCH_MODE: HeaderName = HeaderName::from_static("sec-fetch-mode");
const SEC_FETCH_SITE: HeaderName = HeaderName::from_static("sec-fetch-site");
const SEC_FETCH_USER: HeaderName = HeaderName::from_static("sec-fetch-user");

/// Headers of a top-level navigation in desktop Chrome.
///
/// Accept-Encoding is left to the client, which negotiates and decodes
/// gzip, brotli and deflate on its own.
///
/// # Errors
///
/// - `InvalidHeaderValue` - If `user_agent` or `referer` contain bytes not allowed in headers
pub fn browser_headers(user_agent: &str, referer: &str) -> Result<HeaderMap, InvalidHeaderValue> {
    let mut headers = HeaderMap::with_capacity(11);

    headers.insert(USER_AGENT, HeaderValue::from_str(user_agent)?);
    headers.insert(ACCEPT, HeaderValue::from_static(ACCEPT_HTML));
    headers.insert(ACCEPT_LANGUAGE, HeaderValue::from_static(ACCEPT_LANGUAGE_VALUE));
    headers.insert(REFERER, HeaderValue::from_str(referer)?);
    headers.insert(DNT, HeaderValue::from_static("1"));
    headers.insert(UPGRADE_INSECURE_REQUESTS, HeaderValue::from_static("1"));
    headers.insert(SEC_FETCH_DEST, HeaderValue::from_static("document"));
    headers.insert(SEC_FETCH_MODE, HeaderValue::from_static("navigate"));
    headers.insert(SEC_FETCH_SITE, HeaderValue::from_static("none"));
    headers.insert(SEC_FETCH_USER, HeaderValue::from_static("?1"));
    headers.insert(CACHE_CONTROL, HeaderValue::from_static("max-age=0"));

    Ok(headers)
}
