//! Response construction helpers

use bytes::Bytes;
use http_body_util::Full;
use hyper::header::{self, HeaderName, HeaderValue};
use hyper::{Response, StatusCode};
use serde_json::Value;
use tracing::warn;

pub const NO_CACHE: &str = "no-cache, no-store";

/// Build a response, skipping header values that are not valid header text
pub fn respond(
    status: StatusCode,
    headers: &[(HeaderName, &str)],
    body: impl Into<Bytes>,
) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(body.into()));
    *response.status_mut() = status;
    for (name, value) in headers {
        match HeaderValue::from_str(value) {
            Ok(value) => {
                response.headers_mut().append(name.clone(), value);
            }
            Err(_) => warn!("Dropping invalid {} header value", name),
        }
    }
    response
}

pub fn text_response(status: StatusCode, body: &'static str) -> Response<Full<Bytes>> {
    respond(
        status,
        &[(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
        body,
    )
}

pub fn json_response(status: StatusCode, body: &Value) -> Response<Full<Bytes>> {
    respond(
        status,
        &[(header::CONTENT_TYPE, "application/json")],
        body.to_string(),
    )
}

/// Mark a response as depending on the session it was served for
pub fn no_cache(mut response: Response<Full<Bytes>>) -> Response<Full<Bytes>> {
    response
        .headers_mut()
        .insert(header::CACHE_CONTROL, HeaderValue::from_static(NO_CACHE));
    response
}

/// Content type for a resource path, by extension
pub fn content_type_for(path: &str) -> &'static str {
    let extension = path
        .rsplit('/')
        .next()
        .and_then(|file| file.rsplit_once('.'))
        .map(|(_, ext)| ext.to_ascii_lowercase());

    match extension.as_deref() {
        Some("html") | Some("htm") => "text/html",
        Some("js") => "text/javascript",
        Some("css") => "text/css",
        Some("json") => "application/json",
        Some("svg") => "image/svg+xml",
        Some("png") => "image/png",
        Some("woff2") => "font/woff2",
        Some("txt") => "text/plain",
        _ => "application/octet-stream",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_header_dropped() {
        let response = respond(
            StatusCode::OK,
            &[
                (header::SET_COOKIE, "bad\nvalue"),
                (header::CONTENT_TYPE, "text/plain"),
            ],
            "ok",
        );
        assert!(response.headers().get(header::SET_COOKIE).is_none());
        assert_eq!(response.headers()[header::CONTENT_TYPE], "text/plain");
    }

    #[test]
    fn test_no_cache() {
        let response = no_cache(text_response(StatusCode::OK, "x"));
        assert_eq!(response.headers()[header::CACHE_CONTROL], NO_CACHE);
    }

    #[test]
    fn test_content_types() {
        assert_eq!(content_type_for("/shell/index.html"), "text/html");
        assert_eq!(content_type_for("/system/app.JS"), "text/javascript");
        assert_eq!(content_type_for("/dir.d/noext"), "application/octet-stream");
    }
}
