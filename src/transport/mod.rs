//! HTTP transport adapter
//!
//! One request/response exchange per call. TCP targets go through reqwest
//! and read the status from its structured API; Unix-socket targets speak
//! HTTP/1.1 directly over the stream and use the raw header-line parser in
//! this module. Both paths share the status-to-error taxonomy in
//! [`http::classify_status`].

mod http;
#[cfg(unix)]
mod unix;

use std::sync::LazyLock;
use std::time::Duration;

use bytes::Bytes;
use regex::Regex;

pub use http::{HttpClient, classify_status, status_from_error_text};

use crate::{Error, Result};

/// Default per-request timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

/// Supported request methods.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpMethod {
    /// HTTP GET
    Get,
    /// HTTP POST
    Post,
    /// HTTP PUT (body uploads from an in-memory buffer)
    Put,
}

/// A single outbound HTTP request.
#[derive(Debug, Clone)]
pub struct HttpRequest {
    /// Request method.
    pub method: HttpMethod,
    /// Absolute URL; the path component is percent-escaped before dispatch.
    pub url: String,
    /// Request headers, in insertion order.
    pub headers: Vec<(String, String)>,
    /// Request body (empty for GET).
    pub body: Bytes,
    /// When set, the request is exchanged over this Unix socket instead of
    /// TCP. Unix targets only.
    pub unix_socket_path: Option<std::path::PathBuf>,
    /// Per-request timeout.
    pub timeout: Duration,
}

impl HttpRequest {
    /// A request with no headers, no body, and the default timeout.
    pub fn new(method: HttpMethod, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            headers: Vec::new(),
            body: Bytes::new(),
            unix_socket_path: None,
            timeout: DEFAULT_TIMEOUT,
        }
    }

    /// Append a header.
    #[must_use]
    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((key.into(), value.into()));
        self
    }

    /// Set the body.
    #[must_use]
    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }
}

/// A received HTTP response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    /// Status code of the response.
    pub status_code: u16,
    /// Response headers as received. Keys are not unique-enforced; duplicate
    /// header lines produce duplicate entries.
    pub headers: Vec<(String, String)>,
    /// Response body.
    pub body: Bytes,
}

static STATUS_LINE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new("HTTP.*[0-9]{3}").expect("status line regex"));

/// Parse one received header line into a `(key, value)` pair.
///
/// Returns `Ok(None)` for lines that carry no header: empty CRLF-only lines
/// and the HTTP status line. Header keys are kept case-sensitive as
/// received; exactly one space after the colon is trimmed from the value.
///
/// # Errors
///
/// [`Error::BadHeader`] when the line has no colon, or its first colon
/// falls after the first carriage return.
pub fn parse_header_line(line: &str) -> Result<Option<(String, String)>> {
    if line.len() <= 2 {
        // Empty field line (i.e. "\r\n") - skip.
        return Ok(None);
    }
    if STATUS_LINE.is_match(line) {
        // The line is just the HTTP status line.
        return Ok(None);
    }

    let contents_end = line.find('\r').unwrap_or(line.len());
    let Some(colon_index) = line.find(':') else {
        return Err(Error::BadHeader);
    };
    if colon_index > contents_end {
        return Err(Error::BadHeader);
    }

    let mut value_index = colon_index + 1;
    if line.as_bytes().get(value_index) == Some(&b' ') {
        value_index += 1;
    }
    let value = line.get(value_index..contents_end).unwrap_or_default();
    Ok(Some((line[..colon_index].to_string(), value.to_string())))
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn parses_plain_header() {
        let parsed = parse_header_line("Content-Type: application/json\r\n").unwrap();
        assert_eq!(
            parsed,
            Some(("Content-Type".to_string(), "application/json".to_string()))
        );
    }

    #[test]
    fn trims_exactly_one_space_after_colon() {
        let parsed = parse_header_line("X-Key:  two-spaces\r\n").unwrap();
        assert_eq!(parsed, Some(("X-Key".to_string(), " two-spaces".to_string())));

        let parsed = parse_header_line("X-Key:no-space\r\n").unwrap();
        assert_eq!(parsed, Some(("X-Key".to_string(), "no-space".to_string())));
    }

    #[test]
    fn skips_crlf_only_lines() {
        assert_eq!(parse_header_line("\r\n").unwrap(), None);
        assert_eq!(parse_header_line("").unwrap(), None);
    }

    #[test]
    fn skips_status_line() {
        assert_eq!(parse_header_line("HTTP/1.1 200 OK\r\n").unwrap(), None);
        assert_eq!(parse_header_line("HTTP/2 404\r\n").unwrap(), None);
    }

    #[test]
    fn rejects_line_without_colon() {
        assert_eq!(
            parse_header_line("no colon in here at all\r\n"),
            Err(Error::BadHeader)
        );
    }

    #[test]
    fn rejects_colon_after_carriage_return() {
        assert_eq!(
            parse_header_line("badheader\r\n: value"),
            Err(Error::BadHeader)
        );
    }

    #[test]
    fn keys_stay_case_sensitive() {
        let parsed = parse_header_line("X-MiXeD-CaSe: v\r\n").unwrap();
        assert_eq!(parsed.unwrap().0, "X-MiXeD-CaSe");
    }

    #[test]
    fn parsing_is_idempotent() {
        // Feeding the same line twice yields two identical entries; the
        // parser does not deduplicate keys.
        let line = "Set-Cookie: a=1\r\n";
        let first = parse_header_line(line).unwrap();
        let second = parse_header_line(line).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn header_without_carriage_return_is_accepted() {
        let parsed = parse_header_line("X-Raw: bare-line").unwrap();
        assert_eq!(parsed, Some(("X-Raw".to_string(), "bare-line".to_string())));
    }

    #[test]
    fn empty_value_is_preserved() {
        let parsed = parse_header_line("X-Empty:\r\n").unwrap();
        assert_eq!(parsed, Some(("X-Empty".to_string(), String::new())));
    }
}
