//! HTTP/1.1 exchange over a Unix domain socket
//!
//! reqwest has no Unix-socket connector, so this path writes the request
//! head and body directly and reads the response until the peer closes the
//! connection (`Connection: close` is always sent). Header lines go through
//! [`parse_header_line`]; malformed lines are skipped with a log, matching
//! the lenient behavior of the TCP path's underlying stack.

use std::path::Path;

use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::UnixStream;
use tracing::{error, warn};
use url::Url;

use super::http::classify_status;
use super::{HttpMethod, HttpRequest, HttpResponse, parse_header_line};
use crate::{Error, Result};

pub(super) async fn perform(request: &HttpRequest, socket: &Path) -> Result<HttpResponse> {
    let url = Url::parse(&request.url).map_err(|e| Error::InvalidConfig(e.to_string()))?;
    match tokio::time::timeout(request.timeout, exchange(request, &url, socket)).await {
        Ok(result) => result,
        Err(_) => {
            error!(socket = %socket.display(), "unix socket exchange timed out");
            Err(Error::BadStatusLine)
        }
    }
}

async fn exchange(request: &HttpRequest, url: &Url, socket: &Path) -> Result<HttpResponse> {
    let mut stream = UnixStream::connect(socket).await.map_err(|e| {
        error!(socket = %socket.display(), error = %e, "unix socket connect failed");
        Error::BadStatusLine
    })?;

    let method = match request.method {
        HttpMethod::Get => "GET",
        HttpMethod::Post => "POST",
        HttpMethod::Put => "PUT",
    };
    let mut target = url.path().to_string();
    if let Some(query) = url.query() {
        target.push('?');
        target.push_str(query);
    }

    let mut head = format!("{method} {target} HTTP/1.1\r\n");
    head.push_str(&format!("Host: {}\r\n", url.host_str().unwrap_or("localhost")));
    for (key, value) in &request.headers {
        head.push_str(&format!("{key}: {value}\r\n"));
    }
    if !matches!(request.method, HttpMethod::Get) {
        head.push_str(&format!("Content-Length: {}\r\n", request.body.len()));
    }
    head.push_str("Connection: close\r\n\r\n");

    stream.write_all(head.as_bytes()).await.map_err(write_err)?;
    if !request.body.is_empty() {
        stream.write_all(&request.body).await.map_err(write_err)?;
    }
    stream.flush().await.map_err(write_err)?;

    // Accumulate the raw response across partial reads; the buffer is
    // allocated on the first non-empty chunk.
    let mut raw: Option<BytesMut> = None;
    let mut chunk = [0u8; 8192];
    loop {
        let n = stream.read(&mut chunk).await.map_err(|e| {
            error!(error = %e, "unix socket read failed");
            Error::BadStatusLine
        })?;
        if n == 0 {
            break;
        }
        raw.get_or_insert_with(BytesMut::new)
            .extend_from_slice(&chunk[..n]);
    }

    parse_response(&raw.unwrap_or_default().freeze())
}

fn write_err(e: std::io::Error) -> Error {
    error!(error = %e, "unix socket write failed");
    Error::BadStatusLine
}

fn parse_response(raw: &[u8]) -> Result<HttpResponse> {
    let head_end = find_head_end(raw).ok_or(Error::BadStatusLine)?;
    let head = std::str::from_utf8(&raw[..head_end]).map_err(|_| Error::BadStatusLine)?;
    let mut lines = head.split("\r\n");

    let status_line = lines.next().ok_or(Error::BadStatusLine)?;
    let status_code: u16 = status_line
        .split_whitespace()
        .nth(1)
        .and_then(|code| code.parse().ok())
        .ok_or(Error::BadStatusLine)?;

    let mut headers = Vec::new();
    let mut chunked = false;
    let mut content_length: Option<usize> = None;
    for line in lines {
        match parse_header_line(&format!("{line}\r\n")) {
            Ok(Some((key, value))) => {
                if key.eq_ignore_ascii_case("transfer-encoding")
                    && value.to_ascii_lowercase().contains("chunked")
                {
                    chunked = true;
                }
                if key.eq_ignore_ascii_case("content-length") {
                    content_length = value.trim().parse().ok();
                }
                headers.push((key, value));
            }
            Ok(None) => {}
            Err(e) => warn!(line, error = %e, "skipping malformed header line"),
        }
    }

    classify_status(status_code)?;

    let raw_body = &raw[head_end + 4..];
    let body = if chunked {
        decode_chunked(raw_body)?
    } else {
        let len = content_length.unwrap_or(raw_body.len()).min(raw_body.len());
        Bytes::copy_from_slice(&raw_body[..len])
    };

    Ok(HttpResponse {
        status_code,
        headers,
        body,
    })
}

fn find_head_end(raw: &[u8]) -> Option<usize> {
    raw.windows(4).position(|w| w == b"\r\n\r\n")
}

fn decode_chunked(mut raw: &[u8]) -> Result<Bytes> {
    let mut body = BytesMut::new();
    loop {
        let line_end = find_crlf(raw).ok_or(Error::BadStatusLine)?;
        let size_line = std::str::from_utf8(&raw[..line_end]).map_err(|_| Error::BadStatusLine)?;
        let size = usize::from_str_radix(size_line.split(';').next().unwrap_or("").trim(), 16)
            .map_err(|_| Error::BadStatusLine)?;
        raw = &raw[line_end + 2..];
        if size == 0 {
            break;
        }
        if raw.len() < size {
            return Err(Error::BadStatusLine);
        }
        body.extend_from_slice(&raw[..size]);
        raw = raw.get(size + 2..).unwrap_or_default();
    }
    Ok(body.freeze())
}

fn find_crlf(raw: &[u8]) -> Option<usize> {
    raw.windows(2).position(|w| w == b"\r\n")
}
