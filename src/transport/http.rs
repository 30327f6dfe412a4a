//! TCP HTTP client and the status-to-error taxonomy

use std::sync::LazyLock;
use std::time::Duration;

use regex::Regex;
use reqwest::Client;
use tracing::{debug, error, warn};
use url::Url;

use super::{HttpMethod, HttpRequest, HttpResponse};
use crate::{Error, Result};

/// HTTP client performing one request/response exchange per call.
pub struct HttpClient {
    client: Client,
}

impl HttpClient {
    /// Create a client. `timeout` caps every request that does not override
    /// its own.
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .tcp_nodelay(true)
            .build()
            .map_err(|e| Error::InvalidConfig(e.to_string()))?;
        Ok(Self { client })
    }

    /// Perform `request`, returning the response or the mapped error.
    ///
    /// HTTP statuses are read from the structured response and classified
    /// via [`classify_status`]; only transport-level failures (no status
    /// available) fall back to scraping the error text.
    pub async fn perform(&self, request: &HttpRequest) -> Result<HttpResponse> {
        if request.url.is_empty() {
            return Err(Error::NoUrlSupplied);
        }

        #[cfg(unix)]
        if let Some(socket) = &request.unix_socket_path {
            return super::unix::perform(request, socket).await;
        }
        #[cfg(not(unix))]
        if request.unix_socket_path.is_some() {
            return Err(Error::InvalidConfig(
                "unix sockets are not supported on this platform".to_string(),
            ));
        }

        // Parsing escapes the path component.
        let url = Url::parse(&request.url).map_err(|e| Error::InvalidConfig(e.to_string()))?;

        let mut builder = match request.method {
            HttpMethod::Get => self.client.get(url),
            HttpMethod::Post => self.client.post(url).body(request.body.clone()),
            HttpMethod::Put => self.client.put(url).body(request.body.clone()),
        };
        for (key, value) in &request.headers {
            let name: reqwest::header::HeaderName =
                key.parse().map_err(|_| Error::BadHeader)?;
            let value: reqwest::header::HeaderValue =
                value.parse().map_err(|_| Error::BadHeader)?;
            builder = builder.header(name, value);
        }
        builder = builder.timeout(request.timeout);

        let response = match builder.send().await {
            Ok(response) => response,
            Err(e) => {
                let mapped = status_from_error_text(&e.to_string());
                error!(error = %e, ?mapped, "HTTP request failed at transport level");
                return Err(mapped);
            }
        };

        let status = response.status().as_u16();
        classify_status(status)?;

        let headers = response
            .headers()
            .iter()
            .map(|(k, v)| {
                (
                    k.as_str().to_string(),
                    String::from_utf8_lossy(v.as_bytes()).into_owned(),
                )
            })
            .collect();
        let body = response
            .bytes()
            .await
            .map_err(|e| {
                debug!(error = %e, "failed reading response body");
                Error::BadStatusLine
            })?;

        Ok(HttpResponse {
            status_code: status,
            headers,
            body,
        })
    }
}

/// Map an HTTP status code onto the error taxonomy.
///
/// Statuses below 400 are success. 500, 501, 503 and unrecognized statuses
/// at 400 or above are retryable; the rest are terminal.
pub fn classify_status(status: u16) -> Result<()> {
    if status < 400 {
        return Ok(());
    }
    match status {
        400 => Err(Error::BadRequest),
        401 => Err(Error::Unauthorized),
        403 => Err(Error::Forbidden),
        404 => Err(Error::NotFound),
        408 => Err(Error::Timeout),
        409 => Err(Error::Conflict),
        412 => Err(Error::PreconditionFailed),
        429 => Err(Error::TooManyRequests),
        500 => Err(Error::ServerError),
        501 => Err(Error::NotImplemented),
        502 => Err(Error::BadGateway),
        503 => Err(Error::ServiceUnavailable),
        other => {
            warn!(status = other, "unrecognized HTTP status");
            Err(Error::OtherHttpStatus(other))
        }
    }
}

static STATUS_CODE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new("[0-9]{3}").expect("status code regex"));

/// Fallback for transport-level errors: scrape a three-digit status out of
/// the error text and classify it; with no status (or one that classifies
/// as success despite the failed exchange) the result is the retryable
/// [`Error::BadStatusLine`].
pub fn status_from_error_text(text: &str) -> Error {
    match STATUS_CODE
        .find(text)
        .and_then(|m| m.as_str().parse::<u16>().ok())
    {
        Some(code) => classify_status(code).err().unwrap_or(Error::BadStatusLine),
        None => {
            error!(text, "could not find HTTP status in transport error");
            Error::BadStatusLine
        }
    }
}
