//! HTTP delegate performing the wire authorization
//!
//! Builds a POST to the configured endpoint, hands header preparation and
//! response parsing to an [`AuthInterceptor`], and finishes the context
//! from the tokio worker that completed the exchange.

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tracing::error;
use url::Url;

use super::{
    AuthContext, AuthorizationMetadata, AuthorizationResponse, AuthorizeDelegate,
    AuthorizedMetadata,
};
use crate::transport::{HttpClient, HttpMethod, HttpRequest, HttpResponse};
use crate::{Error, Result};

/// Wire-format hooks of the authorization exchange.
///
/// Implementations translate caller credentials into request headers and
/// the endpoint's response into an [`AuthorizedMetadata`].
pub trait AuthInterceptor: Send + Sync + 'static {
    /// Attach the credential to the outgoing request.
    fn prepare_request(
        &self,
        metadata: &AuthorizationMetadata,
        request: &mut HttpRequest,
    ) -> Result<()>;

    /// Extract the authorization verdict from a successful response.
    fn authorized_metadata_from_response(
        &self,
        metadata: &AuthorizationMetadata,
        response: &HttpResponse,
    ) -> Result<AuthorizedMetadata>;
}

/// [`AuthorizeDelegate`] speaking HTTP to the authorization endpoint.
pub struct HttpAuthorizationDelegate {
    endpoint: Url,
    client: Arc<HttpClient>,
    interceptor: Arc<dyn AuthInterceptor>,
    timeout: Duration,
}

impl HttpAuthorizationDelegate {
    /// Create a delegate for `endpoint_uri`.
    ///
    /// The URI is parsed once, here; an unparsable URI is a configuration
    /// error.
    pub fn new(
        endpoint_uri: &str,
        client: Arc<HttpClient>,
        interceptor: Arc<dyn AuthInterceptor>,
        timeout: Duration,
    ) -> Result<Self> {
        let endpoint = Url::parse(endpoint_uri).map_err(|e| {
            error!(error = %e, "failed to parse authorization endpoint URI");
            Error::InvalidConfig(format!("authorization endpoint URI: {e}"))
        })?;
        Ok(Self {
            endpoint,
            client,
            interceptor,
            timeout,
        })
    }
}

impl AuthorizeDelegate for HttpAuthorizationDelegate {
    fn authorize_internal(&self, context: Arc<AuthContext>) -> Result<()> {
        let mut request = HttpRequest::new(HttpMethod::Post, self.endpoint.as_str());
        request.timeout = self.timeout;
        if let Err(e) = self
            .interceptor
            .prepare_request(&context.request.authorization_metadata, &mut request)
        {
            error!(error = %e, "failed adding headers to authorization request");
            return Err(Error::BadRequest);
        }

        let client = Arc::clone(&self.client);
        let interceptor = Arc::clone(&self.interceptor);
        tokio::spawn(async move {
            let metadata = &context.request.authorization_metadata;
            match client.perform(&request).await {
                // Transport-level failure: the endpoint never answered.
                Err(Error::BadStatusLine) => context.finish(Err(Error::RemoteUnavailable)),
                Err(e) => context.finish(Err(e)),
                Ok(response) => {
                    match interceptor.authorized_metadata_from_response(metadata, &response) {
                        Err(e) => context.finish(Err(e)),
                        Ok(authorized_metadata) => {
                            context.set_response(AuthorizationResponse {
                                authorized_metadata,
                            });
                            context.finish(Ok(()));
                        }
                    }
                }
            }
        });
        Ok(())
    }
}

/// Claimed-identity header attached to authorization requests.
pub const CLAIMED_IDENTITY_HEADER: &str = "x-auth-claimed-identity";
/// Token header attached to authorization requests.
pub const AUTHORIZATION_TOKEN_HEADER: &str = "x-auth-token";
/// Response field carrying the authorized domain.
const AUTHORIZED_DOMAIN_FIELD: &str = "authorizedDomain";

/// Default interceptor: credentials travel as two request headers, the
/// verdict comes back as a JSON object with an `authorizedDomain` field.
#[derive(Debug, Default, Clone, Copy)]
pub struct TokenAuthInterceptor;

impl AuthInterceptor for TokenAuthInterceptor {
    fn prepare_request(
        &self,
        metadata: &AuthorizationMetadata,
        request: &mut HttpRequest,
    ) -> Result<()> {
        request.headers.push((
            CLAIMED_IDENTITY_HEADER.to_string(),
            metadata.claimed_identity.clone(),
        ));
        request.headers.push((
            AUTHORIZATION_TOKEN_HEADER.to_string(),
            metadata.authorization_token.clone(),
        ));
        Ok(())
    }

    fn authorized_metadata_from_response(
        &self,
        _metadata: &AuthorizationMetadata,
        response: &HttpResponse,
    ) -> Result<AuthorizedMetadata> {
        let body: Value = serde_json::from_slice(&response.body)
            .map_err(|e| Error::InvalidJson(e.to_string()))?;
        let authorized_domain = body
            .get(AUTHORIZED_DOMAIN_FIELD)
            .and_then(Value::as_str)
            .ok_or_else(|| Error::InvalidJson(format!("missing {AUTHORIZED_DOMAIN_FIELD}")))?
            .to_string();
        Ok(AuthorizedMetadata { authorized_domain })
    }
}
