// -------------------------------------------------------------------------------------------------
//  Copyright (c) Alpaca Rust Client Contributors
//  Licensed under the MIT License. See LICENSE in the repository root for details.
// -------------------------------------------------------------------------------------------------

//! A thin JSON-over-HTTPS client: URL composition, auth header selection, and response decoding.

use std::{sync::Arc, time::Duration};

use apca_net::http::{Headers, HttpRequest, HttpResponse, HttpTransport, Method, TlsConfig};
use bytes::Bytes;
use tracing::debug;

use crate::error::{Error, ErrorKind};

use super::query::build_url;

const USER_AGENT: &str = concat!("apca-rust/", env!("CARGO_PKG_VERSION"));

/// Credentials and headers a [`RestClient`] authenticates its requests with.
#[derive(Debug, Clone, Default)]
pub struct Credentials {
    /// API key identifier.
    pub api_key_id: String,
    /// API secret key.
    pub api_secret_key: String,
    /// OAuth bearer token.
    pub bearer_token: Option<String>,
}

/// A REST client bound to one base URL and credential set.
pub struct RestClient {
    transport: Arc<dyn HttpTransport>,
    base_url: String,
    credentials: Credentials,
    default_headers: Headers,
    timeout: Duration,
}

impl RestClient {
    /// Builds a client. Fails fast if `credentials` carries neither a key/secret pair, nor a
    /// bearer token, nor an `Authorization` entry in `default_headers`.
    pub fn new(
        transport: Arc<dyn HttpTransport>,
        base_url: impl Into<String>,
        credentials: Credentials,
        default_headers: Headers,
        timeout: Duration,
    ) -> Result<Self, Error> {
        let has_key_secret = !credentials.api_key_id.is_empty() && !credentials.api_secret_key.is_empty();
        let has_bearer = credentials.bearer_token.as_deref().is_some_and(|t| !t.is_empty());
        let has_authorization_header = default_headers.contains("Authorization");
        if !has_key_secret && !has_bearer && !has_authorization_header {
            return Err(Error::new(
                ErrorKind::RestClientConfigurationMissing,
                "REST client requires a key/secret pair, a bearer token, or an Authorization header",
            ));
        }

        Ok(Self {
            transport,
            base_url: base_url.into(),
            credentials,
            default_headers,
            timeout,
        })
    }

    fn build_headers(&self, body_present: bool) -> Headers {
        let mut headers = self.default_headers.clone();

        if !self.credentials.api_key_id.is_empty() && !self.credentials.api_secret_key.is_empty() {
            headers.set("APCA-API-KEY-ID", self.credentials.api_key_id.clone());
            headers.set("APCA-API-SECRET-KEY", self.credentials.api_secret_key.clone());
        } else if headers.contains("Authorization") {
            // pass through unchanged
        } else if let Some(token) = self.credentials.bearer_token.as_deref().filter(|t| !t.is_empty()) {
            headers.set("Authorization", format!("Bearer {token}"));
        }

        if !headers.contains("Accept") {
            headers.set("Accept", "application/json");
        }
        if !headers.contains("User-Agent") {
            headers.set("User-Agent", USER_AGENT);
        }
        if body_present && !headers.contains("Content-Type") {
            headers.set("Content-Type", "application/json");
        }
        headers
    }

    /// Issues a request and decodes the response. `body`, if present, is serialized as JSON.
    /// `< 400` with an empty body returns `Ok(None)`; `< 400` with a body is parsed into `T`; `>=
    /// 400` raises a classified [`Error`] carrying the response's status, body, and headers.
    pub async fn request<T>(
        &self,
        method: Method,
        path: &str,
        query: &[(&str, &str)],
        body: Option<&impl serde::Serialize>,
    ) -> Result<Option<T>, Error>
    where
        T: serde::de::DeserializeOwned,
    {
        let url = build_url(&self.base_url, path, query);
        let encoded_body = body
            .map(serde_json::to_vec)
            .transpose()
            .map_err(|e| Error::invalid_argument("body", e.to_string()))?
            .map(Bytes::from);

        let headers = self.build_headers(encoded_body.is_some());
        let request = HttpRequest {
            method,
            url,
            headers,
            body: encoded_body,
            timeout: Some(self.timeout),
            tls: TlsConfig::default(),
        };

        let response: HttpResponse = self.transport.send(request).await?;
        if !response.is_success() {
            let body_text = String::from_utf8_lossy(&response.body).into_owned();
            debug!(status = response.status, path, "REST request returned an error status");
            return Err(Error::from_response(response.status, &body_text, response.headers, None));
        }

        if response.body.is_empty() {
            return Ok(None);
        }

        let value = serde_json::from_slice(&response.body)
            .map_err(|e| Error::new(ErrorKind::ApiResponseError, format!("decoding response body: {e}")))?;
        Ok(Some(value))
    }

    /// Convenience for a bodyless `GET`.
    pub async fn get<T>(&self, path: &str, query: &[(&str, &str)]) -> Result<Option<T>, Error>
    where
        T: serde::de::DeserializeOwned,
    {
        self.request(Method::GET, path, query, None::<&()>).await
    }
}
