// -------------------------------------------------------------------------------------------------
//  Copyright (c) Alpaca Rust Client Contributors
//  Licensed under the MIT License. See LICENSE in the repository root for details.
// -------------------------------------------------------------------------------------------------

//! PKCE pair generation, authorization URL assembly, and the Connect OAuth token client.

use std::{sync::Arc, time::Duration};

use apca_net::http::{Headers, HttpRequest, HttpTransport, Method, TlsConfig};
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use rand::Rng;
use sha2::{Digest, Sha256};
use tracing::warn;

use crate::{
    config::Configuration,
    error::{Error, ErrorKind},
    rest::append_query,
    value::Timestamp,
};

const CODE_VERIFIER_ALPHABET: &[u8] =
    b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789-._~";
const MIN_VERIFIER_LENGTH: usize = 43;
const MAX_VERIFIER_LENGTH: usize = 128;

/// A PKCE verifier/challenge pair.
#[derive(Debug, Clone)]
pub struct PkcePair {
    /// The random code verifier.
    pub verifier: String,
    /// `base64url(no padding)(SHA-256(verifier))`.
    pub challenge: String,
}

/// Generates a PKCE pair. `verifier_length` is clamped to `[43, 128]`.
#[must_use]
pub fn generate_pkce_pair(verifier_length: usize) -> PkcePair {
    let length = verifier_length.clamp(MIN_VERIFIER_LENGTH, MAX_VERIFIER_LENGTH);
    let mut rng = rand::thread_rng();
    let verifier: String = (0..length)
        .map(|_| CODE_VERIFIER_ALPHABET[rng.gen_range(0..CODE_VERIFIER_ALPHABET.len())] as char)
        .collect();

    let digest = Sha256::digest(verifier.as_bytes());
    let challenge = URL_SAFE_NO_PAD.encode(digest);

    PkcePair { verifier, challenge }
}

/// Parameters for building a user-facing authorization URL.
#[derive(Debug, Clone, Default)]
pub struct AuthorizationUrlRequest {
    /// The provider's authorization endpoint.
    pub authorize_endpoint: String,
    /// The registered OAuth client id.
    pub client_id: String,
    /// The redirect URI registered for this client.
    pub redirect_uri: String,
    /// The PKCE code challenge.
    pub code_challenge: String,
    /// Defaults to `"code"` when `None` is not supplied by the caller (callers pass `Some` to
    /// override, or leave unset to use the provider's default by omitting the parameter
    /// entirely via `response_type: None`).
    pub response_type: Option<String>,
    /// Requested scopes.
    pub scope: Option<String>,
    /// Opaque CSRF state.
    pub state: Option<String>,
    /// Provider-specific prompt hint.
    pub prompt: Option<String>,
    /// Broker-onboarding account id.
    pub broker_account_id: Option<String>,
    /// Additional caller-supplied query parameters, appended last.
    pub extra_query_params: Vec<(String, String)>,
}

/// Builds a user-facing authorization URL. Fails fast if any mandatory field is empty.
pub fn build_authorization_url(request: &AuthorizationUrlRequest) -> Result<String, Error> {
    if request.authorize_endpoint.is_empty() {
        return Err(Error::new(ErrorKind::OAuthConfigurationError, "authorize_endpoint must not be empty"));
    }
    if request.client_id.is_empty() {
        return Err(Error::new(ErrorKind::OAuthConfigurationError, "client_id must not be empty"));
    }
    if request.redirect_uri.is_empty() {
        return Err(Error::new(ErrorKind::OAuthConfigurationError, "redirect_uri must not be empty"));
    }
    if request.code_challenge.is_empty() {
        return Err(Error::new(ErrorKind::OAuthConfigurationError, "code_challenge must not be empty"));
    }

    let mut params: Vec<(&str, &str)> = vec![
        ("client_id", &request.client_id),
        ("redirect_uri", &request.redirect_uri),
        ("code_challenge", &request.code_challenge),
        ("code_challenge_method", "S256"),
    ];
    if let Some(response_type) = &request.response_type {
        params.push(("response_type", response_type));
    } else {
        params.push(("response_type", "code"));
    }
    if let Some(scope) = &request.scope {
        params.push(("scope", scope));
    }
    if let Some(state) = &request.state {
        params.push(("state", state));
    }
    if let Some(prompt) = &request.prompt {
        params.push(("prompt", prompt));
    }
    if let Some(broker_account_id) = &request.broker_account_id {
        params.push(("broker_account_id", broker_account_id));
    }
    for (key, value) in &request.extra_query_params {
        params.push((key, value));
    }

    Ok(append_query(&request.authorize_endpoint, &params))
}

/// The decoded token payload returned by the token endpoint.
#[derive(Debug, Clone)]
pub struct OAuthTokenResponse {
    /// The issued access token.
    pub access_token: String,
    /// Token type, defaulting to `"Bearer"`.
    pub token_type: String,
    /// Refresh token, if the provider issued one.
    pub refresh_token: Option<String>,
    /// Token lifetime in seconds, if the provider reported one.
    pub expires_in: Option<Duration>,
    /// Absolute expiry, derived as the moment the response was parsed plus `expires_in`.
    pub expires_at: Option<Timestamp>,
    /// Granted scope, if reported.
    pub scope: Option<String>,
}

impl OAuthTokenResponse {
    /// Clears any key/secret pair on `configuration` and installs this access token as its
    /// bearer token.
    pub fn apply(&self, configuration: &mut Configuration) {
        configuration.api_key_id.clear();
        configuration.api_secret_key.clear();
        configuration.bearer_token = Some(self.access_token.clone());
    }
}

/// Request payload for exchanging an authorization code for tokens.
#[derive(Debug, Clone, Default)]
pub struct AuthorizationCodeTokenRequest {
    /// The registered OAuth client id.
    pub client_id: String,
    /// The redirect URI used in the authorization request.
    pub redirect_uri: String,
    /// The authorization code returned by the provider.
    pub code: String,
    /// The PKCE verifier matching the challenge sent earlier.
    pub code_verifier: String,
    /// Confidential client secret, if required.
    pub client_secret: Option<String>,
}

/// Request payload for refreshing an access token.
#[derive(Debug, Clone, Default)]
pub struct RefreshTokenRequest {
    /// The registered OAuth client id.
    pub client_id: String,
    /// The previously issued refresh token.
    pub refresh_token: String,
    /// Confidential client secret, if required.
    pub client_secret: Option<String>,
}

/// Lightweight OAuth 2.0 client for a Connect-style token endpoint.
pub struct OAuthClient {
    token_endpoint: String,
    transport: Arc<dyn HttpTransport>,
    timeout: Duration,
    default_headers: Headers,
    tls: TlsConfig,
}

impl OAuthClient {
    /// Builds a client for `token_endpoint`. Fails fast if the endpoint is empty.
    pub fn new(token_endpoint: impl Into<String>, transport: Arc<dyn HttpTransport>) -> Result<Self, Error> {
        Self::with_options(token_endpoint, transport, Duration::from_secs(30), Headers::new(), TlsConfig::default())
    }

    /// Builds a client with explicit timeout, default headers, and TLS options.
    pub fn with_options(
        token_endpoint: impl Into<String>,
        transport: Arc<dyn HttpTransport>,
        timeout: Duration,
        default_headers: Headers,
        tls: TlsConfig,
    ) -> Result<Self, Error> {
        let token_endpoint = token_endpoint.into();
        if token_endpoint.is_empty() {
            return Err(Error::new(ErrorKind::OAuthConfigurationError, "token_endpoint must not be empty"));
        }
        Ok(Self { token_endpoint, transport, timeout, default_headers, tls })
    }

    /// Exchanges an authorization code for an access/refresh token pair.
    pub async fn exchange_authorization_code(
        &self,
        request: &AuthorizationCodeTokenRequest,
    ) -> Result<OAuthTokenResponse, Error> {
        if request.client_id.is_empty() {
            return Err(Error::new(ErrorKind::OAuthConfigurationError, "client_id must not be empty"));
        }
        if request.redirect_uri.is_empty() {
            return Err(Error::new(ErrorKind::OAuthConfigurationError, "redirect_uri must not be empty"));
        }
        if request.code.is_empty() {
            return Err(Error::new(ErrorKind::OAuthConfigurationError, "code must not be empty"));
        }
        if request.code_verifier.is_empty() {
            return Err(Error::new(ErrorKind::OAuthConfigurationError, "code_verifier must not be empty"));
        }

        let mut params = vec![
            ("grant_type", "authorization_code"),
            ("client_id", request.client_id.as_str()),
            ("redirect_uri", request.redirect_uri.as_str()),
            ("code", request.code.as_str()),
            ("code_verifier", request.code_verifier.as_str()),
        ];
        if let Some(secret) = &request.client_secret {
            params.push(("client_secret", secret));
        }

        self.post_form(&params).await
    }

    /// Exchanges a refresh token for a new access token.
    pub async fn refresh_access_token(&self, request: &RefreshTokenRequest) -> Result<OAuthTokenResponse, Error> {
        if request.client_id.is_empty() {
            return Err(Error::new(ErrorKind::OAuthConfigurationError, "client_id must not be empty"));
        }
        if request.refresh_token.is_empty() {
            return Err(Error::new(ErrorKind::OAuthConfigurationError, "refresh_token must not be empty"));
        }

        let mut params = vec![
            ("grant_type", "refresh_token"),
            ("client_id", request.client_id.as_str()),
            ("refresh_token", request.refresh_token.as_str()),
        ];
        if let Some(secret) = &request.client_secret {
            params.push(("client_secret", secret));
        }

        self.post_form(&params).await
    }

    async fn post_form(&self, params: &[(&str, &str)]) -> Result<OAuthTokenResponse, Error> {
        let body = serde_urlencoded::to_string(params)
            .map_err(|e| Error::new(ErrorKind::OAuthConfigurationError, e.to_string()))?;

        let mut headers = self.default_headers.clone();
        headers.set("Accept", "application/json");
        headers.set("Content-Type", "application/x-www-form-urlencoded");

        let request = HttpRequest {
            method: Method::POST,
            url: self.token_endpoint.clone(),
            headers,
            body: Some(bytes::Bytes::from(body)),
            timeout: Some(self.timeout),
            tls: self.tls.clone(),
        };

        let response = self.transport.send(request).await?;
        let body_text = String::from_utf8_lossy(&response.body).into_owned();

        if response.status >= 400 {
            warn!(status = response.status, "OAuth token request rejected");
            let error = Error::from_response(response.status, &body_text, response.headers, None);
            return Err(match extract_error_message(&body_text) {
                Some(message) => error.with_message(message),
                None => error,
            });
        }

        parse_token_response(&body_text)
    }
}

fn extract_error_message(body: &str) -> Option<String> {
    let value: serde_json::Value = serde_json::from_str(body).ok()?;
    value
        .get("error_description")
        .or_else(|| value.get("error"))
        .and_then(|v| v.as_str())
        .map(str::to_string)
}

fn parse_token_response(body: &str) -> Result<OAuthTokenResponse, Error> {
    let value: serde_json::Value = serde_json::from_str(body)
        .map_err(|_| Error::new(ErrorKind::ApiResponseError, "unable to parse OAuth token response"))?;

    let access_token = value
        .get("access_token")
        .and_then(|v| v.as_str())
        .ok_or_else(|| Error::new(ErrorKind::ApiResponseError, "OAuth response missing access_token"))?
        .to_string();

    let token_type = value.get("token_type").and_then(|v| v.as_str()).unwrap_or("Bearer").to_string();
    let refresh_token = value.get("refresh_token").and_then(|v| v.as_str()).map(str::to_string);
    let scope = value.get("scope").and_then(|v| v.as_str()).map(str::to_string);
    let expires_in = value
        .get("expires_in")
        .and_then(serde_json::Value::as_i64)
        .filter(|seconds| *seconds > 0)
        .map(|seconds| Duration::from_secs(seconds as u64));
    let expires_at = expires_in.map(|duration| Timestamp::now().add_duration(duration));

    Ok(OAuthTokenResponse { access_token, token_type, refresh_token, expires_in, expires_at, scope })
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use tokio::sync::Mutex;

    use super::*;
    use apca_net::{http::HttpResponse, HttpClientError};

    #[test]
    fn pkce_pair_verifier_is_clamped_and_challenge_is_derived() {
        let pair = generate_pkce_pair(10);
        assert_eq!(pair.verifier.len(), MIN_VERIFIER_LENGTH);
        let digest = Sha256::digest(pair.verifier.as_bytes());
        assert_eq!(pair.challenge, URL_SAFE_NO_PAD.encode(digest));

        let pair = generate_pkce_pair(1000);
        assert_eq!(pair.verifier.len(), MAX_VERIFIER_LENGTH);
    }

    #[test]
    fn authorization_url_includes_mandatory_and_optional_params() {
        let request = AuthorizationUrlRequest {
            authorize_endpoint: "https://app.alpaca.markets/oauth/authorize".to_string(),
            client_id: "client".to_string(),
            redirect_uri: "https://example.com/callback".to_string(),
            code_challenge: "challenge".to_string(),
            scope: Some("trading".to_string()),
            ..Default::default()
        };
        let url = build_authorization_url(&request).unwrap();
        assert!(url.starts_with("https://app.alpaca.markets/oauth/authorize?"));
        assert!(url.contains("client_id=client"));
        assert!(url.contains("code_challenge_method=S256"));
        assert!(url.contains("scope=trading"));
    }

    #[test]
    fn authorization_url_rejects_empty_mandatory_fields() {
        let request = AuthorizationUrlRequest::default();
        assert!(build_authorization_url(&request).is_err());
    }

    struct RecordingTransport {
        response: Mutex<Option<HttpResponse>>,
    }

    #[async_trait]
    impl HttpTransport for RecordingTransport {
        async fn send(&self, _request: HttpRequest) -> Result<HttpResponse, HttpClientError> {
            Ok(self.response.lock().await.take().unwrap())
        }
    }

    #[tokio::test]
    async fn exchange_authorization_code_parses_token_response() {
        let transport = Arc::new(RecordingTransport {
            response: Mutex::new(Some(HttpResponse {
                status: 200,
                body: bytes::Bytes::from(r#"{"access_token":"tok","expires_in":3600}"#),
                headers: Headers::new(),
            })),
        });
        let client = OAuthClient::new("https://broker-api.alpaca.markets/oauth/token", transport).unwrap();

        let response = client
            .exchange_authorization_code(&AuthorizationCodeTokenRequest {
                client_id: "client".to_string(),
                redirect_uri: "https://example.com".to_string(),
                code: "code".to_string(),
                code_verifier: "verifier".to_string(),
                client_secret: None,
            })
            .await
            .unwrap();

        assert_eq!(response.access_token, "tok");
        assert_eq!(response.token_type, "Bearer");
        assert_eq!(response.expires_in, Some(Duration::from_secs(3600)));
        assert!(response.expires_at.is_some_and(|at| at > Timestamp::now()));
    }

    #[test]
    fn parse_token_response_omits_expires_at_without_expires_in() {
        let response = parse_token_response(r#"{"access_token":"tok"}"#).unwrap();
        assert_eq!(response.expires_in, None);
        assert_eq!(response.expires_at, None);
    }

    #[tokio::test]
    async fn error_response_prefers_error_description() {
        let transport = Arc::new(RecordingTransport {
            response: Mutex::new(Some(HttpResponse {
                status: 400,
                body: bytes::Bytes::from(r#"{"error":"invalid_grant","error_description":"code expired"}"#),
                headers: Headers::new(),
            })),
        });
        let client = OAuthClient::new("https://broker-api.alpaca.markets/oauth/token", transport).unwrap();

        let err = client
            .refresh_access_token(&RefreshTokenRequest {
                client_id: "client".to_string(),
                refresh_token: "stale".to_string(),
                client_secret: None,
            })
            .await
            .unwrap_err();
        assert_eq!(err.message(), "code expired");
    }

    #[test]
    fn apply_clears_key_secret_and_installs_bearer_token() {
        let mut config = Configuration::new(crate::config::Environment::Paper).with_keys("key", "secret");
        let token = OAuthTokenResponse {
            access_token: "tok".to_string(),
            token_type: "Bearer".to_string(),
            refresh_token: None,
            expires_in: None,
            expires_at: None,
            scope: None,
        };
        token.apply(&mut config);
        assert!(config.api_key_id.is_empty());
        assert!(config.api_secret_key.is_empty());
        assert_eq!(config.bearer_token.as_deref(), Some("tok"));
    }
}
