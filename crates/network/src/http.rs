// -------------------------------------------------------------------------------------------------
//  Copyright (c) Alpaca Rust Client Contributors
//  Licensed under the MIT License. See LICENSE in the repository root for details.
// -------------------------------------------------------------------------------------------------

//! Generic HTTP transport: a single request/response operation, pluggable behind
//! [`HttpTransport`] so higher layers can substitute a recording fake in tests.

use std::{
    path::{Path, PathBuf},
    time::Duration,
};

use async_trait::async_trait;
use bytes::Bytes;
pub use reqwest::Method;

use crate::error::HttpClientError;

/// A case-insensitive, duplicate-preserving, order-preserving header multimap.
///
/// Lookups compare names case-insensitively; the casing supplied by the caller on insert is
/// preserved when the headers are emitted on the wire.
#[derive(Debug, Clone, Default)]
pub struct Headers {
    entries: Vec<(String, String)>,
}

impl Headers {
    /// Creates an empty header set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn index_of(&self, name: &str) -> Option<usize> {
        self.entries.iter().position(|(k, _)| k.eq_ignore_ascii_case(name))
    }

    /// Appends a header, preserving any existing entry with the same name.
    pub fn append(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.entries.push((name.into(), value.into()));
    }

    /// Replaces every entry matching `name` (case-insensitively) with a single entry carrying
    /// `value`, preserving the caller's casing of `name`. Inserts a new entry if absent.
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        let value = value.into();
        let mut replaced = false;
        self.entries.retain_mut(|(k, v)| {
            if k.eq_ignore_ascii_case(&name) {
                if replaced {
                    return false;
                }
                *k = name.clone();
                *v = value.clone();
                replaced = true;
            }
            true
        });
        if !replaced {
            self.entries.push((name, value));
        }
    }

    /// Returns the first value for `name`, if present.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Returns every value for `name`, in insertion order.
    #[must_use]
    pub fn get_all(&self, name: &str) -> Vec<&str> {
        self.entries
            .iter()
            .filter(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
            .collect()
    }

    /// Reports whether any entry matches `name` (case-insensitively).
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.index_of(name).is_some()
    }

    /// Removes every entry matching `name`, returning the number removed.
    pub fn remove(&mut self, name: &str) -> usize {
        let before = self.entries.len();
        self.entries.retain(|(k, _)| !k.eq_ignore_ascii_case(name));
        before - self.entries.len()
    }

    /// Iterates every `(name, value)` pair in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// The number of header entries (counting duplicates).
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether there are no header entries at all.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl From<Vec<(String, String)>> for Headers {
    fn from(entries: Vec<(String, String)>) -> Self {
        Self { entries }
    }
}

impl FromIterator<(String, String)> for Headers {
    fn from_iter<T: IntoIterator<Item = (String, String)>>(iter: T) -> Self {
        Self {
            entries: iter.into_iter().collect(),
        }
    }
}

/// TLS and redirect behavior for a request. Redirects are off by default because a blind
/// redirect follow can leak `Authorization`/API-key headers to an unintended host.
#[derive(Debug, Clone)]
pub struct TlsConfig {
    /// Verify the peer's certificate chain.
    pub verify_ssl: bool,
    /// Verify the peer's hostname against the certificate.
    pub verify_hostname: bool,
    /// Extra trusted CA bundle file (PEM), if any.
    pub ca_bundle_path: Option<PathBuf>,
    /// Directory of extra trusted CA certificates (PEM files), if any.
    pub ca_bundle_dir: Option<PathBuf>,
    /// Follow HTTP redirects. Off by default.
    pub follow_redirects: bool,
}

impl Default for TlsConfig {
    fn default() -> Self {
        Self {
            verify_ssl: true,
            verify_hostname: true,
            ca_bundle_path: None,
            ca_bundle_dir: None,
            follow_redirects: false,
        }
    }
}

/// A single HTTP request to execute.
#[derive(Debug, Clone)]
pub struct HttpRequest {
    /// HTTP method.
    pub method: Method,
    /// Fully composed URL.
    pub url: String,
    /// Request headers.
    pub headers: Headers,
    /// Optional request body.
    pub body: Option<Bytes>,
    /// Per-request timeout override.
    pub timeout: Option<Duration>,
    /// TLS/redirect settings for this request.
    pub tls: TlsConfig,
}

/// The result of executing an [`HttpRequest`].
#[derive(Debug, Clone)]
pub struct HttpResponse {
    /// HTTP status code.
    pub status: u16,
    /// Raw response body.
    pub body: Bytes,
    /// Response headers.
    pub headers: Headers,
}

impl HttpResponse {
    /// Whether the status indicates success (`< 400`).
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.status < 400
    }
}

/// The pluggable transport seam: anything that can turn a request into a response.
///
/// Production code uses [`HttpClient`]; tests substitute a recording fake that returns
/// pre-scripted responses without touching the network.
#[async_trait]
pub trait HttpTransport: Send + Sync {
    /// Executes `request`, returning the raw response or a transport-level failure.
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, HttpClientError>;
}

/// `reqwest`-backed [`HttpTransport`] implementation.
#[derive(Clone)]
pub struct HttpClient {
    inner: reqwest::Client,
}

impl HttpClient {
    /// Builds a client honoring `tls`'s verification and redirect settings.
    pub fn new(tls: &TlsConfig) -> Result<Self, HttpClientError> {
        let mut builder = reqwest::Client::builder()
            .danger_accept_invalid_certs(!tls.verify_ssl)
            .danger_accept_invalid_hostnames(!tls.verify_ssl && !tls.verify_hostname);

        builder = if tls.follow_redirects {
            builder.redirect(reqwest::redirect::Policy::limited(10))
        } else {
            builder.redirect(reqwest::redirect::Policy::none())
        };

        if let Some(path) = &tls.ca_bundle_path {
            builder = builder.add_root_certificate(load_pem_certificate(path)?);
        }
        if let Some(dir) = &tls.ca_bundle_dir {
            for cert in load_pem_certificates_from_dir(dir)? {
                builder = builder.add_root_certificate(cert);
            }
        }

        let inner = builder
            .build()
            .map_err(|e| HttpClientError::Build(e.to_string()))?;
        Ok(Self { inner })
    }
}

fn load_pem_certificate(path: &Path) -> Result<reqwest::Certificate, HttpClientError> {
    let bytes = std::fs::read(path)
        .map_err(|e| HttpClientError::Build(format!("reading CA bundle {}: {e}", path.display())))?;
    reqwest::Certificate::from_pem(&bytes)
        .map_err(|e| HttpClientError::Build(format!("parsing CA bundle {}: {e}", path.display())))
}

fn load_pem_certificates_from_dir(dir: &Path) -> Result<Vec<reqwest::Certificate>, HttpClientError> {
    let mut certs = Vec::new();
    let entries = std::fs::read_dir(dir)
        .map_err(|e| HttpClientError::Build(format!("reading CA directory {}: {e}", dir.display())))?;
    for entry in entries {
        let entry = entry.map_err(|e| HttpClientError::Build(e.to_string()))?;
        if entry.path().is_file() {
            certs.push(load_pem_certificate(&entry.path())?);
        }
    }
    Ok(certs)
}

#[async_trait]
impl HttpTransport for HttpClient {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, HttpClientError> {
        let mut builder = self.inner.request(request.method, &request.url);
        for (name, value) in request.headers.iter() {
            builder = builder.header(name, value);
        }
        if let Some(timeout) = request.timeout {
            builder = builder.timeout(timeout);
        }
        if let Some(body) = request.body {
            builder = builder.body(body);
        }

        let timeout = request.timeout;
        let response = builder.send().await.map_err(|e| {
            if e.is_timeout() {
                HttpClientError::Timeout(timeout.unwrap_or_default())
            } else {
                HttpClientError::Transport(e.to_string())
            }
        })?;

        let status = response.status().as_u16();
        let mut headers = Headers::new();
        for (name, value) in response.headers() {
            if let Ok(value) = value.to_str() {
                headers.append(name.as_str(), value);
            }
        }
        let body = response
            .bytes()
            .await
            .map_err(|e| HttpClientError::Transport(e.to_string()))?;

        Ok(HttpResponse { status, body, headers })
    }
}
