// -------------------------------------------------------------------------------------------------
//  Copyright (c) Alpaca Rust Client Contributors
//  Licensed under the MIT License. See LICENSE in the repository root for details.
// -------------------------------------------------------------------------------------------------

//! Credentials, TLS options, and the per-environment base URL set.

use std::{collections::HashMap, time::Duration};

/// Configuration options for communicating with Alpaca's REST and streaming APIs.
#[derive(Debug, Clone)]
pub struct Configuration {
    /// API key identifier assigned by Alpaca.
    pub api_key_id: String,
    /// Secret API key assigned by Alpaca.
    pub api_secret_key: String,
    /// Optional bearer token used for OAuth-style authentication.
    pub bearer_token: Option<String>,
    /// Additional headers appended to every HTTP request.
    pub default_headers: HashMap<String, String>,
    /// Enables TLS peer verification for HTTPS requests.
    pub verify_ssl: bool,
    /// Enables HTTPS hostname verification.
    pub verify_hostname: bool,
    /// Optional filesystem path to a bundle of trusted CA certificates.
    pub ca_bundle_path: Option<String>,
    /// Optional directory containing trusted CA certificates.
    pub ca_bundle_dir: Option<String>,
    /// Timeout applied to outgoing HTTP requests.
    pub timeout: Duration,

    /// Base URL for trading REST endpoints.
    pub trading_base_url: String,
    /// Base URL for market-data REST endpoints.
    pub data_base_url: String,
    /// Base URL for broker REST endpoints.
    pub broker_base_url: String,
    /// Base URL for trading streaming updates.
    pub trading_stream_url: String,
    /// Base URL for market-data streaming feeds (stocks SIP/IEX).
    pub market_data_stream_url: String,
    /// Base URL for crypto streaming feeds.
    pub crypto_stream_url: String,
    /// Base URL for options streaming feeds.
    pub options_stream_url: String,
}

impl Configuration {
    /// Builds a configuration for `environment`, with empty credentials and default TLS options.
    #[must_use]
    pub fn new(environment: Environment) -> Self {
        let urls = environment.urls();
        Self {
            api_key_id: String::new(),
            api_secret_key: String::new(),
            bearer_token: None,
            default_headers: HashMap::new(),
            verify_ssl: true,
            verify_hostname: true,
            ca_bundle_path: None,
            ca_bundle_dir: None,
            timeout: Duration::from_secs(30),
            trading_base_url: urls.trading,
            data_base_url: urls.data,
            broker_base_url: urls.broker,
            trading_stream_url: urls.trading_stream,
            market_data_stream_url: urls.market_data_stream,
            crypto_stream_url: urls.crypto_stream,
            options_stream_url: urls.options_stream,
        }
    }

    /// Sets the API key/secret pair.
    #[must_use]
    pub fn with_keys(mut self, key_id: impl Into<String>, secret_key: impl Into<String>) -> Self {
        self.api_key_id = key_id.into();
        self.api_secret_key = secret_key.into();
        self
    }

    /// Sets the OAuth bearer token.
    #[must_use]
    pub fn with_bearer_token(mut self, token: impl Into<String>) -> Self {
        self.bearer_token = Some(token.into());
        self
    }
}

impl Default for Configuration {
    fn default() -> Self {
        Self::new(Environment::Paper)
    }
}

struct EnvironmentUrls {
    trading: String,
    data: String,
    broker: String,
    trading_stream: String,
    market_data_stream: String,
    crypto_stream: String,
    options_stream: String,
}

/// A known deployment environment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Environment {
    /// Paper trading: simulated orders against live market data.
    Paper,
    /// Live trading against a funded account.
    Live,
}

impl Environment {
    /// This environment's canonical lowercase name.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Environment::Paper => "paper",
            Environment::Live => "live",
        }
    }

    fn urls(self) -> EnvironmentUrls {
        match self {
            Environment::Paper => EnvironmentUrls {
                trading: "https://paper-api.alpaca.markets".to_string(),
                data: "https://data.alpaca.markets/v2".to_string(),
                broker: "https://broker-api.sandbox.alpaca.markets".to_string(),
                trading_stream: "wss://paper-api.alpaca.markets/stream".to_string(),
                market_data_stream: "wss://stream.data.alpaca.markets/v2".to_string(),
                crypto_stream: "wss://stream.data.alpaca.markets/v1beta1/crypto".to_string(),
                options_stream: "wss://stream.data.alpaca.markets/v2/options".to_string(),
            },
            Environment::Live => EnvironmentUrls {
                trading: "https://api.alpaca.markets".to_string(),
                data: "https://data.alpaca.markets/v2".to_string(),
                broker: "https://broker-api.alpaca.markets".to_string(),
                trading_stream: "wss://api.alpaca.markets/stream".to_string(),
                market_data_stream: "wss://stream.data.alpaca.markets/v2".to_string(),
                crypto_stream: "wss://stream.data.alpaca.markets/v1beta1/crypto".to_string(),
                options_stream: "wss://stream.data.alpaca.markets/v2/options".to_string(),
            },
        }
    }
}
