// -------------------------------------------------------------------------------------------------
//  Copyright (c) Alpaca Rust Client Contributors
//  Licensed under the MIT License. See LICENSE in the repository root for details.
// -------------------------------------------------------------------------------------------------

//! RFC-3986 unreserved-character percent-encoding for query strings.

const UNRESERVED: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789-_.~";

fn percent_encode(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for byte in value.as_bytes() {
        if UNRESERVED.contains(byte) {
            out.push(*byte as char);
        } else {
            out.push('%');
            out.push_str(&format!("{byte:02X}"));
        }
    }
    out
}

/// Encodes `params` as a `key=value&key=value` query string, each component percent-encoded per
/// the unreserved-character set (ALPHA/DIGIT/`-`/`_`/`.`/`~`). Returns `None` if `params` is
/// empty.
#[must_use]
pub fn encode_query(params: &[(&str, &str)]) -> Option<String> {
    if params.is_empty() {
        return None;
    }
    let encoded: Vec<String> = params
        .iter()
        .map(|(key, value)| format!("{}={}", percent_encode(key), percent_encode(value)))
        .collect();
    Some(encoded.join("&"))
}

/// Joins `base` and `path`, inserting a `/` separator when `path` doesn't already start with one,
/// then appends `?`-prefixed encoded query parameters if any.
#[must_use]
pub fn build_url(base: &str, path: &str, params: &[(&str, &str)]) -> String {
    let mut url = String::with_capacity(base.len() + path.len() + 1);
    url.push_str(base.trim_end_matches('/'));
    if !path.starts_with('/') {
        url.push('/');
    }
    url.push_str(path);
    if let Some(query) = encode_query(params) {
        url.push('?');
        url.push_str(&query);
    }
    url
}

/// Appends encoded query parameters to `endpoint` as-is (no path joining), choosing `?` or `&`
/// by whether `endpoint` already contains a `?`.
#[must_use]
pub fn append_query(endpoint: &str, params: &[(&str, &str)]) -> String {
    let Some(query) = encode_query(params) else {
        return endpoint.to_string();
    };
    let separator = if endpoint.contains('?') { '&' } else { '?' };
    format!("{endpoint}{separator}{query}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encodes_reserved_characters() {
        assert_eq!(encode_query(&[("symbols", "AAPL,MSFT")]), Some("symbols=AAPL%2CMSFT".to_string()));
    }

    #[test]
    fn leaves_unreserved_characters_untouched() {
        assert_eq!(encode_query(&[("a-b_c.d~e", "1")]), Some("a-b_c.d~e=1".to_string()));
    }

    #[test]
    fn joins_multiple_params_with_ampersand() {
        assert_eq!(
            encode_query(&[("limit", "10"), ("symbols", "AAPL")]),
            Some("limit=10&symbols=AAPL".to_string())
        );
    }

    #[test]
    fn empty_params_yields_no_query_string() {
        assert_eq!(encode_query(&[]), None);
        assert_eq!(build_url("https://api.example.com", "/v2/assets", &[]), "https://api.example.com/v2/assets");
    }

    #[test]
    fn build_url_inserts_missing_leading_slash() {
        assert_eq!(build_url("https://api.example.com", "v2/assets", &[]), "https://api.example.com/v2/assets");
    }

    #[test]
    fn build_url_appends_encoded_query() {
        assert_eq!(
            build_url("https://api.example.com", "/v2/assets", &[("status", "active")]),
            "https://api.example.com/v2/assets?status=active"
        );
    }
}
