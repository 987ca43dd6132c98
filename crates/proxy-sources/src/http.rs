//! Shared upstream HTTP helper: GET with headers and a per-call timeout,
//! returning the raw status and body so each adapter applies its own
//! status handling.

use crate::{Result, SourceError};
use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use std::time::Duration;

/// Default upstream timeout; slow providers pass 10-15 s explicitly.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

pub async fn get_raw(
    client: &Client,
    url: &str,
    headers: &[(&str, &str)],
    timeout: Duration,
) -> Result<(StatusCode, String)> {
    let mut request = client.get(url).timeout(timeout);
    for (key, value) in headers {
        request = request.header(*key, *value);
    }
    let response = request.send().await?;
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    Ok((status, body))
}

/// Decode a JSON body, mapping malformed payloads to a typed error.
pub fn parse_json<T: DeserializeOwned>(body: &str) -> Result<T> {
    serde_json::from_str(body).map_err(|e| SourceError::Malformed(e.to_string()))
}

/// Map a non-success status: 429 gets its own variant so the caller can
/// suppress error-alert accounting.
pub fn status_error(status: StatusCode, body: &str) -> SourceError {
    if status == StatusCode::TOO_MANY_REQUESTS {
        SourceError::RateLimited
    } else {
        SourceError::Status {
            status: status.as_u16(),
            body: body.chars().take(512).collect(),
        }
    }
}

/// Format an upstream float price the way it is stored and returned:
/// shortest decimal form, never scientific notation.
pub fn format_price(price: f64) -> String {
    format!("{}", price)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_price_keeps_small_values_decimal() {
        assert_eq!(format_price(0.0000000001), "0.0000000001");
        assert_eq!(format_price(3451.07), "3451.07");
        assert_eq!(format_price(1.0), "1");
    }

    #[test]
    fn test_status_error_classifies_429() {
        assert!(matches!(
            status_error(StatusCode::TOO_MANY_REQUESTS, ""),
            SourceError::RateLimited
        ));
        assert!(matches!(
            status_error(StatusCode::BAD_GATEWAY, "oops"),
            SourceError::Status { status: 502, .. }
        ));
    }
}
