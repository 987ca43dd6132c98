use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

/// The `{code, data, message}` envelope. Application errors keep HTTP 200
/// with a non-zero code; only rate-limit, auth and deadline failures use
/// real HTTP status codes.
#[derive(Debug, Serialize)]
pub struct Envelope<T: Serialize> {
    pub code: i32,
    pub data: Option<T>,
    pub message: String,
}

pub fn ok<T: Serialize>(data: T) -> Response {
    (
        StatusCode::OK,
        Json(Envelope {
            code: 0,
            data: Some(data),
            message: "Request successful".to_string(),
        }),
    )
        .into_response()
}

pub fn app_error(code: i32, message: impl Into<String>) -> Response {
    (
        StatusCode::OK,
        Json(Envelope::<serde_json::Value> {
            code,
            data: None,
            message: message.into(),
        }),
    )
        .into_response()
}

/// Deadline expiry at the request boundary.
pub fn timeout() -> Response {
    (
        StatusCode::GATEWAY_TIMEOUT,
        Json(Envelope::<serde_json::Value> {
            code: 504,
            data: None,
            message: "Request timed out".to_string(),
        }),
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_envelope_serialization() {
        let envelope = Envelope {
            code: 0,
            data: Some(vec!["1.5".to_string()]),
            message: "Request successful".to_string(),
        };
        let json = serde_json::to_value(&envelope).unwrap();
        assert_eq!(json["code"], 0);
        assert_eq!(json["data"][0], "1.5");
        assert_eq!(json["message"], "Request successful");
    }

    #[test]
    fn test_envelope_null_data() {
        let envelope = Envelope::<serde_json::Value> {
            code: 500,
            data: None,
            message: "boom".to_string(),
        };
        let json = serde_json::to_value(&envelope).unwrap();
        assert!(json["data"].is_null());
        assert_eq!(json["code"], 500);
    }
}
