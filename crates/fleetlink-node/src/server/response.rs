//! The Fleet-style response envelope
//!
//! Every endpoint answers `{"response": {result, reason, vin, command,
//! response?}}` with HTTP 200 on success and 503 on failure.

use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use serde_json::Value;
use tracing::debug;

/// Success reason for synchronously answered requests
pub const REASON_PROCESSED: &str = "The request was successfully processed.";
/// Success reason for completed commands
pub const REASON_COMMAND_PROCESSED: &str = "The command was successfully processed.";
/// Success reason for fire-and-forget submissions
pub const REASON_COMMAND_RECEIVED: &str =
    "The command was successfully received and will be processed shortly.";
/// Success reason for responses assembled partly from stale cache entries
pub const REASON_PARTIAL_CACHE: &str =
    "The request was partially processed from cache. Some data may be stale.";

/// Outer wrapper of the envelope
#[derive(Debug, Serialize)]
pub struct Ret {
    /// The payload
    pub response: ResponseBody,
}

/// The envelope body
#[derive(Debug, Serialize)]
pub struct ResponseBody {
    /// Whether the request succeeded
    pub result: bool,
    /// Human-readable reason
    pub reason: String,
    /// Vehicle the request addressed
    pub vin: String,
    /// Operation name
    pub command: String,
    /// Opaque response payload, when the operation produced one
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response: Option<Value>,
}

impl ResponseBody {
    /// Empty envelope for a request
    pub fn new(vin: impl Into<String>, command: impl Into<String>) -> Self {
        Self {
            result: false,
            reason: String::new(),
            vin: vin.into(),
            command: command.into(),
            response: None,
        }
    }

    /// Mark successful with a reason and optional payload
    pub fn succeed(mut self, reason: &str, response: Option<Value>) -> Self {
        self.result = true;
        self.reason = reason.to_string();
        self.response = response;
        self
    }

    /// Mark failed with a reason
    pub fn fail(mut self, reason: impl Into<String>) -> Self {
        self.result = false;
        self.reason = reason.into();
        self
    }

    /// Render the envelope, optionally with a `Cache-Control` hint.
    ///
    /// `cache_max_age` of `Some(0)` disables caching explicitly; `None`
    /// omits the header.
    pub fn into_http(self, cache_max_age: Option<u64>) -> Response {
        let status = if self.result {
            StatusCode::OK
        } else {
            StatusCode::SERVICE_UNAVAILABLE
        };
        debug!(
            command = %self.command,
            status = status.as_u16(),
            result = self.result,
            reason = %self.reason,
            "response"
        );

        let mut response = (status, Json(Ret { response: self })).into_response();
        if let Some(age) = cache_max_age {
            let value = if age > 0 {
                format!("public, max-age={age}, must-revalidate")
            } else {
                "no-cache, no-store, must-revalidate".to_string()
            };
            if let Ok(value) = HeaderValue::from_str(&value) {
                response.headers_mut().insert(header::CACHE_CONTROL, value);
            }
        }
        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_envelope_shape() {
        let body = ResponseBody::new("VIN", "flash_lights")
            .succeed(REASON_COMMAND_PROCESSED, Some(json!({"ok": true})));
        let value = serde_json::to_value(Ret { response: body }).unwrap();
        assert_eq!(value["response"]["result"], true);
        assert_eq!(value["response"]["vin"], "VIN");
        assert_eq!(value["response"]["command"], "flash_lights");
        assert_eq!(value["response"]["response"]["ok"], true);
    }

    #[test]
    fn test_response_field_omitted_when_empty() {
        let body = ResponseBody::new("VIN", "flash_lights").fail("nope");
        let value = serde_json::to_value(Ret { response: body }).unwrap();
        assert!(value["response"].get("response").is_none());
        assert_eq!(value["response"]["result"], false);
    }

    #[test]
    fn test_status_mapping() {
        let ok = ResponseBody::new("V", "c").succeed(REASON_PROCESSED, None);
        assert_eq!(ok.into_http(None).status(), StatusCode::OK);
        let failed = ResponseBody::new("V", "c").fail("bad");
        assert_eq!(
            failed.into_http(None).status(),
            StatusCode::SERVICE_UNAVAILABLE
        );
    }

    #[test]
    fn test_cache_control_header() {
        let response = ResponseBody::new("V", "c")
            .succeed(REASON_PROCESSED, None)
            .into_http(Some(5));
        assert_eq!(
            response.headers().get("cache-control").unwrap(),
            "public, max-age=5, must-revalidate"
        );

        let response = ResponseBody::new("V", "c")
            .succeed(REASON_PROCESSED, None)
            .into_http(Some(0));
        assert_eq!(
            response.headers().get("cache-control").unwrap(),
            "no-cache, no-store, must-revalidate"
        );

        let response = ResponseBody::new("V", "c")
            .succeed(REASON_PROCESSED, None)
            .into_http(None);
        assert!(response.headers().get("cache-control").is_none());
    }
}
