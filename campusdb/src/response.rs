//! Wire shapes for callers outside the library: the HTTP envelope and the
//! tagged `{success, ...}` outcome.

use crate::error::{CampusError, Result};
use crate::util::now_iso;
use serde::Serialize;
use serde_json::{json, Value};

/// Message shown in place of infrastructure errors.
pub const INTERNAL_ERROR: &str = "Internal server error";

/// `{status, data, timestamp}` on success, `{status, error, timestamp}` on failure.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Envelope<T> {
    pub status: u16,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub timestamp: String,
}

impl<T: Serialize> Envelope<T> {
    pub fn ok(data: T) -> Self {
        Envelope {
            status: 200,
            data: Some(data),
            error: None,
            timestamp: now_iso(),
        }
    }
}

impl Envelope<Value> {
    pub fn error(status: u16, message: impl Into<String>) -> Self {
        Envelope {
            status,
            data: None,
            error: Some(message.into()),
            timestamp: now_iso(),
        }
    }

    /// Envelope for a failed operation. Infrastructure errors are logged and
    /// reported as [`INTERNAL_ERROR`].
    pub fn from_error(err: &CampusError) -> Self {
        Self::error(status_code(err), public_message(err))
    }
}

/// HTTP status for an error.
pub fn status_code(err: &CampusError) -> u16 {
    match err {
        CampusError::NotFound { .. } => 404,
        CampusError::Validation(_) => 400,
        CampusError::Conflict(_) => 409,
        CampusError::InvalidCredential(_) => 401,
        CampusError::Inactive => 403,
        _ => 500,
    }
}

/// The message a caller may see.
pub fn public_message(err: &CampusError) -> String {
    if err.is_domain() {
        err.to_string()
    } else {
        log::error!("Internal error: {err}");
        INTERNAL_ERROR.to_string()
    }
}

/// Flatten a result into `{success: true, <key>: data}` or
/// `{success: false, error}`.
pub fn outcome<T: Serialize>(key: &str, result: Result<T>) -> Value {
    let data = result.and_then(|data| Ok(serde_json::to_value(data)?));
    match data {
        Ok(data) => {
            let mut body = serde_json::Map::new();
            body.insert("success".into(), json!(true));
            if key.is_empty() {
                if let Value::Object(fields) = data {
                    body.extend(fields);
                }
            } else {
                body.insert(key.to_string(), data);
            }
            Value::Object(body)
        }
        Err(e) => json!({ "success": false, "error": public_message(&e) }),
    }
}
