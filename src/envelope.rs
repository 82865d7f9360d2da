//! JSON-RPC 2.0 envelope types for the Agent Client Protocol.
//!
//! An envelope is one of four shapes: request, response, error response, or
//! notification. All four carry `jsonrpc = "2.0"`. Decoding is shape-based:
//! an inbound frame is parsed as a generic [`serde_json::Value`] first, then
//! matched against the four shapes in the order request, error, response,
//! notification — the first shape whose required fields are all present wins.
//!
//! # Examples
//!
//! ```rust
//! use acp_sdk::envelope::{Envelope, RequestId};
//! use serde_json::json;
//!
//! let request = Envelope::request(
//!     "session/prompt",
//!     Some(json!({"sessionId": "abc"})),
//!     RequestId::new_number(1),
//! );
//! let line = request.to_line().unwrap();
//! assert!(line.ends_with('\n'));
//!
//! let decoded = Envelope::decode(line.trim_end()).unwrap();
//! assert_eq!(decoded, request);
//! ```

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ProtocolError;

const JSONRPC_VERSION: &str = "2.0";

/// A JSON-RPC request/response identifier: either a non-negative integer or a
/// non-empty string. Equality and hashing respect the tag, so `RequestId::Number(1)`
/// never equals `RequestId::String("1".into())`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RequestId {
    /// A non-negative integer identifier.
    Number(u64),
    /// A non-empty string identifier.
    String(String),
}

impl RequestId {
    /// Build a numeric request id.
    pub fn new_number(id: u64) -> Self {
        Self::Number(id)
    }

    /// Build a string request id. Accepts any string, including an empty
    /// one — neither this constructor nor [`Envelope::encode`] validates it.
    pub fn new_string(id: impl Into<String>) -> Self {
        Self::String(id.into())
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Number(n) => write!(f, "{n}"),
            Self::String(s) => write!(f, "{s}"),
        }
    }
}

/// A structured JSON-RPC error body, as carried by an [`Envelope::ErrorResponse`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorBody {
    /// The JSON-RPC (or ACP-specific) error code.
    pub code: i64,
    /// A short, human-readable message.
    pub message: String,
    /// Optional structured error detail.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl ErrorBody {
    /// Construct an error body without additional data.
    pub fn new(code: i64, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            data: None,
        }
    }

    /// Attach structured error data.
    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct RawRequest {
    jsonrpc: String,
    method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    params: Option<Value>,
    id: RequestId,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct RawResponse {
    jsonrpc: String,
    result: Value,
    id: RequestId,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct RawErrorResponse {
    jsonrpc: String,
    error: ErrorBody,
    id: Option<RequestId>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct RawNotification {
    jsonrpc: String,
    method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    params: Option<Value>,
}

/// A decoded JSON-RPC 2.0 envelope: request, response, error response, or notification.
#[derive(Debug, Clone, PartialEq)]
pub enum Envelope {
    /// A method invocation awaiting a correlated response.
    Request {
        /// The method name.
        method: String,
        /// Optional method parameters.
        params: Option<Value>,
        /// The request id the response must echo back.
        id: RequestId,
    },
    /// A successful response to a prior request.
    Response {
        /// The method's return value.
        result: Value,
        /// The id of the request this completes.
        id: RequestId,
    },
    /// A failed response to a prior request, or an unsolicited protocol-level error.
    ErrorResponse {
        /// The error detail.
        error: ErrorBody,
        /// The id of the request this completes, or `None` for an error that
        /// is not tied to any single request.
        id: Option<RequestId>,
    },
    /// A one-way message that carries no id and expects no response.
    Notification {
        /// The method name.
        method: String,
        /// Optional method parameters.
        params: Option<Value>,
    },
}

impl Envelope {
    /// Build a request envelope.
    pub fn request(method: impl Into<String>, params: Option<Value>, id: RequestId) -> Self {
        Self::Request {
            method: method.into(),
            params,
            id,
        }
    }

    /// Build a success response envelope.
    pub fn response(result: Value, id: RequestId) -> Self {
        Self::Response { result, id }
    }

    /// Build an error response envelope.
    pub fn error_response(error: ErrorBody, id: Option<RequestId>) -> Self {
        Self::ErrorResponse { error, id }
    }

    /// Build a notification envelope.
    pub fn notification(method: impl Into<String>, params: Option<Value>) -> Self {
        Self::Notification {
            method: method.into(),
            params,
        }
    }

    /// The request id this envelope carries, if any.
    pub fn id(&self) -> Option<&RequestId> {
        match self {
            Self::Request { id, .. } => Some(id),
            Self::Response { id, .. } => Some(id),
            Self::ErrorResponse { id, .. } => id.as_ref(),
            Self::Notification { .. } => None,
        }
    }

    /// Encode this envelope to a single-line JSON string with the `jsonrpc`
    /// field first and no trailing newline.
    pub fn encode(&self) -> Result<String, ProtocolError> {
        let value = self.to_value()?;
        serde_json::to_string(&value).map_err(ProtocolError::from)
    }

    /// Encode this envelope as a single line of newline-framed JSON: the same
    /// as [`Envelope::encode`] with exactly one trailing `\n`, ready to hand
    /// to a newline-delimited transport.
    pub fn to_line(&self) -> Result<String, ProtocolError> {
        let mut line = self.encode()?;
        line.push('\n');
        Ok(line)
    }

    fn to_value(&self) -> Result<Value, ProtocolError> {
        let value = match self {
            Self::Request { method, params, id } => serde_json::to_value(RawRequest {
                jsonrpc: JSONRPC_VERSION.to_string(),
                method: method.clone(),
                params: params.clone(),
                id: id.clone(),
            }),
            Self::Response { result, id } => serde_json::to_value(RawResponse {
                jsonrpc: JSONRPC_VERSION.to_string(),
                result: result.clone(),
                id: id.clone(),
            }),
            Self::ErrorResponse { error, id } => serde_json::to_value(RawErrorResponse {
                jsonrpc: JSONRPC_VERSION.to_string(),
                error: error.clone(),
                id: id.clone(),
            }),
            Self::Notification { method, params } => serde_json::to_value(RawNotification {
                jsonrpc: JSONRPC_VERSION.to_string(),
                method: method.clone(),
                params: params.clone(),
            }),
        };
        value.map_err(ProtocolError::from)
    }

    /// Decode a single JSON text frame into an envelope.
    ///
    /// Tries, in order, the request shape (has `id` and `method`), the error
    /// shape (has `error`), the response shape (has `result` and `id`), and
    /// the notification shape (has `method`, no `id`). The first shape whose
    /// required fields are present wins; a frame matching none of them
    /// produces [`ProtocolError::Malformed`].
    pub fn decode(text: &str) -> Result<Self, ProtocolError> {
        let value: Value = serde_json::from_str(text).map_err(|_| ProtocolError::Malformed)?;
        Self::from_value(&value)
    }

    fn from_value(value: &Value) -> Result<Self, ProtocolError> {
        let object = value.as_object().ok_or(ProtocolError::Malformed)?;
        if object.get("jsonrpc").and_then(Value::as_str) != Some(JSONRPC_VERSION) {
            return Err(ProtocolError::Malformed);
        }

        let has_id = object.contains_key("id");
        let has_method = object.contains_key("method");
        let has_error = object.contains_key("error");
        let has_result = object.contains_key("result");

        if has_id && has_method {
            let raw: RawRequest =
                serde_json::from_value(value.clone()).map_err(|_| ProtocolError::Malformed)?;
            return Ok(Self::Request {
                method: raw.method,
                params: raw.params,
                id: raw.id,
            });
        }

        if has_error {
            let raw: RawErrorResponse =
                serde_json::from_value(value.clone()).map_err(|_| ProtocolError::Malformed)?;
            return Ok(Self::ErrorResponse {
                error: raw.error,
                id: raw.id,
            });
        }

        if has_result && has_id {
            let raw: RawResponse =
                serde_json::from_value(value.clone()).map_err(|_| ProtocolError::Malformed)?;
            return Ok(Self::Response {
                result: raw.result,
                id: raw.id,
            });
        }

        if has_method {
            let raw: RawNotification =
                serde_json::from_value(value.clone()).map_err(|_| ProtocolError::Malformed)?;
            return Ok(Self::Notification {
                method: raw.method,
                params: raw.params,
            });
        }

        Err(ProtocolError::Malformed)
    }
}
