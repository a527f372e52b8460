//! ---
//! corelay_section: "02-messaging-envelopes"
//! corelay_subsection: "module"
//! corelay_type: "source"
//! corelay_scope: "code"
//! corelay_description: "Request and outcome envelopes with their JSON wire codec."
//! corelay_version: "v0.1.0"
//! corelay_owner: "tbd"
//! ---
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};
use uuid::Uuid;

/// Operation-specific parameters keyed by name.
pub type Parameters = Map<String, JsonValue>;

/// Correlation identifier linking a request to its outcome.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestId(String);

impl RequestId {
    /// Generate a fresh UUID v4 identifier.
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Borrow the identifier as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Consume the identifier, returning the inner string.
    pub fn into_inner(self) -> String {
        self.0
    }
}

impl From<String> for RequestId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&str> for RequestId {
    fn from(value: &str) -> Self {
        Self(value.to_owned())
    }
}

impl AsRef<str> for RequestId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Request broadcast on the request topic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestEnvelope {
    /// Correlation key assigned by the submitter.
    pub request_id: RequestId,
    /// Opaque operation descriptor (query text or operation name).
    pub operation: String,
    /// Operation parameters, possibly empty.
    #[serde(default)]
    pub parameters: Parameters,
    /// Optional bearer credential.
    #[serde(default)]
    pub credential: Option<String>,
}

impl RequestEnvelope {
    /// Build an envelope for an already assigned request id.
    pub fn new(
        request_id: RequestId,
        operation: impl Into<String>,
        parameters: Parameters,
        credential: Option<String>,
    ) -> Self {
        Self {
            request_id,
            operation: operation.into(),
            parameters,
            credential: credential.filter(|token| !token.is_empty()),
        }
    }

    /// Serialize into a message body.
    pub fn encode(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Decode a message body.
    ///
    /// Accepts the legacy field names `graphqlQuery`, `variables`, and `authToken`. A body
    /// that has no string `requestId` is [`DecodeError::Uncorrelated`]; any other defect is
    /// [`DecodeError::Malformed`] and still carries the recovered request id.
    pub fn decode(body: &str) -> Result<Self, DecodeError> {
        let object = parse_object(body)?;
        let request_id = correlation_key(&object)?;
        let malformed = |reason: String| DecodeError::Malformed {
            request_id: request_id.clone(),
            reason,
        };

        let operation = match field(&object, "operation", "graphqlQuery") {
            Some(JsonValue::String(text)) if !text.trim().is_empty() => text.clone(),
            Some(JsonValue::String(_)) | Some(JsonValue::Null) | None => {
                return Err(malformed("missing operation".to_owned()))
            }
            Some(other) => {
                return Err(malformed(format!(
                    "operation must be a string, got {}",
                    json_kind(other)
                )))
            }
        };

        let parameters = match field(&object, "parameters", "variables") {
            None | Some(JsonValue::Null) => Parameters::new(),
            Some(JsonValue::Object(map)) => map.clone(),
            Some(other) => {
                return Err(malformed(format!(
                    "parameters must be an object, got {}",
                    json_kind(other)
                )))
            }
        };

        let credential = match field(&object, "credential", "authToken") {
            None | Some(JsonValue::Null) => None,
            Some(JsonValue::String(token)) => Some(token.clone()),
            Some(other) => {
                return Err(malformed(format!(
                    "credential must be a string, got {}",
                    json_kind(other)
                )))
            }
        };

        Ok(Self::new(request_id, operation, parameters, credential))
    }
}

/// Classification of structured failures carried in an outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FailureKind {
    /// The request envelope was missing required fields.
    MalformedRequest,
    /// A credential was required but absent.
    Unauthenticated,
    /// The internal engine rejected or failed the operation.
    EngineError,
}

impl FailureKind {
    /// Stable label used in logs and metrics.
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureKind::MalformedRequest => "MalformedRequest",
            FailureKind::Unauthenticated => "Unauthenticated",
            FailureKind::EngineError => "EngineError",
        }
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of executing one request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum OperationResult {
    /// The engine produced a payload.
    Success {
        /// Engine payload, verbatim.
        data: JsonValue,
    },
    /// The request failed before or during execution.
    Failure {
        /// Failure classification.
        kind: FailureKind,
        /// Diagnostic message; engine messages are preserved verbatim.
        message: String,
    },
}

impl OperationResult {
    /// Construct a success result.
    pub fn success(data: JsonValue) -> Self {
        OperationResult::Success { data }
    }

    /// Construct a failure result.
    pub fn failure(kind: FailureKind, message: impl Into<String>) -> Self {
        OperationResult::Failure {
            kind,
            message: message.into(),
        }
    }

    /// True for the success variant.
    pub fn is_success(&self) -> bool {
        matches!(self, OperationResult::Success { .. })
    }

    /// Failure kind, if any.
    pub fn failure_kind(&self) -> Option<FailureKind> {
        match self {
            OperationResult::Success { .. } => None,
            OperationResult::Failure { kind, .. } => Some(*kind),
        }
    }

    /// Label used for the `status` metric dimension.
    pub fn status_label(&self) -> &'static str {
        match self {
            OperationResult::Success { .. } => "success",
            OperationResult::Failure { kind, .. } => kind.as_str(),
        }
    }
}

/// Outcome broadcast on the outcome topic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutcomeEnvelope {
    /// Correlation key echoed from the request.
    pub request_id: RequestId,
    /// Execution result.
    pub result: OperationResult,
}

impl OutcomeEnvelope {
    /// Wrap a result for the given request.
    pub fn new(request_id: RequestId, result: OperationResult) -> Self {
        Self { request_id, result }
    }

    /// Serialize into a message body.
    pub fn encode(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Decode a message body.
    ///
    /// A legacy body of the form `{"requestId": .., "data": ..}` is read as a success.
    pub fn decode(body: &str) -> Result<Self, DecodeError> {
        let object = parse_object(body)?;
        let request_id = correlation_key(&object)?;
        let result = match (object.get("result"), object.get("data")) {
            (Some(result), _) => serde_json::from_value::<OperationResult>(result.clone())
                .map_err(|err| DecodeError::Malformed {
                    request_id: request_id.clone(),
                    reason: format!("invalid result: {err}"),
                })?,
            (None, Some(data)) => OperationResult::success(data.clone()),
            (None, None) => {
                return Err(DecodeError::Malformed {
                    request_id,
                    reason: "missing result".to_owned(),
                })
            }
        };
        Ok(Self { request_id, result })
    }
}

/// Errors raised while decoding envelopes.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    /// The body carries no usable correlation key; nobody can be answered.
    #[error("envelope has no request id: {reason}")]
    Uncorrelated {
        /// Why the key could not be recovered.
        reason: String,
    },
    /// The body is correlated but otherwise invalid.
    #[error("malformed envelope for request {request_id}: {reason}")]
    Malformed {
        /// Recovered correlation key.
        request_id: RequestId,
        /// Description of the defect.
        reason: String,
    },
}

impl DecodeError {
    /// Correlation key recovered before the failure, if any.
    pub fn request_id(&self) -> Option<&RequestId> {
        match self {
            DecodeError::Uncorrelated { .. } => None,
            DecodeError::Malformed { request_id, .. } => Some(request_id),
        }
    }
}

fn parse_object(body: &str) -> Result<Map<String, JsonValue>, DecodeError> {
    match serde_json::from_str::<JsonValue>(body) {
        Ok(JsonValue::Object(object)) => Ok(object),
        Ok(other) => Err(DecodeError::Uncorrelated {
            reason: format!("body must be a JSON object, got {}", json_kind(&other)),
        }),
        Err(err) => Err(DecodeError::Uncorrelated {
            reason: format!("body is not JSON: {err}"),
        }),
    }
}

fn correlation_key(object: &Map<String, JsonValue>) -> Result<RequestId, DecodeError> {
    match object.get("requestId") {
        Some(JsonValue::String(id)) if !id.trim().is_empty() => Ok(RequestId::from(id.as_str())),
        Some(JsonValue::String(_)) => Err(DecodeError::Uncorrelated {
            reason: "requestId is empty".to_owned(),
        }),
        Some(other) => Err(DecodeError::Uncorrelated {
            reason: format!("requestId must be a string, got {}", json_kind(other)),
        }),
        None => Err(DecodeError::Uncorrelated {
            reason: "requestId is missing".to_owned(),
        }),
    }
}

fn field<'a>(object: &'a Map<String, JsonValue>, name: &str, legacy: &str) -> Option<&'a JsonValue> {
    object.get(name).or_else(|| object.get(legacy))
}

fn json_kind(value: &JsonValue) -> &'static str {
    match value {
        JsonValue::Null => "null",
        JsonValue::Bool(_) => "boolean",
        JsonValue::Number(_) => "number",
        JsonValue::String(_) => "string",
        JsonValue::Array(_) => "array",
        JsonValue::Object(_) => "object",
    }
}
