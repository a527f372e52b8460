//! ---
//! corelay_section: "03-correlation-store"
//! corelay_subsection: "module"
//! corelay_type: "source"
//! corelay_scope: "code"
//! corelay_description: "Correlation record model."
//! corelay_version: "v0.1.0"
//! corelay_owner: "tbd"
//! ---
use chrono::{DateTime, SubsecRound, Utc};
use corelay_msg::{OperationResult, OutcomeEnvelope, RequestId};
use serde::{Deserialize, Serialize};
use serde_with::{serde_as, TimestampMilliSeconds};

/// Stored form of an outcome, keyed by request id.
///
/// Serialized as `{"requestId", "response", "timestamp"}` with the timestamp in epoch
/// milliseconds.
#[serde_as]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CorrelationRecord {
    /// Primary key.
    pub request_id: RequestId,
    /// Outcome payload, success or failure.
    pub response: OperationResult,
    /// Time the record was written.
    #[serde_as(as = "TimestampMilliSeconds<i64>")]
    pub timestamp: DateTime<Utc>,
}

impl CorrelationRecord {
    /// Build a record stamped with the current time.
    pub fn new(request_id: RequestId, response: OperationResult) -> Self {
        Self::at(request_id, response, Utc::now())
    }

    /// Build a record with an explicit timestamp, truncated to millisecond precision.
    pub fn at(request_id: RequestId, response: OperationResult, timestamp: DateTime<Utc>) -> Self {
        Self {
            request_id,
            response,
            timestamp: timestamp.trunc_subsecs(3),
        }
    }

    /// Record for a received outcome.
    pub fn from_outcome(outcome: OutcomeEnvelope) -> Self {
        Self::new(outcome.request_id, outcome.result)
    }
}
