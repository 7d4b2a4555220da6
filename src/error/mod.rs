//! The unified error type for the conductor
//!
//! Protocol violations on a single worker report (`StepMismatch`,
//! `MalformedMessage`, `ServerNameMismatch`) are returned to the reporting
//! caller and never mutate execution state. `Timeout` and worker-reported
//! failures are terminal for the whole execution and are recorded in the
//! execution's keyspace as a JSON payload built by
//! [`ConductorError::to_payload`].

use serde_json::{json, Value};
use thiserror::Error;

pub mod codes;

pub use codes::{describe_error_code, ErrorCode};

pub type ConductorResult<T> = Result<T, ConductorError>;

#[derive(Error, Debug)]
pub enum ConductorError {
    /// Algorithm source failed validation; fatal to the start call only.
    #[error("[E1600] bad parameter: {reason}")]
    BadParameter { reason: String },

    #[error("[E1601] unknown execution {execution}")]
    UnknownExecution { execution: String },

    /// A straggling report from a superseded step.
    #[error("[E1602] step mismatch: worker reported step {reported:?}, conductor is at step {current}")]
    StepMismatch {
        reported: Option<u64>,
        current: u64,
    },

    #[error("[E1603] malformed completion report: missing field `{field}`")]
    MalformedMessage { field: &'static str },

    #[error("[E1604] server name mismatch: `{server}` is not a participant of the current phase")]
    ServerNameMismatch { server: String },

    /// The watchdog fired before the step barrier completed.
    #[error("[E1605] execution {execution} timed out waiting for worker reports")]
    Timeout { execution: String },

    #[error("[E1610] keyspace error: {message}")]
    Keyspace {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("[E1611] storage error: {message}")]
    Storage {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("[E1612] cluster communication error: {message}")]
    Cluster {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },
}

impl ConductorError {
    pub fn bad_parameter(reason: impl Into<String>) -> Self {
        Self::BadParameter {
            reason: reason.into(),
        }
    }

    pub fn keyspace(message: impl Into<String>) -> Self {
        Self::Keyspace {
            message: message.into(),
            source: None,
        }
    }

    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage {
            message: message.into(),
            source: None,
        }
    }

    pub fn cluster(message: impl Into<String>) -> Self {
        Self::Cluster {
            message: message.into(),
            source: None,
        }
    }

    /// The stable numeric code for this error
    pub fn code(&self) -> u16 {
        match self {
            Self::BadParameter { .. } => ErrorCode::BAD_PARAMETER,
            Self::UnknownExecution { .. } => ErrorCode::UNKNOWN_EXECUTION,
            Self::StepMismatch { .. } => ErrorCode::STEP_MISMATCH,
            Self::MalformedMessage { .. } => ErrorCode::MALFORMED_MESSAGE,
            Self::ServerNameMismatch { .. } => ErrorCode::SERVER_NAME_MISMATCH,
            Self::Timeout { .. } => ErrorCode::TIMEOUT,
            Self::Keyspace { .. } => ErrorCode::KEYSPACE,
            Self::Storage { .. } => ErrorCode::STORAGE,
            Self::Cluster { .. } => ErrorCode::CLUSTER,
        }
    }

    /// The JSON failure payload recorded in ExecutionState when this error
    /// terminates an execution
    pub fn to_payload(&self) -> Value {
        json!({
            "code": self.code(),
            "message": self.to_string(),
        })
    }
}

impl From<serde_json::Error> for ConductorError {
    fn from(err: serde_json::Error) -> Self {
        ConductorError::Keyspace {
            message: format!("serialization failed: {err}"),
            source: Some(Box::new(err)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn payload_carries_code_and_message() {
        let err = ConductorError::Timeout {
            execution: "e1".to_string(),
        };
        let payload = err.to_payload();
        assert_eq!(payload["code"], ErrorCode::TIMEOUT);
        assert!(payload["message"]
            .as_str()
            .unwrap()
            .contains("timed out"));
    }

    #[test]
    fn display_includes_code_prefix() {
        let err = ConductorError::StepMismatch {
            reported: Some(3),
            current: 5,
        };
        assert!(err.to_string().starts_with("[E1602]"));
    }
}
