//! Stable numeric error codes
//!
//! Codes are part of the worker/caller contract: terminal failure payloads
//! carry them, and workers match on them when deciding how to react to a
//! rejected completion report.

/// Error code constants grouped by concern
pub struct ErrorCode;

impl ErrorCode {
    // Protocol errors (1600-1609)
    pub const BAD_PARAMETER: u16 = 1600;
    pub const UNKNOWN_EXECUTION: u16 = 1601;
    pub const STEP_MISMATCH: u16 = 1602;
    pub const MALFORMED_MESSAGE: u16 = 1603;
    pub const SERVER_NAME_MISMATCH: u16 = 1604;
    pub const TIMEOUT: u16 = 1605;

    // Infrastructure errors (1610-1619)
    pub const KEYSPACE: u16 = 1610;
    pub const STORAGE: u16 = 1611;
    pub const CLUSTER: u16 = 1612;
}

/// Human-readable description for a known error code
pub fn describe_error_code(code: u16) -> &'static str {
    match code {
        ErrorCode::BAD_PARAMETER => "algorithm source failed validation",
        ErrorCode::UNKNOWN_EXECUTION => "no execution with this number",
        ErrorCode::STEP_MISMATCH => "completion report for a superseded step",
        ErrorCode::MALFORMED_MESSAGE => "completion report missing required fields",
        ErrorCode::SERVER_NAME_MISMATCH => "reporting server is not a participant",
        ErrorCode::TIMEOUT => "watchdog fired before all workers reported",
        ErrorCode::KEYSPACE => "keyspace store operation failed",
        ErrorCode::STORAGE => "graph storage operation failed",
        ErrorCode::CLUSTER => "cluster communication failed",
        _ => "unknown error code",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_codes_have_descriptions() {
        assert_ne!(describe_error_code(ErrorCode::TIMEOUT), "unknown error code");
        assert_eq!(describe_error_code(9999), "unknown error code");
    }
}
