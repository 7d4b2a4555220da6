//! User-supplied algorithm programs and the aggregation callback

use crate::error::{ConductorError, ConductorResult};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::sync::Arc;

/// Summary of one completed superstep, as appended to the step history and
/// handed to the aggregation callback.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepSummary {
    /// Vertices that will participate in the next step.
    pub active: i64,
    /// Messages produced during the step.
    pub messages: i64,
    /// Opaque payload fragments reported by workers, in arrival order.
    pub data: Vec<Value>,
    /// Whether this was the one-shot final pass.
    #[serde(rename = "final")]
    pub is_final: bool,
}

/// Aggregation callback run on the conductor between steps:
/// `(globals, summary) -> new globals`.
pub type SuperstepFn = dyn Fn(Value, &StepSummary) -> Value + Send + Sync;

/// The algorithm bundle supplied to `start_execution`.
///
/// `base` and `final_step` are program sources shipped verbatim to workers;
/// `superstep` runs conductor-side, only ever within the serialized callback
/// path of its execution.
#[derive(Clone)]
pub struct Algorithm {
    /// Vertex program source, run by workers every ordinary step.
    pub base: String,
    /// Aggregation callback invoked once per completed step.
    pub superstep: Option<Arc<SuperstepFn>>,
    /// Final-pass program source, run once after natural quiescence.
    pub final_step: Option<String>,
}

impl Algorithm {
    pub fn new(base: impl Into<String>) -> Self {
        Self {
            base: base.into(),
            superstep: None,
            final_step: None,
        }
    }

    pub fn with_superstep(
        mut self,
        callback: impl Fn(Value, &StepSummary) -> Value + Send + Sync + 'static,
    ) -> Self {
        self.superstep = Some(Arc::new(callback));
        self
    }

    pub fn with_final_step(mut self, source: impl Into<String>) -> Self {
        self.final_step = Some(source.into());
        self
    }
}

impl fmt::Debug for Algorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Algorithm")
            .field("base", &self.base)
            .field("superstep", &self.superstep.is_some())
            .field("final_step", &self.final_step)
            .finish()
    }
}

/// Syntactic well-formedness check for worker program sources.
///
/// No sandboxing happens beyond this: callers are trusted. Deployments
/// embedding a real program runtime can plug in its parser here.
pub trait SourceValidator: Send + Sync {
    fn validate(&self, source: &str) -> ConductorResult<()>;
}

/// Default validator: non-empty source with balanced `()`, `[]` and `{}`.
#[derive(Debug, Default)]
pub struct DelimiterValidator;

impl SourceValidator for DelimiterValidator {
    fn validate(&self, source: &str) -> ConductorResult<()> {
        if source.trim().is_empty() {
            return Err(ConductorError::bad_parameter("empty algorithm source"));
        }
        let mut stack = Vec::new();
        for c in source.chars() {
            match c {
                '(' | '[' | '{' => stack.push(c),
                ')' | ']' | '}' => {
                    let expected = match c {
                        ')' => '(',
                        ']' => '[',
                        _ => '{',
                    };
                    if stack.pop() != Some(expected) {
                        return Err(ConductorError::bad_parameter(format!(
                            "unbalanced `{c}` in algorithm source"
                        )));
                    }
                }
                _ => {}
            }
        }
        if let Some(open) = stack.pop() {
            return Err(ConductorError::bad_parameter(format!(
                "unclosed `{open}` in algorithm source"
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCode;

    #[test]
    fn accepts_well_formed_source() {
        let validator = DelimiterValidator;
        assert!(validator
            .validate("function (vertex) { vertex.deactivate(); }")
            .is_ok());
    }

    #[test]
    fn rejects_empty_and_unbalanced_source() {
        let validator = DelimiterValidator;
        for source in ["", "   ", "function (", "foo)", "a { b ( c } )"] {
            let err = validator.validate(source).unwrap_err();
            assert_eq!(err.code(), ErrorCode::BAD_PARAMETER, "source: {source:?}");
        }
    }
}
