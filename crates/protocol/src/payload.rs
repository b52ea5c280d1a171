//! Request/response wire records.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::error::error_names;

// ============================================================================
// Correlation id
// ============================================================================

/// Unique token linking a fired request to its eventual response.
///
/// Generated once per invocation; the sole correlation key between a request
/// and the worker's reply. UUID v7 keeps ids time-ordered while carrying
/// enough entropy that collisions do not occur within a pool's lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CallId(Uuid);

impl CallId {
    /// Generate a fresh correlation id.
    pub fn generate() -> Self {
        Self(Uuid::now_v7())
    }
}

impl std::fmt::Display for CallId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

// ============================================================================
// Wire records
// ============================================================================

/// Record sent to a worker: which function to run, with what, under which id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestPayload {
    /// Name of the registered function to invoke.
    pub func: String,
    /// Positional arguments as opaque JSON values.
    pub args: Vec<Value>,
    /// Correlation id echoed back in the response.
    pub id: CallId,
}

/// Record received from a worker. Exactly one of `result`/`error` is set;
/// use the constructors rather than building the struct by hand.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponsePayload {
    /// Correlation id of the request this answers.
    pub id: CallId,
    /// Present on success.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    /// Present on failure.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorPayload>,
}

impl ResponsePayload {
    /// Successful reply.
    pub fn success(id: CallId, result: Value) -> Self {
        Self {
            id,
            result: Some(result),
            error: None,
        }
    }

    /// Failed reply.
    pub fn failure(id: CallId, error: ErrorPayload) -> Self {
        Self {
            id,
            result: None,
            error: Some(error),
        }
    }

    /// Collapse into a result, upholding the exactly-one-of invariant:
    /// an error wins, an absent result decodes as JSON null.
    pub fn into_outcome(self) -> Result<Value, ErrorPayload> {
        match self.error {
            Some(error) => Err(error),
            None => Ok(self.result.unwrap_or(Value::Null)),
        }
    }
}

// ============================================================================
// Worker-reported errors
// ============================================================================

/// An error raised inside a worker, carried verbatim across the message
/// boundary with name, message and (when available) stack preserved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorPayload {
    /// Error class name, e.g. `FunctionNotFoundError`.
    pub name: String,
    /// Human-readable message.
    pub message: String,
    /// Stack trace, when the worker captured one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stack: Option<String>,
}

impl ErrorPayload {
    pub fn new(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            message: message.into(),
            stack: None,
        }
    }

    /// Attach a captured stack trace.
    pub fn with_stack(mut self, stack: impl Into<String>) -> Self {
        self.stack = Some(stack.into());
        self
    }

    /// The reply a worker sends when the requested function is not in its
    /// registry. The worker itself stays usable afterwards.
    pub fn function_not_found(func: &str) -> Self {
        Self::new(
            error_names::FUNCTION_NOT_FOUND,
            format!("Function '{func}' not found in worker."),
        )
    }

    /// A worker crash (panicked handler, dead task).
    pub fn crash(message: impl Into<String>) -> Self {
        Self::new(error_names::WORKER_CRASHED, message)
    }
}

impl std::fmt::Display for ErrorPayload {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.name.is_empty() {
            write!(f, "{}", self.message)
        } else {
            write!(f, "{}: {}", self.name, self.message)
        }
    }
}

impl From<anyhow::Error> for ErrorPayload {
    fn from(err: anyhow::Error) -> Self {
        // The chain rendering stands in for a stack trace.
        Self {
            name: "Error".to_string(),
            message: err.to_string(),
            stack: Some(format!("{err:#}")),
        }
    }
}
