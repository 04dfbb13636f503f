//! Error types for the recon gateway.
//!
//! Two layers: [`ReconError`] covers conditions outside a single request
//! (configuration, unknown services), while [`Failure`] is the per-request
//! taxonomy that always ends up folded into a `ServiceResponse`.

use std::time::Duration;

use thiserror::Error;

/// Return code for a request rejected before any process was started.
pub const RC_VALIDATION: i32 = -1;
/// Return code for a run that exceeded its deadline (same as coreutils `timeout`).
pub const RC_TIMEOUT: i32 = 124;
/// Return code for a child that could not be started.
pub const RC_LAUNCH: i32 = 126;
/// Return code for a tool binary that could not be resolved.
pub const RC_TOOL_MISSING: i32 = 127;

/// Main error type for gateway operations that do not produce an envelope.
#[derive(Error, Debug)]
pub enum ReconError {
    /// No service is registered under this name
    #[error("unknown service: {0}")]
    UnknownService(String),

    /// Service exists but is disabled in config
    #[error("service '{0}' is disabled")]
    ServiceDisabled(String),

    /// Invalid configuration for a named section
    #[error("invalid config for '{0}': {1}")]
    InvalidConfig(String, String),

    /// Config file could not be read
    #[error("failed to read config {0}: {1}")]
    ConfigIo(String, String),

    /// Envelope could not be encoded or decoded
    #[error("serialization error: {0}")]
    Serialization(String),
}

/// Result type alias for gateway operations
pub type Result<T> = std::result::Result<T, ReconError>;

/// A single parameter that failed validation.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ValidationError {
    /// Required parameter absent or empty
    #[error("{0} parameter is required")]
    Missing(String),

    /// Value could not be coerced to the declared type
    #[error("{name} must be {expected}, got '{value}'")]
    TypeMismatch {
        name: String,
        expected: &'static str,
        value: String,
    },

    /// Numeric value outside its documented bounds
    #[error("{name} must be between {min} and {max}")]
    OutOfRange {
        name: String,
        min: String,
        max: String,
    },

    /// Value not in the parameter's allowed set
    #[error("{name} must be one of: {}, got '{value}'", .allowed.join(", "))]
    NotInEnum {
        name: String,
        value: String,
        allowed: Vec<String>,
    },

    /// String value rejected by the parameter's pattern
    #[error("{name} has an invalid format: '{value}'")]
    PatternMismatch { name: String, value: String },
}

impl ValidationError {
    /// Name of the offending parameter.
    pub fn param(&self) -> &str {
        match self {
            ValidationError::Missing(name) => name,
            ValidationError::TypeMismatch { name, .. }
            | ValidationError::OutOfRange { name, .. }
            | ValidationError::NotInEnum { name, .. }
            | ValidationError::PatternMismatch { name, .. } => name,
        }
    }
}

/// Per-request failure. Never propagated past the registry; each variant is
/// rendered into `raw_error` with a distinguishing return code.
#[derive(Error, Debug)]
pub enum Failure {
    /// Bad, missing or out-of-range parameter
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// Binary not found on PATH (or at its configured location)
    #[error("{binary} is not installed. Please install it with '{hint}'")]
    ToolMissing { binary: String, hint: &'static str },

    /// Deadline exceeded; the process group was terminated
    #[error("Command timed out after {} seconds", format_secs(.after))]
    Timeout { after: Duration },

    /// Process could not start for environmental reasons
    #[error("failed to launch {binary}: {message}")]
    Launch { binary: String, message: String },
}

impl Failure {
    /// Return code reported in the envelope for this failure.
    pub fn return_code(&self) -> i32 {
        match self {
            Failure::Validation(_) => RC_VALIDATION,
            Failure::ToolMissing { .. } => RC_TOOL_MISSING,
            Failure::Timeout { .. } => RC_TIMEOUT,
            Failure::Launch { .. } => RC_LAUNCH,
        }
    }
}

fn format_secs(d: &Duration) -> String {
    if d.subsec_millis() == 0 {
        d.as_secs().to_string()
    } else {
        format!("{:.1}", d.as_secs_f64())
    }
}
