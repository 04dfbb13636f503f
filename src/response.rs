//! The uniform response envelope returned for every service request.
//!
//! Exactly one [`ServiceResponse`] is produced per request, including requests
//! rejected by validation and runs that failed to start. Timestamps serialize
//! as RFC 3339 (ISO-8601) strings and round-trip losslessly.

use std::fmt;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::cli::harness::Execution;
use crate::cli::profiles::Service;
use crate::error::{Failure, ReconError};

/// Uniform result envelope for one service invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceResponse {
    pub service: Service,
    pub target: String,
    pub process_start_time: DateTime<Utc>,
    pub process_end_time: DateTime<Utc>,
    pub process_time_ms: i64,
    pub arguments: Map<String, Value>,
    pub raw_command: String,
    pub return_code: i32,
    pub raw_output: String,
    pub raw_error: String,
    pub structured_output: Map<String, Value>,
}

/// Milliseconds between two instants, rounded to nearest, never negative.
pub fn elapsed_ms(start: DateTime<Utc>, end: DateTime<Utc>) -> i64 {
    match (end - start).num_microseconds() {
        Some(micros) if micros > 0 => (micros + 500) / 1000,
        Some(_) => 0,
        None => (end - start).num_milliseconds().max(0),
    }
}

impl ServiceResponse {
    /// Empty envelope bounded by `started`/`finished` (clamped so end >= start).
    pub fn new(
        service: Service,
        target: impl Into<String>,
        arguments: Map<String, Value>,
        started: DateTime<Utc>,
        finished: DateTime<Utc>,
    ) -> Self {
        let finished = finished.max(started);
        Self {
            service,
            target: target.into(),
            process_start_time: started,
            process_end_time: finished,
            process_time_ms: elapsed_ms(started, finished),
            arguments,
            raw_command: String::new(),
            return_code: 0,
            raw_output: String::new(),
            raw_error: String::new(),
            structured_output: Map::new(),
        }
    }

    /// Envelope for a request that never reached process execution.
    pub fn rejected(
        service: Service,
        target: impl Into<String>,
        arguments: Map<String, Value>,
        started: DateTime<Utc>,
        failure: &Failure,
    ) -> Self {
        let mut response = Self::new(service, target, arguments, started, Utc::now());
        response.add_error(&failure.to_string(), Some(failure.return_code()));
        response
    }

    /// Envelope for a run that reached the process runner.
    ///
    /// `failure` (timeout, missing tool, launch error) is appended to the
    /// captured stderr; the return code always comes from the execution.
    pub fn from_execution(
        service: Service,
        target: impl Into<String>,
        arguments: Map<String, Value>,
        raw_command: String,
        execution: Execution,
        structured_output: Map<String, Value>,
        failure: Option<&Failure>,
    ) -> Self {
        let mut response = Self::new(
            service,
            target,
            arguments,
            execution.started_at,
            execution.finished_at,
        );
        response.raw_command = raw_command;
        response.return_code = execution.return_code();
        response.raw_output = execution.stdout;
        response.raw_error = execution.stderr;
        response.structured_output = structured_output;
        if let Some(failure) = failure {
            response.add_error(&failure.to_string(), None);
        }
        response
    }

    /// Append a line to `raw_error`, optionally overriding the return code.
    pub fn add_error(&mut self, message: &str, return_code: Option<i32>) {
        if let Some(code) = return_code {
            self.return_code = code;
        }
        if !self.raw_error.is_empty() && !self.raw_error.ends_with('\n') {
            self.raw_error.push('\n');
        }
        self.raw_error.push_str(message);
    }

    /// `return_code == 0 && raw_error == ""`.
    pub fn is_successful(&self) -> bool {
        !self.has_errors()
    }

    pub fn has_errors(&self) -> bool {
        self.return_code != 0 || !self.raw_error.is_empty()
    }

    pub fn to_value(&self) -> crate::Result<Value> {
        serde_json::to_value(self).map_err(|e| ReconError::Serialization(e.to_string()))
    }

    pub fn to_json(&self) -> crate::Result<String> {
        serde_json::to_string_pretty(self).map_err(|e| ReconError::Serialization(e.to_string()))
    }

    pub fn from_json(json: &str) -> crate::Result<Self> {
        serde_json::from_str(json).map_err(|e| ReconError::Serialization(e.to_string()))
    }
}

fn write_block(f: &mut fmt::Formatter<'_>, label: &str, text: &str) -> fmt::Result {
    if text.is_empty() {
        return writeln!(f, "{}:", label);
    }
    writeln!(f, "{}:", label)?;
    for line in text.lines() {
        writeln!(f, "  {}", line)?;
    }
    Ok(())
}

/// Plain-text rendering for humans, fields in envelope order.
impl fmt::Display for ServiceResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "service: {}", self.service)?;
        writeln!(f, "target: {}", self.target)?;
        writeln!(
            f,
            "process_start_time: {}",
            self.process_start_time.to_rfc3339_opts(SecondsFormat::Millis, true)
        )?;
        writeln!(
            f,
            "process_end_time: {}",
            self.process_end_time.to_rfc3339_opts(SecondsFormat::Millis, true)
        )?;
        writeln!(f, "process_time_ms: {}", self.process_time_ms)?;
        writeln!(f, "arguments:")?;
        for (name, value) in &self.arguments {
            match value {
                Value::String(s) => writeln!(f, "  {}: {}", name, s)?,
                other => writeln!(f, "  {}: {}", name, other)?,
            }
        }
        writeln!(f, "raw_command: {}", self.raw_command)?;
        writeln!(f, "return_code: {}", self.return_code)?;
        write_block(f, "raw_output", &self.raw_output)?;
        write_block(f, "raw_error", &self.raw_error)?;
        let structured = serde_json::to_string_pretty(&self.structured_output)
            .unwrap_or_else(|_| "{}".to_string());
        write_block(f, "structured_output", &structured)
    }
}
