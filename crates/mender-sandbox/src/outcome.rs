//! Execution outcome types
//!
//! An [`ExecutionOutcome`] is the only thing the sandbox hands back. Timeouts
//! and crashes are classifications, not errors.

use serde::{Deserialize, Serialize};
use std::fmt::{self, Display, Formatter};
use std::str::FromStr;

/// Result class of one sandboxed run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Classification {
    /// Program exited with status 0
    Success,
    /// Program (or its compile step) failed
    Error,
    /// Program exceeded its time budget
    Timeout,
}

impl Classification {
    /// Label used in logs and metrics
    #[inline]
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Error => "error",
            Self::Timeout => "timeout",
        }
    }
}

impl Display for Classification {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Fixed error taxonomy shared by the classifier and the repair stages
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Parse or compile error
    Syntax,
    /// Undefined or misspelled identifier, missing import
    Name,
    /// Operation applied to the wrong type
    Type,
    /// Out-of-range index
    Index,
    /// Right type, wrong value
    Value,
    /// Runs but produces the wrong result
    Logical,
    /// Unbounded recursion / stack overflow
    Recursion,
    /// Any other runtime failure
    Runtime,
    /// Unclassified
    Other,
}

impl ErrorKind {
    /// All kinds, in taxonomy order
    pub const ALL: [Self; 9] = [
        Self::Syntax,
        Self::Name,
        Self::Type,
        Self::Index,
        Self::Value,
        Self::Logical,
        Self::Recursion,
        Self::Runtime,
        Self::Other,
    ];

    /// Taxonomy label
    #[inline]
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Syntax => "syntax",
            Self::Name => "name",
            Self::Type => "type",
            Self::Index => "index",
            Self::Value => "value",
            Self::Logical => "logical",
            Self::Recursion => "recursion",
            Self::Runtime => "runtime",
            Self::Other => "other",
        }
    }
}

impl Display for ErrorKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ErrorKind {
    type Err = String;

    /// Accepts `syntax`, `Syntax`, `syntax_error`, `SyntaxError` and similar
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s
            .trim()
            .to_ascii_lowercase()
            .replace(['_', '-', ' '], "");
        let stem = normalized.strip_suffix("error").unwrap_or(&normalized);
        Self::ALL
            .into_iter()
            .find(|k| k.as_str() == stem)
            .ok_or_else(|| format!("unknown error kind: {s}"))
    }
}

/// Structured view of a failure extracted from stderr
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StructuredError {
    /// Taxonomy kind
    pub kind: ErrorKind,
    /// Most specific stderr line (e.g. `NameError: name 'x' is not defined`)
    pub message: String,
    /// Full stack/trace text
    pub trace: String,
}

/// Result of one sandboxed run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionOutcome {
    /// Captured standard output (possibly truncated)
    pub stdout: String,
    /// Captured standard error (possibly truncated)
    pub stderr: String,
    /// Exit code; `128 + signal` for signalled processes, `None` when killed on timeout
    pub exit_code: Option<i32>,
    /// Result class
    pub classification: Classification,
    /// Structured error, present unless `classification` is `success`
    pub error: Option<StructuredError>,
    /// Wall-clock duration in milliseconds
    pub duration_ms: u64,
    /// Whether either stream hit the capture cap
    #[serde(default)]
    pub truncated: bool,
}

/// Message recorded for runs that exceed their time budget
pub const TIMEOUT_MESSAGE: &str = "Code execution exceeded time limit";

impl ExecutionOutcome {
    /// Create an empty outcome with the given classification
    #[inline]
    #[must_use]
    pub fn new(classification: Classification) -> Self {
        Self {
            stdout: String::new(),
            stderr: String::new(),
            exit_code: match classification {
                Classification::Success => Some(0),
                Classification::Error => Some(1),
                Classification::Timeout => None,
            },
            classification,
            error: None,
            duration_ms: 0,
            truncated: false,
        }
    }

    /// Successful run with the given stdout
    #[inline]
    #[must_use]
    pub fn success(stdout: impl Into<String>) -> Self {
        Self::new(Classification::Success).with_stdout(stdout)
    }

    /// Failed run with a structured error whose message and trace are `stderr`'s last line and full text
    #[must_use]
    pub fn failure(kind: ErrorKind, stderr: impl Into<String>) -> Self {
        let stderr = stderr.into();
        let message = last_meaningful_line(&stderr).to_string();
        Self::new(Classification::Error)
            .with_error(StructuredError {
                kind,
                message,
                trace: stderr.clone(),
            })
            .with_stderr(stderr)
    }

    /// Run that exceeded its budget, keeping whatever output was captured
    #[must_use]
    pub fn timed_out(stdout: impl Into<String>, stderr: impl Into<String>) -> Self {
        let stderr = stderr.into();
        Self::new(Classification::Timeout)
            .with_stdout(stdout)
            .with_error(StructuredError {
                kind: ErrorKind::Runtime,
                message: TIMEOUT_MESSAGE.to_string(),
                trace: stderr.clone(),
            })
            .with_stderr(stderr)
    }

    /// Infrastructure fault folded into an `error` outcome
    #[must_use]
    pub fn infrastructure_fault(message: impl Display) -> Self {
        let text = format!("sandbox failure: {message}");
        Self::new(Classification::Error)
            .with_exit_code(None)
            .with_error(StructuredError {
                kind: ErrorKind::Other,
                message: text.clone(),
                trace: String::new(),
            })
            .with_stderr(text)
    }

    /// Set stdout
    #[inline]
    #[must_use]
    pub fn with_stdout(mut self, stdout: impl Into<String>) -> Self {
        self.stdout = stdout.into();
        self
    }

    /// Set stderr
    #[inline]
    #[must_use]
    pub fn with_stderr(mut self, stderr: impl Into<String>) -> Self {
        self.stderr = stderr.into();
        self
    }

    /// Set exit code
    #[inline]
    #[must_use]
    pub fn with_exit_code(mut self, exit_code: Option<i32>) -> Self {
        self.exit_code = exit_code;
        self
    }

    /// Set structured error
    #[inline]
    #[must_use]
    pub fn with_error(mut self, error: StructuredError) -> Self {
        self.error = Some(error);
        self
    }

    /// Set duration
    #[inline]
    #[must_use]
    pub fn with_duration_ms(mut self, duration_ms: u64) -> Self {
        self.duration_ms = duration_ms;
        self
    }

    /// Mark output as truncated
    #[inline]
    #[must_use]
    pub fn with_truncated(mut self, truncated: bool) -> Self {
        self.truncated = truncated;
        self
    }

    /// Check if the run succeeded
    #[inline]
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.classification == Classification::Success
    }

    /// Taxonomy kind of the failure, if any
    #[inline]
    #[must_use]
    pub fn error_kind(&self) -> Option<ErrorKind> {
        self.error.as_ref().map(|e| e.kind)
    }

    /// Most specific failure message, falling back to the last stderr line
    #[must_use]
    pub fn error_message(&self) -> &str {
        match &self.error {
            Some(err) => &err.message,
            None => last_meaningful_line(&self.stderr),
        }
    }

    /// One-line summary for traces and logs
    #[must_use]
    pub fn summary(&self) -> String {
        match self.classification {
            Classification::Success => format!("success in {}ms", self.duration_ms),
            Classification::Timeout => format!("timeout after {}ms", self.duration_ms),
            Classification::Error => match &self.error {
                Some(err) => format!("{} error: {}", err.kind, err.message),
                None => format!("error (exit {:?})", self.exit_code),
            },
        }
    }
}

/// Last non-empty line of `text`, trimmed
pub(crate) fn last_meaningful_line(text: &str) -> &str {
    text.lines()
        .rev()
        .map(str::trim)
        .find(|l| !l.is_empty())
        .unwrap_or("")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kind_parsing_is_lenient() {
        assert_eq!("syntax".parse::<ErrorKind>().unwrap(), ErrorKind::Syntax);
        assert_eq!("NameError".parse::<ErrorKind>().unwrap(), ErrorKind::Name);
        assert_eq!("index_error".parse::<ErrorKind>().unwrap(), ErrorKind::Index);
        assert_eq!(" Recursion ".parse::<ErrorKind>().unwrap(), ErrorKind::Recursion);
        assert!("banana".parse::<ErrorKind>().is_err());
    }

    #[test]
    fn test_failure_uses_last_line_as_message() {
        let out = ExecutionOutcome::failure(
            ErrorKind::Name,
            "Traceback (most recent call last):\n  File \"main.py\", line 1\nNameError: name 'x' is not defined\n\n",
        );
        assert_eq!(out.error_message(), "NameError: name 'x' is not defined");
        assert_eq!(out.error_kind(), Some(ErrorKind::Name));
        assert!(!out.is_success());
    }

    #[test]
    fn test_timeout_has_runtime_kind_and_no_exit_code() {
        let out = ExecutionOutcome::timed_out("partial", "");
        assert_eq!(out.classification, Classification::Timeout);
        assert_eq!(out.exit_code, None);
        assert_eq!(out.error_message(), TIMEOUT_MESSAGE);
        assert_eq!(out.stdout, "partial");
    }

    #[test]
    fn test_serde_shape() {
        let json = serde_json::to_value(ExecutionOutcome::success("ok")).unwrap();
        assert_eq!(json["classification"], "success");
        assert_eq!(json["exit_code"], 0);
        assert!(json["error"].is_null());
    }
}
