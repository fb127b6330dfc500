//! Stderr classification
//!
//! Turns the raw result of a run (exit status, captured streams, whether it
//! timed out, which phase failed) into an [`ExecutionOutcome`] with a
//! [`StructuredError`] drawn from the fixed taxonomy.
//!
//! A zero exit status is always `success`, even when stderr is non-empty:
//! warnings do not fail a run.

use crate::language::Language;
use crate::outcome::{
    last_meaningful_line, Classification, ErrorKind, ExecutionOutcome, StructuredError,
};
use once_cell::sync::Lazy;
use regex::Regex;

/// Prefix recorded in stderr when the compile step fails
pub const COMPILE_FAILED_PREFIX: &str = "Compilation failed:";

/// Compile a regex literal owned by this crate.
///
/// # Panics
/// Panics if `pattern` is not a valid regex. Only called with literals
/// covered by the unit tests below.
pub(crate) fn builtin_regex(pattern: &str) -> Regex {
    Regex::new(pattern).unwrap_or_else(|e| panic!("invalid built-in pattern {pattern:?}: {e}"))
}

/// Exception-like identifiers at the start of a line: `NameError: ...`,
/// `java.lang.ArithmeticException: ...`, `Uncaught ReferenceError: ...`
static EXCEPTION_LINE: Lazy<Regex> = Lazy::new(|| {
    builtin_regex(
        r"^(?:Uncaught\s+)?(?:Exception in thread .*?\s)?(?:[a-z_][\w]*\.)*([A-Z]\w*(?:Error|Exception|Exit|Interrupt))\b",
    )
});

/// Rust and Go panics
static PANIC_LINE: Lazy<Regex> =
    Lazy::new(|| builtin_regex(r"^(?:thread '.*' panicked at|panic: |fatal error: )"));

/// Which phase of the run a raw result came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Compile step of a compiled language
    Compile,
    /// The program itself
    Run,
}

/// Raw result of a child process, before classification
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawRun {
    /// Phase that produced this result
    pub phase: Phase,
    /// Captured stdout
    pub stdout: String,
    /// Captured stderr
    pub stderr: String,
    /// Exit code (`128 + signal` when signalled)
    pub exit_code: Option<i32>,
    /// Whether the time budget was exceeded
    pub timed_out: bool,
    /// Whether output was capped
    pub truncated: bool,
    /// Wall-clock duration in milliseconds
    pub duration_ms: u64,
}

/// Classify a raw run into an outcome
#[must_use]
pub fn classify(language: Language, raw: RawRun) -> ExecutionOutcome {
    let outcome = if raw.timed_out {
        ExecutionOutcome::timed_out(raw.stdout, raw.stderr)
    } else if raw.phase == Phase::Compile && raw.exit_code != Some(0) {
        let stderr = format!("{COMPILE_FAILED_PREFIX}\n{}", raw.stderr);
        let message = compile_message(&raw.stderr);
        ExecutionOutcome::new(Classification::Error)
            .with_stdout(raw.stdout)
            .with_exit_code(raw.exit_code)
            .with_error(StructuredError {
                kind: ErrorKind::Syntax,
                message,
                trace: stderr.clone(),
            })
            .with_stderr(stderr)
    } else if raw.exit_code == Some(0) {
        ExecutionOutcome::new(Classification::Success)
            .with_stdout(raw.stdout)
            .with_stderr(raw.stderr)
    } else {
        let (kind, message) = analyze_stderr(language, &raw.stderr, raw.exit_code);
        ExecutionOutcome::new(Classification::Error)
            .with_stdout(raw.stdout)
            .with_exit_code(raw.exit_code)
            .with_error(StructuredError {
                kind,
                message,
                trace: raw.stderr.clone(),
            })
            .with_stderr(raw.stderr)
    };
    outcome
        .with_duration_ms(raw.duration_ms)
        .with_truncated(raw.truncated)
}

/// Extract the error kind and most specific message from stderr
#[must_use]
pub fn analyze_stderr(language: Language, stderr: &str, exit_code: Option<i32>) -> (ErrorKind, String) {
    for line in stderr.lines().rev().map(str::trim) {
        if let Some(name) = EXCEPTION_LINE.captures(line).and_then(|c| c.get(1)) {
            return (kind_for_exception(language, name.as_str(), line), line.to_string());
        }
    }

    if let Some(line) = stderr.lines().map(str::trim).find(|l| PANIC_LINE.is_match(l)) {
        return (kind_for_panic(stderr), line.to_string());
    }

    let last = last_meaningful_line(stderr);
    if last.is_empty() {
        let message = match exit_code {
            Some(code) if code > 128 => format!("terminated by signal {}", code - 128),
            Some(code) => format!("exited with status {code}"),
            None => "terminated without exit status".to_string(),
        };
        let kind = if exit_code.is_some_and(|c| c > 128) {
            ErrorKind::Runtime
        } else {
            ErrorKind::Other
        };
        return (kind, message);
    }

    let lower = stderr.to_ascii_lowercase();
    let kind = if lower.contains("segmentation fault") || lower.contains("core dumped") {
        ErrorKind::Runtime
    } else if lower.contains("stack overflow") || lower.contains("recursion") {
        ErrorKind::Recursion
    } else {
        ErrorKind::Other
    };
    (kind, last.to_string())
}

fn kind_for_exception(language: Language, name: &str, line: &str) -> ErrorKind {
    match name {
        "SyntaxError" | "IndentationError" | "TabError" => ErrorKind::Syntax,
        "NameError" | "UnboundLocalError" | "ImportError" | "ModuleNotFoundError"
        | "ReferenceError" | "ClassNotFoundException" | "NoClassDefFoundError" => ErrorKind::Name,
        "TypeError" | "ClassCastException" => ErrorKind::Type,
        "IndexError"
        | "ArrayIndexOutOfBoundsException"
        | "StringIndexOutOfBoundsException"
        | "IndexOutOfBoundsException" => ErrorKind::Index,
        "ValueError" | "NumberFormatException" | "IllegalArgumentException" => ErrorKind::Value,
        "RecursionError" | "StackOverflowError" => ErrorKind::Recursion,
        "RangeError" if line.contains("call stack") => ErrorKind::Recursion,
        "RangeError" => ErrorKind::Value,
        "AssertionError" if language == Language::Python => ErrorKind::Logical,
        _ => ErrorKind::Runtime,
    }
}

fn kind_for_panic(stderr: &str) -> ErrorKind {
    if stderr.contains("index out of bounds") || stderr.contains("index out of range") {
        ErrorKind::Index
    } else if stderr.contains("stack overflow") || stderr.contains("stack exceeds") {
        ErrorKind::Recursion
    } else if stderr.contains("assertion") {
        ErrorKind::Logical
    } else {
        ErrorKind::Runtime
    }
}

fn compile_message(stderr: &str) -> String {
    stderr
        .lines()
        .map(str::trim)
        .find(|l| l.contains("error"))
        .unwrap_or_else(|| last_meaningful_line(stderr))
        .to_string()
}
