//! Prompt templates for the model-backed stages

use mender_sandbox::{ErrorKind, ExecutionOutcome, Language};
use std::fmt::Write;

fn taxonomy() -> String {
    ErrorKind::ALL
        .iter()
        .map(ErrorKind::as_str)
        .collect::<Vec<_>>()
        .join(", ")
}

fn fenced(language: Language, code: &str) -> String {
    format!("```{}\n{}\n```", language.as_str(), code.trim_end())
}

/// Error interpreter prompt
#[must_use]
pub fn interpret(code: &str, language: Language, outcome: &ExecutionOutcome) -> String {
    format!(
        "You are an expert {language} debugger. Analyze this failed execution precisely.\n\n\
         CODE:\n{code}\n\n\
         RESULT: {classification}\n\
         ERROR: {message}\n\n\
         STDERR:\n{stderr}\n\n\
         Answer with these lines:\n\
         Category: one of [{taxonomy}]\n\
         Line: the line that caused the error\n\
         Root cause: why it failed\n\
         Fix: the minimal change needed\n\
         Be specific and concise. Focus on the actual error.",
        code = fenced(language, code),
        classification = outcome.classification,
        message = outcome.error_message(),
        stderr = outcome.stderr.trim_end(),
        taxonomy = taxonomy(),
    )
}

/// Patch generator prompt
///
/// `history` lists rationales of earlier attempts in this session;
/// `rejection` is the validator outcome of the previous candidate.
#[must_use]
pub fn generate(
    code: &str,
    language: Language,
    outcome: &ExecutionOutcome,
    analysis: &str,
    history: &[String],
    rejection: Option<(&str, &ExecutionOutcome)>,
) -> String {
    let mut prompt = format!(
        "You are a precise {language} code fixer. Fix ONLY the reported error with MINIMAL changes.\n\n\
         ORIGINAL CODE:\n{code}\n\n\
         ERROR:\n{message}\n\n\
         ANALYSIS:\n{analysis}\n",
        code = fenced(language, code),
        message = outcome.error_message(),
        analysis = analysis.trim(),
    );
    if !history.is_empty() {
        prompt.push_str("\nALREADY TRIED (do not repeat):\n");
        for item in history {
            let _ = writeln!(prompt, "- {item}");
        }
    }
    if let Some((candidate, verdict)) = rejection {
        let _ = write!(
            prompt,
            "\nYOUR PREVIOUS ATTEMPT FAILED VALIDATION:\n{}\nIt produced: {}\n",
            fenced(language, candidate),
            verdict.summary(),
        );
    }
    prompt.push_str(
        "\nRULES:\n\
         1. Change only the line(s) that caused the error\n\
         2. Do not add features, comments or unrelated imports\n\
         3. Return the complete fixed program in one fenced code block\n\n\
         FIXED CODE:",
    );
    prompt
}

/// Test creator prompt
#[must_use]
pub fn create_tests(code: &str, language: Language) -> String {
    format!(
        "You are an expert at writing {language} tests. Write 2-3 simple test cases for this code.\n\n\
         {code}\n\n\
         Reply with the test code only, in one fenced code block.",
        code = fenced(language, code),
    )
}

/// Refactor prompt
#[must_use]
pub fn refactor(code: &str, language: Language) -> String {
    format!(
        "You are an expert at {language} refactoring. Improve readability of this working code \
         without changing its behavior or output.\n\n\
         {code}\n\n\
         Reply with the refactored program only, in one fenced code block.",
        code = fenced(language, code),
    )
}

/// Explainer prompt
#[must_use]
pub fn explain(before: &str, after: &str, language: Language, outcome: &ExecutionOutcome, analysis: &str) -> String {
    format!(
        "Summarize this {language} fix for a developer in under 100 words: what was wrong, \
         what changed, and why the change works.\n\n\
         ORIGINAL ERROR: {message}\n\n\
         ANALYSIS:\n{analysis}\n\n\
         BEFORE:\n{before}\n\n\
         AFTER:\n{after}",
        message = outcome.error_message(),
        analysis = analysis.trim(),
        before = fenced(language, before),
        after = fenced(language, after),
    )
}
