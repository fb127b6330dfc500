//! Model reply parsing
//!
//! Replies are free text. Code is taken from the first fenced block
//! (```` ```lang ```` or bare ```` ``` ````); without a fence the reply minus
//! its leading prose lines is used. Labelled fields (`Category: name`) are
//! read line by line, tolerating list markers and emphasis.

use mender_sandbox::ErrorKind;
use once_cell::sync::Lazy;
use regex::Regex;

static FENCE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?s)```[A-Za-z0-9_+#.-]*[ \t]*\r?\n(.*?)```")
        .unwrap_or_else(|e| panic!("invalid fence pattern: {e}"))
});

const PROSE_PREFIXES: &[&str] = &[
    "Here", "The ", "This", "I ", "I'", "Fixed", "Sure", "Below", "Certainly", "Explanation",
];

/// Extract a candidate program from a reply.
///
/// The result follows `original`'s trailing-newline convention. `None` when
/// nothing usable was found or the candidate only differs from `original`
/// in trailing whitespace.
#[must_use]
pub fn extract_code(reply: &str, original: &str) -> Option<String> {
    let body = match FENCE.captures(reply).and_then(|c| c.get(1)) {
        Some(block) => block.as_str().to_string(),
        None => reply
            .lines()
            .skip_while(|l| l.trim().is_empty() || PROSE_PREFIXES.iter().any(|p| l.starts_with(p)))
            .collect::<Vec<_>>()
            .join("\n"),
    };
    let body = body.trim_end();
    if body.trim().is_empty() || body == original.trim_end() {
        return None;
    }
    let mut code = body.to_string();
    if original.ends_with('\n') {
        code.push('\n');
    }
    Some(code)
}

/// Value of a `Label: value` line, case-insensitive
#[must_use]
pub fn labelled_field(text: &str, label: &str) -> Option<String> {
    let label = label.to_ascii_lowercase();
    text.lines().find_map(|line| {
        let line = line
            .trim()
            .trim_start_matches(|c: char| c.is_ascii_digit() || matches!(c, '.' | '-' | '*' | '#' | ')' | ' '));
        let (key, value) = line.split_once(':')?;
        let key = key.trim().trim_matches('*').trim().to_ascii_lowercase();
        let value = value.trim().trim_matches('*').trim();
        (key == label || key.starts_with(&format!("{label} ")) || key.ends_with(&format!(" {label}")))
            .then(|| value.to_string())
            .filter(|v| !v.is_empty())
    })
}

/// Error category named in an interpreter reply
#[must_use]
pub fn parse_category(analysis: &str) -> Option<ErrorKind> {
    let value = labelled_field(analysis, "category")?;
    value
        .split(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
        .filter(|w| !w.is_empty())
        .find_map(|w| w.parse().ok())
}

/// Prose around the first fenced block, used as the generator's rationale
#[must_use]
pub fn prose_outside_fence(reply: &str) -> Option<String> {
    let m = FENCE.find(reply)?;
    let prose = format!("{} {}", reply[..m.start()].trim(), reply[m.end()..].trim());
    let prose = prose.trim();
    (!prose.is_empty()).then(|| prose.to_string())
}
