//! Deterministic pattern fixes
//!
//! The rule stage runs on every failed iteration before the generative
//! pipeline, so it must be cheap and pure: no execution, no I/O, the same
//! input always yields the same fix. [`PatternRules`] walks an ordered table
//! and returns the first rule whose fix actually changes the code.
//!
//! Each rule fixes one narrow, common mistake:
//!
//! | rule | language | trigger | fix |
//! |---|---|---|---|
//! | `typo` | python, javascript | name / syntax | misspelled keyword or builtin |
//! | `print_statement` | python | syntax | `print x` to `print(x)` |
//! | `missing_colon` | python | syntax | trailing `:` on block headers |
//! | `str_concat` | python | type | wrap the non-string operand in `str()` |
//! | `off_by_one` | python | index | `range(len(x) + 1)`, `<= len(x)`, `x[len(x)]` |
//! | `missing_import` | python | name | add or expand the missing import |

use crate::error::RepairError;
use mender_sandbox::{ErrorKind, ExecutionOutcome, Language};
use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use std::fmt;

/// Fix proposed by a rule
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuleFix {
    /// Full replacement code
    pub code: String,
    /// Short rationale
    pub reasoning: String,
    /// Error category the fix addresses
    pub category: ErrorKind,
    /// Name of the rule that fired
    pub rule: &'static str,
}

/// Rule stage seam
///
/// Implementations must be deterministic and must never execute code.
pub trait RuleStage: Send + Sync {
    /// Propose a replacement for `code` after it failed with `outcome`.
    ///
    /// # Errors
    /// A `RepairError` if the stage itself broke; the caller treats this
    /// like "no match"
    fn propose(
        &self,
        code: &str,
        language: Language,
        outcome: &ExecutionOutcome,
    ) -> Result<Option<RuleFix>, RepairError>;
}

/// What a rule sees of a failure
#[derive(Debug, Clone, Copy)]
pub struct FailureView<'a> {
    /// Failing code
    pub code: &'a str,
    /// Language tag
    pub language: Language,
    /// Classified kind
    pub kind: ErrorKind,
    /// Most specific error line
    pub message: &'a str,
    /// Full stderr / trace text
    pub trace: &'a str,
}

impl FailureView<'_> {
    /// 1-based line the runtime blamed, if it said
    #[must_use]
    pub fn reported_line(&self) -> Option<usize> {
        let pattern = match self.language {
            Language::Python => &*PY_LINE,
            Language::JavaScript => &*JS_LINE,
            _ => return None,
        };
        pattern
            .captures_iter(self.trace)
            .last()
            .and_then(|c| c.get(1))
            .and_then(|m| m.as_str().parse().ok())
    }

    /// Identifier named by a "not defined" error
    fn undefined_name(&self) -> Option<&str> {
        let pattern = match self.language {
            Language::Python => &*PY_UNDEFINED,
            Language::JavaScript => &*JS_UNDEFINED,
            _ => return None,
        };
        pattern
            .captures(self.message)
            .and_then(|c| c.get(1))
            .map(|m| m.as_str())
    }
}

type FixFn = fn(&FailureView<'_>) -> Option<(String, String)>;

/// One entry of the pattern table
#[derive(Clone, Copy)]
pub struct PatternRule {
    /// Rule name, recorded with the fix
    pub name: &'static str,
    /// Languages the rule understands
    pub languages: &'static [Language],
    /// Error kinds that trigger the rule; empty means any
    pub triggers: &'static [ErrorKind],
    /// Category recorded on the resulting patch
    pub category: ErrorKind,
    /// Returns the fixed code and a rationale
    pub fix: FixFn,
}

impl fmt::Debug for PatternRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PatternRule")
            .field("name", &self.name)
            .field("languages", &self.languages)
            .field("triggers", &self.triggers)
            .field("category", &self.category)
            .finish_non_exhaustive()
    }
}

impl PatternRule {
    /// Create a rule
    #[inline]
    #[must_use]
    pub const fn new(
        name: &'static str,
        languages: &'static [Language],
        triggers: &'static [ErrorKind],
        category: ErrorKind,
        fix: FixFn,
    ) -> Self {
        Self {
            name,
            languages,
            triggers,
            category,
            fix,
        }
    }

    fn applies(&self, language: Language, kind: ErrorKind) -> bool {
        self.languages.contains(&language) && (self.triggers.is_empty() || self.triggers.contains(&kind))
    }
}

/// Ordered pattern table; first effective match wins
#[derive(Debug, Clone)]
pub struct PatternRules {
    rules: Vec<PatternRule>,
}

impl Default for PatternRules {
    fn default() -> Self {
        Self::new(vec![
            PatternRule::new(
                "typo",
                &[Language::Python, Language::JavaScript],
                &[ErrorKind::Name, ErrorKind::Syntax],
                ErrorKind::Name,
                fix_typo,
            ),
            PatternRule::new(
                "print_statement",
                &[Language::Python],
                &[ErrorKind::Syntax],
                ErrorKind::Syntax,
                fix_print_statement,
            ),
            PatternRule::new(
                "missing_colon",
                &[Language::Python],
                &[ErrorKind::Syntax],
                ErrorKind::Syntax,
                fix_missing_colon,
            ),
            PatternRule::new(
                "str_concat",
                &[Language::Python],
                &[ErrorKind::Type],
                ErrorKind::Type,
                fix_str_concat,
            ),
            PatternRule::new(
                "off_by_one",
                &[Language::Python],
                &[ErrorKind::Index],
                ErrorKind::Index,
                fix_off_by_one,
            ),
            PatternRule::new(
                "missing_import",
                &[Language::Python],
                &[ErrorKind::Name],
                ErrorKind::Name,
                fix_missing_import,
            ),
        ])
    }
}

impl PatternRules {
    /// Create from an explicit table
    #[inline]
    #[must_use]
    pub fn new(rules: Vec<PatternRule>) -> Self {
        Self { rules }
    }

    /// Append a rule at the lowest priority
    #[inline]
    #[must_use]
    pub fn with_rule(mut self, rule: PatternRule) -> Self {
        self.rules.push(rule);
        self
    }

    /// Rule names in priority order
    #[must_use]
    pub fn names(&self) -> Vec<&'static str> {
        self.rules.iter().map(|r| r.name).collect()
    }

    /// Number of rules
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.rules.len()
    }

    /// Whether the table is empty
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

impl RuleStage for PatternRules {
    fn propose(
        &self,
        code: &str,
        language: Language,
        outcome: &ExecutionOutcome,
    ) -> Result<Option<RuleFix>, RepairError> {
        if outcome.is_success() {
            return Ok(None);
        }
        let view = FailureView {
            code,
            language,
            kind: outcome.error_kind().unwrap_or(ErrorKind::Other),
            message: outcome.error_message(),
            trace: outcome
                .error
                .as_ref()
                .map_or(outcome.stderr.as_str(), |e| e.trace.as_str()),
        };

        for rule in self.rules.iter().filter(|r| r.applies(language, view.kind)) {
            let Some((fixed, reasoning)) = (rule.fix)(&view) else {
                continue;
            };
            if fixed == code {
                continue;
            }
            tracing::debug!(rule = rule.name, %language, kind = %view.kind, "pattern rule matched");
            return Ok(Some(RuleFix {
                code: fixed,
                reasoning,
                category: rule.category,
                rule: rule.name,
            }));
        }
        Ok(None)
    }
}

fn pattern(re: &str) -> Regex {
    Regex::new(re).unwrap_or_else(|e| panic!("invalid rule pattern {re:?}: {e}"))
}

static PY_LINE: Lazy<Regex> = Lazy::new(|| pattern(r#"File "[^"]*", line (\d+)"#));
static JS_LINE: Lazy<Regex> = Lazy::new(|| pattern(r"\.m?js:(\d+)"));
static PY_UNDEFINED: Lazy<Regex> = Lazy::new(|| pattern(r"name '(\w+)' is not defined"));
static JS_UNDEFINED: Lazy<Regex> = Lazy::new(|| pattern(r"(\w+) is not defined"));
static PY_NO_MODULE: Lazy<Regex> = Lazy::new(|| pattern(r"No module named '(\w+)'"));

const PY_NAME_TYPOS: &[(&str, &str)] = &[
    ("ture", "True"),
    ("Ture", "True"),
    ("treu", "True"),
    ("fasle", "False"),
    ("Fasle", "False"),
    ("flase", "False"),
    ("Flase", "False"),
    ("none", "None"),
    ("pirnt", "print"),
    ("prnit", "print"),
    ("pritn", "print"),
    ("lenght", "len"),
    ("rnage", "range"),
    ("ragne", "range"),
    ("slef", "self"),
];

const PY_KEYWORD_TYPOS: &[(&str, &str)] = &[
    ("retrun", "return"),
    ("reutrn", "return"),
    ("improt", "import"),
    ("imoprt", "import"),
    ("whlie", "while"),
    ("esle", "else"),
    ("eilf", "elif"),
    ("lambada", "lambda"),
];

const JS_NAME_TYPOS: &[(&str, &str)] = &[
    ("consol", "console"),
    ("cosole", "console"),
    ("conosle", "console"),
    ("documnet", "document"),
    ("ture", "true"),
    ("flase", "false"),
    ("fasle", "false"),
];

const JS_KEYWORD_TYPOS: &[(&str, &str)] = &[
    ("fucntion", "function"),
    ("funtion", "function"),
    ("retrun", "return"),
    ("cosnt", "const"),
];

fn replace_word(code: &str, from: &str, to: &str) -> Option<String> {
    let re = Regex::new(&format!(r"\b{}\b", regex::escape(from))).ok()?;
    re.is_match(code).then(|| re.replace_all(code, to).into_owned())
}

fn fix_typo(view: &FailureView<'_>) -> Option<(String, String)> {
    let (names, keywords) = match view.language {
        Language::Python => (PY_NAME_TYPOS, PY_KEYWORD_TYPOS),
        Language::JavaScript => (JS_NAME_TYPOS, JS_KEYWORD_TYPOS),
        _ => return None,
    };

    if view.kind == ErrorKind::Name {
        let name = view.undefined_name()?;
        let (_, fixed) = names
            .iter()
            .chain(keywords)
            .find(|(typo, _)| *typo == name)?;
        let code = replace_word(view.code, name, fixed)?;
        return Some((code, format!("replaced misspelled `{name}` with `{fixed}`")));
    }

    let mut code = view.code.to_string();
    let mut replaced = Vec::new();
    for (typo, fixed) in keywords {
        if let Some(next) = replace_word(&code, typo, fixed) {
            code = next;
            replaced.push(format!("`{typo}` -> `{fixed}`"));
        }
    }
    (!replaced.is_empty()).then(|| (code, format!("fixed keyword typos: {}", replaced.join(", "))))
}

static PY2_PRINT: Lazy<Regex> = Lazy::new(|| pattern(r"^(\s*)print[ \t]+([^(=\s>].*?)\s*$"));

fn fix_print_statement(view: &FailureView<'_>) -> Option<(String, String)> {
    let mut changed = 0usize;
    let code = map_lines(view.code, |line| {
        let caps = PY2_PRINT.captures(line)?;
        changed += 1;
        Some(format!("{}print({})", &caps[1], &caps[2]))
    });
    (changed > 0).then(|| {
        (
            code,
            format!("converted {changed} Python 2 print statement(s) to print() calls"),
        )
    })
}

static BLOCK_HEADER: Lazy<Regex> = Lazy::new(|| {
    pattern(r"^(\s*)(if|elif|else|for|while|def|class|try|except|finally|with)\b(.*)$")
});

fn missing_colon(line: &str) -> Option<String> {
    let caps = BLOCK_HEADER.captures(line)?;
    let keyword = &caps[2];
    let rest = caps[3].trim();
    let trimmed = line.trim_end();
    if trimmed.ends_with(':') || trimmed.contains('#') {
        return None;
    }
    let bare = matches!(keyword, "else" | "try" | "finally");
    if bare != rest.is_empty() && !(keyword == "except" && rest.is_empty()) {
        return None;
    }
    let balanced = |open: char, close: char| {
        trimmed.matches(open).count() == trimmed.matches(close).count()
    };
    if !balanced('(', ')') || !balanced('[', ']') || !balanced('{', '}') {
        return None;
    }
    Some(format!("{trimmed}:"))
}

fn fix_missing_colon(view: &FailureView<'_>) -> Option<(String, String)> {
    let (line, code) = fix_one_line(view.code, view.reported_line(), missing_colon)?;
    Some((code, format!("added missing colon at end of line {line}")))
}

static STR_THEN_EXPR: Lazy<Regex> = Lazy::new(|| {
    pattern(
        r#"(?P<lit>"[^"\n]*"|'[^'\n]*')(?P<op>\s*\+\s*)(?P<expr>\b[A-Za-z_][\w.]*(?:\[[^\[\]\n]*\])?(?:\([^()\n]*\))?)"#,
    )
});
static EXPR_THEN_STR: Lazy<Regex> = Lazy::new(|| {
    pattern(
        r#"(?P<expr>\b[A-Za-z_][\w.]*(?:\[[^\[\]\n]*\])?(?:\([^()\n]*\))?)(?P<op>\s*\+\s*)(?P<lit>"[^"\n]*"|'[^'\n]*')"#,
    )
});

fn is_str_call(expr: &str) -> bool {
    expr.starts_with("str(")
}

fn wrap_after_literal(line: &str) -> Option<String> {
    let mut hit = false;
    let out = STR_THEN_EXPR.replace_all(line, |c: &Captures<'_>| {
        if is_str_call(&c["expr"]) {
            return c[0].to_string();
        }
        hit = true;
        format!("{}{}str({})", &c["lit"], &c["op"], &c["expr"])
    });
    hit.then(|| out.into_owned())
}

fn wrap_before_literal(line: &str) -> Option<String> {
    let mut hit = false;
    let out = EXPR_THEN_STR.replace_all(line, |c: &Captures<'_>| {
        if is_str_call(&c["expr"]) || matches!(&c["expr"], "return" | "print" | "in" | "and" | "or" | "not") {
            return c[0].to_string();
        }
        hit = true;
        format!("str({}){}{}", &c["expr"], &c["op"], &c["lit"])
    });
    hit.then(|| out.into_owned())
}

fn fix_str_concat(view: &FailureView<'_>) -> Option<(String, String)> {
    let rewrite: fn(&str) -> Option<String> = if view.message.contains("can only concatenate str") {
        wrap_after_literal
    } else if view.message.contains("unsupported operand type(s) for +") && view.message.contains("'str'") {
        wrap_before_literal
    } else {
        return None;
    };
    let (line, code) = fix_one_line(view.code, view.reported_line(), rewrite)?;
    Some((code, format!("converted non-string operand with str() on line {line}")))
}

static RANGE_PLUS_ONE: Lazy<Regex> =
    Lazy::new(|| pattern(r"range\((?P<start>[^,()]*,\s*)?len\((?P<seq>[^()]+)\)\s*\+\s*1\s*\)"));
static LE_LEN: Lazy<Regex> = Lazy::new(|| pattern(r"<=\s*len\((?P<seq>[^()]+)\)"));
static INDEX_AT_LEN: Lazy<Regex> =
    Lazy::new(|| pattern(r"(?P<name>\b[A-Za-z_][\w.]*)\[\s*len\(\s*(?P<seq>[\w.]+)\s*\)\s*\]"));

fn fix_off_by_one(view: &FailureView<'_>) -> Option<(String, String)> {
    let mut code = view.code.to_string();
    let mut fixes = Vec::new();

    if RANGE_PLUS_ONE.is_match(&code) {
        code = RANGE_PLUS_ONE
            .replace_all(&code, |c: &Captures<'_>| {
                let start = c.name("start").map_or("", |m| m.as_str());
                format!("range({start}len({}))", &c["seq"])
            })
            .into_owned();
        fixes.push("range() no longer runs past the last index");
    }
    if LE_LEN.is_match(&code) {
        code = LE_LEN
            .replace_all(&code, |c: &Captures<'_>| format!("< len({})", &c["seq"]))
            .into_owned();
        fixes.push("loop bound uses < len()");
    }
    let mut indexed = false;
    code = INDEX_AT_LEN
        .replace_all(&code, |c: &Captures<'_>| {
            if c["name"] != c["seq"] {
                return c[0].to_string();
            }
            indexed = true;
            format!("{}[len({}) - 1]", &c["name"], &c["seq"])
        })
        .into_owned();
    if indexed {
        fixes.push("last element is len() - 1");
    }

    (!fixes.is_empty()).then(|| (code, format!("fixed off-by-one: {}", fixes.join("; "))))
}

const PY_ALIASES: &[(&str, &str)] = &[
    ("np", "import numpy as np"),
    ("pd", "import pandas as pd"),
    ("plt", "import matplotlib.pyplot as plt"),
    ("sns", "import seaborn as sns"),
    ("tf", "import tensorflow as tf"),
];

const PY_STDLIB: &[&str] = &[
    "math",
    "os",
    "sys",
    "re",
    "json",
    "random",
    "time",
    "datetime",
    "collections",
    "itertools",
    "functools",
    "string",
];

fn import_for(name: &str) -> Option<String> {
    PY_ALIASES
        .iter()
        .find(|(alias, _)| *alias == name)
        .map(|(_, stmt)| (*stmt).to_string())
        .or_else(|| PY_STDLIB.contains(&name).then(|| format!("import {name}")))
}

fn insert_import(code: &str, statement: &str) -> String {
    let line = format!("{statement}\n");
    let mut lines: Vec<&str> = code.split_inclusive('\n').collect();
    let at = lines
        .iter()
        .take_while(|l| l.starts_with("#!") || l.starts_with("# -*-") || l.starts_with("from __future__"))
        .count();
    lines.insert(at, &line);
    lines.concat()
}

fn fix_missing_import(view: &FailureView<'_>) -> Option<(String, String)> {
    if let Some(module) = PY_NO_MODULE.captures(view.message).and_then(|c| c.get(1)) {
        let module = module.as_str();
        let (_, statement) = PY_ALIASES.iter().find(|(alias, _)| *alias == module)?;
        let bare = Regex::new(&format!(r"^(\s*)import\s+{}\s*$", regex::escape(module))).ok()?;
        let code = map_lines(view.code, |line| {
            bare.captures(line).map(|c| format!("{}{statement}", &c[1]))
        });
        return Some((code, format!("`{module}` is an alias; imported the real module")));
    }

    let name = view.undefined_name()?;
    let statement = import_for(name)?;
    if view.code.lines().any(|l| l.trim() == statement) {
        return None;
    }
    Some((insert_import(view.code, &statement), format!("added missing `{statement}`")))
}

/// Apply `f` to every line (without its terminator), keeping line endings
fn map_lines(code: &str, mut f: impl FnMut(&str) -> Option<String>) -> String {
    code.split_inclusive('\n')
        .map(|raw| {
            let (body, ending) = split_ending(raw);
            match f(body) {
                Some(new) => format!("{new}{ending}"),
                None => raw.to_string(),
            }
        })
        .collect()
}

/// Fix a single line: the reported one if `f` changes it, else the first
/// line `f` changes. Returns the 1-based line number and the new code.
fn fix_one_line(
    code: &str,
    reported: Option<usize>,
    f: impl Fn(&str) -> Option<String>,
) -> Option<(usize, String)> {
    let lines: Vec<&str> = code.split_inclusive('\n').collect();
    let changed = |idx: usize| {
        let (body, ending) = split_ending(lines[idx]);
        f(body).filter(|new| new != body).map(|new| format!("{new}{ending}"))
    };
    let candidates = reported
        .and_then(|n| n.checked_sub(1))
        .filter(|&idx| idx < lines.len())
        .into_iter()
        .chain(0..lines.len());
    for idx in candidates {
        if let Some(new_line) = changed(idx) {
            let mut out: String = lines[..idx].concat();
            out.push_str(&new_line);
            out.push_str(&lines[idx + 1..].concat());
            return Some((idx + 1, out));
        }
    }
    None
}

fn split_ending(raw: &str) -> (&str, &str) {
    let body = raw.trim_end_matches(['\n', '\r']);
    (body, &raw[body.len()..])
}
