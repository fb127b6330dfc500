//! Line-based unified diffs
//!
//! [`unified_diff`] computes a shortest edit script (Myers) over lines and
//! renders it with three lines of context. [`parse_unified_diff`] and
//! [`apply`] read it back. Lines keep their terminators, so a missing final
//! newline is preserved through the `\ No newline at end of file` marker and
//! `apply(old, &unified_diff(old, new))` reproduces `new` byte for byte.
//!
//! Identical texts produce an empty diff.

use crate::error::DiffError;

/// Context lines around each change
pub const CONTEXT_LINES: usize = 3;

/// Header labels used for ledger diffs
pub const OLD_LABEL: &str = "a/code";
/// Header labels used for ledger diffs
pub const NEW_LABEL: &str = "b/code";

const NO_NEWLINE_MARKER: &str = "\\ No newline at end of file";

/// A single line in a diff hunk (text includes its `\n` when present)
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiffLine {
    /// Unchanged line
    Context(String),
    /// Added line
    Add(String),
    /// Removed line
    Remove(String),
}

impl DiffLine {
    /// Line text
    #[must_use]
    pub fn content(&self) -> &str {
        match self {
            Self::Context(s) | Self::Add(s) | Self::Remove(s) => s,
        }
    }
}

/// A hunk in a unified diff
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiffHunk {
    /// 1-based first old line (the line before, when `old_count` is 0)
    pub old_start: usize,
    /// Old lines covered
    pub old_count: usize,
    /// 1-based first new line (the line before, when `new_count` is 0)
    pub new_start: usize,
    /// New lines covered
    pub new_count: usize,
    /// Body
    pub lines: Vec<DiffLine>,
}

impl DiffHunk {
    /// Additions and removals in this hunk
    #[must_use]
    pub fn summary(&self) -> (usize, usize) {
        let adds = self.lines.iter().filter(|l| matches!(l, DiffLine::Add(_))).count();
        let removes = self.lines.iter().filter(|l| matches!(l, DiffLine::Remove(_))).count();
        (adds, removes)
    }
}

/// A parsed unified diff
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct UnifiedDiff {
    /// `---` label
    pub old_path: String,
    /// `+++` label
    pub new_path: String,
    /// Hunks in order
    pub hunks: Vec<DiffHunk>,
}

impl UnifiedDiff {
    /// Total additions and removals
    #[must_use]
    pub fn stats(&self) -> (usize, usize) {
        self.hunks.iter().fold((0, 0), |acc, h| {
            let (a, r) = h.summary();
            (acc.0 + a, acc.1 + r)
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Edit {
    Equal(usize, usize),
    Delete(usize),
    Insert(usize),
}

fn split_lines(text: &str) -> Vec<&str> {
    text.split_inclusive('\n').collect()
}

/// Myers shortest edit script
#[allow(clippy::cast_possible_wrap, clippy::cast_sign_loss)]
fn shortest_edit(a: &[&str], b: &[&str]) -> Vec<Edit> {
    let n = a.len() as isize;
    let m = b.len() as isize;
    let max = a.len() + b.len();
    if max == 0 {
        return Vec::new();
    }
    let offset = max as isize;
    let index = |k: isize| (k + offset) as usize;

    let mut v = vec![0isize; 2 * max + 2];
    let mut trace: Vec<Vec<isize>> = Vec::new();
    'search: for d in 0..=offset {
        trace.push(v.clone());
        let mut k = -d;
        while k <= d {
            let mut x = if k == -d || (k != d && v[index(k - 1)] < v[index(k + 1)]) {
                v[index(k + 1)]
            } else {
                v[index(k - 1)] + 1
            };
            let mut y = x - k;
            while x < n && y < m && a[x as usize] == b[y as usize] {
                x += 1;
                y += 1;
            }
            v[index(k)] = x;
            if x >= n && y >= m {
                break 'search;
            }
            k += 2;
        }
    }

    let mut edits = Vec::with_capacity(max);
    let (mut x, mut y) = (n, m);
    for (d, v) in trace.iter().enumerate().rev() {
        let d = d as isize;
        let k = x - y;
        let prev_k = if k == -d || (k != d && v[index(k - 1)] < v[index(k + 1)]) {
            k + 1
        } else {
            k - 1
        };
        let prev_x = v[index(prev_k)];
        let prev_y = prev_x - prev_k;
        while x > prev_x && y > prev_y {
            edits.push(Edit::Equal((x - 1) as usize, (y - 1) as usize));
            x -= 1;
            y -= 1;
        }
        if d > 0 {
            if x == prev_x {
                edits.push(Edit::Insert((y - 1) as usize));
            } else {
                edits.push(Edit::Delete((x - 1) as usize));
            }
        }
        x = prev_x;
        y = prev_y;
    }
    edits.reverse();
    edits
}

/// Compute the unified diff between two texts with the ledger labels
#[must_use]
pub fn unified_diff(old: &str, new: &str) -> String {
    unified_diff_labeled(old, new, OLD_LABEL, NEW_LABEL)
}

/// Compute the unified diff between two texts
#[must_use]
pub fn unified_diff_labeled(old: &str, new: &str, old_label: &str, new_label: &str) -> String {
    if old == new {
        return String::new();
    }
    let a = split_lines(old);
    let b = split_lines(new);
    let edits = shortest_edit(&a, &b);

    // Cursor (old, new) before each edit
    let mut positions = Vec::with_capacity(edits.len() + 1);
    let (mut oi, mut ni) = (0usize, 0usize);
    for edit in &edits {
        positions.push((oi, ni));
        match edit {
            Edit::Equal(..) => {
                oi += 1;
                ni += 1;
            }
            Edit::Delete(_) => oi += 1,
            Edit::Insert(_) => ni += 1,
        }
    }
    positions.push((oi, ni));

    let is_change = |e: &Edit| !matches!(e, Edit::Equal(..));
    let mut out = format!("--- {old_label}\n+++ {new_label}\n");
    let mut i = 0;
    while let Some(first) = (i..edits.len()).find(|&j| is_change(&edits[j])) {
        let start = first.saturating_sub(CONTEXT_LINES).max(i);
        let mut j = first;
        let end = loop {
            while j < edits.len() && is_change(&edits[j]) {
                j += 1;
            }
            let mut k = j;
            while k < edits.len() && !is_change(&edits[k]) {
                k += 1;
            }
            if k < edits.len() && k - j <= 2 * CONTEXT_LINES {
                j = k;
            } else {
                break j;
            }
        };
        let stop = (end + CONTEXT_LINES).min(edits.len());
        render_hunk(&mut out, &edits[start..stop], positions[start], &a, &b);
        i = stop;
    }
    out
}

fn render_hunk(out: &mut String, edits: &[Edit], (old_before, new_before): (usize, usize), a: &[&str], b: &[&str]) {
    let old_count = edits.iter().filter(|e| !matches!(e, Edit::Insert(_))).count();
    let new_count = edits.iter().filter(|e| !matches!(e, Edit::Delete(_))).count();
    out.push_str("@@ -");
    out.push_str(&format_range(old_before, old_count));
    out.push_str(" +");
    out.push_str(&format_range(new_before, new_count));
    out.push_str(" @@\n");
    for edit in edits {
        let (prefix, text) = match *edit {
            Edit::Equal(x, _) => (' ', a[x]),
            Edit::Delete(x) => ('-', a[x]),
            Edit::Insert(y) => ('+', b[y]),
        };
        out.push(prefix);
        out.push_str(text);
        if !text.ends_with('\n') {
            out.push('\n');
            out.push_str(NO_NEWLINE_MARKER);
            out.push('\n');
        }
    }
}

fn format_range(before: usize, count: usize) -> String {
    match count {
        0 => format!("{before},0"),
        1 => format!("{}", before + 1),
        n => format!("{},{n}", before + 1),
    }
}

fn parse_range(spec: &str, line: usize) -> Result<(usize, usize), DiffError> {
    let malformed = || DiffError::Malformed {
        line,
        reason: format!("bad range {spec:?}"),
    };
    let (start, count) = match spec.split_once(',') {
        Some((s, c)) => (s, c.parse::<usize>().map_err(|_| malformed())?),
        None => (spec, 1),
    };
    Ok((start.parse::<usize>().map_err(|_| malformed())?, count))
}

fn parse_hunk_header(header: &str, line: usize) -> Result<DiffHunk, DiffError> {
    let malformed = |reason: &str| DiffError::Malformed {
        line,
        reason: reason.to_string(),
    };
    let body = header
        .strip_prefix("@@ ")
        .and_then(|rest| rest.split(" @@").next())
        .ok_or_else(|| malformed("expected `@@ -a,b +c,d @@`"))?;
    let mut parts = body.split_whitespace();
    let old = parts
        .next()
        .and_then(|p| p.strip_prefix('-'))
        .ok_or_else(|| malformed("missing old range"))?;
    let new = parts
        .next()
        .and_then(|p| p.strip_prefix('+'))
        .ok_or_else(|| malformed("missing new range"))?;
    let (old_start, old_count) = parse_range(old, line)?;
    let (new_start, new_count) = parse_range(new, line)?;
    Ok(DiffHunk {
        old_start,
        old_count,
        new_start,
        new_count,
        lines: Vec::new(),
    })
}

/// Parse a unified diff. Empty text parses to a diff with no hunks.
///
/// # Errors
/// `DiffError::Malformed` for unexpected lines, `DiffError::CountMismatch`
/// when a hunk body disagrees with its header.
pub fn parse_unified_diff(diff: &str) -> Result<UnifiedDiff, DiffError> {
    let mut parsed = UnifiedDiff::default();
    let mut current: Option<DiffHunk> = None;

    for (idx, raw) in diff.split_inclusive('\n').enumerate() {
        let line_no = idx + 1;
        let bare = raw.strip_suffix('\n').unwrap_or(raw);

        if current.is_none() {
            if let Some(path) = bare.strip_prefix("--- ") {
                parsed.old_path = path.to_string();
                continue;
            }
            if let Some(path) = bare.strip_prefix("+++ ") {
                parsed.new_path = path.to_string();
                continue;
            }
        }
        if bare.starts_with("@@ ") {
            if let Some(done) = current.take() {
                parsed.hunks.push(finish_hunk(done, parsed.hunks.len() + 1)?);
            }
            current = Some(parse_hunk_header(bare, line_no)?);
            continue;
        }

        let Some(hunk) = current.as_mut() else {
            if bare.is_empty() {
                continue;
            }
            return Err(DiffError::Malformed {
                line: line_no,
                reason: "content outside a hunk".to_string(),
            });
        };
        if bare.starts_with('\\') {
            match hunk.lines.last_mut() {
                Some(DiffLine::Context(t) | DiffLine::Add(t) | DiffLine::Remove(t)) => {
                    if t.ends_with('\n') {
                        t.pop();
                    }
                }
                None => {
                    return Err(DiffError::Malformed {
                        line: line_no,
                        reason: "newline marker without a preceding line".to_string(),
                    })
                }
            }
            continue;
        }
        let mut chars = raw.chars();
        let entry = match chars.next() {
            Some(' ') => DiffLine::Context(chars.as_str().to_string()),
            Some('+') => DiffLine::Add(chars.as_str().to_string()),
            Some('-') => DiffLine::Remove(chars.as_str().to_string()),
            Some('\n') => DiffLine::Context("\n".to_string()),
            _ => {
                return Err(DiffError::Malformed {
                    line: line_no,
                    reason: format!("unexpected line {bare:?}"),
                })
            }
        };
        hunk.lines.push(entry);
    }
    if let Some(done) = current.take() {
        parsed.hunks.push(finish_hunk(done, parsed.hunks.len() + 1)?);
    }
    Ok(parsed)
}

fn finish_hunk(hunk: DiffHunk, index: usize) -> Result<DiffHunk, DiffError> {
    let old = hunk.lines.iter().filter(|l| !matches!(l, DiffLine::Add(_))).count();
    let new = hunk.lines.iter().filter(|l| !matches!(l, DiffLine::Remove(_))).count();
    if old != hunk.old_count || new != hunk.new_count {
        return Err(DiffError::CountMismatch { hunk: index });
    }
    Ok(hunk)
}

/// Apply a unified diff to `original` with strict context matching
///
/// # Errors
/// Any parse error, a hunk out of range, or a context/removed line that
/// does not match `original`.
pub fn apply(original: &str, diff: &str) -> Result<String, DiffError> {
    let parsed = parse_unified_diff(diff)?;
    let lines = split_lines(original);
    let mut out = String::with_capacity(original.len());
    let mut cursor = 0usize;

    for (idx, hunk) in parsed.hunks.iter().enumerate() {
        let start = if hunk.old_count == 0 {
            Some(hunk.old_start)
        } else {
            hunk.old_start.checked_sub(1)
        };
        let start = match start {
            Some(s) if s >= cursor && s <= lines.len() => s,
            _ => return Err(DiffError::HunkOutOfRange { hunk: idx + 1 }),
        };
        for line in &lines[cursor..start] {
            out.push_str(line);
        }
        cursor = start;

        for line in &hunk.lines {
            match line {
                DiffLine::Context(text) | DiffLine::Remove(text) => {
                    let found = lines.get(cursor).copied().unwrap_or("");
                    if found != text {
                        return Err(DiffError::ContextMismatch {
                            line: cursor + 1,
                            expected: text.clone(),
                            found: found.to_string(),
                        });
                    }
                    if matches!(line, DiffLine::Context(_)) {
                        out.push_str(text);
                    }
                    cursor += 1;
                }
                DiffLine::Add(text) => out.push_str(text),
            }
        }
    }
    for line in &lines[cursor.min(lines.len())..] {
        out.push_str(line);
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_identical_texts_produce_empty_diff() {
        assert_eq!(unified_diff("a\nb\n", "a\nb\n"), "");
        assert_eq!(apply("a\nb\n", "").unwrap(), "a\nb\n");
    }

    #[test]
    fn test_single_line_change() {
        let old = "for i in range(len(xs) + 1):\n    print(xs[i])\n";
        let new = "for i in range(len(xs)):\n    print(xs[i])\n";
        let diff = unified_diff(old, new);
        assert_eq!(
            diff,
            "--- a/code\n+++ b/code\n@@ -1,2 +1,2 @@\n-for i in range(len(xs) + 1):\n+for i in range(len(xs)):\n     print(xs[i])\n"
        );
        assert_eq!(apply(old, &diff).unwrap(), new);
    }

    #[test]
    fn test_distant_changes_make_separate_hunks() {
        let old: String = (1..=20).map(|i| format!("line {i}\n")).collect();
        let new = old.replace("line 2\n", "LINE 2\n").replace("line 18\n", "LINE 18\n");
        let diff = unified_diff(&old, &new);
        let parsed = parse_unified_diff(&diff).unwrap();
        assert_eq!(parsed.hunks.len(), 2);
        assert_eq!(parsed.hunks[0].old_start, 1);
        assert_eq!(parsed.hunks[1].old_start, 15);
        assert_eq!(parsed.stats(), (2, 2));
        assert_eq!(apply(&old, &diff).unwrap(), new);
    }

    #[test]
    fn test_missing_trailing_newline_survives() {
        let old = "a\nb";
        let new = "a\nb\n";
        let diff = unified_diff(old, new);
        assert!(diff.contains(NO_NEWLINE_MARKER));
        assert_eq!(apply(old, &diff).unwrap(), new);
        assert_eq!(apply(new, &unified_diff(new, old)).unwrap(), old);
    }

    #[test]
    fn test_from_and_to_empty() {
        let diff = unified_diff("", "x\ny\n");
        assert!(diff.contains("@@ -0,0 +1,2 @@"));
        assert_eq!(apply("", &diff).unwrap(), "x\ny\n");
        assert_eq!(apply("x\ny\n", &unified_diff("x\ny\n", "")).unwrap(), "");
    }

    #[test]
    fn test_apply_rejects_wrong_base() {
        let diff = unified_diff("a\nb\nc\n", "a\nB\nc\n");
        let err = apply("a\nX\nc\n", &diff).unwrap_err();
        assert!(matches!(err, DiffError::ContextMismatch { line: 2, .. }));
    }

    #[test]
    fn test_parse_rejects_count_mismatch() {
        let diff = "--- a\n+++ b\n@@ -1,2 +1,2 @@\n-a\n+b\n";
        assert_eq!(
            parse_unified_diff(diff).unwrap_err(),
            DiffError::CountMismatch { hunk: 1 }
        );
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(matches!(
            parse_unified_diff("hello\n"),
            Err(DiffError::Malformed { line: 1, .. })
        ));
        assert!(matches!(
            parse_unified_diff("--- a\n+++ b\n@@ nonsense @@\n"),
            Err(DiffError::Malformed { line: 3, .. })
        ));
    }
}
