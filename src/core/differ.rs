use serde::{Deserialize, Serialize};
use similar::{capture_diff_slices, Algorithm, ChangeTag};

/// One step of a line-level edit script.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", content = "line", rename_all = "lowercase")]
pub enum LineOp {
    Context(String),
    Insert(String),
    Delete(String),
}

impl LineOp {
    pub fn line(&self) -> &str {
        match self {
            LineOp::Context(line) | LineOp::Insert(line) | LineOp::Delete(line) => line,
        }
    }

    pub fn is_context(&self) -> bool {
        matches!(self, LineOp::Context(_))
    }

    fn prefix(&self) -> char {
        match self {
            LineOp::Context(_) => ' ',
            LineOp::Insert(_) => '+',
            LineOp::Delete(_) => '-',
        }
    }
}

/// Compute a minimal edit script turning `old_lines` into `new_lines`.
///
/// Uses Myers' algorithm, which prefers keeping earlier common lines when
/// several alignments are equally short. Within a replaced block all
/// deletions come before the insertions.
pub fn diff_lines<S: AsRef<str>>(old_lines: &[S], new_lines: &[S]) -> Vec<LineOp> {
    let old: Vec<&str> = old_lines.iter().map(AsRef::as_ref).collect();
    let new: Vec<&str> = new_lines.iter().map(AsRef::as_ref).collect();

    let mut ops = Vec::with_capacity(old.len().max(new.len()));
    for diff_op in capture_diff_slices(Algorithm::Myers, &old, &new) {
        for change in diff_op.iter_changes(old.as_slice(), new.as_slice()) {
            let line = change.value().to_string();
            ops.push(match change.tag() {
                ChangeTag::Equal => LineOp::Context(line),
                ChangeTag::Insert => LineOp::Insert(line),
                ChangeTag::Delete => LineOp::Delete(line),
            });
        }
    }
    deletes_first(ops)
}

/// Reorder every run of non-context ops so its deletions precede its
/// insertions. Replay is unaffected since a run touches no context lines.
fn deletes_first(ops: Vec<LineOp>) -> Vec<LineOp> {
    let mut ordered = Vec::with_capacity(ops.len());
    let mut inserts = Vec::new();

    for op in ops {
        match op {
            LineOp::Insert(_) => inserts.push(op),
            LineOp::Delete(_) => ordered.push(op),
            LineOp::Context(_) => {
                ordered.append(&mut inserts);
                ordered.push(op);
            }
        }
    }
    ordered.append(&mut inserts);
    ordered
}

/// Diff two texts line by line
pub fn diff_text(old_text: &str, new_text: &str) -> Vec<LineOp> {
    let old: Vec<&str> = old_text.lines().collect();
    let new: Vec<&str> = new_text.lines().collect();
    diff_lines(&old, &new)
}

pub fn has_changes(ops: &[LineOp]) -> bool {
    ops.iter().any(|op| !op.is_context())
}

/// Replay an edit script against `old_lines`.
///
/// Returns `None` if the script does not line up with `old_lines`.
pub fn apply_ops<S: AsRef<str>>(old_lines: &[S], ops: &[LineOp]) -> Option<Vec<String>> {
    let mut cursor = 0;
    let mut result = Vec::new();

    for op in ops {
        match op {
            LineOp::Context(line) | LineOp::Delete(line) => {
                if old_lines.get(cursor).map(AsRef::as_ref) != Some(line.as_str()) {
                    return None;
                }
                cursor += 1;
                if op.is_context() {
                    result.push(line.clone());
                }
            }
            LineOp::Insert(line) => result.push(line.clone()),
        }
    }

    (cursor == old_lines.len()).then_some(result)
}

/// Render an edit script as unified diff text.
///
/// Returns an empty string when the script has no changes.
pub fn render_unified(ops: &[LineOp], context: usize, old_label: &str, new_label: &str) -> String {
    let changed: Vec<usize> = ops
        .iter()
        .enumerate()
        .filter(|(_, op)| !op.is_context())
        .map(|(i, _)| i)
        .collect();

    if changed.is_empty() {
        return String::new();
    }

    // Merge change positions into [start, end) hunk ranges padded by context
    let mut hunks: Vec<(usize, usize)> = Vec::new();
    for &i in &changed {
        let start = i.saturating_sub(context);
        let end = (i + context + 1).min(ops.len());
        match hunks.last_mut() {
            Some(last) if start <= last.1 => last.1 = end,
            _ => hunks.push((start, end)),
        }
    }

    // Line numbers (1-based) of the first line each op would occupy
    let mut old_pos = Vec::with_capacity(ops.len());
    let mut new_pos = Vec::with_capacity(ops.len());
    let (mut old_line, mut new_line) = (1usize, 1usize);
    for op in ops {
        old_pos.push(old_line);
        new_pos.push(new_line);
        match op {
            LineOp::Context(_) => {
                old_line += 1;
                new_line += 1;
            }
            LineOp::Delete(_) => old_line += 1,
            LineOp::Insert(_) => new_line += 1,
        }
    }

    let mut out = format!("--- {}\n+++ {}\n", old_label, new_label);
    for (start, end) in hunks {
        let slice = &ops[start..end];
        let old_len = slice.iter().filter(|op| !matches!(op, LineOp::Insert(_))).count();
        let new_len = slice.iter().filter(|op| !matches!(op, LineOp::Delete(_))).count();
        let old_start = if old_len == 0 { old_pos[start] - 1 } else { old_pos[start] };
        let new_start = if new_len == 0 { new_pos[start] - 1 } else { new_pos[start] };

        out.push_str(&format!("@@ -{},{} +{},{} @@\n", old_start, old_len, new_start, new_len));
        for op in slice {
            out.push(op.prefix());
            out.push_str(op.line());
            out.push('\n');
        }
    }
    out
}
