//! Terminal rendering helpers: status words, rules and line-numbered diffs.
use colored::Colorize;
use difference::{Changeset, Difference};
use std::fmt;

/// Width of the `Testing ...` column in per-case report lines.
pub const MSG_WIDTH: usize = 59;

/// Horizontal rule.
pub fn line(ch: char) -> String {
    std::iter::repeat(ch).take(60).collect()
}

/// Colored word closing a per-case report line.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Status {
    Passed,
    Failed,
    Skipped,
    /// Failed as expected; printed as a yellow "failed".
    KnownFailure,
}

impl Status {
    fn word(self) -> &'static str {
        match self {
            Status::Passed => "passed",
            Status::Failed | Status::KnownFailure => "failed",
            Status::Skipped => "skipped",
        }
    }

    pub fn render(self, colorized: bool) -> String {
        let word = self.word();
        if !colorized {
            return word.to_string();
        }
        match self {
            Status::Passed => word.green().to_string(),
            Status::Failed => word.red().to_string(),
            Status::Skipped | Status::KnownFailure => word.yellow().to_string(),
        }
    }
}

/// `<msg padded to the column> <status>[ (<reason>)]`
pub fn result_line(
    msg: &str,
    status: Status,
    reason: Option<&str>,
    colorized: bool,
) -> String {
    let mut buf = format!("{:<width$} ", msg, width = MSG_WIDTH);
    buf.push_str(&status.render(colorized));
    if let Some(reason) = reason {
        buf.push_str(" (");
        buf.push_str(reason);
        buf.push(')');
    }
    buf
}

/// Which side of the comparison a changed line belongs to.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
enum Side {
    /// Only in the expected artifact.
    Expected,
    /// Only in the normalized output.
    Actual,
}

/// Line number column; blank for the side a line is missing from.
#[derive(PartialEq, Eq, Debug)]
struct Lineno(Option<usize>);

impl fmt::Display for Lineno {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self.0 {
            None => f.pad(""),
            // Pad the plain number so that color codes do not count
            // towards the width.
            Some(n) => {
                let padded = format!("{:>w$}", n, w = f.width().unwrap_or(0));
                write!(f, "{}", padded.dimmed())
            }
        }
    }
}

/// One changed line with its position on both sides.
#[derive(PartialEq, Eq, Debug)]
struct Changed<'a> {
    side: Side,
    expected: Lineno,
    actual: Lineno,
    text: &'a str,
}

/// Changed lines of `changes` in order. Unchanged runs only advance the
/// line counters of both sides.
fn changed_lines(changes: &Changeset) -> Vec<Changed<'_>> {
    let (mut expected, mut actual) = (0, 0);
    let mut out = Vec::new();

    for diff in &changes.diffs {
        let (side, chunk) = match diff {
            Difference::Same(chunk) => {
                let n = chunk.split('\n').count();
                expected += n;
                actual += n;
                continue;
            }
            Difference::Rem(chunk) => (Side::Expected, chunk),
            Difference::Add(chunk) => (Side::Actual, chunk),
        };
        for text in chunk.split('\n') {
            let (a, b) = match side {
                Side::Expected => {
                    expected += 1;
                    (Some(expected), None)
                }
                Side::Actual => {
                    actual += 1;
                    (None, Some(actual))
                }
            };
            out.push(Changed {
                side,
                expected: Lineno(a),
                actual: Lineno(b),
                text: text.trim_end(),
            });
        }
    }
    out
}

/// Line-numbered diff of the expected artifact (`org`) against the
/// normalized output (`new`). Unchanged lines are omitted, each output line
/// is prefixed with `prefix`.
pub fn gen_diff(org: &str, new: &str, prefix: &str) -> String {
    let changes = Changeset::new(org, new, "\n");
    let mut buf = String::new();

    for line in changed_lines(&changes) {
        let (marker, text) = match line.side {
            Side::Expected => ("-".red(), line.text.red()),
            Side::Actual => ("+".green(), line.text.green()),
        };
        buf.push_str(&format!(
            "{}{:>4} {:>4}│{}{}\n",
            prefix, line.expected, line.actual, marker, text
        ));
    }

    buf
}
