use std::{
    collections::BTreeMap,
    fmt::Write as _,
    fs,
    path::PathBuf,
    sync::{Mutex, PoisonError},
};

use colored::Colorize;

use crate::{
    errors::UnitsError,
    picker::{Requirement, ROOT_CATEGORY},
    printer::{self, Status},
};

/// Final classification of one case in one run.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Outcome {
    Passed,
    /// The case was expected to misbehave but passed.
    Fixed,
    FailedStatus(i32),
    FailedDiff,
    SkippedFeature(Requirement),
    SkippedLanguage(String),
    SkippedInfiniteLoopRisk,
    /// Failed, as expected for a known bug.
    KnownBug,
    TimedOut,
    /// The case's options file does not survive a dry run.
    BrokenPrerequisite,
    ValgrindError,
}

/// [`Outcome`] without its payload, used to group the summary.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum OutcomeKind {
    Passed,
    Fixed,
    BrokenPrerequisite,
    FailedStatus,
    FailedDiff,
    TimedOut,
    SkippedFeature,
    SkippedLanguage,
    SkippedInfiniteLoopRisk,
    KnownBug,
    ValgrindError,
}

impl OutcomeKind {
    /// Summary order.
    pub const ALL: [OutcomeKind; 11] = [
        OutcomeKind::Passed,
        OutcomeKind::Fixed,
        OutcomeKind::BrokenPrerequisite,
        OutcomeKind::FailedStatus,
        OutcomeKind::FailedDiff,
        OutcomeKind::TimedOut,
        OutcomeKind::SkippedFeature,
        OutcomeKind::SkippedLanguage,
        OutcomeKind::SkippedInfiniteLoopRisk,
        OutcomeKind::KnownBug,
        OutcomeKind::ValgrindError,
    ];

    /// Does this kind make the whole run fail?
    pub fn is_failure(self) -> bool {
        matches!(
            self,
            OutcomeKind::FailedStatus
                | OutcomeKind::FailedDiff
                | OutcomeKind::TimedOut
                | OutcomeKind::BrokenPrerequisite
        )
    }
}

impl Outcome {
    pub fn kind(&self) -> OutcomeKind {
        match self {
            Outcome::Passed => OutcomeKind::Passed,
            Outcome::Fixed => OutcomeKind::Fixed,
            Outcome::FailedStatus(_) => OutcomeKind::FailedStatus,
            Outcome::FailedDiff => OutcomeKind::FailedDiff,
            Outcome::SkippedFeature(_) => OutcomeKind::SkippedFeature,
            Outcome::SkippedLanguage(_) => OutcomeKind::SkippedLanguage,
            Outcome::SkippedInfiniteLoopRisk => {
                OutcomeKind::SkippedInfiniteLoopRisk
            }
            Outcome::KnownBug => OutcomeKind::KnownBug,
            Outcome::TimedOut => OutcomeKind::TimedOut,
            Outcome::BrokenPrerequisite => OutcomeKind::BrokenPrerequisite,
            Outcome::ValgrindError => OutcomeKind::ValgrindError,
        }
    }

    pub fn status(&self) -> Status {
        match self {
            Outcome::Passed | Outcome::Fixed => Status::Passed,
            Outcome::FailedStatus(_)
            | Outcome::FailedDiff
            | Outcome::TimedOut
            | Outcome::BrokenPrerequisite
            | Outcome::ValgrindError => Status::Failed,
            Outcome::SkippedFeature(_)
            | Outcome::SkippedLanguage(_)
            | Outcome::SkippedInfiniteLoopRisk => Status::Skipped,
            Outcome::KnownBug => Status::KnownFailure,
        }
    }

    /// Parenthesized explanation in the report line.
    pub fn reason(&self) -> Option<String> {
        Some(match self {
            Outcome::Passed | Outcome::Fixed => return None,
            Outcome::FailedStatus(code) => {
                format!("unexpected exit status: {}", code)
            }
            Outcome::FailedDiff => "unexpected output".to_string(),
            Outcome::SkippedFeature(Requirement::Present(f)) => {
                format!("required feature \"{}\" is not available", f)
            }
            Outcome::SkippedFeature(Requirement::Absent(f)) => {
                format!("unwanted feature \"{}\" is available", f)
            }
            Outcome::SkippedLanguage(l) => {
                format!("required language parser \"{}\" is not available", l)
            }
            Outcome::SkippedInfiniteLoopRisk => {
                "may cause an infinite loop".to_string()
            }
            Outcome::KnownBug => "KNOWN bug".to_string(),
            Outcome::TimedOut => "TIMED OUT".to_string(),
            Outcome::BrokenPrerequisite => "broken args.ctags?".to_string(),
            Outcome::ValgrindError => "valgrind-error".to_string(),
        })
    }
}

/// Store information related to one case.
#[derive(Debug, Clone)]
pub struct Test {
    pub category: String,
    pub name: String,
    pub outcome: Outcome,
    /// `Testing <name> as <language>...`
    pub msg: String,
    /// False when no expected artifact existed.
    pub compared: bool,
    pub build_dir: PathBuf,
    pub expected: Option<PathBuf>,
}

impl Test {
    /// `category/name`, without the category for root cases.
    pub fn display_id(&self) -> String {
        if self.category == ROOT_CATEGORY {
            self.name.clone()
        } else {
            format!("{}/{}", self.category, self.name)
        }
    }

    /// Report line for this case.
    pub fn report_str(&self, colorized: bool) -> String {
        let reason = match (&self.outcome, self.compared) {
            (Outcome::Passed, false) | (Outcome::Fixed, false) => {
                Some("\"expected.tags*\" not found".to_string())
            }
            (outcome, _) => outcome.reason(),
        };
        printer::result_line(
            &self.msg,
            self.outcome.status(),
            reason.as_deref(),
            colorized,
        )
    }

    fn sort_key(&self) -> (bool, &str, &str) {
        (self.category != ROOT_CATEGORY, &self.category, &self.name)
    }
}

/// Thread-safe sink for case results. Arrival order does not matter; the
/// summary sorts by category and name.
#[derive(Debug, Default)]
pub struct Aggregator {
    tests: Mutex<Vec<Test>>,
    errors: Mutex<Vec<String>>,
}

impl Aggregator {
    pub fn record(&self, test: Test) {
        self.tests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(test);
    }

    /// Record an internal error that kept a case from producing an outcome.
    pub fn error(&self, err: UnitsError) {
        self.errors
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(err.to_string());
    }

    pub fn summary(&self) -> Summary {
        let mut tests = self
            .tests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        tests.sort_by(|a, b| a.sort_key().cmp(&b.sort_key()));

        let mut groups: BTreeMap<OutcomeKind, Vec<Test>> = BTreeMap::new();
        for test in tests {
            groups.entry(test.outcome.kind()).or_default().push(test);
        }
        let errors = self
            .errors
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        Summary { groups, errors }
    }
}

/// What the summary shows besides the groups.
#[derive(Debug, Default, Clone)]
pub struct ReportOpts {
    /// Deadline in seconds, if any.
    pub timeout: Option<u64>,
    pub valgrind: bool,
    pub show_diff: bool,
}

/// Results of a run grouped by outcome.
#[derive(Debug)]
pub struct Summary {
    pub groups: BTreeMap<OutcomeKind, Vec<Test>>,
    pub errors: Vec<String>,
}

impl Summary {
    pub fn count(&self, kind: OutcomeKind) -> usize {
        self.groups.get(&kind).map_or(0, Vec::len)
    }

    /// Identifiers of the cases with the given outcome, sorted.
    pub fn members(&self, kind: OutcomeKind) -> Vec<String> {
        self.groups
            .get(&kind)
            .map(|tests| tests.iter().map(Test::display_id).collect())
            .unwrap_or_default()
    }

    /// True unless some case failed in a way its class does not tolerate,
    /// or a case could not be run at all.
    pub fn passed(&self) -> bool {
        self.errors.is_empty()
            && !OutcomeKind::ALL
                .iter()
                .any(|k| k.is_failure() && self.count(*k) > 0)
    }

    fn heading(kind: OutcomeKind, opts: &ReportOpts) -> Option<String> {
        Some(match kind {
            OutcomeKind::Passed => "#passed:".to_string(),
            OutcomeKind::Fixed => "#FIXED:".to_string(),
            OutcomeKind::BrokenPrerequisite => {
                "#FAILED (broken args.ctags?):".to_string()
            }
            OutcomeKind::FailedStatus => {
                "#FAILED (unexpected-exit-status):".to_string()
            }
            OutcomeKind::FailedDiff => "#FAILED (unexpected-output):".to_string(),
            OutcomeKind::TimedOut => {
                format!("#TIMED-OUT ({}s):", opts.timeout?)
            }
            OutcomeKind::SkippedFeature => "#skipped (features):".to_string(),
            OutcomeKind::SkippedLanguage => "#skipped (languages):".to_string(),
            OutcomeKind::SkippedInfiniteLoopRisk => {
                if opts.timeout.is_some() {
                    return None;
                }
                "#skipped (infinite-loop):".to_string()
            }
            OutcomeKind::KnownBug => "#known-bugs:".to_string(),
            OutcomeKind::ValgrindError => {
                if !opts.valgrind {
                    return None;
                }
                "#valgrind-error:".to_string()
            }
        })
    }

    /// Render the summary block.
    pub fn render(&self, opts: &ReportOpts) -> String {
        let mut buf = String::new();
        let _ = writeln!(buf);
        let _ = writeln!(
            buf,
            "Summary (see CMDLINE.tmp to reproduce without test harness)"
        );
        let _ = writeln!(buf, "{}", printer::line('-'));

        for kind in OutcomeKind::ALL {
            let heading = match Self::heading(kind, opts) {
                Some(heading) => heading,
                None => continue,
            };
            // Fixed cases passed too; passing cases are only counted.
            if kind == OutcomeKind::Passed {
                let passed = self.count(kind) + self.count(OutcomeKind::Fixed);
                let _ = writeln!(buf, "  {:<40}{}", heading, passed);
                continue;
            }
            let _ = writeln!(buf, "  {:<40}{}", heading, self.count(kind));
            for test in self.groups.get(&kind).into_iter().flatten() {
                let _ = writeln!(buf, "\t{}", test.display_id());
                if !opts.show_diff {
                    continue;
                }
                match kind {
                    OutcomeKind::FailedStatus => show_stderr(&mut buf, test),
                    OutcomeKind::FailedDiff => {
                        show_stderr(&mut buf, test);
                        show_diff(&mut buf, test);
                    }
                    _ => {}
                }
            }
        }

        if !self.errors.is_empty() {
            let _ = writeln!(buf, "  {}", "units errors".red());
            for err in &self.errors {
                let _ = writeln!(buf, "    {}", err.red());
            }
        }
        buf
    }
}

/// Last 50 lines of the case's stderr.
fn show_stderr(buf: &mut String, test: &Test) {
    let _ = writeln!(buf, "\t{}", printer::line('.'));
    let path = test.build_dir.join(super::test::STDERR_OUTPUT_NAME);
    if let Ok(bytes) = fs::read(&path) {
        let text = String::from_utf8_lossy(&bytes);
        let lines: Vec<&str> = text.lines().collect();
        let skip = lines.len().saturating_sub(50);
        for line in &lines[skip..] {
            let _ = writeln!(buf, "\t{}", line);
        }
    }
    let _ = writeln!(buf);
}

/// Line-numbered diff of expected vs normalized output, falling back to the
/// external diff output.
fn show_diff(buf: &mut String, test: &Test) {
    let _ = writeln!(buf, "\t{}", printer::line('.'));
    let filtered = test.build_dir.join(super::test::FILTERED_OUTPUT_NAME);
    let expected = test.expected.as_ref().and_then(|p| fs::read(p).ok());
    match (expected, fs::read(&filtered).ok()) {
        (Some(expected), Some(filtered)) => buf.push_str(&printer::gen_diff(
            &String::from_utf8_lossy(&expected),
            &String::from_utf8_lossy(&filtered),
            "\t",
        )),
        _ => {
            let diff = test.build_dir.join(super::test::DIFF_OUTPUT_NAME);
            if let Ok(bytes) = fs::read(diff) {
                for line in String::from_utf8_lossy(&bytes).lines() {
                    let _ = writeln!(buf, "\t{}", line);
                }
            }
        }
    }
    let _ = writeln!(buf);
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn test(category: &str, name: &str, outcome: Outcome) -> Test {
        Test {
            category: category.to_string(),
            name: name.to_string(),
            outcome,
            msg: format!("Testing {} as C", name),
            compared: true,
            build_dir: PathBuf::from("/nonexistent"),
            expected: None,
        }
    }

    #[test]
    fn summary_sorts_and_groups() {
        let agg = Aggregator::default();
        agg.record(test("parser.r", "b", Outcome::KnownBug));
        agg.record(test("ROOT", "z", Outcome::Passed));
        agg.record(test("ROOT", "a", Outcome::KnownBug));
        agg.record(test("misc.r", "c", Outcome::KnownBug));

        let summary = agg.summary();
        assert_eq!(summary.count(OutcomeKind::Passed), 1);
        assert_eq!(
            summary.members(OutcomeKind::KnownBug),
            vec!["a", "misc.r/c", "parser.r/b"]
        );
        assert!(summary.passed());
    }

    #[test]
    fn verdict_fails_only_on_untolerated_outcomes() {
        for (outcome, ok) in [
            (Outcome::Passed, true),
            (Outcome::Fixed, true),
            (Outcome::KnownBug, true),
            (Outcome::SkippedInfiniteLoopRisk, true),
            (Outcome::SkippedLanguage("Go".into()), true),
            (Outcome::SkippedFeature(Requirement::Present("json".into())), true),
            (Outcome::ValgrindError, true),
            (Outcome::FailedStatus(1), false),
            (Outcome::FailedDiff, false),
            (Outcome::TimedOut, false),
            (Outcome::BrokenPrerequisite, false),
        ] {
            let agg = Aggregator::default();
            agg.record(test("ROOT", "x", outcome.clone()));
            assert_eq!(agg.summary().passed(), ok, "{:?}", outcome);
        }
    }

    #[test]
    fn internal_errors_fail_the_run() {
        let agg = Aggregator::default();
        agg.error(UnitsError::Worker("panicked".into()));
        assert!(!agg.summary().passed());
    }

    #[test]
    fn render_respects_conditional_headings() {
        colored::control::set_override(false);
        let agg = Aggregator::default();
        agg.record(test("ROOT", "slow", Outcome::TimedOut));
        let summary = agg.summary();

        let without = summary.render(&ReportOpts::default());
        assert!(!without.contains("#TIMED-OUT"));
        assert!(without.contains("#skipped (infinite-loop):"));
        assert!(!without.contains("#valgrind-error"));

        let with = summary.render(&ReportOpts {
            timeout: Some(5),
            valgrind: true,
            show_diff: false,
        });
        assert!(with.contains(&format!("  {:<40}1\n\tslow\n", "#TIMED-OUT (5s):")));
        assert!(!with.contains("#skipped (infinite-loop):"));
        assert!(with.contains("#valgrind-error:"));
    }

    #[test]
    fn report_lines() {
        let mut t = test("ROOT", "foo", Outcome::FailedStatus(2));
        assert!(t.report_str(false).ends_with("failed (unexpected exit status: 2)"));
        t.outcome = Outcome::Passed;
        t.compared = false;
        assert!(t.report_str(false).ends_with("passed (\"expected.tags*\" not found)"));
        t.outcome = Outcome::KnownBug;
        assert!(t.report_str(false).ends_with("failed (KNOWN bug)"));
    }
}
