//! Turns what is known about a case into exactly one [`Outcome`].
//!
//! Classification happens in three stages, each of which may settle the
//! outcome early:
//!   - [`Classifier::gates`]: availability and prerequisite checks, before
//!     the subject runs.
//!   - [`Classifier::executed`]: timeout and exit status, after it runs.
//!   - [`Classifier::compared`]: the comparison with the expected artifact.
//!
//! Every stage is a pure function of its inputs.
use super::{results::Outcome, subject::VALGRIND_EXIT};
use crate::picker::{Class, Requirement};

/// Pre-execution facts about a case.
#[derive(Debug, Clone)]
pub struct Gates {
    /// First feature requirement the subject does not satisfy.
    pub missing_feature: Option<Requirement>,
    /// First required language the subject has no parser for.
    pub missing_language: Option<String>,
    /// Is a deadline configured?
    pub deadline: bool,
    /// Did the options file pass its dry run?
    pub options_ok: bool,
}

/// How the normalized output relates to the expected artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Comparison {
    /// The case has no expected artifact.
    NoArtifact,
    Equal,
    Differ,
}

/// What to do next.
#[derive(Debug, PartialEq, Eq)]
pub enum Step {
    Done(Outcome),
    Proceed,
}

#[derive(Debug, Clone, Copy)]
pub struct Classifier {
    pub class: Class,
    /// Running under the memory checker.
    pub memcheck: bool,
}

impl Classifier {
    pub fn new(class: Class, memcheck: bool) -> Self {
        Classifier { class, memcheck }
    }

    /// First failing gate, in order: features, languages, infinite loop
    /// risk, broken options.
    pub fn gates(&self, gates: &Gates) -> Step {
        if let Some(req) = &gates.missing_feature {
            return Step::Done(Outcome::SkippedFeature(req.clone()));
        }
        if let Some(lang) = &gates.missing_language {
            return Step::Done(Outcome::SkippedLanguage(lang.clone()));
        }
        if self.class == Class::InfiniteLoop && !gates.deadline {
            return Step::Done(Outcome::SkippedInfiniteLoopRisk);
        }
        if !gates.options_ok {
            return Step::Done(Outcome::BrokenPrerequisite);
        }
        Step::Proceed
    }

    /// Settle cases that timed out or exited non-zero.
    pub fn executed(&self, timed_out: bool, code: i32) -> Step {
        if timed_out {
            return Step::Done(Outcome::TimedOut);
        }
        if code == 0 {
            return Step::Proceed;
        }
        Step::Done(
            if self.memcheck && code == VALGRIND_EXIT && self.class != Class::MemoryCheck {
                Outcome::ValgrindError
            } else if self.class == Class::KnownBug {
                Outcome::KnownBug
            } else {
                Outcome::FailedStatus(code)
            },
        )
    }

    /// Did the class predict trouble that a clean run contradicts?
    fn expects_trouble(&self) -> bool {
        match self.class {
            Class::KnownBug | Class::InfiniteLoop => true,
            Class::MemoryCheck => self.memcheck,
            Class::Normal => false,
        }
    }

    /// Final outcome of a case that exited cleanly.
    pub fn compared(&self, cmp: Comparison) -> Outcome {
        match cmp {
            Comparison::NoArtifact | Comparison::Equal => {
                if self.expects_trouble() {
                    Outcome::Fixed
                } else {
                    Outcome::Passed
                }
            }
            Comparison::Differ if self.class == Class::KnownBug => Outcome::KnownBug,
            Comparison::Differ => Outcome::FailedDiff,
        }
    }

    /// All stages at once, for callers that already know everything.
    pub fn classify(
        &self,
        gates: &Gates,
        timed_out: bool,
        code: i32,
        cmp: Comparison,
    ) -> Outcome {
        if let Step::Done(outcome) = self.gates(gates) {
            return outcome;
        }
        if let Step::Done(outcome) = self.executed(timed_out, code) {
            return outcome;
        }
        self.compared(cmp)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::tools::TIMEOUT_EXIT;
    use test_case::test_case;

    fn open() -> Gates {
        Gates {
            missing_feature: None,
            missing_language: None,
            deadline: false,
            options_ok: true,
        }
    }

    fn normal() -> Classifier {
        Classifier::new(Class::Normal, false)
    }

    #[test]
    fn passing_case() {
        assert_eq!(
            normal().classify(&open(), false, 0, Comparison::Equal),
            Outcome::Passed
        );
    }

    #[test]
    fn known_bug_failing_as_before() {
        let c = Classifier::new(Class::KnownBug, false);
        assert_eq!(c.classify(&open(), false, 2, Comparison::Equal), Outcome::KnownBug);
        assert_eq!(c.classify(&open(), false, 0, Comparison::Differ), Outcome::KnownBug);
    }

    #[test]
    fn known_bug_that_passes_is_fixed() {
        let c = Classifier::new(Class::KnownBug, false);
        assert_eq!(c.classify(&open(), false, 0, Comparison::Equal), Outcome::Fixed);
        assert_eq!(c.classify(&open(), false, 0, Comparison::NoArtifact), Outcome::Fixed);
    }

    #[test_case(0, Comparison::Equal)]
    #[test_case(1, Comparison::Differ)]
    #[test_case(124, Comparison::NoArtifact)]
    fn infinite_loop_risk_without_deadline_is_skipped(code: i32, cmp: Comparison) {
        let c = Classifier::new(Class::InfiniteLoop, false);
        assert_eq!(
            c.classify(&open(), code == TIMEOUT_EXIT, code, cmp),
            Outcome::SkippedInfiniteLoopRisk
        );
    }

    #[test]
    fn infinite_loop_risk_with_deadline_runs() {
        let c = Classifier::new(Class::InfiniteLoop, false);
        let gates = Gates { deadline: true, ..open() };
        assert_eq!(c.gates(&gates), Step::Proceed);
        assert_eq!(c.classify(&gates, false, 0, Comparison::Equal), Outcome::Fixed);
        assert_eq!(c.classify(&gates, true, TIMEOUT_EXIT, Comparison::Equal), Outcome::TimedOut);
    }

    #[test]
    fn missing_feature_wins_over_everything() {
        let gates = Gates {
            missing_feature: Some(Requirement::Present("json".into())),
            missing_language: Some("Go".into()),
            deadline: false,
            options_ok: false,
        };
        let c = Classifier::new(Class::InfiniteLoop, false);
        assert_eq!(
            c.gates(&gates),
            Step::Done(Outcome::SkippedFeature(Requirement::Present("json".into())))
        );
    }

    #[test]
    fn gate_order() {
        let c = Classifier::new(Class::InfiniteLoop, false);
        let mut gates = Gates {
            missing_language: Some("Go".into()),
            options_ok: false,
            ..open()
        };
        assert_eq!(c.gates(&gates), Step::Done(Outcome::SkippedLanguage("Go".into())));
        gates.missing_language = None;
        assert_eq!(c.gates(&gates), Step::Done(Outcome::SkippedInfiniteLoopRisk));
        gates.deadline = true;
        assert_eq!(c.gates(&gates), Step::Done(Outcome::BrokenPrerequisite));
    }

    #[test]
    fn timeout_checked_before_status() {
        let c = Classifier::new(Class::KnownBug, false);
        assert_eq!(
            c.executed(true, TIMEOUT_EXIT),
            Step::Done(Outcome::TimedOut)
        );
    }

    #[test_case(Class::Normal, false, 58, Outcome::FailedStatus(58))]
    #[test_case(Class::Normal, true, 58, Outcome::ValgrindError)]
    #[test_case(Class::KnownBug, true, 58, Outcome::ValgrindError)]
    #[test_case(Class::MemoryCheck, true, 58, Outcome::FailedStatus(58))]
    #[test_case(Class::KnownBug, true, 1, Outcome::KnownBug)]
    #[test_case(Class::Normal, true, 3, Outcome::FailedStatus(3))]
    fn non_zero_exit(class: Class, memcheck: bool, code: i32, expected: Outcome) {
        assert_eq!(
            Classifier::new(class, memcheck).executed(false, code),
            Step::Done(expected)
        );
    }

    #[test]
    fn memory_check_class_is_fixed_only_under_the_checker() {
        let open = open();
        let without = Classifier::new(Class::MemoryCheck, false);
        let with = Classifier::new(Class::MemoryCheck, true);
        assert_eq!(without.classify(&open, false, 0, Comparison::Equal), Outcome::Passed);
        assert_eq!(with.classify(&open, false, 0, Comparison::Equal), Outcome::Fixed);
        assert_eq!(with.classify(&open, false, 0, Comparison::Differ), Outcome::FailedDiff);
    }

    #[test]
    fn normal_case_outcomes() {
        assert_eq!(normal().compared(Comparison::NoArtifact), Outcome::Passed);
        assert_eq!(normal().compared(Comparison::Differ), Outcome::FailedDiff);
        assert_eq!(normal().executed(false, 0), Step::Proceed);
    }

    #[test]
    fn classification_is_deterministic() {
        let c = Classifier::new(Class::KnownBug, true);
        let gates = Gates { deadline: true, ..open() };
        let first = c.classify(&gates, false, 0, Comparison::Differ);
        for _ in 0..10 {
            assert_eq!(c.classify(&gates, false, 0, Comparison::Differ), first);
        }
    }
}
