//! Pickers gather the test cases to run from a directory tree.
//!
//! A units tree looks like this:
//! ```text
//! Units/
//!   simple.d/            <- case "simple", class normal, category ROOT
//!     input.c
//!     expected.tags
//!   parser-c.r/          <- category "parser-c.r"
//!     crash.b/           <- case "crash", class known-bug
//!       input.c
//!       input-1.h        <- extra input
//!       args.ctags
//! ```
pub mod tmain;
pub mod units;

use std::path::PathBuf;

/// Name of the implicit category holding the cases at the top of the tree.
pub const ROOT_CATEGORY: &str = "ROOT";

/// Per-case modifier that changes how a failure is interpreted.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Class {
    /// `.d` (or the legacy `.t`): must pass.
    Normal,
    /// `.b`: a known bug, failing is tolerated.
    KnownBug,
    /// `.i`: may loop forever, only run under a deadline.
    InfiniteLoop,
    /// `.v`: expected to trip the memory checker.
    MemoryCheck,
}

impl Class {
    pub fn from_suffix(suffix: char) -> Option<Self> {
        match suffix {
            'd' | 't' => Some(Class::Normal),
            'b' => Some(Class::KnownBug),
            'i' => Some(Class::InfiniteLoop),
            'v' => Some(Class::MemoryCheck),
            _ => None,
        }
    }
}

/// Output format of the subject, chosen by which expected artifact exists.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum OutputFormat {
    /// Plain tag list, `expected.tags`.
    Ctags,
    /// Emacs tags, `expected.tags-e`.
    Etags,
    /// Cross reference, `expected.tags-x`.
    Xref,
    /// JSON lines, `expected.tags-json`.
    Json,
}

impl OutputFormat {
    /// Expected artifact names, highest priority first.
    pub const PRIORITY: [(&'static str, OutputFormat); 4] = [
        ("expected.tags", OutputFormat::Ctags),
        ("expected.tags-e", OutputFormat::Etags),
        ("expected.tags-x", OutputFormat::Xref),
        ("expected.tags-json", OutputFormat::Json),
    ];

    pub fn name(self) -> &'static str {
        match self {
            OutputFormat::Ctags => "ctags",
            OutputFormat::Etags => "etags",
            OutputFormat::Xref => "xref",
            OutputFormat::Json => "json",
        }
    }

    /// Subject flags selecting this format.
    pub fn flags(self) -> &'static [&'static str] {
        match self {
            OutputFormat::Ctags => &[],
            OutputFormat::Etags => &["-e", "--tag-relative=no"],
            OutputFormat::Xref => &["-x"],
            OutputFormat::Json => &["--output-format=json"],
        }
    }

    /// Suffix shown after the language in the per-case report line.
    pub fn label(self) -> String {
        match self {
            OutputFormat::Ctags => String::new(),
            other => format!("/{}", other.name()),
        }
    }

    /// Feature the subject must advertise to produce this format.
    pub fn required_feature(self) -> Option<&'static str> {
        match self {
            OutputFormat::Json => Some("json"),
            _ => None,
        }
    }
}

/// One line of a `features` file.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Requirement {
    /// The subject must advertise the feature.
    Present(String),
    /// `!name`: the subject must not advertise the feature.
    Absent(String),
}

impl Requirement {
    pub fn parse(line: &str) -> Option<Self> {
        let line = line.trim_end_matches('\r');
        if line.is_empty() {
            return None;
        }
        Some(match line.strip_prefix('!') {
            Some(name) => Requirement::Absent(name.to_string()),
            None => Requirement::Present(line.to_string()),
        })
    }

    /// Does a subject advertising `available` satisfy this requirement?
    pub fn satisfied_by(&self, available: &[String]) -> bool {
        match self {
            Requirement::Present(name) => available.iter().any(|f| f == name),
            Requirement::Absent(name) => !available.iter().any(|f| f == name),
        }
    }
}

/// A discovered test case. Never mutated after discovery.
#[derive(Clone, Debug)]
pub struct TestCase {
    pub category: String,
    pub name: String,
    pub class: Class,
    /// The `<name>.<class>` directory.
    pub dir: PathBuf,
    /// Where the work files of this case go.
    pub build_dir: PathBuf,
    pub input: PathBuf,
    pub extra_inputs: Vec<PathBuf>,
    /// `args.ctags`, validated by a dry run before the case executes.
    pub options: Option<PathBuf>,
    /// Contents of the `features` file.
    pub features: Vec<Requirement>,
    /// `languages` file, when present. Contents are read lazily since
    /// checking them needs the subject anyway.
    pub languages: Option<PathBuf>,
    /// Executable `filter` program run after the built-in normalization.
    pub filter: Option<PathBuf>,
    pub format: OutputFormat,
    /// Expected artifact; `None` means comparison is skipped.
    pub expected: Option<PathBuf>,
}

impl TestCase {
    /// `category/name`.
    pub fn id(&self) -> String {
        format!("{}/{}", self.category, self.name)
    }

    /// Feature requirements in effect: the output format's own requirement
    /// takes precedence over the `features` file.
    pub fn feature_requirements(&self) -> Vec<Requirement> {
        match self.format.required_feature() {
            Some(feature) => vec![Requirement::Present(feature.to_string())],
            None => self.features.clone(),
        }
    }
}

/// Cases grouped by the directory they live in.
#[derive(Debug)]
pub struct Category {
    pub name: String,
    pub cases: Vec<TestCase>,
}

/// `--categories` selection.
#[derive(Debug, Default, Clone)]
pub struct CategoryFilter(Vec<String>);

impl CategoryFilter {
    /// Build a filter from the user's list. Names other than `ROOT` get the
    /// `.r` suffix added when it is missing.
    pub fn new<S: AsRef<str>>(names: &[S]) -> Self {
        CategoryFilter(
            names
                .iter()
                .map(|n| {
                    let n = n.as_ref();
                    if n == ROOT_CATEGORY || n.ends_with(".r") {
                        n.to_string()
                    } else {
                        format!("{}.r", n)
                    }
                })
                .collect(),
        )
    }

    pub fn accepts(&self, category: &str) -> bool {
        self.0.is_empty() || self.0.iter().any(|c| c == category)
    }
}

/// `--units` selection. Entries are `name` or `category/name`.
#[derive(Debug, Default, Clone)]
pub struct CaseFilter(Vec<String>);

impl CaseFilter {
    pub fn new<S: AsRef<str>>(names: &[S]) -> Self {
        CaseFilter(names.iter().map(|n| n.as_ref().to_string()).collect())
    }

    pub fn accepts(&self, category: &str, name: &str) -> bool {
        if self.0.is_empty() {
            return true;
        }
        self.0.iter().any(|u| match u.rsplit_once('/') {
            Some((c, n)) if !c.is_empty() && !n.is_empty() => {
                c == category && n == name
            }
            _ => u == name,
        })
    }
}
