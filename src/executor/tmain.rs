//! Driver for script-driven tmain cases.
//!
//! Each case directory carries a `run.sh` that exercises the subject any way
//! it likes. The harness records the script's exit status, streams and any
//! generated `tags` file, then compares each of them against the matching
//! `<aspect>-expected.txt`.
use std::{
    fmt::Write as _,
    fs,
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};

use regex::bytes::Regex;
use tracing::{debug, warn};

use super::{pool::CancelToken, tools};
use crate::{
    errors::UnitsError,
    picker::tmain::TmainCase,
    printer::{self, Status},
};

/// `run.sh` exits with this to skip its case.
pub const SKIP_EXIT: i32 = 77;

/// Compared aspects, in order.
pub const ASPECTS: [&str; 4] = ["stdout", "stderr", "exit", "tags"];

const DIFF_ARGS: [&str; 3] = ["-U", "0", "--strip-trailing-cr"];

/// Tools handed to every `run.sh`.
#[derive(Debug)]
pub struct TmainHarness {
    /// Absolute path of the subject.
    pub ctags: PathBuf,
    /// Absolute path of the tag file reader.
    pub readtags: PathBuf,
    pub colorized: bool,
    pub deadline: Option<Duration>,
}

/// Result of one tmain case.
#[derive(Debug)]
pub struct TmainResult {
    pub name: String,
    /// Report block printed once the case finishes.
    pub report: String,
    /// `<name>/<aspect>-compare`, with a marker when the expected file is
    /// not under version control.
    pub failures: Vec<String>,
}

pub struct TmainTest {
    pub case: TmainCase,
    pub harness: Arc<TmainHarness>,
}

impl TmainTest {
    pub fn new(case: TmainCase, harness: Arc<TmainHarness>) -> Self {
        TmainTest { case, harness }
    }

    fn actual(&self, aspect: &str) -> PathBuf {
        self.case.build_dir.join(format!("{}-actual.txt", aspect))
    }

    fn expected(&self, aspect: &str) -> PathBuf {
        self.case.dir.join(format!("{}-expected.txt", aspect))
    }

    /// Remove what an earlier run left behind.
    fn clean(&self) -> Result<(), UnitsError> {
        let dir = &self.case.build_dir;
        fs::create_dir_all(dir).map_err(UnitsError::at(dir))?;
        for entry in fs::read_dir(dir).map_err(UnitsError::at(dir))? {
            let path = entry.map_err(UnitsError::at(dir))?.path();
            let stale = path
                .file_name()
                .map(|n| n.to_string_lossy().ends_with("-actual.txt"))
                .unwrap_or(false);
            if stale {
                fs::remove_file(&path).map_err(UnitsError::at(&path))?;
            }
        }
        Ok(())
    }

    pub async fn execute_test(
        self,
        mut cancel: CancelToken,
    ) -> Result<Option<TmainResult>, UnitsError> {
        self.clean()?;
        let harness = &*self.harness;
        let build = &self.case.build_dir;

        let mut report = String::new();
        let _ = writeln!(report, "\nTesting {}", self.case.name);
        let _ = writeln!(report, "{}", printer::line('-'));

        let mut cmd = std::process::Command::new("sh");
        cmd.arg("run.sh")
            .arg(&harness.ctags)
            .arg(build)
            .arg(&harness.readtags)
            .current_dir(&self.case.dir);
        let out = tools::capture(cmd, harness.deadline, &mut cancel)
            .await
            .map_err(UnitsError::at(self.case.dir.join("run.sh")))?;
        let code = match &out.exit {
            tools::Exit::Cancelled => return Ok(None),
            tools::Exit::TimedOut => tools::TIMEOUT_EXIT,
            tools::Exit::Exited(status) => tools::exit_code(status),
        };

        let stdout = crlf_to_lf(&out.stdout);
        if code == SKIP_EXIT {
            let reason = String::from_utf8_lossy(&stdout).replace('\n', "");
            let _ = writeln!(
                report,
                "{} ({})",
                Status::Skipped.render(harness.colorized),
                reason
            );
            return Ok(Some(TmainResult {
                name: self.case.name.clone(),
                report,
                failures: Vec::new(),
            }));
        }
        let stderr = canonicalize_program(&crlf_to_lf(&out.stderr), &harness.ctags);

        self.write("exit", format!("{}\n", code).as_bytes())?;
        self.write("stdout", &stdout)?;
        self.write("stderr", &stderr)?;
        let tags = build.join("tags");
        if tags.is_file() {
            let dest = self.actual("tags");
            fs::rename(&tags, &dest).map_err(UnitsError::at(&tags))?;
        }

        let mut failures = Vec::new();
        for aspect in ASPECTS {
            let expected = self.expected(aspect);
            let actual = self.actual(aspect);
            if !expected.is_file() {
                if actual.is_file() {
                    fs::remove_file(&actual).map_err(UnitsError::at(&actual))?;
                }
                continue;
            }
            if self.compare(aspect, &mut report).await? {
                fs::remove_file(&actual).map_err(UnitsError::at(&actual))?;
                continue;
            }

            let mut failure = format!("{}/{}-compare", self.case.name, aspect);
            if !tools::tracked_by_git(&expected).await {
                failure.push_str(" (not committed/cached yet)");
            }
            failures.push(failure);

            if aspect == "stderr" && String::from_utf8_lossy(&stderr).contains("core dump") {
                let cores = core_files(build);
                debug!(case = %self.case.name, ?cores, "collecting backtraces");
                tools::write_backtraces(&harness.ctags, &cores, &build.join("gdb-backtrace.txt"))
                    .await;
            }
        }

        Ok(Some(TmainResult {
            name: self.case.name.clone(),
            report,
            failures,
        }))
    }

    fn write(&self, aspect: &str, bytes: &[u8]) -> Result<(), UnitsError> {
        let path = self.actual(aspect);
        fs::write(&path, bytes).map_err(UnitsError::at(&path))
    }

    /// Compare one aspect, appending its report line. The diff, if any,
    /// goes to `<aspect>-diff.txt`.
    async fn compare(&self, aspect: &str, report: &mut String) -> Result<bool, UnitsError> {
        let colorized = self.harness.colorized;
        let actual = self.actual(aspect);
        let expected = self.expected(aspect);
        if actual.is_file() && tools::same_contents(&actual, &expected) {
            let _ = writeln!(
                report,
                "{}",
                printer::result_line(aspect, Status::Passed, None, colorized)
            );
            return Ok(true);
        }

        let diff = self.case.build_dir.join(format!("{}-diff.txt", aspect));
        // Any byte difference fails the aspect.
        tools::diff(&DIFF_ARGS, &actual, &expected, &diff).await?;
        let reason = format!("diff: {}", diff.display());
        let _ = writeln!(
            report,
            "{}",
            printer::result_line(aspect, Status::Failed, Some(reason.as_str()), colorized)
        );
        Ok(false)
    }
}

fn crlf_to_lf(bytes: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(bytes.len());
    let mut iter = bytes.iter().peekable();
    while let Some(&b) = iter.next() {
        if b == b'\r' && iter.peek() == Some(&&b'\n') {
            continue;
        }
        out.push(b);
    }
    out
}

/// Messages the subject prints start with its own name; rename it to
/// `ctags` so expectations do not depend on the binary's file name.
fn canonicalize_program(stderr: &[u8], program: &Path) -> Vec<u8> {
    let name = match program.file_name() {
        Some(name) => name.to_string_lossy().into_owned(),
        None => return stderr.to_vec(),
    };
    if name == "ctags" {
        return stderr.to_vec();
    }
    match Regex::new(&format!("(?m)^{}:", regex::escape(&name))) {
        Ok(re) => re.replace_all(stderr, &b"ctags:"[..]).into_owned(),
        Err(err) => {
            warn!("program name pattern: {}", err);
            stderr.to_vec()
        }
    }
}

fn core_files(dir: &Path) -> Vec<PathBuf> {
    let pattern = format!("{}/core*", glob::Pattern::escape(&dir.to_string_lossy()));
    match glob::glob(&pattern) {
        Ok(paths) => paths.filter_map(Result::ok).collect(),
        Err(_) => Vec::new(),
    }
}

/// Failure list and, on request, the diffs and backtraces behind it.
pub fn render_summary(results: &[TmainResult], build_dir: &Path, show_diff: bool) -> String {
    let mut failures: Vec<&String> = results.iter().flat_map(|r| &r.failures).collect();
    failures.sort();

    let mut buf = String::new();
    let _ = writeln!(buf);
    if failures.is_empty() {
        return buf;
    }
    let _ = writeln!(buf, "Failed tests");
    let _ = writeln!(buf, "{}", printer::line('='));
    for failure in failures {
        let _ = writeln!(buf, "{}", failure);
    }
    let _ = writeln!(buf);

    if show_diff {
        let _ = writeln!(buf, "Detail [compare]");
        let _ = writeln!(buf, "{}", printer::line('-'));
        let dir = glob::Pattern::escape(&build_dir.to_string_lossy());
        for path in glob_sorted(&format!("{}/*/*-diff.txt", dir)) {
            let _ = writeln!(buf, "{}\n", path.display());
            for line in read_lossy(&path).lines() {
                let _ = writeln!(buf, "\t{}", line);
            }
            let _ = writeln!(buf);
        }
        for path in glob_sorted(&format!("{}/*/gdb-backtrace.txt", dir)) {
            for line in read_lossy(&path).lines() {
                let _ = writeln!(buf, "\t{}", line);
            }
        }
    }
    buf
}

fn glob_sorted(pattern: &str) -> Vec<PathBuf> {
    let mut paths: Vec<PathBuf> = glob::glob(pattern)
        .map(|paths| paths.filter_map(Result::ok).collect())
        .unwrap_or_default();
    paths.sort();
    paths
}

fn read_lossy(path: &Path) -> String {
    fs::read(path)
        .map(|b| String::from_utf8_lossy(&b).into_owned())
        .unwrap_or_default()
}
