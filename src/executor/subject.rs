//! Invocation of the program under test.
use std::{
    fs::File,
    path::{Path, PathBuf},
    process::Stdio,
    time::{Duration, Instant},
};

use tracing::{debug, warn};

use super::{
    pool::CancelToken,
    tools::{self, Exit, TIMEOUT_EXIT},
};
use crate::{errors::UnitsError, picker::TestCase};

/// Exit code the memory checker reports on a memory-safety violation.
pub const VALGRIND_EXIT: i32 = 58;

/// The deadline is multiplied by this under the memory checker.
pub const VALGRIND_TIMEOUT_FACTOR: u32 = 10;

/// The ctags-compatible binary being tested.
#[derive(Debug, Clone)]
pub struct Subject {
    pub program: PathBuf,
    /// `--_pretend-NEW=OLD` options added to every case command line.
    pretense: Vec<String>,
}

/// Result of running the subject on one case.
#[derive(Debug)]
pub struct Execution {
    /// Exit code, [`TIMEOUT_EXIT`] on timeout.
    pub code: i32,
    pub timed_out: bool,
    /// The exact argument vector, program first.
    pub cmdline: Vec<String>,
    /// Spooled standard output.
    pub stdout: PathBuf,
}

/// Where and how the main execution runs.
#[derive(Debug)]
pub struct Invocation<'a> {
    pub stdout: &'a Path,
    pub stderr: &'a Path,
    /// Memory checker log, when running under valgrind.
    pub valgrind_log: Option<&'a Path>,
    pub deadline: Option<Duration>,
}

impl Subject {
    pub fn new(program: impl Into<PathBuf>, pretense: Vec<String>) -> Self {
        Subject {
            program: program.into(),
            pretense,
        }
    }

    fn command<S: AsRef<str>>(&self, args: &[S]) -> std::process::Command {
        let mut cmd = std::process::Command::new(&self.program);
        cmd.args(args.iter().map(AsRef::as_ref));
        cmd
    }

    fn display(&self) -> String {
        self.program.to_string_lossy().into_owned()
    }

    /// Features the subject advertises.
    pub async fn features(&self) -> Result<Vec<String>, UnitsError> {
        let cmd = self.command(&[
            "--quiet",
            "--options=NONE",
            "--list-features",
            "--with-list=no",
        ]);
        let out = tools::capture(cmd, None, &mut CancelToken::never())
            .await
            .map_err(UnitsError::at(&self.program))?;
        let features: Vec<String> = String::from_utf8_lossy(&out.stdout)
            .lines()
            .filter_map(|l| l.split_whitespace().next())
            .map(str::to_string)
            .collect();
        debug!(?features, "subject features");
        Ok(features)
    }

    /// Arguments shared by every invocation for `case`.
    pub fn base_args(&self, case: &TestCase) -> Vec<String> {
        let mut args = vec!["--verbose".to_string(), "--options=NONE".to_string()];
        args.extend(self.pretense.iter().cloned());
        args.push(format!("--optlib-dir=+{}/optlib", case.dir.display()));
        args.push("-o".to_string());
        args.push("-".to_string());
        if let Some(options) = &case.options {
            args.push(format!("--options={}", options.display()));
        }
        args
    }

    /// Run the subject with the case's base arguments plus `extra`. `None`
    /// when it could not be run to completion within `deadline`.
    async fn probe(
        &self,
        case: &TestCase,
        extra: &[String],
        deadline: Option<Duration>,
        cancel: &mut CancelToken,
    ) -> Option<tools::Captured> {
        let mut args = self.base_args(case);
        args.extend(extra.iter().cloned());
        match tools::capture(self.command(&args), deadline, cancel).await {
            Ok(out) if out.code().is_some() => Some(out),
            Ok(out) => {
                warn!(
                    case = %case.id(),
                    args = ?extra,
                    exit = ?out.exit,
                    "subject probe did not finish"
                );
                None
            }
            Err(err) => {
                warn!(case = %case.id(), "probing subject: {}", err);
                None
            }
        }
    }

    /// Does the case's options file survive a dry run? Cases without an
    /// options file trivially do.
    pub async fn options_ok(
        &self,
        case: &TestCase,
        deadline: Option<Duration>,
        cancel: &mut CancelToken,
    ) -> bool {
        if case.options.is_none() {
            return true;
        }
        let out = self
            .probe(case, &["--_force-quit=0".to_string()], deadline, cancel)
            .await;
        matches!(out.and_then(|o| o.code()), Some(0))
    }

    /// Language the subject detects for the primary input. Empty when the
    /// probe fails.
    pub async fn print_language(
        &self,
        case: &TestCase,
        deadline: Option<Duration>,
        cancel: &mut CancelToken,
    ) -> String {
        let args = [
            "--print-language".to_string(),
            case.input.to_string_lossy().into_owned(),
        ];
        match self.probe(case, &args, deadline, cancel).await {
            Some(out) => parse_language(&out.stdout),
            None => String::new(),
        }
    }

    /// Languages the subject has parsers for, under the case's options.
    pub async fn languages(
        &self,
        case: &TestCase,
        deadline: Option<Duration>,
        cancel: &mut CancelToken,
    ) -> Vec<String> {
        match self
            .probe(case, &["--list-languages".to_string()], deadline, cancel)
            .await
        {
            Some(out) => String::from_utf8_lossy(&out.stdout)
                .lines()
                .map(str::to_string)
                .collect(),
            None => Vec::new(),
        }
    }

    /// Anonymous identifier the subject derives from `path`. Empty when the
    /// subject does not answer within `deadline`.
    pub async fn anon_hash(
        &self,
        path: &str,
        deadline: Option<Duration>,
        cancel: &mut CancelToken,
    ) -> Result<String, UnitsError> {
        let cmd = self.command(&[
            "--quiet".to_string(),
            "--options=NONE".to_string(),
            format!("--_anonhash={}", path),
        ]);
        let out = tools::capture(cmd, deadline, cancel)
            .await
            .map_err(UnitsError::at(&self.program))?;
        if out.code().is_none() {
            warn!(path, exit = ?out.exit, "anonymous hash did not finish");
            return Ok(String::new());
        }
        Ok(String::from_utf8_lossy(&out.stdout)
            .lines()
            .next()
            .unwrap_or_default()
            .to_string())
    }

    /// Full argument vector for the main execution, program first.
    pub fn cmdline(&self, case: &TestCase, valgrind_log: Option<&Path>) -> Vec<String> {
        let mut argv = Vec::new();
        if let Some(log) = valgrind_log {
            argv.push("valgrind".to_string());
            argv.push("--leak-check=full".to_string());
            argv.push(format!("--error-exitcode={}", VALGRIND_EXIT));
            argv.push(format!("--log-file={}", log.display()));
        }
        argv.push(self.display());
        argv.extend(self.base_args(case));
        argv.extend(case.format.flags().iter().map(|f| f.to_string()));
        argv.push(case.input.to_string_lossy().into_owned());
        argv.extend(
            case.extra_inputs
                .iter()
                .map(|p| p.to_string_lossy().into_owned()),
        );
        argv
    }

    /// Run the subject on `case`, spooling its streams to files. Returns
    /// `None` when cancelled.
    pub async fn execute(
        &self,
        case: &TestCase,
        inv: &Invocation<'_>,
        cancel: &mut CancelToken,
    ) -> Result<Option<Execution>, UnitsError> {
        let cmdline = self.cmdline(case, inv.valgrind_log);
        let deadline = match (inv.deadline, inv.valgrind_log) {
            (Some(d), Some(_)) => Some(d * VALGRIND_TIMEOUT_FACTOR),
            (d, _) => d,
        };

        let stdout = File::create(inv.stdout).map_err(UnitsError::at(inv.stdout))?;
        let stderr = File::create(inv.stderr).map_err(UnitsError::at(inv.stderr))?;
        let mut cmd = std::process::Command::new(&cmdline[0]);
        cmd.args(&cmdline[1..])
            .stdin(Stdio::null())
            .stdout(stdout)
            .stderr(stderr);

        let begin = Instant::now();
        let mut child = tools::isolate(cmd)
            .spawn()
            .map_err(UnitsError::at(&cmdline[0]))?;
        let exit = tools::supervise(&mut child, deadline, cancel)
            .await
            .map_err(UnitsError::at(&cmdline[0]))?;
        let elapsed = begin.elapsed();

        let (code, timed_out, signaled) = match exit {
            Exit::Cancelled => return Ok(None),
            Exit::TimedOut => (TIMEOUT_EXIT, true, false),
            Exit::Exited(status) => {
                (tools::exit_code(&status), false, tools::signaled(&status))
            }
        };
        if signaled || mentions_core_dump(inv.stderr) {
            warn!(case = %case.id(), code, "subject crashed");
        }
        debug!(case = %case.id(), code, ?elapsed, "executed");

        Ok(Some(Execution {
            code,
            timed_out,
            cmdline,
            stdout: inv.stdout.to_path_buf(),
        }))
    }
}

/// `path: Lang` to `Lang`, line terminators removed.
fn parse_language(stdout: &[u8]) -> String {
    let text: String = String::from_utf8_lossy(stdout)
        .chars()
        .filter(|c| !matches!(c, '\r' | '\n'))
        .collect();
    match text.rfind(": ") {
        Some(idx) => text[idx + 2..].to_string(),
        None => text,
    }
}

fn mentions_core_dump(stderr: &Path) -> bool {
    std::fs::read(stderr)
        .map(|b| String::from_utf8_lossy(&b).contains("core dump"))
        .unwrap_or(false)
}
