//! Output normalization applied to raw subject output before comparison.
//!
//! The pipeline is an ordered list of in-process stages (path basename
//! stripping, then identifier anonymization) optionally followed by a
//! user-supplied external filter program. All stages work on bytes so that
//! output which is not valid UTF-8 passes through untouched.
use std::{
    borrow::Cow,
    path::{Path, PathBuf},
    process::Stdio,
    sync::LazyLock,
};

use regex::bytes::{NoExpand, Regex};
use tokio::{io::AsyncWriteExt, process::Command};

use crate::{errors::UnitsError, picker::OutputFormat};

// name<TAB>dir/dir/file<TAB>...
static CTAGS_BASENAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?-u)(^[^\t]+\t)(/?([^/\t]+/)*)").expect("ctags basename"));
// dir/file,123
static ETAGS_BASENAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?-u).*/(\S+),([0-9]+$)").expect("etags basename"));
// name kind 12 dir/file text
static XREF_BASENAME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?-u)(.*\d+ )([^ ]+[^ ]+)/([^ ].+.+$)").expect("xref basename")
});
// "path": "dir/file"
static JSON_BASENAME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?-u)("path": )"[^"]+/([^/"]+)""#).expect("json basename")
});

/// Eight lower-case hex digits, the shape of an anonymous identifier.
static ANON_ID: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?-u)[0-9a-f]{8}").expect("anon pattern"));

/// Rewrites file paths embedded in one output line to their basenames.
/// Only the first match in a line is rewritten.
#[derive(Clone, Debug)]
pub struct BasenameFilter {
    re: &'static Regex,
    rep: &'static str,
}

impl BasenameFilter {
    pub fn new(format: OutputFormat) -> Self {
        let (re, rep) = match format {
            OutputFormat::Ctags => (&*CTAGS_BASENAME, "${1}"),
            OutputFormat::Etags => (&*ETAGS_BASENAME, "${1},${2}"),
            OutputFormat::Xref => (&*XREF_BASENAME, "${1}${3}"),
            OutputFormat::Json => (&*JSON_BASENAME, r#"${1}"${2}""#),
        };
        BasenameFilter { re, rep }
    }

    pub fn apply<'a>(&self, line: &'a [u8]) -> Cow<'a, [u8]> {
        self.re.replacen(line, 1, self.rep.as_bytes())
    }

    /// Equivalent `sed` invocation, used when recording a reproducible
    /// command line.
    pub fn sed_command(format: OutputFormat) -> &'static str {
        match format {
            OutputFormat::Ctags => {
                r"sed -e 's%\(^[^\t]\{1,\}\t\)\(/\{0,1\}\([^/\t]\{1,\}/\)*\)%\1%'"
            }
            OutputFormat::Etags => {
                r"sed -e 's%.*\/\([[:print:]]\{1,\}\),\([0-9]\{1,\}$\)%\1,\2%'"
            }
            OutputFormat::Xref => {
                r"sed -e 's%\(.*[[:digit:]]\{1,\} \)\([^ ]\{1,\}[^ ]\{1,\}\)/\([^ ].\{1,\}.\{1,\}$\)%\1\3%'"
            }
            OutputFormat::Json => {
                r#"sed -e 's%\("path": \)"[^"]\{1,\}/\([^/"]\{1,\}\)"%\1"\2"%'"#
            }
        }
    }
}

/// Does the raw output contain something that looks like an anonymous
/// identifier (eight lower-case hex digits)?
pub fn needs_anonymization(raw: &[u8]) -> bool {
    ANON_ID.is_match(raw)
}

/// Path the input would have in a checkout where the test tree sits at
/// `./<root_name>`. Everything up to and including the first
/// `/<root_name>` component is replaced.
pub fn canonical_path(input: &Path, root_name: &str) -> String {
    let probe = format!("/{}", input.to_string_lossy());
    let needle = format!("/{}", root_name);
    let rest = match probe.find(&needle) {
        Some(idx) => &probe[idx + needle.len()..],
        None if input.is_absolute() => &probe[1..],
        None => &probe[..],
    };
    format!("./{}{}", root_name, rest)
}

/// Replaces every occurrence of each actual identifier with its canonical
/// counterpart, pairs applied in order.
#[derive(Clone, Debug, Default)]
pub struct Anonymizer {
    pairs: Vec<(Regex, Vec<u8>)>,
}

impl Anonymizer {
    pub fn new<I>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (String, String)>,
    {
        Anonymizer {
            pairs: pairs
                .into_iter()
                .filter(|(actual, _)| !actual.is_empty())
                .map(|(actual, expected)| {
                    let re = Regex::new(&regex::escape(&actual))
                        .expect("escaped literal");
                    (re, expected.into_bytes())
                })
                .collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }

    pub fn apply<'a>(&self, line: Cow<'a, [u8]>) -> Cow<'a, [u8]> {
        self.pairs.iter().fold(line, |line, (re, rep)| {
            let replaced = match re.replace_all(&line, NoExpand(rep)) {
                Cow::Owned(owned) => Some(owned),
                Cow::Borrowed(_) => None,
            };
            replaced.map(Cow::Owned).unwrap_or(line)
        })
    }

    /// `sed` expressions equivalent to this anonymizer, each with a
    /// leading space.
    pub fn sed_expressions(&self) -> String {
        self.pairs
            .iter()
            .map(|(re, rep)| {
                format!(" -e s/{}/{}/g", re.as_str(), String::from_utf8_lossy(rep))
            })
            .collect()
    }
}

/// A named in-process transform.
#[derive(Clone, Debug)]
pub enum Stage {
    Basename(BasenameFilter),
    Anonymize(Anonymizer),
}

impl Stage {
    fn apply<'a>(&self, line: Cow<'a, [u8]>) -> Cow<'a, [u8]> {
        match self {
            Stage::Basename(filter) => {
                let replaced = match filter.apply(&line) {
                    Cow::Owned(owned) => Some(owned),
                    Cow::Borrowed(_) => None,
                };
                replaced.map(Cow::Owned).unwrap_or(line)
            }
            Stage::Anonymize(anon) => anon.apply(line),
        }
    }
}

/// The complete normalization pipeline for one case.
#[derive(Clone, Debug)]
pub struct Pipeline {
    stages: Vec<Stage>,
    external: Option<PathBuf>,
}

impl Pipeline {
    pub fn new(format: OutputFormat) -> Self {
        Pipeline {
            stages: vec![Stage::Basename(BasenameFilter::new(format))],
            external: None,
        }
    }

    pub fn with_anonymizer(mut self, anon: Anonymizer) -> Self {
        if !anon.is_empty() {
            self.stages.push(Stage::Anonymize(anon));
        }
        self
    }

    /// Run `program` over the output of the in-process stages.
    pub fn with_external(mut self, program: Option<PathBuf>) -> Self {
        self.external = program;
        self
    }

    /// Apply the in-process stages line by line. Line terminators are
    /// preserved.
    pub fn apply_in_process(&self, raw: &[u8]) -> Vec<u8> {
        let mut out = Vec::with_capacity(raw.len());
        for chunk in raw.split_inclusive(|&b| b == b'\n') {
            let (line, term) = match chunk.split_last() {
                Some((b'\n', line)) => (line, &b"\n"[..]),
                _ => (chunk, &b""[..]),
            };
            let line = self
                .stages
                .iter()
                .fold(Cow::Borrowed(line), |line, stage| stage.apply(line));
            out.extend_from_slice(&line);
            out.extend_from_slice(term);
        }
        out
    }

    /// Apply every stage, including the external filter when there is one.
    pub async fn run(&self, raw: &[u8]) -> Result<Vec<u8>, UnitsError> {
        let filtered = self.apply_in_process(raw);
        let program = match &self.external {
            Some(program) => program,
            None => return Ok(filtered),
        };

        let mut child = Command::new(program)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
            .map_err(UnitsError::at(program))?;
        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| UnitsError::Worker("filter stdin is not piped".to_string()))?;
        let writer = tokio::spawn(async move {
            let res = stdin.write_all(&filtered).await;
            drop(stdin);
            res
        });
        let out = child
            .wait_with_output()
            .await
            .map_err(UnitsError::at(program))?;
        // A filter that stops reading early is not an error.
        let _ = writer.await;
        Ok(out.stdout)
    }
}
