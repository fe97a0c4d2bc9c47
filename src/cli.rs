use crate::errors::UnitsError;
use std::path::PathBuf;
use structopt::{clap::AppSettings, StructOpt};

/// Options for the CLI.
#[derive(StructOpt, Debug)]
#[structopt(
    name = "units",
    about = "Parallel conformance test runner for ctags.",
    setting = AppSettings::SubcommandRequiredElseHelp
)]
pub struct Opts {
    #[structopt(subcommand)]
    pub command: Command,
}

#[derive(StructOpt, Debug)]
pub enum Command {
    /// Run the cases of a units tree.
    #[structopt(name = "run", alias = "units")]
    Run(RunOpts),
    /// Run the script-driven cases of a tmain tree.
    #[structopt(name = "tmain")]
    Tmain(TmainOpts),
}

#[derive(StructOpt, Debug)]
pub struct RunOpts {
    /// Comma separated categories to run. `.r` is appended when missing.
    #[structopt(long)]
    pub categories: Option<String>,

    /// The ctags binary to test.
    #[structopt(long, parse(from_os_str))]
    pub ctags: Option<PathBuf>,

    /// Comma separated cases to run, as `name` or `category/name`.
    #[structopt(long)]
    pub units: Option<String>,

    /// Only run cases detected as one of these comma separated languages.
    #[structopt(long)]
    pub languages: Option<String>,

    /// Deadline in seconds for each case. 0 means none.
    #[structopt(long)]
    pub with_timeout: Option<u64>,

    /// Run the subject under valgrind.
    #[structopt(long)]
    pub with_valgrind: bool,

    /// Color the report.
    #[structopt(long, default_value = "yes", possible_values = &["yes", "no"])]
    pub colorized_output: YesNo,

    /// Show stderr and diffs of failing cases in the summary.
    #[structopt(long)]
    pub show_diff_output: bool,

    /// Comma separated NEWLANG/OLDLANG pairs passed as --_pretend options.
    #[structopt(long)]
    pub with_pretense_map: Option<String>,

    /// Number of cases run concurrently.
    #[structopt(long)]
    pub threads: Option<usize>,

    /// Root of the units tree.
    #[structopt(name = "UNITS_DIR", parse(from_os_str))]
    pub units_dir: PathBuf,

    /// Where work files go. Defaults to the units tree itself.
    #[structopt(name = "BUILD_DIR", parse(from_os_str))]
    pub build_dir: Option<PathBuf>,
}

#[derive(StructOpt, Debug)]
pub struct TmainOpts {
    /// The ctags binary to test.
    #[structopt(long, parse(from_os_str))]
    pub ctags: Option<PathBuf>,

    /// The readtags binary handed to each run.sh.
    #[structopt(long, parse(from_os_str))]
    pub readtags: Option<PathBuf>,

    /// Color the report.
    #[structopt(long, default_value = "yes", possible_values = &["yes", "no"])]
    pub colorized_output: YesNo,

    /// Show diffs and backtraces of failing cases.
    #[structopt(long)]
    pub show_diff_output: bool,

    /// Comma separated cases to run.
    #[structopt(long)]
    pub units: Option<String>,

    /// Number of cases run concurrently.
    #[structopt(long)]
    pub threads: Option<usize>,

    /// Root of the tmain tree.
    #[structopt(name = "TMAIN_DIR", parse(from_os_str))]
    pub tmain_dir: PathBuf,

    /// Where work files go. Defaults to the tmain tree itself.
    #[structopt(name = "BUILD_DIR", parse(from_os_str))]
    pub build_dir: Option<PathBuf>,
}

/// Possible values for the --colorized-output flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum YesNo {
    Yes,
    No,
}

impl YesNo {
    pub fn enabled(self) -> bool {
        self == YesNo::Yes
    }
}

impl std::str::FromStr for YesNo {
    type Err = UnitsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "yes" => Ok(YesNo::Yes),
            "no" => Ok(YesNo::No),
            _ => Err(UnitsError::Usage("Must be one of yes, no.".to_string())),
        }
    }
}

/// Split a comma separated option value, dropping empty entries.
pub fn split_list(arg: Option<&str>) -> Vec<String> {
    arg.map(|s| {
        s.split(',')
            .filter(|x| !x.is_empty())
            .map(str::to_string)
            .collect()
    })
    .unwrap_or_default()
}
