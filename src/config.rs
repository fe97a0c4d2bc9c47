//! Run configuration: an optional `units.toml` at the root of the test
//! tree, overridden by command line flags.
use crate::{
    cli::{split_list, RunOpts, TmainOpts},
    errors::UnitsError,
    executor::pool::DEFAULT_WORKERS,
    picker::{CaseFilter, CategoryFilter},
};
use serde::Deserialize;
use std::{
    path::{Path, PathBuf},
    time::Duration,
};

/// Name of the optional configuration file.
pub const CONFIG_FILE: &str = "units.toml";

/// Name of the test tree root in the canonical checkout.
pub const DEFAULT_CANONICAL_ROOT: &str = "Units";

const DEFAULT_CTAGS: &str = "./ctags";
const DEFAULT_READTAGS: &str = "./readtags";

/// Contents of `units.toml`. Every key is optional.
#[derive(Debug, Default, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct FileConfig {
    /// Version of the tool this configuration is compatible with.
    pub ver: Option<String>,
    pub ctags: Option<PathBuf>,
    pub readtags: Option<PathBuf>,
    pub threads: Option<usize>,
    /// Per-case deadline in seconds.
    pub timeout: Option<u64>,
    pub canonical_root: Option<String>,
}

impl FileConfig {
    /// Read `units.toml` from `dir`. A missing file is an empty
    /// configuration.
    pub fn from_dir(dir: &Path) -> Result<Self, UnitsError> {
        let path = dir.join(CONFIG_FILE);
        if !path.is_file() {
            return Ok(FileConfig::default());
        }
        let contents = std::fs::read_to_string(&path).map_err(UnitsError::at(&path))?;
        let conf: FileConfig = toml::from_str(&contents).map_err(|err| UnitsError::Config {
            path: path.clone(),
            msg: err.to_string(),
        })?;

        // Check if the current tool matches the version the configuration
        // was written for.
        if let Some(ver) = &conf.ver {
            if ver != env!("CARGO_PKG_VERSION") {
                return Err(UnitsError::VersionMismatch {
                    required: ver.clone(),
                    actual: env!("CARGO_PKG_VERSION").to_string(),
                });
            }
        }
        Ok(conf)
    }
}

/// Everything a units run needs to know.
#[derive(Debug)]
pub struct RunConfig {
    pub units_dir: PathBuf,
    pub build_dir: PathBuf,
    pub ctags: PathBuf,
    pub categories: CategoryFilter,
    pub units: CaseFilter,
    pub languages: Option<Vec<String>>,
    pub deadline: Option<Duration>,
    pub valgrind: bool,
    pub colorized: bool,
    pub show_diff: bool,
    pub threads: usize,
    /// `--_pretend-NEW=OLD` options.
    pub pretense: Vec<String>,
    pub canonical_root: String,
}

impl RunConfig {
    pub fn new(opts: RunOpts) -> Result<Self, UnitsError> {
        let file = FileConfig::from_dir(&opts.units_dir)?;
        let pretense = match &opts.with_pretense_map {
            Some(arg) => parse_pretense_map(arg)?,
            None => Vec::new(),
        };
        let languages = split_list(opts.languages.as_deref());
        let timeout = opts.with_timeout.or(file.timeout).unwrap_or(0);

        Ok(RunConfig {
            build_dir: build_dir(opts.build_dir.as_deref(), &opts.units_dir)?,
            ctags: opts
                .ctags
                .or(file.ctags)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_CTAGS)),
            categories: CategoryFilter::new(&split_list(opts.categories.as_deref())),
            units: CaseFilter::new(&split_list(opts.units.as_deref())),
            languages: Some(languages).filter(|l| !l.is_empty()),
            deadline: Some(Duration::from_secs(timeout)).filter(|_| timeout > 0),
            valgrind: opts.with_valgrind,
            colorized: opts.colorized_output.enabled(),
            show_diff: opts.show_diff_output,
            threads: opts.threads.or(file.threads).unwrap_or(DEFAULT_WORKERS),
            pretense,
            canonical_root: file
                .canonical_root
                .unwrap_or_else(|| DEFAULT_CANONICAL_ROOT.to_string()),
            units_dir: opts.units_dir,
        })
    }
}

/// Everything a tmain run needs to know.
#[derive(Debug)]
pub struct TmainConfig {
    pub tmain_dir: PathBuf,
    pub build_dir: PathBuf,
    /// Absolute; `run.sh` runs in the case directory.
    pub ctags: PathBuf,
    pub readtags: PathBuf,
    pub units: CaseFilter,
    pub colorized: bool,
    pub show_diff: bool,
    pub threads: usize,
    pub deadline: Option<Duration>,
}

impl TmainConfig {
    pub fn new(opts: TmainOpts) -> Result<Self, UnitsError> {
        let file = FileConfig::from_dir(&opts.tmain_dir)?;
        let ctags = opts
            .ctags
            .or(file.ctags)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_CTAGS));
        let readtags = opts
            .readtags
            .or(file.readtags)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_READTAGS));
        let timeout = file.timeout.unwrap_or(0);

        Ok(TmainConfig {
            build_dir: build_dir(opts.build_dir.as_deref(), &opts.tmain_dir)?,
            ctags: absolute(&ctags)?,
            readtags: absolute(&readtags)?,
            units: CaseFilter::new(&split_list(opts.units.as_deref())),
            colorized: opts.colorized_output.enabled(),
            show_diff: opts.show_diff_output,
            threads: opts.threads.or(file.threads).unwrap_or(DEFAULT_WORKERS),
            deadline: Some(Duration::from_secs(timeout)).filter(|_| timeout > 0),
            tmain_dir: opts.tmain_dir,
        })
    }
}

/// Turn `NEW/OLD[,NEW/OLD...]` into `--_pretend-NEW=OLD` options.
pub fn parse_pretense_map(arg: &str) -> Result<Vec<String>, UnitsError> {
    arg.split(',')
        .map(|pair| {
            let (new, old) = pair.rsplit_once('/').ok_or_else(|| {
                UnitsError::Usage("wrong format of --_pretend option arg".to_string())
            })?;
            if new.is_empty() {
                return Err(UnitsError::Usage(
                    "newlang part of --_pretend option arg is empty".to_string(),
                ));
            }
            if old.is_empty() {
                return Err(UnitsError::Usage(
                    "oldlang part of --_pretend option arg is empty".to_string(),
                ));
            }
            Ok(format!("--_pretend-{}={}", new, old))
        })
        .collect()
}

/// `path` resolved against the current directory.
fn absolute(path: &Path) -> Result<PathBuf, UnitsError> {
    if path.is_absolute() {
        return Ok(path.to_path_buf());
    }
    let cwd = std::env::current_dir()?;
    Ok(cwd.join(path))
}

/// The build directory, defaulting to the test tree itself.
fn build_dir(given: Option<&Path>, tree: &Path) -> Result<PathBuf, UnitsError> {
    absolute(given.unwrap_or(tree))
}
