//! The units picker walks a test tree and turns every `<name>.<class>`
//! directory into a [`TestCase`].
use std::{
    fs,
    path::{Path, PathBuf},
};

use regex::Regex;
use tracing::{debug, warn};

use super::{
    Category, CategoryFilter, Class, OutputFormat, Requirement, TestCase,
    ROOT_CATEGORY,
};
use crate::errors::UnitsError;

/// What a directory name under a category means.
#[derive(Debug, PartialEq, Eq)]
pub enum Entry {
    /// `<name>.<class>`
    Case(String, Class),
    /// `<name>.r`
    Category,
}

/// Classify a directory name. Anything outside the grammar is `None`.
pub fn parse_dir_name(file_name: &str) -> Option<Entry> {
    let (stem, suffix) = file_name.rsplit_once('.')?;
    if stem.is_empty() {
        return None;
    }
    let mut chars = suffix.chars();
    let (c, rest) = (chars.next()?, chars.next());
    if rest.is_some() {
        return None;
    }
    if c == 'r' {
        return Some(Entry::Category);
    }
    Class::from_suffix(c).map(|class| Entry::Case(stem.to_string(), class))
}

fn is_backup(path: &Path) -> bool {
    path.to_string_lossy().ends_with('~')
}

/// Sorted list of the entries of `dir`.
fn sorted_entries(dir: &Path) -> Result<Vec<PathBuf>, UnitsError> {
    let mut entries = fs::read_dir(dir)
        .map_err(UnitsError::at(dir))?
        .map(|e| e.map(|e| e.path()))
        .collect::<Result<Vec<_>, _>>()
        .map_err(UnitsError::at(dir))?;
    entries.sort();
    Ok(entries)
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

fn read_lines(path: &Path) -> Result<Vec<String>, UnitsError> {
    let contents = fs::read_to_string(path).map_err(UnitsError::at(path))?;
    Ok(contents.lines().map(str::to_string).collect())
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    fs::metadata(path)
        .map(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(not(unix))]
fn is_executable(path: &Path) -> bool {
    path.is_file()
}

/// Walks a units tree.
pub struct Picker {
    units_dir: PathBuf,
    build_dir: PathBuf,
    categories: CategoryFilter,
    extra_input: Regex,
}

impl Picker {
    pub fn new(
        units_dir: impl Into<PathBuf>,
        build_dir: impl Into<PathBuf>,
        categories: CategoryFilter,
    ) -> Self {
        Picker {
            units_dir: units_dir.into(),
            build_dir: build_dir.into(),
            categories,
            // input-1.c, input_2.h, input-1-foo.c
            extra_input: Regex::new(r"^input[-_][0-9]([-_].*)?\..*$")
                .expect("extra input pattern"),
        }
    }

    /// Collect the selected categories: the root first, then the
    /// subcategories in name order. Each category's cases are sorted by
    /// directory name.
    pub fn categories(&self) -> Result<Vec<Category>, UnitsError> {
        let mut out = Vec::new();
        if self.categories.accepts(ROOT_CATEGORY) {
            out.push(self.category(
                ROOT_CATEGORY.to_string(),
                self.units_dir.clone(),
                self.build_dir.clone(),
            )?);
        }

        for dir in sorted_entries(&self.units_dir)? {
            let name = file_name(&dir);
            if !dir.is_dir() || parse_dir_name(&name) != Some(Entry::Category) {
                continue;
            }
            if !self.categories.accepts(&name) {
                debug!(category = %name, "filtered out");
                continue;
            }
            let build_dir = self.build_dir.join(&name);
            out.push(self.category(name, dir, build_dir)?);
        }
        Ok(out)
    }

    fn category(
        &self,
        name: String,
        dir: PathBuf,
        build_dir: PathBuf,
    ) -> Result<Category, UnitsError> {
        let mut cases = Vec::new();
        for path in sorted_entries(&dir)? {
            if !path.is_dir() {
                continue;
            }
            let dir_name = file_name(&path);
            match parse_dir_name(&dir_name) {
                Some(Entry::Case(case_name, class)) => {
                    let case_build = build_dir.join(&dir_name);
                    match self.case(&name, case_name, class, path, case_build) {
                        Ok(Some(case)) => cases.push(case),
                        Ok(None) => {}
                        Err(err) => warn!("skipping case: {}", err),
                    }
                }
                Some(Entry::Category) => {}
                None => debug!(dir = %path.display(), "not a case directory"),
            }
        }
        Ok(Category { name, cases })
    }

    fn case(
        &self,
        category: &str,
        name: String,
        class: Class,
        dir: PathBuf,
        build_dir: PathBuf,
    ) -> Result<Option<TestCase>, UnitsError> {
        let pattern = format!(
            "{}/input.*",
            glob::Pattern::escape(&dir.to_string_lossy())
        );
        let mut inputs = glob::glob(&pattern)
            .map_err(|err| UnitsError::Worker(err.to_string()))?
            .filter_map(Result::ok)
            .filter(|p| p.is_file() && !is_backup(p));
        let input = match inputs.next() {
            Some(input) => input,
            None => {
                debug!(dir = %dir.display(), "no input file");
                return Ok(None);
            }
        };
        if let Some(ignored) = inputs.next() {
            debug!(input = %ignored.display(), "ignoring additional primary input");
        }

        let extra_inputs = sorted_entries(&dir)?
            .into_iter()
            .filter(|p| {
                p.is_file()
                    && !is_backup(p)
                    && self.extra_input.is_match(&file_name(p))
            })
            .collect();

        let (format, expected) = OutputFormat::PRIORITY
            .iter()
            .map(|(file, format)| (*format, dir.join(file)))
            .find(|(_, path)| path.is_file())
            .map(|(format, path)| (format, Some(path)))
            .unwrap_or((OutputFormat::Ctags, None));

        let features_file = dir.join("features");
        let features = if features_file.is_file() {
            read_lines(&features_file)?
                .iter()
                .filter_map(|l| Requirement::parse(l))
                .collect()
        } else {
            Vec::new()
        };

        let existing = |file: &str| Some(dir.join(file)).filter(|p| p.is_file());
        let options = existing("args.ctags");
        let languages = existing("languages");
        let filter = Some(dir.join("filter")).filter(|p| is_executable(p));

        Ok(Some(TestCase {
            category: category.to_string(),
            name,
            class,
            dir,
            build_dir,
            input,
            extra_inputs,
            options,
            features,
            languages,
            filter,
            format,
            expected,
        }))
    }
}

/// Languages listed in a case's `languages` file.
pub fn required_languages(path: &Path) -> Result<Vec<String>, UnitsError> {
    Ok(read_lines(path)?
        .into_iter()
        .map(|l| l.trim_end_matches('\r').to_string())
        .filter(|l| !l.is_empty())
        .collect())
}
