//! Picker for script-driven tmain cases: every `<name>.d` directory directly
//! under the tmain root is a case.
use std::path::{Path, PathBuf};

use tracing::debug;

use super::CaseFilter;
use crate::errors::UnitsError;

/// A tmain case.
#[derive(Clone, Debug)]
pub struct TmainCase {
    pub name: String,
    /// Directory holding `run.sh` and the `*-expected.txt` files.
    pub dir: PathBuf,
    /// Directory receiving the `*-actual.txt` and `*-diff.txt` files.
    pub build_dir: PathBuf,
}

pub fn discover(
    tmain_dir: &Path,
    build_dir: &Path,
    filter: &CaseFilter,
) -> Result<Vec<TmainCase>, UnitsError> {
    let mut dirs = std::fs::read_dir(tmain_dir)
        .map_err(UnitsError::at(tmain_dir))?
        .map(|e| e.map(|e| e.path()))
        .collect::<Result<Vec<_>, _>>()
        .map_err(UnitsError::at(tmain_dir))?;
    dirs.sort();

    Ok(dirs
        .into_iter()
        .filter(|d| d.is_dir())
        .filter_map(|dir| {
            let base = dir.file_name()?.to_string_lossy().into_owned();
            let name = base.strip_suffix(".d").filter(|n| !n.is_empty())?;
            if !filter.accepts("", name) {
                debug!(case = %name, "filtered out");
                return None;
            }
            Some(TmainCase {
                name: name.to_string(),
                build_dir: build_dir.join(&base),
                dir,
            })
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use camino_tempfile::tempdir;
    use std::fs;

    #[test]
    fn finds_d_directories() {
        let tmp = tempdir().unwrap();
        let root = tmp.path().as_std_path();
        for d in ["list-kinds.d", "option-x.d", "notes", ".d"] {
            fs::create_dir(root.join(d)).unwrap();
        }
        fs::write(root.join("stray.d"), "").unwrap();

        let build = root.join("out");
        let cases = discover(root, &build, &CaseFilter::default()).unwrap();
        let names: Vec<_> = cases.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["list-kinds", "option-x"]);
        assert_eq!(cases[0].build_dir, build.join("list-kinds.d"));

        let only = discover(root, &build, &CaseFilter::new(&["option-x"])).unwrap();
        assert_eq!(only.len(), 1);
        assert_eq!(only[0].name, "option-x");
    }
}
