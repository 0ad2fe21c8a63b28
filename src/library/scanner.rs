// Copyright (C) 2026 Michael Wilson <mike@mdwn.dev>
//
// This program is free software: you can redistribute it and/or modify it under
// the terms of the GNU General Public License as published by the Free Software
// Foundation, version 3.
//
// This program is distributed in the hope that it will be useful, but WITHOUT
// ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
// FOR A PARTICULAR PURPOSE. See the GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along with
// this program. If not, see <https://www.gnu.org/licenses/>.
//

//! Finds library scripts under a folder and interprets them on a worker pool.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use rayon::prelude::*;
use rayon::{ThreadPool, ThreadPoolBuildError, ThreadPoolBuilder};
use tracing::{debug, info, warn};

use super::{read_library, LibraryId, LibraryLoad, LIBRARY_SCRIPT_NAME};
use crate::error::FloeError;
use crate::playsync::CancelHandle;
use crate::script::SandboxSettings;

/// Recurse into the given path and return every library script found, sorted.
/// A path that is itself a script is returned as is.
pub fn find_library_scripts(path: &Path) -> Result<Vec<PathBuf>, FloeError> {
    if path.is_file() {
        return Ok(vec![path.to_path_buf()]);
    }
    let mut scripts = Vec::new();
    collect_scripts(path, &mut scripts)?;
    scripts.sort();
    Ok(scripts)
}

fn collect_scripts(dir: &Path, scripts: &mut Vec<PathBuf>) -> Result<(), FloeError> {
    debug!("Searching for libraries in {dir:?}");
    for entry in fs::read_dir(dir).map_err(|e| FloeError::io(dir, e))? {
        let entry = entry.map_err(|e| FloeError::io(dir, e))?;
        let path = entry.path();

        if path.is_dir() {
            // Skip hidden directories such as .git.
            if path
                .file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n.starts_with('.'))
            {
                continue;
            }
            collect_scripts(&path, scripts)?;
        } else if path.file_name().is_some_and(|n| n == LIBRARY_SCRIPT_NAME) {
            scripts.push(path);
        }
    }
    Ok(())
}

/// A library that could not be loaded. Other libraries are unaffected.
#[derive(Debug)]
pub struct ScanFailure {
    pub path: PathBuf,
    pub error: FloeError,
}

#[derive(Debug, Default)]
pub struct ScanReport {
    pub libraries: Vec<LibraryLoad>,
    pub failures: Vec<ScanFailure>,
}

impl ScanReport {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty() && self.libraries.iter().all(|l| l.file_issues.is_empty())
    }
}

/// Interprets library scripts in parallel.
pub struct LibraryScanner {
    pool: ThreadPool,
    settings: SandboxSettings,
}

impl LibraryScanner {
    pub fn new(settings: SandboxSettings, threads: usize) -> Result<LibraryScanner, ThreadPoolBuildError> {
        let pool = ThreadPoolBuilder::new()
            .num_threads(threads.max(1))
            .thread_name(|i| format!("floe-worker-{i}"))
            .build()?;
        Ok(LibraryScanner { pool, settings })
    }

    /// Loads every library under `path`. When two libraries share an id, the
    /// one whose script path sorts first wins.
    pub fn scan(&self, path: &Path, cancel: Option<&CancelHandle>) -> Result<ScanReport, FloeError> {
        let scripts = find_library_scripts(path)?;
        info!(path = ?path, scripts = scripts.len(), "Scanning for libraries");

        let results: Vec<(PathBuf, Result<LibraryLoad, FloeError>)> = self.pool.install(|| {
            scripts
                .into_par_iter()
                .map(|script| {
                    let result = read_library(&script, &self.settings, cancel);
                    (script, result)
                })
                .collect()
        });

        let mut report = ScanReport::default();
        let mut seen: BTreeMap<LibraryId, PathBuf> = BTreeMap::new();
        for (path, result) in results {
            match result {
                Ok(load) => {
                    let id = load.library.id();
                    if let Some(first) = seen.get(&id) {
                        warn!(library = %id, path = ?path, first = ?first, "Duplicate library id");
                        report.failures.push(ScanFailure {
                            error: FloeError::InvalidFileFormat {
                                path: path.clone(),
                                message: format!("library \"{}\" is already loaded from {}", id, first.display()),
                            },
                            path,
                        });
                        continue;
                    }
                    seen.insert(id, path);
                    report.libraries.push(load);
                }
                Err(error) => {
                    warn!(path = ?path, code = %error.code(), err = %error, "Library failed to load");
                    report.failures.push(ScanFailure { path, error });
                }
            }
        }
        info!(
            loaded = report.libraries.len(),
            failed = report.failures.len(),
            "Library scan finished"
        );
        Ok(report)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::testutil::write_library;

    fn library_script(name: &str) -> String {
        format!(
            r#"return floe.new_library({{ name = "{}", tagline = "t", author = "me" }})"#,
            name
        )
    }

    #[test]
    fn test_find_scripts_recursively() {
        let dir = tempfile::tempdir().expect("tempdir");
        for sub in ["b", "a/nested", ".git/hidden"] {
            let path = dir.path().join(sub);
            fs::create_dir_all(&path).expect("mkdir");
            write_library(&path, "return nil");
        }
        fs::write(dir.path().join("a/other.lua"), "").expect("write");

        let scripts = find_library_scripts(dir.path()).expect("scan");
        assert_eq!(
            scripts,
            vec![
                dir.path().join("a/nested/floe.lua"),
                dir.path().join("b/floe.lua"),
            ]
        );
        assert_eq!(
            find_library_scripts(&scripts[0]).expect("file"),
            vec![scripts[0].clone()]
        );
    }

    #[test]
    fn test_scan_isolates_failures() {
        let dir = tempfile::tempdir().expect("tempdir");
        for (sub, script) in [
            ("good", library_script("Good")),
            ("broken", "return floe.new_library(".to_string()),
            ("copy", library_script("Good")),
            ("second", library_script("Second")),
        ] {
            let path = dir.path().join(sub);
            fs::create_dir_all(&path).expect("mkdir");
            write_library(&path, &script);
        }

        let scanner = LibraryScanner::new(SandboxSettings::default(), 2).expect("pool");
        let report = scanner.scan(dir.path(), None).expect("scan");
        let mut names: Vec<&str> = report
            .libraries
            .iter()
            .map(|l| l.library.info.name.as_str())
            .collect();
        names.sort();
        assert_eq!(names, vec!["Good", "Second"]);
        assert_eq!(report.failures.len(), 2);

        let codes: Vec<String> = report.failures.iter().map(|f| f.error.code().to_string()).collect();
        assert!(codes.contains(&"LUA-1".to_string()));
        assert!(codes.contains(&"CM-2".to_string()));
        // "copy" sorts before "good", so the copy is the one kept.
        let duplicate = report
            .failures
            .iter()
            .find(|f| f.error.code().to_string() == "CM-2")
            .expect("duplicate");
        assert!(duplicate.path.starts_with(dir.path().join("good")));
        assert!(!report.is_clean());
    }

    #[test]
    fn test_scan_missing_folder() {
        let dir = tempfile::tempdir().expect("tempdir");
        let scanner = LibraryScanner::new(SandboxSettings::default(), 1).expect("pool");
        let err = scanner.scan(&dir.path().join("nope"), None).unwrap_err();
        assert_eq!(err.code().to_string(), "CM-5");
    }
}
