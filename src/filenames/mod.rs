//! Utilities for finding the capture files of a batch on disk.

use std::io;
use std::path::{Path, PathBuf};

use lazy_static::lazy_static;
use regex::Regex;

/// Matches nanopore capture files, optionally gzip or lz4 compressed.
pub const DEFAULT_CAPTURE_PATTERN: &str = r"(?i)\.fast5(\.gz|\.lz4)?$";

lazy_static! {
    static ref DEFAULT_CAPTURE_REGEX: Regex = Regex::new(DEFAULT_CAPTURE_PATTERN).unwrap();
}

/// One capture file of a batch. `key` names the file in logs and summaries:
/// the path relative to the batch source, using `/` separators.
#[derive(Serialize, Deserialize, Clone, PartialEq, Eq, PartialOrd, Ord, Debug)]
pub struct InputFile {
    pub key: String,
    pub path: PathBuf,
}

/// A method to find the `InputFile`s of a batch based on some
/// configuration held by `self`.
pub trait FindInputs {
    fn find_inputs(&self) -> io::Result<Vec<InputFile>>;
}

/// A capture file, or a directory of capture files, on local disk.
#[derive(Clone, Debug)]
pub struct CaptureSource {
    pub path: PathBuf,
    pub pattern: Option<Regex>,
}

impl CaptureSource {
    pub fn new(path: impl Into<PathBuf>) -> CaptureSource {
        CaptureSource {
            path: path.into(),
            pattern: None,
        }
    }

    pub fn with_pattern(self, pattern: Regex) -> CaptureSource {
        CaptureSource {
            pattern: Some(pattern),
            ..self
        }
    }

    fn pattern(&self) -> &Regex {
        self.pattern.as_ref().unwrap_or(&*DEFAULT_CAPTURE_REGEX)
    }
}

impl FindInputs for CaptureSource {
    fn find_inputs(&self) -> io::Result<Vec<InputFile>> {
        find_capture_files(&self.path, self.pattern())
    }
}

/// Find the capture files under `source`.
///
/// A plain file is taken as-is, whatever its name. For a directory, files whose
/// name matches `pattern` are collected from the directory itself and from the
/// directories directly underneath it (runs are often split into batch or
/// pass/fail folders). Results are sorted by path.
pub fn find_capture_files(source: impl AsRef<Path>, pattern: &Regex) -> io::Result<Vec<InputFile>> {
    let source = source.as_ref();

    if source.is_file() {
        let key = source
            .file_name()
            .map(|f| f.to_string_lossy().into_owned())
            .unwrap_or_default();
        return Ok(vec![InputFile {
            key,
            path: source.to_path_buf(),
        }]);
    }

    let mut files = get_capture_files(source, pattern)?;
    for entry in std::fs::read_dir(source)? {
        let entry = entry?.path();
        if entry.is_dir() {
            files.extend(get_capture_files(entry, pattern)?);
        }
    }
    files.sort();

    Ok(files
        .into_iter()
        .map(|path| InputFile {
            key: relative_key(source, &path),
            path,
        })
        .collect())
}

fn get_capture_files(dir: impl AsRef<Path>, pattern: &Regex) -> io::Result<Vec<PathBuf>> {
    let mut res = Vec::new();

    for f in std::fs::read_dir(dir)? {
        let path = f?.path();
        if !path.is_file() {
            continue;
        }

        if let Some(name) = path.file_name().and_then(|n| n.to_str()) {
            if pattern.is_match(name) {
                res.push(path);
            }
        }
    }

    Ok(res)
}

fn relative_key(source: &Path, path: &Path) -> String {
    let rel = path.strip_prefix(source).unwrap_or(path);
    rel.components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}
