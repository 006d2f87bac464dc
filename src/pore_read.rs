// Copyright (c) 2018 10x Genomics, Inc. All rights reserved.

//! A single read from a decoded nanopore capture file, and the key used to
//! route it to its consolidated FASTQ file.

use std::fmt;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::str::FromStr;

use thiserror::Error;

/// Separates the run id from the mode code in a run/mode tag, e.g. `run1-te`.
pub const RUN_MODE_SEPARATOR: char = '-';

/// The basecalling mode of a nanopore read. A molecule read by a 2D chemistry
/// yields a template read, a complement read and the 2D consensus of the two.
#[derive(Serialize, Deserialize, Copy, Clone, PartialOrd, Ord, PartialEq, Eq, Hash, Debug)]
pub enum ReadMode {
    Template,
    Complement,
    TwoD,
}

impl ReadMode {
    pub fn modes() -> [ReadMode; 3] {
        [ReadMode::Template, ReadMode::Complement, ReadMode::TwoD]
    }

    /// Look up a mode code (`te`, `co` or `2D`), ignoring case.
    pub fn from_code(code: &str) -> Option<ReadMode> {
        ReadMode::modes()
            .iter()
            .find(|m| m.code().eq_ignore_ascii_case(code))
            .copied()
    }

    /// Canonical mode code as emitted by the decoder.
    pub fn code(&self) -> &'static str {
        match self {
            ReadMode::Template => "te",
            ReadMode::Complement => "co",
            ReadMode::TwoD => "2D",
        }
    }

    /// Basename of the consolidated FASTQ file holding reads of this mode.
    pub fn file_stem(&self) -> &'static str {
        match self {
            ReadMode::Template => "template",
            ReadMode::Complement => "complement",
            ReadMode::TwoD => "2D",
        }
    }

    pub fn file_name(&self) -> String {
        format!("{}.fq", self.file_stem())
    }
}

impl fmt::Display for ReadMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.file_stem())
    }
}

impl FromStr for ReadMode {
    type Err = Unroutable;

    fn from_str(code: &str) -> Result<Self, Self::Err> {
        ReadMode::from_code(code).ok_or_else(|| Unroutable::UnknownMode(code.to_string()))
    }
}

/// Reasons a staged stream cannot be placed in the destination tree.
#[derive(Error, Serialize, Clone, PartialEq, Eq, Debug)]
pub enum Unroutable {
    #[error("run/mode tag '{0}' has no mode field")]
    MissingMode(String),
    #[error("unrecognized mode code '{0}'")]
    UnknownMode(String),
    #[error("'{0}' is not usable as a run directory name")]
    InvalidRunId(String),
}

/// Identifies one output stream: all reads of one mode from one run.
///
/// Recognized mode codes are normalized on construction, so `run1-te` and
/// `run1-TE` share a stream. Unrecognized codes are kept verbatim; the key is
/// still routable to a staging stream but is skipped when the batch is finalized.
#[derive(Serialize, Deserialize, Clone, PartialOrd, Ord, PartialEq, Eq, Hash, Debug)]
pub struct OutputKey {
    run_id: String,
    mode_code: Option<String>,
}

impl OutputKey {
    pub fn new(run_id: impl Into<String>, mode: ReadMode) -> OutputKey {
        OutputKey {
            run_id: run_id.into(),
            mode_code: Some(mode.code().to_string()),
        }
    }

    /// Split a run/mode tag such as `run1-te` into a key. The run id is the text
    /// before the first separator and the mode code the following field.
    pub fn from_run_mode(run_mode: &str) -> OutputKey {
        let mut fields = run_mode.split(RUN_MODE_SEPARATOR);
        let run_id = fields.next().unwrap_or_default().to_string();
        let mode_code = fields.next().map(|code| match ReadMode::from_code(code) {
            Some(mode) => mode.code().to_string(),
            None => code.to_string(),
        });

        OutputKey { run_id, mode_code }
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn mode_code(&self) -> Option<&str> {
        self.mode_code.as_deref()
    }

    pub fn mode(&self) -> Result<ReadMode, Unroutable> {
        let code = self
            .mode_code
            .as_deref()
            .ok_or_else(|| Unroutable::MissingMode(self.to_string()))?;
        code.parse()
    }

    /// Path of the consolidated FASTQ for this key: `<root>/<runId>/<mode>.fq`.
    pub fn destination(&self, root: impl AsRef<Path>) -> Result<PathBuf, Unroutable> {
        let mode = self.mode()?;
        if !is_valid_run_id(&self.run_id) {
            return Err(Unroutable::InvalidRunId(self.run_id.clone()));
        }

        Ok(root.as_ref().join(&self.run_id).join(mode.file_name()))
    }
}

impl fmt::Display for OutputKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.mode_code {
            Some(ref code) => write!(f, "{}{}{}", self.run_id, RUN_MODE_SEPARATOR, code),
            None => f.write_str(&self.run_id),
        }
    }
}

// the run id becomes a directory name, so it must stay a single path component
fn is_valid_run_id(run_id: &str) -> bool {
    !run_id.is_empty()
        && run_id != "."
        && run_id != ".."
        && !run_id.contains(|c| c == '/' || c == '\\')
}

/// One decoded read. Fields borrow the lines of the blob they were parsed from
/// and are kept verbatim: nothing checks that the sequence and qualities have
/// the same length, or that the separator line starts with `+`.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct PoreRead<'a> {
    run_mode: &'a str,
    read_id: &'a str,
    seq: &'a str,
    sep: &'a str,
    qual: &'a str,
}

impl<'a> PoreRead<'a> {
    /// Build a read from the five lines of a group, in blob order.
    pub fn new(lines: [&'a str; 5]) -> PoreRead<'a> {
        let [run_mode, read_id, seq, sep, qual] = lines;
        PoreRead {
            run_mode,
            read_id,
            seq,
            sep,
            qual,
        }
    }

    pub fn run_mode(&self) -> &'a str {
        self.run_mode
    }

    pub fn read_id(&self) -> &'a str {
        self.read_id
    }

    pub fn seq(&self) -> &'a str {
        self.seq
    }

    pub fn qual_separator(&self) -> &'a str {
        self.sep
    }

    pub fn qual(&self) -> &'a str {
        self.qual
    }

    pub fn output_key(&self) -> OutputKey {
        OutputKey::from_run_mode(self.run_mode)
    }

    /// Write the read as a 4-line FASTQ record, each line newline-terminated.
    /// The record goes out in a single `write_all`, so a failing buffered
    /// writer never holds part of a record.
    pub fn write_fastq<W: Write + ?Sized>(&self, w: &mut W) -> io::Result<()> {
        w.write_all(self.to_fastq().as_bytes())
    }

    /// The FASTQ record: `@` + read id, sequence, separator and qualities.
    /// The read id is used verbatim, even if it already starts with `@`.
    pub fn to_fastq(&self) -> String {
        let mut rec = String::with_capacity(
            self.read_id.len() + self.seq.len() + self.sep.len() + self.qual.len() + 5,
        );
        rec.push('@');
        rec.push_str(self.read_id);
        rec.push('\n');
        rec.push_str(self.seq);
        rec.push('\n');
        rec.push_str(self.sep);
        rec.push('\n');
        rec.push_str(self.qual);
        rec.push('\n');
        rec
    }
}
