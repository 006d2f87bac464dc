// Copyright (c) 2018 10x Genomics, Inc. All rights reserved.

//! Settings for one conversion batch, loadable from JSON.

use std::env;
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};

use anyhow::Context;
use regex::Regex;
use thiserror::Error;

use crate::decoder::DecoderDef;
use crate::filenames::CaptureSource;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("no source given")]
    MissingSource,

    #[error("no destination given")]
    MissingDestination,

    #[error("invalid capture file pattern '{pattern}'")]
    BadPattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },

    #[error("a staging directory must not be inside the destination {0:?}")]
    StagingInDestination(PathBuf),
}

/// Everything needed to run one batch. Any field missing from a JSON config
/// takes its default value.
///
/// ```json
/// {
///   "source": "/data/run1/reads",
///   "destination": "/data/run1/fastq",
///   "threads": 8,
///   "decoder": { "type": "Command", "program": "fast5-to-blob" }
/// }
/// ```
#[derive(Serialize, Deserialize, Clone, PartialEq, Eq, Debug, Default)]
#[serde(default, deny_unknown_fields)]
pub struct BatchConfig {
    /// A capture file, or a directory of capture files
    pub source: PathBuf,

    /// Root of the per-run output tree
    pub destination: PathBuf,

    /// Where the per-batch staging directory is created. Defaults to the
    /// system temp directory.
    pub staging_dir: Option<PathBuf>,

    /// Worker threads. 0 lets rayon pick.
    pub threads: usize,

    /// Regex selecting capture files by name when `source` is a directory.
    pub file_pattern: Option<String>,

    pub decoder: DecoderDef,

    /// Optional path for a JSON summary of the run
    pub summary: Option<PathBuf>,
}

impl BatchConfig {
    pub fn new(source: impl Into<PathBuf>, destination: impl Into<PathBuf>) -> BatchConfig {
        BatchConfig {
            source: source.into(),
            destination: destination.into(),
            ..BatchConfig::default()
        }
    }

    pub fn from_json_file(p: impl AsRef<Path>) -> anyhow::Result<BatchConfig> {
        let path = p.as_ref();
        let f = File::open(path).with_context(|| format!("error opening config {:?}", path))?;
        let config = serde_json::from_reader(BufReader::new(f))
            .with_context(|| format!("error parsing config {:?}", path))?;
        Ok(config)
    }

    pub fn staging_root(&self) -> PathBuf {
        self.staging_dir.clone().unwrap_or_else(env::temp_dir)
    }

    pub fn capture_source(&self) -> Result<CaptureSource, ConfigError> {
        let source = CaptureSource::new(&self.source);
        match self.file_pattern {
            Some(ref pattern) => {
                let re = Regex::new(pattern).map_err(|source| ConfigError::BadPattern {
                    pattern: pattern.clone(),
                    source,
                })?;
                Ok(source.with_pattern(re))
            }
            None => Ok(source),
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.source.as_os_str().is_empty() {
            return Err(ConfigError::MissingSource);
        }
        if self.destination.as_os_str().is_empty() {
            return Err(ConfigError::MissingDestination);
        }
        // the batch removes its staging directory, keep it clear of the outputs
        if let Some(ref staging) = self.staging_dir {
            if staging.starts_with(&self.destination) {
                return Err(ConfigError::StagingInDestination(self.destination.clone()));
            }
        }
        self.capture_source()?;
        Ok(())
    }
}
