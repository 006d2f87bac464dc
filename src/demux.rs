// Copyright (c) 2018 10x Genomics, Inc. All rights reserved.

//! Route reads to one staging stream per `(run, mode)` key, and consolidate
//! the streams into the final `<destination>/<runId>/<mode>.fq` layout.
//!
//! A `Demultiplexer` lives for one batch. It is open for `route` calls from
//! any number of threads until `finalize` is called; `finalize` takes it by
//! value, so routing into a finalizing or closed batch does not compile.
//! The batch's staging directory is removed when the demultiplexer is
//! finalized or dropped, whichever comes first.

use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{SystemTime, UNIX_EPOCH};

use fxhash::FxHashMap;
use itertools::Itertools;
use rand::Rng;
use thiserror::Error;

use crate::pore_read::{OutputKey, PoreRead, ReadMode, Unroutable};

const STAGING_PREFIX: &str = "pore-fastq";
const STAGING_ATTEMPTS: usize = 8;
const STREAM_BUF_SIZE: usize = 1 << 16;

#[derive(Error, Debug)]
pub enum DemuxError {
    #[error("error creating staging directory {path:?}")]
    StagingDir {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("error writing staging stream {path:?} for {key}")]
    Staging {
        key: OutputKey,
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("error creating destination directory {path:?}")]
    Destination {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Batch-scoped scratch directory. The name combines a timestamp with a
/// random token, so concurrent batches sharing a staging root never collide.
struct StagingArea {
    path: PathBuf,
}

impl StagingArea {
    fn create(root: &Path) -> Result<StagingArea, DemuxError> {
        fs::create_dir_all(root).map_err(|source| DemuxError::StagingDir {
            path: root.to_path_buf(),
            source,
        })?;

        let millis = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis())
            .unwrap_or_default();
        let mut rng = rand::thread_rng();

        let mut attempt = 0;
        loop {
            let token: u32 = rng.gen();
            let path = root.join(format!("{}-{}-{:08x}", STAGING_PREFIX, millis, token));

            match fs::create_dir(&path) {
                Ok(()) => {
                    debug!("staging reads in {:?}", path);
                    return Ok(StagingArea { path });
                }
                Err(e)
                    if e.kind() == io::ErrorKind::AlreadyExists
                        && attempt + 1 < STAGING_ATTEMPTS =>
                {
                    attempt += 1;
                }
                Err(source) => return Err(DemuxError::StagingDir { path, source }),
            }
        }
    }
}

impl Drop for StagingArea {
    fn drop(&mut self) {
        match fs::remove_dir_all(&self.path) {
            Ok(()) => debug!("removed staging directory {:?}", self.path),
            Err(e) if e.kind() == io::ErrorKind::NotFound => (),
            Err(e) => warn!("could not remove staging directory {:?}: {}", self.path, e),
        }
    }
}

struct KeyStream {
    path: PathBuf,
    writer: BufWriter<File>,
    records: usize,
}

/// A consolidated FASTQ file produced by `finalize`.
#[derive(Serialize, Clone, PartialEq, Eq, Debug)]
pub struct WrittenFile {
    pub run_id: String,
    pub mode: ReadMode,
    pub path: PathBuf,
    pub records: usize,
}

/// A stream that could not be placed in the destination tree.
#[derive(Serialize, Clone, PartialEq, Eq, Debug)]
pub struct SkippedKey {
    pub key: OutputKey,
    pub reason: Unroutable,
    pub records: usize,
}

/// A stream whose consolidated file could not be written.
#[derive(Serialize, Clone, PartialEq, Eq, Debug)]
pub struct FailedKey {
    pub key: OutputKey,
    pub records: usize,
    pub error: String,
}

/// Outcome of finalizing one batch, sorted by key.
#[derive(Serialize, Default, Clone, PartialEq, Eq, Debug)]
pub struct FinalizeSummary {
    pub written: Vec<WrittenFile>,
    pub skipped: Vec<SkippedKey>,
    pub failed: Vec<FailedKey>,
}

impl FinalizeSummary {
    pub fn records_written(&self) -> usize {
        self.written.iter().map(|w| w.records).sum()
    }

    pub fn records_skipped(&self) -> usize {
        self.skipped.iter().map(|s| s.records).sum()
    }

    /// True when every routable stream made it to the destination.
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Per-batch router from reads to staging streams.
pub struct Demultiplexer {
    staging: StagingArea,
    streams: Mutex<FxHashMap<OutputKey, Arc<Mutex<KeyStream>>>>,
}

impl Demultiplexer {
    /// Open a new batch, staging reads in a fresh directory under `staging_root`.
    pub fn new(staging_root: impl AsRef<Path>) -> Result<Demultiplexer, DemuxError> {
        Ok(Demultiplexer {
            staging: StagingArea::create(staging_root.as_ref())?,
            streams: Mutex::new(FxHashMap::default()),
        })
    }

    pub fn staging_dir(&self) -> &Path {
        &self.staging.path
    }

    /// Keys that have received at least one read, sorted.
    pub fn keys(&self) -> Vec<OutputKey> {
        let streams = self.streams.lock().unwrap_or_else(PoisonError::into_inner);
        streams.keys().cloned().sorted().collect()
    }

    // look up the stream first so writes to different keys don't serialize on the map lock
    fn get_stream(&self, key: &OutputKey) -> Result<Arc<Mutex<KeyStream>>, DemuxError> {
        use std::collections::hash_map::Entry::*;
        let mut streams = self.streams.lock().unwrap_or_else(PoisonError::into_inner);
        let n_streams = streams.len();

        match streams.entry(key.clone()) {
            Occupied(e) => Ok(Arc::clone(e.get())),
            Vacant(e) => {
                // run/mode tags come from the decoder and aren't safe file names
                let path = self
                    .staging
                    .path
                    .join(format!("stream-{:05}.fq", n_streams));
                let file = File::create(&path).map_err(|source| DemuxError::Staging {
                    key: key.clone(),
                    path: path.clone(),
                    source,
                })?;

                let stream = KeyStream {
                    path,
                    writer: BufWriter::with_capacity(STREAM_BUF_SIZE, file),
                    records: 0,
                };
                Ok(Arc::clone(e.insert(Arc::new(Mutex::new(stream)))))
            }
        }
    }

    /// Format `read` as FASTQ and append it to the staging stream for its key.
    /// Reads with the same key are kept in the order they are routed.
    pub fn route(&self, read: &PoreRead<'_>) -> Result<OutputKey, DemuxError> {
        let key = read.output_key();
        let locked_stream = self.get_stream(&key)?;
        let mut stream = locked_stream.lock().unwrap_or_else(PoisonError::into_inner);

        if let Err(source) = read.write_fastq(&mut stream.writer) {
            return Err(DemuxError::Staging {
                key,
                path: stream.path.clone(),
                source,
            });
        }
        stream.records += 1;

        Ok(key)
    }

    /// Consolidate every staged stream into `<destination>/<runId>/<mode>.fq`.
    ///
    /// Streams whose key has no recognized mode, or whose run id is unusable as a
    /// directory name, are skipped. A failure to write one stream is recorded
    /// and the remaining streams are still written. Only a failure to create
    /// `destination` itself is returned as an error. The staging directory is
    /// removed on return in every case.
    pub fn finalize(self, destination: impl AsRef<Path>) -> Result<FinalizeSummary, DemuxError> {
        let destination = destination.as_ref();
        let Demultiplexer { staging, streams } = self;
        let streams = streams.into_inner().unwrap_or_else(PoisonError::into_inner);

        fs::create_dir_all(destination).map_err(|source| DemuxError::Destination {
            path: destination.to_path_buf(),
            source,
        })?;

        let mut summary = FinalizeSummary::default();

        for (key, stream) in streams.into_iter().sorted_by(|a, b| a.0.cmp(&b.0)) {
            let (staged, records, flushed) = close_stream(stream);

            let dest = match key.destination(destination) {
                Ok(dest) => dest,
                Err(reason) => {
                    warn!("skipping {} reads with run/mode {}: {}", records, key, reason);
                    summary.skipped.push(SkippedKey {
                        key,
                        reason,
                        records,
                    });
                    continue;
                }
            };

            match flushed.and_then(|_| materialize(&staged, &dest)) {
                Ok(()) => {
                    // destination() only succeeds for keys with a known mode
                    if let Ok(mode) = key.mode() {
                        info!(
                            "Copied {} {} sequences for run {} to {:?}",
                            records,
                            mode,
                            key.run_id(),
                            dest
                        );
                        summary.written.push(WrittenFile {
                            run_id: key.run_id().to_string(),
                            mode,
                            path: dest,
                            records,
                        });
                    }
                }
                Err(e) => {
                    warn!("error writing {:?} for {}: {}", dest, key, e);
                    summary.failed.push(FailedKey {
                        key,
                        records,
                        error: e.to_string(),
                    });
                }
            }
        }

        info!(
            "finalized {} files ({} reads), skipped {} streams ({} reads), {} failed",
            summary.written.len(),
            summary.records_written(),
            summary.skipped.len(),
            summary.records_skipped(),
            summary.failed.len()
        );

        drop(staging);
        Ok(summary)
    }
}

// flush and close the staging file exactly once
fn close_stream(stream: Arc<Mutex<KeyStream>>) -> (PathBuf, usize, io::Result<()>) {
    let mut locked = stream.lock().unwrap_or_else(PoisonError::into_inner);
    let flushed = locked.writer.flush();
    let res = (locked.path.clone(), locked.records, flushed);
    drop(locked);
    drop(stream);
    res
}

fn materialize(staged: &Path, dest: &Path) -> io::Result<()> {
    if let Some(run_dir) = dest.parent() {
        fs::create_dir_all(run_dir)?;
    }

    // the staging area may be on a different filesystem
    if fs::rename(staged, dest).is_err() {
        fs::copy(staged, dest)?;
    }
    Ok(())
}
