// Copyright (c) 2018 10x Genomics, Inc. All rights reserved.

//! Run the conversion of a set of capture files as one batch: decode each
//! file, parse its reads and route them on a rayon pool, then consolidate the
//! routed reads into the per-run output tree.

use std::io;
use std::path::PathBuf;

use rayon::prelude::*;
use thiserror::Error;

use crate::config::{BatchConfig, ConfigError};
use crate::decoder::{DecodeError, Decoder};
use crate::demux::{Demultiplexer, DemuxError, FinalizeSummary};
use crate::filenames::{FindInputs, InputFile};
use crate::pore_read_iter::PoreReadIter;
use crate::utils;

/// Failures that stop the whole batch. Problems with a single file or a single
/// output stream are counted in the summaries instead.
#[derive(Error, Debug)]
pub enum BatchError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("source {0:?} does not exist")]
    SourceMissing(PathBuf),

    #[error("error listing capture files in {path:?}")]
    Listing {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("error initializing decoder")]
    Decoder(#[from] DecodeError),

    #[error("error building worker pool")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),

    #[error(transparent)]
    Demux(#[from] DemuxError),
}

/// What happened to one input file.
#[derive(Debug)]
pub enum FileOutcome {
    /// Reads were routed. `truncated_lines` counts the lines of an incomplete
    /// trailing group that were dropped.
    Routed {
        records: usize,
        truncated_lines: usize,
    },
    /// The blob decoded but held no complete read.
    NoReads { truncated_lines: usize },
    /// The decoder failed or produced an empty blob.
    Skipped(DecodeError),
    /// The file could not be read, or its reads could not be staged.
    Failed(anyhow::Error),
}

/// Decode one capture file and route its reads, in order.
///
/// Decode failures and empty blobs skip the file. A staging failure stops
/// routing for this file only; reads routed before the failure stay staged.
pub fn process_file(
    key: &str,
    raw: &[u8],
    decoder: &dyn Decoder,
    demux: &Demultiplexer,
) -> FileOutcome {
    let blob = match decoder.decode(raw) {
        Ok(blob) if blob.trim().is_empty() => {
            warn!(
                "Could not read sequences from file {}: the decoder returned no data",
                key
            );
            return FileOutcome::Skipped(DecodeError::Empty);
        }
        Ok(blob) => blob,
        Err(e) => {
            warn!(
                "Could not read sequences from file {}: {}. Maybe the file does not contain any sequence or it is corrupt",
                key, e
            );
            return FileOutcome::Skipped(e);
        }
    };

    let mut reads = PoreReadIter::new(&blob);
    let mut records = 0;

    for read in reads.by_ref() {
        if let Err(e) = demux.route(&read) {
            warn!("error routing reads from file {}: {}", key, e);
            return FileOutcome::Failed(e.into());
        }
        records += 1;
    }

    let truncated_lines = reads.truncated_lines();
    if truncated_lines > 0 {
        debug!(
            "file {}: dropped {} trailing lines of an incomplete read",
            key, truncated_lines
        );
    }

    if records == 0 {
        warn!("File {} holds no complete reads", key);
        return FileOutcome::NoReads { truncated_lines };
    }

    info!("File {}. Processed {} reads", key, records);
    FileOutcome::Routed {
        records,
        truncated_lines,
    }
}

/// Per-file counts for one batch.
#[derive(Serialize, Default, Clone, PartialEq, Eq, Debug)]
pub struct BatchSummary {
    pub files: usize,
    pub files_routed: usize,
    pub files_skipped: usize,
    pub files_failed: usize,
    pub records_routed: usize,
    /// Files that ended part way through a read
    pub files_truncated: usize,
    pub skipped: Vec<String>,
    pub failed: Vec<String>,
}

impl BatchSummary {
    fn add(mut self, key: &str, outcome: &FileOutcome) -> BatchSummary {
        self.files += 1;
        match outcome {
            FileOutcome::Routed {
                records,
                truncated_lines,
            } => {
                self.files_routed += 1;
                self.records_routed += records;
                if *truncated_lines > 0 {
                    self.files_truncated += 1;
                }
            }
            FileOutcome::NoReads { truncated_lines } => {
                self.files_skipped += 1;
                self.skipped.push(key.to_string());
                if *truncated_lines > 0 {
                    self.files_truncated += 1;
                }
            }
            FileOutcome::Skipped(_) => {
                self.files_skipped += 1;
                self.skipped.push(key.to_string());
            }
            FileOutcome::Failed(_) => {
                self.files_failed += 1;
                self.failed.push(key.to_string());
            }
        }
        self
    }

    fn merge(mut self, other: BatchSummary) -> BatchSummary {
        self.files += other.files;
        self.files_routed += other.files_routed;
        self.files_skipped += other.files_skipped;
        self.files_failed += other.files_failed;
        self.records_routed += other.records_routed;
        self.files_truncated += other.files_truncated;
        self.skipped.extend(other.skipped);
        self.failed.extend(other.failed);
        self
    }
}

/// Drives the per-file work of a batch on a rayon pool. The decoder is built
/// once, before any file is dispatched, and shared by all workers.
pub struct BatchRunner {
    decoder: Box<dyn Decoder>,
    threads: usize,
}

impl BatchRunner {
    pub fn new(decoder: Box<dyn Decoder>, threads: usize) -> BatchRunner {
        BatchRunner { decoder, threads }
    }

    pub fn from_config(config: &BatchConfig) -> Result<BatchRunner, BatchError> {
        let decoder = config.decoder.build()?;
        Ok(BatchRunner::new(decoder, config.threads))
    }

    pub fn decoder(&self) -> &dyn Decoder {
        &*self.decoder
    }

    /// Read, decode and route one input file.
    pub fn process_input(&self, input: &InputFile, demux: &Demultiplexer) -> FileOutcome {
        match utils::read_capture_file(&input.path) {
            Ok(raw) => process_file(&input.key, &raw, self.decoder(), demux),
            Err(e) => {
                warn!("error reading capture file {}: {:#}", input.key, e);
                FileOutcome::Failed(e)
            }
        }
    }

    /// Process every input into `demux`. Files are independent of each other;
    /// the reads of a single file are routed in order.
    pub fn run(
        &self,
        inputs: &[InputFile],
        demux: &Demultiplexer,
    ) -> Result<BatchSummary, BatchError> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.threads)
            .build()?;

        info!(
            "start processing {} capture files on {} threads, decoder: {}",
            inputs.len(),
            pool.current_num_threads(),
            self.decoder.description()
        );

        let mut summary = pool.install(|| {
            inputs
                .par_iter()
                .fold(BatchSummary::default, |summary, input| {
                    let outcome = self.process_input(input, demux);
                    summary.add(&input.key, &outcome)
                })
                .reduce(BatchSummary::default, BatchSummary::merge)
        });
        summary.skipped.sort();
        summary.failed.sort();

        info!(
            "done processing: {} reads from {} files, {} files skipped, {} failed",
            summary.records_routed,
            summary.files_routed,
            summary.files_skipped,
            summary.files_failed
        );
        Ok(summary)
    }
}

/// Combined outcome of a full export.
#[derive(Serialize, Clone, PartialEq, Eq, Debug)]
pub struct ExportSummary {
    pub batch: BatchSummary,
    pub finalize: FinalizeSummary,
}

impl ExportSummary {
    /// True when no file or stream hit an I/O failure. Skipped files and
    /// unroutable streams do not count against completeness.
    pub fn is_complete(&self) -> bool {
        self.batch.files_failed == 0 && self.finalize.is_complete()
    }
}

/// Convert every capture file under `config.source` into the per-run FASTQ
/// tree under `config.destination`.
pub fn export_fastq(config: &BatchConfig) -> Result<ExportSummary, BatchError> {
    config.validate()?;
    if !config.source.exists() {
        return Err(BatchError::SourceMissing(config.source.clone()));
    }

    let inputs = config
        .capture_source()?
        .find_inputs()
        .map_err(|source| BatchError::Listing {
            path: config.source.clone(),
            source,
        })?;
    info!("found {} capture files in {:?}", inputs.len(), config.source);

    let runner = BatchRunner::from_config(config)?;
    let demux = Demultiplexer::new(config.staging_root())?;

    let batch = runner.run(&inputs, &demux)?;
    let finalize = demux.finalize(&config.destination)?;

    Ok(ExportSummary { batch, finalize })
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::decoder::{DecoderDef, TextDecoder};
    use pretty_assertions::assert_eq;
    use std::fs;
    use std::path::Path;
    use tempfile::TempDir;

    struct FailingDecoder;

    impl Decoder for FailingDecoder {
        fn decode(&self, _raw: &[u8]) -> Result<String, DecodeError> {
            Err(DecodeError::NotFound("native library".to_string()))
        }

        fn description(&self) -> String {
            "failing".to_string()
        }
    }

    fn write_inputs(dir: &Path) {
        fs::create_dir_all(dir).unwrap();
        fs::write(
            dir.join("a.txt"),
            "run1-te\nreadA\nACGT\n+\n!!!!\nrun1-co\nreadB\nTTTT\n+\n####\n",
        )
        .unwrap();
        fs::write(dir.join("b.txt"), "run1-te\nreadC\nGG\n+\n##\nrun1-2D\nreadD").unwrap();
        fs::write(dir.join("c.txt"), "run2-xx\nreadE\nGGGG\n+\n$$$$").unwrap();
        fs::write(dir.join("d.txt"), "").unwrap();
        fs::write(dir.join("e.txt"), [0xffu8, 0xfe, 0xfd]).unwrap();
        fs::write(dir.join("f.txt"), "run1-te\nreadF\nACGT\n+").unwrap();
        fs::write(dir.join("ignored.dat"), "run3-te\nreadG\nA\n+\n!").unwrap();
    }

    #[test]
    fn test_process_file() -> anyhow::Result<()> {
        let tmp = TempDir::new()?;
        let demux = Demultiplexer::new(tmp.path())?;

        let outcome = process_file(
            "x",
            b"run1-te\nreadA\nACGT\n+\n!!!!\nrun1",
            &TextDecoder,
            &demux,
        );
        assert!(matches!(
            outcome,
            FileOutcome::Routed {
                records: 1,
                truncated_lines: 1
            }
        ));

        let outcome = process_file("y", b"run1-te\nreadA", &TextDecoder, &demux);
        assert!(matches!(
            outcome,
            FileOutcome::NoReads { truncated_lines: 2 }
        ));

        let outcome = process_file("z", b"\n\n", &TextDecoder, &demux);
        assert!(matches!(outcome, FileOutcome::Skipped(DecodeError::Empty)));

        let outcome = process_file("w", b"run1-te\nreadA\nA\n+\n!", &FailingDecoder, &demux);
        assert!(matches!(outcome, FileOutcome::Skipped(DecodeError::NotFound(_))));
        Ok(())
    }

    #[test]
    fn test_export() -> anyhow::Result<()> {
        let tmp = TempDir::new()?;
        let source = tmp.path().join("reads");
        let out = tmp.path().join("fastq");
        let staging = tmp.path().join("staging");
        write_inputs(&source);

        let mut config = BatchConfig::new(&source, &out);
        config.file_pattern = Some(r"\.txt$".to_string());
        config.staging_dir = Some(staging.clone());
        config.threads = 2;

        let summary = export_fastq(&config)?;
        assert!(summary.is_complete());
        assert_eq!(
            summary.batch,
            BatchSummary {
                files: 6,
                files_routed: 3,
                files_skipped: 3,
                files_failed: 0,
                records_routed: 4,
                files_truncated: 2,
                skipped: vec!["d.txt".to_string(), "e.txt".to_string(), "f.txt".to_string()],
                failed: vec![],
            }
        );

        assert_eq!(summary.finalize.written.len(), 2);
        assert_eq!(summary.finalize.skipped.len(), 1);
        assert_eq!(summary.finalize.records_skipped(), 1);

        let template = fs::read_to_string(out.join("run1/template.fq"))?;
        assert!(template.contains("@readA\nACGT\n+\n!!!!\n"));
        assert!(template.contains("@readC\nGG\n+\n##\n"));
        assert!(!template.contains("readF"));
        assert_eq!(
            fs::read_to_string(out.join("run1/complement.fq"))?,
            "@readB\nTTTT\n+\n####\n"
        );
        assert!(!out.join("run1/2D.fq").exists());
        assert!(!out.join("run2").exists());
        assert!(!out.join("run3").exists());

        // the batch staging directory is gone, its parent is left alone
        assert!(staging.is_dir());
        assert_eq!(fs::read_dir(&staging)?.count(), 0);
        Ok(())
    }

    #[test]
    fn test_export_single_file() -> anyhow::Result<()> {
        let tmp = TempDir::new()?;
        let source = tmp.path().join("one.blob");
        fs::write(&source, "runZ-2D\nreadA\nACGT\n+\n!!!!\n")?;
        let out = tmp.path().join("fastq");

        let mut config = BatchConfig::new(&source, &out);
        config.staging_dir = Some(tmp.path().join("staging"));

        let summary = export_fastq(&config)?;
        assert_eq!(summary.batch.records_routed, 1);
        assert_eq!(
            fs::read_to_string(out.join("runZ/2D.fq"))?,
            "@readA\nACGT\n+\n!!!!\n"
        );
        Ok(())
    }

    #[test]
    fn test_missing_source() {
        let config = BatchConfig::new("/nonexistent/pore/reads", "/tmp/pore-out");
        assert!(matches!(
            export_fastq(&config),
            Err(BatchError::SourceMissing(_))
        ));
    }

    #[test]
    fn test_decoder_not_found_is_fatal() -> anyhow::Result<()> {
        let tmp = TempDir::new()?;
        let mut config = BatchConfig::new(tmp.path(), tmp.path().join("out"));
        config.decoder = DecoderDef::Command {
            program: "/nonexistent/bin/pore-decoder".to_string(),
            args: vec![],
        };

        assert!(matches!(
            export_fastq(&config),
            Err(BatchError::Decoder(DecodeError::NotFound(_)))
        ));
        Ok(())
    }

    #[test]
    fn test_failing_decoder_skips_every_file() -> anyhow::Result<()> {
        let tmp = TempDir::new()?;
        let source = tmp.path().join("reads");
        write_inputs(&source);

        let inputs = crate::filenames::find_capture_files(&source, &regex::Regex::new(r"\.txt$")?)?;
        let demux = Demultiplexer::new(tmp.path().join("staging"))?;
        let runner = BatchRunner::new(Box::new(FailingDecoder), 1);

        let summary = runner.run(&inputs, &demux)?;
        assert_eq!(summary.files, 6);
        assert_eq!(summary.files_skipped, 6);
        assert_eq!(summary.records_routed, 0);

        let finalize = demux.finalize(tmp.path().join("out"))?;
        assert!(finalize.written.is_empty());
        Ok(())
    }

    #[test]
    fn test_unreadable_input_fails_only_that_file() -> anyhow::Result<()> {
        let tmp = TempDir::new()?;
        let source = tmp.path().join("reads");
        write_inputs(&source);

        let pattern = regex::Regex::new(r"^a\.txt$")?;
        let mut inputs = crate::filenames::find_capture_files(&source, &pattern)?;
        inputs.push(InputFile {
            key: "gone.txt".to_string(),
            path: source.join("gone.txt"),
        });

        let demux = Demultiplexer::new(tmp.path().join("staging"))?;
        let runner = BatchRunner::new(Box::new(TextDecoder), 2);
        let summary = runner.run(&inputs, &demux)?;

        assert_eq!(summary.files_routed, 1);
        assert_eq!(summary.failed, vec!["gone.txt".to_string()]);

        let export = ExportSummary {
            batch: summary,
            finalize: demux.finalize(tmp.path().join("out"))?,
        };
        assert!(!export.is_complete());
        assert_eq!(export.finalize.records_written(), 2);
        Ok(())
    }
}
