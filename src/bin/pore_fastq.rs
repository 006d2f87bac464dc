// Copyright (c) 2018 10x Genomics, Inc. All rights reserved.

//! Convert a folder of nanopore capture files into per-run FASTQ files.

use std::path::PathBuf;
use std::process;

use anyhow::Context;
use clap::Parser;
use env_logger::Env;
use log::{error, info};

use pore_fastq::utils::write_json;
use pore_fastq::{export_fastq, BatchConfig, DecoderDef, ExportSummary};

const EXIT_FAILURE: i32 = 1;
const EXIT_PARTIAL: i32 = 2;

#[derive(Parser, Debug)]
#[command(version, about = "Demultiplex decoded nanopore reads into <run>/<mode>.fq files")]
struct Args {
    /// Capture file, or directory of capture files
    source: Option<PathBuf>,

    /// Root of the per-run output tree
    destination: Option<PathBuf>,

    /// Load settings from a JSON file; flags given here override it
    #[arg(long)]
    config: Option<PathBuf>,

    /// Worker threads (0 = one per core)
    #[arg(long)]
    threads: Option<usize>,

    /// Directory for the per-batch staging area
    #[arg(long)]
    staging_dir: Option<PathBuf>,

    /// Regex selecting capture files by name
    #[arg(long)]
    pattern: Option<String>,

    /// External decoder reading capture bytes on stdin
    #[arg(long, conflicts_with = "text")]
    decoder_cmd: Option<String>,

    /// Extra argument for the external decoder, may be repeated
    #[arg(long, requires = "decoder_cmd", allow_hyphen_values = true)]
    decoder_arg: Vec<String>,

    /// Inputs are already-decoded text blobs
    #[arg(long)]
    text: bool,

    /// Write the run summary as JSON
    #[arg(long)]
    summary: Option<PathBuf>,
}

impl Args {
    fn to_config(&self) -> anyhow::Result<BatchConfig> {
        let mut config = match self.config {
            Some(ref path) => BatchConfig::from_json_file(path)?,
            None => BatchConfig::default(),
        };

        if let Some(ref source) = self.source {
            config.source = source.clone();
        }
        if let Some(ref destination) = self.destination {
            config.destination = destination.clone();
        }
        if let Some(threads) = self.threads {
            config.threads = threads;
        }
        if let Some(ref staging) = self.staging_dir {
            config.staging_dir = Some(staging.clone());
        }
        if let Some(ref pattern) = self.pattern {
            config.file_pattern = Some(pattern.clone());
        }
        if let Some(ref program) = self.decoder_cmd {
            config.decoder = DecoderDef::Command {
                program: program.clone(),
                args: self.decoder_arg.clone(),
            };
        } else if self.text {
            config.decoder = DecoderDef::Text;
        }
        if let Some(ref summary) = self.summary {
            config.summary = Some(summary.clone());
        }

        Ok(config)
    }
}

fn run(args: &Args) -> anyhow::Result<ExportSummary> {
    let config = args.to_config()?;
    let summary = export_fastq(&config)
        .with_context(|| format!("error converting capture files from {:?}", config.source))?;

    if let Some(ref path) = config.summary {
        write_json(&summary, path)?;
        info!("wrote run summary to {:?}", path);
    }
    Ok(summary)
}

fn main() {
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    match run(&args) {
        Ok(summary) if summary.is_complete() => (),
        Ok(summary) => {
            error!(
                "{} files and {} output streams hit I/O errors",
                summary.batch.files_failed,
                summary.finalize.failed.len()
            );
            process::exit(EXIT_PARTIAL);
        }
        Err(e) => {
            error!("{:?}", e);
            process::exit(EXIT_FAILURE);
        }
    }
}
