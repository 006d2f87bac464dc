// Copyright (c) 2018 10x Genomics, Inc. All rights reserved.

//! Convert decoded nanopore capture files into per-run FASTQ files.
//!
//! An external decoder turns each capture file into a text blob made of 5-line groups:
//!
//! ```text
//! <runId>-<mode>
//! <read id>
//! <sequence>
//! +
//! <qualities>
//! ```
//!
//! where `<mode>` is `te` (template), `co` (complement) or `2D` (consensus).
//! [`PoreReadIter`] walks a blob and yields one [`PoreRead`] per complete group,
//! [`Demultiplexer`] appends each read to a per-`(run, mode)` staging stream, and
//! [`Demultiplexer::finalize`] lays the streams out as
//! `<destination>/<runId>/{template,complement,2D}.fq`.
//!
//! [`BatchRunner`] drives the whole conversion for a set of input files on a rayon
//! pool, and [`export_fastq`] wires discovery, decoding, routing and finalization
//! together from a [`BatchConfig`].

#[macro_use]
extern crate serde_derive;

#[macro_use]
extern crate log;

pub mod batch;
pub mod config;
pub mod decoder;
pub mod demux;
pub mod filenames;
pub mod pore_read;
pub mod pore_read_iter;
pub mod utils;

pub use crate::batch::{export_fastq, BatchError, BatchRunner, BatchSummary, ExportSummary};
pub use crate::config::BatchConfig;
pub use crate::decoder::{CommandDecoder, DecodeError, Decoder, DecoderDef, TextDecoder};
pub use crate::demux::{Demultiplexer, DemuxError, FinalizeSummary};
pub use crate::pore_read::{OutputKey, PoreRead, ReadMode, Unroutable};
pub use crate::pore_read_iter::PoreReadIter;
