// Copyright (c) 2018 10x Genomics, Inc. All rights reserved.

//! Utility methods.

use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Read, Write};
use std::path::Path;

use anyhow::{Context, Error};
use flate2::read::MultiGzDecoder;
use serde::Serialize;

const GZ_BUF_SIZE: usize = 1 << 22;

/// Open a (possibly gzipped or lz4-compressed) file into a BufReader.
/// Compression is detected from the filename extension.
pub fn open_with_gz<P: AsRef<Path>>(p: P) -> Result<Box<dyn BufRead>, Error> {
    let path = p.as_ref();
    let r = File::open(path).with_context(|| format!("error opening {:?}", path))?;

    match path.extension().and_then(|ext| ext.to_str()) {
        Some("gz") => {
            let gz = MultiGzDecoder::new(r);
            Ok(Box::new(BufReader::with_capacity(GZ_BUF_SIZE, gz)))
        }
        Some("lz4") => {
            let lz = lz4::Decoder::new(r)?;
            Ok(Box::new(BufReader::with_capacity(GZ_BUF_SIZE, lz)))
        }
        _ => Ok(Box::new(BufReader::with_capacity(32 * 1024, r))),
    }
}

/// Read the full, decompressed contents of a capture file.
pub fn read_capture_file<P: AsRef<Path>>(p: P) -> Result<Vec<u8>, Error> {
    let path = p.as_ref();
    let mut rdr = open_with_gz(path)?;
    let mut buf = Vec::new();
    rdr.read_to_end(&mut buf)
        .with_context(|| format!("error reading {:?}", path))?;
    Ok(buf)
}

/// Serialize `obj` as pretty-printed JSON to the file `filename`.
pub fn write_json<T: Serialize, P: AsRef<Path>>(obj: &T, filename: P) -> Result<(), Error> {
    let path = filename.as_ref();
    let f = File::create(path).with_context(|| format!("couldn't create file {:?}", path))?;
    let mut writer = BufWriter::new(f);
    serde_json::to_writer_pretty(&mut writer, obj)?;
    writer.write_all(b"\n")?;
    writer.flush()?;
    Ok(())
}

/// Parse a FASTQ file and return the (header, sequence, quality) of each record.
/// Headers are returned without the leading `@`.
#[cfg(test)]
pub fn read_fastq_records<P: AsRef<Path>>(
    p: P,
) -> Result<Vec<(String, String, String)>, Error> {
    use fastq::Record;

    let path = p.as_ref();
    let parser = fastq::Parser::new(open_with_gz(path)?);
    let mut iter = parser.ref_iter();
    let mut records = Vec::new();

    loop {
        iter.advance()
            .with_context(|| format!("error parsing FASTQ {:?}", path))?;
        match iter.get() {
            Some(rec) => records.push((
                String::from_utf8_lossy(rec.head()).into_owned(),
                String::from_utf8_lossy(rec.seq()).into_owned(),
                String::from_utf8_lossy(rec.qual()).into_owned(),
            )),
            None => break,
        }
    }

    Ok(records)
}

#[cfg(test)]
mod test {
    use super::*;
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    #[test]
    fn test_read_plain_and_gz() -> Result<(), Error> {
        let dir = TempDir::new()?;
        let blob = b"run1-te\nreadA\nACGT\n+\n!!!!\n";

        let plain = dir.path().join("a.fast5");
        std::fs::write(&plain, blob)?;
        assert_eq!(read_capture_file(&plain)?, blob.to_vec());

        let gz = dir.path().join("b.fast5.gz");
        let mut enc = GzEncoder::new(File::create(&gz)?, Compression::default());
        enc.write_all(blob)?;
        enc.finish()?;
        assert_eq!(read_capture_file(&gz)?, blob.to_vec());

        Ok(())
    }

    #[test]
    fn test_read_lz4() -> Result<(), Error> {
        let dir = TempDir::new()?;
        let blob = b"run1-2D\nreadA\nACGT\n+\n!!!!\n";

        let path = dir.path().join("c.fast5.lz4");
        let mut enc = lz4::EncoderBuilder::new().build(File::create(&path)?)?;
        enc.write_all(blob)?;
        let (_, res) = enc.finish();
        res?;

        assert_eq!(read_capture_file(&path)?, blob.to_vec());
        Ok(())
    }

    #[test]
    fn test_missing_file() {
        assert!(read_capture_file("/nonexistent/capture.fast5").is_err());
    }

    #[test]
    fn test_read_fastq_records() -> Result<(), Error> {
        let dir = TempDir::new()?;
        let path = dir.path().join("t.fq");
        std::fs::write(&path, "@readA\nACGT\n+\n!!!!\n@readB\nTT\n+\n##\n")?;

        let recs = read_fastq_records(&path)?;
        assert_eq!(
            recs,
            vec![
                ("readA".to_string(), "ACGT".to_string(), "!!!!".to_string()),
                ("readB".to_string(), "TT".to_string(), "##".to_string()),
            ]
        );
        Ok(())
    }
}
