#![no_main]
#[macro_use] extern crate libfuzzer_sys;
extern crate pore_fastq;

use pore_fastq::pore_read_iter::{PoreReadIter, LINES_PER_READ};

fuzz_target!(|data: &[u8]| {
    if let Ok(blob) = std::str::from_utf8(data) {
        let lines = blob.lines().count();
        let mut iter = PoreReadIter::new(blob);
        let mut n = 0;

        for read in iter.by_ref() {
            let fastq = read.to_fastq();
            assert!(fastq.ends_with('\n'));
            assert_eq!(read.output_key().run_id(), read.run_mode().split('-').next().unwrap_or(""));
            n += 1;
        }

        assert!(n * LINES_PER_READ <= lines);
        assert!(iter.is_done());
        assert!(iter.truncated_lines() < LINES_PER_READ);
    }
});
