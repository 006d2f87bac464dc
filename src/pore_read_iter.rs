// Copyright (c) 2018 10x Genomics, Inc. All rights reserved.

//! Parse a decoded capture-file blob into an iterator over `PoreRead`s.

use std::iter::FusedIterator;
use std::str::Lines;

use crate::pore_read::PoreRead;

/// Number of blob lines that make up one read.
pub const LINES_PER_READ: usize = 5;

/// Parse `blob` from the start. The returned iterator borrows the blob and
/// holds no other state, so calling this again re-parses from the beginning.
pub fn parse(blob: &str) -> PoreReadIter<'_> {
    PoreReadIter::new(blob)
}

/// Iterate over the reads of a decoded blob, one per group of five lines.
///
/// A read is only yielded once all five of its lines are available. If the
/// blob ends part way through a group the partial group is dropped, and the
/// number of dropped lines is reported by `truncated_lines()`. Line contents
/// are not validated.
pub struct PoreReadIter<'a> {
    lines: Lines<'a>,
    truncated_lines: usize,
    done: bool,
}

impl<'a> PoreReadIter<'a> {
    pub fn new(blob: &'a str) -> PoreReadIter<'a> {
        // trailing line breaks do not start a new group
        let blob = blob.trim_end_matches(|c| c == '\n' || c == '\r');

        PoreReadIter {
            lines: blob.lines(),
            truncated_lines: 0,
            done: false,
        }
    }

    /// An absent blob parses the same as an empty one.
    pub fn from_option(blob: Option<&'a str>) -> PoreReadIter<'a> {
        PoreReadIter::new(blob.unwrap_or_default())
    }

    /// Lines left over in an incomplete trailing group. Only meaningful once
    /// the iterator has been exhausted.
    pub fn truncated_lines(&self) -> usize {
        self.truncated_lines
    }

    pub fn is_done(&self) -> bool {
        self.done
    }

    fn get_next(&mut self) -> Option<PoreRead<'a>> {
        if self.done {
            return None;
        }

        let mut window = [""; LINES_PER_READ];
        for (filled, slot) in window.iter_mut().enumerate() {
            match self.lines.next() {
                Some(line) => *slot = line,
                None => {
                    self.done = true;
                    self.truncated_lines = filled;
                    return None;
                }
            }
        }

        Some(PoreRead::new(window))
    }
}

impl<'a> Iterator for PoreReadIter<'a> {
    type Item = PoreRead<'a>;

    fn next(&mut self) -> Option<PoreRead<'a>> {
        self.get_next()
    }
}

impl<'a> FusedIterator for PoreReadIter<'a> {}
