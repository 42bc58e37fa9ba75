// SPDX-License-Identifier: Apache-2.0

use std::io::{self, BufRead, BufReader, Read, Seek, SeekFrom};
use std::time::{Duration, Instant};

/// A complete line read from the underlying stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Line {
    /// Line contents without the terminator
    pub text: Vec<u8>,
    /// Terminator length: 1 for `\n`, 2 for `\r\n`
    pub terminator_len: u8,
}

impl Line {
    /// Bytes consumed from the stream for this line
    pub fn len(&self) -> usize {
        self.text.len() + self.terminator_len as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Buffered line reader over a growing stream.
///
/// Reaching the end of the stream in the middle of a line is not an error: the
/// partial bytes are kept and the reader polls for the rest until
/// `eof_timeout` passes, at which point `read_line` reports end of file and the
/// partial bytes stay buffered for the next call.
pub struct LineReader<R> {
    inner: BufReader<R>,
    partial: Vec<u8>,
    poll_interval: Duration,
    eof_timeout: Duration,
}

impl<R: Read> LineReader<R> {
    pub fn new(
        inner: R,
        buffer_size: usize,
        poll_interval: Duration,
        eof_timeout: Duration,
    ) -> Self {
        Self {
            inner: BufReader::with_capacity(buffer_size, inner),
            partial: Vec::new(),
            poll_interval,
            eof_timeout,
        }
    }

    /// Read the next full line, or `Ok(None)` once no terminator has shown up
    /// within the EOF timeout.
    pub fn read_line(&mut self) -> io::Result<Option<Line>> {
        let started = Instant::now();

        loop {
            self.inner.read_until(b'\n', &mut self.partial)?;

            if self.partial.last() == Some(&b'\n') {
                return Ok(Some(self.take_line()));
            }

            // end of the available data, with or without a partial line
            if started.elapsed() >= self.eof_timeout {
                return Ok(None);
            }
            std::thread::sleep(self.poll_interval);
        }
    }

    /// Bytes of an unterminated line waiting for the rest of its data
    pub fn pending(&self) -> usize {
        self.partial.len()
    }

    pub fn get_ref(&self) -> &R {
        self.inner.get_ref()
    }

    fn take_line(&mut self) -> Line {
        let mut text = std::mem::take(&mut self.partial);
        text.pop();
        let terminator_len = if text.last() == Some(&b'\r') {
            text.pop();
            2
        } else {
            1
        };
        Line {
            text,
            terminator_len,
        }
    }
}

impl<R: Read + Seek> LineReader<R> {
    /// Reposition the stream, discarding buffered and partial data.
    pub fn seek_to(&mut self, offset: u64) -> io::Result<u64> {
        self.partial.clear();
        self.inner.seek(SeekFrom::Start(offset))
    }

    pub fn seek_to_end(&mut self) -> io::Result<u64> {
        self.partial.clear();
        self.inner.seek(SeekFrom::End(0))
    }
}
