//! `ByteLineSource`: an incremental, bounded-memory UTF-8 line reader over
//! an `AsyncRead` byte source, plus [`DataReader`], the lazy character
//! source streaming mode hands to the handler.

use std::collections::VecDeque;
use std::pin::Pin;

use tokio::io::{AsyncRead, AsyncReadExt};

use crate::error::SseError;
use crate::field::split_field;

const UTF8_BOM: &[u8] = &[0xEF, 0xBB, 0xBF];

/// Reads UTF-8 lines out of a byte stream, treating `\n`, `\r\n`, and bare
/// `\r` interchangeably as terminators (terminators are stripped). The
/// internal buffer starts at `capacity` bytes and grows transparently to
/// accommodate a single oversized line, shrinking back down once that
/// line is returned.
pub(crate) struct ByteLineSource {
    inner: Pin<Box<dyn AsyncRead + Send>>,
    capacity: usize,
    buf: Vec<u8>,
    /// Bytes already consumed from the front of `buf` that we haven't
    /// reclaimed yet; reclaimed (via `Vec::drain`) whenever we need to
    /// read more.
    consumed: usize,
    bom_checked: bool,
    eof: bool,
    /// A single line pushed back by a [`DataReader`] that peeked past the
    /// end of its event and needs the parser to see it again.
    unread: Option<String>,
}

impl ByteLineSource {
    pub(crate) fn new(inner: impl AsyncRead + Send + 'static, capacity: usize) -> Self {
        let capacity = capacity.max(64);
        Self {
            inner: Box::pin(inner),
            capacity,
            buf: Vec::with_capacity(capacity),
            consumed: 0,
            bom_checked: false,
            eof: false,
            unread: None,
        }
    }

    /// Pushes a line back so the next `next_line()` call returns it again.
    /// Used by [`DataReader`] when it peeks a line that does not continue
    /// the event's data.
    pub(crate) fn unread_line(&mut self, line: String) {
        debug_assert!(self.unread.is_none());
        self.unread = Some(line);
    }

    /// Returns the next logical line, `Ok(None)` on clean end of input.
    pub(crate) async fn next_line(&mut self) -> Result<Option<String>, SseError> {
        if let Some(line) = self.unread.take() {
            return Ok(Some(line));
        }
        if !self.bom_checked {
            self.strip_leading_bom().await?;
        }
        loop {
            if let Some((line_end, consumed)) = find_terminator(&self.buf[self.consumed..]) {
                let start = self.consumed;
                let line_bytes = &self.buf[start..start + line_end];
                let line = std::str::from_utf8(line_bytes)?.to_string();
                self.consumed += consumed;
                self.reclaim();
                return Ok(Some(line));
            }
            if self.fill().await? == 0 {
                self.eof = true;
                if self.consumed < self.buf.len() {
                    let line = std::str::from_utf8(&self.buf[self.consumed..])?.to_string();
                    self.consumed = self.buf.len();
                    self.reclaim();
                    return Ok(Some(line));
                }
                return Ok(None);
            }
        }
    }

    /// Returns a handle that yields the characters of a `data:` value
    /// followed, lazily, by any directly-continuing `data:` lines —
    /// streaming mode. `initial_value` is the value already parsed from
    /// the line that triggered streaming mode.
    pub(crate) fn streaming_reader<'a>(&'a mut self, initial_value: &str) -> DataReader<'a> {
        DataReader::new(self, initial_value)
    }

    async fn strip_leading_bom(&mut self) -> Result<(), SseError> {
        self.bom_checked = true;
        while self.buf.len() - self.consumed < UTF8_BOM.len() && !self.eof {
            if self.fill().await? == 0 {
                self.eof = true;
                break;
            }
        }
        if self.buf[self.consumed..].starts_with(UTF8_BOM) {
            self.consumed += UTF8_BOM.len();
            self.reclaim();
        }
        Ok(())
    }

    /// Reads more bytes from the transport into `buf`, returning the
    /// number of bytes read (`0` signals clean EOF).
    async fn fill(&mut self) -> Result<usize, SseError> {
        if self.buf.len() + self.capacity > self.buf.capacity() {
            self.buf.reserve(self.capacity);
        }
        let before = self.buf.len();
        let read = self.inner.read_buf(&mut self.buf).await?;
        debug_assert_eq!(self.buf.len(), before + read);
        Ok(read)
    }

    /// Drops already-consumed bytes once they build up, so the buffer
    /// doesn't grow without bound across many short lines.
    fn reclaim(&mut self) {
        if self.consumed > 0 && (self.consumed == self.buf.len() || self.consumed >= self.capacity)
        {
            self.buf.drain(..self.consumed);
            self.consumed = 0;
        }
    }
}

/// Finds the first line terminator in `buf`, returning
/// `(line_length, bytes_consumed_including_terminator)`. Returns `None`
/// when no complete terminator is present yet (including the ambiguous
/// case of a buffer that ends in a bare `\r`, which might still turn out
/// to be the start of `\r\n`).
fn find_terminator(buf: &[u8]) -> Option<(usize, usize)> {
    for (i, &b) in buf.iter().enumerate() {
        match b {
            b'\n' => return Some((i, i + 1)),
            b'\r' => {
                return match buf.get(i + 1) {
                    Some(b'\n') => Some((i, i + 2)),
                    Some(_) => Some((i, i + 1)),
                    None => None, // need one more byte to know
                };
            }
            _ => {}
        }
    }
    None
}

/// A lazy character source over a `data:` field's value, spanning
/// directly-continuing `data:` lines of the same event. Returned inside
/// [`MessageData::Streaming`](crate::event::MessageData::Streaming) and
/// must be drained (or [`close`](DataReader::close)d) before the handler
/// call that received it returns.
pub struct DataReader<'a> {
    source: &'a mut ByteLineSource,
    pending: VecDeque<char>,
    finished: bool,
}

impl<'a> DataReader<'a> {
    pub(crate) fn new(source: &'a mut ByteLineSource, initial_value: &str) -> Self {
        Self {
            source,
            pending: initial_value.chars().collect(),
            finished: false,
        }
    }

    /// Pulls the next character, reading further `data:` lines as needed.
    /// Returns `Ok(None)` once the event's data has been fully consumed.
    pub async fn next_char(&mut self) -> Result<Option<char>, SseError> {
        if let Some(c) = self.pending.pop_front() {
            return Ok(Some(c));
        }
        if self.finished {
            return Ok(None);
        }
        match self.source.next_line().await? {
            None => {
                self.finished = true;
                Ok(None)
            }
            Some(line) => {
                let (field, value) = split_field(&line);
                if !line.is_empty() && !line.starts_with(':') && field == "data" {
                    self.pending = value.chars().collect();
                    self.pending.push_front('\n');
                    Ok(self.pending.pop_front())
                } else {
                    self.source.unread_line(line);
                    self.finished = true;
                    Ok(None)
                }
            }
        }
    }

    /// Drains the remaining characters into an owned `String`.
    pub async fn read_to_string(&mut self) -> Result<String, SseError> {
        let mut out = String::new();
        while let Some(c) = self.next_char().await? {
            out.push(c);
        }
        Ok(out)
    }

    /// Marks the reader closed without draining it. Any bytes not yet
    /// peeked remain untouched in the underlying source; nothing is
    /// discarded from the wire, only from this reader's own small
    /// pending-character buffer.
    pub async fn close(&mut self) {
        self.pending.clear();
        self.finished = true;
    }
}
