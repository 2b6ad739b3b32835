// Copyright (c) The restree Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Named sections of test output within a result record.
//!
//! A section owns an ordered set of named output buffers and its own status,
//! and is mutable independently of its parent record until that status is
//! set. Output buffers bound their memory use: once a single stream exceeds
//! its limit, the middle of the buffer is dropped and a fixed overflow notice
//! spliced in, preserving a head and a tail window.

use crate::{
    errors::RecordStateError,
    status::{TestStatus, TestStatusKind},
};
use indexmap::IndexMap;
use std::sync::Mutex;

/// Title of the default message section present in every record.
pub const MESSAGE_SECTION_TITLE: &str = "script_messages";

/// Name of the default stream within a section.
pub const MESSAGE_STREAM_NAME: &str = "messages";

/// Default per-stream output limit, in bytes.
pub const DEFAULT_OUTPUT_LIMIT: usize = 100_000;

/// The notice spliced into the middle of an overflowed output buffer.
pub const OVERFLOW_NOTICE: &str =
    "\n\n[Output overflow: the harness discarded the middle of this stream; \
     the head and tail are preserved.]\n\n";

/// Reason text used when a section is force-closed by its parent record.
pub const INCOMPLETE_REASON: &str = "section did not complete";

/// A buffer for one output stream, bounding memory with middle truncation.
#[derive(Debug)]
pub struct OutputBuffer {
    limit: usize,
    head: String,
    tail: String,
    overflowed: bool,
    total_written: usize,
}

impl OutputBuffer {
    fn new(limit: usize) -> Self {
        Self {
            limit,
            head: String::new(),
            tail: String::new(),
            overflowed: false,
            total_written: 0,
        }
    }

    fn write(&mut self, text: &str) {
        self.total_written += text.len();
        if !self.overflowed {
            self.head.push_str(text);
            if self.head.len() > self.limit {
                let keep = floor_char_boundary(&self.head, self.limit / 2);
                self.tail = self.head.split_off(keep);
                self.overflowed = true;
                self.trim_tail();
            }
        } else {
            self.tail.push_str(text);
            self.trim_tail();
        }
    }

    fn trim_tail(&mut self) {
        let cap = self.limit - self.limit / 2;
        if self.tail.len() > cap {
            let cut = ceil_char_boundary(&self.tail, self.tail.len() - cap);
            self.tail.drain(..cut);
        }
    }

    /// The visible text of the buffer, with the overflow notice spliced in if
    /// the stream overflowed.
    fn text(&self) -> String {
        if self.overflowed {
            let mut out =
                String::with_capacity(self.head.len() + OVERFLOW_NOTICE.len() + self.tail.len());
            out.push_str(&self.head);
            out.push_str(OVERFLOW_NOTICE);
            out.push_str(&self.tail);
            out
        } else {
            self.head.clone()
        }
    }

    /// Restores a buffer from its persisted text.
    fn reloaded(text: String, total_written: usize, limit: usize) -> Self {
        Self {
            limit,
            head: text,
            tail: String::new(),
            // A reloaded buffer is never written to again, so it does not
            // need to remember whether it overflowed originally.
            overflowed: false,
            total_written,
        }
    }
}

fn floor_char_boundary(s: &str, mut index: usize) -> usize {
    while index > 0 && !s.is_char_boundary(index) {
        index -= 1;
    }
    index
}

fn ceil_char_boundary(s: &str, mut index: usize) -> usize {
    while index < s.len() && !s.is_char_boundary(index) {
        index += 1;
    }
    index
}

/// A full copy of a section's state, used for serialization.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct SectionSnapshot {
    /// The section title.
    pub title: String,
    /// Stream name, visible text, and total bytes written, in creation order.
    pub streams: Vec<(String, String, usize)>,
    /// The section's status, if set.
    pub status: Option<TestStatus>,
}

/// One named section of a test result.
///
/// Lock order: callers that hold the parent record's lock may take a
/// section's lock, never the reverse.
#[derive(Debug)]
pub struct Section {
    title: String,
    inner: Mutex<SectionInner>,
}

#[derive(Debug)]
struct SectionInner {
    streams: IndexMap<String, OutputBuffer>,
    status: Option<TestStatus>,
    limit: usize,
}

impl Section {
    /// Creates a new open section. The title must not contain whitespace.
    pub(crate) fn new(title: &str, limit: usize) -> Result<Self, RecordStateError> {
        if title.is_empty() || title.contains(char::is_whitespace) {
            return Err(RecordStateError::InvalidSectionTitle {
                title: title.to_owned(),
            });
        }
        Ok(Self {
            title: title.to_owned(),
            inner: Mutex::new(SectionInner {
                streams: IndexMap::new(),
                status: None,
                limit,
            }),
        })
    }

    /// Reconstructs a closed section from its persisted form.
    pub(crate) fn reconstructed(snapshot: SectionSnapshot) -> Self {
        let streams = snapshot
            .streams
            .into_iter()
            .map(|(name, text, total)| {
                (
                    name,
                    OutputBuffer::reloaded(text, total, DEFAULT_OUTPUT_LIMIT),
                )
            })
            .collect();
        Self {
            title: snapshot.title,
            inner: Mutex::new(SectionInner {
                streams,
                status: snapshot.status,
                limit: DEFAULT_OUTPUT_LIMIT,
            }),
        }
    }

    /// The section title.
    pub fn title(&self) -> &str {
        &self.title
    }

    /// Creates a new named output stream. A no-op if the stream exists.
    pub fn create_stream(&self, name: &str) -> Result<(), RecordStateError> {
        let mut inner = self.lock();
        self.check_open(&inner, "create_stream")?;
        let limit = inner.limit;
        inner
            .streams
            .entry(name.to_owned())
            .or_insert_with(|| OutputBuffer::new(limit));
        Ok(())
    }

    /// Appends text to a named stream, creating the stream if needed.
    pub fn write_output(&self, stream: &str, text: &str) -> Result<(), RecordStateError> {
        let mut inner = self.lock();
        self.check_open(&inner, "write_output")?;
        let limit = inner.limit;
        inner
            .streams
            .entry(stream.to_owned())
            .or_insert_with(|| OutputBuffer::new(limit))
            .write(text);
        Ok(())
    }

    /// Returns the stream names in creation order.
    pub fn stream_names(&self) -> Vec<String> {
        self.lock().streams.keys().cloned().collect()
    }

    /// Returns the visible text of one stream, if it exists.
    pub fn output_text(&self, stream: &str) -> Option<String> {
        self.lock().streams.get(stream).map(OutputBuffer::text)
    }

    /// The section's status, if set.
    pub fn status(&self) -> Option<TestStatus> {
        self.lock().status.clone()
    }

    /// True once the section's status has been set.
    pub fn is_closed(&self) -> bool {
        self.lock().status.is_some()
    }

    /// Sets the section's status, closing all of its output streams.
    pub fn set_status(&self, status: TestStatus) -> Result<(), RecordStateError> {
        let mut inner = self.lock();
        self.check_open(&inner, "set_status")?;
        inner.status = Some(status);
        Ok(())
    }

    /// Closes the section with an "incomplete" error status if it is still
    /// open. Used when the parent record is sealed.
    pub(crate) fn force_close(&self) {
        let mut inner = self.lock();
        if inner.status.is_none() {
            inner.status = Some(TestStatus::new(TestStatusKind::Error, INCOMPLETE_REASON));
        }
    }

    /// Captures the section's full state for serialization.
    pub(crate) fn snapshot(&self) -> SectionSnapshot {
        let inner = self.lock();
        SectionSnapshot {
            title: self.title.clone(),
            streams: inner
                .streams
                .iter()
                .map(|(name, buffer)| (name.clone(), buffer.text(), buffer.total_written))
                .collect(),
            status: inner.status.clone(),
        }
    }

    fn check_open(
        &self,
        inner: &SectionInner,
        attempted: &'static str,
    ) -> Result<(), RecordStateError> {
        if inner.status.is_some() {
            return Err(RecordStateError::SectionClosed {
                title: self.title.clone(),
                attempted,
            });
        }
        Ok(())
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, SectionInner> {
        // Section locks are leaf locks; a poisoned one means a writer
        // panicked mid-append, and the text it was appending is best-effort
        // anyway.
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}
