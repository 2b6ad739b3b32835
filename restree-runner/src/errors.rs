// Copyright (c) The restree Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Errors produced by restree-runner.

use camino::Utf8PathBuf;
use std::io;
use thiserror::Error;

/// An error returned when mutating a record or section that has been sealed.
///
/// Once a [`TestResult`](crate::test_result::TestResult)'s final status is
/// set, the record and all of its sections become permanently immutable; any
/// further mutation fails with this error.
#[derive(Clone, Debug, Error)]
pub enum RecordStateError {
    /// The record has a final status and cannot be changed.
    #[error("test result for `{url}` is immutable: {attempted} not permitted")]
    Immutable {
        /// The test URL of the record.
        url: String,
        /// A short description of the attempted mutation.
        attempted: &'static str,
    },

    /// The section's own status has been set and its buffers are closed.
    #[error("section `{title}` is closed: {attempted} not permitted")]
    SectionClosed {
        /// The section title.
        title: String,
        /// A short description of the attempted mutation.
        attempted: &'static str,
    },

    /// A section with this title already exists in the record.
    #[error("section `{title}` already exists in test result for `{url}`")]
    DuplicateSection {
        /// The test URL of the record.
        url: String,
        /// The duplicated title.
        title: String,
    },

    /// The section title contains embedded whitespace.
    #[error("section title `{title}` contains whitespace")]
    InvalidSectionTitle {
        /// The rejected title.
        title: String,
    },

    /// The record is still mutable and has no final state to persist.
    #[error("test result for `{url}` has no final status: {attempted} not permitted")]
    NotSealed {
        /// The test URL of the record.
        url: String,
        /// A short description of the attempted operation.
        attempted: &'static str,
    },
}

/// A structural fault in the result tree.
///
/// These indicate a violated caller or data invariant, and abort the
/// operation that detected them.
#[derive(Clone, Debug, Error)]
pub enum TreeError {
    /// A directory and a test result share a name at the same level.
    #[error(
        "name collision under `{parent_path}`: `{name}` is both a directory and a test result"
    )]
    NameCollision {
        /// Path of the parent node, relative to the suite root.
        parent_path: String,
        /// The colliding child name.
        name: String,
    },

    /// A test URL did not resolve to a usable child name.
    #[error("test URL `{url}` has no final path component")]
    EmptyUrl {
        /// The offending URL.
        url: String,
    },
}

/// An error that occurred while reading or writing a result file.
///
/// Callers must be able to distinguish "the file is gone" (the test is known
/// not to have run, or its record was pruned) from "the file is there but
/// cannot be trusted".
#[derive(Debug, Error)]
pub enum ResultFileError {
    /// The backing file does not exist.
    #[error("result file `{path}` not found")]
    NotFound {
        /// The missing path.
        path: Utf8PathBuf,
    },

    /// The file's header line is not one of the accepted formats.
    #[error("result file `{path}` has an unrecognized header: `{header}`")]
    UnrecognizedHeader {
        /// The file path.
        path: Utf8PathBuf,
        /// The header line that was read.
        header: String,
    },

    /// The file's header was accepted but its body is structurally invalid.
    #[error("failed to parse result file `{path}` at line {line}: {message}")]
    Parse {
        /// The file path.
        path: Utf8PathBuf,
        /// 1-based line number of the fault.
        line: usize,
        /// What went wrong.
        message: String,
    },

    /// An I/O error occurred while reading or writing the file.
    #[error("I/O error on result file `{path}`")]
    Io {
        /// The file path.
        path: Utf8PathBuf,
        /// The underlying error.
        #[source]
        error: io::Error,
    },

    /// The record was shrunk and has no backing file to reload from.
    #[error("test result for `{url}` was shrunk and has no backing file")]
    NoBackingFile {
        /// The test URL of the record.
        url: String,
    },
}

/// Umbrella error for record operations that can fail on either the record's
/// state or its backing file.
#[derive(Debug, Error)]
pub enum RecordError {
    /// The record's state forbids the operation.
    #[error(transparent)]
    State(#[from] RecordStateError),

    /// The backing file could not be read or written.
    #[error(transparent)]
    File(#[from] ResultFileError),
}

impl ResultFileError {
    pub(crate) fn parse(
        path: impl Into<Utf8PathBuf>,
        line: usize,
        message: impl Into<String>,
    ) -> Self {
        Self::Parse {
            path: path.into(),
            line,
            message: message.into(),
        }
    }
}

/// An error produced by a [`TestFinder`](crate::finder::TestFinder), or by a
/// tree operation that consulted one.
///
/// A failed scan aborts only the population of the node that triggered it;
/// the node is left not-up-to-date and the scan is retried on the next
/// access.
#[derive(Debug, Error)]
pub enum FinderError {
    /// The finder could not read a location.
    #[error("finder failed to read `{file}`: {message}")]
    Read {
        /// The location passed to the finder.
        file: Utf8PathBuf,
        /// The finder's explanation.
        message: String,
    },

    /// A test description produced by the finder is malformed.
    #[error("malformed test description in `{file}`: {message}")]
    BadDescription {
        /// The file the description came from.
        file: Utf8PathBuf,
        /// What is wrong with it.
        message: String,
    },

    /// A structural fault was detected while applying finder output.
    #[error(transparent)]
    Tree(#[from] TreeError),
}

/// An error from the [`ResultCache`](crate::cache::ResultCache) collaborator.
///
/// Cache errors are never fatal: the table logs them and degrades to
/// operating purely off live insertions.
#[derive(Debug, Error)]
pub enum CacheError {
    /// The cache could not be read or written.
    #[error("result cache I/O error")]
    Io {
        /// The underlying error.
        #[source]
        error: io::Error,
    },

    /// A cache entry could not be interpreted.
    #[error("corrupt result cache entry for `{key}`: {message}")]
    CorruptEntry {
        /// The cache key of the bad entry.
        key: String,
        /// What went wrong.
        message: String,
    },
}

/// An error returned while parsing a
/// [`TestStatus`](crate::status::TestStatus) from its one-line form.
#[derive(Clone, Debug, Error)]
#[error("unrecognized test status line: `{input}`")]
pub struct StatusParseError {
    pub(crate) input: String,
}

impl StatusParseError {
    pub(crate) fn new(input: impl Into<String>) -> Self {
        Self {
            input: input.into(),
        }
    }
}
