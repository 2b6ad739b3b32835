// Copyright (c) The restree Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The contract for the component that discovers tests.
//!
//! A finder crawls one location of a test suite at a time: `read` populates
//! its internal state, and `tests`/`files` retrieve what that read found.
//! Finder implementations are assumed stateful and non-reentrant, so all
//! access goes through a [`FinderHandle`], which serializes callers on a
//! single lock per finder instance.
//!
//! Finders need not be filesystem-backed: `is_folder` and `last_modified`
//! are abstract queries answered however the implementation sees fit.

use crate::{errors::FinderError, test_description::TestDescription};
use camino::{Utf8Path, Utf8PathBuf};
use chrono::{DateTime, Utc};
use std::{
    cmp::Ordering,
    fmt,
    sync::{Arc, Mutex, MutexGuard},
};

/// Discovers tests and subordinate files in a test suite.
///
/// `read` must be called before `tests` or `files`; both report on the most
/// recent read only.
pub trait TestFinder: Send {
    /// Crawls one location, replacing the finder's internal state.
    fn read(&mut self, file: &Utf8Path) -> Result<(), FinderError>;

    /// The test descriptions discovered by the last `read`.
    fn tests(&self) -> Vec<TestDescription>;

    /// The subordinate files and directories discovered by the last `read`.
    fn files(&self) -> Vec<Utf8PathBuf>;

    /// Whether the given location is directory-like.
    fn is_folder(&self, file: &Utf8Path) -> bool;

    /// The location's modification time, if the finder can determine one.
    fn last_modified(&self, file: &Utf8Path) -> Option<DateTime<Utc>>;

    /// The finder's natural ordering for test URLs, used to sort initial
    /// URLs before iteration. Defaults to a plain string comparison.
    fn compare(&self, a: &str, b: &str) -> Ordering {
        a.cmp(b)
    }
}

/// The result of reading one location through a finder.
#[derive(Clone, Debug)]
pub struct FinderEntries {
    /// Test descriptions found at the location.
    pub tests: Vec<TestDescription>,
    /// Subordinate files and directories found at the location.
    pub files: Vec<Utf8PathBuf>,
}

/// A shared, lock-serialized handle to a finder.
#[derive(Clone)]
pub struct FinderHandle {
    inner: Arc<Mutex<Box<dyn TestFinder>>>,
}

impl FinderHandle {
    /// Wraps a finder for shared use.
    pub fn new(finder: Box<dyn TestFinder>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(finder)),
        }
    }

    /// Runs a closure with exclusive access to the finder.
    pub fn with<R>(&self, f: impl FnOnce(&mut dyn TestFinder) -> R) -> R {
        let mut guard = self.lock();
        f(guard.as_mut())
    }

    /// Reads one location and returns everything it contained, under a
    /// single lock acquisition.
    pub fn read_entries(&self, file: &Utf8Path) -> Result<FinderEntries, FinderError> {
        let mut guard = self.lock();
        guard.read(file)?;
        Ok(FinderEntries {
            tests: guard.tests(),
            files: guard.files(),
        })
    }

    /// Compares two test URLs with the finder's natural ordering.
    pub fn compare(&self, a: &str, b: &str) -> Ordering {
        self.lock().compare(a, b)
    }

    fn lock(&self) -> MutexGuard<'_, Box<dyn TestFinder>> {
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

impl fmt::Debug for FinderHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FinderHandle").finish_non_exhaustive()
    }
}
