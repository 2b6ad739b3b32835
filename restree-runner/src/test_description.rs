// Copyright (c) The restree Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Immutable metadata identifying a single test.

use camino::{Utf8Path, Utf8PathBuf};
use std::collections::BTreeMap;

/// Immutable metadata for one test, as produced by a
/// [`TestFinder`](crate::finder::TestFinder).
///
/// The test URL is the canonical identifier: the root-relative path of the
/// file the test lives in, plus an optional `#id` fragment for files that
/// contain more than one test case.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct TestDescription {
    file: Utf8PathBuf,
    url: String,
    params: BTreeMap<String, String>,
}

impl TestDescription {
    /// Creates a new test description.
    pub fn new(
        file: impl Into<Utf8PathBuf>,
        url: impl Into<String>,
        params: BTreeMap<String, String>,
    ) -> Self {
        Self {
            file: file.into(),
            url: url.into(),
            params,
        }
    }

    /// The source file the test was discovered in.
    pub fn file(&self) -> &Utf8Path {
        &self.file
    }

    /// The canonical test URL, including the fragment if any.
    pub fn url(&self) -> &str {
        &self.url
    }

    /// The test's parameter map.
    pub fn params(&self) -> &BTreeMap<String, String> {
        &self.params
    }

    /// Returns the work-relative path for this test's result file.
    pub fn work_relative_path(&self) -> Utf8PathBuf {
        work_relative_path(&self.url)
    }
}

/// Splits a test URL into its path and optional fragment.
pub fn split_url(url: &str) -> (&str, Option<&str>) {
    match url.split_once('#') {
        Some((path, fragment)) => (path, Some(fragment)),
        None => (url, None),
    }
}

/// Returns the final component of a test URL: the file name plus the
/// fragment, if any. This is the name the test is stored under in its parent
/// tree node.
pub fn url_file_name(url: &str) -> Option<&str> {
    let (path, fragment) = split_url(url);
    let file = path.rsplit('/').next()?;
    if file.is_empty() {
        return None;
    }
    match fragment {
        // The fragment starts one byte past the end of `path`, inside `url`.
        Some(_) => Some(&url[path.len() - file.len()..]),
        None => Some(file),
    }
}

/// Transforms a test URL into the corresponding result-file path, relative to
/// the work directory.
///
/// The fragment separator becomes an underscore in the file name stem, and
/// the source file's extension is replaced with `.jtr`.
pub fn work_relative_path(url: &str) -> Utf8PathBuf {
    let (path, fragment) = split_url(url);
    let mut result = Utf8PathBuf::from(path);
    let stem = result.file_stem().unwrap_or("").to_owned();
    let name = match fragment {
        Some(fragment) => format!("{stem}_{fragment}.jtr"),
        None => format!("{stem}.jtr"),
    };
    result.set_file_name(name);
    result
}
