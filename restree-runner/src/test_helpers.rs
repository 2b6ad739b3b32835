// Copyright (c) The restree Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Shared fixtures for unit tests: canned descriptions and records, plus an
//! in-memory test suite with a scripted finder.

use crate::{
    errors::FinderError,
    finder::TestFinder,
    status::TestStatus,
    test_description::{TestDescription, split_url},
    test_result::TestResult,
    tree::{TreeEvent, TreeNode, TreeNodeObserver},
};
use camino::{Utf8Path, Utf8PathBuf};
use chrono::{DateTime, Utc};
use std::{
    collections::{BTreeMap, HashMap},
    sync::{Arc, Mutex},
};

/// A description for the given URL, rooted under `/suite`.
pub(crate) fn desc_for(url: &str) -> TestDescription {
    let (path, _) = split_url(url);
    TestDescription::new(format!("/suite/{path}"), url, BTreeMap::new())
}

/// A freshly created record for the URL, sealed with the given status.
pub(crate) fn sealed_result(url: &str, status: TestStatus) -> Arc<TestResult> {
    let record = TestResult::new(desc_for(url));
    record.set_status(status).unwrap();
    record
}

/// Records the kinds of events fired at one tree node.
#[derive(Debug, Default)]
pub(crate) struct EventLog {
    kinds: Mutex<Vec<&'static str>>,
}

impl EventLog {
    pub(crate) fn kinds(&self) -> Vec<&'static str> {
        self.kinds.lock().unwrap().clone()
    }
}

impl TreeNodeObserver for EventLog {
    fn event(&self, _node: &Arc<TreeNode>, event: &TreeEvent) {
        let kind = match event {
            TreeEvent::BranchInserted { .. } => "branch_inserted",
            TreeEvent::BranchRemoved { .. } => "branch_removed",
            TreeEvent::ResultInserted { .. } => "result_inserted",
            TreeEvent::ResultReplaced { .. } => "result_replaced",
            TreeEvent::ResultRemoved { .. } => "result_removed",
            TreeEvent::CountersInvalidated => "counters_invalidated",
        };
        self.kinds.lock().unwrap().push(kind);
    }
}

#[derive(Debug, Default)]
struct SuiteState {
    /// Folder path to its direct entries.
    folders: HashMap<Utf8PathBuf, Vec<Utf8PathBuf>>,
    /// Test file path to the descriptions it contains.
    tests: HashMap<Utf8PathBuf, Vec<TestDescription>>,
    mtimes: HashMap<Utf8PathBuf, DateTime<Utc>>,
    /// How many times each location has been read.
    reads: HashMap<Utf8PathBuf, usize>,
}

/// An in-memory test suite that scripted finders crawl.
///
/// Shared between the test body and the finder it hands out, so tests can
/// mutate the suite and observe read counts while a tree holds the finder.
#[derive(Clone, Debug, Default)]
pub(crate) struct FakeSuite {
    state: Arc<Mutex<SuiteState>>,
}

impl FakeSuite {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Defines (or redefines) a folder and its direct entries, stamping it
    /// with the current time if it has no mtime yet.
    pub(crate) fn add_folder(&self, path: impl Into<Utf8PathBuf>, entries: &[&str]) {
        let path = path.into();
        let mut state = self.state.lock().unwrap();
        state.folders.insert(
            path.clone(),
            entries.iter().map(Utf8PathBuf::from).collect(),
        );
        state.mtimes.entry(path).or_insert_with(Utc::now);
    }

    /// Defines (or redefines) a test file and the descriptions it yields.
    pub(crate) fn add_test_file(
        &self,
        path: impl Into<Utf8PathBuf>,
        tests: Vec<TestDescription>,
    ) {
        let path = path.into();
        let mut state = self.state.lock().unwrap();
        state.tests.insert(path.clone(), tests);
        state.mtimes.entry(path).or_insert_with(Utc::now);
    }

    /// Sets a location's modification time.
    pub(crate) fn touch(&self, path: impl Into<Utf8PathBuf>, mtime: DateTime<Utc>) {
        self.state.lock().unwrap().mtimes.insert(path.into(), mtime);
    }

    /// How many times the location has been read through the finder.
    pub(crate) fn reads(&self, path: impl Into<Utf8PathBuf>) -> usize {
        self.state
            .lock()
            .unwrap()
            .reads
            .get(&path.into())
            .copied()
            .unwrap_or(0)
    }

    /// A finder over this suite. Each call returns an independent finder
    /// sharing the same underlying state.
    pub(crate) fn finder(&self) -> Box<dyn TestFinder> {
        Box::new(FakeFinder {
            suite: self.clone(),
            current: None,
        })
    }
}

#[derive(Debug)]
struct FakeFinder {
    suite: FakeSuite,
    current: Option<Utf8PathBuf>,
}

impl TestFinder for FakeFinder {
    fn read(&mut self, file: &Utf8Path) -> Result<(), FinderError> {
        let mut state = self.suite.state.lock().unwrap();
        if !state.folders.contains_key(file) && !state.tests.contains_key(file) {
            return Err(FinderError::Read {
                file: file.to_owned(),
                message: "no such location".to_owned(),
            });
        }
        *state.reads.entry(file.to_owned()).or_insert(0) += 1;
        self.current = Some(file.to_owned());
        Ok(())
    }

    fn tests(&self) -> Vec<TestDescription> {
        let state = self.suite.state.lock().unwrap();
        self.current
            .as_ref()
            .and_then(|current| state.tests.get(current))
            .cloned()
            .unwrap_or_default()
    }

    fn files(&self) -> Vec<Utf8PathBuf> {
        let state = self.suite.state.lock().unwrap();
        self.current
            .as_ref()
            .and_then(|current| state.folders.get(current))
            .cloned()
            .unwrap_or_default()
    }

    fn is_folder(&self, file: &Utf8Path) -> bool {
        self.suite.state.lock().unwrap().folders.contains_key(file)
    }

    fn last_modified(&self, file: &Utf8Path) -> Option<DateTime<Utc>> {
        self.suite.state.lock().unwrap().mtimes.get(file).copied()
    }
}

/// The standing example suite: `/suite/pkg` containing `A.html` with two
/// test cases and `B.html` with one.
pub(crate) fn three_test_suite() -> FakeSuite {
    let suite = FakeSuite::new();
    suite.add_folder("/suite", &["/suite/pkg"]);
    suite.add_folder("/suite/pkg", &["/suite/pkg/A.html", "/suite/pkg/B.html"]);
    suite.add_test_file(
        "/suite/pkg/A.html",
        vec![desc_for("pkg/A.html#t1"), desc_for("pkg/A.html#t2")],
    );
    suite.add_test_file("/suite/pkg/B.html", vec![desc_for("pkg/B.html")]);
    suite
}
