// Copyright (c) The restree Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The record of one test execution.
//!
//! A [`TestResult`] moves through exactly two states. While its final status
//! is unset it is *mutable*: sections can be created, output written, and
//! properties set. Setting the status seals it: every still-open section is
//! force-closed as incomplete, derived properties are cached, registered
//! observers are notified once, and every further mutation fails.
//!
//! Sealed records that have been persisted can be *shrunk* to bound memory:
//! their section and property detail is discarded, and transparently reloaded
//! from the backing file on next access. The status itself always stays in
//! memory, so "what happened" is answerable even when "why" needs a reload.

use crate::{
    errors::{RecordError, RecordStateError, ResultFileError},
    resultfile::{self, RecordSnapshot},
    section::{DEFAULT_OUTPUT_LIMIT, MESSAGE_SECTION_TITLE, Section},
    status::{TestStatus, TestStatusKind},
    test_description::{TestDescription, work_relative_path},
    tree::TreeNode,
};
use camino::{Utf8Path, Utf8PathBuf};
use chrono::Utc;
use debug_ignore::DebugIgnore;
use indexmap::IndexMap;
use itertools::Itertools;
use std::{
    collections::VecDeque,
    sync::{Arc, Mutex, MutexGuard, Weak},
};
use tracing::debug;

/// Property key for the execution start timestamp.
pub const PROP_START: &str = "start";
/// Property key for the execution end timestamp.
pub const PROP_END: &str = "end";
/// Property key for the cached space-separated section title list.
pub const PROP_SECTIONS: &str = "sections";
/// Property key for the cached serialized final status.
pub const PROP_EXEC_STATUS: &str = "execStatus";
/// Property key for the environment name the test ran under.
pub const PROP_ENVIRONMENT: &str = "environment";
/// Property key for the script that ran the test.
pub const PROP_SCRIPT: &str = "script";

/// An observer of one test result's completion.
pub trait RecordObserver: Send + Sync {
    /// Called exactly once, when the record's final status is set.
    fn completed(&self, record: &Arc<TestResult>);
}

/// The outcome of one test execution. See the [module docs](self).
#[derive(Debug)]
pub struct TestResult {
    url: String,
    inner: Mutex<RecordInner>,
}

#[derive(Debug)]
struct RecordInner {
    backing_file: Option<Utf8PathBuf>,
    parent: Weak<TreeNode>,
    state: RecordState,
    observers: DebugIgnore<Vec<Arc<dyn RecordObserver>>>,
}

#[derive(Debug)]
enum RecordState {
    Mutable(RecordData),
    Immutable { status: TestStatus, data: RecordData },
    Shrunk { status: TestStatus },
}

#[derive(Debug, Default)]
struct RecordData {
    desc: Option<TestDescription>,
    env: IndexMap<String, String>,
    props: IndexMap<String, String>,
    sections: Vec<Arc<Section>>,
}

impl TestResult {
    /// Creates a mutable record for a test that is about to run.
    pub fn new(desc: TestDescription) -> Arc<Self> {
        Self::fresh(desc.url().to_owned(), Some(desc))
    }

    /// Creates a mutable record identified only by its test URL.
    pub fn new_for_url(url: impl Into<String>) -> Arc<Self> {
        Self::fresh(url.into(), None)
    }

    fn fresh(url: String, desc: Option<TestDescription>) -> Arc<Self> {
        let mut data = RecordData {
            desc,
            ..RecordData::default()
        };
        data.props
            .insert(PROP_START.to_owned(), Utc::now().to_rfc3339());
        let message = Section::new(MESSAGE_SECTION_TITLE, DEFAULT_OUTPUT_LIMIT)
            .expect("default section title is valid");
        data.sections.push(Arc::new(message));
        Arc::new(Self {
            url,
            inner: Mutex::new(RecordInner {
                backing_file: None,
                parent: Weak::new(),
                state: RecordState::Mutable(data),
                observers: DebugIgnore(Vec::new()),
            }),
        })
    }

    /// Creates an immutable not-run placeholder for a freshly discovered
    /// test.
    pub fn not_run(desc: TestDescription) -> Arc<Self> {
        let url = desc.url().to_owned();
        let data = RecordData {
            desc: Some(desc),
            ..RecordData::default()
        };
        Arc::new(Self {
            url,
            inner: Mutex::new(RecordInner {
                backing_file: None,
                parent: Weak::new(),
                state: RecordState::Immutable {
                    status: TestStatus::not_run("test has not yet run"),
                    data,
                },
                observers: DebugIgnore(Vec::new()),
            }),
        })
    }

    /// Reconstructs an immutable record from its result file.
    pub fn reload_from(path: &Utf8Path) -> Result<Arc<Self>, ResultFileError> {
        let snapshot = resultfile::load(path)?;
        Ok(Self::from_snapshot(snapshot, Some(path.to_owned())))
    }

    /// Reconstructs an immutable record from a parsed snapshot, e.g. one
    /// delivered by the result cache.
    pub fn from_snapshot(snapshot: RecordSnapshot, backing_file: Option<Utf8PathBuf>) -> Arc<Self> {
        let sections = snapshot
            .sections
            .into_iter()
            .map(|section| Arc::new(Section::reconstructed(section)))
            .collect();
        let data = RecordData {
            desc: snapshot.desc,
            env: snapshot.env,
            props: snapshot.props,
            sections,
        };
        Arc::new(Self {
            url: snapshot.url,
            inner: Mutex::new(RecordInner {
                backing_file,
                parent: Weak::new(),
                state: RecordState::Immutable {
                    status: snapshot.status,
                    data,
                },
                observers: DebugIgnore(Vec::new()),
            }),
        })
    }

    /// The canonical test URL this record belongs to.
    pub fn url(&self) -> &str {
        &self.url
    }

    /// The final status, or `None` while the record is still mutable.
    pub fn status(&self) -> Option<TestStatus> {
        match &self.lock().state {
            RecordState::Mutable(_) => None,
            RecordState::Immutable { status, .. } | RecordState::Shrunk { status } => {
                Some(status.clone())
            }
        }
    }

    /// The status kind, treating a status-less (still running) record as
    /// not-run.
    pub fn status_kind(&self) -> TestStatusKind {
        self.status()
            .map_or(TestStatusKind::NotRun, |status| status.kind)
    }

    /// True while the final status is unset.
    pub fn is_mutable(&self) -> bool {
        matches!(self.lock().state, RecordState::Mutable(_))
    }

    /// True if the record's in-memory detail has been discarded.
    pub fn is_shrunk(&self) -> bool {
        matches!(self.lock().state, RecordState::Shrunk { .. })
    }

    /// The path of the backing result file, if any.
    pub fn backing_file(&self) -> Option<Utf8PathBuf> {
        self.lock().backing_file.clone()
    }

    /// The tree node this record is currently stored under, if any.
    pub fn parent(&self) -> Option<Arc<TreeNode>> {
        self.lock().parent.upgrade()
    }

    pub(crate) fn set_parent(&self, parent: Weak<TreeNode>) {
        self.lock().parent = parent;
    }

    /// Creates a new section with a unique title.
    pub fn create_section(&self, title: &str) -> Result<Arc<Section>, RecordStateError> {
        let mut inner = self.lock();
        let RecordState::Mutable(data) = &mut inner.state else {
            return Err(self.immutable("create_section"));
        };
        let section = Arc::new(Section::new(title, DEFAULT_OUTPUT_LIMIT)?);
        if data.sections.iter().any(|s| s.title() == title) {
            return Err(RecordStateError::DuplicateSection {
                url: self.url.clone(),
                title: title.to_owned(),
            });
        }
        data.sections.push(Arc::clone(&section));
        Ok(section)
    }

    /// The default message section. Only available while mutable; reloaded
    /// records reach it through [`sections`](Self::sections).
    pub fn message_section(&self) -> Result<Arc<Section>, RecordStateError> {
        let inner = self.lock();
        let RecordState::Mutable(data) = &inner.state else {
            return Err(self.immutable("message_section"));
        };
        Ok(Arc::clone(&data.sections[0]))
    }

    /// Sets one metadata property.
    pub fn put_property(&self, key: &str, value: &str) -> Result<(), RecordStateError> {
        let mut inner = self.lock();
        let RecordState::Mutable(data) = &mut inner.state else {
            return Err(self.immutable("put_property"));
        };
        data.props.insert(key.to_owned(), value.to_owned());
        Ok(())
    }

    /// Records the environment the test runs under.
    pub fn set_environment(&self, env: IndexMap<String, String>) -> Result<(), RecordStateError> {
        let mut inner = self.lock();
        let RecordState::Mutable(data) = &mut inner.state else {
            return Err(self.immutable("set_environment"));
        };
        data.env = env;
        Ok(())
    }

    /// Sets the final status, sealing the record.
    ///
    /// All still-open sections (the default message section included) are
    /// closed as incomplete, the section-title list and serialized status are
    /// cached into the property map, and observers are notified and then
    /// dropped.
    pub fn set_status(self: &Arc<Self>, status: TestStatus) -> Result<(), RecordStateError> {
        let observers;
        {
            let mut inner = self.lock();
            let RecordState::Mutable(data) = &mut inner.state else {
                return Err(self.immutable("set_status"));
            };
            for section in &data.sections {
                section.force_close();
            }
            let titles = data.sections.iter().map(|s| s.title()).join(" ");
            data.props.insert(PROP_SECTIONS.to_owned(), titles);
            data.props
                .insert(PROP_EXEC_STATUS.to_owned(), status.to_string());
            data.props.insert(PROP_END.to_owned(), Utc::now().to_rfc3339());
            let data = std::mem::take(data);
            inner.state = RecordState::Immutable { status, data };
            observers = std::mem::take(&mut *inner.observers);
        }
        for observer in observers {
            observer.completed(self);
        }
        Ok(())
    }

    /// Registers an observer for the record's completion.
    ///
    /// Once a record is sealed no further notifications are possible, so
    /// registering against a sealed record is a silent no-op.
    pub fn add_observer(&self, observer: Arc<dyn RecordObserver>) {
        let mut inner = self.lock();
        if matches!(inner.state, RecordState::Mutable(_)) {
            inner.observers.push(observer);
        }
    }

    /// The record's sections, reloading from the backing file if shrunk.
    pub fn sections(&self) -> Result<Vec<Arc<Section>>, ResultFileError> {
        self.with_data(|data| data.sections.clone())
    }

    /// One metadata property, reloading from the backing file if shrunk.
    pub fn property(&self, key: &str) -> Result<Option<String>, ResultFileError> {
        self.with_data(|data| data.props.get(key).cloned())
    }

    /// The full property map, reloading from the backing file if shrunk.
    pub fn properties(&self) -> Result<IndexMap<String, String>, ResultFileError> {
        self.with_data(|data| data.props.clone())
    }

    /// The environment block, reloading from the backing file if shrunk.
    pub fn environment(&self) -> Result<IndexMap<String, String>, ResultFileError> {
        self.with_data(|data| data.env.clone())
    }

    /// The originating test description, reloading from the backing file if
    /// shrunk.
    pub fn description(&self) -> Result<Option<TestDescription>, ResultFileError> {
        self.with_data(|data| data.desc.clone())
    }

    /// The section titles, degrading to `None` if both the in-memory cache
    /// and a reload fail.
    pub fn section_titles(&self) -> Option<Vec<String>> {
        match self.property(PROP_SECTIONS) {
            Ok(Some(titles)) => Some(titles.split(' ').map(str::to_owned).collect()),
            Ok(None) => self
                .sections()
                .ok()
                .map(|sections| sections.iter().map(|s| s.title().to_owned()).collect()),
            Err(_) => None,
        }
    }

    /// Captures the full persisted form of a sealed record.
    pub fn snapshot(&self) -> Result<RecordSnapshot, RecordError> {
        let mut inner = self.lock();
        self.reload_locked(&mut inner)?;
        match &inner.state {
            RecordState::Mutable(_) => Err(RecordStateError::NotSealed {
                url: self.url.clone(),
                attempted: "snapshot",
            }
            .into()),
            RecordState::Immutable { status, data } => Ok(RecordSnapshot {
                url: self.url.clone(),
                desc: data.desc.clone(),
                env: data.env.clone(),
                props: data.props.clone(),
                sections: data.sections.iter().map(|s| s.snapshot()).collect(),
                status: status.clone(),
            }),
            RecordState::Shrunk { .. } => unreachable!("reload_locked restores shrunk records"),
        }
    }

    /// Writes the sealed record to its work-relative path under `work_dir`
    /// and remembers the file as the record's backing file.
    pub fn write_to(&self, work_dir: &Utf8Path) -> Result<Utf8PathBuf, RecordError> {
        let snapshot = self.snapshot()?;
        let path = work_dir.join(work_relative_path(&self.url));
        resultfile::write(&path, &snapshot)?;
        self.lock().backing_file = Some(path.clone());
        Ok(path)
    }

    /// Discards the record's in-memory detail, keeping only the status.
    ///
    /// Returns false (and does nothing) unless the record is sealed and has a
    /// backing file to reload from.
    pub(crate) fn shrink(&self) -> bool {
        let mut inner = self.lock();
        if inner.backing_file.is_none() {
            return false;
        }
        match &inner.state {
            RecordState::Immutable { status, .. } => {
                let status = status.clone();
                inner.state = RecordState::Shrunk { status };
                debug!(url = %self.url, "shrunk test result");
                true
            }
            _ => false,
        }
    }

    fn with_data<R>(&self, f: impl FnOnce(&RecordData) -> R) -> Result<R, ResultFileError> {
        let mut inner = self.lock();
        self.reload_locked(&mut inner)?;
        match &inner.state {
            RecordState::Mutable(data) | RecordState::Immutable { data, .. } => Ok(f(data)),
            RecordState::Shrunk { .. } => unreachable!("reload_locked restores shrunk records"),
        }
    }

    fn reload_locked(&self, inner: &mut MutexGuard<'_, RecordInner>) -> Result<(), ResultFileError> {
        let RecordState::Shrunk { status } = &inner.state else {
            return Ok(());
        };
        let status = status.clone();
        let Some(path) = inner.backing_file.clone() else {
            return Err(ResultFileError::NoBackingFile {
                url: self.url.clone(),
            });
        };
        let snapshot = resultfile::load(&path)?;
        if snapshot.url != self.url {
            return Err(ResultFileError::parse(
                &path,
                0,
                format!("file belongs to `{}`, expected `{}`", snapshot.url, self.url),
            ));
        }
        debug!(url = %self.url, path = %path, "reloaded shrunk test result");
        let sections = snapshot
            .sections
            .into_iter()
            .map(|section| Arc::new(Section::reconstructed(section)))
            .collect();
        inner.state = RecordState::Immutable {
            // Keep the in-memory status: it was sealed before the file was
            // written and is the source of truth.
            status,
            data: RecordData {
                desc: snapshot.desc,
                env: snapshot.env,
                props: snapshot.props,
                sections,
            },
        };
        Ok(())
    }

    fn immutable(&self, attempted: &'static str) -> RecordStateError {
        RecordStateError::Immutable {
            url: self.url.clone(),
            attempted,
        }
    }

    fn lock(&self) -> MutexGuard<'_, RecordInner> {
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

/// A bounded recency list of persisted records, shrinking the oldest entries
/// once capacity is exceeded.
///
/// The list holds weak references: records dropped elsewhere simply fall out.
/// It has its own lock, independent of any record's.
#[derive(Debug)]
pub(crate) struct ShrinkList {
    capacity: usize,
    entries: Mutex<VecDeque<Weak<TestResult>>>,
}

impl ShrinkList {
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            capacity,
            entries: Mutex::new(VecDeque::new()),
        }
    }

    /// Tracks a persisted record, shrinking the oldest entries if the list
    /// overflows.
    pub(crate) fn track(&self, record: &Arc<TestResult>) {
        let evicted = {
            let mut entries = match self.entries.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            entries.push_back(Arc::downgrade(record));
            let mut evicted = Vec::new();
            while entries.len() > self.capacity {
                if let Some(weak) = entries.pop_front() {
                    evicted.push(weak);
                }
            }
            evicted
        };
        // Shrinking takes each record's own lock; do it outside ours.
        for weak in evicted {
            if let Some(record) = weak.upgrade() {
                record.shrink();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::{desc_for, sealed_result};
    use camino_tempfile::Utf8TempDir;
    use pretty_assertions::assert_eq;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingObserver(AtomicUsize);

    impl RecordObserver for CountingObserver {
        fn completed(&self, _record: &Arc<TestResult>) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn status_seals_the_record() {
        let record = TestResult::new(desc_for("pkg/A.html#t1"));
        assert!(record.is_mutable());
        assert_eq!(record.status(), None);

        let section = record.create_section("main").unwrap();
        section.write_output("stdout", "running").unwrap();
        record.put_property(PROP_SCRIPT, "StdTestScript").unwrap();

        record.set_status(TestStatus::passed("OK")).unwrap();

        // The status sticks, and every mutation now fails.
        assert_eq!(record.status(), Some(TestStatus::passed("OK")));
        assert!(matches!(
            record.create_section("more"),
            Err(RecordStateError::Immutable { .. })
        ));
        assert!(matches!(
            record.put_property("k", "v"),
            Err(RecordStateError::Immutable { .. })
        ));
        assert!(matches!(
            record.set_status(TestStatus::failed("again")),
            Err(RecordStateError::Immutable { .. })
        ));
        assert_eq!(record.status(), Some(TestStatus::passed("OK")));
    }

    #[test]
    fn sealing_closes_open_sections_as_incomplete() {
        let record = TestResult::new(desc_for("pkg/A.html"));
        let open = record.create_section("main").unwrap();
        let closed = record.create_section("cleanup").unwrap();
        closed.set_status(TestStatus::passed("")).unwrap();

        record.set_status(TestStatus::failed("timed out")).unwrap();

        assert_eq!(open.status().unwrap().kind, TestStatusKind::Error);
        assert_eq!(closed.status().unwrap(), TestStatus::passed(""));
        // Cached derived properties.
        assert_eq!(
            record.property(PROP_SECTIONS).unwrap().unwrap(),
            format!("{MESSAGE_SECTION_TITLE} main cleanup")
        );
        assert_eq!(
            record.property(PROP_EXEC_STATUS).unwrap().unwrap(),
            "Failed. timed out"
        );
    }

    #[test]
    fn duplicate_section_title_is_rejected() {
        let record = TestResult::new(desc_for("pkg/A.html"));
        record.create_section("main").unwrap();
        assert!(matches!(
            record.create_section("main"),
            Err(RecordStateError::DuplicateSection { .. })
        ));
    }

    #[test]
    fn observers_fire_once_and_are_dropped() {
        let record = TestResult::new(desc_for("pkg/A.html"));
        let observer = Arc::new(CountingObserver(AtomicUsize::new(0)));
        record.add_observer(observer.clone());

        record.set_status(TestStatus::passed("")).unwrap();
        assert_eq!(observer.0.load(Ordering::SeqCst), 1);

        // Registration after sealing is a no-op.
        let late = Arc::new(CountingObserver(AtomicUsize::new(0)));
        record.add_observer(late.clone());
        assert_eq!(late.0.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn not_run_placeholder_is_sealed() {
        let record = TestResult::not_run(desc_for("pkg/B.html"));
        assert!(!record.is_mutable());
        assert_eq!(record.status_kind(), TestStatusKind::NotRun);
        assert!(matches!(
            record.put_property("k", "v"),
            Err(RecordStateError::Immutable { .. })
        ));
    }

    #[test]
    fn write_shrink_reload_cycle() {
        let dir = Utf8TempDir::new().unwrap();
        let record = sealed_result("pkg/A.html#t1", TestStatus::failed("exit 1"));
        let path = record.write_to(dir.path()).unwrap();
        assert_eq!(path, dir.path().join("pkg/A_t1.jtr"));

        assert!(record.shrink());
        assert!(record.is_shrunk());
        // The status never needs a reload.
        assert_eq!(record.status(), Some(TestStatus::failed("exit 1")));

        // Property access transparently reloads.
        assert_eq!(
            record.property(PROP_EXEC_STATUS).unwrap().unwrap(),
            "Failed. exit 1"
        );
        assert!(!record.is_shrunk());
    }

    #[test]
    fn shrink_without_backing_file_is_refused() {
        let record = sealed_result("pkg/A.html", TestStatus::passed(""));
        assert!(!record.shrink());
        assert!(!record.is_shrunk());
    }

    #[test]
    fn reload_with_missing_file_is_distinct() {
        let dir = Utf8TempDir::new().unwrap();
        let record = sealed_result("pkg/A.html", TestStatus::passed(""));
        let path = record.write_to(dir.path()).unwrap();
        assert!(record.shrink());
        std::fs::remove_file(&path).unwrap();

        let err = record.sections().unwrap_err();
        assert!(matches!(err, ResultFileError::NotFound { .. }));
        // Degraded accessor.
        assert_eq!(record.section_titles(), None);
        // The record itself stays usable for cached data.
        assert_eq!(record.status_kind(), TestStatusKind::Passed);
    }

    #[test]
    fn reload_with_corrupt_file_is_distinct() {
        let dir = Utf8TempDir::new().unwrap();
        let record = sealed_result("pkg/A.html", TestStatus::passed(""));
        let path = record.write_to(dir.path()).unwrap();
        assert!(record.shrink());
        std::fs::write(&path, "#Test Results (version 9)\ngarbage\n").unwrap();

        let err = record.properties().unwrap_err();
        assert!(matches!(err, ResultFileError::UnrecognizedHeader { .. }));
    }

    #[test]
    fn file_round_trip_preserves_content() {
        let dir = Utf8TempDir::new().unwrap();
        let record = TestResult::new(desc_for("pkg/A.html#t1"));
        let section = record.create_section("main").unwrap();
        section.write_output("stdout", "hello\nworld").unwrap();
        section.set_status(TestStatus::passed("")).unwrap();
        record.set_status(TestStatus::passed("OK")).unwrap();

        let path = record.write_to(dir.path()).unwrap();
        let reloaded = TestResult::reload_from(&path).unwrap();

        assert_eq!(reloaded.url(), record.url());
        assert_eq!(reloaded.status(), record.status());
        assert_eq!(reloaded.section_titles(), record.section_titles());
        let sections = reloaded.sections().unwrap();
        let main = sections.iter().find(|s| s.title() == "main").unwrap();
        assert_eq!(main.output_text("stdout").unwrap(), "hello\nworld");
    }

    #[test]
    fn shrink_list_evicts_oldest() {
        let dir = Utf8TempDir::new().unwrap();
        let list = ShrinkList::new(2);
        let records: Vec<_> = (0..3)
            .map(|i| {
                let record = sealed_result(&format!("pkg/T{i}.html"), TestStatus::passed(""));
                record.write_to(dir.path()).unwrap();
                list.track(&record);
                record
            })
            .collect();

        assert!(records[0].is_shrunk());
        assert!(!records[1].is_shrunk());
        assert!(!records[2].is_shrunk());
    }
}
