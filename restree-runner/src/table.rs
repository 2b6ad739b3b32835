// Copyright (c) The restree Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The result table: the root aggregate over the result tree.
//!
//! A [`ResultTable`] owns one lazily populated tree for one work directory
//! and offers the operations execution engines and status displays need:
//!
//! - `update` pushes a completed record in, applying the replacement policy.
//! - `lookup` and `resolve_initial_url` turn test URLs into live objects.
//! - `iterator` walks a filtered selection of records in tree order.
//! - `wait_until_ready` blocks until the prior-results cache has been folded
//!   into the tree.
//!
//! The cache bulk-load runs on a dedicated background thread started at
//! construction, so building a table never blocks on disk.

use crate::{
    cache::ResultCache,
    errors::{FinderError, TreeError},
    finder::{FinderHandle, TestFinder},
    helpers::split_components,
    status::{StatusCounters, TestStatusKind},
    test_description::{split_url, url_file_name},
    test_result::{ShrinkList, TestResult},
    tree::{InsertOutcome, TreeChild, TreeContext, TreeNode},
};
use camino::Utf8PathBuf;
use debug_ignore::DebugIgnore;
use std::{
    sync::{Arc, Condvar, Mutex, MutexGuard, Weak},
    thread,
};
use tracing::{debug, warn};

/// Default bound on the number of unshrunk completed records held in memory.
const DEFAULT_SHRINK_CAPACITY: usize = 128;

/// An observer of table-level record changes.
///
/// Unlike [`TreeNodeObserver`](crate::tree::TreeNodeObserver), which watches
/// one node, a table observer sees every record accepted anywhere in the
/// tree.
pub trait TableObserver: Send + Sync {
    /// A record was accepted into a previously empty slot.
    fn updated(&self, record: &Arc<TestResult>);

    /// A record displaced an existing record for the same test URL.
    fn replaced(&self, old: &Arc<TestResult>, new: &Arc<TestResult>);
}

/// A predicate over records, used to narrow an iteration.
pub trait TestFilter: Send + Sync {
    /// Returns true if the record belongs in the selection.
    fn accept(&self, record: &Arc<TestResult>) -> bool;
}

/// What an initial URL resolved to. See
/// [`ResultTable::resolve_initial_url`].
#[derive(Clone, Debug)]
pub enum InitialSelection {
    /// The URL named a directory.
    Branch(Arc<TreeNode>),
    /// The URL named exactly one test.
    Test(Arc<TestResult>),
    /// The URL named a multi-test file without a fragment; all of the file's
    /// tests are selected.
    Group(Vec<Arc<TestResult>>),
}

/// Builder for a [`ResultTable`].
pub struct ResultTableBuilder {
    suite_root: Utf8PathBuf,
    finder: Option<FinderHandle>,
    cache: Option<Arc<dyn ResultCache>>,
    clear_changed: bool,
    shrink_capacity: usize,
}

impl ResultTableBuilder {
    /// Starts a builder for the given suite root.
    pub fn new(suite_root: impl Into<Utf8PathBuf>) -> Self {
        Self {
            suite_root: suite_root.into(),
            finder: None,
            cache: None,
            clear_changed: false,
            shrink_capacity: DEFAULT_SHRINK_CAPACITY,
        }
    }

    /// Sets the finder used for lazy tree population. Without one the table
    /// operates purely off explicit insertions.
    pub fn finder(mut self, finder: Box<dyn TestFinder>) -> Self {
        self.finder = Some(FinderHandle::new(finder));
        self
    }

    /// Sets the prior-results cache, bulk-loaded in the background once the
    /// table is built.
    pub fn cache(mut self, cache: Arc<dyn ResultCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Whether a structurally changed test description clears the existing
    /// result for that test on re-insertion.
    pub fn clear_changed(mut self, clear_changed: bool) -> Self {
        self.clear_changed = clear_changed;
        self
    }

    /// Bounds the number of unshrunk completed records held in memory.
    pub fn shrink_capacity(mut self, capacity: usize) -> Self {
        self.shrink_capacity = capacity;
        self
    }

    /// Builds the table and, if a cache is configured, starts its background
    /// load.
    pub fn build(self) -> Arc<ResultTable> {
        let ctx = Arc::new(TreeContext {
            suite_root: self.suite_root,
            finder: self.finder,
            clear_changed: self.clear_changed,
        });
        let root = TreeNode::new_root(Arc::clone(&ctx));
        let table = Arc::new(ResultTable {
            ctx,
            root,
            cache: self.cache,
            ready: ReadyState {
                flags: Mutex::new(ReadyFlags {
                    cache_initialized: false,
                    update_in_progress: false,
                }),
                cond: Condvar::new(),
            },
            observers: Mutex::new(DebugIgnore(Vec::new())),
            shrink_list: ShrinkList::new(self.shrink_capacity),
        });

        match &table.cache {
            Some(cache) => spawn_cache_load(&table, Arc::clone(cache)),
            None => table.mark_ready(),
        }
        table
    }
}

#[derive(Debug)]
struct ReadyFlags {
    /// True once the cache load (if any) has been folded into the tree.
    cache_initialized: bool,
    /// True while the cache load is being folded in. Doubles as the
    /// reentrancy guard: records merged during the fold are not echoed back
    /// into the cache, and their insertion does not trigger scans.
    update_in_progress: bool,
}

#[derive(Debug)]
struct ReadyState {
    flags: Mutex<ReadyFlags>,
    cond: Condvar,
}

/// The table of current test results for one work directory.
///
/// Cheap to share: every method takes `&self` and is safe to call from any
/// thread.
pub struct ResultTable {
    ctx: Arc<TreeContext>,
    root: Arc<TreeNode>,
    cache: Option<Arc<dyn ResultCache>>,
    ready: ReadyState,
    observers: Mutex<DebugIgnore<Vec<Arc<dyn TableObserver>>>>,
    shrink_list: ShrinkList,
}

impl std::fmt::Debug for ResultTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResultTable")
            .field("suite_root", &self.ctx.suite_root)
            .field("size", &self.root.size())
            .finish_non_exhaustive()
    }
}

impl ResultTable {
    /// The root node of the result tree.
    pub fn root(&self) -> &Arc<TreeNode> {
        &self.root
    }

    /// The suite root directory the tree mirrors.
    pub fn suite_root(&self) -> &Utf8PathBuf {
        &self.ctx.suite_root
    }

    /// The total number of records currently in the tree.
    pub fn size(&self) -> usize {
        self.root.size()
    }

    /// Registers a table-level observer.
    pub fn add_observer(&self, observer: Arc<dyn TableObserver>) {
        self.observers_lock().push(observer);
    }

    /// Removes a previously registered observer, matched by identity.
    pub fn remove_observer(&self, observer: &Arc<dyn TableObserver>) {
        self.observers_lock()
            .retain(|existing| !Arc::ptr_eq(existing, observer));
    }

    /// Accepts a record into the tree, creating intermediate branches as
    /// needed and applying the replacement policy if a record for the same
    /// test URL already exists.
    ///
    /// Returns the outcome, so callers can always tell whether their record
    /// was retained. Re-announcing the identical record after sealing it in
    /// place counts as an update: observers are notified and the completed
    /// record is forwarded to the cache.
    pub fn update(&self, record: Arc<TestResult>) -> Result<InsertOutcome, FinderError> {
        self.insert(record, false)
    }

    /// Like [`update`](Self::update), but without the lazy scans along the
    /// insertion path. For callers that have already established the path is
    /// up to date.
    pub fn update_suppressing_scan(
        &self,
        record: Arc<TestResult>,
    ) -> Result<InsertOutcome, FinderError> {
        self.insert(record, true)
    }

    fn insert(
        &self,
        record: Arc<TestResult>,
        suppress_scan: bool,
    ) -> Result<InsertOutcome, FinderError> {
        // During the cache fold-in, insertions neither trigger scans nor echo
        // back into the cache.
        let merging = self.ready_lock().update_in_progress;
        let scan = !suppress_scan && !merging;
        let url = record.url().to_owned();
        let (path, _) = split_url(&url);
        let Some((dirs, _)) = split_components(path) else {
            return Err(FinderError::Tree(TreeError::EmptyUrl { url }));
        };

        let mut node = Arc::clone(&self.root);
        if scan {
            node.scan_if_needed()?;
        }
        for dir in dirs {
            node = node.get_or_create_branch(dir)?;
            if scan {
                node.scan_if_needed()?;
            }
        }
        let outcome = node.add_child(Arc::clone(&record))?;

        let accepted = match &outcome {
            InsertOutcome::Inserted => {
                self.notify(|observer| observer.updated(&record));
                true
            }
            InsertOutcome::Replaced(old) => {
                self.notify(|observer| observer.replaced(old, &record));
                true
            }
            InsertOutcome::KeptExisting(existing) => {
                // The record's slot did not change, but if the caller is
                // re-announcing the record it sealed in place, the tree's
                // counters and the table's listeners are out of date.
                let sealed_in_place = Arc::ptr_eq(existing, &record) && !record.is_mutable();
                if sealed_in_place {
                    node.invalidate_counters();
                    self.notify(|observer| observer.updated(&record));
                }
                sealed_in_place
            }
        };

        if accepted {
            if !merging
                && record.status_kind() != TestStatusKind::NotRun
                && let Some(cache) = &self.cache
                && let Err(error) = cache.insert(&record)
            {
                warn!(url = %record.url(), %error, "failed to persist record to result cache");
            }
            if record.backing_file().is_some() {
                self.shrink_list.track(&record);
            }
        }
        Ok(outcome)
    }

    /// Finds the record for an exact test URL, scanning as needed along the
    /// path. Returns `None` if the URL does not name a known test.
    pub fn lookup(&self, url: &str) -> Result<Option<Arc<TestResult>>, FinderError> {
        let (path, _) = split_url(url);
        let Some((dirs, _)) = split_components(path) else {
            return Ok(None);
        };
        let Some(name) = url_file_name(url) else {
            return Ok(None);
        };

        let mut node = Arc::clone(&self.root);
        for dir in dirs {
            match node.child(dir)? {
                Some(TreeChild::Branch(branch)) => node = branch,
                _ => return Ok(None),
            }
        }
        match node.child(name)? {
            Some(TreeChild::Result(record)) => Ok(Some(record)),
            _ => Ok(None),
        }
    }

    /// Resolves an initial URL from a user's selection into live objects.
    ///
    /// Resolution order: an exact directory match, then an exact test match,
    /// then a fragment-less file name covering every test case in that file.
    pub fn resolve_initial_url(
        &self,
        url: &str,
    ) -> Result<Option<InitialSelection>, FinderError> {
        let url = url.trim_end_matches('/');
        if url.is_empty() {
            return Ok(Some(InitialSelection::Branch(Arc::clone(&self.root))));
        }
        let (path, fragment) = split_url(url);
        let Some((dirs, file)) = split_components(path) else {
            return Ok(None);
        };

        let mut node = Arc::clone(&self.root);
        for dir in dirs {
            match node.child(dir)? {
                Some(TreeChild::Branch(branch)) => node = branch,
                _ => return Ok(None),
            }
        }

        if fragment.is_none()
            && let Some(TreeChild::Branch(branch)) = node.child(file)?
        {
            return Ok(Some(InitialSelection::Branch(branch)));
        }
        let name = url_file_name(url).unwrap_or(file);
        if let Some(TreeChild::Result(record)) = node.child(name)? {
            return Ok(Some(InitialSelection::Test(record)));
        }
        if fragment.is_none() {
            // A multi-test file: its cases are stored as `file#case`.
            let prefix = format!("{file}#");
            let group: Vec<_> = node
                .results()?
                .into_iter()
                .filter(|record| {
                    url_file_name(record.url())
                        .is_some_and(|child_name| child_name.starts_with(&prefix))
                })
                .collect();
            if !group.is_empty() {
                return Ok(Some(InitialSelection::Group(group)));
            }
        }
        Ok(None)
    }

    /// Iterates the records selected by the given initial URLs, in tree
    /// order, applying every filter. An empty URL list selects the whole
    /// tree.
    ///
    /// The URL list is distilled first, so overlapping selections yield each
    /// record exactly once. URLs that resolve to nothing are skipped with a
    /// warning.
    pub fn iterator(
        &self,
        initial_urls: Vec<String>,
        filters: Vec<Arc<dyn TestFilter>>,
    ) -> ResultIter {
        if initial_urls.is_empty() {
            return ResultIter {
                stack: vec![IterItem::Node(Arc::clone(&self.root))],
                filters,
            };
        }

        let urls = self.distill_initial_urls(initial_urls);
        let mut stack = Vec::new();
        // Reverse so the first URL is popped (and yielded) first.
        for url in urls.iter().rev() {
            match self.resolve_initial_url(url) {
                Ok(Some(InitialSelection::Branch(branch))) => {
                    stack.push(IterItem::Node(branch));
                }
                Ok(Some(InitialSelection::Test(record))) => {
                    stack.push(IterItem::Record(record));
                }
                Ok(Some(InitialSelection::Group(records))) => {
                    stack.extend(records.into_iter().rev().map(IterItem::Record));
                }
                Ok(None) => {
                    warn!(url, "initial URL matches nothing in the result tree");
                }
                Err(error) => {
                    warn!(url, %error, "failed to resolve initial URL");
                }
            }
        }
        ResultIter { stack, filters }
    }

    /// Removes initial URLs already covered by another entry's subtree, then
    /// sorts the survivors with the finder's natural ordering.
    pub fn distill_initial_urls(&self, urls: Vec<String>) -> Vec<String> {
        let mut kept = distill_urls(urls);
        match &self.ctx.finder {
            Some(finder) => kept.sort_by(|a, b| finder.compare(a, b)),
            None => kept.sort(),
        }
        kept
    }

    /// The aggregate per-status counts for the whole tree.
    pub fn counters(&self) -> Result<StatusCounters, FinderError> {
        self.root.child_status()
    }

    /// Removes every branch in the tree that contains no records.
    pub fn prune(&self) {
        self.root.prune();
    }

    /// Blocks until the prior-results cache (if any) has been folded into
    /// the tree.
    pub fn wait_until_ready(&self) {
        let mut flags = self.ready_lock();
        while !flags.cache_initialized || flags.update_in_progress {
            flags = match self.ready.cond.wait(flags) {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
        }
    }

    /// Returns true if [`wait_until_ready`](Self::wait_until_ready) would
    /// not block.
    pub fn is_ready(&self) -> bool {
        let flags = self.ready_lock();
        flags.cache_initialized && !flags.update_in_progress
    }

    /// Marks the end of a full run: gives the cache a chance to compact its
    /// on-disk representation.
    pub fn finish_run(&self) {
        let Some(cache) = &self.cache else {
            return;
        };
        if cache.needs_compress()
            && let Err(error) = cache.compress()
        {
            warn!(%error, "failed to compress result cache");
        }
    }

    /// Folds a completed cache load into the tree and releases waiters.
    fn cache_loaded(&self, records: impl IntoIterator<Item = (String, Arc<TestResult>)>) {
        self.ready_lock().update_in_progress = true;
        let mut loaded = 0usize;
        for (url, record) in records {
            if url != record.url() {
                warn!(
                    key = url,
                    url = record.url(),
                    "cache key does not match its record's test URL; skipping"
                );
                continue;
            }
            match self.update(record) {
                Ok(_) => loaded += 1,
                Err(error) => {
                    warn!(url, %error, "failed to fold cached record into the result tree");
                }
            }
        }
        debug!(loaded, "result cache load complete");
        self.mark_ready();
    }

    fn mark_ready(&self) {
        {
            let mut flags = self.ready_lock();
            flags.cache_initialized = true;
            flags.update_in_progress = false;
        }
        self.ready.cond.notify_all();
    }

    fn notify(&self, f: impl Fn(&Arc<dyn TableObserver>)) {
        let observers: Vec<_> = self.observers_lock().iter().cloned().collect();
        for observer in &observers {
            f(observer);
        }
    }

    fn ready_lock(&self) -> MutexGuard<'_, ReadyFlags> {
        match self.ready.flags.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn observers_lock(&self) -> MutexGuard<'_, DebugIgnore<Vec<Arc<dyn TableObserver>>>> {
        match self.observers.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

/// Starts the background thread that bulk-loads the cache into the table.
///
/// The thread holds only a weak reference, so dropping the table cancels the
/// fold-in.
fn spawn_cache_load(table: &Arc<ResultTable>, cache: Arc<dyn ResultCache>) {
    let weak: Weak<ResultTable> = Arc::downgrade(table);
    let spawned = thread::Builder::new()
        .name("restree-cache-load".to_owned())
        .spawn(move || {
            let records = match cache.load() {
                Ok(records) => records,
                Err(error) => {
                    warn!(%error, "failed to load result cache; starting empty");
                    if let Some(table) = weak.upgrade() {
                        table.mark_ready();
                    }
                    return;
                }
            };
            match weak.upgrade() {
                Some(table) => table.cache_loaded(records),
                None => debug!("result table dropped before cache load finished"),
            }
        });
    if let Err(error) = spawned {
        warn!(%error, "failed to start result cache load thread; starting empty");
        table.mark_ready();
    }
}

/// Removes URLs covered by another entry's subtree, independent of input
/// order: exact duplicates collapse, and a URL is dropped if any other URL is
/// a proper prefix of it ending at a `/` or `#` boundary.
fn distill_urls(urls: Vec<String>) -> Vec<String> {
    let mut distinct: Vec<String> = Vec::with_capacity(urls.len());
    for url in urls {
        if !distinct.contains(&url) {
            distinct.push(url);
        }
    }
    let covered: Vec<bool> = distinct
        .iter()
        .map(|url| {
            distinct.iter().any(|prefix| {
                prefix != url
                    && url.strip_prefix(prefix.as_str()).is_some_and(|rest| {
                        rest.starts_with('/') || rest.starts_with('#')
                    })
            })
        })
        .collect();
    distinct
        .into_iter()
        .zip(covered)
        .filter_map(|(url, covered)| (!covered).then_some(url))
        .collect()
}

enum IterItem {
    Node(Arc<TreeNode>),
    Record(Arc<TestResult>),
}

/// A depth-first, filtered iteration over selected records.
///
/// Records appear in tree order: a node's records and branches interleave in
/// insertion order, branches expanded in place. Nodes that fail to scan are
/// skipped with a warning.
pub struct ResultIter {
    stack: Vec<IterItem>,
    filters: Vec<Arc<dyn TestFilter>>,
}

impl Iterator for ResultIter {
    type Item = Arc<TestResult>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            match self.stack.pop()? {
                IterItem::Record(record) => {
                    if self.filters.iter().all(|filter| filter.accept(&record)) {
                        return Some(record);
                    }
                }
                IterItem::Node(node) => {
                    let children = match node.children() {
                        Ok(children) => children,
                        Err(error) => {
                            warn!(path = node.path(), %error, "failed to scan node; skipping");
                            continue;
                        }
                    };
                    self.stack.extend(children.into_iter().rev().map(|child| {
                        match child {
                            TreeChild::Branch(branch) => IterItem::Node(branch),
                            TreeChild::Result(record) => IterItem::Record(record),
                        }
                    }));
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        cache::ResultCache,
        errors::CacheError,
        status::{TestStatus, TestStatusKind},
        test_description::TestDescription,
        test_helpers::{FakeSuite, desc_for, sealed_result, three_test_suite},
        test_result::TestResult,
    };
    use camino::Utf8Path;
    use chrono::{DateTime, Utc};
    use pretty_assertions::assert_eq;
    use std::{
        collections::BTreeMap,
        sync::atomic::{AtomicUsize, Ordering},
    };
    use test_case::test_case;

    fn table_for(suite: &FakeSuite) -> Arc<ResultTable> {
        ResultTableBuilder::new("/suite")
            .finder(suite.finder())
            .build()
    }

    fn collect_urls(iter: ResultIter) -> Vec<String> {
        iter.map(|record| record.url().to_owned()).collect()
    }

    #[test]
    fn update_lookup_counters_and_iteration() {
        let suite = three_test_suite();
        let table = table_for(&suite);

        table
            .update(sealed_result("pkg/A.html#t1", TestStatus::passed("OK")))
            .unwrap();
        table
            .update(sealed_result("pkg/A.html#t2", TestStatus::failed("exit 1")))
            .unwrap();
        table
            .update(sealed_result("pkg/B.html", TestStatus::error("no harness")))
            .unwrap();

        let found = table.lookup("pkg/A.html#t1").unwrap().unwrap();
        assert_eq!(found.status_kind(), TestStatusKind::Passed);
        assert!(table.lookup("pkg/C.html").unwrap().is_none());

        let counters = table.counters().unwrap();
        assert_eq!(
            (counters.passed, counters.failed, counters.error, counters.not_run),
            (1, 1, 1, 0)
        );

        let urls = collect_urls(table.iterator(vec!["pkg".to_owned()], Vec::new()));
        assert_eq!(urls, vec!["pkg/A.html#t1", "pkg/A.html#t2", "pkg/B.html"]);
    }

    #[test]
    fn update_never_regresses_a_completed_result() {
        let suite = three_test_suite();
        let table = table_for(&suite);

        table
            .update(sealed_result("pkg/A.html#t1", TestStatus::passed("OK")))
            .unwrap();
        let placeholder = TestResult::not_run(desc_for("pkg/A.html#t1"));
        let outcome = table.update(placeholder).unwrap();
        let InsertOutcome::KeptExisting(kept) = outcome else {
            panic!("expected the completed result to be kept, got {outcome:?}");
        };
        assert_eq!(kept.status_kind(), TestStatusKind::Passed);
    }

    #[derive(Debug, Default)]
    struct RecordingTableObserver {
        updated: Mutex<Vec<String>>,
        replaced: Mutex<Vec<(String, String)>>,
    }

    impl TableObserver for RecordingTableObserver {
        fn updated(&self, record: &Arc<TestResult>) {
            self.updated.lock().unwrap().push(record.url().to_owned());
        }

        fn replaced(&self, old: &Arc<TestResult>, new: &Arc<TestResult>) {
            self.replaced
                .lock()
                .unwrap()
                .push((old.url().to_owned(), new.url().to_owned()));
        }
    }

    #[test]
    fn observers_see_insertions_and_replacements() {
        let table = ResultTableBuilder::new("/suite").build();
        let observer = Arc::new(RecordingTableObserver::default());
        table.add_observer(observer.clone());

        table
            .update(sealed_result("pkg/A.html", TestStatus::passed("OK")))
            .unwrap();
        // Same kind, different reason: a replacement.
        table
            .update(sealed_result("pkg/A.html", TestStatus::passed("faster")))
            .unwrap();

        assert_eq!(observer.updated.lock().unwrap().clone(), vec!["pkg/A.html"]);
        assert_eq!(
            observer.replaced.lock().unwrap().clone(),
            vec![("pkg/A.html".to_owned(), "pkg/A.html".to_owned())]
        );
    }

    #[test]
    fn sealing_in_place_publishes_the_completion() {
        let cache = FakeCache::with_records(BTreeMap::new());
        let table = ResultTableBuilder::new("/suite")
            .cache(cache.clone())
            .build();
        table.wait_until_ready();
        let observer = Arc::new(RecordingTableObserver::default());
        table.add_observer(observer.clone());

        // The engine inserts the record before the test runs; there is
        // nothing worth caching yet.
        let record = TestResult::new(desc_for("pkg/A.html"));
        assert!(matches!(
            table.update(record.clone()).unwrap(),
            InsertOutcome::Inserted
        ));
        assert_eq!(cache.inserts.load(Ordering::SeqCst), 0);
        assert_eq!(table.counters().unwrap().not_run, 1);

        // Sealing happens in place; re-announcing the identical reference
        // must publish the completion.
        record.set_status(TestStatus::passed("OK")).unwrap();
        assert!(matches!(
            table.update(record.clone()).unwrap(),
            InsertOutcome::KeptExisting(_)
        ));
        assert_eq!(
            observer.updated.lock().unwrap().clone(),
            vec!["pkg/A.html", "pkg/A.html"]
        );
        assert_eq!(cache.inserts.load(Ordering::SeqCst), 1);
        // The cached counters are refreshed too.
        let counters = table.counters().unwrap();
        assert_eq!((counters.passed, counters.not_run), (1, 0));
    }

    #[test]
    fn update_suppressing_scan_skips_the_finder() {
        // A finder that knows no locations: any scan along the path fails.
        let suite = FakeSuite::new();
        let table = table_for(&suite);
        let record = sealed_result("pkg/A.html", TestStatus::passed("OK"));

        assert!(table.update(record.clone()).is_err());
        assert!(matches!(
            table.update_suppressing_scan(record).unwrap(),
            InsertOutcome::Inserted
        ));
        assert_eq!(table.size(), 1);
    }

    #[test_case(&["pkg/A.html#t1", "pkg"], &["pkg"]; "test covered by directory")]
    #[test_case(&["pkg/A.html", "pkg/B.html"], &["pkg/A.html", "pkg/B.html"]; "siblings are disjoint")]
    #[test_case(&["pkgx", "pkg"], &["pkg", "pkgx"]; "name prefix is not a path prefix")]
    #[test_case(&["pkg", "pkg"], &["pkg"]; "duplicates collapse")]
    #[test_case(&["pkg/A.html", "pkg/A.html#t1"], &["pkg/A.html"]; "fragment covered by file")]
    fn distillation(input: &[&str], expected: &[&str]) {
        let table = ResultTableBuilder::new("/suite").build();
        let distilled =
            table.distill_initial_urls(input.iter().map(|s| (*s).to_owned()).collect());
        assert_eq!(distilled, expected);
    }

    struct ReverseOrderFinder;

    impl TestFinder for ReverseOrderFinder {
        fn read(&mut self, _file: &Utf8Path) -> Result<(), FinderError> {
            Ok(())
        }

        fn tests(&self) -> Vec<TestDescription> {
            Vec::new()
        }

        fn files(&self) -> Vec<Utf8PathBuf> {
            Vec::new()
        }

        fn is_folder(&self, _file: &Utf8Path) -> bool {
            false
        }

        fn last_modified(&self, _file: &Utf8Path) -> Option<DateTime<Utc>> {
            None
        }

        fn compare(&self, a: &str, b: &str) -> std::cmp::Ordering {
            b.cmp(a)
        }
    }

    #[test]
    fn distillation_is_independent_of_comparator_order() {
        let table = ResultTableBuilder::new("/suite")
            .finder(Box::new(ReverseOrderFinder))
            .build();

        // This comparator sorts extensions before their prefix; coverage
        // must still be detected.
        let distilled = table.distill_initial_urls(vec![
            "pkg/A.html#t1".to_owned(),
            "pkg/sub".to_owned(),
            "pkg".to_owned(),
        ]);
        assert_eq!(distilled, vec!["pkg"]);

        // Disjoint survivors come back in the finder's order.
        let distilled = table
            .distill_initial_urls(vec!["a/x.html".to_owned(), "b/y.html".to_owned()]);
        assert_eq!(distilled, vec!["b/y.html", "a/x.html"]);
    }

    #[test]
    fn resolve_initial_url_forms() {
        let suite = three_test_suite();
        let table = table_for(&suite);

        assert!(matches!(
            table.resolve_initial_url("pkg").unwrap(),
            Some(InitialSelection::Branch(_))
        ));
        assert!(matches!(
            table.resolve_initial_url("pkg/B.html").unwrap(),
            Some(InitialSelection::Test(_))
        ));
        // A.html has no record of its own, but its cases form a group.
        let Some(InitialSelection::Group(group)) =
            table.resolve_initial_url("pkg/A.html").unwrap()
        else {
            panic!("expected a group");
        };
        let urls: Vec<_> = group.iter().map(|r| r.url().to_owned()).collect();
        assert_eq!(urls, vec!["pkg/A.html#t1", "pkg/A.html#t2"]);

        assert!(table.resolve_initial_url("pkg/missing.html").unwrap().is_none());
        assert!(table.resolve_initial_url("other/place").unwrap().is_none());
    }

    struct KindFilter(TestStatusKind);

    impl TestFilter for KindFilter {
        fn accept(&self, record: &Arc<TestResult>) -> bool {
            record.status_kind() == self.0
        }
    }

    #[test]
    fn iteration_applies_filters() {
        let suite = three_test_suite();
        let table = table_for(&suite);
        table
            .update(sealed_result("pkg/A.html#t1", TestStatus::passed("OK")))
            .unwrap();
        table
            .update(sealed_result("pkg/A.html#t2", TestStatus::failed("exit 1")))
            .unwrap();

        let failed = collect_urls(table.iterator(
            Vec::new(),
            vec![Arc::new(KindFilter(TestStatusKind::Failed))],
        ));
        assert_eq!(failed, vec!["pkg/A.html#t2"]);
    }

    #[derive(Debug)]
    struct FakeCache {
        records: Mutex<BTreeMap<String, Arc<TestResult>>>,
        inserts: AtomicUsize,
        needs_compress: bool,
        compressions: AtomicUsize,
    }

    impl FakeCache {
        fn with_records(records: BTreeMap<String, Arc<TestResult>>) -> Arc<Self> {
            Arc::new(Self {
                records: Mutex::new(records),
                inserts: AtomicUsize::new(0),
                needs_compress: false,
                compressions: AtomicUsize::new(0),
            })
        }
    }

    impl ResultCache for FakeCache {
        fn load(&self) -> Result<BTreeMap<String, Arc<TestResult>>, CacheError> {
            Ok(self.records.lock().unwrap().clone())
        }

        fn insert(&self, record: &Arc<TestResult>) -> Result<(), CacheError> {
            self.inserts.fetch_add(1, Ordering::SeqCst);
            self.records
                .lock()
                .unwrap()
                .insert(record.url().to_owned(), Arc::clone(record));
            Ok(())
        }

        fn compress(&self) -> Result<(), CacheError> {
            self.compressions.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        fn needs_compress(&self) -> bool {
            self.needs_compress
        }
    }

    #[test]
    fn cache_load_populates_the_tree_before_ready() {
        let mut records = BTreeMap::new();
        for url in ["pkg/A.html#t1", "pkg/B.html"] {
            records.insert(url.to_owned(), sealed_result(url, TestStatus::passed("OK")));
        }
        let cache = FakeCache::with_records(records);
        let table = ResultTableBuilder::new("/suite")
            .cache(cache.clone())
            .build();

        table.wait_until_ready();
        assert!(table.is_ready());
        assert_eq!(table.size(), 2);
        let found = table.lookup("pkg/B.html").unwrap().unwrap();
        assert_eq!(found.status_kind(), TestStatusKind::Passed);
        // Cache-sourced records are not echoed back into the cache.
        assert_eq!(cache.inserts.load(Ordering::SeqCst), 0);

        // A live update is forwarded.
        table
            .update(sealed_result("pkg/C.html", TestStatus::failed("exit 1")))
            .unwrap();
        assert_eq!(cache.inserts.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn table_without_cache_is_immediately_ready() {
        let table = ResultTableBuilder::new("/suite").build();
        assert!(table.is_ready());
        table.wait_until_ready();
    }

    #[test]
    fn finish_run_compacts_when_worthwhile() {
        let cache = FakeCache::with_records(BTreeMap::new());
        let table = ResultTableBuilder::new("/suite")
            .cache(cache.clone())
            .build();
        table.wait_until_ready();

        table.finish_run();
        assert_eq!(cache.compressions.load(Ordering::SeqCst), 0);

        let eager = Arc::new(FakeCache {
            records: Mutex::new(BTreeMap::new()),
            inserts: AtomicUsize::new(0),
            needs_compress: true,
            compressions: AtomicUsize::new(0),
        });
        let table = ResultTableBuilder::new("/suite")
            .cache(eager.clone())
            .build();
        table.wait_until_ready();
        table.finish_run();
        assert_eq!(eager.compressions.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn prune_drops_empty_branches() {
        let table = ResultTableBuilder::new("/suite").build();
        let record = sealed_result("pkg/sub/T.html", TestStatus::passed("OK"));
        table.update(record).unwrap();
        table.root().child("pkg").unwrap().unwrap();

        // Remove the record, leaving pkg/sub empty.
        let pkg = table.root().child("pkg").unwrap().unwrap();
        let sub = pkg.as_branch().unwrap().child("sub").unwrap().unwrap();
        sub.as_branch().unwrap().rm_child("T.html");

        table.prune();
        assert!(table.root().child("pkg").unwrap().is_none());
    }
}
