// Copyright (c) The restree Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The lazily scanned branch entity of the result tree.

use crate::{
    errors::{FinderError, TreeError},
    finder::FinderHandle,
    status::{StatusCounters, TestStatusKind},
    test_description::{TestDescription, url_file_name},
    test_result::TestResult,
    tree::observer::{TreeEvent, TreeNodeObserver},
};
use camino::Utf8PathBuf;
use chrono::{DateTime, Utc};
use debug_ignore::DebugIgnore;
use indexmap::IndexMap;
use std::{
    collections::{HashSet, VecDeque},
    sync::{
        Arc, Mutex, MutexGuard, Weak,
        atomic::{AtomicUsize, Ordering},
    },
};
use tracing::{debug, warn};

/// Shared configuration for every node of one tree.
#[derive(Debug)]
pub struct TreeContext {
    /// The test suite's root directory.
    pub suite_root: Utf8PathBuf,
    /// The finder used for lazy population, if any. Without a finder the
    /// tree operates in pre-populated mode and every node is always
    /// considered up to date.
    pub finder: Option<FinderHandle>,
    /// Whether a structurally changed test description causes the existing
    /// result for that test to be cleared on re-insertion.
    pub clear_changed: bool,
}

/// One child slot of a tree node: a nested branch or a leaf record.
#[derive(Clone, Debug)]
pub enum TreeChild {
    /// A directory-like child.
    Branch(Arc<TreeNode>),
    /// A test-like child.
    Result(Arc<TestResult>),
}

impl TreeChild {
    /// Returns the branch, if this child is one.
    pub fn as_branch(&self) -> Option<&Arc<TreeNode>> {
        match self {
            TreeChild::Branch(branch) => Some(branch),
            TreeChild::Result(_) => None,
        }
    }

    /// Returns the record, if this child is one.
    pub fn as_result(&self) -> Option<&Arc<TestResult>> {
        match self {
            TreeChild::Branch(_) => None,
            TreeChild::Result(result) => Some(result),
        }
    }
}

/// The outcome of inserting a record into a node.
///
/// Callers can always tell whether their object was retained: a
/// `KeptExisting` outcome means the candidate was discarded in favour of the
/// returned record.
#[derive(Clone, Debug)]
pub enum InsertOutcome {
    /// The record was appended; no record existed for its test URL.
    Inserted,
    /// The record displaced the contained record, which is returned.
    Replaced(Arc<TestResult>),
    /// The existing record (returned) was kept; the candidate was discarded.
    KeptExisting(Arc<TestResult>),
}

/// A branch of the result tree. See the [module docs](super).
#[derive(Debug)]
pub struct TreeNode {
    /// `None` only for the root.
    name: Option<String>,
    parent: Weak<TreeNode>,
    ctx: Arc<TreeContext>,
    /// Total result records in this subtree, maintained eagerly.
    size: AtomicUsize,
    inner: Mutex<NodeInner>,
    /// Serializes scans of this node without blocking unrelated reads.
    scan_lock: Mutex<()>,
    observers: Mutex<DebugIgnore<Vec<Arc<dyn TreeNodeObserver>>>>,
}

#[derive(Debug)]
struct NodeInner {
    /// Children in scan/insertion order, keyed by name.
    children: IndexMap<String, TreeChild>,
    /// Lazily recomputed aggregate counters; `None` means invalidated.
    counters: Option<StatusCounters>,
    /// Files queued by a placeholder-creation pass, to be scanned on first
    /// access.
    files_to_scan: Vec<Utf8PathBuf>,
    /// `None` means never scanned.
    last_scan: Option<DateTime<Utc>>,
}

impl TreeNode {
    /// Creates the root node of a tree.
    pub fn new_root(ctx: Arc<TreeContext>) -> Arc<Self> {
        Self::construct(None, Weak::new(), ctx)
    }

    fn new_branch(parent: &Arc<TreeNode>, name: &str) -> Arc<Self> {
        Self::construct(
            Some(name.to_owned()),
            Arc::downgrade(parent),
            Arc::clone(&parent.ctx),
        )
    }

    fn construct(name: Option<String>, parent: Weak<TreeNode>, ctx: Arc<TreeContext>) -> Arc<Self> {
        Arc::new(Self {
            name,
            parent,
            ctx,
            size: AtomicUsize::new(0),
            inner: Mutex::new(NodeInner {
                children: IndexMap::new(),
                counters: None,
                files_to_scan: Vec::new(),
                last_scan: None,
            }),
            scan_lock: Mutex::new(()),
            observers: Mutex::new(DebugIgnore(Vec::new())),
        })
    }

    /// The node's name; `None` only for the root.
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// The parent node, if this is not the root.
    pub fn parent(&self) -> Option<Arc<TreeNode>> {
        self.parent.upgrade()
    }

    /// True for the root of the tree.
    pub fn is_root(&self) -> bool {
        self.name.is_none()
    }

    /// The node's path relative to the suite root; empty for the root.
    pub fn path(&self) -> String {
        let mut names = Vec::new();
        let mut current = self.name.clone().map(|name| (name, self.parent()));
        while let Some((name, parent)) = current {
            names.push(name);
            current = parent.and_then(|p| p.name.clone().map(|name| (name, p.parent())));
        }
        names.reverse();
        names.join("/")
    }

    /// The on-disk directory this node mirrors.
    pub fn directory(&self) -> Utf8PathBuf {
        let path = self.path();
        if path.is_empty() {
            self.ctx.suite_root.clone()
        } else {
            self.ctx.suite_root.join(path)
        }
    }

    /// The total number of result records in this subtree. Maintained
    /// eagerly, so reading it never triggers a scan.
    pub fn size(&self) -> usize {
        self.size.load(Ordering::Acquire)
    }

    /// The number of direct children, scanning first if needed.
    pub fn child_count(self: &Arc<Self>) -> Result<usize, FinderError> {
        self.scan_if_needed()?;
        Ok(self.lock().children.len())
    }

    /// Looks up a direct child by name, scanning first if needed.
    pub fn child(self: &Arc<Self>, name: &str) -> Result<Option<TreeChild>, FinderError> {
        self.scan_if_needed()?;
        Ok(self.lock().children.get(name).cloned())
    }

    /// A snapshot of the direct children in insertion order, scanning first
    /// if needed.
    pub fn children(self: &Arc<Self>) -> Result<Vec<TreeChild>, FinderError> {
        self.scan_if_needed()?;
        Ok(self.lock().children.values().cloned().collect())
    }

    /// The direct branch children, scanning first if needed.
    pub fn branches(self: &Arc<Self>) -> Result<Vec<Arc<TreeNode>>, FinderError> {
        Ok(self
            .children()?
            .iter()
            .filter_map(|child| child.as_branch().cloned())
            .collect())
    }

    /// The direct record children, scanning first if needed.
    pub fn results(self: &Arc<Self>) -> Result<Vec<Arc<TestResult>>, FinderError> {
        Ok(self
            .children()?
            .iter()
            .filter_map(|child| child.as_result().cloned())
            .collect())
    }

    fn children_unscanned(&self) -> Vec<TreeChild> {
        self.lock().children.values().cloned().collect()
    }

    /// Registers a per-node observer.
    pub fn add_observer(&self, observer: Arc<dyn TreeNodeObserver>) {
        self.observers_lock().push(observer);
    }

    /// Removes a previously registered observer, matched by identity.
    pub fn remove_observer(&self, observer: &Arc<dyn TreeNodeObserver>) {
        self.observers_lock()
            .retain(|existing| !Arc::ptr_eq(existing, observer));
    }

    // ---
    // Lazy scan protocol
    // ---

    /// Brings this node up to date with the suite on disk, if it is not
    /// already.
    ///
    /// Callers that have already established freshness (e.g. a cascading
    /// insert) skip this by calling the mutation entry points directly.
    pub fn scan_if_needed(self: &Arc<Self>) -> Result<(), FinderError> {
        let Some(finder) = self.ctx.finder.clone() else {
            // Pre-populated mode: always up to date.
            return Ok(());
        };
        let _scan_guard = self.scan_guard();

        let last_scan = self.lock().last_scan;
        if self.is_root() && last_scan.is_none() {
            // Initial scan of the suite root: create placeholder branches
            // for subdirectories and process leaf files, without walking
            // into the subdirectories themselves.
            debug!(root = %self.ctx.suite_root, "initial scan of test suite root");
            self.process_files(vec![self.ctx.suite_root.clone()], &finder)?;
            self.lock().last_scan = Some(Utc::now());
            return Ok(());
        }

        if let Some(last) = last_scan {
            let mtime = finder.with(|f| f.last_modified(&self.directory()));
            match mtime {
                Some(mtime) if mtime > last => {}
                // Not newer than the previous scan: idempotent no-op.
                _ => return Ok(()),
            }
        }

        let queued = std::mem::take(&mut self.lock().files_to_scan);
        if queued.is_empty() {
            self.refresh_dir(&finder, last_scan)?;
        } else if let Err(error) = self.process_files(queued.clone(), &finder) {
            // Leave the node not-up-to-date; the scan is retried on the
            // next access.
            self.lock().files_to_scan = queued;
            return Err(error);
        }
        self.lock().last_scan = Some(Utc::now());
        Ok(())
    }

    /// Re-reads this node's directory through the finder and reconciles the
    /// result against the current children, regardless of queued work.
    ///
    /// Returns true if anything changed. Does nothing (and returns false) if
    /// no finder is configured or the directory is not newer than the last
    /// scan.
    pub fn refresh_if_needed(self: &Arc<Self>) -> Result<bool, FinderError> {
        let Some(finder) = self.ctx.finder.clone() else {
            return Ok(false);
        };
        let _scan_guard = self.scan_guard();

        let last_scan = self.lock().last_scan;
        if let Some(last) = last_scan {
            let mtime = finder.with(|f| f.last_modified(&self.directory()));
            match mtime {
                Some(mtime) if mtime > last => {}
                _ => return Ok(false),
            }
        }
        // Queued placeholder work is subsumed by the full refresh.
        self.lock().files_to_scan.clear();
        let changed = self.refresh_dir(&finder, last_scan)?;
        self.lock().last_scan = Some(Utc::now());
        Ok(changed)
    }

    /// Processes a set of files through the finder: tests become not-run
    /// records, subdirectories become placeholder branches (queued, not
    /// walked), and nested leaf files are processed in the same pass.
    fn process_files(
        self: &Arc<Self>,
        files: Vec<Utf8PathBuf>,
        finder: &FinderHandle,
    ) -> Result<(), FinderError> {
        let mut worklist: VecDeque<Utf8PathBuf> = files.into();
        while let Some(file) = worklist.pop_front() {
            let entries = finder.read_entries(&file)?;
            for td in entries.tests {
                self.insert_discovered(td)?;
            }
            for sub in entries.files {
                if finder.with(|f| f.is_folder(&sub)) {
                    let Some(name) = sub.file_name() else {
                        warn!(file = %sub, "ignoring unnamed directory entry");
                        continue;
                    };
                    let branch = self.get_or_create_branch(name)?;
                    branch.queue_file(sub);
                } else {
                    worklist.push_back(sub);
                }
            }
        }
        Ok(())
    }

    /// Full directory refresh: diff the finder's view of this directory
    /// against the known children.
    fn refresh_dir(
        self: &Arc<Self>,
        finder: &FinderHandle,
        last_scan: Option<DateTime<Utc>>,
    ) -> Result<bool, FinderError> {
        let dir = self.directory();
        let entries = finder.read_entries(&dir)?;
        let mut changed = false;

        // URLs re-derived in this pass, and names of leaf files that were
        // not re-read because they have not changed.
        let mut derived: HashSet<String> = HashSet::new();
        let mut unchanged_files: HashSet<String> = HashSet::new();
        let mut seen_branches: HashSet<String> = HashSet::new();

        for td in entries.tests {
            derived.insert(td.url().to_owned());
            changed |= self.insert_discovered(td)?;
        }

        let mut worklist: VecDeque<Utf8PathBuf> = VecDeque::new();
        for sub in entries.files {
            let Some(name) = sub.file_name().map(str::to_owned) else {
                continue;
            };
            if finder.with(|f| f.is_folder(&sub)) {
                seen_branches.insert(name.clone());
                let existed = matches!(
                    self.lock().children.get(&name),
                    Some(TreeChild::Branch(_))
                );
                self.get_or_create_branch(&name)?;
                changed |= !existed;
            } else {
                let stale = match (last_scan, finder.with(|f| f.last_modified(&sub))) {
                    (Some(last), Some(mtime)) => mtime > last,
                    (None, _) => true,
                    (Some(_), None) => false,
                };
                if stale {
                    worklist.push_back(sub);
                } else {
                    unchanged_files.insert(name);
                }
            }
        }

        while let Some(file) = worklist.pop_front() {
            let file_entries = finder.read_entries(&file)?;
            for td in file_entries.tests {
                derived.insert(td.url().to_owned());
                changed |= self.insert_discovered(td)?;
            }
            for nested in file_entries.files {
                if finder.with(|f| f.is_folder(&nested)) {
                    let Some(name) = nested.file_name() else {
                        continue;
                    };
                    seen_branches.insert(name.to_owned());
                    let branch = self.get_or_create_branch(name)?;
                    branch.queue_file(nested);
                } else {
                    worklist.push_back(nested);
                }
            }
        }

        // Remove branches and records the finder no longer reports.
        let stale_names: Vec<String> = {
            let inner = self.lock();
            inner
                .children
                .iter()
                .filter_map(|(name, child)| match child {
                    TreeChild::Branch(_) => {
                        (!seen_branches.contains(name)).then(|| name.clone())
                    }
                    TreeChild::Result(result) => {
                        let file_name = name.split('#').next().unwrap_or(name);
                        let retained = derived.contains(result.url())
                            || unchanged_files.contains(file_name);
                        (!retained).then(|| name.clone())
                    }
                })
                .collect()
        };
        for name in stale_names {
            changed |= self.rm_child(&name);
        }

        Ok(changed)
    }

    /// Reconciles one freshly derived test description against the existing
    /// record for its URL: insert if absent, replace if the description
    /// changed, keep otherwise. Returns true if the node changed.
    fn insert_discovered(self: &Arc<Self>, td: TestDescription) -> Result<bool, TreeError> {
        let Some(name) = url_file_name(td.url()).map(str::to_owned) else {
            return Err(TreeError::EmptyUrl {
                url: td.url().to_owned(),
            });
        };
        let existing = match self.lock().children.get(&name) {
            Some(TreeChild::Branch(_)) => {
                return Err(TreeError::NameCollision {
                    parent_path: self.path(),
                    name,
                });
            }
            Some(TreeChild::Result(result)) => Some(Arc::clone(result)),
            None => None,
        };
        match existing {
            None => {
                self.add_child(TestResult::not_run(td))?;
                Ok(true)
            }
            Some(existing) => {
                let existing_desc = existing.description().ok().flatten();
                if existing_desc.as_ref() == Some(&td) {
                    return Ok(false);
                }
                // The description changed: the prior result no longer
                // applies to the test as it now exists.
                let replacement = TestResult::not_run(td);
                let event = {
                    let mut inner = self.lock();
                    inner
                        .children
                        .insert(name, TreeChild::Result(Arc::clone(&replacement)));
                    existing.set_parent(Weak::new());
                    replacement.set_parent(Arc::downgrade(self));
                    TreeEvent::ResultReplaced {
                        old: existing,
                        new: replacement,
                    }
                };
                self.invalidate_counters();
                self.notify(&event);
                Ok(true)
            }
        }
    }

    // ---
    // Mutation
    // ---

    /// Inserts a record under this node, applying the replacement policy if
    /// a record for the same test URL already exists.
    pub fn add_child(self: &Arc<Self>, record: Arc<TestResult>) -> Result<InsertOutcome, TreeError> {
        let Some(name) = url_file_name(record.url()).map(str::to_owned) else {
            return Err(TreeError::EmptyUrl {
                url: record.url().to_owned(),
            });
        };

        let (outcome, event) = {
            let mut inner = self.lock();
            match inner.children.get(&name) {
                Some(TreeChild::Branch(_)) => {
                    return Err(TreeError::NameCollision {
                        parent_path: self.path(),
                        name,
                    });
                }
                Some(TreeChild::Result(existing)) => {
                    if Arc::ptr_eq(existing, &record) {
                        // Re-insertion of the identical object: nothing to
                        // do. Callers that want a rescan use
                        // `refresh_if_needed` explicitly.
                        (InsertOutcome::KeptExisting(record.clone()), None)
                    } else if should_replace(existing, &record, self.ctx.clear_changed) {
                        let old = Arc::clone(existing);
                        inner
                            .children
                            .insert(name, TreeChild::Result(Arc::clone(&record)));
                        old.set_parent(Weak::new());
                        record.set_parent(Arc::downgrade(self));
                        let event = TreeEvent::ResultReplaced {
                            old: Arc::clone(&old),
                            new: Arc::clone(&record),
                        };
                        (InsertOutcome::Replaced(old), Some(event))
                    } else {
                        (InsertOutcome::KeptExisting(Arc::clone(existing)), None)
                    }
                }
                None => {
                    inner
                        .children
                        .insert(name, TreeChild::Result(Arc::clone(&record)));
                    record.set_parent(Arc::downgrade(self));
                    let event = TreeEvent::ResultInserted {
                        result: Arc::clone(&record),
                    };
                    (InsertOutcome::Inserted, Some(event))
                }
            }
        };

        if matches!(outcome, InsertOutcome::Inserted) {
            self.bump_size(1);
        }
        if let Some(event) = event {
            self.invalidate_counters();
            self.notify(&event);
        }
        Ok(outcome)
    }

    /// Removes a direct child by name, firing a removal notification.
    /// Returns true if a child was removed.
    pub fn rm_child(self: &Arc<Self>, name: &str) -> bool {
        let removed = self.lock().children.shift_remove(name);
        let Some(child) = removed else {
            return false;
        };
        match &child {
            TreeChild::Result(result) => {
                result.set_parent(Weak::new());
                self.bump_size(-1);
            }
            TreeChild::Branch(branch) => {
                let branch_size = branch.size();
                if branch_size > 0 {
                    self.bump_size(-(branch_size as isize));
                }
            }
        }
        self.invalidate_counters();
        let event = match child {
            TreeChild::Branch(branch) => TreeEvent::BranchRemoved { branch },
            TreeChild::Result(result) => TreeEvent::ResultRemoved { result },
        };
        self.notify(&event);
        true
    }

    /// Finds or creates a direct branch child.
    pub fn get_or_create_branch(self: &Arc<Self>, name: &str) -> Result<Arc<TreeNode>, TreeError> {
        let (branch, created) = {
            let mut inner = self.lock();
            match inner.children.get(name) {
                Some(TreeChild::Branch(branch)) => (Arc::clone(branch), false),
                Some(TreeChild::Result(_)) => {
                    return Err(TreeError::NameCollision {
                        parent_path: self.path(),
                        name: name.to_owned(),
                    });
                }
                None => {
                    let branch = TreeNode::new_branch(self, name);
                    inner
                        .children
                        .insert(name.to_owned(), TreeChild::Branch(Arc::clone(&branch)));
                    (branch, true)
                }
            }
        };
        if created {
            self.notify(&TreeEvent::BranchInserted {
                branch: Arc::clone(&branch),
            });
        }
        Ok(branch)
    }

    /// Removes every branch in this subtree that has no children, working
    /// from the leaves toward this node.
    pub fn prune(self: &Arc<Self>) {
        enum Phase {
            Enter,
            Exit,
        }
        let mut stack: Vec<(Arc<TreeNode>, Phase)> = vec![(Arc::clone(self), Phase::Enter)];
        while let Some((node, phase)) = stack.pop() {
            match phase {
                Phase::Enter => {
                    stack.push((Arc::clone(&node), Phase::Exit));
                    for child in node.children_unscanned() {
                        if let TreeChild::Branch(branch) = child {
                            stack.push((branch, Phase::Enter));
                        }
                    }
                }
                Phase::Exit => {
                    let empty: Vec<String> = {
                        let inner = node.lock();
                        inner
                            .children
                            .iter()
                            .filter_map(|(name, child)| match child {
                                TreeChild::Branch(branch)
                                    if branch.lock().children.is_empty() =>
                                {
                                    Some(name.clone())
                                }
                                _ => None,
                            })
                            .collect()
                    };
                    for name in empty {
                        node.rm_child(&name);
                    }
                }
            }
        }
    }

    // ---
    // Aggregate counters
    // ---

    /// The aggregate per-status counts for this subtree, recomputing any
    /// invalidated totals.
    pub fn child_status(self: &Arc<Self>) -> Result<StatusCounters, FinderError> {
        self.scan_if_needed()?;
        if let Some(counters) = self.lock().counters {
            return Ok(counters);
        }

        struct Frame {
            node: Arc<TreeNode>,
            pending: Vec<Arc<TreeNode>>,
            acc: StatusCounters,
        }

        fn open_frame(node: &Arc<TreeNode>) -> Result<Frame, FinderError> {
            node.scan_if_needed()?;
            let inner = node.lock();
            let mut acc = StatusCounters::default();
            let mut pending = Vec::new();
            for child in inner.children.values() {
                match child {
                    TreeChild::Result(result) => acc.record(result.status_kind()),
                    TreeChild::Branch(branch) => pending.push(Arc::clone(branch)),
                }
            }
            Ok(Frame {
                node: Arc::clone(node),
                pending,
                acc,
            })
        }

        let mut stack = vec![open_frame(self)?];
        loop {
            let next_child = match stack.last_mut() {
                Some(top) => top.pending.pop(),
                None => return Ok(StatusCounters::default()),
            };
            match next_child {
                Some(child) => {
                    let cached = child.lock().counters;
                    match cached {
                        Some(counters) => {
                            if let Some(top) = stack.last_mut() {
                                top.acc.add(&counters);
                            }
                        }
                        None => stack.push(open_frame(&child)?),
                    }
                }
                None => {
                    let Some(done) = stack.pop() else {
                        return Ok(StatusCounters::default());
                    };
                    done.node.lock().counters = Some(done.acc);
                    match stack.last_mut() {
                        Some(parent) => parent.acc.add(&done.acc),
                        None => return Ok(done.acc),
                    }
                }
            }
        }
    }

    /// Invalidates the cached counters of this node and every ancestor.
    /// Needed from outside when a contained record's status changes in
    /// place.
    pub(crate) fn invalidate_counters(self: &Arc<Self>) {
        let mut current = Some(Arc::clone(self));
        while let Some(node) = current {
            let was_cached = node.lock().counters.take().is_some();
            if was_cached {
                node.notify(&TreeEvent::CountersInvalidated);
            }
            current = node.parent();
        }
    }

    /// Eagerly adjusts the descendant count of this node and every ancestor.
    fn bump_size(self: &Arc<Self>, delta: isize) {
        let mut current = Some(Arc::clone(self));
        while let Some(node) = current {
            if delta >= 0 {
                node.size.fetch_add(delta as usize, Ordering::AcqRel);
            } else {
                node.size.fetch_sub(delta.unsigned_abs(), Ordering::AcqRel);
            }
            current = node.parent();
        }
    }

    // ---
    // Internal plumbing
    // ---

    fn queue_file(&self, file: Utf8PathBuf) {
        let mut inner = self.lock();
        if !inner.files_to_scan.contains(&file) {
            inner.files_to_scan.push(file);
        }
    }

    fn notify(self: &Arc<Self>, event: &TreeEvent) {
        let observers: Vec<_> = self.observers_lock().iter().cloned().collect();
        for observer in observers {
            observer.event(self, event);
        }
    }

    fn lock(&self) -> MutexGuard<'_, NodeInner> {
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn scan_guard(&self) -> MutexGuard<'_, ()> {
        match self.scan_lock.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn observers_lock(&self) -> MutexGuard<'_, DebugIgnore<Vec<Arc<dyn TreeNodeObserver>>>> {
        match self.observers.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

/// The replace-test decision: whether `candidate` should displace `orig`,
/// both presumed to carry the same test URL.
///
/// The rules form a total order over correctness, recency, and completeness,
/// and are relied on by existing work directories:
///
/// 1. If clearing changed tests is enabled and both descriptions resolve and
///    differ structurally, replace.
/// 2. Never regress a completed result back to not-run.
/// 3. Any status-kind change wins.
/// 4. A changed status reason wins.
/// 5. Prefer the record that still has its detail in memory.
/// 6. Otherwise the two are equivalent; keep the original.
pub(crate) fn should_replace(
    orig: &Arc<TestResult>,
    candidate: &Arc<TestResult>,
    clear_changed: bool,
) -> bool {
    if orig.url() != candidate.url() {
        warn!(
            orig = %orig.url(),
            candidate = %candidate.url(),
            "replace decision invoked for mismatched test URLs"
        );
        return false;
    }
    if clear_changed {
        let orig_desc = orig.description().ok().flatten();
        let candidate_desc = candidate.description().ok().flatten();
        if let (Some(orig_desc), Some(candidate_desc)) = (orig_desc, candidate_desc)
            && orig_desc != candidate_desc
        {
            return true;
        }
    }
    let orig_kind = orig.status_kind();
    let candidate_kind = candidate.status_kind();
    if candidate_kind == TestStatusKind::NotRun && orig_kind != TestStatusKind::NotRun {
        return false;
    }
    if candidate_kind != orig_kind {
        return true;
    }
    let orig_reason = orig.status().map(|s| s.reason).unwrap_or_default();
    let candidate_reason = candidate.status().map(|s| s.reason).unwrap_or_default();
    if orig_reason != candidate_reason {
        return true;
    }
    orig.is_shrunk() && !candidate.is_shrunk()
}
