// Copyright (c) The restree Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Observation of structural changes to individual tree nodes.

use crate::{test_result::TestResult, tree::TreeNode};
use std::sync::Arc;

/// A structural or counter change to one tree node.
///
/// Forms the payload of [`TreeNodeObserver::event`].
#[derive(Clone, Debug)]
pub enum TreeEvent {
    /// A branch child was created under the node.
    BranchInserted {
        /// The new branch.
        branch: Arc<TreeNode>,
    },

    /// A branch child was removed from the node.
    BranchRemoved {
        /// The removed branch.
        branch: Arc<TreeNode>,
    },

    /// A result record was appended to the node.
    ResultInserted {
        /// The inserted record.
        result: Arc<TestResult>,
    },

    /// A result record replaced an existing record with the same test URL.
    ResultReplaced {
        /// The record that was displaced.
        old: Arc<TestResult>,
        /// The record now occupying the slot.
        new: Arc<TestResult>,
    },

    /// A result record was removed from the node.
    ResultRemoved {
        /// The removed record.
        result: Arc<TestResult>,
    },

    /// The node's aggregate status counters were invalidated and will be
    /// recomputed on the next read.
    CountersInvalidated,
}

/// An observer of one tree node.
///
/// Observers are stored directly on the node they watch and are notified
/// synchronously, after the mutation is applied and the node's lock has been
/// released.
pub trait TreeNodeObserver: Send + Sync {
    /// Called for every structural or counter change to the observed node.
    fn event(&self, node: &Arc<TreeNode>, event: &TreeEvent);
}
