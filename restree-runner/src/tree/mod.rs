// Copyright (c) The restree Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The lazily populated result tree.
//!
//! The tree mirrors the test suite's directory structure: branches are
//! [`TreeNode`]s, leaves are [`TestResult`](crate::test_result::TestResult)s.
//! Branches populate themselves on demand through the configured finder and
//! keep themselves in sync with incremental on-disk changes; every
//! structural mutation is announced synchronously to per-node observers.

mod node;
mod observer;

pub use node::{InsertOutcome, TreeChild, TreeContext, TreeNode};
pub use observer::{TreeEvent, TreeNodeObserver};
