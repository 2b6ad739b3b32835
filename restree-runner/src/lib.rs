// Copyright (c) The restree Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

#![warn(missing_docs)]

//! Core result-tracking functionality for the restree harness.
//!
//! This crate owns the live view of a test suite's results: a lazily
//! populated tree that mirrors the suite's directory structure, the records
//! stored at its leaves, and the persistence hooks that keep both in sync
//! with prior runs on disk.
//!
//! The main entry points are:
//!
//! - [`ResultTable`](table::ResultTable): the root aggregate. Execution
//!   engines push completed [`TestResult`](test_result::TestResult)s into it
//!   and read filtered selections back out of it.
//! - [`TestFinder`](finder::TestFinder): the contract for the component that
//!   discovers tests on disk. The tree consults it lazily, only when a query
//!   touches unscanned data.
//! - [`ResultCache`](cache::ResultCache): the contract for the disk-backed
//!   index of prior results, bulk-loaded on a background thread.

pub mod cache;
pub mod errors;
pub mod finder;
mod helpers;
pub mod resultfile;
pub mod section;
pub mod status;
pub mod table;
pub mod test_description;
pub mod test_result;
#[cfg(test)]
mod test_helpers;
pub mod tree;
