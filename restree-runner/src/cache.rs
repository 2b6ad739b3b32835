// Copyright (c) The restree Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The contract for the disk-backed index of prior results.
//!
//! The cache maps test URLs to previously computed records. The
//! [`ResultTable`](crate::table::ResultTable) bulk-loads it once on a
//! dedicated background thread at construction, reconciles the loaded
//! records into the live tree, and forwards each completed record back into
//! the cache as tests finish.
//!
//! Cache failures are never fatal: the table logs them and degrades to
//! operating purely off live insertions.

use crate::{errors::CacheError, test_result::TestResult};
use std::{collections::BTreeMap, sync::Arc};

/// A disk-backed map from test URL to previously computed result record.
pub trait ResultCache: Send + Sync {
    /// Loads every known record. Called once, on a background worker.
    fn load(&self) -> Result<BTreeMap<String, Arc<TestResult>>, CacheError>;

    /// Best-effort persist of one completed (non-not-run) record.
    fn insert(&self, record: &Arc<TestResult>) -> Result<(), CacheError>;

    /// Compacts the cache's on-disk representation.
    fn compress(&self) -> Result<(), CacheError>;

    /// Whether a `compress` call is worthwhile. The table checks this at
    /// natural checkpoints, e.g. the end of a full run.
    fn needs_compress(&self) -> bool;
}
