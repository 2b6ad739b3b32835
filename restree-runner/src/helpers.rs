// Copyright (c) The restree Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! General support code for restree-runner.

/// Splits a slash-separated tree path into its directory components and the
/// final component. The final component may carry a `#fragment`.
///
/// Returns `None` if the path has no final component (empty, or ends with a
/// slash).
pub(crate) fn split_components(path: &str) -> Option<(Vec<&str>, &str)> {
    let mut components: Vec<&str> = path.split('/').collect();
    let last = components.pop()?;
    if last.is_empty() || components.iter().any(|c| c.is_empty()) {
        return None;
    }
    Some((components, last))
}
