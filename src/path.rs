/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

//! Segment-wise operations over sync paths.
//!
//! Paths arrive from heterogeneous sources (host filesystem, DAV hrefs,
//! configuration) and may mix `/` and `\` separators, so lexical string
//! comparison is not enough. No `.`/`..` normalization is performed.

/// Splits a path on both separator kinds, dropping empty segments.
pub fn segments(path: &str) -> Vec<&str> {
    path.split(['/', '\\']).filter(|s| !s.is_empty()).collect()
}

/// Final segment of the path, or the path itself if it has none.
pub fn last_element(path: &str) -> &str {
    segments(path).pop().unwrap_or(path)
}

pub fn paths_equal(first: &str, second: &str) -> bool {
    segments(first) == segments(second)
}

/// True iff `prefix` has strictly fewer segments than `path` and matches
/// it segment-wise from the start.
pub fn is_subpath(prefix: &str, path: &str) -> bool {
    let prefix = segments(prefix);
    let path = segments(path);
    prefix.len() < path.len() && path[..prefix.len()] == prefix[..]
}
