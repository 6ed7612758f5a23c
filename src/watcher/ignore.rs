//! Ignore policy for filesystem paths.
//!
//! A fixed set of directory-name fragments excluded from watching and from
//! the injector's entry-file scan: version control, dependency managers, IDE
//! state, and build output. Matching is a case-insensitive substring test
//! against the full path string.

use std::path::Path;

/// Separator-delimited fragments; a path containing any of them is ignored.
const IGNORED_FRAGMENTS: &[&str] = &[
    "/.git/",
    "/node_modules/",
    "/vendor/",
    "/.idea/",
    "/.vscode/",
    "/storage/",
    "/dist/",
    "/bin/",
];

/// Check whether a path falls under the ignore policy.
///
/// A trailing separator is appended before matching so that a directory path
/// like `site/.git` matches the `/.git/` fragment itself, not just its
/// children.
pub fn is_ignored_path(path: &Path) -> bool {
    let mut p = path.to_string_lossy().to_lowercase();
    if std::path::MAIN_SEPARATOR != '/' {
        p = p.replace(std::path::MAIN_SEPARATOR, "/");
    }
    p.push('/');
    IGNORED_FRAGMENTS.iter().any(|frag| p.contains(frag))
}
