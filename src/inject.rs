//! Best-effort injection of the reload client script into a project's entry
//! file.
//!
//! Pure string transformation plus an atomic write; nothing here touches the
//! watch engine. Injection is idempotent: a marker comment delimits the
//! injected block and is checked before touching a file. The marker must stay
//! byte-identical across versions or files injected by an older run would be
//! injected twice.

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;
use walkdir::WalkDir;

use crate::project::Project;
use crate::watcher::is_ignored_path;

/// Marker comment delimiting (and detecting) an injected block.
pub const MARKER: &str = "localreload client";

/// Bounded scan limits when no conventional entry file exists.
const SCAN_MAX_DEPTH: usize = 3;
const SCAN_RESULT_CAP: usize = 20;

/// What the injector did for a project.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InjectOutcome {
    /// Script written into this entry file.
    Injected(PathBuf),
    /// Entry file already carries the marker; nothing written.
    AlreadyPresent(PathBuf),
    /// No candidate file accepted the script.
    NoCandidate,
}

/// Inject `script` into the project's main page.
///
/// Candidates are tried in preference order: the configured document root,
/// then conventional locations, then a bounded directory scan. Read failures
/// advance to the next candidate; a write failure after a successful match is
/// the one injection error that propagates, since a half-written entry file
/// would corrupt the project.
pub fn inject_client_script(project: &Project, script: &str) -> io::Result<InjectOutcome> {
    let mut candidates = Vec::new();

    if let Some(doc_root) = project
        .document_root
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
    {
        candidates.push(project.path.join(doc_root).join("index.php"));
        candidates.push(project.path.join(doc_root).join("index.html"));
    }

    candidates.push(project.path.join("public").join("index.php"));
    candidates.push(project.path.join("public").join("index.html"));
    candidates.push(project.path.join("index.php"));
    candidates.push(project.path.join("index.html"));

    // Many projects use custom document roots (htdocs/, web/, src/); fall
    // back to a shallow scan for an index file.
    if !candidates.iter().any(|c| c.exists()) {
        candidates.extend(find_index_files(&project.path));
    }

    for file in &candidates {
        let Ok(src) = fs::read_to_string(file) else {
            continue;
        };
        if src.contains(MARKER) {
            return Ok(InjectOutcome::AlreadyPresent(file.clone()));
        }

        let Some(updated) = inject_into_source(file, &src, script) else {
            continue;
        };

        write_atomic(file, &updated)?;
        return Ok(InjectOutcome::Injected(file.clone()));
    }

    Ok(InjectOutcome::NoCandidate)
}

/// Insert the script into one file's contents, or `None` when the file is not
/// a recognizable entry page.
///
/// Priority: before a closing body tag; appended for anything that looks like
/// an HTML document; for PHP files, appended with the scripting context closed
/// first when the file ends inside an open block (injecting into PHP context
/// would nest tags and break parsing).
fn inject_into_source(filename: &Path, src: &str, script: &str) -> Option<String> {
    let block = format!("\n<!-- {MARKER} -->\n{script}\n");
    let lower = src.to_ascii_lowercase();

    if let Some(idx) = lower.rfind("</body>") {
        return Some(format!("{}{}{}", &src[..idx], block, &src[idx..]));
    }

    if lower.contains("<html") || lower.contains("<!doctype") || lower.contains("<body") {
        return Some(format!("{src}{block}"));
    }

    if filename
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("php"))
    {
        let trimmed = src.trim();
        let last_close = trimmed.rfind("?>");
        let last_open = trimmed.rfind("<?");
        let ends_in_php_block = match (last_open, last_close) {
            (Some(open), Some(close)) => open > close,
            (Some(_), None) => true,
            _ => false,
        };

        if ends_in_php_block {
            return Some(format!("{src}\n\n/* {MARKER} */\n?>\n{script}\n"));
        }
        return Some(format!("{src}\n{script}\n"));
    }

    // Unknown file shape; leave it untouched and let the caller try the next
    // candidate.
    None
}

/// Shallow scan for files named exactly `index.php` or `index.html`, skipping
/// ignored directories. Depth and result count are capped.
fn find_index_files(root: &Path) -> Vec<PathBuf> {
    let mut results = Vec::new();
    let entries = WalkDir::new(root)
        .max_depth(SCAN_MAX_DEPTH)
        .into_iter()
        .filter_entry(|e| !is_ignored_path(e.path()));

    for entry in entries {
        let Ok(entry) = entry else { continue };
        if !entry.file_type().is_file() {
            continue;
        }
        let name = entry.file_name().to_string_lossy().to_ascii_lowercase();
        if name == "index.php" || name == "index.html" {
            results.push(entry.into_path());
            if results.len() >= SCAN_RESULT_CAP {
                break;
            }
        }
    }
    results
}

/// Write via a sibling temporary file renamed over the target, so a crash
/// never leaves a truncated entry file.
fn write_atomic(target: &Path, content: &str) -> io::Result<()> {
    let dir = target.parent().unwrap_or_else(|| Path::new("."));
    let mut tmp = NamedTempFile::new_in(dir)?;
    tmp.write_all(content.as_bytes())?;
    tmp.persist(target).map_err(|e| e.error)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const SCRIPT: &str = "<script>/* test */</script>";

    #[test]
    fn inserts_before_closing_body_tag() {
        let src = "<!DOCTYPE html>\n<html><body>\n<h1>hi</h1>\n</body></html>\n";
        let out = inject_into_source(Path::new("index.html"), src, SCRIPT).unwrap();

        let marker_at = out.find(MARKER).unwrap();
        let body_at = out.find("</body>").unwrap();
        assert!(marker_at < body_at, "block must precede the closing body tag");
        assert!(out.contains(SCRIPT));
    }

    #[test]
    fn appends_for_html_without_closing_body() {
        let src = "<!DOCTYPE html>\n<h1>bare page</h1>\n";
        let out = inject_into_source(Path::new("index.html"), src, SCRIPT).unwrap();
        assert!(out.starts_with(src));
        assert!(out.trim_end().ends_with(SCRIPT));
    }

    #[test]
    fn closes_unterminated_php_block_first() {
        let src = "<?php\necho 'hello';\n";
        let out = inject_into_source(Path::new("index.php"), src, SCRIPT).unwrap();

        let close_at = out.rfind("?>").unwrap();
        let marker_at = out.find(MARKER).unwrap();
        let script_at = out.find(SCRIPT).unwrap();
        assert!(marker_at < close_at, "marker comment sits inside the PHP block");
        assert!(close_at < script_at, "script must follow the closing tag");
    }

    #[test]
    fn appends_after_terminated_php_block() {
        let src = "<?php echo 'x'; ?>\n";
        let out = inject_into_source(Path::new("index.php"), src, SCRIPT).unwrap();
        assert!(out.starts_with(src));
        assert!(out.trim_end().ends_with(SCRIPT));
        // No extra close tag was emitted.
        assert_eq!(out.matches("?>").count(), 1);
    }

    #[test]
    fn leaves_unrecognized_files_untouched() {
        assert!(inject_into_source(Path::new("app.css"), "body {}", SCRIPT).is_none());
        assert!(inject_into_source(Path::new("notes.txt"), "plain text", SCRIPT).is_none());
    }

    #[test]
    fn injection_is_idempotent() {
        let dir = tempfile::TempDir::new().unwrap();
        fs::write(
            dir.path().join("index.html"),
            "<html><body>x</body></html>",
        )
        .unwrap();
        let project = Project {
            id: "site".into(),
            path: dir.path().to_path_buf(),
            document_root: None,
        };

        let first = inject_client_script(&project, SCRIPT).unwrap();
        let target = match first {
            InjectOutcome::Injected(path) => path,
            other => panic!("expected injection, got {other:?}"),
        };
        let after_first = fs::read_to_string(&target).unwrap();

        let second = inject_client_script(&project, SCRIPT).unwrap();
        assert_eq!(second, InjectOutcome::AlreadyPresent(target.clone()));
        assert_eq!(after_first, fs::read_to_string(&target).unwrap());
    }

    #[test]
    fn document_root_candidates_win() {
        let dir = tempfile::TempDir::new().unwrap();
        fs::create_dir(dir.path().join("htdocs")).unwrap();
        fs::write(
            dir.path().join("htdocs/index.php"),
            "<html><body>doc root</body></html>",
        )
        .unwrap();
        fs::write(
            dir.path().join("index.php"),
            "<html><body>project root</body></html>",
        )
        .unwrap();

        let project = Project {
            id: "site".into(),
            path: dir.path().to_path_buf(),
            document_root: Some("htdocs".into()),
        };

        let outcome = inject_client_script(&project, SCRIPT).unwrap();
        assert_eq!(
            outcome,
            InjectOutcome::Injected(dir.path().join("htdocs/index.php"))
        );
    }

    #[test]
    fn scan_finds_index_in_custom_layout() {
        let dir = tempfile::TempDir::new().unwrap();
        fs::create_dir_all(dir.path().join("web/app")).unwrap();
        fs::write(
            dir.path().join("web/app/index.html"),
            "<html><body>nested</body></html>",
        )
        .unwrap();
        // Ignored directories are skipped even when they hold an index file.
        fs::create_dir_all(dir.path().join("vendor")).unwrap();
        fs::write(
            dir.path().join("vendor/index.php"),
            "<html><body>vendored</body></html>",
        )
        .unwrap();

        let project = Project {
            id: "site".into(),
            path: dir.path().to_path_buf(),
            document_root: None,
        };

        let outcome = inject_client_script(&project, SCRIPT).unwrap();
        assert_eq!(
            outcome,
            InjectOutcome::Injected(dir.path().join("web/app/index.html"))
        );
    }

    #[test]
    fn no_candidate_reports_cleanly() {
        let dir = tempfile::TempDir::new().unwrap();
        fs::write(dir.path().join("style.css"), "body {}").unwrap();
        let project = Project {
            id: "site".into(),
            path: dir.path().to_path_buf(),
            document_root: None,
        };
        assert_eq!(
            inject_client_script(&project, SCRIPT).unwrap(),
            InjectOutcome::NoCandidate
        );
    }
}
