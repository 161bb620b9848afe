//! Architectural Enforcement Integration Tests
//!
//! This package contains integration tests that enforce architectural principles
//! on the feed crates:
//! - No sleep() calls in production code
//! - No blocking I/O inside async code
//!
//! The scanners here are line-based. They are designed to catch violations
//! early, not to parse Rust.

use std::fs;
use std::path::{Path, PathBuf};

/// Production source trees checked by the enforcement tests
pub const PRODUCTION_SOURCES: &[&str] = &["feed/core/src", "feed/sim/src"];

/// Workspace root, resolved from this crate's manifest directory
#[must_use]
pub fn workspace_root() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR")).join("../..")
}

/// A Rust source file split into lines
pub struct SourceFile {
    /// Path as found on disk
    pub path: PathBuf,
    /// File contents, one entry per line
    pub lines: Vec<String>,
    /// First line of the trailing `#[cfg(test)] mod` block, if any
    pub test_module_start: Option<usize>,
}

impl SourceFile {
    /// Read a source file
    pub fn read(path: &Path) -> Option<Self> {
        let content = fs::read_to_string(path).ok()?;
        let lines: Vec<String> = content.lines().map(str::to_string).collect();
        let test_module_start = find_test_module(&lines);
        Some(Self {
            path: path.to_path_buf(),
            lines,
            test_module_start,
        })
    }

    /// Whether a line belongs to test code
    #[must_use]
    pub fn is_test_code(&self, idx: usize) -> bool {
        if self.test_module_start.is_some_and(|start| idx >= start) {
            return true;
        }
        matches!(enclosing_fn(&self.lines, idx), Some(f) if f.is_test)
    }

    /// Whether a line sits inside an `async fn`
    #[must_use]
    pub fn is_async_code(&self, idx: usize) -> bool {
        matches!(enclosing_fn(&self.lines, idx), Some(f) if f.is_async)
    }

    /// `path:line - text` for a violation report
    #[must_use]
    pub fn describe(&self, idx: usize, what: &str) -> String {
        format!(
            "{}:{} - {what}: {}",
            self.path.display(),
            idx + 1,
            self.lines[idx].trim()
        )
    }
}

/// Every `.rs` file under `dir` (relative to the workspace root)
#[must_use]
pub fn rust_sources(dir: &str) -> Vec<SourceFile> {
    let path = workspace_root().join(dir);
    if !path.exists() {
        return Vec::new();
    }

    walkdir::WalkDir::new(path)
        .into_iter()
        .filter_map(Result::ok)
        .filter(|e| e.path().extension().and_then(|s| s.to_str()) == Some("rs"))
        .filter_map(|e| SourceFile::read(e.path()))
        .collect()
}

/// The part of a line before any `//` comment
#[must_use]
pub fn code_part(line: &str) -> &str {
    line.split("//").next().unwrap_or(line)
}

/// Function that encloses a line
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FnContext {
    /// Line of the `fn` signature
    pub signature: usize,
    /// Declared `async fn`
    pub is_async: bool,
    /// Carries `#[test]` or `#[tokio::test]`
    pub is_test: bool,
}

/// Whether a trimmed line starts a function; `Some(is_async)` if it does
#[must_use]
pub fn fn_signature(line: &str) -> Option<bool> {
    let mut rest = line.trim();
    for prefix in ["pub(crate) ", "pub(super) ", "pub ", "const ", "unsafe "] {
        rest = rest.strip_prefix(prefix).unwrap_or(rest);
    }
    if rest.starts_with("async fn ") {
        Some(true)
    } else if rest.starts_with("fn ") {
        Some(false)
    } else {
        None
    }
}

/// Scan backwards to the nearest function signature
#[must_use]
pub fn enclosing_fn<S: AsRef<str>>(lines: &[S], current_idx: usize) -> Option<FnContext> {
    let signature = (0..=current_idx)
        .rev()
        .find(|&i| fn_signature(lines[i].as_ref()).is_some())?;
    let is_async = fn_signature(lines[signature].as_ref()) == Some(true);

    let mut is_test = false;
    for line in lines[..signature].iter().rev() {
        let line = line.as_ref().trim();
        if line.starts_with("#[test]") || line.starts_with("#[tokio::test") {
            is_test = true;
            break;
        }
        if !(line.starts_with("#[") || line.starts_with("///")) {
            break;
        }
    }

    Some(FnContext {
        signature,
        is_async,
        is_test,
    })
}

fn find_test_module(lines: &[String]) -> Option<usize> {
    lines.windows(2).position(|pair| {
        pair[0].trim() == "#[cfg(test)]" && pair[1].trim_start().starts_with("mod ")
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fn_signature_handles_visibility() {
        assert_eq!(fn_signature("    pub async fn restore(&self) {"), Some(true));
        assert_eq!(fn_signature("pub(crate) fn step(&self) {"), Some(false));
        assert_eq!(fn_signature("    pub const fn new() -> Self {"), Some(false));
        assert_eq!(fn_signature("let f = fnord;"), None);
    }

    #[test]
    fn test_enclosing_fn_sees_test_attribute() {
        let code = [
            "#[tokio::test]",
            "async fn test_restore() {",
            "    std::fs::write(\"x\", \"y\").unwrap();",
            "}",
        ];
        let context = enclosing_fn(&code, 2).unwrap();
        assert!(context.is_test);
        assert!(context.is_async);
        assert_eq!(context.signature, 1);
    }

    #[test]
    fn test_enclosing_fn_production_async() {
        let code = [
            "/// Save the position",
            "pub async fn save(&self) {",
            "    tokio::fs::write(path, bytes).await?;",
            "}",
        ];
        let context = enclosing_fn(&code, 2).unwrap();
        assert!(!context.is_test);
        assert!(context.is_async);
    }

    #[test]
    fn test_code_part_strips_comments() {
        assert_eq!(code_part("let a = 1; // std::fs::read"), "let a = 1; ");
    }
}
