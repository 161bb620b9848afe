//! Integration Test: Blocking I/O Prohibition
//!
//! **Policy**: Async code in the feed crates MUST NOT use blocking I/O.
//! **Required**: Use `tokio::fs`, `tokio::net`, `tokio::process` and async
//! `reqwest`, not their `std` or blocking counterparts.
//!
//! Blocking calls in plain `fn`s are allowed: configuration is loaded before
//! the feed starts.

use architectural_enforcement::{code_part, rust_sources, SourceFile, PRODUCTION_SOURCES};

/// Test that async production code does not use blocking I/O
#[test]
fn test_no_blocking_io_in_async_code() {
    let mut violations = Vec::new();
    for dir in PRODUCTION_SOURCES {
        for file in rust_sources(dir) {
            check_file(&file, &mut violations);
        }
    }

    if !violations.is_empty() {
        eprintln!("\nBlocking I/O calls found in async code!\n");
        for violation in &violations {
            eprintln!("  {violation}");
        }
        eprintln!("\nFORBIDDEN in async code:");
        eprintln!("  - std::fs::*, std::net::*, std::process::Command");
        eprintln!("  - reqwest::blocking::*");
        eprintln!("\nREQUIRED:");
        eprintln!("  - tokio::fs, tokio::net, tokio::process, reqwest async client");

        panic!(
            "\nFound {} blocking I/O violation(s).\nFix these before merging!",
            violations.len()
        );
    }
}

/// Blocking client APIs are never acceptable, async context or not
#[test]
fn test_no_blocking_http_client() {
    for dir in PRODUCTION_SOURCES {
        for file in rust_sources(dir) {
            for (idx, line) in file.lines.iter().enumerate() {
                assert!(
                    !code_part(line).contains("reqwest::blocking"),
                    "{}",
                    file.describe(idx, "Blocking HTTP client")
                );
            }
        }
    }
}

fn check_file(file: &SourceFile, violations: &mut Vec<String>) {
    for (idx, line) in file.lines.iter().enumerate() {
        let code = code_part(line);
        let Some(what) = blocking_call(code) else {
            continue;
        };
        if file.is_test_code(idx) || !file.is_async_code(idx) {
            continue;
        }
        violations.push(file.describe(idx, what));
    }
}

fn blocking_call(code: &str) -> Option<&'static str> {
    if code.contains("std::fs::") {
        Some("Blocking file I/O")
    } else if code.contains("std::net::") {
        Some("Blocking network I/O")
    } else if code.contains("std::process::Command") {
        Some("Blocking process I/O")
    } else if code.contains("std::io::stdin()") {
        Some("Blocking stdin")
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_blocking_call_detection() {
        assert_eq!(
            blocking_call("    let s = std::fs::read_to_string(path)?;"),
            Some("Blocking file I/O")
        );
        assert_eq!(blocking_call("    let s = tokio::fs::read(path).await?;"), None);
    }
}
