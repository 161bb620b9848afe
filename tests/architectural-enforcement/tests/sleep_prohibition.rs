//! Integration Test: Sleep Prohibition
//!
//! **Policy**: Production code in the feed crates MUST NOT call sleep methods.
//! Navigation advances on the caller's clock and background work waits on
//! I/O, never on a timer.
//!
//! **Exceptions**: Simulated service latency (in-memory backend only), test code

use architectural_enforcement::{code_part, rust_sources, SourceFile, PRODUCTION_SOURCES};

/// Test that production code does not contain sleep() calls
#[test]
fn test_no_sleep_in_production_code() {
    let violations = find_sleep_violations();

    if !violations.is_empty() {
        eprintln!("\nSleep calls found in production code!\n");
        for violation in &violations {
            eprintln!("  {violation}");
        }
        eprintln!("\nACCEPTABLE sleep uses:");
        eprintln!("  - Simulated latency in the in-memory content service");
        eprintln!("  - Test code (#[test] or #[tokio::test] functions)");
        eprintln!("  - Periodic work paced by tokio::time::interval()");

        panic!(
            "\nFound {} sleep violation(s) in production code.\nFix these before merging!",
            violations.len()
        );
    }
}

/// Every production tree must exist, or the scan above proves nothing
#[test]
fn test_production_sources_are_scanned() {
    for dir in PRODUCTION_SOURCES {
        assert!(!rust_sources(dir).is_empty(), "no sources found under {dir}");
    }
}

fn find_sleep_violations() -> Vec<String> {
    let mut violations = Vec::new();
    for dir in PRODUCTION_SOURCES {
        let policy = SleepPolicy {
            allow_simulated_latency: *dir == "feed/core/src",
        };
        for file in rust_sources(dir) {
            check_file(&file, &mut violations, &policy);
        }
    }
    violations
}

struct SleepPolicy {
    allow_simulated_latency: bool,
}

fn check_file(file: &SourceFile, violations: &mut Vec<String>, policy: &SleepPolicy) {
    for (idx, line) in file.lines.iter().enumerate() {
        let code = code_part(line);
        if !(code.contains("::sleep(") || code.contains(".sleep(")) {
            continue;
        }
        if file.is_test_code(idx) {
            continue;
        }
        if policy.allow_simulated_latency && is_latency_context(&file.lines, idx) {
            continue;
        }
        violations.push(file.describe(idx, "Sleep call"));
    }
}

/// Sleep used to stand in for network latency
fn is_latency_context(lines: &[String], current_idx: usize) -> bool {
    let range = current_idx.saturating_sub(5)..=current_idx;
    lines[range]
        .iter()
        .any(|line| line.to_lowercase().contains("latency"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_latency_detection() {
        let code: Vec<String> = [
            "async fn simulate_latency(&self) {",
            "    if let Some(latency) = latency {",
            "        tokio::time::sleep(latency).await;",
            "    }",
            "}",
        ]
        .iter()
        .map(|s| (*s).to_string())
        .collect();

        assert!(is_latency_context(&code, 2));
    }

    #[test]
    fn test_polling_sleep_is_not_latency() {
        let code: Vec<String> = [
            "async fn wait_for_children(&self) {",
            "    while !self.loaded() {",
            "        tokio::time::sleep(Duration::from_millis(10)).await;",
            "    }",
            "}",
        ]
        .iter()
        .map(|s| (*s).to_string())
        .collect();

        assert!(!is_latency_context(&code, 2));
    }
}
