//! Command handler functions for the linecov CLI.
//!
//! Each `cmd_*` function returns its output as a `String`, making them easy
//! to test without capturing stdout.

use std::fmt::Write;
use std::path::Path;

use anyhow::{Context, Result};

use crate::gcov::{self, ReadOptions};
use crate::merge::merge;
use crate::report::{LocalFs, ReportBuilder, ReportConfig};
use crate::upload::{self, Transport};

fn load(path: &Path, strict: bool) -> Result<crate::model::CoverageMap> {
    gcov::load(path, ReadOptions { strict })
        .with_context(|| format!("Failed to load coverage from {}", path.display()))
}

/// Build the report payload for a persisted coverage file. Returns the JSON,
/// or a confirmation line when a transport is given.
pub fn cmd_report(
    coverage_file: &Path,
    token: &str,
    config: ReportConfig,
    root: &Path,
    transport: Option<&dyn Transport>,
) -> Result<String> {
    let coverage = load(coverage_file, false)?;
    let payload = ReportBuilder::new(config)
        .build(token, &coverage, &LocalFs, root)
        .context("Failed to build coverage report")?;

    match transport {
        Some(transport) => {
            upload::submit(transport, &payload).context("Failed to upload coverage report")?;
            Ok(format!(
                "Submitted coverage for {} of {} files\n",
                payload.source_files.len(),
                coverage.len()
            ))
        }
        None => {
            let mut json = payload.to_json()?;
            json.push('\n');
            Ok(json)
        }
    }
}

/// Merge `prior` into `current` and write the result to `into`.
pub fn cmd_merge(current: &Path, prior: &Path, into: &Path, strict: bool) -> Result<String> {
    let current_cov = load(current, strict)?;
    let prior_cov = load(prior, strict)?;

    let merged = merge(current_cov, &prior_cov);
    let mut out = String::new();
    for issue in &merged.inconsistencies {
        writeln!(out, "warning: {issue}").unwrap();
    }
    let coverage = if strict {
        merged.into_strict()?
    } else {
        merged.coverage
    };

    gcov::save(into, &coverage)
        .with_context(|| format!("Failed to write {}", into.display()))?;
    writeln!(
        out,
        "Merged {} into {} → {} ({} files)",
        prior.display(),
        current.display(),
        into.display(),
        coverage.len()
    )
    .unwrap();
    Ok(out)
}

pub fn cmd_summary(coverage_file: &Path, sort_by_coverage: bool) -> Result<String> {
    let coverage = load(coverage_file, false)?;
    let summary = coverage.summary();
    let mut files = coverage.file_summaries();

    if sort_by_coverage {
        files.sort_by(|a, b| a.line_rate().total_cmp(&b.line_rate()));
    }

    let mut out = String::new();
    writeln!(
        out,
        "{:<60} {:>8} {:>8} {:>8}",
        "FILE", "LINES", "COVERED", "RATE"
    )
    .unwrap();
    writeln!(out, "{}", "-".repeat(88)).unwrap();

    for f in &files {
        writeln!(
            out,
            "{:<60} {:>8} {:>8} {:>7.1}%",
            f.path,
            f.total_lines,
            f.covered_lines,
            f.line_rate() * 100.0
        )
        .unwrap();
    }

    writeln!(out, "{}", "-".repeat(88)).unwrap();
    writeln!(
        out,
        "Files: {}  Lines: {}/{} ({:.1}%)",
        summary.total_files,
        summary.covered_lines,
        summary.total_lines,
        summary.line_rate() * 100.0
    )
    .unwrap();
    Ok(out)
}

pub fn cmd_lines(coverage_file: &Path, source_file: &str, uncovered: bool) -> Result<String> {
    let coverage = load(coverage_file, false)?;
    let lines = coverage
        .get(source_file)
        .with_context(|| format!("No coverage data for '{source_file}'"))?;

    if uncovered {
        let missed: Vec<u32> = lines
            .iter()
            .enumerate()
            .filter(|(_, hits)| **hits == Some(0))
            .map(|(idx, _)| idx as u32 + 1)
            .collect();

        if missed.is_empty() {
            return Ok(format!(
                "All instrumentable lines are covered in '{source_file}'\n"
            ));
        }

        let mut out = String::new();
        writeln!(out, "Uncovered lines in '{source_file}':").unwrap();
        writeln!(out, "  {}", format_line_ranges(&missed)).unwrap();
        writeln!(out, "  ({} lines)", missed.len()).unwrap();
        Ok(out)
    } else {
        let mut out = String::new();
        writeln!(out, "{:>6}  {:>10}", "LINE", "HITS").unwrap();
        writeln!(out, "{}", "-".repeat(18)).unwrap();
        for (idx, hits) in lines.iter().enumerate() {
            if let Some(hits) = hits {
                let marker = if *hits > 0 { "✓" } else { "✗" };
                writeln!(out, "{:>6}  {:>10}  {}", idx + 1, hits, marker).unwrap();
            }
        }
        Ok(out)
    }
}

/// Format sorted line numbers into compact range notation, e.g. "1, 3-5, 8".
#[must_use]
pub fn format_line_ranges(lines: &[u32]) -> String {
    let mut ranges: Vec<(u32, u32)> = Vec::new();
    for &line in lines {
        match ranges.last_mut() {
            Some((_, end)) if line == *end + 1 => *end = line,
            _ => ranges.push((line, line)),
        }
    }

    ranges
        .iter()
        .map(|&(start, end)| {
            if start == end {
                start.to_string()
            } else {
                format!("{start}-{end}")
            }
        })
        .collect::<Vec<_>>()
        .join(", ")
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;

    use super::*;
    use crate::error;

    const SAMPLE: &str = "file:src/main.sl\nlcount:1,5\nlcount:2,3\nlcount:3,0\nlcount:4,0\n\
                          file:src/lib.sl\nlcount:1,10\nlcount:3,10\n";

    fn write_sample(dir: &Path) -> std::path::PathBuf {
        let path = dir.join("coverage.gcov");
        std::fs::write(&path, SAMPLE).unwrap();
        path
    }

    #[derive(Default)]
    struct CapturingTransport {
        fields: RefCell<Vec<String>>,
    }

    impl Transport for CapturingTransport {
        fn send_form_field(&self, field: &str, _: &str, _: &[u8]) -> error::Result<()> {
            self.fields.borrow_mut().push(field.to_string());
            Ok(())
        }
    }

    #[test]
    fn test_format_line_ranges() {
        assert_eq!(format_line_ranges(&[]), "");
        assert_eq!(format_line_ranges(&[5]), "5");
        assert_eq!(format_line_ranges(&[1, 3, 4, 5, 10]), "1, 3-5, 10");
    }

    #[test]
    fn test_cmd_summary() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_sample(dir.path());

        let out = cmd_summary(&path, false).unwrap();

        assert!(out.contains("src/main.sl"));
        assert!(out.contains("src/lib.sl"));
        assert!(out.contains("100.0%"));
        assert!(out.contains("50.0%"));
        assert!(out.contains("Lines: 4/6"));
    }

    #[test]
    fn test_cmd_summary_sorted_by_coverage() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_sample(dir.path());

        let out = cmd_summary(&path, true).unwrap();

        let main_pos = out.find("src/main.sl").unwrap();
        let lib_pos = out.find("src/lib.sl").unwrap();
        assert!(main_pos < lib_pos);
    }

    #[test]
    fn test_cmd_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_sample(dir.path());

        let out = cmd_lines(&path, "src/main.sl", false).unwrap();
        assert!(out.contains("LINE"));
        assert!(out.contains("✓"));
        assert!(out.contains("✗"));

        let out = cmd_lines(&path, "src/main.sl", true).unwrap();
        assert!(out.contains("3-4"));
        assert!(out.contains("(2 lines)"));

        let out = cmd_lines(&path, "src/lib.sl", true).unwrap();
        assert!(out.contains("All instrumentable lines are covered"));

        assert!(cmd_lines(&path, "nope.sl", false).is_err());
    }

    #[test]
    fn test_cmd_merge() {
        let dir = tempfile::tempdir().unwrap();
        let current = dir.path().join("current.gcov");
        let prior = dir.path().join("prior.gcov");
        let into = dir.path().join("merged.gcov");
        std::fs::write(&current, "file:a\nlcount:2,0\nlcount:3,5\n").unwrap();
        std::fs::write(&prior, "file:a\nlcount:2,3\nfile:b\nlcount:1,1\n").unwrap();

        let out = cmd_merge(&current, &prior, &into, false).unwrap();

        assert!(out.contains("2 files"));
        assert_eq!(
            std::fs::read_to_string(&into).unwrap(),
            "file:a\nlcount:2,3\nlcount:3,5\nfile:b\nlcount:1,1\n"
        );
    }

    #[test]
    fn test_cmd_merge_strict_rejects_longer_prior() {
        let dir = tempfile::tempdir().unwrap();
        let current = dir.path().join("current.gcov");
        let prior = dir.path().join("prior.gcov");
        let into = dir.path().join("merged.gcov");
        std::fs::write(&current, "file:a\nlcount:1,1\n").unwrap();
        std::fs::write(&prior, "file:a\nlcount:4,1\n").unwrap();

        assert!(cmd_merge(&current, &prior, &into, true).is_err());
        assert!(!into.exists());

        let out = cmd_merge(&current, &prior, &into, false).unwrap();
        assert!(out.contains("warning:"));
    }

    #[test]
    fn test_cmd_report_prints_json() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("src")).unwrap();
        std::fs::write(dir.path().join("src/main.sl"), "hello").unwrap();
        let path = write_sample(dir.path());

        let out = cmd_report(&path, "tok", ReportConfig::default(), dir.path(), None).unwrap();
        let json: serde_json::Value = serde_json::from_str(&out).unwrap();

        assert_eq!(json["repo_token"], "tok");
        let files = json["source_files"].as_array().unwrap();
        assert_eq!(files.len(), 1);
        assert_eq!(files[0]["name"], "/src/main.sl");
        assert_eq!(files[0]["coverage"], serde_json::json!([5, 3, 0, 0]));
    }

    #[test]
    fn test_cmd_report_uploads() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_sample(dir.path());
        let transport = CapturingTransport::default();

        let out = cmd_report(
            &path,
            "tok",
            ReportConfig::default(),
            dir.path(),
            Some(&transport),
        )
        .unwrap();

        assert!(out.contains("Submitted coverage for 0 of 2 files"));
        assert_eq!(transport.fields.borrow().as_slice(), ["json_file"]);
    }
}
