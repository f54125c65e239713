//! Uniform in-memory representation of statement coverage. The aggregator
//! produces a `CoverageMap`, the merger combines two of them, and the codec
//! and report builder consume one.

use std::collections::btree_map;
use std::collections::BTreeMap;
use std::fmt;

/// Compute a coverage rate, returning 0.0 when the total is zero.
#[must_use]
pub fn rate(covered: u64, total: u64) -> f64 {
    if total == 0 {
        0.0
    } else {
        covered as f64 / total as f64
    }
}

/// A single instrumentable statement: the file it lives in and its 1-based
/// start line. Two statements starting on the same line share a location.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SourceLocation {
    pub file: String,
    pub line: u32,
}

impl SourceLocation {
    pub fn new(file: impl Into<String>, line: u32) -> Self {
        Self {
            file: file.into(),
            line,
        }
    }
}

impl fmt::Display for SourceLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.file, self.line)
    }
}

/// Per-line hit counts for one file, indexed by `line - 1`.
///
/// `None` means the line holds no statement, `Some(0)` a statement that never
/// ran. The length is the file's line count and is never inferred from the
/// data, so trailing `None`s are significant.
pub type LineHits = Vec<Option<u64>>;

/// Raise `slot` to `value`, treating an empty slot as lower than any count.
pub(crate) fn raise(slot: &mut Option<u64>, value: u64) {
    *slot = Some(slot.map_or(value, |current| current.max(value)));
}

/// Coverage arrays keyed by file identity (path, or name for virtual sources).
///
/// Iteration is ordered by file key so that serialized output is stable.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CoverageMap {
    files: BTreeMap<String, LineHits>,
}

impl CoverageMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, file: impl Into<String>, lines: LineHits) -> Option<LineHits> {
        self.files.insert(file.into(), lines)
    }

    pub fn get(&self, file: &str) -> Option<&LineHits> {
        self.files.get(file)
    }

    pub fn get_mut(&mut self, file: &str) -> Option<&mut LineHits> {
        self.files.get_mut(file)
    }

    pub fn remove(&mut self, file: &str) -> Option<LineHits> {
        self.files.remove(file)
    }

    pub fn contains(&self, file: &str) -> bool {
        self.files.contains_key(file)
    }

    pub(crate) fn entry(&mut self, file: String) -> btree_map::Entry<'_, String, LineHits> {
        self.files.entry(file)
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    pub fn iter(&self) -> btree_map::Iter<'_, String, LineHits> {
        self.files.iter()
    }

    /// Statement and hit totals for every file, in iteration order.
    pub fn file_summaries(&self) -> Vec<FileSummary> {
        self.iter()
            .map(|(path, lines)| FileSummary::from_lines(path, lines))
            .collect()
    }

    /// Statement and hit totals across all files.
    pub fn summary(&self) -> CoverageSummary {
        let mut summary = CoverageSummary {
            total_files: self.files.len() as u64,
            total_lines: 0,
            covered_lines: 0,
        };
        for file in self.file_summaries() {
            summary.total_lines += file.total_lines;
            summary.covered_lines += file.covered_lines;
        }
        summary
    }
}

impl FromIterator<(String, LineHits)> for CoverageMap {
    fn from_iter<I: IntoIterator<Item = (String, LineHits)>>(iter: I) -> Self {
        Self {
            files: iter.into_iter().collect(),
        }
    }
}

impl IntoIterator for CoverageMap {
    type Item = (String, LineHits);
    type IntoIter = btree_map::IntoIter<String, LineHits>;

    fn into_iter(self) -> Self::IntoIter {
        self.files.into_iter()
    }
}

impl<'a> IntoIterator for &'a CoverageMap {
    type Item = (&'a String, &'a LineHits);
    type IntoIter = btree_map::Iter<'a, String, LineHits>;

    fn into_iter(self) -> Self::IntoIter {
        self.files.iter()
    }
}

/// Summary stats across all files of a coverage map.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoverageSummary {
    pub total_files: u64,
    /// Lines holding at least one statement.
    pub total_lines: u64,
    /// Statement lines executed at least once.
    pub covered_lines: u64,
}

impl CoverageSummary {
    #[must_use]
    pub fn line_rate(&self) -> f64 {
        rate(self.covered_lines, self.total_lines)
    }
}

/// Per-file summary row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileSummary {
    pub path: String,
    pub total_lines: u64,
    pub covered_lines: u64,
    /// 1-based numbers of statement lines that never ran.
    pub missed_lines: Vec<u32>,
}

impl FileSummary {
    fn from_lines(path: &str, lines: &[Option<u64>]) -> Self {
        let mut total_lines = 0;
        let mut covered_lines = 0;
        let mut missed_lines = Vec::new();
        for (idx, hits) in lines.iter().enumerate() {
            match hits {
                Some(0) => {
                    total_lines += 1;
                    missed_lines.push(idx as u32 + 1);
                }
                Some(_) => {
                    total_lines += 1;
                    covered_lines += 1;
                }
                None => {}
            }
        }
        Self {
            path: path.to_string(),
            total_lines,
            covered_lines,
            missed_lines,
        }
    }

    #[must_use]
    pub fn line_rate(&self) -> f64 {
        rate(self.covered_lines, self.total_lines)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_raise_empty_slot() {
        let mut slot = None;
        raise(&mut slot, 0);
        assert_eq!(slot, Some(0));
    }

    #[test]
    fn test_raise_keeps_maximum() {
        let mut slot = Some(7);
        raise(&mut slot, 3);
        assert_eq!(slot, Some(7));
        raise(&mut slot, 9);
        assert_eq!(slot, Some(9));
    }

    #[test]
    fn test_summary() {
        let mut map = CoverageMap::new();
        map.insert("a.sl", vec![None, Some(0), Some(4)]);
        map.insert("b.sl", vec![Some(1), None]);

        let summary = map.summary();
        assert_eq!(summary.total_files, 2);
        assert_eq!(summary.total_lines, 3);
        assert_eq!(summary.covered_lines, 2);
        assert!((summary.line_rate() - 2.0 / 3.0).abs() < 1e-9);

        let files = map.file_summaries();
        assert_eq!(files[0].path, "a.sl");
        assert_eq!(files[0].missed_lines, vec![2]);
        assert_eq!(files[1].line_rate(), 1.0);
    }

    #[test]
    fn test_rate_zero_total() {
        assert_eq!(rate(0, 0), 0.0);
    }

    #[test]
    fn test_location_display() {
        assert_eq!(SourceLocation::new("test.sl", 9).to_string(), "test.sl:9");
    }
}
