//! Statement execution counters and the fold into per-file line arrays.
//!
//! Counters are recorded from arbitrary executor threads while the program
//! runs. Folding happens once, after measurement has stopped.

use std::collections::btree_map::Entry;
use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use tracing::{debug, warn};

use crate::error::CovError;
use crate::model::{raise, CoverageMap, SourceLocation};

/// Execution count of one statement location.
#[derive(Debug)]
pub struct LineCounter {
    location: SourceLocation,
    hits: AtomicU64,
}

impl LineCounter {
    fn new(location: SourceLocation) -> Self {
        Self {
            location,
            hits: AtomicU64::new(0),
        }
    }

    pub fn location(&self) -> &SourceLocation {
        &self.location
    }

    /// Count one execution of the statement.
    pub fn increment(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }
}

/// Result of a fold: the line arrays plus the files that could not be folded.
#[derive(Debug)]
pub struct Folded {
    pub coverage: CoverageMap,
    /// One [`CovError::UnsupportedLocation`] per skipped file, sorted by file.
    pub skipped: Vec<CovError>,
}

impl Folded {
    pub fn skipped_files(&self) -> impl Iterator<Item = &str> {
        self.skipped.iter().filter_map(|e| match e {
            CovError::UnsupportedLocation { file } => Some(file.as_str()),
            _ => None,
        })
    }
}

/// Owns every statement counter of a measurement run.
///
/// The store is sharded, so concurrent increments of unrelated statements
/// rarely contend, and first-time creation of a location is an atomic
/// insert-if-absent: exactly one counter per location survives.
#[derive(Debug, Default)]
pub struct CoverageAggregator {
    counters: DashMap<SourceLocation, Arc<LineCounter>>,
}

impl CoverageAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the counter for `location`, creating it on first use.
    ///
    /// Executors that instrument a statement once and run it many times
    /// should hold on to the returned handle and call
    /// [`LineCounter::increment`] directly.
    pub fn counter(&self, location: &SourceLocation) -> Arc<LineCounter> {
        if let Some(existing) = self.counters.get(location) {
            return Arc::clone(existing.value());
        }
        let entry = self
            .counters
            .entry(location.clone())
            .or_insert_with(|| Arc::new(LineCounter::new(location.clone())));
        Arc::clone(entry.value())
    }

    /// Record one execution of the statement at `location`.
    pub fn record_entry(&self, location: &SourceLocation) {
        if let Some(counter) = self.counters.get(location) {
            counter.increment();
            return;
        }
        self.counter(location).increment();
    }

    /// Current hit count for `location`, if it was ever entered.
    pub fn hits(&self, location: &SourceLocation) -> Option<u64> {
        self.counters.get(location).map(|c| c.hits())
    }

    /// Number of distinct statement locations entered so far.
    pub fn len(&self) -> usize {
        self.counters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.counters.is_empty()
    }

    /// Copy of every (location, hits) pair, ordered by location.
    pub fn snapshot(&self) -> Vec<(SourceLocation, u64)> {
        let mut snapshot: Vec<_> = self
            .counters
            .iter()
            .map(|entry| (entry.key().clone(), entry.hits()))
            .collect();
        snapshot.sort();
        snapshot
    }

    /// Fold the counters and the statements that never ran into per-file
    /// line arrays.
    ///
    /// `line_count` supplies the total number of lines of a file; it is asked
    /// at most once per file. Files reporting zero lines are skipped and
    /// listed in [`Folded::skipped`].
    /// Executed counts are written first, so a location that is both counted
    /// and listed in `never_executed` keeps its count.
    ///
    /// Must not run concurrently with `record_entry`.
    pub fn fold<'a, I, F>(&self, never_executed: I, line_count: F) -> Folded
    where
        I: IntoIterator<Item = &'a SourceLocation>,
        F: Fn(&str) -> u32,
    {
        let mut map = CoverageMap::new();
        let mut skipped = HashSet::new();

        for (location, hits) in self.snapshot() {
            if let Some(slot) = slot_for(&mut map, &mut skipped, &location, &line_count) {
                raise(slot, hits);
            }
        }

        for location in never_executed {
            if let Some(slot) = slot_for(&mut map, &mut skipped, location, &line_count) {
                if slot.is_none() {
                    *slot = Some(0);
                }
            }
        }

        debug!(
            files = map.len(),
            statements = self.len(),
            "folded statement counters"
        );

        let mut skipped: Vec<String> = skipped.into_iter().collect();
        skipped.sort();
        Folded {
            coverage: map,
            skipped: skipped
                .into_iter()
                .map(|file| CovError::UnsupportedLocation { file })
                .collect(),
        }
    }
}

/// Find the array slot for `location`, allocating the file's array on first
/// sight. Returns `None` for files with no lines and for lines outside the
/// file.
fn slot_for<'m, F>(
    map: &'m mut CoverageMap,
    skipped: &mut HashSet<String>,
    location: &SourceLocation,
    line_count: &F,
) -> Option<&'m mut Option<u64>>
where
    F: Fn(&str) -> u32,
{
    if skipped.contains(&location.file) {
        return None;
    }

    let lines = match map.entry(location.file.clone()) {
        Entry::Occupied(entry) => entry.into_mut(),
        Entry::Vacant(entry) => {
            let count = line_count(&location.file);
            if count == 0 {
                warn!(file = %location.file, "source reports zero lines, skipping");
                skipped.insert(location.file.clone());
                return None;
            }
            entry.insert(vec![None; count as usize])
        }
    };

    let len = lines.len();
    match (location.line as usize).checked_sub(1) {
        Some(idx) if idx < len => Some(&mut lines[idx]),
        _ => {
            warn!(%location, lines = len, "statement outside of its source, ignoring");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn loc(file: &str, line: u32) -> SourceLocation {
        SourceLocation::new(file, line)
    }

    #[test]
    fn test_record_entry_reuses_counter() {
        let agg = CoverageAggregator::new();
        agg.record_entry(&loc("f", 3));
        agg.record_entry(&loc("f", 3));
        agg.record_entry(&loc("f", 4));

        assert_eq!(agg.len(), 2);
        assert_eq!(agg.hits(&loc("f", 3)), Some(2));
        assert_eq!(agg.hits(&loc("f", 4)), Some(1));
        assert_eq!(agg.hits(&loc("f", 5)), None);
    }

    #[test]
    fn test_counter_handle_is_shared() {
        let agg = CoverageAggregator::new();
        let handle = agg.counter(&loc("f", 1));
        handle.increment();
        agg.record_entry(&loc("f", 1));

        assert_eq!(handle.hits(), 2);
        assert_eq!(handle.location(), &loc("f", 1));
        assert!(Arc::ptr_eq(&handle, &agg.counter(&loc("f", 1))));
    }

    #[test]
    fn test_fold_counts_and_never_executed() {
        let agg = CoverageAggregator::new();
        let line9 = loc("f", 9);
        for _ in 0..20 {
            agg.record_entry(&line9);
        }
        let never = [loc("f", 2)];

        let map = agg.fold(&never, |_| 9).coverage;

        let lines = map.get("f").unwrap();
        assert_eq!(lines.len(), 9);
        assert_eq!(lines[1], Some(0));
        assert_eq!(lines[8], Some(20));
        assert_eq!(lines.iter().filter(|l| l.is_none()).count(), 7);
    }

    #[test]
    fn test_fold_counter_wins_over_never_executed() {
        let agg = CoverageAggregator::new();
        agg.record_entry(&loc("f", 1));

        let map = agg.fold(&[loc("f", 1)], |_| 2).coverage;

        assert_eq!(map.get("f").unwrap(), &vec![Some(1), None]);
    }

    #[test]
    fn test_fold_never_executed_only_file() {
        let agg = CoverageAggregator::new();
        let folded = agg.fold(&[loc("g", 2)], |_| 3);
        assert_eq!(folded.coverage.get("g").unwrap(), &vec![None, Some(0), None]);
        assert!(folded.skipped.is_empty());
    }

    #[test]
    fn test_fold_skips_zero_line_file() {
        let agg = CoverageAggregator::new();
        agg.record_entry(&loc("empty", 1));
        agg.record_entry(&loc("real", 1));

        let folded = agg.fold(&[loc("empty", 2)], |file| if file == "empty" { 0 } else { 1 });

        assert!(!folded.coverage.contains("empty"));
        assert_eq!(folded.coverage.get("real").unwrap(), &vec![Some(1)]);
        assert_eq!(folded.skipped_files().collect::<Vec<_>>(), ["empty"]);
        assert!(matches!(
            &folded.skipped[0],
            CovError::UnsupportedLocation { file } if file == "empty"
        ));
    }

    #[test]
    fn test_fold_ignores_out_of_range_lines() {
        let agg = CoverageAggregator::new();
        agg.record_entry(&loc("f", 5));
        agg.record_entry(&loc("f", 0));
        agg.record_entry(&loc("f", 1));

        let map = agg.fold(&[], |_| 2).coverage;

        assert_eq!(map.get("f").unwrap(), &vec![Some(1), None]);
    }

    #[test]
    fn test_fold_asks_line_count_once_per_file() {
        use std::cell::Cell;

        let agg = CoverageAggregator::new();
        for line in 1..=5 {
            agg.record_entry(&loc("f", line));
        }
        let calls = Cell::new(0);

        agg.fold(&[loc("f", 6)], |_| {
            calls.set(calls.get() + 1);
            10
        });

        assert_eq!(calls.get(), 1);
    }

    #[test]
    fn test_fold_is_idempotent() {
        let agg = CoverageAggregator::new();
        agg.record_entry(&loc("a", 1));
        agg.record_entry(&loc("b", 2));
        let never = vec![loc("a", 3), loc("b", 1)];

        let first = agg.fold(&never, |_| 4).coverage;
        let second = agg.fold(&never, |_| 4).coverage;

        assert_eq!(first, second);
    }
}
