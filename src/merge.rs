//! Merging a freshly folded coverage map with previously persisted data.
//!
//! Merging never loses a known count: every line keeps the larger of the two
//! hit counts, and files present only in the prior data pass through as-is.

use std::fmt;

use tracing::warn;

use crate::error::{CovError, Result};
use crate::model::{raise, CoverageMap, LineHits};

/// A disagreement between the current run and prior data about the shape of
/// a file. The merge still completes; the prior data is kept.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inconsistency {
    /// Prior data covers more lines than the current run allocated.
    PriorLonger {
        file: String,
        prior_len: usize,
        current_len: usize,
    },
    /// Prior data marks a line as a statement that the current run does not.
    StatementVanished { file: String, line: u32 },
}

impl Inconsistency {
    pub fn file(&self) -> &str {
        match self {
            Inconsistency::PriorLonger { file, .. } => file,
            Inconsistency::StatementVanished { file, .. } => file,
        }
    }
}

impl From<Inconsistency> for CovError {
    fn from(value: Inconsistency) -> Self {
        match value {
            Inconsistency::PriorLonger {
                file,
                prior_len,
                current_len,
            } => CovError::InconsistentMerge {
                file,
                prior_len,
                current_len,
            },
            Inconsistency::StatementVanished { file, line } => {
                CovError::StatementVanished { file, line }
            }
        }
    }
}

impl fmt::Display for Inconsistency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Inconsistency::PriorLonger {
                file,
                prior_len,
                current_len,
            } => write!(
                f,
                "{file}: prior data has {prior_len} lines, current run {current_len}"
            ),
            Inconsistency::StatementVanished { file, line } => {
                write!(f, "{file}:{line}: statement missing from current run")
            }
        }
    }
}

/// Result of a merge: the combined coverage plus anything that did not line up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Merged {
    pub coverage: CoverageMap,
    pub inconsistencies: Vec<Inconsistency>,
}

impl Merged {
    pub fn is_consistent(&self) -> bool {
        self.inconsistencies.is_empty()
    }

    /// The merged coverage, or the first inconsistency as an error.
    pub fn into_strict(self) -> Result<CoverageMap> {
        match self.inconsistencies.into_iter().next() {
            Some(first) => Err(first.into()),
            None => Ok(self.coverage),
        }
    }
}

/// Merge `prior` into `current`, keeping the maximum count per line.
pub fn merge(current: CoverageMap, prior: &CoverageMap) -> Merged {
    let mut coverage = current;
    let mut inconsistencies = Vec::new();

    for (file, prior_lines) in prior {
        match coverage.get_mut(file) {
            Some(lines) => merge_lines(file, lines, prior_lines, &mut inconsistencies),
            None => {
                coverage.insert(file.clone(), prior_lines.clone());
            }
        }
    }

    Merged {
        coverage,
        inconsistencies,
    }
}

/// Merge one file's prior array into its current array.
///
/// The set of statements only grows between runs, so `current` is expected
/// to be at least as long as `prior`. When it is not, the array is extended
/// and the extra prior lines are kept. A prior statement line that is empty
/// in `current` also keeps its prior count.
pub fn merge_lines(
    file: &str,
    current: &mut LineHits,
    prior: &[Option<u64>],
    inconsistencies: &mut Vec<Inconsistency>,
) {
    let current_len = current.len();
    if prior.len() > current_len {
        warn!(
            file,
            prior_len = prior.len(),
            current_len,
            "prior coverage is longer than the current run"
        );
        inconsistencies.push(Inconsistency::PriorLonger {
            file: file.to_string(),
            prior_len: prior.len(),
            current_len,
        });
        current.resize(prior.len(), None);
    }

    for (idx, prior_hits) in prior.iter().enumerate() {
        let Some(hits) = *prior_hits else {
            continue;
        };
        let slot = &mut current[idx];
        if slot.is_none() && idx < current_len {
            let line = idx as u32 + 1;
            warn!(file, line, "prior statement missing from current run, keeping prior count");
            inconsistencies.push(Inconsistency::StatementVanished {
                file: file.to_string(),
                line,
            });
        }
        raise(slot, hits);
    }
}
