//! One measurement run, from loading persisted coverage to writing it back.
//!
//! The executor records statement entries through the session's aggregator
//! while the program runs. At teardown the session folds the counters,
//! merges them with what was persisted before and saves the result.

use std::path::PathBuf;
use std::sync::Arc;

use tracing::info;

use crate::aggregator::CoverageAggregator;
use crate::error::Result;
use crate::gcov::{self, ReadOptions};
use crate::merge::{merge, Merged};
use crate::model::{CoverageMap, SourceLocation};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    /// Persisted coverage file, read at open and written at finish.
    pub output: Option<PathBuf>,
    /// Merge the current run with the persisted data.
    pub merge_prior: bool,
    /// Turn duplicate records and merge inconsistencies into errors.
    pub strict: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            output: None,
            merge_prior: true,
            strict: false,
        }
    }
}

pub struct Session {
    config: SessionConfig,
    aggregator: Arc<CoverageAggregator>,
    prior: CoverageMap,
}

impl Session {
    /// Start a session, loading prior coverage when the output file exists.
    pub fn open(config: SessionConfig) -> Result<Self> {
        let prior = match &config.output {
            Some(path) if config.merge_prior && path.exists() => {
                let prior = gcov::load(
                    path,
                    ReadOptions {
                        strict: config.strict,
                    },
                )?;
                info!(path = %path.display(), files = prior.len(), "loaded prior coverage");
                prior
            }
            _ => CoverageMap::new(),
        };

        Ok(Self {
            config,
            aggregator: Arc::new(CoverageAggregator::new()),
            prior,
        })
    }

    /// The counter store, shareable with executor threads.
    pub fn aggregator(&self) -> &Arc<CoverageAggregator> {
        &self.aggregator
    }

    pub fn prior(&self) -> &CoverageMap {
        &self.prior
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn record_entry(&self, location: &SourceLocation) {
        self.aggregator.record_entry(location);
    }

    /// Fold the counters and merge them with the prior coverage, without
    /// persisting anything.
    pub fn coverage<'a, I, F>(&self, never_executed: I, line_count: F) -> Merged
    where
        I: IntoIterator<Item = &'a SourceLocation>,
        F: Fn(&str) -> u32,
    {
        let folded = self.aggregator.fold(never_executed, line_count);
        for skipped in &folded.skipped {
            info!(%skipped, "not persisted");
        }
        merge(folded.coverage, &self.prior)
    }

    /// End the session: fold, merge and save to the output file if one is
    /// configured.
    pub fn finish<'a, I, F>(self, never_executed: I, line_count: F) -> Result<Merged>
    where
        I: IntoIterator<Item = &'a SourceLocation>,
        F: Fn(&str) -> u32,
    {
        let merged = self.coverage(never_executed, line_count);

        if self.config.strict {
            if let Some(first) = merged.inconsistencies.first() {
                return Err(first.clone().into());
            }
        }

        if let Some(path) = &self.config.output {
            gcov::save(path, &merged.coverage)?;
            info!(
                path = %path.display(),
                files = merged.coverage.len(),
                "saved coverage"
            );
        }

        Ok(merged)
    }
}
