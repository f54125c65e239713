//! Coverage submission payload for the Coveralls jobs API.
//!
//! The builder walks a merged coverage map, keeps the files that exist on
//! disk (and, by default, live under the project root), digests their
//! current contents and assembles the JSON object the service expects.

use std::collections::BTreeMap;
use std::fs;
use std::io::{self, Read};
use std::path::{Component, Path, PathBuf, MAIN_SEPARATOR};

use clap::ValueEnum;
use md5::{Digest, Md5};
use serde::Serialize;
use tracing::{debug, warn};

use crate::error::{CovError, Result};
use crate::model::CoverageMap;

pub const DEFAULT_SERVICE_NAME: &str = "travis-ci";

/// How source files are named in the payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum PathMode {
    /// Only files under the project root, named relative to it with a
    /// leading separator (e.g. `/src/lib.sl`).
    #[default]
    Relative,
    /// Every existing file, named by its normalized absolute path.
    Absolute,
}

/// Environment variables holding CI job metadata.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CiEnv {
    pub job_id_var: String,
    pub pull_request_var: String,
}

impl Default for CiEnv {
    fn default() -> Self {
        Self {
            job_id_var: "TRAVIS_JOB_ID".to_string(),
            pull_request_var: "TRAVIS_PULL_REQUEST".to_string(),
        }
    }
}

impl CiEnv {
    /// Read the CI metadata from the process environment.
    pub fn metadata(&self) -> BTreeMap<String, String> {
        self.metadata_from(|var| std::env::var(var).ok())
    }

    /// Resolve the CI metadata through `lookup`. Unset variables are left
    /// out of the result.
    pub fn metadata_from(&self, lookup: impl Fn(&str) -> Option<String>) -> BTreeMap<String, String> {
        let mut metadata = BTreeMap::new();
        if let Some(job_id) = lookup(&self.job_id_var) {
            metadata.insert("service_job_id".to_string(), job_id);
        }
        if let Some(pull_request) = lookup(&self.pull_request_var) {
            metadata.insert("service_pull_request".to_string(), pull_request);
        }
        metadata
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReportConfig {
    pub service_name: String,
    pub path_mode: PathMode,
    /// Attach CI job metadata to the payload.
    pub include_ci: bool,
    pub ci_env: CiEnv,
}

impl Default for ReportConfig {
    fn default() -> Self {
        Self {
            service_name: DEFAULT_SERVICE_NAME.to_string(),
            path_mode: PathMode::default(),
            include_ci: false,
            ci_env: CiEnv::default(),
        }
    }
}

/// The JSON object posted to the reporting service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReportPayload {
    pub repo_token: String,
    pub service_name: String,
    /// `service_job_id` / `service_pull_request`, when CI data is enabled.
    #[serde(flatten)]
    pub ci: BTreeMap<String, String>,
    pub source_files: Vec<SourceFileEntry>,
}

impl ReportPayload {
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SourceFileEntry {
    pub name: String,
    /// Lowercase hex MD5 of the file contents at report time.
    pub source_digest: String,
    /// One element per source line; `null` for lines without statements.
    pub coverage: Vec<Option<i64>>,
}

/// Access to the source files named in a coverage map.
pub trait SourceFs {
    /// Resolve a coverage file key to the absolute path of an existing
    /// regular file. Relative keys are taken relative to `cwd`.
    fn resolve(&self, file: &str, cwd: &Path) -> Option<PathBuf>;

    /// Open a resolved file for reading.
    fn open(&self, path: &Path) -> io::Result<Box<dyn Read>>;
}

/// The local file system.
pub struct LocalFs;

impl SourceFs for LocalFs {
    fn resolve(&self, file: &str, cwd: &Path) -> Option<PathBuf> {
        let path = cwd.join(file);
        path.is_file().then_some(path)
    }

    fn open(&self, path: &Path) -> io::Result<Box<dyn Read>> {
        Ok(Box::new(fs::File::open(path)?))
    }
}

pub struct ReportBuilder {
    config: ReportConfig,
    ci: BTreeMap<String, String>,
}

impl ReportBuilder {
    /// Create a builder. CI metadata is read from the environment now when
    /// the config opts in.
    pub fn new(config: ReportConfig) -> Self {
        let ci = if config.include_ci {
            config.ci_env.metadata()
        } else {
            BTreeMap::new()
        };
        Self { config, ci }
    }

    /// Replace the CI metadata. Ignored unless the config opts in.
    #[must_use]
    pub fn with_ci_metadata(mut self, ci: BTreeMap<String, String>) -> Self {
        self.ci = ci;
        self
    }

    pub fn config(&self) -> &ReportConfig {
        &self.config
    }

    /// Build the payload for `coverage`.
    ///
    /// Files that do not exist (virtual or inline sources) and, in
    /// [`PathMode::Relative`], files outside `cwd` are left out. An I/O error
    /// while digesting an included file fails the whole build.
    pub fn build(
        &self,
        token: &str,
        coverage: &CoverageMap,
        fs: &dyn SourceFs,
        cwd: &Path,
    ) -> Result<ReportPayload> {
        let root = normalize(&std::path::absolute(cwd)?);
        let mut source_files = Vec::new();

        for (file, lines) in coverage {
            let Some(resolved) = fs.resolve(file, &root) else {
                debug!(file = %file, "not a regular file, excluded from report");
                continue;
            };
            let path = normalize(&resolved);

            let name = match self.config.path_mode {
                PathMode::Relative => match path.strip_prefix(&root) {
                    Ok(relative) => format!("{MAIN_SEPARATOR}{}", relative.display()),
                    Err(_) => {
                        debug!(path = %path.display(), "outside project root, excluded from report");
                        continue;
                    }
                },
                PathMode::Absolute => path.display().to_string(),
            };

            let source_digest = digest(fs, &path)?;
            source_files.push(SourceFileEntry {
                name,
                source_digest,
                coverage: lines.iter().map(|hits| hits.map(to_report_count)).collect(),
            });
        }

        debug!(
            files = source_files.len(),
            skipped = coverage.len() - source_files.len(),
            "built coverage report"
        );

        let ci = if self.config.include_ci {
            self.ci.clone()
        } else {
            BTreeMap::new()
        };

        Ok(ReportPayload {
            repo_token: token.to_string(),
            service_name: self.config.service_name.clone(),
            ci,
            source_files,
        })
    }
}

/// MD5 of a file's current contents as 32 lowercase hex characters.
pub fn digest(fs: &dyn SourceFs, path: &Path) -> Result<String> {
    let failure = |source| CovError::DigestFailure {
        path: path.to_path_buf(),
        source,
    };
    let mut reader = fs.open(path).map_err(failure)?;
    let mut hasher = Md5::new();
    io::copy(&mut reader, &mut hasher).map_err(failure)?;
    Ok(format!("{:x}", hasher.finalize()))
}

fn to_report_count(hits: u64) -> i64 {
    i64::try_from(hits).unwrap_or_else(|_| {
        warn!(hits, "hit count exceeds the report range, clamping");
        i64::MAX
    })
}

/// Lexically normalize a path: drop `.` components and fold `..` into the
/// preceding component. Symlinks are not resolved.
pub fn normalize(path: &Path) -> PathBuf {
    let mut normalized = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if !normalized.pop() {
                    normalized.push(component);
                }
            }
            other => normalized.push(other),
        }
    }
    normalized
}
