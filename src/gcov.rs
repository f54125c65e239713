/// Reader and writer for the persisted line-count format.
///
/// Records, one per line:
///   file:<path>
///   lcount:<line number>,<hit count>
///
/// Every `lcount` belongs to the closest preceding `file`. A later `file`
/// record for a path already read replaces that path's earlier block.
/// Only statement
/// lines are written, so a file's array is sized by its highest recorded
/// line when read back: trailing non-statement lines do not survive a
/// write/read cycle.
use std::collections::BTreeMap;
use std::fs;
use std::io::{self, BufRead, Write};
use std::path::Path;
use std::sync::LazyLock;

use regex::Regex;
use tempfile::NamedTempFile;
use tracing::debug;

use crate::error::{CovError, Result};
use crate::model::CoverageMap;

const FILE_MARK: &str = "file:";
const LINE_MARK: &str = "lcount:";

/// Largest line number accepted in an `lcount` record.
pub const MAX_LINE_NUMBER: u32 = 1 << 24;

/// Pre-compiled regex for the payload of an `lcount:` record.
static LCOUNT_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^(\d+),(\d+)$").unwrap());

/// Options for reading persisted coverage.
#[derive(Debug, Clone, Copy, Default)]
pub struct ReadOptions {
    /// Reject a second `lcount` for the same line of a file instead of
    /// letting the last one win.
    pub strict: bool,
}

/// Serialize coverage into the line-count format.
pub fn write(coverage: &CoverageMap) -> String {
    let mut out = Vec::new();
    // Writing into a Vec cannot fail.
    let _ = write_to(coverage, &mut out);
    String::from_utf8_lossy(&out).into_owned()
}

/// Stream coverage in the line-count format into `out`.
pub fn write_to<W: Write>(coverage: &CoverageMap, out: &mut W) -> io::Result<()> {
    for (path, lines) in coverage {
        writeln!(out, "{FILE_MARK}{path}")?;
        for (idx, hits) in lines.iter().enumerate() {
            if let Some(hits) = hits {
                writeln!(out, "{LINE_MARK}{},{hits}", idx + 1)?;
            }
        }
    }
    Ok(())
}

/// Parse line-count text with default (last write wins) options.
pub fn read(text: &str) -> Result<CoverageMap> {
    read_with(text, ReadOptions::default())
}

pub fn read_with(text: &str, options: ReadOptions) -> Result<CoverageMap> {
    read_from(&mut text.as_bytes(), options)
}

/// Parse line-count records from a buffered reader, one line at a time.
pub fn read_from(reader: &mut dyn BufRead, options: ReadOptions) -> Result<CoverageMap> {
    // path -> (line number -> hits), finalized into arrays at EOF
    let mut files: BTreeMap<String, BTreeMap<u32, u64>> = BTreeMap::new();
    let mut current_file: Option<String> = None;

    let mut raw_line = String::new();
    let mut line_number = 0;
    loop {
        raw_line.clear();
        let n = reader.read_line(&mut raw_line)?;
        if n == 0 {
            break; // EOF
        }
        line_number += 1;

        let line = raw_line.trim_end_matches(['\n', '\r']);
        if line.is_empty() {
            continue;
        }

        let malformed = || CovError::MalformedRecord {
            line_number,
            line: line.to_string(),
        };

        if let Some(path) = line.strip_prefix(FILE_MARK) {
            files.insert(path.to_string(), BTreeMap::new());
            current_file = Some(path.to_string());
        } else if let Some(value) = line.strip_prefix(LINE_MARK) {
            // An lcount before any file record has nowhere to go.
            let file = current_file.as_ref().ok_or_else(malformed)?;
            let caps = LCOUNT_RE.captures(value).ok_or_else(malformed)?;
            let line_no: u32 = caps[1].parse().map_err(|_| malformed())?;
            let hits: u64 = caps[2].parse().map_err(|_| malformed())?;
            if line_no == 0 || line_no > MAX_LINE_NUMBER {
                return Err(malformed());
            }

            let counts = files.entry(file.clone()).or_default();
            if counts.insert(line_no, hits).is_some() && options.strict {
                return Err(CovError::DuplicateLineMark {
                    file: file.clone(),
                    line: line_no,
                });
            }
        } else {
            return Err(malformed());
        }
    }

    let coverage: CoverageMap = files
        .into_iter()
        .map(|(path, counts)| {
            let len = counts.keys().next_back().copied().unwrap_or(0) as usize;
            let mut lines = vec![None; len];
            for (line_no, hits) in counts {
                lines[line_no as usize - 1] = Some(hits);
            }
            (path, lines)
        })
        .collect();

    Ok(coverage)
}

/// Read a persisted coverage file.
pub fn load(path: &Path, options: ReadOptions) -> Result<CoverageMap> {
    let file = fs::File::open(path)?;
    let coverage = read_from(&mut io::BufReader::new(file), options)?;
    debug!(path = %path.display(), files = coverage.len(), "loaded persisted coverage");
    Ok(coverage)
}

/// Persist coverage to `path`, replacing it atomically: the data is written
/// to a temporary file in the same directory which is then renamed over the
/// target. The temporary file is removed if any step fails.
pub fn save(path: &Path, coverage: &CoverageMap) -> Result<()> {
    if path.file_name().is_none() {
        return Err(CovError::Other(format!(
            "Invalid output path: {}",
            path.display()
        )));
    }
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };

    let mut tmp = NamedTempFile::new_in(dir)?;
    {
        let mut out = io::BufWriter::new(tmp.as_file_mut());
        write_to(coverage, &mut out)?;
        out.flush()?;
    }
    tmp.persist(path).map_err(|e| e.error)?;

    debug!(path = %path.display(), files = coverage.len(), "saved coverage");
    Ok(())
}
