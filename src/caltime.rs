//! Matching calibration tables to observation times.
//!
//! Self-calibration solutions are written to `caltables/` as
//! `YYYYMMDD_HHMMSS_*.gcal`. For a given measurement set, the solutions
//! closest in time are the ones to apply.

use std::path::{Path, PathBuf};

use glob::glob;
use itertools::Itertools;
use log::{debug, trace};
use thiserror::Error;

use crate::names::{NameError, ObsTimestamp};

/// The default directory that self-calibration tables are written to.
pub const DEFAULT_CALTABLE_DIR: &str = "caltables";

/// The suffix of gain calibration tables.
pub const CALTABLE_SUFFIX: &str = "gcal";

#[derive(Error, Debug)]
/// Errors that can occur when matching calibration times.
pub enum CalTimeError {
    /// No candidate calibration tables were available.
    #[error("no candidates available: {what}")]
    EmptyInput {
        /// A description of where the candidates were looked for
        what: String,
    },

    #[error(transparent)]
    /// Error derived from [`NameError`]
    Name(#[from] NameError),

    #[error(transparent)]
    /// Error derived from [`glob::GlobError`]
    GlobCrate(#[from] glob::GlobError),

    #[error(transparent)]
    /// Error derived from [`glob::PatternError`]
    PatternError(#[from] glob::PatternError),
}

/// The outcome of [`nearest_caltime_with_separation`].
#[derive(Debug, Clone, PartialEq)]
pub struct CalTimeMatch {
    /// The winning `YYYYMMDD_HHMMSS` time string
    pub timestr: String,
    /// The absolute separation from the target in seconds
    pub separation_s: f64,
}

/// Find every `*.gcal` calibration table in `caltable_dir`.
///
/// # Errors
///
/// Can raise [`CalTimeError::PatternError`] if the directory contains glob
/// metacharacters, or [`CalTimeError::GlobCrate`] if a match can't be read.
pub fn find_caltables<P: AsRef<Path>>(caltable_dir: P) -> Result<Vec<PathBuf>, CalTimeError> {
    let pattern = caltable_dir
        .as_ref()
        .join(format!("*.{CALTABLE_SUFFIX}"))
        .display()
        .to_string();
    trace!("globbing {pattern}");
    let mut entries = vec![];
    for entry in glob(&pattern)? {
        entries.push(entry?);
    }
    Ok(entries)
}

/// Select the candidate whose time is closest to that of `target`, returning
/// its `YYYYMMDD_HHMMSS` time string and the separation.
///
/// Candidates are reduced to their unique time strings, sorted ascending, and
/// the first one with the smallest separation wins, so exact ties go to the
/// earliest-sorting time string.
///
/// # Errors
///
/// - [`CalTimeError::Name`] if the target or any candidate is malformed.
/// - [`CalTimeError::EmptyInput`] if there are no candidates.
pub fn nearest_caltime_with_separation<I, S>(
    target: &str,
    candidates: I,
) -> Result<CalTimeMatch, CalTimeError>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let target_time = ObsTimestamp::parse(target)?;

    let times: Vec<ObsTimestamp> = candidates
        .into_iter()
        .map(|c| ObsTimestamp::parse(c.as_ref()))
        .collect::<Result<Vec<_>, _>>()?
        .into_iter()
        .map(|t| (t.to_timestr(), t))
        .sorted_by(|(a, _), (b, _)| a.cmp(b))
        .dedup_by(|(a, _), (b, _)| a == b)
        .map(|(_, t)| t)
        .collect();

    let mut best: Option<(&ObsTimestamp, f64)> = None;
    for time in &times {
        let sep = time.separation_seconds(&target_time);
        debug!("{} is {sep} s from {}", time.to_timestr(), target_time);
        // strictly less, so the first of any equidistant times is kept.
        if best.map_or(true, |(_, best_sep)| sep < best_sep) {
            best = Some((time, sep));
        }
    }

    best.map(|(time, separation_s)| CalTimeMatch {
        timestr: time.to_timestr(),
        separation_s,
    })
    .ok_or_else(|| CalTimeError::EmptyInput {
        what: format!("calibration times for {target}"),
    })
}

/// Select the candidate whose time is closest to that of `target`.
///
/// # Errors
///
/// see [`nearest_caltime_with_separation`]
pub fn nearest_caltime<I, S>(target: &str, candidates: I) -> Result<String, CalTimeError>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    nearest_caltime_with_separation(target, candidates).map(|m| m.timestr)
}

/// Find the time string of the self-calibration tables in `caltable_dir` that
/// are closest in time to the measurement set `msname`.
///
/// # Errors
///
/// - [`CalTimeError::EmptyInput`] if `caltable_dir` holds no `*.gcal` tables.
/// - see [`find_caltables`] and [`nearest_caltime_with_separation`]
pub fn get_selfcal_time_to_apply<P: AsRef<Path>>(
    msname: &str,
    caltable_dir: P,
) -> Result<CalTimeMatch, CalTimeError> {
    let caltable_dir = caltable_dir.as_ref();
    let caltables = find_caltables(caltable_dir)?;
    let names: Vec<String> = caltables
        .iter()
        .filter_map(|p| p.file_name())
        .map(|n| n.to_string_lossy().into_owned())
        .collect();
    if names.is_empty() {
        return Err(CalTimeError::EmptyInput {
            what: format!(
                "no *.{CALTABLE_SUFFIX} tables in {}",
                caltable_dir.display()
            ),
        });
    }
    nearest_caltime_with_separation(msname, &names)
}
