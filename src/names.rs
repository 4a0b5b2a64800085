//! Parsing of the observation names used throughout the pipeline.
//!
//! Measurement sets are named `YYYYMMDD_HHMMSS_<freq>MHz.ms`, and calibration
//! tables are prefixed with the same `YYYYMMDD_HHMMSS` time string. These are
//! parsed with a strict grammar; anything that deviates is rejected with a
//! [`NameError`] that names the offending identifier.

use std::{fmt::Display, path::Path};

use lazy_static::lazy_static;
use regex::Regex;
use thiserror::Error;

use crate::marlu::hifitime::Epoch;

lazy_static! {
    // the date and time must be the first two underscore-separated segments,
    // anything after a further underscore is ignored.
    static ref RE_TIMESTR: Regex =
        Regex::new(r"^(?P<date>[0-9]{8})_(?P<time>[0-9]{6})(?:_.*)?$").unwrap();

    static ref RE_MS_NAME: Regex =
        Regex::new(r"^(?P<date>[0-9]{8})_(?P<time>[0-9]{6})_(?P<freq>[0-9]+)MHz\.ms$").unwrap();
}

/// The suffix of every measurement set produced by the correlator.
pub const MS_SUFFIX: &str = "MHz.ms";

#[derive(Error, Debug, Clone, PartialEq, Eq)]
/// Errors that can occur when parsing observation names.
pub enum NameError {
    /// The identifier doesn't follow the expected grammar.
    #[error("malformed identifier {identifier:?}: {reason}")]
    MalformedIdentifier {
        /// The identifier which could not be parsed
        identifier: String,
        /// What was wrong with it
        reason: String,
    },
}

impl NameError {
    fn malformed(identifier: &str, reason: impl Into<String>) -> Self {
        Self::MalformedIdentifier {
            identifier: identifier.to_string(),
            reason: reason.into(),
        }
    }
}

/// A UTC instant parsed from the `YYYYMMDD_HHMMSS` prefix of a name.
///
/// The calendar components are retained so that [`ObsTimestamp::to_timestr`]
/// reproduces the prefix exactly.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ObsTimestamp {
    /// Gregorian year
    pub year: i32,
    /// month, 1-12
    pub month: u8,
    /// day of the month, 1-31
    pub day: u8,
    /// hour, 0-23
    pub hour: u8,
    /// minute, 0-59
    pub minute: u8,
    /// second, 0-59
    pub second: u8,
    /// The corresponding [`Epoch`] in the UTC time scale
    pub epoch: Epoch,
}

impl ObsTimestamp {
    /// Parse the timestamp from a name of the form `YYYYMMDD_HHMMSS[_...]`.
    ///
    /// If `name` is a path, only the file name component is considered.
    ///
    /// # Errors
    ///
    /// Returns [`NameError::MalformedIdentifier`] if the name doesn't start with
    /// an 8 digit date and a 6 digit time, or if those digits don't describe a
    /// valid date and time.
    pub fn parse(name: &str) -> Result<Self, NameError> {
        let basename = file_name_of(name);
        let caps = RE_TIMESTR.captures(basename).ok_or_else(|| {
            NameError::malformed(name, "expected <YYYYMMDD>_<HHMMSS>[_...]")
        })?;
        Self::from_digits(name, &caps["date"], &caps["time"])
    }

    fn from_digits(identifier: &str, date: &str, time: &str) -> Result<Self, NameError> {
        // the regex guarantees these are ascii digits of the right length.
        let num = |s: &str| -> u32 { s.parse().unwrap_or_default() };
        let year = num(&date[0..4]) as i32;
        let month = num(&date[4..6]) as u8;
        let day = num(&date[6..8]) as u8;
        let hour = num(&time[0..2]) as u8;
        let minute = num(&time[2..4]) as u8;
        let second = num(&time[4..6]) as u8;

        if !(1..=12).contains(&month) {
            return Err(NameError::malformed(
                identifier,
                format!("month {month} out of range"),
            ));
        }
        if day == 0 {
            return Err(NameError::malformed(identifier, "day 0 out of range"));
        }
        if hour > 23 || minute > 59 || second > 59 {
            return Err(NameError::malformed(
                identifier,
                format!("time {hour:02}:{minute:02}:{second:02} out of range"),
            ));
        }

        // the length of the month, leap years included, is checked by hifitime.
        let epoch = Epoch::maybe_from_gregorian_utc(year, month, day, hour, minute, second, 0)
            .map_err(|e| {
                NameError::malformed(
                    identifier,
                    format!("{year:04}-{month:02}-{day:02} is not a date: {e:?}"),
                )
            })?;

        Ok(Self {
            year,
            month,
            day,
            hour,
            minute,
            second,
            epoch,
        })
    }

    /// Format as `YYYYMMDD_HHMMSS`, the inverse of [`ObsTimestamp::parse`].
    pub fn to_timestr(&self) -> String {
        format!(
            "{:04}{:02}{:02}_{:02}{:02}{:02}",
            self.year, self.month, self.day, self.hour, self.minute, self.second
        )
    }

    /// Format as an ISO-8601 `YYYY-MM-DDTHH:MM:SS` string.
    pub fn to_isot(&self) -> String {
        format!(
            "{:04}-{:02}-{:02}T{:02}:{:02}:{:02}",
            self.year, self.month, self.day, self.hour, self.minute, self.second
        )
    }

    /// Absolute separation from `other` in seconds.
    pub fn separation_seconds(&self, other: &ObsTimestamp) -> f64 {
        (self.epoch - other.epoch).to_seconds().abs()
    }
}

impl Display for ObsTimestamp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_isot())
    }
}

/// The components of a measurement set name, `YYYYMMDD_HHMMSS_<freq>MHz.ms`.
#[derive(Debug, Clone, PartialEq)]
pub struct MsName {
    /// the observation time
    pub timestamp: ObsTimestamp,
    /// the integer frequency in MHz
    pub freq_mhz: u32,
    /// the frequency digits exactly as they appear in the name
    pub freq_digits: String,
}

impl MsName {
    /// Parse a measurement set file name.
    ///
    /// # Errors
    ///
    /// Returns [`NameError::MalformedIdentifier`] on any deviation from
    /// `YYYYMMDD_HHMMSS_<digits>MHz.ms`.
    pub fn parse(name: &str) -> Result<Self, NameError> {
        let caps = RE_MS_NAME.captures(name).ok_or_else(|| {
            NameError::malformed(name, "expected <YYYYMMDD>_<HHMMSS>_<freq>MHz.ms")
        })?;
        let timestamp = ObsTimestamp::from_digits(name, &caps["date"], &caps["time"])?;
        let freq_mhz = caps["freq"]
            .parse()
            .map_err(|_| NameError::malformed(name, "frequency doesn't fit in 32 bits"))?;
        Ok(Self {
            timestamp,
            freq_mhz,
            freq_digits: caps["freq"].to_string(),
        })
    }

    /// The frequency as it's written in the name, e.g. `55MHz`.
    pub fn freq_str(&self) -> String {
        format!("{}MHz", self.freq_digits)
    }
}

/// Get the observation time encoded in the name of a measurement set or
/// calibration table.
///
/// # Errors
///
/// see [`ObsTimestamp::parse`]
pub fn get_time_from_name(msname: &str) -> Result<Epoch, NameError> {
    ObsTimestamp::parse(msname).map(|t| t.epoch)
}

/// Get the `YYYYMMDD_HHMMSS` time string at the start of a name.
///
/// # Errors
///
/// see [`ObsTimestamp::parse`]
pub fn get_timestr_from_name(msname: &str) -> Result<String, NameError> {
    ObsTimestamp::parse(msname).map(|t| t.to_timestr())
}

fn file_name_of(name: &str) -> &str {
    Path::new(name)
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or(name)
}
