//! The bright radio sources that dominate the low-frequency sky.

use lazy_static::lazy_static;
use regex::Regex;
use thiserror::Error;

use crate::marlu::RADec;

lazy_static! {
    static ref RE_POSITION: Regex = Regex::new(
        r"^J2000\s+(?P<rh>\d+)h(?P<rm>\d+)m(?P<rs>\d+(?:\.\d*)?)s\s+(?P<sign>[+-]?)(?P<dd>\d+)d(?P<dm>\d+)m(?P<ds>\d+(?:\.\d*)?)s$"
    )
    .unwrap();
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
/// Errors that can occur when handling source positions.
pub enum SourceError {
    /// The position isn't `J2000 <h>h<m>m<s>s <±d>d<m>m<s>s`.
    #[error("malformed position {identifier:?}: {reason}")]
    MalformedIdentifier {
        /// The position string
        identifier: String,
        /// What was wrong with it
        reason: String,
    },
}

/// A bright source, with a power-law spectrum.
#[derive(Debug, Clone, PartialEq)]
pub struct BrightSource {
    /// the usual short name, e.g. `CasA`
    pub label: &'static str,
    /// J2000 sexagesimal position
    pub position: &'static str,
    /// reference flux density in Jy
    pub flux_jy: f64,
    /// spectral index
    pub spectral_index: f64,
}

impl BrightSource {
    /// Parse [`BrightSource::position`].
    ///
    /// # Errors
    ///
    /// see [`parse_j2000_position`]
    pub fn radec(&self) -> Result<RADec, SourceError> {
        parse_j2000_position(self.position)
    }
}

/// The brightest sources of the northern low-frequency sky.
pub fn get_strong_source_list() -> Vec<BrightSource> {
    vec![
        BrightSource {
            label: "CasA",
            position: "J2000 23h23m24s +58d48m54s",
            flux_jy: 16530.0,
            spectral_index: -0.72,
        },
        BrightSource {
            label: "CygA",
            position: "J2000 19h59m28.35663s +40d44m02.0970s",
            flux_jy: 16300.0,
            spectral_index: -0.58,
        },
        BrightSource {
            label: "TauA",
            position: "J2000 05h34m31.94s +22d00m52.2s",
            flux_jy: 1770.0,
            spectral_index: -0.27,
        },
        BrightSource {
            label: "VirA",
            position: "J2000 12h30m49.42338s +12d23m28.0439s",
            flux_jy: 2400.0,
            spectral_index: -0.86,
        },
    ]
}

/// Parse a `J2000 <h>h<m>m<s>s <±d>d<m>m<s>s` position.
///
/// # Errors
///
/// [`SourceError::MalformedIdentifier`] if the grammar doesn't match or a
/// component is out of range.
pub fn parse_j2000_position(position: &str) -> Result<RADec, SourceError> {
    let malformed = |reason: &str| SourceError::MalformedIdentifier {
        identifier: position.to_string(),
        reason: reason.to_string(),
    };
    let caps = RE_POSITION
        .captures(position.trim())
        .ok_or_else(|| malformed("expected J2000 <h>h<m>m<s>s <±d>d<m>m<s>s"))?;
    let num = |name: &str| -> Result<f64, SourceError> {
        caps[name]
            .parse::<f64>()
            .map_err(|_| malformed(&format!("bad {name}")))
    };

    let (rh, rm, rs) = (num("rh")?, num("rm")?, num("rs")?);
    let (dd, dm, ds) = (num("dd")?, num("dm")?, num("ds")?);
    if rh >= 24.0 || rm >= 60.0 || rs >= 60.0 {
        return Err(malformed("right ascension out of range"));
    }
    if dd > 90.0 || dm >= 60.0 || ds >= 60.0 {
        return Err(malformed("declination out of range"));
    }

    let ra_deg = 15.0 * (rh + rm / 60.0 + rs / 3600.0);
    let sign = if &caps["sign"] == "-" { -1.0 } else { 1.0 };
    let dec_deg = sign * (dd + dm / 60.0 + ds / 3600.0);
    if dec_deg.abs() > 90.0 {
        return Err(malformed("declination out of range"));
    }
    Ok(RADec::new(ra_deg.to_radians(), dec_deg.to_radians()))
}
