//! Conversion of solar images to heliocentric coordinates.
//!
//! The regridding itself is done by an external tool, behind
//! [`HelioRegridder`]. This module works out which times of the measurement
//! set the image covers, what the intermediate and output images are called,
//! and drives the tool.

use std::{
    ffi::OsString,
    path::{Path, PathBuf},
    process::Command,
};

use log::{debug, info, trace};
use thiserror::Error;

use crate::{
    marlu::hifitime::{Duration, Epoch},
    table::{CasaTable, TableError},
};

/// Seconds added to both ends of the observed time range.
pub const TIMERANGE_PADDING_S: f64 = 60.0;

/// casacore stores `TIME` as MJD in seconds.
const DAYSEC: f64 = 86400.0;

#[derive(Error, Debug)]
/// Errors that can occur during heliocentric conversion.
pub enum HelioError {
    /// An input doesn't exist.
    #[error("{} does not exist", .path.display())]
    NotFound {
        /// The missing path
        path: PathBuf,
    },

    /// The measurement set has no rows for the field.
    #[error("no times available: {what}")]
    EmptyInput {
        /// what was looked for
        what: String,
    },

    /// The configured command couldn't be split into words.
    #[error("could not parse command {command:?}")]
    BadCommand {
        /// the command line
        command: String,
    },

    /// The external tool couldn't be started.
    #[error("failed to run {program}: {source}")]
    Spawn {
        /// the program
        program: String,
        /// why
        source: std::io::Error,
    },

    /// The external tool failed.
    #[error("{program} exited with {status}: {stderr}")]
    CommandFailed {
        /// the program
        program: String,
        /// its exit status
        status: String,
        /// what it printed to stderr
        stderr: String,
    },

    #[error(transparent)]
    /// Error derived from [`TableError`]
    Table(#[from] TableError),
}

/// Read the times of the rows of the measurement set `ms` observing
/// `field_id`.
///
/// # Errors
///
/// [`HelioError::NotFound`] if the measurement set doesn't exist.
pub fn read_field_times<P: AsRef<Path>>(ms: P, field_id: i32) -> Result<Vec<Epoch>, HelioError> {
    let ms = ms.as_ref();
    let mut main = CasaTable::open_read(ms).map_err(|e| match e {
        TableError::NotFound { path } => HelioError::NotFound { path },
        e => e.into(),
    })?;
    let times: Vec<f64> = main.get_col_as_vec("TIME")?;
    let fields: Vec<i32> = main.get_col_as_vec("FIELD_ID")?;
    let epochs: Vec<Epoch> = times
        .into_iter()
        .zip(fields)
        .filter(|&(_, field)| field == field_id)
        .map(|(time, _)| Epoch::from_mjd_utc(time / DAYSEC))
        .collect();
    trace!(
        "{} rows of {} are in field {field_id}",
        epochs.len(),
        ms.display()
    );
    Ok(epochs)
}

fn fmt_casa_time(epoch: Epoch) -> String {
    let (y, mo, d, h, mi, s, _) = epoch.round(Duration::from_seconds(1.0)).to_gregorian_utc();
    format!("{y:04}/{mo:02}/{d:02}/{h:02}:{mi:02}:{s:02}")
}

/// The CASA timerange `YYYY/MM/DD/HH:MM:SS~YYYY/MM/DD/HH:MM:SS` spanning
/// `times`, padded by [`TIMERANGE_PADDING_S`] on both sides.
///
/// Returns `None` if there are no times.
pub fn casa_timerange(times: &[Epoch]) -> Option<String> {
    let first = times.iter().copied().reduce(|a, b| if b < a { b } else { a })?;
    let last = times.iter().copied().reduce(|a, b| if b > a { b } else { a })?;
    let pad = Duration::from_seconds(TIMERANGE_PADDING_S);
    Some(format!(
        "{}~{}",
        fmt_casa_time(first - pad),
        fmt_casa_time(last + pad)
    ))
}

/// The name of the heliocentric image produced from `image`.
pub fn helio_image_name<P: AsRef<Path>>(image: P) -> PathBuf {
    let mut name: OsString = image.as_ref().as_os_str().to_owned();
    name.push(".helio");
    PathBuf::from(name)
}

/// The name of the CASA image a FITS `image` is imported to.
pub fn temp_image_name<P: AsRef<Path>>(image: P) -> PathBuf {
    let image = image.as_ref();
    let mut name = OsString::from("temp_");
    if let Some(file_name) = image.file_name() {
        name.push(file_name);
    }
    name.push(".image");
    image.with_file_name(name)
}

/// Everything the regridding tool needs to know.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HelioRequest {
    /// the measurement set the image was made from
    pub vis: PathBuf,
    /// the image as given
    pub image: PathBuf,
    /// the CASA image to regrid; differs from `image` if that needs importing
    pub imagefile: PathBuf,
    /// the CASA timerange the image covers
    pub timerange: String,
    /// the output heliocentric FITS image
    pub fitsfile: PathBuf,
}

impl HelioRequest {
    /// Describe the conversion of `image`, made from `vis`, which observed at
    /// `times`.
    ///
    /// A directory `image` is taken to be a CASA image already, anything else
    /// is taken to be FITS which must be imported first.
    ///
    /// # Errors
    ///
    /// [`HelioError::EmptyInput`] if `times` is empty.
    pub fn new<P: AsRef<Path>, Q: AsRef<Path>>(
        vis: P,
        image: Q,
        times: &[Epoch],
    ) -> Result<Self, HelioError> {
        let (vis, image) = (vis.as_ref(), image.as_ref());
        let timerange = casa_timerange(times).ok_or_else(|| HelioError::EmptyInput {
            what: format!("no field 0 rows in {}", vis.display()),
        })?;
        let imagefile = if image.is_dir() {
            image.to_path_buf()
        } else {
            temp_image_name(image)
        };
        Ok(Self {
            vis: vis.to_path_buf(),
            image: image.to_path_buf(),
            imagefile,
            timerange,
            fitsfile: helio_image_name(image),
        })
    }

    /// Whether `image` must be imported to `imagefile` first.
    pub fn needs_import(&self) -> bool {
        self.imagefile != self.image
    }
}

/// Something that can regrid images to heliocentric coordinates.
pub trait HelioRegridder {
    /// Import the FITS image `fitsimage` as the CASA image `imagename`.
    fn import_fits(&self, fitsimage: &Path, imagename: &Path) -> Result<(), HelioError>;

    /// Regrid `request.imagefile` to `request.fitsfile`.
    fn regrid(&self, request: &HelioRequest) -> Result<(), HelioError>;
}

/// A [`HelioRegridder`] that runs external commands, passing their arguments
/// as `key=value` words.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandRegridder {
    /// the import command line, run with `fitsimage=` and `imagename=`
    pub import_command: String,
    /// the regrid command line, run with `vis=`, `imagefile=`, `timerange=`
    /// and `fitsfile=`
    pub regrid_command: String,
}

impl CommandRegridder {
    /// A regridder which runs the given command lines.
    pub fn new(import_command: impl Into<String>, regrid_command: impl Into<String>) -> Self {
        Self {
            import_command: import_command.into(),
            regrid_command: regrid_command.into(),
        }
    }

    fn run(&self, command: &str, args: &[(&str, String)]) -> Result<(), HelioError> {
        let words = shlex::split(command)
            .filter(|w| !w.is_empty())
            .ok_or_else(|| HelioError::BadCommand {
                command: command.to_string(),
            })?;
        let (program, fixed) = words.split_first().ok_or_else(|| HelioError::BadCommand {
            command: command.to_string(),
        })?;
        let mut cmd = Command::new(program);
        cmd.args(fixed);
        for (key, value) in args {
            cmd.arg(format!("{key}={value}"));
        }
        debug!("running {cmd:?}");
        let output = cmd.output().map_err(|source| HelioError::Spawn {
            program: program.clone(),
            source,
        })?;
        if output.status.success() {
            Ok(())
        } else {
            Err(HelioError::CommandFailed {
                program: program.clone(),
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            })
        }
    }
}

impl HelioRegridder for CommandRegridder {
    fn import_fits(&self, fitsimage: &Path, imagename: &Path) -> Result<(), HelioError> {
        self.run(
            &self.import_command,
            &[
                ("fitsimage", fitsimage.display().to_string()),
                ("imagename", imagename.display().to_string()),
            ],
        )
    }

    fn regrid(&self, request: &HelioRequest) -> Result<(), HelioError> {
        self.run(
            &self.regrid_command,
            &[
                ("vis", request.vis.display().to_string()),
                ("imagefile", request.imagefile.display().to_string()),
                ("timerange", request.timerange.clone()),
                ("fitsfile", request.fitsfile.display().to_string()),
            ],
        )
    }
}

/// Carry out `request` with `regridder`, importing the image first if needed.
///
/// # Errors
///
/// Whatever the regridder fails with.
pub fn run_helio_request<R: HelioRegridder + ?Sized>(
    request: &HelioRequest,
    regridder: &R,
) -> Result<PathBuf, HelioError> {
    if request.needs_import() {
        info!(
            "importing {} to {}",
            request.image.display(),
            request.imagefile.display()
        );
        regridder.import_fits(&request.image, &request.imagefile)?;
    }
    info!(
        "regridding {} over {}",
        request.imagefile.display(),
        request.timerange
    );
    regridder.regrid(request)?;
    Ok(request.fitsfile.clone())
}

/// Convert `image`, made from the measurement set `msname`, to heliocentric
/// coordinates, returning the name of the new image.
///
/// # Errors
///
/// - [`HelioError::NotFound`] if the measurement set or image is missing.
/// - [`HelioError::EmptyInput`] if the measurement set has no field 0 rows.
/// - see [`run_helio_request`]
pub fn convert_to_heliocentric_coords<P, Q, R>(
    msname: P,
    image: Q,
    regridder: &R,
) -> Result<PathBuf, HelioError>
where
    P: AsRef<Path>,
    Q: AsRef<Path>,
    R: HelioRegridder + ?Sized,
{
    let image = image.as_ref();
    if !image.exists() {
        return Err(HelioError::NotFound {
            path: image.to_path_buf(),
        });
    }
    let times = read_field_times(msname.as_ref(), 0)?;
    let request = HelioRequest::new(msname, image, &times)?;
    run_helio_request(&request, regridder)
}
