//! Methods for managing saved flag versions of measurement sets, and for
//! summarising the flags of calibration solutions.
//!
//! CASA's flag manager keeps named snapshots of an MS's flags beside it, in
//! `<ms>.flagversions/`. The directory holds a `FLAG_VERSION_LIST` text file
//! with one `name : comment` line per version, and a table `flags.<name>` per
//! version holding that snapshot's `FLAG` and `FLAG_ROW` columns.

use std::{
    fs,
    io::Write,
    path::{Path, PathBuf},
};

use log::{debug, info, trace};
use thiserror::Error;

use crate::{
    marlu::ndarray::{Array2, ArrayView2, Axis},
    table::{CasaTable, TableError},
};

/// The name of the file listing the saved flag versions.
pub const FLAG_VERSION_LIST: &str = "FLAG_VERSION_LIST";

#[derive(Error, Debug)]
/// Errors that can occur when managing flags.
pub enum FlagError {
    /// The measurement set or table doesn't exist.
    #[error("{} does not exist", .path.display())]
    NotFound {
        /// The missing path
        path: PathBuf,
    },

    /// There was nothing to operate on.
    #[error("nothing to do: {what}")]
    EmptyInput {
        /// What was missing
        what: String,
    },

    /// The named flag version isn't listed.
    #[error("no flag version named {name:?} for {}", .ms.display())]
    UnknownVersion {
        /// The measurement set
        ms: PathBuf,
        /// The requested version
        name: String,
    },

    /// A flag version table doesn't match the measurement set it belongs to.
    #[error("flag version {name:?} has {version_rows} rows but the measurement set has {ms_rows}")]
    RowMismatch {
        /// The version
        name: String,
        /// Rows in the version table
        version_rows: u64,
        /// Rows in the main table
        ms_rows: u64,
    },

    /// A table's FLAG cells are not all the same shape.
    #[error("FLAG cell in row {row} of {} has shape {shape:?}, expected {expected:?}", .path.display())]
    BadShape {
        /// The table
        path: PathBuf,
        /// The offending row
        row: u64,
        /// its shape
        shape: Vec<usize>,
        /// the shape of the first row
        expected: Vec<usize>,
    },

    #[error(transparent)]
    /// Error derived from [`TableError`]
    Table(#[from] TableError),

    #[error(transparent)]
    /// Error derived from [`std::io::Error`]
    Io(#[from] std::io::Error),
}

/// A saved flag version.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlagVersion {
    /// the version name
    pub name: String,
    /// the free-form comment it was saved with
    pub comment: String,
}

impl FlagVersion {
    fn parse_line(line: &str) -> Option<Self> {
        let line = line.trim();
        if line.is_empty() {
            return None;
        }
        let (name, comment) = match line.split_once(':') {
            Some((name, comment)) => (name.trim(), comment.trim()),
            None => (line, ""),
        };
        Some(Self {
            name: name.to_string(),
            comment: comment.to_string(),
        })
    }
}

/// The flag versions saved for a measurement set, in the order they were
/// saved.
#[derive(Debug, Clone)]
pub struct FlagVersions {
    ms: PathBuf,
    versions: Vec<FlagVersion>,
}

impl FlagVersions {
    /// Read the flag versions saved for the measurement set `ms`.
    ///
    /// An MS with no `.flagversions` directory has no versions.
    ///
    /// # Errors
    ///
    /// [`FlagError::NotFound`] if `ms` doesn't exist.
    pub fn open<P: AsRef<Path>>(ms: P) -> Result<Self, FlagError> {
        let ms = ms.as_ref().to_path_buf();
        if !ms.is_dir() {
            return Err(FlagError::NotFound { path: ms });
        }
        let mut result = Self {
            ms,
            versions: vec![],
        };
        let list = result.list_path();
        if list.is_file() {
            result.versions = fs::read_to_string(&list)?
                .lines()
                .filter_map(FlagVersion::parse_line)
                .collect();
        }
        trace!(
            "{} has {} flag versions",
            result.ms.display(),
            result.versions.len()
        );
        Ok(result)
    }

    /// The directory the versions are saved in.
    pub fn dir(&self) -> PathBuf {
        let mut name = self.ms.as_os_str().to_owned();
        name.push(".flagversions");
        PathBuf::from(name)
    }

    fn list_path(&self) -> PathBuf {
        self.dir().join(FLAG_VERSION_LIST)
    }

    /// The table holding version `name`.
    pub fn table_path(&self, name: &str) -> PathBuf {
        self.dir().join(format!("flags.{name}"))
    }

    /// All versions, oldest first.
    pub fn versions(&self) -> &[FlagVersion] {
        &self.versions
    }

    /// The most recently saved version.
    pub fn latest(&self) -> Option<&FlagVersion> {
        self.versions.last()
    }

    fn check_known(&self, name: &str) -> Result<(), FlagError> {
        if self.versions.iter().any(|v| v.name == name) {
            Ok(())
        } else {
            Err(FlagError::UnknownVersion {
                ms: self.ms.clone(),
                name: name.to_string(),
            })
        }
    }

    /// Replace the `FLAG` and `FLAG_ROW` columns of the measurement set with
    /// those saved in version `name`.
    ///
    /// The whole version is read before anything is written, so a version
    /// that can't be read leaves the measurement set untouched. A failure
    /// while writing can still leave it partly restored.
    ///
    /// # Errors
    ///
    /// - [`FlagError::UnknownVersion`] if `name` isn't listed.
    /// - [`FlagError::RowMismatch`] if the version was saved from a
    ///   measurement set with a different number of rows.
    pub fn restore(&self, name: &str) -> Result<(), FlagError> {
        self.check_known(name)?;
        let mut version = CasaTable::open_read(self.table_path(name))?;
        let mut main = CasaTable::open_write(&self.ms)?;

        let (version_rows, ms_rows) = (version.n_rows(), main.n_rows());
        if version_rows != ms_rows {
            return Err(FlagError::RowMismatch {
                name: name.to_string(),
                version_rows,
                ms_rows,
            });
        }

        let flags = (0..version_rows)
            .map(|row| version.get_cell::<Array2<bool>>("FLAG", row))
            .collect::<Result<Vec<_>, _>>()?;
        let flag_row: Vec<bool> = version.get_col_as_vec("FLAG_ROW")?;

        info!("restoring flag version {name} of {}", self.ms.display());
        for (row, (flag, row_flag)) in (0..ms_rows).zip(flags.iter().zip(flag_row.iter())) {
            main.put_cell("FLAG", row, flag)?;
            main.put_cell("FLAG_ROW", row, row_flag)?;
        }
        Ok(())
    }

    /// Remove version `name`, both its table and its entry in the list.
    ///
    /// # Errors
    ///
    /// [`FlagError::UnknownVersion`] if `name` isn't listed.
    pub fn delete(&mut self, name: &str) -> Result<(), FlagError> {
        self.check_known(name)?;
        let table = self.table_path(name);
        if table.is_dir() {
            fs::remove_dir_all(&table)?;
        }
        self.versions.retain(|v| v.name != name);

        let mut list = fs::File::create(self.list_path())?;
        for version in &self.versions {
            writeln!(list, "{} : {}", version.name, version.comment)?;
        }
        debug!("deleted flag version {name} of {}", self.ms.display());
        Ok(())
    }
}

/// Restore the most recently saved flag version of `ms`, then delete it.
///
/// Returns the name of the version that was restored.
///
/// # Errors
///
/// [`FlagError::EmptyInput`] if there are no saved versions, or see
/// [`FlagVersions::restore`].
pub fn restore_flag<P: AsRef<Path>>(ms: P) -> Result<String, FlagError> {
    let mut versions = FlagVersions::open(ms.as_ref())?;
    let name = match versions.latest() {
        Some(v) => v.name.clone(),
        None => {
            return Err(FlagError::EmptyInput {
                what: format!("no saved flag versions for {}", ms.as_ref().display()),
            })
        }
    };
    versions.restore(&name)?;
    versions.delete(&name)?;
    Ok(name)
}

/// How many solutions in one channel are flagged.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelFlagCount {
    /// flagged solutions
    pub flagged: usize,
    /// all solutions (rows × polarisations)
    pub total: usize,
}

/// Per-channel flag counts of a calibration table.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct FlagSummary {
    /// one count per channel
    pub channels: Vec<ChannelFlagCount>,
}

impl FlagSummary {
    /// The lines that describe this summary, `N flagged out of M`, with an
    /// ` in channel i` suffix if there's more than one channel.
    pub fn lines(&self) -> Vec<String> {
        let single = self.channels.len() == 1;
        self.channels
            .iter()
            .enumerate()
            .map(|(i, c)| {
                if single {
                    format!("{} flagged out of {}", c.flagged, c.total)
                } else {
                    format!("{} flagged out of {} in channel {i}", c.flagged, c.total)
                }
            })
            .collect()
    }
}

/// Count the flagged entries per channel, given one `[channel][polarisation]`
/// FLAG cell per row.
///
/// Returns `None` if the cells are not all the same shape.
pub fn count_flags<'a, I>(cells: I) -> Option<FlagSummary>
where
    I: IntoIterator<Item = ArrayView2<'a, bool>>,
{
    let mut channels: Vec<ChannelFlagCount> = vec![];
    let mut shape: Option<(usize, usize)> = None;
    for cell in cells {
        let dim = cell.dim();
        match shape {
            None => {
                shape = Some(dim);
                channels = vec![
                    ChannelFlagCount {
                        flagged: 0,
                        total: 0
                    };
                    dim.0
                ];
            }
            Some(expected) if expected != dim => return None,
            Some(_) => {}
        }
        for (count, chan) in channels.iter_mut().zip(cell.axis_iter(Axis(0))) {
            count.flagged += chan.iter().filter(|&&f| f).count();
            count.total += chan.len();
        }
    }
    Some(FlagSummary { channels })
}

/// Count the flagged solutions in each channel of the calibration table
/// `caltable`, logging the counts at debug level.
///
/// # Errors
///
/// [`FlagError::BadShape`] if the FLAG cells differ in shape, or the
/// [`TableError`] if the table can't be read.
pub fn get_flagged_solution_num<P: AsRef<Path>>(caltable: P) -> Result<FlagSummary, FlagError> {
    let path = caltable.as_ref().to_path_buf();
    let mut table = CasaTable::open_read(&path).map_err(|e| match e {
        TableError::NotFound { path } => FlagError::NotFound { path },
        e => e.into(),
    })?;

    let mut cells: Vec<Array2<bool>> = Vec::with_capacity(table.n_rows() as usize);
    for row in 0..table.n_rows() {
        let cell: Array2<bool> = table.get_cell("FLAG", row)?;
        if let Some(first) = cells.first() {
            if first.dim() != cell.dim() {
                return Err(FlagError::BadShape {
                    path,
                    row,
                    shape: cell.shape().to_vec(),
                    expected: first.shape().to_vec(),
                });
            }
        }
        cells.push(cell);
    }

    let summary = count_flags(cells.iter().map(|c| c.view())).unwrap_or_default();
    for line in summary.lines() {
        debug!("{line}");
    }
    Ok(summary)
}
