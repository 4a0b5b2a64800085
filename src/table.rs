//! Scoped access to CASA tables, and their table-level keywords.

use std::{
    fmt::Display,
    path::{Path, PathBuf},
};

use log::{debug, trace};
use thiserror::Error;

use crate::marlu::rubbl_casatables::{
    CasaDataType, CasaScalarData, CasacoreError, Table, TableError as RubblTableError,
    TableOpenMode,
};

#[derive(Error, Debug)]
/// Errors that can occur when accessing CASA tables.
pub enum TableError {
    /// The table directory doesn't exist.
    #[error("table {} does not exist", .path.display())]
    NotFound {
        /// The missing table
        path: PathBuf,
    },

    /// The table has no such table-level keyword.
    #[error("table {} has no keyword {keyword}", .path.display())]
    NoSuchKeyword {
        /// The table
        path: PathBuf,
        /// The requested keyword
        keyword: String,
    },

    /// A value couldn't be parsed for a keyword.
    #[error("could not parse {value:?} as {kind}")]
    BadValue {
        /// the supplied text
        value: String,
        /// the requested type
        kind: String,
    },

    #[error(transparent)]
    /// Error derived from `rubbl_casatables::TableError`
    Rubbl(#[from] RubblTableError),

    #[error(transparent)]
    /// Error derived from [`CasacoreError`]
    Casacore(#[from] CasacoreError),
}

/// A CASA table, open for the lifetime of this handle.
///
/// The underlying table is flushed and closed when the handle is dropped.
pub struct CasaTable {
    path: PathBuf,
    table: Table,
    writable: bool,
}

impl CasaTable {
    fn open_with<P: AsRef<Path>>(path: P, writable: bool) -> Result<Self, TableError> {
        let path = path.as_ref().to_path_buf();
        if !path.is_dir() {
            return Err(TableError::NotFound { path });
        }
        trace!("opening {} (writable={writable})", path.display());
        let mode = if writable {
            TableOpenMode::ReadWrite
        } else {
            TableOpenMode::Read
        };
        let table = Table::open(&path, mode)?;
        Ok(Self {
            path,
            table,
            writable,
        })
    }

    /// Open a table read-only.
    ///
    /// # Errors
    ///
    /// [`TableError::NotFound`] if `path` isn't a directory, or the casacore
    /// error if it isn't a table.
    pub fn open_read<P: AsRef<Path>>(path: P) -> Result<Self, TableError> {
        Self::open_with(path, false)
    }

    /// Open a table for reading and writing.
    ///
    /// # Errors
    ///
    /// see [`CasaTable::open_read`]
    pub fn open_write<P: AsRef<Path>>(path: P) -> Result<Self, TableError> {
        Self::open_with(path, true)
    }

    /// The path the table was opened from.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The underlying table.
    pub fn table(&mut self) -> &mut Table {
        &mut self.table
    }

    /// The number of rows in the table.
    pub fn n_rows(&self) -> u64 {
        self.table.n_rows()
    }

    /// Read the cell of column `col` in row `row`.
    ///
    /// # Errors
    ///
    /// The casacore error if there's no such column or row, or the cell isn't
    /// a `T`.
    pub fn get_cell<T: CasaDataType>(&mut self, col: &str, row: u64) -> Result<T, TableError> {
        Ok(self.table.get_cell(col, row)?)
    }

    /// Replace the cell of column `col` in row `row`.
    ///
    /// # Errors
    ///
    /// see [`CasaTable::get_cell`]. Writing to a table opened read-only fails
    /// too.
    pub fn put_cell<T: CasaDataType>(
        &mut self,
        col: &str,
        row: u64,
        value: &T,
    ) -> Result<(), TableError> {
        Ok(self.table.put_cell(col, row, value)?)
    }

    /// Read a whole scalar column.
    ///
    /// # Errors
    ///
    /// The casacore error if there's no such column, or it isn't of `T`.
    pub fn get_col_as_vec<T: CasaScalarData>(&mut self, col: &str) -> Result<Vec<T>, TableError> {
        Ok(self.table.get_col_as_vec(col)?)
    }

    /// The names of all table-level keywords.
    ///
    /// # Errors
    ///
    /// The casacore error if the keyword set can't be read.
    pub fn keyword_names(&mut self) -> Result<Vec<String>, TableError> {
        Ok(self.table.table_keyword_names()?)
    }

    /// Read the table-level keyword `keyword`.
    ///
    /// # Errors
    ///
    /// [`TableError::NoSuchKeyword`] if it's absent, or the casacore error if
    /// it can't be read as a `T`.
    pub fn get_keyword<T: CasaDataType>(&mut self, keyword: &str) -> Result<T, TableError> {
        if !self.keyword_names()?.iter().any(|k| k == keyword) {
            return Err(TableError::NoSuchKeyword {
                path: self.path.clone(),
                keyword: keyword.to_string(),
            });
        }
        Ok(self.table.get_keyword_record()?.get_field::<T>(keyword)?)
    }

    /// Write the table-level keyword `keyword`, replacing any existing value.
    ///
    /// # Errors
    ///
    /// The casacore error if the table isn't writable.
    pub fn put_keyword<T: CasaDataType>(
        &mut self,
        keyword: &str,
        value: &T,
    ) -> Result<(), TableError> {
        debug!("setting {keyword} on {}", self.path.display());
        self.table.put_keyword(keyword, value)?;
        Ok(())
    }
}

impl Drop for CasaTable {
    fn drop(&mut self) {
        trace!(
            "closing {} (writable={})",
            self.path.display(),
            self.writable
        );
    }
}

/// A table keyword value of one of the simple types the command line deals in.
#[derive(Debug, Clone, PartialEq)]
pub enum KeywordValue {
    /// a boolean
    Bool(bool),
    /// a 32 bit integer
    Int(i32),
    /// a double
    Float(f64),
    /// a string
    Str(String),
}

/// The type of a [`KeywordValue`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeywordKind {
    #[allow(missing_docs)]
    Bool,
    #[allow(missing_docs)]
    Int,
    #[allow(missing_docs)]
    Float,
    #[allow(missing_docs)]
    Str,
}

impl KeywordKind {
    /// All the kinds, by the names used on the command line.
    pub const NAMES: [&'static str; 4] = ["bool", "int", "float", "string"];

    /// Look a kind up by name.
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "bool" => Some(Self::Bool),
            "int" => Some(Self::Int),
            "float" => Some(Self::Float),
            "string" => Some(Self::Str),
            _ => None,
        }
    }

    /// Parse `text` as a value of this kind.
    ///
    /// # Errors
    ///
    /// [`TableError::BadValue`] if `text` isn't a valid value.
    pub fn parse(self, text: &str) -> Result<KeywordValue, TableError> {
        let bad = || TableError::BadValue {
            value: text.to_string(),
            kind: format!("{self:?}"),
        };
        Ok(match self {
            Self::Bool => match text.to_ascii_lowercase().as_str() {
                "true" | "t" | "1" => KeywordValue::Bool(true),
                "false" | "f" | "0" => KeywordValue::Bool(false),
                _ => return Err(bad()),
            },
            Self::Int => KeywordValue::Int(text.parse().map_err(|_| bad())?),
            Self::Float => KeywordValue::Float(text.parse().map_err(|_| bad())?),
            Self::Str => KeywordValue::Str(text.to_string()),
        })
    }
}

impl Display for KeywordValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Bool(v) => write!(f, "{v}"),
            Self::Int(v) => write!(f, "{v}"),
            Self::Float(v) => write!(f, "{v}"),
            Self::Str(v) => write!(f, "{v}"),
        }
    }
}

/// Read the table-level keyword `keyword` from `caltable` as a `kind`.
///
/// # Errors
///
/// see [`CasaTable::open_read`] and [`CasaTable::get_keyword`]
pub fn get_keyword<P: AsRef<Path>>(
    caltable: P,
    keyword: &str,
    kind: KeywordKind,
) -> Result<KeywordValue, TableError> {
    let mut table = CasaTable::open_read(caltable)?;
    Ok(match kind {
        KeywordKind::Bool => KeywordValue::Bool(table.get_keyword(keyword)?),
        KeywordKind::Int => KeywordValue::Int(table.get_keyword(keyword)?),
        KeywordKind::Float => KeywordValue::Float(table.get_keyword(keyword)?),
        KeywordKind::Str => KeywordValue::Str(table.get_keyword(keyword)?),
    })
}

/// Write the table-level keyword `keyword` of `caltable`.
///
/// # Errors
///
/// see [`CasaTable::open_write`] and [`CasaTable::put_keyword`]
pub fn put_keyword<P: AsRef<Path>>(
    caltable: P,
    keyword: &str,
    value: &KeywordValue,
) -> Result<(), TableError> {
    let mut table = CasaTable::open_write(caltable)?;
    match value {
        KeywordValue::Bool(v) => table.put_keyword(keyword, v),
        KeywordValue::Int(v) => table.put_keyword(keyword, v),
        KeywordValue::Float(v) => table.put_keyword(keyword, v),
        KeywordValue::Str(v) => table.put_keyword(keyword, v),
    }
}
