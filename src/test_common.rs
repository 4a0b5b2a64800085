//! Fixtures shared by the unit tests.

use std::{collections::HashMap, path::Path, sync::Mutex};

use crate::{
    image::CASA_IMAGE_COLUMN,
    listing::{HostError, RemoteLister},
    marlu::{
        fitsio::{
            images::{ImageDescription, ImageType},
            FitsFile,
        },
        ndarray::{Array2, ArrayD},
        rubbl_casatables::{
            GlueDataType, Table, TableCreateMode, TableDesc, TableDescCreateMode, TableOpenMode,
        },
    },
};

/// A [`RemoteLister`] which answers from a fixed map of hosts to entries.
///
/// Hosts that were never added are unreachable.
#[derive(Default)]
pub(crate) struct MockLister {
    hosts: HashMap<String, Vec<String>>,
    requests: Mutex<Vec<(String, String)>>,
}

impl MockLister {
    pub(crate) fn with_host(mut self, host: &str, entries: &[&str]) -> Self {
        self.hosts.insert(
            host.to_string(),
            entries.iter().map(|e| e.to_string()).collect(),
        );
        self
    }

    /// Every `(host, dir)` listed so far, sorted since listing is concurrent.
    pub(crate) fn requested(&self) -> Vec<(String, String)> {
        let mut requests = self.requests.lock().unwrap().clone();
        requests.sort();
        requests
    }
}

impl RemoteLister for MockLister {
    fn list_entries(&self, host: &str, root: &str) -> Result<Vec<String>, HostError> {
        self.requests
            .lock()
            .unwrap()
            .push((host.to_string(), root.to_string()));
        self.hosts
            .get(host)
            .cloned()
            .ok_or_else(|| HostError::Unreachable {
                host: host.to_string(),
                stderr: "ssh: connect to host: No route to host".to_string(),
            })
    }
}

/// Write `data` as the primary image of a new FITS file, with `dimensions` in
/// row-major order (slowest first).
pub(crate) fn write_fits_image(path: &Path, dimensions: &[usize], data: &[f32]) {
    let description = ImageDescription {
        data_type: ImageType::Float,
        dimensions,
    };
    let mut fptr = FitsFile::create(path)
        .with_custom_primary(&description)
        .open()
        .unwrap();
    let hdu = fptr.primary_hdu().unwrap();
    hdu.write_image(&mut fptr, data).unwrap();
}

/// A column of a table made by [`new_table`].
pub(crate) enum Column {
    /// one value per row
    Scalar(GlueDataType, &'static str),
    /// an array per row, of any shape
    Array(GlueDataType, &'static str),
}

/// Create a new CASA table at `path` with `n_rows` empty rows.
pub(crate) fn new_table(path: &Path, columns: &[Column], n_rows: usize) -> Table {
    let mut desc = TableDesc::new("TEST", TableDescCreateMode::TDM_SCRATCH).unwrap();
    for column in columns {
        match column {
            Column::Scalar(data_type, name) => desc
                .add_scalar_column(*data_type, name, None, false, false)
                .unwrap(),
            Column::Array(data_type, name) => desc
                .add_array_column(*data_type, name, None, None, false, false)
                .unwrap(),
        }
    }
    Table::new(path, desc, n_rows, TableCreateMode::New).unwrap()
}

/// The `FLAG` and `FLAG_ROW` columns of a measurement set, a flag version or
/// a calibration table.
pub(crate) const FLAG_COLUMNS: [Column; 2] = [
    Column::Array(GlueDataType::TpBool, "FLAG"),
    Column::Scalar(GlueDataType::TpBool, "FLAG_ROW"),
];

/// Write a table with one `[channel][polarisation]` `FLAG` cell per row. Rows
/// whose cell is all flagged get `FLAG_ROW` set.
pub(crate) fn write_flag_table(path: &Path, flags: &[Array2<bool>]) {
    let mut table = new_table(path, &FLAG_COLUMNS, flags.len());
    for (row, flag) in flags.iter().enumerate() {
        table.put_cell("FLAG", row as u64, flag).unwrap();
        table
            .put_cell("FLAG_ROW", row as u64, &flag.iter().all(|&f| f))
            .unwrap();
    }
}

/// Read back the `FLAG` cells written by [`write_flag_table`].
pub(crate) fn read_flags(path: &Path) -> (Vec<Array2<bool>>, Vec<bool>) {
    let mut table = Table::open(path, TableOpenMode::Read).unwrap();
    let flags = (0..table.n_rows())
        .map(|row| table.get_cell("FLAG", row).unwrap())
        .collect();
    let flag_row = table.get_col_as_vec("FLAG_ROW").unwrap();
    (flags, flag_row)
}

/// Write a main table with just the `TIME` (MJD seconds) and `FIELD_ID`
/// columns.
pub(crate) fn write_time_table(path: &Path, times: &[f64], fields: &[i32]) {
    let columns = [
        Column::Scalar(GlueDataType::TpDouble, "TIME"),
        Column::Scalar(GlueDataType::TpInt, "FIELD_ID"),
    ];
    let mut table = new_table(path, &columns, times.len());
    for (row, (time, field)) in times.iter().zip(fields).enumerate() {
        table.put_cell("TIME", row as u64, time).unwrap();
        table.put_cell("FIELD_ID", row as u64, field).unwrap();
    }
}

/// Write `data` as the pixels of a CASA image.
pub(crate) fn write_casa_image(path: &Path, data: &ArrayD<f32>) {
    let columns = [Column::Array(GlueDataType::TpFloat, CASA_IMAGE_COLUMN)];
    let mut table = new_table(path, &columns, 1);
    table.put_cell(CASA_IMAGE_COLUMN, 0, data).unwrap();
}
