//! Reading images and extracting pixel statistics.
//!
//! Images come either as FITS files or as CASA image directories. Both are
//! read into a 2-D array once any degenerate (length 1) axes, like Stokes and
//! frequency, are squeezed out.

use std::path::{Path, PathBuf};

use log::{debug, trace};
use thiserror::Error;

use crate::{
    marlu::{
        fitsio::{hdu::HduInfo, FitsFile},
        ndarray::{s, Array2, ArrayD, ArrayView2},
    },
    table::{CasaTable, TableError},
};

/// Half-width, in pixels, of the window around the peak that the local minimum
/// is taken from.
pub const LOCAL_WINDOW_HALF_WIDTH: usize = 100;

/// Pixels within this of the maximum are considered to be the maximum.
pub const MAX_MATCH_TOLERANCE: f64 = 1e-5;

/// The column of a CASA image table holding the pixels.
pub(crate) const CASA_IMAGE_COLUMN: &str = "map";

#[derive(Error, Debug)]
/// Errors that can occur when reading images.
pub enum ImageError {
    /// The path is neither a file nor a directory.
    #[error("image {} does not exist", .path.display())]
    NotFound {
        /// the image path
        path: PathBuf,
    },

    /// A generic error associated with the fitsio crate.
    #[error("{}: {fits_error}", .path.display())]
    Fits {
        /// The [`fitsio::errors::Error`](crate::marlu::fitsio::errors::Error)
        fits_error: Box<crate::marlu::fitsio::errors::Error>,
        /// The filename of the fits file where the error occurred
        path: PathBuf,
    },

    /// The FITS primary HDU isn't an image.
    #[error("{}: primary HDU is not an image", .path.display())]
    NotAnImage {
        /// the image path
        path: PathBuf,
    },

    #[error(transparent)]
    /// Error derived from [`TableError`], reading a CASA image
    Table(#[from] TableError),

    /// The image is not 2-D once degenerate axes are removed.
    #[error("{}: expected a 2-D image after squeezing, got shape {shape:?}", .path.display())]
    BadShape {
        /// the image path
        path: PathBuf,
        /// the shape on disk
        shape: Vec<usize>,
    },

    /// Every pixel considered was NaN.
    #[error("no finite pixels in {what}")]
    AllNan {
        /// the image or window
        what: String,
    },
}

/// Load the pixels of an image as a 2-D array.
///
/// A regular file is read as FITS (primary HDU), a directory as a CASA image.
///
/// # Errors
///
/// - [`ImageError::NotFound`] if `path` is neither a file nor a directory.
/// - [`ImageError::BadShape`] if more or less than two axes are longer than one.
/// - [`ImageError::Fits`], [`ImageError::Table`] on read errors.
pub fn get_image_data<P: AsRef<Path>>(path: P) -> Result<Array2<f32>, ImageError> {
    let path = path.as_ref();
    let (shape, pixels) = if path.is_file() {
        read_fits_pixels(path)?
    } else if path.is_dir() {
        read_casa_pixels(path)?
    } else {
        return Err(ImageError::NotFound {
            path: path.to_path_buf(),
        });
    };
    squeeze_2d(path, &shape, pixels)
}

fn read_fits_pixels(path: &Path) -> Result<(Vec<usize>, Vec<f32>), ImageError> {
    let fits_err = |e| ImageError::Fits {
        fits_error: Box::new(e),
        path: path.to_path_buf(),
    };
    let mut fptr = FitsFile::open(path).map_err(fits_err)?;
    let hdu = fptr.primary_hdu().map_err(fits_err)?;
    let shape = match &hdu.info {
        HduInfo::ImageInfo { shape, .. } => shape.clone(),
        _ => {
            return Err(ImageError::NotAnImage {
                path: path.to_path_buf(),
            })
        }
    };
    let pixels: Vec<f32> = hdu.read_image(&mut fptr).map_err(fits_err)?;
    trace!("read {:?} pixels from {}", shape, path.display());
    Ok((shape, pixels))
}

fn read_casa_pixels(path: &Path) -> Result<(Vec<usize>, Vec<f32>), ImageError> {
    let mut table = CasaTable::open_read(path)?;
    let map: ArrayD<f32> = table.get_cell(CASA_IMAGE_COLUMN, 0)?;
    let shape = map.shape().to_vec();
    trace!("read {:?} pixels from {}", shape, path.display());
    Ok((shape, map.iter().copied().collect()))
}

fn squeeze_2d(path: &Path, shape: &[usize], pixels: Vec<f32>) -> Result<Array2<f32>, ImageError> {
    let bad_shape = || ImageError::BadShape {
        path: path.to_path_buf(),
        shape: shape.to_vec(),
    };
    let dims: Vec<usize> = shape.iter().copied().filter(|&n| n != 1).collect();
    match dims.as_slice() {
        &[rows, cols] => Array2::from_shape_vec((rows, cols), pixels).map_err(|_| bad_shape()),
        _ => Err(bad_shape()),
    }
}

fn nan_max<'a>(values: impl IntoIterator<Item = &'a f32>) -> Option<f32> {
    values
        .into_iter()
        .filter(|v| !v.is_nan())
        .copied()
        .reduce(f32::max)
}

fn nan_min<'a>(values: impl IntoIterator<Item = &'a f32>) -> Option<f32> {
    values
        .into_iter()
        .filter(|v| !v.is_nan())
        .copied()
        .reduce(f32::min)
}

/// The NaN-ignoring global maximum and minimum of `data`.
///
/// # Errors
///
/// [`ImageError::AllNan`] if there are no non-NaN pixels.
pub fn global_maxmin(data: ArrayView2<f32>) -> Result<(f64, f64), ImageError> {
    let all_nan = || ImageError::AllNan {
        what: "image".into(),
    };
    let max = nan_max(data.iter()).ok_or_else(all_nan)?;
    let min = nan_min(data.iter()).ok_or_else(all_nan)?;
    Ok((max as f64, min as f64))
}

/// The peak of `data`, and the NaN-ignoring minimum of the window around it.
///
/// The first pixel (row-major) within [`MAX_MATCH_TOLERANCE`] of the maximum
/// anchors a window spanning [`LOCAL_WINDOW_HALF_WIDTH`] pixels either side
/// along both axes, clamped to the image. The anchor pixel's value is returned
/// as the maximum.
///
/// # Errors
///
/// [`ImageError::AllNan`] if the image or the window has no non-NaN pixels.
pub fn local_maxmin(data: ArrayView2<f32>) -> Result<(f64, f64), ImageError> {
    let max = nan_max(data.iter()).ok_or_else(|| ImageError::AllNan {
        what: "image".into(),
    })?;
    let ((row, col), &peak) = data
        .indexed_iter()
        .find(|(_, v)| ((**v - max) as f64).abs() < MAX_MATCH_TOLERANCE)
        .ok_or_else(|| ImageError::AllNan {
            what: "image".into(),
        })?;

    let (num_rows, num_cols) = data.dim();
    let row_range =
        row.saturating_sub(LOCAL_WINDOW_HALF_WIDTH)..(row + LOCAL_WINDOW_HALF_WIDTH).min(num_rows);
    let col_range =
        col.saturating_sub(LOCAL_WINDOW_HALF_WIDTH)..(col + LOCAL_WINDOW_HALF_WIDTH).min(num_cols);
    debug!("peak {peak} at ({row}, {col}), window {row_range:?} x {col_range:?}");

    let window = data.slice(s![row_range, col_range]);
    let min = nan_min(window.iter()).ok_or_else(|| ImageError::AllNan {
        what: format!("window around ({row}, {col})"),
    })?;
    Ok((peak as f64, min as f64))
}

/// Read an image and get its peak and trough.
///
/// With `local`, the trough is the minimum of the window around the peak (see
/// [`local_maxmin`]), otherwise it's the global minimum.
///
/// # Errors
///
/// see [`get_image_data`], [`local_maxmin`] and [`global_maxmin`]
pub fn get_image_maxmin<P: AsRef<Path>>(path: P, local: bool) -> Result<(f64, f64), ImageError> {
    let data = get_image_data(&path)?;
    let result = if local {
        local_maxmin(data.view())
    } else {
        global_maxmin(data.view())
    };
    result.map_err(|e| match e {
        ImageError::AllNan { what } => ImageError::AllNan {
            what: format!("{} of {}", what, path.as_ref().display()),
        },
        e => e,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        marlu::ndarray::Axis,
        test_common::{write_casa_image, write_fits_image},
    };
    use approx::assert_abs_diff_eq;
    use tempfile::tempdir;

    fn synthetic(rows: usize, cols: usize) -> Array2<f32> {
        Array2::from_shape_fn((rows, cols), |(r, c)| ((r * 7 + c * 3) % 11) as f32 * 0.01)
    }

    #[test]
    fn test_local_maxmin_single_peak() {
        let mut data = synthetic(400, 400);
        data[(250, 260)] = 5.0;
        // inside the window
        data[(180, 300)] = -0.5;
        // outside the window
        data[(10, 10)] = -3.0;
        // just outside: rows [150, 350), cols [160, 360)
        data[(350, 260)] = -2.0;
        data[(250, 360)] = -2.0;

        let (max, min) = local_maxmin(data.view()).unwrap();
        assert_abs_diff_eq!(max, 5.0);
        assert_abs_diff_eq!(min, -0.5);

        let (max, min) = global_maxmin(data.view()).unwrap();
        assert_abs_diff_eq!(max, 5.0);
        assert_abs_diff_eq!(min, -3.0);
    }

    #[test]
    fn test_local_maxmin_window_clamped_at_edges() {
        let mut data = synthetic(50, 60);
        data[(2, 58)] = 1.0;
        data[(49, 0)] = -1.0;
        let (max, min) = local_maxmin(data.view()).unwrap();
        assert_abs_diff_eq!(max, 1.0);
        assert_abs_diff_eq!(min, -1.0);
    }

    #[test]
    fn test_local_maxmin_first_near_max_anchors() {
        let mut data = Array2::<f32>::zeros((300, 300));
        data[(10, 10)] = 2.0;
        data[(290, 290)] = 2.0 + 5e-6;
        data[(20, 20)] = -1.0;
        data[(280, 280)] = -4.0;
        let (max, min) = local_maxmin(data.view()).unwrap();
        assert_abs_diff_eq!(max, 2.0);
        assert_abs_diff_eq!(min, -1.0);
    }

    #[test]
    fn test_nan_ignored() {
        let mut data = synthetic(20, 20);
        data[(0, 0)] = f32::NAN;
        data[(5, 5)] = 3.0;
        data[(6, 6)] = -3.0;
        let (max, min) = local_maxmin(data.view()).unwrap();
        assert_abs_diff_eq!(max, 3.0);
        assert_abs_diff_eq!(min, -3.0);

        let all_nan = Array2::from_elem((4, 4), f32::NAN);
        assert!(matches!(
            global_maxmin(all_nan.view()),
            Err(ImageError::AllNan { .. })
        ));
        assert!(matches!(
            local_maxmin(all_nan.view()),
            Err(ImageError::AllNan { .. })
        ));
    }

    #[test]
    fn test_missing_image() {
        let tmp_dir = tempdir().unwrap();
        let path = tmp_dir.path().join("nonexistent.fits");
        assert!(matches!(
            get_image_maxmin(&path, true),
            Err(ImageError::NotFound { path: p }) if p == path
        ));
    }

    #[test]
    fn test_fits_image() {
        let tmp_dir = tempdir().unwrap();
        let path = tmp_dir.path().join("image.fits");
        let mut data = synthetic(256, 256);
        data[(128, 64)] = 10.0;
        data[(100, 100)] = -0.25;
        data[(255, 255)] = -8.0;
        // with degenerate stokes and frequency axes, as written by imagers
        write_fits_image(&path, &[1, 1, 256, 256], data.as_slice().unwrap());

        let loaded = get_image_data(&path).unwrap();
        assert_eq!(loaded.dim(), (256, 256));
        assert_abs_diff_eq!(loaded[(128, 64)], 10.0);

        let (max, min) = get_image_maxmin(&path, true).unwrap();
        assert_abs_diff_eq!(max, 10.0);
        assert_abs_diff_eq!(min, -0.25);

        let (max, min) = get_image_maxmin(&path, false).unwrap();
        assert_abs_diff_eq!(max, 10.0);
        assert_abs_diff_eq!(min, -8.0);
    }

    #[test]
    fn test_fits_cube_rejected() {
        let tmp_dir = tempdir().unwrap();
        let path = tmp_dir.path().join("cube.fits");
        write_fits_image(&path, &[2, 4, 4], &[0.0; 32]);
        assert!(matches!(
            get_image_data(&path),
            Err(ImageError::BadShape { shape, .. }) if shape == vec![2, 4, 4]
        ));
    }

    #[test]
    fn test_casa_image() {
        let tmp_dir = tempdir().unwrap();
        let path = tmp_dir.path().join("20230318_120000_55MHz.image");
        let mut data = synthetic(256, 256);
        data[(40, 200)] = 12.0;
        data[(45, 190)] = -0.5;
        data[(250, 2)] = -6.0;
        // frequency and stokes axes, slowest first
        let cube = data
            .clone()
            .insert_axis(Axis(0))
            .insert_axis(Axis(0))
            .into_dyn();
        write_casa_image(&path, &cube);

        let loaded = get_image_data(&path).unwrap();
        assert_eq!(loaded, data);

        let (max, min) = get_image_maxmin(&path, true).unwrap();
        assert_abs_diff_eq!(max, 12.0);
        assert_abs_diff_eq!(min, -0.5);

        let (_, min) = get_image_maxmin(&path, false).unwrap();
        assert_abs_diff_eq!(min, -6.0);
    }

    #[test]
    fn test_casa_cube_rejected() {
        let tmp_dir = tempdir().unwrap();
        let path = tmp_dir.path().join("cube.image");
        write_casa_image(&path, &ArrayD::zeros(vec![2, 1, 4, 4]));
        assert!(matches!(
            get_image_data(&path),
            Err(ImageError::BadShape { shape, .. }) if shape == vec![2, 1, 4, 4]
        ));
    }
}
