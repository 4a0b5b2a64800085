//! A heuristic for catching self-calibration iterations that made the image
//! worse.
//!
//! The dynamic range (peak over the magnitude of the trough around it) of each
//! iteration's image is compared with that of the previous one. An
//! [`ExtremaHistory`] holds the readings; it's never modified in place, each
//! assessment returns the history to pass to the next one.

use std::path::Path;

use log::{debug, info};

use crate::image::{get_image_maxmin, ImageError};

/// The dynamic range may drop by at most this fraction (relative to the new
/// dynamic range) between iterations.
pub const MAX_DYNAMIC_RANGE_DROP: f64 = 0.2;

/// The current reading only replaces the previous one if its maximum exceeds
/// this.
pub const MIN_USABLE_MAX: f64 = 0.001;

/// Image maxima and minima for the previous (slot 0) and current (slot 1)
/// self-calibration iterations.
///
/// A zero maximum in slot 0 means no image has been assessed yet.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ExtremaHistory {
    /// `[previous, current]` maxima
    pub max: [f64; 2],
    /// `[previous, current]` minima
    pub min: [f64; 2],
}

impl ExtremaHistory {
    /// A history with no readings.
    pub fn new() -> Self {
        Self::default()
    }

    /// True if no image has been assessed yet.
    pub fn is_first(&self) -> bool {
        self.max[0] == 0.0
    }

    /// The `[previous, current]` dynamic ranges, `max / |min|`.
    pub fn dynamic_ranges(&self) -> [f64; 2] {
        [
            self.max[0] / self.min[0].abs(),
            self.max[1] / self.min[1].abs(),
        ]
    }
}

/// The outcome of a quality assessment.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct QualityAssessment {
    /// The history to use for the next assessment
    pub history: ExtremaHistory,
    /// False if the image got significantly worse
    pub passed: bool,
    /// The `[previous, current]` dynamic ranges compared, if any were
    pub dynamic_ranges: Option<[f64; 2]>,
}

/// Fold a new `(max, min)` reading into `history` and judge it.
///
/// On the first reading, slot 0 is filled and the assessment passes.
/// Otherwise, when `reorder` is set and the current reading is usable, it
/// becomes the previous one; the new reading becomes the current one. The
/// assessment fails if the dynamic range fell by more than
/// [`MAX_DYNAMIC_RANGE_DROP`] and the new minimum is negative.
pub fn assess_quality(
    history: ExtremaHistory,
    reading: (f64, f64),
    reorder: bool,
) -> QualityAssessment {
    let mut next = history;
    let (max, min) = reading;

    if history.is_first() {
        next.max[0] = max;
        next.min[0] = min;
        debug!("first reading max={max} min={min}");
        return QualityAssessment {
            history: next,
            passed: true,
            dynamic_ranges: None,
        };
    }

    if reorder && history.max[1] > MIN_USABLE_MAX {
        next.max[0] = history.max[1];
        next.min[0] = history.min[1];
    }
    next.max[1] = max;
    next.min[1] = min;

    let [dr_prev, dr_cur] = next.dynamic_ranges();
    info!("dynamic range {dr_prev} -> {dr_cur}");
    let passed = !((dr_prev - dr_cur) / dr_cur > MAX_DYNAMIC_RANGE_DROP && next.min[1] < 0.0);

    QualityAssessment {
        history: next,
        passed,
        dynamic_ranges: Some([dr_prev, dr_cur]),
    }
}

/// Read the local peak and trough of `imagename`, and assess it against
/// `history` (see [`assess_quality`]).
///
/// # Errors
///
/// see [`get_image_maxmin`]
pub fn check_image_quality<P: AsRef<Path>>(
    imagename: P,
    history: ExtremaHistory,
    reorder: bool,
) -> Result<QualityAssessment, ImageError> {
    let reading = get_image_maxmin(imagename, true)?;
    Ok(assess_quality(history, reading, reorder))
}
