#![warn(missing_docs)]
#![warn(clippy::missing_safety_doc)]
#![warn(clippy::missing_errors_doc)]

//! lwacalim is a library of the housekeeping tasks performed around the
//! self-calibration and imaging pipeline of the Owens Valley Radio
//! Observatory Long Wavelength Array (OVRO-LWA).
//!
//! # Examples
//!
//! Find the self-calibration solutions to apply to a measurement set
//!
//! ```rust
//! use lwacalim::caltime::nearest_caltime;
//!
//! let caltables = [
//!     "20230318_110000_55MHz.gcal",
//!     "20230318_115500_55MHz.gcal",
//!     "20230318_121000_55MHz.gcal",
//! ];
//! let best = nearest_caltime("20230318_120000_55MHz.ms", caltables).unwrap();
//! assert_eq!(best, "20230318_115500");
//! ```
//!
//! # Details
//!
//! Images are read with [`fitsio`] or, for CASA images, [`rubbl_casatables`],
//! both re-exported from [`marlu`]. Measurement sets are discovered on the
//! cluster's nodes over `ssh`, one host per task on a [`rayon`] thread pool.

pub mod caltime;
pub mod error;
pub mod flags;
pub mod helio;
pub mod image;
pub mod listing;
pub mod names;
pub mod quality;
pub mod sources;
pub mod table;

pub use error::LwacalimError;

pub use marlu;
pub use marlu::{fitsio, hifitime, ndarray, rayon, rubbl_casatables, RADec};

cfg_if::cfg_if! {
    if #[cfg(feature = "cli")] {
        pub mod cli;
    }
}

#[cfg(test)]
pub(crate) mod test_common;
