//! Errors that can occur in lwacalim

use thiserror::Error;

use crate::{
    caltime::CalTimeError, flags::FlagError, helio::HelioError, image::ImageError,
    listing::ListingError, names::NameError, sources::SourceError, table::TableError,
};

#[derive(Error, Debug)]
/// Errors in the values given on the command line.
pub enum CLIError {
    /// A value was syntactically fine, but not acceptable.
    #[error("invalid argument for {option}. expected {expected}, received {received}")]
    InvalidCommandLineArgument {
        /// The argument
        option: String,
        /// What would have been accepted
        expected: String,
        /// What was given
        received: String,
    },
}

#[derive(Error, Debug)]
/// Any error that lwacalim can produce.
pub enum LwacalimError {
    #[error(transparent)]
    /// Error derived from [`NameError`]
    Name(#[from] NameError),

    #[error(transparent)]
    /// Error derived from [`CalTimeError`]
    CalTime(#[from] CalTimeError),

    #[error(transparent)]
    /// Error derived from [`ListingError`]
    Listing(#[from] ListingError),

    #[error(transparent)]
    /// Error derived from [`ImageError`]
    Image(#[from] ImageError),

    #[error(transparent)]
    /// Error derived from [`FlagError`]
    Flag(#[from] FlagError),

    #[error(transparent)]
    /// Error derived from [`TableError`]
    Table(#[from] TableError),

    #[error(transparent)]
    /// Error derived from [`SourceError`]
    Source(#[from] SourceError),

    #[error(transparent)]
    /// Error derived from [`HelioError`]
    Helio(#[from] HelioError),

    #[error(transparent)]
    /// Error derived from [`std::io::Error`]
    IO(#[from] std::io::Error),

    #[error(transparent)]
    /// Error derived from [`CLIError`]
    CLIError(#[from] CLIError),

    #[cfg(feature = "cli")]
    #[error(transparent)]
    /// Error derived from [`clap::Error`]
    ClapError(#[from] clap::Error),
}
