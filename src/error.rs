use crate::tracker::TrackerError;
use thiserror::Error;

/// Error type of a training run.
#[derive(Error, Debug)]
pub enum Error {
    /// The emissions tracker failed.
    #[error("Tracker error: {0}")]
    Tracker(#[from] TrackerError),

    /// I/O operation error, e.g. while saving the configuration.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
