use thiserror::Error;

/// A stateful measurement with an `idle -> running -> stopped` lifecycle.
///
/// `start` must be called before `flush`, and `flush` before `stop`.
pub trait Tracker {
    /// Begins measuring.
    fn start(&mut self) -> Result<(), TrackerError>;

    /// Takes an intermediate measurement and persists it.
    fn flush(&mut self) -> Result<(), TrackerError>;

    /// Stops measuring and returns the cumulative emissions in kg CO2-eq.
    fn stop(&mut self) -> Result<f64, TrackerError>;
}

impl<T: Tracker + ?Sized> Tracker for &mut T {
    fn start(&mut self) -> Result<(), TrackerError> {
        (**self).start()
    }

    fn flush(&mut self) -> Result<(), TrackerError> {
        (**self).flush()
    }

    fn stop(&mut self) -> Result<f64, TrackerError> {
        (**self).stop()
    }
}

impl<T: Tracker + ?Sized> Tracker for Box<T> {
    fn start(&mut self) -> Result<(), TrackerError> {
        (**self).start()
    }

    fn flush(&mut self) -> Result<(), TrackerError> {
        (**self).flush()
    }

    fn stop(&mut self) -> Result<f64, TrackerError> {
        (**self).stop()
    }
}

/// Lifecycle phase of a tracker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackerState {
    Idle,
    Running,
    Stopped,
}

/// Error type for [trackers](Tracker).
#[derive(Error, Debug)]
pub enum TrackerError {
    /// The tracker has not been started.
    #[error("The tracker must be started first")]
    NotStarted,

    /// The tracker is already running.
    #[error("The tracker is already running")]
    AlreadyStarted,

    /// The tracker has been stopped and can't be used anymore.
    #[error("The tracker has already been stopped")]
    AlreadyStopped,

    /// I/O operation error.
    #[error("I/O error: `{0}`")]
    Io(#[from] std::io::Error),

    /// Writing an emissions record failed.
    #[error("CSV error: `{0}`")]
    Csv(#[from] csv::Error),

    /// A power meter returned an unusable reading.
    #[error("Power meter error: `{0}`")]
    PowerMeter(String),
}

impl TrackerState {
    /// Fails unless the tracker can be started.
    pub fn ensure_idle(self) -> Result<(), TrackerError> {
        match self {
            TrackerState::Idle => Ok(()),
            TrackerState::Running => Err(TrackerError::AlreadyStarted),
            TrackerState::Stopped => Err(TrackerError::AlreadyStopped),
        }
    }

    /// Fails unless the tracker is measuring.
    pub fn ensure_running(self) -> Result<(), TrackerError> {
        match self {
            TrackerState::Running => Ok(()),
            TrackerState::Idle => Err(TrackerError::NotStarted),
            TrackerState::Stopped => Err(TrackerError::AlreadyStopped),
        }
    }
}
