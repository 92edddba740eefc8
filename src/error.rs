//! Error types for sweep printing.
//!
//! This module defines the errors that can occur while planning a page,
//! talking to the motion stage or the print head, and running a print job.

use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// The two devices a print job drives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Device {
    Motion,
    Head,
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Motion => write!(f, "Motion stage"),
            Self::Head => write!(f, "Print head"),
        }
    }
}

/// Main error type for sweepjet operations.
#[derive(Error, Debug)]
pub enum Error {
    /// Serial link or file system error.
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// Decoding a page image failed.
    #[error(transparent)]
    Image(#[from] image::ImageError),

    /// A command was attempted before `connect` succeeded.
    ///
    /// Fatal to the current job. The session driver may connect and retry.
    #[error("{0} is not connected")]
    DeviceNotConnected(Device),

    /// A device did not reach the awaited condition before the deadline.
    ///
    /// The job stops, but the devices are left connected so the session
    /// driver can retry or abort.
    #[error("{device} did not respond while waiting for {waiting_for} ({waited:?})")]
    DeviceUnresponsive {
        device: Device,
        waiting_for: &'static str,
        waited: Duration,
    },

    /// The motion controller rejected a command or raised an alarm.
    #[error(transparent)]
    Motion(#[from] MotionError),

    #[error("Malformed input: {0}")]
    MalformedInput(String),

    /// Invalid configuration parameter provided.
    #[error("Invalid configuration parameter: {0}")]
    InvalidConfig(String),

    #[error("Page rendering failed: {0}")]
    Render(String),

    /// A device error annotated with the page and sweep that were in progress.
    ///
    /// Both are counted from 0 and displayed from 1.
    #[error("page {}, sweep {}: {source}", .page + 1, .sweep + 1)]
    Job {
        page: usize,
        sweep: usize,
        source: Box<Error>,
    },

    /// A device error outside any sweep, such as parking after a page.
    #[error("page {}: {source}", .page + 1)]
    Page { page: usize, source: Box<Error> },
}

impl Error {
    /// Attach the page and sweep that were in progress.
    pub fn in_sweep(self, page: usize, sweep: usize) -> Self {
        match self {
            Self::Job { .. } | Self::Page { .. } => self,
            other => Self::Job {
                page,
                sweep,
                source: Box::new(other),
            },
        }
    }

    /// Attach the page that was in progress.
    pub fn in_page(self, page: usize) -> Self {
        match self {
            Self::Job { .. } | Self::Page { .. } => self,
            other => Self::Page {
                page,
                source: Box::new(other),
            },
        }
    }

    /// The underlying error, with any job context stripped.
    pub fn root(&self) -> &Error {
        match self {
            Self::Job { source, .. } | Self::Page { source, .. } => source.root(),
            other => other,
        }
    }

    /// `true` if retrying the job may succeed without operator intervention.
    pub fn is_recoverable(&self) -> bool {
        matches!(self.root(), Self::DeviceUnresponsive { .. })
    }
}

/// Errors and alarms reported by the GRBL motion controller.
///
/// These are parsed from `error:N` and `ALARM:N` reply lines.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum MotionError {
    #[error("Expected command letter")]
    ExpectedCommandLetter,

    #[error("Bad number format")]
    BadNumberFormat,

    #[error("Invalid $ statement")]
    InvalidStatement,

    #[error("Command locked out during alarm or jog state")]
    LockedOut,

    #[error("Jog target exceeds machine travel")]
    TravelExceeded,

    #[error("Unsupported G-code command")]
    UnsupportedCommand,

    #[error("Feed rate has not been set")]
    FeedRateNotSet,

    #[error("Hard limit triggered")]
    HardLimit,

    #[error("Soft limit: target exceeds machine travel")]
    SoftLimit,

    #[error("Reset while in motion")]
    AbortDuringCycle,

    #[error("Homing failed (alarm {0})")]
    HomingFailed(u8),

    #[error("Unknown error code {0}")]
    UnknownError(u8),

    #[error("Unknown alarm code {0}")]
    UnknownAlarm(u8),
}

impl MotionError {
    /// Parse a controller reply line.
    ///
    /// Returns `None` for lines that are not error or alarm reports, or whose
    /// code is not a number.
    pub fn from_line(line: &str) -> Option<Self> {
        let line = line.trim();

        if let Some(code) = line.strip_prefix("error:") {
            let code: u8 = code.trim().parse().ok()?;
            return Some(match code {
                1 => Self::ExpectedCommandLetter,
                2 => Self::BadNumberFormat,
                3 => Self::InvalidStatement,
                9 => Self::LockedOut,
                15 => Self::TravelExceeded,
                20 => Self::UnsupportedCommand,
                22 => Self::FeedRateNotSet,
                _ => Self::UnknownError(code),
            });
        }

        if let Some(code) = line.strip_prefix("ALARM:") {
            let code: u8 = code.trim().parse().ok()?;
            return Some(match code {
                1 => Self::HardLimit,
                2 => Self::SoftLimit,
                3 => Self::AbortDuringCycle,
                6..=9 => Self::HomingFailed(code),
                _ => Self::UnknownAlarm(code),
            });
        }

        None
    }

    /// Alarms lock the controller until it is unlocked or homed again.
    pub fn is_alarm(&self) -> bool {
        matches!(
            self,
            Self::HardLimit
                | Self::SoftLimit
                | Self::AbortDuringCycle
                | Self::HomingFailed(_)
                | Self::UnknownAlarm(_)
        )
    }
}
