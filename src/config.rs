//! Job configuration.
//!
//! [`PrintConfig`] collects the bed geometry, feed rates and timing of a
//! print job. Start from [`PrintConfig::new`] and adjust with the builder
//! methods; [`PrintConfig::validate`] runs before a session accepts it.

use log::debug;
use std::time::Duration;

use crate::error::Error;

/// Physical mounting side of the print bed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    Left,
    Right,
}

impl Side {
    pub fn flip(self) -> Self {
        match self {
            Self::Left => Self::Right,
            Self::Right => Self::Left,
        }
    }
}

/// Stage coordinates, in mm, of pixel `(0, 0)` for one side of the bed.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SideAnchor {
    /// Offset along the stage travel axis (bitmap rows).
    pub x: f64,
    /// Offset along the head sweep axis (bitmap columns).
    pub y: f64,
}

impl SideAnchor {
    pub fn new(x: f64, y: f64) -> Self {
        SideAnchor { x, y }
    }
}

/// Order in which the renderer stage takes pages from its input queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageOrder {
    /// Pages print in the order they were submitted.
    Fifo,
    /// Last submitted page prints first.
    Lifo,
}

/// Print job configuration.
///
/// Speeds are feed rates in mm/min, positions are stage coordinates in mm.
#[derive(Debug, Clone)]
pub struct PrintConfig {
    resolution: f64,
    threshold: u8,
    left: SideAnchor,
    right: SideAnchor,
    side: Side,
    travel_speed: f64,
    print_speed: f64,
    acceleration_distance: f64,
    park: (f64, f64),
    park_speed: f64,
    home_before_page: bool,
    poll_interval: Duration,
    idle_timeout: Duration,
    move_timeout: Duration,
    line_gap: Duration,
    page_order: PageOrder,
    queue_depth: usize,
}

impl PrintConfig {
    /// Initialize configuration data with default values.
    ///
    /// `resolution` is in dots per inch and must match the resolution the
    /// head is set to.
    ///
    /// # Example
    ///
    /// ```
    /// use sweepjet::{PrintConfig, Side};
    ///
    /// let config = PrintConfig::new(600.0)
    ///     .start_side(Side::Left)
    ///     .print_speed(6000.0);
    /// assert!(config.validate().is_ok());
    /// ```
    pub fn new(resolution: f64) -> PrintConfig {
        PrintConfig {
            resolution,
            threshold: 128,
            left: SideAnchor::new(90.0, 12.0),
            right: SideAnchor::new(90.0, 225.0),
            side: Side::Right,
            travel_speed: 12000.0,
            print_speed: 8000.0,
            acceleration_distance: 5.0,
            park: (5.0, 433.0),
            park_speed: 20000.0,
            home_before_page: true,
            poll_interval: Duration::from_millis(10),
            idle_timeout: Duration::from_secs(60),
            move_timeout: Duration::from_secs(120),
            line_gap: Duration::from_millis(1),
            page_order: PageOrder::Fifo,
            queue_depth: 2,
        }
    }

    /// Luminance below which a pixel is printed.
    pub fn threshold(self, threshold: u8) -> Self {
        PrintConfig { threshold, ..self }
    }

    pub fn left_anchor(self, left: SideAnchor) -> Self {
        PrintConfig { left, ..self }
    }

    pub fn right_anchor(self, right: SideAnchor) -> Self {
        PrintConfig { right, ..self }
    }

    /// Side used by the first page of a session.
    pub fn start_side(self, side: Side) -> Self {
        PrintConfig { side, ..self }
    }

    pub fn travel_speed(self, travel_speed: f64) -> Self {
        PrintConfig {
            travel_speed,
            ..self
        }
    }

    pub fn print_speed(self, print_speed: f64) -> Self {
        PrintConfig {
            print_speed,
            ..self
        }
    }

    /// Run-up added before and after each sweep so the head moves at print
    /// speed over the inked columns.
    pub fn acceleration_distance(self, acceleration_distance: f64) -> Self {
        PrintConfig {
            acceleration_distance,
            ..self
        }
    }

    pub fn park_at(self, x: f64, y: f64, speed: f64) -> Self {
        PrintConfig {
            park: (x, y),
            park_speed: speed,
            ..self
        }
    }

    pub fn home_before_page(self, flag: bool) -> Self {
        PrintConfig {
            home_before_page: flag,
            ..self
        }
    }

    /// Slice used when waiting on device status; abort is sampled once per slice.
    pub fn poll_interval(self, poll_interval: Duration) -> Self {
        PrintConfig {
            poll_interval,
            ..self
        }
    }

    /// Deadlines for the stage to become idle, and for a sweep move to finish.
    pub fn timeouts(self, idle_timeout: Duration, move_timeout: Duration) -> Self {
        PrintConfig {
            idle_timeout,
            move_timeout,
            ..self
        }
    }

    /// Pause between two head commands. The head firmware has no flow control.
    pub fn line_gap(self, line_gap: Duration) -> Self {
        PrintConfig { line_gap, ..self }
    }

    pub fn page_order(self, page_order: PageOrder) -> Self {
        PrintConfig { page_order, ..self }
    }

    /// Number of rendered pages allowed to wait for the printer.
    pub fn queue_depth(self, queue_depth: usize) -> Self {
        PrintConfig {
            queue_depth,
            ..self
        }
    }

    pub fn resolution(&self) -> f64 {
        self.resolution
    }

    pub fn threshold_value(&self) -> u8 {
        self.threshold
    }

    pub fn anchor(&self, side: Side) -> SideAnchor {
        match side {
            Side::Left => self.left,
            Side::Right => self.right,
        }
    }

    pub fn side(&self) -> Side {
        self.side
    }

    pub fn speeds(&self) -> (f64, f64) {
        (self.travel_speed, self.print_speed)
    }

    pub fn acceleration(&self) -> f64 {
        self.acceleration_distance
    }

    pub fn park(&self) -> (f64, f64, f64) {
        (self.park.0, self.park.1, self.park_speed)
    }

    pub fn homes_before_page(&self) -> bool {
        self.home_before_page
    }

    pub fn poll(&self) -> Duration {
        self.poll_interval
    }

    pub fn idle_deadline(&self) -> Duration {
        self.idle_timeout
    }

    pub fn move_deadline(&self) -> Duration {
        self.move_timeout
    }

    pub fn gap(&self) -> Duration {
        self.line_gap
    }

    pub fn order(&self) -> PageOrder {
        self.page_order
    }

    pub fn depth(&self) -> usize {
        self.queue_depth
    }

    /// Check values before a job starts.
    pub fn validate(&self) -> Result<(), Error> {
        debug!("{:?}", self);

        if !self.resolution.is_finite() || self.resolution < 2.0 {
            return Err(Error::InvalidConfig(format!(
                "resolution must be at least 2 dpi, got {}",
                self.resolution
            )));
        }
        for (name, speed) in [
            ("travel speed", self.travel_speed),
            ("print speed", self.print_speed),
            ("park speed", self.park_speed),
        ] {
            if !speed.is_finite() || speed <= 0.0 {
                return Err(Error::InvalidConfig(format!(
                    "{} must be positive, got {}",
                    name, speed
                )));
            }
        }
        if !self.acceleration_distance.is_finite() || self.acceleration_distance < 0.0 {
            return Err(Error::InvalidConfig(format!(
                "acceleration distance must not be negative, got {}",
                self.acceleration_distance
            )));
        }
        if self.poll_interval.is_zero() {
            return Err(Error::InvalidConfig("poll interval must not be zero".into()));
        }
        if self.queue_depth == 0 {
            return Err(Error::InvalidConfig("queue depth must be at least 1".into()));
        }
        Ok(())
    }
}

impl Default for PrintConfig {
    fn default() -> Self {
        PrintConfig::new(300.0)
    }
}
