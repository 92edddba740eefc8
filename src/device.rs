//! Capability interfaces of the motion stage and the print head.
//!
//! The synchronizer only talks to hardware through these traits. Each
//! hardware variant (GRBL stage, HP45 head, simulated devices) implements
//! them and is picked when the session is configured.

use std::sync::Arc;

use crate::emitter::Command;
use crate::error::{Error, MotionError};
use crate::status::StatusCell;

/// Machine state as reported by the motion controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MotionState {
    Idle,
    Run,
    Jog,
    Home,
    Hold,
    Alarm,
    Door,
    Check,
    Sleep,
    Unknown,
}

impl MotionState {
    /// Parse the state field of a status report, e.g. `Idle` or `Hold:0`.
    pub fn from_report(field: &str) -> Self {
        let name = field.split(':').next().unwrap_or("").trim();
        match name.to_ascii_lowercase().as_str() {
            "idle" => Self::Idle,
            "run" => Self::Run,
            "jog" => Self::Jog,
            "home" => Self::Home,
            "hold" => Self::Hold,
            "alarm" => Self::Alarm,
            "door" => Self::Door,
            "check" => Self::Check,
            "sleep" => Self::Sleep,
            _ => Self::Unknown,
        }
    }
}

/// Latest known state of the stage.
#[derive(Debug, Clone, PartialEq)]
pub struct MotionStatus {
    pub state: MotionState,
    pub x: f64,
    pub y: f64,
    /// Bumped on every state transition.
    pub index: u64,
    /// Last alarm raised by the controller, cleared when the alarm state ends.
    pub alarm: Option<MotionError>,
}

impl Default for MotionStatus {
    fn default() -> Self {
        MotionStatus {
            state: MotionState::Unknown,
            x: 0.0,
            y: 0.0,
            index: 0,
            alarm: None,
        }
    }
}

impl MotionStatus {
    /// Same status in `state`, with the index bumped if the state changed.
    pub fn with_state(&self, state: MotionState) -> Self {
        let index = if state != self.state {
            self.index + 1
        } else {
            self.index
        };
        let alarm = if state == MotionState::Alarm {
            self.alarm
        } else {
            None
        };
        MotionStatus {
            state,
            index,
            alarm,
            ..self.clone()
        }
    }

    /// Enter the alarm state because of `alarm`.
    pub fn with_alarm(&self, alarm: MotionError) -> Self {
        MotionStatus {
            alarm: Some(alarm),
            ..self.with_state(MotionState::Alarm)
        }
    }

    pub fn with_position(&self, x: f64, y: f64) -> Self {
        MotionStatus {
            x,
            y,
            ..self.clone()
        }
    }

    pub fn is_idle(&self) -> bool {
        self.state == MotionState::Idle
    }
}

/// A two axis stage. X carries the bed under the head, Y sweeps the head.
pub trait MotionInterface: Send {
    fn connect(&mut self, port: &str) -> Result<(), Error>;

    fn disconnect(&mut self);

    fn is_connected(&self) -> bool;

    fn home(&mut self) -> Result<(), Error>;

    /// Queue a linear move. Returns once the controller accepted it, not
    /// when the move is done.
    fn move_to(&mut self, x: f64, y: f64, speed: f64) -> Result<(), Error>;

    /// Status snapshot handle, updated by the driver's reader.
    fn status(&self) -> Arc<StatusCell<MotionStatus>>;

    fn current_position(&self) -> (f64, f64) {
        let status = self.status().snapshot();
        (status.x, status.y)
    }

    fn reported_state(&self) -> MotionState {
        self.status().snapshot().state
    }

    fn status_index(&self) -> u64 {
        self.status().snapshot().index
    }
}

/// A print head firing position-correlated lines.
pub trait HeadInterface: Send {
    fn connect(&mut self, port: &str) -> Result<(), Error>;

    fn disconnect(&mut self);

    fn is_connected(&self) -> bool;

    /// Drop all lines the head still holds.
    fn clear_buffer(&mut self) -> Result<(), Error>;

    /// Append a line to the head's buffer.
    fn write_line(&mut self, command: &Command) -> Result<(), Error>;

    /// Tell the head where it is, in microns along the sweep axis.
    fn set_position(&mut self, micron: i64) -> Result<(), Error>;

    fn set_resolution(&mut self, _dpi: u32) -> Result<(), Error> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_state_names() {
        assert_eq!(MotionState::from_report("Idle"), MotionState::Idle);
        assert_eq!(MotionState::from_report("idle"), MotionState::Idle);
        assert_eq!(MotionState::from_report("Hold:1"), MotionState::Hold);
        assert_eq!(MotionState::from_report("Door:0"), MotionState::Door);
        assert_eq!(MotionState::from_report("Bogus"), MotionState::Unknown);
    }

    #[test]
    fn index_bumps_on_transitions_only() {
        let status = MotionStatus::default();
        let running = status.with_state(MotionState::Run);
        assert_eq!(running.index, 1);
        let still = running.with_state(MotionState::Run).with_position(1.0, 2.0);
        assert_eq!(still.index, 1);
        let idle = still.with_state(MotionState::Idle);
        assert_eq!(idle.index, 2);
        assert!(idle.is_idle());
        assert_eq!((idle.x, idle.y), (1.0, 2.0));
    }

    #[test]
    fn alarm_clears_when_state_leaves_alarm() {
        let alarmed = MotionStatus::default().with_alarm(MotionError::HardLimit);
        assert_eq!(alarmed.state, MotionState::Alarm);
        assert_eq!(alarmed.alarm, Some(MotionError::HardLimit));
        assert_eq!(alarmed.with_state(MotionState::Alarm).alarm, Some(MotionError::HardLimit));
        assert_eq!(alarmed.with_state(MotionState::Idle).alarm, None);
    }
}
