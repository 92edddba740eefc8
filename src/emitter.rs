//! Head command buffers.
//!
//! Each sweep becomes a FIFO of position-tagged lines: a blank lead cap one
//! pixel before the first inked column, the scan lines, and a blank trailing
//! cap one pixel past the last one. The stage run-up is added to the travel
//! positions, the caps stay at one pixel.

use std::collections::VecDeque;

use crate::line::SweepLines;
use crate::position::{mm_to_micron, PositionMapper};
use crate::sweep::{Direction, SweepBand};

/// Fire `payload` from `position` (mm, head sweep axis) onward.
#[derive(Debug, Clone, PartialEq)]
pub struct Command {
    pub position: f64,
    pub payload: String,
}

impl Command {
    /// Position in the head's native unit.
    pub fn micron(&self) -> i64 {
        mm_to_micron(self.position)
    }
}

/// Ordered head commands of one sweep, consumed front first.
#[derive(Debug, Clone, Default)]
pub struct CommandBuffer {
    commands: VecDeque<Command>,
}

impl CommandBuffer {
    pub fn push(&mut self, command: Command) {
        self.commands.push_back(command);
    }

    pub fn pop(&mut self) -> Option<Command> {
        self.commands.pop_front()
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Command> {
        self.commands.iter()
    }
}

/// Everything the synchronizer needs to run one sweep.
#[derive(Debug, Clone)]
pub struct SweepCommands {
    /// Position of the sweep in its page, from 0.
    pub index: usize,
    pub band: SweepBand,
    /// Stage travel axis position of the band's first row.
    pub x: f64,
    /// Head sweep axis position where the approach move ends.
    pub travel_start: f64,
    /// Head sweep axis position where the print move ends.
    pub travel_end: f64,
    pub buffer: CommandBuffer,
}

impl SweepCommands {
    /// Build the command buffer of a planned sweep. Blank sweeps give `None`.
    pub fn emit(
        index: usize,
        sweep: &SweepLines,
        mapper: &PositionMapper,
        acceleration: f64,
    ) -> Option<Self> {
        let (y_min, y_max) = sweep.columns?;
        let (y_min, y_max) = (y_min as i64, y_max as i64);

        let (lead, trail, travel_start, travel_end) = match sweep.band.direction {
            Direction::Forward => (
                y_min - 1,
                y_max + 1,
                mapper.column_mm(y_min) - acceleration,
                mapper.column_mm(y_max) + acceleration,
            ),
            Direction::Reverse => (
                y_max + 1,
                y_min - 1,
                mapper.column_mm(y_max) + acceleration,
                mapper.column_mm(y_min) - acceleration,
            ),
        };

        let mut buffer = CommandBuffer::default();
        buffer.push(Command {
            position: mapper.column_mm(lead),
            payload: sweep.blank.clone(),
        });
        for line in &sweep.lines {
            buffer.push(Command {
                position: mapper.column_mm(line.column as i64),
                payload: line.token.clone(),
            });
        }
        buffer.push(Command {
            position: mapper.column_mm(trail),
            payload: sweep.blank.clone(),
        });

        Some(SweepCommands {
            index,
            band: sweep.band,
            x: mapper.row_mm(sweep.band.x_start as i64),
            travel_start,
            travel_end,
            buffer,
        })
    }
}
