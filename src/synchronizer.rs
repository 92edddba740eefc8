//! Interleaves head commands with stage moves, one sweep at a time.
//!
//! Every sweep goes through the same steps:
//!
//! 1. wait for the stage to report idle,
//! 2. tell the head where the stage is along the sweep axis,
//! 3. drain the sweep's command buffer into the head,
//! 4. note the status index and queue the approach and print moves,
//! 5. wait until the status index moved on and the stage is idle again.
//!
//! The head only fires once the stage carries it past a line's position, so
//! the buffer has to be complete before the print move starts. The next sweep
//! does not begin before the stage confirmed the previous print move.

use log::{debug, info, warn};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use crate::config::{PrintConfig, Side};
use crate::device::{HeadInterface, MotionInterface, MotionState, MotionStatus};
use crate::emitter::SweepCommands;
use crate::error::{Device, Error, MotionError};
use crate::event::{Event, EventSink};
use crate::line::PagePlan;
use crate::position::{mm_to_micron, PositionMapper};
use crate::session::{Flow, SessionControl};
use crate::status::StatusCell;

/// How a page ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageOutcome {
    /// Every sweep was printed and confirmed.
    Completed,
    /// Nothing to print, no device was touched.
    Blank,
    /// Stopped at a sweep boundary on request.
    Aborted,
}

pub struct Synchronizer<'a> {
    motion: &'a mut dyn MotionInterface,
    head: &'a mut dyn HeadInterface,
    config: &'a PrintConfig,
    control: &'a SessionControl,
    events: &'a EventSink,
}

impl<'a> Synchronizer<'a> {
    pub fn new(
        motion: &'a mut dyn MotionInterface,
        head: &'a mut dyn HeadInterface,
        config: &'a PrintConfig,
        control: &'a SessionControl,
        events: &'a EventSink,
    ) -> Self {
        Synchronizer {
            motion,
            head,
            config,
            control,
            events,
        }
    }

    /// Print one planned page on `side`.
    ///
    /// Errors carry the page and sweep they happened in.
    pub fn print_page(&mut self, page: usize, plan: &PagePlan, side: Side) -> Result<PageOutcome, Error> {
        if !self.motion.is_connected() {
            return Err(Error::DeviceNotConnected(Device::Motion));
        }
        if !self.head.is_connected() {
            return Err(Error::DeviceNotConnected(Device::Head));
        }
        if plan.is_empty() {
            info!("page {} is blank", page + 1);
            return Ok(PageOutcome::Blank);
        }

        self.events.emit(Event::PageStarted { page, side });
        self.prepare(plan).map_err(|e| e.in_sweep(page, 0))?;

        let mapper = PositionMapper::new(plan.resolution, self.config.anchor(side));
        let sweeps = plan.sweeps.len();
        for (index, lines) in plan.sweeps.iter().enumerate() {
            if self.control.checkpoint() == Flow::Abort {
                info!("abort requested before sweep {} of page {}", index + 1, page + 1);
                self.park().map_err(|e| e.in_page(page))?;
                self.events.emit(Event::Aborted { page });
                return Ok(PageOutcome::Aborted);
            }

            let Some(commands) =
                SweepCommands::emit(index, lines, &mapper, self.config.acceleration())
            else {
                debug!("sweep {} of page {} is blank", index + 1, page + 1);
                continue;
            };

            match self.run_sweep(commands) {
                Ok(true) => {}
                Ok(false) => {
                    self.park().map_err(|e| e.in_page(page))?;
                    self.events.emit(Event::Aborted { page });
                    return Ok(PageOutcome::Aborted);
                }
                Err(err) => return Err(err.in_sweep(page, index)),
            }
            self.events.emit(Event::SweepDone {
                page,
                sweep: index,
                sweeps,
            });
        }

        self.park().map_err(|e| e.in_page(page))?;
        self.events.emit(Event::PageDone { page });
        Ok(PageOutcome::Completed)
    }

    fn prepare(&mut self, plan: &PagePlan) -> Result<(), Error> {
        self.head.clear_buffer()?;
        if self.config.homes_before_page() {
            self.motion.home()?;
        }
        self.head.set_resolution(plan.resolution.round() as u32)
    }

    fn park(&mut self) -> Result<(), Error> {
        let (x, y, speed) = self.config.park();
        self.motion.move_to(x, y, speed)
    }

    /// Run one sweep. `Ok(false)` means it was cancelled while waiting for
    /// the stage, before anything was sent.
    fn run_sweep(&mut self, mut commands: SweepCommands) -> Result<bool, Error> {
        debug!(
            "sweep {}: rows {:?} {:?}, x {:.3}, y {:.3} -> {:.3}, {} commands",
            commands.index + 1,
            commands.band.rows(),
            commands.band.direction,
            commands.x,
            commands.travel_start,
            commands.travel_end,
            commands.buffer.len()
        );

        // AwaitIdle
        let status = self.motion.status();
        let idle = self.wait_for(
            &status,
            self.config.idle_deadline(),
            "stage idle",
            true,
            |s| s.is_idle(),
        )?;
        let Some(idle) = idle else {
            return Ok(false);
        };

        // Correlate
        self.head.set_position(mm_to_micron(idle.y))?;

        // Drain
        let gap = self.config.gap();
        while let Some(command) = commands.buffer.pop() {
            self.head.write_line(&command)?;
            if !gap.is_zero() {
                thread::sleep(gap);
            }
        }

        // Move
        let index = self.motion.status_index();
        let (travel_speed, print_speed) = self.config.speeds();
        self.motion
            .move_to(commands.x, commands.travel_start, travel_speed)?;
        self.motion
            .move_to(commands.x, commands.travel_end, print_speed)?;

        // AwaitComplete
        self.wait_for(
            &status,
            self.config.move_deadline(),
            "sweep move",
            false,
            |s| s.index != index && s.is_idle(),
        )?;
        Ok(true)
    }

    /// Wait for `ready` in poll slices until `deadline` elapsed.
    ///
    /// A cancellable wait gives `Ok(None)` once abort is requested.
    fn wait_for(
        &self,
        status: &StatusCell<MotionStatus>,
        deadline: Duration,
        waiting_for: &'static str,
        cancellable: bool,
        mut ready: impl FnMut(&MotionStatus) -> bool,
    ) -> Result<Option<Arc<MotionStatus>>, Error> {
        let start = Instant::now();
        let slice = self.config.poll();

        loop {
            let alarmed = |s: &MotionStatus| s.state == MotionState::Alarm;
            if let Some(snapshot) = status.wait_for(slice, |s| ready(s) || alarmed(s)) {
                if alarmed(&snapshot) {
                    let alarm = snapshot.alarm.unwrap_or(MotionError::UnknownAlarm(0));
                    warn!("stage in alarm while waiting for {}: {}", waiting_for, alarm);
                    return Err(Error::Motion(alarm));
                }
                return Ok(Some(snapshot));
            }
            if cancellable && self.control.is_aborted() {
                return Ok(None);
            }
            let waited = start.elapsed();
            if waited >= deadline {
                return Err(Error::DeviceUnresponsive {
                    device: Device::Motion,
                    waiting_for,
                    waited,
                });
            }
        }
    }
}
