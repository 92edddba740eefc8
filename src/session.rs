//! Print session: operator control and side alternation.
//!
//! [`SessionControl`] is shared between the thread printing a job and the
//! thread taking operator input. Its flags are only looked at between sweeps
//! and pages; a sweep that has started always runs to completion.

use log::info;
use parking_lot::{Condvar, Mutex};
use std::sync::Arc;

use crate::config::{PrintConfig, Side};
use crate::device::{HeadInterface, MotionInterface};
use crate::error::Error;
use crate::event::{Event, EventSink};
use crate::line::{Base64Encoder, LineEncoder};
use crate::pipeline::{self, PageInput};

/// What to do at a checkpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Abort,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Printing,
    Paused,
    Aborting,
}

#[derive(Debug, Default)]
struct Flags {
    printing: bool,
    paused: bool,
    abort: bool,
    release: bool,
}

/// Pause, abort and continue requests for a running job.
#[derive(Debug, Default)]
pub struct SessionControl {
    flags: Mutex<Flags>,
    changed: Condvar,
}

impl SessionControl {
    pub fn new() -> Self {
        SessionControl::default()
    }

    fn update(&self, f: impl FnOnce(&mut Flags)) {
        f(&mut self.flags.lock());
        self.changed.notify_all();
    }

    /// Mark a job as running and forget requests left from the previous one.
    pub fn begin(&self) {
        self.update(|flags| {
            *flags = Flags {
                printing: true,
                ..Flags::default()
            }
        });
    }

    pub fn finish(&self) {
        self.update(|flags| *flags = Flags::default());
    }

    pub fn pause(&self) {
        self.update(|flags| flags.paused = true);
    }

    pub fn resume(&self) {
        self.update(|flags| flags.paused = false);
    }

    /// Flip between paused and running, returning `true` if now paused.
    pub fn toggle_pause(&self) -> bool {
        let mut paused = false;
        self.update(|flags| {
            flags.paused = !flags.paused;
            paused = flags.paused;
        });
        paused
    }

    /// Stop the job at the next sweep or page boundary.
    pub fn abort(&self) {
        self.update(|flags| flags.abort = true);
    }

    pub fn is_aborted(&self) -> bool {
        self.flags.lock().abort
    }

    pub fn is_paused(&self) -> bool {
        self.flags.lock().paused
    }

    /// Block while paused. Returns `Flow::Abort` once abort is requested.
    pub fn checkpoint(&self) -> Flow {
        let mut flags = self.flags.lock();
        self.changed
            .wait_while(&mut flags, |flags| flags.paused && !flags.abort);
        if flags.abort {
            Flow::Abort
        } else {
            Flow::Continue
        }
    }

    /// Let a manual job move on to its next page.
    pub fn release_page(&self) {
        self.update(|flags| flags.release = true);
    }

    /// Block until the next page is released or the job is aborted.
    pub fn wait_for_continue(&self) -> Flow {
        let mut flags = self.flags.lock();
        self.changed
            .wait_while(&mut flags, |flags| !flags.release && !flags.abort);
        if flags.abort {
            return Flow::Abort;
        }
        flags.release = false;
        Flow::Continue
    }

    pub fn state(&self) -> SessionState {
        let flags = self.flags.lock();
        if !flags.printing {
            SessionState::Idle
        } else if flags.abort {
            SessionState::Aborting
        } else if flags.paused {
            SessionState::Paused
        } else {
            SessionState::Printing
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobOutcome {
    Completed,
    Aborted,
}

/// Summary of a finished job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobReport {
    /// Pages in the order they went through the printer stage.
    pub printed: Vec<usize>,
    /// Pages that failed to render.
    pub skipped: Vec<usize>,
    pub outcome: JobOutcome,
    /// Side the next job starts on.
    pub side: Side,
}

/// Runs print jobs on a pair of devices.
///
/// The side flips after every page that was actually printed, so facing
/// pages of consecutive jobs land on alternating sides of the bed.
pub struct PrintSession {
    config: PrintConfig,
    side: Side,
    control: Arc<SessionControl>,
    events: EventSink,
    encoder: Box<dyn LineEncoder>,
}

impl PrintSession {
    pub fn new(config: PrintConfig) -> Result<Self, Error> {
        config.validate()?;
        Ok(PrintSession {
            side: config.side(),
            config,
            control: Arc::new(SessionControl::new()),
            events: EventSink::silent(),
            encoder: Box::new(Base64Encoder),
        })
    }

    pub fn with_events(mut self, events: EventSink) -> Self {
        self.events = events;
        self
    }

    pub fn with_encoder(mut self, encoder: Box<dyn LineEncoder>) -> Self {
        self.encoder = encoder;
        self
    }

    pub fn config(&self) -> &PrintConfig {
        &self.config
    }

    /// Handle for pausing, aborting and releasing pages from another thread.
    pub fn control(&self) -> Arc<SessionControl> {
        self.control.clone()
    }

    pub fn side(&self) -> Side {
        self.side
    }

    pub fn state(&self) -> SessionState {
        self.control.state()
    }

    /// Print `pages`, rendering ahead while printing.
    pub fn print(
        &mut self,
        motion: &mut dyn MotionInterface,
        head: &mut dyn HeadInterface,
        pages: Vec<PageInput>,
    ) -> Result<JobReport, Error> {
        self.run(motion, head, pages, false)
    }

    /// Print `pages` in order, waiting for [`SessionControl::release_page`]
    /// after each page but the last.
    pub fn print_manual(
        &mut self,
        motion: &mut dyn MotionInterface,
        head: &mut dyn HeadInterface,
        pages: Vec<PageInput>,
    ) -> Result<JobReport, Error> {
        self.run(motion, head, pages, true)
    }

    fn run(
        &mut self,
        motion: &mut dyn MotionInterface,
        head: &mut dyn HeadInterface,
        pages: Vec<PageInput>,
        manual: bool,
    ) -> Result<JobReport, Error> {
        self.control.begin();
        self.events.emit(Event::JobStarted { pages: pages.len() });

        let job = pipeline::Job {
            config: &self.config,
            control: &self.control,
            events: &self.events,
            encoder: self.encoder.as_ref(),
            manual,
        };
        let result = job.run(motion, head, pages, &mut self.side);
        self.control.finish();

        let report = result?;
        info!(
            "job {:?}: {} printed, {} skipped, next side {:?}",
            report.outcome,
            report.printed.len(),
            report.skipped.len(),
            report.side
        );
        self.events.emit(Event::JobFinished {
            printed: report.printed.len(),
            skipped: report.skipped.len(),
        });
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn state_follows_flags() {
        let control = SessionControl::new();
        assert_eq!(control.state(), SessionState::Idle);
        control.begin();
        assert_eq!(control.state(), SessionState::Printing);
        assert!(control.toggle_pause());
        assert_eq!(control.state(), SessionState::Paused);
        control.abort();
        assert_eq!(control.state(), SessionState::Aborting);
        control.finish();
        assert_eq!(control.state(), SessionState::Idle);
        assert!(!control.is_aborted());
    }

    #[test]
    fn checkpoint_blocks_while_paused() {
        let control = Arc::new(SessionControl::new());
        control.begin();
        control.pause();

        let resumer = {
            let control = control.clone();
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(20));
                control.resume();
            })
        };
        assert_eq!(control.checkpoint(), Flow::Continue);
        assert!(!control.is_paused());
        resumer.join().unwrap();
    }

    #[test]
    fn abort_wakes_a_paused_checkpoint() {
        let control = Arc::new(SessionControl::new());
        control.begin();
        control.pause();

        let aborter = {
            let control = control.clone();
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(20));
                control.abort();
            })
        };
        assert_eq!(control.checkpoint(), Flow::Abort);
        aborter.join().unwrap();
    }

    #[test]
    fn continue_is_consumed_once() {
        let control = SessionControl::new();
        control.begin();
        control.release_page();
        assert_eq!(control.wait_for_continue(), Flow::Continue);

        control.abort();
        assert_eq!(control.wait_for_continue(), Flow::Abort);
    }

    #[test]
    fn begin_forgets_previous_abort() {
        let control = SessionControl::new();
        control.begin();
        control.abort();
        control.begin();
        assert_eq!(control.checkpoint(), Flow::Continue);
    }

    #[test]
    fn invalid_config_is_rejected() {
        let config = PrintConfig::new(300.0).queue_depth(0);
        assert!(matches!(
            PrintSession::new(config),
            Err(Error::InvalidConfig(_))
        ));
    }
}
