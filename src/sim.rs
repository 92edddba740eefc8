//! In-process stand-ins for the stage and the head.
//!
//! Both record what they are asked to do into a shared [`SimLog`], in order,
//! so a job can be replayed and checked without hardware.

use log::debug;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc::{self, Sender};
use parking_lot::Mutex;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::device::{HeadInterface, MotionInterface, MotionState, MotionStatus};
use crate::emitter::Command;
use crate::error::{Device, Error, MotionError};
use crate::status::StatusCell;

#[derive(Debug, Clone, PartialEq)]
pub enum DeviceOp {
    Home,
    Move { x: f64, y: f64, speed: f64 },
    ClearBuffer,
    SetResolution(u32),
    SetPosition(i64),
    WriteLine { micron: i64, payload: String },
}

/// Ordered record of device operations shared by a stage and a head.
#[derive(Debug, Clone, Default)]
pub struct SimLog {
    ops: Arc<Mutex<Vec<DeviceOp>>>,
}

impl SimLog {
    pub fn new() -> Self {
        SimLog::default()
    }

    fn record(&self, op: DeviceOp) {
        debug!("sim: {:?}", op);
        self.ops.lock().push(op);
    }

    pub fn ops(&self) -> Vec<DeviceOp> {
        self.ops.lock().clone()
    }

    pub fn moves(&self) -> Vec<(f64, f64, f64)> {
        self.ops()
            .into_iter()
            .filter_map(|op| match op {
                DeviceOp::Move { x, y, speed } => Some((x, y, speed)),
                _ => None,
            })
            .collect()
    }

    pub fn line_count(&self) -> usize {
        self.ops()
            .iter()
            .filter(|op| matches!(op, DeviceOp::WriteLine { .. }))
            .count()
    }

    pub fn clear(&self) {
        self.ops.lock().clear();
    }
}

type MoveHook = Box<dyn FnMut(usize) + Send>;

struct Worker {
    moves: Sender<(f64, f64)>,
    handle: JoinHandle<()>,
}

/// A stage that reaches every target, optionally after a delay.
pub struct SimStage {
    log: SimLog,
    status: Arc<StatusCell<MotionStatus>>,
    connected: bool,
    move_delay: Duration,
    responsive: bool,
    reject: Option<usize>,
    on_move: Option<MoveHook>,
    moves: usize,
    queued: Arc<AtomicUsize>,
    worker: Option<Worker>,
}

impl SimStage {
    pub fn new(log: SimLog) -> Self {
        SimStage {
            log,
            status: Arc::new(StatusCell::new(
                MotionStatus::default().with_state(MotionState::Idle),
            )),
            connected: false,
            move_delay: Duration::ZERO,
            responsive: true,
            reject: None,
            on_move: None,
            moves: 0,
            queued: Arc::new(AtomicUsize::new(0)),
            worker: None,
        }
    }

    /// Each move takes `delay` before the stage reports idle again.
    pub fn move_delay(mut self, move_delay: Duration) -> Self {
        self.move_delay = move_delay;
        self
    }

    /// Accept moves but never report any progress.
    pub fn unresponsive(mut self) -> Self {
        self.responsive = false;
        self
    }

    /// Refuse the `n`th move, counted from 1, as past the soft limits.
    pub fn reject_move(mut self, n: usize) -> Self {
        self.reject = Some(n);
        self
    }

    /// Call `hook` with the running move count after every accepted move.
    pub fn on_move(mut self, hook: impl FnMut(usize) + Send + 'static) -> Self {
        self.on_move = Some(Box::new(hook));
        self
    }

    fn spawn_worker(&mut self) -> Result<(), Error> {
        let (tx, rx) = mpsc::channel::<(f64, f64)>();
        let status = self.status.clone();
        let queued = self.queued.clone();
        let delay = self.move_delay;
        let handle = thread::Builder::new()
            .name("sim-stage".to_string())
            .spawn(move || {
                for (x, y) in rx {
                    status.modify(|s| s.with_state(MotionState::Run));
                    thread::sleep(delay);
                    let left = queued.fetch_sub(1, Ordering::SeqCst) - 1;
                    status.modify(|s| {
                        let s = s.with_position(x, y);
                        // Buffered moves keep the stage running.
                        if left == 0 {
                            s.with_state(MotionState::Idle)
                        } else {
                            s
                        }
                    });
                }
            })?;
        self.worker = Some(Worker { moves: tx, handle });
        Ok(())
    }
}

impl Drop for SimStage {
    fn drop(&mut self) {
        self.disconnect();
    }
}

impl MotionInterface for SimStage {
    fn connect(&mut self, _port: &str) -> Result<(), Error> {
        if !self.move_delay.is_zero() && self.worker.is_none() {
            self.spawn_worker()?;
        }
        self.connected = true;
        Ok(())
    }

    fn disconnect(&mut self) {
        self.connected = false;
        if let Some(worker) = self.worker.take() {
            drop(worker.moves);
            let _ = worker.handle.join();
        }
    }

    fn is_connected(&self) -> bool {
        self.connected
    }

    fn home(&mut self) -> Result<(), Error> {
        if !self.connected {
            return Err(Error::DeviceNotConnected(Device::Motion));
        }
        self.log.record(DeviceOp::Home);
        if self.responsive {
            self.status.modify(|s| {
                s.with_state(MotionState::Home)
                    .with_position(0.0, 0.0)
                    .with_state(MotionState::Idle)
            });
        }
        Ok(())
    }

    fn move_to(&mut self, x: f64, y: f64, speed: f64) -> Result<(), Error> {
        if !self.connected {
            return Err(Error::DeviceNotConnected(Device::Motion));
        }
        self.moves += 1;
        if self.reject == Some(self.moves) {
            return Err(Error::Motion(MotionError::SoftLimit));
        }
        self.log.record(DeviceOp::Move { x, y, speed });

        if self.responsive {
            match &self.worker {
                Some(worker) => {
                    self.queued.fetch_add(1, Ordering::SeqCst);
                    if worker.moves.send((x, y)).is_err() {
                        return Err(Error::DeviceNotConnected(Device::Motion));
                    }
                }
                None => self.status.modify(|s| {
                    s.with_state(MotionState::Run)
                        .with_position(x, y)
                        .with_state(MotionState::Idle)
                }),
            }
        }

        if let Some(hook) = self.on_move.as_mut() {
            hook(self.moves);
        }
        Ok(())
    }

    fn status(&self) -> Arc<StatusCell<MotionStatus>> {
        self.status.clone()
    }
}

/// A head that accepts every command.
pub struct SimHead {
    log: SimLog,
    connected: bool,
}

impl SimHead {
    pub fn new(log: SimLog) -> Self {
        SimHead {
            log,
            connected: false,
        }
    }

    fn check(&self) -> Result<(), Error> {
        if self.connected {
            Ok(())
        } else {
            Err(Error::DeviceNotConnected(Device::Head))
        }
    }
}

impl HeadInterface for SimHead {
    fn connect(&mut self, _port: &str) -> Result<(), Error> {
        self.connected = true;
        Ok(())
    }

    fn disconnect(&mut self) {
        self.connected = false;
    }

    fn is_connected(&self) -> bool {
        self.connected
    }

    fn clear_buffer(&mut self) -> Result<(), Error> {
        self.check()?;
        self.log.record(DeviceOp::ClearBuffer);
        Ok(())
    }

    fn write_line(&mut self, command: &Command) -> Result<(), Error> {
        self.check()?;
        self.log.record(DeviceOp::WriteLine {
            micron: command.micron(),
            payload: command.payload.clone(),
        });
        Ok(())
    }

    fn set_position(&mut self, micron: i64) -> Result<(), Error> {
        self.check()?;
        self.log.record(DeviceOp::SetPosition(micron));
        Ok(())
    }

    fn set_resolution(&mut self, dpi: u32) -> Result<(), Error> {
        self.check()?;
        self.log.record(DeviceOp::SetResolution(dpi));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicBool;

    #[test]
    fn instant_moves_bump_index_and_end_idle() {
        let log = SimLog::new();
        let mut stage = SimStage::new(log.clone());
        stage.connect("sim").unwrap();
        let before = stage.status_index();
        stage.move_to(1.0, 2.0, 100.0).unwrap();
        assert_eq!(stage.reported_state(), MotionState::Idle);
        assert!(stage.status_index() > before);
        assert_eq!(stage.current_position(), (1.0, 2.0));
        assert_eq!(log.moves(), vec![(1.0, 2.0, 100.0)]);
    }

    #[test]
    fn delayed_moves_stay_running_until_queue_drains() {
        let mut stage = SimStage::new(SimLog::new()).move_delay(Duration::from_millis(20));
        stage.connect("sim").unwrap();
        stage.move_to(1.0, 1.0, 100.0).unwrap();
        stage.move_to(2.0, 2.0, 100.0).unwrap();

        let status = stage.status();
        let done = status
            .wait_for(Duration::from_secs(5), |s| s.is_idle() && s.x == 2.0)
            .unwrap();
        assert_eq!((done.x, done.y), (2.0, 2.0));
    }

    #[test]
    fn unresponsive_stage_never_changes() {
        let mut stage = SimStage::new(SimLog::new()).unresponsive();
        stage.connect("sim").unwrap();
        let before = stage.status_index();
        stage.move_to(1.0, 1.0, 100.0).unwrap();
        assert_eq!(stage.status_index(), before);
    }

    #[test]
    fn hook_sees_move_count() {
        let fired = Arc::new(AtomicBool::new(false));
        let flag = fired.clone();
        let mut stage = SimStage::new(SimLog::new()).on_move(move |n| {
            if n == 2 {
                flag.store(true, Ordering::SeqCst);
            }
        });
        stage.connect("sim").unwrap();
        stage.move_to(0.0, 0.0, 1.0).unwrap();
        assert!(!fired.load(Ordering::SeqCst));
        stage.move_to(0.0, 0.0, 1.0).unwrap();
        assert!(fired.load(Ordering::SeqCst));
    }

    #[test]
    fn rejected_move_is_not_logged() {
        let log = SimLog::new();
        let mut stage = SimStage::new(log.clone()).reject_move(2);
        stage.connect("sim").unwrap();
        stage.move_to(1.0, 1.0, 100.0).unwrap();
        assert!(matches!(
            stage.move_to(2.0, 2.0, 100.0),
            Err(Error::Motion(MotionError::SoftLimit))
        ));
        stage.move_to(3.0, 3.0, 100.0).unwrap();
        assert_eq!(log.moves(), vec![(1.0, 1.0, 100.0), (3.0, 3.0, 100.0)]);
    }

    #[test]
    fn disconnected_devices_refuse_work() {
        let mut stage = SimStage::new(SimLog::new());
        assert!(matches!(
            stage.move_to(0.0, 0.0, 1.0),
            Err(Error::DeviceNotConnected(Device::Motion))
        ));
        let mut head = SimHead::new(SimLog::new());
        assert!(matches!(
            head.set_position(0),
            Err(Error::DeviceNotConnected(Device::Head))
        ));
    }
}
