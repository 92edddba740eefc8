//! GRBL motion controller driver.
//!
//! Commands are sent one line at a time and each waits for its `ok`. A poller
//! thread sends the real-time status query `?` at a fixed interval; the reader
//! thread parses the `<State|MPos:x,y,z|...>` reports into the status cell.

use log::{debug, info, warn};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::device::{MotionInterface, MotionState, MotionStatus};
use crate::error::{Device, Error, MotionError};
use crate::serial::{SerialLink, DEFAULT_BAUD};
use crate::status::StatusCell;

/// Reply to a command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Reply {
    Ok,
    Rejected(MotionError),
}

struct Connection {
    link: SerialLink,
    replies: Receiver<Reply>,
    stop: Arc<AtomicBool>,
    threads: Vec<JoinHandle<()>>,
}

pub struct Grbl {
    connection: Option<Connection>,
    status: Arc<StatusCell<MotionStatus>>,
    baud: u32,
    status_interval: Duration,
    startup_delay: Duration,
    reply_timeout: Duration,
    home_timeout: Duration,
}

impl Grbl {
    /// A disconnected driver with default settings.
    pub fn new() -> Self {
        Grbl {
            connection: None,
            status: Arc::new(StatusCell::new(MotionStatus::default())),
            baud: DEFAULT_BAUD,
            status_interval: Duration::from_millis(100),
            startup_delay: Duration::from_secs(2),
            reply_timeout: Duration::from_secs(5),
            home_timeout: Duration::from_secs(60),
        }
    }

    pub fn baud(mut self, baud: u32) -> Self {
        self.baud = baud;
        self
    }

    pub fn status_interval(mut self, status_interval: Duration) -> Self {
        self.status_interval = status_interval;
        self
    }

    pub fn reply_timeout(mut self, reply_timeout: Duration) -> Self {
        self.reply_timeout = reply_timeout;
        self
    }

    /// How long a homing cycle may take.
    pub fn home_timeout(mut self, home_timeout: Duration) -> Self {
        self.home_timeout = home_timeout;
        self
    }

    /// Jog `distance` mm along `axis` (`'X'`, `'Y'`, `'Z'` or `'A'`).
    pub fn jog(&mut self, axis: char, distance: f64, speed: f64) -> Result<(), Error> {
        let line = format!("$J=G91 {}{:.3} F{:.0}", axis, distance, speed);
        self.command(&line, self.reply_timeout)
    }

    /// Clear an alarm lock without homing.
    pub fn unlock(&mut self) -> Result<(), Error> {
        self.command("$X", self.reply_timeout)
    }

    /// Send a line as typed by an operator.
    pub fn send_raw(&mut self, line: &str) -> Result<(), Error> {
        self.command(line.trim(), self.reply_timeout)
    }

    fn command(&mut self, line: &str, timeout: Duration) -> Result<(), Error> {
        let connection = self
            .connection
            .as_mut()
            .ok_or(Error::DeviceNotConnected(Device::Motion))?;

        // Replies left over from a timed out command would be taken for ours.
        while connection.replies.try_recv().is_ok() {}

        connection.link.write_line(line, "\n")?;
        match connection.replies.recv_timeout(timeout) {
            Ok(Reply::Ok) => Ok(()),
            Ok(Reply::Rejected(err)) => {
                warn!("GRBL rejected {:?}: {}", line, err);
                Err(Error::Motion(err))
            }
            Err(RecvTimeoutError::Timeout) => Err(Error::DeviceUnresponsive {
                device: Device::Motion,
                waiting_for: "command acknowledgment",
                waited: timeout,
            }),
            Err(RecvTimeoutError::Disconnected) => Err(Error::DeviceNotConnected(Device::Motion)),
        }
    }
}

impl Default for Grbl {
    fn default() -> Self {
        Grbl::new()
    }
}

impl Drop for Grbl {
    fn drop(&mut self) {
        self.disconnect();
    }
}

impl MotionInterface for Grbl {
    fn connect(&mut self, port: &str) -> Result<(), Error> {
        self.disconnect();

        let mut link = SerialLink::open(port, self.baud)?;
        // GRBL resets when the port opens and ignores input while booting.
        link.write_raw(b"\r\n\r\n")?;
        thread::sleep(self.startup_delay);

        let stop = Arc::new(AtomicBool::new(false));
        let (tx, replies) = mpsc::channel();
        let handler = ReplyHandler {
            status: self.status.clone(),
            replies: tx,
        };
        let reader = link.spawn_reader("grbl-reader", stop.clone(), move |line| {
            handler.handle(line)
        })?;

        let mut poll_link = link.try_clone()?;
        let poll_stop = stop.clone();
        let interval = self.status_interval;
        let poller = thread::Builder::new()
            .name("grbl-status".to_string())
            .spawn(move || {
                while !poll_stop.load(Ordering::Relaxed) {
                    if let Err(err) = poll_link.write_raw(b"?") {
                        warn!("GRBL status query failed: {}", err);
                        break;
                    }
                    thread::sleep(interval);
                }
            })?;

        info!("Connected to GRBL on {}", port);
        self.connection = Some(Connection {
            link,
            replies,
            stop,
            threads: vec![reader, poller],
        });
        Ok(())
    }

    fn disconnect(&mut self) {
        if let Some(connection) = self.connection.take() {
            connection.stop.store(true, Ordering::Relaxed);
            for thread in connection.threads {
                let _ = thread.join();
            }
            info!("Disconnected from GRBL on {}", connection.link.path());
        }
    }

    fn is_connected(&self) -> bool {
        self.connection.is_some()
    }

    fn home(&mut self) -> Result<(), Error> {
        // The controller acknowledges `$H` once the homing cycle is done.
        self.command("$H", self.home_timeout)
    }

    fn move_to(&mut self, x: f64, y: f64, speed: f64) -> Result<(), Error> {
        let line = format!("G1 X{:.3} Y{:.3} F{:.0}", x, y, speed);
        self.command(&line, self.reply_timeout)
    }

    fn status(&self) -> Arc<StatusCell<MotionStatus>> {
        self.status.clone()
    }
}

/// A parsed `<...>` status report.
#[derive(Debug, Clone, PartialEq)]
pub struct StatusReport {
    pub state: MotionState,
    pub position: Option<(f64, f64)>,
}

/// Parse a status report such as `<Idle|MPos:12.000,225.000,0.000|FS:0,0>`.
///
/// Machine position is preferred over work position. The pre 1.1 comma
/// separated layout `<Idle,MPos:1,2,3,WPos:1,2,3>` is understood too.
pub fn parse_status_report(line: &str) -> Result<StatusReport, Error> {
    let body = line
        .trim()
        .strip_prefix('<')
        .and_then(|l| l.strip_suffix('>'))
        .ok_or_else(|| Error::MalformedInput(format!("not a status report: {:?}", line)))?;

    let (state, fields) = if body.contains('|') {
        let mut parts = body.split('|');
        let state = parts.next().unwrap_or("");
        (state, parts.map(str::to_string).collect::<Vec<_>>())
    } else {
        // Old layout: fields are comma separated, and so are coordinates.
        let (state, rest) = body.split_once(',').unwrap_or((body, ""));
        let mut fields: Vec<String> = Vec::new();
        for token in rest.split(',') {
            match fields.last_mut() {
                Some(field) if !token.starts_with(|c: char| c.is_ascii_alphabetic()) => {
                    field.push(',');
                    field.push_str(token);
                }
                _ => fields.push(token.to_string()),
            }
        }
        (state, fields)
    };

    let state = MotionState::from_report(state);
    if state == MotionState::Unknown {
        return Err(Error::MalformedInput(format!("unknown state in {:?}", line)));
    }

    let mut position = None;
    for key in ["MPos:", "WPos:"] {
        if let Some(field) = fields.iter().find(|f| f.starts_with(key)) {
            position = Some(parse_coordinates(&field[key.len()..])?);
            break;
        }
    }

    Ok(StatusReport { state, position })
}

fn parse_coordinates(field: &str) -> Result<(f64, f64), Error> {
    let mut values = field.split(',').map(|v| v.trim().parse::<f64>());
    match (values.next(), values.next()) {
        (Some(Ok(x)), Some(Ok(y))) => Ok((x, y)),
        _ => Err(Error::MalformedInput(format!("bad coordinates {:?}", field))),
    }
}

/// Routes controller lines to the status cell and the reply channel.
struct ReplyHandler {
    status: Arc<StatusCell<MotionStatus>>,
    replies: Sender<Reply>,
}

impl ReplyHandler {
    fn handle(&self, line: &str) {
        if line.starts_with('<') {
            match parse_status_report(line) {
                Ok(report) => self.status.modify(|current| {
                    let next = current.with_state(report.state);
                    match report.position {
                        Some((x, y)) => next.with_position(x, y),
                        None => next,
                    }
                }),
                // Keep the previous snapshot.
                Err(err) => warn!("ignoring status report: {}", err),
            }
        } else if line == "ok" {
            let _ = self.replies.send(Reply::Ok);
        } else if let Some(err) = MotionError::from_line(line) {
            if err.is_alarm() {
                warn!("GRBL alarm: {}", err);
                self.status.modify(|current| current.with_alarm(err));
            } else {
                let _ = self.replies.send(Reply::Rejected(err));
            }
        } else {
            debug!("GRBL: {}", line);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn parses_current_report_layout() {
        let report = parse_status_report("<Run|MPos:12.500,225.000,0.000|FS:8000,0>").unwrap();
        assert_eq!(
            report,
            StatusReport {
                state: MotionState::Run,
                position: Some((12.5, 225.0)),
            }
        );

        let report = parse_status_report("<Hold:0|WPos:1.000,2.000,3.000>").unwrap();
        assert_eq!(report.state, MotionState::Hold);
        assert_eq!(report.position, Some((1.0, 2.0)));

        let report = parse_status_report("<Idle|FS:0,0>").unwrap();
        assert_eq!(report.position, None);
    }

    #[test]
    fn parses_legacy_report_layout() {
        let report =
            parse_status_report("<Idle,MPos:5.000,433.000,0.000,WPos:0.000,0.000,0.000>").unwrap();
        assert_eq!(report.state, MotionState::Idle);
        assert_eq!(report.position, Some((5.0, 433.0)));
    }

    #[test]
    fn rejects_malformed_reports() {
        assert!(matches!(
            parse_status_report("Idle|MPos:0,0,0"),
            Err(Error::MalformedInput(_))
        ));
        assert!(parse_status_report("<Idle|MPos:abc,0,0>").is_err());
        assert!(parse_status_report("<Spinning|MPos:0,0,0>").is_err());
    }

    fn handler() -> (ReplyHandler, Arc<StatusCell<MotionStatus>>, Receiver<Reply>) {
        let status = Arc::new(StatusCell::new(MotionStatus::default()));
        let (tx, rx) = mpsc::channel();
        (
            ReplyHandler {
                status: status.clone(),
                replies: tx,
            },
            status,
            rx,
        )
    }

    #[test]
    fn reports_update_status_and_bump_index() {
        let (handler, status, _rx) = handler();
        handler.handle("<Idle|MPos:0.000,0.000,0.000>");
        handler.handle("<Run|MPos:1.000,2.000,0.000>");
        handler.handle("<Run|MPos:1.500,3.000,0.000>");
        handler.handle("<Idle|MPos:2.000,4.000,0.000>");

        let snapshot = status.snapshot();
        assert_eq!(snapshot.state, MotionState::Idle);
        assert_eq!((snapshot.x, snapshot.y), (2.0, 4.0));
        assert_eq!(snapshot.index, 3);
    }

    #[test]
    fn malformed_report_keeps_previous_status() {
        let (handler, status, _rx) = handler();
        handler.handle("<Idle|MPos:7.000,8.000,0.000>");
        let before = status.snapshot();
        handler.handle("<Run|MPos:7.0,oops,0.000>");
        assert_eq!(*status.snapshot(), *before);
    }

    #[test]
    fn replies_and_alarms() {
        let (handler, status, rx) = handler();
        handler.handle("ok");
        handler.handle("error:2");
        handler.handle("ALARM:1");
        handler.handle("Grbl 1.1h ['$' for help]");

        assert_eq!(rx.try_recv(), Ok(Reply::Ok));
        assert_eq!(rx.try_recv(), Ok(Reply::Rejected(MotionError::BadNumberFormat)));
        assert!(rx.try_recv().is_err());

        let snapshot = status.snapshot();
        assert_eq!(snapshot.state, MotionState::Alarm);
        assert_eq!(snapshot.alarm, Some(MotionError::HardLimit));
    }

    #[test]
    fn commands_need_a_connection() {
        let mut grbl = Grbl::new();
        assert!(!grbl.is_connected());
        assert!(matches!(
            grbl.move_to(1.0, 2.0, 100.0),
            Err(Error::DeviceNotConnected(Device::Motion))
        ));
        assert!(matches!(grbl.home(), Err(Error::DeviceNotConnected(_))));
    }
}
