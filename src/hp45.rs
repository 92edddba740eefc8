//! HP45 head controller driver.
//!
//! The controller keeps a ring buffer of raster lines, each tagged with the
//! head position from which it fires. Commands are ASCII lines ending in `\r`;
//! numbers that travel with raster data are sent as base64 of a 32 bit big
//! endian integer. The controller streams status lines of the form
//! `KEY:value` which the reader thread folds into a [`HeadStatus`].

use base64::{engine::general_purpose, Engine};
use log::{debug, info, warn};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use crate::device::HeadInterface;
use crate::emitter::Command;
use crate::error::{Device, Error};
use crate::serial::{SerialLink, DEFAULT_BAUD};
use crate::status::StatusCell;

const TERMINATOR: &str = "\r";

/// Encode a head position for raster commands.
pub fn encode_position(micron: i64) -> String {
    general_purpose::STANDARD_NO_PAD.encode((micron as i32).to_be_bytes())
}

/// Latest values reported by the head controller.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HeadStatus {
    /// Cartridge temperature in degrees Celsius.
    pub temperature: Option<f64>,
    /// Head position in microns, as tracked by the controller's encoder.
    pub position: Option<i64>,
    /// Free slots in the raster line buffer.
    pub write_left: Option<u32>,
}

impl HeadStatus {
    /// Fold one status line into the snapshot.
    ///
    /// Unknown keys are skipped. A value that fails to parse is a
    /// `MalformedInput` error and leaves the snapshot unchanged.
    pub fn apply(&self, line: &str) -> Result<Option<HeadStatus>, Error> {
        let Some((key, value)) = line.split_once(':') else {
            return Ok(None);
        };
        let value = value.trim();
        let malformed = || Error::MalformedInput(format!("head status {:?}", line));

        let mut next = self.clone();
        match key.trim() {
            "GTP" => next.temperature = Some(value.parse().map_err(|_| malformed())?),
            "GEP" => next.position = Some(value.parse().map_err(|_| malformed())?),
            "BWL" => next.write_left = Some(value.parse().map_err(|_| malformed())?),
            _ => return Ok(None),
        }
        Ok(Some(next))
    }
}

struct Connection {
    link: SerialLink,
    stop: Arc<AtomicBool>,
    reader: JoinHandle<()>,
}

pub struct Hp45 {
    connection: Option<Connection>,
    status: Arc<StatusCell<HeadStatus>>,
    baud: u32,
}

impl Hp45 {
    pub fn new() -> Self {
        Hp45 {
            connection: None,
            status: Arc::new(StatusCell::new(HeadStatus::default())),
            baud: DEFAULT_BAUD,
        }
    }

    pub fn baud(mut self, baud: u32) -> Self {
        self.baud = baud;
        self
    }

    pub fn status(&self) -> Arc<StatusCell<HeadStatus>> {
        self.status.clone()
    }

    /// Fraction of fired nozzles per pulse, 1 to 100 percent.
    pub fn set_density(&mut self, percent: u8) -> Result<(), Error> {
        if !(1..=100).contains(&percent) {
            return Err(Error::InvalidConfig(format!(
                "density {}% out of range",
                percent
            )));
        }
        self.send(&format!("SD {}", percent))
    }

    /// Warm the cartridge with `pulses` non-firing pulses.
    pub fn preheat(&mut self, pulses: u32) -> Result<(), Error> {
        self.send(&format!("PH {}", pulses))
    }

    /// Fire every nozzle `pulses` times to clear dried ink.
    pub fn prime(&mut self, pulses: u32) -> Result<(), Error> {
        self.send(&format!("PR {}", pulses))
    }

    /// Send a line as typed by an operator.
    pub fn send_raw(&mut self, line: &str) -> Result<(), Error> {
        self.send(line.trim())
    }

    fn send(&mut self, line: &str) -> Result<(), Error> {
        let connection = self
            .connection
            .as_mut()
            .ok_or(Error::DeviceNotConnected(Device::Head))?;
        connection.link.write_line(line, TERMINATOR)
    }
}

impl Default for Hp45 {
    fn default() -> Self {
        Hp45::new()
    }
}

impl Drop for Hp45 {
    fn drop(&mut self) {
        self.disconnect();
    }
}

impl HeadInterface for Hp45 {
    fn connect(&mut self, port: &str) -> Result<(), Error> {
        self.disconnect();

        let link = SerialLink::open(port, self.baud)?;
        let stop = Arc::new(AtomicBool::new(false));
        let status = self.status.clone();
        let reader = link.spawn_reader("hp45-reader", stop.clone(), move |line| {
            let current = status.snapshot();
            match current.apply(line) {
                Ok(Some(next)) => status.publish(next),
                Ok(None) => debug!("HP45: {}", line),
                Err(err) => warn!("ignoring {}", err),
            }
        })?;

        info!("Connected to HP45 on {}", port);
        self.connection = Some(Connection { link, stop, reader });
        Ok(())
    }

    fn disconnect(&mut self) {
        if let Some(connection) = self.connection.take() {
            connection.stop.store(true, Ordering::Relaxed);
            let _ = connection.reader.join();
            info!("Disconnected from HP45 on {}", connection.link.path());
        }
    }

    fn is_connected(&self) -> bool {
        self.connection.is_some()
    }

    fn clear_buffer(&mut self) -> Result<(), Error> {
        self.send("BC")
    }

    fn write_line(&mut self, command: &Command) -> Result<(), Error> {
        let line = format!(
            "SBR {} {}",
            encode_position(command.micron()),
            command.payload
        );
        self.send(&line)
    }

    fn set_position(&mut self, micron: i64) -> Result<(), Error> {
        self.send(&format!("SEP {}", micron))
    }

    fn set_resolution(&mut self, dpi: u32) -> Result<(), Error> {
        self.send(&format!("SDP {}", dpi))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn positions_are_big_endian_base64() {
        assert_eq!(encode_position(0), "AAAAAA");
        assert_eq!(encode_position(22000), "AABV8A");
        assert_eq!(encode_position(-1), "/////w");
    }

    #[test]
    fn status_lines_update_snapshot() {
        let status = HeadStatus::default();
        let status = status.apply("GTP:41.5").unwrap().unwrap();
        let status = status.apply("GEP:-1200").unwrap().unwrap();
        let status = status.apply("BWL: 250").unwrap().unwrap();
        assert_eq!(
            status,
            HeadStatus {
                temperature: Some(41.5),
                position: Some(-1200),
                write_left: Some(250),
            }
        );
    }

    #[test]
    fn malformed_and_unknown_lines() {
        let status = HeadStatus {
            write_left: Some(10),
            ..HeadStatus::default()
        };
        assert!(matches!(
            status.apply("BWL:many"),
            Err(Error::MalformedInput(_))
        ));
        assert_eq!(status.apply("OK").unwrap(), None);
        assert_eq!(status.apply("FOO:1").unwrap(), None);
    }

    #[test]
    fn commands_need_a_connection() {
        let mut head = Hp45::new();
        assert!(matches!(
            head.clear_buffer(),
            Err(Error::DeviceNotConnected(Device::Head))
        ));
        assert!(matches!(
            head.set_density(0),
            Err(Error::InvalidConfig(_))
        ));
    }
}
