//! Serial links to the motion controller and the head controller.
//!
//! Both controllers are USB CDC devices speaking a line protocol. The tty is
//! opened in raw mode so no byte is translated, with a short read timeout so
//! the reader thread notices when it is asked to stop.

use log::{debug, warn};
use std::fs::{File, OpenOptions};
use std::io::{self, Read, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

#[cfg(unix)]
use std::os::unix::io::AsRawFd;

use crate::error::Error;

/// Baud rate of both controllers.
pub const DEFAULT_BAUD: u32 = 115_200;

/// An open serial port.
pub struct SerialLink {
    port: File,
    path: String,
}

impl SerialLink {
    /// Open `path` for reading and writing in raw mode at `baud`.
    pub fn open(path: &str, baud: u32) -> Result<Self, Error> {
        let port = OpenOptions::new().read(true).write(true).open(path)?;

        #[cfg(unix)]
        configure_tty_raw(port.as_raw_fd(), baud)?;
        #[cfg(not(unix))]
        let _ = baud;

        debug!("opened {} at {} baud", path, baud);
        Ok(SerialLink {
            port,
            path: path.to_string(),
        })
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    /// Write `line` followed by `terminator`.
    pub fn write_line(&mut self, line: &str, terminator: &str) -> Result<(), Error> {
        debug!("{} <- {}", self.path, line);
        self.port.write_all(line.as_bytes())?;
        self.port.write_all(terminator.as_bytes())?;
        self.port.flush()?;
        Ok(())
    }

    /// Write bytes without a terminator, e.g. real-time commands.
    pub fn write_raw(&mut self, bytes: &[u8]) -> Result<(), Error> {
        self.port.write_all(bytes)?;
        self.port.flush()?;
        Ok(())
    }

    /// Another handle on the same port, for a second writer.
    pub fn try_clone(&self) -> Result<Self, Error> {
        Ok(SerialLink {
            port: self.port.try_clone()?,
            path: self.path.clone(),
        })
    }

    /// Spawn a thread that calls `handler` with every received line until
    /// `stop` is set or the port fails.
    pub fn spawn_reader<F>(
        &self,
        name: &str,
        stop: Arc<AtomicBool>,
        handler: F,
    ) -> Result<JoinHandle<()>, Error>
    where
        F: FnMut(&str) + Send + 'static,
    {
        let port = self.port.try_clone()?;
        let path = self.path.clone();
        let handle = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || {
                if let Err(err) = read_lines(port, &stop, handler) {
                    warn!("{}: reader stopped: {}", path, err);
                }
            })?;
        Ok(handle)
    }
}

/// Feed complete lines from `reader` to `handler`.
///
/// A zero length read is a tty read timeout; the loop only ends on it once
/// `stop` is set.
pub fn read_lines<R, F>(mut reader: R, stop: &AtomicBool, mut handler: F) -> io::Result<()>
where
    R: Read,
    F: FnMut(&str),
{
    let mut splitter = LineSplitter::default();
    let mut buf = [0u8; 256];

    loop {
        match reader.read(&mut buf) {
            Ok(0) => {
                if stop.load(Ordering::Relaxed) {
                    return Ok(());
                }
            }
            Ok(n) => {
                for line in splitter.feed(&buf[..n]) {
                    handler(&line);
                }
            }
            Err(err) if err.kind() == io::ErrorKind::Interrupted => {}
            Err(err) => return Err(err),
        }
        if stop.load(Ordering::Relaxed) {
            return Ok(());
        }
    }
}

/// Reassembles lines split across reads. `\r`, `\n` and `\r\n` all end a line.
#[derive(Debug, Default)]
pub struct LineSplitter {
    pending: Vec<u8>,
}

impl LineSplitter {
    pub fn feed(&mut self, bytes: &[u8]) -> Vec<String> {
        let mut lines = Vec::new();
        for &byte in bytes {
            if byte == b'\n' || byte == b'\r' {
                if !self.pending.is_empty() {
                    lines.push(String::from_utf8_lossy(&self.pending).trim().to_string());
                    self.pending.clear();
                }
            } else {
                self.pending.push(byte);
            }
        }
        lines
    }
}

#[cfg(unix)]
fn baud_constant(baud: u32) -> Result<libc::speed_t, Error> {
    Ok(match baud {
        9600 => libc::B9600,
        19200 => libc::B19200,
        38400 => libc::B38400,
        57600 => libc::B57600,
        115_200 => libc::B115200,
        230_400 => libc::B230400,
        other => {
            return Err(Error::InvalidConfig(format!(
                "unsupported baud rate {}",
                other
            )))
        }
    })
}

/// Configure a file descriptor for raw 8N1 mode with a 100 ms read timeout.
#[cfg(unix)]
fn configure_tty_raw(fd: i32, baud: u32) -> Result<(), Error> {
    use std::mem::MaybeUninit;

    let speed = baud_constant(baud)?;

    let mut termios = MaybeUninit::uninit();
    if unsafe { libc::tcgetattr(fd, termios.as_mut_ptr()) } != 0 {
        return Err(Error::Io(io::Error::last_os_error()));
    }
    let mut termios = unsafe { termios.assume_init() };

    termios.c_iflag &= !(libc::IGNBRK
        | libc::BRKINT
        | libc::PARMRK
        | libc::ISTRIP
        | libc::INLCR
        | libc::IGNCR
        | libc::ICRNL
        | libc::IXON
        | libc::IXOFF
        | libc::IXANY);
    termios.c_oflag &= !libc::OPOST;
    termios.c_lflag &= !(libc::ECHO | libc::ECHONL | libc::ICANON | libc::ISIG | libc::IEXTEN);
    termios.c_cflag &= !(libc::CSIZE | libc::PARENB);
    termios.c_cflag |= libc::CS8 | libc::CREAD | libc::CLOCAL;

    // Return after 100 ms without data.
    termios.c_cc[libc::VMIN] = 0;
    termios.c_cc[libc::VTIME] = 1;

    unsafe {
        if libc::cfsetispeed(&mut termios, speed) != 0
            || libc::cfsetospeed(&mut termios, speed) != 0
        {
            return Err(Error::Io(io::Error::last_os_error()));
        }
        if libc::tcsetattr(fd, libc::TCSANOW, &termios) != 0 {
            return Err(Error::Io(io::Error::last_os_error()));
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn splits_on_any_line_ending() {
        let mut splitter = LineSplitter::default();
        assert_eq!(splitter.feed(b"ok\r\n<Idle|MP"), vec!["ok"]);
        assert_eq!(splitter.feed(b"os:0,0,0>\rerror:2\n"), vec!["<Idle|MPos:0,0,0>", "error:2"]);
        assert!(splitter.feed(b"\r\n\r\n").is_empty());
    }

    #[test]
    fn reader_stops_at_end_when_asked() {
        let stop = AtomicBool::new(true);
        let mut lines = Vec::new();
        read_lines(Cursor::new(b"ok\nALARM:1\n".to_vec()), &stop, |line| {
            lines.push(line.to_string())
        })
        .unwrap();
        assert_eq!(lines, vec!["ok", "ALARM:1"]);
    }
}
