use log::{debug, info, warn};
use std::fmt;
use std::io;
use std::io::{BufRead, BufReader, Write};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use thiserror::Error;

pub const BAUD_RATE: u32 = 9600;
pub const READ_TIMEOUT: Duration = Duration::from_secs(5);

/// Errors that leave a session unusable. The display text is what the
/// dashboard shows as link status.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SessionError {
    #[error("failed to open port")]
    PortNotFound,

    #[error("timed out opening port")]
    OpenTimeout,

    /// Anything else reported by the serial driver; the detail is only logged.
    #[error("serial port error")]
    Fault(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct SerialSettings {
    pub port: String,
    pub baud_rate: u32,
    pub read_timeout: Duration,
}

impl SerialSettings {
    pub fn new(port: &str) -> SerialSettings {
        return SerialSettings {
            port: port.to_string(),
            baud_rate: BAUD_RATE,
            read_timeout: READ_TIMEOUT,
        };
    }
}

/// Longest line accepted from the device; anything longer without a
/// terminator is discarded.
pub const MAX_LINE_LEN: usize = 1024;

/// Inbound half of a device connection.
pub trait LineReader: Send {
    /// Reads one line without its terminator. `Ok(None)` means the read
    /// timed out before a full line arrived; partial data is kept for the
    /// next call.
    fn read_line(&mut self) -> io::Result<Option<Vec<u8>>>;
}

/// Outbound half of a device connection.
pub trait LineWriter: Send {
    fn write_all(&mut self, bytes: &[u8]) -> io::Result<()>;
}

/// Both halves of one open device. They are locked separately so a write
/// never waits on a blocking read.
pub struct SerialLink {
    pub reader: Box<dyn LineReader>,
    pub writer: Box<dyn LineWriter>,
}

pub trait LinkOpener: Send + Sync {
    fn open(&self, settings: &SerialSettings) -> Result<SerialLink, SessionError>;
}

/// Opens real ports through the `serialport` crate.
pub struct SerialPortOpener;

impl LinkOpener for SerialPortOpener {
    fn open(&self, settings: &SerialSettings) -> Result<SerialLink, SessionError> {
        let port = serialport::new(&settings.port, settings.baud_rate)
            .timeout(settings.read_timeout)
            .open()
            .map_err(|err| open_error(&settings.port, err))?;
        let writer = port
            .try_clone()
            .map_err(|err| open_error(&settings.port, err))?;
        return Result::Ok(SerialLink {
            reader: Box::new(PortReader {
                reader: BufReader::new(port),
                pending: Vec::new(),
            }),
            writer: Box::new(PortWriter { port: writer }),
        });
    }
}

fn open_error(port: &str, err: serialport::Error) -> SessionError {
    warn!("failed to open {}: {}", port, err);
    match err.kind() {
        serialport::ErrorKind::NoDevice => SessionError::PortNotFound,
        serialport::ErrorKind::Io(io::ErrorKind::NotFound) => SessionError::PortNotFound,
        serialport::ErrorKind::Io(io::ErrorKind::TimedOut) => SessionError::OpenTimeout,
        _ => SessionError::Fault(err.description),
    }
}

struct PortReader {
    reader: BufReader<Box<dyn serialport::SerialPort>>,
    pending: Vec<u8>,
}

impl LineReader for PortReader {
    /// Issues at most one driver read, so a call never blocks longer than
    /// the port's read timeout.
    fn read_line(&mut self) -> io::Result<Option<Vec<u8>>> {
        let chunk = match self.reader.fill_buf() {
            Result::Ok(chunk) => chunk,
            Result::Err(err) if err.kind() == io::ErrorKind::TimedOut => return Result::Ok(None),
            Result::Err(err) => return Result::Err(err),
        };
        let (consumed, line) = take_line(&mut self.pending, chunk);
        self.reader.consume(consumed);
        return Result::Ok(line);
    }
}

/// Moves bytes from `chunk` into `pending` up to and including the first
/// newline. Returns how many bytes were taken and the completed line, if
/// any, with its terminator stripped.
fn take_line(pending: &mut Vec<u8>, chunk: &[u8]) -> (usize, Option<Vec<u8>>) {
    let (consumed, complete) = match chunk.iter().position(|b| *b == b'\n') {
        Some(end) => (end + 1, true),
        None => (chunk.len(), false),
    };
    pending.extend_from_slice(&chunk[..consumed]);
    if !complete {
        if pending.len() > MAX_LINE_LEN {
            warn!("discarding {} bytes without a line terminator", pending.len());
            pending.clear();
        }
        return (consumed, None);
    }
    let mut line = std::mem::take(pending);
    while matches!(line.last(), Some(b'\n') | Some(b'\r')) {
        line.pop();
    }
    return (consumed, Some(line));
}

struct PortWriter {
    port: Box<dyn serialport::SerialPort>,
}

impl LineWriter for PortWriter {
    fn write_all(&mut self, bytes: &[u8]) -> io::Result<()> {
        self.port.write_all(bytes)?;
        return self.port.flush();
    }
}

#[derive(Debug, PartialEq)]
pub enum ReadOutcome {
    Line(String),
    /// The read timeout elapsed without a complete line.
    Idle,
    /// A line arrived but was not valid UTF-8.
    Undecodable,
    /// The session is closed or in an error state; no read was attempted.
    Unavailable,
}

impl fmt::Display for ReadOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReadOutcome::Line(line) => write!(f, "{}", line),
            ReadOutcome::Idle => write!(f, "no data"),
            ReadOutcome::Undecodable => write!(f, "could not decode data"),
            ReadOutcome::Unavailable => write!(f, "error reading data"),
        }
    }
}

enum SessionState {
    Open(Box<dyn LineWriter>),
    Failed(SessionError),
    Closed,
}

struct Link {
    settings: SerialSettings,
    state: SessionState,
}

/// A held connection to the device. Failures are stored rather than
/// returned, and every later read or write on a failed session is a no-op.
///
/// The reader sits behind its own lock, taken before the link lock when
/// both are needed. Reads hold only the reader lock while blocked on the
/// device; writes and status queries hold only the link lock.
pub struct SerialSession {
    opener: Arc<dyn LinkOpener>,
    reader: Mutex<Option<Box<dyn LineReader>>>,
    link: Mutex<Link>,
}

impl SerialSession {
    pub fn open(opener: Arc<dyn LinkOpener>, settings: SerialSettings) -> SerialSession {
        let mut reader = None;
        let mut link = Link {
            settings,
            state: SessionState::Closed,
        };
        connect(opener.as_ref(), &mut reader, &mut link);
        return SerialSession {
            opener,
            reader: Mutex::new(reader),
            link: Mutex::new(link),
        };
    }

    pub fn port(&self) -> String {
        return lock(&self.link).settings.port.clone();
    }

    pub fn settings(&self) -> SerialSettings {
        return lock(&self.link).settings.clone();
    }

    pub fn is_open(&self) -> bool {
        return matches!(lock(&self.link).state, SessionState::Open(_));
    }

    pub fn error(&self) -> Option<SessionError> {
        match &lock(&self.link).state {
            SessionState::Failed(err) => Some(err.clone()),
            _ => None,
        }
    }

    pub fn read_line(&self) -> ReadOutcome {
        let mut reader_slot = lock(&self.reader);
        if !self.is_open() {
            // a failed write leaves the reader behind
            *reader_slot = None;
            return ReadOutcome::Unavailable;
        }
        let reader = match reader_slot.as_mut() {
            Some(reader) => reader,
            None => return ReadOutcome::Unavailable,
        };
        match reader.read_line() {
            Result::Ok(None) => ReadOutcome::Idle,
            Result::Ok(Some(bytes)) => match String::from_utf8(bytes) {
                Result::Ok(line) => {
                    debug!("read: {}", line);
                    ReadOutcome::Line(line)
                }
                Result::Err(_) => ReadOutcome::Undecodable,
            },
            Result::Err(err) => {
                *reader_slot = None;
                fail(&mut lock(&self.link), err);
                ReadOutcome::Unavailable
            }
        }
    }

    pub fn write_line(&self, text: &str) -> Result<(), SessionError> {
        let mut guard = lock(&self.link);
        let link = &mut *guard;
        let mut bytes = Vec::with_capacity(text.len() + 1);
        bytes.extend_from_slice(text.as_bytes());
        bytes.push(b'\n');
        let result = match &mut link.state {
            SessionState::Open(writer) => writer.write_all(&bytes),
            _ => {
                debug!("dropping write to unavailable port {}: {}", link.settings.port, text);
                return Result::Ok(());
            }
        };
        if let Result::Err(err) = result {
            let port = link.settings.port.clone();
            fail(link, err);
            return Result::Err(SessionError::Fault(format!("write failed on {}", port)));
        }
        debug!("wrote to {}: {}", link.settings.port, text);
        return Result::Ok(());
    }

    /// Waits for an in-flight read before the old handle is released.
    pub fn change_port(&self, port: &str) {
        let mut reader = lock(&self.reader);
        let mut link = lock(&self.link);
        if matches!(link.state, SessionState::Open(_)) && link.settings.port == port {
            return;
        }
        disconnect(&mut reader, &mut link);
        link.settings.port = port.to_string();
        connect(self.opener.as_ref(), &mut reader, &mut link);
    }

    pub fn close(&self) {
        let mut reader = lock(&self.reader);
        let mut link = lock(&self.link);
        disconnect(&mut reader, &mut link);
    }
}

impl Drop for SerialSession {
    fn drop(&mut self) {
        self.close();
    }
}

fn connect(opener: &dyn LinkOpener, reader: &mut Option<Box<dyn LineReader>>, link: &mut Link) {
    info!("opening serial port {}", link.settings.port);
    link.state = match opener.open(&link.settings) {
        Result::Ok(opened) => {
            info!(
                "serial port {} open at {} baud",
                link.settings.port, link.settings.baud_rate
            );
            *reader = Some(opened.reader);
            SessionState::Open(opened.writer)
        }
        Result::Err(err) => {
            warn!("serial port {} unavailable: {}", link.settings.port, err);
            SessionState::Failed(err)
        }
    };
}

/// Releases both halves. An error state is kept as is.
fn disconnect(reader: &mut Option<Box<dyn LineReader>>, link: &mut Link) {
    *reader = None;
    if let SessionState::Open(_) = link.state {
        info!("closing serial port {}", link.settings.port);
        link.state = SessionState::Closed;
    }
}

fn fail(link: &mut Link, err: io::Error) {
    warn!("serial port {} failed: {}", link.settings.port, err);
    link.state = SessionState::Failed(SessionError::Fault(err.to_string()));
}

/// Session locks only guard handles and settings; a poisoned guard is reused.
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    return mutex.lock().unwrap_or_else(|poisoned| {
        warn!("recovering poisoned serial session lock");
        poisoned.into_inner()
    });
}

#[cfg(test)]
pub mod testing {
    use super::*;
    use std::collections::{HashMap, VecDeque};
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::thread;

    /// Shared view of one fake device, kept by the test after the link is
    /// handed to a session.
    #[derive(Default)]
    pub struct FakeDevice {
        pub inbound: Mutex<VecDeque<Vec<u8>>>,
        pub written: Mutex<Vec<String>>,
        pub closed: AtomicBool,
        pub reads: AtomicUsize,
        pub reads_after_close: AtomicUsize,
        pub fail_reads: AtomicBool,
        /// How long each read blocks, standing in for the port timeout.
        pub read_delay: Mutex<Duration>,
    }

    impl FakeDevice {
        pub fn push_line(&self, line: &str) {
            self.inbound.lock().unwrap().push_back(line.as_bytes().to_vec());
        }

        pub fn push_bytes(&self, bytes: &[u8]) {
            self.inbound.lock().unwrap().push_back(bytes.to_vec());
        }

        pub fn written(&self) -> Vec<String> {
            return self.written.lock().unwrap().clone();
        }

        pub fn set_read_delay(&self, delay: Duration) {
            *self.read_delay.lock().unwrap() = delay;
        }
    }

    struct FakeReader {
        device: Arc<FakeDevice>,
    }

    impl LineReader for FakeReader {
        fn read_line(&mut self) -> io::Result<Option<Vec<u8>>> {
            if self.device.closed.load(Ordering::SeqCst) {
                self.device.reads_after_close.fetch_add(1, Ordering::SeqCst);
            }
            self.device.reads.fetch_add(1, Ordering::SeqCst);
            let delay = *self.device.read_delay.lock().unwrap();
            if !delay.is_zero() {
                thread::sleep(delay);
            }
            if self.device.fail_reads.load(Ordering::SeqCst) {
                return Result::Err(io::Error::new(io::ErrorKind::BrokenPipe, "unplugged"));
            }
            return Result::Ok(self.device.inbound.lock().unwrap().pop_front());
        }
    }

    impl Drop for FakeReader {
        fn drop(&mut self) {
            self.device.closed.store(true, Ordering::SeqCst);
        }
    }

    struct FakeWriter {
        device: Arc<FakeDevice>,
    }

    impl LineWriter for FakeWriter {
        fn write_all(&mut self, bytes: &[u8]) -> io::Result<()> {
            let text = String::from_utf8_lossy(bytes).to_string();
            self.device.written.lock().unwrap().push(text);
            return Result::Ok(());
        }
    }

    /// Opens fake links for registered port names; every other port
    /// behaves like a missing device.
    #[derive(Default)]
    pub struct FakeOpener {
        devices: Mutex<HashMap<String, Arc<FakeDevice>>>,
        pub opens: AtomicUsize,
    }

    impl FakeOpener {
        pub fn with_ports(ports: &[&str]) -> Arc<FakeOpener> {
            let opener = FakeOpener::default();
            for port in ports {
                opener.add_port(port);
            }
            return Arc::new(opener);
        }

        pub fn add_port(&self, port: &str) -> Arc<FakeDevice> {
            let device = Arc::new(FakeDevice::default());
            self.devices
                .lock()
                .unwrap()
                .insert(port.to_string(), device.clone());
            return device;
        }

        pub fn device(&self, port: &str) -> Arc<FakeDevice> {
            return self.devices.lock().unwrap()[port].clone();
        }
    }

    impl LinkOpener for FakeOpener {
        fn open(&self, settings: &SerialSettings) -> Result<SerialLink, SessionError> {
            self.opens.fetch_add(1, Ordering::SeqCst);
            let devices = self.devices.lock().unwrap();
            let device = devices
                .get(&settings.port)
                .ok_or(SessionError::PortNotFound)?;
            device.closed.store(false, Ordering::SeqCst);
            return Result::Ok(SerialLink {
                reader: Box::new(FakeReader {
                    device: device.clone(),
                }),
                writer: Box::new(FakeWriter {
                    device: device.clone(),
                }),
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::FakeOpener;
    use super::*;
    use std::sync::atomic::Ordering;
    use std::thread;
    use std::time::Instant;

    #[test]
    fn open_missing_port_stores_error() {
        let opener = FakeOpener::with_ports(&["COM1"]);
        let session = SerialSession::open(opener, SerialSettings::new("COM9"));

        assert!(!session.is_open());
        assert_eq!(session.error(), Some(SessionError::PortNotFound));
        assert_eq!(session.error().unwrap().to_string(), "failed to open port");
        assert_eq!(session.read_line(), ReadOutcome::Unavailable);
        assert_eq!(session.read_line().to_string(), "error reading data");
        assert_eq!(session.write_line("ignored"), Result::Ok(()));
    }

    #[test]
    fn close_on_failed_session_is_noop() {
        let opener = FakeOpener::with_ports(&[]);
        let session = SerialSession::open(opener, SerialSettings::new("COM1"));

        session.close();
        session.close();

        assert_eq!(session.error(), Some(SessionError::PortNotFound));
    }

    #[test]
    fn read_and_write_lines() {
        let opener = FakeOpener::with_ports(&["COM4"]);
        let device = opener.device("COM4");
        let session = SerialSession::open(opener, SerialSettings::new("COM4"));
        device.push_line("{\"humidity\":40}");

        assert_eq!(session.read_line(), ReadOutcome::Line("{\"humidity\":40}".to_string()));
        assert_eq!(session.read_line(), ReadOutcome::Idle);
        assert_eq!(ReadOutcome::Idle.to_string(), "no data");

        session.write_line("MLX").unwrap();
        assert_eq!(device.written(), vec!["MLX\n".to_string()]);
    }

    #[test]
    fn write_does_not_wait_for_blocked_read() {
        let opener = FakeOpener::with_ports(&["COM4"]);
        let device = opener.device("COM4");
        device.set_read_delay(Duration::from_secs(1));
        let session = Arc::new(SerialSession::open(opener, SerialSettings::new("COM4")));

        let reader = session.clone();
        let read = thread::spawn(move || reader.read_line());
        while device.reads.load(Ordering::SeqCst) == 0 {
            thread::sleep(Duration::from_millis(1));
        }

        let started = Instant::now();
        session.write_line("MLX").unwrap();
        assert_eq!(session.port(), "COM4");
        assert!(started.elapsed() < Duration::from_millis(200));

        assert_eq!(read.join().unwrap(), ReadOutcome::Idle);
        assert_eq!(device.written(), vec!["MLX\n".to_string()]);
    }

    #[test]
    fn invalid_utf8_is_undecodable() {
        let opener = FakeOpener::with_ports(&["COM4"]);
        let device = opener.device("COM4");
        let session = SerialSession::open(opener, SerialSettings::new("COM4"));
        device.push_bytes(&[0xff, 0xfe]);

        assert_eq!(session.read_line(), ReadOutcome::Undecodable);
        assert!(session.is_open());
    }

    #[test]
    fn read_failure_marks_session_faulted() {
        let opener = FakeOpener::with_ports(&["COM4"]);
        let device = opener.device("COM4");
        let session = SerialSession::open(opener, SerialSettings::new("COM4"));
        device.fail_reads.store(true, Ordering::SeqCst);

        assert_eq!(session.read_line(), ReadOutcome::Unavailable);
        assert!(matches!(session.error(), Some(SessionError::Fault(_))));
        assert!(device.closed.load(Ordering::SeqCst));
    }

    #[test]
    fn change_port_reopens_only_when_needed() {
        let opener = FakeOpener::with_ports(&["COM1", "COM2"]);
        let session = SerialSession::open(opener.clone(), SerialSettings::new("COM1"));

        session.change_port("COM1");
        assert_eq!(opener.opens.load(Ordering::SeqCst), 1);

        session.change_port("COM2");
        assert_eq!(opener.opens.load(Ordering::SeqCst), 2);
        assert_eq!(session.port(), "COM2");
        assert!(session.is_open());
        assert!(opener.device("COM1").closed.load(Ordering::SeqCst));
        assert_eq!(session.settings().baud_rate, 9600);
        assert_eq!(session.settings().read_timeout, Duration::from_secs(5));
    }

    #[test]
    fn change_port_recovers_from_error_state() {
        let opener = FakeOpener::with_ports(&["COM3"]);
        let session = SerialSession::open(opener, SerialSettings::new("COM1"));
        assert!(session.error().is_some());

        session.change_port("COM3");

        assert!(session.is_open());
        assert_eq!(session.error(), None);
    }

    #[test]
    fn line_split_across_chunks_is_joined() {
        let mut pending = Vec::new();

        assert_eq!(take_line(&mut pending, b"{\"humid"), (7, None));
        assert_eq!(
            take_line(&mut pending, b"ity\":40}\r\n{\"next"),
            (10, Some(b"{\"humidity\":40}".to_vec()))
        );
        assert!(pending.is_empty());
    }

    #[test]
    fn unterminated_input_is_bounded() {
        let mut pending = Vec::new();
        let noise = vec![b'x'; 600];

        assert_eq!(take_line(&mut pending, &noise), (600, None));
        assert_eq!(pending.len(), 600);
        assert_eq!(take_line(&mut pending, &noise), (600, None));
        assert!(pending.is_empty());

        assert_eq!(take_line(&mut pending, b"ok\n"), (3, Some(b"ok".to_vec())));
    }
}
