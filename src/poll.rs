use crate::dashboard::Dashboard;
use crate::reading::Reading;
use crate::session::{ReadOutcome, SerialSession};
use log::{debug, error, info, warn};
use std::sync::mpsc;
use std::sync::mpsc::{RecvTimeoutError, Sender, TryRecvError};
use std::sync::{Arc, Mutex};
use std::thread;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

pub const DEFAULT_INTERVAL: Duration = Duration::from_millis(500);

/// Called after each decoded reading has been applied to the dashboard.
pub type RefreshCallback = Box<dyn Fn(&Reading) + Send>;

/// Background read-decode-update cycle. Stops when signalled; the signal
/// is checked before and after every blocking read and interrupts the
/// wait between iterations.
pub struct PollLoop {
    stop_tx: Sender<()>,
    handle: JoinHandle<()>,
}

impl PollLoop {
    pub fn spawn(
        session: Arc<SerialSession>,
        dashboard: Arc<Mutex<Dashboard>>,
        interval: Duration,
        on_refresh: RefreshCallback,
    ) -> Result<PollLoop, String> {
        let (stop_tx, stop_rx) = mpsc::channel();
        let handle = thread::Builder::new()
            .name("poll".to_string())
            .spawn(move || poll(&session, &dashboard, interval, &stop_rx, &on_refresh))
            .map_err(|err| format!("failed to spawn poll thread: {}", err))?;
        return Result::Ok(PollLoop { stop_tx, handle });
    }

    /// Signals the loop and waits up to `grace` for it to finish. Returns
    /// false if the thread was still running and has been detached.
    pub fn stop(self, grace: Duration) -> bool {
        // the receiver is gone if the loop already exited
        let _ = self.stop_tx.send(());
        let deadline = Instant::now() + grace;
        while !self.handle.is_finished() {
            if Instant::now() >= deadline {
                warn!("poll loop did not stop within {:?}, detaching", grace);
                return false;
            }
            thread::sleep(Duration::from_millis(5));
        }
        if self.handle.join().is_err() {
            error!("poll loop panicked");
        }
        return true;
    }
}

fn stop_requested(stop_rx: &mpsc::Receiver<()>) -> bool {
    return !matches!(stop_rx.try_recv(), Result::Err(TryRecvError::Empty));
}

fn poll(
    session: &SerialSession,
    dashboard: &Mutex<Dashboard>,
    interval: Duration,
    stop_rx: &mpsc::Receiver<()>,
    on_refresh: &RefreshCallback,
) {
    info!("poll loop started (interval {:?})", interval);
    loop {
        if stop_requested(stop_rx) {
            break;
        }
        let outcome = session.read_line();
        if outcome == ReadOutcome::Unavailable {
            match dashboard.lock() {
                Result::Err(err) => {
                    error!("failed to lock {}", err);
                    break;
                }
                Result::Ok(mut dashboard) => dashboard.set_link(session),
            }
        }
        if stop_requested(stop_rx) {
            break;
        }
        if let Result::Err(err) = handle_outcome(outcome, dashboard, on_refresh) {
            error!("{}", err);
            break;
        }
        match stop_rx.recv_timeout(interval) {
            Result::Err(RecvTimeoutError::Timeout) => {}
            _ => break,
        }
    }
    info!("poll loop stopped");
}

fn handle_outcome(
    outcome: ReadOutcome,
    dashboard: &Mutex<Dashboard>,
    on_refresh: &RefreshCallback,
) -> Result<(), String> {
    let line = match outcome {
        ReadOutcome::Line(line) => line,
        ReadOutcome::Idle => {
            debug!("{}", ReadOutcome::Idle);
            return Result::Ok(());
        }
        ReadOutcome::Unavailable => return Result::Ok(()),
        ReadOutcome::Undecodable => {
            debug!("discarding undecodable line");
            return record_error(dashboard, ReadOutcome::Undecodable.to_string());
        }
    };
    let reading = match Reading::parse(&line) {
        Result::Ok(reading) => reading,
        Result::Err(err) => {
            debug!("discarding line {:?}: {}", line, err);
            return record_error(dashboard, err);
        }
    };
    dashboard
        .lock()
        .map_err(|err| format!("failed to lock {}", err))?
        .apply(&reading);
    on_refresh(&reading);
    return Result::Ok(());
}

fn record_error(dashboard: &Mutex<Dashboard>, message: String) -> Result<(), String> {
    dashboard
        .lock()
        .map_err(|err| format!("failed to lock {}", err))?
        .record_error(message);
    return Result::Ok(());
}
