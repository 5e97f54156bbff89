//! libcurl transport: one streaming GET per transfer, each on its own thread.
//!
//! The body is written sequentially into a staging file. Suspension parks
//! the curl callbacks on a condvar, so the connection and every byte already
//! received stay in place until `resume`. The overall timeout is enforced
//! from the progress callback and only counts time spent unsuspended.

use std::cell::Cell;
use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use tempfile::NamedTempFile;
use url::Url;

use super::{TransferControl, Transport};
use crate::config::TransportConfig;
use crate::error::TransferError;
use crate::event::EventSender;
use crate::transfer::TransferId;

/// libcurl tuning applied to every transfer.
#[derive(Debug, Clone, Copy)]
pub struct CurlOptions {
    pub connect_timeout: Duration,
    /// Bytes/sec under which the transfer counts as stalled (0 = no check).
    pub low_speed_limit: u32,
    pub low_speed_time: Duration,
    /// Overall cap on unsuspended transfer time (zero = none).
    pub timeout: Duration,
    pub max_redirections: u32,
}

impl Default for CurlOptions {
    fn default() -> Self {
        Self::from(&TransportConfig::default())
    }
}

impl From<&TransportConfig> for CurlOptions {
    fn from(cfg: &TransportConfig) -> Self {
        Self {
            connect_timeout: Duration::from_secs(cfg.connect_timeout_secs),
            low_speed_limit: cfg.low_speed_limit,
            low_speed_time: Duration::from_secs(cfg.low_speed_time_secs),
            timeout: Duration::from_secs(cfg.timeout_secs),
            max_redirections: cfg.max_redirections,
        }
    }
}

/// HTTP(S) transport backed by the curl easy interface.
#[derive(Debug, Clone)]
pub struct CurlTransport {
    staging_dir: PathBuf,
    options: CurlOptions,
}

impl CurlTransport {
    pub fn new(staging_dir: impl Into<PathBuf>, options: CurlOptions) -> Self {
        Self {
            staging_dir: staging_dir.into(),
            options,
        }
    }
}

impl Transport for CurlTransport {
    fn submit(
        &self,
        id: TransferId,
        source: &Url,
        events: EventSender,
    ) -> Result<Box<dyn TransferControl>, TransferError> {
        std::fs::create_dir_all(&self.staging_dir).map_err(TransferError::Staging)?;
        let file = tempfile::Builder::new()
            .prefix(&format!("mdm-{}-", id.get()))
            .suffix(".part")
            .tempfile_in(&self.staging_dir)
            .map_err(TransferError::Staging)?;
        tracing::debug!(transfer = %id, staged = %file.path().display(), "curl transfer submitted");
        Ok(Box::new(CurlTransfer {
            flow: Arc::new(Flow::default()),
            job: Mutex::new(Some(Job {
                url: source.as_str().to_string(),
                file,
                events,
                options: self.options,
            })),
        }))
    }
}

/// Everything the transfer thread needs; taken out on `start`.
struct Job {
    url: String,
    file: NamedTempFile,
    events: EventSender,
    options: CurlOptions,
}

#[derive(Debug, Default)]
struct FlowState {
    paused: bool,
    cancelled: bool,
}

/// Pause/cancel state shared between the control handle and the transfer thread.
#[derive(Debug, Default)]
struct Flow {
    state: Mutex<FlowState>,
    wake: Condvar,
}

impl Flow {
    fn lock(&self) -> MutexGuard<'_, FlowState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn update(&self, f: impl FnOnce(&mut FlowState)) {
        f(&mut self.lock());
        self.wake.notify_all();
    }

    fn is_cancelled(&self) -> bool {
        self.lock().cancelled
    }

    /// Blocks while suspended. Returns false if the transfer was cancelled.
    fn wait_while_suspended(&self) -> bool {
        let guard = self.lock();
        let guard = self
            .wake
            .wait_while(guard, |s| s.paused && !s.cancelled)
            .unwrap_or_else(PoisonError::into_inner);
        !guard.cancelled
    }
}

/// Active-time clock for one transfer: wall time minus time parked while suspended.
struct ActiveClock {
    started: Instant,
    parked: Cell<Duration>,
}

impl ActiveClock {
    fn new() -> Self {
        Self {
            started: Instant::now(),
            parked: Cell::new(Duration::ZERO),
        }
    }

    /// Waits out a suspension, keeping the wait off the clock.
    /// Returns false if the transfer was cancelled.
    fn park(&self, flow: &Flow) -> bool {
        let since = Instant::now();
        let running = flow.wait_while_suspended();
        self.parked.set(self.parked.get() + since.elapsed());
        running
    }

    fn active(&self) -> Duration {
        self.started.elapsed().saturating_sub(self.parked.get())
    }

    fn exceeded(&self, limit: Duration) -> bool {
        !limit.is_zero() && self.active() > limit
    }
}

struct CurlTransfer {
    flow: Arc<Flow>,
    job: Mutex<Option<Job>>,
}

impl Drop for CurlTransfer {
    // Frees a transfer thread still parked on a suspension.
    fn drop(&mut self) {
        self.flow.update(|s| s.cancelled = true);
    }
}

impl TransferControl for CurlTransfer {
    fn start(&self) {
        let Some(job) = self.job.lock().unwrap_or_else(PoisonError::into_inner).take() else {
            return;
        };
        let events = job.events.clone();
        let flow = Arc::clone(&self.flow);
        let spawned = std::thread::Builder::new()
            .name(format!("mdm-transfer-{}", events.id().get()))
            .spawn(move || run(job, &flow));
        if let Err(e) = spawned {
            events.failed(TransferError::Submit(format!("spawn transfer thread: {e}")));
        }
    }

    fn suspend(&self) {
        self.flow.update(|s| s.paused = true);
    }

    fn resume(&self) {
        self.flow.update(|s| s.paused = false);
    }

    fn cancel(&self) {
        self.flow.update(|s| s.cancelled = true);
    }
}

/// Transfer thread body. Emits exactly one terminal event.
fn run(job: Job, flow: &Flow) {
    let Job {
        url,
        mut file,
        events,
        options,
    } = job;
    match perform(&url, &mut file, &events, flow, &options) {
        Ok(()) => match file.into_temp_path().keep() {
            Ok(staged) => events.finished(staged),
            Err(e) => events.failed(TransferError::Staging(e.error)),
        },
        // Dropping `file` removes the partial staging file.
        Err(e) => events.failed(e),
    }
}

fn perform(
    url: &str,
    file: &mut NamedTempFile,
    events: &EventSender,
    flow: &Flow,
    options: &CurlOptions,
) -> Result<(), TransferError> {
    let mut easy = curl::easy::Easy::new();
    easy.url(url)?;
    easy.follow_location(true)?;
    easy.max_redirections(options.max_redirections)?;
    easy.connect_timeout(options.connect_timeout)?;
    if options.low_speed_limit > 0 {
        easy.low_speed_limit(options.low_speed_limit)?;
        easy.low_speed_time(options.low_speed_time)?;
    }
    easy.progress(true)?;

    let clock = ActiveClock::new();
    let timed_out = Cell::new(false);
    let mut write_error: Option<io::Error> = None;
    let mut last_reported = 0u64;
    let result = {
        let mut transfer = easy.transfer();
        transfer.write_function(|data| {
            if !clock.park(flow) {
                return Ok(0); // abort transfer
            }
            match file.write_all(data) {
                Ok(()) => Ok(data.len()),
                Err(e) => {
                    write_error = Some(e);
                    Ok(0)
                }
            }
        })?;
        transfer.progress_function(|dltotal, dlnow, _, _| {
            if !clock.park(flow) {
                return false;
            }
            if clock.exceeded(options.timeout) {
                timed_out.set(true);
                return false;
            }
            let now = dlnow as u64;
            if now > last_reported {
                last_reported = now;
                let total = dltotal as u64;
                events.progress(now, (total > 0).then_some(total));
            }
            true
        })?;
        transfer.perform()
    };

    if flow.is_cancelled() {
        return Err(TransferError::Cancelled);
    }
    if timed_out.get() {
        return Err(TransferError::TimedOut(options.timeout));
    }
    if let Some(e) = write_error {
        return Err(TransferError::Staging(e));
    }
    result?;

    let code = easy.response_code()?;
    if code != 0 && !(200..300).contains(&code) {
        return Err(TransferError::Http(code));
    }
    file.flush().map_err(TransferError::Staging)?;
    Ok(())
}
