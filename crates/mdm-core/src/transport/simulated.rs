//! Transport that fabricates payloads on a timer instead of using the network.
//!
//! Each transfer writes `chunk_count` chunks of `chunk_bytes` into a staging
//! file, sleeping `chunk_delay` between chunks (randomized up to twice the
//! delay when `randomize` is set) and reporting progress after each chunk.

use std::path::PathBuf;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use rand::Rng;
use tempfile::NamedTempFile;
use tokio::io::AsyncWriteExt;
use tokio::runtime::Handle;
use tokio::sync::watch;
use url::Url;

use super::{TransferControl, Transport};
use crate::config::SimulationConfig;
use crate::error::TransferError;
use crate::event::EventSender;
use crate::transfer::TransferId;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct Flow {
    paused: bool,
    cancelled: bool,
}

#[derive(Debug, Clone)]
pub struct SimulatedTransport {
    staging_dir: PathBuf,
    plan: SimulationConfig,
}

impl SimulatedTransport {
    pub fn new(staging_dir: impl Into<PathBuf>, plan: SimulationConfig) -> Self {
        Self {
            staging_dir: staging_dir.into(),
            plan,
        }
    }

    /// Total payload size every simulated transfer produces.
    pub fn payload_len(&self) -> u64 {
        self.plan.chunk_count as u64 * self.plan.chunk_bytes as u64
    }
}

impl Transport for SimulatedTransport {
    fn submit(
        &self,
        id: TransferId,
        source: &Url,
        events: EventSender,
    ) -> Result<Box<dyn TransferControl>, TransferError> {
        let runtime = Handle::try_current().map_err(|e| TransferError::Submit(e.to_string()))?;
        std::fs::create_dir_all(&self.staging_dir).map_err(TransferError::Staging)?;
        let file = tempfile::Builder::new()
            .prefix(&format!("mdm-sim-{}-", id.get()))
            .suffix(".part")
            .tempfile_in(&self.staging_dir)
            .map_err(TransferError::Staging)?;
        tracing::debug!(transfer = %id, source = %source, "simulated transfer submitted");
        let (flow, _) = watch::channel(Flow::default());
        Ok(Box::new(SimulatedTransfer {
            runtime,
            flow,
            job: Mutex::new(Some(SimJob {
                file,
                events,
                plan: self.plan.clone(),
            })),
        }))
    }
}

struct SimJob {
    file: NamedTempFile,
    events: EventSender,
    plan: SimulationConfig,
}

struct SimulatedTransfer {
    runtime: Handle,
    flow: watch::Sender<Flow>,
    job: Mutex<Option<SimJob>>,
}

impl TransferControl for SimulatedTransfer {
    fn start(&self) {
        let Some(job) = self.job.lock().unwrap_or_else(PoisonError::into_inner).take() else {
            return;
        };
        let flow = self.flow.subscribe();
        self.runtime.spawn(run(job, flow));
    }

    fn suspend(&self) {
        self.flow.send_modify(|f| f.paused = true);
    }

    fn resume(&self) {
        self.flow.send_modify(|f| f.paused = false);
    }

    fn cancel(&self) {
        self.flow.send_modify(|f| f.cancelled = true);
    }
}

fn chunk_delay(plan: &SimulationConfig) -> Duration {
    let base = plan.chunk_delay_ms;
    if plan.randomize && base > 0 {
        Duration::from_millis(rand::rng().random_range(0..=base * 2))
    } else {
        Duration::from_millis(base)
    }
}

async fn run(job: SimJob, mut flow: watch::Receiver<Flow>) {
    let SimJob { file, events, plan } = job;
    match produce(&file, &events, &plan, &mut flow).await {
        Ok(()) => match file.into_temp_path().keep() {
            Ok(staged) => events.finished(staged),
            Err(e) => events.failed(TransferError::Staging(e.error)),
        },
        Err(e) => events.failed(e),
    }
}

async fn produce(
    file: &NamedTempFile,
    events: &EventSender,
    plan: &SimulationConfig,
    flow: &mut watch::Receiver<Flow>,
) -> Result<(), TransferError> {
    let total = plan.chunk_count as u64 * plan.chunk_bytes as u64;
    let mut out = tokio::fs::File::from_std(file.reopen().map_err(TransferError::Staging)?);
    let mut written = 0u64;
    for chunk in 0..plan.chunk_count {
        let state = flow
            .wait_for(|f| !f.paused || f.cancelled)
            .await
            .map(|f| *f)
            .unwrap_or(Flow {
                paused: false,
                cancelled: true,
            });
        if state.cancelled {
            return Err(TransferError::Cancelled);
        }
        tokio::time::sleep(chunk_delay(plan)).await;
        if flow.borrow().cancelled {
            return Err(TransferError::Cancelled);
        }
        let data = vec![(chunk % 251) as u8; plan.chunk_bytes];
        out.write_all(&data).await.map_err(TransferError::Staging)?;
        written += data.len() as u64;
        events.progress(written, Some(total));
    }
    out.flush().await.map_err(TransferError::Staging)?;
    Ok(())
}
