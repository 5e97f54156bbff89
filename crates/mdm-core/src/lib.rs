pub mod config;
pub mod logging;

pub mod batch;
pub mod control;
pub mod destination;
pub mod error;
pub mod event;
pub mod registry;
pub mod scheduler;
pub mod transfer;
pub mod transport;

pub use batch::{BatchCoordinator, BatchError, BatchHandle, BatchReport, DownloadRequest};
pub use error::{DownloadError, TransferError};
pub use event::{ChannelSink, DownloadEvent, EventSender, EventSink, Progress, TransportEvent};
pub use registry::TransferRegistry;
pub use scheduler::{DownloadScheduler, SchedulerSettings};
pub use transfer::{TaskState, TransferHandle, TransferId};
