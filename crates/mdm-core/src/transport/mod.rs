//! Transport contract: how the scheduler issues and controls transfers.
//!
//! A transport creates a transfer on `submit` without starting it. After
//! `TransferControl::start`, it must emit zero or more progress events and
//! then exactly one terminal event (`finished` or `failed`) through the
//! `EventSender` it was given. Nothing may be emitted after the terminal
//! event, and nothing at all for a transfer that was never started.

mod http;
mod simulated;

pub use http::{CurlOptions, CurlTransport};
pub use simulated::SimulatedTransport;

use url::Url;

use crate::error::TransferError;
use crate::event::EventSender;
use crate::transfer::TransferId;

/// Issues transfers.
pub trait Transport: Send + Sync {
    fn submit(
        &self,
        id: TransferId,
        source: &Url,
        events: EventSender,
    ) -> Result<Box<dyn TransferControl>, TransferError>;
}

/// Control surface of one submitted transfer.
///
/// - `suspend` before `start` makes the transfer begin suspended.
/// - `suspend`/`resume` keep received bytes; no data is discarded.
/// - `cancel` on a running transfer ends it with `failed(Cancelled)`;
///   on a transfer that was never started it does nothing.
pub trait TransferControl: Send + Sync {
    fn start(&self);
    fn suspend(&self);
    fn resume(&self);
    fn cancel(&self);
}
