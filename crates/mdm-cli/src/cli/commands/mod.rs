//! CLI command handlers, one file per command.

mod cancel;
mod completions;
mod man;
mod pause;
mod resume;
mod run;

pub use cancel::run_cancel;
pub use completions::run_completions;
pub use man::run_man;
pub use pause::run_pause;
pub use resume::run_resume;
pub use run::run_batch;

use anyhow::{bail, Result};
use mdm_core::control::{self, ControlCommand};

use crate::cli::control_socket;

/// Sends `cmd` to the running batch; errors if it changed nothing.
async fn send_to_running_batch(cmd: ControlCommand) -> Result<()> {
    let path = control::default_control_socket_path()?;
    if !control_socket::send_command(&path, &cmd).await? {
        bail!(
            "{}: no change for task {:?} (not active, or already in that state)",
            cmd.verb(),
            cmd.name()
        );
    }
    Ok(())
}
