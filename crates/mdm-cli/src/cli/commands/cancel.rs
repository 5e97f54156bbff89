//! `mdm cancel <name>` – cancel a queued or running task. It completes as failed.

use anyhow::Result;
use mdm_core::control::ControlCommand;

use super::send_to_running_batch;

pub async fn run_cancel(name: &str) -> Result<()> {
    send_to_running_batch(ControlCommand::Cancel(name.to_string())).await?;
    println!("Cancelled {name}");
    Ok(())
}
