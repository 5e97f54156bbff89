//! `mdm resume <name>` – continue a paused task.

use anyhow::Result;
use mdm_core::control::ControlCommand;

use super::send_to_running_batch;

pub async fn run_resume(name: &str) -> Result<()> {
    send_to_running_batch(ControlCommand::Resume(name.to_string())).await?;
    println!("Resumed {name}");
    Ok(())
}
