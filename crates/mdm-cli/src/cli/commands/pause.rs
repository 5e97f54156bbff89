//! `mdm pause <name>` – suspend a task of the running batch in place.

use anyhow::Result;
use mdm_core::control::ControlCommand;

use super::send_to_running_batch;

pub async fn run_pause(name: &str) -> Result<()> {
    send_to_running_batch(ControlCommand::Pause(name.to_string())).await?;
    println!("Paused {name}");
    Ok(())
}
