//! Control socket: server (during `mdm run`) and client (for `mdm pause` and friends).
//! Protocol: one command line per request, answered with `ok`, `noop` or `error <reason>`.

use std::fs::Metadata;
use std::os::unix::fs::MetadataExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use mdm_core::control::ControlCommand;
use mdm_core::BatchCoordinator;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};

/// A bound control socket. Dropping it stops the listener and removes the
/// socket file, unless the file at that path is no longer the one it bound.
#[derive(Debug)]
pub struct ControlListener {
    task: tokio::task::JoinHandle<()>,
    path: PathBuf,
    bound: (u64, u64),
}

impl Drop for ControlListener {
    fn drop(&mut self) {
        self.task.abort();
        match std::fs::symlink_metadata(&self.path) {
            Ok(meta) if file_identity(&meta) == self.bound => {
                if let Err(e) = std::fs::remove_file(&self.path) {
                    tracing::debug!(path = %self.path.display(), "remove control socket: {}", e);
                }
            }
            Ok(_) => tracing::debug!(
                path = %self.path.display(),
                "control socket replaced, left in place"
            ),
            Err(_) => {}
        }
    }
}

fn file_identity(meta: &Metadata) -> (u64, u64) {
    (meta.dev(), meta.ino())
}

/// Binds `path` and spawns a task applying each received command to
/// `coordinator`. A stale socket file at `path` is replaced; a socket some
/// other run is still serving is an error.
pub fn spawn_control_listener(
    coordinator: Arc<BatchCoordinator>,
    path: impl AsRef<Path>,
) -> Result<ControlListener> {
    let path = path.as_ref();
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("create control socket dir: {}", dir.display()))?;
    }
    if std::fs::symlink_metadata(path).is_ok() {
        if std::os::unix::net::UnixStream::connect(path).is_ok() {
            bail!("another batch is running (control socket {} is live)", path.display());
        }
        std::fs::remove_file(path)
            .with_context(|| format!("remove stale control socket: {}", path.display()))?;
    }
    let listener = UnixListener::bind(path)
        .with_context(|| format!("bind control socket: {}", path.display()))?;
    let bound = std::fs::symlink_metadata(path)
        .with_context(|| format!("stat control socket: {}", path.display()))?;

    let task = tokio::spawn(async move {
        loop {
            match listener.accept().await {
                Ok((stream, _)) => {
                    let coordinator = Arc::clone(&coordinator);
                    tokio::spawn(serve(stream, coordinator));
                }
                Err(e) => tracing::debug!("control socket accept: {}", e),
            }
        }
    });
    Ok(ControlListener {
        task,
        path: path.to_path_buf(),
        bound: file_identity(&bound),
    })
}

async fn serve(stream: UnixStream, coordinator: Arc<BatchCoordinator>) {
    let (read, mut write) = stream.into_split();
    let mut lines = BufReader::new(read).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        let reply = match ControlCommand::parse(&line) {
            Ok(cmd) => {
                let applied = cmd.apply(&coordinator);
                tracing::info!(verb = cmd.verb(), name = cmd.name(), applied, "control command");
                let reply = if applied { "ok" } else { "noop" };
                reply.to_string()
            }
            Err(e) => format!("error {e}"),
        };
        if write.write_all(format!("{reply}\n").as_bytes()).await.is_err() {
            break;
        }
    }
}

/// Sends `cmd` to the batch listening on `socket_path`. Returns whether a
/// task was affected. Fails if no batch is running.
pub async fn send_command(socket_path: &Path, cmd: &ControlCommand) -> Result<bool> {
    if !socket_path.exists() {
        bail!("no batch is running (no control socket at {})", socket_path.display());
    }
    let stream = UnixStream::connect(socket_path).await.with_context(|| {
        format!("no batch is running (cannot connect to {})", socket_path.display())
    })?;
    let (read, mut write) = stream.into_split();
    write.write_all(cmd.to_line().as_bytes()).await?;

    let reply = BufReader::new(read)
        .lines()
        .next_line()
        .await?
        .context("control socket closed without a reply")?;
    match reply.as_str() {
        "ok" => Ok(true),
        "noop" => Ok(false),
        other => bail!("control command rejected: {}", other.trim_start_matches("error ")),
    }
}
