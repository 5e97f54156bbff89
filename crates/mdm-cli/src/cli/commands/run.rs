//! `mdm run` – download a batch and wait for all of it.

use std::path::Path;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use mdm_core::config::MdmConfig;
use mdm_core::transport::{CurlOptions, CurlTransport, SimulatedTransport, Transport};
use mdm_core::{BatchCoordinator, DownloadRequest};
use serde::Deserialize;

use crate::cli::control_socket;
use crate::cli::render::{Line, Renderer};
use crate::cli::RunArgs;

/// `[[download]]` entries of a batch file.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub(crate) struct BatchFile {
    #[serde(default)]
    pub download: Vec<BatchEntry>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub(crate) struct BatchEntry {
    pub url: String,
    #[serde(default)]
    pub name: Option<String>,
}

pub(crate) fn parse_batch_file(data: &str, first_index: usize) -> Result<Vec<DownloadRequest>> {
    let file: BatchFile = toml::from_str(data)?;
    file.download
        .iter()
        .enumerate()
        .map(|(i, entry)| {
            DownloadRequest::from_parts(&entry.url, entry.name.as_deref(), first_index + i)
                .map_err(Into::into)
        })
        .collect()
}

fn load_batch_file(path: &Path, first_index: usize) -> Result<Vec<DownloadRequest>> {
    let data = std::fs::read_to_string(path)
        .with_context(|| format!("read batch file: {}", path.display()))?;
    parse_batch_file(&data, first_index)
        .with_context(|| format!("parse batch file: {}", path.display()))
}

/// Command-line requests first, then the batch file's.
pub(crate) fn collect_requests(args: &RunArgs) -> Result<Vec<DownloadRequest>> {
    let mut requests = args
        .requests
        .iter()
        .enumerate()
        .map(|(i, input)| DownloadRequest::parse(input, i))
        .collect::<Result<Vec<_>, _>>()?;
    if let Some(path) = &args.file {
        let from_file = load_batch_file(path, requests.len())?;
        requests.extend(from_file);
    }
    Ok(requests)
}

/// Applies command-line overrides on top of the loaded config.
pub(crate) fn apply_overrides(mut cfg: MdmConfig, args: &RunArgs) -> MdmConfig {
    if let Some(jobs) = args.jobs {
        cfg.max_parallel = jobs as usize;
    }
    if let Some(dir) = &args.output_dir {
        cfg.output_dir = Some(dir.clone());
    }
    if args.overwrite {
        cfg.overwrite = true;
    }
    if args.randomize {
        cfg.simulation.randomize = true;
    }
    cfg
}

/// Runs the batch to completion. Returns false if any download failed.
pub async fn run_batch(cfg: MdmConfig, args: RunArgs) -> Result<bool> {
    let socket_path = mdm_core::control::default_control_socket_path().ok();
    execute(cfg, args, socket_path.as_deref()).await
}

async fn execute(cfg: MdmConfig, args: RunArgs, socket_path: Option<&Path>) -> Result<bool> {
    let requests = collect_requests(&args)?;
    if requests.is_empty() {
        bail!("nothing to download: pass URLs or --file <batch.toml>");
    }
    let cfg = apply_overrides(cfg, &args);
    let settings = cfg.scheduler_settings()?;

    let transport: Arc<dyn Transport> = if args.simulate {
        Arc::new(SimulatedTransport::new(
            settings.staging_dir.clone(),
            cfg.simulation.clone(),
        ))
    } else {
        Arc::new(CurlTransport::new(
            settings.staging_dir.clone(),
            CurlOptions::from(&cfg.transport),
        ))
    };
    tracing::info!(
        tasks = requests.len(),
        max_parallel = settings.max_parallel,
        output_dir = %settings.destination.output_dir().display(),
        simulate = args.simulate,
        "run"
    );

    let renderer = Arc::new(Renderer::new(args.json));
    for request in &requests {
        renderer.emit(&Line::Pending {
            name: &request.name,
            source: request.source.as_str(),
        });
    }
    let coordinator = Arc::new(BatchCoordinator::new(
        settings,
        transport,
        Arc::clone(&renderer) as Arc<dyn mdm_core::EventSink>,
    ));

    // Held to the end of the run; dropping it removes the socket on every exit path.
    let _listener = socket_path.and_then(|path| {
        match control_socket::spawn_control_listener(Arc::clone(&coordinator), path) {
            Ok(listener) => {
                tracing::debug!(path = %path.display(), "control socket listening");
                Some(listener)
            }
            Err(e) => {
                tracing::warn!("control socket unavailable: {:#}", e);
                None
            }
        }
    });

    let handle = coordinator.run_batch(requests)?;
    let report = handle.wait().await?;
    tracing::info!(
        succeeded = report.succeeded,
        failed = report.failed,
        "run completed {} download(s)",
        report.total
    );
    Ok(report.failed == 0)
}
