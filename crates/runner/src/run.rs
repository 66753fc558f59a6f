//! One headless reconstruction run.
//!
//! Uploads the configured video, starts processing, follows progress to
//! an outcome and writes the result media and requested exports to the
//! output directory.

use std::path::{Path, PathBuf};

use futures::StreamExt;
use tokio::io::AsyncWriteExt;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use v2n_client::{
    AssetUpload, LifecycleClient, LifecycleError, LifecycleEvent, Transport, TransportError,
};
use v2n_core::export::file_name_component;
use v2n_core::types::JobId;

use crate::settings::RunnerSettings;

/// Files written by a successful run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunReport {
    pub job_id: JobId,
    pub media_path: Option<PathBuf>,
    pub export_paths: Vec<PathBuf>,
}

#[derive(Debug, thiserror::Error)]
pub enum RunError {
    #[error("Failed to read {path}: {source}")]
    ReadVideo {
        path: PathBuf,
        #[source]
        source: TransportError,
    },

    #[error(transparent)]
    Lifecycle(#[from] LifecycleError),

    #[error("Failed to download result media: {0}")]
    Media(#[source] TransportError),

    #[error("Failed to write {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Log every lifecycle event until the client goes away.
pub fn spawn_observer(mut rx: broadcast::Receiver<LifecycleEvent>) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(LifecycleEvent::Progress {
                    job_id,
                    percent,
                    line,
                }) => {
                    tracing::info!(job_id = %job_id, percent, line = %line, "Progress");
                }
                Ok(LifecycleEvent::EstimateUpdated { estimate }) => {
                    tracing::info!(estimate = %estimate.label(), "Estimated processing time");
                }
                Ok(LifecycleEvent::StateChanged { state }) => {
                    tracing::debug!(state = %state, "Lifecycle state changed");
                }
                Ok(event) => {
                    tracing::debug!(?event, "Lifecycle event");
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "Observer lagged behind lifecycle events");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    })
}

/// Drive one job from upload to outcome and save its outputs.
pub async fn run<T: Transport>(
    client: &mut LifecycleClient<T>,
    settings: &RunnerSettings,
) -> Result<RunReport, RunError> {
    let upload = AssetUpload::from_path(&settings.video_path)
        .await
        .map_err(|source| RunError::ReadVideo {
            path: settings.video_path.clone(),
            source,
        })?;

    client.set_quality(settings.quality).await;
    let asset_id = client.select_asset(upload).await?;
    if client.capabilities().estimate {
        if let Err(e) = client.estimate_duration(&asset_id, settings.quality).await {
            tracing::debug!(asset_id = %asset_id, error = %e, "No estimate after upload");
        }
    }
    let job_id = client.start_job(&asset_id, settings.quality).await?;
    tracing::info!(job_id = %job_id, quality = %settings.quality, "Waiting for processing");

    let job_id = client.wait_for_terminal().await?;

    tokio::fs::create_dir_all(&settings.output_dir)
        .await
        .map_err(|source| RunError::Write {
            path: settings.output_dir.clone(),
            source,
        })?;

    let media_path = if settings.save_result_media {
        Some(save_result_media(client, &job_id, &settings.output_dir).await?)
    } else {
        None
    };

    let mut export_paths = Vec::with_capacity(settings.export_formats.len());
    for format in &settings.export_formats {
        let artifact = client.export_artifact(&job_id, *format).await?;
        let path = settings.output_dir.join(&artifact.filename);
        tokio::fs::write(&path, &artifact.bytes)
            .await
            .map_err(|source| RunError::Write {
                path: path.clone(),
                source,
            })?;
        tracing::info!(path = %path.display(), %format, "Export saved");
        export_paths.push(path);
    }

    Ok(RunReport {
        job_id,
        media_path,
        export_paths,
    })
}

async fn save_result_media<T: Transport>(
    client: &LifecycleClient<T>,
    job_id: &JobId,
    output_dir: &Path,
) -> Result<PathBuf, RunError> {
    let stem = file_name_component(job_id.as_str()).unwrap_or_else(|| "job".to_string());
    let path = output_dir.join(format!("result_{stem}.mp4"));
    let write_error = |source| RunError::Write {
        path: path.clone(),
        source,
    };

    let mut stream = client.fetch_result_media(job_id).await?;
    let mut file = tokio::fs::File::create(&path).await.map_err(write_error)?;
    let mut written = 0usize;
    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(RunError::Media)?;
        file.write_all(&chunk).await.map_err(write_error)?;
        written += chunk.len();
    }
    file.flush().await.map_err(write_error)?;

    tracing::info!(path = %path.display(), bytes = written, "Result media saved");
    Ok(path)
}
