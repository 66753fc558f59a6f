//! `v2n-runner` -- headless video-to-NeRF client.
//!
//! Uploads one video to the reconstruction backend, starts processing,
//! logs progress until the job completes or fails, then saves the
//! rendered preview and requested model exports.
//!
//! # Environment variables
//!
//! | Variable                   | Required | Default                 | Description                          |
//! |----------------------------|----------|-------------------------|--------------------------------------|
//! | `VIDEO_PATH`               | yes      | --                      | Local video to upload                |
//! | `QUALITY`                  | no       | `medium`                | `low`, `medium` or `high`            |
//! | `EXPORT_FORMATS`           | no       | --                      | Comma list of `obj`, `ply`, `glb`    |
//! | `OUTPUT_DIR`               | no       | `.`                     | Where outputs are written            |
//! | `SAVE_RESULT_MEDIA`        | no       | `false`                 | Also save the preview video          |
//! | `V2N_SERVER_URL`           | no       | `http://localhost:5000` | Backend base URL                     |
//! | `V2N_REQUEST_TIMEOUT_SECS` | no       | `30`                    | Timeout for short requests           |
//! | `V2N_ENABLE_ESTIMATE`      | no       | `true`                  | Request duration estimates           |
//! | `V2N_ENABLE_EXPORT`        | no       | `true`                  | Allow exports                        |
//! | `V2N_PROGRESS_BUFFER`      | no       | `64`                    | Buffered progress events             |

use anyhow::Context;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use v2n_client::{HttpTransport, LifecycleClient};
use v2n_runner::run::{run, spawn_observer};
use v2n_runner::settings::RunnerSettings;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "v2n_runner=info,v2n_client=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let settings = RunnerSettings::from_env().context("Failed to load runner settings")?;

    tracing::info!(
        server_url = %settings.client.server_url,
        video = %settings.video_path.display(),
        quality = %settings.quality,
        "Starting v2n-runner",
    );

    let transport =
        HttpTransport::from_config(&settings.client).context("Failed to create HTTP transport")?;
    let mut client = LifecycleClient::new(transport, settings.client.capabilities);
    let observer = spawn_observer(client.subscribe());

    let report = run(&mut client, &settings).await;
    drop(client);
    let _ = observer.await;

    let report = report.context("Reconstruction run failed")?;
    tracing::info!(
        job_id = %report.job_id,
        exports = report.export_paths.len(),
        media_saved = report.media_path.is_some(),
        "Run complete",
    );
    Ok(())
}
